/*!
Splitting encoded snapshots into size-bounded chunks and back.

Some backends cap the size of a single stored value. Chunked writes are not
transactional, so reconstruction is all-or-nothing: any missing index fails
the whole manifest.
*/

use crate::{Result, VaultError};
use std::collections::BTreeMap;

/// One bounded fragment of an encoded snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub data: Vec<u8>,
}

/// The chunks of one encoded snapshot together with the expected count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkManifest {
    pub chunk_count: usize,
    pub chunks: Vec<Chunk>,
}

impl ChunkManifest {
    /// Manifest assembled from chunks fetched independently, in any order
    pub fn from_parts(chunk_count: usize, chunks: Vec<Chunk>) -> Self {
        Self {
            chunk_count,
            chunks,
        }
    }

    pub fn total_len(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }
}

/// Split `bytes` into chunks of at most `max_size` bytes
pub fn chunk(bytes: &[u8], max_size: usize) -> Result<ChunkManifest> {
    if max_size == 0 {
        return Err(VaultError::validation("chunk size must be positive"));
    }

    let chunks: Vec<Chunk> = bytes
        .chunks(max_size)
        .enumerate()
        .map(|(index, data)| Chunk {
            index,
            data: data.to_vec(),
        })
        .collect();

    Ok(ChunkManifest {
        chunk_count: chunks.len(),
        chunks,
    })
}

/// Reassemble the original bytes.
///
/// Fails with [`VaultError::IncompleteManifest`] if any index in
/// `0..chunk_count` is absent and with [`VaultError::Format`] for indexes
/// outside that range or conflicting duplicates.
pub fn reconstruct(manifest: &ChunkManifest) -> Result<Vec<u8>> {
    let mut by_index: BTreeMap<usize, &[u8]> = BTreeMap::new();

    for chunk in &manifest.chunks {
        if chunk.index >= manifest.chunk_count {
            return Err(VaultError::format(format!(
                "chunk index {} is outside a manifest of {} chunks",
                chunk.index, manifest.chunk_count
            )));
        }
        if let Some(existing) = by_index.insert(chunk.index, &chunk.data) {
            if existing != chunk.data.as_slice() {
                return Err(VaultError::format(format!(
                    "chunk {} appears twice with different contents",
                    chunk.index
                )));
            }
        }
    }

    if let Some(missing) = (0..manifest.chunk_count).find(|i| !by_index.contains_key(i)) {
        return Err(VaultError::IncompleteManifest {
            missing,
            chunk_count: manifest.chunk_count,
        });
    }

    let expected_len: usize = by_index.values().map(|data| data.len()).sum();
    let mut bytes = Vec::with_capacity(expected_len);
    for data in by_index.values() {
        bytes.extend_from_slice(data);
    }
    debug_assert_eq!(bytes.len(), expected_len);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_chunk_round_trip_for_many_sizes() {
        let bytes = payload(1000);
        for max_size in [1, 7, 100, 999, 1000, 1001, 4096] {
            let manifest = chunk(&bytes, max_size).unwrap();
            assert_eq!(manifest.chunk_count, bytes.len().div_ceil(max_size));
            assert!(manifest.chunks.iter().all(|c| c.data.len() <= max_size));
            assert_eq!(manifest.total_len(), bytes.len());
            assert_eq!(reconstruct(&manifest).unwrap(), bytes);
        }
    }

    #[test]
    fn test_removing_any_chunk_fails_closed() {
        let bytes = payload(50);
        let manifest = chunk(&bytes, 10).unwrap();
        assert_eq!(manifest.chunk_count, 5);

        for removed in 0..manifest.chunk_count {
            let mut partial = manifest.clone();
            partial.chunks.retain(|c| c.index != removed);
            match reconstruct(&partial) {
                Err(VaultError::IncompleteManifest {
                    missing,
                    chunk_count,
                }) => {
                    assert_eq!(missing, removed);
                    assert_eq!(chunk_count, 5);
                }
                other => panic!("expected incomplete manifest, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_out_of_order_chunks_reassemble() {
        let bytes = payload(30);
        let mut manifest = chunk(&bytes, 8).unwrap();
        manifest.chunks.reverse();
        let rebuilt = ChunkManifest::from_parts(manifest.chunk_count, manifest.chunks);
        assert_eq!(reconstruct(&rebuilt).unwrap(), bytes);
    }

    #[test]
    fn test_out_of_range_and_conflicting_chunks_rejected() {
        let bytes = payload(20);
        let mut manifest = chunk(&bytes, 10).unwrap();
        manifest.chunks.push(Chunk {
            index: 2,
            data: vec![1],
        });
        assert!(matches!(reconstruct(&manifest), Err(VaultError::Format(_))));

        let mut manifest = chunk(&bytes, 10).unwrap();
        manifest.chunks.push(Chunk {
            index: 0,
            data: vec![9, 9],
        });
        assert!(matches!(reconstruct(&manifest), Err(VaultError::Format(_))));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(chunk(b"abc", 0), Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_empty_input_has_no_chunks() {
        let manifest = chunk(b"", 16).unwrap();
        assert_eq!(manifest.chunk_count, 0);
        assert!(reconstruct(&manifest).unwrap().is_empty());
    }
}
