//! Generated blob names.
//!
//! A whole backup is stored as `<prefix>_<epochMillis>.<ext>`; a chunked one
//! as `<prefix>_<epochMillis>.part-<i>-of-<n>.<ext>`. The stem up to the first
//! dot identifies the logical backup.

use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedName {
    pub stem: String,
    pub epoch_ms: Option<i64>,
    /// `(index, count)` for a chunk part
    pub part: Option<(usize, usize)>,
}

pub(crate) fn backup_name(prefix: &str, epoch_ms: i64, ext: &str) -> String {
    format!("{prefix}_{epoch_ms}.{ext}")
}

pub(crate) fn part_name(prefix: &str, epoch_ms: i64, index: usize, count: usize, ext: &str) -> String {
    format!("{prefix}_{epoch_ms}.part-{index:03}-of-{count:03}.{ext}")
}

pub(crate) fn parse(name: &str) -> ParsedName {
    let (stem, rest) = name.split_once('.').unwrap_or((name, ""));

    let epoch_ms = stem
        .rsplit_once('_')
        .map(|(_, digits)| digits)
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<i64>().ok());

    let part = rest.split('.').find_map(|segment| {
        let part = segment.strip_prefix("part-")?;
        let (index, count) = part.split_once("-of-")?;
        let index = index.parse::<usize>().ok()?;
        let count = count.parse::<usize>().ok()?;
        (index < count).then_some((index, count))
    });

    ParsedName {
        stem: stem.to_string(),
        epoch_ms,
        part,
    }
}

/// Creation time encoded in a generated name
pub(crate) fn embedded_timestamp(name: &str) -> Option<DateTime<Utc>> {
    parse(name)
        .epoch_ms
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}
