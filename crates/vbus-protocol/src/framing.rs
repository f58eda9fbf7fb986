//! Sync-byte framing for the VBUS byte stream
//!
//! VBUS messages are self-delimited by a single sync byte; there is no
//! escaping, so splitting is a plain scan over the buffer.

use serde::{Deserialize, Serialize};

/// Marks the start of every VBUS message
pub const SYNC_BYTE: u8 = 0xAA;

/// How boundary fragments of a capture are treated when splitting
///
/// A capture file written between two sync bytes is complete and every
/// fragment is a candidate message. A buffer read mid-stream usually starts
/// and ends inside a message, so the leading and trailing fragments are
/// partial and should be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SplitPolicy {
    /// Keep every non-empty fragment (offline capture files)
    KeepAll,
    /// Drop the first and last fragment (live stream reads)
    DropBoundary,
}

impl std::str::FromStr for SplitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep-all" => Ok(SplitPolicy::KeepAll),
            "drop-boundary" => Ok(SplitPolicy::DropBoundary),
            other => Err(format!(
                "unknown split policy {other:?} (expected keep-all or drop-boundary)"
            )),
        }
    }
}

/// Split a raw buffer into candidate message frames on the sync byte
///
/// Empty fragments (consecutive sync bytes, or a buffer starting/ending on
/// one) are discarded. The returned frames borrow from `raw`.
pub fn split_frames(raw: &[u8], policy: SplitPolicy) -> Vec<&[u8]> {
    let fragments: Vec<&[u8]> = raw.split(|&b| b == SYNC_BYTE).collect();

    let kept: &[&[u8]] = match policy {
        SplitPolicy::KeepAll => &fragments,
        SplitPolicy::DropBoundary => {
            if fragments.len() <= 2 {
                &[]
            } else {
                &fragments[1..fragments.len() - 1]
            }
        }
    };

    kept.iter().copied().filter(|f| !f.is_empty()).collect()
}

/// Count sync bytes in a buffer, used to judge whether a read window has
/// accumulated enough complete messages to be worth decoding.
pub fn count_sync(buf: &[u8]) -> usize {
    buf.iter().filter(|&&b| b == SYNC_BYTE).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_keep_all() {
        let raw = [SYNC_BYTE, 1, 2, SYNC_BYTE, 3, 4, SYNC_BYTE];
        let frames = split_frames(&raw, SplitPolicy::KeepAll);
        assert_eq!(frames, vec![&[1u8, 2][..], &[3u8, 4][..]]);
    }

    #[test]
    fn test_split_drop_boundary() {
        // Leading and trailing fragments are partial messages
        let raw = [9, 9, SYNC_BYTE, 1, 2, SYNC_BYTE, 3, 4];
        let frames = split_frames(&raw, SplitPolicy::DropBoundary);
        assert_eq!(frames, vec![&[1u8, 2][..]]);
    }

    #[test]
    fn test_split_drop_boundary_too_few_fragments() {
        let raw = [1, 2, SYNC_BYTE, 3, 4];
        assert!(split_frames(&raw, SplitPolicy::DropBoundary).is_empty());
    }

    #[test]
    fn test_split_no_sync_bytes() {
        let raw = [1, 2, 3];
        assert_eq!(split_frames(&raw, SplitPolicy::KeepAll), vec![&[1u8, 2, 3][..]]);
        assert!(split_frames(&raw, SplitPolicy::DropBoundary).is_empty());
    }

    #[test]
    fn test_split_discards_empty_fragments() {
        let raw = [SYNC_BYTE, SYNC_BYTE, 1, SYNC_BYTE, SYNC_BYTE];
        let frames = split_frames(&raw, SplitPolicy::KeepAll);
        assert_eq!(frames, vec![&[1u8][..]]);
    }

    #[test]
    fn test_count_sync() {
        assert_eq!(count_sync(&[]), 0);
        assert_eq!(count_sync(&[SYNC_BYTE, 1, SYNC_BYTE, SYNC_BYTE]), 3);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("keep-all".parse::<SplitPolicy>().unwrap(), SplitPolicy::KeepAll);
        assert_eq!(
            "drop-boundary".parse::<SplitPolicy>().unwrap(),
            SplitPolicy::DropBoundary
        );
        assert!("both".parse::<SplitPolicy>().is_err());
    }
}
