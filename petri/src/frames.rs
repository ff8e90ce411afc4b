//! Frame discovery for time-lapse directories.
//!
//! Frames are image files whose names embed a capture timestamp written as
//! `DD.MM.YYYY-HH.MM.SS`. Files are taken in lexicographic order of their
//! paths; that order must agree with the parsed timestamps.

use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// strftime pattern of the timestamp embedded in frame filenames
pub const TIMESTAMP_FORMAT: &str = "%d.%m.%Y-%H.%M.%S";

const TIMESTAMP_LEN: usize = "DD.MM.YYYY-HH.MM.SS".len();

/// One timestamped image of a sequence
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEntry {
    /// Position in the directory listing after skipped files are removed
    pub sequence: usize,
    pub timestamp: NaiveDateTime,
    pub path: PathBuf,
}

/// A file left out of the series, with the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

impl SkippedFile {
    pub fn new(path: &Path, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string_lossy().to_string(),
            reason: reason.into(),
        }
    }
}

/// Frames of one directory and the files that did not make it
#[derive(Debug, Clone, Default)]
pub struct FrameCollection {
    pub frames: Vec<FrameEntry>,
    pub skipped: Vec<SkippedFile>,
}

/// Find the capture timestamp in a filename.
///
/// The stem is scanned for the first window that parses with
/// [`TIMESTAMP_FORMAT`], so prefixes such as `plate3_` are allowed.
pub fn parse_frame_timestamp(path: &Path) -> Option<NaiveDateTime> {
    let stem = path.file_stem()?.to_str()?;
    if stem.len() < TIMESTAMP_LEN {
        return None;
    }

    (0..=stem.len() - TIMESTAMP_LEN)
        .filter(|&start| {
            stem.is_char_boundary(start) && stem.is_char_boundary(start + TIMESTAMP_LEN)
        })
        .find_map(|start| {
            NaiveDateTime::parse_from_str(&stem[start..start + TIMESTAMP_LEN], TIMESTAMP_FORMAT)
                .ok()
        })
}

/// Turn a sorted listing of image paths into frames.
///
/// Unparseable names and repeated timestamps are reported in
/// [`FrameCollection::skipped`] and logged; they never become frames.
pub fn collect_frames(paths: &[PathBuf]) -> FrameCollection {
    let mut collection = FrameCollection::default();

    for path in paths {
        let Some(timestamp) = parse_frame_timestamp(path) else {
            warn!(
                "{}Skipping {}: filename has no DD.MM.YYYY-HH.MM.SS timestamp",
                crate::color_utils::symbols::warning(),
                path.display()
            );
            collection
                .skipped
                .push(SkippedFile::new(path, "no timestamp in filename"));
            continue;
        };

        if let Some(earlier) = collection
            .frames
            .iter()
            .find(|frame| frame.timestamp == timestamp)
        {
            warn!(
                "{}Skipping {}: timestamp {} already taken by {}",
                crate::color_utils::symbols::warning(),
                path.display(),
                timestamp,
                earlier.path.display()
            );
            collection.skipped.push(SkippedFile::new(
                path,
                format!("duplicate timestamp {timestamp}"),
            ));
            continue;
        }

        collection.frames.push(FrameEntry {
            sequence: collection.frames.len(),
            timestamp,
            path: path.clone(),
        });
    }

    collection
}

/// Verify that listing order and capture order agree.
pub fn check_chronological(frames: &[FrameEntry]) -> Result<()> {
    for pair in frames.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            bail!(
                "Frame order does not follow capture time: {} ({}) is listed after {} ({})",
                pair[1].path.display(),
                pair[1].timestamp,
                pair[0].path.display(),
                pair[0].timestamp
            );
        }
    }
    Ok(())
}

/// Reorder frames by capture time and renumber them.
pub fn sort_chronologically(frames: &mut [FrameEntry]) {
    frames.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.sequence.cmp(&b.sequence)));
    for (sequence, frame) in frames.iter_mut().enumerate() {
        frame.sequence = sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, month: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, month, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_parse_plain_timestamp() {
        let ts = parse_frame_timestamp(Path::new("/data/01.01.2025-00.00.05.jpg"));
        assert_eq!(ts, Some(at(1, 1, 0, 0, 5)));
    }

    #[test]
    fn test_parse_timestamp_with_prefix_and_suffix() {
        let ts = parse_frame_timestamp(Path::new("plate_3-14.02.2025-13.45.00_raw.png"));
        assert_eq!(ts, Some(at(14, 2, 13, 45, 0)));
    }

    #[test]
    fn test_parse_rejects_other_names() {
        assert_eq!(parse_frame_timestamp(Path::new("IMG_0001.jpg")), None);
        assert_eq!(parse_frame_timestamp(Path::new("2025-01-01T00:00:00.jpg")), None);
        assert_eq!(parse_frame_timestamp(Path::new("32.01.2025-00.00.00.jpg")), None);
        assert_eq!(parse_frame_timestamp(Path::new("ü.jpg")), None);
    }

    #[test]
    fn test_collect_frames_skips_unparseable_and_duplicates() {
        let paths = vec![
            PathBuf::from("a/01.01.2025-00.00.00.jpg"),
            PathBuf::from("a/01.01.2025-00.00.00.png"),
            PathBuf::from("a/01.01.2025-00.00.05.jpg"),
            PathBuf::from("a/notes.jpg"),
        ];

        let collection = collect_frames(&paths);
        assert_eq!(collection.frames.len(), 2);
        assert_eq!(collection.frames[0].sequence, 0);
        assert_eq!(collection.frames[1].sequence, 1);
        assert_eq!(collection.frames[1].timestamp, at(1, 1, 0, 0, 5));
        assert_eq!(collection.skipped.len(), 2);
        assert!(collection.skipped[0].reason.contains("duplicate"));
        assert!(collection.skipped[1].path.ends_with("notes.jpg"));
    }

    #[test]
    fn test_lexicographic_order_can_disagree_with_time() {
        // Day-first names sort by day before month
        let mut paths = vec![
            PathBuf::from("02.01.2025-00.00.00.jpg"),
            PathBuf::from("01.02.2025-00.00.00.jpg"),
        ];
        paths.sort();

        let mut collection = collect_frames(&paths);
        let err = check_chronological(&collection.frames).unwrap_err();
        assert!(err.to_string().contains("02.01.2025-00.00.00.jpg"));

        sort_chronologically(&mut collection.frames);
        assert!(check_chronological(&collection.frames).is_ok());
        assert_eq!(collection.frames[0].timestamp, at(2, 1, 0, 0, 0));
        assert_eq!(collection.frames[0].sequence, 0);
    }
}
