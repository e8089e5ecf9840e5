use std::path::PathBuf;

/// Which `Index` implementation a segment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Expected O(1) store/query, unspecified iteration order.
    Hash,
    /// Key-sorted; binary-search query, ascending iteration.
    Sorted,
}

/// Engine configuration (spec §6).
#[derive(Debug, Clone)]
pub struct Config {
    /// Rollover threshold in bytes. Default 4 MiB.
    pub max_segment_size_bytes: u64,
    /// Compaction trigger: segment count above which the compactor is woken. Must be >= 2.
    pub merge_threshold_segments: usize,
    /// Directory holding segment files.
    pub data_dir: PathBuf,
    /// Index implementation used by newly created (non-compactor) segments.
    pub index_kind: IndexKind,
    /// Fixed byte sequence written after every encoded blob.
    pub delimiter_bytes: Vec<u8>,
}

impl Config {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> std::io::Result<()> {
        if self.merge_threshold_segments < 2 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "merge_threshold_segments must be >= 2, {} given",
                    self.merge_threshold_segments
                ),
            ));
        }
        if self.delimiter_bytes.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "delimiter_bytes must not be empty",
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_segment_size_bytes: 4 * 1024 * 1024,
            merge_threshold_segments: 4,
            data_dir: PathBuf::from("."),
            index_kind: IndexKind::Hash,
            delimiter_bytes: vec![0xff, 0xfe, 0xff, 0xfe],
        }
    }
}
