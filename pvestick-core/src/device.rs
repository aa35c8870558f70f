use std::fmt;
use std::path::{Path, PathBuf};

/// A removable block device offered to the operator.
///
/// Produced by [`crate::catalog`] for a single query and never persisted. Two
/// devices are the same device when their paths are equal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockDevice {
    /// The system path to the whole disk (e.g. `/dev/sdb` or `/dev/disk4`).
    pub path: PathBuf,
    /// Human-readable descriptor: size, model, transport.
    pub label: String,
}

impl BlockDevice {
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
        }
    }

    /// The kernel name of the disk (e.g. "sdb").
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Display for BlockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<15} {}", self.path.display(), self.label)
    }
}

/// A disk image on the local filesystem. The pipeline only ever reads it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSource {
    pub path: PathBuf,
}

impl ImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AsRef<Path> for ImageSource {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Builds the path of partition `index` on `disk`.
///
/// Disks whose name ends in a digit use a `p` separator (`/dev/mmcblk0p2`,
/// `/dev/nvme0n1p1`), everything else gets the number appended (`/dev/sdb2`).
pub fn partition_path(disk: &Path, index: u32) -> PathBuf {
    let disk_str = disk.to_string_lossy();
    if disk_str.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{disk_str}p{index}"))
    } else {
        PathBuf::from(format!("{disk_str}{index}"))
    }
}

/// Helper to find the parent device of a partition (e.g., /dev/sda1 -> /dev/sda).
pub fn parent_device_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str.starts_with("/dev/sd") || path_str.starts_with("/dev/vd") {
        if let Some(index) = path_str.rfind(|c: char| c.is_alphabetic()) {
            return PathBuf::from(&path_str[..=index]);
        }
    } else if path_str.starts_with("/dev/mmcblk") || path_str.starts_with("/dev/nvme") {
        if let Some(index) = path_str.rfind('p') {
            if index > "/dev/".len() && path_str[index + 1..].chars().all(|c| c.is_ascii_digit()) {
                return PathBuf::from(&path_str[..index]);
            }
        }
    }

    path.to_path_buf()
}
