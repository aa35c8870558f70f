//! Provides platform-specific functionality.
//!
//! macOS and Linux name and manage disks differently: macOS has whole disks
//! and slices (`/dev/disk4`, `/dev/disk4s1`) plus a raw node per disk, Linux
//! has block devices and numbered partitions (`/dev/sdb`, `/dev/sdb2`). The
//! [`Platform`] trait captures every place the pipeline needs to care, and
//! [`detect`] picks the implementation once at startup so the stages never
//! branch on the OS themselves.
//!
//! Both implementations only build command lines and parse text, so they are
//! compiled (and tested) everywhere.

mod linux;
mod macos;

pub use self::linux::Linux;
pub use self::macos::MacOs;

use crate::device::BlockDevice;
use crate::error::Outcome;
use crate::process::{Cmd, CommandRunner};
use std::path::{Path, PathBuf};

/// The OS-specific capabilities used by the provisioning pipeline.
pub trait Platform {
    fn name(&self) -> &'static str;

    /// Lists candidate removable disks. Never fails; problems become warnings.
    fn list_drives(&self, runner: &dyn CommandRunner) -> Outcome<Vec<BlockDevice>>;

    /// Unmounts every partition of `device`. Best effort.
    fn unmount_disk(&self, runner: &dyn CommandRunner, device: &Path);

    /// The node `dd` should write to.
    fn write_target(&self, device: &Path) -> PathBuf;

    /// `dd` block size argument in the dialect of the local `dd`.
    fn dd_block_size(&self) -> &'static str;

    /// Extra `dd` operands, e.g. progress reporting.
    fn dd_extra_args(&self) -> &'static [&'static str];

    /// Boot partitions to try, in order, after the image has been written.
    fn boot_partition_candidates(&self, runner: &dyn CommandRunner, device: &Path)
    -> Vec<PathBuf>;

    /// Filesystem type hint for `mount -t`, where the platform needs one.
    fn mount_fstype(&self) -> Option<&'static str>;

    fn eject_command(&self, device: &Path) -> Cmd;

    /// External tools the pipeline calls on this platform, besides `dd` and `sudo`.
    fn required_tools(&self) -> &'static [&'static str];

    /// A shell command that installs `missing` tools.
    fn install_hint(&self, missing: &[String]) -> String;
}

/// Returns the implementation for the OS we were compiled for, or `None` if
/// the OS is not supported.
pub fn detect() -> Option<Box<dyn Platform>> {
    if cfg!(target_os = "macos") {
        Some(Box::new(MacOs))
    } else if cfg!(target_os = "linux") {
        Some(Box::new(Linux))
    } else {
        None
    }
}
