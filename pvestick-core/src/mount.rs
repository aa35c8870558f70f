//! Mounts the EFI partition of a freshly written device.
//!
//! The mount point is a single well-known directory reused across runs. A
//! leftover mount from an earlier run is unmounted first; anything else already
//! living there is refused, never deleted. The mount is handed out as a
//! [`MountGuard`], which unmounts it when dropped, on every exit path.
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::process::{Cmd, CommandRunner, RunOptions};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

pub const DEFAULT_MOUNT_POINT: &str = "/tmp/pve-efi-mount";

/// How long the OS gets to register the new partition table.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct MountSettings {
    pub mount_point: PathBuf,
    pub settle: Duration,
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from(DEFAULT_MOUNT_POINT),
            settle: DEFAULT_SETTLE,
        }
    }
}

/// A mounted boot partition. Unmounted when dropped.
pub struct MountGuard<'r> {
    runner: &'r dyn CommandRunner,
    mount_point: PathBuf,
    partition: PathBuf,
}

impl<'r> MountGuard<'r> {
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// The device node currently mounted at [`Self::mount_point`].
    pub fn partition(&self) -> &Path {
        &self.partition
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        log::info!("unmounting {}", self.mount_point.display());
        let cmd = Cmd::sudo("umount").arg(self.mount_point.display().to_string());
        self.runner.run(&cmd, RunOptions::fire_and_forget()).ok();
    }
}

impl fmt::Debug for MountGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountGuard")
            .field("mount_point", &self.mount_point)
            .field("partition", &self.partition)
            .finish()
    }
}

/// Whether a filesystem is mounted at `path`, i.e. it sits on a different
/// device than its parent directory.
#[cfg(unix)]
fn is_mount_point(path: &Path) -> bool {
    use nix::sys::stat::stat;

    let Some(parent) = path.parent() else {
        return true;
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    match (stat(path), stat(parent)) {
        (Ok(own), Ok(up)) => own.st_dev != up.st_dev || own.st_ino == up.st_ino,
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_mount_point(_path: &Path) -> bool {
    false
}

/// Makes `mount_point` ready to mount on.
///
/// A missing directory is created through the runner. A stale mount is
/// unmounted. An existing empty directory is reused. Anything else is left
/// untouched and reported as [`Error::MountPointInUse`].
fn prepare_mount_point(runner: &dyn CommandRunner, mount_point: &Path) -> Result<()> {
    let path = mount_point.display().to_string();
    let in_use = || Error::MountPointInUse {
        path: mount_point.to_path_buf(),
    };

    if !mount_point.exists() {
        runner.run(
            &Cmd::sudo("mkdir").args(["-p", path.as_str()]),
            RunOptions::checked(),
        )?;
        return Ok(());
    }
    if !mount_point.is_dir() {
        return Err(in_use());
    }

    if is_mount_point(mount_point) {
        log::info!("unmounting stale mount at {path}");
        runner.run(&Cmd::sudo("umount").arg(&path), RunOptions::checked())?;
        return Ok(());
    }

    if fs::read_dir(mount_point)?.next().is_some() {
        return Err(in_use());
    }
    log::debug!("reusing empty mount point {path}");
    Ok(())
}

fn mount_command(platform: &dyn Platform, partition: &Path, mount_point: &Path) -> Cmd {
    let mut cmd = Cmd::sudo("mount");
    if let Some(fstype) = platform.mount_fstype() {
        cmd = cmd.args(["-t", fstype]);
    }
    cmd.arg(partition.display().to_string())
        .arg(mount_point.display().to_string())
}

/// Finds and mounts the boot/EFI partition of `device`.
///
/// Each candidate partition from the platform is tried exactly once, in
/// order.
///
/// # Errors
///
/// Returns [`Error::Mount`] naming the last partition tried when none of them
/// can be mounted.
pub fn mount<'r>(
    platform: &dyn Platform,
    runner: &'r dyn CommandRunner,
    device: &BlockDevice,
    settings: &MountSettings,
) -> Result<MountGuard<'r>> {
    prepare_mount_point(runner, &settings.mount_point)?;

    log::info!("searching for EFI partition on {}", device.path.display());
    thread::sleep(settings.settle);

    let mut last_attempt = None;
    for partition in platform.boot_partition_candidates(runner, &device.path) {
        log::info!(
            "mounting {} on {}",
            partition.display(),
            settings.mount_point.display()
        );
        let cmd = mount_command(platform, &partition, &settings.mount_point);
        match runner.run(&cmd, RunOptions::checked()) {
            Ok(_) => {
                return Ok(MountGuard {
                    runner,
                    mount_point: settings.mount_point.clone(),
                    partition,
                });
            }
            Err(e) => {
                log::warn!("could not mount {}: {e}", partition.display());
                last_attempt = Some(partition);
            }
        }
    }

    Err(Error::Mount {
        partition: last_attempt.unwrap_or_else(|| device.path.clone()),
    })
}
