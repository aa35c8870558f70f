use super::Platform;
use crate::catalog;
use crate::device::BlockDevice;
use crate::error::{Outcome, Warning};
use crate::process::{Cmd, CommandRunner, RunOptions};
use std::path::{Path, PathBuf};

/// macOS: `diskutil` for everything, slices named `diskNsM`, and a raw
/// `/dev/rdiskN` node that bypasses the buffer cache.
#[derive(Clone, Copy, Debug, Default)]
pub struct MacOs;

/// Picks the slice tagged `EFI` out of a `diskutil list <disk>` listing.
pub(crate) fn find_efi_slice(listing: &str, disk_name: &str) -> Option<PathBuf> {
    let slice_prefix = format!("{disk_name}s");
    listing
        .lines()
        .filter(|line| line.contains("EFI"))
        .flat_map(str::split_whitespace)
        .find(|token| token.starts_with(&slice_prefix))
        .map(|slice| PathBuf::from("/dev").join(slice))
}

impl Platform for MacOs {
    fn name(&self) -> &'static str {
        "macOS"
    }

    fn list_drives(&self, runner: &dyn CommandRunner) -> Outcome<Vec<BlockDevice>> {
        let cmd = Cmd::new("diskutil")
            .args(["list", "external", "physical"])
            .read_only();
        match runner.run(&cmd, RunOptions::checked()) {
            Ok(text) => catalog::parse_diskutil_list(&text),
            Err(e) => {
                let mut outcome = Outcome::new(Vec::new());
                outcome.warn(Warning::new("list macOS drives", e));
                outcome
            }
        }
    }

    fn unmount_disk(&self, runner: &dyn CommandRunner, device: &Path) {
        let cmd = Cmd::new("diskutil")
            .arg("unmountDisk")
            .arg(device.display().to_string());
        runner.run(&cmd, RunOptions::fire_and_forget()).ok();
    }

    fn write_target(&self, device: &Path) -> PathBuf {
        let path = device.to_string_lossy();
        match path.strip_prefix("/dev/disk") {
            Some(rest) => PathBuf::from(format!("/dev/rdisk{rest}")),
            None => device.to_path_buf(),
        }
    }

    fn dd_block_size(&self) -> &'static str {
        "4m"
    }

    fn dd_extra_args(&self) -> &'static [&'static str] {
        &[]
    }

    fn boot_partition_candidates(
        &self,
        runner: &dyn CommandRunner,
        device: &Path,
    ) -> Vec<PathBuf> {
        // macOS auto-mounts the fresh partitions; they have to go first.
        self.unmount_disk(runner, device);

        let disk_name = device
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let listing = Cmd::new("diskutil")
            .arg("list")
            .arg(device.display().to_string())
            .read_only();

        let efi = match runner.run(&listing, RunOptions::checked()) {
            Ok(text) => find_efi_slice(&text, &disk_name),
            Err(e) => {
                log::warn!("could not list slices of {}: {e}", device.display());
                None
            }
        };

        vec![efi.unwrap_or_else(|| PathBuf::from(format!("{}s1", device.display())))]
    }

    fn mount_fstype(&self) -> Option<&'static str> {
        Some("msdos")
    }

    fn eject_command(&self, device: &Path) -> Cmd {
        Cmd::new("diskutil")
            .arg("eject")
            .arg(device.display().to_string())
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &["diskutil", "mount", "umount"]
    }

    fn install_hint(&self, missing: &[String]) -> String {
        format!("brew install {}", missing.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedRunner;

    const SLICES: &str = "\
/dev/disk4 (external, physical):
   #:                       TYPE NAME                    SIZE       IDENTIFIER
   0:     FDisk_partition_scheme                        *15.5 GB    disk4
   1:                  Apple_HFS                         1.3 GB     disk4s1
   2:                        EFI EFI                     8.4 MB     disk4s2
";

    #[test]
    fn substitutes_raw_disk_node() {
        assert_eq!(
            MacOs.write_target(Path::new("/dev/disk4")),
            PathBuf::from("/dev/rdisk4")
        );
    }

    #[test]
    fn finds_slice_tagged_efi() {
        assert_eq!(
            find_efi_slice(SLICES, "disk4"),
            Some(PathBuf::from("/dev/disk4s2"))
        );
    }

    #[test]
    fn falls_back_to_first_slice_without_efi_tag() {
        let runner = ScriptedRunner::new().respond(
            "diskutil list /dev/disk4",
            "/dev/disk4 (external, physical):\n   1:  Apple_HFS  Untitled  1 GB  disk4s1\n",
        );
        let candidates = MacOs.boot_partition_candidates(&runner, Path::new("/dev/disk4"));
        assert_eq!(candidates, vec![PathBuf::from("/dev/disk4s1")]);
        assert_eq!(runner.called("diskutil unmountDisk /dev/disk4"), 1);
    }

    #[test]
    fn uses_efi_slice_from_listing() {
        let runner = ScriptedRunner::new().respond("diskutil list /dev/disk4", SLICES);
        let candidates = MacOs.boot_partition_candidates(&runner, Path::new("/dev/disk4"));
        assert_eq!(candidates, vec![PathBuf::from("/dev/disk4s2")]);
    }
}
