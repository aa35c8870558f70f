use super::Platform;
use crate::catalog;
use crate::device::{BlockDevice, parent_device_path, partition_path};
use crate::error::{Outcome, Warning};
use crate::process::{Cmd, CommandRunner, RunOptions};
use std::path::{Path, PathBuf};

/// Linux: `lsblk` for discovery, numbered partitions, `partprobe` to reread
/// the partition table.
#[derive(Clone, Copy, Debug, Default)]
pub struct Linux;

/// Index of the EFI partition on Proxmox VE installer ISOs, then the fallback.
const BOOT_PARTITION_INDICES: [u32; 2] = [2, 1];

/// Finds the disk that holds the root filesystem so it is never offered as
/// a target.
fn system_disk() -> Option<PathBuf> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .map(|disk| parent_device_path(&PathBuf::from("/dev/").join(disk.name())))
}

fn package_for(tool: &str) -> &str {
    match tool {
        "lsblk" | "mount" | "umount" => "util-linux",
        "partprobe" => "parted",
        "dd" | "sync" => "coreutils",
        other => other,
    }
}

impl Platform for Linux {
    fn name(&self) -> &'static str {
        "Linux"
    }

    fn list_drives(&self, runner: &dyn CommandRunner) -> Outcome<Vec<BlockDevice>> {
        let cmd = Cmd::new("lsblk")
            .args(["-J", "-o", "NAME,SIZE,TYPE,TRAN,MODEL"])
            .read_only();
        match runner.run(&cmd, RunOptions::checked()) {
            Ok(json) => {
                let exclude = system_disk();
                if let Some(disk) = &exclude {
                    log::debug!("excluding system disk {}", disk.display());
                }
                catalog::parse_lsblk_json(&json, exclude.as_deref())
            }
            Err(e) => {
                let mut outcome = Outcome::new(Vec::new());
                outcome.warn(Warning::new("list Linux drives", e));
                outcome
            }
        }
    }

    fn unmount_disk(&self, runner: &dyn CommandRunner, device: &Path) {
        // The glob has to be expanded by a root shell, hence `sh -c`.
        let cmd = Cmd::sudo("sh")
            .arg("-c")
            .arg(format!("umount {}* || true", device.display()));
        runner.run(&cmd, RunOptions::fire_and_forget()).ok();
    }

    fn write_target(&self, device: &Path) -> PathBuf {
        device.to_path_buf()
    }

    fn dd_block_size(&self) -> &'static str {
        "4M"
    }

    fn dd_extra_args(&self) -> &'static [&'static str] {
        &["status=progress"]
    }

    fn boot_partition_candidates(
        &self,
        runner: &dyn CommandRunner,
        device: &Path,
    ) -> Vec<PathBuf> {
        let partprobe = Cmd::sudo("partprobe").arg(device.display().to_string());
        runner.run(&partprobe, RunOptions::fire_and_forget()).ok();
        runner
            .run(&Cmd::new("udevadm").arg("settle"), RunOptions::fire_and_forget())
            .ok();

        BOOT_PARTITION_INDICES
            .iter()
            .map(|&index| partition_path(device, index))
            .collect()
    }

    fn mount_fstype(&self) -> Option<&'static str> {
        None
    }

    fn eject_command(&self, device: &Path) -> Cmd {
        Cmd::sudo("eject").arg(device.display().to_string())
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &["lsblk", "partprobe", "eject", "mount", "umount"]
    }

    fn install_hint(&self, missing: &[String]) -> String {
        let mut packages: Vec<&str> = Vec::new();
        for package in missing.iter().map(|t| package_for(t)) {
            if !packages.contains(&package) {
                packages.push(package);
            }
        }
        if packages.is_empty() {
            return "# Could not determine install commands automatically.".to_string();
        }
        format!(
            "sudo apt update && sudo apt install -y {}",
            packages.join(" ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedRunner;

    #[test]
    fn tries_partition_two_then_one() {
        let runner = ScriptedRunner::new();
        let candidates = Linux.boot_partition_candidates(&runner, Path::new("/dev/sdb"));
        assert_eq!(
            candidates,
            vec![PathBuf::from("/dev/sdb2"), PathBuf::from("/dev/sdb1")]
        );
        assert_eq!(runner.called("sudo partprobe /dev/sdb"), 1);
    }

    #[test]
    fn writes_to_the_block_device_itself() {
        assert_eq!(
            Linux.write_target(Path::new("/dev/sdc")),
            PathBuf::from("/dev/sdc")
        );
    }

    #[test]
    fn listing_failure_yields_empty_catalog() {
        let runner = ScriptedRunner::new().fail("lsblk", 1, "lsblk: not found");
        let outcome = Linux.list_drives(&runner);
        assert!(outcome.value.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn install_hint_maps_tools_to_packages() {
        let hint = Linux.install_hint(&["lsblk".to_string(), "partprobe".to_string()]);
        assert_eq!(
            hint,
            "sudo apt update && sudo apt install -y util-linux parted"
        );
    }
}
