//! Places the post-install payload onto the mounted EFI partition.
//!
//! By the time this runs the device has already been flashed, so an
//! incomplete configuration beats throwing the whole run away: every step
//! reports its own failure as a [`Warning`] and the next step still runs.
use crate::config::InstallerConfig;
use crate::env::{ENV_FILE_NAME, EnvDocument};
use crate::error::{Outcome, Warning};
use crate::mount::MountGuard;
use crate::process::{Cmd, CommandRunner, RunOptions};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Subdirectory of the mount root that receives the repository copy.
pub const REPO_DIR_NAME: &str = "homelab-setup";

/// Top-level repository entries that are never copied. The image workspace
/// can hold multi-gigabyte ISOs.
pub const EXCLUDED_ENTRIES: [&str; 9] = [
    "etcher-scripts",
    "downloads",
    "target",
    ".git",
    ".github",
    ".venv",
    ".vscode",
    "__pycache__",
    ".DS_Store",
];

/// Entry points the installer hook expects at the root of the partition:
/// (path relative to the repository, file name on the stick).
pub const BOOTSTRAP_FILES: [(&str, &str); 2] = [
    (
        "initial-setup/autoinstall_proxmox.sh",
        "autoinstall_proxmox.sh",
    ),
    ("initial-setup/autoinstall.service", "autoinstall.service"),
];

pub const BOOTSTRAP_SCRIPT: &str = "autoinstall_proxmox.sh";

pub fn is_excluded(name: &str) -> bool {
    EXCLUDED_ENTRIES.contains(&name)
}

/// Copies the repository, bootstrap files and generated `.env` onto the
/// mounted partition. Never fails; see [`Outcome::warnings`].
pub fn inject(
    runner: &dyn CommandRunner,
    guard: &MountGuard<'_>,
    repo_root: &Path,
    config_path: &Path,
) -> Outcome<()> {
    let mount_point = guard.mount_point();
    let mut outcome = Outcome::new(());

    log::info!("copying configuration scripts and repository");
    copy_repository(runner, repo_root, mount_point, &mut outcome);

    log::info!("placing bootstrap files in EFI root");
    copy_bootstrap_files(runner, repo_root, mount_point, &mut outcome);

    log::info!("generating {ENV_FILE_NAME}");
    write_env_file(runner, config_path, mount_point, &mut outcome);

    // FAT has no exec bit; some mount options fake one, most ignore chmod.
    let script = mount_point.join(BOOTSTRAP_SCRIPT);
    runner
        .run(
            &Cmd::sudo("chmod").args(["+x".to_string(), script.display().to_string()]),
            RunOptions::fire_and_forget(),
        )
        .ok();

    outcome
}

fn copy_repository(
    runner: &dyn CommandRunner,
    repo_root: &Path,
    mount_point: &Path,
    outcome: &mut Outcome<()>,
) {
    let dest_dir = mount_point.join(REPO_DIR_NAME);
    let mkdir = Cmd::sudo("mkdir").args(["-p".to_string(), dest_dir.display().to_string()]);
    if let Err(e) = runner.run(&mkdir, RunOptions::checked()) {
        outcome.warn(Warning::new(format!("create {}", dest_dir.display()), e));
        return;
    }

    let entries = match fs::read_dir(repo_root) {
        Ok(entries) => entries,
        Err(e) => {
            outcome.warn(Warning::new(format!("read {}", repo_root.display()), e));
            return;
        }
    };

    let mut entries: Vec<_> = entries.filter_map(Result::ok).collect();
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_excluded(&name) {
            log::debug!("skipping {name}");
            continue;
        }

        let src = entry.path();
        let dst = dest_dir.join(&name);
        let mut cmd = Cmd::sudo("cp");
        if src.is_dir() {
            cmd = cmd.arg("-r");
        }
        let cmd = cmd
            .arg(src.display().to_string())
            .arg(dst.display().to_string());

        if let Err(e) = runner.run(&cmd, RunOptions::checked()) {
            outcome.warn(Warning::new(format!("copy {name}"), e));
        }
    }
}

fn copy_bootstrap_files(
    runner: &dyn CommandRunner,
    repo_root: &Path,
    mount_point: &Path,
    outcome: &mut Outcome<()>,
) {
    for (src_rel, dest_name) in BOOTSTRAP_FILES {
        let src = repo_root.join(src_rel);
        if !src.exists() {
            outcome.warn(Warning::new(format!("copy {src_rel}"), "not found"));
            continue;
        }

        let cmd = Cmd::sudo("cp")
            .arg(src.display().to_string())
            .arg(mount_point.join(dest_name).display().to_string());
        if let Err(e) = runner.run(&cmd, RunOptions::checked()) {
            outcome.warn(Warning::new(format!("copy {src_rel}"), e));
        }
    }
}

fn write_env_file(
    runner: &dyn CommandRunner,
    config_path: &Path,
    mount_point: &Path,
    outcome: &mut Outcome<()>,
) {
    let context = format!("generate {ENV_FILE_NAME}");

    let config = match InstallerConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            outcome.warn(Warning::new(context, e));
            return;
        }
    };
    let document = EnvDocument::from_config(&config);

    // The partition is only writable as root, so stage the file and `sudo cp` it.
    let staged = NamedTempFile::new().and_then(|mut file| {
        file.write_all(document.render().as_bytes())?;
        file.flush()?;
        Ok(file)
    });
    let staged = match staged {
        Ok(file) => file,
        Err(e) => {
            outcome.warn(Warning::new(context, e));
            return;
        }
    };

    let cmd = Cmd::sudo("cp")
        .arg(staged.path().display().to_string())
        .arg(mount_point.join(ENV_FILE_NAME).display().to_string());
    if let Err(e) = runner.run(&cmd, RunOptions::checked()) {
        outcome.warn(Warning::new(context, e));
    }
}
