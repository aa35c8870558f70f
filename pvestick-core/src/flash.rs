//! Writes the installer image onto the target device.
//!
//! This is the point of no return: once `dd` starts, the previous contents of
//! the device are gone whether or not it finishes. A failed write is never
//! resumed or retried, because how far it got cannot be told from the exit
//! status alone.
use crate::device::{BlockDevice, ImageSource};
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::process::{Cmd, CommandRunner, RunOptions};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

const BUFFER_SIZE: usize = 1024 * 1024; // 1 MiB

/// Computes the SHA-256 of a file as lowercase hex, reporting bytes hashed so far.
///
/// Stops with [`Error::Cancelled`] as soon as `running` is cleared.
pub fn sha256_file<F>(path: &Path, running: &AtomicBool, mut on_progress: F) -> Result<String>
where
    F: FnMut(u64),
{
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut hashed: u64 = 0;

    loop {
        if !running.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        hashed += n as u64;
        on_progress(hashed);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Checks the image against an expected SHA-256 digest before anything is written.
///
/// # Errors
///
/// Returns [`Error::ChecksumMismatch`] if the digests differ, or an I/O error
/// if the image cannot be read.
pub fn verify_checksum<F>(
    image: &ImageSource,
    expected: &str,
    running: &AtomicBool,
    on_progress: F,
) -> Result<()>
where
    F: FnMut(u64),
{
    let expected = expected.trim().to_lowercase();
    let actual = sha256_file(&image.path, running, on_progress)?;
    if actual != expected {
        return Err(Error::ChecksumMismatch {
            path: image.path.clone(),
            expected,
            actual,
        });
    }
    log::info!("checksum of {} verified", image.path.display());
    Ok(())
}

/// Builds the `dd` invocation that streams `image` onto `target`.
///
/// `conv=sync` pads the final partial block with zeros.
fn dd_command(platform: &dyn Platform, image: &Path, target: &Path) -> Cmd {
    Cmd::sudo("dd")
        .arg(format!("if={}", image.display()))
        .arg(format!("of={}", target.display()))
        .arg(format!("bs={}", platform.dd_block_size()))
        .arg("conv=sync")
        .args(platform.dd_extra_args().iter().copied())
}

/// Flashes `image` onto `device`.
///
/// 1. Unmounts every partition of the device (best effort).
/// 2. Picks the write target (the raw node on macOS).
/// 3. Streams the image with `dd`, letting it print progress to the terminal.
/// 4. Flushes with `sync`.
///
/// # Errors
///
/// Any failure of the write or the flush is an [`Error::Flash`]. The device is
/// left in an undefined state.
pub fn flash(
    platform: &dyn Platform,
    runner: &dyn CommandRunner,
    image: &ImageSource,
    device: &BlockDevice,
) -> Result<()> {
    let flash_error = |reason: String| Error::Flash {
        device: device.path.clone(),
        reason,
    };

    if !image.path.is_file() {
        return Err(flash_error(format!(
            "image {} does not exist",
            image.path.display()
        )));
    }

    log::info!("unmounting {}", device.path.display());
    platform.unmount_disk(runner, &device.path);

    let target = platform.write_target(&device.path);
    log::info!(
        "writing {} to {} (this will take time)",
        image.path.display(),
        target.display()
    );
    runner
        .run(
            &dd_command(platform, &image.path, &target),
            RunOptions::interactive(),
        )
        .map_err(|e| flash_error(e.to_string()))?;

    log::info!("syncing");
    runner
        .run(&Cmd::sudo("sync"), RunOptions::checked())
        .map_err(|e| flash_error(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Linux, MacOs};
    use crate::process::testing::ScriptedRunner;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn image_file(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    #[test]
    fn unmount_failure_does_not_stop_the_write() {
        let image = image_file(b"iso");
        let runner = ScriptedRunner::new().fail("umount", 32, "umount: /dev/sdb: not mounted");
        let device = BlockDevice::new("/dev/sdb", "usb");

        flash(&Linux, &runner, &ImageSource::new(image.path()), &device).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], "sudo sh -c umount /dev/sdb* || true");
        assert_eq!(
            calls[1],
            format!(
                "sudo dd if={} of=/dev/sdb bs=4M conv=sync status=progress",
                image.path().display()
            )
        );
        assert_eq!(calls[2], "sudo sync");
    }

    #[test]
    fn writes_to_raw_node_on_macos() {
        let image = image_file(b"iso");
        let runner = ScriptedRunner::new();
        let device = BlockDevice::new("/dev/disk4", "(external, physical)");

        flash(&MacOs, &runner, &ImageSource::new(image.path()), &device).unwrap();

        assert_eq!(runner.called("diskutil unmountDisk /dev/disk4"), 1);
        assert_eq!(runner.called("of=/dev/rdisk4 bs=4m conv=sync"), 1);
    }

    #[test]
    fn dd_failure_is_fatal_and_skips_sync() {
        let image = image_file(b"iso");
        let runner = ScriptedRunner::new().fail("dd", 1, "dd: /dev/sdb: Resource busy");
        let device = BlockDevice::new("/dev/sdb", "usb");

        let err = flash(&Linux, &runner, &ImageSource::new(image.path()), &device).unwrap_err();
        assert!(matches!(err, Error::Flash { .. }));
        assert_eq!(runner.called("sudo sync"), 0);
    }

    #[test]
    fn missing_image_fails_before_touching_the_device() {
        let runner = ScriptedRunner::new();
        let device = BlockDevice::new("/dev/sdb", "usb");
        let err = flash(
            &Linux,
            &runner,
            &ImageSource::new("/nonexistent/proxmox.iso"),
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Flash { .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn checksum_verification() {
        let image = image_file(b"abc");
        let source = ImageSource::new(image.path());
        let digest = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

        let running = AtomicBool::new(true);

        let mut seen = 0;
        verify_checksum(&source, &digest.to_uppercase(), &running, |n| seen = n).unwrap();
        assert_eq!(seen, 3);

        let err = verify_checksum(&source, "00", &running, |_| {}).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn hashing_stops_when_interrupted() {
        let image = image_file(&vec![0u8; BUFFER_SIZE * 3]);
        let running = AtomicBool::new(true);

        let mut chunks = 0;
        let err = sha256_file(image.path(), &running, |_| {
            chunks += 1;
            running.store(false, Ordering::SeqCst);
        })
        .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(chunks, 1);
    }
}
