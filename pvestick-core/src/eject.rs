use crate::device::BlockDevice;
use crate::error::{Outcome, Warning};
use crate::platform::Platform;
use crate::process::{CommandRunner, RunOptions};

pub const EJECT_ADVICE: &str = "you may remove the drive once activity stops";

/// Releases `device` so it can be pulled. The data is already on it, so a
/// failure here is only advisory.
pub fn eject(
    platform: &dyn Platform,
    runner: &dyn CommandRunner,
    device: &BlockDevice,
) -> Outcome<()> {
    let mut outcome = Outcome::new(());
    log::info!("ejecting {}", device.path.display());

    let cmd = platform.eject_command(&device.path);
    if let Err(e) = runner.run(&cmd, RunOptions::checked()) {
        log::debug!("eject failed: {e}");
        outcome.warn(Warning::new(
            format!("eject {}", device.path.display()),
            format!("could not eject automatically; {EJECT_ADVICE}"),
        ));
    }
    outcome
}
