//! The provisioning saga: flash, mount, inject, eject.
//!
//! Stages run strictly in order and a stage only starts once the previous one
//! succeeded. The EFI mount is held by a [`MountGuard`] for the duration of
//! the injection, so it is released however that stage ends.
//!
//! [`MountGuard`]: crate::mount::MountGuard
use crate::device::{BlockDevice, ImageSource};
use crate::eject::eject;
use crate::error::{Error, Warning};
use crate::flash::flash;
use crate::inject::inject;
use crate::mount::{MountSettings, mount};
use crate::platform::Platform;
use crate::process::CommandRunner;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// The only answer that lets the destructive part of the run begin.
pub const CONFIRMATION_WORD: &str = "YES";

/// Whether the operator's answer to the erase prompt is the exact, case-sensitive
/// confirmation word. A trailing line ending is ignored.
pub fn confirmation_accepted(input: &str) -> bool {
    input.trim_end_matches(['\r', '\n']) == CONFIRMATION_WORD
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Flash,
    Mount,
    Inject,
    Eject,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Flash => "Flashing",
            Stage::Mount => "Mounting the EFI partition",
            Stage::Inject => "Injecting configuration",
            Stage::Eject => "Ejecting",
        };
        f.write_str(name)
    }
}

/// A failure that stopped the pipeline, tagged with the stage it happened in.
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl StageError {
    fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }
}

/// What to provision.
#[derive(Clone, Debug)]
pub struct ProvisionRequest<'a> {
    pub image: &'a ImageSource,
    pub device: &'a BlockDevice,
    /// The repository copied onto the stick.
    pub repo_root: &'a Path,
    pub config_path: &'a Path,
}

#[derive(Clone, Debug, Default)]
pub struct ProvisionReport {
    /// The partition the configuration was injected into.
    pub partition: PathBuf,
    pub warnings: Vec<Warning>,
}

/// Runs the pipeline for one device.
pub struct Provisioner<'a> {
    platform: &'a dyn Platform,
    runner: &'a dyn CommandRunner,
    mount: MountSettings,
    running: Arc<AtomicBool>,
}

impl<'a> Provisioner<'a> {
    pub fn new(platform: &'a dyn Platform, runner: &'a dyn CommandRunner) -> Self {
        Self {
            platform,
            runner,
            mount: MountSettings::default(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn mount_settings(mut self, settings: MountSettings) -> Self {
        self.mount = settings;
        self
    }

    /// A flag cleared by the Ctrl+C handler. Checked between stages; a running
    /// `dd` receives the signal itself.
    pub fn cancel_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    fn check_running(&self, next: Stage) -> Result<(), StageError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StageError::new(next, Error::Cancelled))
        }
    }

    /// Flashes, configures and ejects `request.device`.
    ///
    /// `on_stage` is called as each stage begins.
    ///
    /// # Errors
    ///
    /// Returns the first fatal failure. Once [`Stage::Flash`] has started the
    /// device contents are undefined and nothing is rolled back.
    pub fn run<F>(
        &self,
        request: &ProvisionRequest<'_>,
        mut on_stage: F,
    ) -> Result<ProvisionReport, StageError>
    where
        F: FnMut(Stage),
    {
        let mut report = ProvisionReport::default();

        self.check_running(Stage::Flash)?;
        on_stage(Stage::Flash);
        flash(self.platform, self.runner, request.image, request.device)
            .map_err(|e| StageError::new(Stage::Flash, e))?;

        self.check_running(Stage::Mount)?;
        on_stage(Stage::Mount);
        {
            let guard = mount(self.platform, self.runner, request.device, &self.mount)
                .map_err(|e| StageError::new(Stage::Mount, e))?;
            report.partition = guard.partition().to_path_buf();

            self.check_running(Stage::Inject)?;
            on_stage(Stage::Inject);
            let outcome = inject(self.runner, &guard, request.repo_root, request.config_path);
            report.warnings.extend(outcome.warnings);
        }

        self.check_running(Stage::Eject)?;
        on_stage(Stage::Eject);
        let outcome = eject(self.platform, self.runner, request.device);
        report.warnings.extend(outcome.warnings);

        Ok(report)
    }
}
