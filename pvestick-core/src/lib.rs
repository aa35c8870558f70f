//! The core, UI-agnostic library behind the `pvestick` provisioning tool.
//!
//! `pvestick-core` turns a USB stick into a self-configuring Proxmox VE
//! installer: it writes the installer image to the stick, mounts the stick's
//! EFI partition, drops the homelab repository and a generated `.env` onto
//! it, and ejects it. Everything that touches the system goes through a
//! [`process::CommandRunner`], so a front-end can swap in a dry-run runner
//! and the stages can be tested without hardware.
//!
//! The library is structured into several key modules:
//! - [`process`]: Runs external commands, optionally with `sudo`.
//! - [`platform`]: The Linux and macOS specifics, behind one trait.
//! - [`catalog`]: Discovers removable drives and parses the operator's choice.
//! - [`flash`]: Writes the image to the raw device.
//! - [`mount`]: Finds and mounts the EFI partition as a scoped guard.
//! - [`inject`]: Copies the payload onto the mounted partition.
//! - [`eject`]: Releases the device.
//! - [`config`] and [`env`]: The YAML configuration and the `.env` derived from it.
//! - [`pipeline`]: Runs the stages above in order.
//!
//! ## Example: Provisioning the first removable drive
//!
//! ```rust,no_run
//! use pvestick_core::device::ImageSource;
//! use pvestick_core::pipeline::{ProvisionRequest, Provisioner};
//! use pvestick_core::process::SystemRunner;
//! use pvestick_core::{catalog, platform};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let platform = platform::detect().ok_or("unsupported OS")?;
//!     let runner = SystemRunner::new();
//!
//!     let drives = catalog::list_removable_drives(platform.as_ref(), &runner);
//!     let device = drives.value.first().ok_or("no removable drives found")?;
//!
//!     let image = ImageSource::new("downloads/proxmox-ve_latest.iso");
//!     let request = ProvisionRequest {
//!         image: &image,
//!         device,
//!         repo_root: Path::new("."),
//!         config_path: Path::new("config.yml"),
//!     };
//!
//!     let report = Provisioner::new(platform.as_ref(), &runner)
//!         .run(&request, |stage| println!("{stage}..."))?;
//!     for warning in &report.warnings {
//!         println!("warning: {warning}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod deps;
pub mod device;
pub mod eject;
pub mod env;
pub mod error;
pub mod fetch;
pub mod flash;
pub mod inject;
pub mod mount;
pub mod pipeline;
pub mod platform;
pub mod process;

pub use error::{Error, Outcome, Result, Warning};
