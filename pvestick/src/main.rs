use anyhow::{Context, Result, anyhow};
use clap::Parser;
use console::style;
use dialoguer::{Confirm, Input, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use pvestick_core::catalog::{self, Selection};
use pvestick_core::config::{self, DEFAULT_CONFIG_FILE, EXAMPLE_CONFIG_FILE, InstallerConfig};
use pvestick_core::device::{BlockDevice, ImageSource};
use pvestick_core::eject::EJECT_ADVICE;
use pvestick_core::mount::MountSettings;
use pvestick_core::pipeline::{self, ProvisionRequest, Provisioner, Stage};
use pvestick_core::platform::{self, Platform};
use pvestick_core::process::{CommandRunner, DryRunRunner, SystemRunner};
use pvestick_core::{Error, deps, fetch, flash};
use std::env;
use std::io::{IsTerminal, stdout};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

#[derive(Parser)]
#[command(name = "pvestick")]
#[command(
    about = "Builds a self-configuring Proxmox VE installer USB stick",
    long_about = "Writes the Proxmox VE installer to a USB drive and injects the homelab \
                  repository and a generated .env onto its EFI partition. Run it from the \
                  repository root.",
    version
)]
struct Cli {
    /// Configuration file to validate and derive the .env from
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Use this installer image instead of downloading one
    #[arg(short, long, conflicts_with = "url")]
    image: Option<PathBuf>,

    /// Download the installer from this URL instead of the latest release
    #[arg(long)]
    url: Option<String>,

    /// Expected SHA-256 of the installer image
    #[arg(long)]
    sha256: Option<String>,

    /// Where to mount the EFI partition
    #[arg(long)]
    mount_point: Option<PathBuf>,

    /// Print the system commands instead of running them
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Show debug output
    #[arg(short, long)]
    verbose: bool,
}

/// A helper struct that, on Unix, disables `ECHOCTL` for the terminal.
///
/// `ECHOCTL` is the terminal flag that causes Ctrl+C to be printed as `^C`.
/// The original terminal state is restored when this struct is dropped.
struct TermRestorer {
    #[cfg(unix)]
    original_termios: Option<Termios>,
}

impl TermRestorer {
    fn new() -> Self {
        #[cfg(unix)]
        {
            if !stdout().is_terminal() {
                return Self {
                    original_termios: None,
                };
            }

            let fd = stdout().as_raw_fd();
            let original_termios = Termios::from_fd(fd).ok().and_then(|original| {
                let mut quiet = original;
                quiet.c_lflag &= !ECHOCTL;
                tcsetattr(fd, TCSANOW, &quiet).ok().map(|_| original)
            });
            Self { original_termios }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(ref original_termios) = self.original_termios {
            tcsetattr(stdout().as_raw_fd(), TCSANOW, original_termios).ok();
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn step(title: &str) {
    println!();
    println!("{}", style(format!("== {title} ==")).cyan().bold());
}

fn bytes_bar(prefix: &'static str, color: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_prefix(prefix);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{prefix:12}} [{{elapsed_precise}}] [{{bar:40.{color}/black}}] \
                 {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}})"
            ))?
            .progress_chars("■ "),
    );
    Ok(pb)
}

fn check_cancelled(running: &AtomicBool) -> Result<()> {
    if running.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(Error::Cancelled.into())
    }
}

fn check_dependencies(platform: &dyn Platform) -> bool {
    step("Checking dependencies");
    let report = deps::check(platform);
    if report.is_satisfied() {
        println!("{} All required tools found.", style("✓").green());
        return true;
    }

    println!(
        "{} Missing required tools: {}",
        style("ERROR:").red().bold(),
        report.missing.join(", ")
    );
    if let Some(hint) = report.install_hint {
        println!("Install them with:\n  {}", style(hint).yellow());
    }
    false
}

fn validate_config(path: &Path) -> Option<InstallerConfig> {
    step("Validating configuration");
    match config::validate_file(path) {
        Ok(config) => {
            println!("{} {} is valid.", style("✓").green(), path.display());
            Some(config)
        }
        Err(errors) => {
            println!(
                "{} {} has {} problem(s):",
                style("ERROR:").red().bold(),
                path.display(),
                errors.len()
            );
            for error in errors {
                println!("  - {error}");
            }
            None
        }
    }
}

fn iso_file_name(url: &str) -> String {
    url.rsplit('/')
        .next()
        .filter(|name| name.ends_with(".iso"))
        .unwrap_or(fetch::DEFAULT_ISO_NAME)
        .to_string()
}

/// Resolves the installer image: the one given on the command line, or a
/// download into the repository's download directory.
fn acquire_image(
    cli: &Cli,
    config: &InstallerConfig,
    repo_root: &Path,
    running: &AtomicBool,
) -> Result<ImageSource> {
    step("Installer image");
    if let Some(path) = &cli.image {
        if !path.is_file() {
            return Err(anyhow!("Image file '{}' not found.", path.display()));
        }
        println!("Using {}", style(path.display()).cyan());
        return Ok(ImageSource::new(path));
    }

    let url = match cli.url.clone().or_else(|| config.installer.iso_url.clone()) {
        Some(url) => url,
        None => fetch::latest_iso_url()?,
    };
    let dest = repo_root.join(fetch::DOWNLOAD_DIR).join(iso_file_name(&url));

    if dest.is_file() {
        let redownload = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("{} already exists. Download it again?", dest.display()))
            .default(false)
            .interact()?;
        if !redownload {
            println!("Using existing {}", style(dest.display()).cyan());
            return Ok(ImageSource::new(dest));
        }
    }

    println!("Downloading {}", style(&url).cyan());
    let pb = bytes_bar("Download", "green")?;
    let result = fetch::download(&url, &dest, running, |so_far, _block, total| {
        if let Some(total) = total {
            pb.set_length(total);
        }
        pb.set_position(so_far);
    });
    match result {
        Ok(_) => pb.finish_with_message("Download complete."),
        Err(e) => {
            pb.abandon_with_message("❌ Download failed.");
            return Err(e.into());
        }
    }
    Ok(ImageSource::new(dest))
}

fn verify_image(image: &ImageSource, expected: &str, running: &AtomicBool) -> Result<()> {
    let len = image
        .path
        .metadata()
        .with_context(|| format!("Could not read {}", image.path.display()))?
        .len();
    let pb = bytes_bar("Verifying", "magenta")?;
    pb.set_length(len);
    let result =
        flash::verify_checksum(image, expected, running, |hashed| pb.set_position(hashed));
    match result {
        Ok(()) => {
            pb.finish_with_message("Checksum OK.");
            Ok(())
        }
        Err(e) => {
            pb.abandon();
            Err(e.into())
        }
    }
}

/// Lists the removable drives and asks for one. `None` means the operator quit.
fn choose_drive(
    platform: &dyn Platform,
    runner: &dyn CommandRunner,
) -> Result<Option<BlockDevice>> {
    step("Select USB drive");
    let catalog = catalog::list_removable_drives(platform, runner);
    for warning in &catalog.warnings {
        println!("{} {warning}", style("WARNING:").yellow());
    }
    let drives = catalog.value;
    if drives.is_empty() {
        return Err(anyhow!("No removable drives found. Insert a USB drive and try again."));
    }

    for (i, drive) in drives.iter().enumerate() {
        println!("  {}. {drive}", i + 1);
    }

    loop {
        let answer: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt("Enter the number of the drive to use (or 'q' to quit)")
            .interact_text()?;
        match catalog::parse_selection(&answer, drives.len()) {
            Selection::Chosen(index) => return Ok(Some(drives[index].clone())),
            Selection::Quit => return Ok(None),
            Selection::Invalid => println!("{} Invalid selection.", style("✗").red()),
        }
    }
}

fn confirm_erase(device: &BlockDevice, image: &ImageSource) -> Result<bool> {
    println!();
    println!(
        "{} ALL DATA on {} will be erased.",
        style("WARNING:").red().bold(),
        style(device.path.display()).cyan()
    );
    println!("  Device: {}", device.label);
    println!("  Image:  {}", style(image.path.display()).cyan());
    println!();

    let answer: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Type '{}' to continue", pipeline::CONFIRMATION_WORD))
        .allow_empty(true)
        .interact_text()?;
    Ok(pipeline::confirmation_accepted(&answer))
}

fn print_next_steps(device: &BlockDevice) {
    println!("\n✨ {} is ready.", style(device.path.display()).cyan());
    println!();
    println!("Next steps:");
    println!("  1. Plug the drive into the target machine and boot from it.");
    println!("  2. Install Proxmox VE as usual.");
    println!("  3. On first boot the autoinstall service applies the configuration");
    println!("     from the drive's EFI partition. Leave the drive in until it finishes.");
}

fn run(cli: Cli, running: Arc<AtomicBool>) -> Result<ExitCode> {
    let repo_root = env::current_dir().context("Could not determine the current directory")?;
    if !repo_root.join(EXAMPLE_CONFIG_FILE).is_file() {
        println!(
            "{} Run pvestick from the repository root ({EXAMPLE_CONFIG_FILE} not found).",
            style("ERROR:").red().bold()
        );
        return Ok(ExitCode::FAILURE);
    }

    let platform = platform::detect().ok_or_else(|| {
        anyhow!(
            "Unsupported operating system: {}. Only Linux and macOS are supported.",
            env::consts::OS
        )
    })?;
    log::debug!("platform: {}", platform.name());

    let runner: Box<dyn CommandRunner> = if cli.dry_run {
        println!(
            "{} No changes will be made to any drive.",
            style("DRY RUN:").yellow().bold()
        );
        Box::new(DryRunRunner::with_queries(SystemRunner::new()))
    } else {
        Box::new(SystemRunner::new())
    };

    if !check_dependencies(platform.as_ref()) {
        return Ok(ExitCode::FAILURE);
    }

    let config_path = repo_root.join(&cli.config);
    let Some(config) = validate_config(&config_path) else {
        return Ok(ExitCode::FAILURE);
    };

    let image = acquire_image(&cli, &config, &repo_root, &running)?;
    check_cancelled(&running)?;

    if let Some(expected) = cli.sha256.as_deref().or(config.installer.image_sha256.as_deref()) {
        verify_image(&image, expected, &running)?;
    }

    let Some(device) = choose_drive(platform.as_ref(), runner.as_ref())? else {
        println!("Exiting.");
        return Ok(ExitCode::SUCCESS);
    };
    check_cancelled(&running)?;

    if !confirm_erase(&device, &image)? {
        println!("Aborted.");
        return Ok(ExitCode::FAILURE);
    }

    let mut settings = MountSettings::default();
    if let Some(mount_point) = cli.mount_point {
        settings.mount_point = mount_point;
    }

    let request = ProvisionRequest {
        image: &image,
        device: &device,
        repo_root: &repo_root,
        config_path: &config_path,
    };
    let result = Provisioner::new(platform.as_ref(), runner.as_ref())
        .mount_settings(settings)
        .cancel_flag(running)
        .run(&request, |stage| {
            step(&stage.to_string());
            if stage == Stage::Flash {
                println!(
                    "Writing {} to {}. This can take several minutes.",
                    style(image.path.display()).cyan(),
                    style(device.path.display()).cyan()
                );
            }
        });

    match result {
        Ok(report) => {
            for warning in &report.warnings {
                println!("{} {warning}", style("WARNING:").yellow());
            }
            if !report.warnings.is_empty() {
                println!(
                    "Configuration injected into {} with {} warning(s); review them before booting.",
                    report.partition.display(),
                    report.warnings.len()
                );
            }
            print_next_steps(&device);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{} {e}", style("ERROR:").red().bold());
            if e.stage != Stage::Flash {
                println!(
                    "The installer image was written but the drive is not fully configured; {EJECT_ADVICE}."
                );
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn main() -> ExitCode {
    // Dropped when main() returns, restoring the terminal.
    let _term_restorer = TermRestorer::new();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("{} {e}", style("ERROR:").red().bold());
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli, running) {
        Ok(code) => code,
        Err(e) => {
            println!("{} {e:#}", style("ERROR:").red().bold());
            ExitCode::FAILURE
        }
    }
}
