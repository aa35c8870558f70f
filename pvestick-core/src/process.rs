//! Runs external OS commands.
//!
//! Every interaction with disks, mounts and the partition table goes through a
//! [`CommandRunner`], so the stages above it can be exercised without touching
//! real hardware. Failures are surfaced uniformly as
//! [`Error::ExternalCommand`] unless the call site opts into
//! [`RunOptions::fire_and_forget`]. Nothing here retries: a failed command
//! usually means the device is busy or gone.
use crate::error::{Error, Result};
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::process::Command;

/// A command line to execute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    privileged: bool,
    read_only: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            privileged: false,
            read_only: false,
        }
    }

    /// A command that needs root. [`SystemRunner`] prefixes it with `sudo`
    /// unless we already run as root.
    pub fn sudo(program: impl Into<String>) -> Self {
        Self {
            privileged: true,
            ..Self::new(program)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Marks the command as a pure query that never changes system state.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.privileged {
            write!(f, "sudo ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Where the child's output goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stdio {
    /// Collect stdout/stderr into the [`CommandResult`].
    Capture,
    /// Let the child write straight to our terminal (e.g. `dd status=progress`).
    Inherit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunOptions {
    pub stdio: Stdio,
    /// When `false`, failures are swallowed and an empty string is returned.
    pub check: bool,
}

impl RunOptions {
    pub const fn checked() -> Self {
        Self {
            stdio: Stdio::Capture,
            check: true,
        }
    }

    pub const fn fire_and_forget() -> Self {
        Self {
            stdio: Stdio::Capture,
            check: false,
        }
    }

    pub const fn interactive() -> Self {
        Self {
            stdio: Stdio::Inherit,
            check: true,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::checked()
    }
}

/// The result of one external command invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
}

impl CommandResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status: Some(0),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status: Some(status),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Executes external commands.
pub trait CommandRunner {
    /// Spawns `cmd` and waits for it. Only fails if the process could not be
    /// started; a non-zero exit is reported through [`CommandResult::status`].
    fn execute(&self, cmd: &Cmd, stdio: Stdio) -> io::Result<CommandResult>;

    /// Runs `cmd` and returns its trimmed stdout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExternalCommand`] if the command cannot be started or
    /// exits non-zero, unless `options.check` is `false`.
    fn run(&self, cmd: &Cmd, options: RunOptions) -> Result<String> {
        let result = match self.execute(cmd, options.stdio) {
            Ok(result) => result,
            Err(e) => {
                if !options.check {
                    log::debug!("ignoring failure to start `{cmd}`: {e}");
                    return Ok(String::new());
                }
                return Err(Error::ExternalCommand {
                    command: cmd.to_string(),
                    status: None,
                    stderr: e.to_string(),
                });
            }
        };

        if result.success() {
            return Ok(result.stdout.trim().to_string());
        }

        if !options.check {
            log::debug!(
                "ignoring failure of `{cmd}` (exit={:?}): {}",
                result.status,
                result.stderr.trim()
            );
            return Ok(String::new());
        }

        log::error!("`{cmd}` failed (exit={:?})", result.status);
        Err(Error::ExternalCommand {
            command: cmd.to_string(),
            status: result.status,
            stderr: result.stderr.trim().to_string(),
        })
    }
}

/// Spawns real processes.
#[derive(Clone, Debug)]
pub struct SystemRunner {
    use_sudo: bool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self {
            use_sudo: !running_as_root(),
        }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn running_as_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

impl CommandRunner for SystemRunner {
    fn execute(&self, cmd: &Cmd, stdio: Stdio) -> io::Result<CommandResult> {
        let mut command = if cmd.is_privileged() && self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg(cmd.program());
            c
        } else {
            Command::new(cmd.program())
        };
        command.args(cmd.arguments());

        log::debug!("running `{cmd}`");
        match stdio {
            Stdio::Capture => {
                let output = command.output()?;
                Ok(CommandResult {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    status: output.status.code(),
                })
            }
            Stdio::Inherit => {
                let status = command.status()?;
                Ok(CommandResult {
                    status: status.code(),
                    ..CommandResult::default()
                })
            }
        }
    }
}

/// Logs and records commands instead of running them.
///
/// Read-only queries can optionally be forwarded to a real runner so drive
/// listing still works during a dry run.
pub struct DryRunRunner {
    queries: Option<Box<dyn CommandRunner>>,
    recorded: RefCell<Vec<Cmd>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self {
            queries: None,
            recorded: RefCell::new(Vec::new()),
        }
    }

    /// Forwards commands marked [`Cmd::read_only`] to `runner`.
    pub fn with_queries(runner: impl CommandRunner + 'static) -> Self {
        Self {
            queries: Some(Box::new(runner)),
            recorded: RefCell::new(Vec::new()),
        }
    }

    /// Every command that was recorded (not forwarded), in order.
    pub fn commands(&self) -> Vec<Cmd> {
        self.recorded.borrow().clone()
    }
}

impl Default for DryRunRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for DryRunRunner {
    fn execute(&self, cmd: &Cmd, stdio: Stdio) -> io::Result<CommandResult> {
        if cmd.is_read_only() {
            if let Some(inner) = &self.queries {
                return inner.execute(cmd, stdio);
            }
        }
        log::info!("DRY RUN: {cmd}");
        self.recorded.borrow_mut().push(cmd.clone());
        Ok(CommandResult::ok(""))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedRunner;
    use super::*;

    #[test]
    fn renders_privileged_commands_with_sudo() {
        let cmd = Cmd::sudo("dd").arg("if=a.iso").arg("of=/dev/sdb");
        assert_eq!(cmd.to_string(), "sudo dd if=a.iso of=/dev/sdb");
        assert_eq!(Cmd::new("sync").to_string(), "sync");
    }

    #[test]
    fn checked_run_returns_trimmed_stdout() {
        let runner = ScriptedRunner::new().respond("lsblk", "  {}\n");
        let out = runner
            .run(&Cmd::new("lsblk"), RunOptions::checked())
            .unwrap();
        assert_eq!(out, "{}");
    }

    #[test]
    fn checked_run_surfaces_non_zero_exit() {
        let runner = ScriptedRunner::new().fail("umount", 32, "not mounted\n");
        let err = runner
            .run(&Cmd::sudo("umount").arg("/mnt"), RunOptions::checked())
            .unwrap_err();
        match err {
            Error::ExternalCommand {
                command,
                status,
                stderr,
            } => {
                assert_eq!(command, "sudo umount /mnt");
                assert_eq!(status, Some(32));
                assert_eq!(stderr, "not mounted");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn fire_and_forget_swallows_failures() {
        let runner = ScriptedRunner::new().fail("umount", 1, "busy");
        let out = runner
            .run(&Cmd::sudo("umount").arg("/mnt"), RunOptions::fire_and_forget())
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn dry_run_records_mutating_commands() {
        let runner = DryRunRunner::new();
        runner
            .run(&Cmd::sudo("mount").arg("/dev/sdb2"), RunOptions::checked())
            .unwrap();
        runner
            .run(&Cmd::new("lsblk").read_only(), RunOptions::checked())
            .unwrap();
        let recorded = runner.commands();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].program(), "mount");
    }

    #[test]
    fn dry_run_forwards_queries_when_configured() {
        let runner = DryRunRunner::with_queries(ScriptedRunner::new().respond("lsblk", "[]"));
        let out = runner
            .run(&Cmd::new("lsblk").read_only(), RunOptions::checked())
            .unwrap();
        assert_eq!(out, "[]");
        assert!(runner.commands().is_empty());
    }
}
