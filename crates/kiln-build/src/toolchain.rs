//! Compiler invocation
//!
//! Runs the external toolchain once for the whole unit set, captures its
//! output, and turns a non-zero exit into [`BuildError::BuildFailed`]. The
//! toolchain decides where artifacts land; `CARGO_TARGET_DIR` is pinned so the
//! stager can find them under `<target_dir>/<triple>/<profile>`.

use crate::error::{BuildError, KilnResult};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use crate::targets::{validate_units, BuildResult, BuildTarget, BuildUnit};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default toolchain program
pub const DEFAULT_PROGRAM: &str = "cargo";

/// Poll interval while waiting on a toolchain with a deadline
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Something that can compile a unit set for a target
pub trait Toolchain {
    /// Run the toolchain once for every unit and report what happened.
    ///
    /// A non-zero exit is reported through [`BuildResult::success`], not as an error.
    fn invoke(&self, units: &[BuildUnit], target: &BuildTarget) -> KilnResult<BuildResult>;

    /// Build the units, failing with `BuildFailed` unless the toolchain succeeded
    fn build(&self, units: &[BuildUnit], target: &BuildTarget) -> KilnResult<BuildResult> {
        validate_units(units)?;
        target.validate()?;
        self.invoke(units, target)?.into_checked()
    }
}

/// Toolchain backed by a `cargo`-compatible executable
#[derive(Debug, Clone)]
pub struct CargoToolchain {
    /// Program to execute
    program: PathBuf,
    /// Workspace root (working directory of the toolchain)
    workspace_root: PathBuf,
    /// Output root exported as `CARGO_TARGET_DIR`
    target_dir: PathBuf,
    /// Extra arguments placed before the unit list
    extra_args: Vec<String>,
    /// Extra environment variables
    env_vars: BTreeMap<String, String>,
    /// Optional time budget; the child is killed when it expires
    timeout: Option<Duration>,
}

impl CargoToolchain {
    /// Create a toolchain for the workspace at `workspace_root`
    pub fn new(workspace_root: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            workspace_root: workspace_root.into(),
            target_dir: target_dir.into(),
            extra_args: Vec::new(),
            env_vars: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Set the program to execute
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set extra arguments
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Add environment variables for the toolchain process
    pub fn with_env(mut self, env_vars: BTreeMap<String, String>) -> Self {
        self.env_vars.extend(env_vars);
        self
    }

    /// Set the time budget
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program that will be executed
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments passed to the program for a build of `units`
    pub fn command_args(&self, units: &[BuildUnit], target: &BuildTarget) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--target".to_string(),
            target.triple.clone(),
        ];
        args.extend(target.profile.toolchain_args());
        args.extend(self.extra_args.iter().cloned());
        for unit in units {
            args.push("-p".to_string());
            args.push(unit.name.clone());
        }
        args
    }

    fn spawn(&self, args: &[String]) -> KilnResult<Child> {
        Command::new(&self.program)
            .args(args)
            .current_dir(&self.workspace_root)
            .env("CARGO_TARGET_DIR", &self.target_dir)
            .envs(&self.env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    BuildError::ToolchainNotFound {
                        program: self.program.clone(),
                    }
                } else {
                    BuildError::io(&self.program, e)
                }
            })
    }

    fn wait(&self, child: &mut Child, deadline: Option<Instant>) -> KilnResult<ExitStatus> {
        let (Some(limit), Some(deadline)) = (self.timeout, deadline) else {
            return child.wait().map_err(|e| BuildError::io(&self.program, e));
        };

        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| BuildError::io(&self.program, e))?
            {
                return Ok(status);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(program = %self.program.display(), ?limit, "toolchain timed out, killing");
                // The child may have exited between try_wait and kill
                let _ = child.kill();
                let _ = child.wait();
                return Err(BuildError::Timeout { after: limit });
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

impl Toolchain for CargoToolchain {
    fn invoke(&self, units: &[BuildUnit], target: &BuildTarget) -> KilnResult<BuildResult> {
        let args = self.command_args(units, target);
        info!(
            program = %self.program.display(),
            target = %target,
            units = units.len(),
            "invoking toolchain"
        );
        debug!(args = ?args, target_dir = %self.target_dir.display(), "toolchain command line");

        let start = Instant::now();
        let deadline = self.timeout.and_then(|limit| start.checked_add(limit));
        let mut child = self.spawn(&args)?;

        let stdout = child.stdout.take().map(|pipe| drain(pipe, "stdout"));
        let stderr = child.stderr.take().map(|pipe| drain(pipe, "stderr"));

        // Drain threads are left detached: grandchildren may keep the pipes open
        let status = self.wait(&mut child, deadline)?;

        let stdout = collect(stdout, deadline, "stdout");
        let stderr = collect(stderr, deadline, "stderr");
        let duration = start.elapsed();

        info!(
            status = ?status.code(),
            elapsed_ms = duration.as_millis() as u64,
            "toolchain finished"
        );

        Ok(BuildResult::from_exit(
            units,
            status.code(),
            stdout,
            stderr,
            duration,
        ))
    }
}

/// Read a pipe to the end on a helper thread, logging each line
///
/// Lines are sent as they arrive; the channel closes at end of stream.
fn drain<R: Read + Send + 'static>(pipe: R, stream: &'static str) -> Receiver<Vec<u8>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    debug!(stream, "{}", String::from_utf8_lossy(&line).trim_end());
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(stream, error = %e, "failed reading toolchain output");
                    break;
                }
            }
        }
    });
    rx
}

/// Gather a stream's output, giving up at `deadline`
///
/// The toolchain has exited by now; anything still holding the pipe past the
/// deadline is a leftover process, and the output read so far is kept.
fn collect(lines: Option<Receiver<Vec<u8>>>, deadline: Option<Instant>, stream: &str) -> String {
    let Some(lines) = lines else {
        return String::new();
    };

    let mut captured = Vec::new();
    loop {
        let next = match deadline {
            Some(deadline) => {
                lines.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => lines.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match next {
            Ok(line) => captured.extend_from_slice(&line),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                warn!(stream, "toolchain output still open at the deadline, keeping partial output");
                break;
            }
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}
