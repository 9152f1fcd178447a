//! Subprocess-backed package manager.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{DEFAULT_ERROR_MARKER, PackageManager};
use crate::error::{AddonError, AddonResult};

/// Interval between child status polls while a timeout is armed.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Package manager driven through its command line.
#[derive(Debug, Clone)]
pub struct CommandPackageManager {
    /// Executable to run.
    program: String,
    /// Arguments producing the `name==version` listing.
    list_args: Vec<String>,
    /// Arguments preceding the specifiers for an install.
    install_args: Vec<String>,
    /// Failure marker scanned for in install output.
    error_marker: String,
    /// Optional limit on each invocation.
    timeout: Option<Duration>,
}

impl Default for CommandPackageManager {
    fn default() -> Self {
        Self::pip()
    }
}

impl CommandPackageManager {
    /// Creates a manager for an arbitrary program.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            list_args: Vec::new(),
            install_args: Vec::new(),
            error_marker: DEFAULT_ERROR_MARKER.to_string(),
            timeout: None,
        }
    }

    /// `pip freeze` / `pip install`.
    #[must_use]
    pub fn pip() -> Self {
        Self::new("pip")
            .with_list_args(["freeze"])
            .with_install_args(["install"])
    }

    /// Sets the listing arguments.
    #[must_use]
    pub fn with_list_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.list_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the install arguments.
    #[must_use]
    pub fn with_install_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.install_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the install failure marker.
    #[must_use]
    pub fn with_error_marker(mut self, marker: impl Into<String>) -> Self {
        self.error_marker = marker.into();
        self
    }

    /// Limits how long each invocation may run.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Runs the program and returns its status with stdout and stderr combined.
    fn run(&self, args: &[String]) -> AddonResult<(ExitStatus, String)> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!("Running {} {}", self.program, args.join(" "));

        let mut child = cmd.spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait(&mut child)?;

        let mut output = join_output(stdout);
        let err_text = join_output(stderr);
        if !err_text.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&err_text);
        }

        debug!(
            "{} finished: exit_code={:?}, output_len={}",
            self.program,
            status.code(),
            output.len()
        );

        Ok((status, output))
    }

    /// Waits for the child, killing it once the timeout elapses.
    fn wait(&self, child: &mut Child) -> AddonResult<ExitStatus> {
        let Some(timeout) = self.timeout else {
            return Ok(child.wait()?);
        };

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if started.elapsed() >= timeout {
                warn!("{} exceeded {:?}, killing it", self.program, timeout);
                let _ = child.kill();
                let _ = child.wait();
                return Err(AddonError::Timeout {
                    program: self.program.clone(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl PackageManager for CommandPackageManager {
    fn program(&self) -> &str {
        &self.program
    }

    fn list_installed(&self) -> AddonResult<String> {
        let (status, output) = self.run(&self.list_args).map_err(|e| match e {
            AddonError::Io(io) => AddonError::CapabilityQuery(format!(
                "Failed to run {}: {}",
                self.program, io
            )),
            other => other,
        })?;

        if !status.success() {
            return Err(AddonError::CapabilityQuery(format!(
                "{} exited with {:?}: {}",
                self.program,
                status.code(),
                output.trim()
            )));
        }

        Ok(output)
    }

    fn install(&self, specifiers: &[String]) -> AddonResult<String> {
        let mut args = self.install_args.clone();
        args.extend(specifiers.iter().cloned());

        let (status, output) = self.run(&args).map_err(|e| match e {
            AddonError::Io(io) => {
                AddonError::Installation(format!("Failed to run {}: {}", self.program, io))
            }
            other => other,
        })?;

        if !status.success() && self.install_failure(&output).is_none() {
            return Err(AddonError::Installation(output));
        }

        Ok(output)
    }

    fn error_marker(&self) -> &str {
        &self.error_marker
    }
}

/// Reads a pipe to the end on a background thread so the child never blocks.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_output(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
