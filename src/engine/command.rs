//! Command execution
//!
//! Runs shell commands inside the working copy with the build environment,
//! captures their combined output and echoes it into the build log.
//!
//! Templates use `%s` placeholders which are filled from the argument list in
//! order (`%%` is a literal `%`). A command given without arguments runs
//! verbatim.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::engine::error::CommandError;
use crate::engine::logger::BuildLogger;

/// Quote `value` as a single shell word
///
/// Use for untrusted values (branches, URLs, commit ids) substituted into
/// command templates.
pub fn shell_escape(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Shell command runner bound to one build
#[derive(Debug)]
pub struct CommandExecutor {
    logger: BuildLogger,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    paths: Vec<PathBuf>,
    verbose: bool,
    quiet: bool,
    log_output: bool,
    timeout: Option<Duration>,
    last_output: String,
}

impl CommandExecutor {
    pub fn new(logger: BuildLogger) -> Self {
        Self {
            logger,
            working_dir: None,
            env: BTreeMap::new(),
            paths: Vec::new(),
            verbose: false,
            quiet: false,
            log_output: true,
            timeout: None,
            last_output: String::new(),
        }
    }

    /// Kill commands that run longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Log output of successful commands as well as failed ones
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Suppress the `Executing:` line
    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    /// Enable or disable echoing command output into the log
    pub fn set_log_output(&mut self, log_output: bool) {
        self.log_output = log_output;
    }

    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = Some(dir.into());
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Prepend a directory to the search path of executed commands
    pub fn add_path(&mut self, dir: impl Into<PathBuf>) {
        self.paths.push(dir.into());
    }

    /// PATH seen by executed commands
    pub fn search_path(&self) -> OsString {
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let mut dirs: Vec<PathBuf> = self.paths.clone();
        dirs.extend(std::env::split_paths(&inherited));
        std::env::join_paths(dirs).unwrap_or(inherited)
    }

    /// Combined stdout and stderr of the last command, trailing whitespace removed
    pub fn last_output(&self) -> &str {
        &self.last_output
    }

    pub fn logger(&self) -> &BuildLogger {
        &self.logger
    }

    /// Fill `%s` placeholders in `template` from `args`
    pub fn format_command(template: &str, args: &[&str]) -> String {
        if args.is_empty() {
            return template.to_string();
        }

        let mut out = String::with_capacity(template.len());
        let mut args = args.iter();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('s') => {
                    chars.next();
                    match args.next() {
                        Some(arg) => out.push_str(arg),
                        None => out.push_str("%s"),
                    }
                }
                Some('%') => {
                    chars.next();
                    out.push('%');
                }
                _ => out.push('%'),
            }
        }

        out
    }

    /// Run a command, returning whether it exited with status zero
    ///
    /// Errors are reserved for commands that could not be run at all.
    pub async fn execute(&mut self, template: &str, args: &[&str]) -> Result<bool, CommandError> {
        let command = Self::format_command(template, args);

        if !self.quiet {
            self.logger.log_prefixed("\t", format!("Executing: {}", command));
        }
        debug!("Running command: {}", command);

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(format!("exec 2>&1\n{}", command));
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.env);
        cmd.env("PATH", self.search_path());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    warn!("Command timed out after {:?}: {}", limit, command);
                    self.last_output.clear();
                    self.logger
                        .log_failure(format!("Command timed out after {}s", limit.as_secs()));
                    return Ok(false);
                }
            },
            None => child.wait_with_output().await?,
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        self.last_output = text.trim_end().to_string();

        let success = output.status.success();
        if !success {
            debug!(
                "Command exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                command
            );
        }

        if self.log_output && !self.last_output.is_empty() && (self.verbose || !success) {
            self.logger.log_prefixed("\t\t", &self.last_output);
        }

        Ok(success)
    }
}
