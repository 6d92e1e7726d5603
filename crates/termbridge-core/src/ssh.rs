//! Connect targets and the command lines used to reach them

use crate::error::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Host, port and login user of an SSH endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Remote host
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Login user
    pub user: String,
}

impl SshTarget {
    /// Validated target
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Result<Self> {
        let target = Self {
            host: host.into(),
            port,
            user: user.into(),
        };
        validate_endpoint(&target.host, target.port, &target.user)?;
        Ok(target)
    }

    /// `user@host`
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Reject values that ssh would misread as options or that cannot name a host
pub fn validate_endpoint(host: &str, port: u16, user: &str) -> Result<()> {
    let bad = |value: &str| {
        value.is_empty() || value.starts_with('-') || value.chars().any(char::is_whitespace)
    };
    if bad(host) {
        return Err(Error::InvalidTarget(format!("bad host '{}'", host)));
    }
    if port == 0 {
        return Err(Error::InvalidTarget("port must be 1-65535".into()));
    }
    if bad(user) || user.contains('@') {
        return Err(Error::InvalidTarget(format!("bad login user '{}'", user)));
    }
    Ok(())
}

/// What a session connects to
#[derive(Debug, Clone)]
pub enum ConnectTarget {
    /// A saved connection, resolved through the credential store
    Saved {
        /// Owner of the connection
        owner_id: i64,
        /// Connection name
        name: String,
    },
    /// Ad hoc SSH endpoint with no stored secrets
    Manual(SshTarget),
    /// Interactive shell on the local machine
    LocalShell {
        /// Shell binary
        shell: String,
        /// Working directory
        cwd: Option<PathBuf>,
    },
}

/// A fully resolved child process command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnSpec {
    /// Program to execute
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables (the rest is inherited)
    pub env: Vec<(String, String)>,
    /// Working directory
    pub cwd: Option<PathBuf>,
}

impl SpawnSpec {
    /// Spec for `program` with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append an argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

/// Builds the child command for a target.
///
/// The registry only ever spawns what a launcher returns, so tests swap in a
/// launcher that runs a local script instead of ssh.
pub trait Launcher: Send + Sync {
    /// Command line reaching `target`, authenticating with `key_file` if given
    fn ssh_command(&self, target: &SshTarget, key_file: Option<&Path>) -> SpawnSpec;

    /// Command line for an interactive local shell
    fn shell_command(&self, shell: &str, cwd: Option<&Path>) -> SpawnSpec {
        let mut spec = SpawnSpec::new(shell).env("TERM", "xterm-256color");
        if let Some(dir) = cwd {
            spec = spec.cwd(dir);
        }
        spec
    }
}

/// Launches the system `ssh` client
#[derive(Debug, Clone)]
pub struct SshLauncher {
    program: String,
}

impl SshLauncher {
    /// Launcher invoking `program` (usually `ssh`)
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SshLauncher {
    fn default() -> Self {
        Self::new("ssh")
    }
}

impl Launcher for SshLauncher {
    fn ssh_command(&self, target: &SshTarget, key_file: Option<&Path>) -> SpawnSpec {
        let mut spec = SpawnSpec::new(&self.program)
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg("ServerAliveInterval=60");
        if let Some(key) = key_file {
            spec = spec.arg("-i").arg(key.display().to_string());
        }
        spec.arg("-p")
            .arg(target.port.to_string())
            .arg(target.destination())
            .env("TERM", "xterm-256color")
    }
}

/// Write a private key to an owner-only temporary file.
///
/// The returned path unlinks the file when closed or dropped.
pub fn write_key_file(dir: Option<&Path>, pem: &str) -> Result<tempfile::TempPath> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("termbridge-key-").suffix(".pem");
    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(|e| Error::SpawnFailed(format!("failed to create key file: {}", e)))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::SpawnFailed(format!("failed to restrict key file: {}", e)))?;
    }

    file.write_all(pem.as_bytes())?;
    if !pem.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(file.into_temp_path())
}
