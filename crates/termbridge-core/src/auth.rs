//! Login prompt detection and one-shot credential injection

use crate::credentials::SecretBundle;
use crate::error::{Error, Result};
use crate::filter::strip_ansi;
use crate::pty::{PtyProcess, PtyRead};
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use zeroize::Zeroizing;

static PASSWORD_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)password:").expect("valid regex"));
static PASSPHRASE_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)passphrase").expect("valid regex"));

/// Shell prompt terminators
pub const PROMPT_TERMINATORS: [char; 3] = ['$', '#', '>'];

/// Classification of early terminal output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// A password prompt was seen
    NeedsPassword,
    /// A key passphrase prompt was seen
    NeedsKeyPassphrase,
    /// A shell prompt was seen; carries the prompt line
    LoginSucceeded(String),
    /// Nothing recognisable yet
    Undetermined,
}

/// If the last line of `text` ends in a shell prompt terminator, return that line.
pub fn trailing_prompt(text: &str) -> Option<&str> {
    let trimmed = text.trim_end_matches([' ', '\t']);
    let last_line = trimmed.rsplit('\n').next()?.trim();
    last_line
        .ends_with(PROMPT_TERMINATORS)
        .then_some(last_line)
}

/// Classify output that has already had escape sequences removed.
///
/// Credential prompts anywhere in the text win over a trailing shell prompt.
pub fn classify(text: &str) -> AuthState {
    let password = PASSWORD_PROMPT.find(text).map(|m| m.start());
    let passphrase = PASSPHRASE_PROMPT.find(text).map(|m| m.start());
    match (password, passphrase) {
        (Some(pw), Some(pp)) if pp < pw => return AuthState::NeedsKeyPassphrase,
        (Some(_), _) => return AuthState::NeedsPassword,
        (None, Some(_)) => return AuthState::NeedsKeyPassphrase,
        (None, None) => {}
    }
    match trailing_prompt(text) {
        Some(prompt) => AuthState::LoginSucceeded(prompt.to_string()),
        None => AuthState::Undetermined,
    }
}

/// Classify raw terminal bytes
pub fn classify_bytes(bytes: &[u8]) -> AuthState {
    classify(&strip_ansi(&String::from_utf8_lossy(bytes)))
}

/// Error for a child that exited during login, carrying its last line of output
fn login_failed(transcript: &[u8]) -> Error {
    let text = strip_ansi(&String::from_utf8_lossy(transcript));
    let reason = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("connection closed by remote host")
        .to_string();
    Error::LoginFailed { reason }
}

/// Final result of the login phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// A shell prompt appeared
    Authenticated {
        /// Prompt line that matched
        prompt: String,
    },
    /// A prompt needs input the bundle could not supply, or the injected secret was rejected
    AwaitingInput,
    /// Nothing recognisable appeared in the initial window
    TimedOut,
}

/// Outcome plus every byte read while sniffing
#[derive(Debug)]
pub struct SniffReport {
    /// What happened
    pub outcome: AuthOutcome,
    /// Output consumed during the login phase, for replay to the user
    pub transcript: Vec<u8>,
    /// How long the login phase took
    pub elapsed: Duration,
}

/// Watches a freshly spawned PTY until the login outcome is known
#[derive(Debug, Clone)]
pub struct AuthSniffer {
    poll_interval: Duration,
    read_chunk: usize,
    initial_wait: Duration,
    confirm_wait: Duration,
}

impl AuthSniffer {
    /// Sniffer with the given poll interval and wait windows
    pub fn new(poll_interval: Duration, initial_wait: Duration, confirm_wait: Duration) -> Self {
        Self {
            poll_interval,
            read_chunk: 4096,
            initial_wait,
            confirm_wait,
        }
    }

    /// Read until the output classifies or `wait` elapses.
    ///
    /// Returns `Undetermined` on timeout and `Closed` if the child goes away.
    pub async fn observe(
        &self,
        pty: &PtyProcess,
        wait: Duration,
        transcript: &mut Vec<u8>,
    ) -> Result<AuthState> {
        let deadline = Instant::now() + wait;
        let mut window = Vec::new();
        loop {
            match pty.read_nonblocking(self.read_chunk).await? {
                PtyRead::Data(bytes) => {
                    transcript.extend_from_slice(&bytes);
                    window.extend_from_slice(&bytes);
                    let state = classify_bytes(&window);
                    if state != AuthState::Undetermined {
                        return Ok(state);
                    }
                    if Instant::now() < deadline {
                        continue;
                    }
                }
                PtyRead::Empty => {
                    if !pty.is_alive().await {
                        // Drain whatever the child printed before exiting
                        if let Ok(PtyRead::Data(bytes)) =
                            pty.read_nonblocking(self.read_chunk).await
                        {
                            transcript.extend_from_slice(&bytes);
                        }
                        return Err(Error::Closed);
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(AuthState::Undetermined);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Drive the login phase, injecting a stored secret at most once.
    pub async fn run(
        &self,
        pty: &PtyProcess,
        secrets: &SecretBundle,
        attempted: &AtomicBool,
    ) -> Result<SniffReport> {
        let started = Instant::now();
        let mut transcript = Vec::new();

        let first = match self.observe(pty, self.initial_wait, &mut transcript).await {
            Err(Error::Closed) => return Err(login_failed(&transcript)),
            other => other?,
        };
        let secret = match &first {
            AuthState::LoginSucceeded(prompt) => {
                return Ok(SniffReport {
                    outcome: AuthOutcome::Authenticated {
                        prompt: prompt.clone(),
                    },
                    transcript,
                    elapsed: started.elapsed(),
                })
            }
            AuthState::Undetermined => {
                return Ok(SniffReport {
                    outcome: AuthOutcome::TimedOut,
                    transcript,
                    elapsed: started.elapsed(),
                })
            }
            AuthState::NeedsPassword => secrets.password.as_ref(),
            AuthState::NeedsKeyPassphrase => secrets.key_passphrase.as_ref(),
        };

        let Some(secret) = secret else {
            debug!(prompt = ?first, "No stored secret for prompt, awaiting manual input");
            return Ok(SniffReport {
                outcome: AuthOutcome::AwaitingInput,
                transcript,
                elapsed: started.elapsed(),
            });
        };

        if attempted.swap(true, Ordering::SeqCst) {
            return Ok(SniffReport {
                outcome: AuthOutcome::AwaitingInput,
                transcript,
                elapsed: started.elapsed(),
            });
        }

        let mut line = Zeroizing::new(String::with_capacity(secret.len() + 1));
        line.push_str(secret);
        line.push('\n');
        if let Err(e) = pty.write(line.as_bytes()).await {
            return Err(match e {
                Error::Closed => login_failed(&transcript),
                e => e,
            });
        }
        info!(prompt = ?first, "Stored credential injected");

        let outcome = match self.observe(pty, self.confirm_wait, &mut transcript).await {
            Ok(AuthState::LoginSucceeded(prompt)) => AuthOutcome::Authenticated { prompt },
            Ok(_) => AuthOutcome::AwaitingInput,
            Err(Error::Closed) => return Err(login_failed(&transcript)),
            Err(e) => return Err(e),
        };
        Ok(SniffReport {
            outcome,
            transcript,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_prompt() {
        assert_eq!(classify("Password: "), AuthState::NeedsPassword);
        assert_eq!(
            classify("root@10.0.0.1's password: "),
            AuthState::NeedsPassword
        );
    }

    #[test]
    fn test_passphrase_prompt() {
        assert_eq!(
            classify("Enter passphrase for key '/tmp/termbridge-key-x.pem': "),
            AuthState::NeedsKeyPassphrase
        );
    }

    #[test]
    fn test_shell_prompts() {
        assert_eq!(
            classify("Welcome!\nuser@host:~$ "),
            AuthState::LoginSucceeded("user@host:~$".into())
        );
        assert_eq!(
            classify("root@box:/# "),
            AuthState::LoginSucceeded("root@box:/#".into())
        );
        assert_eq!(
            classify("C:\\Users\\me>"),
            AuthState::LoginSucceeded("C:\\Users\\me>".into())
        );
    }

    #[test]
    fn test_credential_prompt_beats_shell_prompt() {
        assert_eq!(
            classify("costs $5\nPassword: "),
            AuthState::NeedsPassword
        );
    }

    #[test]
    fn test_undetermined() {
        assert_eq!(classify(""), AuthState::Undetermined);
        assert_eq!(
            classify("Connecting to host...\n"),
            AuthState::Undetermined
        );
        // Terminator mid-line is not a prompt
        assert_eq!(classify("price $5 today\n"), AuthState::Undetermined);
    }

    #[test]
    fn test_classify_bytes_strips_escapes() {
        assert_eq!(
            classify_bytes(b"\x1b]0;user@host\x07\x1b[01;32muser@host\x1b[00m:~$ "),
            AuthState::LoginSucceeded("user@host:~$".into())
        );
    }

    #[test]
    fn test_login_failure_keeps_last_line() {
        let err = login_failed(
            b"\x1b[0mssh: Could not resolve hostname nope.invalid: Name or service not known\r\n\r\n",
        );
        assert!(matches!(
            err,
            Error::LoginFailed { ref reason } if reason.starts_with("ssh: Could not resolve hostname")
        ));

        let err = login_failed(b"");
        assert!(matches!(
            err,
            Error::LoginFailed { ref reason } if reason == "connection closed by remote host"
        ));
    }

    #[test]
    fn test_trailing_prompt() {
        assert_eq!(trailing_prompt("ls\nfile\nme@h:~$ "), Some("me@h:~$"));
        assert_eq!(trailing_prompt("me@h:~$ \n"), None);
        assert_eq!(trailing_prompt("no prompt"), None);
    }
}
