//! NTLM challenge/response authentication.
//!
//! Negotiation is driven through an external line-oriented credential helper
//! (one helper process per active negotiation) speaking the squid ntlmssp
//! helper protocol: we send `YR <token>` to start and `KK <token>` to
//! continue, the helper answers `TT <challenge>`, `AF <identity>`, `NA
//! <reason>` or `BH <error>`. The state machine itself is a pure function of
//! `(state, input)` behind the [`CredentialHelper`] seam so tests never
//! spawn a real process.

use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::error::RegistryError;

/// Argument selecting the squid NTLMSSP mode of the helper tool.
const HELPER_PROTOCOL_ARG: &str = "--helper-protocol=squid-2.5-ntlmssp";

/// Negotiation rounds allowed before the machine gives up instead of
/// resetting forever.
const MAX_RESETS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtlmState {
    Reset,
    Negotiate,
    Response,
    Success,
}

/// One step of the negotiation as seen by the transport: a token to send
/// back to the client, and whether the session is now authenticated.
///
/// `authenticated == false` does not signal failure; it means the caller
/// should keep relaying tokens until it either turns true or the caller
/// gives up.
#[derive(Debug, Clone, PartialEq)]
pub struct NtlmExchange {
    pub token: String,
    pub authenticated: bool,
}

/// Line-oriented exchange with the credential helper: send one directive
/// line, read one reply line (including its terminator).
pub trait CredentialHelper {
    fn exchange(&mut self, line: &str) -> io::Result<String>;
}

/// Credential helper backed by a child process wired up over stdin/stdout/
/// stderr pipes. The process is torn down when the owning session ends.
pub struct SubprocessHelper {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl SubprocessHelper {
    /// Spawns the helper tool. The path must exist and be executable;
    /// anything else is a hard error, fatal to session creation.
    pub fn spawn(helper: &Path) -> Result<Self, RegistryError> {
        verify_executable(helper)?;

        log::debug!("spawning child process {}", helper.display());

        let mut child = Command::new(helper)
            .arg(HELPER_PROTOCOL_ARG)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                RegistryError::Internal(format!(
                    "failed to spawn helper {}: {}",
                    helper.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RegistryError::Internal("helper stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RegistryError::Internal("helper stdout not captured".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }
}

impl CredentialHelper for SubprocessHelper {
    fn exchange(&mut self, line: &str) -> io::Result<String> {
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.flush()?;

        let mut reply = String::new();
        self.stdout.read_line(&mut reply)?;
        Ok(reply)
    }
}

impl Drop for SubprocessHelper {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn verify_executable(helper: &Path) -> Result<(), RegistryError> {
    let meta = std::fs::metadata(helper).map_err(|e| {
        RegistryError::Internal(format!("helper {} is not usable: {}", helper.display(), e))
    })?;

    if !meta.is_file() {
        return Err(RegistryError::Internal(format!(
            "helper {} is not a file",
            helper.display()
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(RegistryError::Internal(format!(
                "permission check failed for helper {}",
                helper.display()
            )));
        }
    }

    Ok(())
}

/// The negotiation state machine for one session.
pub struct NtlmAuthenticator<H> {
    helper: H,
    state: NtlmState,
    resets: u32,
}

impl NtlmAuthenticator<SubprocessHelper> {
    /// Builds an authenticator around a freshly spawned helper process.
    pub fn spawn(helper_path: &Path) -> Result<Self, RegistryError> {
        Ok(Self::new(SubprocessHelper::spawn(helper_path)?))
    }
}

impl<H: CredentialHelper> NtlmAuthenticator<H> {
    pub fn new(helper: H) -> Self {
        Self {
            helper,
            state: NtlmState::Reset,
            resets: 0,
        }
    }

    pub fn state(&self) -> NtlmState {
        self.state
    }

    /// Advances the negotiation with the client's latest token.
    ///
    /// A missing or malformed token forces the machine back to `Reset`,
    /// from which it immediately re-emits the initial `"NTLM"` token. Each
    /// reset counts toward a bound; past it the session is refused rather
    /// than negotiating forever.
    pub fn challenge(&mut self, token: Option<&str>) -> Result<NtlmExchange, RegistryError> {
        match token {
            None => {
                log::debug!("empty challenge received, starting NTLM negotiation");
                self.state = NtlmState::Reset;
            }
            Some(tok) if !tok.starts_with("NTLM ") || tok.len() < 6 => {
                log::error!("NTLM challenge is malformed");
                self.state = NtlmState::Reset;
            }
            Some(_) => {}
        }

        if self.state != NtlmState::Reset {
            // the guard above guarantees an ASCII "NTLM " prefix, so byte
            // offset 5 is a char boundary
            let payload = &token.unwrap_or_default()[5..];
            log::trace!("NTLM challenge data: {}", payload);

            let reply = match self.state {
                NtlmState::Negotiate => self
                    .helper
                    .exchange(&format!("YR {}\n", payload))
                    .map_err(|e| RegistryError::Internal(format!("helper i/o failed: {}", e)))?,
                NtlmState::Response => self
                    .helper
                    .exchange(&format!("KK {}\n", payload))
                    .map_err(|e| RegistryError::Internal(format!("helper i/o failed: {}", e)))?,
                _ => String::new(),
            };

            log::trace!("raw data received from helper: {}", reply.trim_end());

            match parse_helper_reply(&reply) {
                Some(("TT", msg)) if self.state == NtlmState::Negotiate => {
                    log::debug!("sending challenge to client");
                    self.state = NtlmState::Response;
                    return Ok(NtlmExchange {
                        token: format!("NTLM {}", msg),
                        authenticated: false,
                    });
                }
                Some(("AF", msg)) if self.state == NtlmState::Response => {
                    log::info!("authentication succeeded for {}", msg);
                    self.state = NtlmState::Success;
                    return Ok(NtlmExchange {
                        token: msg.to_string(),
                        authenticated: true,
                    });
                }
                Some(("NA", msg)) if self.state == NtlmState::Response => {
                    log::info!("authentication failed: {}", msg);
                    self.state = NtlmState::Reset;
                }
                Some(("BH", msg)) => {
                    log::error!("received error from helper: {}", msg);
                    self.state = NtlmState::Reset;
                }
                Some((code, _)) => {
                    log::error!(
                        "authentication context reached an unexpected state: \
                         state={:?} helper_code={}",
                        self.state,
                        code
                    );
                    self.state = NtlmState::Reset;
                }
                None => {
                    log::error!("response from helper is malformed");
                    self.state = NtlmState::Reset;
                }
            }
        }

        if self.state == NtlmState::Reset {
            self.resets += 1;
            if self.resets > MAX_RESETS {
                return Err(RegistryError::AccessDenied(
                    "too many NTLM negotiation rounds".to_string(),
                ));
            }

            self.state = NtlmState::Negotiate;
            return Ok(NtlmExchange {
                token: "NTLM".to_string(),
                authenticated: false,
            });
        }

        Ok(NtlmExchange {
            token: String::new(),
            authenticated: self.state == NtlmState::Success,
        })
    }
}

/// Splits a helper reply into `(code, payload)`. The wire format is a
/// two-letter status, one space, the payload, a trailing newline.
fn parse_helper_reply(reply: &str) -> Option<(&str, &str)> {
    let bytes = reply.as_bytes();
    if bytes.len() < 5 || bytes[2] != b' ' || bytes[bytes.len() - 1] != b'\n' {
        return None;
    }

    Some((&reply[..2], reply[3..].trim_end_matches(['\r', '\n'])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted helper: records directives, plays back canned replies.
    struct FakeHelper {
        sent: Vec<String>,
        replies: VecDeque<String>,
    }

    impl FakeHelper {
        fn new(replies: &[&str]) -> Self {
            Self {
                sent: Vec::new(),
                replies: replies.iter().map(|r| r.to_string()).collect(),
            }
        }
    }

    impl CredentialHelper for FakeHelper {
        fn exchange(&mut self, line: &str) -> io::Result<String> {
            self.sent.push(line.to_string());
            Ok(self.replies.pop_front().unwrap_or_default())
        }
    }

    #[test]
    fn full_negotiation_succeeds() {
        let helper = FakeHelper::new(&["TT c2VydmVyY2hhbGxlbmdl\n", "AF alice\n"]);
        let mut auth = NtlmAuthenticator::new(helper);

        // no token yet: machine resets and emits the initial token
        let step = auth.challenge(None).unwrap();
        assert_eq!(step.token, "NTLM");
        assert!(!step.authenticated);
        assert_eq!(auth.state(), NtlmState::Negotiate);

        // type-1 message: helper asks for more data
        let step = auth.challenge(Some("NTLM dHlwZTE=")).unwrap();
        assert_eq!(step.token, "NTLM c2VydmVyY2hhbGxlbmdl");
        assert!(!step.authenticated);
        assert_eq!(auth.state(), NtlmState::Response);

        // type-3 message: helper resolves the identity
        let step = auth.challenge(Some("NTLM dHlwZTM=")).unwrap();
        assert_eq!(step.token, "alice");
        assert!(step.authenticated);
        assert_eq!(auth.state(), NtlmState::Success);

        assert_eq!(auth.helper.sent, vec!["YR dHlwZTE=\n", "KK dHlwZTM=\n"]);
    }

    #[test]
    fn rejection_resets_the_machine() {
        let helper = FakeHelper::new(&["TT challenge\n", "NA bad password\n"]);
        let mut auth = NtlmAuthenticator::new(helper);

        auth.challenge(None).unwrap();
        auth.challenge(Some("NTLM one")).unwrap();
        let step = auth.challenge(Some("NTLM three")).unwrap();

        // not authenticated, and the machine restarted negotiation
        assert!(!step.authenticated);
        assert_eq!(step.token, "NTLM");
        assert_eq!(auth.state(), NtlmState::Negotiate);
    }

    #[test]
    fn malformed_token_resets() {
        let helper = FakeHelper::new(&["TT challenge\n"]);
        let mut auth = NtlmAuthenticator::new(helper);

        auth.challenge(None).unwrap();
        let step = auth.challenge(Some("Basic dXNlcjpwYXNz")).unwrap();
        assert_eq!(step.token, "NTLM");
        assert_eq!(auth.state(), NtlmState::Negotiate);
    }

    #[test]
    fn short_or_non_ascii_token_resets() {
        let helper = FakeHelper::new(&["TT challenge\n"]);
        let mut auth = NtlmAuthenticator::new(helper);

        auth.challenge(None).unwrap();

        // bare scheme with no payload
        let step = auth.challenge(Some("NTLM ")).unwrap();
        assert_eq!(step.token, "NTLM");
        assert_eq!(auth.state(), NtlmState::Negotiate);

        // multibyte character straddling the payload offset must not panic
        let step = auth.challenge(Some("NTLMé")).unwrap();
        assert_eq!(step.token, "NTLM");
        assert_eq!(auth.state(), NtlmState::Negotiate);
    }

    #[test]
    fn malformed_helper_reply_resets() {
        // missing newline terminator
        let helper = FakeHelper::new(&["TT challenge"]);
        let mut auth = NtlmAuthenticator::new(helper);

        auth.challenge(None).unwrap();
        let step = auth.challenge(Some("NTLM data")).unwrap();
        assert_eq!(step.token, "NTLM");
        assert_eq!(auth.state(), NtlmState::Negotiate);
    }

    #[test]
    fn helper_bh_error_resets() {
        let helper = FakeHelper::new(&["BH internal error\n"]);
        let mut auth = NtlmAuthenticator::new(helper);

        auth.challenge(None).unwrap();
        let step = auth.challenge(Some("NTLM data")).unwrap();
        assert_eq!(step.token, "NTLM");
        assert!(!step.authenticated);
    }

    #[test]
    fn unexpected_code_resets() {
        let helper = FakeHelper::new(&["AF alice\n"]);
        let mut auth = NtlmAuthenticator::new(helper);

        auth.challenge(None).unwrap();
        // AF is only valid from the Response state
        let step = auth.challenge(Some("NTLM data")).unwrap();
        assert_eq!(step.token, "NTLM");
        assert_eq!(auth.state(), NtlmState::Negotiate);
    }

    #[test]
    fn negotiation_rounds_are_bounded() {
        let mut auth = NtlmAuthenticator::new(FakeHelper::new(&[]));

        for _ in 0..MAX_RESETS {
            auth.challenge(None).unwrap();
        }
        let err = auth.challenge(None).unwrap_err();
        assert_eq!(err.code(), "AccessDenied");
    }

    #[test]
    fn parse_reply_shapes() {
        assert_eq!(parse_helper_reply("TT abc\n"), Some(("TT", "abc")));
        assert_eq!(parse_helper_reply("AF a\n"), Some(("AF", "a")));
        assert_eq!(parse_helper_reply("TTabc\n"), None);
        assert_eq!(parse_helper_reply("TT abc"), None);
        assert_eq!(parse_helper_reply("T\n"), None);
    }
}
