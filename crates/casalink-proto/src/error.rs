use thiserror::Error;

/// Coarse failure classification driving the reconnect policy.
///
/// Every error this crate can produce collapses into one of these kinds;
/// `casalink-core` maps each kind to a delay before the next connection
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Too many failed logins -- the controller refuses further attempts.
    /// Retrying is pointless until credentials are reconfigured.
    AuthPermanent,
    /// Wrong username or password.
    AuthCredential,
    /// Transport, IO, timeout, unexpected close, or a malformed peer reply.
    Communication,
    /// Bad target or an internal invariant violation; requires operator
    /// action and does not auto-clear.
    Configuration,
}

/// Why a session went offline.
///
/// The first reason recorded wins when both ends disconnect concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    pub kind: FailureKind,
    pub detail: String,
}

impl DisconnectReason {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn communication(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Communication, detail)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

/// Top-level error type for the `casalink-proto` crate.
///
/// Covers every failure mode of a single connection attempt: probe,
/// transport open, authentication, command correlation, and framing.
/// `casalink-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Opening the framed transport failed (DNS, refused, TLS, upgrade).
    #[error("transport open failed: {0}")]
    TransportOpen(String),

    /// Sending or closing on an established transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    // ── Authentication ──────────────────────────────────────────────
    /// The controller rejected the credentials.
    #[error("authentication failed: {message}")]
    AuthCredential { message: String },

    /// Excessive failed logins; the controller has locked us out.
    #[error("authentication permanently refused: {message}")]
    AuthPermanent { message: String },

    /// The login handshake did not complete within the response timeout.
    #[error("authentication timed out")]
    AuthTimeout,

    // ── Command / response ──────────────────────────────────────────
    /// A command is already awaiting its response; only one may be
    /// outstanding per session.
    #[error("a command is already in flight")]
    CommandInFlight,

    /// No response arrived within the configured timeout.
    #[error("no response within {timeout_secs}s")]
    ResponseTimeout { timeout_secs: u64 },

    /// The session closed while a command response was awaited.
    #[error("session closed: {reason}")]
    SessionClosed { reason: DisconnectReason },

    /// The controller answered with a non-success error code.
    #[error("command '{control}' failed with code {code}")]
    CommandFailed { control: String, code: u16 },

    // ── Peer behavior ───────────────────────────────────────────────
    /// IO-level or protocol-level communication failure.
    #[error("communication failure: {detail}")]
    Communication { detail: String },

    // ── Configuration ───────────────────────────────────────────────
    /// Bad target, bad structure document, or an internal invariant hit.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl Error {
    /// Collapse this error into the failure kind the reconnect policy
    /// understands.
    pub fn classify(&self) -> FailureKind {
        match self {
            Self::AuthPermanent { .. } => FailureKind::AuthPermanent,
            Self::AuthCredential { .. } => FailureKind::AuthCredential,
            Self::Configuration { .. } | Self::CommandInFlight => FailureKind::Configuration,
            Self::SessionClosed { reason } => reason.kind,
            // AuthTimeout, timeouts, transport and peer failures all retry
            // on the communication cadence.
            _ => FailureKind::Communication,
        }
    }

    /// The disconnect reason to record when this error takes a session down.
    pub fn to_reason(&self) -> DisconnectReason {
        match self {
            Self::SessionClosed { reason } => reason.clone(),
            other => DisconnectReason::new(other.classify(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_the_taxonomy() {
        assert_eq!(
            Error::AuthPermanent {
                message: "locked".into()
            }
            .classify(),
            FailureKind::AuthPermanent
        );
        assert_eq!(
            Error::AuthCredential {
                message: "nope".into()
            }
            .classify(),
            FailureKind::AuthCredential
        );
        assert_eq!(Error::AuthTimeout.classify(), FailureKind::Communication);
        assert_eq!(
            Error::ResponseTimeout { timeout_secs: 4 }.classify(),
            FailureKind::Communication
        );
        assert_eq!(
            Error::TransportOpen("refused".into()).classify(),
            FailureKind::Communication
        );
        assert_eq!(
            Error::Configuration {
                message: "bad target".into()
            }
            .classify(),
            FailureKind::Configuration
        );
    }

    #[test]
    fn session_closed_keeps_the_recorded_kind() {
        let err = Error::SessionClosed {
            reason: DisconnectReason::new(FailureKind::AuthPermanent, "locked out"),
        };
        assert_eq!(err.classify(), FailureKind::AuthPermanent);
        assert_eq!(err.to_reason().detail, "locked out");
    }
}
