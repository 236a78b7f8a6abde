//! Failure-driven reconnect delays.

use std::time::Duration;

use casalink_proto::FailureKind;

/// Holdoff after a lockout: retrying sooner only extends the lockout, so
/// the client effectively parks until an operator intervenes or the
/// process restarts.
pub const PERMANENT_HOLDOFF: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Maps a session's failure kind to the delay before the next attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay after transport or protocol trouble.
    pub communication: Duration,
    /// Delay after rejected credentials, long enough for a human to fix
    /// the configuration without hammering the login counter.
    pub credential: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            communication: Duration::from_secs(30),
            credential: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after a failure of `kind`.
    ///
    /// Configuration failures keep the previous delay unchanged: the retry
    /// cannot succeed until an operator fixes the setup, but cadence-wise
    /// it behaves like whatever came before.
    pub fn next_delay(&self, kind: FailureKind, previous: Duration) -> Duration {
        match kind {
            FailureKind::Communication => self.communication,
            FailureKind::AuthCredential => self.credential,
            FailureKind::AuthPermanent => PERMANENT_HOLDOFF,
            FailureKind::Configuration => previous.max(self.communication),
        }
    }
}
