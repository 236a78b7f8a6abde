// ── Client configuration ──
//
// Plain data consumed by [`Miniserver`](crate::Miniserver). Loading this
// from files/env/keyring lives in `casalink-config`; nothing here touches
// the filesystem.

use std::time::Duration;

use casalink_proto::FrameLimits;
use secrecy::SecretString;
use url::Url;

use crate::policy::ReconnectPolicy;

/// How to authenticate once the transport is open.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// No handshake; the controller is fronted by an authenticated channel.
    None,
    /// Hash-based challenge-response login.
    Password { user: String, password: SecretString },
}

/// Everything needed to supervise one controller connection.
#[derive(Debug, Clone)]
pub struct MiniserverConfig {
    /// HTTP base address of the controller, e.g. `http://192.168.1.77`.
    pub url: Url,
    pub auth: AuthMethod,
    /// How long to wait for a correlated command response.
    pub response_timeout: Duration,
    /// Idle cadence for keepalive commands.
    pub keepalive_interval: Duration,
    /// Delays between reconnection attempts, per failure kind.
    pub reconnect: ReconnectPolicy,
    /// Force the transport secure or insecure instead of probing.
    pub secure_override: Option<bool>,
    /// Frame-size limits clamped onto the transport.
    pub limits: FrameLimits,
    /// Capacity of the bounded update queue between session and supervisor.
    pub update_queue_capacity: usize,
}

impl MiniserverConfig {
    pub fn new(url: Url, auth: AuthMethod) -> Self {
        Self {
            url,
            auth,
            response_timeout: Duration::from_secs(4),
            keepalive_interval: Duration::from_secs(240),
            reconnect: ReconnectPolicy::default(),
            secure_override: None,
            limits: FrameLimits::default(),
            update_queue_capacity: 1024,
        }
    }
}
