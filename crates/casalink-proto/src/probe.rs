//! Plain-HTTP capability probe.
//!
//! Before opening the framed transport we GET a well-known endpoint that
//! reports the controller's firmware version and whether it accepts secure
//! connections. The probe is best-effort: any failure is non-fatal and the
//! session assumes the latest capability level.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::Error;

/// Fixed probe path, served without authentication.
pub const PROBE_PATH: &str = "/jdev/cfg/api";

/// What the probe learned about the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Firmware version string, e.g. `"14.0.3.28"`.
    pub version: String,
    /// Whether the controller accepts secure (TLS) connections.
    pub secure_capable: bool,
}

impl ProbeResult {
    /// Assumed capability when the probe fails: newest firmware, secure.
    pub fn assume_latest() -> Self {
        Self {
            version: String::new(),
            secure_capable: true,
        }
    }
}

// Probe responses use the same envelope as command responses:
// {"LL": {"control": "dev/cfg/api", "value": "...", "code": "200"}}
#[derive(Debug, Deserialize)]
struct ProbeEnvelope {
    #[serde(rename = "LL")]
    ll: ProbeBody,
}

#[derive(Debug, Deserialize)]
struct ProbeBody {
    value: serde_json::Value,
}

/// Probes a controller over plain HTTP.
#[derive(Debug, Clone)]
pub struct CapabilityProbe {
    client: reqwest::Client,
}

impl CapabilityProbe {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Configuration {
                message: format!("failed to build probe client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Probe `base` for version and secure capability.
    ///
    /// Errors here mean "probe inconclusive", not "controller down" -- the
    /// caller falls back to [`ProbeResult::assume_latest`].
    pub async fn probe(&self, base: &Url) -> Result<ProbeResult, Error> {
        let url = base
            .join(PROBE_PATH)
            .map_err(|e| Error::Configuration {
                message: format!("bad probe target: {e}"),
            })?;

        let body = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Communication {
                detail: format!("probe request failed: {e}"),
            })?
            .text()
            .await
            .map_err(|e| Error::Communication {
                detail: format!("probe body unreadable: {e}"),
            })?;

        parse_probe_body(&body).ok_or_else(|| Error::Communication {
            detail: "probe response did not match the expected envelope".into(),
        })
    }
}

/// The `value` field is itself a loosely-quoted JSON-ish document:
/// `{'version':'14.0.3.28', 'httpsStatus':1}`. Accept both quote styles.
fn parse_probe_body(body: &str) -> Option<ProbeResult> {
    let envelope: ProbeEnvelope = serde_json::from_str(body).ok()?;
    let value = match &envelope.ll.value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let inner: serde_json::Value = serde_json::from_str(&value.replace('\'', "\"")).ok()?;
    let version = inner.get("version")?.as_str()?.to_string();
    let secure_capable = inner
        .get("httpsStatus")
        .and_then(serde_json::Value::as_i64)
        .map(|v| v > 0)
        .unwrap_or(false);

    Some(ProbeResult {
        version,
        secure_capable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_quoted_value_document() {
        let body = r#"{"LL": {"control": "dev/cfg/api", "value": "{'version':'14.0.3.28', 'httpsStatus':1}", "code": "200"}}"#;
        let result = parse_probe_body(body).unwrap();
        assert_eq!(result.version, "14.0.3.28");
        assert!(result.secure_capable);
    }

    #[test]
    fn https_status_zero_means_insecure_only() {
        let body = r#"{"LL": {"control": "dev/cfg/api", "value": "{'version':'9.3.0', 'httpsStatus':0}", "code": "200"}}"#;
        let result = parse_probe_body(body).unwrap();
        assert!(!result.secure_capable);
    }

    #[test]
    fn missing_https_status_is_insecure() {
        let body = r#"{"LL": {"control": "dev/cfg/api", "value": "{'version':'8.0.0'}", "code": "200"}}"#;
        assert!(!parse_probe_body(body).unwrap().secure_capable);
    }

    #[test]
    fn garbage_is_inconclusive() {
        assert!(parse_probe_body("<html>not json</html>").is_none());
        assert!(parse_probe_body(r#"{"LL": {"value": 17}}"#).is_none());
    }
}
