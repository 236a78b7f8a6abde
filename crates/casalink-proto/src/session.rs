//! One live connection attempt to a controller.
//!
//! A [`Session`] owns the probe → open → authenticate → configure →
//! subscribe sequence for a single connection, the single-in-flight
//! command/response correlation, and the binary/text frame handling. The
//! reconnect loop that drives sessions lives in `casalink-core`.
//!
//! Inbound transport events are processed on a dedicated pump task, so
//! awaited commands may be issued from any other task without deadlocking.
//! Never await [`Session::request`] from code running on the pump itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use url::Url;

use crate::auth::{AuthStrategy, CommandChannel};
use crate::error::{DisconnectReason, Error, FailureKind};
use crate::probe::{CapabilityProbe, ProbeResult};
use crate::transport::{FrameLimits, Transport, TransportEvent, TransportSink};
use crate::wire::{FrameOutput, FrameParser, StateUpdate};

/// WebSocket endpoint path on the controller.
const WS_PATH: &str = "/ws/rfc6455";
/// Subprotocol announced on the upgrade request.
const SUBPROTOCOL: &str = "remotecontrol";

const STRUCTURE_COMMAND: &str = "data/structure.json";
const ENABLE_UPDATES_COMMAND: &str = "jdev/sps/enablebinstatusupdate";
const KEEPALIVE_COMMAND: &str = "keepalive";

/// Normal-closure code used for locally initiated disconnects.
const CLOSE_NORMAL: u16 = 1000;

// ── Configuration ────────────────────────────────────────────────────

/// Per-session tuning, supplied by the owning supervisor.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long an awaited command may wait for its echoed response.
    pub response_timeout: Duration,
    /// Frame-size limits clamped onto the transport.
    pub limits: FrameLimits,
    /// Force secure (`Some(true)`) or insecure (`Some(false)`) transport;
    /// `None` follows the capability probe.
    pub secure_override: Option<bool>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(4),
            limits: FrameLimits::default(),
            secure_override: None,
        }
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// What a session feeds into the supervisor's bounded update queue.
#[derive(Debug, PartialEq)]
pub enum SessionEvent {
    /// One decoded telemetry record, in wire order.
    Update(StateUpdate),
    /// The full structure document, delivered once after authentication.
    Structure(String),
}

// ── Command/response plumbing ────────────────────────────────────────

/// A correlated response from the controller.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    /// Echoed (and quirk-normalized) command name.
    pub control: String,
    /// Result payload, shape depends on the command.
    pub value: serde_json::Value,
    /// Controller status code; 200 is success.
    pub code: u16,
}

impl CommandResponse {
    /// The payload as a string: verbatim for string values, JSON-rendered
    /// otherwise.
    pub fn value_str(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn into_result(self) -> Result<CommandResponse, Error> {
        match self.code {
            200 => Ok(self),
            401 => Err(Error::AuthCredential {
                message: format!("controller rejected '{}'", self.control),
            }),
            403 => Err(Error::AuthPermanent {
                message: "too many failed logins, controller locked us out".into(),
            }),
            code => Err(Error::CommandFailed {
                control: self.control,
                code,
            }),
        }
    }
}

struct PendingCommand {
    sent: String,
    /// Distinguishes this occupancy from any later one for the same
    /// command text, so expiry never clears a successor.
    seq: u64,
    /// `None` for fire-and-forget commands that still occupy the slot.
    responder: Option<oneshot::Sender<Result<CommandResponse, Error>>>,
}

/// `true` when `echoed` is the controller's echo of `sent`, accounting for
/// the peer quirk that rewrites a leading `jdev/` to `dev/`. The quirk is
/// applied to that family only; all other prefixes must echo verbatim.
fn echo_matches(sent: &str, echoed: &str) -> bool {
    if sent == echoed {
        return true;
    }
    match (sent.strip_prefix("jdev/"), echoed.strip_prefix("dev/")) {
        (Some(sent_rest), Some(echoed_rest)) => sent_rest == echoed_rest,
        _ => false,
    }
}

// ── Session ──────────────────────────────────────────────────────────

/// Handle to one live connection. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    auth: Arc<dyn AuthStrategy>,
    sink: Mutex<Box<dyn TransportSink>>,
    pending: Mutex<Option<PendingCommand>>,
    command_seq: AtomicU64,
    offline: Mutex<Option<DisconnectReason>>,
    awaiting_structure: AtomicBool,
    active_tx: watch::Sender<bool>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl Session {
    /// Probe the controller and open the framed transport.
    ///
    /// The probe is best-effort: on failure the session assumes the newest
    /// capability level. Configuration (`secure_override`) beats the probe
    /// when deciding secure vs. insecure; with an override set the probe is
    /// skipped entirely.
    pub async fn open(
        transport: &dyn Transport,
        auth: Arc<dyn AuthStrategy>,
        base: &Url,
        config: SessionConfig,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Result<Self, Error> {
        let secure = match config.secure_override {
            Some(secure) => secure,
            None => {
                let probe = CapabilityProbe::new(config.response_timeout)?;
                let caps = match probe.probe(base).await {
                    Ok(caps) => {
                        tracing::debug!(version = %caps.version, secure = caps.secure_capable, "capability probe");
                        caps
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "capability probe inconclusive, assuming latest");
                        ProbeResult::assume_latest()
                    }
                };
                caps.secure_capable
            }
        };

        let ws_url = websocket_target(base, secure)?;
        let (sink, events) = transport.open(&ws_url, SUBPROTOCOL, config.limits).await?;

        let (active_tx, _) = watch::channel(true);
        let inner = Arc::new(SessionInner {
            config,
            auth,
            sink: Mutex::new(sink),
            pending: Mutex::new(None),
            command_seq: AtomicU64::new(0),
            offline: Mutex::new(None),
            awaiting_structure: AtomicBool::new(false),
            active_tx,
            event_tx,
        });

        tokio::spawn(event_pump(Arc::clone(&inner), events));

        Ok(Self { inner })
    }

    // ── Lifecycle operations ─────────────────────────────────────

    /// Run the configured authentication strategy's handshake.
    ///
    /// On failure the session is disconnected with the classified reason.
    pub async fn authenticate(&self) -> Result<(), Error> {
        match self.inner.auth.authenticate(self).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.disconnect(e.to_reason()).await;
                Err(e)
            }
        }
    }

    /// Request the full structure document. The next text frame the
    /// controller sends is treated as that document and surfaced as
    /// [`SessionEvent::Structure`].
    pub async fn request_structure(&self) -> Result<(), Error> {
        self.inner.awaiting_structure.store(true, Ordering::SeqCst);
        if let Err(e) = self.transmit(STRUCTURE_COMMAND).await {
            self.inner.awaiting_structure.store(false, Ordering::SeqCst);
            self.disconnect(e.to_reason()).await;
            return Err(e);
        }
        Ok(())
    }

    /// Subscribe to binary telemetry. A failed subscription request takes
    /// the session down as a communication failure.
    pub async fn enable_status_updates(&self) -> Result<(), Error> {
        match self.request(ENABLE_UPDATES_COMMAND).await {
            Ok(_) => Ok(()),
            // These already disconnected the session on their way out.
            Err(e @ (Error::SessionClosed { .. } | Error::ResponseTimeout { .. })) => Err(e),
            Err(e) => {
                self.disconnect(DisconnectReason::communication(format!(
                    "subscription request failed: {e}"
                )))
                .await;
                Err(e)
            }
        }
    }

    /// Send a keepalive; the controller acknowledges with a binary header.
    pub async fn send_keepalive(&self) -> Result<(), Error> {
        if let Err(e) = self.transmit(KEEPALIVE_COMMAND).await {
            self.disconnect(e.to_reason()).await;
            return Err(e);
        }
        Ok(())
    }

    // ── Command submission ───────────────────────────────────────

    /// Send a command and await its correlated response.
    ///
    /// Fails immediately with [`Error::CommandInFlight`], transmitting
    /// nothing, if another command is already outstanding. A response that
    /// does not arrive within the configured timeout disconnects the
    /// session as a communication failure. Only one response timer exists
    /// at a time by construction: the slot is single-occupancy and each
    /// wait carries its own timeout.
    pub async fn request(&self, command: &str) -> Result<CommandResponse, Error> {
        let (seq, rx) = self.begin_command(command, true).await?;
        let rx = rx.ok_or(Error::Configuration {
            message: "request registered without a responder".into(),
        })?;

        if let Err(e) = self.transmit(command).await {
            self.clear_pending(seq).await;
            self.disconnect(e.to_reason()).await;
            return Err(e);
        }

        let timeout = self.inner.config.response_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Responder dropped without an answer: the session is gone.
            Ok(Err(_)) => Err(Error::SessionClosed {
                reason: self
                    .offline_reason()
                    .await
                    .unwrap_or_else(|| DisconnectReason::communication("session torn down")),
            }),
            Err(_) => {
                self.clear_pending(seq).await;
                self.disconnect(DisconnectReason::communication(format!(
                    "no response to '{command}' within {}s",
                    timeout.as_secs()
                )))
                .await;
                Err(Error::ResponseTimeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Send a command without waiting for its response. The command still
    /// occupies the single in-flight slot until its echo arrives, or until
    /// the response timeout expires without one; a non-success code is
    /// logged, not returned.
    pub async fn send_command(&self, command: &str) -> Result<(), Error> {
        let (seq, _) = self.begin_command(command, false).await?;
        if let Err(e) = self.transmit(command).await {
            self.clear_pending(seq).await;
            self.disconnect(e.to_reason()).await;
            return Err(e);
        }

        // Nobody awaits this echo, so the slot needs its own expiry. A
        // lost echo costs one timeout and a warning, never a wedged slot.
        let inner = Arc::clone(&self.inner);
        let timeout = self.inner.config.response_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut pending = inner.pending.lock().await;
            if let Some(lost) = pending.take_if(|p| p.seq == seq) {
                tracing::warn!(
                    command = %lost.sent,
                    timeout_secs = timeout.as_secs(),
                    "no echo for fire-and-forget command, releasing the slot"
                );
            }
        });
        Ok(())
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Take the session offline. Idempotent: the first caller's reason
    /// wins, whether it came from this end or the peer.
    pub async fn disconnect(&self, reason: DisconnectReason) {
        let first = {
            let mut slot = self.inner.offline.lock().await;
            if slot.is_some() {
                false
            } else {
                *slot = Some(reason.clone());
                true
            }
        };
        if !first {
            return;
        }

        tracing::info!(kind = ?reason.kind, detail = %reason.detail, "disconnecting");

        let close_result = {
            let mut sink = self.inner.sink.lock().await;
            sink.close(CLOSE_NORMAL, &reason.detail).await
        };
        if close_result.is_err() {
            // Transport already gone; report offline immediately instead of
            // waiting for a close event that will never come.
            self.inner.mark_offline(reason).await;
        }
    }

    // ── Observation ──────────────────────────────────────────────

    /// Cross-task-visible liveness flag.
    pub fn is_active(&self) -> bool {
        *self.inner.active_tx.borrow()
    }

    /// Resolve once the session has gone inactive.
    pub async fn wait_inactive(&self) {
        let mut rx = self.inner.active_tx.subscribe();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// The recorded offline reason, if the session has failed.
    pub async fn offline_reason(&self) -> Option<DisconnectReason> {
        self.inner.offline.lock().await.clone()
    }

    // ── Internals ────────────────────────────────────────────────

    async fn begin_command(
        &self,
        command: &str,
        want_response: bool,
    ) -> Result<(u64, Option<oneshot::Receiver<Result<CommandResponse, Error>>>), Error> {
        if let Some(reason) = self.offline_reason().await {
            return Err(Error::SessionClosed { reason });
        }

        let mut pending = self.inner.pending.lock().await;
        if pending.is_some() {
            return Err(Error::CommandInFlight);
        }

        let (responder, rx) = if want_response {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let seq = self.inner.command_seq.fetch_add(1, Ordering::Relaxed);
        *pending = Some(PendingCommand {
            sent: command.to_string(),
            seq,
            responder,
        });
        Ok((seq, rx))
    }

    async fn clear_pending(&self, seq: u64) {
        let mut pending = self.inner.pending.lock().await;
        if pending.as_ref().is_some_and(|p| p.seq == seq) {
            *pending = None;
        }
    }

    async fn transmit(&self, command: &str) -> Result<(), Error> {
        let wire = self.inner.auth.encrypt_command(command);
        let mut sink = self.inner.sink.lock().await;
        sink.send_text(&wire).await
    }
}

#[async_trait::async_trait]
impl CommandChannel for Session {
    async fn request(&self, command: &str) -> Result<CommandResponse, Error> {
        Session::request(self, command).await
    }
}

impl SessionInner {
    /// Record the offline reason (first wins), release any blocked waiter,
    /// and flip the liveness flag. Safe to call more than once.
    async fn mark_offline(&self, fallback: DisconnectReason) -> DisconnectReason {
        let reason = {
            let mut slot = self.offline.lock().await;
            slot.get_or_insert(fallback).clone()
        };

        if let Some(pending) = self.pending.lock().await.take() {
            if let Some(responder) = pending.responder {
                let _ = responder.send(Err(Error::SessionClosed {
                    reason: reason.clone(),
                }));
            }
        }

        let _ = self.active_tx.send(false);
        reason
    }
}

// ── Target resolution ────────────────────────────────────────────────

fn websocket_target(base: &Url, secure: bool) -> Result<Url, Error> {
    let mut url = base.join(WS_PATH).map_err(|e| Error::Configuration {
        message: format!("bad controller target: {e}"),
    })?;
    let scheme = if secure { "wss" } else { "ws" };
    url.set_scheme(scheme).map_err(|()| Error::Configuration {
        message: format!("target '{base}' cannot carry scheme '{scheme}'"),
    })?;
    Ok(url)
}

// ── Inbound event pump ───────────────────────────────────────────────

/// Processes transport events for one session until the connection ends.
/// Runs on its own task; frame handling here is atomic with respect to
/// command submission through the pending-slot mutex.
async fn event_pump(inner: Arc<SessionInner>, mut events: mpsc::Receiver<TransportEvent>) {
    let mut parser = FrameParser::new();

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Binary(bytes) => {
                handle_binary(&inner, &mut parser, &bytes).await;
            }
            TransportEvent::Text(msg) => {
                handle_text(&inner, &msg).await;
            }
            TransportEvent::Error(detail) => {
                tracing::warn!(error = %detail, "transport error");
            }
            TransportEvent::Closed { code, reason } => {
                on_close(&inner, code, &reason).await;
                return;
            }
        }
    }

    // Channel ended without a close event: treat as an abnormal drop.
    inner
        .mark_offline(DisconnectReason::communication("transport stream ended"))
        .await;
}

async fn handle_binary(inner: &Arc<SessionInner>, parser: &mut FrameParser, bytes: &[u8]) {
    match parser.feed(bytes) {
        Ok(FrameOutput::Updates(updates)) => {
            for update in updates {
                // Bounded queue: backpressure from a slow supervisor stalls
                // only this pump, never the command path.
                if inner
                    .event_tx
                    .send(SessionEvent::Update(update))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
        Ok(FrameOutput::KeepaliveAck) => {
            tracing::trace!("keepalive acknowledged");
        }
        Ok(FrameOutput::OutOfService) => {
            let reason = inner
                .mark_offline(DisconnectReason::communication(
                    "controller going out of service",
                ))
                .await;
            tracing::info!(detail = %reason.detail, "controller out of service");
        }
        Ok(FrameOutput::BinaryFile(payload)) => {
            tracing::debug!(len = payload.len(), "binary file payload ignored");
        }
        Ok(FrameOutput::Skipped(kind)) => {
            tracing::debug!(?kind, "payload kind not surfaced as updates");
        }
        Ok(FrameOutput::None | FrameOutput::TextFollows) => {}
        // Malformed frames are discarded, never fatal.
        Err(e) => {
            tracing::warn!(error = %e, len = bytes.len(), "malformed binary frame discarded");
        }
    }
}

async fn handle_text(inner: &Arc<SessionInner>, msg: &str) {
    // While the structure document is outstanding, the next text frame is
    // that document, not a correlated response.
    if inner.awaiting_structure.swap(false, Ordering::SeqCst) {
        let _ = inner
            .event_tx
            .send(SessionEvent::Structure(msg.to_string()))
            .await;
        return;
    }

    let Some((control, value, code)) = parse_envelope(msg) else {
        tracing::debug!(len = msg.len(), "unparseable text frame dropped");
        return;
    };
    let control = inner.auth.decrypt_echoed_name(&control);

    let taken = {
        let mut pending = inner.pending.lock().await;
        match pending.as_ref() {
            Some(p) if echo_matches(&p.sent, &control) => pending.take(),
            _ => None,
        }
    };

    let Some(pending) = taken else {
        tracing::debug!(control = %control, "unsolicited response dropped");
        return;
    };

    let result = match code {
        Some(code) => CommandResponse {
            control,
            value,
            code,
        }
        .into_result(),
        // A reply without a usable status code is a protocol violation,
        // folded into the communication taxonomy with distinct detail.
        None => Err(Error::Communication {
            detail: format!("response for '{control}' carried no error code"),
        }),
    };

    match pending.responder {
        Some(responder) => {
            let _ = responder.send(result);
        }
        None => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "fire-and-forget command failed");
            }
        }
    }
}

async fn on_close(inner: &Arc<SessionInner>, code: u16, reason: &str) {
    // The first already-classified reason wins; otherwise translate the
    // close code the peer gave us.
    let fallback = translate_close(code, reason);
    let recorded = inner.mark_offline(fallback).await;
    tracing::info!(code, kind = ?recorded.kind, detail = %recorded.detail, "session closed");
}

fn translate_close(code: u16, reason: &str) -> DisconnectReason {
    let detail = match (code, reason.is_empty()) {
        (1000, true) => "closed by peer".to_string(),
        (_, true) => format!("closed by peer with code {code}"),
        (_, false) => format!("closed by peer with code {code}: {reason}"),
    };
    DisconnectReason::new(FailureKind::Communication, detail)
}

/// Parse the controller's response envelope:
/// `{"LL": {"control": <name>, "value": ..., "code": "200"}}`.
/// The code arrives as a string or a number, under `code` or `Code`.
fn parse_envelope(msg: &str) -> Option<(String, serde_json::Value, Option<u16>)> {
    let doc: serde_json::Value = serde_json::from_str(msg).ok()?;
    let body = doc.get("LL")?;
    let control = body.get("control")?.as_str()?.to_string();
    let value = body.get("value").cloned().unwrap_or(serde_json::Value::Null);
    let code = body
        .get("code")
        .or_else(|| body.get("Code"))
        .and_then(|c| match c {
            serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        });
    Some((control, value, code))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoAuth;
    use crate::error::FailureKind;
    use crate::mock::{SentFrame, mock_transport};
    use crate::wire::ObjectId;

    fn test_config() -> SessionConfig {
        SessionConfig {
            response_timeout: Duration::from_secs(2),
            limits: FrameLimits::default(),
            // Skip the HTTP probe in unit tests.
            secure_override: Some(false),
        }
    }

    async fn open_session() -> (
        Session,
        crate::mock::MockRemote,
        mpsc::Receiver<SessionEvent>,
    ) {
        let (transport, mut remotes) = mock_transport();
        let (event_tx, event_rx) = mpsc::channel(64);
        let base = Url::parse("http://192.168.1.77").expect("url");
        let session = Session::open(
            transport.as_ref(),
            Arc::new(NoAuth),
            &base,
            test_config(),
            event_tx,
        )
        .await
        .expect("open");
        let remote = remotes.recv().await.expect("remote");
        (session, remote, event_rx)
    }

    #[test]
    fn echo_quirk_is_scoped_to_jdev() {
        assert!(echo_matches("jdev/sps/enablebinstatusupdate", "dev/sps/enablebinstatusupdate"));
        assert!(echo_matches("jdev/sys/getkey", "jdev/sys/getkey"));
        assert!(echo_matches("data/structure.json", "data/structure.json"));
        assert!(!echo_matches("jdev/sys/getkey", "dev/sys/getenc"));
        assert!(!echo_matches("data/structure.json", "ata/structure.json"));
    }

    #[test]
    fn websocket_target_scheme_follows_security() {
        let base = Url::parse("http://10.0.0.5:8080").expect("url");
        assert_eq!(
            websocket_target(&base, false).expect("target").as_str(),
            "ws://10.0.0.5:8080/ws/rfc6455"
        );
        assert_eq!(
            websocket_target(&base, true).expect("target").as_str(),
            "wss://10.0.0.5:8080/ws/rfc6455"
        );
    }

    #[tokio::test]
    async fn second_command_fails_fast_without_transmitting() {
        let (session, mut remote, _events) = open_session().await;

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.request("jdev/sys/getkey").await })
        };
        // Let the first request register and transmit.
        assert_eq!(remote.expect_text().await, "jdev/sys/getkey");

        let second = session.request("jdev/sys/other").await;
        assert!(matches!(second, Err(Error::CommandInFlight)));
        // Nothing further went out on the wire.
        assert!(remote.try_sent().is_none());

        remote.reply_ok("jdev/sys/getkey", "aabbcc").await;
        let response = waiter.await.expect("join").expect("response");
        assert_eq!(response.value_str(), "aabbcc");
    }

    #[tokio::test]
    async fn response_correlation_applies_echo_quirk() {
        let (session, mut remote, _events) = open_session().await;

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.request("jdev/sps/enablebinstatusupdate").await })
        };
        remote.expect_text().await;

        // The controller echoes `dev/...` for a `jdev/...` command.
        remote.reply_ok("jdev/sps/enablebinstatusupdate", "1").await;

        let response = waiter.await.expect("join").expect("response");
        assert_eq!(response.control, "dev/sps/enablebinstatusupdate");
        assert_eq!(response.code, 200);
    }

    #[tokio::test]
    async fn mismatched_response_is_dropped_not_fatal() {
        let (session, mut remote, _events) = open_session().await;

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.request("jdev/sys/getkey").await })
        };
        remote.expect_text().await;

        // Unrelated echo: dropped, waiter stays blocked.
        remote.reply_ok("jdev/sys/somethingelse", "x").await;
        // The real response still resolves the waiter.
        remote.reply_ok("jdev/sys/getkey", "ddeeff").await;

        let response = waiter.await.expect("join").expect("response");
        assert_eq!(response.value_str(), "ddeeff");
    }

    #[tokio::test]
    async fn missing_error_code_is_a_communication_failure() {
        let (session, mut remote, _events) = open_session().await;

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.request("jdev/sys/getkey").await })
        };
        remote.expect_text().await;

        remote
            .send_text(r#"{"LL": {"control": "dev/sys/getkey", "value": "k"}}"#)
            .await;

        let result = waiter.await.expect("join");
        assert!(matches!(result, Err(Error::Communication { .. })));
    }

    #[tokio::test]
    async fn error_codes_map_to_auth_failures() {
        let (session, mut remote, _events) = open_session().await;

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.request("authenticate/u/t").await })
        };
        remote.expect_text().await;
        remote
            .reply("authenticate/u/t", serde_json::Value::Null, 401)
            .await;
        assert!(matches!(
            waiter.await.expect("join"),
            Err(Error::AuthCredential { .. })
        ));

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.request("authenticate/u/t2").await })
        };
        remote.expect_text().await;
        remote
            .reply("authenticate/u/t2", serde_json::Value::Null, 403)
            .await;
        assert!(matches!(
            waiter.await.expect("join"),
            Err(Error::AuthPermanent { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn response_timeout_disconnects_as_communication() {
        let (session, mut remote, _events) = open_session().await;

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.request("jdev/sys/getkey").await })
        };
        assert_eq!(remote.expect_text().await, "jdev/sys/getkey");

        // No reply ever arrives; paused time auto-advances past the timeout.
        let result = waiter.await.expect("join");
        assert!(matches!(result, Err(Error::ResponseTimeout { .. })));

        session.wait_inactive().await;
        let reason = session.offline_reason().await.expect("reason");
        assert_eq!(reason.kind, FailureKind::Communication);

        // The session asked the transport to close.
        loop {
            match remote.next_sent().await {
                Some(SentFrame::Close { .. }) => break,
                Some(_) => continue,
                None => panic!("no close frame observed"),
            }
        }
    }

    #[tokio::test]
    async fn peer_close_releases_blocked_waiter() {
        let (session, mut remote, _events) = open_session().await;

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.request("jdev/sys/getkey").await })
        };
        remote.expect_text().await;

        remote.close(1011, "server restarting").await;

        let result = waiter.await.expect("join");
        match result {
            Err(Error::SessionClosed { reason }) => {
                assert_eq!(reason.kind, FailureKind::Communication);
                assert!(reason.detail.contains("1011"));
            }
            other => panic!("expected SessionClosed, got {other:?}"),
        }
        session.wait_inactive().await;
    }

    #[tokio::test]
    async fn disconnect_twice_keeps_the_first_reason() {
        let (session, _remote, _events) = open_session().await;

        session
            .disconnect(DisconnectReason::new(FailureKind::AuthCredential, "first"))
            .await;
        session
            .disconnect(DisconnectReason::communication("second"))
            .await;

        session.wait_inactive().await;
        let reason = session.offline_reason().await.expect("reason");
        assert_eq!(reason.kind, FailureKind::AuthCredential);
        assert_eq!(reason.detail, "first");
    }

    #[tokio::test]
    async fn structure_request_routes_next_text_frame_as_document() {
        let (session, mut remote, mut events) = open_session().await;

        session.request_structure().await.expect("send");
        assert_eq!(remote.expect_text().await, "data/structure.json");

        remote.send_text(r#"{"controls": {}}"#).await;

        match events.recv().await {
            Some(SessionEvent::Structure(doc)) => assert_eq!(doc, r#"{"controls": {}}"#),
            other => panic!("expected structure event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn updates_preserve_wire_order_and_survive_malformed_frames() {
        let (_session, remote, mut events) = open_session().await;

        let id_a = ObjectId([1; 16]);
        let id_b = ObjectId([2; 16]);

        // A garbage frame in between must not break the stream.
        remote.send_value_states(&[(id_a, 1.0)]).await;
        remote.send_binary(vec![0xde, 0xad, 0xbe, 0xef]).await;
        remote.send_value_states(&[(id_b, 2.0), (id_a, 3.0)]).await;

        let mut seen = Vec::new();
        for _ in 0..3 {
            match events.recv().await {
                Some(SessionEvent::Update(update)) => seen.push(update),
                other => panic!("expected update, got {other:?}"),
            }
        }
        assert_eq!(seen[0].id, id_a);
        assert_eq!(seen[1].id, id_b);
        assert_eq!(seen[2].id, id_a);
        assert_eq!(seen[2].value, crate::wire::StateValue::Number(3.0));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_fire_and_forget_frees_the_slot() {
        let (session, mut remote, _events) = open_session().await;

        session
            .send_command("jdev/sps/io/kitchen/on")
            .await
            .expect("send");
        assert_eq!(remote.expect_text().await, "jdev/sps/io/kitchen/on");
        assert!(matches!(
            session.request("jdev/sys/getkey").await,
            Err(Error::CommandInFlight)
        ));

        // The echo never arrives; the slot expires after the response
        // timeout without taking the session down.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(session.is_active());

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.request("jdev/sys/getkey").await })
        };
        assert_eq!(remote.expect_text().await, "jdev/sys/getkey");
        remote.reply_ok("jdev/sys/getkey", "aabbcc").await;
        let response = waiter.await.expect("join").expect("response");
        assert_eq!(response.value_str(), "aabbcc");
    }

    #[tokio::test(start_paused = true)]
    async fn fire_and_forget_echo_frees_the_slot_before_expiry() {
        let (session, mut remote, _events) = open_session().await;

        session
            .send_command("jdev/sps/io/kitchen/on")
            .await
            .expect("send");
        assert_eq!(remote.expect_text().await, "jdev/sps/io/kitchen/on");
        remote.reply_ok("jdev/sps/io/kitchen/on", "1").await;

        // Well inside the response timeout: only the echo can have freed
        // the slot.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.request("jdev/sys/getkey").await })
        };
        assert_eq!(remote.expect_text().await, "jdev/sys/getkey");
        remote.reply_ok("jdev/sys/getkey", "ddeeff").await;
        assert!(waiter.await.expect("join").is_ok());
    }

    #[tokio::test]
    async fn text_state_tables_surface_as_text_updates() {
        let (_session, remote, mut events) = open_session().await;

        let id = ObjectId([7; 16]);
        remote.send_text_states(&[(id, "Open")]).await;

        match events.recv().await {
            Some(SessionEvent::Update(update)) => {
                assert_eq!(update.id, id);
                assert_eq!(
                    update.value,
                    crate::wire::StateValue::Text("Open".into())
                );
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn out_of_service_header_takes_session_offline() {
        let (session, remote, _events) = open_session().await;

        remote
            .send_binary(
                crate::wire::encode_header(crate::wire::PayloadKind::OutOfService, 0).to_vec(),
            )
            .await;

        session.wait_inactive().await;
        let reason = session.offline_reason().await.expect("reason");
        assert_eq!(reason.kind, FailureKind::Communication);
        assert!(reason.detail.contains("out of service"));
    }
}
