// ── Connection supervision ──
//
// One long-running task per client: open a session, walk it through
// authentication, configuration, and subscription, pump its telemetry
// into the dispatcher, and when it dies, classify the failure and retry
// on the policy's cadence. Runs until cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use casalink_proto::{
    AuthStrategy, DisconnectReason, Error, FailureKind, HashAuth, NoAuth, Session, SessionConfig,
    SessionEvent, Transport,
};

use crate::config::{AuthMethod, MiniserverConfig};
use crate::miniserver::ConnectionState;
use crate::model::StructureDoc;
use crate::registry::ControlRegistry;

pub(crate) struct SupervisorContext {
    pub config: MiniserverConfig,
    pub registry: Arc<ControlRegistry>,
    pub state_tx: watch::Sender<ConnectionState>,
    pub transport: Arc<dyn Transport>,
    pub cancel: CancellationToken,
}

/// Reconnect loop: attempt, classify, delay, attempt again.
pub(crate) async fn run(ctx: SupervisorContext) {
    let auth = build_auth(&ctx.config.auth);
    let mut delay = Duration::ZERO;

    loop {
        if !delay.is_zero() {
            info!(delay_secs = delay.as_secs(), "waiting before next attempt");
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if ctx.cancel.is_cancelled() {
            break;
        }

        let reason = run_attempt(&ctx, Arc::clone(&auth)).await;
        let _ = ctx.state_tx.send(ConnectionState::Disconnected);
        if ctx.cancel.is_cancelled() {
            break;
        }

        if reason.kind == FailureKind::Configuration {
            error!(detail = %reason.detail, "configuration failure, operator action required");
        } else {
            warn!(kind = ?reason.kind, detail = %reason.detail, "connection attempt ended");
        }
        delay = ctx.config.reconnect.next_delay(reason.kind, delay);
    }

    let _ = ctx.state_tx.send(ConnectionState::Disconnected);
    info!("supervisor stopped");
}

/// One full connection attempt, from open to offline. Always returns the
/// reason the attempt ended.
async fn run_attempt(ctx: &SupervisorContext, auth: Arc<dyn AuthStrategy>) -> DisconnectReason {
    let _ = ctx.state_tx.send(ConnectionState::Connecting);

    let (event_tx, mut event_rx) = mpsc::channel(ctx.config.update_queue_capacity);
    let session_config = SessionConfig {
        response_timeout: ctx.config.response_timeout,
        secure_override: ctx.config.secure_override,
        limits: ctx.config.limits,
    };

    let session = match Session::open(
        ctx.transport.as_ref(),
        auth,
        &ctx.config.url,
        session_config,
        event_tx,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => return e.to_reason(),
    };

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            let reason = DisconnectReason::communication("client shutting down");
            session.disconnect(reason.clone()).await;
            session.wait_inactive().await;
            reason
        }
        reason = drive_session(ctx, &session, &mut event_rx) => reason,
    }
}

/// Drive an open session to its end: handshake, structure, subscription,
/// then telemetry and keepalives until it goes inactive.
async fn drive_session(
    ctx: &SupervisorContext,
    session: &Session,
    event_rx: &mut mpsc::Receiver<SessionEvent>,
) -> DisconnectReason {
    let _ = ctx.state_tx.send(ConnectionState::Authenticating);
    if let Err(e) = session.authenticate().await {
        return settle(session, e).await;
    }

    let _ = ctx.state_tx.send(ConnectionState::AwaitingConfig);
    if let Err(e) = session.request_structure().await {
        return settle(session, e).await;
    }

    let mut keepalive_at = tokio::time::Instant::now() + ctx.config.keepalive_interval;

    loop {
        tokio::select! {
            biased;
            _ = session.wait_inactive() => {
                return offline_reason(session).await;
            }
            event = event_rx.recv() => {
                match event {
                    Some(SessionEvent::Update(update)) => {
                        ctx.registry.dispatcher().apply(&update);
                    }
                    Some(SessionEvent::Structure(doc)) => {
                        if let Err(reason) = apply_structure(ctx, session, &doc).await {
                            return reason;
                        }
                    }
                    None => {
                        session.wait_inactive().await;
                        return offline_reason(session).await;
                    }
                }
            }
            _ = tokio::time::sleep_until(keepalive_at) => {
                if session.send_keepalive().await.is_err() {
                    session.wait_inactive().await;
                    return offline_reason(session).await;
                }
                keepalive_at = tokio::time::Instant::now() + ctx.config.keepalive_interval;
            }
        }
    }
}

/// Parse and load the structure document, then turn telemetry on. A bad
/// document is a configuration failure and takes the session down.
async fn apply_structure(
    ctx: &SupervisorContext,
    session: &Session,
    doc_json: &str,
) -> Result<(), DisconnectReason> {
    let loaded = StructureDoc::parse(doc_json)
        .and_then(|doc| ctx.registry.load_structure(&doc));
    if let Err(e) = loaded {
        let reason = DisconnectReason::new(FailureKind::Configuration, e.to_string());
        session.disconnect(reason.clone()).await;
        session.wait_inactive().await;
        return Err(reason);
    }

    if let Err(e) = session.enable_status_updates().await {
        session.wait_inactive().await;
        return Err(session
            .offline_reason()
            .await
            .unwrap_or_else(|| e.to_reason()));
    }

    let _ = ctx.state_tx.send(ConnectionState::Active);
    info!("telemetry subscription active");
    Ok(())
}

/// The session already recorded why it failed (or is about to); wait for
/// it to finish going down and report that reason.
async fn settle(session: &Session, err: Error) -> DisconnectReason {
    session.wait_inactive().await;
    session
        .offline_reason()
        .await
        .unwrap_or_else(|| err.to_reason())
}

async fn offline_reason(session: &Session) -> DisconnectReason {
    session
        .offline_reason()
        .await
        .unwrap_or_else(|| DisconnectReason::communication("session ended"))
}

fn build_auth(method: &AuthMethod) -> Arc<dyn AuthStrategy> {
    match method {
        AuthMethod::None => Arc::new(NoAuth),
        AuthMethod::Password { user, password } => {
            Arc::new(HashAuth::new(user.clone(), password.clone()))
        }
    }
}
