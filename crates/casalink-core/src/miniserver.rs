// ── Miniserver client ──
//
// The public handle consumers hold: owns the supervisor task, exposes
// connection state as a watch channel, and answers value queries from
// the registry. Cheaply cloneable via `Arc<MiniserverInner>`.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use casalink_proto::{ObjectId, StateValue, Transport, WsTransport};

use crate::config::MiniserverConfig;
use crate::error::CoreError;
use crate::model::Control;
use crate::registry::ControlRegistry;
use crate::supervisor::{self, SupervisorContext};

// ── ConnectionState ──────────────────────────────────────────────

/// Connection lifecycle observable by consumers. `Active` means the
/// telemetry subscription is live; everything else is on the way there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    AwaitingConfig,
    Active,
}

// ── Miniserver ───────────────────────────────────────────────────

/// The main entry point for consumers.
#[derive(Clone)]
pub struct Miniserver {
    inner: Arc<MiniserverInner>,
}

struct MiniserverInner {
    config: MiniserverConfig,
    registry: Arc<ControlRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Miniserver {
    /// Create a client from configuration. Does NOT connect -- call
    /// [`start()`](Self::start) to spawn the supervisor.
    pub fn new(config: MiniserverConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(MiniserverInner {
                config,
                registry: Arc::new(ControlRegistry::new()),
                state_tx,
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &MiniserverConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the supervisor over the production WebSocket transport.
    pub async fn start(&self) -> Result<(), CoreError> {
        self.start_with_transport(Arc::new(WsTransport::new())).await
    }

    /// Spawn the supervisor over a caller-supplied transport.
    pub async fn start_with_transport(
        &self,
        transport: Arc<dyn Transport>,
    ) -> Result<(), CoreError> {
        let mut task = self.inner.task.lock().await;
        if task.is_some() {
            return Err(CoreError::AlreadyStarted);
        }

        let ctx = SupervisorContext {
            config: self.inner.config.clone(),
            registry: Arc::clone(&self.inner.registry),
            state_tx: self.inner.state_tx.clone(),
            transport,
            cancel: self.inner.cancel.clone(),
        };
        *task = Some(tokio::spawn(supervisor::run(ctx)));
        debug!(url = %self.inner.config.url, "supervisor started");
        Ok(())
    }

    /// Stop the supervisor and wait for it to wind down. The client
    /// cannot be restarted afterwards.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(handle) = self.inner.task.lock().await.take() {
            let _ = handle.await;
        }
        let _ = self.inner.state_tx.send(ConnectionState::Disconnected);
        debug!("shut down");
    }

    // ── State observation ────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    // ── Registry accessors ───────────────────────────────────────

    pub fn registry(&self) -> &ControlRegistry {
        &self.inner.registry
    }

    /// Snapshot of all known controls, unordered.
    pub fn controls(&self) -> Vec<Arc<Control>> {
        self.inner.registry.controls()
    }

    pub fn control(&self, id: &ObjectId) -> Option<Arc<Control>> {
        self.inner.registry.control(id)
    }

    pub fn control_by_name(&self, name: &str) -> Option<Arc<Control>> {
        self.inner.registry.control_by_name(name)
    }

    /// Current value under a state identifier, if any control listens to
    /// it and an update has arrived.
    pub fn state_value(&self, id: &ObjectId) -> Option<StateValue> {
        self.inner.registry.dispatcher().value(id)
    }
}
