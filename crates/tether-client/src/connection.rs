//! Connection manager: request/response correlation, notification routing,
//! and autonomous reconnection over one physical duplex link.
//!
//! One [`Connection`] owns at most one physical link at a time. Request
//! ids come from a monotone counter that is never reset, so an id can
//! never be reused across a reconnect; pending callbacks from a dead link
//! are discarded wholesale, never resolved with stale data.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use tether_rpc::{ClientCall, ServerMessage};

use crate::config::ConnectOptions;
use crate::errors::ClientError;
use crate::transport::{Connector, Link, WsConnector};

/// Lifecycle state of the managed connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Dialing (initially or after a disconnect).
    Connecting,
    /// Physical link open.
    Connected,
    /// Physical link down; redial pending unless explicitly closed.
    Disconnected,
}

/// Handle to one live notification registration.
///
/// Yields the positional params of every notification whose method matches
/// the registered name, in receipt order. Remove with [`Connection::off`].
pub struct NotificationListener {
    method: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Vec<Value>>,
}

impl NotificationListener {
    /// Await the next matching notification's params.
    pub async fn recv(&mut self) -> Option<Vec<Value>> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Vec<Value>> {
        self.rx.try_recv().ok()
    }

    /// Method name this listener is registered for.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Detachable handle for removing this registration later, even after
    /// the listener itself moved into a task.
    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            method: self.method.clone(),
            id: self.id,
        }
    }
}

/// Identifies one notification registration for [`Connection::off`].
#[derive(Clone, Debug)]
pub struct ListenerHandle {
    method: String,
    id: u64,
}

struct Shared {
    options: ConnectOptions,
    next_id: AtomicU64,
    closed: AtomicBool,
    /// Bumped once per established physical link.
    epoch: AtomicU64,
    /// Outbound queue of the current link; `None` while down.
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    /// In-flight request id → response slot. Cleared on every disconnect.
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    /// Notification method → registered listeners, in registration order.
    listeners: Mutex<HashMap<String, Vec<(u64, mpsc::UnboundedSender<Vec<Value>>)>>>,
    listener_seq: AtomicU64,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        let _ = self.status_tx.send_replace(status);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tear down per-link state after the physical link ends.
    fn drop_link(&self) {
        *self.outbound.lock() = None;
        let discarded = {
            let mut pending = self.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        if discarded > 0 {
            debug!(discarded, "discarded pending requests from dead link");
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Route one inbound frame. Runs on the driver task only, so frames
    /// for a given link are dispatched strictly in receipt order.
    fn dispatch(&self, frame: &str) {
        let message: ServerMessage = match serde_json::from_str(frame) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "malformed server frame, skipping");
                return;
            }
        };
        match message {
            ServerMessage::Response { id, result } => {
                let slot = self.pending.lock().remove(&id);
                match slot {
                    // Receiver may have given up; that is fine.
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    // Legitimate after a reconnect.
                    None => debug!(id, "response for unknown request id, ignoring"),
                }
            }
            ServerMessage::Notification { method, params } => {
                let mut listeners = self.listeners.lock();
                if let Some(entries) = listeners.get_mut(&method) {
                    entries.retain(|(_, tx)| tx.send(params.clone()).is_ok());
                    if entries.is_empty() {
                        let _ = listeners.remove(&method);
                    }
                } else {
                    debug!(method, "notification with no listeners");
                }
            }
        }
    }

    /// Serialize and enqueue a call on the current link.
    ///
    /// `Ok(false)` means the link is down and the frame was not delivered.
    fn transmit(&self, call: &ClientCall) -> Result<bool, ClientError> {
        let frame = serde_json::to_string(call)?;
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Ok(false);
        };
        match tx.try_send(frame) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Err(ClientError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Ok(false),
        }
    }
}

/// Manages one duplex connection: correlates request/response pairs by id,
/// routes unsolicited notifications, and redials after abnormal closes.
pub struct Connection {
    shared: Arc<Shared>,
    driver: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Open a managed connection over the given connector.
    ///
    /// Dialing starts immediately on a background task; observe progress
    /// through [`Connection::status`].
    pub fn open(connector: impl Connector + 'static, options: ConnectOptions) -> Arc<Self> {
        let (status_tx, _status_rx) = watch::channel(ConnectionStatus::Connecting);
        let shared = Arc::new(Shared {
            options,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            outbound: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            listener_seq: AtomicU64::new(1),
            status_tx,
        });
        let driver = tokio::spawn(drive(Arc::clone(&shared), Box::new(connector)));
        Arc::new(Self { shared, driver })
    }

    /// Open a managed WebSocket connection to `url`.
    pub fn open_ws(url: impl Into<String>, options: ConnectOptions) -> Arc<Self> {
        let connector = WsConnector::new(url, options.send_queue);
        Self::open(connector, options)
    }

    /// Send a result-bearing call and await the correlated response.
    ///
    /// Fails fast with [`ClientError::NotConnected`] while the link is
    /// down and with [`ClientError::Closed`] after an explicit close; a
    /// link dropping mid-flight yields [`ClientError::ConnectionLost`].
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<Value, ClientError> {
        if self.shared.is_closed() {
            return Err(ClientError::Closed);
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let _ = self.shared.pending.lock().insert(id, tx);

        let call = ClientCall::request(id, method, params);
        match self.shared.transmit(&call) {
            Ok(true) => {}
            Ok(false) => {
                let _ = self.shared.pending.lock().remove(&id);
                return Err(ClientError::NotConnected);
            }
            Err(e) => {
                let _ = self.shared.pending.lock().remove(&id);
                return Err(e);
            }
        }
        rx.await.map_err(|_| ClientError::ConnectionLost)
    }

    /// Send a fire-and-forget call (no id, no response).
    ///
    /// Silently dropped (at debug level) while the link is down; callers
    /// that need delivery must check [`Connection::is_connected`] first.
    pub fn notify(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<(), ClientError> {
        if self.shared.is_closed() {
            return Err(ClientError::Closed);
        }
        let call = ClientCall::fire_and_forget(method, params);
        match self.shared.transmit(&call) {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!(method = call.method, "dropped call while disconnected");
                Ok(())
            }
            Err(ClientError::QueueFull) => {
                warn!(method = call.method, "outbound queue full, dropping call");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Register a listener for a named notification method.
    ///
    /// Multiple listeners per method are supported and are invoked in
    /// registration order.
    pub fn on(&self, method: impl Into<String>) -> NotificationListener {
        let method = method.into();
        let id = self.shared.listener_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .listeners
            .lock()
            .entry(method.clone())
            .or_default()
            .push((id, tx));
        NotificationListener { method, id, rx }
    }

    /// Remove a listener registration.
    ///
    /// Synchronous: once this returns, no further notification can reach
    /// the listener, even if frames for it are already queued server-side.
    pub fn off(&self, handle: &ListenerHandle) {
        let mut listeners = self.shared.listeners.lock();
        if let Some(entries) = listeners.get_mut(&handle.method) {
            entries.retain(|(id, _)| *id != handle.id);
            if entries.is_empty() {
                let _ = listeners.remove(&handle.method);
            }
        }
    }

    /// Watch lifecycle transitions.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Current lifecycle state.
    pub fn current_status(&self) -> ConnectionStatus {
        *self.shared.status_tx.borrow()
    }

    /// True iff the physical link is open.
    pub fn is_connected(&self) -> bool {
        self.current_status() == ConnectionStatus::Connected
    }

    /// Generation counter of the physical link, bumped on every
    /// successful dial.
    ///
    /// Connection-scoped state (in-flight requests, subscriptions) is
    /// only valid while this value matches the one observed at creation;
    /// a mismatch means at least one reconnect happened in between, even
    /// if the status watch coalesced the intervening transitions.
    pub fn link_epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::SeqCst)
    }

    /// Configured delay between redial attempts.
    pub fn reconnect_delay(&self) -> Duration {
        self.shared.options.reconnect_delay
    }

    /// Close intentionally: tears down the link, discards pending
    /// requests, and disables reconnection.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.driver.abort();
        self.shared.drop_link();
        debug!("connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Driver loop: dial, pump inbound frames, tear down, redial after the
/// configured delay until explicitly closed.
async fn drive(shared: Arc<Shared>, connector: Box<dyn Connector>) {
    loop {
        if shared.is_closed() {
            break;
        }
        shared.set_status(ConnectionStatus::Connecting);
        match connector.connect().await {
            Ok(Link { tx, mut rx }) => {
                *shared.outbound.lock() = Some(tx);
                let _ = shared.epoch.fetch_add(1, Ordering::SeqCst);
                shared.set_status(ConnectionStatus::Connected);
                info!("link established");
                while let Some(frame) = rx.recv().await {
                    shared.dispatch(&frame);
                }
                shared.drop_link();
                debug!("link ended");
            }
            Err(e) => {
                warn!(error = %e, "dial failed");
                shared.set_status(ConnectionStatus::Disconnected);
            }
        }
        if shared.is_closed() {
            break;
        }
        tokio::time::sleep(shared.options.reconnect_delay).await;
    }
}
