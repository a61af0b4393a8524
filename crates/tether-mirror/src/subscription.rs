//! Topic subscriptions: mirror a server-computed value and keep it
//! current by applying pushed patches.
//!
//! A subscription is strictly connection-scoped. Its listener is
//! registered before the subscribe call goes out, so a patch arriving
//! immediately after the snapshot cannot slip past; patches for other
//! subscription ids are filtered out by the apply task.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tether_client::{ClientError, Connection, ListenerHandle, NotificationListener};
use tether_rpc::{METHOD_SUBSCRIBE, METHOD_UNSUBSCRIBE, METHOD_UPDATE, SubscriptionId, Topic, Update};

use crate::patch;

/// Positional params for a topic-addressed action: path segments, then
/// topic arguments, then the action's own arguments.
pub(crate) fn action_params(topic: &Topic, args: Vec<Value>) -> Vec<Value> {
    topic
        .path
        .iter()
        .map(|s| Value::String(s.clone()))
        .chain(topic.args.iter().cloned())
        .chain(args)
        .collect()
}

/// Entry point for mirroring topics over one managed connection.
pub struct Subscriptions {
    conn: Arc<Connection>,
}

impl Subscriptions {
    /// Wrap a managed connection.
    pub fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Subscribe to a topic and mirror its state until unsubscribed.
    ///
    /// Fails fast while the link is down; the returned subscription dies
    /// with the connection it was created on and must be re-established
    /// from scratch after a reconnect.
    pub async fn subscribe(&self, topic: Topic) -> Result<Subscription, ClientError> {
        let id = SubscriptionId::generate();
        // Listener first: a patch racing the snapshot response must queue,
        // not vanish.
        let listener = self.conn.on(METHOD_UPDATE);
        let handle = listener.handle();

        // The id is scoped to the link the subscribe goes out on; pin that
        // link's epoch before sending, not after the response resumes us.
        let born_epoch = self.conn.link_epoch();
        let params = vec![
            serde_json::to_value(&topic.path)?,
            Value::Array(topic.args.clone()),
            serde_json::to_value(&id)?,
        ];
        let snapshot = match self.conn.call(METHOD_SUBSCRIBE, params).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.conn.off(&handle);
                return Err(e);
            }
        };
        if self.conn.link_epoch() != born_epoch {
            // Link replaced while subscribing: the id cannot be pinned to
            // a single link, so the subscription is unusable.
            self.conn.off(&handle);
            if self.conn.is_connected() {
                let _ = self
                    .conn
                    .notify(METHOD_UNSUBSCRIBE, vec![serde_json::json!(id)]);
            }
            return Err(ClientError::ConnectionLost);
        }
        debug!(topic = %topic, id = %id, "subscribed");

        let (state_tx, state_rx) = watch::channel(Arc::new(snapshot));
        let apply_task = tokio::spawn(apply_patches(
            id.clone(),
            born_epoch,
            Arc::clone(&self.conn),
            listener,
            state_tx,
        ));

        Ok(Subscription {
            id,
            topic,
            conn: Arc::clone(&self.conn),
            state: state_rx,
            handle,
            apply_task,
            born_epoch,
            retired: false,
        })
    }
}

/// Apply matching patches to the mirrored value, publishing a fresh
/// immutable snapshot per patch.
///
/// The subscription id only exists on the link it was created on, so the
/// mirror freezes permanently once that link is replaced; a matching id
/// seen on a later link is a stale frame, not a continuation.
async fn apply_patches(
    id: SubscriptionId,
    born_epoch: u64,
    conn: Arc<Connection>,
    mut listener: NotificationListener,
    state_tx: watch::Sender<Arc<Value>>,
) {
    while let Some(params) = listener.recv().await {
        if conn.link_epoch() != born_epoch {
            debug!(id = %id, "link replaced, freezing mirror");
            break;
        }
        let Some(update) = Update::from_params(&params) else {
            warn!("update notification with unexpected shape, skipping");
            continue;
        };
        if update.subscription_id != id {
            continue;
        }
        let current = state_tx.borrow().clone();
        let next = patch::apply(&current, &update.path, update.value);
        let _ = state_tx.send(Arc::new(next));
    }
}

/// One live mirrored topic.
///
/// Dropping (or calling [`Subscription::unsubscribe`]) retires it:
/// the listener is removed synchronously, so no further patch can touch
/// the mirror, and the server is told to stop, but only if the link is
/// still up. After a disconnect the server has already forgotten the id.
pub struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    conn: Arc<Connection>,
    state: watch::Receiver<Arc<Value>>,
    handle: ListenerHandle,
    apply_task: JoinHandle<()>,
    born_epoch: u64,
    retired: bool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("born_epoch", &self.born_epoch)
            .field("retired", &self.retired)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// This subscription's wire identifier.
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// The mirrored topic.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Epoch of the link this subscription was established on.
    pub(crate) fn born_epoch(&self) -> u64 {
        self.born_epoch
    }

    /// Latest mirrored snapshot.
    pub fn current(&self) -> Arc<Value> {
        self.state.borrow().clone()
    }

    /// Watch snapshot changes.
    pub fn watch(&self) -> watch::Receiver<Arc<Value>> {
        self.state.clone()
    }

    /// Invoke a named action on this topic and await its result.
    ///
    /// The action's params are the topic address followed by `args`.
    pub async fn execute(
        &self,
        action: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Value, ClientError> {
        self.conn
            .call(action, action_params(&self.topic, args))
            .await
    }

    /// Retire the subscription, notifying the server if still connected.
    pub fn unsubscribe(mut self) {
        self.retire();
    }

    fn retire(&mut self) {
        if self.retired {
            return;
        }
        self.retired = true;
        // Deregister first: after this point no patch reaches the mirror.
        self.conn.off(&self.handle);
        self.apply_task.abort();
        if self.conn.is_connected() {
            let _ = self
                .conn
                .notify(METHOD_UNSUBSCRIBE, vec![serde_json::json!(self.id)]);
        } else {
            // The id died with the old link; the server no longer knows it.
            debug!(id = %self.id, "skipping unsubscribe while disconnected");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.retire();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use tether_client::testutil::{FarEnd, StaticConnector};
    use tether_client::{ConnectOptions, ConnectionStatus};

    use super::*;

    fn options() -> ConnectOptions {
        ConnectOptions {
            reconnect_delay: std::time::Duration::from_millis(10),
            send_queue: 8,
        }
    }

    async fn connected(conn: &Connection) {
        let mut status = conn.status();
        while *status.borrow() != ConnectionStatus::Connected {
            status.changed().await.unwrap();
        }
    }

    /// Answer the next subscribe call with `snapshot`; returns the
    /// client-chosen subscription id.
    async fn serve_subscribe(far: &mut FarEnd, snapshot: Value) -> String {
        let sent: Value = serde_json::from_str(&far.recv().await.unwrap()).unwrap();
        assert_eq!(sent["method"], "subscribe");
        let id = sent["id"].as_u64().unwrap();
        let sub_id = sent["params"][2].as_str().unwrap().to_owned();
        far.send(&json!({"id": id, "result": snapshot}).to_string())
            .await;
        sub_id
    }

    fn patch_frame(sub_id: &str, path: Value, value: Value) -> String {
        json!({"method": "update", "params": [sub_id, path, value]}).to_string()
    }

    #[tokio::test]
    async fn subscribe_sends_topic_address_and_mirrors_snapshot() {
        let (connector, mut far) = StaticConnector::single(8);
        let conn = Connection::open(connector, options());
        connected(&conn).await;
        let subs = Subscriptions::new(Arc::clone(&conn));

        let topic = Topic::new(["projects", "p1", "runs", "r1"]).with_args(vec![json!(7)]);
        let task = tokio::spawn(async move { subs.subscribe(topic).await });

        let sent: Value = serde_json::from_str(&far.recv().await.unwrap()).unwrap();
        assert_eq!(sent["params"][0], json!(["projects", "p1", "runs", "r1"]));
        assert_eq!(sent["params"][1], json!([7]));
        assert!(sent["params"][2].as_str().unwrap().starts_with("sub_"));
        far.send(&json!({"id": sent["id"], "result": {"steps": {}}}).to_string())
            .await;

        let sub = task.await.unwrap().unwrap();
        assert_eq!(*sub.current(), json!({"steps": {}}));
    }

    #[tokio::test]
    async fn patches_advance_the_mirror() {
        let (connector, mut far) = StaticConnector::single(8);
        let conn = Connection::open(connector, options());
        connected(&conn).await;
        let subs = Subscriptions::new(Arc::clone(&conn));

        let task = tokio::spawn(async move { subs.subscribe(Topic::new(["runs", "r1"])).await });
        let sub_id = serve_subscribe(&mut far, json!({"steps": {}})).await;
        let sub = task.await.unwrap().unwrap();

        let mut state = sub.watch();
        far.send(&patch_frame(
            &sub_id,
            json!(["steps", "s1"]),
            json!({"target": "frontend"}),
        ))
        .await;
        state.changed().await.unwrap();
        assert_eq!(
            **state.borrow(),
            json!({"steps": {"s1": {"target": "frontend"}}})
        );
    }

    #[tokio::test]
    async fn patches_for_other_ids_are_ignored() {
        let (connector, mut far) = StaticConnector::single(8);
        let conn = Connection::open(connector, options());
        connected(&conn).await;
        let subs = Subscriptions::new(Arc::clone(&conn));

        let task = tokio::spawn(async move { subs.subscribe(Topic::new(["runs", "r1"])).await });
        let sub_id = serve_subscribe(&mut far, json!({"n": 1})).await;
        let sub = task.await.unwrap().unwrap();

        let mut state = sub.watch();
        far.send(&patch_frame("sub_other", json!(["n"]), json!(99)))
            .await;
        far.send(&patch_frame(&sub_id, json!(["n"]), json!(2)))
            .await;
        state.changed().await.unwrap();
        // Only the matching patch applied.
        assert_eq!(**state.borrow(), json!({"n": 2}));
    }

    #[tokio::test]
    async fn earlier_snapshots_stay_intact() {
        let (connector, mut far) = StaticConnector::single(8);
        let conn = Connection::open(connector, options());
        connected(&conn).await;
        let subs = Subscriptions::new(Arc::clone(&conn));

        let task = tokio::spawn(async move { subs.subscribe(Topic::new(["runs", "r1"])).await });
        let sub_id = serve_subscribe(&mut far, json!({"n": 1})).await;
        let sub = task.await.unwrap().unwrap();

        let before = sub.current();
        let mut state = sub.watch();
        far.send(&patch_frame(&sub_id, json!(["n"]), json!(2)))
            .await;
        state.changed().await.unwrap();
        assert_eq!(*before, json!({"n": 1}));
    }

    #[tokio::test]
    async fn unsubscribe_notifies_server_with_the_right_id() {
        let (connector, mut far) = StaticConnector::single(8);
        let conn = Connection::open(connector, options());
        connected(&conn).await;
        let subs = Subscriptions::new(Arc::clone(&conn));

        let task = tokio::spawn(async move { subs.subscribe(Topic::new(["runs", "r1"])).await });
        let sub_id = serve_subscribe(&mut far, json!({})).await;
        let sub = task.await.unwrap().unwrap();

        sub.unsubscribe();
        let sent: Value = serde_json::from_str(&far.recv().await.unwrap()).unwrap();
        assert_eq!(sent["method"], "unsubscribe");
        assert!(sent.get("id").is_none());
        assert_eq!(sent["params"], json!([sub_id]));
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_is_skipped_while_disconnected() {
        let (connector, mut far) = StaticConnector::single(8);
        let conn = Connection::open(connector, options());
        connected(&conn).await;
        let subs = Subscriptions::new(Arc::clone(&conn));

        let task = tokio::spawn(async move { subs.subscribe(Topic::new(["runs", "r1"])).await });
        let _ = serve_subscribe(&mut far, json!({})).await;
        let sub = task.await.unwrap().unwrap();

        far.hang_up();
        let mut status = conn.status();
        while *status.borrow() == ConnectionStatus::Connected {
            status.changed().await.unwrap();
        }
        // No link to send on; retiring must not error or block.
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn execute_addresses_the_topic_then_appends_args() {
        let (connector, mut far) = StaticConnector::single(8);
        let conn = Connection::open(connector, options());
        connected(&conn).await;
        let subs = Subscriptions::new(Arc::clone(&conn));

        let topic = Topic::new(["runs", "r1"]).with_args(vec![json!("full")]);
        let task = tokio::spawn(async move { subs.subscribe(topic).await });
        let _ = serve_subscribe(&mut far, json!({})).await;
        let sub = task.await.unwrap().unwrap();

        let exec = tokio::spawn(async move { sub.execute("run.restart", vec![json!(true)]).await });
        let sent: Value = serde_json::from_str(&far.recv().await.unwrap()).unwrap();
        assert_eq!(sent["method"], "run.restart");
        assert_eq!(sent["params"], json!(["runs", "r1", "full", true]));
        far.send(&json!({"id": sent["id"], "result": "restarted"}).to_string())
            .await;
        assert_eq!(exec.await.unwrap().unwrap(), json!("restarted"));
    }

    #[tokio::test(start_paused = true)]
    async fn mirror_freezes_after_link_replacement() {
        let (connector, mut far) = StaticConnector::pair(8);
        let conn = Connection::open(connector, options());
        connected(&conn).await;
        let subs = Subscriptions::new(Arc::clone(&conn));

        let task = tokio::spawn(async move { subs.subscribe(Topic::new(["runs", "r1"])).await });
        let sub_id = serve_subscribe(&mut far, json!({"n": 1})).await;
        let sub = task.await.unwrap().unwrap();

        far.hang_up();
        connected(&conn).await;
        let far2 = far.next_link();

        // The id died with the old link; a matching frame on the new link
        // is a stale one and must not move the mirror.
        far2.send(&patch_frame(&sub_id, json!(["n"]), json!(99)))
            .await;
        tokio::task::yield_now().await;
        assert_eq!(*sub.current(), json!({"n": 1}));
    }

    #[tokio::test]
    async fn subscribe_fails_fast_while_disconnected() {
        let connector = StaticConnector::empty();
        let conn = Connection::open(connector, options());
        let subs = Subscriptions::new(Arc::clone(&conn));
        // Never connects; the subscribe call cannot be delivered.
        let result = subs.subscribe(Topic::new(["runs", "r1"])).await;
        assert_matches!(result, Err(ClientError::NotConnected));
    }
}
