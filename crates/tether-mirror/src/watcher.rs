//! Durable topic watches that survive reconnects.
//!
//! A [`TopicWatch`] owns a background loop that subscribes whenever the
//! connection is up, forwards mirrored snapshots, and drops back to
//! `None` the moment the link dies. Every reconnect starts a fresh
//! subscription with a fresh id; there is no resume.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use tether_client::{ClientError, Connection, ConnectionStatus};
use tether_rpc::Topic;

use crate::errors::MirrorError;
use crate::subscription::{Subscriptions, action_params};

impl Subscriptions {
    /// Watch a topic durably: the returned handle holds a mirror of the
    /// topic whenever the connection allows one, resubscribing from
    /// scratch after every reconnect.
    pub fn watch(&self, topic: Topic) -> TopicWatch {
        let conn = Arc::clone(self.connection());
        let (state_tx, state_rx) = watch::channel(None);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let live_topic = Arc::new(Mutex::new(None));
        let task = tokio::spawn(watch_loop(
            Arc::clone(&conn),
            topic,
            state_tx,
            cmd_rx,
            Arc::clone(&live_topic),
        ));
        TopicWatch {
            conn,
            state: state_rx,
            live_topic,
            cmd_tx,
            task,
        }
    }
}

/// A topic mirror that outlives individual connections.
///
/// The mirrored state is `None` while no subscription is live (before the
/// first snapshot, during an outage, or between retargets) and
/// `Some(snapshot)` otherwise.
pub struct TopicWatch {
    conn: Arc<Connection>,
    state: watch::Receiver<Option<Arc<Value>>>,
    /// Topic of the currently live subscription, if any.
    live_topic: Arc<Mutex<Option<Topic>>>,
    cmd_tx: mpsc::UnboundedSender<Topic>,
    task: JoinHandle<()>,
}

impl TopicWatch {
    /// Latest mirrored snapshot, or `None` while no subscription is live.
    pub fn current(&self) -> Option<Arc<Value>> {
        self.state.borrow().clone()
    }

    /// Watch snapshot changes, including the drop to `None` on
    /// disconnect.
    pub fn watch(&self) -> watch::Receiver<Option<Arc<Value>>> {
        self.state.clone()
    }

    /// Topic of the live subscription, or `None` while down.
    pub fn topic(&self) -> Option<Topic> {
        self.live_topic.lock().clone()
    }

    /// Retarget the watch to a different topic.
    ///
    /// The current subscription (if any) is retired and the new topic is
    /// subscribed; state drops to `None` in between.
    pub fn set_topic(&self, topic: Topic) -> Result<(), MirrorError> {
        self.cmd_tx.send(topic).map_err(|_| MirrorError::Stopped)
    }

    /// Invoke a named action on the live topic and await its result.
    ///
    /// Fails with [`MirrorError::NotReady`] while no subscription is live:
    /// an action against a topic the server is not currently computing
    /// has no meaningful target.
    pub async fn execute(
        &self,
        action: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Value, MirrorError> {
        let topic = self.live_topic.lock().clone().ok_or(MirrorError::NotReady)?;
        let result = self.conn.call(action, action_params(&topic, args)).await?;
        Ok(result)
    }
}

impl Drop for TopicWatch {
    fn drop(&mut self) {
        // Aborting drops the loop's live subscription, which retires it.
        self.task.abort();
    }
}

/// Background loop: wait for the link, subscribe, forward snapshots,
/// tear down on disconnect or retarget, repeat.
async fn watch_loop(
    conn: Arc<Connection>,
    mut topic: Topic,
    state_tx: watch::Sender<Option<Arc<Value>>>,
    mut commands: mpsc::UnboundedReceiver<Topic>,
    live_topic: Arc<Mutex<Option<Topic>>>,
) {
    let subs = Subscriptions::new(Arc::clone(&conn));
    let mut status = conn.status();
    loop {
        // Wait until connected, absorbing retargets meanwhile.
        while *status.borrow_and_update() != ConnectionStatus::Connected {
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                cmd = commands.recv() => match cmd {
                    Some(next) => topic = next,
                    None => return,
                },
            }
        }

        let sub = match subs.subscribe(topic.clone()).await {
            Ok(sub) => sub,
            Err(ClientError::Closed) => return,
            Err(e) => {
                debug!(topic = %topic, error = %e, "subscribe failed, will retry");
                // The status can stay Connected across a send failure
                // (congested outbound queue), so retry on a timer as well
                // as on a status change or retarget.
                tokio::select! {
                    () = tokio::time::sleep(conn.reconnect_delay()) => {}
                    changed = status.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    cmd = commands.recv() => match cmd {
                        Some(next) => topic = next,
                        None => return,
                    },
                }
                continue;
            }
        };

        *live_topic.lock() = Some(topic.clone());
        let born_epoch = sub.born_epoch();
        let mut sub_state = sub.watch();
        let _ = state_tx.send(Some(sub_state.borrow_and_update().clone()));

        loop {
            tokio::select! {
                changed = sub_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = sub_state.borrow_and_update().clone();
                    let _ = state_tx.send(Some(snapshot));
                }
                changed = status.changed() => {
                    // An epoch bump with the status already back at
                    // Connected still means the subscription died.
                    if changed.is_err()
                        || *status.borrow_and_update() != ConnectionStatus::Connected
                        || conn.link_epoch() != born_epoch
                    {
                        break;
                    }
                }
                cmd = commands.recv() => match cmd {
                    Some(next) => {
                        topic = next;
                        break;
                    }
                    None => return,
                },
            }
        }

        *live_topic.lock() = None;
        let _ = state_tx.send(None);
        sub.unsubscribe();
    }
}
