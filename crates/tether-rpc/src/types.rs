//! Wire-format message types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::topic::{PathSegment, SubscriptionId};

/// Reserved method establishing a subscription.
pub const METHOD_SUBSCRIBE: &str = "subscribe";
/// Reserved method retiring a subscription.
pub const METHOD_UNSUBSCRIBE: &str = "unsubscribe";
/// Reserved notification carrying a path-addressed patch.
pub const METHOD_UPDATE: &str = "update";

/// Outgoing call from client to server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientCall {
    /// Request identifier; present iff a response is expected, unique
    /// within one physical connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Method name (e.g. `subscribe`).
    pub method: String,
    /// Positional parameters.
    pub params: Vec<Value>,
}

impl ClientCall {
    /// Build a result-bearing call.
    pub fn request(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Build a fire-and-forget call (no `id`, no response expected).
    pub fn fire_and_forget(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// Inbound server message: a correlated response or an unsolicited
/// notification, distinguished by the presence of `id`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Response to a prior call, matched by `id`.
    Response {
        /// Echoed request identifier.
        id: u64,
        /// Result payload.
        #[serde(default)]
        result: Value,
    },
    /// Server-initiated notification (no `id`).
    Notification {
        /// Notification method (e.g. `update`).
        method: String,
        /// Positional parameters.
        #[serde(default)]
        params: Vec<Value>,
    },
}

/// Path-addressed patch carried by the reserved `update` notification.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    /// Subscription the patch belongs to.
    pub subscription_id: SubscriptionId,
    /// Path into the mirrored value.
    pub path: Vec<PathSegment>,
    /// New value at that path (`null` deletes a map key).
    pub value: Value,
}

impl Update {
    /// Decode from the positional params of an `update` notification.
    ///
    /// Returns `None` when the params do not have the expected
    /// `(subscriptionId, path, value)` shape.
    pub fn from_params(params: &[Value]) -> Option<Self> {
        let [sub, path, value] = params else {
            return None;
        };
        let subscription_id = SubscriptionId::new(sub.as_str()?);
        let path: Vec<PathSegment> = serde_json::from_value(path.clone()).ok()?;
        Some(Self {
            subscription_id,
            path,
            value: value.clone(),
        })
    }
}
