//! # tether-rpc
//!
//! Wire-format types for the tether duplex protocol.
//!
//! Everything that crosses the socket is a JSON object in one of three
//! shapes:
//!
//! - **Call** (client → server): `{id?, method, params}`, with `id`
//!   present when a response is expected, omitted for fire-and-forget.
//! - **Response** (server → client): `{id, result}`, correlated to a call.
//! - **Notification** (server → client): `{method, params}`, uncorrelated.
//!
//! The reserved methods `subscribe` / `unsubscribe` and the reserved
//! `update` notification carry the topic-mirroring protocol; any other
//! method name is an application-level remote action.

#![deny(unsafe_code)]

pub mod topic;
pub mod types;

pub use topic::{PathSegment, SubscriptionId, Topic};
pub use types::{
    ClientCall, METHOD_SUBSCRIBE, METHOD_UNSUBSCRIBE, METHOD_UPDATE, ServerMessage, Update,
};
