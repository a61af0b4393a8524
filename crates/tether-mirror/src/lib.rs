//! # tether-mirror
//!
//! Live local mirrors of server-computed topic state: a pure patch
//! engine plus connection-scoped subscriptions that keep each mirrored
//! value current, resubscribing from scratch after every reconnect.
//!
//! Mirrored values are immutable snapshots (`Arc<Value>`); every patch
//! produces a new snapshot, so consumers holding an older one never see
//! it change underneath them.

#![deny(unsafe_code)]

pub mod errors;
pub mod patch;
pub mod subscription;
pub mod watcher;

pub use errors::MirrorError;
pub use subscription::{Subscription, Subscriptions};
pub use watcher::TopicWatch;
