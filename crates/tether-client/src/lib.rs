//! # tether-client
//!
//! Connection manager for the tether protocol: owns one physical duplex
//! link at a time, correlates request/response pairs by id, routes
//! unsolicited notifications to named listeners, and redials autonomously
//! after abnormal closes.
//!
//! The physical socket sits behind the [`transport::Connector`] seam, so
//! tests drive a [`Connection`] through in-memory channel pairs instead of
//! a network.

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod errors;
pub mod testutil;
pub mod transport;

pub use config::ConnectOptions;
pub use connection::{Connection, ConnectionStatus, ListenerHandle, NotificationListener};
pub use errors::ClientError;
