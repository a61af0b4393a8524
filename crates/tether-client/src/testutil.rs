//! In-memory connector and far-end harness for driving a [`Connection`]
//! without a network.
//!
//! [`StaticConnector`] hands out pre-created channel links in order; once
//! exhausted, dial attempts pend forever. The matching [`FarEnd`] plays
//! the server: it reads frames the client sent and pushes frames at it.
//!
//! [`Connection`]: crate::connection::Connection

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::errors::ClientError;
use crate::transport::{Connector, Link};

/// Server side of one in-memory link.
pub struct FarEnd {
    tx: Option<mpsc::Sender<String>>,
    rx: Option<mpsc::Receiver<String>>,
    next: Option<Box<FarEnd>>,
}

impl FarEnd {
    /// Next frame the client transmitted, or `None` once the link ended.
    pub async fn recv(&mut self) -> Option<String> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Push a server frame at the client.
    pub async fn send(&self, frame: &str) {
        if let Some(tx) = self.tx.as_ref() {
            let _ = tx.send(frame.to_owned()).await;
        }
    }

    /// Drop both halves, simulating an abnormal close.
    pub fn hang_up(&mut self) {
        self.tx = None;
        self.rx = None;
    }

    /// Far end of the next pre-created link (panics in tests if none).
    pub fn next_link(&mut self) -> FarEnd {
        *self.next.take().expect("no further pre-created link")
    }
}

fn make_link(queue: usize) -> (Link, FarEnd) {
    let (client_tx, server_rx) = mpsc::channel(queue);
    let (server_tx, client_rx) = mpsc::channel(queue);
    (
        Link {
            tx: client_tx,
            rx: client_rx,
        },
        FarEnd {
            tx: Some(server_tx),
            rx: Some(server_rx),
            next: None,
        },
    )
}

/// Connector backed by a fixed queue of pre-created links.
pub struct StaticConnector {
    links: Mutex<VecDeque<Link>>,
}

impl StaticConnector {
    /// Connector allowing exactly one successful dial.
    pub fn single(queue: usize) -> (Self, FarEnd) {
        let (link, far) = make_link(queue);
        (
            Self {
                links: Mutex::new(VecDeque::from([link])),
            },
            far,
        )
    }

    /// Connector allowing two successful dials; the second far end is
    /// reachable through [`FarEnd::next_link`].
    pub fn pair(queue: usize) -> (Self, FarEnd) {
        let (first_link, mut first_far) = make_link(queue);
        let (second_link, second_far) = make_link(queue);
        first_far.next = Some(Box::new(second_far));
        (
            Self {
                links: Mutex::new(VecDeque::from([first_link, second_link])),
            },
            first_far,
        )
    }

    /// Connector whose dials never complete.
    pub fn empty() -> Self {
        Self {
            links: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn connect(&self) -> Result<Link, ClientError> {
        let link = self.links.lock().pop_front();
        match link {
            Some(link) => Ok(link),
            // Out of links: pend forever, like an unreachable endpoint.
            None => std::future::pending().await,
        }
    }
}
