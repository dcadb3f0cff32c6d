//! Message channel between the orchestrator and the execution host.
//!
//! The orchestrator depends on one narrow contract: send a tagged payload,
//! subscribe to a tag. `SocketChannel` talks NDJSON to a real host process;
//! tests swap in the in-process `pair` loopback.

mod socket;

pub use socket::SocketChannel;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Event identifiers shared with the execution host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTag {
    #[serde(rename = "run test")]
    RunTest,
    #[serde(rename = "run bisect")]
    RunBisect,
    #[serde(rename = "output")]
    Output,
    #[serde(rename = "done")]
    Done,
}

/// One message on the wire: a tag plus its sole payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: EventTag,
    pub payload: Value,
}

/// Send/subscribe contract between the orchestrator and the host.
///
/// Each inbound envelope is delivered to every live subscriber of its tag.
/// Subscriptions are independent unbounded queues, so a subscription taken
/// before a send observes everything the peer emits from that point on.
pub trait MessageChannel: Send + Sync {
    /// Send one tagged payload to the peer. Fails only on transport loss.
    fn send(&self, tag: EventTag, payload: Value) -> Result<()>;

    /// Subscribe to every future envelope carrying `tag`.
    fn subscribe(&self, tag: EventTag) -> UnboundedReceiver<Value>;
}

/// Per-tag routing table shared by the channel implementations.
#[derive(Clone, Default)]
pub(crate) struct Subscriptions {
    subscribers: Arc<Mutex<HashMap<EventTag, Vec<UnboundedSender<Value>>>>>,
}

impl Subscriptions {
    pub(crate) fn subscribe(&self, tag: EventTag) -> UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("subscriber table lock poisoned")
            .entry(tag)
            .or_default()
            .push(tx);
        rx
    }

    /// Deliver to current subscribers, pruning ones whose receiver is gone.
    pub(crate) fn deliver(&self, tag: EventTag, payload: &Value) {
        let mut subscribers = self
            .subscribers
            .lock()
            .expect("subscriber table lock poisoned");
        if let Some(list) = subscribers.get_mut(&tag) {
            list.retain(|tx| tx.send(payload.clone()).is_ok());
        }
    }
}

/// In-process channel endpoint: sends deliver to the peer's subscribers.
/// Stands in for the execution host under test.
#[cfg(test)]
#[derive(Clone)]
pub struct PairChannel {
    local: Subscriptions,
    peer: Subscriptions,
}

/// Two connected in-process endpoints.
#[cfg(test)]
pub fn pair() -> (PairChannel, PairChannel) {
    let a = Subscriptions::default();
    let b = Subscriptions::default();
    (
        PairChannel {
            local: a.clone(),
            peer: b.clone(),
        },
        PairChannel { local: b, peer: a },
    )
}

#[cfg(test)]
impl MessageChannel for PairChannel {
    fn send(&self, tag: EventTag, payload: Value) -> Result<()> {
        self.peer.deliver(tag, &payload);
        Ok(())
    }

    fn subscribe(&self, tag: EventTag) -> UnboundedReceiver<Value> {
        self.local.subscribe(tag)
    }
}
