//! Streaming bridge between a background engine task and a pull-based
//! consumer.
//!
//! [`StreamBridge::open`] creates a bounded channel, hands its sending half
//! to the engine future and spawns it.  The returned [`OpenBridge`] drains
//! the channel into the consumer until the producer is gone, or until the
//! consumer disconnects, in which case the engine task is aborted.
//!
//! ```text
//!   engine task ──push──▶ [ mpsc, bounded ] ──drain──▶ consumer (String)
//!        ▲                                               │
//!        └──────────── abort on disconnect ◀─────────────┘
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

use crate::blocks::Block;

// ---------------------------------------------------------------------------
// Stream items
// ---------------------------------------------------------------------------

/// The unit flowing through the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// A raw streamed fragment, forwarded verbatim.
    Text(String),
    /// A complete block, forwarded as compact JSON.
    Block(Block),
}

impl StreamItem {
    /// Serialized form sent to the transport.
    pub fn to_wire(&self) -> serde_json::Result<String> {
        match self {
            Self::Text(text) => Ok(text.clone()),
            Self::Block(block) => block.to_json(),
        }
    }
}

impl From<Block> for StreamItem {
    fn from(block: Block) -> Self {
        Self::Block(block)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning for a [`StreamBridge`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bound of the hand-off channel; producers wait when it is full.
    pub channel_capacity: usize,
    /// How often the drain loop checks whether the task has finished.
    pub poll_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            poll_interval: Duration::from_millis(500),
        }
    }
}

// ---------------------------------------------------------------------------
// Producer half
// ---------------------------------------------------------------------------

/// Sending half handed to the engine task.  Cheaply cloneable.
#[derive(Debug, Clone)]
pub struct BridgeSender {
    tx: mpsc::Sender<StreamItem>,
}

impl BridgeSender {
    /// Push an item, waiting while the channel is full.
    ///
    /// Returns `false` once the draining side is gone.
    pub async fn push(&self, item: StreamItem) -> bool {
        self.tx.send(item).await.is_ok()
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// How a drain loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The producer finished and every item was forwarded.
    Completed,
    /// The consumer went away; the task was aborted.
    Disconnected,
}

/// Entry point for opening bridges.
pub struct StreamBridge;

impl StreamBridge {
    /// Spawn `run` as the background task, wired to a fresh channel.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open<F, Fut, T>(config: &BridgeConfig, run: F) -> OpenBridge<T>
    where
        F: FnOnce(BridgeSender) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let task = tokio::spawn(run(BridgeSender { tx }));
        debug!(
            capacity = config.channel_capacity,
            poll_ms = config.poll_interval.as_millis() as u64,
            "bridge opened"
        );
        OpenBridge {
            receiver,
            task,
            poll_interval: config.poll_interval,
        }
    }
}

/// A running bridge: the receiving half plus the task handle.
///
/// Dropping it aborts the task.
pub struct OpenBridge<T> {
    receiver: mpsc::Receiver<StreamItem>,
    task: JoinHandle<T>,
    poll_interval: Duration,
}

enum Step {
    Disconnected,
    Item(Option<StreamItem>),
    Tick,
}

impl<T> OpenBridge<T> {
    /// Forward every item to `consumer`, in order and without batching.
    ///
    /// Returns [`DrainOutcome::Completed`] once the channel is closed, or
    /// once the task has finished and nothing is left to forward.  If the
    /// consumer goes away the task is aborted and
    /// [`DrainOutcome::Disconnected`] is returned.
    pub async fn drain(&mut self, consumer: &mpsc::Sender<String>) -> DrainOutcome {
        let period = self.poll_interval.max(Duration::from_millis(1));
        let mut tick = tokio::time::interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                biased;
                _ = consumer.closed() => Step::Disconnected,
                item = self.receiver.recv() => Step::Item(item),
                _ = tick.tick() => Step::Tick,
            };

            match step {
                Step::Disconnected => {
                    self.cancel();
                    return DrainOutcome::Disconnected;
                }
                Step::Item(None) => return DrainOutcome::Completed,
                Step::Item(Some(item)) => {
                    let wire = match item.to_wire() {
                        Ok(wire) => wire,
                        Err(err) => {
                            error!(error = %err, "failed to serialize stream item, skipping");
                            continue;
                        }
                    };
                    if consumer.send(wire).await.is_err() {
                        self.cancel();
                        return DrainOutcome::Disconnected;
                    }
                }
                Step::Tick => {
                    if self.task.is_finished() && self.receiver.is_empty() {
                        return DrainOutcome::Completed;
                    }
                }
            }
        }
    }

    /// Abort the task and close the channel.
    pub fn cancel(&mut self) {
        self.task.abort();
        self.receiver.close();
        debug!("bridge cancelled");
    }

    /// Returns `true` once the background task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the background task and return its output.
    pub async fn finish(mut self) -> Result<T, JoinError> {
        (&mut self.task).await
    }
}

impl<T> Drop for OpenBridge<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
