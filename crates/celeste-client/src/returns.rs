//! Reward forwarding thread.
//!
//! The episode loop hands every step's `(episode, reward, info)` to a
//! [`ReturnsForwarder`], whose thread calls
//! [`PolicySource::log_returns`] so that a slow round trip never holds up
//! the next `get_action`. Before an episode is retired the loop calls
//! [`ReturnsForwarder::flush`] to wait, with a bound, until everything sent
//! so far has been delivered.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use celeste_core::traits::PolicySource;
use celeste_core::types::{EpisodeId, StepInfo};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::ClientError;

enum Message {
    Return {
        episode: EpisodeId,
        reward: f32,
        info: StepInfo,
    },
    Flush(Sender<()>),
}

/// Counters reported when the forwarder stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub forwarded: u64,
    pub failed: u64,
}

/// Owner of the forwarding thread. Dropping it drains the channel and
/// joins the thread.
pub struct ReturnsForwarder {
    tx: Option<Sender<Message>>,
    handle: Option<JoinHandle<ForwarderStats>>,
}

impl ReturnsForwarder {
    pub fn spawn(source: Arc<dyn PolicySource>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = std::thread::Builder::new()
            .name("returns-forwarder".into())
            .spawn(move || forward(&*source, &rx));
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn reward forwarder");
                None
            }
        };
        Self {
            tx: Some(tx),
            handle,
        }
    }

    /// Queue a return for delivery.
    pub fn send(&self, episode: EpisodeId, reward: f32, info: StepInfo) -> Result<(), ClientError> {
        self.sender()?
            .send(Message::Return {
                episode,
                reward,
                info,
            })
            .map_err(|_| ClientError::ForwarderGone)
    }

    /// Wait until every return queued so far has been delivered.
    ///
    /// Returns `false` if `timeout` elapsed first; delivery continues in
    /// the background.
    pub fn flush(&self, timeout: Duration) -> Result<bool, ClientError> {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.sender()?
            .send(Message::Flush(ack_tx))
            .map_err(|_| ClientError::ForwarderGone)?;
        match ack_rx.recv_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::ForwarderGone),
        }
    }

    /// Stop the thread after it drains the queue.
    pub fn shutdown(mut self) -> ForwarderStats {
        self.stop()
    }

    fn sender(&self) -> Result<&Sender<Message>, ClientError> {
        if self.handle.as_ref().is_some_and(JoinHandle::is_finished) {
            return Err(ClientError::ForwarderGone);
        }
        self.tx.as_ref().ok_or(ClientError::ForwarderGone)
    }

    fn stop(&mut self) -> ForwarderStats {
        self.tx = None;
        self.handle.take().map_or_else(ForwarderStats::default, |handle| {
            handle.join().unwrap_or_else(|_| {
                tracing::error!("Reward forwarder panicked");
                ForwarderStats::default()
            })
        })
    }
}

impl Drop for ReturnsForwarder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward(source: &dyn PolicySource, rx: &Receiver<Message>) -> ForwarderStats {
    let mut stats = ForwarderStats::default();
    for message in rx {
        match message {
            Message::Return {
                episode,
                reward,
                info,
            } => match source.log_returns(&episode, reward, info) {
                Ok(()) => stats.forwarded += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!(episode = %episode, reward, error = %e, "Failed to log returns");
                }
            },
            Message::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    tracing::debug!(forwarded = stats.forwarded, failed = stats.failed, "Reward forwarder stopped");
    stats
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
