//! What playback needs from whoever is watching it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::warn;

/// Position of a playback, reported after every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Steps finished, counting skipped ones.
    pub current_step: usize,
    /// Events this player was given to replay.
    pub total_steps: usize,
}

impl Progress {
    /// `0.0` for an empty playback.
    pub fn percent(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        self.current_step as f64 * 100.0 / self.total_steps as f64
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.current_step, self.total_steps)
    }
}

/// Answer to a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recovery {
    /// Move on to the next event without retrying.
    Skip,
    /// Stop playback and discard the remaining events.
    Abort,
}

impl FromStr for Recovery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" | "s" => Ok(Recovery::Skip),
            "abort" | "a" => Ok(Recovery::Abort),
            other => Err(format!("unknown action '{}' (expected skip or abort)", other)),
        }
    }
}

/// A step that could not be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailure {
    /// 0-based index into the events being played.
    pub index: usize,
    pub total: usize,
    pub event_type: String,
    pub selector: Option<String>,
    pub error: String,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}/{} ({}", self.index + 1, self.total, self.event_type)?;
        if let Some(ref selector) = self.selector {
            write!(f, " {}", selector)?;
        }
        write!(f, "): {}", self.error)
    }
}

/// Progress sink and recovery decision point.
#[async_trait]
pub trait PlaybackUi: Send + Sync {
    /// Best-effort; must not block.
    fn progress(&self, progress: Progress);

    /// Called on a recoverable step failure. Playback waits for the answer.
    async fn decide(&self, failure: &StepFailure) -> Recovery;
}

/// Applies the same decision to every failure.
#[derive(Debug, Clone, Copy)]
pub struct AutoRecovery(pub Recovery);

#[async_trait]
impl PlaybackUi for AutoRecovery {
    fn progress(&self, _progress: Progress) {}

    async fn decide(&self, failure: &StepFailure) -> Recovery {
        warn!("{} -> {:?}", failure, self.0);
        self.0
    }
}

/// A pending decision. Drop it to abort.
#[derive(Debug)]
pub struct DecisionRequest {
    pub failure: StepFailure,
    reply: oneshot::Sender<Recovery>,
}

impl DecisionRequest {
    /// Answer the parked step. Ignored if the player has gone away.
    pub fn respond(self, recovery: Recovery) {
        // The player may already be gone.
        let _ = self.reply.send(recovery);
    }
}

/// [`PlaybackUi`] that forwards over channels to another task.
pub struct ChannelUi {
    progress: watch::Sender<Progress>,
    decisions: mpsc::UnboundedSender<DecisionRequest>,
}

/// The receiving half of a [`ChannelUi`].
pub struct ChannelUiHandle {
    pub progress: watch::Receiver<Progress>,
    pub decisions: mpsc::UnboundedReceiver<DecisionRequest>,
}

impl ChannelUi {
    pub fn new() -> (Self, ChannelUiHandle) {
        let (progress_tx, progress_rx) = watch::channel(Progress::default());
        let (decision_tx, decision_rx) = mpsc::unbounded_channel();
        (
            Self {
                progress: progress_tx,
                decisions: decision_tx,
            },
            ChannelUiHandle {
                progress: progress_rx,
                decisions: decision_rx,
            },
        )
    }
}

#[async_trait]
impl PlaybackUi for ChannelUi {
    fn progress(&self, progress: Progress) {
        self.progress.send_replace(progress);
    }

    async fn decide(&self, failure: &StepFailure) -> Recovery {
        let (reply, answer) = oneshot::channel();
        let request = DecisionRequest {
            failure: failure.clone(),
            reply,
        };
        if self.decisions.send(request).is_err() {
            warn!("No one is listening for decisions; aborting at {}", failure);
            return Recovery::Abort;
        }
        answer.await.unwrap_or(Recovery::Abort)
    }
}
