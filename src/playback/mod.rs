//! Recording playback.
//!
//! A [`Player`] walks an event list one step at a time: wait while paused,
//! replay the step, report progress, sleep the scaled gap to the next event.
//! [`PlaybackControl`] is the only way to influence a running player and is
//! observed at the top of each step, never in the middle of one.

mod replay;
mod speed;
mod ui;

pub use speed::Speed;
pub use ui::{
    AutoRecovery, ChannelUi, ChannelUiHandle, DecisionRequest, PlaybackUi, Progress, Recovery,
    StepFailure,
};

use crate::config::PlaybackConfig;
use crate::continuity::{origin_key, PendingStore};
use crate::model::{InteractionEvent, PendingPlayback};
use crate::page::Page;
use crate::wait::poll_until;
use crate::Result;
use replay::{Pacing, Step};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Completed,
    Aborted,
    /// Handed the remaining events to the next page load.
    Suspended,
}

impl PlaybackState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            3 => PlaybackState::Completed,
            4 => PlaybackState::Aborted,
            5 => PlaybackState::Suspended,
            _ => PlaybackState::Idle,
        }
    }

    /// Playing or paused: a stop request still has someone to act on it.
    pub fn is_running(&self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Paused)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Completed => "completed",
            PlaybackState::Aborted => "aborted",
            PlaybackState::Suspended => "suspended",
        })
    }
}

/// How a call to [`Player::play`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Aborted,
    /// A navigation step left the page; the tail is in the pending store.
    HandedOff { url: String },
}

#[derive(Debug, Default)]
struct ControlInner {
    state: AtomicU8,
    stop: AtomicBool,
    current: AtomicUsize,
    total: AtomicUsize,
}

/// Cloneable handle for pausing, resuming and stopping a player from another
/// task.
#[derive(Debug, Clone, Default)]
pub struct PlaybackControl {
    inner: Arc<ControlInner>,
}

impl PlaybackControl {
    /// A detached control in the `Idle` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, as last set by the player or by [`pause`](Self::pause)
    /// and [`resume`](Self::resume).
    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Steps finished so far out of the events being played.
    pub fn progress(&self) -> Progress {
        Progress {
            current_step: self.inner.current.load(Ordering::SeqCst),
            total_steps: self.inner.total.load(Ordering::SeqCst),
        }
    }

    /// Pause before the next step. Returns false unless playing.
    pub fn pause(&self) -> bool {
        self.transition(PlaybackState::Playing, PlaybackState::Paused)
    }

    /// Continue a paused playback. Returns false unless paused.
    pub fn resume(&self) -> bool {
        self.transition(PlaybackState::Paused, PlaybackState::Playing)
    }

    /// Abort before the next step. Returns false if nothing is running.
    pub fn stop(&self) -> bool {
        if !self.state().is_running() {
            return false;
        }
        self.inner.stop.store(true, Ordering::SeqCst);
        true
    }

    fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.inner
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: PlaybackState) {
        self.inner.state.store(state as u8, Ordering::SeqCst);
    }

    fn begin(&self, total: usize) {
        self.inner.stop.store(false, Ordering::SeqCst);
        self.inner.current.store(0, Ordering::SeqCst);
        self.inner.total.store(total, Ordering::SeqCst);
        self.set_state(PlaybackState::Playing);
    }

    fn set_current(&self, current: usize) {
        self.inner.current.store(current, Ordering::SeqCst);
    }
}

/// Replays events against a [`Page`].
pub struct Player<P: Page> {
    page: Arc<P>,
    ui: Arc<dyn PlaybackUi>,
    pending: Arc<dyn PendingStore>,
    config: PlaybackConfig,
    control: PlaybackControl,
    events: Vec<InteractionEvent>,
    index: usize,
    speed: Speed,
}

impl<P: Page> Player<P> {
    /// A player with the default [`PlaybackConfig`].
    pub fn new(page: Arc<P>, ui: Arc<dyn PlaybackUi>, pending: Arc<dyn PendingStore>) -> Self {
        Self {
            page,
            ui,
            pending,
            config: PlaybackConfig::default(),
            control: PlaybackControl::new(),
            events: Vec::new(),
            index: 0,
            speed: Speed::default(),
        }
    }

    pub fn with_config(mut self, config: PlaybackConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing control handle instead of creating one.
    pub fn with_control(mut self, control: PlaybackControl) -> Self {
        self.control = control;
        self
    }

    /// A handle sharing this player's state, usable from other tasks.
    pub fn control(&self) -> PlaybackControl {
        self.control.clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.control.state()
    }

    pub fn page(&self) -> &Arc<P> {
        &self.page
    }

    pub fn pending_store(&self) -> &Arc<dyn PendingStore> {
        &self.pending
    }

    /// A player for the next page load with the same collaborators and
    /// control handle.
    pub fn successor(&self) -> Self {
        Self {
            page: self.page.clone(),
            ui: self.ui.clone(),
            pending: self.pending.clone(),
            config: self.config.clone(),
            control: self.control.clone(),
            events: Vec::new(),
            index: 0,
            speed: self.speed,
        }
    }

    /// Play `events` from the start.
    pub async fn play(&mut self, events: &[InteractionEvent], speed: Speed) -> Result<Outcome> {
        self.prime(events.to_vec(), 0, speed);
        self.run().await
    }

    /// Play a tail handed over by a previous page.
    pub async fn continue_from(&mut self, pending: PendingPlayback) -> Result<Outcome> {
        let PendingPlayback {
            events_tail,
            resume_index,
            speed,
        } = pending;
        self.prime(events_tail, resume_index, speed);
        self.run().await
    }

    fn prime(&mut self, events: Vec<InteractionEvent>, start: usize, speed: Speed) {
        self.index = start.min(events.len());
        self.events = events;
        self.speed = speed;
        self.control.begin(self.events.len());
        self.control.set_current(self.index);
    }

    fn pacing(&self) -> Pacing {
        Pacing {
            find: self.config.find_options(),
            visible: self.config.visible_options(),
            type_delay: self.config.type_delay(),
            smooth_scroll: self.speed != Speed::Instant,
        }
    }

    async fn run(&mut self) -> Result<Outcome> {
        let total = self.events.len();
        let pacing = self.pacing();
        info!(
            "Playing {} events from step {} at {} speed",
            total,
            self.index + 1,
            self.speed
        );

        while self.index < total {
            if !self.checkpoint().await? {
                info!("Playback stopped at step {}/{}", self.index + 1, total);
                self.control.set_state(PlaybackState::Aborted);
                return Ok(Outcome::Aborted);
            }

            let event = &self.events[self.index];
            debug!("Step {}/{}: {}", self.index + 1, total, event.kind.name());
            match replay::replay(self.page.as_ref(), event, &pacing).await {
                Ok(Step::Done) => {}
                Ok(Step::Navigate(url)) => return self.hand_off(url).await,
                Err(e) if e.is_recoverable() => {
                    let failure = StepFailure {
                        index: self.index,
                        total,
                        event_type: event.kind.name().to_string(),
                        selector: event.selector().map(|s| s.primary.clone()),
                        error: e.to_string(),
                    };
                    match self.ui.decide(&failure).await {
                        Recovery::Skip => {
                            warn!("Skipping {}", failure);
                            self.index += 1;
                            continue;
                        }
                        Recovery::Abort => {
                            info!("Aborted at {}", failure);
                            self.control.set_state(PlaybackState::Aborted);
                            return Ok(Outcome::Aborted);
                        }
                    }
                }
                Err(e) => {
                    self.control.set_state(PlaybackState::Aborted);
                    return Err(e);
                }
            }

            self.report(self.index + 1, total);
            if let Some(next) = self.events.get(self.index + 1) {
                let delay = self.speed.delay(self.events[self.index].timestamp, next.timestamp);
                tokio::time::sleep(delay).await;
            }
            self.index += 1;
        }

        info!("Playback completed ({} steps)", total);
        self.control.set_state(PlaybackState::Completed);
        Ok(Outcome::Completed)
    }

    /// Wait out a pause. `false` means stop.
    async fn checkpoint(&self) -> Result<bool> {
        let control = &self.control;
        if control.stop_requested() {
            return Ok(false);
        }
        if control.state() != PlaybackState::Paused {
            return Ok(true);
        }
        info!("Paused before step {}", self.index + 1);
        let resumed = poll_until(self.config.pause_poll(), None, || async move {
            Ok(if control.stop_requested() {
                Some(false)
            } else if control.state() != PlaybackState::Paused {
                Some(true)
            } else {
                None
            })
        })
        .await?;
        Ok(resumed.unwrap_or(false))
    }

    fn report(&self, current: usize, total: usize) {
        self.control.set_current(current);
        self.ui.progress(Progress {
            current_step: current,
            total_steps: total,
        });
    }

    async fn hand_off(&self, url: String) -> Result<Outcome> {
        let tail = self.events[self.index + 1..].to_vec();
        let key = match origin_key(&url) {
            Ok(key) => key,
            Err(e) => {
                warn!("Cannot navigate to {:?}: {}", url, e);
                self.control.set_state(PlaybackState::Aborted);
                return Err(e);
            }
        };
        info!(
            "Navigating to {}; handing {} remaining events to {}",
            url,
            tail.len(),
            key
        );
        let record = PendingPlayback {
            events_tail: tail,
            resume_index: 0,
            speed: self.speed,
        };
        if let Err(e) = self.pending.put(&key, record).await {
            self.control.set_state(PlaybackState::Aborted);
            return Err(e);
        }
        self.report(self.index + 1, self.events.len());
        if let Err(e) = self.page.navigate(&url).await {
            // Nothing will pick the record up.
            let _ = self.pending.take(&key).await;
            self.control.set_state(PlaybackState::Aborted);
            return Err(e);
        }
        self.control.set_state(PlaybackState::Suspended);
        Ok(Outcome::HandedOff { url })
    }
}
