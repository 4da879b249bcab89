//! Session ownership.
//!
//! A [`Coordinator`] owns the single active session for a page: idle, one
//! recording, or one playback. Starting either while the other is active is
//! refused with [`Error::Busy`].

use crate::capture::{CaptureState, RawEvent, Recorder};
use crate::config::{CaptureConfig, Config};
use crate::continuity::{self, PendingStore};
use crate::model::{InteractionEvent, Recording};
use crate::page::Page;
use crate::playback::{Outcome, PlaybackControl, PlaybackState, PlaybackUi, Player, Progress, Speed};
use crate::storage::Storage;
use crate::{now_ms, Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A recording in progress: the recorder plus the recording its events are
/// collected into.
pub struct RecordingSession<P: Page> {
    recorder: Recorder<P>,
    events: UnboundedReceiver<InteractionEvent>,
    recording: Recording,
}

impl<P: Page> RecordingSession<P> {
    pub async fn start(
        page: Arc<P>,
        config: CaptureConfig,
        name: Option<String>,
        now: u64,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut recording = Recording::new(now);
        if let Some(name) = name {
            recording.name = name;
        }
        let mut recorder = Recorder::new(page, config, tx);
        recorder.start(now).await?;
        let mut session = Self {
            recorder,
            events: rx,
            recording,
        };
        session.collect();
        Ok(session)
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }

    pub fn state(&self) -> CaptureState {
        self.recorder.state()
    }

    pub async fn handle(&mut self, raw: RawEvent<P::Node>) -> Result<()> {
        self.recorder.handle(raw).await?;
        self.collect();
        Ok(())
    }

    pub async fn tick(&mut self, now: u64) -> Result<()> {
        self.recorder.tick(now).await?;
        self.collect();
        Ok(())
    }

    pub fn pause(&mut self) {
        self.recorder.pause();
    }

    pub async fn resume(&mut self, now: u64) -> Result<()> {
        self.recorder.resume(now).await
    }

    /// Stop capturing and return the finished recording.
    pub async fn finish(mut self, now: u64) -> Result<Recording> {
        self.recorder.stop(now).await?;
        self.collect();
        self.recording.duration = now.saturating_sub(self.recording.created);
        Ok(self.recording)
    }

    fn collect(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.recording.push_event(event);
        }
    }
}

struct PlaybackHandle {
    recording_id: String,
    control: PlaybackControl,
    task: JoinHandle<Result<Outcome>>,
}

enum Active<P: Page> {
    Idle,
    Recording(RecordingSession<P>),
    Playing(PlaybackHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Idle,
    Recording,
    Playing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_captured: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_state: Option<PlaybackState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

/// Owns the active session for one page.
pub struct Coordinator<P: Page> {
    page: Arc<P>,
    storage: Arc<dyn Storage>,
    pending: Arc<dyn PendingStore>,
    config: Config,
    active: Mutex<Active<P>>,
}

impl<P: Page + 'static> Coordinator<P> {
    pub fn new(
        page: Arc<P>,
        storage: Arc<dyn Storage>,
        pending: Arc<dyn PendingStore>,
        config: Config,
    ) -> Self {
        Self {
            page,
            storage,
            pending,
            config,
            active: Mutex::new(Active::Idle),
        }
    }

    pub fn page(&self) -> &Arc<P> {
        &self.page
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub async fn start_recording(&self, name: Option<String>) -> Result<String> {
        let mut active = self.active.lock().await;
        reap(&mut active);
        match *active {
            Active::Idle => {}
            Active::Recording(_) => return Err(Error::Busy("already recording".into())),
            Active::Playing(_) => {
                return Err(Error::Busy("cannot record while a playback is running".into()))
            }
        }
        let session =
            RecordingSession::start(self.page.clone(), self.config.capture.clone(), name, now_ms())
                .await?;
        let id = session.recording().id.clone();
        info!("Started recording {}", id);
        *active = Active::Recording(session);
        Ok(id)
    }

    /// Feed one raw interaction to the active recording. Ignored otherwise.
    pub async fn record(&self, raw: RawEvent<P::Node>) -> Result<()> {
        match &mut *self.active.lock().await {
            Active::Recording(session) => session.handle(raw).await,
            _ => {
                debug!("No recording active; dropping raw event");
                Ok(())
            }
        }
    }

    /// Feed a drained batch in order, then advance the recording clock to
    /// `now`. The batch has already left its source, so an event that fails
    /// is logged and skipped. Returns how many events were accepted.
    pub async fn record_all(&self, events: Vec<RawEvent<P::Node>>, now: u64) -> Result<usize> {
        let mut accepted = 0;
        for raw in events {
            let at = raw.at;
            match self.record(raw).await {
                Ok(()) => accepted += 1,
                Err(e) => warn!("Skipping captured event at {}: {}", at, e),
            }
        }
        self.tick(now).await?;
        Ok(accepted)
    }

    /// Let debounced input and trailing scrolls fire. No-op unless recording.
    pub async fn tick(&self, now: u64) -> Result<()> {
        match &mut *self.active.lock().await {
            Active::Recording(session) => session.tick(now).await,
            _ => Ok(()),
        }
    }

    pub async fn is_recording(&self) -> bool {
        matches!(*self.active.lock().await, Active::Recording(_))
    }

    /// Stop the recording and save it.
    pub async fn stop_recording(&self) -> Result<Recording> {
        let mut active = self.active.lock().await;
        let session = match std::mem::replace(&mut *active, Active::Idle) {
            Active::Recording(session) => session,
            other => {
                *active = other;
                return Err(Error::NoSession("recording".into()));
            }
        };
        let recording = session.finish(now_ms()).await?;
        info!(
            "Recorded {} events into {}",
            recording.events.len(),
            recording.id
        );
        self.storage.save(recording).await
    }

    /// Start playing a stored recording in the background.
    pub async fn play(
        &self,
        id: &str,
        speed: Option<Speed>,
        ui: Arc<dyn PlaybackUi>,
    ) -> Result<PlaybackControl> {
        let mut active = self.active.lock().await;
        reap(&mut active);
        match *active {
            Active::Idle => {}
            Active::Recording(_) => {
                return Err(Error::Busy("cannot play while recording".into()))
            }
            Active::Playing(_) => return Err(Error::Busy("a playback is already running".into())),
        }
        let recording = self
            .storage
            .get(id)
            .await?
            .ok_or_else(|| Error::RecordingNotFound(id.to_string()))?;
        let speed = match speed {
            Some(speed) => speed,
            None => self.storage.settings().await?.playback_speed,
        };

        let player = Player::new(self.page.clone(), ui, self.pending.clone())
            .with_config(self.config.playback.clone());
        let control = player.control();
        let events = recording.events;
        let task = tokio::spawn(async move { continuity::play_through(player, &events, speed).await });
        info!("Playing {} at {} speed", id, speed);
        *active = Active::Playing(PlaybackHandle {
            recording_id: id.to_string(),
            control: control.clone(),
            task,
        });
        Ok(control)
    }

    /// Pause whichever session is active. Returns what was paused.
    pub async fn pause(&self) -> Result<Mode> {
        match &mut *self.active.lock().await {
            Active::Recording(session) => {
                session.pause();
                Ok(Mode::Recording)
            }
            Active::Playing(handle) if handle.control.pause() => Ok(Mode::Playing),
            _ => Err(Error::NoSession("session to pause".into())),
        }
    }

    pub async fn resume(&self) -> Result<Mode> {
        match &mut *self.active.lock().await {
            Active::Recording(session) => {
                session.resume(now_ms()).await?;
                Ok(Mode::Recording)
            }
            Active::Playing(handle) if handle.control.resume() => Ok(Mode::Playing),
            _ => Err(Error::NoSession("paused session".into())),
        }
    }

    /// Ask the running playback to stop at its next step.
    pub async fn stop_playback(&self) -> Result<()> {
        match &*self.active.lock().await {
            Active::Playing(handle) if handle.control.stop() => Ok(()),
            _ => Err(Error::NoSession("playback".into())),
        }
    }

    /// Wait for the running playback to end and return its outcome.
    pub async fn finish_playback(&self) -> Result<Outcome> {
        let handle = {
            let mut active = self.active.lock().await;
            match std::mem::replace(&mut *active, Active::Idle) {
                Active::Playing(handle) => handle,
                other => {
                    *active = other;
                    return Err(Error::NoSession("playback".into()));
                }
            }
        };
        handle.task.await?
    }

    /// Snapshot of what the coordinator is doing right now.
    pub async fn status(&self) -> SessionStatus {
        let active = self.active.lock().await;
        match &*active {
            Active::Idle => SessionStatus {
                mode: Mode::Idle,
                recording_id: None,
                events_captured: None,
                playback_state: None,
                progress: None,
            },
            Active::Recording(session) => SessionStatus {
                mode: Mode::Recording,
                recording_id: Some(session.recording().id.clone()),
                events_captured: Some(session.recording().events.len()),
                playback_state: None,
                progress: None,
            },
            Active::Playing(handle) => SessionStatus {
                mode: Mode::Playing,
                recording_id: Some(handle.recording_id.clone()),
                events_captured: None,
                playback_state: Some(handle.control.state()),
                progress: Some(handle.control.progress()),
            },
        }
    }
}

/// Forget a playback whose task has already ended.
fn reap<P: Page>(active: &mut Active<P>) {
    if let Active::Playing(handle) = active {
        if handle.task.is_finished() {
            debug!(
                "Playback of {} ended ({})",
                handle.recording_id,
                handle.control.state()
            );
            *active = Active::Idle;
        }
    }
}
