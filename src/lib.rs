//! # eoka-replay
//!
//! Record what a user does on a web page and replay it later against the live
//! DOM, even after ids, layout or the page itself have changed.
//!
//! - [`selector`] fingerprints an element into a ranked list of selectors and
//!   re-locates it later.
//! - [`capture::Recorder`] turns raw DOM interactions into a shaped, ordered
//!   stream of [`InteractionEvent`]s.
//! - [`playback::Player`] walks a recording and re-executes it with
//!   reconstructed timing, pause/stop control and skip/abort recovery.
//! - [`continuity`] carries an in-flight playback across full page loads.
//!
//! Everything runs against the [`Page`] trait, implemented for a real Chrome
//! tab ([`browser::EokaPage`]) and for an in-process document
//! ([`headless::HeadlessPage`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eoka_replay::{continuity, browser::EokaPage, storage::{JsonFileStore, Storage}};
//! use eoka_replay::playback::{AutoRecovery, Player, Recovery, Speed};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> eoka_replay::Result<()> {
//! let store = JsonFileStore::open("eoka-replay.json")?;
//! let recording = store.get("rec_1700000000000_abc123def").await?.expect("recording");
//!
//! let page = Arc::new(EokaPage::launch(&Default::default()).await?);
//! let pending = Arc::new(continuity::MemoryPendingStore::default());
//! let player = Player::new(page.clone(), Arc::new(AutoRecovery(Recovery::Skip)), pending.clone());
//! let outcome = continuity::play_through(player, &recording.events, Speed::Fast).await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod capture;
pub mod config;
pub mod continuity;
pub mod headless;
pub mod mcp;
pub mod model;
pub mod page;
pub mod playback;
pub mod selector;
pub mod session;
pub mod storage;
pub mod synthetic;
pub mod wait;

pub use config::Config;
pub use model::{EventKind, InteractionEvent, PendingPlayback, Recording, SelectorDescriptor};
pub use page::Page;

/// Result type for eoka-replay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while recording, replaying or persisting.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("element not visible after {timeout_ms}ms: {selector}")]
    VisibilityTimeout { selector: String, timeout_ms: u64 },

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("import format error: {0}")]
    ImportFormat(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("no active {0}")]
    NoSession(String),

    #[error("recording not found: {0}")]
    RecordingNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("playback task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Per-step failures that playback can skip past.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ElementNotFound(_) | Error::VisibilityTimeout { .. } | Error::Dispatch(_)
        )
    }
}

impl From<eoka_dom::Error> for Error {
    fn from(e: eoka_dom::Error) -> Self {
        match e {
            eoka_dom::Error::InvalidSelector { selector, reason } => {
                Error::InvalidSelector { selector, reason }
            }
            eoka_dom::Error::InvalidXPath { expr, reason } => Error::InvalidSelector {
                selector: expr,
                reason,
            },
        }
    }
}

/// Milliseconds since the Unix epoch, the unit of every event timestamp.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
