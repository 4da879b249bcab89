//! Carrying a playback across full page loads.
//!
//! Before a replayed navigation unloads the page, the player writes the
//! remaining events to a [`PendingStore`] under the destination origin. The
//! next page takes the record (read and clear in one step) and a fresh player
//! continues from there.

use crate::model::{InteractionEvent, PendingPlayback};
use crate::page::Page;
use crate::playback::{Outcome, Player, Speed};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Durable handoff slot, one record per origin.
#[async_trait]
pub trait PendingStore: Send + Sync {
    /// Replace any record for `origin`.
    async fn put(&self, origin: &str, record: PendingPlayback) -> Result<()>;

    /// Remove and return the record for `origin`. At most one caller gets it.
    async fn take(&self, origin: &str) -> Result<Option<PendingPlayback>>;
}

/// `scheme://host[:port]` of `url`, the key handoffs are stored under.
pub fn origin_key(url: &str) -> Result<String> {
    Ok(url::Url::parse(url)?.origin().ascii_serialization())
}

#[derive(Debug, Default)]
pub struct MemoryPendingStore {
    records: Mutex<HashMap<String, PendingPlayback>>,
}

impl MemoryPendingStore {
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl PendingStore for MemoryPendingStore {
    async fn put(&self, origin: &str, record: PendingPlayback) -> Result<()> {
        self.records.lock().await.insert(origin.to_string(), record);
        Ok(())
    }

    async fn take(&self, origin: &str) -> Result<Option<PendingPlayback>> {
        Ok(self.records.lock().await.remove(origin))
    }
}

/// One JSON file per origin in a directory, so a handoff survives the
/// process that wrote it.
#[derive(Debug, Clone)]
pub struct FilePendingStore {
    dir: PathBuf,
}

impl FilePendingStore {
    /// Records go in `dir`, one file per origin. The directory is created on
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, origin: &str) -> PathBuf {
        let name: String = origin
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl PendingStore for FilePendingStore {
    async fn put(&self, origin: &str, record: PendingPlayback) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(origin);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, serde_json::to_vec(&record)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Wrote pending playback for {} to {}", origin, path.display());
        Ok(())
    }

    async fn take(&self, origin: &str) -> Result<Option<PendingPlayback>> {
        let path = self.path_for(origin);
        // Claim the file first; only one rename can win.
        let claimed = path.with_extension(format!("json.{}.taken", uuid::Uuid::new_v4().simple()));
        match tokio::fs::rename(&path, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let data = tokio::fs::read(&claimed).await;
        if let Err(e) = tokio::fs::remove_file(&claimed).await {
            warn!("Could not remove {}: {}", claimed.display(), e);
        }
        let record = serde_json::from_slice(&data?).map_err(|e| {
            Error::Storage(format!("corrupt pending playback for {}: {}", origin, e))
        })?;
        Ok(Some(record))
    }
}

/// Page initialization: if a previous page handed events to this origin,
/// consume them and play the tail.
pub async fn resume_pending<P: Page>(player: &mut Player<P>) -> Result<Option<Outcome>> {
    let url = player.page().url().await?;
    let key = origin_key(&url)?;
    let Some(record) = player.pending_store().take(&key).await? else {
        return Ok(None);
    };
    info!(
        "Resuming playback on {} with {} events",
        url,
        record.events_tail.len()
    );
    Ok(Some(player.continue_from(record).await?))
}

/// Play `events`, following every navigation handoff with a fresh player
/// until the playback ends.
pub async fn play_through<P: Page>(
    player: Player<P>,
    events: &[InteractionEvent],
    speed: Speed,
) -> Result<Outcome> {
    let mut player = player;
    let mut outcome = player.play(events, speed).await?;
    loop {
        let Outcome::HandedOff { ref url } = outcome else {
            return Ok(outcome);
        };
        player.page().wait_for_load().await?;
        let mut next = player.successor();
        match resume_pending(&mut next).await? {
            Some(result) => {
                outcome = result;
                player = next;
            }
            None => {
                warn!("Nothing to resume after navigating to {}", url);
                return Ok(outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessPage;
    use crate::model::{ClickEvent, EventKind, NavigateEvent, Point, SelectorDescriptor};
    use crate::playback::{AutoRecovery, PlaybackState, Recovery};
    use eoka_dom::{Document, El};
    use std::sync::Arc;

    fn click(at: u64, url: &str, selector: &str) -> InteractionEvent {
        InteractionEvent::new(
            at,
            url,
            EventKind::Click(ClickEvent {
                selector: SelectorDescriptor {
                    primary: selector.into(),
                    fallbacks: vec![],
                },
                coordinates: Point::new(1.0, 1.0),
                scroll_position: Point::default(),
                target_text: String::new(),
                target_tag: "button".into(),
            }),
        )
    }

    fn page_with_buttons(url: &str, ids: &[&str]) -> Document {
        let mut doc = Document::new(url);
        let body = doc.body();
        for (i, id) in ids.iter().enumerate() {
            doc.append(body, El::new("button").id(id).rect(0.0, i as f64 * 40.0, 100.0, 30.0));
        }
        doc
    }

    fn record(events: Vec<InteractionEvent>) -> PendingPlayback {
        PendingPlayback {
            events_tail: events,
            resume_index: 0,
            speed: Speed::Instant,
        }
    }

    #[test]
    fn test_origin_key() {
        assert_eq!(origin_key("https://a.test/x?y=1").unwrap(), "https://a.test");
        assert_eq!(origin_key("http://a.test:8080/").unwrap(), "http://a.test:8080");
        assert!(origin_key("not a url").is_err());
    }

    #[tokio::test]
    async fn test_memory_take_clears() {
        let store = MemoryPendingStore::default();
        store.put("https://a.test", record(vec![])).await.unwrap();
        assert!(store.take("https://b.test").await.unwrap().is_none());
        assert!(store.take("https://a.test").await.unwrap().is_some());
        assert!(store.take("https://a.test").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePendingStore::new(dir.path().join("pending"));
        let events = vec![click(1, "https://a.test/", "#ok")];

        assert!(store.take("https://a.test").await.unwrap().is_none());
        store.put("https://a.test", record(events.clone())).await.unwrap();
        store.put("http://a.test:8080", record(vec![])).await.unwrap();

        let taken = store.take("https://a.test").await.unwrap().unwrap();
        assert_eq!(taken.events_tail, events);
        assert!(store.take("https://a.test").await.unwrap().is_none());
        assert!(store.take("http://a.test:8080").await.unwrap().is_some());

        let leftovers = std::fs::read_dir(store.dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_file_store_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePendingStore::new(dir.path());
        std::fs::write(store.path_for("https://a.test"), "{not json").unwrap();
        let err = store.take("https://a.test").await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        // Consumed even though unreadable.
        assert!(store.take("https://a.test").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_runs_only_the_tail() {
        let page = Arc::new(HeadlessPage::new(page_with_buttons(
            "https://b.test/next",
            &["back", "ok"],
        )));
        let store = Arc::new(MemoryPendingStore::default());
        store
            .put("https://b.test", record(vec![click(5, "https://b.test/next", "#ok")]))
            .await
            .unwrap();
        let mut player = Player::new(page.clone(), Arc::new(AutoRecovery(Recovery::Abort)), store.clone());

        let outcome = resume_pending(&mut player).await.unwrap();
        assert_eq!(outcome, Some(Outcome::Completed));
        let ok = page.query_css("#ok").await.unwrap()[0];
        let dispatched = page.dispatched().await;
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].0, Some(ok));

        // The record was consumed; a later load does not replay it.
        assert!(store.is_empty().await);
        assert_eq!(resume_pending(&mut player).await.unwrap(), None);
        assert_eq!(page.dispatched().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_through_follows_navigation() {
        let page = Arc::new(HeadlessPage::new(page_with_buttons("https://a.test/", &["go"])));
        page.route("https://b.test/", page_with_buttons("https://b.test/", &["ok"]))
            .await;
        let store = Arc::new(MemoryPendingStore::default());
        let player = Player::new(page.clone(), Arc::new(AutoRecovery(Recovery::Abort)), store.clone());
        let control = player.control();

        let events = vec![
            InteractionEvent::new(0, "https://a.test/", EventKind::Navigate(NavigateEvent::default())),
            click(100, "https://a.test/", "#go"),
            InteractionEvent::new(200, "https://b.test/", EventKind::Navigate(NavigateEvent::default())),
            click(300, "https://b.test/", "#ok"),
        ];
        let outcome = play_through(player, &events, Speed::Instant).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(page.url().await.unwrap(), "https://b.test/");
        assert_eq!(page.dispatched().await.len(), 2);
        assert!(store.is_empty().await);
        // The control handle follows the playback across pages.
        assert_eq!(control.state(), PlaybackState::Completed);
    }
}
