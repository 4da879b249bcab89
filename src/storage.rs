//! Recording persistence.
//!
//! The engines never touch storage directly; the CLI, the MCP server and the
//! session coordinator go through the [`Storage`] trait.

use crate::model::{ChangeValue, EventKind, ExportBundle, InteractionEvent, Recording};
use crate::playback::Speed;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "Settings::default_hotkey")]
    pub hotkey: String,
    #[serde(default)]
    pub playback_speed: Speed,
    #[serde(default)]
    pub auto_export: bool,
}

impl Settings {
    fn default_hotkey() -> String {
        "Ctrl+Shift+R".into()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hotkey: Self::default_hotkey(),
            playback_speed: Speed::default(),
            auto_export: false,
        }
    }
}

/// Fields to overwrite in [`Settings`]; `None` keeps the current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub hotkey: Option<String>,
    pub playback_speed: Option<Speed>,
    pub auto_export: Option<bool>,
}

/// Fields to overwrite in a stored [`Recording`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingPatch {
    pub name: Option<String>,
    pub duration: Option<u64>,
    pub events: Option<Vec<InteractionEvent>>,
}

impl RecordingPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub bytes: u64,
    pub formatted: String,
    pub recording_count: usize,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn list(&self) -> Result<Vec<Recording>>;
    async fn get(&self, id: &str) -> Result<Option<Recording>>;
    /// Insert, or replace the recording with the same id.
    async fn save(&self, recording: Recording) -> Result<Recording>;
    /// Returns whether anything was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn update(&self, id: &str, patch: RecordingPatch) -> Result<Option<Recording>>;
    async fn settings(&self) -> Result<Settings>;
    async fn set_settings(&self, patch: SettingsPatch) -> Result<Settings>;
    /// All recordings, or only those in `ids`.
    async fn export(&self, ids: Option<&[String]>) -> Result<ExportBundle>;
    /// Add recordings from an export bundle, skipping ids already present.
    /// A malformed payload is rejected whole.
    async fn import(&self, json: &str) -> Result<ImportSummary>;
    async fn usage(&self) -> Result<StorageUsage>;
}

/// Everything a store holds, in its on-disk shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    recordings: Vec<Recording>,
    #[serde(default)]
    settings: Settings,
}

impl StoreData {
    fn get(&self, id: &str) -> Option<Recording> {
        self.recordings.iter().find(|r| r.id == id).cloned()
    }

    fn save(&mut self, recording: Recording) {
        match self.recordings.iter_mut().find(|r| r.id == recording.id) {
            Some(existing) => *existing = recording,
            None => self.recordings.push(recording),
        }
    }

    fn delete(&mut self, id: &str) -> bool {
        let before = self.recordings.len();
        self.recordings.retain(|r| r.id != id);
        self.recordings.len() != before
    }

    fn update(&mut self, id: &str, patch: RecordingPatch) -> Option<Recording> {
        let recording = self.recordings.iter_mut().find(|r| r.id == id)?;
        if let Some(name) = patch.name {
            recording.name = name;
        }
        if let Some(duration) = patch.duration {
            recording.duration = duration;
        }
        if let Some(events) = patch.events {
            recording.events = events;
        }
        Some(recording.clone())
    }

    fn set_settings(&mut self, patch: SettingsPatch) -> Settings {
        if let Some(hotkey) = patch.hotkey {
            self.settings.hotkey = hotkey;
        }
        if let Some(speed) = patch.playback_speed {
            self.settings.playback_speed = speed;
        }
        if let Some(auto_export) = patch.auto_export {
            self.settings.auto_export = auto_export;
        }
        self.settings.clone()
    }

    fn export(&self, ids: Option<&[String]>) -> ExportBundle {
        let recordings = self
            .recordings
            .iter()
            .filter(|r| ids.map_or(true, |ids| ids.contains(&r.id)))
            .cloned()
            .collect();
        ExportBundle::new(recordings)
    }

    fn import(&mut self, incoming: Vec<Recording>) -> ImportSummary {
        let mut seen: HashSet<String> = self.recordings.iter().map(|r| r.id.clone()).collect();
        let total = incoming.len();
        let mut imported = 0;
        for recording in incoming {
            if seen.insert(recording.id.clone()) {
                self.recordings.push(recording);
                imported += 1;
            }
        }
        ImportSummary {
            imported,
            skipped: total - imported,
        }
    }

    fn usage(&self) -> Result<StorageUsage> {
        let bytes = serde_json::to_vec(self)?.len() as u64;
        Ok(StorageUsage {
            bytes,
            formatted: format_bytes(bytes),
            recording_count: self.recordings.len(),
        })
    }
}

/// Validate an export bundle and pull out its recordings.
pub fn parse_import(json: &str) -> Result<Vec<Recording>> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| Error::ImportFormat(format!("not JSON: {}", e)))?;
    let entries = value
        .get("recordings")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::ImportFormat("missing recordings array".into()))?;

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let has_str = |key: &str| entry.get(key).is_some_and(Value::is_string);
            if !has_str("id") {
                return Err(Error::ImportFormat(format!("recording {}: missing id", i)));
            }
            if !has_str("name") {
                return Err(Error::ImportFormat(format!("recording {}: missing name", i)));
            }
            if !entry.get("events").is_some_and(Value::is_array) {
                return Err(Error::ImportFormat(format!("recording {}: missing events", i)));
            }
            serde_json::from_value(entry.clone())
                .map_err(|e| Error::ImportFormat(format!("recording {}: {}", i, e)))
        })
        .collect()
}

/// How an export is written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// The importable [`ExportBundle`].
    #[default]
    Json,
    /// One row per event, for spreadsheets. Not importable.
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unknown format '{}' (expected json or csv)", other)),
        }
    }
}

const CSV_HEADER: [&str; 6] = [
    "Recording Name",
    "Event Type",
    "Selector",
    "Value",
    "URL",
    "Timestamp",
];

/// Flatten recordings to CSV, one row per event.
///
/// Every cell is quoted. Timestamps are UTC ISO-8601 with milliseconds.
pub fn to_csv(recordings: &[Recording]) -> String {
    let mut out = csv_row(&CSV_HEADER);
    for recording in recordings {
        for event in &recording.events {
            let value = match &event.kind {
                EventKind::Input(input) => input.value.clone(),
                EventKind::Change(change) => match &change.value {
                    ChangeValue::Text(text) => text.clone(),
                    ChangeValue::Checked(checked) => checked.to_string(),
                },
                _ => String::new(),
            };
            let timestamp = chrono::DateTime::from_timestamp_millis(event.timestamp as i64)
                .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
                .unwrap_or_default();
            out.push_str(&csv_row(&[
                &recording.name,
                event.kind.name(),
                event.selector().map_or("", |s| s.primary.as_str()),
                &value,
                &event.url,
                &timestamp,
            ]));
        }
    }
    out
}

fn csv_row(cells: &[&str]) -> String {
    let quoted: Vec<String> = cells
        .iter()
        .map(|cell| format!("\"{}\"", cell.replace('"', "\"\"")))
        .collect();
    format!("{}\n", quoted.join(","))
}

/// `0 Bytes`, `512 Bytes`, `1.5 KB`, `2 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".into();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

/// In-memory store for tests and one-shot sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn list(&self) -> Result<Vec<Recording>> {
        Ok(self.data.lock().await.recordings.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Recording>> {
        Ok(self.data.lock().await.get(id))
    }

    async fn save(&self, recording: Recording) -> Result<Recording> {
        self.data.lock().await.save(recording.clone());
        Ok(recording)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.data.lock().await.delete(id))
    }

    async fn update(&self, id: &str, patch: RecordingPatch) -> Result<Option<Recording>> {
        Ok(self.data.lock().await.update(id, patch))
    }

    async fn settings(&self) -> Result<Settings> {
        Ok(self.data.lock().await.settings.clone())
    }

    async fn set_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        Ok(self.data.lock().await.set_settings(patch))
    }

    async fn export(&self, ids: Option<&[String]>) -> Result<ExportBundle> {
        Ok(self.data.lock().await.export(ids))
    }

    async fn import(&self, json: &str) -> Result<ImportSummary> {
        let incoming = parse_import(json)?;
        Ok(self.data.lock().await.import(incoming))
    }

    async fn usage(&self) -> Result<StorageUsage> {
        self.data.lock().await.usage()
    }
}

/// A single JSON document on disk. Every change rewrites the file through a
/// temporary sibling and a rename, so readers never see a partial write.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::Storage(format!("{} is not a recording store: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };
        debug!("Opened store {}", path.display());
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, data: &StoreData) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(data)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Apply `change` to a copy, persist it, then commit it in memory.
    async fn modify<T>(&self, change: impl FnOnce(&mut StoreData) -> T) -> Result<T> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        let out = change(&mut next);
        self.write(&next).await?;
        *data = next;
        Ok(out)
    }
}

#[async_trait]
impl Storage for JsonFileStore {
    async fn list(&self) -> Result<Vec<Recording>> {
        Ok(self.data.lock().await.recordings.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Recording>> {
        Ok(self.data.lock().await.get(id))
    }

    async fn save(&self, recording: Recording) -> Result<Recording> {
        let id = recording.id.clone();
        self.modify(|data| data.save(recording.clone())).await?;
        info!("Saved recording {}", id);
        Ok(recording)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.modify(|data| data.delete(id)).await
    }

    async fn update(&self, id: &str, patch: RecordingPatch) -> Result<Option<Recording>> {
        self.modify(|data| data.update(id, patch)).await
    }

    async fn settings(&self) -> Result<Settings> {
        Ok(self.data.lock().await.settings.clone())
    }

    async fn set_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        self.modify(|data| data.set_settings(patch)).await
    }

    async fn export(&self, ids: Option<&[String]>) -> Result<ExportBundle> {
        Ok(self.data.lock().await.export(ids))
    }

    async fn import(&self, json: &str) -> Result<ImportSummary> {
        let incoming = parse_import(json)?;
        let summary = self.modify(|data| data.import(incoming)).await?;
        info!(
            "Imported {} recordings ({} skipped)",
            summary.imported, summary.skipped
        );
        Ok(summary)
    }

    async fn usage(&self) -> Result<StorageUsage> {
        self.data.lock().await.usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recording(id: &str, name: &str) -> Recording {
        Recording {
            id: id.into(),
            name: name.into(),
            created: 1,
            duration: 0,
            url: "https://a.test/".into(),
            events: vec![],
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_memory_crud() {
        let store = MemoryStore::new();
        store.save(recording("a", "First")).await.unwrap();
        store.save(recording("b", "Second")).await.unwrap();
        store.save(recording("a", "First again")).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "First again");

        let renamed = store
            .update("b", RecordingPatch::rename("Renamed"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.name, "Renamed");
        assert!(store.update("zzz", RecordingPatch::rename("x")).await.unwrap().is_none());

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.get("b").await.unwrap().unwrap().name, "Renamed");
    }

    #[tokio::test]
    async fn test_import_skips_existing_id() {
        let store = MemoryStore::new();
        store.save(recording("x", "Mine")).await.unwrap();
        let payload = json!({"recordings": [{"id": "x", "name": "Theirs", "events": []}]});
        let summary = store.import(&payload.to_string()).await.unwrap();
        assert_eq!(summary, ImportSummary { imported: 0, skipped: 1 });
        assert_eq!(store.get("x").await.unwrap().unwrap().name, "Mine");
    }

    #[tokio::test]
    async fn test_import_dedupes_within_payload() {
        let store = MemoryStore::new();
        let payload = json!({"version": "1.0.0", "recordings": [
            {"id": "y", "name": "One", "events": []},
            {"id": "y", "name": "Two", "events": []},
            {"id": "z", "name": "Three", "events": [
                {"type": "scroll", "timestamp": 1, "url": "https://a.test/",
                 "scrollPosition": {"x": 0, "y": 10}}
            ]}
        ]});
        let summary = store.import(&payload.to_string()).await.unwrap();
        assert_eq!(summary, ImportSummary { imported: 2, skipped: 1 });
        assert_eq!(store.get("y").await.unwrap().unwrap().name, "One");
        assert_eq!(store.get("z").await.unwrap().unwrap().events.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_import_persists_nothing() {
        let store = MemoryStore::new();
        let cases = [
            "not json".to_string(),
            json!({"items": []}).to_string(),
            json!({"recordings": {"id": "a"}}).to_string(),
            json!({"recordings": [{"id": "a", "name": "A", "events": []}, {"name": "B", "events": []}]})
                .to_string(),
            json!({"recordings": [{"id": "a", "events": []}]}).to_string(),
            json!({"recordings": [{"id": "a", "name": "A"}]}).to_string(),
            json!({"recordings": [{"id": "a", "name": "A", "events": [{"type": "hover"}]}]})
                .to_string(),
        ];
        for case in &cases {
            let err = store.import(case).await.unwrap_err();
            assert!(matches!(err, Error::ImportFormat(_)), "{}", case);
        }
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_filters_by_id() {
        let store = MemoryStore::new();
        store.save(recording("a", "A")).await.unwrap();
        store.save(recording("b", "B")).await.unwrap();

        let all = store.export(None).await.unwrap();
        assert_eq!(all.version, "1.0.0");
        assert_eq!(all.recordings.len(), 2);

        let some = store.export(Some(&["b".to_string()])).await.unwrap();
        assert_eq!(some.recordings.len(), 1);
        assert_eq!(some.recordings[0].id, "b");

        // an exported bundle imports cleanly elsewhere
        let other = MemoryStore::new();
        let json = serde_json::to_string(&all).unwrap();
        assert_eq!(other.import(&json).await.unwrap().imported, 2);
    }

    #[tokio::test]
    async fn test_settings_defaults_and_merge() {
        let store = MemoryStore::new();
        let settings = store.settings().await.unwrap();
        assert_eq!(settings.hotkey, "Ctrl+Shift+R");
        assert_eq!(settings.playback_speed, Speed::RealTime);
        assert!(!settings.auto_export);

        let updated = store
            .set_settings(SettingsPatch {
                playback_speed: Some(Speed::Fast),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.playback_speed, Speed::Fast);
        assert_eq!(updated.hotkey, "Ctrl+Shift+R");
    }

    #[test]
    fn test_csv_rows() {
        use crate::model::{ChangeEvent, ClickEvent, InputEvent, NavigateEvent, Point, SelectorDescriptor};

        let sel = |primary: &str| SelectorDescriptor {
            primary: primary.into(),
            fallbacks: vec![],
        };
        let mut r = recording("a", "Sign \"up\"");
        r.events = vec![
            InteractionEvent::new(
                1_700_000_000_000,
                "https://a.test/",
                EventKind::Navigate(NavigateEvent::default()),
            ),
            InteractionEvent::new(
                1_700_000_000_250,
                "https://a.test/",
                EventKind::Input(InputEvent {
                    selector: sel("#name"),
                    value: "Ann, B".into(),
                    input_type: "text".into(),
                }),
            ),
            InteractionEvent::new(
                1_700_000_000_500,
                "https://a.test/",
                EventKind::Change(ChangeEvent {
                    selector: sel("#agree"),
                    value: ChangeValue::Checked(true),
                    input_type: "checkbox".into(),
                }),
            ),
            InteractionEvent::new(
                1_700_000_001_000,
                "https://a.test/",
                EventKind::Click(ClickEvent {
                    selector: sel("#go"),
                    coordinates: Point::default(),
                    scroll_position: Point::default(),
                    target_text: "Go".into(),
                    target_tag: "button".into(),
                }),
            ),
        ];

        let csv = to_csv(&[r, recording("b", "Empty")]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                r##""Recording Name","Event Type","Selector","Value","URL","Timestamp""##,
                r##""Sign ""up""","navigate","","","https://a.test/","2023-11-14T22:13:20.000Z""##,
                r##""Sign ""up""","input","#name","Ann, B","https://a.test/","2023-11-14T22:13:20.250Z""##,
                r##""Sign ""up""","change","#agree","true","https://a.test/","2023-11-14T22:13:20.500Z""##,
                r##""Sign ""up""","click","#go","","https://a.test/","2023-11-14T22:13:21.000Z""##,
            ]
        );
        assert!(csv.ends_with('\n'));
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("CSV".parse::<ExportFormat>(), Ok(ExportFormat::Csv));
        assert_eq!("json".parse::<ExportFormat>(), Ok(ExportFormat::Json));
        assert!("xml".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::default().to_string(), "json");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(512), "512 Bytes");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5 MB");
    }

    #[tokio::test]
    async fn test_usage_counts_recordings() {
        let store = MemoryStore::new();
        let empty = store.usage().await.unwrap();
        store.save(recording("a", "A")).await.unwrap();
        let usage = store.usage().await.unwrap();
        assert_eq!(usage.recording_count, 1);
        assert!(usage.bytes > empty.bytes);
        assert!(usage.formatted.ends_with("Bytes"));
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        {
            let store = JsonFileStore::open(&path).unwrap();
            assert!(store.list().await.unwrap().is_empty());
            store.save(recording("a", "A")).await.unwrap();
            store
                .set_settings(SettingsPatch {
                    auto_export: Some(true),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().name, "A");
        assert!(store.settings().await.unwrap().auto_export);
        assert!(!path.with_extension("json.tmp").exists());

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["settings"]["playbackSpeed"], "real-time");
        assert_eq!(raw["recordings"][0]["id"], "a");
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(JsonFileStore::open(&path), Err(Error::Storage(_))));
    }
}
