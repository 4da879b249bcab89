//! Recording data model.
//!
//! JSON field names follow the portable export format (`type`, `selector`,
//! `fallbackSelectors`, camelCase payload keys) so recordings move between
//! tools unchanged.

use crate::playback::Speed;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Format version written into export bundles.
pub const EXPORT_VERSION: &str = "1.0.0";

/// Ranked selectors for one element. Strings starting with `//` are XPath,
/// everything else is CSS. The last fallback is the positional XPath.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectorDescriptor {
    #[serde(rename = "selector")]
    pub primary: String,
    #[serde(rename = "fallbackSelectors", default)]
    pub fallbacks: Vec<String>,
}

impl SelectorDescriptor {
    /// Split an ordered candidate list into primary and fallbacks.
    pub fn from_candidates(mut candidates: Vec<String>) -> Option<Self> {
        if candidates.is_empty() {
            return None;
        }
        let primary = candidates.remove(0);
        Some(Self {
            primary,
            fallbacks: candidates,
        })
    }

    /// Primary first, then fallbacks in order.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }

    pub fn is_xpath(candidate: &str) -> bool {
        candidate.starts_with("//")
    }
}

impl fmt::Display for SelectorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        if !self.fallbacks.is_empty() {
            write!(f, " (+{} fallbacks)", self.fallbacks.len())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// One captured interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    /// Epoch milliseconds at capture.
    pub timestamp: u64,
    /// Page URL at capture.
    pub url: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl InteractionEvent {
    pub fn new(timestamp: u64, url: impl Into<String>, kind: EventKind) -> Self {
        Self {
            timestamp,
            url: url.into(),
            kind,
        }
    }

    /// Target selector, for variants that address an element.
    pub fn selector(&self) -> Option<&SelectorDescriptor> {
        match &self.kind {
            EventKind::Click(e) => Some(&e.selector),
            EventKind::Input(e) => Some(&e.selector),
            EventKind::Change(e) => Some(&e.selector),
            EventKind::Submit(e) => Some(&e.selector),
            EventKind::Navigate(_)
            | EventKind::Scroll(_)
            | EventKind::Keydown(_)
            | EventKind::Mousemove(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventKind {
    Navigate(NavigateEvent),
    Click(ClickEvent),
    Input(InputEvent),
    Change(ChangeEvent),
    Scroll(ScrollEvent),
    Keydown(KeydownEvent),
    Submit(SubmitEvent),
    Mousemove(MousemoveEvent),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Navigate(_) => "navigate",
            EventKind::Click(_) => "click",
            EventKind::Input(_) => "input",
            EventKind::Change(_) => "change",
            EventKind::Scroll(_) => "scroll",
            EventKind::Keydown(_) => "keydown",
            EventKind::Submit(_) => "submit",
            EventKind::Mousemove(_) => "mousemove",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    #[serde(flatten)]
    pub selector: SelectorDescriptor,
    /// Client coordinates of the pointer.
    pub coordinates: Point,
    #[serde(default)]
    pub scroll_position: Point,
    #[serde(default)]
    pub target_text: String,
    #[serde(default)]
    pub target_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEvent {
    #[serde(flatten)]
    pub selector: SelectorDescriptor,
    pub value: String,
    #[serde(default = "default_input_type")]
    pub input_type: String,
}

fn default_input_type() -> String {
    "text".into()
}

/// `select` elements record their value, checkboxes and radios their state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeValue {
    Checked(bool),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    #[serde(flatten)]
    pub selector: SelectorDescriptor,
    pub value: ChangeValue,
    #[serde(default)]
    pub input_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollEvent {
    pub scroll_position: Point,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeydownEvent {
    pub key: String,
    #[serde(default)]
    pub ctrl_key: bool,
    #[serde(default)]
    pub meta_key: bool,
    #[serde(default)]
    pub shift_key: bool,
    #[serde(default)]
    pub alt_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEvent {
    #[serde(flatten)]
    pub selector: SelectorDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MousemoveEvent {
    pub coordinates: Point,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
}

/// A named, ordered event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub name: String,
    /// Epoch milliseconds.
    #[serde(default)]
    pub created: u64,
    /// Milliseconds between start and stop.
    #[serde(default)]
    pub duration: u64,
    /// URL of the first captured event.
    #[serde(default)]
    pub url: String,
    pub events: Vec<InteractionEvent>,
    #[serde(default)]
    pub metadata: RecordingMetadata,
}

impl Recording {
    /// Empty recording with a fresh id and a dated default name.
    pub fn new(created: u64) -> Self {
        Self {
            id: Self::generate_id(created),
            name: Self::default_name(created),
            created,
            duration: 0,
            url: String::new(),
            events: Vec::new(),
            metadata: RecordingMetadata::default(),
        }
    }

    /// `rec_<epoch-ms>_<9 random hex chars>`.
    pub fn generate_id(now: u64) -> String {
        let random = uuid::Uuid::new_v4().simple().to_string();
        format!("rec_{}_{}", now, &random[..9])
    }

    pub fn default_name(now: u64) -> String {
        let date = chrono::DateTime::from_timestamp_millis(now as i64)
            .map(|d| d.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| now.to_string());
        format!("Recording {}", date)
    }

    /// Append an event, filling the recording URL and the environment
    /// metadata from the first events that carry them.
    pub fn push_event(&mut self, event: InteractionEvent) {
        if self.url.is_empty() && !event.url.is_empty() {
            self.url = event.url.clone();
        }
        if let EventKind::Navigate(ref nav) = event.kind {
            if self.metadata.user_agent.is_none() {
                self.metadata.user_agent = nav.user_agent.clone();
            }
            if self.metadata.viewport.is_none() {
                self.metadata.viewport = nav.viewport;
            }
        }
        self.events.push(event);
    }

    /// Timestamps never decrease.
    pub fn is_ordered(&self) -> bool {
        self.events
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp)
    }
}

/// Remaining work handed from one page instance to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPlayback {
    pub events_tail: Vec<InteractionEvent>,
    pub resume_index: usize,
    #[serde(default)]
    pub speed: Speed,
}

/// Portable file format for moving recordings between stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: String,
    pub export_date: String,
    pub recordings: Vec<Recording>,
}

impl ExportBundle {
    pub fn new(recordings: Vec<Recording>) -> Self {
        Self {
            version: EXPORT_VERSION.into(),
            export_date: chrono::Utc::now().to_rfc3339(),
            recordings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(primary: &str) -> SelectorDescriptor {
        SelectorDescriptor {
            primary: primary.into(),
            fallbacks: vec!["//html[1]/body[1]/button[1]".into()],
        }
    }

    #[test]
    fn test_click_json_shape() {
        let event = InteractionEvent::new(
            1000,
            "https://example.com/",
            EventKind::Click(ClickEvent {
                selector: descriptor("#submit"),
                coordinates: Point::new(10.0, 20.0),
                scroll_position: Point::default(),
                target_text: "Submit".into(),
                target_tag: "button".into(),
            }),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "click");
        assert_eq!(value["selector"], "#submit");
        assert_eq!(value["fallbackSelectors"][0], "//html[1]/body[1]/button[1]");
        assert_eq!(value["coordinates"]["x"], 10.0);
        assert_eq!(value["targetTag"], "button");
        assert_eq!(value["timestamp"], 1000);
    }

    #[test]
    fn test_parse_exported_events() {
        let value = json!([
            {"type": "navigate", "timestamp": 1, "url": "https://a.test/", "userAgent": "UA",
             "viewport": {"width": 800, "height": 600}},
            {"type": "change", "timestamp": 2, "url": "https://a.test/", "selector": "#agree",
             "fallbackSelectors": [], "value": true, "inputType": "checkbox"},
            {"type": "change", "timestamp": 3, "url": "https://a.test/", "selector": "#size",
             "value": "xl", "inputType": "select"},
            {"type": "keydown", "timestamp": 4, "url": "https://a.test/", "key": "c", "ctrlKey": true},
            {"type": "input", "timestamp": 5, "url": "https://a.test/", "selector": "#q", "value": "hi"}
        ]);
        let events: Vec<InteractionEvent> = serde_json::from_value(value).unwrap();
        assert_eq!(events.len(), 5);

        if let EventKind::Navigate(ref nav) = events[0].kind {
            assert_eq!(nav.user_agent.as_deref(), Some("UA"));
            assert_eq!(nav.viewport, Some(Viewport { width: 800, height: 600 }));
        } else {
            panic!("Expected Navigate event");
        }

        if let EventKind::Change(ref c) = events[1].kind {
            assert_eq!(c.value, ChangeValue::Checked(true));
        } else {
            panic!("Expected Change event");
        }

        if let EventKind::Change(ref c) = events[2].kind {
            assert_eq!(c.value, ChangeValue::Text("xl".into()));
            assert!(c.selector.fallbacks.is_empty());
        } else {
            panic!("Expected Change event");
        }

        if let EventKind::Keydown(ref k) = events[3].kind {
            assert!(k.ctrl_key);
            assert!(!k.meta_key);
        } else {
            panic!("Expected Keydown event");
        }

        if let EventKind::Input(ref i) = events[4].kind {
            assert_eq!(i.input_type, "text");
        } else {
            panic!("Expected Input event");
        }
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let value = json!({"type": "hover", "timestamp": 1, "url": "https://a.test/"});
        assert!(serde_json::from_value::<InteractionEvent>(value).is_err());
    }

    #[test]
    fn test_generated_id_format() {
        let id = Recording::generate_id(1700000000000);
        assert!(id.starts_with("rec_1700000000000_"));
        assert_eq!(id.len(), "rec_1700000000000_".len() + 9);
        assert_ne!(id, Recording::generate_id(1700000000000));
    }

    #[test]
    fn test_push_event_fills_url_and_metadata() {
        let mut rec = Recording::new(0);
        rec.push_event(InteractionEvent::new(
            1,
            "https://a.test/start",
            EventKind::Navigate(NavigateEvent {
                user_agent: Some("UA".into()),
                viewport: Some(Viewport {
                    width: 1024,
                    height: 768,
                }),
            }),
        ));
        rec.push_event(InteractionEvent::new(
            2,
            "https://a.test/other",
            EventKind::Navigate(NavigateEvent::default()),
        ));
        assert_eq!(rec.url, "https://a.test/start");
        assert_eq!(rec.metadata.user_agent.as_deref(), Some("UA"));
        assert_eq!(rec.events.len(), 2);
        assert!(rec.is_ordered());
    }

    #[test]
    fn test_is_ordered_detects_regression() {
        let mut rec = Recording::new(0);
        for ts in [5, 3] {
            rec.events.push(InteractionEvent::new(
                ts,
                "",
                EventKind::Mousemove(MousemoveEvent {
                    coordinates: Point::default(),
                }),
            ));
        }
        assert!(!rec.is_ordered());
    }

    #[test]
    fn test_pending_playback_defaults_speed() {
        let pending: PendingPlayback =
            serde_json::from_value(json!({"eventsTail": [], "resumeIndex": 0})).unwrap();
        assert_eq!(pending.speed, Speed::RealTime);
    }

    #[test]
    fn test_descriptor_candidates_order() {
        let d = descriptor("#a");
        let all: Vec<&str> = d.candidates().collect();
        assert_eq!(all, vec!["#a", "//html[1]/body[1]/button[1]"]);
        assert!(SelectorDescriptor::is_xpath(all[1]));
        assert_eq!(d.to_string(), "#a (+1 fallbacks)");
    }
}
