//! Event capture.
//!
//! [`Recorder`] consumes [`RawEvent`]s from whatever listens to the page and
//! emits typed [`InteractionEvent`]s on an unbounded channel. Time advances
//! only through event timestamps and explicit [`Recorder::tick`] calls, so a
//! given input sequence always produces the same output.

pub mod limit;
mod raw;

pub use raw::{ElementSnapshot, Modifiers, RawEvent, RawKind};

use crate::config::CaptureConfig;
use crate::model::{
    ChangeEvent, ChangeValue, ClickEvent, EventKind, InputEvent, InteractionEvent, KeydownEvent,
    NavigateEvent, Point, ScrollEvent, SelectorDescriptor, SubmitEvent,
};
use crate::page::{ElementState, LineageEntry, Page};
use crate::{selector, Result};
use limit::{Debounce, MinInterval, Throttle};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Recording,
    Paused,
    Stopped,
}

#[derive(Debug, Clone)]
struct PendingInput<N> {
    node: N,
    selector: SelectorDescriptor,
    input_type: String,
    /// Field value and location at the last keystroke, when the listener
    /// captured them. Otherwise both are read when the debounce fires.
    value: Option<String>,
    url: Option<String>,
}

pub struct Recorder<P: Page> {
    page: Arc<P>,
    config: CaptureConfig,
    sink: UnboundedSender<InteractionEvent>,
    state: CaptureState,
    clock: u64,
    last_url: String,
    input: Debounce<PendingInput<P::Node>>,
    scroll: Throttle,
    spacing: MinInterval,
    emitted: usize,
    dropped: usize,
}

impl<P: Page> Recorder<P> {
    pub fn new(page: Arc<P>, config: CaptureConfig, sink: UnboundedSender<InteractionEvent>) -> Self {
        Self {
            input: Debounce::new(config.input_debounce_ms),
            scroll: Throttle::new(config.scroll_throttle_ms),
            spacing: MinInterval::new(config.min_event_interval_ms),
            page,
            config,
            sink,
            state: CaptureState::Idle,
            clock: 0,
            last_url: String::new(),
            emitted: 0,
            dropped: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Events sent to the sink so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Events rejected by the global spacing limit.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Begin capturing and emit the initial `navigate` with the environment.
    pub async fn start(&mut self, now: u64) -> Result<()> {
        if self.state == CaptureState::Recording {
            return Ok(());
        }
        self.input.clear();
        self.scroll.reset();
        self.spacing.reset();
        self.clock = now;
        self.state = CaptureState::Recording;

        let url = self.page.url().await?;
        self.last_url = url.clone();
        let user_agent = self.page.user_agent().await?;
        let viewport = self.page.viewport().await?;
        info!("Recording started on {}", url);
        self.emit(InteractionEvent::new(
            now,
            url,
            EventKind::Navigate(NavigateEvent {
                user_agent: Some(user_agent),
                viewport: Some(viewport),
            }),
        ));
        Ok(())
    }

    /// Stop emitting until [`resume`](Self::resume). Shaping state is
    /// discarded.
    pub fn pause(&mut self) {
        if self.state == CaptureState::Recording {
            self.input.clear();
            self.scroll.reset();
            self.state = CaptureState::Paused;
            info!("Recording paused");
        }
    }

    pub async fn resume(&mut self, now: u64) -> Result<()> {
        if self.state == CaptureState::Paused {
            self.advance(now);
            // URL changes while paused are not reported.
            self.last_url = self.page.url().await?;
            self.state = CaptureState::Recording;
            info!("Recording resumed");
        }
        Ok(())
    }

    /// Flush due work and any pending input, then ignore further events.
    pub async fn stop(&mut self, now: u64) -> Result<()> {
        if self.state == CaptureState::Recording {
            self.tick(now).await?;
            if let Some(pending) = self.input.take() {
                let at = self.clock;
                self.emit_input(pending, at).await?;
            }
        }
        self.scroll.reset();
        self.state = CaptureState::Stopped;
        info!(
            "Recording stopped ({} events, {} dropped)",
            self.emitted, self.dropped
        );
        Ok(())
    }

    fn advance(&mut self, now: u64) -> u64 {
        self.clock = self.clock.max(now);
        self.clock
    }

    /// Fire debounced input and trailing scroll samples due by `now`, in
    /// time order.
    pub async fn tick(&mut self, now: u64) -> Result<()> {
        let now = self.advance(now);
        if self.state != CaptureState::Recording {
            return Ok(());
        }
        loop {
            let input_due = self.input.due().filter(|due| *due <= now);
            let scroll_due = self.scroll.due().filter(|due| *due <= now);
            match (input_due, scroll_due) {
                (Some(i), s) if s.map_or(true, |s| i <= s) => {
                    if let Some((at, pending)) = self.input.poll(now) {
                        self.emit_input(pending, at).await?;
                    }
                }
                (_, Some(_)) => {
                    if let Some(at) = self.scroll.poll(now) {
                        self.emit_scroll(at).await?;
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Process one raw interaction.
    pub async fn handle(&mut self, raw: RawEvent<P::Node>) -> Result<()> {
        self.tick(raw.at).await?;
        if self.state != CaptureState::Recording {
            return Ok(());
        }
        let now = self.clock;
        let RawEvent {
            kind,
            target,
            snapshot,
            ..
        } = raw;

        if let Some(ref target) = target {
            let excluded = match &snapshot {
                Some(snapshot) => self.on_control_surface(&snapshot.lineage),
                None => self.on_control_surface(&self.page.lineage(target).await?),
            };
            if excluded {
                debug!("Ignoring {:?} on the control surface", kind);
                return Ok(());
            }
        }

        let snapshot = snapshot.as_ref();
        match (kind, target) {
            (RawKind::Click { client }, Some(target)) => {
                self.on_click(now, target, client, snapshot).await
            }
            (RawKind::Input, Some(target)) => self.on_input(now, target, snapshot).await,
            (RawKind::Change, Some(target)) => self.on_change(now, target, snapshot).await,
            (RawKind::Submit, Some(form)) => {
                let selector = self.selector_for(&form, snapshot).await?;
                let url = self.url_at(snapshot).await?;
                self.emit(InteractionEvent::new(
                    now,
                    url,
                    EventKind::Submit(SubmitEvent { selector }),
                ));
                Ok(())
            }
            (RawKind::Scroll, _) => {
                if self.scroll.hit(now) {
                    self.emit_scroll(now).await?;
                }
                Ok(())
            }
            (RawKind::Keydown { key, modifiers }, _) => {
                if self.is_shortcut(&key, modifiers) {
                    let url = self.page.url().await?;
                    self.emit(InteractionEvent::new(
                        now,
                        url,
                        EventKind::Keydown(KeydownEvent {
                            key,
                            ctrl_key: modifiers.ctrl,
                            meta_key: modifiers.meta,
                            shift_key: modifiers.shift,
                            alt_key: modifiers.alt,
                        }),
                    ));
                }
                Ok(())
            }
            (RawKind::Mutation, _) => self.on_mutation(now).await,
            (kind, None) => {
                debug!("Ignoring untargeted {:?}", kind);
                Ok(())
            }
        }
    }

    fn on_control_surface(&self, lineage: &[LineageEntry]) -> bool {
        let class = self.config.control_surface_class.as_str();
        lineage
            .iter()
            .any(|level| level.classes.iter().any(|c| c == class))
    }

    async fn selector_for(
        &self,
        target: &P::Node,
        snapshot: Option<&ElementSnapshot>,
    ) -> Result<SelectorDescriptor> {
        match snapshot {
            Some(snapshot) => selector::describe(&snapshot.lineage, snapshot.unique),
            None => selector::generate(self.page.as_ref(), target).await,
        }
    }

    async fn state_of(
        &self,
        target: &P::Node,
        snapshot: Option<&ElementSnapshot>,
    ) -> Result<ElementState> {
        match snapshot {
            Some(snapshot) => Ok(snapshot.state.clone()),
            None => self.page.element_state(target).await,
        }
    }

    async fn url_at(&self, snapshot: Option<&ElementSnapshot>) -> Result<String> {
        match snapshot {
            Some(snapshot) => Ok(snapshot.url.clone()),
            None => self.page.url().await,
        }
    }

    fn is_shortcut(&self, key: &str, modifiers: Modifiers) -> bool {
        if !(modifiers.ctrl || modifiers.meta) {
            return false;
        }
        let mut chars = key.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => self
                .config
                .shortcut_keys
                .to_lowercase()
                .contains(c.to_ascii_lowercase()),
            _ => false,
        }
    }

    async fn on_click(
        &mut self,
        now: u64,
        target: P::Node,
        client: Point,
        snapshot: Option<&ElementSnapshot>,
    ) -> Result<()> {
        let selector = self.selector_for(&target, snapshot).await?;
        let state = self.state_of(&target, snapshot).await?;
        let scroll_position = match snapshot {
            Some(snapshot) => snapshot.scroll,
            None => self.page.scroll_position().await?,
        };
        let url = self.url_at(snapshot).await?;
        let target_text: String = state
            .text
            .trim()
            .chars()
            .take(self.config.text_limit)
            .collect();
        self.emit(InteractionEvent::new(
            now,
            url,
            EventKind::Click(ClickEvent {
                selector,
                coordinates: client,
                scroll_position,
                target_text,
                target_tag: state.tag,
            }),
        ));
        Ok(())
    }

    async fn on_input(
        &mut self,
        now: u64,
        target: P::Node,
        snapshot: Option<&ElementSnapshot>,
    ) -> Result<()> {
        let state = self.state_of(&target, snapshot).await?;
        let input_type = state.input_type.clone().unwrap_or_else(|| "text".into());
        let typed = match state.tag.as_str() {
            "textarea" => true,
            "input" => !matches!(input_type.as_str(), "checkbox" | "radio"),
            _ => false,
        };
        if !typed {
            return Ok(());
        }

        let value = snapshot.map(|s| s.state.value.clone());
        let url = snapshot.map(|s| s.url.clone());
        if self.input.peek().is_some_and(|p| p.node == target) {
            // Same field: only restart the quiet period.
            if let Some(mut pending) = self.input.take() {
                pending.value = value;
                pending.url = url;
                self.input.push(now, pending);
            }
            return Ok(());
        }

        let selector = self.selector_for(&target, snapshot).await?;
        let replaced = self.input.push(
            now,
            PendingInput {
                node: target,
                selector,
                input_type,
                value,
                url,
            },
        );
        if let Some(previous) = replaced {
            // Typing moved to another field: capture the old one now.
            self.emit_input(previous, now).await?;
        }
        Ok(())
    }

    async fn emit_input(&mut self, pending: PendingInput<P::Node>, at: u64) -> Result<()> {
        let value = match pending.value {
            Some(value) => value,
            None => match self.page.element_state(&pending.node).await {
                Ok(state) => state.value,
                Err(e) => {
                    warn!("Dropping input for {}: {}", pending.selector, e);
                    return Ok(());
                }
            },
        };
        let url = match pending.url {
            Some(url) => url,
            None => self.page.url().await?,
        };
        self.emit(InteractionEvent::new(
            at,
            url,
            EventKind::Input(InputEvent {
                selector: pending.selector,
                value,
                input_type: pending.input_type,
            }),
        ));
        Ok(())
    }

    async fn on_change(
        &mut self,
        now: u64,
        target: P::Node,
        snapshot: Option<&ElementSnapshot>,
    ) -> Result<()> {
        let state = self.state_of(&target, snapshot).await?;
        let input_type = state.input_type.clone().unwrap_or_else(|| state.tag.clone());
        let value = match (state.tag.as_str(), input_type.as_str()) {
            ("select", _) => ChangeValue::Text(state.value),
            ("input", "checkbox" | "radio") => ChangeValue::Checked(state.checked),
            _ => return Ok(()),
        };
        let selector = self.selector_for(&target, snapshot).await?;
        let url = self.url_at(snapshot).await?;
        self.emit(InteractionEvent::new(
            now,
            url,
            EventKind::Change(ChangeEvent {
                selector,
                value,
                input_type,
            }),
        ));
        Ok(())
    }

    async fn emit_scroll(&mut self, at: u64) -> Result<()> {
        let scroll_position = self.page.scroll_position().await?;
        let viewport = self.page.viewport().await?;
        let url = self.page.url().await?;
        self.emit(InteractionEvent::new(
            at,
            url,
            EventKind::Scroll(ScrollEvent {
                scroll_position,
                viewport: Some(viewport),
            }),
        ));
        Ok(())
    }

    async fn on_mutation(&mut self, now: u64) -> Result<()> {
        let url = self.page.url().await?;
        if url == self.last_url {
            return Ok(());
        }
        debug!("URL changed without a load: {} -> {}", self.last_url, url);
        self.last_url = url.clone();
        self.emit(InteractionEvent::new(
            now,
            url,
            EventKind::Navigate(NavigateEvent::default()),
        ));
        Ok(())
    }

    fn emit(&mut self, event: InteractionEvent) {
        if !self.spacing.admit(event.timestamp) {
            self.dropped += 1;
            debug!("Dropped {} at {} (too close to previous)", event.kind.name(), event.timestamp);
            return;
        }
        self.emitted += 1;
        debug!("Captured {} at {}", event.kind.name(), event.timestamp);
        if self.sink.send(event).is_err() {
            debug!("Capture sink closed; event discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessPage;
    use eoka_dom::{Document, El, NodeId};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Fixture {
        page: Arc<HeadlessPage>,
        recorder: Recorder<HeadlessPage>,
        rx: UnboundedReceiver<InteractionEvent>,
        name: NodeId,
        email: NodeId,
        button: NodeId,
        agree: NodeId,
        size: NodeId,
        overlay_button: NodeId,
    }

    impl Fixture {
        async fn new() -> Self {
            let page = Arc::new(HeadlessPage::new(Document::new("https://shop.test/")));
            let (name, email, button, agree, size, overlay_button) = page
                .with_document(|doc| {
                    let body = doc.body();
                    let form = doc.append(
                        body,
                        El::new("form")
                            .id("signup")
                            .child(El::new("input").id("name"))
                            .child(El::new("input").id("email").attr("type", "email"))
                            .child(El::new("input").id("agree").attr("type", "checkbox"))
                            .child(El::new("select").id("size").value("m"))
                            .child(El::new("button").id("go").text("   Create a rather long account name   ")),
                    );
                    let kids = doc.children(form).to_vec();
                    let overlay = doc.append(
                        body,
                        El::new("div")
                            .class("eoka-replay-overlay")
                            .child(El::new("button").text("Stop")),
                    );
                    let overlay_button = doc.children(overlay)[0];
                    (kids[0], kids[1], kids[4], kids[2], kids[3], overlay_button)
                })
                .await;
            let (tx, rx) = mpsc::unbounded_channel();
            let recorder = Recorder::new(page.clone(), CaptureConfig::default(), tx);
            Self {
                page,
                recorder,
                rx,
                name,
                email,
                button,
                agree,
                size,
                overlay_button,
            }
        }

        async fn started() -> Self {
            let mut f = Self::new().await;
            f.recorder.start(1000).await.unwrap();
            f.drain();
            f
        }

        fn drain(&mut self) -> Vec<InteractionEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                out.push(event);
            }
            out
        }

        async fn type_into(&mut self, node: NodeId, at: u64, value: &str) {
            self.page.with_document(|doc| doc.set_value(node, value)).await;
            self.recorder.handle(RawEvent::input(at, node)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_start_emits_navigate_with_environment() {
        let mut f = Fixture::new().await;
        f.recorder.start(1000).await.unwrap();
        let events = f.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].url, "https://shop.test/");
        if let EventKind::Navigate(ref nav) = events[0].kind {
            assert!(nav.user_agent.is_some());
            assert_eq!(nav.viewport.map(|v| v.width), Some(1280));
        } else {
            panic!("Expected Navigate event");
        }
        assert_eq!(f.recorder.state(), CaptureState::Recording);
    }

    #[tokio::test]
    async fn test_keystroke_burst_becomes_one_input() {
        let mut f = Fixture::started().await;
        let name = f.name;
        f.type_into(name, 2000, "h").await;
        f.type_into(name, 2100, "hi").await;
        f.recorder.tick(2399).await.unwrap();
        assert!(f.drain().is_empty());

        // Value is read when the debounce fires, not at the keystroke.
        f.page.with_document(|doc| doc.set_value(name, "hi!")).await;
        f.recorder.tick(2400).await.unwrap();
        let events = f.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, 2400);
        if let EventKind::Input(ref input) = events[0].kind {
            assert_eq!(input.value, "hi!");
            assert_eq!(input.input_type, "text");
            assert_eq!(input.selector.primary, "#name");
        } else {
            panic!("Expected Input event");
        }
    }

    #[tokio::test]
    async fn test_switching_fields_flushes_previous_input() {
        let mut f = Fixture::started().await;
        let (name, email) = (f.name, f.email);
        f.type_into(name, 2000, "Ann").await;
        f.type_into(email, 2100, "a@b.c").await;
        let events = f.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, 2100);
        assert_eq!(events[0].selector().unwrap().primary, "#name");

        f.recorder.tick(2400).await.unwrap();
        let events = f.drain();
        assert_eq!(events.len(), 1);
        if let EventKind::Input(ref input) = events[0].kind {
            assert_eq!(input.value, "a@b.c");
            assert_eq!(input.input_type, "email");
        } else {
            panic!("Expected Input event");
        }
    }

    #[tokio::test]
    async fn test_change_events() {
        let mut f = Fixture::started().await;
        let (agree, size, name) = (f.agree, f.size, f.name);
        f.page.with_document(|doc| doc.set_checked(agree, true)).await;
        f.recorder.handle(RawEvent::change(2000, agree)).await.unwrap();
        f.page.with_document(|doc| doc.set_value(size, "xl")).await;
        f.recorder.handle(RawEvent::change(2100, size)).await.unwrap();
        f.recorder.handle(RawEvent::change(2200, name)).await.unwrap();

        let events = f.drain();
        assert_eq!(events.len(), 2);
        if let EventKind::Change(ref c) = events[0].kind {
            assert_eq!(c.value, ChangeValue::Checked(true));
            assert_eq!(c.input_type, "checkbox");
        } else {
            panic!("Expected Change event");
        }
        if let EventKind::Change(ref c) = events[1].kind {
            assert_eq!(c.value, ChangeValue::Text("xl".into()));
            assert_eq!(c.input_type, "select");
        } else {
            panic!("Expected Change event");
        }
    }

    #[tokio::test]
    async fn test_checkbox_input_events_ignored() {
        let mut f = Fixture::started().await;
        let agree = f.agree;
        f.recorder.handle(RawEvent::input(2000, agree)).await.unwrap();
        f.recorder.tick(3000).await.unwrap();
        assert!(f.drain().is_empty());
    }

    #[tokio::test]
    async fn test_scroll_throttle() {
        let mut f = Fixture::started().await;
        for (at, y) in [(2000, 100.0), (2050, 150.0), (2150, 300.0)] {
            f.page.with_document(|doc| doc.scroll_to(0.0, y)).await;
            f.recorder.handle(RawEvent::scroll(at)).await.unwrap();
        }
        f.recorder.tick(2300).await.unwrap();
        let events = f.drain();
        let samples: Vec<(u64, f64)> = events
            .iter()
            .map(|e| match e.kind {
                EventKind::Scroll(ref s) => (e.timestamp, s.scroll_position.y),
                _ => panic!("Expected Scroll event"),
            })
            .collect();
        assert_eq!(samples, vec![(2000, 100.0), (2200, 300.0)]);
    }

    #[tokio::test]
    async fn test_shortcut_filter() {
        let mut f = Fixture::started().await;
        let cases = [
            (2000, "c", Modifiers::ctrl(), true),
            (2100, "c", Modifiers::default(), false),
            (2200, "q", Modifiers::ctrl(), false),
            (2300, "V", Modifiers::meta(), true),
            (2400, "Enter", Modifiers::ctrl(), false),
        ];
        for (at, key, mods, _) in cases {
            f.recorder
                .handle(RawEvent::keydown(at, None, key, mods))
                .await
                .unwrap();
        }
        let keys: Vec<String> = f
            .drain()
            .into_iter()
            .map(|e| match e.kind {
                EventKind::Keydown(k) => k.key,
                _ => panic!("Expected Keydown event"),
            })
            .collect();
        let expected: Vec<&str> = cases.iter().filter(|c| c.3).map(|c| c.1).collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn test_global_spacing_drops_fast_events() {
        let mut f = Fixture::started().await;
        let button = f.button;
        f.recorder
            .handle(RawEvent::click(2000, button, Point::new(5.0, 5.0)))
            .await
            .unwrap();
        f.recorder
            .handle(RawEvent::click(2020, button, Point::new(5.0, 5.0)))
            .await
            .unwrap();
        f.recorder
            .handle(RawEvent::click(2050, button, Point::new(5.0, 5.0)))
            .await
            .unwrap();
        let events = f.drain();
        let times: Vec<u64> = events.iter().map(|e| e.timestamp).collect();
        assert_eq!(times, vec![2000, 2050]);
        assert_eq!(f.recorder.dropped(), 1);
    }

    #[tokio::test]
    async fn test_click_payload() {
        let mut f = Fixture::started().await;
        let button = f.button;
        f.page.with_document(|doc| doc.scroll_to(0.0, 40.0)).await;
        f.recorder
            .handle(RawEvent::click(2000, button, Point::new(12.0, 34.0)))
            .await
            .unwrap();
        let events = f.drain();
        if let EventKind::Click(ref c) = events[0].kind {
            assert_eq!(c.selector.primary, "#go");
            assert_eq!(c.coordinates, Point::new(12.0, 34.0));
            assert_eq!(c.scroll_position, Point::new(0.0, 40.0));
            assert_eq!(c.target_text, "Create a rather long account name");
            assert_eq!(c.target_tag, "button");
        } else {
            panic!("Expected Click event");
        }
    }

    #[tokio::test]
    async fn test_click_text_truncated() {
        let page = Arc::new(HeadlessPage::new(Document::new("https://a.test/")));
        let node = page
            .with_document(|doc| {
                let body = doc.body();
                doc.append(body, El::new("p").text(&"x".repeat(250)))
            })
            .await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut recorder = Recorder::new(page, CaptureConfig::default(), tx);
        recorder.start(0).await.unwrap();
        recorder
            .handle(RawEvent::click(100, node, Point::default()))
            .await
            .unwrap();
        let _navigate = rx.try_recv().unwrap();
        if let EventKind::Click(c) = rx.try_recv().unwrap().kind {
            assert_eq!(c.target_text.len(), 100);
        } else {
            panic!("Expected Click event");
        }
    }

    #[tokio::test]
    async fn test_snapshot_describes_removed_target() {
        let mut f = Fixture::started().await;
        let button = f.button;
        let snapshot = ElementSnapshot::take(f.page.as_ref(), &button).await.unwrap();
        // The click handler re-renders the form away before the event is read.
        f.page.with_document(|doc| doc.detach(button)).await;

        f.recorder
            .handle(RawEvent::click(2000, button, Point::new(3.0, 4.0)).with_snapshot(snapshot))
            .await
            .unwrap();
        let events = f.drain();
        assert_eq!(events.len(), 1);
        if let EventKind::Click(ref c) = events[0].kind {
            assert_eq!(c.selector.primary, "#go");
            assert_eq!(
                c.selector.fallbacks.last().map(String::as_str),
                Some("//html[1]/body[1]/form[1]/button[1]")
            );
            assert_eq!(c.target_text, "Create a rather long account name");
            assert_eq!(c.target_tag, "button");
        } else {
            panic!("Expected Click event");
        }
    }

    #[tokio::test]
    async fn test_snapshot_keeps_click_before_page_load() {
        let mut f = Fixture::started().await;
        let button = f.button;
        f.page.with_document(|doc| doc.scroll_to(0.0, 80.0)).await;
        let snapshot = ElementSnapshot::take(f.page.as_ref(), &button).await.unwrap();
        // The link started a full load; the queued click is read on the next page.
        f.page.navigate("https://shop.test/welcome").await.unwrap();

        f.recorder
            .handle(RawEvent::click(2000, button, Point::new(1.0, 1.0)).with_snapshot(snapshot))
            .await
            .unwrap();
        f.recorder.handle(RawEvent::mutation(2100)).await.unwrap();
        let events = f.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].url, "https://shop.test/");
        if let EventKind::Click(ref c) = events[0].kind {
            assert_eq!(c.selector.primary, "#go");
            assert_eq!(c.scroll_position, Point::new(0.0, 80.0));
        } else {
            panic!("Expected Click event");
        }
        assert_eq!(events[1].url, "https://shop.test/welcome");
        assert!(matches!(events[1].kind, EventKind::Navigate(_)));
    }

    #[tokio::test]
    async fn test_snapshot_value_survives_removed_field() {
        let mut f = Fixture::started().await;
        let name = f.name;
        f.page.with_document(|doc| doc.set_value(name, "Ann")).await;
        let snapshot = ElementSnapshot::take(f.page.as_ref(), &name).await.unwrap();
        f.recorder
            .handle(RawEvent::input(2000, name).with_snapshot(snapshot))
            .await
            .unwrap();
        f.page
            .with_document(|doc| {
                doc.set_value(name, "");
                doc.detach(name);
            })
            .await;

        f.recorder.tick(2300).await.unwrap();
        let events = f.drain();
        assert_eq!(events.len(), 1);
        if let EventKind::Input(ref input) = events[0].kind {
            assert_eq!(input.value, "Ann");
            assert_eq!(input.selector.primary, "#name");
        } else {
            panic!("Expected Input event");
        }
    }

    #[tokio::test]
    async fn test_control_surface_excluded_by_snapshot() {
        let mut f = Fixture::started().await;
        let overlay_button = f.overlay_button;
        let snapshot = ElementSnapshot::take(f.page.as_ref(), &overlay_button)
            .await
            .unwrap();
        f.page.with_document(|doc| doc.detach(overlay_button)).await;
        f.recorder
            .handle(RawEvent::click(2000, overlay_button, Point::default()).with_snapshot(snapshot))
            .await
            .unwrap();
        assert!(f.drain().is_empty());
    }

    #[tokio::test]
    async fn test_control_surface_excluded() {
        let mut f = Fixture::started().await;
        let overlay_button = f.overlay_button;
        f.recorder
            .handle(RawEvent::click(2000, overlay_button, Point::default()))
            .await
            .unwrap();
        assert!(f.drain().is_empty());
    }

    #[tokio::test]
    async fn test_spa_navigation_detected() {
        let mut f = Fixture::started().await;
        f.recorder.handle(RawEvent::mutation(2000)).await.unwrap();
        assert!(f.drain().is_empty());

        f.page
            .with_document(|doc| doc.set_url("https://shop.test/cart"))
            .await;
        f.recorder.handle(RawEvent::mutation(2100)).await.unwrap();
        f.recorder.handle(RawEvent::mutation(2200)).await.unwrap();
        let events = f.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].url, "https://shop.test/cart");
        assert!(matches!(events[0].kind, EventKind::Navigate(_)));
    }

    #[tokio::test]
    async fn test_pause_resume_and_stop() {
        let mut f = Fixture::started().await;
        let (button, name) = (f.button, f.name);

        f.recorder.pause();
        f.recorder
            .handle(RawEvent::click(2000, button, Point::default()))
            .await
            .unwrap();
        assert!(f.drain().is_empty());

        f.recorder.resume(2100).await.unwrap();
        f.type_into(name, 2200, "Bo").await;
        f.recorder.stop(2300).await.unwrap();
        let events = f.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, 2300);
        assert!(matches!(events[0].kind, EventKind::Input(_)));

        f.recorder
            .handle(RawEvent::click(3000, button, Point::default()))
            .await
            .unwrap();
        f.recorder.handle(RawEvent::mutation(3100)).await.unwrap();
        assert!(f.drain().is_empty());
        assert_eq!(f.recorder.state(), CaptureState::Stopped);
    }

    #[tokio::test]
    async fn test_emitted_events_are_ordered() {
        let mut f = Fixture::started().await;
        let (name, button) = (f.name, f.button);
        f.type_into(name, 2000, "a").await;
        f.recorder.handle(RawEvent::scroll(2100)).await.unwrap();
        f.recorder.handle(RawEvent::scroll(2150)).await.unwrap();
        f.recorder
            .handle(RawEvent::click(2250, button, Point::default()))
            .await
            .unwrap();
        f.recorder
            .handle(RawEvent::click(2600, button, Point::default()))
            .await
            .unwrap();
        let events = f.drain();
        let kinds: Vec<&str> = events.iter().map(|e| e.kind.name()).collect();
        // input and trailing scroll are both due at 2300; the scroll lands
        // inside the spacing window and is dropped
        assert_eq!(kinds, vec!["scroll", "click", "input", "click"]);
        assert_eq!(f.recorder.dropped(), 1);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
