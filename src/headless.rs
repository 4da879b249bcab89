//! [`Page`] over an in-process [`eoka_dom::Document`].
//!
//! Navigation swaps in the document registered for the destination URL (or a
//! blank one), so multi-page flows can be replayed without a browser. Every
//! effect the engines apply is journaled with its offset from page creation.

use crate::model::{Point, Viewport};
use crate::page::{ComputedStyle, ElementState, LineageEntry, Page, Rect};
use crate::synthetic::SyntheticEvent;
use crate::{Error, Result};
use async_trait::async_trait;
use eoka_dom::{Document, NodeId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A side effect applied to the document.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Dispatch {
        target: Option<NodeId>,
        event: SyntheticEvent,
    },
    Focus(NodeId),
    Blur(NodeId),
    SetValue(NodeId, String),
    SetChecked(NodeId, bool),
    ScrollTo {
        position: Point,
        smooth: bool,
    },
    Navigate(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    /// Time since the page was created.
    pub at: Duration,
    pub effect: Effect,
}

struct State {
    doc: Document,
    routes: HashMap<String, Document>,
    journal: Vec<JournalEntry>,
}

pub struct HeadlessPage {
    state: Mutex<State>,
    started: Instant,
}

impl HeadlessPage {
    pub fn new(doc: Document) -> Self {
        Self {
            state: Mutex::new(State {
                doc,
                routes: HashMap::new(),
                journal: Vec::new(),
            }),
            started: Instant::now(),
        }
    }

    /// Run `f` against the current document.
    pub async fn with_document<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let mut state = self.state.lock().await;
        f(&mut state.doc)
    }

    /// Serve `doc` whenever the page navigates to `url`.
    pub async fn route(&self, url: &str, doc: Document) {
        self.state.lock().await.routes.insert(url.to_string(), doc);
    }

    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().await.journal.clone()
    }

    /// Dispatched events only, in order.
    pub async fn dispatched(&self) -> Vec<(Option<NodeId>, SyntheticEvent)> {
        self.journal()
            .await
            .into_iter()
            .filter_map(|entry| match entry.effect {
                Effect::Dispatch { target, event } => Some((target, event)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, state: &mut State, effect: Effect) {
        state.journal.push(JournalEntry {
            at: self.started.elapsed(),
            effect,
        });
    }
}

fn attached(doc: &Document, node: NodeId) -> Result<()> {
    if doc.is_attached(node) {
        Ok(())
    } else {
        Err(Error::Dispatch(format!("{:?} is no longer in the document", node)))
    }
}

#[async_trait]
impl Page for HeadlessPage {
    type Node = NodeId;

    async fn url(&self) -> Result<String> {
        Ok(self.state.lock().await.doc.url().to_string())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut doc = state
            .routes
            .get(url)
            .cloned()
            .unwrap_or_else(|| Document::new(url));
        doc.set_url(url);
        state.doc = doc;
        self.record(&mut state, Effect::Navigate(url.to_string()));
        Ok(())
    }

    async fn wait_for_load(&self) -> Result<()> {
        Ok(())
    }

    async fn query_css(&self, selector: &str) -> Result<Vec<NodeId>> {
        Ok(self.state.lock().await.doc.query_selector_all(selector)?)
    }

    async fn query_xpath(&self, expr: &str) -> Result<Option<NodeId>> {
        Ok(self
            .state
            .lock()
            .await
            .doc
            .evaluate_xpath(expr)?
            .into_iter()
            .next())
    }

    async fn lineage(&self, node: &NodeId) -> Result<Vec<LineageEntry>> {
        let state = self.state.lock().await;
        let doc = &state.doc;
        Ok(doc
            .inclusive_ancestors(*node)
            .map(|n| {
                let (same_tag_index, same_tag_count) = doc.same_tag_position(n);
                LineageEntry {
                    tag: doc.tag(n).to_string(),
                    id: doc.attr(n, "id").map(String::from),
                    classes: doc.classes(n).into_iter().map(String::from).collect(),
                    test_id: doc.attr(n, "data-testid").map(String::from),
                    data_id: doc.attr(n, "data-id").map(String::from),
                    same_tag_index,
                    same_tag_count,
                }
            })
            .collect())
    }

    async fn element_state(&self, node: &NodeId) -> Result<ElementState> {
        let state = self.state.lock().await;
        let doc = &state.doc;
        Ok(ElementState {
            tag: doc.tag(*node).to_string(),
            input_type: doc.attr(*node, "type").map(String::from),
            value: doc.value(*node).to_string(),
            checked: doc.checked(*node),
            text: doc.text_content(*node),
        })
    }

    async fn computed_style(&self, node: &NodeId) -> Result<ComputedStyle> {
        let state = self.state.lock().await;
        let doc = &state.doc;
        let style = doc.style(*node);
        Ok(ComputedStyle {
            display: style.display.as_str().to_string(),
            visibility: doc.computed_visibility(*node).as_str().to_string(),
            opacity: style.opacity,
        })
    }

    async fn bounding_rect(&self, node: &NodeId) -> Result<Rect> {
        let r = self.state.lock().await.doc.bounding_rect(*node);
        Ok(Rect {
            x: r.x,
            y: r.y,
            width: r.width,
            height: r.height,
        })
    }

    async fn element_from_point(&self, at: Point) -> Result<Option<NodeId>> {
        Ok(self.state.lock().await.doc.element_from_point(at.x, at.y))
    }

    async fn contains(&self, ancestor: &NodeId, node: &NodeId) -> Result<bool> {
        Ok(self.state.lock().await.doc.contains(*ancestor, *node))
    }

    async fn active_element(&self) -> Result<Option<NodeId>> {
        Ok(self.state.lock().await.doc.focused())
    }

    async fn dispatch(&self, target: Option<&NodeId>, event: &SyntheticEvent) -> Result<()> {
        let mut state = self.state.lock().await;
        let target = match target {
            Some(node) => {
                attached(&state.doc, *node)?;
                Some(*node)
            }
            None => state.doc.focused().or(Some(state.doc.body())),
        };
        self.record(
            &mut state,
            Effect::Dispatch {
                target,
                event: event.clone(),
            },
        );
        Ok(())
    }

    async fn focus(&self, node: &NodeId) -> Result<()> {
        let mut state = self.state.lock().await;
        attached(&state.doc, *node)?;
        state.doc.focus(*node);
        self.record(&mut state, Effect::Focus(*node));
        Ok(())
    }

    async fn blur(&self, node: &NodeId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.doc.blur(*node);
        self.record(&mut state, Effect::Blur(*node));
        Ok(())
    }

    async fn set_value(&self, node: &NodeId, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        attached(&state.doc, *node)?;
        state.doc.set_value(*node, value);
        self.record(&mut state, Effect::SetValue(*node, value.to_string()));
        Ok(())
    }

    async fn set_checked(&self, node: &NodeId, checked: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        attached(&state.doc, *node)?;
        state.doc.set_checked(*node, checked);
        self.record(&mut state, Effect::SetChecked(*node, checked));
        Ok(())
    }

    async fn scroll_to(&self, position: Point, smooth: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state.doc.scroll_to(position.x, position.y);
        self.record(&mut state, Effect::ScrollTo { position, smooth });
        Ok(())
    }

    async fn scroll_position(&self) -> Result<Point> {
        let (x, y) = self.state.lock().await.doc.scroll_position();
        Ok(Point::new(x, y))
    }

    async fn viewport(&self) -> Result<Viewport> {
        let (width, height) = self.state.lock().await.doc.viewport();
        Ok(Viewport {
            width: width as u32,
            height: height as u32,
        })
    }

    async fn user_agent(&self) -> Result<String> {
        Ok(self.state.lock().await.doc.user_agent().to_string())
    }
}
