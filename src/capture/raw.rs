use crate::model::Point;
use crate::page::{ElementState, LineageEntry, Page};
use crate::selector::{self, Uniqueness};
use crate::Result;
use serde::Deserialize;

/// Modifier keys held during a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    pub alt: bool,
}

impl Modifiers {
    pub fn ctrl() -> Self {
        Self {
            ctrl: true,
            ..Default::default()
        }
    }

    pub fn meta() -> Self {
        Self {
            meta: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawKind {
    Click { client: Point },
    Input,
    Change,
    Submit,
    Scroll,
    Keydown { key: String, modifiers: Modifiers },
    /// The document changed; the URL may have changed without a load.
    Mutation,
}

/// What the target looked like when the interaction happened.
///
/// Listeners that can read the page synchronously attach one, so the event
/// still describes its element after the page has re-rendered or unloaded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSnapshot {
    pub url: String,
    pub scroll: Point,
    pub lineage: Vec<LineageEntry>,
    pub state: ElementState,
    pub unique: Uniqueness,
}

impl ElementSnapshot {
    /// Read the same facts through [`Page`] queries.
    pub async fn take<P: Page>(page: &P, node: &P::Node) -> Result<Self> {
        let lineage = page.lineage(node).await?;
        let unique = selector::measure(page, node, &lineage).await?;
        Ok(Self {
            url: page.url().await?,
            scroll: page.scroll_position().await?,
            state: page.element_state(node).await?,
            lineage,
            unique,
        })
    }
}

/// An unshaped DOM interaction as observed by a listener.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent<N> {
    /// Epoch milliseconds.
    pub at: u64,
    pub target: Option<N>,
    pub kind: RawKind,
    pub snapshot: Option<ElementSnapshot>,
}

impl<N> RawEvent<N> {
    pub fn click(at: u64, target: N, client: Point) -> Self {
        Self {
            at,
            target: Some(target),
            kind: RawKind::Click { client },
            snapshot: None,
        }
    }

    pub fn input(at: u64, target: N) -> Self {
        Self {
            at,
            target: Some(target),
            kind: RawKind::Input,
            snapshot: None,
        }
    }

    pub fn change(at: u64, target: N) -> Self {
        Self {
            at,
            target: Some(target),
            kind: RawKind::Change,
            snapshot: None,
        }
    }

    pub fn submit(at: u64, form: N) -> Self {
        Self {
            at,
            target: Some(form),
            kind: RawKind::Submit,
            snapshot: None,
        }
    }

    pub fn scroll(at: u64) -> Self {
        Self {
            at,
            target: None,
            kind: RawKind::Scroll,
            snapshot: None,
        }
    }

    pub fn keydown(at: u64, target: Option<N>, key: &str, modifiers: Modifiers) -> Self {
        Self {
            at,
            target,
            kind: RawKind::Keydown {
                key: key.to_string(),
                modifiers,
            },
            snapshot: None,
        }
    }

    /// Attach the target's state as read at event time.
    pub fn with_snapshot(mut self, snapshot: ElementSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn mutation(at: u64) -> Self {
        Self {
            at,
            target: None,
            kind: RawKind::Mutation,
            snapshot: None,
        }
    }
}
