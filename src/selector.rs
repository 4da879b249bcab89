//! Element fingerprinting and re-location.
//!
//! [`generate`] turns an element into ranked candidates, most semantic first
//! and the positional XPath last. [`resolve`] walks the candidates until one
//! hits, re-polling while the page settles.

use crate::model::SelectorDescriptor;
use crate::page::{LineageEntry, Page};
use crate::wait::poll_until;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout and polling cadence for element waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    /// Roughly one animation frame by default.
    pub interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            interval: Duration::from_millis(16),
        }
    }
}

impl WaitOptions {
    /// Default polling cadence with a custom deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// Which of an element's semantic candidates pick it out uniquely.
///
/// Measured against the live page, either by [`measure`] or by the capture
/// listeners at the moment of the interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Uniqueness {
    /// Nearest lineage level (self is 0) whose `#id` matches one element.
    pub id_level: Option<usize>,
    /// The `[data-testid]` (else `[data-id]`) selector matches only the element.
    #[serde(default)]
    pub data: bool,
    /// The compound class selector matches only the element.
    #[serde(default)]
    pub classes: bool,
}

/// Build the selector descriptor for `node`.
///
/// Candidate order: `#id`, `[data-testid]` (else `[data-id]`), compound class
/// selector, structural CSS path, positional XPath. The first three are kept
/// only when they select exactly this element right now.
pub async fn generate<P: Page>(page: &P, node: &P::Node) -> Result<SelectorDescriptor> {
    let lineage = page.lineage(node).await?;
    let unique = measure(page, node, &lineage).await?;
    describe(&lineage, unique)
}

/// Query the page for the uniqueness of each semantic candidate.
pub async fn measure<P: Page>(
    page: &P,
    node: &P::Node,
    lineage: &[LineageEntry],
) -> Result<Uniqueness> {
    let Some(me) = lineage.first() else {
        return Err(Error::Dispatch(format!("{:?} has no ancestry", node)));
    };
    let mut unique = Uniqueness::default();

    for (level, entry) in lineage.iter().enumerate() {
        let Some(id) = non_empty(&entry.id) else {
            continue;
        };
        let hits = match page.query_css(&format!("#{}", css_escape(id))).await {
            Ok(hits) => hits.len(),
            Err(Error::InvalidSelector { .. }) => 0,
            Err(e) => return Err(e),
        };
        if hits == 1 {
            unique.id_level = Some(level);
            break;
        }
    }

    if let Some(candidate) = data_selector(me) {
        unique.data = selects_only(page, &candidate, node).await?;
    }
    if let Some(candidate) = class_selector(me) {
        unique.classes = selects_only(page, &candidate, node).await?;
    }
    Ok(unique)
}

/// Assemble the ranked candidates from an element's lineage.
pub fn describe(lineage: &[LineageEntry], unique: Uniqueness) -> Result<SelectorDescriptor> {
    let Some(me) = lineage.first() else {
        return Err(Error::Dispatch("element has no ancestry".into()));
    };
    let anchor = unique.id_level.filter(|level| *level < lineage.len());

    let mut candidates = Vec::new();
    if anchor == Some(0) {
        if let Some(id) = non_empty(&me.id) {
            candidates.push(format!("#{}", css_escape(id)));
        }
    }
    if unique.data {
        candidates.extend(data_selector(me));
    }
    if unique.classes {
        candidates.extend(class_selector(me));
    }
    candidates.push(css_path(lineage, anchor));
    candidates.push(xpath(lineage));

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.clone()));

    let descriptor = SelectorDescriptor::from_candidates(candidates)
        .ok_or_else(|| Error::Dispatch("no selector candidates".into()))?;
    debug!("Generated selector {}", descriptor);
    Ok(descriptor)
}

fn data_selector(me: &LineageEntry) -> Option<String> {
    non_empty(&me.test_id)
        .map(|v| attr_selector("data-testid", v))
        .or_else(|| non_empty(&me.data_id).map(|v| attr_selector("data-id", v)))
}

fn class_selector(me: &LineageEntry) -> Option<String> {
    if me.classes.is_empty() {
        return None;
    }
    Some(
        me.classes
            .iter()
            .map(|c| format!(".{}", css_escape(c)))
            .collect(),
    )
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

async fn selects_only<P: Page>(page: &P, candidate: &str, node: &P::Node) -> Result<bool> {
    match page.query_css(candidate).await {
        Ok(hits) => Ok(hits.len() == 1 && hits[0] == *node),
        Err(Error::InvalidSelector { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Tag path towards the root, stopping at `lineage[anchor]` which is written
/// as `#id`. Same-tag siblings are told apart with `:nth-of-type`.
pub fn css_path(lineage: &[LineageEntry], anchor: Option<usize>) -> String {
    let mut parts = Vec::new();
    for (level, entry) in lineage.iter().enumerate() {
        if anchor == Some(level) {
            if let Some(id) = non_empty(&entry.id) {
                parts.push(format!("#{}", css_escape(id)));
                break;
            }
        }
        if entry.same_tag_count > 1 {
            parts.push(format!("{}:nth-of-type({})", entry.tag, entry.same_tag_index));
        } else {
            parts.push(entry.tag.clone());
        }
    }
    parts.reverse();
    parts.join(" > ")
}

/// Absolute positional XPath, e.g. `//html[1]/body[1]/div[2]`.
pub fn xpath(lineage: &[LineageEntry]) -> String {
    let steps: Vec<String> = lineage
        .iter()
        .rev()
        .map(|e| format!("{}[{}]", e.tag, e.same_tag_index))
        .collect();
    format!("//{}", steps.join("/"))
}

/// Serialize an identifier the way `CSS.escape` does.
pub fn css_escape(ident: &str) -> String {
    let chars: Vec<char> = ident.chars().collect();
    let mut out = String::with_capacity(ident.len());
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '\0' => out.push('\u{FFFD}'),
            '\u{1}'..='\u{1f}' | '\u{7f}' => out.push_str(&format!("\\{:x} ", c as u32)),
            '0'..='9' if i == 0 || (i == 1 && chars[0] == '-') => {
                out.push_str(&format!("\\{:x} ", c as u32))
            }
            '-' if i == 0 && chars.len() == 1 => out.push_str("\\-"),
            c if !c.is_ascii() || c.is_ascii_alphanumeric() || c == '-' || c == '_' => out.push(c),
            c => {
                out.push('\\');
                out.push(c);
            }
        }
    }
    out
}

/// `[name="value"]` with the value as a quoted CSS string.
pub fn attr_selector(name: &str, value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\0'..='\u{1f}' | '\u{7f}' => quoted.push_str(&format!("\\{:x} ", c as u32)),
            c => quoted.push(c),
        }
    }
    format!("[{}=\"{}\"]", name, quoted)
}

/// Try every candidate once, in order.
async fn find_once<P: Page>(page: &P, descriptor: &SelectorDescriptor) -> Result<Option<P::Node>> {
    for candidate in descriptor.candidates() {
        let hit = if SelectorDescriptor::is_xpath(candidate) {
            page.query_xpath(candidate).await
        } else {
            page.query_css(candidate)
                .await
                .map(|hits| hits.into_iter().next())
        };
        match hit {
            Ok(Some(node)) => return Ok(Some(node)),
            Ok(None) => {}
            Err(Error::InvalidSelector { selector, reason }) => {
                warn!("Skipping invalid selector {}: {}", selector, reason);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

/// Locate the element a descriptor points at, waiting up to `opts.timeout`.
pub async fn resolve<P: Page>(
    page: &P,
    descriptor: &SelectorDescriptor,
    opts: &WaitOptions,
) -> Result<P::Node> {
    poll_until(opts.interval, Some(opts.timeout), || {
        find_once(page, descriptor)
    })
    .await?
    .ok_or_else(|| Error::ElementNotFound(descriptor.to_string()))
}

/// Styled visible, non-empty box, and the topmost element at its centre is
/// the node itself or one of its descendants.
pub async fn is_visible<P: Page>(page: &P, node: &P::Node) -> Result<bool> {
    if page.computed_style(node).await?.hides() {
        return Ok(false);
    }
    let rect = page.bounding_rect(node).await?;
    if !rect.has_area() {
        return Ok(false);
    }
    match page.element_from_point(rect.center()).await? {
        Some(hit) => page.contains(node, &hit).await,
        None => Ok(false),
    }
}

/// Wait until `node` is visible.
pub async fn wait_visible<P: Page>(page: &P, node: P::Node, opts: &WaitOptions) -> Result<P::Node> {
    let target = &node;
    let visible = poll_until(opts.interval, Some(opts.timeout), || async move {
        Ok(is_visible(page, target).await?.then_some(()))
    })
    .await?;
    match visible {
        Some(()) => Ok(node),
        None => Err(Error::VisibilityTimeout {
            selector: format!("{:?}", node),
            timeout_ms: opts.timeout.as_millis() as u64,
        }),
    }
}

/// [`resolve`] then [`wait_visible`], reporting failures by selector.
pub async fn locate_visible<P: Page>(
    page: &P,
    descriptor: &SelectorDescriptor,
    find: &WaitOptions,
    visible: &WaitOptions,
) -> Result<P::Node> {
    let node = resolve(page, descriptor, find).await?;
    wait_visible(page, node, visible).await.map_err(|e| match e {
        Error::VisibilityTimeout { timeout_ms, .. } => Error::VisibilityTimeout {
            selector: descriptor.primary.clone(),
            timeout_ms,
        },
        other => other,
    })
}
