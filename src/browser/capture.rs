//! Capture-phase listeners injected into the tab, drained by polling.
//!
//! Each listener reads its target's lineage and state while the event is
//! still being dispatched, so a record stays meaningful after the page
//! re-renders. The queue is parked in `sessionStorage` on `pagehide` and
//! picked up again when the listeners are reinstalled on the next document.

use super::{EokaPage, LINEAGE_JS, PATH_JS, STATE_JS};
use crate::capture::{ElementSnapshot, Modifiers, RawEvent};
use crate::model::Point;
use crate::session::Coordinator;
use crate::{now_ms, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Installs the listeners once per document.
/// Called with the path, lineage and state functions.
const SHIM_JS: &str = r#"
((path, lineage, state) => {
    if (window.__eokaReplay) return false;
    const KEY = '__eokaReplay';
    const queue = [];
    try {
        const parked = sessionStorage.getItem(KEY);
        if (parked) {
            sessionStorage.removeItem(KEY);
            queue.push(...JSON.parse(parked));
        }
    } catch (e) {}

    const elementOf = e => {
        const t = e.target;
        if (!t) return null;
        return t.nodeType === 1 ? t : t.parentElement;
    };
    const matching = (selector, attr, value) =>
        [...document.querySelectorAll(selector)].filter(m => m.getAttribute(attr) === value);
    const only = (el, list) => list.length === 1 && list[0] === el;
    const unique = (el, line) => {
        let idLevel = null;
        for (let i = 0; i < line.length; i++) {
            const id = line[i].id;
            if (id && matching('[id]', 'id', id).length === 1) {
                idLevel = i;
                break;
            }
        }
        const me = line[0];
        let data = false;
        if (me.testId) data = only(el, matching('[data-testid]', 'data-testid', me.testId));
        else if (me.dataId) data = only(el, matching('[data-id]', 'data-id', me.dataId));
        const classes = me.classes.length > 0
            && only(el, [...document.getElementsByClassName(me.classes.join(' '))]);
        return { idLevel, data, classes };
    };
    const snapshot = el => {
        try {
            const line = lineage(el);
            return {
                url: location.href,
                scroll: { x: window.scrollX, y: window.scrollY },
                lineage: line,
                state: state(el),
                unique: unique(el, line),
            };
        } catch (e) {
            return null;
        }
    };
    const push = (kind, el, extra) => {
        queue.push(Object.assign({ kind, at: Date.now(), target: el ? path(el) : null }, extra || {}));
    };
    const targeted = (kind, el, extra) =>
        push(kind, el, Object.assign({ snapshot: el ? snapshot(el) : null }, extra || {}));

    let dirty = false;
    const mutated = () => {
        if (!dirty) {
            dirty = true;
            push('mutation', null);
        }
    };
    const park = () => {
        if (queue.length === 0) return;
        try { sessionStorage.setItem(KEY, JSON.stringify(queue)); } catch (e) {}
    };

    const listeners = [
        [document, 'click', e => targeted('click', elementOf(e), { x: e.clientX, y: e.clientY }), true],
        [document, 'input', e => targeted('input', elementOf(e)), true],
        [document, 'change', e => targeted('change', elementOf(e)), true],
        [document, 'submit', e => targeted('submit', elementOf(e)), true],
        [document, 'keydown', e => push('keydown', elementOf(e), {
            key: e.key, ctrl: e.ctrlKey, meta: e.metaKey, shift: e.shiftKey, alt: e.altKey,
        }), true],
        [window, 'scroll', () => push('scroll', null), { passive: true }],
        [window, 'popstate', mutated, false],
        [window, 'hashchange', mutated, false],
        [window, 'pagehide', park, false],
    ];
    listeners.forEach(([on, type, fn, opts]) => on.addEventListener(type, fn, opts));
    const observer = new MutationObserver(mutated);
    observer.observe(document, { childList: true, subtree: true });

    window.__eokaReplay = {
        drain: () => {
            dirty = false;
            try { sessionStorage.removeItem(KEY); } catch (e) {}
            return queue.splice(0);
        },
        dispose: () => {
            listeners.forEach(([on, type, fn, opts]) => on.removeEventListener(type, fn, opts));
            observer.disconnect();
            try { sessionStorage.removeItem(KEY); } catch (e) {}
            queue.splice(0);
            delete window.__eokaReplay;
            return true;
        },
    };
    return true;
})
"#;

const DRAIN_JS: &str =
    "JSON.stringify(window.__eokaReplay ? window.__eokaReplay.drain() : null)";

const DISPOSE_JS: &str = "window.__eokaReplay ? window.__eokaReplay.dispose() : false";

/// One listener record as queued by the shim.
#[derive(Debug, Deserialize)]
struct ShimRecord {
    kind: String,
    at: u64,
    target: Option<String>,
    #[serde(default)]
    snapshot: Option<ElementSnapshot>,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    key: Option<String>,
    #[serde(default)]
    ctrl: bool,
    #[serde(default)]
    meta: bool,
    #[serde(default)]
    shift: bool,
    #[serde(default)]
    alt: bool,
}

impl ShimRecord {
    fn into_raw(self) -> Option<RawEvent<String>> {
        let at = self.at;
        let raw = match self.kind.as_str() {
            "click" => RawEvent::click(at, self.target?, Point::new(self.x, self.y)),
            "input" => RawEvent::input(at, self.target?),
            "change" => RawEvent::change(at, self.target?),
            "submit" => RawEvent::submit(at, self.target?),
            "scroll" => RawEvent::scroll(at),
            "keydown" => {
                let modifiers = Modifiers {
                    ctrl: self.ctrl,
                    meta: self.meta,
                    shift: self.shift,
                    alt: self.alt,
                };
                RawEvent::keydown(at, self.target, &self.key?, modifiers)
            }
            "mutation" => RawEvent::mutation(at),
            _ => return None,
        };
        Some(match self.snapshot {
            Some(snapshot) => raw.with_snapshot(snapshot),
            None => raw,
        })
    }
}

fn parse_drain(raw: &str) -> Result<Option<Vec<RawEvent<String>>>> {
    let records: Option<Vec<ShimRecord>> = serde_json::from_str(raw)?;
    Ok(records.map(|records| {
        records
            .into_iter()
            .filter_map(ShimRecord::into_raw)
            .collect()
    }))
}

/// Pulls raw interactions out of a live tab.
pub struct LiveCapture {
    page: Arc<EokaPage>,
}

impl LiveCapture {
    pub fn new(page: Arc<EokaPage>) -> Self {
        Self { page }
    }

    /// Inject the listeners. Returns `false` when they were already present.
    pub async fn install(&self) -> Result<bool> {
        let js = format!("{}({}, {}, {})", SHIM_JS, PATH_JS, LINEAGE_JS, STATE_JS);
        Ok(self.page.inner().evaluate::<bool>(&js).await?)
    }

    /// Remove the listeners, disconnect the observer and drop anything still
    /// queued. Returns `false` when nothing was installed.
    pub async fn dispose(&self) -> Result<bool> {
        let removed = self.page.inner().evaluate::<bool>(DISPOSE_JS).await?;
        if removed {
            debug!("Capture listeners removed");
        }
        Ok(removed)
    }

    async fn take_queue(&self) -> Result<Option<Vec<RawEvent<String>>>> {
        let raw: String = self.page.inner().evaluate(DRAIN_JS).await?;
        parse_drain(&raw)
    }

    /// Everything observed since the last drain.
    ///
    /// A full page load wipes the listeners; they are put back, whatever the
    /// old document parked is returned, and a mutation is reported so the
    /// recorder picks up the new URL.
    pub async fn drain(&self) -> Result<Vec<RawEvent<String>>> {
        if let Some(events) = self.take_queue().await? {
            return Ok(events);
        }
        self.install().await?;
        let mut events = self.take_queue().await?.unwrap_or_default();
        debug!(
            "Capture listeners reinstalled after load ({} parked events)",
            events.len()
        );
        events.push(RawEvent::mutation(now_ms()));
        Ok(events)
    }

    /// Drain once into the coordinator's recording and advance its clock.
    /// Returns how many events the recording accepted.
    pub async fn pump(&self, coordinator: &Coordinator<EokaPage>) -> Result<usize> {
        let events = self.drain().await?;
        coordinator.record_all(events, now_ms()).await
    }
}
