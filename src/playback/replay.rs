//! One replay action per event variant.

use crate::model::{ChangeValue, EventKind, InteractionEvent};
use crate::page::Page;
use crate::selector::{self, WaitOptions};
use crate::{synthetic, Error, Result};
use std::time::Duration;
use tracing::debug;

/// Knobs the actions need from the player.
#[derive(Debug, Clone)]
pub(crate) struct Pacing {
    pub find: WaitOptions,
    pub visible: WaitOptions,
    pub type_delay: Duration,
    pub smooth_scroll: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    Done,
    /// The page must load `url`; the rest of the events go with it.
    Navigate(String),
}

pub(crate) async fn replay<P: Page>(page: &P, event: &InteractionEvent, pacing: &Pacing) -> Result<Step> {
    match &event.kind {
        EventKind::Navigate(_) => {
            let current = page.url().await?;
            if same_location(&current, &event.url) {
                debug!("Already at {}", event.url);
                Ok(Step::Done)
            } else {
                Ok(Step::Navigate(event.url.clone()))
            }
        }
        EventKind::Click(click) => {
            let node =
                selector::locate_visible(page, &click.selector, &pacing.find, &pacing.visible).await?;
            page.dispatch(Some(&node), &synthetic::click(click)).await?;
            Ok(Step::Done)
        }
        EventKind::Input(input) => {
            let node =
                selector::locate_visible(page, &input.selector, &pacing.find, &pacing.visible).await?;
            page.focus(&node).await?;
            page.set_value(&node, "").await?;
            let mut typed = String::with_capacity(input.value.len());
            for c in input.value.chars() {
                typed.push(c);
                page.set_value(&node, &typed).await?;
                page.dispatch(Some(&node), &synthetic::input()).await?;
                tokio::time::sleep(pacing.type_delay).await;
            }
            page.dispatch(Some(&node), &synthetic::change()).await?;
            page.blur(&node).await?;
            Ok(Step::Done)
        }
        EventKind::Change(change) => {
            let node = selector::resolve(page, &change.selector, &pacing.find).await?;
            let state = page.element_state(&node).await?;
            let input_type = state.input_type.as_deref().unwrap_or_default();
            match (state.tag.as_str(), input_type, &change.value) {
                ("select", _, ChangeValue::Text(value)) => page.set_value(&node, value).await?,
                ("input", "checkbox" | "radio", ChangeValue::Checked(checked)) => {
                    page.set_checked(&node, *checked).await?
                }
                (tag, _, value) => {
                    let recorded = match value {
                        ChangeValue::Text(_) => "a text value",
                        ChangeValue::Checked(_) => "a checked state",
                    };
                    return Err(Error::Dispatch(format!(
                        "cannot apply {} to <{}> at {}",
                        recorded, tag, change.selector
                    )));
                }
            }
            page.dispatch(Some(&node), &synthetic::change()).await?;
            Ok(Step::Done)
        }
        EventKind::Scroll(scroll) => {
            page.scroll_to(scroll.scroll_position, pacing.smooth_scroll).await?;
            Ok(Step::Done)
        }
        EventKind::Keydown(key) => {
            page.dispatch(None, &synthetic::key_down(key)).await?;
            Ok(Step::Done)
        }
        EventKind::Submit(submit) => {
            let form = selector::resolve(page, &submit.selector, &pacing.find).await?;
            page.dispatch(Some(&form), &synthetic::submit()).await?;
            Ok(Step::Done)
        }
        EventKind::Mousemove(mv) => {
            page.dispatch(None, &synthetic::mouse_move(mv)).await?;
            Ok(Step::Done)
        }
    }
}

/// Compare locations the way a browser would report them, so
/// `https://a.test` and `https://a.test/` are the same place.
pub(crate) fn same_location(a: &str, b: &str) -> bool {
    match (url::Url::parse(a), url::Url::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
