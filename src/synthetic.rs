//! Synthetic DOM events built from recorded interactions.
//!
//! One builder per recorded variant; the replay loop only decides *when* to
//! fire them. [`SyntheticEvent::to_js`] renders the constructor expression the
//! CDP backend evaluates in the page.

use crate::model::{ClickEvent, KeydownEvent, MousemoveEvent, Point};

#[derive(Debug, Clone, PartialEq)]
pub enum SyntheticEvent {
    Click {
        client: Point,
    },
    MouseMove {
        client: Point,
    },
    KeyDown {
        key: String,
        ctrl: bool,
        meta: bool,
        shift: bool,
        alt: bool,
    },
    Input,
    Change,
    Submit,
}

pub fn click(event: &ClickEvent) -> SyntheticEvent {
    SyntheticEvent::Click {
        client: event.coordinates,
    }
}

pub fn mouse_move(event: &MousemoveEvent) -> SyntheticEvent {
    SyntheticEvent::MouseMove {
        client: event.coordinates,
    }
}

pub fn key_down(event: &KeydownEvent) -> SyntheticEvent {
    SyntheticEvent::KeyDown {
        key: event.key.clone(),
        ctrl: event.ctrl_key,
        meta: event.meta_key,
        shift: event.shift_key,
        alt: event.alt_key,
    }
}

/// Fired after each character while typing.
pub fn input() -> SyntheticEvent {
    SyntheticEvent::Input
}

pub fn change() -> SyntheticEvent {
    SyntheticEvent::Change
}

pub fn submit() -> SyntheticEvent {
    SyntheticEvent::Submit
}

impl SyntheticEvent {
    /// DOM event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            SyntheticEvent::Click { .. } => "click",
            SyntheticEvent::MouseMove { .. } => "mousemove",
            SyntheticEvent::KeyDown { .. } => "keydown",
            SyntheticEvent::Input => "input",
            SyntheticEvent::Change => "change",
            SyntheticEvent::Submit => "submit",
        }
    }

    /// JavaScript expression constructing the equivalent DOM event.
    pub fn to_js(&self) -> String {
        match self {
            SyntheticEvent::Click { client } | SyntheticEvent::MouseMove { client } => format!(
                "new MouseEvent('{}', {{bubbles: true, cancelable: true, view: window, clientX: {}, clientY: {}}})",
                self.event_type(),
                client.x,
                client.y
            ),
            SyntheticEvent::KeyDown {
                key,
                ctrl,
                meta,
                shift,
                alt,
            } => format!(
                "new KeyboardEvent('keydown', {{key: {}, ctrlKey: {}, metaKey: {}, shiftKey: {}, altKey: {}, bubbles: true, cancelable: true}})",
                serde_json::Value::String(key.clone()),
                ctrl,
                meta,
                shift,
                alt
            ),
            SyntheticEvent::Input | SyntheticEvent::Change => {
                format!("new Event('{}', {{bubbles: true}})", self.event_type())
            }
            SyntheticEvent::Submit => "new Event('submit', {bubbles: true, cancelable: true})".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SelectorDescriptor;

    #[test]
    fn test_click_carries_coordinates() {
        let event = click(&ClickEvent {
            selector: SelectorDescriptor::default(),
            coordinates: Point::new(12.0, 34.5),
            scroll_position: Point::default(),
            target_text: String::new(),
            target_tag: "button".into(),
        });
        assert_eq!(
            event,
            SyntheticEvent::Click {
                client: Point::new(12.0, 34.5)
            }
        );
        assert_eq!(
            event.to_js(),
            "new MouseEvent('click', {bubbles: true, cancelable: true, view: window, clientX: 12, clientY: 34.5})"
        );
    }

    #[test]
    fn test_keydown_escapes_key() {
        let event = key_down(&KeydownEvent {
            key: "\"".into(),
            ctrl_key: true,
            ..Default::default()
        });
        let js = event.to_js();
        assert!(js.starts_with("new KeyboardEvent('keydown', {key: \"\\\"\", ctrlKey: true, metaKey: false"));
    }

    #[test]
    fn test_notification_events() {
        assert_eq!(input().to_js(), "new Event('input', {bubbles: true})");
        assert_eq!(change().event_type(), "change");
        assert!(submit().to_js().contains("cancelable: true"));
        assert_eq!(
            mouse_move(&MousemoveEvent {
                coordinates: Point::new(1.0, 2.0)
            })
            .event_type(),
            "mousemove"
        );
    }
}
