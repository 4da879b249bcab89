//! Rate limiters for event capture.
//!
//! All three are driven by caller-supplied millisecond timestamps instead of
//! timers, so their behaviour is a pure function of the input sequence.

/// Trailing-edge debounce: an item fires once `quiet` ms pass without a newer
/// [`push`](Debounce::push).
#[derive(Debug, Clone)]
pub struct Debounce<T> {
    quiet: u64,
    pending: Option<(u64, T)>,
}

impl<T> Debounce<T> {
    pub fn new(quiet: u64) -> Self {
        Self {
            quiet,
            pending: None,
        }
    }

    /// Schedule `item` to fire at `now + quiet`, returning the item it
    /// replaces.
    pub fn push(&mut self, now: u64, item: T) -> Option<T> {
        self.pending
            .replace((now + self.quiet, item))
            .map(|(_, old)| old)
    }

    /// When the pending item fires, if there is one.
    pub fn due(&self) -> Option<u64> {
        self.pending.as_ref().map(|(due, _)| *due)
    }

    pub fn peek(&self) -> Option<&T> {
        self.pending.as_ref().map(|(_, item)| item)
    }

    /// Release the pending item if its quiet period is over at `now`
    /// (inclusive), together with its due time.
    pub fn poll(&mut self, now: u64) -> Option<(u64, T)> {
        match self.pending {
            Some((due, _)) if due <= now => self.pending.take(),
            _ => None,
        }
    }

    /// Release the pending item regardless of time.
    pub fn take(&mut self) -> Option<T> {
        self.pending.take().map(|(_, item)| item)
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

/// Leading-edge throttle with a trailing call.
///
/// The first hit fires immediately and opens a `window` ms window
/// `[fire, fire + window)`. Hits inside the window are coalesced into one
/// trailing fire at the window's end, which opens the next window.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: u64,
    last_fire: Option<u64>,
    trailing: bool,
}

impl Throttle {
    pub fn new(window: u64) -> Self {
        Self {
            window,
            last_fire: None,
            trailing: false,
        }
    }

    /// Register a hit. `true` means fire now.
    pub fn hit(&mut self, now: u64) -> bool {
        match self.last_fire {
            Some(last) if now < last + self.window => {
                self.trailing = true;
                false
            }
            _ => {
                self.last_fire = Some(now);
                self.trailing = false;
                true
            }
        }
    }

    /// When the trailing call fires, if one is pending.
    pub fn due(&self) -> Option<u64> {
        match self.last_fire {
            Some(last) if self.trailing => Some(last + self.window),
            _ => None,
        }
    }

    /// Fire the trailing call if it is due at `now`, returning its time.
    pub fn poll(&mut self, now: u64) -> Option<u64> {
        let due = self.due().filter(|due| *due <= now)?;
        self.last_fire = Some(due);
        self.trailing = false;
        Some(due)
    }

    pub fn reset(&mut self) {
        self.last_fire = None;
        self.trailing = false;
    }
}

/// Global spacing: admits an event only if at least `min` ms passed since the
/// last admitted one. Rejected events are dropped, not queued.
#[derive(Debug, Clone)]
pub struct MinInterval {
    min: u64,
    last: Option<u64>,
}

impl MinInterval {
    pub fn new(min: u64) -> Self {
        Self { min, last: None }
    }

    pub fn admit(&mut self, now: u64) -> bool {
        if self
            .last
            .is_some_and(|last| now.saturating_sub(last) < self.min)
        {
            return false;
        }
        self.last = Some(now);
        true
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
