//! Raw event filter.
//!
//! The display connection delivers every kind of protocol event: core events,
//! events from unrelated extensions, XI2 events other than raw key
//! transitions, and occasionally keycodes no device can produce.  The filter
//! decides, for one [`NativeEvent`], whether it is a qualifying raw key
//! transition.
//!
//! The checks run in a fixed order and stop at the first failure:
//!
//! ```text
//! category ─▶ extension id ─▶ subtype ─▶ keycode present ─▶ keycode range ─▶ Accept
//!    │             │              │              │                 │
//!    ▼             ▼              ▼              ▼                 ▼
//! NotGeneric  ForeignExtension NotRawKey   MissingDetail     OutOfRange
//! ```
//!
//! The filter is pure: fetching events and releasing their native resources is
//! the connection's job.

use std::fmt;

use crate::event::Transition;
use crate::xi;

/// Inclusive `[min, max]` range of keycodes a device can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeycodeRange {
    pub min: u32,
    pub max: u32,
}

impl KeycodeRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, keycode: u32) -> bool {
        (self.min..=self.max).contains(&keycode)
    }
}

impl fmt::Display for KeycodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Top-level protocol category of a native event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    /// An extension ("generic") event carrying an extension id and subtype.
    Generic,
    /// Any core protocol event, with its core type code.
    Core(i32),
}

/// Backend-neutral description of one event pulled off the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeEvent {
    pub category: EventCategory,
    /// Major opcode of the extension that produced the event.
    pub extension: i32,
    /// Extension-specific subtype.
    pub evtype: i32,
    /// Raw keycode, present only when the connection fetched the event's
    /// payload.
    pub detail: Option<u32>,
}

impl NativeEvent {
    /// A core protocol event of the given type.
    pub fn core(event_type: i32) -> Self {
        Self {
            category: EventCategory::Core(event_type),
            extension: 0,
            evtype: 0,
            detail: None,
        }
    }

    /// A generic extension event.
    pub fn generic(extension: i32, evtype: i32, detail: Option<u32>) -> Self {
        Self {
            category: EventCategory::Generic,
            extension,
            evtype,
            detail,
        }
    }
}

/// Why an event was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    NotGeneric(i32),
    ForeignExtension(i32),
    NotRawKey(i32),
    MissingDetail,
    OutOfRange(u32),
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::NotGeneric(t) => write!(f, "core event type {t}"),
            DiscardReason::ForeignExtension(op) => write!(f, "event from extension opcode {op}"),
            DiscardReason::NotRawKey(ev) => write!(f, "XI2 subtype {ev} is not a raw key event"),
            DiscardReason::MissingDetail => f.write_str("raw key event without payload"),
            DiscardReason::OutOfRange(kc) => write!(f, "keycode {kc} outside device range"),
        }
    }
}

/// Outcome of classifying one [`NativeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept { transition: Transition, keycode: u16 },
    Discard(DiscardReason),
}

/// Filter bound to the extension opcode and keycode range recorded at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawKeyFilter {
    extension: i32,
    range: KeycodeRange,
}

impl RawKeyFilter {
    pub fn new(extension: i32, range: KeycodeRange) -> Self {
        Self { extension, range }
    }

    pub fn extension(&self) -> i32 {
        self.extension
    }

    pub fn range(&self) -> KeycodeRange {
        self.range
    }

    /// Classifies `event`.
    pub fn classify(&self, event: &NativeEvent) -> Verdict {
        if let EventCategory::Core(event_type) = event.category {
            return Verdict::Discard(DiscardReason::NotGeneric(event_type));
        }
        if event.extension != self.extension {
            return Verdict::Discard(DiscardReason::ForeignExtension(event.extension));
        }
        let transition = match event.evtype {
            xi::RAW_KEY_PRESS => Transition::Press,
            xi::RAW_KEY_RELEASE => Transition::Release,
            other => return Verdict::Discard(DiscardReason::NotRawKey(other)),
        };
        let Some(detail) = event.detail else {
            return Verdict::Discard(DiscardReason::MissingDetail);
        };
        if !self.range.contains(detail) {
            return Verdict::Discard(DiscardReason::OutOfRange(detail));
        }
        match u16::try_from(detail) {
            Ok(keycode) => Verdict::Accept { transition, keycode },
            Err(_) => Verdict::Discard(DiscardReason::OutOfRange(detail)),
        }
    }

    /// `true` if `evtype` is one of the raw key subtypes this filter accepts.
    pub fn is_raw_key_subtype(evtype: i32) -> bool {
        matches!(evtype, xi::RAW_KEY_PRESS | xi::RAW_KEY_RELEASE)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
