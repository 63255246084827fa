//! Key event value types and the fixed-size event record.
//!
//! A [`KeyEvent`] is built fresh for every call to
//! [`CaptureSession::next`](crate::CaptureSession::next) and owned by the
//! caller afterwards; it never borrows session state.
//!
//! # Record layout
//!
//! [`KeyEventRecord`] mirrors the C struct handed across the FFI boundary:
//!
//! ```text
//! struct { uint8_t kind; uint16_t keycode; char name[64]; }
//! ```
//!
//! For byte-stream transfer [`KeyEventRecord::encode`] produces a packed
//! 67-byte form without padding:
//!
//! ```text
//! [kind:1][keycode:2 big-endian][name:64]
//! ```

use std::fmt;

use thiserror::Error;

/// Capacity of the symbol name buffer, including the NUL terminator.
pub const NAME_CAPACITY: usize = 64;

/// Size of the packed record produced by [`KeyEventRecord::encode`].
pub const RECORD_SIZE: usize = 1 + 2 + NAME_CAPACITY;

/// Copies as much of `src` as fits into `dst`, always leaving room for and
/// writing a NUL terminator.
///
/// Truncation happens on a UTF-8 character boundary so the copied prefix stays
/// valid text.  Bytes after the terminator are zeroed.  Returns the number of
/// text bytes copied; an empty `dst` is left untouched.
pub fn copy_nul_terminated(src: &str, dst: &mut [u8]) -> usize {
    let Some(max_text) = dst.len().checked_sub(1) else {
        return 0;
    };
    let mut len = src.len().min(max_text);
    while !src.is_char_boundary(len) {
        len -= 1;
    }
    dst[..len].copy_from_slice(&src.as_bytes()[..len]);
    dst[len..].fill(0);
    len
}

/// Key transition kind.  Discriminants match the record's `kind` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Transition {
    Press = 1,
    Release = 2,
}

impl TryFrom<u8> for Transition {
    type Error = RecordError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Transition::Press),
            2 => Ok(Transition::Release),
            other => Err(RecordError::UnknownTransition(other)),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Press => f.pad("press"),
            Transition::Release => f.pad("release"),
        }
    }
}

/// A bounded, NUL-terminated symbol name.
///
/// Holds at most `NAME_CAPACITY - 1` bytes of UTF-8 text.  Longer names are
/// truncated to a prefix, never overflowed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolName {
    bytes: [u8; NAME_CAPACITY],
}

impl SymbolName {
    /// Builds a name from `text`, truncating if it does not fit.
    pub fn new(text: &str) -> Self {
        let mut bytes = [0u8; NAME_CAPACITY];
        copy_nul_terminated(text, &mut bytes);
        Self { bytes }
    }

    /// The text up to (not including) the terminator.
    pub fn as_str(&self) -> &str {
        let len = self.len();
        std::str::from_utf8(&self.bytes[..len]).unwrap_or("")
    }

    /// Length of the text in bytes.
    pub fn len(&self) -> usize {
        self.bytes.iter().position(|&b| b == 0).unwrap_or(NAME_CAPACITY)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes[0] == 0
    }

    /// The full fixed-size buffer, terminator and zero padding included.
    pub fn as_bytes_with_nul(&self) -> &[u8; NAME_CAPACITY] {
        &self.bytes
    }
}

impl fmt::Debug for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One resolved raw key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub transition: Transition,
    /// Device-scoped raw keycode, meaningful only relative to the session's
    /// keycode range.
    pub keycode: u16,
    /// Resolved symbol name or `"(unknown)"`.
    pub name: SymbolName,
}

/// Error type for event record decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record too short: need {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("unknown transition kind: {0}")]
    UnknownTransition(u8),

    #[error("symbol name is not NUL-terminated")]
    MissingTerminator,

    #[error("symbol name is not valid UTF-8")]
    InvalidName,
}

/// Fixed-size event record with C layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct KeyEventRecord {
    /// 1 = press, 2 = release.
    pub kind: u8,
    pub keycode: u16,
    /// NUL-terminated symbol name.
    pub name: [u8; NAME_CAPACITY],
}

impl KeyEventRecord {
    /// Encodes the record into its packed byte form.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0] = self.kind;
        buf[1..3].copy_from_slice(&self.keycode.to_be_bytes());
        buf[3..].copy_from_slice(&self.name);
        buf
    }

    /// Decodes a packed record from the front of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if `bytes` is shorter than [`RECORD_SIZE`], the
    /// kind byte is not a known transition, or the name is not terminated
    /// valid UTF-8.
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < RECORD_SIZE {
            return Err(RecordError::InsufficientData {
                needed: RECORD_SIZE,
                available: bytes.len(),
            });
        }
        let mut name = [0u8; NAME_CAPACITY];
        name.copy_from_slice(&bytes[3..RECORD_SIZE]);
        let record = Self {
            kind: bytes[0],
            keycode: u16::from_be_bytes([bytes[1], bytes[2]]),
            name,
        };
        // Validates kind and name.
        KeyEvent::try_from(record)?;
        Ok(record)
    }
}

impl From<KeyEvent> for KeyEventRecord {
    fn from(event: KeyEvent) -> Self {
        Self {
            kind: event.transition as u8,
            keycode: event.keycode,
            name: *event.name.as_bytes_with_nul(),
        }
    }
}

impl TryFrom<KeyEventRecord> for KeyEvent {
    type Error = RecordError;

    fn try_from(record: KeyEventRecord) -> Result<Self, Self::Error> {
        let transition = Transition::try_from(record.kind)?;
        let len = record
            .name
            .iter()
            .position(|&b| b == 0)
            .ok_or(RecordError::MissingTerminator)?;
        let text = std::str::from_utf8(&record.name[..len]).map_err(|_| RecordError::InvalidName)?;
        Ok(KeyEvent {
            transition,
            keycode: record.keycode,
            name: SymbolName::new(text),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
