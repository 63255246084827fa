//! # rawkey-core
//!
//! Platform-agnostic core of rawkey: the pieces of a raw keyboard capture
//! session that do not touch the display server directly.
//!
//! # Architecture overview
//!
//! A capture session subscribes to *raw* key events (delivered regardless of
//! which window has focus) and turns each one into a [`KeyEvent`] carrying a
//! press/release transition, the raw keycode and a symbolic name such as
//! `"a"`, `"Return"` or `"Cyrillic_ze"`.
//!
//! - **`event`** – The value types handed to callers, plus the fixed-size
//!   [`KeyEventRecord`] used when events cross an FFI or process boundary.
//!
//! - **`filter`** – Narrows the heterogeneous native event stream down to raw
//!   key transitions from the negotiated input extension, inside the device
//!   keycode range.  Pure decision logic, no I/O.
//!
//! - **`resolve`** – Maps `(keycode, layout group)` to a symbol name with a
//!   fixed fallback chain, ending in `"(unknown)"`.
//!
//! - **`mask`** – Builds the subscription mask requesting raw key press and
//!   release notifications.
//!
//! - **`session`** – The open/next/close lifecycle, generic over a
//!   [`Backend`] so the same state machine drives a real X display and the
//!   in-memory [`session::mock::MockBackend`].

pub mod error;
pub mod event;
pub mod filter;
pub mod mask;
pub mod resolve;
pub mod session;
pub mod xi;

pub use error::CaptureError;
pub use event::{KeyEvent, KeyEventRecord, RecordError, SymbolName, Transition};
pub use filter::{DiscardReason, EventCategory, KeycodeRange, NativeEvent, RawKeyFilter, Verdict};
pub use mask::{DeviceSelector, EventMask};
pub use resolve::{resolve_symbol_name, Keysym, MapSymbolTable, SymbolTable, UNKNOWN_SYMBOL};
pub use session::{Backend, CaptureSession, Connection, ForceClose};
