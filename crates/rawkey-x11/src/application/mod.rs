//! Application layer: running capture sessions for the rest of a program.
//!
//! - **`capture_worker`** – Owns one [`CaptureSession`](rawkey_core::CaptureSession)
//!   on a dedicated thread, since `next` blocks with no timeout.  Events go
//!   to a caller-supplied sink; stopping force-closes the connection.
//!
//! - **`hotkey_producer`** – A start-hook/unhook facade over the worker for
//!   hotkey matchers.  Callbacks can be swapped or cleared while capture
//!   keeps running, and a dead worker is restarted on the next hook.

pub mod capture_worker;
pub mod hotkey_producer;
