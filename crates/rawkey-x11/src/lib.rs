//! # rawkey-x11
//!
//! Runs `rawkey-core` capture sessions against a real X server.
//!
//! - **`infrastructure::xlib`** – the Xlib/XInput2 [`Backend`](rawkey_core::Backend).
//! - **`infrastructure::config`** – TOML configuration for the monitor.
//! - **`application::capture_worker`** – owns a session on a dedicated
//!   thread and forwards events to a sink.
//! - **`application::hotkey_producer`** – callback-style producer for a
//!   hotkey matcher.
//! - **`ffi`** – status-code C interface over one process-wide session.

pub mod application;
pub mod infrastructure;

#[cfg(target_os = "linux")]
pub mod ffi;
