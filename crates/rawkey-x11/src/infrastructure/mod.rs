//! Infrastructure layer: the X11 backend and configuration storage.

pub mod config;

#[cfg(target_os = "linux")]
pub mod xlib;
