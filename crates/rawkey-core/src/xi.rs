//! X Input Extension 2 protocol constants shared by the filter, the mask
//! builder and the Xlib backend.
//!
//! Values follow `X11/extensions/XI2.h` and `X11/X.h`.

/// Name passed to `XQueryExtension` to look up the input extension.
pub const EXTENSION_NAME: &str = "XInputExtension";

/// Core protocol event type of extension ("generic") events.
pub const GENERIC_EVENT: i32 = 35;

/// `XI_RawKeyPress` event subtype.
pub const RAW_KEY_PRESS: i32 = 13;

/// `XI_RawKeyRelease` event subtype.
pub const RAW_KEY_RELEASE: i32 = 14;

/// `XIAllDevices` device selector.
pub const ALL_DEVICES: i32 = 0;

/// `XIAllMasterDevices` device selector.
pub const ALL_MASTER_DEVICES: i32 = 1;

/// A `(major, minor)` XI protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct XiVersion {
    pub major: i32,
    pub minor: i32,
}

impl XiVersion {
    pub const fn new(major: i32, minor: i32) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for XiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Version announced to the server during negotiation.
pub const REQUESTED_VERSION: XiVersion = XiVersion::new(2, 2);

/// Oldest server answer that still supports raw key events.
pub const MIN_VERSION: XiVersion = XiVersion::new(2, 0);
