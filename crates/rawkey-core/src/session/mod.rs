//! Capture session lifecycle: open, next, close.
//!
//! A [`CaptureSession`] is either fully closed (no connection, no mask) or
//! fully open (connection, extension opcode, keycode range and mask all
//! valid).  The open state lives in one `Option`, so there is no way to hold
//! half of it.
//!
//! # What happens during `open`? (for beginners)
//!
//! Opening is a fixed sequence of stages.  Each stage can fail with its own
//! [`CaptureError`] variant, and therefore its own status code:
//!
//! ```text
//! open()
//!  └─ Backend::connect()              -- ConnectionFailure (1)
//!  └─ query_extension("XInputExtension")
//!                                     -- ExtensionUnavailable (2)
//!  └─ negotiate_version(2.2), >= 2.0  -- VersionNegotiationFailure (3)
//!  └─ keycode_range()                 -- recorded for the filter
//!  └─ build_mask(devices)             -- AllocationFailure (5)
//!  └─ select_events(mask) + flush()   -- EventSelectionFailure (4)
//! ```
//!
//! Everything acquired along the way is owned by local values.  When a stage
//! fails, `?` returns early and those values are dropped, which releases the
//! connection.  Nothing is stored in the session until every stage has
//! succeeded, so a failed `open` leaves it exactly as closed as before.
//!
//! # Backends
//!
//! The session is generic over a [`Backend`], which produces a
//! [`Connection`] to the display server.  The Xlib backend lives in the
//! `rawkey-x11` crate; [`mock::MockBackend`] is an in-memory stand-in for
//! tests.  Keeping the state machine here, away from Xlib, means every
//! invariant above can be tested without an X server.
//!
//! # Blocking and cancellation
//!
//! [`CaptureSession::next`] blocks until a qualifying event arrives and has
//! no timeout.  Irrelevant native events (other extensions, other subtypes,
//! out-of-range keycodes) are consumed and skipped inside the call.
//!
//! The only way to unblock it from outside is through a [`ForceClose`]
//! handle obtained from [`CaptureSession::shutdown_handle`].  The blocked
//! call then returns [`CaptureError::ConnectionLost`] and the session closes
//! itself; a later `next` returns [`CaptureError::NotOpen`] until `open` is
//! called again.
//!
//! A session is not synchronized.  Run it on one dedicated thread and forward
//! events over a channel if other work needs them.

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::error::CaptureError;
use crate::event::KeyEvent;
use crate::filter::{KeycodeRange, NativeEvent, RawKeyFilter, Verdict};
use crate::mask::{DeviceSelector, EventMask};
use crate::resolve::{resolve_symbol_name, SymbolTable};
use crate::xi::{self, XiVersion};

pub mod mock;

/// Interrupts a connection's blocking wait from another thread.
pub trait ForceClose: Send + Sync {
    /// Makes the pending or next wait return
    /// [`CaptureError::ConnectionLost`].  Idempotent; a no-op once the
    /// connection has been released.
    fn force_close(&self);
}

/// A live connection to the display/input server.
///
/// Resources are released when the connection is dropped.
pub trait Connection: SymbolTable {
    /// Major opcode of extension `name`, or `None` if it is absent.
    fn query_extension(&mut self, name: &str) -> Option<i32>;

    /// Announces `requested` and returns the version the server agreed to.
    ///
    /// `Err` carries the server's version when the request itself failed.
    fn negotiate_version(&mut self, requested: XiVersion) -> Result<XiVersion, XiVersion>;

    /// Inclusive keycode range of the core keyboard.
    fn keycode_range(&mut self) -> KeycodeRange;

    /// Allocates the raw key subscription mask for `devices`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::AllocationFailure`] if the buffer cannot be
    /// reserved.
    fn build_mask(&mut self, devices: DeviceSelector) -> Result<EventMask, CaptureError> {
        EventMask::raw_keys(devices)
    }

    /// Registers `mask` on the root window.
    fn select_events(&mut self, mask: &EventMask) -> Result<(), String>;

    /// Sends buffered requests to the server.
    fn flush(&mut self);

    /// Blocks until the next native event arrives.
    ///
    /// Per-event native resources are released before returning.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ConnectionLost`] when the connection breaks.
    fn next_event(&mut self) -> Result<NativeEvent, CaptureError>;

    /// Currently active layout group, if keyboard state can be queried.
    fn current_group(&mut self) -> Option<u8>;

    /// Handle that can interrupt this connection from another thread.
    fn shutdown_handle(&self) -> Arc<dyn ForceClose>;
}

/// Factory for [`Connection`]s.
pub trait Backend {
    type Connection: Connection;

    /// Establishes a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ConnectionFailure`] if the server is unreachable.
    fn connect(&mut self) -> Result<Self::Connection, CaptureError>;
}

struct OpenState<C> {
    conn: C,
    filter: RawKeyFilter,
    version: XiVersion,
    // Owned for the lifetime of the subscription.
    mask: EventMask,
}

/// A raw key capture session.
pub struct CaptureSession<B: Backend> {
    backend: B,
    devices: DeviceSelector,
    state: Option<OpenState<B::Connection>>,
}

impl<B: Backend> CaptureSession<B> {
    /// Creates a closed session subscribing to all input devices.
    pub fn new(backend: B) -> Self {
        Self::with_devices(backend, DeviceSelector::AllDevices)
    }

    /// Creates a closed session with an explicit device selector.
    pub fn with_devices(backend: B, devices: DeviceSelector) -> Self {
        Self {
            backend,
            devices,
            state: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Keycode range recorded at open.
    pub fn keycode_range(&self) -> Option<KeycodeRange> {
        self.state.as_ref().map(|s| s.filter.range())
    }

    /// XI version agreed with the server at open.
    pub fn negotiated_version(&self) -> Option<XiVersion> {
        self.state.as_ref().map(|s| s.version)
    }

    /// Subscription mask registered at open.
    pub fn event_mask(&self) -> Option<&EventMask> {
        self.state.as_ref().map(|s| &s.mask)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Opens the session.
    ///
    /// A no-op returning `Ok` when already open.  On failure every resource
    /// acquired so far is released and the session stays closed.
    ///
    /// # Errors
    ///
    /// Returns the [`CaptureError`] of the stage that failed.
    pub fn open(&mut self) -> Result<(), CaptureError> {
        if self.state.is_some() {
            debug!("capture session already open");
            return Ok(());
        }

        match establish(&mut self.backend, self.devices) {
            Ok(state) => {
                info!(
                    xi_opcode = state.filter.extension(),
                    xi_version = %state.version,
                    keycodes = %state.filter.range(),
                    devices = ?self.devices,
                    "raw key capture session opened"
                );
                self.state = Some(state);
                Ok(())
            }
            Err(e) => {
                error!("failed to open raw key capture session: {e}");
                Err(e)
            }
        }
    }

    /// Blocks until the next raw key transition and returns it resolved.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::NotOpen`] if the session is closed, and
    /// [`CaptureError::ConnectionLost`] if the connection breaks while
    /// waiting.  After a connection loss the session is closed.
    pub fn next(&mut self) -> Result<KeyEvent, CaptureError> {
        let state = self.state.as_mut().ok_or(CaptureError::NotOpen)?;
        let result = next_qualifying(state);
        if let Err(e) = &result {
            warn!("raw key capture ended: {e}");
            self.close();
        }
        result
    }

    /// Returns a handle that breaks the connection from another thread.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::NotOpen`] if the session is closed.
    pub fn shutdown_handle(&self) -> Result<Arc<dyn ForceClose>, CaptureError> {
        self.state
            .as_ref()
            .map(|s| s.conn.shutdown_handle())
            .ok_or(CaptureError::NotOpen)
    }

    /// Releases the mask and the connection.  Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state.take().is_some() {
            info!("raw key capture session closed");
        }
    }
}

impl<B: Backend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.close();
    }
}

fn establish<B: Backend>(
    backend: &mut B,
    devices: DeviceSelector,
) -> Result<OpenState<B::Connection>, CaptureError> {
    let mut conn = backend.connect()?;

    let extension = conn.query_extension(xi::EXTENSION_NAME).ok_or_else(|| {
        CaptureError::ExtensionUnavailable(format!(
            "{} not present (XI2 requires an X11 session, not Wayland)",
            xi::EXTENSION_NAME
        ))
    })?;

    let version = match conn.negotiate_version(xi::REQUESTED_VERSION) {
        Ok(v) if v >= xi::MIN_VERSION => v,
        Ok(offered) | Err(offered) => {
            return Err(CaptureError::VersionNegotiationFailure {
                requested: xi::REQUESTED_VERSION,
                offered,
            })
        }
    };
    debug!(%version, "negotiated XInput version");

    let range = conn.keycode_range();
    let mask = conn.build_mask(devices)?;
    conn.select_events(&mask)
        .map_err(CaptureError::EventSelectionFailure)?;
    conn.flush();

    Ok(OpenState {
        conn,
        filter: RawKeyFilter::new(extension, range),
        version,
        mask,
    })
}

fn next_qualifying<C: Connection>(state: &mut OpenState<C>) -> Result<KeyEvent, CaptureError> {
    loop {
        let native = state.conn.next_event()?;
        match state.filter.classify(&native) {
            Verdict::Accept { transition, keycode } => {
                let group = state.conn.current_group().unwrap_or(0);
                let name = resolve_symbol_name(&state.conn, keycode, group);
                trace!(%transition, keycode, group, %name, "raw key event");
                return Ok(KeyEvent {
                    transition,
                    keycode,
                    name,
                });
            }
            Verdict::Discard(reason) => trace!(%reason, "discarding native event"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::mock::{FailStage, MockBackend, MockDisplay};
    use super::*;
    use crate::event::Transition;
    use crate::resolve::{Keysym, UNKNOWN_SYMBOL};

    fn display_with_a() -> MockDisplay {
        let display = MockDisplay::new();
        display.bind_symbol(38, 0, 0, Keysym(0x61), "a");
        display
    }

    #[test]
    fn test_open_twice_does_not_reconnect_or_reselect() {
        // Arrange
        let display = MockDisplay::new();
        let mut session = CaptureSession::new(MockBackend::new(display.clone()));

        // Act
        session.open().expect("first open");
        session.open().expect("second open");

        // Assert
        let stats = display.stats();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.selections.len(), 1);
        assert!(session.is_open());
    }

    #[test]
    fn test_open_records_range_version_and_mask() {
        let display = MockDisplay::new();
        display.set_keycode_range(KeycodeRange::new(8, 255));
        let mut session = CaptureSession::new(MockBackend::new(display.clone()));

        session.open().expect("open");

        assert_eq!(session.keycode_range(), Some(KeycodeRange::new(8, 255)));
        assert_eq!(session.negotiated_version(), Some(xi::REQUESTED_VERSION));
        let mask = session.event_mask().expect("mask");
        assert!(mask.is_set(xi::RAW_KEY_PRESS) && mask.is_set(xi::RAW_KEY_RELEASE));
        assert_eq!(display.stats().flushes, 1);
    }

    #[test]
    fn test_close_on_never_opened_session_is_noop() {
        let display = MockDisplay::new();
        let mut session = CaptureSession::new(MockBackend::new(display.clone()));

        session.close();
        session.close();

        assert!(!session.is_open());
        assert_eq!(display.stats().connects, 0);
        assert_eq!(display.stats().releases, 0);
    }

    #[test]
    fn test_close_releases_connection_once() {
        let display = MockDisplay::new();
        let mut session = CaptureSession::new(MockBackend::new(display.clone()));
        session.open().expect("open");

        session.close();
        session.close();

        assert_eq!(display.stats().releases, 1);
        assert_eq!(session.event_mask(), None);
    }

    #[test]
    fn test_next_before_open_is_not_open() {
        let display = display_with_a();
        display.press(38);
        let mut session = CaptureSession::new(MockBackend::new(display.clone()));

        assert_eq!(session.next(), Err(CaptureError::NotOpen));
        assert_eq!(display.pending_events(), 1, "no event may be consumed");
    }

    #[test]
    fn test_each_failure_stage_unwinds_to_closed() {
        let cases = [
            (FailStage::Connect, 1),
            (FailStage::Extension, 2),
            (FailStage::Version, 3),
            (FailStage::Selection, 4),
            (FailStage::Allocation, 5),
        ];
        for (stage, code) in cases {
            // Arrange
            let display = MockDisplay::new();
            display.fail_at(stage);
            let mut session = CaptureSession::new(MockBackend::new(display.clone()));

            // Act
            let err = session.open().expect_err("open must fail");

            // Assert
            assert_eq!(err.status_code(), code, "{stage:?}");
            assert!(!session.is_open());
            let stats = display.stats();
            assert_eq!(stats.connects, stats.releases, "{stage:?} leaked a connection");
        }
    }

    #[test]
    fn test_allocation_failure_releases_connection_before_selection() {
        // Arrange
        let display = MockDisplay::new();
        display.fail_at(FailStage::Allocation);
        let mut session = CaptureSession::new(MockBackend::new(display.clone()));

        // Act
        let err = session.open().expect_err("mask cannot be reserved");

        // Assert
        assert_eq!(err, CaptureError::AllocationFailure(2));
        assert!(session.event_mask().is_none());
        let stats = display.stats();
        assert!(stats.selections.is_empty(), "nothing selected without a mask");
        assert_eq!(stats.releases, 1);
    }

    #[test]
    fn test_server_below_minimum_version_is_rejected() {
        let display = MockDisplay::new();
        display.set_server_version(XiVersion::new(1, 5));
        let mut session = CaptureSession::new(MockBackend::new(display));

        let err = session.open().expect_err("XI 1.5 cannot deliver raw events");

        assert_eq!(
            err,
            CaptureError::VersionNegotiationFailure {
                requested: xi::REQUESTED_VERSION,
                offered: XiVersion::new(1, 5),
            }
        );
    }

    #[test]
    fn test_next_skips_noise_and_resolves_press() {
        // Arrange
        let display = display_with_a();
        display.push_native(NativeEvent::core(12)); // Expose
        display.push_native(NativeEvent::generic(77, xi::RAW_KEY_PRESS, Some(38)));
        display.push_native(NativeEvent::generic(display.extension(), 17, None)); // RawMotion
        display.press(3); // below min keycode
        display.press(38);
        let mut session = CaptureSession::new(MockBackend::new(display.clone()));
        session.open().expect("open");

        // Act
        let event = session.next().expect("event");

        // Assert
        assert_eq!(event.transition, Transition::Press);
        assert_eq!(event.keycode, 38);
        assert_eq!(event.name.as_str(), "a");
        assert_eq!(display.pending_events(), 0);
    }

    #[test]
    fn test_unavailable_group_defaults_to_zero() {
        let display = display_with_a();
        display.set_group(None);
        display.release(38);
        let mut session = CaptureSession::new(MockBackend::new(display));
        session.open().expect("open");

        let event = session.next().expect("event");

        assert_eq!(event.transition, Transition::Release);
        assert_eq!(event.name.as_str(), "a");
    }

    #[test]
    fn test_unmapped_key_is_reported_as_unknown() {
        let display = MockDisplay::new();
        display.press(120);
        let mut session = CaptureSession::new(MockBackend::new(display));
        session.open().expect("open");

        let event = session.next().expect("event");

        assert_eq!(event.name.as_str(), UNKNOWN_SYMBOL);
    }

    #[test]
    fn test_connection_loss_closes_session() {
        // Arrange
        let display = display_with_a();
        let mut session = CaptureSession::new(MockBackend::new(display.clone()));
        session.open().expect("open");
        display.hang_up();

        // Act
        let first = session.next();
        let second = session.next();

        // Assert
        assert_eq!(first, Err(CaptureError::ConnectionLost));
        assert_eq!(second, Err(CaptureError::NotOpen));
        assert_eq!(display.stats().releases, 1);
    }

    #[test]
    fn test_reopen_after_connection_loss() {
        let display = display_with_a();
        let mut session = CaptureSession::new(MockBackend::new(display.clone()));
        session.open().expect("open");
        display.hang_up();
        assert_eq!(session.next(), Err(CaptureError::ConnectionLost));

        session.open().expect("reopen");
        display.press(38);

        assert_eq!(session.next().expect("event").name.as_str(), "a");
        assert_eq!(display.stats().connects, 2);
    }

    #[test]
    fn test_shutdown_handle_requires_open_session() {
        let display = MockDisplay::new();
        let mut session = CaptureSession::new(MockBackend::new(display));
        assert!(matches!(session.shutdown_handle(), Err(CaptureError::NotOpen)));

        session.open().expect("open");
        let handle = session.shutdown_handle().expect("handle");
        handle.force_close();

        assert_eq!(session.next(), Err(CaptureError::ConnectionLost));
    }

    #[test]
    fn test_master_device_selector_reaches_selection() {
        let display = MockDisplay::new();
        let mut session =
            CaptureSession::with_devices(MockBackend::new(display.clone()), DeviceSelector::AllMasterDevices);

        session.open().expect("open");

        assert_eq!(display.stats().selections[0].device(), DeviceSelector::AllMasterDevices);
    }

    #[test]
    fn test_drop_closes_open_session() {
        let display = MockDisplay::new();
        {
            let mut session = CaptureSession::new(MockBackend::new(display.clone()));
            session.open().expect("open");
        }
        assert_eq!(display.stats().releases, 1);
    }
}
