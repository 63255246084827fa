//! Xlib + XInput2 backend.
//!
//! # What are "raw" events? (for beginners)
//!
//! Ordinary X key events (`KeyPress` / `KeyRelease`) are delivered to the
//! window that has keyboard focus, so a background program never sees keys
//! typed into other applications.  XInput2 adds *raw* events
//! (`XI_RawKeyPress` / `XI_RawKeyRelease`) that report what the device did
//! before any focus or grab processing.  Selecting them on the root window
//! delivers every key transition on the display, whichever window is focused.
//!
//! Raw events arrive as `GenericEvent`s.  The interesting part (the keycode in
//! `XIRawEvent::detail`) lives in a separate *cookie* payload that must be
//! claimed with `XGetEventData` and released with `XFreeEventData`.  Cookies
//! are only claimed for our own extension opcode and the two raw key
//! subtypes; everything else is described to the filter by type alone.
//!
//! # Key names
//!
//! A keycode is a physical key position, not a character.  The character it
//! produces depends on the active *group* (layout, e.g. "us" vs "ru") and
//! *level* (shift state).  Keycodes become keysyms with `XkbKeycodeToKeysym`
//! for a `(group, level)` pair, and keysyms become names (`"a"`,
//! `"Cyrillic_ef"`) with `XKeysymToString`.  The active group is read from
//! `XkbGetState` on the core keyboard each time an event is accepted.
//!
//! # Waiting without handing control to Xlib
//!
//! Xlib treats a broken connection as fatal: its I/O error path ends in
//! `exit()`, and no handler can prevent that.  A blocking `XNextEvent` would
//! also leave no way to interrupt the wait from another thread.  So the
//! connection never blocks inside Xlib:
//!
//! ```text
//! wait_for_event()
//!  └─ loop
//!       ├─ poll(x fd, wake fd, timeout 0)  -- hang-up or wake? -> ConnectionLost
//!       ├─ XPending() > 0                  -- something queued (Xlib or XCB)? -> done
//!       └─ poll(x fd, wake fd, forever)    -- sleep until the socket or the waker fires
//! ```
//!
//! `XPending` is used instead of `XEventsQueued(QueuedAlready)` because
//! round trips made while handling one event (such as `XkbGetState`) can pull
//! the following events off the socket into XCB's buffer.  Those would never
//! wake `poll` again.
//!
//! # Force-close
//!
//! [`XlibShutdown::force_close`] never touches the X socket.  It signals an
//! `eventfd` that sits in the `poll` set next to the connection fd, and sets a
//! flag checked before every poll.  The waiting thread returns
//! [`CaptureError::ConnectionLost`] at its next wait, after finishing any
//! round trip already in flight, and the display is then closed normally with
//! `XCloseDisplay`.
//!
//! Only a real peer hang-up marks the connection broken.  A broken display
//! cannot go through `XCloseDisplay` (it flushes, hits the I/O error path and
//! exits), so that handle is abandoned and only its fd is closed.

use std::ffi::{CStr, CString};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::raw::{c_int, c_uchar, c_uint, c_ushort};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};
use x11::{xinput2, xlib};

use rawkey_core::xi::XiVersion;
use rawkey_core::{
    Backend, CaptureError, Connection, EventMask, ForceClose, KeycodeRange, Keysym, NativeEvent,
    RawKeyFilter, SymbolTable,
};

// ── X11 constants ─────────────────────────────────────────────────────────────

/// `Success` status.
const SUCCESS: c_int = 0;

/// `NoSymbol` keysym.
const NO_SYMBOL: xlib::KeySym = 0;

/// `XkbUseCoreKbd` device spec.
const XKB_USE_CORE_KBD: c_uint = 0x0100;

/// `XkbStateRec` from `X11/XKBlib.h`.
#[repr(C)]
#[derive(Default)]
struct XkbStateRec {
    group: c_uchar,
    locked_group: c_uchar,
    base_group: c_ushort,
    latched_group: c_ushort,
    mods: c_uchar,
    base_mods: c_uchar,
    latched_mods: c_uchar,
    locked_mods: c_uchar,
    compat_state: c_uchar,
    grab_mods: c_uchar,
    compat_grab_mods: c_uchar,
    lookup_mods: c_uchar,
    compat_lookup_mods: c_uchar,
    ptr_buttons: c_ushort,
}

extern "C" {
    // Provided by libX11, which the x11 crate links.
    fn XkbGetState(display: *mut xlib::Display, device_spec: c_uint, state: *mut XkbStateRec) -> c_int;
}

/// Error code recorded by [`record_x_error`] while event selection is in
/// flight.  Zero means no error.
static SELECTION_ERROR: AtomicU8 = AtomicU8::new(0);

unsafe extern "C" fn record_x_error(_display: *mut xlib::Display, event: *mut xlib::XErrorEvent) -> c_int {
    if !event.is_null() {
        // SAFETY: Xlib passes a valid error event to the handler.
        SELECTION_ERROR.store((*event).error_code, Ordering::SeqCst);
    }
    0
}

unsafe extern "C" fn log_io_error(_display: *mut xlib::Display) -> c_int {
    error!("X server connection failed inside Xlib; the process will exit");
    0
}

// ── Waker ─────────────────────────────────────────────────────────────────────

/// Wakes a thread blocked in [`XlibConnection::wait_for_event`].
///
/// An `eventfd` rather than a pipe: writing to it after the connection is
/// gone cannot raise `SIGPIPE` in a host process.
struct Waker {
    requested: AtomicBool,
    fd: OwnedFd,
}

impl Waker {
    fn new() -> std::io::Result<Self> {
        // SAFETY: plain syscall, no pointers.
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self {
            requested: AtomicBool::new(false),
            // SAFETY: `fd` is a fresh descriptor nobody else owns.
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Requests a wake-up.  Returns `false` if one was already requested.
    fn wake(&self) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        let one: u64 = 1;
        // SAFETY: writes the 8 bytes of a live u64 to our eventfd.
        let rc = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                (&one as *const u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        if rc < 0 {
            // The flag is checked before every poll, so the request still lands.
            warn!("eventfd write failed: {}", std::io::Error::last_os_error());
        }
        true
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

// ── Backend ───────────────────────────────────────────────────────────────────

/// Connects to an X display by name, or to `$DISPLAY`.
#[derive(Debug, Clone, Default)]
pub struct XlibBackend {
    display_name: Option<String>,
}

impl XlibBackend {
    /// `display_name` of `None` uses the `DISPLAY` environment variable.
    pub fn new(display_name: Option<String>) -> Self {
        Self { display_name }
    }
}

impl Backend for XlibBackend {
    type Connection = XlibConnection;

    fn connect(&mut self) -> Result<XlibConnection, CaptureError> {
        let name = self
            .display_name
            .as_deref()
            .map(CString::new)
            .transpose()
            .map_err(|_| CaptureError::ConnectionFailure("display name contains a NUL byte".to_string()))?;

        // SAFETY: the pointer is either null or a NUL-terminated string that
        // outlives the call.  The returned display is freed in `Drop`.
        let display = unsafe { xlib::XOpenDisplay(name.as_ref().map_or(std::ptr::null(), |n| n.as_ptr())) };
        if display.is_null() {
            let target = match &self.display_name {
                Some(n) => n.clone(),
                None => std::env::var("DISPLAY").unwrap_or_else(|_| "<unset>".to_string()),
            };
            return Err(CaptureError::ConnectionFailure(format!(
                "XOpenDisplay failed; DISPLAY={target}"
            )));
        }

        let waker = match Waker::new() {
            Ok(w) => w,
            Err(e) => {
                // SAFETY: the display was opened above and is not used again.
                unsafe { xlib::XCloseDisplay(display) };
                return Err(CaptureError::ConnectionFailure(format!("eventfd failed: {e}")));
            }
        };

        // SAFETY: `display` is a valid, freshly opened display.
        let fd = unsafe {
            xlib::XSetIOErrorHandler(Some(log_io_error));
            xlib::XConnectionNumber(display)
        };
        debug!(fd, "X display opened");

        Ok(XlibConnection {
            display,
            xi_opcode: -1,
            fd,
            broken: false,
            waker: Arc::new(waker),
        })
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// An open Xlib display with XI2 raw key selection.
pub struct XlibConnection {
    display: *mut xlib::Display,
    xi_opcode: c_int,
    /// `XConnectionNumber` of `display`.
    fd: RawFd,
    /// Set on a real peer hang-up; the display must not be closed through Xlib.
    broken: bool,
    waker: Arc<Waker>,
}

// SAFETY: Xlib is not thread-safe without XInitThreads, but the display is
// only touched by whichever thread currently owns the connection.  The only
// cross-thread access is `XlibShutdown`, which uses the eventfd, never the
// display.
unsafe impl Send for XlibConnection {}

impl XlibConnection {
    /// Blocks until Xlib has at least one event queued.
    fn wait_for_event(&mut self) -> Result<(), CaptureError> {
        loop {
            self.poll_connection(0)?;
            // SAFETY: the peer had not hung up at the poll above, so
            // any read XPending performs does not reach the fatal I/O path.
            if unsafe { xlib::XPending(self.display) } > 0 {
                return Ok(());
            }
            self.poll_connection(-1)?;
        }
    }

    /// Waits up to `timeout_ms` (-1 = forever) for the X socket or the waker.
    ///
    /// Fails with `ConnectionLost` on a hang-up or a force-close request.
    fn poll_connection(&mut self, timeout_ms: c_int) -> Result<(), CaptureError> {
        if self.broken {
            return Err(CaptureError::ConnectionLost);
        }
        if self.waker.is_requested() {
            debug!("raw key wait interrupted by force-close");
            return Err(CaptureError::ConnectionLost);
        }

        let mut fds = [
            libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN | libc::POLLRDHUP,
                revents: 0,
            },
            libc::pollfd {
                fd: self.waker.raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        // SAFETY: `fds` is a valid array of two pollfds.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(());
            }
            warn!("poll on display connection failed: {err}");
            self.broken = true;
            return Err(CaptureError::ConnectionLost);
        }

        if fds[1].revents & libc::POLLIN != 0 {
            debug!("raw key wait interrupted by force-close");
            return Err(CaptureError::ConnectionLost);
        }
        if fds[0].revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL | libc::POLLRDHUP) != 0 {
            warn!(revents = fds[0].revents, "display connection hung up");
            self.broken = true;
            return Err(CaptureError::ConnectionLost);
        }
        Ok(())
    }

    /// Claims the cookie payload of a raw key event and returns its keycode.
    fn raw_key_detail(&self, cookie: &mut xlib::XGenericEventCookie) -> Option<u32> {
        // SAFETY: `cookie` was produced by XNextEvent on this display.
        if unsafe { xlib::XGetEventData(self.display, cookie) } == xlib::False {
            return None;
        }
        let detail = if cookie.data.is_null() {
            None
        } else {
            // SAFETY: extension is XI2 and evtype is a raw key subtype, so the
            // payload is an XIRawEvent.
            let raw = unsafe { &*(cookie.data as *const xinput2::XIRawEvent) };
            u32::try_from(raw.detail).ok()
        };
        // SAFETY: the payload was claimed by XGetEventData above.
        unsafe { xlib::XFreeEventData(self.display, cookie) };
        detail
    }
}

impl SymbolTable for XlibConnection {
    fn keysym(&self, keycode: u16, group: u8, level: u8) -> Option<Keysym> {
        let keycode = u8::try_from(keycode).ok()?;
        // SAFETY: lookup in the keyboard map (fetched lazily on first use).
        let sym = unsafe {
            xlib::XkbKeycodeToKeysym(self.display, keycode, c_int::from(group), c_int::from(level))
        };
        if sym == NO_SYMBOL {
            return None;
        }
        u32::try_from(sym).ok().map(Keysym)
    }

    fn keysym_name(&self, sym: Keysym) -> Option<String> {
        // SAFETY: XKeysymToString returns static storage or null.
        let ptr = unsafe { xlib::XKeysymToString(xlib::KeySym::from(sym.0)) };
        if ptr.is_null() {
            return None;
        }
        // SAFETY: non-null results are NUL-terminated and never freed.
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

impl Connection for XlibConnection {
    fn query_extension(&mut self, name: &str) -> Option<i32> {
        let name = CString::new(name).ok()?;
        let (mut opcode, mut first_event, mut first_error) = (0, 0, 0);
        // SAFETY: valid display, NUL-terminated name, valid out-pointers.
        let present = unsafe {
            xlib::XQueryExtension(
                self.display,
                name.as_ptr(),
                &mut opcode,
                &mut first_event,
                &mut first_error,
            )
        };
        if present == xlib::False {
            return None;
        }
        self.xi_opcode = opcode;
        Some(opcode)
    }

    fn negotiate_version(&mut self, requested: XiVersion) -> Result<XiVersion, XiVersion> {
        let (mut major, mut minor) = (requested.major, requested.minor);
        // SAFETY: valid display and in/out pointers.
        let status = unsafe { xinput2::XIQueryVersion(self.display, &mut major, &mut minor) };
        let offered = XiVersion::new(major, minor);
        if status == SUCCESS {
            Ok(offered)
        } else {
            Err(offered)
        }
    }

    fn keycode_range(&mut self) -> KeycodeRange {
        let (mut min, mut max) = (0, 0);
        // SAFETY: valid display and out-pointers.
        unsafe { xlib::XDisplayKeycodes(self.display, &mut min, &mut max) };
        KeycodeRange::new(min.max(0) as u32, max.max(0) as u32)
    }

    fn select_events(&mut self, mask: &EventMask) -> Result<(), String> {
        // XISelectEvents copies the mask; this buffer only has to outlive the call.
        let mut bits = mask.bytes().to_vec();
        let mut xi_mask = xinput2::XIEventMask {
            deviceid: mask.device().device_id(),
            mask_len: bits.len() as c_int,
            mask: bits.as_mut_ptr(),
        };

        SELECTION_ERROR.store(0, Ordering::SeqCst);
        // SAFETY: valid display; `xi_mask` points into `bits`, alive for the
        // whole block.  XSync makes any protocol error arrive before the
        // previous handler is restored.
        let status = unsafe {
            let previous = xlib::XSetErrorHandler(Some(record_x_error));
            let root = xlib::XDefaultRootWindow(self.display);
            let status = xinput2::XISelectEvents(self.display, root, &mut xi_mask, 1);
            xlib::XSync(self.display, xlib::False);
            xlib::XSetErrorHandler(previous);
            status
        };

        let error_code = SELECTION_ERROR.swap(0, Ordering::SeqCst);
        if status != SUCCESS {
            return Err(format!("XISelectEvents returned status {status}"));
        }
        if error_code != 0 {
            return Err(format!("X protocol error {error_code} while selecting raw key events"));
        }
        Ok(())
    }

    fn flush(&mut self) {
        // SAFETY: valid display.
        unsafe { xlib::XFlush(self.display) };
    }

    fn next_event(&mut self) -> Result<NativeEvent, CaptureError> {
        self.wait_for_event()?;

        // SAFETY: an event is queued, so XNextEvent returns without I/O.
        let mut event: xlib::XEvent = unsafe { std::mem::zeroed() };
        unsafe { xlib::XNextEvent(self.display, &mut event) };

        let event_type = event.get_type();
        if event_type != xlib::GenericEvent {
            return Ok(NativeEvent::core(event_type));
        }

        // SAFETY: GenericEvent type means the cookie variant is active.
        let mut cookie = unsafe { event.generic_event_cookie };
        let detail = if cookie.extension == self.xi_opcode && RawKeyFilter::is_raw_key_subtype(cookie.evtype) {
            self.raw_key_detail(&mut cookie)
        } else {
            None
        };
        Ok(NativeEvent::generic(cookie.extension, cookie.evtype, detail))
    }

    fn current_group(&mut self) -> Option<u8> {
        let mut state = XkbStateRec::default();
        // SAFETY: valid display and out-pointer.
        let status = unsafe { XkbGetState(self.display, XKB_USE_CORE_KBD, &mut state) };
        (status == SUCCESS).then_some(state.group)
    }

    fn shutdown_handle(&self) -> Arc<dyn ForceClose> {
        Arc::new(XlibShutdown {
            waker: Arc::clone(&self.waker),
        })
    }
}

impl Drop for XlibConnection {
    fn drop(&mut self) {
        if self.broken {
            warn!("display connection broken; abandoning Xlib handle");
            // SAFETY: the fd belongs to this connection and is not used again.
            unsafe { libc::close(self.fd) };
        } else {
            // SAFETY: the display is valid and not used after this point.
            unsafe { xlib::XCloseDisplay(self.display) };
            debug!("X display closed");
        }
    }
}

// ── Shutdown handle ───────────────────────────────────────────────────────────

/// Interrupts an [`XlibConnection`] wait from another thread.
///
/// Outlives the connection safely: once the connection is dropped the
/// eventfd is only kept alive by this handle and nobody polls it.
pub struct XlibShutdown {
    waker: Arc<Waker>,
}

impl ForceClose for XlibShutdown {
    fn force_close(&self) {
        if self.waker.wake() {
            debug!("display connection force-closed");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
