//! C interface over one process-wide capture session.
//!
//! | function | returns |
//! |---|---|
//! | `rawkey_open(err, err_len)` | 0, or the failing stage's status code; diagnostic written to `err` |
//! | `rawkey_next(out)` | 0 with `*out` filled, or `NotOpen` / `ConnectionLost` |
//! | `rawkey_close()` | nothing |
//!
//! # Threading
//!
//! `rawkey_next` blocks with the session lock held.  To let `rawkey_close`
//! work from another thread (the usual "unhook" pattern), the session's
//! [`ForceClose`] handle is kept in a separate slot.  `rawkey_close` fires it
//! first, which makes the blocked `rawkey_next` return `ConnectionLost` and
//! release the lock, and only then takes the lock to finish closing.

use std::os::raw::{c_char, c_int};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use rawkey_core::error::STATUS_OK;
use rawkey_core::{Backend, CaptureError, CaptureSession, ForceClose, KeyEvent, KeyEventRecord};

use crate::infrastructure::xlib::XlibBackend;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A session shared between a capture thread and a closing thread.
struct SharedSession<B: Backend> {
    session: Mutex<CaptureSession<B>>,
    shutdown: Mutex<Option<Arc<dyn ForceClose>>>,
}

impl<B: Backend> SharedSession<B> {
    fn new(backend: B) -> Self {
        Self {
            session: Mutex::new(CaptureSession::new(backend)),
            shutdown: Mutex::new(None),
        }
    }

    fn open(&self) -> Result<(), CaptureError> {
        let mut session = lock(&self.session);
        session.open()?;
        *lock(&self.shutdown) = Some(session.shutdown_handle()?);
        Ok(())
    }

    fn next(&self) -> Result<KeyEvent, CaptureError> {
        lock(&self.session).next()
    }

    fn close(&self) {
        let handle = lock(&self.shutdown).take();
        if let Some(handle) = handle {
            handle.force_close();
        }
        lock(&self.session).close();
    }
}

static SESSION: OnceLock<SharedSession<XlibBackend>> = OnceLock::new();

fn session() -> &'static SharedSession<XlibBackend> {
    SESSION.get_or_init(|| SharedSession::new(XlibBackend::new(None)))
}

/// Opens the session on `$DISPLAY`.  Idempotent.
///
/// # Safety
///
/// `err` must be null or point to at least `err_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn rawkey_open(err: *mut c_char, err_len: c_int) -> c_int {
    match session().open() {
        Ok(()) => STATUS_OK,
        Err(e) => {
            if let Ok(len) = usize::try_from(err_len) {
                if !err.is_null() && len > 0 {
                    // SAFETY: caller guarantees `len` writable bytes at `err`.
                    let buf = std::slice::from_raw_parts_mut(err.cast::<u8>(), len);
                    e.write_diagnostic(buf);
                }
            }
            e.status_code()
        }
    }
}

/// Blocks until the next key transition and stores it in `*out`.
///
/// With a null `out` the event is consumed and dropped.
///
/// # Safety
///
/// `out` must be null or point to a writable [`KeyEventRecord`].
#[no_mangle]
pub unsafe extern "C" fn rawkey_next(out: *mut KeyEventRecord) -> c_int {
    match session().next() {
        Ok(event) => {
            if !out.is_null() {
                // SAFETY: caller guarantees `out` is writable.
                out.write(KeyEventRecord::from(event));
            }
            STATUS_OK
        }
        Err(e) => e.status_code(),
    }
}

/// Closes the session, interrupting a `rawkey_next` blocked on another
/// thread.  Safe to call at any time, any number of times.
#[no_mangle]
pub extern "C" fn rawkey_close() {
    session().close();
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rawkey_core::session::mock::{MockBackend, MockDisplay};
    use rawkey_core::{Keysym, SymbolName, Transition};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn shared(display: &MockDisplay) -> Arc<SharedSession<MockBackend>> {
        Arc::new(SharedSession::new(MockBackend::new(display.clone())))
    }

    #[test]
    fn test_close_from_other_thread_unblocks_waiting_next() {
        // Arrange
        let display = MockDisplay::new();
        let session = shared(&display);
        session.open().expect("open");
        let (started_tx, started_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let waiter = Arc::clone(&session);
        let capture = thread::spawn(move || {
            started_tx.send(()).unwrap();
            done_tx.send(waiter.next()).unwrap();
        });
        started_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));

        // Act
        session.close();
        let result = done_rx.recv_timeout(Duration::from_secs(5)).expect("next returned");

        // Assert
        assert!(
            matches!(result, Err(CaptureError::ConnectionLost) | Err(CaptureError::NotOpen)),
            "got {result:?}"
        );
        capture.join().unwrap();
        assert_eq!(session.next(), Err(CaptureError::NotOpen));
        assert_eq!(display.stats().releases, 1);
    }

    #[test]
    fn test_reopen_after_close_delivers_events() {
        // Arrange
        let display = MockDisplay::new();
        display.bind_symbol(38, 0, 0, Keysym(0x61), "a");
        let session = shared(&display);
        session.open().expect("open");
        session.close();

        // Act
        session.open().expect("reopen");
        display.press(38);
        let event = session.next().expect("event");

        // Assert
        assert_eq!(event.transition, Transition::Press);
        assert_eq!(event.name.as_str(), "a");
        session.close();
    }

    #[test]
    fn test_close_without_open_is_noop() {
        let display = MockDisplay::new();
        let session = shared(&display);

        session.close();
        session.close();

        assert_eq!(display.stats().connects, 0);
    }

    // The exported functions share the process-wide Xlib session, so they
    // only exercise paths that leave it closed.

    #[test]
    fn test_exported_next_before_open_is_not_open() {
        // Arrange
        rawkey_close();
        let mut record = KeyEventRecord::from(KeyEvent {
            transition: Transition::Press,
            keycode: 0,
            name: SymbolName::new(""),
        });

        // Act
        let status = unsafe { rawkey_next(&mut record) };

        // Assert
        assert_eq!(status, CaptureError::NotOpen.status_code());
    }
}
