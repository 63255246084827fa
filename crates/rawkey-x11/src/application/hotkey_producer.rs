//! HotkeyProducer: feeds key events to a replaceable callback.
//!
//! `start_hook` installs a callback and starts capture if it is not already
//! running.  Calling it again while capture runs only swaps the callback.
//! `unhook` clears the callback but leaves capture running, so hooking again
//! is cheap.
//!
//! When the worker ends on its own (lost connection) the producer counts as
//! not started, and the next `start_hook` opens a fresh session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rawkey_core::{Backend, DeviceSelector, KeyEvent, Transition};
use tracing::{debug, info, warn};

use super::capture_worker::{CaptureWorker, WorkerError};

/// One key transition as seen by a hotkey matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyData {
    /// Raw device keycode.
    pub key_code: u16,
    /// Layout-resolved key name, e.g. `"a"` or `"Cyrillic_ze"`.
    pub locale_name: String,
    pub transition: Transition,
}

impl From<KeyEvent> for KeyData {
    fn from(event: KeyEvent) -> Self {
        Self {
            key_code: event.keycode,
            locale_name: event.name.as_str().to_string(),
            transition: event.transition,
        }
    }
}

/// Callback invoked for every captured key transition.
pub type HotkeyCallback = Arc<dyn Fn(KeyData) + Send + Sync>;

type CallbackSlot = Arc<Mutex<Option<HotkeyCallback>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Start-hook/unhook producer over a [`CaptureWorker`].
///
/// Each start clones `backend`, so one producer can reopen any number of
/// sessions.
pub struct HotkeyProducer<B> {
    backend: B,
    devices: DeviceSelector,
    callback: CallbackSlot,
    worker: Mutex<Option<CaptureWorker>>,
}

impl<B> HotkeyProducer<B>
where
    B: Backend + Clone + Send + 'static,
{
    pub fn new(backend: B, devices: DeviceSelector) -> Self {
        Self {
            backend,
            devices,
            callback: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
        }
    }

    /// Installs `callback` and starts capture unless it is already running.
    ///
    /// # Errors
    ///
    /// Returns the open failure if capture had to be started and could not
    /// be.  The callback stays installed.
    pub fn start_hook<F>(&self, callback: F) -> Result<(), WorkerError>
    where
        F: Fn(KeyData) + Send + Sync + 'static,
    {
        info!("starting hotkey producer hook");
        *lock(&self.callback) = Some(Arc::new(callback));

        let mut worker = lock(&self.worker);
        if let Some(running) = worker.as_ref() {
            if !running.is_finished() {
                debug!("hotkey producer already started; callback updated");
                return Ok(());
            }
        }
        if let Some(dead) = worker.take() {
            if let Err(e) = dead.stop() {
                warn!("previous capture worker ended: {e}");
            }
        }

        let slot = Arc::clone(&self.callback);
        *worker = Some(CaptureWorker::spawn(self.backend.clone(), self.devices, move |event| {
            let callback = lock(&slot).clone();
            if let Some(callback) = callback {
                callback(KeyData::from(event));
            }
            true
        })?);
        info!("hotkey producer started");
        Ok(())
    }

    /// Clears the callback.  Capture keeps running.
    pub fn unhook(&self) {
        *lock(&self.callback) = None;
        debug!("hotkey producer unhooked");
    }

    /// `true` while a capture worker is alive.
    pub fn is_started(&self) -> bool {
        lock(&self.worker).as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stops capture and clears the callback.
    ///
    /// # Errors
    ///
    /// Returns how the worker ended if it failed before being stopped.
    pub fn shutdown(&self) -> Result<(), WorkerError> {
        self.unhook();
        match lock(&self.worker).take() {
            Some(worker) => worker.stop(),
            None => Ok(()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
