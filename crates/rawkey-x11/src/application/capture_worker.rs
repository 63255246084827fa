//! CaptureWorker: a capture session on its own thread.
//!
//! The session is created and opened on the worker thread, and the open
//! result is handed back before [`CaptureWorker::spawn`] returns.  After that
//! the thread loops on `next` and passes each event to the sink until the
//! sink returns `false` or the session fails.
//!
//! There is no in-band way to interrupt a blocked `next`.  [`CaptureWorker::stop`]
//! breaks the connection through the session's [`ForceClose`] handle, which
//! the worker observes as [`CaptureError::ConnectionLost`].  A loss caused by
//! `stop` is reported as a clean exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use rawkey_core::{Backend, CaptureError, CaptureSession, DeviceSelector, ForceClose, KeyEvent};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Name of the capture thread.
pub const WORKER_THREAD_NAME: &str = "rawkey-capture";

/// Error type for the worker lifecycle.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The thread ended without reporting whether the session opened.
    #[error("capture thread exited before reporting open status")]
    Vanished,

    #[error("capture thread panicked")]
    Panicked,
}

/// Handle to a running capture thread.
pub struct CaptureWorker {
    shutdown: Arc<dyn ForceClose>,
    stop_requested: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), CaptureError>>>,
}

impl CaptureWorker {
    /// Opens a session over `backend` on a new thread and starts forwarding
    /// events to `sink`.
    ///
    /// `sink` returns `false` to end capture.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Capture`] with the open failure, in which case
    /// the thread has already exited and nothing stays allocated.
    pub fn spawn<B, F>(backend: B, devices: DeviceSelector, mut sink: F) -> Result<Self, WorkerError>
    where
        B: Backend + Send + 'static,
        F: FnMut(KeyEvent) -> bool + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<Arc<dyn ForceClose>, CaptureError>>(1);
        let stop_requested = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop_requested);

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let mut session = CaptureSession::with_devices(backend, devices);
                let opened = session.open().and_then(|()| session.shutdown_handle());
                let failed = opened.as_ref().err().cloned();
                if ready_tx.send(opened).is_err() {
                    debug!("capture worker abandoned before open completed");
                    return Ok(());
                }
                if let Some(e) = failed {
                    return Err(e);
                }

                loop {
                    match session.next() {
                        Ok(event) => {
                            if !sink(event) {
                                debug!("capture sink asked to stop");
                                return Ok(());
                            }
                        }
                        Err(CaptureError::ConnectionLost) if stop_flag.load(Ordering::SeqCst) => {
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    }
                }
            })
            .map_err(WorkerError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(shutdown)) => {
                info!("capture worker running");
                Ok(Self {
                    shutdown,
                    stop_requested,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                // The thread returns right after reporting.
                let _ = thread.join();
                Err(WorkerError::Capture(e))
            }
            Err(_) => Err(match thread.join() {
                Err(_) => WorkerError::Panicked,
                Ok(_) => WorkerError::Vanished,
            }),
        }
    }

    /// `true` once the thread has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Force-closes the connection, joins the thread and returns how capture
    /// ended.
    ///
    /// # Errors
    ///
    /// Returns the error that ended capture before `stop` was called, or
    /// [`WorkerError::Panicked`].
    pub fn stop(mut self) -> Result<(), WorkerError> {
        self.shutdown_and_join()
    }

    fn shutdown_and_join(&mut self) -> Result<(), WorkerError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.stop_requested.store(true, Ordering::SeqCst);
        self.shutdown.force_close();

        let result = thread.join().map_err(|_| WorkerError::Panicked)?;
        match &result {
            Ok(()) => info!("capture worker stopped"),
            Err(e) => warn!("capture worker ended with error: {e}"),
        }
        result.map_err(WorkerError::from)
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        let _ = self.shutdown_and_join();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
