//! In-memory display server for tests.
//!
//! [`MockDisplay`] plays the server side: tests queue native events, bind
//! symbols, pick a failure stage and inspect what the session did.
//! [`MockBackend`] hands out [`MockConnection`]s wired to that display.
//!
//! `next_event` blocks on a condition variable until an event is queued or
//! the display is hung up, which lets worker-thread tests exercise the real
//! blocking path.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use super::{Backend, Connection, ForceClose};
use crate::error::CaptureError;
use crate::filter::{KeycodeRange, NativeEvent};
use crate::mask::{mask_len, DeviceSelector, EventMask};
use crate::resolve::{Keysym, MapSymbolTable, SymbolTable};
use crate::xi::{self, XiVersion};

/// Opcode the mock assigns to the input extension.
pub const MOCK_XI_OPCODE: i32 = 131;

/// Open stage at which the mock display refuses to cooperate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailStage {
    Connect,
    Extension,
    Version,
    /// The subscription mask buffer cannot be reserved.
    Allocation,
    Selection,
}

/// Counters describing what sessions did to the display.
#[derive(Debug, Clone, Default)]
pub struct MockStats {
    pub connects: usize,
    pub releases: usize,
    pub flushes: usize,
    pub selections: Vec<EventMask>,
}

struct DisplayState {
    fail_at: Option<FailStage>,
    server_version: XiVersion,
    range: KeycodeRange,
    group: Option<u8>,
    symbols: MapSymbolTable,
    queue: VecDeque<NativeEvent>,
    hung_up: bool,
    stats: MockStats,
}

struct Shared {
    state: Mutex<DisplayState>,
    wakeup: Condvar,
}

/// Scriptable fake display server.  Clones share state.
#[derive(Clone)]
pub struct MockDisplay {
    shared: Arc<Shared>,
}

impl MockDisplay {
    /// A healthy XI 2.2 display with keycodes `[8, 255]` and group 0.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DisplayState {
                    fail_at: None,
                    server_version: xi::REQUESTED_VERSION,
                    range: KeycodeRange::new(8, 255),
                    group: Some(0),
                    symbols: MapSymbolTable::new(),
                    queue: VecDeque::new(),
                    hung_up: false,
                    stats: MockStats::default(),
                }),
                wakeup: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DisplayState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_at(&self, stage: FailStage) {
        self.lock().fail_at = Some(stage);
    }

    pub fn clear_failure(&self) {
        self.lock().fail_at = None;
    }

    pub fn set_server_version(&self, version: XiVersion) {
        self.lock().server_version = version;
    }

    pub fn set_keycode_range(&self, range: KeycodeRange) {
        self.lock().range = range;
    }

    /// Sets the group reported by keyboard state; `None` means the query fails.
    pub fn set_group(&self, group: Option<u8>) {
        self.lock().group = group;
    }

    pub fn bind_symbol(&self, keycode: u16, group: u8, level: u8, sym: Keysym, name: &str) {
        self.lock().symbols.bind(keycode, group, level, sym, name);
    }

    /// Opcode of the mock input extension.
    pub fn extension(&self) -> i32 {
        MOCK_XI_OPCODE
    }

    /// Queues an arbitrary native event.
    pub fn push_native(&self, event: NativeEvent) {
        self.lock().queue.push_back(event);
        self.shared.wakeup.notify_all();
    }

    /// Queues a raw key press for `keycode`.
    pub fn press(&self, keycode: u32) {
        self.push_native(NativeEvent::generic(MOCK_XI_OPCODE, xi::RAW_KEY_PRESS, Some(keycode)));
    }

    /// Queues a raw key release for `keycode`.
    pub fn release(&self, keycode: u32) {
        self.push_native(NativeEvent::generic(MOCK_XI_OPCODE, xi::RAW_KEY_RELEASE, Some(keycode)));
    }

    /// Breaks the current connection; blocked and future reads fail.
    pub fn hang_up(&self) {
        self.lock().hung_up = true;
        self.shared.wakeup.notify_all();
    }

    pub fn pending_events(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn stats(&self) -> MockStats {
        self.lock().stats.clone()
    }
}

impl Default for MockDisplay {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Backend`] connecting to a [`MockDisplay`].
#[derive(Clone)]
pub struct MockBackend {
    display: MockDisplay,
}

impl MockBackend {
    pub fn new(display: MockDisplay) -> Self {
        Self { display }
    }
}

impl Backend for MockBackend {
    type Connection = MockConnection;

    fn connect(&mut self) -> Result<MockConnection, CaptureError> {
        let mut state = self.display.lock();
        if state.fail_at == Some(FailStage::Connect) {
            return Err(CaptureError::ConnectionFailure("mock display refused".to_string()));
        }
        state.stats.connects += 1;
        state.hung_up = false;
        drop(state);
        Ok(MockConnection {
            display: self.display.clone(),
        })
    }
}

/// Connection to a [`MockDisplay`].  Dropping it counts as a release.
pub struct MockConnection {
    display: MockDisplay,
}

impl SymbolTable for MockConnection {
    fn keysym(&self, keycode: u16, group: u8, level: u8) -> Option<Keysym> {
        self.display.lock().symbols.keysym(keycode, group, level)
    }

    fn keysym_name(&self, sym: Keysym) -> Option<String> {
        self.display.lock().symbols.keysym_name(sym)
    }
}

impl Connection for MockConnection {
    fn query_extension(&mut self, _name: &str) -> Option<i32> {
        match self.display.lock().fail_at {
            Some(FailStage::Extension) => None,
            _ => Some(MOCK_XI_OPCODE),
        }
    }

    fn negotiate_version(&mut self, requested: XiVersion) -> Result<XiVersion, XiVersion> {
        let state = self.display.lock();
        match state.fail_at {
            Some(FailStage::Version) => Err(state.server_version),
            _ => Ok(requested.min(state.server_version)),
        }
    }

    fn keycode_range(&mut self) -> KeycodeRange {
        self.display.lock().range
    }

    fn build_mask(&mut self, devices: DeviceSelector) -> Result<EventMask, CaptureError> {
        if self.display.lock().fail_at == Some(FailStage::Allocation) {
            return Err(CaptureError::AllocationFailure(mask_len(xi::RAW_KEY_RELEASE)));
        }
        EventMask::raw_keys(devices)
    }

    fn select_events(&mut self, mask: &EventMask) -> Result<(), String> {
        let mut state = self.display.lock();
        if state.fail_at == Some(FailStage::Selection) {
            return Err("BadValue (mock)".to_string());
        }
        state.stats.selections.push(mask.clone());
        Ok(())
    }

    fn flush(&mut self) {
        self.display.lock().stats.flushes += 1;
    }

    fn next_event(&mut self) -> Result<NativeEvent, CaptureError> {
        let mut state = self.display.lock();
        loop {
            if state.hung_up {
                return Err(CaptureError::ConnectionLost);
            }
            if let Some(event) = state.queue.pop_front() {
                return Ok(event);
            }
            state = self.display.shared.wakeup.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn current_group(&mut self) -> Option<u8> {
        self.display.lock().group
    }

    fn shutdown_handle(&self) -> Arc<dyn ForceClose> {
        Arc::new(MockShutdown {
            display: self.display.clone(),
        })
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.display.lock().stats.releases += 1;
    }
}

struct MockShutdown {
    display: MockDisplay,
}

impl ForceClose for MockShutdown {
    fn force_close(&self) {
        self.display.hang_up();
    }
}
