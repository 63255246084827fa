//! End-to-end scenarios for the capture session against the mock display.
//!
//! These drive `CaptureSession` exactly as a consumer would: open, pull
//! events, close, and check the resulting `KeyEvent`s and records.

use rawkey_core::session::mock::{FailStage, MockBackend, MockDisplay};
use rawkey_core::{
    CaptureError, CaptureSession, KeyEvent, KeyEventRecord, Keysym, NativeEvent, SymbolName,
    Transition, UNKNOWN_SYMBOL,
};

const KEY_A: u32 = 38;

fn us_display() -> MockDisplay {
    let display = MockDisplay::new();
    display.bind_symbol(KEY_A as u16, 0, 0, Keysym(0x0061), "a");
    display.bind_symbol(KEY_A as u16, 0, 1, Keysym(0x0041), "A");
    display
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_press_and_release_of_mapped_key() {
    // Arrange
    let display = us_display();
    let mut session = CaptureSession::new(MockBackend::new(display.clone()));
    session.open().expect("open on a compatible display");
    display.press(KEY_A);
    display.release(KEY_A);

    // Act
    let press = session.next().expect("press");
    let release = session.next().expect("release");

    // Assert
    assert_eq!(
        press,
        KeyEvent { transition: Transition::Press, keycode: 38, name: SymbolName::new("a") }
    );
    assert_eq!(
        release,
        KeyEvent { transition: Transition::Release, keycode: 38, name: SymbolName::new("a") }
    );
}

#[test]
fn test_missing_extension_reports_diagnostic_then_not_open() {
    // Arrange
    let display = us_display();
    display.fail_at(FailStage::Extension);
    let mut session = CaptureSession::new(MockBackend::new(display));
    let mut diagnostic = [0u8; 128];

    // Act
    let err = session.open().expect_err("no XInput");
    let written = err.write_diagnostic(&mut diagnostic);

    // Assert
    assert!(matches!(err, CaptureError::ExtensionUnavailable(_)));
    assert!(written > 0, "diagnostic must not be empty");
    assert_eq!(diagnostic[written], 0);
    assert_eq!(session.next(), Err(CaptureError::NotOpen));
}

#[test]
fn test_out_of_range_keycodes_never_surface() {
    // Arrange
    let display = us_display();
    let mut session = CaptureSession::new(MockBackend::new(display.clone()));
    session.open().expect("open");
    for kc in [0, 1, 7, 256, 1024, u32::MAX] {
        display.press(kc);
        display.release(kc);
    }
    display.press(KEY_A);

    // Act
    let event = session.next().expect("event");

    // Assert – every bogus code was consumed without being returned
    assert_eq!(event.keycode, 38);
    assert_eq!(display.pending_events(), 0);
}

#[test]
fn test_level_one_symbol_used_when_group_has_no_primary() {
    // Arrange – group 1 only has a shifted symbol for this key
    let display = us_display();
    display.bind_symbol(KEY_A as u16, 1, 1, Keysym(0x06E6), "Cyrillic_EF");
    display.set_group(Some(1));
    let mut session = CaptureSession::new(MockBackend::new(display.clone()));
    session.open().expect("open");
    display.press(KEY_A);

    // Act
    let event = session.next().expect("event");

    // Assert
    assert_eq!(event.name.as_str(), "Cyrillic_EF");
}

#[test]
fn test_group_without_mapping_falls_back_to_base_layout() {
    let display = us_display();
    display.set_group(Some(2));
    let mut session = CaptureSession::new(MockBackend::new(display.clone()));
    session.open().expect("open");
    display.press(KEY_A);

    assert_eq!(session.next().expect("event").name.as_str(), "a");
}

#[test]
fn test_key_with_no_symbol_anywhere_is_unknown() {
    let display = us_display();
    let mut session = CaptureSession::new(MockBackend::new(display.clone()));
    session.open().expect("open");
    display.press(99);

    assert_eq!(session.next().expect("event").name.as_str(), UNKNOWN_SYMBOL);
}

#[test]
fn test_group_is_read_per_event() {
    // Arrange – layout switches between press and release of the same key
    let display = us_display();
    display.bind_symbol(KEY_A as u16, 1, 0, Keysym(0x06C6), "Cyrillic_ef");
    let mut session = CaptureSession::new(MockBackend::new(display.clone()));
    session.open().expect("open");

    // Act
    display.press(KEY_A);
    let press = session.next().expect("press");
    display.set_group(Some(1));
    display.release(KEY_A);
    let release = session.next().expect("release");

    // Assert – names differ; this is the documented behaviour
    assert_eq!(press.name.as_str(), "a");
    assert_eq!(release.name.as_str(), "Cyrillic_ef");
}

#[test]
fn test_events_convert_to_records_for_boundary_transfer() {
    let display = us_display();
    let mut session = CaptureSession::new(MockBackend::new(display.clone()));
    session.open().expect("open");
    display.push_native(NativeEvent::core(22)); // ConfigureNotify
    display.press(KEY_A);

    let record = KeyEventRecord::from(session.next().expect("event"));

    assert_eq!(record.kind, 1);
    assert_eq!(record.keycode, 38);
    assert_eq!(&record.name[..2], b"a\0");
}

#[test]
fn test_failed_open_can_be_retried() {
    // Arrange
    let display = us_display();
    display.fail_at(FailStage::Selection);
    let mut session = CaptureSession::new(MockBackend::new(display.clone()));
    assert!(matches!(session.open(), Err(CaptureError::EventSelectionFailure(_))));

    // Act
    display.clear_failure();
    session.open().expect("second open succeeds");
    display.press(KEY_A);

    // Assert
    assert_eq!(session.next().expect("event").transition, Transition::Press);
    assert_eq!(display.stats().selections.len(), 1);
}
