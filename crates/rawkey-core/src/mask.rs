//! Subscription mask for raw key events.
//!
//! XI2 event selection takes a bitmask indexed by event subtype: bit `n` of
//! byte `n / 8` selects subtype `n` (the `XISetMask` convention).  The mask
//! is paired with a device selector.

use crate::error::CaptureError;
use crate::xi;

/// Which input devices the subscription covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    /// Every master and slave device.
    #[default]
    AllDevices,
    /// Master devices only.  Avoids seeing each key twice, once from the
    /// physical (slave) keyboard and once from the virtual core keyboard.
    AllMasterDevices,
}

impl DeviceSelector {
    /// The XI2 device id for this selector.
    pub fn device_id(self) -> i32 {
        match self {
            DeviceSelector::AllDevices => xi::ALL_DEVICES,
            DeviceSelector::AllMasterDevices => xi::ALL_MASTER_DEVICES,
        }
    }
}

/// Owned event mask buffer plus its device selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMask {
    device: DeviceSelector,
    bits: Vec<u8>,
}

impl EventMask {
    /// Builds a mask requesting raw key press and raw key release events.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::AllocationFailure`] if the buffer cannot be
    /// allocated.
    pub fn raw_keys(device: DeviceSelector) -> Result<Self, CaptureError> {
        Self::with_events(device, &[xi::RAW_KEY_PRESS, xi::RAW_KEY_RELEASE])
    }

    /// Builds a mask with the given non-negative subtypes set.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::AllocationFailure`] if the buffer cannot be
    /// allocated.
    pub fn with_events(device: DeviceSelector, events: &[i32]) -> Result<Self, CaptureError> {
        let highest = events.iter().copied().filter(|&e| e >= 0).max().unwrap_or(0);
        let len = mask_len(highest);

        let mut bits = Vec::new();
        bits.try_reserve_exact(len)
            .map_err(|_| CaptureError::AllocationFailure(len))?;
        bits.resize(len, 0);

        for &event in events.iter().filter(|&&e| e >= 0) {
            let idx = (event >> 3) as usize;
            bits[idx] |= 1 << (event & 7);
        }
        Ok(Self { device, bits })
    }

    pub fn device(&self) -> DeviceSelector {
        self.device
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bits
    }

    /// `true` if `event` is selected.
    pub fn is_set(&self, event: i32) -> bool {
        if event < 0 {
            return false;
        }
        self.bits
            .get((event >> 3) as usize)
            .is_some_and(|byte| byte & (1 << (event & 7)) != 0)
    }
}

/// Bytes needed to hold bit `event` (`XIMaskLen`).
pub(crate) fn mask_len(event: i32) -> usize {
    ((event >> 3) + 1) as usize
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_key_mask_selects_press_and_release_only() {
        // Act
        let mask = EventMask::raw_keys(DeviceSelector::AllDevices).expect("mask");

        // Assert
        assert!(mask.is_set(xi::RAW_KEY_PRESS));
        assert!(mask.is_set(xi::RAW_KEY_RELEASE));
        assert!(!mask.is_set(15)); // XI_RawButtonPress
        assert!(!mask.is_set(2)); // XI_KeyPress
    }

    #[test]
    fn test_raw_key_mask_bytes_match_xisetmask_layout() {
        // 13 -> byte 1 bit 5, 14 -> byte 1 bit 6
        let mask = EventMask::raw_keys(DeviceSelector::AllDevices).expect("mask");
        assert_eq!(mask.bytes(), &[0x00, 0x60]);
    }

    #[test]
    fn test_device_selector_ids() {
        assert_eq!(DeviceSelector::AllDevices.device_id(), 0);
        assert_eq!(DeviceSelector::AllMasterDevices.device_id(), 1);
        let mask = EventMask::raw_keys(DeviceSelector::AllMasterDevices).expect("mask");
        assert_eq!(mask.device(), DeviceSelector::AllMasterDevices);
    }

    #[test]
    fn test_negative_and_out_of_mask_events_are_not_set() {
        let mask = EventMask::raw_keys(DeviceSelector::AllDevices).expect("mask");
        assert!(!mask.is_set(-1));
        assert!(!mask.is_set(200));
    }
}
