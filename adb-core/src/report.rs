//! BLE HID report parsing: keyboard report diffing, mouse report decoding,
//! and report-map device classification.

use crate::event::{KeyEvent, MouseEvent};
use crate::keymap::{self, MODIFIER_MAP};

/// Boot-protocol keyboard reports are 8 bytes; anything shorter is dropped.
pub const KEYBOARD_REPORT_LEN: usize = 8;

/// What a HID peer turned out to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceKind {
    Keyboard,
    Mouse,
}

/// Diffs successive 8-byte keyboard reports into press/release events.
///
/// Byte 0 is the modifier bitmap, bytes 2..7 hold up to six pressed usage
/// codes. Events come out in a fixed order per report: modifier changes,
/// then releases, then presses.
pub struct KeyboardReportState {
    prev_keys: [u8; 6],
    prev_modifiers: u8,
}

impl KeyboardReportState {
    pub const fn new() -> Self {
        Self {
            prev_keys: [0; 6],
            prev_modifiers: 0,
        }
    }

    /// Forget held keys, e.g. after a link drop. The next report is then
    /// diffed against an empty state, so keys still held re-press cleanly.
    pub fn clear(&mut self) {
        self.prev_keys = [0; 6];
        self.prev_modifiers = 0;
    }

    /// Diff `report` against the previous one, emitting one [`KeyEvent`] per
    /// change. Returns `false` for short reports, which are dropped whole.
    pub fn process(&mut self, report: &[u8], mut emit: impl FnMut(KeyEvent)) -> bool {
        if report.len() < KEYBOARD_REPORT_LEN {
            return false;
        }

        let modifiers = report[0];
        let keys = &report[2..8];

        let changed = modifiers ^ self.prev_modifiers;
        if changed != 0 {
            for (mask, adb_keycode) in MODIFIER_MAP {
                if changed & mask != 0 {
                    emit(KeyEvent {
                        adb_keycode,
                        released: modifiers & mask == 0,
                    });
                }
            }
            self.prev_modifiers = modifiers;
        }

        // releases: held before, gone now
        for &prev in self.prev_keys.iter().filter(|&&k| k != 0) {
            if !keys.contains(&prev) {
                if let Some(adb_keycode) = keymap::usb_to_adb(prev) {
                    emit(KeyEvent {
                        adb_keycode,
                        released: true,
                    });
                }
            }
        }

        // presses: present now, not held before
        for &current in keys.iter().filter(|&&k| k != 0) {
            if !self.prev_keys.contains(&current) {
                if let Some(adb_keycode) = keymap::usb_to_adb(current) {
                    emit(KeyEvent {
                        adb_keycode,
                        released: false,
                    });
                }
            }
        }

        self.prev_keys.copy_from_slice(keys);
        true
    }
}

impl Default for KeyboardReportState {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a mouse report.
///
/// Five or more bytes is Report Protocol with 16-bit little-endian deltas;
/// three or four bytes is Boot Protocol with 8-bit deltas; anything shorter
/// is dropped.
pub fn parse_mouse_report(data: &[u8]) -> Option<MouseEvent> {
    if data.len() >= 5 {
        Some(MouseEvent {
            button: data[0] & 0x01 != 0,
            dx: i16::from_le_bytes([data[1], data[2]]),
            dy: i16::from_le_bytes([data[3], data[4]]),
        })
    } else if data.len() >= 3 {
        Some(MouseEvent {
            button: data[0] & 0x01 != 0,
            dx: data[1] as i8 as i16,
            dy: data[2] as i8 as i16,
        })
    } else {
        None
    }
}

/// Guess the device kind from a HID Report Map.
///
/// Minimal scanner for the item pair `[Usage Page = Generic Desktop]
/// [Usage = x]` (`05 01 09 xx`): Usage 0x06 is a keyboard, 0x02 a mouse.
/// Deliberately shallow; Boot characteristics are the preferred signal and
/// checked before this is consulted.
pub fn classify_report_map(map: &[u8]) -> Option<DeviceKind> {
    let mut saw_mouse = false;

    let mut i = 0;
    while i + 3 < map.len() {
        if map[i] == 0x05 && map[i + 1] == 0x01 && map[i + 2] == 0x09 {
            match map[i + 3] {
                0x06 => return Some(DeviceKind::Keyboard),
                0x02 => saw_mouse = true,
                _ => {}
            }
        }
        i += 1;
    }

    saw_mouse.then_some(DeviceKind::Mouse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(state: &mut KeyboardReportState, report: &[u8]) -> Vec<KeyEvent> {
        let mut events = Vec::new();
        assert!(state.process(report, |e| events.push(e)));
        events
    }

    fn key(adb_keycode: u8, released: bool) -> KeyEvent {
        KeyEvent {
            adb_keycode,
            released,
        }
    }

    #[test]
    fn key_tap_emits_press_then_release() {
        // S1: USB 0x04 ('A') -> ADB 0x00
        let mut state = KeyboardReportState::new();
        let events = collect(&mut state, &[0, 0, 0x04, 0, 0, 0, 0, 0]);
        assert_eq!(events, vec![key(0x00, false)]);

        let events = collect(&mut state, &[0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(events, vec![key(0x00, true)]);
    }

    #[test]
    fn shift_a_orders_modifier_before_key() {
        // S2
        let mut state = KeyboardReportState::new();
        let events = collect(&mut state, &[0x02, 0, 0x04, 0, 0, 0, 0, 0]);
        assert_eq!(events, vec![key(0x38, false), key(0x00, false)]);

        let events = collect(&mut state, &[0x02, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(events, vec![key(0x00, true)]);

        let events = collect(&mut state, &[0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(events, vec![key(0x38, true)]);
    }

    #[test]
    fn right_modifiers_use_wire_scan_codes() {
        let mut state = KeyboardReportState::new();
        let events = collect(&mut state, &[0x70, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            events,
            vec![key(0x7D, false), key(0x7B, false), key(0x7C, false)]
        );
    }

    #[test]
    fn rollover_within_a_report_is_a_diff_not_a_replay() {
        let mut state = KeyboardReportState::new();
        collect(&mut state, &[0, 0, 0x04, 0x05, 0, 0, 0, 0]);
        // 'A' released, 'C' pressed, 'B' still held and silent
        let events = collect(&mut state, &[0, 0, 0x05, 0x06, 0, 0, 0, 0]);
        assert_eq!(events, vec![key(0x00, true), key(0x08, false)]);
    }

    #[test]
    fn unmapped_usages_emit_nothing() {
        let mut state = KeyboardReportState::new();
        let events = collect(&mut state, &[0, 0, 0xA5, 0, 0, 0, 0, 0]);
        assert!(events.is_empty());
    }

    #[test]
    fn short_keyboard_reports_are_dropped() {
        let mut state = KeyboardReportState::new();
        let mut emitted = false;
        assert!(!state.process(&[0, 0, 0x04], |_| emitted = true));
        assert!(!emitted);
        // and they must not disturb the diff state
        let events = collect(&mut state, &[0, 0, 0x04, 0, 0, 0, 0, 0]);
        assert_eq!(events, vec![key(0x00, false)]);
    }

    #[test]
    fn clear_forgets_held_keys() {
        let mut state = KeyboardReportState::new();
        collect(&mut state, &[0x02, 0, 0x04, 0, 0, 0, 0, 0]);
        state.clear();
        // same keys held -> re-pressed, no phantom releases
        let events = collect(&mut state, &[0x02, 0, 0x04, 0, 0, 0, 0, 0]);
        assert_eq!(events, vec![key(0x38, false), key(0x00, false)]);
    }

    #[test]
    fn mouse_report_protocol_has_16bit_deltas() {
        let evt = parse_mouse_report(&[0x01, 0x2C, 0x01, 0xD4, 0xFE]).unwrap();
        assert_eq!(
            evt,
            MouseEvent {
                dx: 300,
                dy: -300,
                button: true
            }
        );
    }

    #[test]
    fn mouse_boot_protocol_has_8bit_deltas() {
        let evt = parse_mouse_report(&[0x00, 0xFB, 0x10]).unwrap();
        assert_eq!(
            evt,
            MouseEvent {
                dx: -5,
                dy: 16,
                button: false
            }
        );
    }

    #[test]
    fn runt_mouse_reports_are_dropped() {
        assert_eq!(parse_mouse_report(&[0x01, 0x05]), None);
        assert_eq!(parse_mouse_report(&[]), None);
    }

    #[test]
    fn report_map_classification() {
        // Usage Page (Generic Desktop), Usage (Keyboard)
        assert_eq!(
            classify_report_map(&[0x05, 0x01, 0x09, 0x06, 0xA1, 0x01]),
            Some(DeviceKind::Keyboard)
        );
        // Usage Page (Generic Desktop), Usage (Mouse)
        assert_eq!(
            classify_report_map(&[0x05, 0x01, 0x09, 0x02, 0xA1, 0x01]),
            Some(DeviceKind::Mouse)
        );
        // keyboard wins when a combo device describes both
        assert_eq!(
            classify_report_map(&[
                0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, 0xC0, 0x05, 0x01, 0x09, 0x06
            ]),
            Some(DeviceKind::Keyboard)
        );
        // consumer-control-only map stays unclassified
        assert_eq!(classify_report_map(&[0x05, 0x0C, 0x09, 0x01]), None);
        assert_eq!(classify_report_map(&[]), None);
    }
}
