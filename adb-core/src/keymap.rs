//! USB HID usage codes (Usage Page 0x07) to 7-bit ADB keycodes.
//!
//! The table targets the Apple Extended Keyboard layout. Entries of 0xFF are
//! usages with no ADB equivalent; they produce no event.

/// Unmapped table entry.
pub const ADB_KEY_NONE: u8 = 0xFF;

// ADB modifier keycodes. The right-hand modifiers use the dedicated wire
// scan codes 0x7B-0x7D, NOT the arrow-key codes 0x3C-0x3E. A keyboard that
// sends arrow codes for right shift/option/control turns every arrow press
// into a chord on the host.
pub const ADB_KEY_LEFT_CTRL: u8 = 0x36;
pub const ADB_KEY_LEFT_SHIFT: u8 = 0x38;
pub const ADB_KEY_LEFT_ALT: u8 = 0x3A; // Option
pub const ADB_KEY_LEFT_GUI: u8 = 0x37; // Command
pub const ADB_KEY_RIGHT_CTRL: u8 = 0x7D;
pub const ADB_KEY_RIGHT_SHIFT: u8 = 0x7B;
pub const ADB_KEY_RIGHT_ALT: u8 = 0x7C;
pub const ADB_KEY_RIGHT_GUI: u8 = 0x37; // same as left Command

// USB boot-report modifier byte bit positions.
pub const USB_MOD_LEFT_CTRL: u8 = 0x01;
pub const USB_MOD_LEFT_SHIFT: u8 = 0x02;
pub const USB_MOD_LEFT_ALT: u8 = 0x04;
pub const USB_MOD_LEFT_GUI: u8 = 0x08;
pub const USB_MOD_RIGHT_CTRL: u8 = 0x10;
pub const USB_MOD_RIGHT_SHIFT: u8 = 0x20;
pub const USB_MOD_RIGHT_ALT: u8 = 0x40;
pub const USB_MOD_RIGHT_GUI: u8 = 0x80;

/// Modifier-byte bit to ADB keycode, in bit order.
pub const MODIFIER_MAP: [(u8, u8); 8] = [
    (USB_MOD_LEFT_CTRL, ADB_KEY_LEFT_CTRL),
    (USB_MOD_LEFT_SHIFT, ADB_KEY_LEFT_SHIFT),
    (USB_MOD_LEFT_ALT, ADB_KEY_LEFT_ALT),
    (USB_MOD_LEFT_GUI, ADB_KEY_LEFT_GUI),
    (USB_MOD_RIGHT_CTRL, ADB_KEY_RIGHT_CTRL),
    (USB_MOD_RIGHT_SHIFT, ADB_KEY_RIGHT_SHIFT),
    (USB_MOD_RIGHT_ALT, ADB_KEY_RIGHT_ALT),
    (USB_MOD_RIGHT_GUI, ADB_KEY_RIGHT_GUI),
];

/// Translate a USB HID usage code to an ADB keycode.
pub fn usb_to_adb(usage: u8) -> Option<u8> {
    match USB_TO_ADB[usage as usize] {
        ADB_KEY_NONE => None,
        code => Some(code),
    }
}

#[rustfmt::skip]
static USB_TO_ADB: [u8; 256] = [
    // 0x00: no event, error rollover, POST fail, undefined
    0xFF, 0xFF, 0xFF, 0xFF,
    // 0x04: A B C D E F G H I J K L M N O P
    0x00, 0x0B, 0x08, 0x02, 0x0E, 0x03, 0x05, 0x04,
    0x22, 0x26, 0x28, 0x25, 0x2E, 0x2D, 0x1F, 0x23,
    // 0x14: Q R S T U V W X Y Z
    0x0C, 0x0F, 0x01, 0x11, 0x20, 0x09, 0x0D, 0x07,
    0x10, 0x06,
    // 0x1E: 1 2 3 4 5 6 7 8 9 0
    0x12, 0x13, 0x14, 0x15, 0x17, 0x16, 0x1A, 0x1C,
    0x19, 0x1D,
    // 0x28: Return, Escape, Backspace, Tab, Space, -, =, [
    0x24, 0x35, 0x33, 0x30, 0x31, 0x1B, 0x18, 0x21,
    // 0x30: ], backslash, non-US #, ;, ', `, comma, period
    0x1E, 0x2A, 0x2A, 0x29, 0x27, 0x32, 0x2B, 0x2F,
    // 0x38: /, Caps Lock, F1..F6
    0x2C, 0x39, 0x7A, 0x78, 0x63, 0x76, 0x60, 0x61,
    // 0x40: F7..F12, PrintScreen (F13), Scroll Lock (F14)
    0x62, 0x64, 0x65, 0x6D, 0x67, 0x6F, 0x69, 0x6B,
    // 0x48: Pause (F15), Insert (Help), Home, PageUp, Delete fwd, End,
    //       PageDown, Right
    0x71, 0x72, 0x73, 0x74, 0x75, 0x77, 0x79, 0x3C,
    // 0x50: Left, Down, Up, Num Lock (Clear), KP /, KP *, KP -, KP +
    0x3B, 0x3D, 0x3E, 0x47, 0x4B, 0x43, 0x4E, 0x45,
    // 0x58: KP Enter, KP 1..7
    0x4C, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59,
    // 0x60: KP 8, KP 9, KP 0, KP ., non-US backslash, Application,
    //       Power, KP =
    0x5B, 0x5C, 0x52, 0x41, 0x0A, 0xFF, 0x7F, 0x51,
    // 0x68: F13..F15 (shared with PrintScreen/ScrollLock/Pause), F16..
    0x69, 0x6B, 0x71, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    // 0x70: F21..F24, Execute, Help, Menu, Select
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x72, 0xFF, 0xFF,
    // 0x78: Stop, Again, Undo, Cut, Copy, Paste, Find, Mute
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    // 0x80: Volume Up, Volume Down, locking mods, KP comma (JIS 0x85)
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x5F, 0xFF, 0x5E,
    // 0x88: International 2..6 (0x89 = Yen)
    0xFF, 0x5D, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    // 0x90: LANG1 (Kana), LANG2 (Eisu)
    0x68, 0x66, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    // 0xA0
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    // 0xB0
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    // 0xC0
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    // 0xD0
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    // 0xE0: LCtrl, LShift, LAlt, LGui, RCtrl, RShift, RAlt, RGui
    0x36, 0x38, 0x3A, 0x37, 0x7D, 0x7B, 0x7C, 0x37,
    // 0xE8
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    // 0xF0
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_digits_and_controls() {
        assert_eq!(usb_to_adb(0x04), Some(0x00)); // A
        assert_eq!(usb_to_adb(0x1D), Some(0x06)); // Z
        assert_eq!(usb_to_adb(0x1E), Some(0x12)); // 1
        assert_eq!(usb_to_adb(0x27), Some(0x1D)); // 0
        assert_eq!(usb_to_adb(0x28), Some(0x24)); // Return
        assert_eq!(usb_to_adb(0x2C), Some(0x31)); // Space
        assert_eq!(usb_to_adb(0x00), None);
        assert_eq!(usb_to_adb(0xA5), None);
    }

    #[test]
    fn arrows_are_not_right_modifiers() {
        assert_eq!(usb_to_adb(0x4F), Some(0x3C)); // Right
        assert_eq!(usb_to_adb(0x50), Some(0x3B)); // Left
        assert_eq!(usb_to_adb(0x51), Some(0x3D)); // Down
        assert_eq!(usb_to_adb(0x52), Some(0x3E)); // Up

        assert_eq!(usb_to_adb(0xE4), Some(ADB_KEY_RIGHT_CTRL));
        assert_eq!(usb_to_adb(0xE5), Some(ADB_KEY_RIGHT_SHIFT));
        assert_eq!(usb_to_adb(0xE6), Some(ADB_KEY_RIGHT_ALT));
        for right in [ADB_KEY_RIGHT_CTRL, ADB_KEY_RIGHT_SHIFT, ADB_KEY_RIGHT_ALT] {
            assert!(right >= 0x7B);
        }
    }

    #[test]
    fn modifier_map_matches_usage_table() {
        // 0xE0..=0xE7 in the usage table must agree with the modifier map
        for (i, (mask, adb)) in MODIFIER_MAP.iter().enumerate() {
            assert_eq!(*mask, 1 << i);
            assert_eq!(usb_to_adb(0xE0 + i as u8), Some(*adb));
        }
    }

    #[test]
    fn all_mapped_codes_fit_in_seven_bits() {
        for usage in 0..=255u8 {
            if let Some(code) = usb_to_adb(usage) {
                assert!(code <= 0x7F, "usage {usage:#04x} maps to {code:#04x}");
            }
        }
    }
}
