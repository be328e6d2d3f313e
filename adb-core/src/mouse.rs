//! ADB mouse device emulator (default address 3).

use crate::command::{apply_register3, device_info_word};
use crate::event::MouseEvent;

pub const DEFAULT_ADDRESS: u8 = 3;
/// Standard 100 cpi mouse.
pub const DEFAULT_HANDLER: u8 = 2;

/// Clamp to the 7-bit signed range of one ADB motion report.
fn clamp7(value: i16) -> i8 {
    value.clamp(-64, 63) as i8
}

/// Mouse register state, owned exclusively by the ADB loop.
///
/// Motion accumulates between polls; each Talk R0 reports a clamped chunk
/// and keeps the residual, so fast motion is never silently lost. The button
/// bit on the wire is inverted: 1 = released.
pub struct Mouse {
    address: u8,
    handler_id: u8,
    accum_dx: i16,
    accum_dy: i16,
    button_pressed: bool,
    button_changed: bool,
}

impl Mouse {
    pub const fn new() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            handler_id: DEFAULT_HANDLER,
            accum_dx: 0,
            accum_dy: 0,
            button_pressed: false,
            button_changed: false,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Unreported motion or an unreported button edge.
    pub fn has_pending(&self) -> bool {
        self.accum_dx != 0 || self.accum_dy != 0 || self.button_changed
    }

    /// Handle a Talk command. `None` means no response; the bus stays idle.
    pub fn talk(&mut self, register: u8, drain: impl FnMut() -> Option<MouseEvent>) -> Option<u16> {
        match register {
            0 => {
                self.drain_events(drain);

                if !self.has_pending() {
                    return None;
                }

                let dx = clamp7(self.accum_dx);
                let dy = clamp7(self.accum_dy);
                self.accum_dx -= dx as i16;
                self.accum_dy -= dy as i16;
                self.button_changed = false;

                // byte 0: [button (1 = released)][7-bit dy]
                // byte 1: [1 (second button, always released)][7-bit dx]
                let button_bit = if self.button_pressed { 0x00 } else { 0x80 };
                let byte0 = button_bit | (dy as u8 & 0x7F);
                let byte1 = 0x80 | (dx as u8 & 0x7F);
                Some(((byte0 as u16) << 8) | byte1 as u16)
            }
            3 => Some(device_info_word(self.address, self.handler_id)),
            _ => None,
        }
    }

    pub fn listen(&mut self, register: u8, data: u16) {
        if register == 3 {
            apply_register3(&mut self.address, &mut self.handler_id, data);
        }
    }

    /// Flush drops unreported motion and the button edge; the button level
    /// itself is preserved.
    pub fn flush(&mut self) {
        self.accum_dx = 0;
        self.accum_dy = 0;
        self.button_changed = false;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn drain_events(&mut self, mut drain: impl FnMut() -> Option<MouseEvent>) {
        while let Some(event) = drain() {
            self.accum_dx = self.accum_dx.saturating_add(event.dx);
            self.accum_dy = self.accum_dy.saturating_add(event.dy);

            if event.button != self.button_pressed {
                self.button_pressed = event.button;
                self.button_changed = true;
            }
        }
    }
}

impl Default for Mouse {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_from(events: &mut Vec<MouseEvent>) -> impl FnMut() -> Option<MouseEvent> + '_ {
        move || {
            if events.is_empty() {
                None
            } else {
                Some(events.remove(0))
            }
        }
    }

    fn none() -> Option<MouseEvent> {
        None
    }

    #[test]
    fn talk_r0_with_nothing_pending_stays_silent() {
        let mut mouse = Mouse::new();
        assert_eq!(mouse.talk(0, none), None);
    }

    #[test]
    fn saturated_motion_carries_the_residual() {
        // S3: one big report, chunked over successive polls
        let mut mouse = Mouse::new();
        let mut events = vec![MouseEvent {
            dx: 200,
            dy: -200,
            button: false,
        }];

        assert_eq!(mouse.talk(0, drain_from(&mut events)), Some(0xC0BF));

        // residual: dx 137, dy -136
        assert_eq!(mouse.talk(0, none), Some(0xC0BF));
        // residual: dx 74, dy -72
        assert_eq!(mouse.talk(0, none), Some(0xC0BF));
        // residual: dx 11, dy -8
        let last = mouse.talk(0, none).unwrap();
        assert_eq!(last >> 8, 0x80 | (((-8i8) as u8) & 0x7F) as u16);
        assert_eq!(last & 0xFF, (0x80 | 11) as u16);
        assert_eq!(mouse.talk(0, none), None);
    }

    #[test]
    fn total_reported_motion_equals_total_input() {
        let mut mouse = Mouse::new();
        let mut events: Vec<MouseEvent> = (0..10)
            .map(|i| MouseEvent {
                dx: 37 + i,
                dy: -25,
                button: false,
            })
            .collect();
        let expected_dx: i32 = events.iter().map(|e| e.dx as i32).sum();
        let expected_dy: i32 = events.iter().map(|e| e.dy as i32).sum();

        let mut got_dx = 0i32;
        let mut got_dy = 0i32;
        let mut first = true;
        loop {
            let drained = if first {
                mouse.talk(0, drain_from(&mut events))
            } else {
                mouse.talk(0, none)
            };
            first = false;
            let Some(word) = drained else { break };
            let dy = ((word >> 8) as u8 & 0x7F) as i8;
            let dx = (word as u8 & 0x7F) as i8;
            // sign-extend from 7 bits
            got_dx += ((dx << 1) >> 1) as i32;
            got_dy += ((dy << 1) >> 1) as i32;
        }
        assert_eq!((got_dx, got_dy), (expected_dx, expected_dy));
    }

    #[test]
    fn button_edge_is_reported_once() {
        let mut mouse = Mouse::new();
        let mut events = vec![MouseEvent {
            dx: 0,
            dy: 0,
            button: true,
        }];

        // press: button bit 0, no motion
        assert_eq!(mouse.talk(0, drain_from(&mut events)), Some(0x0080));
        // edge consumed, held button is not re-reported
        assert_eq!(mouse.talk(0, none), None);

        let mut events = vec![MouseEvent {
            dx: 0,
            dy: 0,
            button: false,
        }];
        assert_eq!(mouse.talk(0, drain_from(&mut events)), Some(0x8080));
    }

    #[test]
    fn motion_while_button_held_keeps_button_bit() {
        let mut mouse = Mouse::new();
        let mut events = vec![
            MouseEvent {
                dx: 0,
                dy: 0,
                button: true,
            },
            MouseEvent {
                dx: 5,
                dy: 3,
                button: true,
            },
        ];
        assert_eq!(mouse.talk(0, drain_from(&mut events)), Some(0x0385));
    }

    #[test]
    fn flush_zeroes_motion_but_keeps_button_level() {
        let mut mouse = Mouse::new();
        let mut events = vec![MouseEvent {
            dx: 10,
            dy: 10,
            button: true,
        }];
        mouse.talk(3, drain_from(&mut events));
        mouse.talk(0, drain_from(&mut events));
        // queue another burst, drain it, then flush before the host polls
        let mut events = vec![MouseEvent {
            dx: 10,
            dy: 10,
            button: true,
        }];
        mouse.drain_events(drain_from(&mut events));
        mouse.flush();

        assert!(!mouse.has_pending());
        // the held button still reads as pressed on the next motion report
        let mut events = vec![MouseEvent {
            dx: 1,
            dy: 0,
            button: true,
        }];
        assert_eq!(mouse.talk(0, drain_from(&mut events)), Some(0x0081));
    }

    #[test]
    fn talk_r3_reports_address_and_handler() {
        let mut mouse = Mouse::new();
        assert_eq!(mouse.talk(3, none), Some(0x6302));
    }

    #[test]
    fn enumeration_and_reset() {
        let mut mouse = Mouse::new();
        mouse.listen(3, 0x0800);
        assert_eq!(mouse.address(), 8);

        mouse.reset();
        assert_eq!(mouse.address(), DEFAULT_ADDRESS);
        assert_eq!(mouse.talk(3, none), Some(0x6302));
    }
}
