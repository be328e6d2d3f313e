//! ADB keyboard device emulator (default address 2).

use heapless::Deque;

use crate::command::{apply_register3, device_info_word};
use crate::event::KeyEvent;

pub const DEFAULT_ADDRESS: u8 = 2;
/// Apple Extended Keyboard.
pub const DEFAULT_HANDLER: u8 = 2;

/// Ring depth for key events already translated to wire form.
pub const KEY_RING_DEPTH: usize = 32;

/// Low byte of a Talk R0 response carrying only one event.
const NO_SECOND_EVENT: u8 = 0xFF;

/// Keyboard register state, owned exclusively by the ADB loop.
///
/// Register 2 is the modifier/LED shadow: the host writes LED bits with
/// Listen R2 and reads the whole word back with Talk R2. We report all
/// modifiers released (active-low) and let the queued key events carry the
/// actual modifier traffic.
pub struct Keyboard {
    address: u8,
    handler_id: u8,
    ring: Deque<u8, KEY_RING_DEPTH>,
    register2: u16,
}

impl Keyboard {
    pub const fn new() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            handler_id: DEFAULT_HANDLER,
            ring: Deque::new(),
            register2: 0xFFFF,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Events already drained from the queue and waiting for a Talk R0.
    pub fn has_buffered(&self) -> bool {
        !self.ring.is_empty()
    }

    /// Handle a Talk command. `None` means no response; the bus stays idle.
    ///
    /// `drain` pops pending events from the cross-context queue; it is called
    /// only here so every response reflects everything enqueued before the
    /// poll started.
    pub fn talk(&mut self, register: u8, drain: impl FnMut() -> Option<KeyEvent>) -> Option<u16> {
        match register {
            0 => {
                self.drain_into_ring(drain);

                let first = self.ring.pop_front()?;
                let second = self.ring.pop_front().unwrap_or(NO_SECOND_EVENT);
                Some(((first as u16) << 8) | second as u16)
            }
            2 => Some(self.register2),
            3 => Some(device_info_word(self.address, self.handler_id)),
            _ => None,
        }
    }

    /// Handle a Listen command with its 16-bit payload.
    pub fn listen(&mut self, register: u8, data: u16) {
        match register {
            2 => self.register2 = data,
            3 => apply_register3(&mut self.address, &mut self.handler_id, data),
            _ => {}
        }
    }

    /// Flush clears the ring only. Events still in the queue survive and
    /// show up after the next Talk R0.
    pub fn flush(&mut self) {
        self.ring.clear();
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn drain_into_ring(&mut self, mut drain: impl FnMut() -> Option<KeyEvent>) {
        while let Some(event) = drain() {
            // full ring drops the newest event
            let _ = self.ring.push_back(event.packed());
        }
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_from(events: &mut Vec<KeyEvent>) -> impl FnMut() -> Option<KeyEvent> + '_ {
        move || {
            if events.is_empty() {
                None
            } else {
                Some(events.remove(0))
            }
        }
    }

    fn none() -> Option<KeyEvent> {
        None
    }

    #[test]
    fn talk_r0_with_nothing_pending_stays_silent() {
        let mut kbd = Keyboard::new();
        assert_eq!(kbd.talk(0, none), None);
    }

    #[test]
    fn single_event_pairs_with_sentinel() {
        // S1: tap of 'A' (ADB 0x00)
        let mut kbd = Keyboard::new();

        let mut events = vec![KeyEvent {
            adb_keycode: 0x00,
            released: false,
        }];
        assert_eq!(kbd.talk(0, drain_from(&mut events)), Some(0x00FF));

        let mut events = vec![KeyEvent {
            adb_keycode: 0x00,
            released: true,
        }];
        assert_eq!(kbd.talk(0, drain_from(&mut events)), Some(0x80FF));

        assert_eq!(kbd.talk(0, none), None);
    }

    #[test]
    fn two_events_share_one_response() {
        let mut kbd = Keyboard::new();
        let mut events = vec![
            KeyEvent {
                adb_keycode: 0x38,
                released: false,
            },
            KeyEvent {
                adb_keycode: 0x00,
                released: false,
            },
        ];
        assert_eq!(kbd.talk(0, drain_from(&mut events)), Some(0x3800));
    }

    #[test]
    fn events_pop_in_fifo_order() {
        let mut kbd = Keyboard::new();
        let mut events: Vec<KeyEvent> = (1..=5)
            .map(|c| KeyEvent {
                adb_keycode: c,
                released: false,
            })
            .collect();

        assert_eq!(kbd.talk(0, drain_from(&mut events)), Some(0x0102));
        assert_eq!(kbd.talk(0, none), Some(0x0304));
        assert_eq!(kbd.talk(0, none), Some(0x05FF));
        assert_eq!(kbd.talk(0, none), None);
    }

    #[test]
    fn ring_overflow_drops_newest() {
        let mut kbd = Keyboard::new();
        let mut events: Vec<KeyEvent> = (0..40)
            .map(|c| KeyEvent {
                adb_keycode: c,
                released: false,
            })
            .collect();
        kbd.talk(3, drain_from(&mut events)); // register 3 does not drain
        assert_eq!(events.len(), 40);

        // first talk drains everything that fits and answers with the oldest pair
        assert_eq!(kbd.talk(0, drain_from(&mut events)), Some(0x0001));

        let mut popped = 2;
        while kbd.talk(0, none).is_some() {
            popped += 2;
        }
        // 32 made it into the ring, the rest were dropped
        assert_eq!(popped, KEY_RING_DEPTH);
    }

    #[test]
    fn register2_round_trips_through_listen() {
        let mut kbd = Keyboard::new();
        assert_eq!(kbd.talk(2, none), Some(0xFFFF));
        kbd.listen(2, 0xFFFB); // caps lock LED on
        assert_eq!(kbd.talk(2, none), Some(0xFFFB));
    }

    #[test]
    fn talk_r3_reports_address_and_handler() {
        let mut kbd = Keyboard::new();
        assert_eq!(kbd.talk(3, none), Some(0x6202));
    }

    #[test]
    fn talk_r1_is_not_implemented() {
        let mut kbd = Keyboard::new();
        assert_eq!(kbd.talk(1, none), None);
    }

    #[test]
    fn enumeration_moves_the_address() {
        // S4
        let mut kbd = Keyboard::new();
        kbd.listen(3, 0x0600);
        assert_eq!(kbd.address(), 6);
        assert_eq!(kbd.talk(3, none), Some(0x6602));

        kbd.listen(3, 0x00FE);
        assert_eq!(kbd.address(), 6);
        assert_eq!(kbd.talk(3, none), Some(0x6602));
    }

    #[test]
    fn flush_clears_ring_but_not_queue() {
        let mut kbd = Keyboard::new();
        let mut ring_events = vec![KeyEvent {
            adb_keycode: 0x01,
            released: false,
        }];
        kbd.talk(0, drain_from(&mut ring_events));

        let mut queued = vec![KeyEvent {
            adb_keycode: 0x02,
            released: false,
        }];
        kbd.flush();
        assert!(!kbd.has_buffered());
        // queued-but-not-drained events still appear on the next poll
        assert_eq!(kbd.talk(0, drain_from(&mut queued)), Some(0x02FF));
    }

    #[test]
    fn reset_restores_defaults() {
        let mut kbd = Keyboard::new();
        let mut events = vec![KeyEvent {
            adb_keycode: 0x01,
            released: false,
        }];
        kbd.listen(3, 0x0605);
        kbd.listen(2, 0x1234);
        kbd.talk(3, drain_from(&mut events));

        kbd.reset();
        assert_eq!(kbd.address(), DEFAULT_ADDRESS);
        assert_eq!(kbd.talk(3, none), Some(0x6202));
        assert_eq!(kbd.talk(2, none), Some(0xFFFF));
        assert_eq!(kbd.talk(0, none), None);
    }
}
