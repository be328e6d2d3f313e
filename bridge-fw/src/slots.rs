//! Per-slot BLE connection bookkeeping.
//!
//! One slot per emulated device kind. The device tasks own the slot
//! transitions; the scanner and the status task only read, except for the
//! Disconnected <-> Scanning flip and the sighted signal.

use core::cell::RefCell;

use adb_core::report::DeviceKind;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use heapless::String;
use portable_atomic::{AtomicU32, AtomicU8, Ordering};
use trouble_host::prelude::AddrKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum SlotState {
    Disconnected = 0,
    Scanning = 1,
    Connecting = 2,
    Discovering = 3,
    Connected = 4,
    Reconnecting = 5,
}

impl SlotState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SlotState::Scanning,
            2 => SlotState::Connecting,
            3 => SlotState::Discovering,
            4 => SlotState::Connected,
            5 => SlotState::Reconnecting,
            _ => SlotState::Disconnected,
        }
    }
}

/// Identity of the peer a slot is (or was) attached to.
#[derive(Clone)]
pub struct Peer {
    pub addr: [u8; 6],
    pub addr_kind: AddrKind,
    pub name: String<24>,
}

pub struct Slot {
    state: AtomicU8,
    peer: Mutex<CriticalSectionRawMutex, RefCell<Option<Peer>>>,
    attempts: AtomicU32,
    /// Fired by the scan handler when the bonded peer advertises while this
    /// slot is reconnecting; cuts the backoff short.
    sighted: Signal<CriticalSectionRawMutex, ()>,
}

impl Slot {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(SlotState::Disconnected as u8),
            peer: Mutex::new(RefCell::new(None)),
            attempts: AtomicU32::new(0),
            sighted: Signal::new(),
        }
    }

    pub fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: SlotState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Take the slot for a freshly classified peer. Only an unattached slot
    /// (Disconnected or Scanning) can be claimed.
    pub fn try_claim(&self) -> bool {
        for from in [SlotState::Disconnected, SlotState::Scanning] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    SlotState::Connecting as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    pub fn release(&self) {
        self.peer.lock(|p| *p.borrow_mut() = None);
        self.attempts.store(0, Ordering::Relaxed);
        self.set_state(SlotState::Disconnected);
    }

    pub fn set_peer(&self, peer: Peer) {
        self.peer.lock(|p| *p.borrow_mut() = Some(peer));
    }

    /// Bonded peer address while the slot is attached or reconnecting.
    pub fn bonded_addr(&self) -> Option<[u8; 6]> {
        self.peer.lock(|p| p.borrow().as_ref().map(|peer| peer.addr))
    }

    pub fn sighted(&self) -> &Signal<CriticalSectionRawMutex, ()> {
        &self.sighted
    }

    pub fn set_attempts(&self, attempts: u32) {
        self.attempts.store(attempts, Ordering::Relaxed);
    }
}

pub struct Slots {
    pub keyboard: Slot,
    pub mouse: Slot,
}

pub static SLOTS: Slots = Slots::new();

impl Slots {
    const fn new() -> Self {
        Self {
            keyboard: Slot::new(),
            mouse: Slot::new(),
        }
    }

    pub fn get(&self, kind: DeviceKind) -> &Slot {
        match kind {
            DeviceKind::Keyboard => &self.keyboard,
            DeviceKind::Mouse => &self.mouse,
        }
    }

    pub fn any_disconnected(&self) -> bool {
        self.keyboard.state() == SlotState::Disconnected
            || self.mouse.state() == SlotState::Disconnected
    }

    /// Flip empty slots into Scanning for the duration of a scan pass.
    pub fn mark_scanning(&self) {
        for slot in [&self.keyboard, &self.mouse] {
            let _ = slot.state.compare_exchange(
                SlotState::Disconnected as u8,
                SlotState::Scanning as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    pub fn clear_scanning(&self) {
        for slot in [&self.keyboard, &self.mouse] {
            let _ = slot.state.compare_exchange(
                SlotState::Scanning as u8,
                SlotState::Disconnected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}
