//! Diagnostic counters and the periodic status line.
//!
//! Counters are write-by-one-context, read-by-anyone; they are telemetry,
//! not synchronization. The ADB loop bumps its counters from core 1, so
//! everything here goes through `portable-atomic`'s critical-section
//! fallback, which is cross-core safe on the RP2040's spinlocks.

use defmt::info;
use embassy_time::Timer;
use portable_atomic::{AtomicU32, Ordering};

use crate::config;
use crate::slots::SLOTS;
use crate::{KeyQueue, MouseQueue};

// ADB side (core 1)
pub static POLL_COUNT: AtomicU32 = AtomicU32::new(0);
pub static TALK_RESPONSES: AtomicU32 = AtomicU32::new(0);
pub static FRAME_ERRORS: AtomicU32 = AtomicU32::new(0);
pub static GLOBAL_RESETS: AtomicU32 = AtomicU32::new(0);

// BLE side (core 0)
pub static KBD_NOTIFICATIONS: AtomicU32 = AtomicU32::new(0);
pub static KBD_SHORT_REPORTS: AtomicU32 = AtomicU32::new(0);
pub static MOUSE_NOTIFICATIONS: AtomicU32 = AtomicU32::new(0);
pub static KEY_QUEUE_DROPS: AtomicU32 = AtomicU32::new(0);
pub static MOUSE_QUEUE_DROPS: AtomicU32 = AtomicU32::new(0);

#[inline]
pub fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[embassy_executor::task]
pub async fn status_task(keys: &'static KeyQueue, mouse_events: &'static MouseQueue) -> ! {
    loop {
        Timer::after_secs(config::STATUS_INTERVAL_SECS).await;

        info!(
            "adb: polls={} talks={} frame_errs={} resets={}",
            POLL_COUNT.load(Ordering::Relaxed),
            TALK_RESPONSES.load(Ordering::Relaxed),
            FRAME_ERRORS.load(Ordering::Relaxed),
            GLOBAL_RESETS.load(Ordering::Relaxed),
        );
        info!(
            "ble: kbd={} mouse={} kbd_cb={} (short {}) mouse_cb={} dropped k={} m={} queued k={} m={}",
            SLOTS.keyboard.state(),
            SLOTS.mouse.state(),
            KBD_NOTIFICATIONS.load(Ordering::Relaxed),
            KBD_SHORT_REPORTS.load(Ordering::Relaxed),
            MOUSE_NOTIFICATIONS.load(Ordering::Relaxed),
            KEY_QUEUE_DROPS.load(Ordering::Relaxed),
            MOUSE_QUEUE_DROPS.load(Ordering::Relaxed),
            keys.len(),
            mouse_events.len(),
        );
    }
}
