//! Scan task: looks for HID advertisers whenever a slot is empty and hands
//! candidates to a device task.

use defmt::{error, info, warn};
use embassy_executor::Spawner;
use embassy_time::{with_timeout, Duration, Timer};
use portable_atomic::Ordering;
use trouble_host::prelude::{ScanConfig, Scanner};

use super::device_task::device_task;
use super::{BleStack, CONNECT_PENDING, FOUND_DEVICE, SCAN_WINDOW_OPEN};
use crate::config;
use crate::slots::SLOTS;
use crate::{KeyQueue, MouseQueue};

#[embassy_executor::task]
pub async fn scan_task(
    stack: &'static BleStack,
    spawner: Spawner,
    keys: &'static KeyQueue,
    mouse_events: &'static MouseQueue,
) -> ! {
    info!("scan task started");

    loop {
        // Scan only while a slot wants a device and nothing is mid-connect;
        // connecting borrows the radio from scanning.
        if !SLOTS.any_disconnected() || CONNECT_PENDING.load(Ordering::Acquire) {
            Timer::after_millis(100).await;
            continue;
        }

        SLOTS.mark_scanning();

        let host = stack.build();
        let mut scanner = Scanner::new(host.central);

        let mut scan_config = ScanConfig::default();
        scan_config.active = true;

        match scanner.scan(&scan_config).await {
            Ok(session) => {
                SCAN_WINDOW_OPEN.store(true, Ordering::Release);
                let hit = with_timeout(
                    Duration::from_secs(config::SCAN_PASS_SECS),
                    FOUND_DEVICE.wait(),
                )
                .await;
                SCAN_WINDOW_OPEN.store(false, Ordering::Release);
                drop(session); // stop scanning before connecting
                SLOTS.clear_scanning();

                if let Ok(hit) = hit {
                    info!("scan: HID device {:02x} ({=str})", hit.addr, hit.name.as_str());
                    if spawner
                        .spawn(device_task(stack, hit, keys, mouse_events))
                        .is_err()
                    {
                        warn!("scan: no free device task, dropping candidate");
                        CONNECT_PENDING.store(false, Ordering::Release);
                    }
                }
            }
            Err(e) => {
                SLOTS.clear_scanning();
                match &e {
                    trouble_host::BleHostError::BleHost(kind) => {
                        error!("scan start host error: {:?}", kind)
                    }
                    trouble_host::BleHostError::Controller(_) => {
                        error!("scan start controller error")
                    }
                }
                Timer::after_secs(1).await;
            }
        }

        Timer::after_millis(500).await;
    }
}
