//! BLE central: host plumbing, scanning, and the HID device lifecycle.

pub mod device_task;
pub mod hid;
pub mod scanner;

use defmt::{error, info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use heapless::String;
use portable_atomic::AtomicBool;
use trouble_host::prelude::*;

use crate::slots::SLOTS;

// 16-bit HID-over-GATT UUIDs.
pub const HID_SERVICE: u16 = 0x1812;
pub const HID_REPORT: u16 = 0x2A4D;
pub const BOOT_KEYBOARD_INPUT: u16 = 0x2A22;
pub const BOOT_MOUSE_INPUT: u16 = 0x2A33;
pub const REPORT_MAP: u16 = 0x2A4B;
pub const PROTOCOL_MODE: u16 = 0x2A4E;
/// Protocol Mode value selecting Boot Protocol.
pub const PROTOCOL_MODE_BOOT: u8 = 0x00;

pub type Controller = ExternalController<cyw43::bluetooth::BtDriver<'static>, 10>;
pub type Pool = DefaultPacketPool;
pub type BleStack = Stack<'static, Controller, Pool>;

/// An advertiser worth connecting to, captured by the scan handler.
#[derive(Clone)]
pub struct ScanHit {
    pub addr_kind: AddrKind,
    pub addr: [u8; 6],
    pub name: String<24>,
}

/// Scanner -> device task handoff. One connection attempt at a time; the
/// radio cannot scan and connect simultaneously anyway.
pub static FOUND_DEVICE: Signal<CriticalSectionRawMutex, ScanHit> = Signal::new();
pub static CONNECT_PENDING: AtomicBool = AtomicBool::new(false);
/// Advertisements only feed `FOUND_DEVICE` while a scan pass is open.
pub static SCAN_WINDOW_OPEN: AtomicBool = AtomicBool::new(false);

// ---- host runner tasks --------------------------------------------------

#[embassy_executor::task]
pub async fn host_rx_task(mut rx: RxRunner<'static, Controller, Pool>) -> ! {
    loop {
        match rx.run_with_handler(&SCAN_EVENTS).await {
            Ok(_) => warn!("host_rx_task: run() completed unexpectedly"),
            Err(_) => error!("host_rx_task: encountered an error"),
        }
    }
}

#[embassy_executor::task]
pub async fn host_ctrl_task(mut ctrl: ControlRunner<'static, Controller, Pool>) -> ! {
    loop {
        match ctrl.run().await {
            Ok(_) => warn!("host_ctrl_task: run() completed unexpectedly"),
            Err(_) => error!("host_ctrl_task: encountered an error"),
        }
    }
}

#[embassy_executor::task]
pub async fn host_tx_task(mut tx: TxRunner<'static, Controller, Pool>) -> ! {
    loop {
        match tx.run().await {
            Ok(_) => warn!("host_tx_task: run() completed unexpectedly"),
            Err(_) => error!("host_tx_task: encountered an error"),
        }
    }
}

// ---- advertisement handling ---------------------------------------------

pub struct ScanEvents;

pub static SCAN_EVENTS: ScanEvents = ScanEvents;

impl EventHandler for ScanEvents {
    fn on_adv_reports(&self, reports: trouble_host::scan::LeAdvReportsIter) {
        for report in reports.flatten() {
            let mut addr = [0u8; 6];
            addr.copy_from_slice(report.addr.raw());
            handle_adv(report.addr_kind, addr, report.data);
        }
    }

    fn on_ext_adv_reports(&self, reports: trouble_host::scan::LeExtAdvReportsIter) {
        for report in reports.flatten() {
            let mut addr = [0u8; 6];
            addr.copy_from_slice(report.addr.raw());
            handle_adv(report.addr_kind, addr, report.data);
        }
    }
}

fn handle_adv(addr_kind: AddrKind, addr: [u8; 6], data: &[u8]) {
    use portable_atomic::Ordering;

    // A bonded peer showing up while its slot is reconnecting skips the
    // rest of the backoff.
    for slot in [&SLOTS.keyboard, &SLOTS.mouse] {
        if slot.state() == crate::slots::SlotState::Reconnecting
            && slot.bonded_addr() == Some(addr)
        {
            info!("scan: bonded peer {:02x} seen, reconnecting now", addr);
            slot.sighted().signal(());
            return;
        }
    }

    if !SCAN_WINDOW_OPEN.load(Ordering::Acquire) || CONNECT_PENDING.load(Ordering::Acquire) {
        return;
    }
    if !adv_lists_hid_service(data) {
        return;
    }

    let mut name = String::new();
    if let Some(n) = adv_local_name(data) {
        let _ = name.push_str(n);
    }

    CONNECT_PENDING.store(true, Ordering::Release);
    FOUND_DEVICE.signal(ScanHit {
        addr_kind,
        addr,
        name,
    });
}

/// Walk the AD structures for a 16-bit service UUID list containing the HID
/// service.
fn adv_lists_hid_service(payload: &[u8]) -> bool {
    let mut i = 0;
    while i < payload.len() {
        let len = payload[i] as usize;
        if len == 0 || i + 1 + len > payload.len() {
            break;
        }
        let ty = payload[i + 1];
        // 0x02/0x03: incomplete/complete list of 16-bit service UUIDs
        if ty == 0x02 || ty == 0x03 {
            let uuids = &payload[(i + 2)..(i + 1 + len)];
            for pair in uuids.chunks_exact(2) {
                if u16::from_le_bytes([pair[0], pair[1]]) == HID_SERVICE {
                    return true;
                }
            }
        }
        i += 1 + len;
    }
    false
}

/// Shortened (0x08) or complete (0x09) local name, if advertised.
fn adv_local_name(payload: &[u8]) -> Option<&str> {
    let mut i = 0;
    while i < payload.len() {
        let len = payload[i] as usize;
        if len == 0 || i + 1 + len > payload.len() {
            break;
        }
        let ty = payload[i + 1];
        if ty == 0x08 || ty == 0x09 {
            return core::str::from_utf8(&payload[(i + 2)..(i + 1 + len)]).ok();
        }
        i += 1 + len;
    }
    None
}
