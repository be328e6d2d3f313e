//! BLE-to-ADB input bridge for the Raspberry Pi Pico W.
//!
//! Core 1 runs nothing but the bit-banged ADB device loop; core 0 runs the
//! CYW43 radio, the BLE host, and everything soft real-time. The two sides
//! meet only at the two event queues and the diagnostic counters.

#![no_std]
#![no_main]

mod adb;
mod ble;
mod config;
mod diag;
mod slots;

use adb_core::event::{KeyEvent, MouseEvent};
use cyw43_pio::{PioSpi, DEFAULT_CLOCK_DIVIDER};
use defmt::info;
use embassy_executor::{Executor, Spawner};
use embassy_rp::gpio::{Flex, Level, Output};
use embassy_rp::multicore::{spawn_core1, Stack as CoreStack};
use embassy_rp::peripherals::{DMA_CH0, PIO0};
use embassy_rp::pio::Pio;
use embassy_rp::{bind_interrupts, pio};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};
use static_cell::StaticCell;
use trouble_host::prelude::*;
use {defmt_rtt as _, panic_probe as _};

use crate::adb::line::AdbLine;
use crate::ble::{Controller, Pool};

/// Keyboard events, BLE ingest -> keyboard emulator. Drop on full.
pub type KeyQueue = Channel<CriticalSectionRawMutex, KeyEvent, { config::KEY_QUEUE_DEPTH }>;
/// Mouse events, BLE ingest -> mouse emulator. Drop on full.
pub type MouseQueue = Channel<CriticalSectionRawMutex, MouseEvent, { config::MOUSE_QUEUE_DEPTH }>;

static KEY_EVENTS: KeyQueue = Channel::new();
static MOUSE_EVENTS: MouseQueue = Channel::new();

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => pio::InterruptHandler<PIO0>;
});

static mut CORE1_STACK: CoreStack<8192> = CoreStack::new();
static EXECUTOR1: StaticCell<Executor> = StaticCell::new();

#[embassy_executor::task]
async fn cyw43_task(
    runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>,
) -> ! {
    runner.run().await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    info!("bridge booted");

    // ---- ADB side first: hand core 1 its line before the radio starts ----
    let line = AdbLine::new(Flex::new(p.PIN_22), config::ADB_DATA_PIN);
    spawn_core1(
        p.CORE1,
        unsafe { &mut *core::ptr::addr_of_mut!(CORE1_STACK) },
        move || {
            let executor1 = EXECUTOR1.init(Executor::new());
            executor1.run(|spawner| {
                #[cfg(feature = "bus-monitor")]
                spawner.must_spawn(adb::bus::monitor_task(line));
                #[cfg(not(feature = "bus-monitor"))]
                spawner.must_spawn(adb::bus::bus_task(line, &KEY_EVENTS, &MOUSE_EVENTS));
            })
        },
    );

    // ---- CYW43 radio ----
    // Firmware blobs: see cyw43-firmware/README.md for where to fetch them.
    let fw = include_bytes!("../cyw43-firmware/43439A0.bin");
    let clm = include_bytes!("../cyw43-firmware/43439A0_clm.bin");
    let btfw = include_bytes!("../cyw43-firmware/43439A0_btfw.bin");

    let pwr = Output::new(p.PIN_23, Level::Low);
    let cs = Output::new(p.PIN_25, Level::High);
    let mut pio = Pio::new(p.PIO0, Irqs);
    let spi = PioSpi::new(
        &mut pio.common,
        pio.sm0,
        DEFAULT_CLOCK_DIVIDER,
        pio.irq0,
        cs,
        p.PIN_24,
        p.PIN_29,
        p.DMA_CH0,
    );

    static STATE: StaticCell<cyw43::State> = StaticCell::new();
    let state = STATE.init(cyw43::State::new());
    let (_net_device, bt_device, mut control, runner) =
        cyw43::new_with_bluetooth(state, pwr, spi, fw, btfw).await;
    spawner.must_spawn(cyw43_task(runner));
    control.init(clm).await;

    // ---- BLE host ----
    info!("trouble-host initialization");
    let controller: Controller = ExternalController::new(bt_device);

    // two connections (keyboard + mouse), a few spare channels for GATT
    static RESOURCES: StaticCell<HostResources<Pool, 2, 8>> = StaticCell::new();
    let resources = RESOURCES.init(HostResources::new());

    let mut seed = [0u8; 32];
    let mut rosc = embassy_rp::clocks::RoscRng;
    rosc.fill_bytes(&mut seed);
    let mut host_rng = ChaCha20Rng::from_seed(seed);

    let address = Address::random([0xAD, 0xB0, 0x02, 0x03, 0x00, 0xC3]);
    static STACK_CELL: StaticCell<ble::BleStack> = StaticCell::new();
    let stack = STACK_CELL.init(
        trouble_host::new(controller, resources)
            .set_random_address(address)
            .set_random_generator_seed(&mut host_rng),
    );

    let host = stack.build();
    let (rx, ctrl, tx) = host.runner.split();
    spawner.must_spawn(ble::host_rx_task(rx));
    spawner.must_spawn(ble::host_ctrl_task(ctrl));
    spawner.must_spawn(ble::host_tx_task(tx));

    spawner.must_spawn(ble::scanner::scan_task(
        stack,
        spawner,
        &KEY_EVENTS,
        &MOUSE_EVENTS,
    ));
    spawner.must_spawn(diag::status_task(&KEY_EVENTS, &MOUSE_EVENTS));

    info!("all tasks started");
}
