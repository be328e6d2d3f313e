//! The ADB protocol engine: bit-cell encode/decode, command dispatch, SRQ
//! arbitration and the main bus loop.
//!
//! The loop runs as the only task on core 1. It busy-waits while a frame is
//! in flight and yields to the executor only when the bus has been silent
//! for a while, or every 256 frames - the host sends its keyboard and mouse
//! polls back to back with a gap as small as ~200 µs, and a millisecond
//! yield between them would consistently drop the second poll.

use adb_core::command::{Command, Op};
use adb_core::keyboard::Keyboard;
use adb_core::mouse::Mouse;
use adb_core::timing::{
    bit_phases, classify_low_pulse, decode_bit, LowPulse, BIT_CELL_US, RESET_MIN_US, SRQ_LOW_US,
    SYNC_NOMINAL_US, TLT_MAX_US, TLT_US, TOLERANCE_US,
};
use defmt::info;
use embassy_time::Timer;

use super::line::{AdbLine, IrqGuard};
use crate::diag;
use crate::{KeyQueue, MouseQueue};

/// How a receive primitive failed. The frame is dropped either way; device
/// state never changes on a malformed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum FrameError {
    /// The line never reached the expected state in time.
    Timeout,
    /// A data frame did not open with a '1' start bit.
    BadStart,
}

// ---- bit-level transmit -------------------------------------------------

#[inline(never)]
#[link_section = ".data.ram_func"]
fn send_bit(line: &AdbLine, bit: bool) {
    let (low_us, high_us) = bit_phases(bit);
    line.drive_low();
    line.busy_wait_us(low_us);
    line.release();
    line.busy_wait_us(high_us);
}

/// Transmit a 16-bit Talk response: '1' start bit, 16 data bits MSB first,
/// '0' stop bit. Caller holds the interrupt mask.
#[inline(never)]
#[link_section = ".data.ram_func"]
fn send_word(line: &AdbLine, data: u16) {
    send_bit(line, true);
    for i in (0..16).rev() {
        send_bit(line, (data >> i) & 1 != 0);
    }
    send_bit(line, false);
}

// ---- bit-level receive --------------------------------------------------

#[inline(never)]
#[link_section = ".data.ram_func"]
fn receive_bit(line: &AdbLine) -> Result<bool, FrameError> {
    if line.wait_for_state(false, BIT_CELL_US * 2).is_none() {
        return Err(FrameError::Timeout);
    }
    let low_us = line.measure_pulse(false, BIT_CELL_US + TOLERANCE_US);
    if low_us == 0 {
        return Err(FrameError::Timeout);
    }
    // high phase just needs to happen, its length carries no information
    line.wait_for_state(true, BIT_CELL_US);
    Ok(decode_bit(low_us))
}

#[inline(never)]
#[link_section = ".data.ram_func"]
fn receive_byte(line: &AdbLine) -> Result<u8, FrameError> {
    let mut byte = 0u8;
    for _ in 0..8 {
        byte = (byte << 1) | receive_bit(line)? as u8;
    }
    Ok(byte)
}

/// Receive a host data frame (Listen payload): start bit, 16 data bits,
/// stop bit. Caller holds the interrupt mask.
#[inline(never)]
#[link_section = ".data.ram_func"]
fn receive_word(line: &AdbLine) -> Result<u16, FrameError> {
    if !receive_bit(line)? {
        return Err(FrameError::BadStart);
    }
    let mut data = 0u16;
    for _ in 0..16 {
        data = (data << 1) | receive_bit(line)? as u16;
    }
    // consume the stop bit; its value is not validated
    let _ = receive_bit(line);
    Ok(data)
}

/// Consume the host's command stop bit, stretching its low phase to the SRQ
/// duration when we want to be polled.
#[inline(never)]
#[link_section = ".data.ram_func"]
fn consume_stop_bit(line: &AdbLine, srq: bool) {
    line.wait_for_state(false, BIT_CELL_US * 2);
    if srq {
        // the stop bit's low phase is in progress; hold the line and extend
        // it to the full service-request length
        line.drive_low();
        line.busy_wait_us(SRQ_LOW_US);
        line.release();
    } else {
        line.wait_for_state(true, BIT_CELL_US * 2);
    }
}

// ---- dispatch -----------------------------------------------------------

/// Handle one decoded command. Entered with the interrupt mask still held
/// from the command byte receive and the stop bit not yet consumed; the
/// mask is always released before the (interrupt-masked) response phase.
fn dispatch(
    line: &AdbLine,
    irq: IrqGuard,
    cmd: Command,
    keyboard: &mut Keyboard,
    mouse: &mut Mouse,
    keys: &'static KeyQueue,
    mouse_events: &'static MouseQueue,
) {
    diag::bump(&diag::POLL_COUNT);

    let kbd_pending = keyboard.has_buffered() || !keys.is_empty();
    let mouse_pending = mouse.has_pending() || !mouse_events.is_empty();

    let is_kbd = cmd.address == keyboard.address();
    let is_mouse = cmd.address == mouse.address();

    if !is_kbd && !is_mouse {
        // not for us - but SRQ rides on anyone's stop bit
        consume_stop_bit(line, kbd_pending || mouse_pending);
        drop(irq);
        return;
    }

    // The polled device answers through its response; SRQ is asserted for
    // the *other* emulated device.
    let other_pending = if is_kbd { mouse_pending } else { kbd_pending };
    consume_stop_bit(line, other_pending);
    drop(irq);

    match cmd.op {
        Op::Talk => {
            let response = if is_kbd {
                keyboard.talk(cmd.register, || keys.try_receive().ok())
            } else {
                mouse.talk(cmd.register, || mouse_events.try_receive().ok())
            };

            if let Some(word) = response {
                line.busy_wait_us(TLT_US);
                let irq = IrqGuard::new();
                send_word(line, word);
                drop(irq);
                diag::bump(&diag::TALK_RESPONSES);
            }
            // no data: the bus stays idle, silence is a valid answer
        }
        Op::Listen => {
            // the host controls Tlt here - wait for its start bit to fall
            if line.wait_for_state(false, TLT_MAX_US + 100).is_none() {
                return;
            }
            let irq = IrqGuard::new();
            let word = receive_word(line);
            drop(irq);

            match word {
                Ok(data) => {
                    if is_kbd {
                        keyboard.listen(cmd.register, data);
                    } else {
                        mouse.listen(cmd.register, data);
                    }
                    info!("listen A{} R{} <- {:04x}", cmd.address, cmd.register, data);
                }
                Err(_) => diag::bump(&diag::FRAME_ERRORS),
            }
        }
        Op::Flush => {
            if is_kbd {
                keyboard.flush();
            } else {
                mouse.flush();
            }
        }
        Op::Reset => {
            if is_kbd {
                keyboard.reset();
            } else {
                mouse.reset();
            }
        }
    }
}

// ---- main loop ----------------------------------------------------------

#[embassy_executor::task]
pub async fn bus_task(
    line: AdbLine,
    keys: &'static KeyQueue,
    mouse_events: &'static MouseQueue,
) -> ! {
    let mut keyboard = Keyboard::new();
    let mut mouse = Mouse::new();

    #[cfg(feature = "self-test")]
    self_test(&line);

    info!("ADB bus loop running on core 1");

    let mut frames: u32 = 0;
    loop {
        // Start from an idle (high) line so the full attention pulse gets
        // measured, never the tail of one already in progress.
        if !line.is_high() {
            line.wait_for_state(true, RESET_MIN_US + 500);
            continue;
        }

        // falling edge opens every frame
        if line.wait_for_state(false, 10_000).is_none() {
            // bus silent for 10 ms - safe to let the executor breathe
            Timer::after_millis(1).await;
            continue;
        }

        let low_us = line.measure_pulse(false, RESET_MIN_US + 500);
        match classify_low_pulse(low_us) {
            LowPulse::Reset => {
                keyboard.reset();
                mouse.reset();
                diag::bump(&diag::GLOBAL_RESETS);
                info!("global reset ({} us low)", low_us);
                continue;
            }
            LowPulse::Noise => continue,
            LowPulse::Attention => {}
        }

        // attention done, line is high: the sync period. The next falling
        // edge is the first bit of the command byte.
        let sync_us = line.measure_pulse(true, SYNC_NOMINAL_US + 30);
        if sync_us == 0 {
            continue;
        }

        // Interrupts stay masked from the command byte through the stop
        // bit (dispatch re-enables them before any response phase).
        let irq = IrqGuard::new();
        match receive_byte(&line) {
            Ok(byte) => {
                let cmd = Command::decode(byte);
                dispatch(&line, irq, cmd, &mut keyboard, &mut mouse, keys, mouse_events);
            }
            Err(_) => {
                drop(irq);
                diag::bump(&diag::FRAME_ERRORS);
            }
        }

        frames = frames.wrapping_add(1);
        if frames % 256 == 0 {
            Timer::after_millis(1).await;
        }
    }
}

// ---- boot-time timing self test -----------------------------------------

/// Drive known bit patterns and report the achieved phase timings, then
/// check the line levels in each drive state. Needs nothing connected but
/// the pull-up.
#[cfg(feature = "self-test")]
fn self_test(line: &AdbLine) {
    use adb_core::timing::{BIT_0_HIGH_US, BIT_0_LOW_US, BIT_1_HIGH_US, BIT_1_LOW_US};

    info!("=== ADB timing self test ===");

    for (label, low_us, high_us) in [
        ("'1' bit", BIT_1_LOW_US, BIT_1_HIGH_US),
        ("'0' bit", BIT_0_LOW_US, BIT_0_HIGH_US),
    ] {
        for _ in 0..5 {
            let irq = IrqGuard::new();
            let start = AdbLine::now_micros();
            line.drive_low();
            line.busy_wait_us(low_us);
            let mid = AdbLine::now_micros();
            line.release();
            line.busy_wait_us(high_us);
            let end = AdbLine::now_micros();
            drop(irq);

            info!(
                "{}: low={} us high={} us total={} us",
                label,
                mid.wrapping_sub(start),
                end.wrapping_sub(mid),
                end.wrapping_sub(start)
            );
        }
    }

    line.release();
    line.busy_wait_us(100);
    info!("idle state high: {}", line.is_high());
    line.drive_low();
    line.busy_wait_us(50);
    info!("driven state low: {}", !line.is_high());
    line.release();
    line.busy_wait_us(50);
    info!("released state high: {}", line.is_high());
    info!("=== self test complete ===");
}

// ---- passive bus monitor ------------------------------------------------

/// Decode-and-log observer: no device emulation, never drives the bus.
/// Stands in for a logic analyzer when checking the host side of the
/// wiring.
#[cfg(feature = "bus-monitor")]
#[embassy_executor::task]
pub async fn monitor_task(line: AdbLine) -> ! {
    use adb_core::timing::{ATTN_MAX_US, ATTN_MIN_US};

    info!("ADB bus monitor running on core 1");

    loop {
        if line.is_high() {
            if line.wait_for_state(false, 10_000).is_none() {
                Timer::after_millis(1).await;
                continue;
            }
        }

        let low_us = line.measure_pulse(false, RESET_MIN_US + 500);
        if low_us >= RESET_MIN_US {
            info!("[mon] global reset ({} us)", low_us);
            line.wait_for_state(true, 5_000);
            continue;
        }
        if !(ATTN_MIN_US..=ATTN_MAX_US).contains(&low_us) {
            continue;
        }

        let sync_us = line.measure_pulse(true, 200);
        let Ok(byte) = receive_byte(&line) else {
            continue;
        };
        let cmd = Command::decode(byte);
        let _ = receive_bit(&line); // stop bit

        info!(
            "[mon] attn={} us sync={} us cmd={:02x} [A{} {} R{}]",
            low_us, sync_us, byte, cmd.address, cmd.op, cmd.register
        );

        match cmd.op {
            Op::Talk => {
                // a device gets Tlt to answer; snoop on it
                let wait_start = AdbLine::now_micros();
                while AdbLine::now_micros().wrapping_sub(wait_start) < 500 {
                    if !line.is_high() {
                        if let Ok(data) = receive_word(&line) {
                            info!("[mon]   -> {:04x}", data);
                        }
                        break;
                    }
                }
            }
            Op::Listen => {
                line.busy_wait_us(TLT_US);
                if let Ok(data) = receive_word(&line) {
                    info!("[mon]   <- {:04x}", data);
                }
            }
            _ => {}
        }
    }
}
