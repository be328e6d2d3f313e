//! Microsecond-precision access to the ADB data line.
//!
//! The line is open drain with an external pull-up on the bus side: we only
//! ever pull it low or let it float. Open drain is emulated through the SIO
//! direction registers - the output latch is pinned low once at init, and
//! driving vs releasing is a single direction-register write from then on.
//!
//! The RP2040 executes from QSPI flash through the XIP cache, so a cache
//! miss inside a 35 µs bit phase would wreck the framing. The hot functions
//! here are linked into RAM and the register accessors are forced inline
//! into them.

use embassy_rp::gpio::Flex;
use embassy_rp::pac;

pub struct AdbLine {
    _pin: Flex<'static>,
    mask: u32,
}

impl AdbLine {
    /// Takes the already-constructed pin plus its bank-0 pin index.
    /// Keep the index in sync with the pin handed over in `main`.
    pub fn new(mut pin: Flex<'static>, pin_number: u8) -> Self {
        // Output latch low forever; drive_low/release only touch direction.
        pin.set_low();
        pin.set_as_input();
        Self {
            _pin: pin,
            mask: 1 << pin_number,
        }
    }

    /// Actively pull the line low.
    #[inline(always)]
    pub fn drive_low(&self) {
        pac::SIO.gpio_oe(0).value_set().write_value(self.mask);
    }

    /// Float the line; the pull-up takes it high.
    #[inline(always)]
    pub fn release(&self) {
        pac::SIO.gpio_oe(0).value_clr().write_value(self.mask);
    }

    #[inline(always)]
    pub fn is_high(&self) -> bool {
        pac::SIO.gpio_in(0).read() & self.mask != 0
    }

    /// Free-running 1 MHz hardware counter (TIMER raw low word).
    #[inline(always)]
    pub fn now_micros() -> u32 {
        pac::TIMER.timerawl().read()
    }

    /// Tight spin, no yield. Only for sub-bit-cell delays.
    #[inline(never)]
    #[link_section = ".data.ram_func"]
    pub fn busy_wait_us(&self, us: u32) {
        let start = Self::now_micros();
        while Self::now_micros().wrapping_sub(start) < us {}
    }

    /// Wait until the line reads `high`; returns the elapsed time, or `None`
    /// if the line did not get there within `timeout_us`.
    #[inline(never)]
    #[link_section = ".data.ram_func"]
    pub fn wait_for_state(&self, high: bool, timeout_us: u32) -> Option<u32> {
        let start = Self::now_micros();
        while self.is_high() != high {
            if Self::now_micros().wrapping_sub(start) >= timeout_us {
                return None;
            }
        }
        Some(Self::now_micros().wrapping_sub(start))
    }

    /// Measure how long the line stays in `high`. Returns 0 if the line is
    /// not currently in that state; caps at `timeout_us` if it never leaves.
    #[inline(never)]
    #[link_section = ".data.ram_func"]
    pub fn measure_pulse(&self, high: bool, timeout_us: u32) -> u32 {
        if self.is_high() != high {
            return 0;
        }
        let start = Self::now_micros();
        while self.is_high() == high {
            let elapsed = Self::now_micros().wrapping_sub(start);
            if elapsed >= timeout_us {
                return elapsed;
            }
        }
        Self::now_micros().wrapping_sub(start)
    }
}

/// Masks interrupts on the current core until dropped.
///
/// Used around bit-exact receive and transmit windows. Must not be nested:
/// dropping the inner guard would unmask too early. The scopes in `bus.rs`
/// are all straight-line and disjoint.
pub struct IrqGuard {
    _private: (),
}

impl IrqGuard {
    pub fn new() -> Self {
        cortex_m::interrupt::disable();
        Self { _private: () }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        // Safety: paired with the disable in new(); guards are never nested.
        unsafe { cortex_m::interrupt::enable() }
    }
}
