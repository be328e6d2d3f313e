//! Device-side Apple Desktop Bus protocol model and BLE HID translation.
//!
//! Everything in this crate is hardware-independent: the bit-banging itself
//! lives in the firmware crate, which feeds measured pulse durations and
//! received bytes into the types here. That split keeps the command decoder,
//! the two device emulators and the HID report translation testable on the
//! host.
//!
//! Data flows in one direction: HID reports are diffed/parsed into
//! [`event::KeyEvent`]s and [`event::MouseEvent`]s, queued by the firmware,
//! and drained by the [`keyboard::Keyboard`] and [`mouse::Mouse`] emulators
//! when the host polls them with Talk R0.

#![cfg_attr(not(test), no_std)]

pub mod command;
pub mod event;
pub mod keyboard;
pub mod keymap;
pub mod mouse;
pub mod report;
pub mod timing;
