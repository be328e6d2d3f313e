//! Compile-time configuration.

/// Bank-0 index of the ADB data GPIO (GP22), wired to the bus through an
/// open-collector level shifter with a pull-up on the 5 V side.
/// Must match the pin handed to `AdbLine` in `main`.
pub const ADB_DATA_PIN: u8 = 22;

// Cross-core event queue depths. The ADB poll rate is the rate limiter;
// typical HID report rates never fill these.
pub const KEY_QUEUE_DEPTH: usize = 32;
pub const MOUSE_QUEUE_DEPTH: usize = 64;

// BLE central tuning.
pub const SCAN_PASS_SECS: u64 = 10;
pub const CONNECT_TIMEOUT_SECS: u64 = 5;
/// Per-step deadline for pairing, discovery and subscription.
pub const SETUP_TIMEOUT_SECS: u64 = 5;

// Reconnect backoff ladder: 1 s doubling to 30 s, ten tries, then the slot
// is handed back to scanning.
pub const RECONNECT_INITIAL_MS: u64 = 1_000;
pub const RECONNECT_MAX_MS: u64 = 30_000;
pub const RECONNECT_MAX_ATTEMPTS: u32 = 10;

/// Silent-disconnect poll while a link is up.
pub const LINK_POLL_MS: u64 = 1_000;

pub const STATUS_INTERVAL_SECS: u64 = 5;
