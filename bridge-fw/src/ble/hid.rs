//! HID-over-GATT: device classification, the subscription policy, and the
//! notification pump feeding the cross-core event queues.

use adb_core::report::{self, DeviceKind, KeyboardReportState};
use defmt::{error, info, warn, Debug2Format};
use embassy_futures::select::{select, select3, Either3};
use embassy_time::Timer;
use portable_atomic::Ordering;
use trouble_host::prelude::*;

use super::{
    BleStack, Controller, Pool, ScanHit, BOOT_KEYBOARD_INPUT, BOOT_MOUSE_INPUT, CONNECT_PENDING,
    HID_REPORT, HID_SERVICE, PROTOCOL_MODE, PROTOCOL_MODE_BOOT, REPORT_MAP,
};
use crate::config;
use crate::diag;
use crate::slots::{Peer, SlotState, SLOTS};
use crate::{KeyQueue, MouseQueue};

/// Report maps on HID keyboards/mice run well under this.
const REPORT_MAP_MAX: usize = 384;

/// Run one subscribed session against an encrypted connection.
///
/// With `known_kind == None` (first visit) the peer is classified and its
/// slot claimed; the slot is released again if anything fails before the
/// pump starts. With a known kind (reconnect) the claim is kept throughout.
///
/// `Ok(kind)` means the session attached cleanly and ended with a link
/// drop; `Err(())` is a setup failure.
pub async fn run_session(
    stack: &'static BleStack,
    conn: &Connection<'static, Pool>,
    known_kind: Option<DeviceKind>,
    hit: &ScanHit,
    keys: &'static KeyQueue,
    mouse_events: &'static MouseQueue,
) -> Result<DeviceKind, ()> {
    let client = match GattClient::<Controller, Pool, 10>::new(stack, conn).await {
        Ok(client) => client,
        Err(e) => {
            error!("gatt client setup failed: {:?}", Debug2Format(&e));
            return Err(());
        }
    };

    let mut outcome: Result<DeviceKind, ()> = Err(());
    let _ = select(client.task(), async {
        outcome = attach_and_pump(&client, conn, known_kind, hit, keys, mouse_events).await;
    })
    .await;
    outcome
}

async fn attach_and_pump(
    client: &GattClient<'_, Controller, Pool, 10>,
    conn: &Connection<'static, Pool>,
    known_kind: Option<DeviceKind>,
    hit: &ScanHit,
    keys: &'static KeyQueue,
    mouse_events: &'static MouseQueue,
) -> Result<DeviceKind, ()> {
    let services = client
        .services_by_uuid(&Uuid::new_short(HID_SERVICE))
        .await
        .map_err(|_| ())?;
    let Some(service) = services.first().cloned() else {
        warn!("peer offers no HID service");
        return Err(());
    };

    // ---- classification (first visit only) ----
    let kind = if let Some(kind) = known_kind {
        kind
    } else if characteristic(client, &service, BOOT_KEYBOARD_INPUT)
        .await
        .is_some()
    {
        info!("classified as keyboard (Boot Keyboard Input)");
        DeviceKind::Keyboard
    } else if characteristic(client, &service, BOOT_MOUSE_INPUT)
        .await
        .is_some()
    {
        info!("classified as mouse (Boot Mouse Input)");
        DeviceKind::Mouse
    } else {
        // last resort: scan the report map for a Generic Desktop usage
        let mut from_map = None;
        if let Some(map_char) = characteristic(client, &service, REPORT_MAP).await {
            let mut buf = [0u8; REPORT_MAP_MAX];
            if let Ok(n) = client.read_characteristic(&map_char, &mut buf).await {
                from_map = report::classify_report_map(&buf[..n]);
            }
        }
        match from_map {
            Some(kind) => {
                info!("classified as {} (report map)", kind);
                kind
            }
            None => {
                // a misfiled keyboard produces no events; a misfiled mouse
                // would mangle deltas
                info!("could not classify peer, defaulting to keyboard");
                DeviceKind::Keyboard
            }
        }
    };

    let slot = SLOTS.get(kind);
    if known_kind.is_none() {
        if !slot.try_claim() {
            info!("[{}] slot already taken, skipping peer", kind);
            return Err(());
        }
        slot.set_peer(Peer {
            addr: hit.addr,
            addr_kind: hit.addr_kind,
            name: hit.name.clone(),
        });
    }
    slot.set_state(SlotState::Discovering);

    // ---- subscription policy: exactly one input characteristic ----
    let candidates = match kind {
        DeviceKind::Keyboard => {
            // Boot Protocol when the peer takes the write: clean 8-byte
            // reports. A read-only Protocol Mode means Report Protocol, and
            // the HID Report characteristic is the one that notifies.
            let boot_mode = match characteristic(client, &service, PROTOCOL_MODE).await {
                Some(pm) => client
                    .write_characteristic(&pm, &[PROTOCOL_MODE_BOOT])
                    .await
                    .is_ok(),
                None => false,
            };
            if boot_mode {
                info!("keyboard switched to boot protocol");
            }

            let boot_input = characteristic(client, &service, BOOT_KEYBOARD_INPUT).await;
            let report_input = characteristic(client, &service, HID_REPORT).await;
            if boot_mode {
                [boot_input, report_input]
            } else {
                [report_input, boot_input]
            }
        }
        DeviceKind::Mouse => {
            // Report Protocol carries full 16-bit deltas; Boot Mouse Input
            // is the fallback. Never both - duplicate reports only burn the
            // host stack's time.
            let report_input = characteristic(client, &service, HID_REPORT).await;
            let boot_input = characteristic(client, &service, BOOT_MOUSE_INPUT).await;
            [report_input, boot_input]
        }
    };

    let mut listener = None;
    for candidate in candidates {
        let Some(input) = candidate else { continue };
        match client.subscribe(&input, false).await {
            Ok(l) => {
                listener = Some(l);
                break;
            }
            Err(e) => warn!("subscribe failed: {:?}", Debug2Format(&e)),
        }
    }
    let Some(mut listener) = listener else {
        warn!("[{}] no subscribable input report", kind);
        if known_kind.is_none() {
            slot.release();
        }
        return Err(());
    };

    slot.set_state(SlotState::Connected);
    slot.set_attempts(0);
    CONNECT_PENDING.store(false, Ordering::Release);
    info!("[{}] {=str} attached", kind, hit.name.as_str());

    // ---- pump until the link goes away ----
    // Per-session parser state: a reconnect starts from a clean slate, so
    // keys held across a link drop never stick.
    let mut parser = KeyboardReportState::new();
    loop {
        match select3(
            listener.next(),
            link_events(conn),
            Timer::after_millis(config::LINK_POLL_MS),
        )
        .await
        {
            Either3::First(data) => ingest(kind, data.as_ref(), &mut parser, keys, mouse_events),
            Either3::Second(()) => return Ok(kind),
            Either3::Third(()) => {
                // silent drop: no disconnect event, but the link is gone
                if !conn.is_connected() {
                    warn!("[{}] silent disconnect", kind);
                    return Ok(kind);
                }
            }
        }
    }
}

/// First characteristic with the given 16-bit UUID, or None.
async fn characteristic(
    client: &GattClient<'_, Controller, Pool, 10>,
    service: &ServiceHandle,
    uuid: u16,
) -> Option<Characteristic<u8>> {
    client
        .characteristic_by_uuid(service, &Uuid::new_short(uuid))
        .await
        .ok()
}

/// Resolves when the connection reports a disconnect.
async fn link_events(conn: &Connection<'static, Pool>) {
    loop {
        if let ConnectionEvent::Disconnected { reason } = conn.next().await {
            info!("link lost: {:?}", reason);
            return;
        }
    }
}

fn ingest(
    kind: DeviceKind,
    data: &[u8],
    parser: &mut KeyboardReportState,
    keys: &KeyQueue,
    mouse_events: &MouseQueue,
) {
    match kind {
        DeviceKind::Keyboard => {
            diag::bump(&diag::KBD_NOTIFICATIONS);
            let ok = parser.process(data, |event| {
                if keys.try_send(event).is_err() {
                    diag::bump(&diag::KEY_QUEUE_DROPS);
                }
            });
            if !ok {
                diag::bump(&diag::KBD_SHORT_REPORTS);
            }
        }
        DeviceKind::Mouse => {
            diag::bump(&diag::MOUSE_NOTIFICATIONS);
            // runt reports are dropped; the emulator tracks button edges
            if let Some(event) = report::parse_mouse_report(data) {
                if mouse_events.try_send(event).is_err() {
                    diag::bump(&diag::MOUSE_QUEUE_DROPS);
                }
            }
        }
    }
}
