//! Per-device connection task: connect, pair, classify, subscribe, pump,
//! and chase the peer through reconnects. Each task builds its own Central
//! from the shared stack and owns one peer for its whole lifetime.

use defmt::{error, info, warn, Debug2Format};
use embassy_time::{with_timeout, Duration, TimeoutError};
use portable_atomic::Ordering;
use trouble_host::prelude::*;

use super::{hid, BleStack, Controller, Pool, ScanHit, CONNECT_PENDING};
use crate::config;
use crate::slots::{SlotState, SLOTS};
use crate::{KeyQueue, MouseQueue};

#[embassy_executor::task(pool_size = 2)]
pub async fn device_task(
    stack: &'static BleStack,
    hit: ScanHit,
    keys: &'static KeyQueue,
    mouse_events: &'static MouseQueue,
) {
    let host = stack.build();
    let mut central = host.central;

    // ---- first visit: classify the peer and claim a slot ----
    let conn = match connect(&mut central, &hit).await {
        Ok(conn) => {
            // scanning may resume; the peer stopped advertising anyway
            CONNECT_PENDING.store(false, Ordering::Release);
            conn
        }
        Err(()) => {
            CONNECT_PENDING.store(false, Ordering::Release);
            return;
        }
    };

    // Encrypt before touching any characteristic: HID peripherals silently
    // drop notifications on unencrypted links.
    if secure(stack, &conn).await.is_err() {
        return;
    }

    let kind = match hid::run_session(stack, &conn, None, &hit, keys, mouse_events).await {
        Ok(kind) => kind,
        Err(()) => return,
    };
    drop(conn);

    // ---- the peer is bonded and classified: chase it ----
    let slot = SLOTS.get(kind);
    let mut backoff = Duration::from_millis(config::RECONNECT_INITIAL_MS);
    let mut attempts: u32 = 0;

    loop {
        slot.set_state(SlotState::Reconnecting);
        // back off, but go immediately if a scan pass spots the peer
        let _ = with_timeout(backoff, slot.sighted().wait()).await;

        attempts += 1;
        slot.set_attempts(attempts);
        info!(
            "[{}] reconnect attempt {}/{}",
            kind, attempts, config::RECONNECT_MAX_ATTEMPTS
        );

        let outcome = async {
            slot.set_state(SlotState::Connecting);
            let conn = connect(&mut central, &hit).await?;
            secure(stack, &conn).await?;
            hid::run_session(stack, &conn, Some(kind), &hit, keys, mouse_events)
                .await
                .map(|_| ())
        }
        .await;

        match outcome {
            Ok(()) => {
                // ran until another link drop; the ladder starts over
                attempts = 0;
                slot.set_attempts(0);
                backoff = Duration::from_millis(config::RECONNECT_INITIAL_MS);
            }
            Err(()) => {
                if attempts >= config::RECONNECT_MAX_ATTEMPTS {
                    warn!("[{}] giving up after {} reconnect attempts", kind, attempts);
                    break;
                }
                backoff = core::cmp::min(
                    backoff * 2,
                    Duration::from_millis(config::RECONNECT_MAX_MS),
                );
            }
        }
    }

    // hand the slot back to scanning
    slot.release();
    info!("[{}] slot released", kind);
}

async fn connect(
    central: &mut Central<'static, Controller, Pool>,
    hit: &ScanHit,
) -> Result<Connection<'static, Pool>, ()> {
    let target = BdAddr::new(hit.addr);
    let connect_config = ConnectConfig {
        connect_params: ConnectParams {
            min_connection_interval: Duration::from_micros(7_500),
            max_connection_interval: Duration::from_millis(15),
            max_latency: 0,
            min_event_length: Duration::from_micros(0),
            max_event_length: Duration::from_micros(0),
            supervision_timeout: Duration::from_secs(2),
        },
        scan_config: ScanConfig {
            filter_accept_list: &[(hit.addr_kind, &target)],
            ..Default::default()
        },
    };

    info!("connecting to {:02x}...", hit.addr);
    match with_timeout(
        Duration::from_secs(config::CONNECT_TIMEOUT_SECS),
        central.connect(&connect_config),
    )
    .await
    {
        Ok(Ok(conn)) => {
            info!("connected to {:02x}", hit.addr);
            Ok(conn)
        }
        Ok(Err(e)) => {
            error!("connect failed: {:?}", Debug2Format(&e));
            Err(())
        }
        Err(TimeoutError) => {
            warn!("connect timeout for {:02x}", hit.addr);
            Err(())
        }
    }
}

/// Force an encrypted link, pairing afresh or reusing the bond the host
/// stack already holds. Bond keys from a fresh pairing go straight into the
/// stack's bond table so reconnects encrypt without user interaction.
async fn secure(stack: &'static BleStack, conn: &Connection<'static, Pool>) -> Result<(), ()> {
    let _ = conn.set_bondable(true);
    if let Err(e) = conn.request_security() {
        error!("security request failed: {:?}", Debug2Format(&e));
        return Err(());
    }

    let result = with_timeout(Duration::from_secs(config::SETUP_TIMEOUT_SECS), async {
        loop {
            match conn.next().await {
                ConnectionEvent::PairingComplete {
                    security_level,
                    bond,
                } => {
                    info!("encryption established: {:?}", Debug2Format(&security_level));
                    if let Some(info) = bond {
                        let _ = stack.add_bond_information(info);
                    }
                    return Ok(());
                }
                ConnectionEvent::PairingFailed(err) => {
                    error!("pairing failed: {:?}", err);
                    return Err(());
                }
                ConnectionEvent::Disconnected { reason } => {
                    error!("disconnected during pairing: {:?}", reason);
                    return Err(());
                }
                _ => {}
            }
        }
    })
    .await;

    match result {
        Ok(r) => r,
        Err(TimeoutError) => {
            error!("pairing timed out");
            Err(())
        }
    }
}
