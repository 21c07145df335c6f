//! Debounced batching of volume events.
//!
//! The pump collects raw events and flushes them as coalesced batches:
//!
//! - normally once the input has been quiet for the debounce window, or when
//!   the batch has been open for the maximum latency, whichever comes first;
//! - while suspended, once per suspended interval.
//!
//! Batches are delivered in arrival order. Nothing is dropped except repeats
//! that coalescing makes redundant.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::coalesce::coalesce_events;
use super::events::VolumeEvent;
use crate::config::WatchConfig;

pub type EventBatch = Vec<VolumeEvent>;

/// Spawns the pump task. It ends when the input closes (after flushing what
/// it holds) or when `shutdown` fires.
pub fn spawn_event_pump(
    mut events: mpsc::UnboundedReceiver<VolumeEvent>,
    batches: mpsc::UnboundedSender<EventBatch>,
    config: WatchConfig,
    mut suspended: watch::Receiver<bool>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut suspension_open = true;
        loop {
            let first = tokio::select! {
                _ = shutdown.cancelled() => return,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
            };

            let opened_at = Instant::now();
            let mut last_event_at = opened_at;
            let mut batch = vec![first];
            let mut input_closed = false;

            loop {
                let deadline = if *suspended.borrow() {
                    opened_at + config.suspended_interval()
                } else {
                    (last_event_at + config.debounce()).min(opened_at + config.max_batch_latency())
                };

                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = sleep_until(deadline) => break,
                    event = events.recv() => match event {
                        Some(event) => {
                            batch.push(event);
                            last_event_at = Instant::now();
                        }
                        None => {
                            input_closed = true;
                            break;
                        }
                    },
                    changed = suspended.changed(), if suspension_open => {
                        if changed.is_err() {
                            suspension_open = false;
                        }
                    }
                }
            }

            let raw = batch.len();
            let batch = coalesce_events(batch);
            log::debug!("event batch flushed raw={raw} coalesced={}", batch.len());
            if batches.send(batch).is_err() || input_closed {
                return;
            }
        }
    })
}
