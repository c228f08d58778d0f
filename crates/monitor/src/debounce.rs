//! Debounced fan-in (spec §5): merges the rule-change stream with
//! network/screen observations into a single re-derivation trigger, no two
//! of which ever fire concurrently. Grounded on the `tokio::select!`
//! polling idiom the pack uses for tunnel state machines, generalized here
//! to merge an arbitrary number of unit-valued streams via
//! `futures_util::stream::select_all`.

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

pub type UnitStream = Pin<Box<dyn Stream<Item = ()> + Send>>;

/// Converts a typed `watch::Receiver` into a unit stream suitable for
/// `spawn_debounced_trigger`, discarding the emitted value — callers that
/// need the value read it back through their own `watch::Receiver` clone.
pub fn unit_stream<T>(rx: watch::Receiver<T>) -> UnitStream
where
    T: Clone + Send + Sync + 'static,
{
    Box::pin(WatchStream::new(rx).map(|_| ()))
}

/// Spawns a task that merges `sources`, coalesces bursts within `window` of
/// the most recent change, and emits exactly one `()` per settled burst.
/// Stops when `cancel` fires or every source stream ends.
pub fn spawn_debounced_trigger(
    sources: Vec<UnitStream>,
    window: Duration,
    cancel: CancellationToken,
) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let mut merged = futures_util::stream::select_all(sources);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                next = merged.next() => {
                    if next.is_none() {
                        return;
                    }
                }
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(window) => break,
                    next = merged.next() => {
                        if next.is_none() {
                            break;
                        }
                    }
                }
            }

            if tx.send(()).await.is_err() {
                return;
            }
        }
    });
    rx
}
