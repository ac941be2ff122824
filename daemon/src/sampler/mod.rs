//! Periodic recognition samplers
//!
//! Each input channel (camera, microphone) is one cooperative loop driven by
//! the arbiter's mode snapshots. A channel picks a sampling regime for the
//! current mode, ticks on a fixed period and never has more than one
//! backend request in flight.

mod gesture;
mod voice;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::backend::BackendError;
use crate::capture::CaptureError;
use crate::mode::{InputMode, ModeSnapshot};

pub use gesture::{GestureSampler, GestureSettings};
pub use voice::{VoiceSampler, VoiceSettings};

/// Why one sampling tick produced nothing
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("no speech in clip")]
    Silence,
}

#[derive(Debug, Default)]
struct BusyState {
    busy: AtomicBool,
    released: Notify,
}

/// At-most-one-outstanding-request flag for a channel
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<BusyState>);

impl BusyFlag {
    /// Claim the channel, or `None` if a request is still in flight
    pub fn try_acquire(&self) -> Option<BusyGuard> {
        if self.0.busy.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(BusyGuard(Arc::clone(&self.0)))
        }
    }

    /// Resolve once no request is in flight
    pub async fn released(&self) {
        // a stored permit may predate the current holder, so re-check
        while self.0.busy.load(Ordering::SeqCst) {
            self.0.released.notified().await;
        }
    }
}

/// Releases the channel when the tick finishes, however it finishes
pub struct BusyGuard(Arc<BusyState>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::SeqCst);
        self.0.released.notify_one();
    }
}

/// Run `fut` within `bound`, reporting an overrun as a backend timeout
pub(crate) async fn bounded<T, F>(bound: Duration, fut: F) -> Result<T, SampleError>
where
    F: std::future::Future<Output = Result<T, SampleError>>,
{
    match time::timeout(bound, fut).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(bound).into()),
    }
}

/// One input channel as seen by the scheduling loop
#[async_trait]
pub(crate) trait SamplerChannel: Send + Sync + 'static {
    type Regime: Copy + std::fmt::Debug + Send + 'static;

    const NAME: &'static str;

    /// Regime and period to sample with in `mode`, if any
    fn regime(&self, mode: InputMode) -> Option<(Self::Regime, Duration)>;

    fn busy(&self) -> &BusyFlag;

    /// Switch that changes which regime applies without a mode change
    fn regime_switch(&self) -> Option<watch::Receiver<bool>> {
        None
    }

    /// Called whenever the mode leaves every sampling regime
    fn stopped(&self) {}

    /// One capture + backend round trip, stamped with the snapshot it started under
    async fn tick(self: Arc<Self>, regime: Self::Regime, snapshot: ModeSnapshot);
}

/// Drive a channel until the mode publisher goes away
pub(crate) async fn drive<C: SamplerChannel>(
    channel: Arc<C>,
    mut mode_rx: watch::Receiver<ModeSnapshot>,
) {
    info!(channel = C::NAME, "sampler started");
    let mut switch = channel.regime_switch();

    loop {
        let snapshot = *mode_rx.borrow_and_update();

        match channel.regime(snapshot.mode) {
            Some((regime, period)) => {
                debug!(channel = C::NAME, ?regime, mode = %snapshot.mode, "sampling");

                // A tick from the previous regime may still hold the channel;
                // start the new regime as soon as it lets go.
                tokio::select! {
                    biased;

                    changed = mode_rx.changed() => {
                        if changed.is_err() {
                            info!(channel = C::NAME, "sampler stopped");
                            return;
                        }
                        continue;
                    }

                    _ = switch_flipped(&mut switch) => continue,

                    _ = channel.busy().released() => {}
                }

                let mut ticker = time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        biased;

                        changed = mode_rx.changed() => {
                            if changed.is_err() {
                                info!(channel = C::NAME, "sampler stopped");
                                return;
                            }
                            break;
                        }

                        _ = switch_flipped(&mut switch) => break,

                        _ = ticker.tick() => spawn_tick(&channel, regime, snapshot),
                    }
                }
            }
            None => {
                channel.stopped();
                tokio::select! {
                    changed = mode_rx.changed() => {
                        if changed.is_err() {
                            info!(channel = C::NAME, "sampler stopped");
                            return;
                        }
                    }

                    _ = switch_flipped(&mut switch) => {}
                }
            }
        }
    }
}

/// Resolve on the next flip of `switch`; pending forever without one
async fn switch_flipped(switch: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = switch {
        if rx.changed().await.is_ok() {
            return;
        }
        *switch = None;
    }
    std::future::pending::<()>().await
}

fn spawn_tick<C: SamplerChannel>(channel: &Arc<C>, regime: C::Regime, snapshot: ModeSnapshot) {
    let Some(guard) = channel.busy().try_acquire() else {
        debug!(channel = C::NAME, "request still in flight, skipping tick");
        return;
    };

    let channel = Arc::clone(channel);
    tokio::spawn(async move {
        let _guard = guard;
        channel.tick(regime, snapshot).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_flag_single_holder() {
        let flag = BusyFlag::default();
        let guard = flag.try_acquire().unwrap();
        assert!(flag.try_acquire().is_none());
        assert!(flag.clone().try_acquire().is_none());
        drop(guard);
        assert!(flag.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_waits_for_holder() {
        let flag = BusyFlag::default();
        flag.released().await;

        let guard = flag.try_acquire().unwrap();
        let waiter = tokio::spawn({
            let flag = flag.clone();
            async move {
                flag.released().await;
                tokio::time::Instant::now()
            }
        });

        time::sleep(Duration::from_secs(2)).await;
        let dropped_at = tokio::time::Instant::now();
        drop(guard);

        assert_eq!(waiter.await.unwrap(), dropped_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_reports_timeout() {
        let result: Result<(), SampleError> = bounded(Duration::from_secs(1), async {
            time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(SampleError::Backend(BackendError::Timeout(_)))
        ));
    }
}
