//! Lifecycle guard and ordered resource release
//!
//! `LifecycleGuard` holds the two engine-scoped flags:
//!
//! - **tearing down**: one-shot, test-and-set by `begin_teardown()`. A second
//!   caller sees `false` and does nothing.
//! - **connections blocked**: set together with the teardown flag. Adapters
//!   check it through a `ConnectPermit` before and after every suspension
//!   point of `connect()`.
//!
//! Both flags are cleared only by `rearm()`, which the engine calls from the
//! next `connect()` once the microphone is held. Each teardown also bumps an
//! epoch, so a permit issued before the teardown stays invalid after re-arm.
//!
//! `SessionResources` owns everything a session acquired and releases it in
//! a fixed order: interrupt generation, microphone, transport, audio output.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::audio::{CaptureStream, PlaybackPipeline};
use crate::provider::{ProviderAdapter, ProviderError};

#[derive(Debug, Default)]
pub struct LifecycleGuard {
    tearing_down: AtomicBool,
    connections_blocked: AtomicBool,
    epoch: AtomicU64,
}

impl LifecycleGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Test-and-set the teardown flag. Returns false if a teardown already
    /// started and was not followed by a re-arm.
    pub fn begin_teardown(&self) -> bool {
        if self
            .tearing_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("LifecycleGuard: already tearing down");
            return false;
        }
        self.connections_blocked.store(true, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn is_tearing_down(&self) -> bool {
        self.tearing_down.load(Ordering::Acquire)
    }

    pub fn connections_blocked(&self) -> bool {
        self.connections_blocked.load(Ordering::Acquire)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Clear both flags for a new session
    pub fn rearm(&self) {
        self.connections_blocked.store(false, Ordering::Release);
        self.tearing_down.store(false, Ordering::Release);
    }

    /// Permission for one connection attempt, valid until the next teardown
    pub fn permit(self: &Arc<Self>) -> ConnectPermit {
        ConnectPermit {
            guard: self.clone(),
            epoch: self.epoch(),
        }
    }
}

/// Checked by adapters before and after each suspension point of `connect()`
#[derive(Debug, Clone)]
pub struct ConnectPermit {
    guard: Arc<LifecycleGuard>,
    epoch: u64,
}

impl ConnectPermit {
    pub fn is_valid(&self) -> bool {
        !self.guard.connections_blocked() && self.guard.epoch() == self.epoch
    }

    pub fn check(&self) -> Result<(), ProviderError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ProviderError::ConnectionsBlocked)
        }
    }

    /// A permit that is always valid, for driving an adapter outside an engine
    pub fn unguarded() -> Self {
        LifecycleGuard::new().permit()
    }
}

/// What a session holds. Each slot is emptied exactly once.
#[derive(Default)]
pub struct SessionResources {
    pub capture: Option<Box<dyn CaptureStream>>,
    pub adapter: Option<Box<dyn ProviderAdapter>>,
    pub playback: Option<PlaybackPipeline>,
}

impl SessionResources {
    pub fn is_empty(&self) -> bool {
        self.capture.is_none() && self.adapter.is_none() && self.playback.is_none()
    }

    /// Release everything in order. Safe to call again; empty slots are skipped.
    ///
    /// `cancel_generation` asks the provider to stop the in-flight response
    /// before the transport goes away.
    pub async fn release(&mut self, cancel_generation: bool, limit: Duration) {
        // (1) interrupt in-flight generation
        if cancel_generation {
            if let Some(adapter) = self.adapter.as_mut() {
                adapter.cancel_response();
            }
        }

        // (2) stop and release the microphone
        if let Some(capture) = self.capture.take() {
            let release = tokio::task::spawn_blocking(move || capture.stop());
            match timeout(limit, release).await {
                Ok(Ok(())) => log::info!("Teardown: microphone released"),
                Ok(Err(e)) => log::error!("Teardown: microphone release panicked: {}", e),
                Err(_) => log::error!("Teardown: microphone release timed out after {:?}", limit),
            }
        }

        // (3) close the transport
        if let Some(mut adapter) = self.adapter.take() {
            if timeout(limit, adapter.disconnect()).await.is_err() {
                log::warn!("Teardown: transport close timed out after {:?}", limit);
            } else {
                log::info!("Teardown: transport closed");
            }
        }

        // (4) close the audio output
        if let Some(playback) = self.playback.take() {
            let close = tokio::task::spawn_blocking(move || playback.close());
            match timeout(limit, close).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("Teardown: audio output close panicked: {}", e),
                Err(_) => log::error!("Teardown: audio output close timed out after {:?}", limit),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_is_one_shot() {
        let guard = LifecycleGuard::new();
        assert!(guard.begin_teardown());
        assert!(!guard.begin_teardown());
        assert!(guard.is_tearing_down());
        assert!(guard.connections_blocked());
    }

    #[test]
    fn test_flags_survive_until_rearm() {
        let guard = LifecycleGuard::new();
        guard.begin_teardown();
        assert!(guard.connections_blocked());

        guard.rearm();
        assert!(!guard.is_tearing_down());
        assert!(!guard.connections_blocked());
        assert!(guard.begin_teardown());
    }

    #[test]
    fn test_permit_from_before_teardown_stays_invalid() {
        let guard = LifecycleGuard::new();
        let old = guard.permit();
        assert!(old.check().is_ok());

        guard.begin_teardown();
        assert_eq!(old.check(), Err(ProviderError::ConnectionsBlocked));

        guard.rearm();
        let fresh = guard.permit();
        assert!(fresh.is_valid());
        assert!(!old.is_valid());
    }

    #[test]
    fn test_concurrent_teardown_has_single_winner() {
        let guard = LifecycleGuard::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                std::thread::spawn(move || guard.begin_teardown())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(guard.epoch(), 1);
    }

    #[tokio::test]
    async fn test_release_of_empty_resources_is_noop() {
        let mut resources = SessionResources::default();
        resources.release(true, Duration::from_millis(10)).await;
        assert!(resources.is_empty());
    }
}
