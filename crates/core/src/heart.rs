//! Heartbeat service: periodic liveness monitor over opaque identities.
//!
//! The service keeps its own lock, independent of the overlay lock. On
//! every period it reports expired identities through [HeartCallback::dead]
//! exactly once each, then fires [HeartCallback::beat]. Beat and death
//! reports are delivered serially per service instance.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Error;
use crate::error::Result;
use crate::overlay::space::Id;

/// Capability set the monitor owner supplies.
#[async_trait]
pub trait HeartCallback: Send + Sync {
    /// One heartbeat period elapsed.
    async fn beat(&self);

    /// A monitored identity produced no ping within the death threshold.
    /// Fired exactly once per expiry, the identity is already unmonitored.
    async fn dead(&self, id: Id);
}

/// The heartbeat service.
pub struct Heart {
    beat_period: Duration,
    kill_timeout: Duration,
    monitored: Mutex<HashMap<Id, Instant>>,
    quit: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Heart {
    /// Create an idle service. Identities may be monitored before the
    /// ticker is started.
    pub fn new(beat_period: Duration, kill_timeout: Duration) -> Arc<Self> {
        let (quit, _) = broadcast::channel(1);
        Arc::new(Self {
            beat_period,
            kill_timeout,
            monitored: Mutex::new(HashMap::new()),
            quit,
            running: AtomicBool::new(false),
        })
    }

    /// Add an identity to the monitored set with a fresh ping.
    pub fn monitor(&self, id: Id) -> Result<()> {
        let mut mon = self.lock();
        if mon.contains_key(&id) {
            return Err(Error::AlreadyMonitored(id.to_string()));
        }
        mon.insert(id, Instant::now());
        Ok(())
    }

    /// Remove an identity from the monitored set.
    pub fn unmonitor(&self, id: &Id) -> Result<()> {
        self.lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotMonitored(id.to_string()))
    }

    /// Refresh the last ping time of a monitored identity.
    pub fn ping(&self, id: &Id) -> Result<()> {
        match self.lock().get_mut(id) {
            Some(seen) => {
                *seen = Instant::now();
                Ok(())
            }
            None => Err(Error::NotMonitored(id.to_string())),
        }
    }

    /// Start the ticker, reporting to `callback`. Starting twice is a no-op.
    pub fn start(self: &Arc<Self>, callback: Arc<dyn HeartCallback>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let heart = self.clone();
        let mut quit = self.quit.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heart.beat_period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for id in heart.reap() {
                            callback.dead(id).await;
                        }
                        callback.beat().await;
                    }
                    _ = quit.recv() => break,
                }
            }
        });
    }

    /// Stop the ticker. Monitored identities are retained.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let _ = self.quit.send(());
        }
    }

    /// Collect and unmonitor every identity past the death threshold.
    fn reap(&self) -> Vec<Id> {
        let now = Instant::now();
        let mut mon = self.lock();
        let dead: Vec<Id> = mon
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) > self.kill_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dead {
            mon.remove(id);
        }
        dead
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Id, Instant>> {
        // Poisoning only follows a panic elsewhere, the map itself stays valid.
        self.monitored
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Mutex as AsyncMutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        beats: AtomicUsize,
        deaths: AsyncMutex<Vec<Id>>,
    }

    #[async_trait]
    impl HeartCallback for Recorder {
        async fn beat(&self) {
            self.beats.fetch_add(1, Ordering::SeqCst);
        }

        async fn dead(&self, id: Id) {
            self.deaths.lock().await.push(id);
        }
    }

    #[test]
    fn monitor_is_exclusive() {
        let heart = Heart::new(Duration::from_millis(10), Duration::from_millis(50));
        heart.monitor(Id::from(1u64)).unwrap();
        assert!(matches!(
            heart.monitor(Id::from(1u64)),
            Err(Error::AlreadyMonitored(_))
        ));
        heart.unmonitor(&Id::from(1u64)).unwrap();
        heart.monitor(Id::from(1u64)).unwrap();
    }

    #[test]
    fn ping_needs_monitoring() {
        let heart = Heart::new(Duration::from_millis(10), Duration::from_millis(50));
        assert!(matches!(
            heart.ping(&Id::from(9u64)),
            Err(Error::NotMonitored(_))
        ));
        assert!(matches!(
            heart.unmonitor(&Id::from(9u64)),
            Err(Error::NotMonitored(_))
        ));
    }

    #[tokio::test]
    async fn beats_fire_periodically() {
        let heart = Heart::new(Duration::from_millis(10), Duration::from_secs(10));
        let recorder = Arc::new(Recorder::default());
        heart.start(recorder.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        heart.stop();
        assert!(recorder.beats.load(Ordering::SeqCst) >= 3);
        assert!(recorder.deaths.lock().await.is_empty());
    }

    #[tokio::test]
    async fn silent_identity_dies_exactly_once() {
        let heart = Heart::new(Duration::from_millis(10), Duration::from_millis(30));
        let recorder = Arc::new(Recorder::default());

        heart.monitor(Id::from(7u64)).unwrap();
        heart.start(recorder.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        heart.stop();

        let deaths = recorder.deaths.lock().await;
        assert_eq!(deaths.as_slice(), &[Id::from(7u64)]);
        // The expiry auto unmonitored the id.
        assert!(matches!(
            heart.ping(&Id::from(7u64)),
            Err(Error::NotMonitored(_))
        ));
    }

    #[tokio::test]
    async fn pings_keep_identities_alive() {
        let heart = Heart::new(Duration::from_millis(10), Duration::from_millis(40));
        let recorder = Arc::new(Recorder::default());

        heart.monitor(Id::from(3u64)).unwrap();
        heart.start(recorder.clone());
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            heart.ping(&Id::from(3u64)).unwrap();
        }
        heart.stop();
        assert!(recorder.deaths.lock().await.is_empty());
    }
}
