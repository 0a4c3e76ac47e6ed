//! Failure detection: a timer re-armed by every message of the parent.

use std::{sync::Mutex, time::Duration};

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::{Instant, sleep_until},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeartbeatSignal {
    Arm,
    Stop,
}

/// Heartbeat timer of a node.
///
/// The timer does nothing until it is armed. Once armed it expires after `timeout` unless
/// armed again or stopped. A disabled heartbeat (no timeout) never expires.
pub struct Heartbeat {
    timeout: Option<Duration>,
    signals: UnboundedSender<HeartbeatSignal>,
    receiver: Mutex<Option<UnboundedReceiver<HeartbeatSignal>>>,
}

impl Heartbeat {
    /// Heartbeat factory
    pub fn new(timeout: Option<Duration>) -> Self {
        let (signals, receiver) = mpsc::unbounded_channel();

        Self {
            timeout,
            signals,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// True if the heartbeat can expire
    pub fn is_enabled(&self) -> bool {
        self.timeout.is_some()
    }

    /// Restart the countdown.
    pub fn arm(&self) {
        if self.is_enabled() {
            let _ = self.signals.send(HeartbeatSignal::Arm);
        }
    }

    /// Stop the countdown until the next [Heartbeat::arm].
    pub fn stop(&self) {
        if self.is_enabled() {
            let _ = self.signals.send(HeartbeatSignal::Stop);
        }
    }

    /// Count down and call `on_expiry` each time the timer expires. Returns immediately if the
    /// heartbeat is disabled or already running.
    pub async fn run<F: Fn() + Send>(&self, on_expiry: F) {
        let Some(timeout) = self.timeout else {
            return;
        };
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(mut receiver) = receiver else {
            return;
        };

        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                signal = receiver.recv() => match signal {
                    Some(HeartbeatSignal::Arm) => deadline = Some(Instant::now() + timeout),
                    Some(HeartbeatSignal::Stop) => deadline = None,
                    None => return,
                },
                _ = expiry(deadline) => {
                    deadline = None;
                    on_expiry();
                }
            }
        }
    }
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use tokio::time::sleep;

    use super::*;

    fn spawn_counting(heartbeat: Arc<Heartbeat>) -> Arc<AtomicU32> {
        let expirations = Arc::new(AtomicU32::new(0));
        let counter = expirations.clone();
        tokio::spawn(async move {
            heartbeat
                .run(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        });

        expirations
    }

    #[tokio::test]
    async fn armed_heartbeat_expires_once() {
        let heartbeat = Arc::new(Heartbeat::new(Some(Duration::from_millis(30))));
        let expirations = spawn_counting(heartbeat.clone());

        heartbeat.arm();
        sleep(Duration::from_millis(150)).await;

        assert_eq!(expirations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn re_armed_heartbeat_does_not_expire() {
        let heartbeat = Arc::new(Heartbeat::new(Some(Duration::from_millis(100))));
        let expirations = spawn_counting(heartbeat.clone());

        for _ in 0..5 {
            heartbeat.arm();
            sleep(Duration::from_millis(30)).await;
        }
        heartbeat.stop();
        sleep(Duration::from_millis(150)).await;

        assert_eq!(expirations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_heartbeat_returns_immediately() {
        let heartbeat = Heartbeat::new(None);
        heartbeat.arm();

        heartbeat.run(|| panic!("disabled heartbeat expired")).await;

        assert!(!heartbeat.is_enabled());
    }
}
