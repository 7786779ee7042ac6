//! One-shot broadcast signals.
//!
//! Used for the process-wide shutdown signal and for an iterator's done
//! signal. Dropping the [`Trigger`] counts as firing it.

use tokio::sync::watch;

/// Fires a signal.
#[derive(Debug)]
pub struct Trigger {
    tx: watch::Sender<bool>,
}

/// Observes a signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Signal {
    rx: watch::Receiver<bool>,
}

/// Creates a connected trigger and signal.
#[must_use]
pub fn signal() -> (Trigger, Signal) {
    let (tx, rx) = watch::channel(false);
    (Trigger { tx }, Signal { rx })
}

impl Trigger {
    /// Fires the signal. Firing twice is harmless.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has been fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a new observer.
    #[must_use]
    pub fn signal(&self) -> Signal {
        Signal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Signal {
    /// Whether the signal has fired or its trigger is gone.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Waits until the signal fires.
    pub async fn fired(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fire_wakes_waiters() {
        let (trigger, signal) = signal();
        let mut waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.fired().await });

        assert!(!signal.is_fired());
        trigger.fire();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_fired());
        assert!(trigger.is_fired());
    }

    #[tokio::test]
    async fn dropped_trigger_counts_as_fired() {
        let (trigger, mut signal) = signal();
        drop(trigger);
        assert!(signal.is_fired());
        tokio::time::timeout(Duration::from_secs(1), signal.fired())
            .await
            .unwrap();
    }

    #[test]
    fn late_observers_see_fired_state() {
        let (trigger, _signal) = signal();
        trigger.fire();
        assert!(trigger.signal().is_fired());
    }
}
