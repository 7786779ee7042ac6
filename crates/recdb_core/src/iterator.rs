//! Query result streams.
//!
//! A query runs as a producer task feeding a bounded channel. The consumer
//! side is a [`RecordIterator`]; the producer side an [`IteratorFeed`].
//!
//! The producer first tries a non-blocking send. On a full buffer it waits
//! for space, for the consumer to cancel, or for global shutdown, but at
//! most [`ScanConfig::send_timeout`]; a consumer that stops reading
//! without cancelling ends the query with [`CoreError::ScanTimeout`].
//!
//! Stored entries that cannot be read do not end a scan. They travel in
//! order with the records as [`Scanned::Warning`] items.

use crate::config::ScanConfig;
use crate::error::{CoreError, CoreResult};
use crate::record::SharedRecord;
use crate::signal::{self, Signal, Trigger};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};

type ErrSlot = Arc<Mutex<Option<CoreError>>>;

/// An item of a query stream.
#[derive(Debug)]
pub enum Scanned {
    /// A matching record.
    Record(SharedRecord),
    /// A stored entry that could not be read. The scan goes on.
    Warning(CoreError),
}

/// Consumer side of a query.
#[derive(Debug)]
pub struct RecordIterator {
    rx: mpsc::Receiver<Scanned>,
    done: Trigger,
    slot: ErrSlot,
    err: Option<CoreError>,
    warnings: Vec<CoreError>,
}

/// Producer side of a query.
#[derive(Debug)]
pub struct IteratorFeed {
    tx: mpsc::Sender<Scanned>,
    done: Signal,
    shutdown: Signal,
    send_timeout: Duration,
    slot: ErrSlot,
}

/// Outcome of [`IteratorFeed::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The record is in the buffer.
    Sent,
    /// The consumer cancelled or went away, or the system is shutting down.
    /// The producer should stop.
    Stopped,
}

impl RecordIterator {
    /// Creates a connected iterator and feed.
    #[must_use]
    pub fn channel(config: &ScanConfig, shutdown: Signal) -> (RecordIterator, IteratorFeed) {
        let (tx, rx) = mpsc::channel(config.iterator_capacity.max(1));
        let (done, done_signal) = signal::signal();
        let slot = ErrSlot::default();
        (
            RecordIterator {
                rx,
                done,
                slot: Arc::clone(&slot),
                err: None,
                warnings: Vec::new(),
            },
            IteratorFeed {
                tx,
                done: done_signal,
                shutdown,
                send_timeout: config.send_timeout,
                slot,
            },
        )
    }

    /// Receives the next record or warning. `None` ends the stream; check
    /// [`RecordIterator::err`] afterwards.
    pub async fn next_item(&mut self) -> Option<Scanned> {
        let next = self.rx.recv().await;
        if next.is_none() {
            self.collect_err();
        }
        next
    }

    /// Receives the next record. Warnings met on the way are kept for
    /// [`RecordIterator::take_warnings`].
    pub async fn next(&mut self) -> Option<SharedRecord> {
        loop {
            match self.next_item().await? {
                Scanned::Record(record) => return Some(record),
                Scanned::Warning(err) => self.warnings.push(err),
            }
        }
    }

    /// Blocking form of [`RecordIterator::next`] for synchronous callers.
    ///
    /// Must not be called from within an async context.
    pub fn blocking_next(&mut self) -> Option<SharedRecord> {
        loop {
            match self.rx.blocking_recv() {
                Some(Scanned::Record(record)) => return Some(record),
                Some(Scanned::Warning(err)) => self.warnings.push(err),
                None => {
                    self.collect_err();
                    return None;
                }
            }
        }
    }

    /// Takes the warnings skipped by [`RecordIterator::next`] so far.
    pub fn take_warnings(&mut self) -> Vec<CoreError> {
        std::mem::take(&mut self.warnings)
    }

    /// Tells the producer to stop. Records already buffered can still be
    /// received.
    pub fn cancel(&self) {
        self.done.fire();
    }

    /// Whether [`RecordIterator::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.done.is_fired()
    }

    /// The error that ended the stream, once it has ended.
    #[must_use]
    pub fn err(&self) -> Option<&CoreError> {
        self.err.as_ref()
    }

    /// Takes the error that ended the stream.
    pub fn take_err(&mut self) -> Option<CoreError> {
        self.err.take()
    }

    /// Drains the stream, failing if it ended with an error. Warnings are
    /// dropped; read them through [`RecordIterator::next_item`].
    pub async fn collect(mut self) -> CoreResult<Vec<SharedRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await {
            records.push(record);
        }
        match self.take_err() {
            Some(err) => Err(err),
            None => Ok(records),
        }
    }

    fn collect_err(&mut self) {
        if self.err.is_none() {
            self.err = self.slot.lock().take();
        }
    }
}

impl IteratorFeed {
    /// Sends a record to the consumer, applying backpressure.
    pub async fn send(&mut self, record: SharedRecord) -> CoreResult<Delivery> {
        self.deliver(Scanned::Record(record)).await
    }

    /// Reports an entry that could not be read, with the same backpressure
    /// as records.
    pub async fn warn(&mut self, err: CoreError) -> CoreResult<Delivery> {
        self.deliver(Scanned::Warning(err)).await
    }

    async fn deliver(&mut self, item: Scanned) -> CoreResult<Delivery> {
        if self.is_stopped() {
            return Ok(Delivery::Stopped);
        }
        let item = match self.tx.try_send(item) {
            Ok(()) => return Ok(Delivery::Sent),
            Err(TrySendError::Closed(_)) => return Ok(Delivery::Stopped),
            Err(TrySendError::Full(item)) => item,
        };

        tokio::select! {
            _ = self.done.fired() => Ok(Delivery::Stopped),
            _ = self.shutdown.fired() => Ok(Delivery::Stopped),
            sent = self.tx.send(item) => Ok(match sent {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Stopped,
            }),
            _ = tokio::time::sleep(self.send_timeout) => Err(CoreError::ScanTimeout {
                millis: self.send_timeout.as_millis() as u64,
            }),
        }
    }

    /// Whether the consumer cancelled or left, or shutdown began.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.done.is_fired() || self.shutdown.is_fired() || self.tx.is_closed()
    }

    /// Whether global shutdown began.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_fired()
    }

    /// Ends the stream with the producer's result.
    pub fn finish(self, result: CoreResult<()>) {
        if let Err(err) = result {
            *self.slot.lock() = Some(err);
        }
        drop(self.tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{share, Wrapper};
    use recdb_codec::Format;

    fn record(key: &str) -> SharedRecord {
        share(Wrapper::new(key, None, Format::Json, b"{}".to_vec()))
    }

    fn config(capacity: usize, timeout_ms: u64) -> ScanConfig {
        ScanConfig::default()
            .iterator_capacity(capacity)
            .send_timeout(Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn records_flow_in_order() {
        let (_trigger, shutdown) = signal::signal();
        let (iter, mut feed) = RecordIterator::channel(&config(4, 1000), shutdown);

        tokio::spawn(async move {
            for i in 0..10 {
                if feed.send(record(&format!("core:{i}"))).await.unwrap() == Delivery::Stopped {
                    break;
                }
            }
            feed.finish(Ok(()));
        });

        let records = iter.collect().await.unwrap();
        let keys: Vec<_> = records.iter().map(|r| r.lock().key()).collect();
        let expected: Vec<_> = (0..10).map(|i| format!("core:{i}")).collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn slow_consumer_times_out_producer() {
        let (_trigger, shutdown) = signal::signal();
        let (mut iter, mut feed) = RecordIterator::channel(&config(1, 50), shutdown);

        let producer = tokio::spawn(async move {
            let mut result = Ok(());
            for i in 0..3 {
                match feed.send(record(&format!("core:{i}"))).await {
                    Ok(Delivery::Sent) => {}
                    Ok(Delivery::Stopped) => break,
                    Err(err) => {
                        result = Err(err);
                        break;
                    }
                }
            }
            feed.finish(result);
        });
        producer.await.unwrap();

        assert!(iter.next().await.is_some());
        assert!(iter.next().await.is_none());
        assert!(matches!(iter.err(), Some(CoreError::ScanTimeout { millis: 50 })));
    }

    #[tokio::test]
    async fn cancel_stops_blocked_producer() {
        let (_trigger, shutdown) = signal::signal();
        let (iter, mut feed) = RecordIterator::channel(&config(1, 10_000), shutdown);

        let producer = tokio::spawn(async move {
            assert_eq!(feed.send(record("core:a")).await.unwrap(), Delivery::Sent);
            let second = feed.send(record("core:b")).await.unwrap();
            feed.finish(Ok(()));
            second
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        iter.cancel();
        assert!(iter.is_cancelled());
        assert_eq!(producer.await.unwrap(), Delivery::Stopped);
    }

    #[tokio::test]
    async fn shutdown_stops_producer() {
        let (trigger, shutdown) = signal::signal();
        let (_iter, mut feed) = RecordIterator::channel(&config(1, 10_000), shutdown);
        feed.send(record("core:a")).await.unwrap();
        trigger.fire();
        assert!(feed.is_shutting_down());
        assert_eq!(feed.send(record("core:b")).await.unwrap(), Delivery::Stopped);
    }

    #[tokio::test]
    async fn dropped_iterator_stops_producer() {
        let (_trigger, shutdown) = signal::signal();
        let (iter, mut feed) = RecordIterator::channel(&config(4, 10_000), shutdown);
        drop(iter);
        assert!(feed.is_stopped());
        assert_eq!(feed.send(record("core:a")).await.unwrap(), Delivery::Stopped);
    }

    #[tokio::test]
    async fn warnings_keep_their_place() {
        let (_trigger, shutdown) = signal::signal();
        let (mut iter, mut feed) = RecordIterator::channel(&config(4, 1000), shutdown);
        feed.send(record("core:a")).await.unwrap();
        feed.warn(CoreError::invalid_record("core:b: broken")).await.unwrap();
        feed.send(record("core:c")).await.unwrap();
        feed.finish(Ok(()));

        assert!(matches!(iter.next_item().await, Some(Scanned::Record(_))));
        assert!(matches!(
            iter.next_item().await,
            Some(Scanned::Warning(CoreError::InvalidRecord { .. }))
        ));
        assert_eq!(iter.next().await.unwrap().lock().key(), "core:c");
        assert!(iter.next_item().await.is_none());
        assert!(iter.err().is_none());
    }

    #[tokio::test]
    async fn next_sets_warnings_aside() {
        let (_trigger, shutdown) = signal::signal();
        let (mut iter, mut feed) = RecordIterator::channel(&config(4, 1000), shutdown);
        feed.warn(CoreError::invalid_record("core:a: broken")).await.unwrap();
        feed.send(record("core:b")).await.unwrap();
        feed.finish(Ok(()));

        assert_eq!(iter.next().await.unwrap().lock().key(), "core:b");
        assert!(iter.next().await.is_none());
        let warnings = iter.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].to_string().contains("core:a"));
        assert!(iter.take_warnings().is_empty());
    }

    #[tokio::test]
    async fn error_is_reported_after_records() {
        let (_trigger, shutdown) = signal::signal();
        let (mut iter, mut feed) = RecordIterator::channel(&config(4, 1000), shutdown);
        feed.send(record("core:a")).await.unwrap();
        feed.finish(Err(CoreError::ShuttingDown));

        assert!(iter.err().is_none());
        assert!(iter.next().await.is_some());
        assert!(iter.next().await.is_none());
        assert!(matches!(iter.err(), Some(CoreError::ShuttingDown)));
    }
}
