//! Live change feeds.
//!
//! A [`Subscription`] receives every committed write to its database that
//! matches its query before or after the write. The controller pushes a
//! snapshot of each such record into a bounded feed; a subscriber that
//! falls behind by more than the feed capacity is failed with
//! [`CoreError::SubscriptionOverflow`] instead of stalling writers.

use crate::controller::Controller;
use crate::error::CoreError;
use crate::query::Query;
use crate::record::{Meta, SharedRecord};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use uuid::Uuid;

/// What a write did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// First write of the record.
    New,
    /// Later write of a live record.
    Update,
    /// The record was deleted.
    Delete,
}

impl ChangeKind {
    /// Classifies a write by the metadata it left behind.
    #[must_use]
    pub const fn classify(meta: &Meta) -> Self {
        if meta.is_deleted() {
            Self::Delete
        } else if meta.is_new() {
            Self::New
        } else {
            Self::Update
        }
    }
}

/// A classified subscription event.
#[derive(Debug, Clone)]
pub struct Change {
    /// What happened.
    pub kind: ChangeKind,
    /// The record as written.
    pub record: SharedRecord,
}

impl Change {
    /// Classifies a delivered record.
    #[must_use]
    pub fn new(record: SharedRecord) -> Self {
        let kind = record
            .lock()
            .meta()
            .map_or(ChangeKind::Update, ChangeKind::classify);
        Self { kind, record }
    }
}

/// State shared between a subscription and its sink.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionState {
    err: Mutex<Option<CoreError>>,
    cancelled: AtomicBool,
}

impl SubscriptionState {
    fn fail(&self, err: CoreError) {
        let mut slot = self.err.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

/// Outcome of pushing an event into a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Push {
    Delivered,
    Overflowed,
    Closed,
}

/// Controller side of a subscription. Dropping it closes the feed.
#[derive(Debug)]
pub(crate) struct SubscriptionSink {
    pub(crate) id: Uuid,
    pub(crate) query: Query,
    pub(crate) local: bool,
    pub(crate) internal: bool,
    tx: mpsc::Sender<SharedRecord>,
    capacity: usize,
    state: Arc<SubscriptionState>,
}

impl SubscriptionSink {
    pub(crate) fn push(&self, record: SharedRecord) -> Push {
        if self.state.cancelled.load(Ordering::Acquire) {
            return Push::Closed;
        }
        match self.tx.try_send(record) {
            Ok(()) => Push::Delivered,
            Err(TrySendError::Full(_)) => {
                self.state.fail(CoreError::SubscriptionOverflow {
                    capacity: self.capacity,
                });
                Push::Overflowed
            }
            Err(TrySendError::Closed(_)) => Push::Closed,
        }
    }

    /// Ends the feed with `err` once buffered events are drained.
    pub(crate) fn fail(self, err: CoreError) {
        self.state.fail(err);
    }
}

/// Consumer side of a live change feed.
///
/// Dropping the subscription cancels it.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    query: Query,
    rx: mpsc::Receiver<SharedRecord>,
    state: Arc<SubscriptionState>,
    controller: Weak<Controller>,
    err: Option<CoreError>,
}

impl Subscription {
    pub(crate) fn channel(
        query: Query,
        local: bool,
        internal: bool,
        capacity: usize,
        controller: Weak<Controller>,
    ) -> (Subscription, SubscriptionSink) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let id = Uuid::new_v4();
        let state = Arc::new(SubscriptionState::default());
        (
            Subscription {
                id,
                query: query.clone(),
                rx,
                state: Arc::clone(&state),
                controller,
                err: None,
            },
            SubscriptionSink {
                id,
                query,
                local,
                internal,
                tx,
                capacity,
                state,
            },
        )
    }

    /// Unique id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The subscribed query.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Receives the next written record. `None` ends the feed; check
    /// [`Subscription::err`] afterwards.
    pub async fn recv(&mut self) -> Option<SharedRecord> {
        let next = self.rx.recv().await;
        if next.is_none() {
            self.collect_err();
        }
        next
    }

    /// Blocking form of [`Subscription::recv`].
    ///
    /// Must not be called from within an async context.
    pub fn blocking_recv(&mut self) -> Option<SharedRecord> {
        let next = self.rx.blocking_recv();
        if next.is_none() {
            self.collect_err();
        }
        next
    }

    /// Receives and classifies the next written record.
    pub async fn next_change(&mut self) -> Option<Change> {
        self.recv().await.map(Change::new)
    }

    /// Receives a buffered record without waiting.
    pub(crate) fn try_recv(&mut self) -> Option<SharedRecord> {
        match self.rx.try_recv() {
            Ok(record) => Some(record),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.collect_err();
                None
            }
        }
    }

    /// Waits until writes committed so far have been delivered.
    pub(crate) fn barrier(&self) {
        if let Some(controller) = self.controller.upgrade() {
            controller.barrier();
        }
    }

    /// Stops delivery. Events already buffered can still be received.
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(controller) = self.controller.upgrade() {
            controller.unsubscribe(self.id);
        }
    }

    /// Whether [`Subscription::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// The error that ended the feed, once it has ended.
    #[must_use]
    pub fn err(&self) -> Option<&CoreError> {
        self.err.as_ref()
    }

    /// Takes the error that ended the feed.
    pub fn take_err(&mut self) -> Option<CoreError> {
        self.err.take()
    }

    fn collect_err(&mut self) {
        if self.err.is_none() {
            self.err = self.state.err.lock().take();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
