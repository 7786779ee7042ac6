//! One client connection.
//!
//! A session turns request messages into operations on an [`Interface`]
//! and queues encoded responses for the transport. Each request runs as
//! its own task, so a long query or a subscription never blocks the
//! requests that follow it. Responses of different operations interleave;
//! responses of one operation keep their order.

use crate::config::SessionConfig;
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Method, Request, Response};
use recdb_codec::Format;
use recdb_core::{
    share, signal, Change, ChangeKind, CoreResult, Interface, QsubEvent, Query, RecordIterator,
    Scanned, SharedRecord, Signal, Subscription, Trigger, Wrapper,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Serves the message protocol for one client.
///
/// Requires a tokio runtime: [`Session::handle`] spawns a task per request.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    db: Arc<Interface>,
    tx: mpsc::Sender<Vec<u8>>,
    trigger: Trigger,
    shutdown: Signal,
}

impl Session {
    /// Creates a session and the receiver its responses are queued on.
    #[must_use]
    pub fn new(db: Arc<Interface>, config: SessionConfig) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (trigger, shutdown) = signal();
        debug!(queue_capacity = config.queue_capacity, "session started");
        let session = Self {
            inner: Arc::new(Inner {
                db,
                tx,
                trigger,
                shutdown,
            }),
        };
        (session, rx)
    }

    /// Handles one request message.
    ///
    /// Malformed requests are answered with an `error` response; this only
    /// fails when the request cannot be processed at all.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::SessionClosed`] after shutdown,
    /// [`ProtocolError::NoRuntime`] outside a tokio runtime.
    pub fn handle(&self, msg: &[u8]) -> ProtocolResult<()> {
        if self.is_shut_down() {
            return Err(ProtocolError::SessionClosed);
        }
        let runtime = Handle::try_current().map_err(|_| ProtocolError::NoRuntime)?;
        let inner = Arc::clone(&self.inner);

        match Request::parse(msg) {
            Ok(request) => {
                debug!(method = request.method.name(), "request");
                runtime.spawn(async move { inner.run(request).await });
            }
            Err(rejected) => {
                debug!(error = %rejected.error, "rejected request");
                runtime.spawn(async move {
                    inner
                        .send(&rejected.op_id, Response::Error(rejected.error.to_string()))
                        .await;
                });
            }
        }
        Ok(())
    }

    /// Cancels every open query and subscription of this session.
    pub fn shutdown(&self) {
        if !self.inner.trigger.is_fired() {
            self.inner.trigger.fire();
            info!("session shut down");
        }
    }

    /// Whether [`Session::shutdown`] was called or the receiver is gone.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.trigger.is_fired()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn run(&self, request: Request) {
        let op = request.op_id.as_slice();
        match request.method {
            Method::Get { key } => {
                let response = match self.db.get(&key).and_then(|r| json_payload(&r)) {
                    Ok((key, data)) => Response::Ok { key, data },
                    Err(err) => Response::Error(err.to_string()),
                };
                self.send(op, response).await;
            }
            Method::Query { query } => {
                let Some(query) = self.parse_query(op, &query).await else {
                    return;
                };
                match self.db.query(query) {
                    Ok(iter) => self.stream_query(op, iter).await,
                    Err(err) => {
                        self.send(op, Response::Error(err.to_string())).await;
                    }
                }
            }
            Method::Sub { query } => {
                let Some(query) = self.parse_query(op, &query).await else {
                    return;
                };
                match self.db.subscribe(query) {
                    Ok(mut sub) => self.stream_changes(op, &mut sub).await,
                    Err(err) => {
                        self.send(op, Response::Error(err.to_string())).await;
                    }
                }
            }
            Method::Qsub { query } => {
                let Some(query) = self.parse_query(op, &query).await else {
                    return;
                };
                self.query_subscribe(op, query).await;
            }
            Method::Create { key, data } => {
                let result = wrap(&key, data)
                    .and_then(|r| self.db.put_new(&r).map_err(ProtocolError::from));
                self.reply(op, result).await;
            }
            Method::Update { key, data } => {
                let result = wrap(&key, data)
                    .and_then(|r| self.db.put(&r).map_err(ProtocolError::from));
                self.reply(op, result).await;
            }
            Method::Insert { key, data } => {
                let result = self.insert(&key, &data);
                self.reply(op, result).await;
            }
            Method::Delete { key } => {
                let result = self.db.delete(&key).map_err(ProtocolError::from);
                self.reply(op, result).await;
            }
        }
    }

    async fn parse_query(&self, op: &[u8], text: &str) -> Option<Query> {
        match Query::parse(text) {
            Ok(query) => Some(query),
            Err(err) => {
                self.send(op, Response::Error(err.to_string())).await;
                None
            }
        }
    }

    /// Sends the query results and warnings, then `done` or the error that
    /// ended the scan.
    async fn stream_query(&self, op: &[u8], mut iter: RecordIterator) {
        let mut shutdown = self.shutdown.clone();
        loop {
            let next = tokio::select! {
                item = iter.next_item() => Some(item),
                _ = shutdown.fired() => None,
            };
            let Some(next) = next else {
                iter.cancel();
                return;
            };
            let response = match next {
                Some(Scanned::Record(record)) => record_response(&record),
                Some(Scanned::Warning(err)) => Response::Warning(err.to_string()),
                None => break,
            };
            if !self.send(op, response).await {
                iter.cancel();
                return;
            }
        }

        let response = match iter.take_err() {
            Some(err) => Response::Error(err.to_string()),
            None => Response::Done,
        };
        self.send(op, response).await;
    }

    async fn stream_changes(&self, op: &[u8], sub: &mut Subscription) {
        let mut shutdown = self.shutdown.clone();
        loop {
            let next = tokio::select! {
                change = sub.next_change() => Some(change),
                _ = shutdown.fired() => None,
            };
            let Some(next) = next else {
                sub.cancel();
                return;
            };
            let Some(change) = next else {
                if let Some(err) = sub.take_err() {
                    self.send(op, Response::Error(err.to_string())).await;
                }
                return;
            };
            if !self.send(op, change_response(&change)).await {
                sub.cancel();
                return;
            }
        }
    }

    async fn query_subscribe(&self, op: &[u8], query: Query) {
        let mut qsub = match self.db.query_subscribe(query) {
            Ok(qsub) => qsub,
            Err(err) => {
                self.send(op, Response::Error(err.to_string())).await;
                return;
            }
        };

        let mut shutdown = self.shutdown.clone();
        loop {
            let next = tokio::select! {
                event = qsub.next() => Some(event),
                _ = shutdown.fired() => None,
            };
            let Some(next) = next else {
                qsub.cancel();
                return;
            };
            let response = match next {
                Ok(Some(QsubEvent::Snapshot(record))) => record_response(&record),
                Ok(Some(QsubEvent::Warning(err))) => Response::Warning(err.to_string()),
                Ok(Some(QsubEvent::SnapshotDone)) => Response::Done,
                Ok(Some(QsubEvent::Change(change))) => change_response(&change),
                Ok(None) => return,
                Err(err) => {
                    self.send(op, Response::Error(err.to_string())).await;
                    return;
                }
            };
            if !self.send(op, response).await {
                qsub.cancel();
                return;
            }
        }
    }

    fn insert(&self, key: &str, data: &[u8]) -> ProtocolResult<()> {
        let body = match data.split_first() {
            Some((&tag, rest)) if tag == Format::Json.tag() => rest,
            _ => data,
        };
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ProtocolError::invalid_data(format!("invalid JSON: {e}")))?;
        let Value::Object(fields) = value else {
            return Err(ProtocolError::invalid_data("values must be in a map"));
        };
        if fields.is_empty() {
            return Err(ProtocolError::invalid_data("could not find any valid values"));
        }
        self.db.insert_values(key, fields)?;
        Ok(())
    }

    async fn reply(&self, op: &[u8], result: ProtocolResult<()>) {
        let response = match result {
            Ok(()) => Response::Success,
            Err(err) => Response::Error(err.to_string()),
        };
        self.send(op, response).await;
    }

    /// Queues a response. Returns false once the session is over.
    async fn send(&self, op: &[u8], response: Response) -> bool {
        let mut shutdown = self.shutdown.clone();
        if shutdown.is_fired() {
            return false;
        }
        let encoded = response.encode(op);
        tokio::select! {
            sent = self.tx.send(encoded) => match sent {
                Ok(()) => true,
                Err(_) => {
                    warn!("response receiver closed, shutting session down");
                    self.trigger.fire();
                    false
                }
            },
            _ = shutdown.fired() => false,
        }
    }
}

/// Composite key and JSON payload of a record.
fn json_payload(record: &SharedRecord) -> CoreResult<(String, Vec<u8>)> {
    let record = record.lock();
    let data = record.marshal(Format::Json)?;
    Ok((record.key(), data))
}

fn record_response(record: &SharedRecord) -> Response {
    match json_payload(record) {
        Ok((key, data)) => Response::Ok { key, data },
        Err(err) => Response::Warning(format!("{}: {err}", record.lock().key())),
    }
}

fn change_response(change: &Change) -> Response {
    if change.kind == ChangeKind::Delete {
        return Response::Del {
            key: change.record.lock().key(),
        };
    }
    match json_payload(&change.record) {
        Ok((key, data)) if change.kind == ChangeKind::New => Response::New { key, data },
        Ok((key, data)) => Response::Upd { key, data },
        Err(err) => Response::Warning(format!("{}: {err}", change.record.lock().key())),
    }
}

/// Builds a record from client data, adding the JSON tag if it is missing.
fn wrap(key: &str, data: Vec<u8>) -> ProtocolResult<SharedRecord> {
    if data.len() < 2 {
        return Err(ProtocolError::Malformed);
    }
    let body = if data[0] == Format::Json.tag() {
        data[1..].to_vec()
    } else {
        data
    };
    serde_json::from_slice::<Value>(&body)
        .map_err(|e| ProtocolError::invalid_data(format!("invalid JSON: {e}")))?;
    Ok(share(Wrapper::new(key, None, Format::Json, body)))
}
