//! Request parsing and response encoding.
//!
//! Every message is a `|`-separated line whose first field is an opaque
//! operation id chosen by the client. Responses carry the id of the request
//! they answer.
//!
//! ```text
//! 123|get|<key>                 123|ok|<key>|<data>      123|error|<message>
//! 124|query|<query>             124|ok|<key>|<data>...   124|done
//! 125|sub|<query>               125|new|<key>|<data>     125|upd|<key>|<data>   125|del|<key>
//! 126|qsub|<query>              query responses, then sub responses
//! 127|create|<key>|<data>       127|success
//! 128|update|<key>|<data>       128|success
//! 129|insert|<key>|<json map>   129|success
//! 130|delete|<key>              130|success
//! ```
//!
//! Per-record problems that do not end an operation are reported as
//! `warning` responses.

use crate::error::ProtocolError;

/// Field separator.
pub const SEPARATOR: u8 = b'|';

/// Methods a client can call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// Read one record.
    Get {
        /// Composite key.
        key: String,
    },
    /// Run a query to completion.
    Query {
        /// Query text.
        query: String,
    },
    /// Subscribe to changes.
    Sub {
        /// Query text.
        query: String,
    },
    /// Run a query, then subscribe to its changes.
    Qsub {
        /// Query text.
        query: String,
    },
    /// Write a new record.
    Create {
        /// Composite key.
        key: String,
        /// Format-tagged payload.
        data: Vec<u8>,
    },
    /// Overwrite a record.
    Update {
        /// Composite key.
        key: String,
        /// Format-tagged payload.
        data: Vec<u8>,
    },
    /// Set fields of an existing record.
    Insert {
        /// Composite key.
        key: String,
        /// JSON object of field paths to values.
        data: Vec<u8>,
    },
    /// Delete a record.
    Delete {
        /// Composite key.
        key: String,
    },
}

impl Method {
    /// The method's wire name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Query { .. } => "query",
            Self::Sub { .. } => "sub",
            Self::Qsub { .. } => "qsub",
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Insert { .. } => "insert",
            Self::Delete { .. } => "delete",
        }
    }
}

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Client-chosen operation id.
    pub op_id: Vec<u8>,
    /// What to do.
    pub method: Method,
}

/// A request that could not be parsed, with the id to answer under.
#[derive(Debug)]
pub struct Rejected {
    /// Operation id, empty if the message was too short to carry one.
    pub op_id: Vec<u8>,
    /// Why the request was rejected.
    pub error: ProtocolError,
}

impl Request {
    /// Parses one message.
    pub fn parse(msg: &[u8]) -> Result<Self, Rejected> {
        let mut parts = msg.splitn(3, |&b| b == SEPARATOR);
        let (Some(op_id), Some(method), Some(args)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Rejected {
                op_id: Vec::new(),
                error: ProtocolError::Malformed,
            });
        };

        let reject = |error| Rejected {
            op_id: op_id.to_vec(),
            error,
        };
        let text = |bytes: &[u8]| {
            String::from_utf8(bytes.to_vec()).map_err(|_| reject(ProtocolError::Malformed))
        };
        let key_and_data = || -> Result<(String, Vec<u8>), Rejected> {
            let mut fields = args.splitn(2, |&b| b == SEPARATOR);
            match (fields.next(), fields.next()) {
                (Some(key), Some(data)) => Ok((text(key)?, data.to_vec())),
                _ => Err(reject(ProtocolError::Malformed)),
            }
        };

        let method = match method {
            b"get" => Method::Get { key: text(args)? },
            b"query" => Method::Query { query: text(args)? },
            b"sub" => Method::Sub { query: text(args)? },
            b"qsub" => Method::Qsub { query: text(args)? },
            b"create" => {
                let (key, data) = key_and_data()?;
                Method::Create { key, data }
            }
            b"update" => {
                let (key, data) = key_and_data()?;
                Method::Update { key, data }
            }
            b"insert" => {
                let (key, data) = key_and_data()?;
                Method::Insert { key, data }
            }
            b"delete" => Method::Delete { key: text(args)? },
            _ => return Err(reject(ProtocolError::UnknownMethod)),
        };
        Ok(Self {
            op_id: op_id.to_vec(),
            method,
        })
    }
}

/// A response to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A record, answering `get`, `query` and `qsub`.
    Ok {
        /// Composite key.
        key: String,
        /// JSON payload with its format tag.
        data: Vec<u8>,
    },
    /// The operation failed and is over.
    Error(String),
    /// A query finished.
    Done,
    /// A write succeeded.
    Success,
    /// A subscribed record was updated.
    Upd {
        /// Composite key.
        key: String,
        /// JSON payload with its format tag.
        data: Vec<u8>,
    },
    /// A subscribed record was created.
    New {
        /// Composite key.
        key: String,
        /// JSON payload with its format tag.
        data: Vec<u8>,
    },
    /// A subscribed record was deleted.
    Del {
        /// Composite key.
        key: String,
    },
    /// A single record could not be sent; the operation continues.
    Warning(String),
}

impl Response {
    /// The response's wire type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ok { .. } => "ok",
            Self::Error(_) => "error",
            Self::Done => "done",
            Self::Success => "success",
            Self::Upd { .. } => "upd",
            Self::New { .. } => "new",
            Self::Del { .. } => "del",
            Self::Warning(_) => "warning",
        }
    }

    /// Encodes the response for `op_id`. Empty fields are left out.
    #[must_use]
    pub fn encode(&self, op_id: &[u8]) -> Vec<u8> {
        let (text, data) = match self {
            Self::Ok { key, data } | Self::Upd { key, data } | Self::New { key, data } => {
                (key.as_str(), data.as_slice())
            }
            Self::Del { key } => (key.as_str(), &[][..]),
            Self::Error(message) | Self::Warning(message) => (message.as_str(), &[][..]),
            Self::Done | Self::Success => ("", &[][..]),
        };

        let kind = self.kind();
        let mut out = Vec::with_capacity(op_id.len() + kind.len() + text.len() + data.len() + 3);
        out.extend_from_slice(op_id);
        out.push(SEPARATOR);
        out.extend_from_slice(kind.as_bytes());
        if !text.is_empty() {
            out.push(SEPARATOR);
            out.extend_from_slice(text.as_bytes());
        }
        if !data.is_empty() {
            out.push(SEPARATOR);
            out.extend_from_slice(data);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(msg: &str) -> Method {
        Request::parse(msg.as_bytes()).unwrap().method
    }

    #[test]
    fn parses_methods() {
        assert_eq!(
            parse("1|get|core:a"),
            Method::Get {
                key: "core:a".into()
            }
        );
        assert_eq!(
            parse("2|query|core:people/ where name == \"a|b\""),
            Method::Query {
                query: "core:people/ where name == \"a|b\"".into()
            }
        );
        assert_eq!(
            parse("3|create|core:a|J{\"x\":\"|\"}"),
            Method::Create {
                key: "core:a".into(),
                data: b"J{\"x\":\"|\"}".to_vec()
            }
        );
        assert_eq!(parse("4|delete|core:a").name(), "delete");
        assert_eq!(parse("5|qsub|core:").name(), "qsub");
    }

    #[test]
    fn rejects_bad_requests() {
        let rejected = Request::parse(b"1|get").unwrap_err();
        assert!(rejected.op_id.is_empty());
        assert!(matches!(rejected.error, ProtocolError::Malformed));

        let rejected = Request::parse(b"7|fetch|core:a").unwrap_err();
        assert_eq!(rejected.op_id, b"7");
        assert!(matches!(rejected.error, ProtocolError::UnknownMethod));

        let rejected = Request::parse(b"8|update|core:a").unwrap_err();
        assert_eq!(rejected.op_id, b"8");
        assert!(matches!(rejected.error, ProtocolError::Malformed));
    }

    #[test]
    fn encodes_responses() {
        let ok = Response::Ok {
            key: "core:a".into(),
            data: b"J{}".to_vec(),
        };
        assert_eq!(ok.encode(b"1"), b"1|ok|core:a|J{}");
        assert_eq!(Response::Done.encode(b"2"), b"2|done");
        assert_eq!(Response::Success.encode(b"3"), b"3|success");
        assert_eq!(
            Response::Del {
                key: "core:a".into()
            }
            .encode(b"4"),
            b"4|del|core:a"
        );
        assert_eq!(
            Response::Error(ProtocolError::Malformed.to_string()).encode(b""),
            b"|error|bad request: malformed message"
        );
    }
}
