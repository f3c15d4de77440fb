//! The bencoded query/response/error message layer.
//!
//! Reference: `spec.md` §4.4 "Message layer", §6 "DHT wire format".

use ouinet_01_identity::{DictBuilder, Value};

use super::errors::DhtError;

/// One DHT datagram payload: a query, a successful response, or an error.
#[derive(Debug, Clone)]
pub enum Message {
    Query {
        t: Vec<u8>,
        q: String,
        a: Value,
        read_only: bool,
    },
    Response {
        t: Vec<u8>,
        r: Value,
    },
    Error {
        t: Vec<u8>,
        code: i64,
        description: String,
    },
}

impl Message {
    pub fn transaction_id(&self) -> &[u8] {
        match self {
            Message::Query { t, .. } | Message::Response { t, .. } | Message::Error { t, .. } => t,
        }
    }

    pub fn query(t: Vec<u8>, q: &str, a: Value) -> Self {
        Message::Query {
            t,
            q: q.to_string(),
            a,
            read_only: false,
        }
    }

    pub fn response(t: Vec<u8>, r: Value) -> Self {
        Message::Response { t, r }
    }

    pub fn error(t: Vec<u8>, code: i64, description: impl Into<String>) -> Self {
        Message::Error {
            t,
            code,
            description: description.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Message::Query { t, q, a, read_only } => {
                let mut builder = DictBuilder::new()
                    .insert("t", Value::bytes(t.clone()))
                    .insert("y", Value::bytes(b"q".to_vec()))
                    .insert("q", Value::bytes(q.as_bytes().to_vec()))
                    .insert("a", a.clone());
                if *read_only {
                    builder = builder.insert("ro", Value::Int(1));
                }
                builder.build()
            }
            Message::Response { t, r } => DictBuilder::new()
                .insert("t", Value::bytes(t.clone()))
                .insert("y", Value::bytes(b"r".to_vec()))
                .insert("r", r.clone())
                .build(),
            Message::Error { t, code, description } => DictBuilder::new()
                .insert("t", Value::bytes(t.clone()))
                .insert("y", Value::bytes(b"e".to_vec()))
                .insert(
                    "e",
                    Value::List(vec![
                        Value::Int(*code),
                        Value::bytes(description.as_bytes().to_vec()),
                    ]),
                )
                .build(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_value().encode()
    }

    pub fn decode(datagram: &[u8]) -> Result<Message, DhtError> {
        let value = Value::decode(datagram).map_err(|e| DhtError::Protocol(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Message, DhtError> {
        let t = value
            .get("t")
            .and_then(Value::as_bytes)
            .ok_or_else(|| DhtError::Protocol("missing transaction id".into()))?
            .to_vec();
        let y = value
            .get("y")
            .and_then(Value::as_bytes)
            .ok_or_else(|| DhtError::Protocol("missing message type".into()))?;

        match y {
            b"q" => {
                let q = value
                    .get("q")
                    .and_then(Value::as_bytes)
                    .ok_or_else(|| DhtError::Protocol("query missing verb".into()))?;
                let a = value
                    .get("a")
                    .cloned()
                    .ok_or_else(|| DhtError::Protocol("query missing arguments".into()))?;
                let read_only = value.get("ro").and_then(Value::as_int) == Some(1);
                Ok(Message::Query {
                    t,
                    q: String::from_utf8_lossy(q).into_owned(),
                    a,
                    read_only,
                })
            }
            b"r" => {
                let r = value
                    .get("r")
                    .cloned()
                    .ok_or_else(|| DhtError::Protocol("response missing return values".into()))?;
                Ok(Message::Response { t, r })
            }
            b"e" => {
                let e = value
                    .get("e")
                    .and_then(Value::as_list)
                    .ok_or_else(|| DhtError::Protocol("error missing [code, message]".into()))?;
                let code = e.first().and_then(Value::as_int).unwrap_or(0);
                let description = e
                    .get(1)
                    .and_then(Value::as_bytes)
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                Ok(Message::Error { t, code, description })
            }
            other => Err(DhtError::Protocol(format!(
                "unknown message type {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_query_round_trips() {
        let args = DictBuilder::new().insert("id", Value::bytes(vec![1u8; 20])).build();
        let msg = Message::query(vec![0xaa], "ping", args);
        let decoded = Message::decode(&msg.encode()).unwrap();
        match decoded {
            Message::Query { q, read_only, .. } => {
                assert_eq!(q, "ping");
                assert!(!read_only);
            }
            _ => panic!("expected a query"),
        }
    }

    #[test]
    fn error_round_trips() {
        let msg = Message::error(vec![1], 203, "Incorrect announce token");
        let decoded = Message::decode(&msg.encode()).unwrap();
        match decoded {
            Message::Error { code, description, .. } => {
                assert_eq!(code, 203);
                assert_eq!(description, "Incorrect announce token");
            }
            _ => panic!("expected an error"),
        }
    }

    #[test]
    fn read_only_flag_round_trips() {
        let args = DictBuilder::new().insert("id", Value::bytes(vec![1u8; 20])).build();
        let msg = Message::Query {
            t: vec![2],
            q: "find_node".to_string(),
            a: args,
            read_only: true,
        };
        let decoded = Message::decode(&msg.encode()).unwrap();
        match decoded {
            Message::Query { read_only, .. } => assert!(read_only),
            _ => panic!("expected a query"),
        }
    }

    #[test]
    fn malformed_bencode_is_a_protocol_error() {
        assert!(matches!(Message::decode(b"not bencode"), Err(DhtError::Protocol(_))));
    }
}
