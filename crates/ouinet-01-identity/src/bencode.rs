//! Bencoded value model and codec.
//!
//! Reference: `spec.md` §3 "NodeID & Bencoding", §6 "DHT wire format", §8
//! testable property 6 (`decode(encode(x)) == x`).

use std::collections::BTreeMap;
use std::fmt;

/// A bencoded value: integer, byte string, list, or dictionary.
///
/// Dictionary keys are byte strings kept in a [`BTreeMap`] so that encoding
/// is always canonical (sorted), matching BEP 3.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

/// Errors produced while decoding a bencoded byte string.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid integer literal")]
    InvalidInteger,
    #[error("invalid byte-string length prefix")]
    InvalidLength,
    #[error("unrecognized value tag {0:#x}")]
    UnknownTag(u8),
    #[error("trailing bytes after a complete value")]
    TrailingBytes,
    #[error("dictionary keys must be byte strings")]
    NonStringKey,
}

impl Value {
    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(b.into())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a dictionary field by a string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?.get(key.as_bytes())
    }

    /// Encode this value into its canonical bencoded form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(i) => {
                out.push(b'i');
                out.extend_from_slice(i.to_string().as_bytes());
                out.push(b'e');
            }
            Value::Bytes(b) => {
                out.extend_from_slice(b.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(b);
            }
            Value::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode_into(out);
                }
                out.push(b'e');
            }
            Value::Dict(map) => {
                out.push(b'd');
                for (k, v) in map {
                    Value::Bytes(k.clone()).encode_into(out);
                    v.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }

    /// Decode a single bencoded value, requiring the whole input be consumed.
    pub fn decode(input: &[u8]) -> Result<Value, BencodeError> {
        let mut pos = 0;
        let value = decode_value(input, &mut pos)?;
        if pos != input.len() {
            return Err(BencodeError::TrailingBytes);
        }
        Ok(value)
    }
}

fn decode_value(input: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    let tag = *input.get(*pos).ok_or(BencodeError::UnexpectedEof)?;
    match tag {
        b'i' => decode_int(input, pos),
        b'l' => decode_list(input, pos),
        b'd' => decode_dict(input, pos),
        b'0'..=b'9' => decode_bytes(input, pos).map(Value::Bytes),
        other => Err(BencodeError::UnknownTag(other)),
    }
}

fn decode_int(input: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    debug_assert_eq!(input[*pos], b'i');
    *pos += 1;
    let start = *pos;
    while *input.get(*pos).ok_or(BencodeError::UnexpectedEof)? != b'e' {
        *pos += 1;
    }
    let digits = std::str::from_utf8(&input[start..*pos]).map_err(|_| BencodeError::InvalidInteger)?;
    let value: i64 = digits.parse().map_err(|_| BencodeError::InvalidInteger)?;
    *pos += 1; // consume 'e'
    Ok(Value::Int(value))
}

fn decode_bytes(input: &[u8], pos: &mut usize) -> Result<Vec<u8>, BencodeError> {
    let start = *pos;
    while *input.get(*pos).ok_or(BencodeError::UnexpectedEof)? != b':' {
        *pos += 1;
    }
    let digits = std::str::from_utf8(&input[start..*pos]).map_err(|_| BencodeError::InvalidLength)?;
    let len: usize = digits.parse().map_err(|_| BencodeError::InvalidLength)?;
    *pos += 1; // consume ':'
    let end = pos.checked_add(len).ok_or(BencodeError::InvalidLength)?;
    let slice = input.get(*pos..end).ok_or(BencodeError::UnexpectedEof)?;
    *pos = end;
    Ok(slice.to_vec())
}

fn decode_list(input: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    debug_assert_eq!(input[*pos], b'l');
    *pos += 1;
    let mut items = Vec::new();
    loop {
        match input.get(*pos).ok_or(BencodeError::UnexpectedEof)? {
            b'e' => {
                *pos += 1;
                return Ok(Value::List(items));
            }
            _ => items.push(decode_value(input, pos)?),
        }
    }
}

fn decode_dict(input: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    debug_assert_eq!(input[*pos], b'd');
    *pos += 1;
    let mut map = BTreeMap::new();
    loop {
        match input.get(*pos).ok_or(BencodeError::UnexpectedEof)? {
            b'e' => {
                *pos += 1;
                return Ok(Value::Dict(map));
            }
            b'0'..=b'9' => {
                let key = decode_bytes(input, pos)?;
                let value = decode_value(input, pos)?;
                map.insert(key, value);
            }
            _ => return Err(BencodeError::NonStringKey),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.encode()))
    }
}

/// Convenience builder for dictionaries.
#[derive(Default)]
pub struct DictBuilder(BTreeMap<Vec<u8>, Value>);

impl DictBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: &str, value: Value) -> Self {
        self.0.insert(key.as_bytes().to_vec(), value);
        self
    }

    pub fn build(self) -> Value {
        Value::Dict(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_integers() {
        let v = Value::Int(-42);
        assert_eq!(Value::decode(&v.encode()).unwrap(), v);
    }

    #[test]
    fn round_trips_bytes() {
        let v = Value::bytes(b"spam".to_vec());
        assert_eq!(v.encode(), b"4:spam");
        assert_eq!(Value::decode(&v.encode()).unwrap(), v);
    }

    #[test]
    fn round_trips_lists() {
        let v = Value::List(vec![Value::bytes(b"a".to_vec()), Value::Int(1)]);
        assert_eq!(Value::decode(&v.encode()).unwrap(), v);
    }

    #[test]
    fn dict_keys_encode_in_sorted_order() {
        let v = DictBuilder::new()
            .insert("zz", Value::Int(1))
            .insert("aa", Value::Int(2))
            .build();
        let encoded = v.encode();
        assert_eq!(encoded, b"d2:aai2e2:zzi1ee");
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = Value::Int(1).encode();
        bytes.push(b'x');
        assert_eq!(Value::decode(&bytes), Err(BencodeError::TrailingBytes));
    }

    #[test]
    fn rejects_truncated_input() {
        assert_eq!(Value::decode(b"4:sp"), Err(BencodeError::UnexpectedEof));
    }

    #[test]
    fn real_query_message_round_trips() {
        let msg = DictBuilder::new()
            .insert("t", Value::bytes(b"aa".to_vec()))
            .insert("y", Value::bytes(b"q".to_vec()))
            .insert("q", Value::bytes(b"ping".to_vec()))
            .insert(
                "a",
                DictBuilder::new()
                    .insert("id", Value::bytes(vec![0u8; 20]))
                    .build(),
            )
            .build();
        let decoded = Value::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.get("q").and_then(Value::as_bytes), Some(&b"ping"[..]));
    }
}
