//! Tag-associated values
//!
//! A `Value` is the small tagged union stored alongside a (file, tag)
//! association: plain scalars, length-prefixed binary payloads, and
//! nested lists/dicts. Values travel through the store as BLOBs in the
//! `file_tag.value` and `tag.default_value` columns, so the binary
//! encoding here must be an exact inverse of its decoder.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EngineError, Result};

/// Wire type tags; also the cross-variant ordering used by `compare`.
const TAG_DICT: u8 = 0;
const TAG_LIST: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_STR: u8 = 3;
const TAG_BINARY: u8 = 4;
const TAG_ERR: u8 = 5;

/// The kind of value a tag accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Dict,
    List,
    Int,
    Str,
    Binary,
    Err,
}

impl ValueKind {
    /// Stable code stored in the `tag.kind` column; same ordinals as
    /// the wire type tags.
    pub fn code(self) -> u8 {
        match self {
            ValueKind::Dict => TAG_DICT,
            ValueKind::List => TAG_LIST,
            ValueKind::Int => TAG_INT,
            ValueKind::Str => TAG_STR,
            ValueKind::Binary => TAG_BINARY,
            ValueKind::Err => TAG_ERR,
        }
    }

    pub fn from_code(code: u8) -> Option<ValueKind> {
        match code {
            TAG_DICT => Some(ValueKind::Dict),
            TAG_LIST => Some(ValueKind::List),
            TAG_INT => Some(ValueKind::Int),
            TAG_STR => Some(ValueKind::Str),
            TAG_BINARY => Some(ValueKind::Binary),
            TAG_ERR => Some(ValueKind::Err),
            _ => None,
        }
    }

    /// The kind's global default, used when a tag has no default of its own.
    pub fn default_value(self) -> Value {
        match self {
            ValueKind::Dict => Value::Dict(BTreeMap::new()),
            ValueKind::List => Value::List(Vec::new()),
            ValueKind::Int => Value::Int(0),
            ValueKind::Str => Value::Str(String::new()),
            ValueKind::Binary => Value::Binary(Vec::new()),
            ValueKind::Err => Value::Err(String::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Dict(BTreeMap<Value, Value>),
    List(Vec<Value>),
    Int(i64),
    Str(String),
    Binary(Vec<u8>),
    Err(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Dict(_) => ValueKind::Dict,
            Value::List(_) => ValueKind::List,
            Value::Int(_) => ValueKind::Int,
            Value::Str(_) => ValueKind::Str,
            Value::Binary(_) => ValueKind::Binary,
            Value::Err(_) => ValueKind::Err,
        }
    }

    fn type_tag(&self) -> u8 {
        match self {
            Value::Dict(_) => TAG_DICT,
            Value::List(_) => TAG_LIST,
            Value::Int(_) => TAG_INT,
            Value::Str(_) => TAG_STR,
            Value::Binary(_) => TAG_BINARY,
            Value::Err(_) => TAG_ERR,
        }
    }

    /// Inserts into a dict value. Dict keys must be Int- or Str-typed.
    pub fn dict_insert(&mut self, key: Value, value: Value) -> Result<()> {
        if !matches!(key, Value::Int(_) | Value::Str(_)) {
            return Err(EngineError::Conflict(format!(
                "dict key must be int or string, got {:?}",
                key.kind()
            )));
        }
        match self {
            Value::Dict(map) => {
                map.insert(key, value);
                Ok(())
            }
            other => Err(EngineError::Conflict(format!(
                "dict_insert on {:?} value",
                other.kind()
            ))),
        }
    }

    /// Weak total order: type tag first, then variant payload. Dicts
    /// order by size, then "not equal means greater": good enough for
    /// a stable sort key, not a semantic ordering.
    pub fn compare(&self, other: &Value) -> Ordering {
        match self.type_tag().cmp(&other.type_tag()) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            (Value::Err(a), Value::Err(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y) {
                        Ordering::Equal => {}
                        ord => return ord,
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Dict(a), Value::Dict(b)) => match a.len().cmp(&b.len()) {
                Ordering::Equal => {
                    if a == b {
                        Ordering::Equal
                    } else {
                        Ordering::Greater
                    }
                }
                ord => ord,
            },
            // Type tags already matched above.
            _ => unreachable!("variant mismatch after equal type tags"),
        }
    }

    /// Length-prefixed binary encoding: 1-byte type tag, then payload.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.type_tag());
        match self {
            Value::Int(n) => out.extend_from_slice(&n.to_be_bytes()),
            Value::Str(s) => {
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Err(s) => {
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Binary(b) => {
                out.extend_from_slice(&(b.len() as u32).to_be_bytes());
                out.extend_from_slice(b);
            }
            Value::List(items) => {
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
            Value::Dict(map) => {
                out.extend_from_slice(&(map.len() as u32).to_be_bytes());
                for (k, v) in map {
                    k.encode_into(out);
                    v.encode_into(out);
                }
            }
        }
    }

    /// Exact inverse of `to_binary`; rejects trailing bytes.
    pub fn from_binary(bytes: &[u8]) -> Result<Value> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let value = cursor.decode()?;
        if cursor.pos != bytes.len() {
            return Err(EngineError::Decode(format!(
                "{} trailing bytes after value",
                bytes.len() - cursor.pos
            )));
        }
        Ok(value)
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "\"{}\"", s),
            Value::Err(s) => write!(f, "error(\"{}\")", s),
            Value::Binary(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Dict(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(EngineError::Decode("truncated value payload".into()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes(raw.try_into().unwrap()))
    }

    fn take_string(&mut self) -> Result<String> {
        let len = self.take_u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| EngineError::Decode(format!("invalid utf-8 in value: {}", e)))
    }

    fn decode(&mut self) -> Result<Value> {
        let tag = self.take(1)?[0];
        match tag {
            TAG_INT => {
                let raw = self.take(8)?;
                Ok(Value::Int(i64::from_be_bytes(raw.try_into().unwrap())))
            }
            TAG_STR => Ok(Value::Str(self.take_string()?)),
            TAG_ERR => Ok(Value::Err(self.take_string()?)),
            TAG_BINARY => {
                let len = self.take_u32()? as usize;
                Ok(Value::Binary(self.take(len)?.to_vec()))
            }
            TAG_LIST => {
                let count = self.take_u32()? as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.decode()?);
                }
                Ok(Value::List(items))
            }
            TAG_DICT => {
                let count = self.take_u32()? as usize;
                let mut map = BTreeMap::new();
                for _ in 0..count {
                    let key = self.decode()?;
                    if !matches!(key, Value::Int(_) | Value::Str(_)) {
                        return Err(EngineError::Decode(
                            "dict key must be int or string".into(),
                        ));
                    }
                    let value = self.decode()?;
                    map.insert(key, value);
                }
                Ok(Value::Dict(map))
            }
            other => Err(EngineError::Decode(format!("unknown type tag {}", other))),
        }
    }
}
