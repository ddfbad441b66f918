// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message payload: a small keyed record of scalar values.
//!
//! Wire layout (big-endian):
//!
//! ```text
//! u32 count
//! count x { i32 key, u8 tag, value }
//!   tag 0 Bool   u8
//!   tag 1 Int    i64
//!   tag 2 Float  f64 (IEEE-754 bits)
//!   tag 3 Text   u32 len + UTF-8
//!   tag 4 Bytes  u32 len + bytes
//! ```

use std::collections::BTreeMap;

use crate::aid::AtomicId;
use crate::codec::{put_bytes, put_i32, put_i64, put_u32, put_u8, ByteReader};
use crate::error::{Error, Result};

const TAG_BOOL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_TEXT: u8 = 3;
const TAG_BYTES: u8 = 4;

/// One field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Ordered map from field id to value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: BTreeMap<AtomicId, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Record::set`].
    pub fn with(mut self, key: AtomicId, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: AtomicId, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key, value.into())
    }

    pub fn get(&self, key: AtomicId) -> Option<&Value> {
        self.fields.get(&key)
    }

    pub fn remove(&mut self, key: AtomicId) -> Option<Value> {
        self.fields.remove(&key)
    }

    pub fn contains(&self, key: AtomicId) -> bool {
        self.fields.contains_key(&key)
    }

    pub fn get_int(&self, key: AtomicId) -> Option<i64> {
        match self.fields.get(&key) {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_text(&self, key: AtomicId) -> Option<&str> {
        match self.fields.get(&key) {
            Some(Value::Text(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: AtomicId) -> Option<bool> {
        match self.fields.get(&key) {
            Some(Value::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AtomicId, &Value)> {
        self.fields.iter()
    }

    pub fn pack(&self, buf: &mut Vec<u8>) -> Result<()> {
        put_u32(buf, self.fields.len() as u32);
        for (key, value) in &self.fields {
            put_i32(buf, key.value());
            match value {
                Value::Bool(v) => {
                    put_u8(buf, TAG_BOOL);
                    put_u8(buf, u8::from(*v));
                }
                Value::Int(v) => {
                    put_u8(buf, TAG_INT);
                    put_i64(buf, *v);
                }
                Value::Float(v) => {
                    put_u8(buf, TAG_FLOAT);
                    put_i64(buf, v.to_bits() as i64);
                }
                Value::Text(v) => {
                    put_u8(buf, TAG_TEXT);
                    put_bytes(buf, v.as_bytes())?;
                }
                Value::Bytes(v) => {
                    put_u8(buf, TAG_BYTES);
                    put_bytes(buf, v)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn unpack(r: &mut ByteReader<'_>) -> Result<Self> {
        let count = r.u32("record count")?;
        let mut fields = BTreeMap::new();
        for _ in 0..count {
            let key = AtomicId::new(r.i32("record key")?);
            let value = match r.u8("record tag")? {
                TAG_BOOL => Value::Bool(r.u8("bool")? != 0),
                TAG_INT => Value::Int(r.i64("int")?),
                TAG_FLOAT => Value::Float(f64::from_bits(r.i64("float")? as u64)),
                TAG_TEXT => {
                    let raw = r.bytes("text")?;
                    let s = std::str::from_utf8(raw)
                        .map_err(|e| Error::Corrupt(format!("record text: {}", e)))?;
                    Value::Text(s.to_string())
                }
                TAG_BYTES => Value::Bytes(r.bytes("bytes")?.to_vec()),
                tag => return Err(Error::Corrupt(format!("unknown record tag {}", tag))),
            };
            fields.insert(key, value);
        }
        Ok(Self { fields })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.pack(&mut buf)?;
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        let rec = Self::unpack(&mut r)?;
        r.finish("record")?;
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::{AID_HOST, AID_PORT, AID_TEXT};

    #[test]
    fn test_typed_getters() {
        let rec = Record::new()
            .with(AID_HOST, "node-a")
            .with(AID_PORT, 4808_i64)
            .with(AID_TEXT, true);
        assert_eq!(rec.get_text(AID_HOST), Some("node-a"));
        assert_eq!(rec.get_int(AID_PORT), Some(4808));
        assert_eq!(rec.get_bool(AID_TEXT), Some(true));
        assert_eq!(rec.get_int(AID_HOST), None);
    }

    #[test]
    fn test_pack_all_value_kinds() {
        let rec = Record::new()
            .with(AtomicId::new(1), false)
            .with(AtomicId::new(2), -7_i64)
            .with(AtomicId::new(3), 2.5_f64)
            .with(AtomicId::new(4), "hé")
            .with(AtomicId::new(5), vec![0u8, 255]);
        let bytes = rec.to_bytes().unwrap();
        assert_eq!(Record::from_bytes(&bytes).unwrap(), rec);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 1);
        put_i32(&mut buf, 9);
        put_u8(&mut buf, 77);
        assert!(matches!(Record::from_bytes(&buf), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 1);
        put_i32(&mut buf, 9);
        put_u8(&mut buf, TAG_TEXT);
        put_bytes(&mut buf, &[0xC3, 0x28]).unwrap();
        assert!(Record::from_bytes(&buf).is_err());
    }
}
