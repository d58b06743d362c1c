//! Minimal bencoding — just enough to emit a BitTorrent v1 metainfo file.
//!
//! No published crate in the surveyed dependency pack covers bencoding, so
//! this is implemented directly rather than reached for. Dict keys are kept
//! in a `BTreeMap<Vec<u8>, Value>` so they serialize in the byte-lexical
//! keys in dictionary-sorted order without an extra sort step.

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Bytes(s.into().into_bytes())
    }

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
}

#[derive(Default)]
pub struct DictBuilder {
    map: BTreeMap<Vec<u8>, Value>,
}

impl DictBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: &str, value: Value) -> Self {
        self.map.insert(key.as_bytes().to_vec(), value);
        self
    }

    pub fn build(self) -> Value {
        Value::Dict(self.map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_scalars() {
        assert_eq!(Value::Int(42).encode(), b"i42e");
        assert_eq!(Value::str("spam").encode(), b"4:spam");
    }

    #[test]
    fn encodes_dict_in_key_order() {
        let d = DictBuilder::new()
            .insert("zeta", Value::Int(1))
            .insert("alpha", Value::Int(2))
            .build();
        assert_eq!(d.encode(), b"d5:alphai2e4:zetai1ee");
    }

    #[test]
    fn encodes_list() {
        let l = Value::List(vec![Value::str("a"), Value::Int(1)]);
        assert_eq!(l.encode(), b"l1:ai1ee");
    }
}
