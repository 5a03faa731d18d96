//! Order-preserving tuple encoding for composite keys.
//!
//! Keys in the store are packed tuples of strings, byte strings and signed
//! integers. The encoding guarantees that comparing two packed tuples byte by
//! byte gives the same result as comparing the tuples element by element,
//! which is what lets a reverse range scan over a fixed ngram return postings
//! newest-order first.
//!
//! Layout of one element (type code followed by payload):
//!
//! | code   | element | payload                                              |
//! |--------|---------|------------------------------------------------------|
//! | `0x01` | bytes   | raw bytes, `0x00` escaped as `0x00 0xFF`, then `0x00` |
//! | `0x02` | string  | UTF-8 bytes, escaped and terminated like bytes       |
//! | `0x15` | integer | 8 bytes big-endian of the value with the sign bit flipped |
//!
//! # Examples
//!
//! ```
//! use kvgram::tuple::{self, Element};
//!
//! let older = tuple::pack(&["tex".into(), 1i64.into()]);
//! let newer = tuple::pack(&["tex".into(), 3i64.into()]);
//! assert!(older < newer);
//!
//! let decoded = tuple::unpack(&newer).unwrap();
//! assert_eq!(decoded, vec![Element::from("tex"), Element::Int(3)]);
//! ```

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{KvgramError, Result};
use crate::storage::KeyRange;

const BYTES_CODE: u8 = 0x01;
const STRING_CODE: u8 = 0x02;
const INT_CODE: u8 = 0x15;
const ESCAPE: u8 = 0xFF;
const SIGN_BIT: u64 = 1 << 63;

/// A single tuple element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Element {
    /// Raw byte string.
    Bytes(Vec<u8>),
    /// Unicode string.
    String(String),
    /// Signed 64-bit integer.
    Int(i64),
}

impl Element {
    /// Borrow the string payload, if this is a string element.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Element::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the integer payload, if this is an integer element.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Element::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Element::Bytes(bytes) => {
                out.push(BYTES_CODE);
                escape_into(bytes, out);
                out.push(0x00);
            }
            Element::String(s) => {
                out.push(STRING_CODE);
                escape_into(s.as_bytes(), out);
                out.push(0x00);
            }
            Element::Int(v) => {
                out.push(INT_CODE);
                let mut buf = [0u8; 8];
                BigEndian::write_u64(&mut buf, (*v as u64) ^ SIGN_BIT);
                out.extend_from_slice(&buf);
            }
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Bytes(bytes) => write!(f, "b{bytes:02x?}"),
            Element::String(s) => write!(f, "{s:?}"),
            Element::Int(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Element {
    fn from(value: &str) -> Self {
        Element::String(value.to_string())
    }
}

impl From<String> for Element {
    fn from(value: String) -> Self {
        Element::String(value)
    }
}

impl From<&String> for Element {
    fn from(value: &String) -> Self {
        Element::String(value.clone())
    }
}

impl From<i64> for Element {
    fn from(value: i64) -> Self {
        Element::Int(value)
    }
}

impl From<Vec<u8>> for Element {
    fn from(value: Vec<u8>) -> Self {
        Element::Bytes(value)
    }
}

fn escape_into(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        out.push(b);
        if b == 0x00 {
            out.push(ESCAPE);
        }
    }
}

/// Pack a tuple into its order-preserving byte representation.
pub fn pack(elements: &[Element]) -> Vec<u8> {
    let mut out = Vec::with_capacity(elements.len() * 9);
    for element in elements {
        element.encode_into(&mut out);
    }
    out
}

/// Encode a string element without its terminator.
///
/// Every packed string that starts with `s` starts with these bytes, so a
/// range built from them covers all such strings.
pub fn string_prefix(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 1);
    out.push(STRING_CODE);
    escape_into(s.as_bytes(), &mut out);
    out
}

/// Decode a packed tuple.
pub fn unpack(bytes: &[u8]) -> Result<Vec<Element>> {
    let mut elements = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let code = bytes[pos];
        pos += 1;
        match code {
            BYTES_CODE | STRING_CODE => {
                let (raw, next) = read_escaped(bytes, pos)?;
                pos = next;
                if code == BYTES_CODE {
                    elements.push(Element::Bytes(raw));
                } else {
                    let s = String::from_utf8(raw)
                        .map_err(|e| KvgramError::decode(format!("invalid UTF-8 string: {e}")))?;
                    elements.push(Element::String(s));
                }
            }
            INT_CODE => {
                let end = pos + 8;
                if end > bytes.len() {
                    return Err(KvgramError::decode(format!(
                        "truncated integer at offset {}",
                        pos - 1
                    )));
                }
                let raw = BigEndian::read_u64(&bytes[pos..end]) ^ SIGN_BIT;
                elements.push(Element::Int(raw as i64));
                pos = end;
            }
            other => {
                return Err(KvgramError::decode(format!(
                    "unknown type code 0x{other:02x} at offset {}",
                    pos - 1
                )));
            }
        }
    }

    Ok(elements)
}

fn read_escaped(bytes: &[u8], mut pos: usize) -> Result<(Vec<u8>, usize)> {
    let mut raw = Vec::new();
    loop {
        match bytes.get(pos) {
            None => return Err(KvgramError::decode("unterminated string element")),
            Some(0x00) => {
                if bytes.get(pos + 1) == Some(&ESCAPE) {
                    raw.push(0x00);
                    pos += 2;
                } else {
                    return Ok((raw, pos + 1));
                }
            }
            Some(&b) => {
                raw.push(b);
                pos += 1;
            }
        }
    }
}

/// Return the first key that sorts after every key starting with `prefix`.
///
/// Trailing `0xFF` bytes are dropped and the last remaining byte is
/// incremented.
pub fn strinc(prefix: &[u8]) -> Result<Vec<u8>> {
    let trimmed_len = prefix
        .iter()
        .rposition(|&b| b != 0xFF)
        .map(|idx| idx + 1)
        .ok_or_else(|| KvgramError::invalid_argument("key must contain a byte other than 0xFF"))?;

    let mut out = prefix[..trimmed_len].to_vec();
    if let Some(last) = out.last_mut() {
        *last += 1;
    }
    Ok(out)
}

/// A key prefix under which related tuples are stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Subspace {
    prefix: Vec<u8>,
}

impl Subspace {
    /// Create a subspace from a raw byte prefix.
    pub fn from_bytes(prefix: impl Into<Vec<u8>>) -> Self {
        Subspace {
            prefix: prefix.into(),
        }
    }

    /// Create a subspace whose prefix is a packed tuple.
    pub fn from_tuple(elements: &[Element]) -> Self {
        Subspace {
            prefix: pack(elements),
        }
    }

    /// The raw prefix bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.prefix
    }

    /// Nested subspace with `elements` appended to the prefix.
    pub fn sub(&self, elements: &[Element]) -> Subspace {
        Subspace {
            prefix: self.pack(elements),
        }
    }

    /// Pack `elements` under this prefix.
    pub fn pack(&self, elements: &[Element]) -> Vec<u8> {
        let mut key = self.prefix.clone();
        for element in elements {
            element.encode_into(&mut key);
        }
        key
    }

    /// Append raw bytes to the prefix without any encoding.
    pub fn raw_key(&self, suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.prefix.len() + suffix.len());
        key.extend_from_slice(&self.prefix);
        key.extend_from_slice(suffix);
        key
    }

    /// Decode the tuple stored after this prefix.
    pub fn unpack(&self, key: &[u8]) -> Result<Vec<Element>> {
        if !self.contains(key) {
            return Err(KvgramError::decode(format!(
                "key {key:02x?} is outside subspace {:02x?}",
                self.prefix
            )));
        }
        unpack(&key[self.prefix.len()..])
    }

    /// Whether `key` starts with this prefix.
    pub fn contains(&self, key: &[u8]) -> bool {
        key.starts_with(&self.prefix)
    }

    /// Range covering every packed tuple stored under this prefix.
    pub fn range(&self) -> KeyRange {
        KeyRange::new(self.raw_key(&[0x00]), self.raw_key(&[0xFF]))
    }
}
