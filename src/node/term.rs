//! RDF terms and their byte encoding.
//!
//! # Encoding
//! ```text
//! IRI:             0x01 | len u32 | utf8
//! blank node:      0x02 | len u32 | utf8
//! plain literal:   0x03 | len u32 | lexical
//! lang literal:    0x04 | len u32 | lexical | len u32 | tag
//! typed literal:   0x05 | len u32 | lexical | len u32 | datatype IRI
//! ```
//! Lengths are little-endian. The encoding is canonical, so equal terms
//! have equal bytes and equal hashes.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::common::{Error, Result};

const TAG_IRI: u8 = 0x01;
const TAG_BLANK: u8 = 0x02;
const TAG_PLAIN: u8 = 0x03;
const TAG_LANG: u8 = 0x04;
const TAG_TYPED: u8 = 0x05;

/// Datatype IRIs with special handling.
pub mod xsd {
    pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    pub const DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
    pub const DATE: &str = "http://www.w3.org/2001/XMLSchema#date";
    pub const BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
}

/// An RDF term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Iri(String),
    Blank(String),
    Literal(Literal),
}

/// An RDF literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Plain(String),
    Lang { lexical: String, lang: String },
    Typed { lexical: String, datatype: String },
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::Blank(label.into())
    }

    pub fn literal(lexical: impl Into<String>) -> Self {
        Term::Literal(Literal::Plain(lexical.into()))
    }

    pub fn lang_literal(lexical: impl Into<String>, lang: impl Into<String>) -> Self {
        Term::Literal(Literal::Lang {
            lexical: lexical.into(),
            lang: lang.into(),
        })
    }

    pub fn typed_literal(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal(Literal::Typed {
            lexical: lexical.into(),
            datatype: datatype.into(),
        })
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Term::Blank(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal(_))
    }

    /// Serialize for the node log.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        match self {
            Term::Iri(iri) => {
                buf.put_u8(TAG_IRI);
                put_str(&mut buf, iri);
            }
            Term::Blank(label) => {
                buf.put_u8(TAG_BLANK);
                put_str(&mut buf, label);
            }
            Term::Literal(Literal::Plain(lexical)) => {
                buf.put_u8(TAG_PLAIN);
                put_str(&mut buf, lexical);
            }
            Term::Literal(Literal::Lang { lexical, lang }) => {
                buf.put_u8(TAG_LANG);
                put_str(&mut buf, lexical);
                put_str(&mut buf, lang);
            }
            Term::Literal(Literal::Typed { lexical, datatype }) => {
                buf.put_u8(TAG_TYPED);
                put_str(&mut buf, lexical);
                put_str(&mut buf, datatype);
            }
        }
        buf
    }

    /// Parse bytes written by [`Term::encode`].
    ///
    /// # Errors
    /// `Error::CorruptBlock` (component "nodes") for anything else.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut data = bytes;
        if !data.has_remaining() {
            return Err(bad("empty term"));
        }
        let term = match data.get_u8() {
            TAG_IRI => Term::Iri(get_str(&mut data)?),
            TAG_BLANK => Term::Blank(get_str(&mut data)?),
            TAG_PLAIN => Term::Literal(Literal::Plain(get_str(&mut data)?)),
            TAG_LANG => Term::Literal(Literal::Lang {
                lexical: get_str(&mut data)?,
                lang: get_str(&mut data)?,
            }),
            TAG_TYPED => Term::Literal(Literal::Typed {
                lexical: get_str(&mut data)?,
                datatype: get_str(&mut data)?,
            }),
            tag => return Err(bad(format!("unknown term tag {:#04x}", tag))),
        };
        if data.has_remaining() {
            return Err(bad("trailing bytes after term"));
        }
        Ok(term)
    }

    /// 128-bit BLAKE3 digest of the encoding; the key of the node index.
    pub fn hash(&self) -> [u8; 16] {
        let digest = blake3::hash(&self.encode());
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest.as_bytes()[..16]);
        out
    }

    fn encoded_len(&self) -> usize {
        match self {
            Term::Iri(s) | Term::Blank(s) | Term::Literal(Literal::Plain(s)) => 5 + s.len(),
            Term::Literal(Literal::Lang { lexical, lang: other })
            | Term::Literal(Literal::Typed {
                lexical,
                datatype: other,
            }) => 9 + lexical.len() + other.len(),
        }
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_str(data: &mut &[u8]) -> Result<String> {
    if data.remaining() < 4 {
        return Err(bad("truncated length"));
    }
    let len = data.get_u32_le() as usize;
    if data.remaining() < len {
        return Err(bad("truncated string"));
    }
    let s = std::str::from_utf8(&data[..len])
        .map_err(|e| bad(format!("invalid utf-8: {}", e)))?
        .to_string();
    data.advance(len);
    Ok(s)
}

fn bad(reason: impl Into<String>) -> Error {
    Error::corrupt("nodes", 0, reason)
}

impl fmt::Display for Term {
    /// N-Triples style.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{}>", iri),
            Term::Blank(label) => write!(f, "_:{}", label),
            Term::Literal(Literal::Plain(lexical)) => write!(f, "{:?}", lexical),
            Term::Literal(Literal::Lang { lexical, lang }) => write!(f, "{:?}@{}", lexical, lang),
            Term::Literal(Literal::Typed { lexical, datatype }) => {
                write!(f, "{:?}^^<{}>", lexical, datatype)
            }
        }
    }
}
