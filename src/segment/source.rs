//! Read-side collaborator interfaces of source segments.
//!
//! Each trait covers one field group. Implementations are shared by all
//! merge tasks at once, so they must be `Send + Sync` and side-effect free.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::segment::{DocId, SegmentId};

/// A single attribute (column) value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    /// Numeric view used by range-based policies. Text has none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::UInt(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Text(_) => None,
        }
    }

    /// Integer view, truncating floats.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::UInt(v) => i64::try_from(*v).ok(),
            AttributeValue::Float(v) => Some(*v as i64),
            AttributeValue::Text(_) => None,
        }
    }

    /// Total order across values: numbers compare numerically (NaN last),
    /// and any number sorts before any text.
    pub fn total_cmp(&self, other: &AttributeValue) -> Ordering {
        match (self, other) {
            (AttributeValue::Int(a), AttributeValue::Int(b)) => a.cmp(b),
            (AttributeValue::UInt(a), AttributeValue::UInt(b)) => a.cmp(b),
            (AttributeValue::Text(a), AttributeValue::Text(b)) => a.cmp(b),
            (AttributeValue::Text(_), _) => Ordering::Greater,
            (_, AttributeValue::Text(_)) => Ordering::Less,
            (a, b) => {
                let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                a.total_cmp(&b)
            }
        }
    }

    /// Tag byte used by the binary attribute file format. Zero means null.
    pub fn tag(&self) -> u8 {
        match self {
            AttributeValue::Int(_) => 1,
            AttributeValue::UInt(_) => 2,
            AttributeValue::Float(_) => 3,
            AttributeValue::Text(_) => 4,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Int(v) => write!(f, "{v}"),
            AttributeValue::UInt(v) => write!(f, "{v}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Text(v) => write!(f, "{v}"),
        }
    }
}

/// One entry of a posting list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub term_freq: u32,
}

impl Posting {
    pub fn new(doc_id: DocId, term_freq: u32) -> Self {
        Posting { doc_id, term_freq }
    }
}

/// Reads attribute values of source documents.
pub trait AttributeValueReader: Send + Sync {
    /// Value of `field` for a local document, `None` when the document has none.
    fn read(&self, field: &str, segment_id: SegmentId, doc_id: DocId)
    -> Result<Option<AttributeValue>>;
}

/// Reads inverted-index posting lists of source segments.
pub trait PostingSource: Send + Sync {
    /// Terms of `index` in one segment, in ascending order.
    fn terms(&self, index: &str, segment_id: SegmentId) -> Result<Vec<String>>;

    /// Posting list of a term in one segment, ordered by local doc id.
    fn postings(&self, index: &str, segment_id: SegmentId, term: &str) -> Result<Vec<Posting>>;
}

/// Reads stored (source/summary) documents of source segments.
pub trait DocumentSource: Send + Sync {
    /// Raw stored bytes of a local document, `None` when nothing is stored.
    fn document(&self, segment_id: SegmentId, doc_id: DocId) -> Result<Option<Vec<u8>>>;
}

/// Reads primary keys, used to drop superseded documents.
pub trait PrimaryKeySource: Send + Sync {
    /// Primary key of a local document, `None` when the document has none.
    fn primary_key(&self, segment_id: SegmentId, doc_id: DocId) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_cmp_numeric() {
        let a = AttributeValue::Int(-3);
        let b = AttributeValue::Float(2.5);
        let c = AttributeValue::UInt(7);
        assert_eq!(a.total_cmp(&b), Ordering::Less);
        assert_eq!(c.total_cmp(&b), Ordering::Greater);
        assert_eq!(
            AttributeValue::Int(4).total_cmp(&AttributeValue::UInt(4)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_text_sorts_after_numbers() {
        let text = AttributeValue::Text("a".to_string());
        assert_eq!(text.total_cmp(&AttributeValue::Int(i64::MAX)), Ordering::Greater);
        assert_eq!(
            text.total_cmp(&AttributeValue::Text("b".to_string())),
            Ordering::Less
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(AttributeValue::Float(3.9).as_i64(), Some(3));
        assert_eq!(AttributeValue::UInt(u64::MAX).as_i64(), None);
        assert_eq!(AttributeValue::Text("x".into()).as_f64(), None);
        assert_eq!(AttributeValue::Int(12).to_string(), "12");
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&AttributeValue::Int(5)).unwrap();
        assert_eq!(json, r#"{"type":"int","value":5}"#);
        let back: AttributeValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AttributeValue::Int(5));
    }
}
