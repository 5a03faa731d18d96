//! Key builders and decoders for postings and reverse entries.

use crate::error::{KvgramError, Result};
use crate::storage::KeyRange;
use crate::tuple::{self, Element, Subspace};

/// Tag of the posting subspace.
pub const POSTING_TAG: &str = "R";
/// Tag of the reverse-entry subspace.
pub const REVERSE_TAG: &str = "I";
/// Value stored under every posting and reverse entry.
pub const MARKER: &[u8] = b"\x01";

/// One decoded posting key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub ngram: String,
    pub order: i64,
    pub doc_id: String,
    pub position: usize,
}

/// Keys of one context: its posting and reverse-entry subspaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextKeys {
    postings: Subspace,
    reverse: Subspace,
}

impl ContextKeys {
    /// Keys for `context` inside the namespace subspace.
    pub fn new(namespace: &Subspace, context: &str) -> Self {
        let context = namespace.sub(&[context.into()]);
        ContextKeys {
            postings: context.sub(&[POSTING_TAG.into()]),
            reverse: context.sub(&[REVERSE_TAG.into()]),
        }
    }

    pub fn posting(&self, ngram: &str, order: i64, doc_id: &str, position: usize) -> Vec<u8> {
        self.postings.pack(&[
            ngram.into(),
            order.into(),
            doc_id.into(),
            Element::Int(position as i64),
        ])
    }

    /// Every posting whose ngram starts with `ngram_prefix`.
    pub fn posting_prefix_range(&self, ngram_prefix: &str) -> Result<KeyRange> {
        let begin = self.postings.raw_key(&tuple::string_prefix(ngram_prefix));
        let end = tuple::strinc(&begin)?;
        Ok(KeyRange::new(begin, end))
    }

    /// Every position of `ngram` in one document generation.
    pub fn posting_doc_range(&self, ngram: &str, order: i64, doc_id: &str) -> KeyRange {
        self.postings
            .sub(&[ngram.into(), order.into(), doc_id.into()])
            .range()
    }

    pub fn reverse(&self, doc_id: &str, order: i64, ngram: &str) -> Vec<u8> {
        self.reverse
            .pack(&[doc_id.into(), order.into(), ngram.into()])
    }

    /// Every reverse entry of `doc_id`, across all orders.
    pub fn reverse_doc_range(&self, doc_id: &str) -> KeyRange {
        self.reverse.sub(&[doc_id.into()]).range()
    }

    pub fn decode_posting(&self, key: &[u8]) -> Result<Posting> {
        match self.postings.unpack(key)?.as_slice() {
            [
                Element::String(ngram),
                Element::Int(order),
                Element::String(doc_id),
                Element::Int(position),
            ] => {
                let position = usize::try_from(*position).map_err(|_| {
                    KvgramError::decode(format!("negative posting position {position}"))
                })?;
                Ok(Posting {
                    ngram: ngram.clone(),
                    order: *order,
                    doc_id: doc_id.clone(),
                    position,
                })
            }
            other => Err(unexpected_shape("posting", other)),
        }
    }

    /// Decode a reverse entry of `doc_id` into `(order, ngram)`.
    pub fn decode_reverse(&self, doc_id: &str, key: &[u8]) -> Result<(i64, String)> {
        match self.reverse.unpack(key)?.as_slice() {
            [Element::String(id), Element::Int(order), Element::String(ngram)] if id == doc_id => {
                Ok((*order, ngram.clone()))
            }
            other => Err(unexpected_shape("reverse entry", other)),
        }
    }
}

fn unexpected_shape(kind: &str, elements: &[Element]) -> KvgramError {
    let rendered: Vec<String> = elements.iter().map(ToString::to_string).collect();
    KvgramError::decode(format!("unexpected {kind} tuple ({})", rendered.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> ContextKeys {
        ContextKeys::new(&Subspace::from_tuple(&["ns".into()]), "user_1")
    }

    #[test]
    fn test_posting_roundtrip() {
        let keys = keys();
        let key = keys.posting("tex", 3, "doc", 12);
        let posting = keys.decode_posting(&key).unwrap();
        assert_eq!(
            posting,
            Posting {
                ngram: "tex".into(),
                order: 3,
                doc_id: "doc".into(),
                position: 12,
            }
        );
    }

    #[test]
    fn test_postings_sort_by_order_within_ngram() {
        let keys = keys();
        let old = keys.posting("tex", 1, "z", 0);
        let new = keys.posting("tex", 2, "a", 0);
        assert!(old < new);

        let range = keys.posting_prefix_range("tex").unwrap();
        assert!(range.contains(&old) && range.contains(&new));
        assert!(!range.contains(&keys.posting("tey", 0, "a", 0)));
    }

    #[test]
    fn test_short_prefix_covers_longer_ngrams() {
        let keys = keys();
        let range = keys.posting_prefix_range("te").unwrap();
        assert!(range.contains(&keys.posting("te", 0, "a", 0)));
        assert!(range.contains(&keys.posting("tex", 0, "a", 0)));
        assert!(!range.contains(&keys.posting("t", 0, "a", 0)));
    }

    #[test]
    fn test_doc_ranges_do_not_leak_into_similar_ids() {
        let keys = keys();
        let range = keys.reverse_doc_range("doc1");
        assert!(range.contains(&keys.reverse("doc1", 0, "abc")));
        assert!(!range.contains(&keys.reverse("doc10", 0, "abc")));

        let postings = keys.posting_doc_range("abc", 5, "doc1");
        assert!(postings.contains(&keys.posting("abc", 5, "doc1", 7)));
        assert!(!postings.contains(&keys.posting("abc", 4, "doc1", 7)));
        assert!(!postings.contains(&keys.posting("abc", 5, "doc10", 7)));
    }

    #[test]
    fn test_contexts_are_disjoint() {
        let ns = Subspace::from_tuple(&["ns".into()]);
        let a = ContextKeys::new(&ns, "a");
        let b = ContextKeys::new(&ns, "b");
        let range = a.posting_prefix_range("x").unwrap();
        assert!(!range.contains(&b.posting("xyz", 0, "1", 0)));
    }

    #[test]
    fn test_decode_reverse() {
        let keys = keys();
        let key = keys.reverse("doc", -4, "ab");
        assert_eq!(keys.decode_reverse("doc", &key).unwrap(), (-4, "ab".to_string()));
        assert!(matches!(
            keys.decode_reverse("other", &key),
            Err(KvgramError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let keys = keys();
        let reverse_key = keys.reverse("doc", 0, "abc");
        assert!(matches!(
            keys.decode_posting(&reverse_key),
            Err(KvgramError::Decode(_))
        ));

        let bad = keys.postings.pack(&["abc".into(), 0i64.into()]);
        assert!(matches!(keys.decode_posting(&bad), Err(KvgramError::Decode(_))));
    }
}
