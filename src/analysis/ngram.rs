//! Character n-gram tokenization for indexing and querying.

/// Default n-gram length.
pub const GRAM_SIZE: usize = 3;

/// An n-gram and the rune offset where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gram {
    pub text: String,
    pub position: usize,
}

impl Gram {
    fn from_runes(runes: &[char], position: usize, len: usize) -> Self {
        Gram {
            text: runes[position..position + len].iter().collect(),
            position,
        }
    }
}

/// A tokenizer that cuts lowercased text into character n-grams.
///
/// Indexing emits one gram per rune offset; grams near the end of the text
/// are shortened so the tail stays searchable. Queries are split into
/// full-length windows that together cover the whole query.
///
/// # Examples
///
/// ```
/// use kvgram::analysis::ngram::NgramTokenizer;
///
/// let tokenizer = NgramTokenizer::trigram();
///
/// let grams: Vec<_> = tokenizer
///     .index_grams("Hello")
///     .into_iter()
///     .map(|g| g.text)
///     .collect();
/// assert_eq!(grams, vec!["hel", "ell", "llo", "lo", "o"]);
///
/// let windows: Vec<_> = tokenizer
///     .query_windows("hello")
///     .into_iter()
///     .map(|g| (g.position, g.text))
///     .collect();
/// assert_eq!(windows, vec![(0, "hel".to_string()), (2, "llo".to_string())]);
/// ```
#[derive(Clone, Debug)]
pub struct NgramTokenizer {
    gram_size: usize,
}

impl Default for NgramTokenizer {
    fn default() -> Self {
        Self::trigram()
    }
}

impl NgramTokenizer {
    /// Create a trigram tokenizer (n=3).
    pub fn trigram() -> Self {
        NgramTokenizer {
            gram_size: GRAM_SIZE,
        }
    }

    /// Lowercase `text` and split it into runes.
    pub fn normalize(text: &str) -> Vec<char> {
        text.to_lowercase().chars().collect()
    }

    /// Grams written for a document: one per rune offset, each
    /// `min(gram_size, remaining)` runes long.
    pub fn index_grams(&self, text: &str) -> Vec<Gram> {
        let runes = Self::normalize(text);
        (0..runes.len())
            .map(|position| {
                let len = self.gram_size.min(runes.len() - position);
                Gram::from_runes(&runes, position, len)
            })
            .collect()
    }

    /// Windows checked for a query, in match order.
    ///
    /// A query no longer than one gram is a single window. Longer queries are
    /// covered by consecutive full grams; when the last one stops short of
    /// the end, one more window is placed flush with the end, overlapping its
    /// predecessor. Empty queries produce no windows.
    pub fn query_windows(&self, query: &str) -> Vec<Gram> {
        let runes = Self::normalize(query);
        let n = self.gram_size;
        if runes.len() <= n {
            if runes.is_empty() {
                return Vec::new();
            }
            return vec![Gram::from_runes(&runes, 0, runes.len())];
        }

        let mut windows = Vec::with_capacity(runes.len().div_ceil(n));
        let mut position = 0;
        while position + n <= runes.len() {
            windows.push(Gram::from_runes(&runes, position, n));
            position += n;
        }
        if position < runes.len() {
            windows.push(Gram::from_runes(&runes, runes.len() - n, n));
        }
        windows
    }
}
