//! Text analysis for kvgram.
//!
//! Documents and queries go through the same normalization (Unicode
//! lowercasing, split into `char`s) before being cut into n-grams, so rune
//! offsets computed on either side line up.

pub mod ngram;
