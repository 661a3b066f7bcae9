//! Echocave Core - fingerprinting primitives for the echo cave archive
//!
//! This crate provides the pure, synchronous building blocks of the
//! duplicate-detection pipeline:
//!
//! - Container sanitization that trims trailing transport garbage so
//!   byte-identical images hash identically
//! - 64-bit perceptual hashing (pHash over a 32×32 DCT)
//! - 64-bit Simhash fingerprinting of text (character-granular)
//! - Hamming distance and derived similarity percentages
//! - Locality-sensitive candidate-pair generation over bucket keys
//! - Union-find clustering of confirmed similar pairs
//!
//! # Example
//!
//! ```
//! use echocave_core::{simhash, similarity};
//!
//! let a = simhash("The quick brown fox");
//! let b = simhash("the quick  brown fox");
//! // Case and whitespace never affect the fingerprint.
//! assert_eq!(a, b);
//! assert_eq!(similarity(&a, &b), 100.0);
//! ```

pub mod cluster;
pub mod error;
pub mod lsh;
pub mod metric;
pub mod phash;
pub mod sanitize;
pub mod simhash;

pub use cluster::UnionFind;
pub use error::{CoreError, Result};
pub use lsh::{band_keys, candidate_pairs, BAND_BITS, BAND_COUNT};
pub use metric::{hamming, similarity};
pub use phash::{phash, phash_image};
pub use sanitize::sanitize;
pub use simhash::simhash;
