//! Data model of the echo cave archive.
//!
//! Submissions move through a small lifecycle: `preload` while the
//! ingest pipeline owns them, then `active`, `pending` (awaiting manual
//! review) or `delete` (tombstoned, id recycled). Hash and meta records
//! are committed only for submissions that survive the gates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message element of a submission, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Element {
    /// Plain text payload.
    Text { content: String },
    /// Stored media file referenced by name.
    Media { file: String },
}

/// Lifecycle status of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    /// Row inserted, media and hashes not yet committed. Owned by the
    /// ingest pipeline; must end as active/pending or delete.
    Preload,
    /// Visible to readers.
    Active,
    /// Awaiting manual review.
    Pending,
    /// Tombstoned; the id returns to the reusable pool.
    Delete,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preload => "preload",
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Delete => "delete",
        }
    }
}

/// A cave entry in any lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: u32,
    pub elements: Vec<Element>,
    pub channel_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub status: SubmissionStatus,
}

impl Submission {
    /// All text payloads joined by single spaces, for fingerprinting.
    pub fn joined_text(&self) -> String {
        let parts: Vec<&str> = self
            .elements
            .iter()
            .filter_map(|element| match element {
                Element::Text { content } => Some(content.as_str()),
                Element::Media { .. } => None,
            })
            .collect();
        parts.join(" ")
    }

    /// File names of all media elements, in order.
    pub fn media_files(&self) -> Vec<&str> {
        self.elements
            .iter()
            .filter_map(|element| match element {
                Element::Media { file } => Some(file.as_str()),
                Element::Text { .. } => None,
            })
            .collect()
    }
}

/// What a persisted hash fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    Text,
    Image,
}

impl HashKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

/// Persisted fingerprint row. Primary key is the full triple; one
/// submission owns at most one text hash but any number of image hashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashRecord {
    pub cave_id: u32,
    pub hash: String,
    pub kind: HashKind,
}

/// AI analysis of a submission. Primary key is `cave_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub cave_id: u32,
    /// Quality rating in `0..=100`.
    pub rating: u8,
    /// Short content category, e.g. "ACG".
    pub kind: String,
    pub keywords: Vec<String>,
}

/// Verdict of a moderation gate. Gates never fail for content reasons;
/// they return one of these and the orchestrator dispatches by case.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Gate passed; the records it would persist are handed to the
    /// orchestrator, which commits them only if the submission survives.
    Pass { hashes: Vec<HashRecord> },
    /// Gate rejected the submission.
    Reject(RejectReason),
    /// Nothing for this gate to judge.
    Skip,
}

/// Why a gate rejected a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// A persisted fingerprint crossed the similarity threshold.
    Similar {
        prior_id: u32,
        kind: HashKind,
        similarity: f64,
    },
    /// The LLM confirmed semantic duplication against prior entries.
    SemanticDuplicate { prior_ids: Vec<u32> },
    /// AI rating below the auto-approve threshold with a reject policy.
    LowRating { rating: u8 },
}
