//! Echocave Pipeline - ingest and moderation engine for the echo cave
//! archive
//!
//! A submission entering the archive passes through a two-stage gate:
//!
//! 1. **Similarity** - its text Simhash and image pHashes are compared
//!    against every persisted fingerprint; anything within threshold is
//!    rejected citing the prior entry.
//! 2. **AI** - an LLM rates and categorizes the submission, then
//!    confirms semantic duplication against keyword-similar entries.
//!
//! Surviving submissions have their media, meta and fingerprints
//! committed and land in `active` or `pending` (manual review). Any
//! failure tombstones the row before a fingerprint referencing it can
//! leak. The chat surface, blob store and database are external; the
//! pipeline sees them only through the traits in [`store`], [`fetch`]
//! and [`llm`].

pub mod ai;
pub mod config;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod llm;
pub mod memory;
pub mod model;
pub mod report;
pub mod similarity;
pub mod store;

pub use ai::AiModerator;
pub use config::{AiReviewFailPolicy, CaveConfig, DEFAULT_SYSTEM_PROMPT};
pub use error::{CaveError, Result};
pub use fetch::{HttpFetcher, MediaFetcher, MemoryFetcher};
pub use ingest::{IncomingMedia, IngestOutcome, IngestPipeline, PipelineDeps};
pub use llm::{ChatMessage, ChatModel, ContentPart, Endpoint, OpenAiChat};
pub use model::{
    Decision, Element, HashKind, HashRecord, MetaRecord, RejectReason, Submission,
    SubmissionStatus,
};
pub use report::{
    audit_media, check_report, fix_media_names, rebuild_hashes, refresh_meta, render_check,
    render_compare, FixSummary, MediaAudit, RebuildSummary, RefreshSummary,
};
pub use similarity::SimilarityModerator;
pub use store::{BlobStore, HashStore, IdPool, MetaStore, ReviewSink, SubmissionStore};
