//! Ingest orchestration: the submission state machine.
//!
//! A submission arrives as a `preload` row the caller already inserted.
//! The pipeline downloads and deduplicates its media, runs the
//! similarity and AI gates, persists media, meta and hashes in that
//! order, and decides the final status. Any failure tombstones the row
//! before any fingerprint referencing it is left behind.

use std::collections::HashMap;
use std::sync::Arc;

use echocave_core::{phash, sanitize};
use tracing::{debug, error, info, warn};

use crate::ai::AiModerator;
use crate::config::{AiReviewFailPolicy, CaveConfig};
use crate::error::Result;
use crate::fetch::MediaFetcher;
use crate::model::{
    Decision, Element, HashKind, HashRecord, MetaRecord, RejectReason, Submission,
    SubmissionStatus,
};
use crate::similarity::{is_image_file, SimilarityModerator};
use crate::store::{BlobStore, HashStore, IdPool, MetaStore, ReviewSink, SubmissionStore};

/// A media attachment to download: the stored file name it will live
/// under and the descriptor (URL) to fetch it from.
#[derive(Debug, Clone)]
pub struct IncomingMedia {
    pub file: String,
    pub url: String,
}

/// What the caller shows the user after an ingest attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The submission survived; `status` is `active` or `pending`.
    Added {
        id: u32,
        status: SubmissionStatus,
        message: String,
    },
    /// A gate turned the submission away.
    Rejected {
        reason: RejectReason,
        message: String,
    },
    /// Something external broke; the row was tombstoned.
    Failed { message: String },
}

/// External collaborators of the pipeline.
pub struct PipelineDeps {
    pub blobs: Arc<dyn BlobStore>,
    pub hashes: Arc<dyn HashStore>,
    pub metas: Arc<dyn MetaStore>,
    pub submissions: Arc<dyn SubmissionStore>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub review: Arc<dyn ReviewSink>,
    pub chat: Option<Arc<dyn crate::llm::ChatModel>>,
    pub ids: Arc<IdPool>,
}

pub struct IngestPipeline {
    config: CaveConfig,
    deps: PipelineDeps,
    similarity: SimilarityModerator,
    ai: Option<AiModerator>,
}

impl IngestPipeline {
    pub fn new(config: CaveConfig, deps: PipelineDeps) -> Self {
        let similarity = SimilarityModerator::new(
            deps.hashes.clone(),
            config.text_threshold,
            config.image_threshold,
        );
        let ai = match (&deps.chat, config.enable_ai) {
            (Some(chat), true) => Some(AiModerator::new(
                chat.clone(),
                deps.metas.clone(),
                deps.submissions.clone(),
                config.system_prompt.clone(),
            )),
            _ => None,
        };
        Self {
            config,
            deps,
            similarity,
            ai,
        }
    }

    /// Run a `preload` submission through the whole pipeline.
    ///
    /// Never returns an error: every failure path tombstones the row and
    /// surfaces as [`IngestOutcome::Failed`].
    pub async fn ingest(
        &self,
        submission: Submission,
        media: Vec<IncomingMedia>,
    ) -> IngestOutcome {
        let id = submission.id;
        match self.run(submission, media).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(cave_id = id, error = %err, "ingest failed, rolling back");
                self.tombstone(id).await;
                IngestOutcome::Failed {
                    message: format!("处理失败: {err}"),
                }
            }
        }
    }

    async fn run(
        &self,
        mut submission: Submission,
        media: Vec<IncomingMedia>,
    ) -> Result<IngestOutcome> {
        if submission.joined_text().trim().is_empty() && media.is_empty() {
            self.tombstone(submission.id).await;
            return Ok(IngestOutcome::Failed {
                message: "没有可添加的内容".to_string(),
            });
        }

        // 1. Download, sanitize and deduplicate attachments by pHash.
        let mut buffers: HashMap<String, Vec<u8>> = HashMap::new();
        let mut canonical_by_hash: HashMap<String, String> = HashMap::new();
        let mut renames: HashMap<String, String> = HashMap::new();
        for item in &media {
            let raw = self.deps.fetcher.fetch(&item.url).await?;
            let bytes = if is_image_file(&item.file) {
                sanitize(&raw).to_vec()
            } else {
                raw
            };
            match phash(&bytes) {
                Ok(hash) => {
                    if let Some(existing) = canonical_by_hash.get(&hash) {
                        debug!(
                            file = %item.file,
                            canonical = %existing,
                            "duplicate attachment collapsed"
                        );
                        renames.insert(item.file.clone(), existing.clone());
                        continue;
                    }
                    canonical_by_hash.insert(hash, item.file.clone());
                }
                Err(err) => {
                    warn!(file = %item.file, error = %err, "media not hashable, stored as-is");
                }
            }
            buffers.insert(item.file.clone(), bytes);
        }
        if !renames.is_empty() {
            for element in &mut submission.elements {
                if let Element::Media { file } = element {
                    if let Some(target) = renames.get(file) {
                        *file = target.clone();
                    }
                }
            }
        }

        // 2. Similarity gate.
        let mut held_hashes: Vec<HashRecord> = Vec::new();
        if self.config.enable_similarity {
            match self.similarity.check(&submission, &buffers).await? {
                Decision::Reject(reason) => return Ok(self.reject(submission.id, reason).await),
                Decision::Pass { hashes } => held_hashes = hashes,
                Decision::Skip => {}
            }
        }

        // 3. AI gate.
        let mut held_meta: Option<MetaRecord> = None;
        if let Some(ai) = &self.ai {
            if let Some(meta) = ai.analyze(&submission, &buffers).await? {
                let duplicates = ai.check_duplicates(&meta, &submission).await?;
                if !duplicates.is_empty() {
                    return Ok(self
                        .reject(
                            submission.id,
                            RejectReason::SemanticDuplicate {
                                prior_ids: duplicates,
                            },
                        )
                        .await);
                }
                held_meta = Some(meta);
            }
        }

        // A below-threshold rating with a reject policy fires before any
        // row is committed; once hashes and meta land, nothing rejects.
        if let Some(meta) = &held_meta {
            if meta.rating < self.config.auto_approve_threshold
                && self.config.on_ai_review_fail == AiReviewFailPolicy::Reject
            {
                return Ok(self
                    .reject(submission.id, RejectReason::LowRating { rating: meta.rating })
                    .await);
            }
        }

        // 4. Persist canonical media.
        for item in &media {
            if let Some(bytes) = buffers.get(&item.file) {
                self.deps.blobs.save(&item.file, bytes).await?;
            }
        }

        // 5. Persist meta and held hashes.
        if let Some(meta) = &held_meta {
            self.deps.metas.upsert(meta).await?;
        }
        if !held_hashes.is_empty() {
            self.deps.hashes.upsert(&held_hashes).await?;
        }

        // 6. Final status and commit of the (possibly rewritten) row.
        let status = self.decide_status(held_meta.as_ref().map(|m| m.rating));
        submission.status = status;
        self.deps.submissions.upsert(&submission).await?;
        info!(cave_id = submission.id, status = status.as_str(), "submission committed");

        // 7. Manual review handoff.
        if status == SubmissionStatus::Pending {
            self.deps.review.dispatch(&submission).await?;
        }

        let message = match status {
            SubmissionStatus::Pending => format!("回声洞 ({}) 已提交审核", submission.id),
            _ => format!("回声洞 ({}) 添加成功", submission.id),
        };
        Ok(IngestOutcome::Added {
            id: submission.id,
            status,
            message,
        })
    }

    /// Status for a submission that passed every gate.
    fn decide_status(&self, rating: Option<u8>) -> SubmissionStatus {
        if !self.config.enable_pend {
            return SubmissionStatus::Active;
        }
        if self.config.enable_ai && self.config.enable_auto_approve {
            if let Some(rating) = rating {
                if rating >= self.config.auto_approve_threshold {
                    return SubmissionStatus::Active;
                }
            }
        }
        SubmissionStatus::Pending
    }

    async fn reject(&self, id: u32, reason: RejectReason) -> IngestOutcome {
        self.tombstone(id).await;
        let message = reject_message(&reason);
        info!(cave_id = id, message = %message, "submission rejected");
        IngestOutcome::Rejected { reason, message }
    }

    /// Force the row to `delete`, clear any fingerprint/meta rows that
    /// may reference it, and harvest tombstoned ids. Best-effort: this
    /// runs on failure paths and must not fail them further.
    async fn tombstone(&self, id: u32) {
        match self.deps.submissions.get(id).await {
            Ok(Some(mut row)) => {
                row.status = SubmissionStatus::Delete;
                if let Err(err) = self.deps.submissions.upsert(&row).await {
                    error!(cave_id = id, error = %err, "failed to tombstone submission");
                }
            }
            Ok(None) => {}
            Err(err) => error!(cave_id = id, error = %err, "failed to load row for tombstone"),
        }
        if let Err(err) = self.deps.hashes.remove_for(id).await {
            warn!(cave_id = id, error = %err, "failed to clear hash rows");
        }
        if let Err(err) = self.deps.metas.remove(id).await {
            warn!(cave_id = id, error = %err, "failed to clear meta row");
        }
        match self.deps.ids.sweep(self.deps.submissions.as_ref()).await {
            Ok(harvested) if harvested > 0 => {
                debug!(harvested, "recycled tombstoned ids");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "id sweep failed"),
        }
    }
}

/// User-facing rejection text.
pub fn reject_message(reason: &RejectReason) -> String {
    match reason {
        RejectReason::Similar {
            prior_id,
            kind,
            similarity,
        } => {
            let label = match kind {
                HashKind::Text => "文本",
                HashKind::Image => "图片",
            };
            format!(
                "与回声洞 ({prior_id}) 的{label}相似度为 {similarity:.2}%，已拒绝添加"
            )
        }
        RejectReason::SemanticDuplicate { prior_ids } => {
            let ids: Vec<String> = prior_ids.iter().map(|id| id.to_string()).collect();
            format!("与回声洞 ({}) 语义重复，已拒绝添加", ids.join("、"))
        }
        RejectReason::LowRating { rating } => {
            format!("AI 审核未通过，评分 {rating}，已拒绝添加")
        }
    }
}
