//! AI gate: analyzes a submission (rating, category, keywords) and
//! confirms semantic duplication against keyword-similar prior entries.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CaveError, Result};
use crate::llm::{data_url, extract_json, mime_for, ChatMessage, ChatModel, ContentPart};
use crate::model::{Element, MetaRecord, Submission};
use crate::similarity::is_image_file;
use crate::store::{MetaStore, SubmissionStore};

/// Keyword-set overlap at or above which a prior entry becomes a
/// semantic-duplicate candidate.
pub const KEYWORD_JACCARD_THRESHOLD: f64 = 80.0;

/// Fixed prompt for the duplicate-confirmation call; only the analysis
/// prompt is operator-configurable.
const DUPLICATE_CHECK_PROMPT: &str = "你是回声洞查重助手。下面会给出一条新投稿和若干编号的\
已有条目。判断哪些已有条目与新投稿表达的是同一个意思（语义重复）。\
只返回重复条目编号组成的 JSON 数组，例如 [1, 5]；没有重复时返回 []。";

/// Shape the analysis response must parse into.
#[derive(Debug, Deserialize)]
struct Analysis {
    rating: Option<f64>,
    #[serde(rename = "type")]
    kind: Option<String>,
    keywords: Option<Vec<String>>,
}

pub struct AiModerator {
    chat: Arc<dyn ChatModel>,
    metas: Arc<dyn MetaStore>,
    submissions: Arc<dyn SubmissionStore>,
    system_prompt: String,
}

impl AiModerator {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        metas: Arc<dyn MetaStore>,
        submissions: Arc<dyn SubmissionStore>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            chat,
            metas,
            submissions,
            system_prompt: system_prompt.into(),
        }
    }

    /// Ask the model to rate and categorize a submission.
    ///
    /// Returns `None` when there is nothing to analyze or when the model
    /// answered with valid JSON of the wrong shape (a content problem,
    /// not a failure). A response with no extractable JSON at all is a
    /// corrupt-response error.
    pub async fn analyze(
        &self,
        submission: &Submission,
        media: &HashMap<String, Vec<u8>>,
    ) -> Result<Option<MetaRecord>> {
        let parts = build_parts(submission, media);
        if parts.is_empty() {
            return Ok(None);
        }

        let message = ChatMessage::parts("user", parts);
        let raw = self.chat.chat(&[message], Some(&self.system_prompt)).await?;
        let Some(value) = extract_json(&raw) else {
            return Err(CaveError::CorruptResponse);
        };
        let Ok(analysis) = serde_json::from_value::<Analysis>(value) else {
            warn!(cave_id = submission.id, "analysis JSON had an unexpected shape");
            return Ok(None);
        };
        let Some(kind) = analysis.kind else {
            warn!(cave_id = submission.id, "analysis JSON carried no type");
            return Ok(None);
        };

        let rating = analysis.rating.unwrap_or(0.0).clamp(0.0, 100.0).round() as u8;
        let keywords = analysis.keywords.unwrap_or_default();
        debug!(cave_id = submission.id, rating, kind = %kind, "analysis complete");
        Ok(Some(MetaRecord {
            cave_id: submission.id,
            rating,
            kind,
            keywords,
        }))
    }

    /// Confirm semantic duplicates of `meta` among same-kind entries.
    ///
    /// Candidates are selected by keyword-set Jaccard overlap, then the
    /// model judges all of them in a single request. Returns the ids it
    /// named, restricted to the candidate set.
    pub async fn check_duplicates(
        &self,
        meta: &MetaRecord,
        submission: &Submission,
    ) -> Result<Vec<u32>> {
        let own_tokens = keyword_set(meta);
        let mut candidates = Vec::new();
        for peer in self.metas.of_kind(&meta.kind).await? {
            if peer.cave_id == meta.cave_id {
                continue;
            }
            let overlap = jaccard(&own_tokens, &keyword_set(&peer));
            if overlap >= KEYWORD_JACCARD_THRESHOLD {
                candidates.push(peer);
            }
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut listing = Vec::new();
        for peer in &candidates {
            if let Some(prior) = self.submissions.get(peer.cave_id).await? {
                listing.push(format!("[{}] {}", prior.id, prior.joined_text()));
            }
        }
        if listing.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = format!(
            "新投稿:\n{}\n\n已有条目:\n{}",
            submission.joined_text(),
            listing.join("\n")
        );
        let raw = self
            .chat
            .chat(
                &[ChatMessage::text("user", prompt)],
                Some(DUPLICATE_CHECK_PROMPT),
            )
            .await?;
        let Some(value) = extract_json(&raw) else {
            return Err(CaveError::CorruptResponse);
        };

        let named = id_list(&value);
        let candidate_ids: HashSet<u32> = candidates.iter().map(|c| c.cave_id).collect();
        let mut duplicates: Vec<u32> = named
            .into_iter()
            .filter(|id| candidate_ids.contains(id))
            .collect();
        duplicates.sort_unstable();
        duplicates.dedup();
        Ok(duplicates)
    }
}

/// Multimodal content for a submission: text first, then inline images.
fn build_parts(submission: &Submission, media: &HashMap<String, Vec<u8>>) -> Vec<ContentPart> {
    let mut parts = Vec::new();
    let text = submission.joined_text();
    if !text.trim().is_empty() {
        parts.push(ContentPart::Text { text });
    }
    for element in &submission.elements {
        let Element::Media { file } = element else {
            continue;
        };
        if !is_image_file(file) {
            continue;
        }
        if let Some(bytes) = media.get(file) {
            parts.push(ContentPart::ImageUrl {
                image_url: crate::llm::ImageUrl {
                    url: data_url(mime_for(file), bytes),
                },
            });
        }
    }
    parts
}

/// `{kind} ∪ keywords` as the comparison token set.
pub(crate) fn keyword_set(meta: &MetaRecord) -> HashSet<String> {
    let mut tokens: HashSet<String> = meta.keywords.iter().cloned().collect();
    tokens.insert(meta.kind.clone());
    tokens
}

/// Jaccard similarity of two token sets, scaled to `[0, 100]`.
pub(crate) fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 100.0;
    }
    let intersection = a.intersection(b).count();
    (intersection as f64 / union as f64) * 100.0
}

/// Ids from a bare array or a `{"duplicates": [...]}` wrapper.
fn id_list(value: &serde_json::Value) -> Vec<u32> {
    let array = value
        .as_array()
        .or_else(|| value.get("duplicates").and_then(|v| v.as_array()));
    array
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_u64())
                .filter_map(|id| u32::try_from(id).ok())
                .collect()
        })
        .unwrap_or_default()
}
