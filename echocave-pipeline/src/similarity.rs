//! Similarity gate: rejects a submission when a persisted fingerprint
//! is within threshold of its text Simhash or any image pHash.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use echocave_core::{phash, similarity, simhash};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{Decision, Element, HashKind, HashRecord, RejectReason, Submission};
use crate::store::HashStore;

/// Extensions the image hasher accepts.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Whether a stored file name looks like a hashable image.
pub fn is_image_file(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub struct SimilarityModerator {
    hashes: Arc<dyn HashStore>,
    text_threshold: f64,
    image_threshold: f64,
}

impl SimilarityModerator {
    pub fn new(hashes: Arc<dyn HashStore>, text_threshold: f64, image_threshold: f64) -> Self {
        Self {
            hashes,
            text_threshold,
            image_threshold,
        }
    }

    /// Gate a submission against every persisted fingerprint.
    ///
    /// On `Pass` the records that would be persisted are returned; the
    /// orchestrator owns the actual write. The first record crossing a
    /// threshold wins the rejection and is cited by id.
    pub async fn check(
        &self,
        submission: &Submission,
        media: &HashMap<String, Vec<u8>>,
    ) -> Result<Decision> {
        let mut to_store = Vec::new();

        let text_hash = simhash(&submission.joined_text());
        if !text_hash.is_empty() {
            for record in self.hashes.of_kind(HashKind::Text).await? {
                let pct = similarity(&text_hash, &record.hash);
                if pct >= self.text_threshold {
                    debug!(
                        cave_id = submission.id,
                        prior_id = record.cave_id,
                        similarity = pct,
                        "text fingerprint within threshold"
                    );
                    return Ok(Decision::Reject(RejectReason::Similar {
                        prior_id: record.cave_id,
                        kind: HashKind::Text,
                        similarity: pct,
                    }));
                }
            }
            to_store.push(HashRecord {
                cave_id: submission.id,
                hash: text_hash,
                kind: HashKind::Text,
            });
        }

        let existing_images = self.hashes.of_kind(HashKind::Image).await?;
        let mut seen_hashes = HashSet::new();
        for element in &submission.elements {
            let Element::Media { file } = element else {
                continue;
            };
            if !is_image_file(file) {
                continue;
            }
            let Some(bytes) = media.get(file) else {
                continue;
            };
            let hash = match phash(bytes) {
                Ok(hash) => hash,
                Err(err) => {
                    warn!(file = %file, error = %err, "media not hashable, skipping");
                    continue;
                }
            };
            // One submission never stores the same image hash twice.
            if !seen_hashes.insert(hash.clone()) {
                continue;
            }
            for record in &existing_images {
                let pct = similarity(&hash, &record.hash);
                if pct >= self.image_threshold {
                    debug!(
                        cave_id = submission.id,
                        prior_id = record.cave_id,
                        similarity = pct,
                        "image fingerprint within threshold"
                    );
                    return Ok(Decision::Reject(RejectReason::Similar {
                        prior_id: record.cave_id,
                        kind: HashKind::Image,
                        similarity: pct,
                    }));
                }
            }
            to_store.push(HashRecord {
                cave_id: submission.id,
                hash,
                kind: HashKind::Image,
            });
        }

        if to_store.is_empty() {
            return Ok(Decision::Skip);
        }
        Ok(Decision::Pass { hashes: to_store })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHashStore;
    use chrono::Utc;

    fn submission(elements: Vec<Element>) -> Submission {
        Submission {
            id: 9,
            elements,
            channel_id: "c".into(),
            user_id: "u".into(),
            created_at: Utc::now(),
            status: crate::model::SubmissionStatus::Preload,
        }
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_image_file("a.png"));
        assert!(is_image_file("b.JPG"));
        assert!(is_image_file("c.Webp"));
        assert!(!is_image_file("clip.mp4"));
        assert!(!is_image_file("noext"));
    }

    #[tokio::test]
    async fn identical_text_is_rejected_at_100_percent() {
        let store = Arc::new(MemoryHashStore::new());
        store
            .upsert(&[HashRecord {
                cave_id: 3,
                hash: simhash("hello"),
                kind: HashKind::Text,
            }])
            .await
            .unwrap();

        let gate = SimilarityModerator::new(store, 95.0, 95.0);
        let sub = submission(vec![Element::Text { content: "Hello ".into() }]);
        let decision = gate.check(&sub, &HashMap::new()).await.unwrap();
        match decision {
            Decision::Reject(RejectReason::Similar { prior_id, kind, similarity }) => {
                assert_eq!(prior_id, 3);
                assert_eq!(kind, HashKind::Text);
                assert_eq!(similarity, 100.0);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn novel_text_passes_with_a_record_to_store() {
        let store = Arc::new(MemoryHashStore::new());
        store
            .upsert(&[HashRecord {
                cave_id: 3,
                hash: simhash("completely unrelated content"),
                kind: HashKind::Text,
            }])
            .await
            .unwrap();

        let gate = SimilarityModerator::new(store, 95.0, 95.0);
        let sub = submission(vec![Element::Text { content: "hello".into() }]);
        match gate.check(&sub, &HashMap::new()).await.unwrap() {
            Decision::Pass { hashes } => {
                assert_eq!(hashes.len(), 1);
                assert_eq!(hashes[0].cave_id, 9);
                assert_eq!(hashes[0].kind, HashKind::Text);
                assert_eq!(hashes[0].hash, simhash("hello"));
            }
            other => panic!("expected pass, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submission_without_content_is_skipped() {
        let gate = SimilarityModerator::new(Arc::new(MemoryHashStore::new()), 95.0, 95.0);
        let sub = submission(vec![]);
        assert_eq!(
            gate.check(&sub, &HashMap::new()).await.unwrap(),
            Decision::Skip
        );
    }

    #[tokio::test]
    async fn corrupt_media_is_skipped_not_fatal() {
        let gate = SimilarityModerator::new(Arc::new(MemoryHashStore::new()), 95.0, 95.0);
        let sub = submission(vec![
            Element::Text { content: "hello".into() },
            Element::Media { file: "x.png".into() },
        ]);
        let mut media = HashMap::new();
        media.insert("x.png".to_string(), b"not an image".to_vec());
        match gate.check(&sub, &media).await.unwrap() {
            Decision::Pass { hashes } => {
                // only the text fingerprint survives
                assert_eq!(hashes.len(), 1);
                assert_eq!(hashes[0].kind, HashKind::Text);
            }
            other => panic!("expected pass, got {other:?}"),
        }
    }
}
