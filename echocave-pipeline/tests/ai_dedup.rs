//! Semantic-duplicate gating through a scripted chat model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use echocave_pipeline::memory::{
    MemoryBlobStore, MemoryHashStore, MemoryMetaStore, MemoryReviewSink, MemorySubmissionStore,
};
use echocave_pipeline::{
    AiReviewFailPolicy, CaveConfig, CaveError, ChatMessage, ChatModel, Element, IdPool,
    IngestOutcome, IngestPipeline, MemoryFetcher, MetaRecord, MetaStore, PipelineDeps,
    RejectReason, Submission, SubmissionStatus, SubmissionStore,
};

struct ScriptedChat {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<usize>,
}

impl ScriptedChat {
    fn new(responses: Vec<Result<String, String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().expect("call counter poisoned")
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _system_prompt: Option<&str>,
    ) -> echocave_pipeline::Result<String> {
        *self.calls.lock().expect("call counter poisoned") += 1;
        match self.responses.lock().expect("script poisoned").pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(CaveError::Llm(message)),
            None => Err(CaveError::Llm("script exhausted".into())),
        }
    }
}

struct World {
    metas: Arc<MemoryMetaStore>,
    submissions: Arc<MemorySubmissionStore>,
    pipeline: IngestPipeline,
}

async fn world(config: CaveConfig, chat: Arc<dyn ChatModel>) -> World {
    let metas = Arc::new(MemoryMetaStore::new());
    let submissions = Arc::new(MemorySubmissionStore::new());

    // Seed an existing ACG entry the new submission may duplicate.
    let prior = Submission {
        id: 1,
        elements: vec![Element::Text { content: "明日方舟夕干员的梗图".into() }],
        channel_id: "chan".into(),
        user_id: "user".into(),
        created_at: Utc::now(),
        status: SubmissionStatus::Active,
    };
    submissions.upsert(&prior).await.expect("seed prior");
    metas
        .upsert(&MetaRecord {
            cave_id: 1,
            rating: 72,
            kind: "ACG".into(),
            keywords: vec!["明日方舟".into(), "夕".into()],
        })
        .await
        .expect("seed prior meta");

    let pipeline = IngestPipeline::new(
        config,
        PipelineDeps {
            blobs: Arc::new(MemoryBlobStore::new()),
            hashes: Arc::new(MemoryHashStore::new()),
            metas: metas.clone(),
            submissions: submissions.clone(),
            fetcher: Arc::new(MemoryFetcher::new()),
            review: Arc::new(MemoryReviewSink::new()),
            chat: Some(chat),
            ids: Arc::new(IdPool::new(100)),
        },
    );
    World { metas, submissions, pipeline }
}

fn new_submission(id: u32, content: &str) -> Submission {
    Submission {
        id,
        elements: vec![Element::Text { content: content.into() }],
        channel_id: "chan".into(),
        user_id: "user".into(),
        created_at: Utc::now(),
        status: SubmissionStatus::Preload,
    }
}

const ANALYSIS_ACG: &str =
    "```json\n{\"rating\": 75, \"type\": \"ACG\", \"keywords\": [\"明日方舟\", \"夕\"]}\n```";

#[tokio::test]
async fn semantic_duplicate_is_rejected_with_the_prior_id() {
    let chat = ScriptedChat::new(vec![Ok(ANALYSIS_ACG.into()), Ok("[1]".into())]);
    let config = CaveConfig { enable_ai: true, ..CaveConfig::default() };
    let world = world(config, chat.clone()).await;

    // Simhash distance is large (different wording), so only the AI
    // gate can catch this one.
    let submission = new_submission(2, "同一个意思的另一种说法，关于夕的梗");
    world.submissions.upsert(&submission).await.unwrap();
    let outcome = world.pipeline.ingest(submission, Vec::new()).await;

    match outcome {
        IngestOutcome::Rejected {
            reason: RejectReason::SemanticDuplicate { prior_ids },
            message,
        } => {
            assert_eq!(prior_ids, vec![1]);
            assert!(message.contains("(1)"));
        }
        other => panic!("expected semantic rejection, got {other:?}"),
    }
    assert_eq!(chat.calls(), 2, "analysis then duplicate confirmation");
    assert!(world.metas.get(2).await.unwrap().is_none());
    assert_eq!(
        world.submissions.get(2).await.unwrap().unwrap().status,
        SubmissionStatus::Delete
    );
}

#[tokio::test]
async fn llm_denial_lets_the_submission_through() {
    let chat = ScriptedChat::new(vec![Ok(ANALYSIS_ACG.into()), Ok("[]".into())]);
    let config = CaveConfig { enable_ai: true, ..CaveConfig::default() };
    let world = world(config, chat.clone()).await;

    let submission = new_submission(2, "其实并不重复的内容");
    world.submissions.upsert(&submission).await.unwrap();
    let outcome = world.pipeline.ingest(submission, Vec::new()).await;

    assert!(matches!(
        outcome,
        IngestOutcome::Added { status: SubmissionStatus::Active, .. }
    ));
    assert_eq!(chat.calls(), 2);
    let meta = world.metas.get(2).await.unwrap().expect("meta committed");
    assert_eq!(meta.kind, "ACG");
}

#[tokio::test]
async fn low_rating_with_reject_policy_is_turned_away_before_commit() {
    let low = "```json\n{\"rating\": 35, \"type\": \"ACG\", \"keywords\": [\"低质量\"]}\n```";
    let chat = ScriptedChat::new(vec![Ok(low.into())]);
    let config = CaveConfig {
        enable_ai: true,
        auto_approve_threshold: 60,
        on_ai_review_fail: AiReviewFailPolicy::Reject,
        ..CaveConfig::default()
    };
    let world = world(config, chat).await;

    let submission = new_submission(2, "一条评分很低的投稿");
    world.submissions.upsert(&submission).await.unwrap();
    match world.pipeline.ingest(submission, Vec::new()).await {
        IngestOutcome::Rejected { reason: RejectReason::LowRating { rating }, message } => {
            assert_eq!(rating, 35);
            assert!(message.contains("35"));
        }
        other => panic!("expected low-rating rejection, got {other:?}"),
    }
    assert!(world.metas.get(2).await.unwrap().is_none(), "meta never committed");
}

#[tokio::test]
async fn low_rating_with_fallthrough_goes_to_manual_review() {
    let low = "```json\n{\"rating\": 35, \"type\": \"ACG\", \"keywords\": [\"低质量\"]}\n```";
    let chat = ScriptedChat::new(vec![Ok(low.into())]);
    let config = CaveConfig {
        enable_ai: true,
        enable_pend: true,
        on_ai_review_fail: AiReviewFailPolicy::Fallthrough,
        ..CaveConfig::default()
    };
    let world = world(config, chat).await;

    let submission = new_submission(2, "一条评分很低的投稿");
    world.submissions.upsert(&submission).await.unwrap();
    match world.pipeline.ingest(submission, Vec::new()).await {
        IngestOutcome::Added { status, .. } => assert_eq!(status, SubmissionStatus::Pending),
        other => panic!("expected pending, got {other:?}"),
    }
    let meta = world.metas.get(2).await.unwrap().expect("meta committed");
    assert_eq!(meta.rating, 35);
}

#[tokio::test]
async fn wrong_shape_json_skips_the_ai_gate() {
    // Valid JSON, wrong shape: a content problem, not a failure.
    let chat = ScriptedChat::new(vec![Ok("[\"not\", \"an\", \"object\"]".into())]);
    let config = CaveConfig { enable_ai: true, ..CaveConfig::default() };
    let world = world(config, chat.clone()).await;

    let submission = new_submission(2, "分析失败也能通过的内容");
    world.submissions.upsert(&submission).await.unwrap();
    assert!(matches!(
        world.pipeline.ingest(submission, Vec::new()).await,
        IngestOutcome::Added { status: SubmissionStatus::Active, .. }
    ));
    assert_eq!(chat.calls(), 1, "no duplicate check without meta");
    assert!(world.metas.get(2).await.unwrap().is_none());
}

#[tokio::test]
async fn refresh_meta_backfills_missing_rows_best_effort() {
    use echocave_pipeline::{refresh_meta, AiModerator};

    let metas = Arc::new(MemoryMetaStore::new());
    let submissions = Arc::new(MemorySubmissionStore::new());
    let blobs = MemoryBlobStore::new();

    let mut covered = new_submission(1, "已有元数据的条目");
    covered.status = SubmissionStatus::Active;
    submissions.upsert(&covered).await.unwrap();
    metas
        .upsert(&MetaRecord {
            cave_id: 1,
            rating: 60,
            kind: "日常".into(),
            keywords: vec![],
        })
        .await
        .unwrap();

    let mut uncovered = new_submission(2, "缺少元数据的条目");
    uncovered.status = SubmissionStatus::Active;
    submissions.upsert(&uncovered).await.unwrap();

    // One analysis response: only entry 2 needs it.
    let chat = ScriptedChat::new(vec![Ok(ANALYSIS_ACG.into())]);
    let ai = AiModerator::new(
        chat.clone(),
        metas.clone(),
        submissions.clone(),
        "analysis prompt",
    );

    let summary = refresh_meta(submissions.as_ref(), &blobs, metas.as_ref(), &ai)
        .await
        .unwrap();
    assert_eq!(summary.refreshed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(chat.calls(), 1);
    let meta = metas.get(2).await.unwrap().expect("backfilled meta");
    assert_eq!(meta.kind, "ACG");
}

#[tokio::test]
async fn unparseable_output_is_a_rollback() {
    let chat = ScriptedChat::new(vec![Ok("抱歉，我无法分析这条内容。".into())]);
    let config = CaveConfig { enable_ai: true, ..CaveConfig::default() };
    let world = world(config, chat).await;

    let submission = new_submission(2, "触发损坏响应的内容");
    world.submissions.upsert(&submission).await.unwrap();
    match world.pipeline.ingest(submission, Vec::new()).await {
        IngestOutcome::Failed { message } => assert!(message.starts_with("处理失败:")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(
        world.submissions.get(2).await.unwrap().unwrap().status,
        SubmissionStatus::Delete
    );
}
