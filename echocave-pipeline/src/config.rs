//! Pipeline configuration.
//!
//! Loaded from environment variables with sensible defaults; every knob
//! the moderation gates and the orchestrator consult lives here.

use crate::llm::Endpoint;

/// Default analysis prompt handed to the LLM; operators usually replace
/// it with their own.
pub const DEFAULT_SYSTEM_PROMPT: &str = "你是回声洞内容审核助手。请分析这条投稿的内容，\
返回 JSON：{\"rating\": 0 到 100 的质量评分, \"type\": 简短的内容分类, \
\"keywords\": 关键词数组}。只返回 JSON，不要添加其他说明。";

/// What to do when the AI rating falls below the auto-approve threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiReviewFailPolicy {
    /// Reject the submission outright.
    Reject,
    /// Fall through to manual review.
    Fallthrough,
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct CaveConfig {
    /// Text similarity rejection threshold in `[0, 100]`.
    pub text_threshold: f64,
    /// Image similarity rejection threshold in `[0, 100]`.
    pub image_threshold: f64,
    /// AI rating at or above which a submission may skip manual review.
    pub auto_approve_threshold: u8,
    /// Run the similarity gate.
    pub enable_similarity: bool,
    /// Run the AI gate.
    pub enable_ai: bool,
    /// Route surviving submissions to manual review.
    pub enable_pend: bool,
    /// Let high AI ratings skip manual review.
    pub enable_auto_approve: bool,
    /// Policy for AI ratings below the threshold.
    pub on_ai_review_fail: AiReviewFailPolicy,
    /// Ordered list of chat-completions endpoints.
    pub endpoints: Vec<Endpoint>,
    /// Operator-supplied analysis prompt.
    pub system_prompt: String,
    /// Per-file media download timeout in seconds.
    pub fetch_timeout_secs: u64,
    /// LLM request timeout in seconds (long: multimodal payloads).
    pub llm_timeout_secs: u64,
}

impl Default for CaveConfig {
    fn default() -> Self {
        Self {
            text_threshold: 95.0,
            image_threshold: 95.0,
            auto_approve_threshold: 60,
            enable_similarity: true,
            enable_ai: false,
            enable_pend: false,
            enable_auto_approve: true,
            on_ai_review_fail: AiReviewFailPolicy::Fallthrough,
            endpoints: Vec::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            fetch_timeout_secs: 45,
            llm_timeout_secs: 600,
        }
    }
}

impl CaveConfig {
    /// Load configuration from `CAVE_*` environment variables, falling
    /// back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let endpoints = std::env::var("CAVE_LLM_ENDPOINTS")
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(defaults.endpoints);

        Self {
            text_threshold: env_parse("CAVE_TEXT_THRESHOLD", defaults.text_threshold),
            image_threshold: env_parse("CAVE_IMAGE_THRESHOLD", defaults.image_threshold),
            auto_approve_threshold: env_parse(
                "CAVE_AUTO_APPROVE_THRESHOLD",
                defaults.auto_approve_threshold,
            ),
            enable_similarity: env_flag("CAVE_ENABLE_SIMILARITY", defaults.enable_similarity),
            enable_ai: env_flag("CAVE_ENABLE_AI", defaults.enable_ai),
            enable_pend: env_flag("CAVE_ENABLE_PEND", defaults.enable_pend),
            enable_auto_approve: env_flag("CAVE_ENABLE_AUTO_APPROVE", defaults.enable_auto_approve),
            on_ai_review_fail: match std::env::var("CAVE_ON_AI_REVIEW_FAIL").as_deref() {
                Ok("reject") => AiReviewFailPolicy::Reject,
                Ok("fallthrough") => AiReviewFailPolicy::Fallthrough,
                _ => defaults.on_ai_review_fail,
            },
            endpoints,
            system_prompt: std::env::var("CAVE_SYSTEM_PROMPT")
                .unwrap_or(defaults.system_prompt),
            fetch_timeout_secs: env_parse("CAVE_FETCH_TIMEOUT_SECS", defaults.fetch_timeout_secs),
            llm_timeout_secs: env_parse("CAVE_LLM_TIMEOUT_SECS", defaults.llm_timeout_secs),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => value.to_lowercase() != "false",
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_documented_knobs() {
        let config = CaveConfig::default();
        assert_eq!(config.text_threshold, 95.0);
        assert_eq!(config.image_threshold, 95.0);
        assert_eq!(config.auto_approve_threshold, 60);
        assert!(config.enable_similarity);
        assert!(!config.enable_ai);
        assert!(!config.enable_pend);
        assert_eq!(config.on_ai_review_fail, AiReviewFailPolicy::Fallthrough);
        assert!(config.endpoints.is_empty());
        assert_eq!(config.llm_timeout_secs, 600);
    }
}
