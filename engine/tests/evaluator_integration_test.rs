//! Integration tests for the comparative evaluator
//!
//! Content comes from an in-memory loader and the model is a recording
//! provider that answers candidate threads by echoing their system prompt and
//! answers the judge with a scripted block.

use async_trait::async_trait;
use duel_engine::cache::{ContentLoader, Fetched};
use duel_engine::config::{BudgetConfig, Config, LeniencyConfig};
use duel_engine::context::EngineContext;
use duel_engine::evaluation::{
    ComparativeEvaluator, Confidence, Decision, EvaluationRequest, Scenario, Winner,
};
use duel_engine::llm::{LLMError, LLMProvider, Message, MessageRole, ModelTurn};
use sdk::errors::EngineError;
use sdk::types::ToolSchema;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct MapLoader {
    files: HashMap<String, String>,
}

impl MapLoader {
    fn standard() -> Self {
        let files = [
            ("rubric.md", "Prefer precise, short answers."),
            ("baseline.md", "You are the baseline reviewer."),
            ("variant.md", "You are the variant reviewer."),
            ("scenario.md", "Review this paragraph."),
            ("style.md", "House style: no exclamation marks."),
            ("glossary.md", "PR means pull request."),
        ];
        Self {
            files: files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn with(mut self, reference: &str, text: String) -> Self {
        self.files.insert(reference.to_string(), text);
        self
    }
}

#[async_trait]
impl ContentLoader for MapLoader {
    async fn fetch(&self, reference: &str) -> Result<Fetched, EngineError> {
        self.files
            .get(reference)
            .map(|text| Fetched::text(text.clone()))
            .ok_or_else(|| EngineError::NotFound(reference.to_string()))
    }
}

struct RecordingProvider {
    judge_reply: Result<String, ()>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl RecordingProvider {
    fn judging(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            judge_reply: Ok(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn failing_judge() -> Arc<Self> {
        Arc::new(Self {
            judge_reply: Err(()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn thread_requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !is_judge(r))
            .cloned()
            .collect()
    }

    fn judge_requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| is_judge(r))
            .cloned()
            .collect()
    }
}

fn is_judge(request: &[Message]) -> bool {
    request
        .first()
        .map(|m| m.text().contains("impartial judge"))
        .unwrap_or(false)
}

#[async_trait]
impl LLMProvider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn send(
        &self,
        history: &[Message],
        tools: &[ToolSchema],
    ) -> duel_engine::llm::Result<ModelTurn> {
        assert!(tools.is_empty(), "evaluation threads are single-turn without tools");
        self.requests.lock().unwrap().push(history.to_vec());

        if is_judge(history) {
            return match &self.judge_reply {
                Ok(reply) => Ok(ModelTurn::text(reply.clone())),
                Err(()) => Err(LLMError::ProviderUnavailable("judge offline".to_string())),
            };
        }
        let system = history.first().map(|m| m.text()).unwrap_or_default();
        Ok(ModelTurn::text(format!("answer[{}]", system)))
    }
}

fn judge_block(score_b: f64, improvements: &str) -> String {
    format!(
        "Both are fine.\n\n```json\n{{\"winner\": \"B\", \"score_a\": 6.0, \"score_b\": {}, \
         \"confidence\": \"high\", \"rationale\": \"The variant is more precise. It is shorter.\", \
         \"improvements\": [{}]}}\n```\n",
        score_b, improvements
    )
}

fn evaluator_with(provider: Arc<RecordingProvider>, config: &Config) -> (ComparativeEvaluator, EngineContext) {
    evaluator_with_loader(provider, config, MapLoader::standard())
}

fn evaluator_with_loader(
    provider: Arc<RecordingProvider>,
    config: &Config,
    loader: MapLoader,
) -> (ComparativeEvaluator, EngineContext) {
    let ctx = EngineContext::with_loader(config, Arc::new(loader));
    let evaluator = ComparativeEvaluator::new(provider, ctx.clone(), config.evaluation.clone());
    (evaluator, ctx)
}

fn request() -> EvaluationRequest {
    EvaluationRequest::new("rubric.md", "baseline.md", "variant.md")
        .with_scenario(Scenario::Ref("scenario.md".to_string()))
}

#[tokio::test]
async fn test_high_variant_score_merges() {
    let provider = RecordingProvider::judging(&judge_block(9.0, "\"Polish wording\""));
    let (evaluator, _) = evaluator_with(provider, &Config::default_config());

    let verdict = evaluator.evaluate(&request()).await.unwrap();

    assert_eq!(verdict.decision, Decision::Merge);
    assert_eq!(verdict.winner, Winner::B);
    assert_eq!(verdict.confidence, Confidence::High);
    assert!(verdict.improvements.is_empty());
    assert!(verdict.judge_parsed);
    assert!(verdict.degraded_refs.is_empty());
}

#[tokio::test]
async fn test_middle_score_suggests_with_improvement() {
    let provider = RecordingProvider::judging(&judge_block(7.0, ""));
    let (evaluator, _) = evaluator_with(provider, &Config::default_config());

    let verdict = evaluator.evaluate(&request()).await.unwrap();

    assert_eq!(verdict.decision, Decision::Suggest);
    assert!(!verdict.improvements.is_empty());
    assert!(verdict.improvements[0].contains("The variant is more precise"));
}

#[tokio::test]
async fn test_low_score_rejects() {
    let provider = RecordingProvider::judging(&judge_block(4.0, "\"Start over\""));
    let (evaluator, _) = evaluator_with(provider, &Config::default_config());

    let verdict = evaluator.evaluate(&request()).await.unwrap();

    assert_eq!(verdict.decision, Decision::Reject);
    assert!(verdict.improvements.is_empty());
}

#[tokio::test]
async fn test_unparsable_judge_fails_closed() {
    let provider = RecordingProvider::judging("B seems better overall, I would merge it.");
    let (evaluator, _) = evaluator_with(provider, &Config::default_config());

    let verdict = evaluator.evaluate(&request()).await.unwrap();

    assert_eq!(verdict.decision, Decision::Reject);
    assert_eq!(verdict.confidence, Confidence::Low);
    assert!(!verdict.judge_parsed);
}

#[tokio::test]
async fn test_threads_receive_identical_context() {
    let provider = RecordingProvider::judging(&judge_block(9.0, ""));
    let (evaluator, ctx) = evaluator_with(provider.clone(), &Config::default_config());

    let request = request()
        .with_scenario(Scenario::Inline("Summarize the release notes.".to_string()))
        .with_context("style.md")
        .with_context("glossary.md");
    let verdict = evaluator.evaluate(&request).await.unwrap();

    let expected_keys = vec![
        ctx.cache.key_for("style.md").unwrap(),
        ctx.cache.key_for("glossary.md").unwrap(),
    ];
    assert_eq!(verdict.context_keys, expected_keys);

    let threads = provider.thread_requests();
    assert_eq!(threads.len(), 4);

    let (a_threads, b_threads): (Vec<_>, Vec<_>) = threads
        .iter()
        .partition(|r| r[0].text().contains("baseline reviewer"));
    assert_eq!(a_threads.len(), 2);
    assert_eq!(b_threads.len(), 2);

    for a in &a_threads {
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].role, MessageRole::System);
        let user = a[1].text();
        assert!(user.contains("House style: no exclamation marks."));
        assert!(user.contains("PR means pull request."));
        // Exactly one B thread has the byte-identical user message
        assert_eq!(
            b_threads.iter().filter(|b| b[1].text() == user).count(),
            1
        );
    }

    let judge = provider.judge_requests();
    assert_eq!(judge.len(), 1);
    let judge_prompt = judge[0][1].text();
    assert!(judge_prompt.contains("Prefer precise, short answers."));
    assert!(judge_prompt.contains("=== Scenario 2 ===\nSummarize the release notes."));
    assert!(judge_prompt.contains("answer[You are the baseline reviewer.]"));
    assert!(judge_prompt.contains("answer[You are the variant reviewer.]"));
}

#[tokio::test]
async fn test_missing_input_is_degraded_and_named() {
    let provider = RecordingProvider::judging(&judge_block(9.0, ""));
    let (evaluator, _) = evaluator_with(provider.clone(), &Config::default_config());

    let mut request = request();
    request.candidate_b = "prompts/missing.md".to_string();
    let verdict = evaluator.evaluate(&request).await.unwrap();

    assert_eq!(verdict.degraded_refs, vec!["prompts/missing.md"]);
    assert!(verdict.rationale.contains("prompts/missing.md"));

    // The variant thread still ran, on placeholder content
    let b_thread = provider
        .thread_requests()
        .into_iter()
        .find(|r| r[0].text().contains("prompts/missing.md"));
    assert!(b_thread.is_some());
}

#[tokio::test]
async fn test_configured_leniency_relaxes_thresholds() {
    let mut config = Config::default_config();
    config.evaluation.leniency = Some(LeniencyConfig {
        per_cycle: 1.0,
        max_adjustment: 2.0,
    });
    let provider = RecordingProvider::judging(&judge_block(7.8, ""));
    let (evaluator, _) = evaluator_with(provider, &config);

    let without = evaluator.evaluate(&request()).await.unwrap();
    assert_eq!(without.decision, Decision::Suggest);

    let mut again = request();
    again.prior_suggest_cycles = 1;
    let with = evaluator.evaluate(&again).await.unwrap();
    assert_eq!(with.thresholds.adjustment, 1.0);
    assert_eq!(with.decision, Decision::Merge);
}

#[tokio::test]
async fn test_judge_failure_is_an_error() {
    let (evaluator, ctx) = evaluator_with(RecordingProvider::failing_judge(), &Config::default_config());

    let result = evaluator.evaluate(&request()).await;
    assert!(matches!(result, Err(EngineError::LLMProvider(_))));
    assert_eq!(ctx.cache.stats().referenced_entries, 0);
}

#[tokio::test]
async fn test_request_without_scenarios_is_rejected() {
    let provider = RecordingProvider::judging(&judge_block(9.0, ""));
    let (evaluator, _) = evaluator_with(provider.clone(), &Config::default_config());

    let request = EvaluationRequest::new("rubric.md", "baseline.md", "variant.md");
    assert!(evaluator.evaluate(&request).await.is_err());
    assert!(provider.thread_requests().is_empty());
}

#[tokio::test]
async fn test_handles_released_after_evaluation() {
    let provider = RecordingProvider::judging(&judge_block(7.0, "\"Trim\""));
    let (evaluator, ctx) = evaluator_with(provider, &Config::default_config());

    evaluator
        .evaluate(&request().with_context("style.md"))
        .await
        .unwrap();

    let stats = ctx.cache.stats();
    assert!(stats.entries >= 5);
    assert_eq!(stats.referenced_entries, 0);
}

fn config_with_budget(max_total_bytes: usize, max_item_bytes: usize) -> Config {
    let mut config = Config::default_config();
    config.budget = BudgetConfig {
        max_total_bytes,
        max_items: 100,
        max_token_estimate: 1_000_000,
        max_item_bytes,
        critical_ratio: 1.0,
    };
    config
}

#[tokio::test]
async fn test_variant_omitted_by_budget_fails_closed() {
    let provider = RecordingProvider::judging(&judge_block(9.5, ""));
    let loader = MapLoader::standard()
        .with("rubric.md", "r".repeat(900))
        .with("variant.md", "v".repeat(210));
    let (evaluator, ctx) =
        evaluator_with_loader(provider.clone(), &config_with_budget(1000, 1000), loader);

    let verdict = evaluator.evaluate(&request()).await.unwrap();

    assert_eq!(verdict.decision, Decision::Reject);
    assert_eq!(verdict.confidence, Confidence::Low);
    assert!(!verdict.judge_parsed);
    assert_eq!(verdict.skipped_refs, vec!["variant.md"]);
    assert!(verdict.rationale.contains("variant.md"));
    assert!(provider.thread_requests().is_empty());
    assert!(provider.judge_requests().is_empty());
    assert_eq!(ctx.cache.stats().referenced_entries, 0);
}

#[tokio::test]
async fn test_truncated_context_is_named_in_verdict() {
    let provider = RecordingProvider::judging(&judge_block(9.0, ""));
    let loader = MapLoader::standard().with("big.md", "x".repeat(2000));
    let (evaluator, _) = evaluator_with_loader(provider.clone(), &config_with_budget(1000, 300), loader);

    let verdict = evaluator
        .evaluate(&request().with_context("big.md"))
        .await
        .unwrap();

    assert_eq!(verdict.decision, Decision::Merge);
    assert_eq!(verdict.truncated_refs, vec!["big.md"]);
    assert!(verdict.skipped_refs.is_empty());
    assert!(verdict.rationale.contains("big.md was truncated"));

    // Both threads saw the same cut-down context
    let threads = provider.thread_requests();
    assert_eq!(threads.len(), 2);
    assert!(threads[0][1].text().contains("[... truncated"));
    assert_eq!(threads[0][1].text(), threads[1][1].text());
}

#[tokio::test]
async fn test_concurrent_evaluations_have_separate_budgets() {
    // One evaluation needs 111 bytes; two together would not fit
    let provider = RecordingProvider::judging(&judge_block(9.0, ""));
    let (evaluator, ctx) = evaluator_with(provider, &config_with_budget(150, 150));

    let first = request();
    let second = request();
    let (a, b) = tokio::join!(evaluator.evaluate(&first), evaluator.evaluate(&second));

    for verdict in [a.unwrap(), b.unwrap()] {
        assert_eq!(verdict.decision, Decision::Merge);
        assert!(verdict.skipped_refs.is_empty());
        assert!(verdict.truncated_refs.is_empty());
    }
    assert_eq!(ctx.cache.stats().referenced_entries, 0);
}
