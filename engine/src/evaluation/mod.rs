//! Comparative prompt evaluation
//!
//! Runs the baseline (candidate A) and the variant (candidate B) on the same
//! scenarios with the same context, then asks a judge model to score both
//! against a rubric:
//!
//! 1. Load the rubric, both candidates, every scenario and the context bundle
//!    through the cache and the size budget
//! 2. For each scenario run thread A and thread B as independent single-turn
//!    generations with a byte-identical user message
//! 3. Send the rubric and every output pair to the judge in one call
//! 4. Parse the judge's decision block and map the variant score to
//!    MERGE, SUGGEST or REJECT
//!
//! Judge output that cannot be parsed fails closed to REJECT, and so does a
//! rubric or candidate that the size budget had to leave out. Every input
//! that was degraded, truncated or omitted is named in the verdict.

pub mod prompts;
pub mod verdict;

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CacheHandle, Fetched};
use crate::config::EvaluationConfig;
use crate::context::{EngineContext, LoadedContent, RunContext};
use crate::llm::{LLMProvider, Message};

pub use prompts::ScenarioPair;
pub use verdict::{
    parse_judge, Confidence, Decision, EvaluationVerdict, JudgeBlock, LeniencyPolicy, Thresholds,
    Winner,
};

/// A scenario given inline or as a workspace path / URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Inline(String),
    Ref(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub rubric_ref: String,
    /// Baseline prompt
    pub candidate_a: String,
    /// Proposed variant
    pub candidate_b: String,
    pub scenarios: Vec<Scenario>,
    /// Refs injected identically into both candidate threads
    #[serde(default)]
    pub context_bundle: Vec<String>,
    /// Overrides the configured leniency when set
    #[serde(default)]
    pub leniency: Option<LeniencyPolicy>,
    /// Earlier SUGGEST rounds for this variant, used with the configured leniency
    #[serde(default)]
    pub prior_suggest_cycles: u32,
}

impl EvaluationRequest {
    pub fn new(
        rubric_ref: impl Into<String>,
        candidate_a: impl Into<String>,
        candidate_b: impl Into<String>,
    ) -> Self {
        Self {
            rubric_ref: rubric_ref.into(),
            candidate_a: candidate_a.into(),
            candidate_b: candidate_b.into(),
            scenarios: Vec::new(),
            context_bundle: Vec::new(),
            leniency: None,
            prior_suggest_cycles: 0,
        }
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub fn with_context(mut self, reference: impl Into<String>) -> Self {
        self.context_bundle.push(reference.into());
        self
    }
}

pub struct ComparativeEvaluator {
    provider: Arc<dyn LLMProvider>,
    judge: Arc<dyn LLMProvider>,
    ctx: EngineContext,
    config: EvaluationConfig,
}

impl ComparativeEvaluator {
    pub fn new(provider: Arc<dyn LLMProvider>, ctx: EngineContext, config: EvaluationConfig) -> Self {
        Self {
            judge: Arc::clone(&provider),
            provider,
            ctx,
            config,
        }
    }

    /// Use a separate model for the judge call
    pub fn with_judge(mut self, judge: Arc<dyn LLMProvider>) -> Self {
        self.judge = judge;
        self
    }

    fn leniency(&self, request: &EvaluationRequest) -> Option<LeniencyPolicy> {
        request.leniency.clone().or_else(|| {
            self.config
                .leniency
                .as_ref()
                .map(|c| LeniencyPolicy::new(c, request.prior_suggest_cycles))
        })
    }

    pub async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationVerdict, EngineError> {
        if request.scenarios.is_empty() {
            return Err(EngineError::Config(
                "Evaluation request needs at least one scenario".to_string(),
            ));
        }

        let start = Instant::now();
        let run = self.ctx.begin_run();

        let mut handles = Vec::new();
        let result = self.evaluate_inner(request, &run, &mut handles).await;
        run.release(&handles);

        if let Ok(verdict) = &result {
            info!(
                "Evaluation finished: winner={:?} score_a={} score_b={} decision={} in {}ms",
                verdict.winner,
                verdict.score_a,
                verdict.score_b,
                verdict.decision,
                start.elapsed().as_millis()
            );
        }
        result
    }

    async fn evaluate_inner(
        &self,
        request: &EvaluationRequest,
        run: &RunContext,
        handles: &mut Vec<CacheHandle>,
    ) -> Result<EvaluationVerdict, EngineError> {
        let mut loaded: Vec<LoadedContent> = Vec::new();

        let mut load = |content: LoadedContent, handle: CacheHandle| {
            handles.push(handle);
            loaded.push(content.clone());
            content
        };

        let (rubric, h) = run.load(&request.rubric_ref).await;
        let rubric = load(rubric, h);
        let (candidate_a, h) = run.load(&request.candidate_a).await;
        let candidate_a = load(candidate_a, h);
        let (candidate_b, h) = run.load(&request.candidate_b).await;
        let candidate_b = load(candidate_b, h);

        let mut scenarios = Vec::with_capacity(request.scenarios.len());
        for (i, scenario) in request.scenarios.iter().enumerate() {
            let (content, handle) = match scenario {
                Scenario::Ref(reference) => run.load(reference).await,
                Scenario::Inline(text) => {
                    let handle = run
                        .cache
                        .insert(&format!("inline:scenario-{}", i + 1), Fetched::text(text.clone()));
                    (run.admit(&handle), handle)
                }
            };
            scenarios.push(load(content, handle));
        }

        let mut context = Vec::with_capacity(request.context_bundle.len());
        for reference in &request.context_bundle {
            let (content, handle) = run.load(reference).await;
            context.push(load(content, handle));
        }

        let context_keys: Vec<String> = context.iter().map(|c| c.key.clone()).collect();
        let context_block = prompts::context_block(&context);
        debug!(
            "Evaluating {} scenario(s) with {} context item(s)",
            scenarios.len(),
            context_keys.len()
        );

        let thresholds = Thresholds::resolve(&self.config, self.leniency(request).as_ref());

        let omitted: Vec<&str> = [&rubric, &candidate_a, &candidate_b]
            .into_iter()
            .filter(|c| c.text.is_none())
            .map(|c| c.reference.as_str())
            .collect();
        if !omitted.is_empty() {
            warn!(
                "Size budget omitted {}; rejecting without running the candidates",
                omitted.join(", ")
            );
            let mut verdict = EvaluationVerdict::incomplete(
                &format!("{} did not fit the size budget", omitted.join(", ")),
                thresholds,
            );
            flag_inputs(&mut verdict, &loaded, context_keys);
            return Ok(verdict);
        }

        let system_a = Message::system(candidate_a.render());
        let system_b = Message::system(candidate_b.render());

        let mut outputs = Vec::with_capacity(scenarios.len());
        for (i, scenario) in scenarios.iter().enumerate() {
            let user = Message::user(prompts::scenario_message(&context_block, &scenario.render()));
            let thread_a = [system_a.clone(), user.clone()];
            let thread_b = [system_b.clone(), user];

            let (turn_a, turn_b) = tokio::join!(
                self.provider.send(&thread_a, &[]),
                self.provider.send(&thread_b, &[])
            );
            let output_a = turn_a?.joined_text();
            let output_b = turn_b?.joined_text();
            debug!(
                "Scenario {}: thread A {} chars, thread B {} chars",
                i + 1,
                output_a.len(),
                output_b.len()
            );
            outputs.push((output_a, output_b));
        }

        let scenario_texts: Vec<String> = scenarios.iter().map(LoadedContent::render).collect();
        let pairs: Vec<ScenarioPair<'_>> = scenario_texts
            .iter()
            .zip(&outputs)
            .map(|(scenario, (a, b))| ScenarioPair {
                scenario,
                output_a: a,
                output_b: b,
            })
            .collect();

        let judge_request = [
            Message::system(prompts::judge_system()),
            Message::user(prompts::judge_message(&rubric.render(), &pairs)),
        ];
        let judge_text = self.judge.send(&judge_request, &[]).await?.joined_text();

        let mut verdict = match parse_judge(&judge_text) {
            Ok(block) => EvaluationVerdict::from_judge(block, thresholds),
            Err(e) => {
                warn!("Judge output unparsable, failing closed: {}", e);
                EvaluationVerdict::unparsable(&e.to_string(), thresholds)
            }
        };

        flag_inputs(&mut verdict, &loaded, context_keys);
        Ok(verdict)
    }
}

/// References of `loaded` items matching `pred`, first occurrence order
fn refs_where(loaded: &[LoadedContent], pred: impl Fn(&LoadedContent) -> bool) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for item in loaded.iter().filter(|c| pred(c)) {
        if !refs.contains(&item.reference) {
            refs.push(item.reference.clone());
        }
    }
    refs
}

/// Name every degraded, omitted or truncated input in the verdict
fn flag_inputs(verdict: &mut EvaluationVerdict, loaded: &[LoadedContent], context_keys: Vec<String>) {
    let degraded = refs_where(loaded, |c| c.degraded);
    let skipped = refs_where(loaded, |c| c.text.is_none());
    let truncated = refs_where(loaded, |c| c.truncated);

    if !degraded.is_empty() {
        warn!("Evaluation used placeholder content for: {}", degraded.join(", "));
    }
    if !skipped.is_empty() || !truncated.is_empty() {
        warn!(
            "Evaluation inputs cut by the size budget: omitted [{}], truncated [{}]",
            skipped.join(", "),
            truncated.join(", ")
        );
    }

    verdict.flag_degraded(degraded);
    verdict.flag_budget_cuts(skipped, truncated);
    verdict.context_keys = context_keys;
}
