//! Verdict types, decision mapping and judge output parsing

use regex::Regex;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::config::{EvaluationConfig, LeniencyConfig};
use crate::llm::extract_balanced_json;

/// Which candidate the judge preferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    A,
    B,
    Tie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// What should happen to the variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Merge,
    Suggest,
    Reject,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Merge => write!(f, "MERGE"),
            Decision::Suggest => write!(f, "SUGGEST"),
            Decision::Reject => write!(f, "REJECT"),
        }
    }
}

/// Score cut-offs applied to the variant's score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub merge: f64,
    pub suggest: f64,
    /// Points subtracted by the leniency policy, 0 when none applies
    pub adjustment: f64,
}

/// Explicit threshold relaxation for a variant that already went through
/// earlier SUGGEST cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeniencyPolicy {
    pub per_cycle: f64,
    pub max_adjustment: f64,
    pub prior_suggest_cycles: u32,
}

impl LeniencyPolicy {
    pub fn new(config: &LeniencyConfig, prior_suggest_cycles: u32) -> Self {
        Self {
            per_cycle: config.per_cycle,
            max_adjustment: config.max_adjustment,
            prior_suggest_cycles,
        }
    }

    pub fn adjustment(&self) -> f64 {
        (self.per_cycle * f64::from(self.prior_suggest_cycles))
            .min(self.max_adjustment)
            .max(0.0)
    }
}

impl Thresholds {
    pub fn resolve(config: &EvaluationConfig, leniency: Option<&LeniencyPolicy>) -> Self {
        let adjustment = leniency.map(LeniencyPolicy::adjustment).unwrap_or(0.0);
        Self {
            merge: (config.merge_threshold - adjustment).max(0.0),
            suggest: (config.suggest_threshold - adjustment).max(0.0),
            adjustment,
        }
    }

    pub fn decide(&self, score_b: f64) -> Decision {
        if score_b >= self.merge {
            Decision::Merge
        } else if score_b >= self.suggest {
            Decision::Suggest
        } else {
            Decision::Reject
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::resolve(&EvaluationConfig::default(), None)
    }
}

/// Final result of a comparative evaluation
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationVerdict {
    pub winner: Winner,
    pub score_a: f64,
    pub score_b: f64,
    pub confidence: Confidence,
    pub decision: Decision,
    pub rationale: String,
    /// Non-empty only when the decision is SUGGEST
    pub improvements: Vec<String>,
    /// Refs that fell back to placeholder content
    pub degraded_refs: Vec<String>,
    /// Refs the size budget left out entirely
    pub skipped_refs: Vec<String>,
    /// Refs cut down to fit the size budget
    pub truncated_refs: Vec<String>,
    /// Cache keys injected identically into both candidate threads
    pub context_keys: Vec<String>,
    pub thresholds: Thresholds,
    /// False when the judge output could not be read and the verdict failed closed
    pub judge_parsed: bool,
}

impl EvaluationVerdict {
    /// Build a verdict from a parsed judge block
    pub fn from_judge(block: JudgeBlock, thresholds: Thresholds) -> Self {
        let decision = thresholds.decide(block.score_b);
        let improvements = match decision {
            Decision::Suggest if block.improvements.is_empty() => {
                vec![generic_improvement(&block.rationale)]
            }
            Decision::Suggest => block.improvements,
            _ => Vec::new(),
        };

        Self {
            winner: block.winner,
            score_a: block.score_a,
            score_b: block.score_b,
            confidence: block.confidence,
            decision,
            rationale: block.rationale,
            improvements,
            degraded_refs: Vec::new(),
            skipped_refs: Vec::new(),
            truncated_refs: Vec::new(),
            context_keys: Vec::new(),
            thresholds,
            judge_parsed: true,
        }
    }

    /// Fail-closed verdict for judge output that could not be read
    pub fn unparsable(reason: &str, thresholds: Thresholds) -> Self {
        Self::fail_closed(
            format!(
                "The judge response could not be parsed ({}). Rejecting the variant.",
                reason
            ),
            thresholds,
        )
    }

    /// Fail-closed verdict for an evaluation whose rubric or candidates could
    /// not be given to the models in full
    pub fn incomplete(reason: &str, thresholds: Thresholds) -> Self {
        Self::fail_closed(
            format!(
                "The evaluation inputs were incomplete ({}). Rejecting the variant without judging.",
                reason
            ),
            thresholds,
        )
    }

    fn fail_closed(rationale: String, thresholds: Thresholds) -> Self {
        Self {
            winner: Winner::Tie,
            score_a: 0.0,
            score_b: 0.0,
            confidence: Confidence::Low,
            decision: Decision::Reject,
            rationale,
            improvements: Vec::new(),
            degraded_refs: Vec::new(),
            skipped_refs: Vec::new(),
            truncated_refs: Vec::new(),
            context_keys: Vec::new(),
            thresholds,
            judge_parsed: false,
        }
    }

    /// Record degraded inputs and name them in the rationale
    pub fn flag_degraded(&mut self, refs: Vec<String>) {
        if refs.is_empty() {
            return;
        }
        self.rationale.push_str(&format!(
            "\n\nNote: {} could not be loaded and placeholder content was used instead; \
             this verdict has reduced fidelity.",
            refs.join(", ")
        ));
        self.degraded_refs = refs;
    }

    /// Record inputs the size budget omitted or truncated and name them in
    /// the rationale
    pub fn flag_budget_cuts(&mut self, skipped: Vec<String>, truncated: Vec<String>) {
        if !skipped.is_empty() {
            self.rationale.push_str(&format!(
                "\n\nNote: {} did not fit the size budget and the models saw an omission \
                 marker instead; this verdict has reduced fidelity.",
                skipped.join(", ")
            ));
        }
        if !truncated.is_empty() {
            self.rationale.push_str(&format!(
                "\n\nNote: {} was truncated to fit the size budget; \
                 this verdict has reduced fidelity.",
                truncated.join(", ")
            ));
        }
        self.skipped_refs = skipped;
        self.truncated_refs = truncated;
    }
}

fn generic_improvement(rationale: &str) -> String {
    let first_sentence = rationale
        .split_terminator(['.', '\n'])
        .map(str::trim)
        .find(|s| !s.is_empty());
    match first_sentence {
        Some(sentence) => {
            let mut sentence = sentence.to_string();
            if sentence.len() > 200 {
                let mut end = 200;
                while !sentence.is_char_boundary(end) {
                    end -= 1;
                }
                sentence.truncate(end);
            }
            format!("Address the judge's main concern: {}.", sentence)
        }
        None => "Revise the variant against the rubric and re-run the evaluation.".to_string(),
    }
}

/// Structured decision block emitted by the judge
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeBlock {
    pub winner: Winner,
    pub score_a: f64,
    pub score_b: f64,
    pub confidence: Confidence,
    pub rationale: String,
    pub improvements: Vec<String>,
}

fn unparsable(reason: impl Into<String>) -> EngineError {
    EngineError::JudgeUnparsable(reason.into())
}

fn parse_winner(raw: &str) -> Result<Winner, EngineError> {
    let normalized = raw
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '*' | '`' | '.'))
        .to_ascii_lowercase();
    match normalized.as_str() {
        "a" | "baseline" | "candidate a" | "thread a" => Ok(Winner::A),
        "b" | "variant" | "candidate b" | "thread b" => Ok(Winner::B),
        "tie" | "draw" | "equal" => Ok(Winner::Tie),
        other => Err(unparsable(format!("unknown winner '{}'", other))),
    }
}

fn parse_confidence(raw: Option<&str>) -> Confidence {
    match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
        Some("high") => Confidence::High,
        Some("medium") => Confidence::Medium,
        _ => Confidence::Low,
    }
}

fn check_score(name: &str, score: f64) -> Result<f64, EngineError> {
    if score.is_finite() && (0.0..=10.0).contains(&score) {
        Ok(score)
    } else {
        Err(unparsable(format!("{} {} is outside 0-10", name, score)))
    }
}

fn json_score(value: &serde_json::Value, name: &str) -> Result<f64, EngineError> {
    let score = match value.get(name) {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| unparsable(format!("missing {}", name)))?;
    check_score(name, score)
}

fn from_json(value: &serde_json::Value) -> Result<JudgeBlock, EngineError> {
    let winner = value
        .get("winner")
        .and_then(|w| w.as_str())
        .ok_or_else(|| unparsable("missing winner"))?;

    let improvements = value
        .get("improvements")
        .and_then(|i| i.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(JudgeBlock {
        winner: parse_winner(winner)?,
        score_a: json_score(value, "score_a")?,
        score_b: json_score(value, "score_b")?,
        confidence: parse_confidence(value.get("confidence").and_then(|c| c.as_str())),
        rationale: value
            .get("rationale")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .trim()
            .to_string(),
        improvements,
    })
}

fn find_json_block(text: &str) -> Option<serde_json::Value> {
    // Odd segments between ``` markers are fence bodies; drop the language tag line
    let fenced = text
        .split("```")
        .skip(1)
        .step_by(2)
        .filter_map(|segment| segment.split_once('\n').map(|(_, body)| body));
    for body in fenced {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body.trim()) {
            if value.get("score_b").is_some() {
                return Some(value);
            }
        }
    }

    let mut offset = 0;
    while let Some(pos) = text[offset..].find('{') {
        let candidate = &text[offset + pos..];
        if let Some(json_str) = extract_balanced_json(candidate) {
            if json_str.contains("score_b") {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(json_str) {
                    return Some(value);
                }
            }
        }
        offset += pos + 1;
    }
    None
}

const JUDGE_FIELDS: [&str; 5] = ["WINNER", "SCORE_A", "SCORE_B", "CONFIDENCE", "RATIONALE"];

/// `KEY: value` patterns for the line-oriented judge format, compiled once
static FIELD_PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();

fn field_patterns() -> &'static [(&'static str, Regex)] {
    FIELD_PATTERNS.get_or_init(|| {
        JUDGE_FIELDS
            .iter()
            .map(|name| {
                let pattern = format!(r"(?mi)^\s*[*_]*{}[*_]*\s*:\s*(.+?)\s*$", name);
                (*name, Regex::new(&pattern).expect("Invalid judge field pattern"))
            })
            .collect()
    })
}

fn from_lines(text: &str) -> Result<JudgeBlock, EngineError> {
    let field = |name: &str| -> Option<String> {
        field_patterns()
            .iter()
            .find(|(field, _)| *field == name)?
            .1
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };
    let score = |name: &str| -> Result<f64, EngineError> {
        let raw = field(name).ok_or_else(|| unparsable(format!("missing {}", name)))?;
        let number = raw
            .split('/')
            .next()
            .map(str::trim)
            .and_then(|n| n.parse::<f64>().ok())
            .ok_or_else(|| unparsable(format!("{} '{}' is not a number", name, raw)))?;
        check_score(name, number)
    };

    let winner = field("WINNER").ok_or_else(|| unparsable("no decision block found"))?;

    let mut improvements = Vec::new();
    let mut in_improvements = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.to_ascii_uppercase().starts_with("IMPROVEMENTS:") {
            in_improvements = true;
            continue;
        }
        if in_improvements {
            if let Some(item) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
                improvements.push(item.trim().to_string());
            } else if !trimmed.is_empty() {
                break;
            }
        }
    }

    Ok(JudgeBlock {
        winner: parse_winner(&winner)?,
        score_a: score("SCORE_A")?,
        score_b: score("SCORE_B")?,
        confidence: parse_confidence(field("CONFIDENCE").as_deref()),
        rationale: field("RATIONALE").unwrap_or_default(),
        improvements,
    })
}

/// Parse the judge's decision block.
///
/// Accepts a JSON object (fenced or bare) with `winner`, `score_a`,
/// `score_b`, `confidence`, `rationale` and `improvements`, or the same
/// fields as `KEY: value` lines with `- item` lines under `IMPROVEMENTS:`.
pub fn parse_judge(text: &str) -> Result<JudgeBlock, EngineError> {
    if let Some(value) = find_json_block(text) {
        return from_json(&value);
    }
    from_lines(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(score_b: f64, improvements: Vec<&str>) -> JudgeBlock {
        JudgeBlock {
            winner: Winner::B,
            score_a: 6.0,
            score_b,
            confidence: Confidence::High,
            rationale: "Variant is clearer. It misses one edge case.".to_string(),
            improvements: improvements.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn test_decision_mapping() {
        let t = Thresholds::default();
        assert_eq!(t.decide(9.0), Decision::Merge);
        assert_eq!(t.decide(8.5), Decision::Merge);
        assert_eq!(t.decide(7.0), Decision::Suggest);
        assert_eq!(t.decide(6.0), Decision::Suggest);
        assert_eq!(t.decide(4.0), Decision::Reject);
    }

    #[test]
    fn test_suggest_always_has_improvement() {
        let verdict = EvaluationVerdict::from_judge(block(7.0, vec![]), Thresholds::default());
        assert_eq!(verdict.decision, Decision::Suggest);
        assert_eq!(verdict.improvements.len(), 1);
        assert!(verdict.improvements[0].contains("Variant is clearer"));
    }

    #[test]
    fn test_improvements_dropped_outside_suggest() {
        let merge = EvaluationVerdict::from_judge(block(9.0, vec!["x"]), Thresholds::default());
        assert!(merge.improvements.is_empty());
        let reject = EvaluationVerdict::from_judge(block(4.0, vec!["x"]), Thresholds::default());
        assert!(reject.improvements.is_empty());
    }

    #[test]
    fn test_unparsable_fails_closed() {
        let verdict = EvaluationVerdict::unparsable("no block", Thresholds::default());
        assert_eq!(verdict.decision, Decision::Reject);
        assert_eq!(verdict.confidence, Confidence::Low);
        assert!(!verdict.judge_parsed);
    }

    #[test]
    fn test_leniency_lowers_thresholds_with_cap() {
        let config = EvaluationConfig::default();
        let policy = LeniencyPolicy {
            per_cycle: 0.5,
            max_adjustment: 1.0,
            prior_suggest_cycles: 5,
        };
        let t = Thresholds::resolve(&config, Some(&policy));
        assert_eq!(t.adjustment, 1.0);
        assert_eq!(t.merge, 7.5);
        assert_eq!(t.suggest, 5.0);
        assert_eq!(t.decide(8.0), Decision::Merge);
    }

    #[test]
    fn test_no_leniency_by_default() {
        let t = Thresholds::resolve(&EvaluationConfig::default(), None);
        assert_eq!(t.adjustment, 0.0);
        assert_eq!(t.decide(8.4), Decision::Suggest);
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = r#"Here is my assessment.

```json
{"winner": "B", "score_a": 6.5, "score_b": 8.0, "confidence": "medium",
 "rationale": "B handles the edge case.", "improvements": ["Shorten the intro"]}
```
"#;
        let parsed = parse_judge(text).unwrap();
        assert_eq!(parsed.winner, Winner::B);
        assert_eq!(parsed.score_b, 8.0);
        assert_eq!(parsed.confidence, Confidence::Medium);
        assert_eq!(parsed.improvements, vec!["Shorten the intro"]);
    }

    #[test]
    fn test_parse_bare_json_with_string_scores() {
        let text = r#"Verdict: {"winner": "tie", "score_a": "7", "score_b": "7.0", "rationale": "Equal."}"#;
        let parsed = parse_judge(text).unwrap();
        assert_eq!(parsed.winner, Winner::Tie);
        assert_eq!(parsed.score_a, 7.0);
        assert_eq!(parsed.confidence, Confidence::Low);
    }

    #[test]
    fn test_unknown_confidence_is_low() {
        let text = r#"{"winner": "B", "score_a": 5, "score_b": 9, "confidence": "certain"}"#;
        assert_eq!(parse_judge(text).unwrap().confidence, Confidence::Low);
    }

    #[test]
    fn test_parse_skips_fenced_example_without_scores() {
        let text = r#"The rubric expects answers like:

```json
{"answer": "42", "format": "short"}
```

My decision:

```json
{"winner": "B", "score_a": 6, "score_b": 8.8, "confidence": "high", "rationale": "B is tighter."}
```
"#;
        let parsed = parse_judge(text).unwrap();
        assert_eq!(parsed.winner, Winner::B);
        assert_eq!(parsed.score_b, 8.8);
        assert_eq!(parsed.confidence, Confidence::High);
    }

    #[test]
    fn test_line_format_reuses_compiled_patterns() {
        let first = "WINNER: B\nSCORE_A: 4\nSCORE_B: 7\nRATIONALE: Better.";
        let second = "**WINNER**: tie\nSCORE_A: 5\nSCORE_B: 5\nCONFIDENCE: medium";
        assert_eq!(parse_judge(first).unwrap().score_b, 7.0);
        let parsed = parse_judge(second).unwrap();
        assert_eq!(parsed.winner, Winner::Tie);
        assert_eq!(parsed.confidence, Confidence::Medium);
        assert_eq!(field_patterns().len(), JUDGE_FIELDS.len());
    }

    #[test]
    fn test_parse_line_format() {
        let text = "WINNER: A\nSCORE_A: 8/10\nSCORE_B: 5.5\nCONFIDENCE: high\n\
                    RATIONALE: Baseline is more precise.\nIMPROVEMENTS:\n- Keep the examples\n- Drop the preamble\n";
        let parsed = parse_judge(text).unwrap();
        assert_eq!(parsed.winner, Winner::A);
        assert_eq!(parsed.score_a, 8.0);
        assert_eq!(parsed.score_b, 5.5);
        assert_eq!(parsed.confidence, Confidence::High);
        assert_eq!(parsed.improvements.len(), 2);
    }

    #[test]
    fn test_parse_rejects_out_of_range_scores() {
        let text = r#"{"winner": "B", "score_a": 5, "score_b": 42}"#;
        assert!(matches!(
            parse_judge(text),
            Err(EngineError::JudgeUnparsable(_))
        ));
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_judge("B is better, probably an 8.").is_err());
    }

    #[test]
    fn test_incomplete_fails_closed() {
        let verdict = EvaluationVerdict::incomplete("variant.md omitted", Thresholds::default());
        assert_eq!(verdict.decision, Decision::Reject);
        assert_eq!(verdict.confidence, Confidence::Low);
        assert!(verdict.rationale.contains("variant.md omitted"));
        assert!(!verdict.judge_parsed);
    }

    #[test]
    fn test_flag_budget_cuts_names_refs() {
        let mut verdict = EvaluationVerdict::from_judge(block(9.0, vec![]), Thresholds::default());
        verdict.flag_budget_cuts(vec!["ctx/big.md".to_string()], vec!["rubric.md".to_string()]);
        assert!(verdict.rationale.contains("ctx/big.md did not fit"));
        assert!(verdict.rationale.contains("rubric.md was truncated"));
        assert_eq!(verdict.skipped_refs, vec!["ctx/big.md"]);
        assert_eq!(verdict.truncated_refs, vec!["rubric.md"]);

        let mut clean = EvaluationVerdict::from_judge(block(9.0, vec![]), Thresholds::default());
        clean.flag_budget_cuts(Vec::new(), Vec::new());
        assert!(!clean.rationale.contains("Note:"));
    }

    #[test]
    fn test_flag_degraded_names_refs() {
        let mut verdict = EvaluationVerdict::from_judge(block(9.0, vec![]), Thresholds::default());
        verdict.flag_degraded(vec!["prompts/variant.md".to_string()]);
        assert!(verdict.rationale.contains("prompts/variant.md"));
        assert_eq!(verdict.degraded_refs, vec!["prompts/variant.md"]);
    }
}
