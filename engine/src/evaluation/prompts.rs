//! Prompt text for candidate threads and the judge

use crate::context::LoadedContent;

/// Context block shared verbatim by both candidate threads
pub fn context_block(context: &[LoadedContent]) -> String {
    if context.is_empty() {
        return String::new();
    }
    let mut block = String::from("Reference material:\n");
    for item in context {
        block.push_str(&format!("\n--- context: {} ---\n", item.reference));
        block.push_str(&item.render());
        block.push('\n');
    }
    block
}

/// User message for one scenario. Identical for thread A and thread B.
pub fn scenario_message(context_block: &str, scenario: &str) -> String {
    if context_block.is_empty() {
        format!("Task:\n{}", scenario.trim())
    } else {
        format!("{}\nTask:\n{}", context_block, scenario.trim())
    }
}

pub fn judge_system() -> String {
    r#"You are an impartial judge comparing two prompt candidates.
Candidate A is the current baseline. Candidate B is the proposed variant.
Both were run on the same scenarios with the same context.

Score each candidate from 0 to 10 against the rubric. Judge only the outputs
shown; do not reward length. Then respond with exactly one fenced JSON block:

```json
{
  "winner": "A" | "B" | "tie",
  "score_a": <number 0-10>,
  "score_b": <number 0-10>,
  "confidence": "high" | "medium" | "low",
  "rationale": "<two or three sentences>",
  "improvements": ["<concrete change to candidate B>", "..."]
}
```"#
        .to_string()
}

/// One scenario with both candidates' outputs
pub struct ScenarioPair<'a> {
    pub scenario: &'a str,
    pub output_a: &'a str,
    pub output_b: &'a str,
}

pub fn judge_message(rubric: &str, pairs: &[ScenarioPair<'_>]) -> String {
    let mut message = format!("Rubric:\n{}\n", rubric.trim());
    for (i, pair) in pairs.iter().enumerate() {
        message.push_str(&format!(
            "\n=== Scenario {} ===\n{}\n\n--- Candidate A output ---\n{}\n\n--- Candidate B output ---\n{}\n",
            i + 1,
            pair.scenario.trim(),
            pair.output_a.trim(),
            pair.output_b.trim()
        ));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_judge_message_lists_every_scenario() {
        let pairs = vec![
            ScenarioPair {
                scenario: "Summarize",
                output_a: "short",
                output_b: "shorter",
            },
            ScenarioPair {
                scenario: "Translate",
                output_a: "hola",
                output_b: "bonjour",
            },
        ];
        let message = judge_message("Be concise", &pairs);
        assert!(message.starts_with("Rubric:\nBe concise"));
        assert!(message.contains("=== Scenario 2 ===\nTranslate"));
        assert!(message.contains("--- Candidate B output ---\nbonjour"));
    }

    #[test]
    fn test_scenario_message_without_context() {
        assert_eq!(scenario_message("", " Do it \n"), "Task:\nDo it");
    }
}
