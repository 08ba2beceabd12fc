//! Grounding prompt assembly (spec §4.7, §6): a pure function of
//! `(snapshot, systemPrompt, question)` — identical inputs yield
//! byte-identical messages (spec §8, I-prompt-determinism).

use ts_context::ContextEntry;

/// The canonical system prompt template, used when no per-query override
/// and no feed-level `system_prompt` is set. Byte-exact per spec §6.
fn canonical_system_prompt(feed_name: &str) -> String {
    format!(
        "You are an AI assistant analyzing real-time streaming data from feed \"{feed_name}\".\n\
         Answer questions based ONLY on the provided JSON data context. Be concise and accurate.\n\
         If the data doesn't contain information to answer the question, say so clearly."
    )
}

/// `systemPromptOverride` if non-empty, else the feed's configured
/// `system_prompt` if set, else the canonical template.
pub fn build_system_prompt(
    feed_name: &str,
    override_prompt: Option<&str>,
    feed_system_prompt: Option<&str>,
) -> String {
    if let Some(p) = override_prompt {
        if !p.is_empty() {
            return p.to_owned();
        }
    }
    if let Some(p) = feed_system_prompt {
        if !p.is_empty() {
            return p.to_owned();
        }
    }
    canonical_system_prompt(feed_name)
}

/// Renders the snapshot (already newest-first) as indented JSON and
/// assembles the canonical user message template, byte-exact per spec §6.
pub fn build_user_prompt(snapshot: &[ContextEntry], question: &str) -> String {
    let values: Vec<&serde_json::Value> = snapshot.iter().map(|e| &e.data).collect();
    let context_json = serde_json::to_string_pretty(&values).unwrap_or_else(|_| "[]".to_owned());
    format!("Here is the recent streaming data (newest first):\n\n{context_json}\n\nQuestion: {question}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn override_takes_precedence_over_feed_prompt_and_canonical() {
        let prompt = build_system_prompt("Ticks", Some("custom"), Some("feed-level"));
        assert_eq!(prompt, "custom");
    }

    #[test]
    fn empty_override_falls_through_to_feed_prompt() {
        let prompt = build_system_prompt("Ticks", Some(""), Some("feed-level"));
        assert_eq!(prompt, "feed-level");
    }

    #[test]
    fn no_override_or_feed_prompt_uses_canonical_template() {
        let prompt = build_system_prompt("Ticks", None, None);
        assert!(prompt.contains("feed \"Ticks\""));
        assert!(prompt.contains("based ONLY on the provided JSON data context"));
    }

    #[test]
    fn user_prompt_contains_question_and_indented_json() {
        let snapshot = vec![ContextEntry {
            data: json!({ "price": 101.5, "_timestamp": "2026-01-01T00:00:00+00:00" }),
        }];
        let prompt = build_user_prompt(&snapshot, "What is the latest price?");
        assert!(prompt.starts_with("Here is the recent streaming data (newest first):\n\n"));
        assert!(prompt.contains("\"price\": 101.5"));
        assert!(prompt.ends_with("Question: What is the latest price?"));
    }

    #[test]
    fn same_inputs_produce_byte_identical_prompts() {
        let snapshot = vec![ContextEntry {
            data: json!({ "a": 1 }),
        }];
        let p1 = build_user_prompt(&snapshot, "q");
        let p2 = build_user_prompt(&snapshot, "q");
        assert_eq!(p1, p2);
    }
}
