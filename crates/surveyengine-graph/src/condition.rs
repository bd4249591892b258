use surveyengine_core::domain::{Message, MessageRole};

use crate::oracle::Oracle;

fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| match m.role {
            MessageRole::Human => format!("用户回复:{}", m.content),
            MessageRole::Assistant => format!("AI提问:{}", m.content),
            MessageRole::System => m.content.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `evaluate(predicate_text, transcript) -> bool`. Queries the oracle with
/// a fixed Y/N instruction; on oracle failure, falls back to a literal
/// case-insensitive substring match of the predicate in the last HUMAN
/// reply — intentionally loose (flagged, not fixed, per the open question
/// this behavior inherits).
pub async fn evaluate(oracle: &dyn Oracle, predicate: &str, transcript: &[Message]) -> bool {
    let rendered = render_transcript(transcript);
    let prompt = format!(
        "判断条件: {predicate}\n对话记录:\n{rendered}\n请只回复 Y 或 N。"
    );

    match oracle.invoke(&[Message::human(prompt)]).await {
        Ok(reply) => {
            let lower = reply.to_lowercase();
            ["y", "yes", "true"].iter().any(|k| lower.contains(k))
        }
        Err(_) => {
            let last_human = transcript.iter().rev().find(|m| m.role == MessageRole::Human);
            match last_human {
                Some(m) => m.content.to_lowercase().contains(&predicate.to_lowercase()),
                None => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::MockOracle;

    #[tokio::test]
    async fn verdict_true_when_oracle_replies_y() {
        let oracle = MockOracle::new(vec!["Y".to_string()]);
        let transcript = vec![Message::human("I like tea")];
        assert!(evaluate(&oracle, "user prefers tea", &transcript).await);
    }

    #[tokio::test]
    async fn verdict_false_when_oracle_replies_n() {
        let oracle = MockOracle::new(vec!["N".to_string()]);
        let transcript = vec![Message::human("I like coffee")];
        assert!(!evaluate(&oracle, "user prefers tea", &transcript).await);
    }

    #[tokio::test]
    async fn same_inputs_against_a_deterministic_oracle_produce_the_same_verdict() {
        let oracle = MockOracle::with_default("Y");
        let transcript = vec![Message::human("I like tea")];
        let first = evaluate(&oracle, "user prefers tea", &transcript).await;
        let second = evaluate(&oracle, "user prefers tea", &transcript).await;
        assert_eq!(first, second);
    }
}
