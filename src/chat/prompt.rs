//! Grounding prompt assembly

use crate::llm::{ChatMessage, Role};
use crate::retrieval::RankedResult;

/// Rendering of every result for the `chunks` event
pub fn render_results(results: &[RankedResult]) -> String {
    let mut out = String::new();
    for result in results {
        let chunk = &result.chunk;
        out.push_str(&format!(
            "## {} (from: {}/{}/{}, type: {}, score: {:.3}):\n{}\n\n",
            result.rank,
            chunk.knowledge_base_id,
            chunk.category,
            chunk.file_name,
            chunk.data_type,
            result.relevance_score,
            chunk.text
        ));
    }
    out
}

/// Grounding block built from the passages that cleared the threshold
pub fn render_context(passages: &[&RankedResult]) -> String {
    let mut out = String::new();
    for (i, result) in passages.iter().enumerate() {
        let chunk = &result.chunk;
        out.push_str(&format!(
            "## {} (from: {}/{}/{}, type: {}):\n{}\n\n",
            i + 1,
            chunk.knowledge_base_id,
            chunk.category,
            chunk.file_name,
            chunk.data_type,
            chunk.text
        ));
    }
    out
}

/// Full message list sent to the completion service: the system
/// instruction, the tail of the conversation history, then the grounded
/// user turn
pub fn build_messages(
    system_prompt: &str,
    history: &[ChatMessage],
    history_turns: usize,
    passages: &[&RankedResult],
    query: &str,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];

    let prior: Vec<&ChatMessage> = history.iter().filter(|m| m.role != Role::System).collect();
    let start = prior.len().saturating_sub(history_turns);
    messages.extend(prior[start..].iter().map(|m| (*m).clone()));

    let context = render_context(passages);
    let user_turn = if context.is_empty() {
        query.to_string()
    } else {
        format!(
            "Please refer to the following content:\n{}\nUser question: {}",
            context, query
        )
    };
    messages.push(ChatMessage::user(user_turn));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{Chunk, DataType};
    use crate::retrieval::ScoreSource;

    fn result(file: &str, text: &str, score: f32, rank: usize) -> RankedResult {
        RankedResult {
            chunk: Chunk::new(text.to_string(), 0, "kb1", "biology", file, DataType::Unstructured),
            relevance_score: score,
            rank,
            scored_by: ScoreSource::Rerank,
        }
    }

    #[test]
    fn test_render_results() {
        let rendered = render_results(&[result("cells.md", "Cells divide.", 0.75, 1)]);
        assert_eq!(
            rendered,
            "## 1 (from: kb1/biology/cells.md, type: unstructured, score: 0.750):\nCells divide.\n\n"
        );
    }

    #[test]
    fn test_grounded_user_turn() {
        let a = result("a.md", "Alpha", 0.9, 1);
        let b = result("b.md", "Beta", 0.8, 2);
        let messages = build_messages("sys", &[], 5, &[&a, &b], "Why?");

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::system("sys"));
        let user = &messages[1].content;
        assert!(user.starts_with(
            "Please refer to the following content:\n## 1 (from: kb1/biology/a.md"
        ));
        assert!(user.contains("## 2 (from: kb1/biology/b.md, type: unstructured):\nBeta"));
        assert!(user.ends_with("User question: Why?"));
    }

    #[test]
    fn test_ungrounded_user_turn() {
        let messages = build_messages("sys", &[], 5, &[], "Why?");
        assert_eq!(messages[1], ChatMessage::user("Why?"));
    }

    #[test]
    fn test_history_is_truncated() {
        let history: Vec<ChatMessage> = (0..8)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("q{}", i))
                } else {
                    ChatMessage::assistant(format!("a{}", i))
                }
            })
            .collect();
        let messages = build_messages("sys", &history, 5, &[], "now");

        assert_eq!(messages.len(), 7);
        assert_eq!(messages[1].content, "a3");
        assert_eq!(messages[5].content, "a7");
        assert_eq!(messages[6].content, "now");
    }
}
