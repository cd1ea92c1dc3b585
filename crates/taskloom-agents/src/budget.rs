use tracing::{debug, info, warn};

use crate::providers::{ChatMessage, ChatRole, ContentBlock, MessagePart};

/// Rough token estimate: ~4 characters per token for English text.
const CHARS_PER_TOKEN: usize = 4;

/// Use 80% of a model's advertised window; estimation is approximate.
const SAFETY_MARGIN: f64 = 0.8;

/// Tokens held back for the model's reply and message framing.
const RESERVED_REPLY_TOKENS: usize = 1000;

/// Context-window size for a model, looked up by name substring.
fn context_limit_for_model(model: &str) -> usize {
    let model = model.to_ascii_lowercase();
    if model.contains("gemini") {
        1_000_000
    } else if model.contains("llama") || model.contains("groq") {
        128_000
    } else if model.contains("gpt") {
        128_000
    } else {
        warn!("unknown model '{model}', using conservative 100k token limit");
        100_000
    }
}

pub fn estimate_text_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Per-message estimate: content plus a small framing overhead.
pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    let content = match &message.content {
        MessagePart::Text(t) => t.len(),
        MessagePart::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentBlock::Text { text } => text.len(),
                ContentBlock::ToolUse { input, .. } => input.to_string().len(),
                ContentBlock::ToolResult { content, .. } => content.len(),
            })
            .sum(),
    };
    content / CHARS_PER_TOKEN + 4
}

fn estimate_history_tokens(history: &[ChatMessage]) -> usize {
    history.iter().map(estimate_message_tokens).sum()
}

/// Keeps prompts under a provider's context window by truncating history.
///
/// This is advisory overflow prevention, not exact counting: the budget is the
/// model limit scaled by the safety margin, and all sizes are estimates.
pub struct TokenBudgetGuard {
    budget: usize,
    model: String,
}

impl TokenBudgetGuard {
    pub fn for_model(model: &str) -> Self {
        let limit = context_limit_for_model(model);
        let budget = (limit as f64 * SAFETY_MARGIN) as usize;
        info!("token budget for {model}: {budget} tokens");
        Self {
            budget,
            model: model.to_string(),
        }
    }

    #[cfg(test)]
    fn with_budget(budget: usize) -> Self {
        Self {
            budget,
            model: "test".to_string(),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Check estimated prompt size and truncate history if it would overflow.
    ///
    /// History is dropped oldest-first; the most recent turns that fit within
    /// the remaining budget are kept. When anything was dropped, a synthetic
    /// system turn noting the truncation is prepended.
    pub fn check_and_compress(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        current_message: &str,
    ) -> (Vec<ChatMessage>, bool) {
        let system_tokens = estimate_text_tokens(system_prompt);
        let history_tokens = estimate_history_tokens(history);
        let current_tokens = estimate_text_tokens(current_message);
        let total = system_tokens + history_tokens + current_tokens;

        debug!(
            "estimated tokens: system={system_tokens} history={history_tokens} \
             current={current_tokens} total={total} budget={}",
            self.budget
        );

        if total <= self.budget {
            return (history.to_vec(), false);
        }

        warn!(
            "token budget exceeded for {} ({total} > {}), compressing history",
            self.model, self.budget
        );

        let target = self
            .budget
            .saturating_sub(system_tokens + current_tokens + RESERVED_REPLY_TOKENS);

        let mut kept: Vec<ChatMessage> = Vec::new();
        let mut kept_tokens = 0usize;
        for message in history.iter().rev() {
            let tokens = estimate_message_tokens(message);
            if kept_tokens + tokens > target {
                break;
            }
            kept.push(message.clone());
            kept_tokens += tokens;
        }
        kept.reverse();

        let kept_count = kept.len();
        let dropped = history.len() - kept_count;
        if dropped > 0 {
            kept.insert(
                0,
                ChatMessage::text(
                    ChatRole::System,
                    format!("[conversation history truncated: {dropped} older messages dropped]"),
                ),
            );
        }

        info!(
            "compressed history from {history_tokens} to {kept_tokens} estimated tokens \
             (kept {kept_count}/{} messages)",
            history.len()
        );

        (kept, true)
    }
}
