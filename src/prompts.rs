use crate::gateway::PROMPT_LIMIT;
use crate::models::{ChatMessage, Summary};

pub struct Prompts;

impl Prompts {
    pub const PROVIDER_UNAVAILABLE: &'static str = "I'm having trouble reaching the AI provider right now. Please verify the server AI key and quota, then try again.";

    pub const CALL_SUMMARY: &'static str = r#"You are an AI assistant for a sales team. Analyze this call transcript and provide:
1. Key highlights (3-5 bullet points)
2. Customer sentiment (positive, negative, or neutral with brief explanation)
3. Suggested next steps (2-3 actionable items)

Format your response as JSON with these keys: highlights, sentiment, nextSteps

Transcript:
"#;

    pub const CUSTOMER_ASSISTANT: &'static str = "You are an AI assistant for a sales team member talking to a customer. Use the following context from previous calls with this customer to provide helpful insights and advice.";

    pub const CUSTOMER_ASSISTANT_CLOSING: &'static str = "Provide a helpful, concise response that uses the context from previous calls to give personalized advice.";
}

pub fn call_summary(transcript: &str) -> String {
    format!("{}{}", Prompts::CALL_SUMMARY, transcript)
}

fn customer_chat_text(summaries: &[Summary], history: &[ChatMessage], question: &str) -> String {
    let mut prompt = format!("{}\n\nPREVIOUS CALL SUMMARIES:\n", Prompts::CUSTOMER_ASSISTANT);
    if summaries.is_empty() {
        prompt.push_str("(none yet)\n");
    }
    for (i, summary) in summaries.iter().enumerate() {
        prompt.push_str(&format!("Call {} ({}):\n", i + 1, summary.created_at.date_naive()));
        prompt.push_str(&summary.content().to_text());
        prompt.push('\n');
    }

    prompt.push_str("\nRECENT CHAT HISTORY:\n");
    for message in history {
        prompt.push_str(&format!("{}: {}\n", message.speaker(), message.content));
    }

    prompt.push_str(&format!("\nUSER QUESTION: {}\n\n", question));
    prompt.push_str(Prompts::CUSTOMER_ASSISTANT_CLOSING);
    prompt
}

/// Full customer chat prompt: earlier call summaries, the running conversation and the
/// question. Oldest chat turns go first, then oldest summaries, until it fits `PROMPT_LIMIT`.
pub fn customer_chat_prompt(
    summaries: &[Summary],
    history: &[ChatMessage],
    question: &str,
) -> String {
    let (mut summaries, mut history) = (summaries, history);
    loop {
        let prompt = customer_chat_text(summaries, history, question);
        if prompt.chars().count() <= PROMPT_LIMIT {
            return prompt;
        }
        if let Some((_, newer)) = history.split_first() {
            history = newer;
        } else if let Some((_, newer)) = summaries.split_first() {
            summaries = newer;
        } else {
            // the question alone is over the limit
            return prompt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sqlx::types::Json;
    use uuid::Uuid;

    fn summary(at: chrono::DateTime<Utc>, highlight: &str) -> Summary {
        Summary {
            id: Uuid::new_v4(),
            call_id: Uuid::new_v4(),
            transcript_id: Uuid::new_v4(),
            highlights: Json(vec![highlight.to_string()]),
            sentiment: "positive".to_string(),
            next_steps: Json(vec!["send quote".to_string()]),
            raw_response: None,
            created_at: at,
        }
    }

    fn turn(customer_id: Uuid, content: String, is_from_user: bool) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            customer_id,
            employee_id: "emp".to_string(),
            content,
            is_from_user,
            created_at: Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn builds_customer_chat_prompt_in_order() {
        let customer_id = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let history = vec![
            turn(customer_id, "What did they want?".to_string(), true),
            turn(customer_id, "A quote.".to_string(), false),
        ];

        let prompt = customer_chat_prompt(&[summary(at, "asked about pricing")], &history, "Next?");
        assert!(prompt.contains("Call 1 (2024-03-01):\nHighlights:\n- asked about pricing"));
        let user_at = prompt.find("User: What did they want?").unwrap();
        let ai_at = prompt.find("AI: A quote.").unwrap();
        let question_at = prompt.find("USER QUESTION: Next?").unwrap();
        assert!(user_at < ai_at && ai_at < question_at);
        assert!(prompt.ends_with(Prompts::CUSTOMER_ASSISTANT_CLOSING));
    }

    #[test]
    fn long_history_never_crowds_out_the_question() {
        let customer_id = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let summaries: Vec<_> = (0..10).map(|i| summary(at, &"s".repeat(300 + i))).collect();
        let history: Vec<_> = (0..20)
            .map(|i| turn(customer_id, format!("{i:02}{}", "x".repeat(400)), i % 2 == 0))
            .collect();

        let prompt = customer_chat_prompt(&summaries, &history, "What should I offer them?");
        assert!(prompt.chars().count() <= PROMPT_LIMIT);
        assert!(prompt.contains("USER QUESTION: What should I offer them?"));
        assert!(prompt.ends_with(Prompts::CUSTOMER_ASSISTANT_CLOSING));
        // the newest turn is kept over the oldest
        assert!(prompt.contains("AI: 19x"));
        assert!(!prompt.contains("User: 00x"));

        let sent = crate::gateway::GenerationRequest {
            message: &prompt,
            ..Default::default()
        }
        .prompt();
        assert!(sent.contains("USER QUESTION: What should I offer them?"));
    }

    #[test]
    fn summary_prompt_ends_with_transcript() {
        assert!(call_summary("hello there").ends_with("Transcript:\nhello there"));
    }
}
