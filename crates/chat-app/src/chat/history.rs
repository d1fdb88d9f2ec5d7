//! Completion request assembly from conversation history.

use gigi_llm::{ProviderMessage, Role};

use super::message::{AttachedFileRef, RawMessage, Sender};

/// Reply used when the provider answers with nothing visible.
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't process that request.";

/// Prior turns eligible for the request, oldest first, limited to the last `window`.
///
/// Streaming placeholders and empty bot messages carry nothing the model should see.
pub fn history_messages(prior: &[RawMessage], window: usize) -> Vec<ProviderMessage> {
    let eligible: Vec<&RawMessage> = prior
        .iter()
        .filter(|message| !message.is_streaming)
        .filter(|message| message.sender == Sender::User || !message.text.is_empty())
        .collect();
    let skip = eligible.len().saturating_sub(window);

    eligible
        .into_iter()
        .skip(skip)
        .map(|message| {
            let role = match message.sender {
                Sender::User => Role::User,
                Sender::Bot => Role::Assistant,
            };
            ProviderMessage::new(role, message.text.clone())
        })
        .collect()
}

/// Text sent for the new prompt. Only attachment metadata travels with it.
pub fn user_content(content: &str, attached_file: Option<&AttachedFileRef>) -> String {
    match attached_file {
        Some(file) => format!(
            "Attached file: {} ({})\n\n{content}",
            file.name, file.mime_type
        ),
        None => content.to_string(),
    }
}

/// Full message list for one request: windowed history, then the new user content.
pub fn request_messages(
    prior: &[RawMessage],
    window: usize,
    content: &str,
    attached_file: Option<&AttachedFileRef>,
) -> Vec<ProviderMessage> {
    let mut messages = history_messages(prior, window);
    messages.push(ProviderMessage::new(
        Role::User,
        user_content(content, attached_file),
    ));
    messages
}

/// Completion text to reveal, falling back when the provider returned only whitespace.
pub fn reply_text(completion: String) -> String {
    if completion.trim().is_empty() {
        FALLBACK_REPLY.to_string()
    } else {
        completion
    }
}
