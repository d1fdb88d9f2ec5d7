use futures::StreamExt;
use rig::completion::{CompletionError, CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio_util::sync::CancellationToken;

use super::provider::{
    BoxFuture, CancelledSnafu, CompletionProvider, CompletionRequest, EmptyMessageSetSnafu,
    HttpClientSnafu, MissingApiKeySnafu, ProviderConfig, ProviderError, ProviderMessage,
    ProviderResult, Role,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::responses_api::streaming::StreamingCompletionResponse,
>;

pub struct RigProviderAdapter {
    config: ProviderConfig,
}

impl RigProviderAdapter {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config })
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.base_url.is_empty() {
            builder = builder.base_url(config.base_url.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn to_rig_message(message: &ProviderMessage) -> Option<RigMessage> {
        match message.role {
            Role::System => None,
            Role::User => Some(RigMessage::user(message.content.clone())),
            Role::Assistant => Some(RigMessage::assistant(message.content.clone())),
        }
    }

    fn merged_preamble(request: &CompletionRequest) -> Option<String> {
        let mut preamble_parts = Vec::new();

        if let Some(preamble) = &request.preamble
            && !preamble.trim().is_empty()
        {
            preamble_parts.push(preamble.clone());
        }

        // Rig takes a single preamble, so system-role turns are folded into it.
        for message in &request.messages {
            if matches!(message.role, Role::System) && !message.content.trim().is_empty() {
                preamble_parts.push(message.content.clone());
            }
        }

        if preamble_parts.is_empty() {
            None
        } else {
            Some(preamble_parts.join("\n\n"))
        }
    }

    fn map_completion_error(stage: &'static str, source: CompletionError) -> ProviderError {
        match source {
            CompletionError::ProviderError(message) => ProviderError::Api { stage, message },
            source => ProviderError::CompletionsFailed { stage, source },
        }
    }

    async fn open_stream(
        config: &ProviderConfig,
        request: &CompletionRequest,
    ) -> ProviderResult<RigStreamingResponse> {
        let client = Self::build_client(config)?;
        let model = client.completion_model(request.model_id.clone());

        let mut messages = request
            .messages
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        let Some(prompt) = messages.pop() else {
            tracing::warn!(
                model_id = %request.model_id,
                total_message_count = request.messages.len(),
                "cannot open stream because no user/assistant messages remain after filtering"
            );
            return EmptyMessageSetSnafu {
                stage: "open-stream-pop-prompt",
            }
            .fail();
        };
        let mut builder = model.completion_request(prompt).messages(messages);

        if let Some(preamble) = Self::merged_preamble(request) {
            builder = builder.preamble(preamble);
        }

        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        builder
            .stream()
            .await
            .map_err(|source| Self::map_completion_error("open-stream", source))
    }

    fn text_delta<R>(item: StreamedAssistantContent<R>) -> Option<String>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) => Some(text.text),
            // Reasoning and tool traffic never becomes part of the visible reply.
            _ => None,
        }
    }

    /// Streams the reply from the provider and folds it into one string.
    async fn run_completion(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<String> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return CancelledSnafu { stage: "open-stream" }.fail();
            }
            opened = Self::open_stream(&self.config, &request) => opened?,
        };

        let mut reply = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Stop upstream IO before reporting the cancellation.
                    tracing::debug!(model_id = %request.model_id, "provider stream cancelled");
                    stream.cancel();
                    return CancelledSnafu { stage: "read-stream" }.fail();
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            if let Some(text) = Self::text_delta(item) {
                                reply.push_str(&text);
                            }
                        }
                        Some(Err(source)) => {
                            tracing::warn!(
                                model_id = %request.model_id,
                                error = %source,
                                "provider stream emitted an error chunk"
                            );
                            return Err(Self::map_completion_error("stream-chunk", source));
                        }
                        None => break,
                    }
                }
            }
        }

        Ok(reply)
    }
}

impl CompletionProvider for RigProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Rig OpenAI"
    }

    fn default_model(&self) -> &str {
        DEFAULT_OPENAI_MODEL
    }

    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            ensure!(
                !request.messages.is_empty(),
                EmptyMessageSetSnafu {
                    stage: "complete",
                }
            );
            self.run_completion(request, cancel).await
        })
    }
}
