use super::*;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use std::time::Instant;

const SYSTEM_PROMPT: &str = "You are a project-idea generator for a party game where friends \
     pick their next side project together. You always respond with a single \
     valid JSON object and nothing else. Ideas are concrete, realistic for \
     the stated time budget, and varied in theme.";

/// OpenAI-backed idea generator
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        let client = Client::with_config(config);

        Self {
            client,
            model,
            timeout,
        }
    }

    async fn complete(&self, prompt: String) -> GenResult<String> {
        let start = Instant::now();

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .response_format(ResponseFormat::JsonObject)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_PROMPT)
                    .build()
                    .map_err(|e| GenError::ApiError(e.to_string()))?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()
                    .map_err(|e| GenError::ApiError(e.to_string()))?
                    .into(),
            ])
            .build()
            .map_err(|e| GenError::ApiError(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(chat_request))
            .await
            .map_err(|_| GenError::Timeout(self.timeout))?
            .map_err(|e| GenError::ApiError(e.to_string()))?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| GenError::ParseError("No content in response".to_string()))?;

        tracing::debug!(
            model = %self.model,
            latency_ms = start.elapsed().as_millis() as u64,
            tokens = ?response.usage.map(|u| u.total_tokens),
            "completion finished"
        );

        Ok(text)
    }
}

#[async_trait]
impl IdeaGenerator for OpenAiGenerator {
    async fn generate_ideas(&self, request: DeckRequest) -> GenResult<Vec<GeneratedIdea>> {
        let text = self.complete(deck_prompt(&request)).await?;
        parse_deck_response(&text)
    }

    async fn enrich_winner(&self, idea: &Idea) -> GenResult<WinnerDetails> {
        let text = self.complete(winner_prompt(idea)).await?;
        parse_winner_response(&text)
    }

    fn name(&self) -> &str {
        "openai"
    }
}
