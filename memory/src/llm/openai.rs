use async_openai::types::chat::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use mk_core::traits::LlmService;

/// Chat completions from an OpenAI-compatible endpoint.
pub struct OpenAILlmService {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
}

impl OpenAILlmService {
    pub fn new(api_key: String, model: String, base_url: Option<&str>) -> Self {
        let mut config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }

        Self {
            client: async_openai::Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl LlmService for OpenAILlmService {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    async fn generate(&self, system: &str, prompt: &str) -> Result<String, Self::Error> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| "Empty response from LLM".into())
    }
}
