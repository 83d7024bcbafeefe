use async_openai::types::embeddings::CreateEmbeddingRequestArgs;
use async_trait::async_trait;
use mk_core::traits::EmbeddingService;

/// Embeddings from an OpenAI-compatible endpoint.
pub struct OpenAIEmbeddingService {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    dimension: usize,
}

impl OpenAIEmbeddingService {
    pub fn new(api_key: String, model: &str, dimension: usize, base_url: Option<&str>) -> Self {
        let mut config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }

        Self {
            client: async_openai::Client::with_config(config),
            model: model.to_string(),
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingService for OpenAIEmbeddingService {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, Self::Error> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(text)
            .dimensions(self.dimension as u32)
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        Ok(response
            .data
            .into_iter()
            .next()
            .ok_or("No embedding returned")?
            .embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
