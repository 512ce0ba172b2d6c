use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{ImageProvider, TextToImage, http, lookup, trimmed_base_url};
use crate::error::{ProviderError, Result};
use crate::prompt::PromptGenerator;
use crate::storage::ImageStore;
use crate::types::{GenerationRequest, Provider, ProviderImage};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const IMAGE_MODEL: &str = "dall-e-3";
pub const CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const IMAGE_STYLE: &str = "vivid";
pub const DEFAULT_SIZE: &str = "1024x1024";

const CHAT_MAX_TOKENS: u32 = 150;
const CHAT_TEMPERATURE: f32 = 0.5;

const PRODUCT_SIZES: &[(&str, &str)] = &[
    ("t-shirt", "1792x1024"),
    ("tumbler", "1024x1024"),
    ("phone-case", "1024x1792"),
    ("hoodie", "1792x1024"),
    ("mug", "1024x1024"),
    ("tote-bag", "1792x1024"),
    ("pillow", "1024x1024"),
    ("poster", "1792x1024"),
    ("notebook", "1792x1024"),
    ("sticker", "1024x1024"),
];

/// DALL-E 3 only accepts three sizes; products map onto them.
pub fn size_for_product(product: &str) -> &'static str {
    lookup(PRODUCT_SIZES, product, DEFAULT_SIZE)
}

pub struct OpenAiProvider {
    client: Client,
    api_key: SecretString,
    base_url: String,
    images: ImageStore,
}

impl OpenAiProvider {
    pub fn new(client: Client, api_key: SecretString, base_url: Option<String>, images: ImageStore) -> Self {
        Self {
            client,
            api_key,
            base_url: trimmed_base_url(base_url, DEFAULT_BASE_URL),
            images,
        }
    }
}

#[derive(Serialize)]
struct ImageGenerationPayload<'a> {
    prompt: &'a str,
    model: &'a str,
    n: u32,
    response_format: &'a str,
    size: &'a str,
    style: &'a str,
}

#[derive(Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

#[derive(Serialize)]
struct ChatCompletionPayload<'a> {
    model: &'a str,
    messages: [ChatMessageOut<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessageOut<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageIn>,
}

#[derive(Deserialize)]
struct ChatMessageIn {
    content: Option<String>,
}

#[derive(Deserialize)]
struct GeneratedPrompt {
    prompt: String,
}

impl ImageProvider for OpenAiProvider {
    fn provider(&self) -> Provider {
        Provider::LlmImage
    }
}

#[async_trait]
impl TextToImage for OpenAiProvider {
    async fn text_to_image(
        &self,
        request: &GenerationRequest,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ProviderImage> {
        if prompt.trim().is_empty() {
            return Err(ProviderError::InvalidPayload("prompt is required".into()));
        }
        let payload = ImageGenerationPayload {
            prompt,
            model: IMAGE_MODEL,
            n: 1,
            response_format: "b64_json",
            size: size_for_product(&request.product),
            style: IMAGE_STYLE,
        };

        tracing::debug!(provider = %self.provider(), size = payload.size, "sending image generation request");

        let response = http::send(
            self.client
                .post(format!("{}/images/generations", self.base_url))
                .bearer_auth(self.api_key.expose_secret())
                .json(&payload),
            cancel,
        )
        .await?;
        let body: ImageGenerationResponse = http::read_json(response).await?;
        let encoded = body
            .data
            .into_iter()
            .find_map(|item| item.b64_json)
            .ok_or_else(|| ProviderError::Decode("response contained no b64_json image".into()))?;
        let bytes = http::decode_base64(&encoded)?;
        let image_url = self.images.save(&bytes).await?;

        Ok(ProviderImage {
            image_url,
            model: IMAGE_MODEL.to_string(),
            configuration: serde_json::to_string(&payload).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl PromptGenerator for OpenAiProvider {
    async fn generate_prompt(&self, instructions: &str, cancel: &CancellationToken) -> Result<String> {
        let payload = ChatCompletionPayload {
            model: CHAT_MODEL,
            messages: [ChatMessageOut {
                role: "user",
                content: instructions,
            }],
            max_tokens: CHAT_MAX_TOKENS,
            temperature: CHAT_TEMPERATURE,
        };
        let response = http::send(
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(self.api_key.expose_secret())
                .json(&payload),
            cancel,
        )
        .await?;
        let body: ChatCompletionResponse = http::read_json(response).await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or_else(|| ProviderError::Decode("chat completion returned no content".into()))?;

        let parsed: GeneratedPrompt = serde_json::from_str(content.trim())
            .map_err(|err| ProviderError::Decode(format!("prompt reply is not JSON: {err}")))?;
        Ok(parsed.prompt.trim().to_string())
    }
}
