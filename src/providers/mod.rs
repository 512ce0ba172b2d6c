pub(crate) mod http;
pub mod openai;
pub mod prodia;
pub mod stability;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{EditRequest, GenerationRequest, Provider, ProviderImage};

pub use openai::OpenAiProvider;
pub use prodia::ProdiaProvider;
pub use stability::StabilityProvider;

pub trait ImageProvider: Send + Sync {
    fn provider(&self) -> Provider;
}

#[async_trait]
pub trait TextToImage: ImageProvider {
    async fn text_to_image(
        &self,
        request: &GenerationRequest,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ProviderImage>;
}

#[async_trait]
pub trait EditImage: ImageProvider {
    async fn edit_image(&self, request: &EditRequest, cancel: &CancellationToken) -> Result<ProviderImage>;
}

pub(crate) fn lookup<T: Copy>(table: &[(&str, T)], key: &str, default: T) -> T {
    table
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map_or(default, |(_, value)| *value)
}

fn trimmed_base_url(base_url: Option<String>, default: &str) -> String {
    base_url
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}
