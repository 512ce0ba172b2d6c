use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GenerationRequest {
    pub description: String,
    pub style: String,
    pub color_scheme: String,
    pub text: String,
    pub text_style: String,
    pub layout: String,
    pub theme: String,
    pub additional_elements: String,
    /// Target product tag (e.g. `t-shirt`, `mug`); drives provider sizing.
    pub product: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EditRequest {
    pub image: String,
    pub prompt: String,
    pub style: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    LlmImage,
    Diffusion,
    AsyncDiffusion,
}

impl Provider {
    pub const RESPONSE_ORDER: [Provider; 3] = [Self::Diffusion, Self::LlmImage, Self::AsyncDiffusion];

    pub fn service(self) -> &'static str {
        match self {
            Self::LlmImage => "openai",
            Self::Diffusion => "stable-diffusion",
            Self::AsyncDiffusion => "prodia",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::LlmImage => "DALL-E-3",
            Self::Diffusion => "Stable Diffusion",
            Self::AsyncDiffusion => "Prodia",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    TextToImage,
    EditImage,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextToImage => "text-to-image",
            Self::EditImage => "edit-image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderImage {
    pub image_url: String,
    pub model: String,
    pub configuration: String,
}

#[derive(Debug, Clone)]
pub struct ProviderOutcome {
    pub provider: Provider,
    pub kind: OperationKind,
    pub prompt: String,
    pub image_url: String,
    pub error: Option<String>,
    pub model: String,
    pub configuration: String,
}

impl ProviderOutcome {
    pub fn succeeded(provider: Provider, kind: OperationKind, prompt: &str, image: ProviderImage) -> Self {
        Self {
            provider,
            kind,
            prompt: prompt.to_string(),
            image_url: image.image_url,
            error: None,
            model: image.model,
            configuration: image.configuration,
        }
    }

    pub fn failed(provider: Provider, kind: OperationKind, prompt: &str, error: String) -> Self {
        Self {
            provider,
            kind,
            prompt: prompt.to_string(),
            image_url: String::new(),
            error: Some(error),
            model: String::new(),
            configuration: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.image_url.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub url: String,
    #[serde(rename = "type")]
    pub provider: String,
}

/// Aggregate returned to the caller. An empty `url` means that provider did
/// not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagesResponse {
    pub images: Vec<ImageEntry>,
}

impl ImagesResponse {
    pub fn from_outcomes(outcomes: &[ProviderOutcome]) -> Self {
        let images = Provider::RESPONSE_ORDER
            .iter()
            .map(|provider| {
                let url = outcomes
                    .iter()
                    .find(|outcome| outcome.provider == *provider)
                    .map(|outcome| outcome.image_url.clone())
                    .unwrap_or_default();
                ImageEntry {
                    url,
                    provider: provider.label().to_string(),
                }
            })
            .collect();
        Self { images }
    }

    pub fn url_for(&self, provider: Provider) -> Option<&str> {
        self.images
            .iter()
            .find(|entry| entry.provider == provider.label())
            .map(|entry| entry.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(provider: Provider, url: &str) -> ProviderOutcome {
        ProviderOutcome::succeeded(
            provider,
            OperationKind::TextToImage,
            "a cat",
            ProviderImage {
                image_url: url.to_string(),
                model: "m".to_string(),
                configuration: String::new(),
            },
        )
    }

    #[test]
    fn response_keeps_fixed_order() {
        let outcomes = vec![
            outcome(Provider::AsyncDiffusion, "http://h/img/3.jpeg"),
            outcome(Provider::LlmImage, "http://h/img/2.jpeg"),
            outcome(Provider::Diffusion, "http://h/img/1.jpeg"),
        ];
        let response = ImagesResponse::from_outcomes(&outcomes);
        let labels: Vec<_> = response.images.iter().map(|e| e.provider.as_str()).collect();
        assert_eq!(labels, ["Stable Diffusion", "DALL-E-3", "Prodia"]);
        assert_eq!(response.images[0].url, "http://h/img/1.jpeg");
        assert_eq!(response.images[2].url, "http://h/img/3.jpeg");
    }

    #[test]
    fn missing_providers_get_empty_slots() {
        let failed = ProviderOutcome::failed(
            Provider::Diffusion,
            OperationKind::EditImage,
            "p",
            "boom".to_string(),
        );
        let response = ImagesResponse::from_outcomes(&[failed]);
        assert_eq!(response.images.len(), 3);
        assert!(response.images.iter().all(|e| e.url.is_empty()));
    }

    #[test]
    fn generation_request_fields_are_camel_case() {
        let request: GenerationRequest = serde_json::from_value(serde_json::json!({
            "colorScheme": "pastel",
            "additionalElements": "stars",
        }))
        .unwrap();
        assert_eq!(request.color_scheme, "pastel");
        assert_eq!(request.additional_elements, "stars");
        assert!(request.product.is_empty());
    }
}
