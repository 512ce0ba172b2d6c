use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::GenerationRequest;

const FALLBACK_SUBJECT: &str = "a high quality illustration";
const RESOLUTION_SUFFIX: &str = "4k resolution";

#[async_trait]
pub trait PromptGenerator: Send + Sync {
    async fn generate_prompt(&self, instructions: &str, cancel: &CancellationToken) -> Result<String>;
}

#[derive(Clone, Default)]
pub struct PromptCompositor {
    generator: Option<Arc<dyn PromptGenerator>>,
}

/// `None` for absent values and the `-` placeholder.
fn present(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty() && trimmed != "-").then_some(trimmed)
}

impl PromptCompositor {
    pub fn new(generator: Option<Arc<dyn PromptGenerator>>) -> Self {
        Self { generator }
    }

    /// Never returns an empty string.
    pub async fn compose(&self, request: &GenerationRequest, cancel: &CancellationToken) -> String {
        if let Some(generator) = &self.generator {
            match generator.generate_prompt(&Self::instructions(request), cancel).await {
                Ok(prompt) if !prompt.trim().is_empty() => return prompt,
                Ok(_) => tracing::warn!("prompt generator returned an empty prompt, composing locally"),
                Err(err) => tracing::warn!(error = %err, "prompt generation failed, composing locally"),
            }
        }
        Self::local_prompt(request)
    }

    pub fn instructions(request: &GenerationRequest) -> String {
        format!(
            "Generate a prompt for text-to-image generation, with the following information:\n\
             - description: {}\n\
             - style: {}\n\
             - colorScheme: {}\n\
             - text: {}\n\
             - textStyle: {}\n\
             - layout: {}\n\
             - theme: {}\n\
             - additionalElements: {}\n\n\
             If a value is empty or is \"-\", just skip it.\n\
             If the description is related to human-render, add an additional instruction to prevent abnormalities render.\n\
             Must in 4k resolution.\n\
             Respond a JSON only with the following format:\n\
             - \"prompt\": \"<generated prompt>\"",
            request.description,
            request.style,
            request.color_scheme,
            request.text,
            request.text_style,
            request.layout,
            request.theme,
            request.additional_elements,
        )
    }

    pub fn local_prompt(request: &GenerationRequest) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.push(present(&request.description).unwrap_or(FALLBACK_SUBJECT).to_string());
        if let Some(style) = present(&request.style) {
            parts.push(format!("{style} style"));
        }
        if let Some(colors) = present(&request.color_scheme) {
            parts.push(format!("{colors} color scheme"));
        }
        match (present(&request.text), present(&request.text_style)) {
            (Some(text), Some(text_style)) => parts.push(format!("with the text \"{text}\" in {text_style} lettering")),
            (Some(text), None) => parts.push(format!("with the text \"{text}\"")),
            _ => {}
        }
        if let Some(layout) = present(&request.layout) {
            parts.push(format!("{layout} layout"));
        }
        if let Some(theme) = present(&request.theme) {
            parts.push(format!("{theme} theme"));
        }
        if let Some(extra) = present(&request.additional_elements) {
            parts.push(format!("including {extra}"));
        }
        parts.push(RESOLUTION_SUFFIX.to_string());
        parts.join(", ")
    }
}
