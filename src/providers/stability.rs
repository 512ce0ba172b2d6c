use async_trait::async_trait;
use chrono::Utc;
use reqwest::{
    Client,
    multipart::{Form, Part},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{EditImage, ImageProvider, TextToImage, http, lookup, trimmed_base_url};
use crate::error::{ProviderError, Result};
use crate::storage::{ImageStore, random_seed};
use crate::types::{EditRequest, GenerationRequest, Provider, ProviderImage};

pub const DEFAULT_BASE_URL: &str = "https://api.stability.ai";
pub const MODEL_SD3_TURBO: &str = "sd3-turbo";
pub const EDIT_MODEL: &str = "inpaint";
pub const OUTPUT_FORMAT: &str = "jpeg";
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";

const GENERATE_PATH: &str = "/v2beta/stable-image/generate/sd3";
const INPAINT_PATH: &str = "/v2beta/stable-image/edit/inpaint";

const PRODUCT_ASPECT_RATIOS: &[(&str, &str)] = &[
    ("t-shirt", "4:5"),
    ("tumbler", "1:1"),
    ("phone-case", "9:16"),
    ("hoodie", "4:5"),
    ("mug", "1:1"),
    ("tote-bag", "4:5"),
    ("pillow", "1:1"),
    ("poster", "2:3"),
    ("notebook", "3:2"),
    ("sticker", "1:1"),
];

pub fn aspect_ratio_for_product(product: &str) -> &'static str {
    lookup(PRODUCT_ASPECT_RATIOS, product, DEFAULT_ASPECT_RATIO)
}

/// Form fields of an SD3 text-to-image call, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TextToImageForm<'a> {
    prompt: &'a str,
    model: &'a str,
    aspect_ratio: &'a str,
    seed: u32,
    output_format: &'a str,
}

impl TextToImageForm<'_> {
    const MODE: &'static str = "text-to-image";

    fn fields(&self) -> [(&'static str, String); 6] {
        [
            ("prompt", self.prompt.to_string()),
            ("mode", Self::MODE.to_string()),
            ("model", self.model.to_string()),
            ("aspect_ratio", self.aspect_ratio.to_string()),
            ("seed", self.seed.to_string()),
            ("output_format", self.output_format.to_string()),
        ]
    }

    fn into_form(self) -> Form {
        self.fields()
            .into_iter()
            .fold(Form::new(), |form, (key, value)| form.text(key, value))
    }

    fn configuration(&self) -> String {
        self.fields()
            .iter()
            .filter(|(key, _)| *key != "prompt")
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

struct InpaintForm<'a> {
    image: Vec<u8>,
    prompt: &'a str,
    output_format: &'a str,
}

impl InpaintForm<'_> {
    fn fields(&self) -> [(&'static str, String); 2] {
        [
            ("prompt", self.prompt.to_string()),
            ("output_format", self.output_format.to_string()),
        ]
    }

    fn into_form(self) -> Result<Form> {
        let mime = http::sniff_image_mime(&self.image);
        let fields = self.fields();
        let image = Part::bytes(self.image)
            .file_name(Utc::now().timestamp().to_string())
            .mime_str(mime)?;
        Ok(fields
            .into_iter()
            .fold(Form::new().part("image", image), |form, (key, value)| {
                form.text(key, value)
            }))
    }
}

#[derive(Deserialize)]
struct GenerationResponse {
    image: Option<String>,
    finish_reason: Option<String>,
}

pub struct StabilityProvider {
    client: Client,
    api_key: SecretString,
    base_url: String,
    images: ImageStore,
}

impl StabilityProvider {
    pub fn new(client: Client, api_key: SecretString, base_url: Option<String>, images: ImageStore) -> Self {
        Self {
            client,
            api_key,
            base_url: trimmed_base_url(base_url, DEFAULT_BASE_URL),
            images,
        }
    }

    async fn submit(&self, path: &str, form: Form, cancel: &CancellationToken) -> Result<String> {
        let response = http::send(
            self.client
                .post(format!("{}{path}", self.base_url))
                .bearer_auth(self.api_key.expose_secret())
                .header(reqwest::header::ACCEPT, "application/json")
                .multipart(form),
            cancel,
        )
        .await?;
        let body: GenerationResponse = http::read_json(response).await?;
        if let Some(reason) = body.finish_reason.as_deref() {
            tracing::debug!(provider = %self.provider(), finish_reason = reason, "generation finished");
        }
        let encoded = body
            .image
            .ok_or_else(|| ProviderError::Decode("response contained no image".into()))?;
        let bytes = http::decode_base64(&encoded)?;
        Ok(self.images.save(&bytes).await?)
    }
}

impl ImageProvider for StabilityProvider {
    fn provider(&self) -> Provider {
        Provider::Diffusion
    }
}

#[async_trait]
impl TextToImage for StabilityProvider {
    async fn text_to_image(
        &self,
        request: &GenerationRequest,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ProviderImage> {
        let aspect_ratio = aspect_ratio_for_product(&request.product);
        if prompt.trim().is_empty() || aspect_ratio.is_empty() {
            return Err(ProviderError::InvalidPayload(
                "prompt and aspect ratio are required".into(),
            ));
        }
        let form = TextToImageForm {
            prompt,
            model: MODEL_SD3_TURBO,
            aspect_ratio,
            seed: random_seed(),
            output_format: OUTPUT_FORMAT,
        };
        let configuration = form.configuration();

        tracing::debug!(provider = %self.provider(), aspect_ratio, "sending text-to-image request");
        let image_url = self.submit(GENERATE_PATH, form.into_form(), cancel).await?;

        Ok(ProviderImage {
            image_url,
            model: MODEL_SD3_TURBO.to_string(),
            configuration,
        })
    }
}

#[async_trait]
impl EditImage for StabilityProvider {
    async fn edit_image(&self, request: &EditRequest, cancel: &CancellationToken) -> Result<ProviderImage> {
        if request.image.trim().is_empty() || request.prompt.trim().is_empty() {
            return Err(ProviderError::InvalidPayload("image and prompt are required".into()));
        }
        let image = http::decode_base64(&request.image)
            .map_err(|err| ProviderError::InvalidPayload(err.to_string()))?;
        let form = InpaintForm {
            image,
            prompt: &request.prompt,
            output_format: OUTPUT_FORMAT,
        };

        tracing::debug!(provider = %self.provider(), "sending inpaint request");
        let image_url = self.submit(INPAINT_PATH, form.into_form()?, cancel).await?;

        Ok(ProviderImage {
            image_url,
            model: EDIT_MODEL.to_string(),
            configuration: format!("output_format={OUTPUT_FORMAT}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, dir: &std::path::Path) -> StabilityProvider {
        StabilityProvider::new(
            Client::new(),
            SecretString::from("sk-stability".to_owned()),
            Some(format!("{}/", server.uri())),
            ImageStore::new(dir.to_path_buf(), "http://gateway.test".into()),
        )
    }

    #[test]
    fn aspect_ratios() {
        assert_eq!(aspect_ratio_for_product("t-shirt"), "4:5");
        assert_eq!(aspect_ratio_for_product("phone-case"), "9:16");
        assert_eq!(aspect_ratio_for_product("poster"), "2:3");
        assert_eq!(aspect_ratio_for_product("notebook"), "3:2");
        assert_eq!(aspect_ratio_for_product("sticker"), "1:1");
        assert_eq!(aspect_ratio_for_product("skateboard"), DEFAULT_ASPECT_RATIO);
    }

    #[test]
    fn form_fields_are_declared_in_wire_order() {
        let form = TextToImageForm {
            prompt: "a fox",
            model: MODEL_SD3_TURBO,
            aspect_ratio: "4:5",
            seed: 42,
            output_format: OUTPUT_FORMAT,
        };
        let keys: Vec<_> = form.fields().iter().map(|(key, _)| *key).collect();
        assert_eq!(keys, ["prompt", "mode", "model", "aspect_ratio", "seed", "output_format"]);
        assert_eq!(
            form.configuration(),
            "mode=text-to-image&model=sd3-turbo&aspect_ratio=4:5&seed=42&output_format=jpeg"
        );
    }

    #[tokio::test]
    async fn text_to_image_decodes_and_stores() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(header("authorization", "Bearer sk-stability"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "image": "aGVsbG8=",
                "finish_reason": "SUCCESS",
                "seed": 42
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = GenerationRequest {
            product: "poster".into(),
            ..GenerationRequest::default()
        };
        let image = provider(&server, dir.path())
            .text_to_image(&request, "a lighthouse", &CancellationToken::new())
            .await
            .unwrap();

        assert!(image.image_url.starts_with("http://gateway.test/img/"));
        assert!(image.image_url.ends_with(".jpeg"));
        assert_eq!(image.model, MODEL_SD3_TURBO);
        assert!(image.configuration.contains("aspect_ratio=2:3"));

        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains("name=\"aspect_ratio\""));
        assert!(body.contains("a lighthouse"));
    }

    #[tokio::test]
    async fn undecodable_body_is_a_decode_error() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = provider(&server, dir.path())
            .text_to_image(&GenerationRequest::default(), "a fox", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[tokio::test]
    async fn edit_uploads_decoded_image() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("POST"))
            .and(path(INPAINT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "image": "d29ybGQ="
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = EditRequest {
            image: "aGVsbG8=".into(),
            prompt: "add a hat".into(),
            style: "cartoon".into(),
        };
        let image = provider(&server, dir.path())
            .edit_image(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(image.model, EDIT_MODEL);
        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains("name=\"image\""));
        assert!(body.contains("hello"));
        assert!(body.contains("add a hat"));
    }

    #[tokio::test]
    async fn edit_without_image_fails_before_network() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        let request = EditRequest {
            prompt: "add a hat".into(),
            ..EditRequest::default()
        };
        let err = provider(&server, dir.path())
            .edit_image(&request, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::InvalidPayload(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
