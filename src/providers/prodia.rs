use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{EditImage, ImageProvider, TextToImage, http, lookup, trimmed_base_url};
use crate::error::{ProviderError, Result};
use crate::poller::{AsyncJob, JobPoller, JobSnapshot, JobStatus, JobStatusSource};
use crate::storage::{ImageStore, random_seed};
use crate::types::{EditRequest, GenerationRequest, Provider, ProviderImage};

pub const DEFAULT_BASE_URL: &str = "https://api.prodia.com";

const GENERATE_PATH: &str = "/v1/sdxl/generate";
const TRANSFORM_PATH: &str = "/v1/sdxl/transform";
const API_KEY_HEADER: &str = "X-Prodia-Key";

pub const STEPS: u32 = 50;
pub const CFG_SCALE: u32 = 12;

pub const MODEL_ANIMAGINE_XL_V3: &str = "animagineXLV3_v30.safetensors [75f2f05b]";
pub const MODEL_DREAMSHAPER_XL: &str = "dreamshaperXL10_alpha2.safetensors [c8afe2ef]";
pub const MODEL_DYNAVISION_XL: &str = "dynavisionXL_0411.safetensors [c39cc051]";
pub const MODEL_REALISM_ENGINE: &str = "realismEngineSDXL_v10.safetensors [af771c3f]";
pub const MODEL_REALVIS_XL: &str = "realvisxlV40.safetensors [f7fdcb51]";

pub const SAMPLER_DPMPP_SDE_KARRAS: &str = "DPM++ SDE Karras";
pub const SAMPLER_DPMPP_SDE_EXPONENTIAL: &str = "DPM++ SDE Exponential";
pub const SAMPLER_EULER: &str = "Euler";
pub const SAMPLER_EULER_A: &str = "Euler a";
pub const SAMPLER_LMS: &str = "LMS";
pub const SAMPLER_HEUN: &str = "Heun";
pub const SAMPLER_DPM2: &str = "DPM2";
pub const SAMPLER_DPM2_A: &str = "DPM2 a";
pub const SAMPLER_DPMPP_2M_SDE_HEUN_KARRAS: &str = "DPM++ 2M SDE Heun Karras";
pub const SAMPLER_LMS_KARRAS: &str = "LMS Karras";
pub const SAMPLER_DPM2_KARRAS: &str = "DPM2 Karras";
pub const SAMPLER_DDIM: &str = "DDIM";
pub const SAMPLER_UNIPC: &str = "UniPC";

pub const DEFAULT_MODEL: &str = MODEL_DREAMSHAPER_XL;
pub const DEFAULT_SAMPLER: &str = SAMPLER_EULER_A;
pub const DEFAULT_SIZE: (u32, u32) = (1024, 1024);

const STYLE_MODELS: &[(&str, &str)] = &[
    ("realistic", MODEL_REALISM_ENGINE),
    ("cartoon", MODEL_ANIMAGINE_XL_V3),
    ("chibi", MODEL_ANIMAGINE_XL_V3),
    ("abstract", MODEL_DREAMSHAPER_XL),
    ("minimalist", MODEL_DREAMSHAPER_XL),
    ("vintage", MODEL_REALVIS_XL),
    ("fantasy", MODEL_ANIMAGINE_XL_V3),
    ("surreal", MODEL_DREAMSHAPER_XL),
    ("pop-art", MODEL_ANIMAGINE_XL_V3),
    ("watercolor", MODEL_DREAMSHAPER_XL),
    ("pixel-art", MODEL_ANIMAGINE_XL_V3),
    ("line-art", MODEL_DREAMSHAPER_XL),
    ("cyberpunk", MODEL_ANIMAGINE_XL_V3),
    ("steampunk", MODEL_ANIMAGINE_XL_V3),
    ("art-deco", MODEL_DREAMSHAPER_XL),
    ("gothic", MODEL_DREAMSHAPER_XL),
    ("impressionist", MODEL_DREAMSHAPER_XL),
    ("expressionist", MODEL_DREAMSHAPER_XL),
    ("sci-fi", MODEL_ANIMAGINE_XL_V3),
    ("3d-render", MODEL_DYNAVISION_XL),
    ("retro", MODEL_REALVIS_XL),
];

const STYLE_SAMPLERS: &[(&str, &str)] = &[
    ("realistic", SAMPLER_DPMPP_SDE_KARRAS),
    ("cartoon", SAMPLER_EULER_A),
    ("chibi", SAMPLER_EULER_A),
    ("abstract", SAMPLER_DPMPP_SDE_EXPONENTIAL),
    ("minimalist", SAMPLER_HEUN),
    ("vintage", SAMPLER_LMS),
    ("fantasy", SAMPLER_DPMPP_SDE_KARRAS),
    ("surreal", SAMPLER_DPMPP_SDE_EXPONENTIAL),
    ("pop-art", SAMPLER_DPMPP_2M_SDE_HEUN_KARRAS),
    ("watercolor", SAMPLER_DDIM),
    ("pixel-art", SAMPLER_EULER),
    ("line-art", SAMPLER_HEUN),
    ("cyberpunk", SAMPLER_DPMPP_SDE_KARRAS),
    ("steampunk", SAMPLER_DPMPP_SDE_KARRAS),
    ("art-deco", SAMPLER_LMS),
    ("gothic", SAMPLER_DPM2_KARRAS),
    ("impressionist", SAMPLER_DPM2),
    ("expressionist", SAMPLER_DPM2_A),
    ("sci-fi", SAMPLER_DPMPP_2M_SDE_HEUN_KARRAS),
    ("3d-render", SAMPLER_UNIPC),
    ("retro", SAMPLER_LMS_KARRAS),
];

const PRODUCT_SIZES: &[(&str, (u32, u32))] = &[
    ("t-shirt", (819, 1024)),
    ("tumbler", (1024, 1024)),
    ("phone-case", (576, 1024)),
    ("hoodie", (819, 1024)),
    ("mug", (1024, 1024)),
    ("tote-bag", (819, 1024)),
    ("pillow", (1024, 1024)),
    ("poster", (683, 1024)),
    ("notebook", (1024, 683)),
    ("sticker", (1024, 1024)),
];

pub fn model_for_style(style: &str) -> &'static str {
    lookup(STYLE_MODELS, style, DEFAULT_MODEL)
}

pub fn sampler_for_style(style: &str) -> &'static str {
    lookup(STYLE_SAMPLERS, style, DEFAULT_SAMPLER)
}

pub fn size_for_product(product: &str) -> (u32, u32) {
    lookup(PRODUCT_SIZES, product, DEFAULT_SIZE)
}

#[derive(Debug, Serialize)]
struct GeneratePayload<'a> {
    model: &'a str,
    prompt: &'a str,
    steps: u32,
    cfg_scale: u32,
    sampler: &'a str,
    seed: u32,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct TransformPayload<'a> {
    mask_blur: u32,
    inpainting_full_res: bool,
    inpainting_fill: u32,
    inpainting_mask_invert: u32,
    #[serde(rename = "imageData")]
    image_data: &'a str,
    model: &'a str,
    prompt: &'a str,
    steps: u32,
    cfg_scale: u32,
    sampler: &'a str,
    seed: u32,
}

impl TransformPayload<'_> {
    fn configuration(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(fields) = value.as_object_mut() {
            fields.remove("imageData");
        }
        value.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    #[serde(default)]
    job: String,
    #[serde(default)]
    status: String,
    #[serde(rename = "imageUrl")]
    image_url: Option<String>,
}

pub struct ProdiaProvider {
    client: Client,
    api_key: SecretString,
    base_url: String,
    images: ImageStore,
    poller: JobPoller,
}

impl ProdiaProvider {
    pub fn new(
        client: Client,
        api_key: SecretString,
        base_url: Option<String>,
        images: ImageStore,
        poller: JobPoller,
    ) -> Self {
        Self {
            client,
            api_key,
            base_url: trimmed_base_url(base_url, DEFAULT_BASE_URL),
            images,
            poller,
        }
    }

    async fn run_job<T: Serialize + Sync>(
        &self,
        path: &str,
        payload: &T,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let job = self.submit(path, payload, cancel).await?;
        tracing::debug!(provider = %self.provider(), job_id = %job.id, "job queued");

        let result_url = self.poller.wait_for_result(self, job, cancel).await?;
        self.download(&result_url, cancel).await
    }

    async fn submit<T: Serialize + Sync>(
        &self,
        path: &str,
        payload: &T,
        cancel: &CancellationToken,
    ) -> Result<AsyncJob> {
        let response = http::send(
            self.client
                .post(format!("{}{path}", self.base_url))
                .header(API_KEY_HEADER, self.api_key.expose_secret())
                .header(reqwest::header::ACCEPT, "application/json")
                .json(payload),
            cancel,
        )
        .await?;
        let body: JobResponse = http::read_json(response).await?;
        AsyncJob::from_submission(body.job, &body.status)
    }

    async fn download(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        let response = http::send(self.client.get(url), cancel).await?;
        let response = http::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::Decode(format!("downloaded image at {url} is empty")));
        }
        Ok(self.images.save(&bytes).await?)
    }
}

impl ImageProvider for ProdiaProvider {
    fn provider(&self) -> Provider {
        Provider::AsyncDiffusion
    }
}

#[async_trait]
impl JobStatusSource for ProdiaProvider {
    async fn job_status(&self, job_id: &str, cancel: &CancellationToken) -> Result<JobSnapshot> {
        let response = http::send(
            self.client
                .get(format!("{}/v1/job/{job_id}", self.base_url))
                .header(API_KEY_HEADER, self.api_key.expose_secret())
                .header(reqwest::header::ACCEPT, "application/json"),
            cancel,
        )
        .await?;
        let body: JobResponse = http::read_json(response).await?;
        Ok(JobSnapshot {
            status: JobStatus::parse(&body.status),
            image_url: body.image_url,
        })
    }
}

#[async_trait]
impl TextToImage for ProdiaProvider {
    async fn text_to_image(
        &self,
        request: &GenerationRequest,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ProviderImage> {
        if prompt.trim().is_empty() {
            return Err(ProviderError::InvalidPayload("prompt is required".into()));
        }
        let (width, height) = size_for_product(&request.product);
        let payload = GeneratePayload {
            model: model_for_style(&request.style),
            prompt,
            steps: STEPS,
            cfg_scale: CFG_SCALE,
            sampler: sampler_for_style(&request.style),
            seed: random_seed(),
            width,
            height,
        };

        let image_url = self.run_job(GENERATE_PATH, &payload, cancel).await?;

        Ok(ProviderImage {
            image_url,
            model: payload.model.to_string(),
            configuration: serde_json::to_string(&payload).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl EditImage for ProdiaProvider {
    async fn edit_image(&self, request: &EditRequest, cancel: &CancellationToken) -> Result<ProviderImage> {
        if request.image.trim().is_empty() || request.prompt.trim().is_empty() {
            return Err(ProviderError::InvalidPayload("image and prompt are required".into()));
        }
        let payload = TransformPayload {
            mask_blur: 1,
            inpainting_full_res: false,
            inpainting_fill: 0,
            inpainting_mask_invert: 0,
            image_data: request.image.trim(),
            model: model_for_style(&request.style),
            prompt: &request.prompt,
            steps: STEPS,
            cfg_scale: CFG_SCALE,
            sampler: sampler_for_style(&request.style),
            seed: random_seed(),
        };

        let image_url = self.run_job(TRANSFORM_PATH, &payload, cancel).await?;

        Ok(ProviderImage {
            image_url,
            model: payload.model.to_string(),
            configuration: payload.configuration(),
        })
    }
}
