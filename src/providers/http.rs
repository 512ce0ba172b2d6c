use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, Result};

const BODY_SNIPPET_LEN: usize = 512;

pub(crate) async fn send(request: RequestBuilder, cancel: &CancellationToken) -> Result<Response> {
    tokio::select! {
        () = cancel.cancelled() => Err(ProviderError::Cancelled),
        response = request.send() => Ok(response?),
    }
}

pub(crate) async fn ensure_success(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::NonSuccessStatus {
        status,
        body: snippet(&body),
    })
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = ensure_success(response).await?;
    let text = response.text().await?;
    serde_json::from_str(&text)
        .map_err(|err| ProviderError::Decode(format!("{err}, body: {}", snippet(&text))))
}

pub(crate) fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|err| ProviderError::Decode(format!("invalid base64 image: {err}")))?;
    if bytes.is_empty() {
        return Err(ProviderError::Decode("empty image payload".into()));
    }
    Ok(bytes)
}

/// Best-effort content type for an uploaded image, from its magic bytes.
pub(crate) fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        "image/png"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        "image/gif"
    } else {
        "image/jpeg"
    }
}

fn snippet(body: &str) -> String {
    if body.len() <= BODY_SNIPPET_LEN {
        return body.to_string();
    }
    let mut end = BODY_SNIPPET_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_standard_base64() {
        assert_eq!(decode_base64("aGVsbG8=").unwrap(), b"hello");
        assert!(matches!(decode_base64("not base64!"), Err(ProviderError::Decode(_))));
        assert!(matches!(decode_base64(""), Err(ProviderError::Decode(_))));
    }

    #[test]
    fn sniffs_common_formats() {
        assert_eq!(sniff_image_mime(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]), "image/png");
        assert_eq!(sniff_image_mime(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(sniff_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(2_000);
        assert!(snippet(&body).len() < 600);
        assert_eq!(snippet("short"), "short");
    }
}
