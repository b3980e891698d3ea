use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::services::collaborators::{CollaboratorError, GeneratedImage, GenerationStatus, ImageSource};

/// Client for a RunPod-style serverless image backend (`.../runsync`).
pub struct ImageApiClient {
    http: Client,
    endpoint_url: String,
    api_token: String,
}

#[derive(Serialize)]
struct RunSyncRequest<'a> {
    input: RunSyncInput<'a>,
}

#[derive(Serialize)]
struct RunSyncInput<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
    steps: u32,
}

#[derive(Deserialize)]
struct RunSyncResponse {
    status: String,
    #[serde(default)]
    output: Option<RunSyncOutput>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct RunSyncOutput {
    #[serde(default)]
    images: Vec<String>,
}

impl ImageApiClient {
    pub fn new(endpoint_url: String, api_token: String) -> Result<Self, ImageApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(ImageApiError::Http)?;
        Ok(Self {
            http,
            endpoint_url,
            api_token,
        })
    }

    /// Run one text-to-image generation synchronously.
    pub async fn run_sync(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
        steps: u32,
    ) -> Result<GeneratedImage, ImageApiError> {
        let body = RunSyncRequest {
            input: RunSyncInput {
                prompt,
                width,
                height,
                steps,
            },
        };

        let response = self
            .http
            .post(&self.endpoint_url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(ImageApiError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ImageApiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let payload: RunSyncResponse = response.json().await.map_err(ImageApiError::Http)?;
        Ok(into_generated_image(payload))
    }
}

fn into_generated_image(payload: RunSyncResponse) -> GeneratedImage {
    let images: Vec<String> = payload
        .output
        .map(|o| o.images)
        .unwrap_or_default()
        .into_iter()
        .map(|image| {
            // Backends return either hosted URLs or bare base64 PNG data.
            if image.starts_with("http://") || image.starts_with("https://") || image.starts_with("data:") {
                image
            } else {
                format!("data:image/png;base64,{image}")
            }
        })
        .collect();

    if payload.status == "COMPLETED" && !images.is_empty() {
        GeneratedImage {
            image_urls: images,
            status: GenerationStatus::Completed,
            error: None,
        }
    } else {
        GeneratedImage {
            image_urls: Vec::new(),
            status: GenerationStatus::Failed,
            error: Some(
                payload
                    .error
                    .unwrap_or_else(|| format!("backend returned status {}", payload.status)),
            ),
        }
    }
}

#[async_trait]
impl ImageSource for ImageApiClient {
    async fn generate_image(
        &self,
        prompt_text: &str,
        width: u32,
        height: u32,
        steps: u32,
    ) -> Result<GeneratedImage, CollaboratorError> {
        Ok(self.run_sync(prompt_text, width, height, steps).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageApiError {
    #[error("Image backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image backend returned {status}: {message}")]
    Api { status: u16, message: String },
}
