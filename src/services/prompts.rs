use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::services::collaborators::{CollaboratorError, PromptIdea, PromptQuery, PromptSource};

/// Client for the LLM-backed prompt generator service.
pub struct PromptApiClient {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    prompts: Vec<PromptIdea>,
}

impl PromptApiClient {
    pub fn new(base_url: String, api_token: Option<String>) -> Result<Self, PromptApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(PromptApiError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }
}

#[async_trait]
impl PromptSource for PromptApiClient {
    async fn generate_prompts(&self, query: &PromptQuery) -> Result<Vec<PromptIdea>, CollaboratorError> {
        let mut request = self.http.post(format!("{}/generate", self.base_url)).json(query);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(PromptApiError::Http)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PromptApiError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        let body: GenerateResponse = response.json().await.map_err(PromptApiError::Http)?;
        Ok(body.prompts)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PromptApiError {
    #[error("Prompt generator request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Prompt generator returned {status}: {message}")]
    Api { status: u16, message: String },
}
