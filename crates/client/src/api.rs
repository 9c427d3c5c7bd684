//! HTTP wrappers for the builder API (`/api/v1`) using [`reqwest`].
//!
//! These are plain request/response calls with no retry: failures
//! surface directly to the caller, and the polling layer simply tries
//! again on its next tick.

use launchpad_core::error::CoreError;
use launchpad_core::project::{
    CreateProjectRequest, ProjectFilter, ProjectList, ProjectRecord, ProjectStats,
};
use reqwest::StatusCode;
use serde::Deserialize;

/// Path prefix of the versioned API.
const API_PREFIX: &str = "/api/v1";

/// HTTP client for one builder backend.
#[derive(Debug, Clone)]
pub struct ProjectsApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    #[serde(default)]
    pub github_configured: bool,
    #[serde(default)]
    pub gemini_configured: bool,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Builder API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// No project exists with this task ID.
    #[error("Project not found: {0}")]
    NotFound(String),

    /// The request was rejected locally before being sent.
    #[error(transparent)]
    Invalid(#[from] CoreError),
}

impl ProjectsApi {
    /// Create a client for a backend.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://localhost:8000`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a build job.
    ///
    /// Sends `POST /builder/create` after validating the request locally.
    /// Returns the created (or, for a repeated nonce, existing) project.
    pub async fn create_project(
        &self,
        request: &CreateProjectRequest,
    ) -> Result<ProjectRecord, ApiError> {
        request.check()?;

        let response = self
            .client
            .post(self.endpoint("/builder/create"))
            .json(request)
            .send()
            .await?;

        let project: ProjectRecord = Self::parse_response(response).await?;
        tracing::info!(task_id = %project.task_id, status = %project.status, "Project submitted");
        Ok(project)
    }

    /// Fetch one project by task ID (`GET /projects/{task_id}`).
    pub async fn get_project(&self, task_id: &str) -> Result<ProjectRecord, ApiError> {
        let response = self
            .client
            .get(self.endpoint(&format!("/projects/{task_id}")))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(task_id.to_string()));
        }
        Self::parse_response(response).await
    }

    /// List projects, newest first (`GET /projects?skip&limit&status`).
    pub async fn get_projects(&self, filter: &ProjectFilter) -> Result<ProjectList, ApiError> {
        let response = self
            .client
            .get(self.endpoint("/projects"))
            .query(&filter.query_pairs())
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Aggregate counts per status (`GET /projects/stats`).
    pub async fn get_stats(&self) -> Result<ProjectStats, ApiError> {
        let response = self
            .client
            .get(self.endpoint("/projects/stats"))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Delete a project (`DELETE /projects/{task_id}`).
    pub async fn delete_project(&self, task_id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.endpoint(&format!("/projects/{task_id}")))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(task_id.to_string()));
        }
        Self::check_status(response).await
    }

    /// Backend health and integration status (`GET /health`).
    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        let response = self
            .client
            .get(self.endpoint("/health"))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    fn endpoint(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.api_url)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::Api`] containing
    /// the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
