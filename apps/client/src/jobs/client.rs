//! Job Submission Client and the status/files queries behind the poller.
//!
//! The backend owns the job lifecycle; this module only creates jobs and
//! reads backend-reported state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::{ApiClient, ApiError};

/// Terminal backend statuses. Anything else is treated as non-terminal.
pub const STATUS_DONE: &str = "DONE";
pub const STATUS_FAILED: &str = "FAILED";

/// The status the backend assigns to every job at creation.
pub const STATUS_QUEUED: &str = "QUEUED";

/// Body of POST /api/v1/resumes/generate.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub profile_id: String,
    pub job_description_text: String,
    pub template_id: String,
    pub page_count: u8,
    pub include_projects: bool,
    pub include_skills: bool,
    pub outputs: Vec<String>,
}

impl GenerateRequest {
    /// Defaults matching the generate form: one PDF page off the ATS template.
    pub fn new(job_description_text: String) -> Self {
        Self {
            profile_id: "default".into(),
            job_description_text,
            template_id: "JakesResumeATS".into(),
            page_count: 1,
            include_projects: true,
            include_skills: true,
            outputs: vec!["PDF".into()],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    pub generated_resume_id: String,
    pub status: String,
}

/// Status record reported by GET /api/v1/resumes/{id}.
/// `failure_reason` is present only when the status is FAILED.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatusResponse {
    pub status: String,
    pub failure_reason: Option<String>,
}

/// One generated artifact, available once the job reports DONE.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedFile {
    pub id: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub download_url: String,
}

/// Backend job surface, cut as a trait so the poller is testable against
/// scripted status sequences.
#[async_trait]
pub trait JobsApi: Send + Sync {
    /// Creates a generation job and returns its identifier.
    async fn submit(&self, request: &GenerateRequest) -> Result<GenerateResponse, ApiError>;

    /// Reads the backend-reported job status.
    async fn status(&self, job_id: &str) -> Result<JobStatusResponse, ApiError>;

    /// Lists the generated artifacts. Only meaningful once status is DONE.
    async fn files(&self, job_id: &str) -> Result<Vec<GeneratedFile>, ApiError>;
}

/// HTTP implementation over the authenticated API client.
pub struct HttpJobsApi {
    api: ApiClient,
}

impl HttpJobsApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl JobsApi for HttpJobsApi {
    async fn submit(&self, request: &GenerateRequest) -> Result<GenerateResponse, ApiError> {
        let response: GenerateResponse = self
            .api
            .post_json("/api/v1/resumes/generate", request)
            .await?;
        info!(
            "Generation job {} submitted (status {})",
            response.generated_resume_id, response.status
        );
        Ok(response)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatusResponse, ApiError> {
        self.api.get_json(&format!("/api/v1/resumes/{job_id}")).await
    }

    async fn files(&self, job_id: &str) -> Result<Vec<GeneratedFile>, ApiError> {
        self.api
            .get_json(&format!("/api/v1/resumes/{job_id}/files"))
            .await
    }
}
