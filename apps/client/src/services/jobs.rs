use serde::Deserialize;
use tracing::debug;

use crate::api_client::{ApiClient, ApiRequest};
use crate::errors::ApiError;
use crate::models::job::{Application, ApplicationRequest, Job, JobSearchQuery, JobSearchResults};
use crate::models::user::Ack;

#[derive(Deserialize)]
struct JobEnvelope {
    job: Job,
}

#[derive(Deserialize)]
struct JobList {
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Deserialize)]
struct ApplicationEnvelope {
    application: Application,
}

#[derive(Clone)]
pub struct JobService {
    api: ApiClient,
}

impl JobService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn search(&self, query: &JobSearchQuery) -> Result<JobSearchResults, ApiError> {
        let results: JobSearchResults = self.api.get_with_query("/jobs", query).await?;
        debug!(total = results.total, page = results.page, "Job search returned");
        Ok(results)
    }

    pub async fn get(&self, id: &str) -> Result<Job, ApiError> {
        let envelope: JobEnvelope = self.api.get(&format!("/jobs/{id}")).await?;
        Ok(envelope.job)
    }

    /// Jobs ranked against the caller's analysed resume.
    pub async fn recommendations(&self) -> Result<Vec<Job>, ApiError> {
        let list: JobList = self.api.get("/jobs/recommendations").await?;
        Ok(list.jobs)
    }

    pub async fn saved(&self) -> Result<Vec<Job>, ApiError> {
        let list: JobList = self.api.get("/jobs/saved").await?;
        Ok(list.jobs)
    }

    pub async fn save(&self, id: &str) -> Result<(), ApiError> {
        self.api
            .send::<Ack>(ApiRequest::post(&format!("/jobs/{id}/save")))
            .await?;
        Ok(())
    }

    pub async fn unsave(&self, id: &str) -> Result<(), ApiError> {
        self.api.delete::<Ack>(&format!("/jobs/{id}/save")).await?;
        Ok(())
    }

    pub async fn apply(
        &self,
        id: &str,
        application: &ApplicationRequest,
    ) -> Result<Application, ApiError> {
        let envelope: ApplicationEnvelope = self
            .api
            .post(&format!("/jobs/{id}/apply"), application)
            .await?;
        Ok(envelope.application)
    }
}
