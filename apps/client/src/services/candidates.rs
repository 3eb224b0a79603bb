use tracing::debug;

use crate::api_client::ApiClient;
use crate::errors::ApiError;
use crate::models::candidate::{CandidateSearchQuery, CandidateSearchResults};

/// Employer-side candidate search. The server rejects jobseekers with 403.
#[derive(Clone)]
pub struct CandidateService {
    api: ApiClient,
}

impl CandidateService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn search(
        &self,
        query: &CandidateSearchQuery,
    ) -> Result<CandidateSearchResults, ApiError> {
        let results: CandidateSearchResults =
            self.api.get_with_query("/candidates/search", query).await?;
        debug!(total = results.total, "Candidate search returned");
        Ok(results)
    }
}
