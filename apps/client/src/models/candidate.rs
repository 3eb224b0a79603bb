use serde::{Deserialize, Serialize};

use crate::models::user::UserId;

/// Query for the employer-side `GET /candidates/search`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSearchQuery {
    /// Comma-separated on the wire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_experience: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl CandidateSearchQuery {
    pub fn with_skills<S: AsRef<str>>(mut self, skills: &[S]) -> Self {
        let joined = skills
            .iter()
            .map(|s| s.as_ref().trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        self.skills = (!joined.is_empty()).then_some(joined);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSummary {
    pub id: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub match_score: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateSearchResults {
    #[serde(default)]
    pub candidates: Vec<CandidateSummary>,
    #[serde(default)]
    pub total: u64,
}
