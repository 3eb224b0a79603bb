use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeStatus {
    Uploaded,
    Processing,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resume {
    pub id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    pub status: ResumeStatus,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub analysis: Option<ResumeAnalysis>,
}

/// Output of the server-side analysis. The client only displays it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeAnalysis {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
