use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::api_client::{ApiClient, ApiRequest, FileUpload};
use crate::errors::ApiError;
use crate::models::resume::{Resume, ResumeAnalysis};
use crate::models::user::Ack;

/// Multipart field the upload endpoint reads the file from.
pub const UPLOAD_FIELD: &str = "resume";

#[derive(Deserialize)]
struct ResumeEnvelope {
    resume: Resume,
}

#[derive(Deserialize)]
struct ResumeList {
    #[serde(default)]
    resumes: Vec<Resume>,
}

#[derive(Deserialize)]
struct AnalysisEnvelope {
    analysis: ResumeAnalysis,
}

#[derive(Clone)]
pub struct ResumeService {
    api: ApiClient,
}

impl ResumeService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn list(&self) -> Result<Vec<Resume>, ApiError> {
        let list: ResumeList = self.api.get("/resumes").await?;
        Ok(list.resumes)
    }

    /// Uploads the file. Processing continues server-side and is reported over the
    /// real-time channel (`resume:processing`, `resume:completed`, `resume:error`).
    pub async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<Resume, ApiError> {
        let size = bytes.len();
        let upload = FileUpload::new(UPLOAD_FIELD, file_name, mime_for(file_name), bytes);
        let envelope: ResumeEnvelope = self
            .api
            .send(ApiRequest::post("/resumes/upload").multipart(upload))
            .await?;
        info!(resume = %envelope.resume.id, file = file_name, size, "Resume uploaded");
        Ok(envelope.resume)
    }

    pub async fn upload_file(&self, path: &Path) -> Result<Resume, ApiError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ApiError::InvalidRequest(format!("not a file: {}", path.display())))?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ApiError::InvalidRequest(format!("failed to read {}: {e}", path.display())))?;
        self.upload(file_name, bytes).await
    }

    pub async fn get(&self, id: &str) -> Result<Resume, ApiError> {
        let envelope: ResumeEnvelope = self.api.get(&format!("/resumes/{id}")).await?;
        Ok(envelope.resume)
    }

    pub async fn analysis(&self, id: &str) -> Result<ResumeAnalysis, ApiError> {
        let envelope: AnalysisEnvelope = self.api.get(&format!("/resumes/{id}/analysis")).await?;
        Ok(envelope.analysis)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.api.delete::<Ack>(&format!("/resumes/{id}")).await?;
        Ok(())
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::api_client::DEFAULT_TIMEOUT;
    use crate::models::resume::ResumeStatus;
    use crate::navigation::HistoryNavigator;
    use crate::storage::TokenStore;

    async fn service(server: &MockServer) -> ResumeService {
        let tokens = TokenStore::in_memory();
        tokens.set("abc").unwrap();
        let api = ApiClient::new(
            &server.uri(),
            DEFAULT_TIMEOUT,
            tokens,
            Arc::new(HistoryNavigator::default()),
        )
        .unwrap();
        ResumeService::new(api)
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_for("cv.PDF"), "application/pdf");
        assert_eq!(mime_for("cv.txt"), "text/plain");
        assert_eq!(mime_for("cv"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_upload_file_sends_multipart_resume_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resumes/upload"))
            .and(header_regex("content-type", "^multipart/form-data"))
            .and(body_string_contains("name=\"resume\""))
            .and(body_string_contains("filename=\"cv.pdf\""))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "resume": {"id": "r1", "fileName": "cv.pdf", "status": "processing"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cv.pdf");
        std::fs::write(&file, b"%PDF-1.4 fake").unwrap();

        let resume = service(&server).await.upload_file(&file).await.unwrap();

        assert_eq!(resume.id, "r1");
        assert_eq!(resume.status, ResumeStatus::Processing);
    }

    #[tokio::test]
    async fn test_upload_missing_file_never_hits_network() {
        let server = MockServer::start().await;
        let err = service(&server)
            .await
            .upload_file(Path::new("/definitely/not/here.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_analysis_and_unknown_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resumes/r1/analysis"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "analysis": {"score": 82.5, "skills": ["rust"], "extraField": 1}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resumes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resumes": [{"id": "r1", "status": "archived"}]
            })))
            .mount(&server)
            .await;

        let resumes = service(&server).await;
        let analysis = resumes.analysis("r1").await.unwrap();
        assert_eq!(analysis.score, Some(82.5));
        assert_eq!(analysis.extra["extraField"], 1);

        let list = resumes.list().await.unwrap();
        assert_eq!(list[0].status, ResumeStatus::Unknown);
    }
}
