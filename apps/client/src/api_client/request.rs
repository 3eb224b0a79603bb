use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::errors::ApiError;

/// A file to send as `multipart/form-data`.
/// Kept as raw bytes so the form can be rebuilt if the request is reissued.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
    pub fields: Vec<(String, String)>,
}

impl FileUpload {
    pub fn new(field: &str, file_name: &str, mime: &str, bytes: Vec<u8>) -> Self {
        Self {
            field: field.to_string(),
            file_name: file_name.to_string(),
            mime: mime.to_string(),
            bytes,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    pub(crate) fn to_form(&self) -> Result<Form, ApiError> {
        let part = Part::bytes(self.bytes.clone())
            .file_name(self.file_name.clone())
            .mime_str(&self.mime)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid content type '{}': {e}", self.mime)))?;

        let form = self
            .fields
            .iter()
            .fold(Form::new(), |form, (name, value)| form.text(name.clone(), value.clone()));
        Ok(form.part(self.field.clone(), part))
    }
}

#[derive(Debug, Clone)]
pub(crate) enum RequestBody {
    Json(Value),
    Multipart(FileUpload),
}

/// Description of one API call, independent of how many times it gets sent.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<RequestBody>,
    authorized: bool,
    refresh_on_unauthorized: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: Vec::new(),
            body: None,
            authorized: true,
            refresh_on_unauthorized: true,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: &str) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        self.body = Some(RequestBody::Json(value));
        Ok(self)
    }

    pub fn multipart(mut self, upload: FileUpload) -> Self {
        self.body = Some(RequestBody::Multipart(upload));
        self
    }

    /// Adds query parameters from any struct or map. `null` fields are skipped.
    pub fn query<Q: Serialize + ?Sized>(mut self, query: &Q) -> Result<Self, ApiError> {
        let value = serde_json::to_value(query).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(ApiError::InvalidRequest("query must serialize to an object".into()));
        };
        for (key, value) in map {
            match value {
                Value::Null => {}
                Value::String(s) => self.query.push((key, s)),
                other => self.query.push((key, other.to_string())),
            }
        }
        Ok(self)
    }

    /// A 401 on this request is final; no credential refresh is attempted.
    /// Used for the sign-in calls themselves, where 401 means bad credentials.
    pub fn without_refresh(mut self) -> Self {
        self.refresh_on_unauthorized = false;
        self
    }

    /// Do not attach the bearer token.
    pub fn anonymous(mut self) -> Self {
        self.authorized = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub(crate) fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub(crate) fn is_authorized(&self) -> bool {
        self.authorized
    }

    pub(crate) fn refreshes_on_unauthorized(&self) -> bool {
        self.refresh_on_unauthorized
    }
}
