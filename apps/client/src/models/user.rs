use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server-assigned user identifier. The API has used both numeric and string ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(n) => write!(f, "{n}"),
            UserId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Jobseeker,
    Employer,
}

/// The signed-in user as returned by the auth endpoints.
/// Fields the client does not model are kept in `extra` so merges never drop them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    #[serde(default)]
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    /// Shallow merge: every top-level field in `patch` replaces the current one.
    pub fn merged(&self, patch: &Map<String, Value>) -> Result<UserProfile, serde_json::Error> {
        let mut fields = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            fields.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(fields))
    }
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub email: String,
    pub password: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Partial profile update. Only the fields that are set are sent.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest<'a> {
    pub current_password: &'a str,
    pub new_password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ForgotPasswordRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ResetPasswordRequest<'a> {
    pub token: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// `POST /auth/login` and `POST /auth/register`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: UserProfile,
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// `GET /auth/verify`.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    pub user: UserProfile,
}

/// `POST /auth/refresh`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// `PUT /auth/profile`. The user may be partial, so it stays untyped until merged.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileResponse {
    pub user: Map<String, Value>,
}

/// Generic acknowledgement body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
}
