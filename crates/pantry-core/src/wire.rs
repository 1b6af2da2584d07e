use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body returned by a successful write.
pub const PUT_SUCCEEDED: &str = "Putting data succeeded.";

/// Body returned for every authentication failure, whatever the cause.
pub const AUTHENTICATION_FAILED: &str = "Request authentication failed.";

/// JSON body of `POST /put`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WriteRequest {
    #[serde(default)]
    pub secret: Option<String>,
    pub key: String,
    /// Absent in the body means JSON `null`.
    #[serde(default)]
    pub value: Value,
}

/// Url-encoded body of `POST /put`. Form fields are plain text, so the value is
/// stored as a JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FormWriteRequest {
    #[serde(default)]
    pub secret: Option<String>,
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl From<FormWriteRequest> for WriteRequest {
    fn from(form: FormWriteRequest) -> Self {
        WriteRequest {
            secret: form.secret,
            key: form.key,
            value: form.value.map(Value::String).unwrap_or(Value::Null),
        }
    }
}

/// Body of a successful `GET /get/:key`. An unset key serializes as `{}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}
