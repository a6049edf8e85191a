//! Transport boundary to the DSP server.
//!
//! [`ApiClient`] is the seam every request goes through. [`HttpApiClient`] is
//! the production implementation over blocking `reqwest`; tests substitute a
//! recording client.

use reqwest::StatusCode;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::config::SdkConfig;
use crate::error::{ApiError, ConfigError};

/// Path of the versioned API below the server address.
pub const API_BASE_PATH: &str = "/dsp/api/v1/";

const SDK_USER_AGENT: &str = concat!("NTCore Rust SDK v", env!("CARGO_PKG_VERSION"));

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `application/x-www-form-urlencoded`
    Form(BTreeMap<String, String>),
    /// `multipart/form-data` with text fields and file parts.
    Multipart {
        fields: BTreeMap<String, String>,
        files: BTreeMap<String, Vec<u8>>,
    },
    Json(Value),
}

impl Payload {
    pub fn form() -> Self {
        Self::Form(BTreeMap::new())
    }

    pub fn multipart() -> Self {
        Self::Multipart {
            fields: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    /// Add a text field. On a JSON object payload the field becomes a string
    /// member.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self {
            Self::Form(fields) | Self::Multipart { fields, .. } => {
                fields.insert(name.into(), value.into());
            }
            Self::Json(Value::Object(map)) => {
                map.insert(name.into(), Value::String(value.into()));
            }
            Self::Json(_) => {}
        }
        self
    }

    /// Add a file part. A form payload is upgraded to multipart.
    pub fn file(self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        match self {
            Self::Form(fields) => Self::Multipart {
                fields,
                files: BTreeMap::from([(name.into(), bytes)]),
            },
            Self::Multipart { fields, mut files } => {
                files.insert(name.into(), bytes);
                Self::Multipart { fields, files }
            }
            json @ Self::Json(_) => json,
        }
    }

    pub fn field_value(&self, name: &str) -> Option<&str> {
        match self {
            Self::Form(fields) | Self::Multipart { fields, .. } => {
                fields.get(name).map(String::as_str)
            }
            Self::Json(value) => value.get(name).and_then(Value::as_str),
        }
    }

    pub fn file_part(&self, name: &str) -> Option<&[u8]> {
        match self {
            Self::Multipart { files, .. } => files.get(name).map(Vec::as_slice),
            _ => None,
        }
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Json(Value),
    /// Non-JSON body, e.g. a downloaded model.
    Bytes(Vec<u8>),
    /// 204 No Content.
    Empty,
}

impl ApiResponse {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Request boundary. Paths are relative to the API base.
pub trait ApiClient: Send + Sync {
    fn do_get(&self, path: &str) -> Result<ApiResponse, ApiError>;
    fn do_post(&self, path: &str, payload: &Payload) -> Result<ApiResponse, ApiError>;
    fn do_delete(&self, path: &str) -> Result<ApiResponse, ApiError>;
}

enum Auth {
    Bearer(String),
    Basic { username: String, password: String },
    Anonymous,
}

/// Blocking HTTP implementation of [`ApiClient`].
pub struct HttpApiClient {
    server: String,
    base: Url,
    http: HttpClient,
    auth: Auth,
    context_id: Uuid,
}

impl HttpApiClient {
    pub fn new(config: &SdkConfig) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidServer {
            url: config.server.clone(),
            message,
        };

        let base = Url::parse(&config.server)
            .and_then(|server| server.join(API_BASE_PATH))
            .map_err(|e| invalid(e.to_string()))?;

        let context_id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(SDK_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("x-sdk-type", HeaderValue::from_static("Rust"));
        headers.insert(
            "x-sdk-version",
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        );
        headers.insert(
            "x-sdk-contextid",
            HeaderValue::from_str(&context_id.to_string()).map_err(|e| invalid(e.to_string()))?,
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| invalid(format!("Failed to create HTTP client: {e}")))?;

        let auth = match (&config.api_token, &config.username, &config.password) {
            (Some(token), _, _) => Auth::Bearer(token.clone()),
            (None, Some(username), Some(password)) => Auth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            _ => Auth::Anonymous,
        };

        Ok(Self {
            server: config.server.clone(),
            base,
            http,
            auth,
            context_id,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Identifier sent with every request of this client.
    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidPath {
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
            Auth::Anonymous => request,
        }
    }

    fn execute(&self, path: &str, request: RequestBuilder) -> Result<ApiResponse, ApiError> {
        let response = self
            .authorize(request)
            .send()
            .map_err(|e| ApiError::Communication {
                server: self.server.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        debug!(path, status = status.as_u16(), "API response");
        if status == StatusCode::NO_CONTENT {
            return Ok(ApiResponse::Empty);
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        let body = response.bytes().map_err(|e| ApiError::Communication {
            server: self.server.clone(),
            message: e.to_string(),
        })?;

        if !is_json {
            if status.is_success() {
                return Ok(ApiResponse::Bytes(body.to_vec()));
            }
            return Err(ApiError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        let value: Value =
            serde_json::from_slice(&body).map_err(|e| ApiError::GarbageResponse {
                message: e.to_string(),
            })?;
        if value.get("errors").is_some() || !status.is_success() {
            return Err(ApiError::Server { body: value });
        }
        Ok(ApiResponse::Json(value))
    }
}

impl ApiClient for HttpApiClient {
    fn do_get(&self, path: &str) -> Result<ApiResponse, ApiError> {
        let url = self.url(path)?;
        self.execute(path, self.http.get(url))
    }

    fn do_post(&self, path: &str, payload: &Payload) -> Result<ApiResponse, ApiError> {
        let url = self.url(path)?;
        let request = self.http.post(url);
        let request = match payload {
            Payload::Form(fields) => request.form(fields),
            Payload::Json(value) => request.json(value),
            Payload::Multipart { fields, files } => {
                let mut form = Form::new();
                for (name, value) in fields {
                    form = form.text(name.clone(), value.clone());
                }
                for (name, bytes) in files {
                    form = form.part(
                        name.clone(),
                        Part::bytes(bytes.clone()).file_name(name.clone()),
                    );
                }
                request.multipart(form)
            }
        };
        self.execute(path, request)
    }

    fn do_delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        let url = self.url(path)?;
        self.execute(path, self.http.delete(url))
    }
}
