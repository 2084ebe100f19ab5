//! Requests, responses and the typed REST endpoints of the advisory
//! backend.
//!
//! Every request leaves through [`ApiClient::execute`], which hands it to
//! the [`LocaleNegotiator`] first. Transports only accept the resulting
//! [`LocalizedRequest`], so nothing reaches the wire undecorated.

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::locale::{Locale, LocaleNegotiator};
use crate::profile::{Profile, SaveAction};
use crate::resources::DependentResource;
use crate::transport::Transport;
use crate::{AgriError, Result};

pub const PROFILES_PATH: &str = "/profile/";
pub const SWITCH_PROFILE_PATH: &str = "/profile/switch/";
pub const CHAT_PATH: &str = "/chat";
pub const HEALTH_PATH: &str = "/health";

const DEFAULT_SAVE_FAILURE: &str = "Failed to save profile";

/// An outbound call before locale decoration.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_owned(), value.to_owned()));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Header names compare case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub(crate) fn set_query(&mut self, key: &str, value: &str) {
        self.query.retain(|(k, _)| k != key);
        self.query.push((key.to_owned(), value.to_owned()));
    }

    pub(crate) fn set_header(&mut self, name: &str, value: &str) {
        self.headers
            .retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_owned(), value.to_owned()));
    }
}

/// A request that carries the session locale. Only
/// [`LocaleNegotiator::decorate`] creates one.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalizedRequest {
    request: ApiRequest,
    locale: Locale,
}

impl LocalizedRequest {
    pub(crate) fn new(request: ApiRequest, locale: Locale) -> Self {
        Self { request, locale }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    status: u16,
    body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The `detail` the backend attaches to error bodies, if any.
    pub fn detail(&self) -> Option<String> {
        #[derive(Deserialize)]
        struct ErrorBody {
            detail: Option<serde_json::Value>,
        }

        let body: ErrorBody = serde_json::from_slice(&self.body).ok()?;
        match body.detail? {
            serde_json::Value::String(detail) if !detail.is_empty() => {
                Some(detail)
            }
            serde_json::Value::String(_) | serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn failure_reason(&self) -> String {
        self.detail()
            .unwrap_or_else(|| format!("HTTP status {}", self.status))
    }
}

/// `{success, data, message}` wrapper most endpoints answer with.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

impl<T> Envelope<T> {
    pub(crate) fn into_data(self, resource: &str) -> Result<T> {
        if !self.success {
            let reason = self
                .message
                .unwrap_or_else(|| "backend reported failure".to_owned());
            return Err(AgriError::fetch(resource, reason));
        }
        self.data
            .ok_or_else(|| AgriError::shape(resource, "missing `data`"))
    }
}

pub(crate) fn parse<T: DeserializeOwned>(
    resource: &str,
    body: &[u8],
) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| AgriError::shape(resource, e))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub answer: String,
    pub detected_language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
}

/// Typed access to the backend.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    locale: Arc<LocaleNegotiator>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        locale: Arc<LocaleNegotiator>,
    ) -> Self {
        Self { transport, locale }
    }

    pub fn locale(&self) -> &Arc<LocaleNegotiator> {
        &self.locale
    }

    /// Decorate `request` with the current locale and send it.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let request = self.locale.decorate(request);
        log::debug!(
            "{} {} [{}]",
            request.request().method(),
            request.request().path(),
            request.locale()
        );
        let response = self.transport.send(&request).await?;
        log::debug!(
            "{} {} -> {}",
            request.request().method(),
            request.request().path(),
            response.status()
        );
        Ok(response)
    }

    pub async fn list_profiles(&self) -> Result<Vec<Profile>> {
        const RESOURCE: &str = "profiles";
        let response = self
            .execute(ApiRequest::get(PROFILES_PATH))
            .await
            .map_err(|e| AgriError::fetch(RESOURCE, e.to_string()))?;
        if !response.is_success() {
            return Err(AgriError::fetch(RESOURCE, response.failure_reason()));
        }
        parse::<Envelope<Vec<Profile>>>(RESOURCE, response.body())?
            .into_data(RESOURCE)
    }

    /// Submit a draft; the backend decides whether it creates, updates
    /// or leaves the profile alone.
    pub async fn save_profile(&self, draft: &Profile) -> Result<SaveAction> {
        #[derive(Deserialize)]
        struct SaveOutcome {
            action: SaveAction,
        }

        let request = ApiRequest::post(PROFILES_PATH).json(draft)?;
        let response = self.execute(request).await.map_err(|e| {
            AgriError::Save {
                reason: e.to_string(),
            }
        })?;
        if !response.is_success() {
            return Err(AgriError::Save {
                reason: response
                    .detail()
                    .unwrap_or_else(|| DEFAULT_SAVE_FAILURE.to_owned()),
            });
        }
        let outcome: SaveOutcome = parse("profile save", response.body())?;
        Ok(outcome.action)
    }

    /// Ask the backend to make `phone` the active profile. Returns the
    /// profile as the backend confirmed it.
    pub async fn switch_profile(&self, phone: &str) -> Result<Profile> {
        const RESOURCE: &str = "profile switch";
        let switch_error = |reason: String| AgriError::Switch {
            phone: phone.to_owned(),
            reason,
        };

        let path = format!("{}{}", SWITCH_PROFILE_PATH, encode_segment(phone));
        let response = self
            .execute(ApiRequest::post(path))
            .await
            .map_err(|e| switch_error(e.to_string()))?;
        if !response.is_success() {
            return Err(switch_error(response.failure_reason()));
        }
        let envelope: Envelope<Profile> = parse(RESOURCE, response.body())?;
        let confirmed = envelope.into_data(RESOURCE).map_err(|e| match e {
            AgriError::Fetch { reason, .. } => switch_error(reason),
            other => other,
        })?;
        if confirmed.phone != phone {
            return Err(AgriError::shape(
                RESOURCE,
                format!("backend confirmed {} instead", confirmed.phone),
            ));
        }
        Ok(confirmed)
    }

    /// Fetch a profile-scoped resource for whichever profile the backend
    /// considers active.
    pub async fn fetch<R: DependentResource>(&self) -> Result<R> {
        let response = self
            .execute(ApiRequest::get(R::PATH))
            .await
            .map_err(|e| AgriError::fetch(R::NAME, e.to_string()))?;
        if !response.is_success() {
            return Err(AgriError::fetch(R::NAME, response.failure_reason()));
        }
        R::parse(response.body())
    }

    pub async fn chat(&self, question: &str) -> Result<ChatReply> {
        const RESOURCE: &str = "chat";
        let request = ApiRequest::post(CHAT_PATH)
            .json(&serde_json::json!({ "question": question }))?;
        let response = self
            .execute(request)
            .await
            .map_err(|e| AgriError::fetch(RESOURCE, e.to_string()))?;
        if !response.is_success() {
            return Err(AgriError::fetch(RESOURCE, response.failure_reason()));
        }
        parse(RESOURCE, response.body())
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        const RESOURCE: &str = "health";
        let response = self
            .execute(ApiRequest::get(HEALTH_PATH))
            .await
            .map_err(|e| AgriError::fetch(RESOURCE, e.to_string()))?;
        if !response.is_success() {
            return Err(AgriError::fetch(RESOURCE, response.failure_reason()));
        }
        parse(RESOURCE, response.body())
    }
}

fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
