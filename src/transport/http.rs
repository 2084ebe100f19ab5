use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use url::Url;

use super::Transport;
use crate::api::{ApiRequest, ApiResponse, LocalizedRequest};
use crate::config::ClientConfig;
use crate::{AgriError, Result};

/// Talks to the backend over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()?;

        let mut base_url = config.base_url.clone();
        if base_url.cannot_be_a_base() {
            return Err(AgriError::Config(format!(
                "{} cannot be used as a base URL",
                base_url
            )));
        }
        // relative joins would otherwise drop the last path segment
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url> {
        let mut url = self
            .base_url
            .join(request.path().trim_start_matches('/'))?;
        if !request.query_pairs().is_empty() {
            url.query_pairs_mut().extend_pairs(request.query_pairs());
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &LocalizedRequest) -> Result<ApiResponse> {
        let request = request.request();
        let url = self.url_for(request)?;
        let mut builder = self.client.request(request.method().clone(), url);
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(ApiResponse::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn transport(base: &str) -> HttpTransport {
        let config = ClientConfig::new(Url::parse(base).unwrap());
        HttpTransport::new(&config).unwrap()
    }

    #[rstest]
    #[case("http://localhost:8000", "/profile/", "http://localhost:8000/profile/")]
    #[case("http://farm.example/api", "/forecast/", "http://farm.example/api/forecast/")]
    #[case("http://farm.example/api/", "health", "http://farm.example/api/health")]
    fn paths_join_onto_base(
        #[case] base: &str,
        #[case] path: &str,
        #[case] expected: &str,
    ) {
        let url = transport(base).url_for(&ApiRequest::get(path)).unwrap();
        assert_eq!(url.as_str(), expected);
    }

    #[test]
    fn query_is_appended() {
        let request = ApiRequest::get("/irrigation/")
            .query("lang", "mr")
            .query("note", "a b");
        let url = transport("http://localhost:8000")
            .url_for(&request)
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/irrigation/?lang=mr&note=a+b");
    }

    #[test]
    fn opaque_base_is_rejected() {
        let base = Url::parse("mailto:farmer@example.com").unwrap();
        let config = ClientConfig::new(base);
        assert!(matches!(
            HttpTransport::new(&config),
            Err(AgriError::Config(_))
        ));
    }
}
