use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Method;
use tokio::sync::{oneshot, Notify};

use super::Transport;
use crate::api::{ApiResponse, LocalizedRequest};
use crate::{AgriError, Result};

enum Reply {
    Ready(ApiResponse),
    Held(oneshot::Receiver<ApiResponse>),
    Unreachable(String),
}

#[derive(Default)]
struct Route {
    queued: VecDeque<Reply>,
    sticky: Option<ApiResponse>,
}

/// Scripted in-process backend. Replies are matched on method and path
/// (query excluded): queued replies are used once each in order, then
/// the sticky reply, then `404 {"detail": "Not Found"}`.
#[derive(Default)]
pub struct MemoryTransport {
    routes: Mutex<HashMap<(Method, String), Route>>,
    sent: Mutex<Vec<LocalizedRequest>>,
    arrivals: Notify,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, method: Method, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry((method, path.to_owned()))
            .or_default()
            .queued
            .push_back(reply);
    }

    /// Answer the next matching request once.
    pub fn respond(
        &self,
        method: Method,
        path: &str,
        status: u16,
        body: serde_json::Value,
    ) {
        let reply = Reply::Ready(ApiResponse::json(status, &body));
        self.enqueue(method, path, reply);
    }

    /// Answer every matching request not covered by a queued reply.
    pub fn respond_always(
        &self,
        method: Method,
        path: &str,
        status: u16,
        body: serde_json::Value,
    ) {
        self.routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry((method, path.to_owned()))
            .or_default()
            .sticky = Some(ApiResponse::json(status, &body));
    }

    /// Fail the next matching request as if the backend were down.
    pub fn fail(&self, method: Method, path: &str, reason: &str) {
        self.enqueue(method, path, Reply::Unreachable(reason.to_owned()));
    }

    /// Keep the next matching request in flight until the returned sender
    /// delivers its reply. Dropping the sender fails the request.
    pub fn hold(
        &self,
        method: Method,
        path: &str,
    ) -> oneshot::Sender<ApiResponse> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(method, path, Reply::Held(rx));
        tx
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<LocalizedRequest> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|r| {
                r.request().method() == method && r.request().path() == path
            })
            .count()
    }

    /// Wait until at least `n` matching requests have arrived.
    pub async fn wait_for(&self, method: &Method, path: &str, n: usize) {
        loop {
            let arrived = self.arrivals.notified();
            if self.count(method, path) >= n {
                return;
            }
            arrived.await;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: &LocalizedRequest) -> Result<ApiResponse> {
        let key = (
            request.request().method().clone(),
            request.request().path().to_owned(),
        );
        let reply = {
            let mut routes = self
                .routes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let route = routes.get_mut(&key);
            match route {
                Some(route) => match route.queued.pop_front() {
                    Some(reply) => Some(reply),
                    None => route.sticky.clone().map(Reply::Ready),
                },
                None => None,
            }
        };
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        self.arrivals.notify_waiters();

        match reply {
            Some(Reply::Ready(response)) => Ok(response),
            Some(Reply::Held(rx)) => rx.await.map_err(|_| {
                AgriError::Network("connection closed".to_owned())
            }),
            Some(Reply::Unreachable(reason)) => Err(AgriError::Network(reason)),
            None => Ok(ApiResponse::json(
                404,
                &serde_json::json!({ "detail": "Not Found" }),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiRequest;
    use crate::locale::LocaleNegotiator;
    use crate::storage::MemoryPreferences;
    use serde_json::json;
    use std::sync::Arc;

    fn localized(request: ApiRequest) -> LocalizedRequest {
        let prefs = Arc::new(MemoryPreferences::new());
        LocaleNegotiator::new(prefs, None).decorate(request)
    }

    #[tokio::test]
    async fn queued_then_sticky_then_not_found() {
        let transport = MemoryTransport::new();
        transport.respond(Method::GET, "/health", 503, json!({}));
        transport.respond_always(
            Method::GET,
            "/health",
            200,
            json!({"status": "healthy"}),
        );

        let request = localized(ApiRequest::get("/health"));
        assert_eq!(transport.send(&request).await.unwrap().status(), 503);
        assert_eq!(transport.send(&request).await.unwrap().status(), 200);
        assert_eq!(transport.send(&request).await.unwrap().status(), 200);

        let missing = transport
            .send(&localized(ApiRequest::get("/nowhere")))
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
        assert_eq!(missing.detail().as_deref(), Some("Not Found"));
        assert_eq!(transport.count(&Method::GET, "/health"), 3);
    }

    #[tokio::test]
    async fn held_reply_waits_for_release() {
        let transport = Arc::new(MemoryTransport::new());
        let release = transport.hold(Method::GET, "/forecast/");

        let sender = Arc::clone(&transport);
        let in_flight = tokio::spawn(async move {
            let request = localized(ApiRequest::get("/forecast/"));
            sender.send(&request).await
        });
        transport.wait_for(&Method::GET, "/forecast/", 1).await;
        assert!(!in_flight.is_finished());

        release
            .send(ApiResponse::json(200, &json!({"success": true})))
            .unwrap();
        let response = in_flight.await.unwrap().unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn dropped_hold_and_failures_are_network_errors() {
        let transport = MemoryTransport::new();
        drop(transport.hold(Method::GET, "/irrigation/"));
        transport.fail(Method::GET, "/irrigation/", "connection refused");

        let request = localized(ApiRequest::get("/irrigation/"));
        for _ in 0..2 {
            assert!(matches!(
                transport.send(&request).await,
                Err(AgriError::Network(_))
            ));
        }
    }
}
