//! A small stateful stand-in for the advisory backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use agritwin::api::{ApiResponse, LocalizedRequest};
use agritwin::transport::Transport;
use agritwin::{Profile, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use tokio::sync::{oneshot, Notify};

pub const DASHBOARD_PATH: &str = "/agri-advisor/dashboard";

#[derive(Default)]
pub struct FakeBackend {
    profiles: Mutex<Vec<Profile>>,
    gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    listing_gate: Mutex<Option<oneshot::Receiver<()>>>,
    sent: Mutex<Vec<LocalizedRequest>>,
    arrivals: Notify,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: Vec<Profile>) -> Self {
        let backend = Self::new();
        *backend.profiles.lock().unwrap() = profiles;
        backend
    }

    pub fn profiles(&self) -> Vec<Profile> {
        self.profiles.lock().unwrap().clone()
    }

    /// Hold dashboard responses computed for `phone` until released.
    pub fn gate_dashboard(&self, phone: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(phone.to_owned(), rx);
        tx
    }

    /// Hold the next profile listing, taken as it stands on arrival,
    /// until released.
    pub fn gate_listing(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.listing_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn requests(&self) -> Vec<LocalizedRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| {
                r.request().method() == method && r.request().path() == path
            })
            .count()
    }

    pub async fn wait_for(&self, method: &Method, path: &str, n: usize) {
        loop {
            let arrived = self.arrivals.notified();
            if self.count(method, path) >= n {
                return;
            }
            arrived.await;
        }
    }

    async fn list(&self) -> ApiResponse {
        let response = ApiResponse::json(
            200,
            &json!({
                "success": true,
                "data": self.profiles(),
                "message": "Profiles fetched successfully"
            }),
        );
        let gate = self.listing_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        response
    }

    fn save(&self, body: Option<&serde_json::Value>) -> ApiResponse {
        let Some(draft) = body
            .cloned()
            .and_then(|b| serde_json::from_value::<Profile>(b).ok())
        else {
            return ApiResponse::json(422, &json!({"detail": "invalid body"}));
        };
        let mut profiles = self.profiles.lock().unwrap();
        let action = match profiles.iter_mut().find(|p| p.phone == draft.phone)
        {
            Some(existing) => {
                let candidate = Profile {
                    active: existing.active,
                    ..draft
                };
                if *existing == candidate {
                    "none"
                } else {
                    *existing = candidate;
                    "updated"
                }
            }
            None => {
                for profile in profiles.iter_mut() {
                    profile.active = false;
                }
                profiles.push(Profile {
                    active: true,
                    ..draft
                });
                "created"
            }
        };
        ApiResponse::json(200, &json!({ "action": action }))
    }

    fn switch(&self, phone: &str) -> ApiResponse {
        let mut profiles = self.profiles.lock().unwrap();
        if !profiles.iter().any(|p| p.phone == phone) {
            return ApiResponse::json(
                404,
                &json!({"detail": "Profile not found"}),
            );
        }
        for profile in profiles.iter_mut() {
            profile.active = profile.phone == phone;
        }
        let active = profiles.iter().find(|p| p.active).cloned();
        ApiResponse::json(
            200,
            &json!({"success": true, "data": active, "message": "switched"}),
        )
    }

    async fn dashboard(&self) -> ApiResponse {
        let active = self
            .profiles()
            .into_iter()
            .find(|p| p.active)
            .map(|p| p.phone);
        let Some(phone) = active else {
            return ApiResponse::json(
                404,
                &json!({"detail": "No active profile found"}),
            );
        };
        let gate = self.gates.lock().unwrap().remove(&phone);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        ApiResponse::json(
            200,
            &json!({
                "profile": {"phone": phone},
                "recommendations": [{
                    "crop": format!("crop for {phone}"),
                    "score": 0.9,
                    "rationale": "computed for the active profile"
                }],
                "pest_alerts": []
            }),
        )
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: &LocalizedRequest) -> Result<ApiResponse> {
        self.sent.lock().unwrap().push(request.clone());
        self.arrivals.notify_waiters();

        let inner = request.request();
        let (method, path) = (inner.method(), inner.path());
        let response = if path == "/profile/" && *method == Method::GET {
            self.list().await
        } else if path == "/profile/" && *method == Method::POST {
            self.save(inner.body())
        } else if let Some(phone) = path.strip_prefix("/profile/switch/") {
            self.switch(phone)
        } else if path == DASHBOARD_PATH && *method == Method::GET {
            self.dashboard().await
        } else {
            ApiResponse::json(404, &json!({"detail": "Not Found"}))
        };
        Ok(response)
    }
}

pub fn profile(phone: &str, active: bool) -> Profile {
    Profile {
        phone: phone.to_owned(),
        name: format!("Farmer {phone}"),
        location: "413512".to_owned(),
        crop: Some(agritwin::Crop::Wheat),
        farm_area: 2.5,
        sms_alerts: false,
        active,
    }
}
