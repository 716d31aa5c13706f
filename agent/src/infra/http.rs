//! HTTP implementations of the `ControlPlane` and `ActivationIssuer` ports.
//!
//! Every host call carries a fresh host token built from the bound host UUID
//! at the moment of the call. There is no session to cache or refresh.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use outpost_common::token;
use outpost_common::{PingRequest, PingResponse, RegistrationRequest, RegistrationResponse};
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::application::ports::{ActivationIssuer, ControlPlane};
use crate::domain::PlaneError;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the shared HTTP client.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn build_client(timeout: Duration, insecure_skip_verify: bool) -> Result<reqwest::Client> {
    if insecure_skip_verify {
        tracing::warn!("TLS certificate verification is disabled");
    }
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .danger_accept_invalid_certs(insecure_skip_verify)
        .user_agent(concat!("outpost/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{path}", base.trim_end_matches('/'))
}

/// Control-plane client bound to one activated host.
pub struct HttpControlPlane {
    client: reqwest::Client,
    base: String,
    host_uuid: String,
}

impl HttpControlPlane {
    #[must_use]
    pub fn new(client: reqwest::Client, base: &str, host_uuid: &str) -> Self {
        Self {
            client,
            base: base.to_owned(),
            host_uuid: host_uuid.to_owned(),
        }
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = endpoint(&self.base, path);
        let bearer = format!("Bearer {}", token::issue(&self.host_uuid, Utc::now()));
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, bearer)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PlaneError::Status {
                url,
                status: status.as_u16(),
                body: text.trim().to_owned(),
            }
            .into());
        }
        response
            .json()
            .await
            .with_context(|| format!("decoding response from {url}"))
    }
}

impl ControlPlane for HttpControlPlane {
    async fn register(&self, request: &RegistrationRequest) -> Result<RegistrationResponse> {
        self.post("register", request).await
    }

    async fn ping(&self, request: &PingRequest) -> Result<PingResponse> {
        self.post("ping", request).await
    }
}

/// Activation requests, made before the host has an identity.
pub struct HttpActivationIssuer {
    client: reqwest::Client,
}

impl HttpActivationIssuer {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ActivationIssuer for HttpActivationIssuer {
    async fn request_activation_key(&self, uri: &str, bearer: &str) -> Result<Vec<u8>> {
        let url = endpoint(uri, "activation-key");
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, bearer)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("reading response from {url}"))?;
        if status != StatusCode::CREATED {
            bail!(
                "POST {url} returned {status}: {}",
                String::from_utf8_lossy(&body).trim()
            );
        }
        Ok(body.to_vec())
    }
}
