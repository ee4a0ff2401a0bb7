// src/registration/client.rs

//! Control-service registration.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::RegistrationError;
use crate::registration::retry::{RetryPolicy, register_with_retry};
use crate::types::RegistrationInfo;

/// Remote call that turns an endpoint id into channel descriptors.
///
/// Production code uses [`HttpControlService`]; tests provide their own
/// implementation that records calls.
pub trait ControlService: Send + Sync {
    fn register_endpoint<'a>(
        &'a self,
        endpoint_id: &'a str,
    ) -> BoxFuture<'a, Result<RegistrationInfo, RegistrationError>>;
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    endpoint_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint_name: Option<&'a str>,
}

/// `POST {service_url}/endpoints` over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpControlService {
    client: reqwest::Client,
    service_url: String,
    token: Option<String>,
    endpoint_name: Option<String>,
}

impl HttpControlService {
    pub fn new(
        service_url: impl Into<String>,
        token: Option<String>,
        endpoint_name: Option<String>,
    ) -> Result<Self, RegistrationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            service_url: service_url.into(),
            token,
            endpoint_name,
        })
    }

    fn endpoints_url(&self) -> String {
        format!("{}/endpoints", self.service_url.trim_end_matches('/'))
    }
}

impl ControlService for HttpControlService {
    fn register_endpoint<'a>(
        &'a self,
        endpoint_id: &'a str,
    ) -> BoxFuture<'a, Result<RegistrationInfo, RegistrationError>> {
        Box::pin(async move {
            let body = RegisterRequest {
                endpoint_id,
                endpoint_name: self.endpoint_name.as_deref(),
            };

            let mut request = self.client.post(self.endpoints_url()).json(&body);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(RegistrationError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }

            let info: RegistrationInfo = response
                .json()
                .await
                .map_err(|e| RegistrationError::InvalidResponse(e.to_string()))?;
            info.validate()
                .map_err(|e| RegistrationError::InvalidResponse(e.to_string()))?;

            Ok(info)
        })
    }
}

/// Explicitly constructed registration client owned by the interchange.
#[derive(Clone)]
pub struct RegistrationClient {
    service: Option<Arc<dyn ControlService>>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RegistrationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationClient")
            .field("configured", &self.service.is_some())
            .field("policy", &self.policy)
            .finish()
    }
}

impl RegistrationClient {
    pub fn new(service: Arc<dyn ControlService>, policy: RetryPolicy) -> Self {
        Self {
            service: Some(service),
            policy,
        }
    }

    /// A client with no control service; only usable with pre-supplied
    /// registration info.
    pub fn disabled() -> Self {
        Self {
            service: None,
            policy: RetryPolicy::single_attempt(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn can_register(&self) -> bool {
        self.service.is_some()
    }

    /// Register `endpoint_id`, retrying per the configured policy.
    pub async fn register(&self, endpoint_id: &str) -> Result<RegistrationInfo, RegistrationError> {
        let service = self
            .service
            .as_ref()
            .ok_or(RegistrationError::NotConfigured)?;

        info!(
            endpoint_id,
            max_attempts = ?self.policy.max_attempts,
            "registering endpoint with control service"
        );

        match register_with_retry(|| service.register_endpoint(endpoint_id), &self.policy).await {
            Ok(info) => {
                info!(
                    endpoint_id,
                    task_exchange = %info.tasks.exchange_name,
                    result_exchange = %info.results.exchange_name,
                    "endpoint registered"
                );
                Ok(info)
            }
            Err(exhausted) => {
                warn!(
                    endpoint_id,
                    attempts = exhausted.attempts,
                    error = %exhausted.last,
                    "registration retries exhausted"
                );
                Err(RegistrationError::Exhausted {
                    attempts: exhausted.attempts,
                    last: Box::new(exhausted.last),
                })
            }
        }
    }
}
