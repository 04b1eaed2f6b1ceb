//! HTTP client for the provisioning service

use crate::api::{
    AccountRecord, CreateAccountRequest, CreateServiceRequest, ProvisioningApi, ServiceRecord,
    UserRecord,
};
use crate::config::UpstreamConfig;
use crate::error::{is_retryable_status, UpstreamError, UpstreamResult};
use async_trait::async_trait;
use osb_types::{Params, RetryPolicy};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// Provisioning API client with bounded retry on transient failures
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    retry: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            retry: config.retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, body: Option<&Value>) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder
    }

    /// Send with retry. Transport failures and 5xx/408/429 are retried with
    /// capped exponential backoff; any other status is returned immediately.
    async fn send(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> UpstreamResult<Response> {
        let attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            let last = attempt + 1 >= attempts;

            match self.request(method.clone(), path, body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if !is_retryable_status(status.as_u16()) || last {
                        let code = status.as_u16();
                        let detail = error_detail(response).await;
                        tracing::debug!(operation, status = code, "Upstream call rejected");
                        return Err(UpstreamError::from_status(operation, code, detail.as_deref()));
                    }
                    tracing::warn!(
                        operation,
                        status = status.as_u16(),
                        attempt = attempt + 1,
                        "Transient upstream failure, retrying"
                    );
                }
                Err(e) => {
                    if last {
                        tracing::warn!(operation, error = %e, "Upstream unreachable");
                        return Err(UpstreamError::no_response(operation));
                    }
                    tracing::warn!(
                        operation,
                        error = %e,
                        attempt = attempt + 1,
                        "Upstream request failed, retrying"
                    );
                }
            }

            tokio::time::sleep(self.retry.delay_for(attempt)).await;
            attempt += 1;
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> UpstreamResult<T> {
        let response = self.send(operation, method, path, body).await?;
        response.json::<T>().await.map_err(|e| {
            tracing::warn!(operation, error = %e, "Unreadable upstream response");
            UpstreamError::invalid_response(operation)
        })
    }

    async fn send_empty(&self, operation: &str, method: Method, path: &str) -> UpstreamResult<()> {
        self.send(operation, method, path, None).await.map(|_| ())
    }
}

/// Pull a human-readable message out of an upstream error body, if any.
async fn error_detail(response: Response) -> Option<String> {
    let body: Value = response.json().await.ok()?;
    ["message", "description", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn to_value<T: serde::Serialize>(operation: &str, value: &T) -> UpstreamResult<Value> {
    serde_json::to_value(value).map_err(|_| UpstreamError::invalid_response(operation))
}

#[async_trait]
impl ProvisioningApi for UpstreamClient {
    async fn create_account(
        &self,
        request: &CreateAccountRequest,
    ) -> UpstreamResult<AccountRecord> {
        let op = "create account";
        let body = to_value(op, request)?;
        self.send_json(op, Method::POST, "/accounts", Some(&body))
            .await
    }

    async fn create_service(
        &self,
        request: &CreateServiceRequest,
    ) -> UpstreamResult<ServiceRecord> {
        let op = "create service";
        let body = to_value(op, request)?;
        self.send_json(op, Method::POST, "/services", Some(&body))
            .await
    }

    async fn delete_service(&self, service_id: &str) -> UpstreamResult<()> {
        self.send_empty(
            "delete service",
            Method::DELETE,
            &format!("/services/{}", service_id),
        )
        .await
    }

    async fn delete_account(&self, account_id: &str) -> UpstreamResult<()> {
        self.send_empty(
            "delete account",
            Method::DELETE,
            &format!("/accounts/{}", account_id),
        )
        .await
    }

    async fn create_contact_user(
        &self,
        account_id: &str,
        email: &str,
        extra: &Params,
    ) -> UpstreamResult<UserRecord> {
        let mut body = extra.clone();
        body.insert("email".to_string(), Value::String(email.to_string()));
        self.send_json(
            "create contact user",
            Method::POST,
            &format!("/accounts/{}/users", account_id),
            Some(&Value::Object(body)),
        )
        .await
    }

    async fn delete_contact_user(&self, user_id: &str) -> UpstreamResult<()> {
        self.send_empty(
            "delete contact user",
            Method::DELETE,
            &format!("/users/{}", user_id),
        )
        .await
    }

    async fn update_plan(
        &self,
        service_id: &str,
        new_plan_id: &str,
        extra: &Params,
    ) -> UpstreamResult<ServiceRecord> {
        let mut body = extra.clone();
        body.insert("plan_id".to_string(), Value::String(new_plan_id.to_string()));
        self.send_json(
            "update plan",
            Method::PATCH,
            &format!("/services/{}/plan", service_id),
            Some(&Value::Object(body)),
        )
        .await
    }

    async fn ping(&self) -> bool {
        // Single attempt; health checks must not stall on backoff
        match self
            .request(Method::GET, "/accounts?limit=1", None)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                status.is_success() || status.as_u16() == 404
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamFailureKind;
    use axum::{
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
        routing::{delete, post},
        Json, Router,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Calls(Arc<AtomicUsize>);

    impl Calls {
        fn bump(&self) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn get(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    async fn spawn_mock(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client_for(base_url: String, max_retries: u32) -> UpstreamClient {
        UpstreamClient::new(&UpstreamConfig {
            base_url,
            api_token: Some("secret".into()),
            timeout_secs: 5,
            retry: RetryPolicy {
                max_retries,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
        })
        .unwrap()
    }

    fn account_request() -> CreateAccountRequest {
        CreateAccountRequest {
            name: "osb-i1".into(),
            external_id: "i1".into(),
            plan_id: "standard".into(),
            context: Params::new(),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failure_then_succeeds() {
        let calls = Calls::default();
        let app = Router::new()
            .route(
                "/accounts",
                post(|State(calls): State<Calls>| async move {
                    if calls.bump() == 1 {
                        StatusCode::SERVICE_UNAVAILABLE.into_response()
                    } else {
                        Json(serde_json::json!({"id": "acct-1"})).into_response()
                    }
                }),
            )
            .with_state(calls.clone());

        let client = client_for(spawn_mock(app).await, 3);
        let account = client.create_account(&account_request()).await.unwrap();

        assert_eq!(account.id, "acct-1");
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Calls::default();
        let app = Router::new()
            .route(
                "/accounts",
                post(|State(calls): State<Calls>| async move {
                    calls.bump();
                    StatusCode::TOO_MANY_REQUESTS
                }),
            )
            .with_state(calls.clone());

        let client = client_for(spawn_mock(app).await, 2);
        let err = client.create_account(&account_request()).await.unwrap_err();

        assert_eq!(err.status, 502);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let calls = Calls::default();
        let app = Router::new()
            .route(
                "/services",
                post(|State(calls): State<Calls>| async move {
                    calls.bump();
                    (
                        StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({"message": "unknown plan"})),
                    )
                }),
            )
            .with_state(calls.clone());

        let client = client_for(spawn_mock(app).await, 3);
        let err = client
            .create_service(&CreateServiceRequest {
                account_id: "acct-1".into(),
                name: "osb-i1".into(),
                plan_id: "nope".into(),
                parameters: Params::new(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.status, 400);
        assert!(err.description.contains("unknown plan"));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_not_found_maps_to_gone() {
        let app = Router::new().route(
            "/services/:id",
            delete(|Path(_id): Path<String>| async { StatusCode::NOT_FOUND }),
        );

        let client = client_for(spawn_mock(app).await, 3);
        let err = client.delete_service("svc-1").await.unwrap_err();

        assert_eq!(err.status, 410);
        assert!(err.is_gone());
    }

    #[tokio::test]
    async fn test_auth_rejection_maps_to_bad_gateway() {
        let app = Router::new().route(
            "/accounts/:id",
            delete(|| async { StatusCode::UNAUTHORIZED }),
        );

        let client = client_for(spawn_mock(app).await, 3);
        let err = client.delete_account("acct-1").await.unwrap_err();

        assert_eq!(err.status, 502);
        assert_eq!(err.kind, UpstreamFailureKind::AuthRejected);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_maps_to_bad_gateway() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_for(format!("http://{}", addr), 1);
        let err = client.delete_contact_user("u1").await.unwrap_err();

        assert_eq!(err.status, 502);
        assert_eq!(err.kind, UpstreamFailureKind::NoResponse);
        assert!(!client.ping().await);
    }

    #[tokio::test]
    async fn test_contact_user_sends_email() {
        let app = Router::new().route(
            "/accounts/:id/users",
            post(
                |Path(id): Path<String>, Json(body): Json<serde_json::Value>| async move {
                    Json(serde_json::json!({
                        "id": format!("{}-user", id),
                        "email": body["email"],
                    }))
                },
            ),
        );

        let client = client_for(spawn_mock(app).await, 0);
        let user = client
            .create_contact_user("acct-9", "ops@example.com", &Params::new())
            .await
            .unwrap();

        assert_eq!(user.id, "acct-9-user");
        assert_eq!(user.email.as_deref(), Some("ops@example.com"));
    }
}
