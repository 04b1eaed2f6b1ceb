//! Bind and unbind
//!
//! A binding is a named contact user on the instance's upstream account, so
//! binding requires `parameters.email`.

use super::instances::ignore_gone;
use super::{require_ids, Broker};
use crate::error::{BrokerError, BrokerResult};
use osb_types::{BindRequest, BindingCredentials, NewServiceBinding, UnbindQuery};
use serde_json::Value;

/// Result of an accepted bind request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// New binding (201)
    Created(BindingCredentials),
    /// Identical binding already present (200)
    Existing(BindingCredentials),
}

impl Broker {
    /// Bind `binding_id` to `instance_id`
    pub async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        request: BindRequest,
    ) -> BrokerResult<BindOutcome> {
        let (service_id, plan_id) = require_ids(request.service_id, request.plan_id)?;
        let _guard = self.locks.acquire(instance_id).await;

        let instance = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("instance {} not found", instance_id)))?;

        if let Some(existing) = self.store.get_binding(binding_id).await? {
            if existing.instance_id == instance_id && existing.matches(&service_id, &plan_id) {
                return Ok(BindOutcome::Existing(existing.credentials));
            }
            return Err(BrokerError::Conflict(format!(
                "binding {} already exists with different attributes",
                binding_id
            )));
        }

        let parameters = request.parameters.unwrap_or_default();
        let email = parameters
            .get("email")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                BrokerError::RequiresApp(
                    "binding requires parameters.email naming the contact user to create"
                        .to_string(),
                )
            })?;

        let mut extra = parameters.clone();
        extra.remove("email");

        let user = self
            .upstream
            .create_contact_user(&instance.upstream.account_id, &email, &extra)
            .await?;

        let data = NewServiceBinding {
            service_id,
            plan_id,
            bind_resource: request.bind_resource,
            parameters,
            credentials: BindingCredentials {
                user_id: user.id.clone(),
                email,
                account_id: instance.upstream.account_id.clone(),
            },
            upstream_user_id: user.id.clone(),
        };

        match self.store.create_binding(instance_id, binding_id, data).await {
            Ok(binding) => {
                tracing::info!(instance_id, binding_id, user_id = %user.id, "Binding created");
                Ok(BindOutcome::Created(binding.credentials))
            }
            Err(e) => {
                if let Err(cleanup) = ignore_gone(self.upstream.delete_contact_user(&user.id).await)
                {
                    tracing::warn!(binding_id, error = %cleanup, "Could not remove contact user");
                }
                Err(e.into())
            }
        }
    }

    /// Remove `binding_id`. The local record is kept if the upstream delete
    /// fails so the platform can retry.
    pub async fn unbind(
        &self,
        instance_id: &str,
        binding_id: &str,
        query: UnbindQuery,
    ) -> BrokerResult<()> {
        let (service_id, plan_id) = require_ids(query.service_id, query.plan_id)?;
        let _guard = self.locks.acquire(instance_id).await;

        let binding = self
            .store
            .get_binding(binding_id)
            .await?
            .filter(|b| b.instance_id == instance_id)
            .ok_or_else(|| BrokerError::Gone(format!("binding {} does not exist", binding_id)))?;

        if !binding.matches(&service_id, &plan_id) {
            return Err(BrokerError::Conflict(format!(
                "service_id or plan_id does not match binding {}",
                binding_id
            )));
        }

        ignore_gone(
            self.upstream
                .delete_contact_user(&binding.upstream_user_id)
                .await,
        )?;
        self.store.delete_binding(binding_id).await?;

        tracing::info!(instance_id, binding_id, "Binding removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::engine::testing::RecordingUpstream;
    use crate::storage::InMemoryStore;
    use osb_types::ProvisionRequest;
    use osb_upstream::UpstreamError;
    use serde_json::json;
    use std::sync::Arc;

    async fn setup() -> (Arc<Broker>, Arc<RecordingUpstream>) {
        let upstream = Arc::new(RecordingUpstream::new());
        let broker = Arc::new(Broker::new(
            Arc::new(InMemoryStore::new()),
            upstream.clone(),
            BrokerConfig::default(),
        ));
        broker
            .provision(
                "i1",
                ProvisionRequest {
                    service_id: Some("waf".into()),
                    plan_id: Some("standard".into()),
                    ..Default::default()
                },
                false,
            )
            .await
            .unwrap();
        (broker, upstream)
    }

    fn bind_request(parameters: serde_json::Value) -> BindRequest {
        BindRequest {
            service_id: Some("waf".into()),
            plan_id: Some("standard".into()),
            bind_resource: Some(json!({"app_guid": "app-1"})),
            parameters: parameters.as_object().cloned(),
        }
    }

    fn unbind_query() -> UnbindQuery {
        UnbindQuery {
            service_id: Some("waf".into()),
            plan_id: Some("standard".into()),
        }
    }

    #[tokio::test]
    async fn test_bind_requires_email() {
        let (broker, upstream) = setup().await;

        let err = broker
            .bind("i1", "b1", bind_request(json!({"role": "admin"})))
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::RequiresApp(_)));
        assert_eq!(err.code(), Some("RequiresApp"));
        assert_eq!(upstream.count("create_contact_user"), 0);
    }

    #[tokio::test]
    async fn test_bind_creates_contact_user() {
        let (broker, upstream) = setup().await;
        let instance = broker.store.get_instance("i1").await.unwrap().unwrap();

        let outcome = broker
            .bind("i1", "b1", bind_request(json!({"email": "ops@example.com"})))
            .await
            .unwrap();

        let BindOutcome::Created(credentials) = outcome else {
            panic!("expected a new binding");
        };
        assert_eq!(credentials.email, "ops@example.com");
        assert_eq!(credentials.account_id, instance.upstream.account_id);
        assert_eq!(
            upstream.calls().last().unwrap(),
            &format!(
                "create_contact_user:{}:ops@example.com",
                instance.upstream.account_id
            )
        );
    }

    #[tokio::test]
    async fn test_bind_is_idempotent_and_detects_conflict() {
        let (broker, upstream) = setup().await;
        let request = bind_request(json!({"email": "ops@example.com"}));

        let first = broker.bind("i1", "b1", request.clone()).await.unwrap();
        let second = broker.bind("i1", "b1", request).await.unwrap();

        let (BindOutcome::Created(a), BindOutcome::Existing(b)) = (first, second) else {
            panic!("expected created then existing");
        };
        assert_eq!(a, b);
        assert_eq!(upstream.count("create_contact_user"), 1);

        let mut other_plan = bind_request(json!({"email": "ops@example.com"}));
        other_plan.plan_id = Some("enterprise".into());
        let err = broker.bind("i1", "b1", other_plan).await.unwrap_err();
        assert!(matches!(err, BrokerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_bind_unknown_instance_is_not_found() {
        let (broker, _) = setup().await;
        let err = broker
            .bind("nope", "b1", bind_request(json!({"email": "a@b.c"})))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_bind_upstream_failure_leaves_no_binding() {
        let (broker, upstream) = setup().await;
        upstream.fail(
            "create_contact_user",
            UpstreamError::from_status("create contact user", 422, Some("bad email")),
        );

        let err = broker
            .bind("i1", "b1", bind_request(json!({"email": "ops@example.com"})))
            .await
            .unwrap_err();

        assert_eq!(err.status().as_u16(), 422);
        assert!(broker.store.get_binding("b1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unbind() {
        let (broker, upstream) = setup().await;
        broker
            .bind("i1", "b1", bind_request(json!({"email": "ops@example.com"})))
            .await
            .unwrap();

        broker.unbind("i1", "b1", unbind_query()).await.unwrap();
        assert!(broker.store.get_binding("b1").await.unwrap().is_none());
        assert_eq!(upstream.count("delete_contact_user"), 1);

        let err = broker.unbind("i1", "b1", unbind_query()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Gone(_)));
    }

    #[tokio::test]
    async fn test_unbind_validation_and_conflict() {
        let (broker, _) = setup().await;
        broker
            .bind("i1", "b1", bind_request(json!({"email": "ops@example.com"})))
            .await
            .unwrap();

        let err = broker
            .unbind("i1", "b1", UnbindQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Validation(_)));

        let err = broker
            .unbind(
                "i1",
                "b1",
                UnbindQuery {
                    service_id: Some("waf".into()),
                    plan_id: Some("enterprise".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unbind_upstream_failure_keeps_binding() {
        let (broker, upstream) = setup().await;
        broker
            .bind("i1", "b1", bind_request(json!({"email": "ops@example.com"})))
            .await
            .unwrap();
        upstream.fail(
            "delete_contact_user",
            UpstreamError::no_response("delete contact user"),
        );

        let err = broker.unbind("i1", "b1", unbind_query()).await.unwrap_err();

        assert_eq!(err.status().as_u16(), 502);
        assert!(broker.store.get_binding("b1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unbind_tolerates_user_already_gone() {
        let (broker, upstream) = setup().await;
        broker
            .bind("i1", "b1", bind_request(json!({"email": "ops@example.com"})))
            .await
            .unwrap();
        upstream.fail(
            "delete_contact_user",
            UpstreamError::from_status("delete contact user", 404, None),
        );

        broker.unbind("i1", "b1", unbind_query()).await.unwrap();
        assert!(broker.store.get_binding("b1").await.unwrap().is_none());
    }
}
