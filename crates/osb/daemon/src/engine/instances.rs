//! Provision, update and deprovision

use super::{require_ids, Broker};
use crate::error::{BrokerError, BrokerResult};
use chrono::Utc;
use osb_types::{
    DeprovisionQuery, InstancePatch, NewOperation, NewServiceInstance, OperationType,
    ProvisionRequest, ServiceInstance, UpdateRequest, UpstreamRefs,
};
use osb_upstream::{CreateAccountRequest, CreateServiceRequest, UpstreamResult};
use std::sync::Arc;

/// Result of an accepted provision request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Created synchronously (201)
    Created { dashboard_url: String },
    /// Identical instance already present (200)
    AlreadyExists { dashboard_url: String },
    /// Running in the background (202)
    Accepted { operation: String },
}

/// Result of an accepted deprovision request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeprovisionOutcome {
    /// Removed synchronously (200)
    Deleted,
    /// Running in the background (202)
    Accepted { operation: String },
}

impl Broker {
    /// Provision `instance_id`
    pub async fn provision(
        self: &Arc<Self>,
        instance_id: &str,
        request: ProvisionRequest,
        accepts_incomplete: bool,
    ) -> BrokerResult<ProvisionOutcome> {
        let (service_id, plan_id) = require_ids(request.service_id, request.plan_id)?;
        let guard = self.locks.acquire(instance_id).await;

        if let Some(existing) = self.store.get_instance(instance_id).await? {
            if existing.matches(&service_id, &plan_id) {
                tracing::debug!(instance_id, "Instance already provisioned");
                return Ok(ProvisionOutcome::AlreadyExists {
                    dashboard_url: existing.dashboard_url,
                });
            }
            return Err(BrokerError::Conflict(format!(
                "instance {} already exists with a different service or plan",
                instance_id
            )));
        }

        if self.store.has_pending_operation(instance_id).await? {
            return Err(operation_in_progress(instance_id));
        }

        let data = NewServiceInstance {
            service_id,
            plan_id,
            context: request.context.unwrap_or_default(),
            parameters: request.parameters.unwrap_or_default(),
            upstream: UpstreamRefs {
                account_id: String::new(),
                service_id: String::new(),
            },
            dashboard_url: self.dashboard_url(instance_id),
        };

        if self.run_async(accepts_incomplete)? {
            let operation_id = OperationType::Provision.operation_id(instance_id, Utc::now());
            self.store
                .set_operation(
                    instance_id,
                    &operation_id,
                    NewOperation::in_progress(OperationType::Provision),
                )
                .await?;
            drop(guard);

            tracing::info!(instance_id, operation_id = %operation_id, "Provision accepted");

            let broker = self.clone();
            let id = instance_id.to_string();
            self.spawn_job(operation_id.clone(), async move {
                broker.create_upstream(&id, data).await.map(|_| ())
            });

            return Ok(ProvisionOutcome::Accepted {
                operation: operation_id,
            });
        }

        let instance = self.create_upstream(instance_id, data).await?;
        drop(guard);

        Ok(ProvisionOutcome::Created {
            dashboard_url: instance.dashboard_url,
        })
    }

    /// Create the upstream account and service, then the local record.
    ///
    /// No local record exists unless both upstream resources do; a failed
    /// step removes what the earlier steps created.
    async fn create_upstream(
        &self,
        instance_id: &str,
        mut data: NewServiceInstance,
    ) -> BrokerResult<ServiceInstance> {
        let account = self
            .upstream
            .create_account(&CreateAccountRequest {
                name: format!("osb-{}", instance_id),
                external_id: instance_id.to_string(),
                plan_id: data.plan_id.clone(),
                context: data.context.clone(),
            })
            .await?;

        let service = match self
            .upstream
            .create_service(&CreateServiceRequest {
                account_id: account.id.clone(),
                name: format!("waf-{}", instance_id),
                plan_id: data.plan_id.clone(),
                parameters: data.parameters.clone(),
            })
            .await
        {
            Ok(service) => service,
            Err(e) => {
                self.discard_account(instance_id, &account.id).await;
                return Err(e.into());
            }
        };

        data.upstream = UpstreamRefs {
            account_id: account.id,
            service_id: service.id,
        };
        let refs = data.upstream.clone();

        match self.store.create_instance(instance_id, data).await {
            Ok(instance) => {
                tracing::info!(
                    instance_id,
                    upstream_account = %instance.upstream.account_id,
                    upstream_service = %instance.upstream.service_id,
                    "Instance provisioned"
                );
                Ok(instance)
            }
            Err(e) => {
                tracing::error!(instance_id, error = %e, "Could not record instance, removing upstream resources");
                if let Err(cleanup) = self.remove_upstream(&refs).await {
                    tracing::warn!(instance_id, error = %cleanup, "Upstream cleanup failed");
                }
                Err(e.into())
            }
        }
    }

    async fn discard_account(&self, instance_id: &str, account_id: &str) {
        match self.upstream.delete_account(account_id).await {
            Ok(()) => {
                tracing::info!(instance_id, account_id, "Removed account after failed service creation");
            }
            Err(e) if e.is_gone() => {}
            Err(e) => {
                tracing::warn!(instance_id, account_id, error = %e, "Could not remove orphaned account");
            }
        }
    }

    /// Update `instance_id`. A plan change goes upstream first; local state is
    /// only touched once it succeeded.
    pub async fn update(&self, instance_id: &str, request: UpdateRequest) -> BrokerResult<()> {
        let _guard = self.locks.acquire(instance_id).await;

        let instance = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("instance {} not found", instance_id)))?;

        if self.store.has_pending_operation(instance_id).await? {
            return Err(operation_in_progress(instance_id));
        }

        if let Some(service_id) = request.service_id.as_deref() {
            if service_id != instance.service_id {
                return Err(BrokerError::Validation(format!(
                    "service_id {} does not match instance {}",
                    service_id, instance_id
                )));
            }
        }

        let new_plan = request
            .plan_id
            .filter(|plan| !plan.is_empty() && *plan != instance.plan_id);

        if let Some(plan_id) = &new_plan {
            let extra = request.parameters.clone().unwrap_or_default();
            self.upstream
                .update_plan(&instance.upstream.service_id, plan_id, &extra)
                .await?;
            tracing::info!(instance_id, plan_id = %plan_id, "Plan changed upstream");
        }

        let patch = InstancePatch {
            plan_id: new_plan,
            context: request.context,
            parameters: request.parameters,
        };
        if !patch.is_empty() {
            self.store.update_instance(instance_id, patch).await?;
        }

        Ok(())
    }

    /// Deprovision `instance_id`
    pub async fn deprovision(
        self: &Arc<Self>,
        instance_id: &str,
        query: DeprovisionQuery,
    ) -> BrokerResult<DeprovisionOutcome> {
        let (service_id, plan_id) = require_ids(query.service_id, query.plan_id)?;
        let guard = self.locks.acquire(instance_id).await;

        let instance = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| BrokerError::Gone(format!("instance {} does not exist", instance_id)))?;

        if !instance.matches(&service_id, &plan_id) {
            return Err(BrokerError::Conflict(format!(
                "service_id or plan_id does not match instance {}",
                instance_id
            )));
        }

        if self.store.has_pending_operation(instance_id).await? {
            return Err(operation_in_progress(instance_id));
        }

        if self.run_async(query.accepts_incomplete)? {
            let operation_id = OperationType::Deprovision.operation_id(instance_id, Utc::now());
            self.store
                .set_operation(
                    instance_id,
                    &operation_id,
                    NewOperation::in_progress(OperationType::Deprovision),
                )
                .await?;
            drop(guard);

            tracing::info!(instance_id, operation_id = %operation_id, "Deprovision accepted");

            let broker = self.clone();
            self.spawn_job(operation_id.clone(), async move {
                broker.teardown(&instance).await
            });

            return Ok(DeprovisionOutcome::Accepted {
                operation: operation_id,
            });
        }

        self.teardown(&instance).await?;
        drop(guard);

        Ok(DeprovisionOutcome::Deleted)
    }

    /// Delete upstream resources, service before account, then the local
    /// record with everything it owns.
    async fn teardown(&self, instance: &ServiceInstance) -> BrokerResult<()> {
        self.remove_upstream(&instance.upstream).await?;
        self.store.delete_instance(&instance.instance_id).await?;
        tracing::info!(instance_id = %instance.instance_id, "Instance deprovisioned");
        Ok(())
    }

    async fn remove_upstream(&self, refs: &UpstreamRefs) -> UpstreamResult<()> {
        ignore_gone(self.upstream.delete_service(&refs.service_id).await)?;
        ignore_gone(self.upstream.delete_account(&refs.account_id).await)
    }
}

/// Treat "already absent upstream" as a completed delete
pub(super) fn ignore_gone(result: UpstreamResult<()>) -> UpstreamResult<()> {
    match result {
        Err(e) if e.is_gone() => {
            tracing::debug!(error = %e, "Upstream resource already absent");
            Ok(())
        }
        other => other,
    }
}

pub(super) fn operation_in_progress(instance_id: &str) -> BrokerError {
    BrokerError::OperationInProgress(format!(
        "another operation for instance {} is in progress",
        instance_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AsyncMode, BrokerConfig};
    use crate::engine::testing::RecordingUpstream;
    use crate::storage::{BindingStore, InMemoryStore};
    use osb_types::{
        BindRequest, LastOperationQuery, LastOperationResponse, OperationState, Params,
    };
    use osb_upstream::UpstreamError;
    use serde_json::json;
    use std::time::Duration;

    fn setup_with(mode: AsyncMode) -> (Arc<Broker>, Arc<RecordingUpstream>) {
        let upstream = Arc::new(RecordingUpstream::new());
        let broker = Arc::new(Broker::new(
            Arc::new(InMemoryStore::new()),
            upstream.clone(),
            BrokerConfig {
                async_mode: mode,
                dashboard_base_url: "https://dash.example".into(),
            },
        ));
        (broker, upstream)
    }

    fn setup() -> (Arc<Broker>, Arc<RecordingUpstream>) {
        setup_with(AsyncMode::Optional)
    }

    fn provision_request(plan_id: &str) -> ProvisionRequest {
        ProvisionRequest {
            service_id: Some("svc".into()),
            plan_id: Some(plan_id.into()),
            context: None,
            parameters: json!({"domain": "shop.example"}).as_object().cloned(),
        }
    }

    fn deprovision_query(accepts_incomplete: bool) -> DeprovisionQuery {
        DeprovisionQuery {
            service_id: Some("svc".into()),
            plan_id: Some("standard".into()),
            accepts_incomplete,
        }
    }

    fn params(value: serde_json::Value) -> Option<Params> {
        value.as_object().cloned()
    }

    async fn wait_for_terminal(
        broker: &Broker,
        instance_id: &str,
        operation: &str,
    ) -> LastOperationResponse {
        for _ in 0..200 {
            let status = broker
                .last_operation(
                    instance_id,
                    LastOperationQuery {
                        operation: Some(operation.to_string()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            if status.state.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("operation {} never finished", operation);
    }

    #[tokio::test]
    async fn test_sync_provision_is_idempotent() {
        let (broker, upstream) = setup();

        let first = broker
            .provision("i1", provision_request("standard"), false)
            .await
            .unwrap();
        let second = broker
            .provision("i1", provision_request("standard"), false)
            .await
            .unwrap();

        assert_eq!(
            first,
            ProvisionOutcome::Created {
                dashboard_url: "https://dash.example/instances/i1".into()
            }
        );
        assert_eq!(
            second,
            ProvisionOutcome::AlreadyExists {
                dashboard_url: "https://dash.example/instances/i1".into()
            }
        );
        assert_eq!(upstream.count("create_account"), 1);
        assert_eq!(upstream.count("create_service"), 1);

        let instance = broker.store.get_instance("i1").await.unwrap().unwrap();
        assert_eq!(instance.upstream.account_id, "create_account-1");
        assert_eq!(instance.upstream.service_id, "create_service-2");
        assert_eq!(instance.parameters["domain"], json!("shop.example"));
    }

    #[tokio::test]
    async fn test_reprovision_with_other_plan_conflicts() {
        let (broker, _) = setup();
        broker
            .provision("i1", provision_request("standard"), false)
            .await
            .unwrap();

        let err = broker
            .provision("i1", provision_request("enterprise"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_provision_requires_ids() {
        let (broker, upstream) = setup();
        let err = broker
            .provision("i1", ProvisionRequest::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Validation(_)));
        assert!(upstream.calls().is_empty());
    }

    #[tokio::test]
    async fn test_async_required_refuses_sync_callers() {
        let (broker, upstream) = setup_with(AsyncMode::Required);
        let err = broker
            .provision("i1", provision_request("standard"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AsyncRequired));
        assert_eq!(err.code(), Some("AsyncRequired"));
        assert!(upstream.calls().is_empty());
    }

    #[tokio::test]
    async fn test_async_provision_then_poll() {
        let (broker, upstream) = setup();

        let outcome = broker
            .provision("i1", provision_request("standard"), true)
            .await
            .unwrap();
        let ProvisionOutcome::Accepted { operation } = outcome else {
            panic!("expected 202");
        };
        assert!(operation.starts_with("provision-i1-"));

        let status = wait_for_terminal(&broker, "i1", &operation).await;
        assert_eq!(status.state, OperationState::Succeeded);
        assert!(!broker.store.has_pending_operation("i1").await.unwrap());

        let again = broker
            .provision("i1", provision_request("standard"), true)
            .await
            .unwrap();
        assert_eq!(
            again,
            ProvisionOutcome::AlreadyExists {
                dashboard_url: "https://dash.example/instances/i1".into()
            }
        );
        assert_eq!(upstream.count("create_account"), 1);
    }

    #[tokio::test]
    async fn test_pending_operation_blocks_other_verbs() {
        let (broker, upstream) = setup();
        broker
            .provision("i1", provision_request("standard"), false)
            .await
            .unwrap();

        let hold = upstream.gate.write().await;
        let DeprovisionOutcome::Accepted { operation } = broker
            .deprovision("i1", deprovision_query(true))
            .await
            .unwrap()
        else {
            panic!("expected 202");
        };

        let err = broker
            .deprovision("i1", deprovision_query(true))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::OperationInProgress(_)));

        let err = broker
            .update(
                "i1",
                UpdateRequest {
                    parameters: params(json!({"mode": "block"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::OperationInProgress(_)));

        drop(hold);
        let status = wait_for_terminal(&broker, "i1", &operation).await;
        assert_eq!(status.state, OperationState::Succeeded);
        assert!(broker.store.get_instance("i1").await.unwrap().is_none());

        // Gate is open again once the operation is terminal
        let outcome = broker
            .provision("i1", provision_request("standard"), false)
            .await
            .unwrap();
        assert!(matches!(outcome, ProvisionOutcome::Created { .. }));
    }

    #[tokio::test]
    async fn test_pending_provision_blocks_second_provision() {
        let (broker, upstream) = setup();
        let hold = upstream.gate.write().await;

        let first = broker
            .provision("i1", provision_request("standard"), true)
            .await
            .unwrap();
        let err = broker
            .provision("i1", provision_request("standard"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::OperationInProgress(_)));

        drop(hold);
        let ProvisionOutcome::Accepted { operation } = first else {
            panic!("expected 202");
        };
        wait_for_terminal(&broker, "i1", &operation).await;
    }

    #[tokio::test]
    async fn test_concurrent_provisions_have_one_winner() {
        let (broker, upstream) = setup();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move {
                broker
                    .provision("race", provision_request("standard"), false)
                    .await
            }));
        }

        let mut created = 0;
        for handle in handles {
            if let Ok(ProvisionOutcome::Created { .. }) = handle.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(upstream.count("create_account"), 1);
    }

    #[tokio::test]
    async fn test_sync_provision_failure_creates_nothing() {
        let (broker, upstream) = setup();
        upstream.fail(
            "create_service",
            UpstreamError::from_status("create service", 400, Some("bad domain")),
        );

        let err = broker
            .provision("i1", provision_request("standard"), false)
            .await
            .unwrap_err();

        assert_eq!(err.status().as_u16(), 400);
        assert!(broker.store.get_instance("i1").await.unwrap().is_none());
        // Account created before the failure is removed again
        assert_eq!(upstream.count("delete_account"), 1);
    }

    #[tokio::test]
    async fn test_async_provision_failure_is_recorded() {
        let (broker, upstream) = setup();
        upstream.fail(
            "create_account",
            UpstreamError::from_status("create account", 503, None),
        );

        let ProvisionOutcome::Accepted { operation } = broker
            .provision("i1", provision_request("standard"), true)
            .await
            .unwrap()
        else {
            panic!("expected 202");
        };

        let status = wait_for_terminal(&broker, "i1", &operation).await;
        assert_eq!(status.state, OperationState::Failed);
        assert!(status.description.unwrap().contains("create account"));
        assert!(broker.store.get_instance("i1").await.unwrap().is_none());
        assert!(!broker.store.has_pending_operation("i1").await.unwrap());
    }

    #[tokio::test]
    async fn test_panicking_job_is_recorded_as_failed() {
        let (broker, upstream) = setup();
        upstream.panic_on("create_service");

        let ProvisionOutcome::Accepted { operation } = broker
            .provision("i1", provision_request("standard"), true)
            .await
            .unwrap()
        else {
            panic!("expected 202");
        };

        let status = wait_for_terminal(&broker, "i1", &operation).await;
        assert_eq!(status.state, OperationState::Failed);
        assert_eq!(
            status.description.as_deref(),
            Some(crate::error::GENERIC_FAILURE)
        );
    }

    #[tokio::test]
    async fn test_update_calls_upstream_only_on_plan_change() {
        let (broker, upstream) = setup();
        broker
            .provision("i1", provision_request("standard"), false)
            .await
            .unwrap();
        let instance = broker.store.get_instance("i1").await.unwrap().unwrap();

        broker
            .update(
                "i1",
                UpdateRequest {
                    plan_id: Some("standard".into()),
                    parameters: params(json!({"mode": "block"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(upstream.count("update_plan"), 0);

        broker
            .update(
                "i1",
                UpdateRequest {
                    plan_id: Some("enterprise".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(upstream.count("update_plan"), 1);
        assert!(upstream.calls().contains(&format!(
            "update_plan:{}:enterprise",
            instance.upstream.service_id
        )));

        let updated = broker.store.get_instance("i1").await.unwrap().unwrap();
        assert_eq!(updated.plan_id, "enterprise");
        assert_eq!(updated.parameters["domain"], json!("shop.example"));
        assert_eq!(updated.parameters["mode"], json!("block"));
    }

    #[tokio::test]
    async fn test_failed_plan_change_leaves_state_untouched() {
        let (broker, upstream) = setup();
        broker
            .provision("i1", provision_request("standard"), false)
            .await
            .unwrap();
        upstream.fail(
            "update_plan",
            UpstreamError::from_status("update plan", 422, Some("downgrade not allowed")),
        );

        let err = broker
            .update(
                "i1",
                UpdateRequest {
                    plan_id: Some("enterprise".into()),
                    parameters: params(json!({"mode": "block"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.status().as_u16(), 422);
        let instance = broker.store.get_instance("i1").await.unwrap().unwrap();
        assert_eq!(instance.plan_id, "standard");
        assert!(instance.parameters.get("mode").is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_instance() {
        let (broker, _) = setup();
        let err = broker
            .update("nope", UpdateRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_deprovision_missing_instance_is_gone_twice() {
        let (broker, _) = setup();
        for _ in 0..2 {
            let err = broker
                .deprovision("nope", deprovision_query(false))
                .await
                .unwrap_err();
            assert!(matches!(err, BrokerError::Gone(_)));
        }
    }

    #[tokio::test]
    async fn test_deprovision_validation_and_conflict() {
        let (broker, _) = setup();
        broker
            .provision("i1", provision_request("standard"), false)
            .await
            .unwrap();

        let err = broker
            .deprovision("i1", DeprovisionQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Validation(_)));

        let err = broker
            .deprovision(
                "i1",
                DeprovisionQuery {
                    plan_id: Some("enterprise".into()),
                    ..deprovision_query(false)
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_sync_deprovision_cascades_bindings() {
        let (broker, upstream) = setup();
        broker
            .provision("i1", provision_request("standard"), false)
            .await
            .unwrap();
        broker
            .bind(
                "i1",
                "b1",
                BindRequest {
                    service_id: Some("svc".into()),
                    plan_id: Some("standard".into()),
                    bind_resource: None,
                    parameters: params(json!({"email": "ops@example.com"})),
                },
            )
            .await
            .unwrap();

        let outcome = broker
            .deprovision("i1", deprovision_query(false))
            .await
            .unwrap();

        assert_eq!(outcome, DeprovisionOutcome::Deleted);
        assert!(broker.store.get_binding("b1").await.unwrap().is_none());
        assert!(broker.store.get_instance("i1").await.unwrap().is_none());

        let calls = upstream.calls();
        let service = calls.iter().position(|c| c.starts_with("delete_service"));
        let account = calls.iter().position(|c| c.starts_with("delete_account"));
        assert!(service.unwrap() < account.unwrap());
    }

    #[tokio::test]
    async fn test_deprovision_tolerates_upstream_gone() {
        let (broker, upstream) = setup();
        broker
            .provision("i1", provision_request("standard"), false)
            .await
            .unwrap();
        upstream.fail(
            "delete_service",
            UpstreamError::from_status("delete service", 404, None),
        );

        broker
            .deprovision("i1", deprovision_query(false))
            .await
            .unwrap();
        assert!(broker.store.get_instance("i1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_deprovision_keeps_instance() {
        let (broker, upstream) = setup();
        broker
            .provision("i1", provision_request("standard"), false)
            .await
            .unwrap();
        upstream.fail(
            "delete_account",
            UpstreamError::from_status("delete account", 500, None),
        );

        let err = broker
            .deprovision("i1", deprovision_query(false))
            .await
            .unwrap_err();
        assert_eq!(err.status().as_u16(), 502);
        assert!(broker.store.get_instance("i1").await.unwrap().is_some());
    }
}
