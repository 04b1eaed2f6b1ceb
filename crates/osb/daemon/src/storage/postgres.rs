//! PostgreSQL storage implementation
//!
//! Records are kept as JSONB documents next to the few columns queries filter
//! on. Connection-class failures are retried with capped exponential backoff;
//! query errors are returned as they are.

use super::traits::*;
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use osb_types::{
    InstancePatch, NewOperation, NewServiceBinding, NewServiceInstance, Operation,
    OperationState, RetryPolicy, ServiceBinding, ServiceInstance,
};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::future::Future;
use std::time::Duration;

/// PostgreSQL-backed storage
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PostgresStore {
    /// Connect to PostgreSQL and initialize schema
    pub async fn new(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
        retry: RetryPolicy,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool, retry };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<(), StorageError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS osb_instances (
                id TEXT PRIMARY KEY,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS osb_bindings (
                id TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS osb_bindings_instance_id ON osb_bindings(instance_id);"#,
            r#"
            CREATE TABLE IF NOT EXISTS osb_operations (
                id TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL,
                state TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS osb_operations_instance_state ON osb_operations(instance_id, state);"#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(classify)?;
        }

        Ok(())
    }

    /// Run `f`, retrying while it fails with a connection-class error
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut f: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        retry_connection(&self.retry, operation, |_| f()).await
    }

    fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, StorageError> {
        serde_json::to_value(value)
            .map_err(|e| StorageError::InvalidData(format!("json serialize error: {}", e)))
    }

    fn from_json<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, StorageError> {
        serde_json::from_value(value)
            .map_err(|e| StorageError::InvalidData(format!("json deserialize error: {}", e)))
    }

    fn decode<T: serde::de::DeserializeOwned>(row: &sqlx::postgres::PgRow) -> StorageResult<T> {
        let data: Value = row
            .try_get("data")
            .map_err(|e| StorageError::Query(e.to_string()))?;
        Self::from_json(data)
    }

    async fn fetch_one_doc<T: serde::de::DeserializeOwned>(
        &self,
        sql: &str,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let row = sqlx::query(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn fetch_docs<T: serde::de::DeserializeOwned>(
        &self,
        sql: &str,
        key: Option<&str>,
    ) -> StorageResult<Vec<T>> {
        let mut query = sqlx::query(sql);
        if let Some(key) = key {
            query = query.bind(key);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(classify)?;
        rows.iter().map(Self::decode).collect()
    }

    async fn insert_instance(&self, instance: &ServiceInstance) -> StorageResult<()> {
        let instance_id = instance.instance_id.as_str();
        let doc = Self::to_json(instance)?;

        let result = sqlx::query(
            r#"
            INSERT INTO osb_instances (id, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(instance_id)
        .bind(doc)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::AlreadyExists(format!("instance {}", instance_id)));
        }
        Ok(())
    }

    async fn patch_instance(
        &self,
        instance_id: &str,
        patch: InstancePatch,
    ) -> StorageResult<ServiceInstance> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let row = sqlx::query("SELECT data FROM osb_instances WHERE id = $1 FOR UPDATE")
            .bind(instance_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify)?
            .ok_or_else(|| StorageError::NotFound(format!("instance {}", instance_id)))?;

        let mut instance: ServiceInstance = Self::decode(&row)?;
        instance.apply(patch, Utc::now());

        sqlx::query("UPDATE osb_instances SET data = $2, updated_at = $3 WHERE id = $1")
            .bind(instance_id)
            .bind(Self::to_json(&instance)?)
            .bind(instance.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(instance)
    }

    async fn remove_instance(&self, instance_id: &str) -> StorageResult<bool> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let removed = sqlx::query("DELETE FROM osb_instances WHERE id = $1")
            .bind(instance_id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?
            .rows_affected();

        if removed == 0 {
            tx.rollback().await.map_err(classify)?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM osb_bindings WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        sqlx::query("DELETE FROM osb_operations WHERE instance_id = $1 AND state <> $2")
            .bind(instance_id)
            .bind(OperationState::InProgress.as_str())
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(true)
    }

    async fn insert_binding(&self, binding: &ServiceBinding) -> StorageResult<()> {
        let instance_id = binding.instance_id.as_str();
        let binding_id = binding.binding_id.as_str();
        let mut tx = self.pool.begin().await.map_err(classify)?;

        // Holds the owner row so a concurrent deprovision cannot slip between
        // the check and the insert
        let owner = sqlx::query("SELECT 1 FROM osb_instances WHERE id = $1 FOR SHARE")
            .bind(instance_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify)?;
        if owner.is_none() {
            return Err(StorageError::NotFound(format!("instance {}", instance_id)));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO osb_bindings (id, instance_id, data, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(binding_id)
        .bind(instance_id)
        .bind(Self::to_json(binding)?)
        .bind(binding.created_at)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::AlreadyExists(format!("binding {}", binding_id)));
        }

        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn insert_operation(&self, operation: &Operation) -> StorageResult<()> {
        let operation_id = operation.operation_id.as_str();

        let result = sqlx::query(
            r#"
            INSERT INTO osb_operations (id, instance_id, state, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(operation_id)
        .bind(&operation.instance_id)
        .bind(operation.state.as_str())
        .bind(Self::to_json(operation)?)
        .bind(operation.created_at)
        .bind(operation.updated_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::AlreadyExists(format!(
                "operation {}",
                operation_id
            )));
        }
        Ok(())
    }

    async fn transition_operation(
        &self,
        operation_id: &str,
        state: OperationState,
        description: Option<String>,
    ) -> StorageResult<Operation> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let row = sqlx::query("SELECT data FROM osb_operations WHERE id = $1 FOR UPDATE")
            .bind(operation_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify)?
            .ok_or_else(|| StorageError::NotFound(format!("operation {}", operation_id)))?;

        let mut operation: Operation = Self::decode(&row)?;
        operation.state = state;
        operation.description = description;
        operation.updated_at = Utc::now();

        sqlx::query(
            "UPDATE osb_operations SET state = $2, data = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(operation_id)
        .bind(operation.state.as_str())
        .bind(Self::to_json(&operation)?)
        .bind(operation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(operation)
    }

    async fn expire_stale_operation(
        &self,
        operation_id: &str,
        cutoff: DateTime<Utc>,
        description: &str,
    ) -> StorageResult<bool> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let row = sqlx::query(
            "SELECT data FROM osb_operations WHERE id = $1 AND state = $2 AND updated_at <= $3 FOR UPDATE",
        )
        .bind(operation_id)
        .bind(OperationState::InProgress.as_str())
        .bind(cutoff)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(classify)?;
            return Ok(false);
        };

        let mut operation: Operation = Self::decode(&row)?;
        operation.state = OperationState::Failed;
        operation.description = Some(description.to_string());
        operation.updated_at = Utc::now();

        sqlx::query(
            "UPDATE osb_operations SET state = $2, data = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(operation_id)
        .bind(operation.state.as_str())
        .bind(Self::to_json(&operation)?)
        .bind(operation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(true)
    }

    async fn delete_by_id(&self, sql: &str, id: &str) -> StorageResult<bool> {
        let result = sqlx::query(sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected() > 0)
    }
}

/// Split sqlx failures into retryable connection errors and the rest
fn classify(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => StorageError::Connection(e.to_string()),
        other => StorageError::Query(other.to_string()),
    }
}

/// Call `f` with the 0-based attempt number until it stops failing with a
/// connection-class error or the policy runs out of attempts.
async fn retry_connection<T, F, Fut>(
    retry: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> StorageResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let attempts = retry.max_attempts();
    let mut attempt = 0;
    loop {
        match f(attempt).await {
            Err(StorageError::Connection(e)) if attempt + 1 < attempts => {
                tracing::warn!(
                    operation,
                    error = %e,
                    attempt = attempt + 1,
                    "Store connection failure, retrying"
                );
                tokio::time::sleep(retry.delay_for(attempt)).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Run an insert under the connection retry.
///
/// A dropped connection may hide a commit, so a retried insert that finds its
/// key taken reads the stored document back: if it is exactly `written`, the
/// earlier attempt landed and the insert succeeded.
async fn insert_once<I, IFut, R, RFut>(
    retry: &RetryPolicy,
    operation: &str,
    written: Value,
    mut insert: I,
    mut stored: R,
) -> StorageResult<()>
where
    I: FnMut() -> IFut,
    IFut: Future<Output = StorageResult<()>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = StorageResult<Option<Value>>>,
{
    let mut retried = false;
    let result = retry_connection(retry, operation, |attempt| {
        retried = attempt > 0;
        insert()
    })
    .await;

    match result {
        Err(StorageError::AlreadyExists(what)) if retried => {
            match retry_connection(retry, operation, |_| stored()).await? {
                Some(doc) if doc == written => {
                    tracing::info!(operation, "Insert had landed before the connection failed");
                    Ok(())
                }
                _ => Err(StorageError::AlreadyExists(what)),
            }
        }
        other => other,
    }
}

#[async_trait]
impl InstanceStore for PostgresStore {
    async fn create_instance(
        &self,
        instance_id: &str,
        data: NewServiceInstance,
    ) -> StorageResult<ServiceInstance> {
        let instance = data.into_instance(instance_id, Utc::now());
        insert_once(
            &self.retry,
            "create instance",
            Self::to_json(&instance)?,
            || self.insert_instance(&instance),
            || self.fetch_one_doc("SELECT data FROM osb_instances WHERE id = $1", instance_id),
        )
        .await?;
        Ok(instance)
    }

    async fn get_instance(&self, instance_id: &str) -> StorageResult<Option<ServiceInstance>> {
        self.with_retry("get instance", || {
            self.fetch_one_doc("SELECT data FROM osb_instances WHERE id = $1", instance_id)
        })
        .await
    }

    async fn list_instances(&self) -> StorageResult<Vec<ServiceInstance>> {
        self.with_retry("list instances", || {
            self.fetch_docs("SELECT data FROM osb_instances ORDER BY created_at", None)
        })
        .await
    }

    async fn update_instance(
        &self,
        instance_id: &str,
        patch: InstancePatch,
    ) -> StorageResult<ServiceInstance> {
        self.with_retry("update instance", || {
            self.patch_instance(instance_id, patch.clone())
        })
        .await
    }

    async fn delete_instance(&self, instance_id: &str) -> StorageResult<bool> {
        self.with_retry("delete instance", || self.remove_instance(instance_id))
            .await
    }
}

#[async_trait]
impl BindingStore for PostgresStore {
    async fn create_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
        data: NewServiceBinding,
    ) -> StorageResult<ServiceBinding> {
        let binding = data.into_binding(instance_id, binding_id, Utc::now());
        insert_once(
            &self.retry,
            "create binding",
            Self::to_json(&binding)?,
            || self.insert_binding(&binding),
            || self.fetch_one_doc("SELECT data FROM osb_bindings WHERE id = $1", binding_id),
        )
        .await?;
        Ok(binding)
    }

    async fn get_binding(&self, binding_id: &str) -> StorageResult<Option<ServiceBinding>> {
        self.with_retry("get binding", || {
            self.fetch_one_doc("SELECT data FROM osb_bindings WHERE id = $1", binding_id)
        })
        .await
    }

    async fn list_bindings_for_instance(
        &self,
        instance_id: &str,
    ) -> StorageResult<Vec<ServiceBinding>> {
        self.with_retry("list bindings", || {
            self.fetch_docs(
                "SELECT data FROM osb_bindings WHERE instance_id = $1 ORDER BY created_at",
                Some(instance_id),
            )
        })
        .await
    }

    async fn delete_binding(&self, binding_id: &str) -> StorageResult<bool> {
        self.with_retry("delete binding", || {
            self.delete_by_id("DELETE FROM osb_bindings WHERE id = $1", binding_id)
        })
        .await
    }
}

#[async_trait]
impl OperationStore for PostgresStore {
    async fn set_operation(
        &self,
        instance_id: &str,
        operation_id: &str,
        data: NewOperation,
    ) -> StorageResult<Operation> {
        let operation = data.into_operation(instance_id, operation_id, Utc::now());
        insert_once(
            &self.retry,
            "set operation",
            Self::to_json(&operation)?,
            || self.insert_operation(&operation),
            || self.fetch_one_doc("SELECT data FROM osb_operations WHERE id = $1", operation_id),
        )
        .await?;
        Ok(operation)
    }

    async fn get_operation(&self, operation_id: &str) -> StorageResult<Option<Operation>> {
        self.with_retry("get operation", || {
            self.fetch_one_doc("SELECT data FROM osb_operations WHERE id = $1", operation_id)
        })
        .await
    }

    async fn list_operations(&self) -> StorageResult<Vec<Operation>> {
        self.with_retry("list operations", || {
            self.fetch_docs("SELECT data FROM osb_operations ORDER BY created_at", None)
        })
        .await
    }

    async fn list_operations_for_instance(
        &self,
        instance_id: &str,
    ) -> StorageResult<Vec<Operation>> {
        self.with_retry("list operations", || {
            self.fetch_docs(
                "SELECT data FROM osb_operations WHERE instance_id = $1 ORDER BY created_at",
                Some(instance_id),
            )
        })
        .await
    }

    async fn update_operation(
        &self,
        operation_id: &str,
        state: OperationState,
        description: Option<String>,
    ) -> StorageResult<Operation> {
        self.with_retry("update operation", || {
            self.transition_operation(operation_id, state, description.clone())
        })
        .await
    }

    async fn expire_operation(
        &self,
        operation_id: &str,
        cutoff: DateTime<Utc>,
        description: &str,
    ) -> StorageResult<bool> {
        self.with_retry("expire operation", || {
            self.expire_stale_operation(operation_id, cutoff, description)
        })
        .await
    }

    async fn delete_operation(&self, operation_id: &str) -> StorageResult<bool> {
        self.with_retry("delete operation", || {
            self.delete_by_id("DELETE FROM osb_operations WHERE id = $1", operation_id)
        })
        .await
    }

    async fn has_pending_operation(&self, instance_id: &str) -> StorageResult<bool> {
        self.with_retry("pending check", move || async move {
            let row = sqlx::query(
                "SELECT EXISTS(SELECT 1 FROM osb_operations WHERE instance_id = $1 AND state = $2) AS pending",
            )
            .bind(instance_id)
            .bind(OperationState::InProgress.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
            row.try_get::<bool, _>("pending")
                .map_err(|e| StorageError::Query(e.to_string()))
        })
        .await
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
