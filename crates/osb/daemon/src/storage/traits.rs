//! Storage trait definitions

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use osb_types::{
    InstancePatch, NewOperation, NewServiceBinding, NewServiceInstance, Operation,
    OperationState, ServiceBinding, ServiceInstance,
};

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Combined storage trait
///
/// Every mutation is atomic with respect to concurrent callers: no reader
/// observes a partially applied write.
#[async_trait]
pub trait Store: InstanceStore + BindingStore + OperationStore + Send + Sync {
    /// Connectivity check for health reporting
    async fn ping(&self) -> bool;
}

/// Storage for service instances
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Create an instance; `AlreadyExists` if the id is taken
    async fn create_instance(
        &self,
        instance_id: &str,
        data: NewServiceInstance,
    ) -> StorageResult<ServiceInstance>;

    /// Get an instance by ID
    async fn get_instance(&self, instance_id: &str) -> StorageResult<Option<ServiceInstance>>;

    /// List all instances
    async fn list_instances(&self) -> StorageResult<Vec<ServiceInstance>>;

    /// Apply a patch; `NotFound` if the instance is absent. Parameters merge
    /// key by key.
    async fn update_instance(
        &self,
        instance_id: &str,
        patch: InstancePatch,
    ) -> StorageResult<ServiceInstance>;

    /// Delete an instance with its bindings and its terminal operations.
    /// Operations still in progress are kept. Returns whether it existed.
    async fn delete_instance(&self, instance_id: &str) -> StorageResult<bool>;
}

/// Storage for service bindings
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Create a binding under an existing instance; `NotFound` if the
    /// instance is absent, `AlreadyExists` if the binding id is taken
    async fn create_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
        data: NewServiceBinding,
    ) -> StorageResult<ServiceBinding>;

    /// Get a binding by ID
    async fn get_binding(&self, binding_id: &str) -> StorageResult<Option<ServiceBinding>>;

    /// List bindings owned by an instance
    async fn list_bindings_for_instance(
        &self,
        instance_id: &str,
    ) -> StorageResult<Vec<ServiceBinding>>;

    /// Delete a binding by ID
    async fn delete_binding(&self, binding_id: &str) -> StorageResult<bool>;
}

/// Storage for operations
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Register an operation
    async fn set_operation(
        &self,
        instance_id: &str,
        operation_id: &str,
        data: NewOperation,
    ) -> StorageResult<Operation>;

    /// Get an operation by ID
    async fn get_operation(&self, operation_id: &str) -> StorageResult<Option<Operation>>;

    /// List all operations
    async fn list_operations(&self) -> StorageResult<Vec<Operation>>;

    /// List operations recorded for an instance
    async fn list_operations_for_instance(
        &self,
        instance_id: &str,
    ) -> StorageResult<Vec<Operation>>;

    /// Move an operation to `state`; `NotFound` if absent
    async fn update_operation(
        &self,
        operation_id: &str,
        state: OperationState,
        description: Option<String>,
    ) -> StorageResult<Operation>;

    /// Fail the operation with `description` only if it is still
    /// `in progress` and was last touched at or before `cutoff`. Returns
    /// whether it changed.
    async fn expire_operation(
        &self,
        operation_id: &str,
        cutoff: DateTime<Utc>,
        description: &str,
    ) -> StorageResult<bool>;

    /// Delete an operation by ID
    async fn delete_operation(&self, operation_id: &str) -> StorageResult<bool>;

    /// True iff an operation for the instance is `in progress`
    async fn has_pending_operation(&self, instance_id: &str) -> StorageResult<bool>;
}
