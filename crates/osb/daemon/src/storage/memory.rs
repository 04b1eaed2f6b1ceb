//! In-memory storage implementation

use super::traits::*;
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use osb_types::{
    InstancePatch, NewOperation, NewServiceBinding, NewServiceInstance, Operation,
    OperationState, ServiceBinding, ServiceInstance,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// All records behind one lock so cascades and pending-flag bookkeeping
/// land as a single write.
#[derive(Debug, Default)]
struct MemoryState {
    instances: HashMap<String, ServiceInstance>,
    bindings: HashMap<String, ServiceBinding>,
    operations: HashMap<String, Operation>,
    /// Instances with at least one operation `in progress`
    pending: HashSet<String>,
}

impl MemoryState {
    fn refresh_pending(&mut self, instance_id: &str) {
        let busy = self
            .operations
            .values()
            .any(|op| op.instance_id == instance_id && op.is_pending());
        if busy {
            self.pending.insert(instance_id.to_string());
        } else {
            self.pending.remove(instance_id);
        }
    }
}

/// In-memory storage for development and testing
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for InMemoryStore {
    async fn create_instance(
        &self,
        instance_id: &str,
        data: NewServiceInstance,
    ) -> StorageResult<ServiceInstance> {
        let mut state = self.state.write().await;
        if state.instances.contains_key(instance_id) {
            return Err(StorageError::AlreadyExists(format!("instance {}", instance_id)));
        }
        let instance = data.into_instance(instance_id, Utc::now());
        state
            .instances
            .insert(instance_id.to_string(), instance.clone());
        Ok(instance)
    }

    async fn get_instance(&self, instance_id: &str) -> StorageResult<Option<ServiceInstance>> {
        let state = self.state.read().await;
        Ok(state.instances.get(instance_id).cloned())
    }

    async fn list_instances(&self) -> StorageResult<Vec<ServiceInstance>> {
        let state = self.state.read().await;
        Ok(state.instances.values().cloned().collect())
    }

    async fn update_instance(
        &self,
        instance_id: &str,
        patch: InstancePatch,
    ) -> StorageResult<ServiceInstance> {
        let mut state = self.state.write().await;
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StorageError::NotFound(format!("instance {}", instance_id)))?;
        instance.apply(patch, Utc::now());
        Ok(instance.clone())
    }

    async fn delete_instance(&self, instance_id: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        if state.instances.remove(instance_id).is_none() {
            return Ok(false);
        }

        state.bindings.retain(|_, b| b.instance_id != instance_id);
        state
            .operations
            .retain(|_, op| op.instance_id != instance_id || op.is_pending());
        state.refresh_pending(instance_id);

        Ok(true)
    }
}

#[async_trait]
impl BindingStore for InMemoryStore {
    async fn create_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
        data: NewServiceBinding,
    ) -> StorageResult<ServiceBinding> {
        let mut state = self.state.write().await;
        if !state.instances.contains_key(instance_id) {
            return Err(StorageError::NotFound(format!("instance {}", instance_id)));
        }
        if state.bindings.contains_key(binding_id) {
            return Err(StorageError::AlreadyExists(format!("binding {}", binding_id)));
        }
        let binding = data.into_binding(instance_id, binding_id, Utc::now());
        state
            .bindings
            .insert(binding_id.to_string(), binding.clone());
        Ok(binding)
    }

    async fn get_binding(&self, binding_id: &str) -> StorageResult<Option<ServiceBinding>> {
        let state = self.state.read().await;
        Ok(state.bindings.get(binding_id).cloned())
    }

    async fn list_bindings_for_instance(
        &self,
        instance_id: &str,
    ) -> StorageResult<Vec<ServiceBinding>> {
        let state = self.state.read().await;
        Ok(state
            .bindings
            .values()
            .filter(|b| b.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn delete_binding(&self, binding_id: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.bindings.remove(binding_id).is_some())
    }
}

#[async_trait]
impl OperationStore for InMemoryStore {
    async fn set_operation(
        &self,
        instance_id: &str,
        operation_id: &str,
        data: NewOperation,
    ) -> StorageResult<Operation> {
        let mut state = self.state.write().await;
        if state.operations.contains_key(operation_id) {
            return Err(StorageError::AlreadyExists(format!(
                "operation {}",
                operation_id
            )));
        }
        let operation = data.into_operation(instance_id, operation_id, Utc::now());
        if operation.is_pending() {
            state.pending.insert(instance_id.to_string());
        }
        state
            .operations
            .insert(operation_id.to_string(), operation.clone());
        Ok(operation)
    }

    async fn get_operation(&self, operation_id: &str) -> StorageResult<Option<Operation>> {
        let state = self.state.read().await;
        Ok(state.operations.get(operation_id).cloned())
    }

    async fn list_operations(&self) -> StorageResult<Vec<Operation>> {
        let state = self.state.read().await;
        Ok(state.operations.values().cloned().collect())
    }

    async fn list_operations_for_instance(
        &self,
        instance_id: &str,
    ) -> StorageResult<Vec<Operation>> {
        let state = self.state.read().await;
        let mut operations: Vec<_> = state
            .operations
            .values()
            .filter(|op| op.instance_id == instance_id)
            .cloned()
            .collect();
        operations.sort_by_key(|op| op.created_at);
        Ok(operations)
    }

    async fn update_operation(
        &self,
        operation_id: &str,
        new_state: OperationState,
        description: Option<String>,
    ) -> StorageResult<Operation> {
        let mut state = self.state.write().await;
        let operation = state
            .operations
            .get_mut(operation_id)
            .ok_or_else(|| StorageError::NotFound(format!("operation {}", operation_id)))?;

        operation.state = new_state;
        operation.description = description;
        operation.updated_at = Utc::now();
        let operation = operation.clone();

        state.refresh_pending(&operation.instance_id);
        Ok(operation)
    }

    async fn expire_operation(
        &self,
        operation_id: &str,
        cutoff: DateTime<Utc>,
        description: &str,
    ) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let Some(operation) = state.operations.get_mut(operation_id) else {
            return Ok(false);
        };
        if !operation.is_pending() || operation.updated_at > cutoff {
            return Ok(false);
        }

        operation.state = OperationState::Failed;
        operation.description = Some(description.to_string());
        operation.updated_at = Utc::now();
        let instance_id = operation.instance_id.clone();

        state.refresh_pending(&instance_id);
        Ok(true)
    }

    async fn delete_operation(&self, operation_id: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        match state.operations.remove(operation_id) {
            Some(operation) => {
                state.refresh_pending(&operation.instance_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn has_pending_operation(&self, instance_id: &str) -> StorageResult<bool> {
        let state = self.state.read().await;
        Ok(state.pending.contains(instance_id))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> bool {
        true
    }
}
