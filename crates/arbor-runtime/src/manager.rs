//! Execution Manager - creates, looks up and deletes executions.

use std::sync::Arc;

use arbor_bt::{Registry, TreeBuilder, TreeDefinition};
use dashmap::DashMap;
use tokio::sync::{broadcast, MutexGuard};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::execution::{ExecutionInstance, TickOutcome};
use crate::observability::{EventBus, EventKind, ExecutionEvent};
use crate::scheduler::{Scheduler, SchedulerState, StartOptions};
use crate::snapshot::ExecutionSnapshot;

/// Shared handle to one execution and its scheduler.
#[derive(Debug)]
pub struct ExecutionHandle {
    id: String,
    tree_id: String,
    instance: Arc<tokio::sync::Mutex<ExecutionInstance>>,
    scheduler: Scheduler,
}

impl ExecutionHandle {
    pub fn new(instance: ExecutionInstance, events: EventBus) -> Self {
        let id = instance.id().to_string();
        let tree_id = instance.tree().tree_id().to_string();
        let instance = Arc::new(tokio::sync::Mutex::new(instance));
        let scheduler = Scheduler::new(id.clone(), Arc::clone(&instance), events);
        Self {
            id,
            tree_id,
            instance,
            scheduler,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tree_id(&self) -> &str {
        &self.tree_id
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Exclusive access to the instance; waits for an in-flight scheduled tick.
    pub async fn lock(&self) -> MutexGuard<'_, ExecutionInstance> {
        self.instance.lock().await
    }

    /// Tick once by hand. Rejected while the scheduler is running the loop.
    pub async fn tick(&self) -> Result<TickOutcome> {
        if self.scheduler.state() == SchedulerState::Running {
            return Err(RuntimeError::SchedulerActive {
                execution_id: self.id.clone(),
            });
        }
        self.instance.lock().await.tick()
    }

    pub fn start(&self, options: StartOptions) -> Result<()> {
        Ok(self.scheduler.start(options)?)
    }

    pub async fn snapshot(&self) -> ExecutionSnapshot {
        self.instance.lock().await.snapshot()
    }
}

pub struct ExecutionManager {
    registry: Arc<Registry>,
    config: RuntimeConfig,
    executions: DashMap<String, Arc<ExecutionHandle>>,
    events: EventBus,
}

impl ExecutionManager {
    pub fn new(registry: Arc<Registry>, config: RuntimeConfig) -> Self {
        let events = EventBus::new(config.events.capacity);
        Self {
            registry,
            config,
            executions: DashMap::new(),
            events,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Build `definition` and register a new execution for it.
    pub fn create(&self, definition: &TreeDefinition) -> Result<Arc<ExecutionHandle>> {
        let tree = TreeBuilder::new(&self.registry)
            .with_options(self.config.build_options())
            .build(definition)?;
        let id = Uuid::new_v4().to_string();
        let instance = ExecutionInstance::new(id.clone(), tree, self.events.clone())?;
        let handle = Arc::new(ExecutionHandle::new(instance, self.events.clone()));

        self.executions.insert(id.clone(), Arc::clone(&handle));
        tracing::info!(execution_id = %id, tree_id = %definition.tree_id, "execution created");
        self.events.publish(
            &id,
            EventKind::ExecutionCreated {
                tree_id: definition.tree_id.clone(),
            },
        );
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Result<Arc<ExecutionHandle>> {
        self.executions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    /// Ids of every live execution, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.executions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Stop the execution's scheduler, wait for its loop and drop it.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let (_, handle) = self
            .executions
            .remove(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        handle.scheduler.stop();
        handle.scheduler.wait().await;

        tracing::info!(execution_id = %id, "execution deleted");
        self.events.publish(id, EventKind::ExecutionDeleted);
        Ok(())
    }

    /// Stop every scheduler and wait for all loops to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<ExecutionHandle>> =
            self.executions.iter().map(|e| Arc::clone(e.value())).collect();
        for handle in &handles {
            handle.scheduler.stop();
        }
        for handle in &handles {
            handle.scheduler.wait().await;
        }
    }
}
