use super::TaskType;
use crate::storage::models::CatalogEntry;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HandlerError {
    /// Worth retrying while attempts remain.
    #[error("{0}")]
    Failed(String),

    /// Retrying cannot help, e.g. the file format is unsupported.
    #[error("{0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Permanent(_))
    }
}

/// Work performed for one queue item. Handlers run on the worker thread and
/// must not touch the catalog database directly.
pub trait TaskHandler: Send + Sync {
    fn run(&self, entry: &CatalogEntry) -> Result<(), HandlerError>;
}

impl<F> TaskHandler for F
where
    F: Fn(&CatalogEntry) -> Result<(), HandlerError> + Send + Sync,
{
    fn run(&self, entry: &CatalogEntry) -> Result<(), HandlerError> {
        self(entry)
    }
}

/// Handlers keyed by task type. Items whose type has no handler fail
/// permanently when claimed.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Box<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: TaskType, handler: impl TaskHandler + 'static) -> &mut Self {
        self.handlers.insert(task, Box::new(handler));
        self
    }

    pub fn get(&self, task: TaskType) -> Option<&dyn TaskHandler> {
        self.handlers.get(&task).map(|h| h.as_ref())
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_closure_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(TaskType::Cover, |_: &CatalogEntry| -> Result<(), HandlerError> {
            Ok(())
        });
        registry.register(TaskType::Text, |_: &CatalogEntry| -> Result<(), HandlerError> {
            Err(HandlerError::Permanent("unsupported".into()))
        });

        assert!(registry.get(TaskType::Cover).is_some());
        assert!(registry.get(TaskType::Embed).is_none());
        assert_eq!(registry.task_types(), vec![TaskType::Cover, TaskType::Text]);
    }
}
