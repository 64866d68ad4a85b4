// src/registry.rs

//! Explicit DAG registry.
//!
//! An ordinary value the runner is constructed with, not ambient module
//! state: load the DAGs once at startup, register them here, and treat the
//! registry as read-only afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::dag::Dag;
use crate::errors::DagError;

/// Named, immutable DAGs available for triggering.
#[derive(Debug, Default)]
pub struct DagRegistry {
    dags: BTreeMap<String, Arc<Dag>>,
}

impl DagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built DAG under its name. Registering the same name
    /// twice is an error; replace-on-register would silently invalidate
    /// runs of the old DAG.
    pub fn register(&mut self, dag: Dag) -> Result<(), DagError> {
        let name = dag.name().to_string();
        if self.dags.contains_key(&name) {
            return Err(DagError::DuplicateDag(name));
        }
        self.dags.insert(name, Arc::new(dag));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Dag>> {
        self.dags.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dags.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.dags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dags.is_empty()
    }
}
