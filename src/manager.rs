//! Factory and registry of table engines by table id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::game::GameBackend;
use crate::table::{
    Table, TableEngine, TableEngineCallbacks, TableEngineError, TableEngineOptions, TableSettings,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("manager: table not found")]
    TableNotFound,
}

/// Thin registry: creates engines, hands them out by table id and releases
/// them. No cross-table state lives here.
#[derive(Default)]
pub struct Manager {
    engines: Mutex<HashMap<String, Arc<TableEngine>>>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<TableEngine>>> {
        self.engines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a table engine, create its table and register it.
    pub fn create_table(
        &self,
        options: TableEngineOptions,
        callbacks: TableEngineCallbacks,
        setting: TableSettings,
        backend: Arc<dyn GameBackend>,
    ) -> Result<Table, TableEngineError> {
        let engine = TableEngine::new(options, callbacks, backend);
        let table = engine.create_table(setting)?;
        self.lock().insert(table.id.clone(), engine);
        log::info!("registered table {}", table.id);
        Ok(table)
    }

    pub fn get_table_engine(&self, table_id: &str) -> Result<Arc<TableEngine>, ManagerError> {
        self.lock()
            .get(table_id)
            .cloned()
            .ok_or(ManagerError::TableNotFound)
    }

    /// Release and deregister a table engine.
    pub fn release_table(&self, table_id: &str) -> Result<(), ManagerError> {
        let engine = self
            .lock()
            .remove(table_id)
            .ok_or(ManagerError::TableNotFound)?;
        let _ = engine.release_table();
        log::info!("released table {table_id}");
        Ok(())
    }
}
