//! Record store contract
//!
//! Applications, users and weight rows live in a transactional store owned
//! by the rest of the platform. The pipelines reach it only through
//! [`AdmissionStore`]; [`MemoryStore`] backs tests and the CLI.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use lockedin_core::{
    Application, ApplicationStatus, SignalBreakdown, User, UserStatus, WeightRow,
};

/// Store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("transaction aborted: {0}")]
    Aborted(String),
}

/// Everything the verification pipeline commits for one application
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionWrite {
    pub application_id: String,
    pub user_id: String,
    pub score: f64,
    pub breakdown: BTreeMap<String, SignalBreakdown>,
    pub passing_threshold: f64,
    pub status: ApplicationStatus,
    /// Set only for automatic decisions
    pub user_status: Option<UserStatus>,
}

/// Transactional record store
#[async_trait]
pub trait AdmissionStore: Send + Sync {
    async fn find_application(&self, id: &str) -> Result<Option<Application>, StoreError>;

    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Ids of every application currently in `status`
    async fn application_ids_with_status(
        &self,
        status: ApplicationStatus,
    ) -> Result<Vec<String>, StoreError>;

    async fn load_weight_rows(&self) -> Result<Vec<WeightRow>, StoreError>;

    /// Replace an existing weight row
    async fn update_weight_row(&self, row: WeightRow) -> Result<(), StoreError>;

    /// Commit the application score and, when present, the user status in
    /// one transaction. Either both writes land or neither does.
    async fn apply_decision(&self, write: DecisionWrite) -> Result<(), StoreError>;
}

/// Thread-safe reference to a store
pub type SharedStore = Arc<dyn AdmissionStore>;

#[derive(Debug, Default)]
struct Tables {
    applications: HashMap<String, Application>,
    users: HashMap<String, User>,
    weights: Vec<WeightRow>,
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the given weight rows
    pub fn with_weights(rows: Vec<WeightRow>) -> Self {
        let store = Self::new();
        store.tables.write().weights = rows;
        store
    }

    pub fn insert_application(&self, application: Application) {
        self.tables
            .write()
            .applications
            .insert(application.id.clone(), application);
    }

    pub fn insert_user(&self, user: User) {
        self.tables.write().users.insert(user.id.clone(), user);
    }

    /// Add or replace a weight row by key
    pub fn put_weight_row(&self, row: WeightRow) {
        let mut tables = self.tables.write();
        match tables.weights.iter_mut().find(|r| r.key == row.key) {
            Some(existing) => *existing = row,
            None => tables.weights.push(row),
        }
    }

    pub fn application(&self, id: &str) -> Option<Application> {
        self.tables.read().applications.get(id).cloned()
    }

    pub fn user(&self, id: &str) -> Option<User> {
        self.tables.read().users.get(id).cloned()
    }
}

#[async_trait]
impl AdmissionStore for MemoryStore {
    async fn find_application(&self, id: &str) -> Result<Option<Application>, StoreError> {
        Ok(self.application(id))
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.user(id))
    }

    async fn application_ids_with_status(
        &self,
        status: ApplicationStatus,
    ) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read();
        let mut ids: Vec<String> = tables
            .applications
            .values()
            .filter(|a| a.status == status)
            .map(|a| a.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn load_weight_rows(&self) -> Result<Vec<WeightRow>, StoreError> {
        Ok(self.tables.read().weights.clone())
    }

    async fn update_weight_row(&self, row: WeightRow) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let existing = tables
            .weights
            .iter_mut()
            .find(|r| r.key == row.key)
            .ok_or_else(|| StoreError::NotFound {
                entity: "weight",
                id: row.key.clone(),
            })?;
        *existing = row;
        Ok(())
    }

    async fn apply_decision(&self, write: DecisionWrite) -> Result<(), StoreError> {
        // One write lock for both rows; validate before mutating anything
        let mut tables = self.tables.write();

        if !tables.applications.contains_key(&write.application_id) {
            return Err(StoreError::NotFound {
                entity: "application",
                id: write.application_id,
            });
        }
        if write.user_status.is_some() && !tables.users.contains_key(&write.user_id) {
            return Err(StoreError::NotFound {
                entity: "user",
                id: write.user_id,
            });
        }

        if let Some(application) = tables.applications.get_mut(&write.application_id) {
            application.score = Some(write.score);
            application.score_breakdown = Some(write.breakdown);
            application.passing_threshold = Some(write.passing_threshold);
            application.status = write.status;
        }

        if let Some(status) = write.user_status {
            if let Some(user) = tables.users.get_mut(&write.user_id) {
                user.status = status;
            }
        }

        Ok(())
    }
}
