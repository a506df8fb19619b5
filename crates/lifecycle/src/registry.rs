//! Active environments keyed by id

use dashmap::DashMap;
use sandcheck_errors::AssessmentError;
use sandcheck_types::{Environment, EnvironmentId, EnvironmentStatus};

/// Concurrency-safe map of live environments.
///
/// There is no lock spanning environments; each entry is locked only for
/// the duration of a single read or update.
#[derive(Debug, Default)]
pub struct EnvironmentRegistry {
    environments: DashMap<EnvironmentId, Environment>,
}

impl EnvironmentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new environment.
    ///
    /// # Errors
    ///
    /// Returns a validation error if an environment with the same id is
    /// already registered.
    pub fn insert(&self, environment: Environment) -> Result<(), AssessmentError> {
        match self.environments.entry(environment.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AssessmentError::validation(
                format!("environment {} already exists", environment.id),
            )
            .with_context("environmentId", environment.id.as_str())),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(environment);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: &EnvironmentId) -> Option<Environment> {
        self.environments.get(id).map(|entry| entry.value().clone())
    }

    /// Look up `id` or fail with a validation error naming it.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown ids.
    pub fn require(&self, id: &EnvironmentId) -> Result<Environment, AssessmentError> {
        self.get(id).ok_or_else(|| unknown_environment(id))
    }

    /// Apply `update` to the entry for `id`, returning the updated record.
    pub fn update<F>(&self, id: &EnvironmentId, update: F) -> Option<Environment>
    where
        F: FnOnce(&mut Environment),
    {
        let mut entry = self.environments.get_mut(id)?;
        update(entry.value_mut());
        Some(entry.value().clone())
    }

    /// Set the status, returning the previous one.
    pub fn set_status(&self, id: &EnvironmentId, status: EnvironmentStatus) -> Option<EnvironmentStatus> {
        let mut entry = self.environments.get_mut(id)?;
        let previous = entry.status;
        entry.status = status;
        Some(previous)
    }

    pub fn remove(&self, id: &EnvironmentId) -> Option<Environment> {
        self.environments.remove(id).map(|(_, environment)| environment)
    }

    /// Snapshot of every entry, ordered by creation time.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Environment> {
        let mut all: Vec<Environment> = self
            .environments
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    #[must_use]
    pub fn contains(&self, id: &EnvironmentId) -> bool {
        self.environments.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.environments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

pub(crate) fn unknown_environment(id: &EnvironmentId) -> AssessmentError {
    AssessmentError::validation(format!("unknown environment {id}"))
        .with_context("environmentId", id.as_str())
}
