//! Aggregate state storage.
//!
//! The repository holds the current projection of every aggregate. It is
//! disposable: the event log is the source of truth and
//! [`Sourcerer::rebuild_all`](crate::dispatcher::Sourcerer::rebuild_all) can
//! recreate it from scratch.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use sourcerer_core::{Aggregate, AggregateId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("aggregate repository lock poisoned")]
    Poisoned,

    #[error("aggregate repository unavailable: {0}")]
    Unavailable(String),
}

/// Current-state storage for one aggregate type.
pub trait AggregateRepository<A>: Send + Sync {
    fn load(&self, id: AggregateId) -> Result<Option<A>, RepositoryError>;

    fn save(&self, aggregate: A) -> Result<(), RepositoryError>;

    /// Every stored aggregate, ordered by id.
    fn list(&self) -> Result<Vec<A>, RepositoryError>;

    /// Drop all state (rebuild support).
    fn clear(&self) -> Result<(), RepositoryError>;
}

impl<A, R> AggregateRepository<A> for Arc<R>
where
    R: AggregateRepository<A> + ?Sized,
{
    fn load(&self, id: AggregateId) -> Result<Option<A>, RepositoryError> {
        (**self).load(id)
    }

    fn save(&self, aggregate: A) -> Result<(), RepositoryError> {
        (**self).save(aggregate)
    }

    fn list(&self) -> Result<Vec<A>, RepositoryError> {
        (**self).list()
    }

    fn clear(&self) -> Result<(), RepositoryError> {
        (**self).clear()
    }
}

/// In-memory repository for tests/dev.
#[derive(Debug)]
pub struct InMemoryAggregateRepository<A> {
    inner: RwLock<HashMap<AggregateId, A>>,
}

impl<A> InMemoryAggregateRepository<A> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<A> Default for InMemoryAggregateRepository<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> AggregateRepository<A> for InMemoryAggregateRepository<A>
where
    A: Aggregate,
{
    fn load(&self, id: AggregateId) -> Result<Option<A>, RepositoryError> {
        let map = self.inner.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(map.get(&id).cloned())
    }

    fn save(&self, aggregate: A) -> Result<(), RepositoryError> {
        let mut map = self.inner.write().map_err(|_| RepositoryError::Poisoned)?;
        map.insert(aggregate.id(), aggregate);
        Ok(())
    }

    fn list(&self) -> Result<Vec<A>, RepositoryError> {
        let map = self.inner.read().map_err(|_| RepositoryError::Poisoned)?;
        let mut all: Vec<A> = map.values().cloned().collect();
        all.sort_by_key(|a| a.id());
        Ok(all)
    }

    fn clear(&self) -> Result<(), RepositoryError> {
        self.inner
            .write()
            .map_err(|_| RepositoryError::Poisoned)?
            .clear();
        Ok(())
    }
}
