// Queue Store Port (Interface)

use crate::domain::{Queue, QueueId};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for Queue persistence
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Insert a new queue
    async fn insert(&self, queue: &Queue) -> Result<()>;

    /// Find queue by ID
    async fn find_by_id(&self, id: &QueueId) -> Result<Option<Queue>>;

    /// Pause or resume a queue. Returns the updated queue.
    async fn set_active(&self, id: &QueueId, is_active: bool) -> Result<Queue>;
}

pub mod mocks {
    use super::*;
    use crate::domain::error::DomainError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-memory queue store for unit tests
    #[derive(Default, Clone)]
    pub struct InMemoryQueueStore {
        queues: Arc<Mutex<HashMap<QueueId, Queue>>>,
    }

    impl InMemoryQueueStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl QueueRepository for InMemoryQueueStore {
        async fn insert(&self, queue: &Queue) -> Result<()> {
            self.queues
                .lock()
                .unwrap()
                .insert(queue.id.clone(), queue.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &QueueId) -> Result<Option<Queue>> {
            Ok(self.queues.lock().unwrap().get(id).cloned())
        }

        async fn set_active(&self, id: &QueueId, is_active: bool) -> Result<Queue> {
            let mut queues = self.queues.lock().unwrap();
            let queue = queues
                .get_mut(id)
                .ok_or_else(|| DomainError::QueueNotFound(id.clone()))?;
            queue.is_active = is_active;
            Ok(queue.clone())
        }
    }
}
