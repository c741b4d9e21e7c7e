//! Session pool bounding concurrent task sessions.
//!
//! The `SessionPool` hands out at most `capacity` [`SessionHandle`]s at a
//! time. Waiters are admitted strictly in the order they started waiting,
//! so acquiring in plan-declaration order yields FIFO admission.

use crate::core::task::TaskId;
use crate::error::{Error, Result};
use crate::sflog_debug;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Bookkeeping for an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
}

type ActiveMap = Arc<Mutex<HashMap<Uuid, SessionInfo>>>;

/// A slot in the pool. The slot is released when the handle is dropped.
#[derive(Debug)]
pub struct SessionHandle {
    info: SessionInfo,
    active: ActiveMap,
    _permit: OwnedSemaphorePermit,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.info.session_id
    }

    pub fn task_id(&self) -> &TaskId {
        &self.info.task_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.info.started_at
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.info.session_id);
        }
        sflog_debug!(
            "SessionPool: released session {} for {}",
            self.info.session_id,
            self.info.task_id
        );
    }
}

/// Bounded pool of task sessions.
///
/// # Example
///
/// ```ignore
/// use specflow::orchestration::SessionPool;
/// use tokio_util::sync::CancellationToken;
///
/// let pool = SessionPool::new(2);
/// let handle = pool.acquire(&"T1".into(), &CancellationToken::new()).await?;
/// assert_eq!(pool.active_count(), 1);
/// drop(handle);
/// assert_eq!(pool.active_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct SessionPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    active: ActiveMap,
}

impl SessionPool {
    /// Create a pool. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for a free slot.
    ///
    /// # Errors
    ///
    /// `Cancelled` if `cancel` fires while waiting.
    pub async fn acquire(&self, task_id: &TaskId, cancel: &CancellationToken) -> Result<SessionHandle> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit
                .map_err(|_| Error::Validation("session pool is closed".to_string()))?,
        };

        let info = SessionInfo {
            session_id: Uuid::new_v4(),
            task_id: task_id.clone(),
            started_at: Utc::now(),
        };
        if let Ok(mut active) = self.active.lock() {
            active.insert(info.session_id, info.clone());
        }
        sflog_debug!(
            "SessionPool: session {} admitted for {} ({}/{})",
            info.session_id,
            task_id,
            self.active_count(),
            self.capacity
        );

        Ok(SessionHandle {
            info,
            active: Arc::clone(&self.active),
            _permit: permit,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn has_capacity(&self) -> bool {
        self.available() > 0
    }

    /// Active sessions, oldest first.
    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self
            .active
            .lock()
            .map(|a| a.values().cloned().collect())
            .unwrap_or_default();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }
}
