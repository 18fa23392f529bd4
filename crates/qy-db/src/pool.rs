//! Bounded pool of warehouse connections

use crate::error::{DbError, DbResult};
use crate::traits::{Adapter, Connection};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

type Idle = Arc<Mutex<Vec<Arc<dyn Connection>>>>;

/// Hands out at most `size` connections at a time and reuses released ones
pub struct ConnectionPool {
    adapter: Arc<dyn Adapter>,
    permits: Arc<Semaphore>,
    idle: Idle,
    opened: AtomicUsize,
    size: usize,
}

impl ConnectionPool {
    pub fn new(adapter: Arc<dyn Adapter>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            adapter,
            permits: Arc::new(Semaphore::new(size)),
            idle: Arc::new(Mutex::new(Vec::new())),
            opened: AtomicUsize::new(0),
            size,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Wait for a free slot, reusing an idle connection when there is one
    pub async fn acquire(&self) -> DbResult<PooledConnection> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| DbError::PoolClosed("no further connections are handed out".into()))?;

        let reused = self.idle.lock().unwrap_or_else(|p| p.into_inner()).pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                let n = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
                let name = format!("Thread-{}", n);
                Arc::from(self.adapter.open(&name).await?)
            }
        };
        Ok(PooledConnection {
            conn,
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    /// Stop handing out connections and release idle ones
    pub fn close(&self) {
        self.permits.close();
        self.idle.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

/// A connection checked out of a [`ConnectionPool`]; returned on drop
pub struct PooledConnection {
    conn: Arc<dyn Connection>,
    idle: Idle,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.idle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Arc::clone(&self.conn));
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod tests;
