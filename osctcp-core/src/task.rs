//! Local task spawning.
//!
//! The accept loop and every connection driver are spawned through
//! [`TaskProvider`]. All of them share one thread, which is what lets the
//! server keep its state in `Rc<RefCell<_>>`.

use std::future::Future;

use tokio::task::JoinHandle;

/// Spawns `!Send` tasks on the current thread.
pub trait TaskProvider: Clone {
    /// Spawn a task labelled `name` for tracing.
    ///
    /// Must be called from within a `tokio::task::LocalSet`.
    fn spawn_task<F>(&self, name: &'static str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + 'static;
}

/// Spawns with `tokio::task::spawn_local`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &'static str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        tokio::task::spawn_local(async move {
            tracing::trace!(task = name, "task started");
            future.await;
            tracing::trace!(task = name, "task finished");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[tokio::test]
    async fn test_spawned_task_shares_thread_state() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let hits = Rc::new(Cell::new(0));
                let counter = hits.clone();
                let handle = TokioTaskProvider.spawn_task("counter", async move {
                    counter.set(counter.get() + 1);
                });
                handle.await.expect("join");
                assert_eq!(hits.get(), 1);
            })
            .await;
    }
}
