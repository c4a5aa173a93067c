//! Concurrency gate for conversation turns.
//!
//! Three rules:
//! 1. turns within one conversation run strictly one at a time, in
//!    arrival order (tokio mutexes queue fairly);
//! 2. total in-flight turns across all conversations are capped by a
//!    semaphore;
//! 3. a single turn can never hold its permit forever — each turn runs
//!    under a timeout.
//!
//! The per-conversation lock table is created lazily and evicted once
//! it grows past a high-water mark, dropping only entries nobody holds.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as TokioMutex, Semaphore};
use tracing::debug;

const LOCK_TABLE_HIGH_WATER: usize = 1024;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("turn timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Inner(#[from] anyhow::Error),
}

pub struct ConversationGate {
    locks: StdMutex<HashMap<String, Arc<TokioMutex<()>>>>,
    permits: Arc<Semaphore>,
    turn_timeout: Duration,
}

impl ConversationGate {
    pub fn new(max_concurrent: usize, turn_timeout: Duration) -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            turn_timeout,
        }
    }

    fn lock_for(&self, conversation_id: &str) -> Arc<TokioMutex<()>> {
        let mut table = self.locks.lock().expect("gate lock table poisoned");
        if table.len() > LOCK_TABLE_HIGH_WATER {
            // Entries with strong_count == 1 are neither held nor waited on.
            let before = table.len();
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            debug!(evicted = before - table.len(), "conversation lock table pruned");
        }
        table
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(TokioMutex::new(())))
            .clone()
    }

    /// Run one turn's work under the gate: the conversation's own lock
    /// first, then a global permit, then the timeout.  The lock is
    /// taken before the permit so turns queued behind one busy
    /// conversation wait without consuming the global cap.
    pub async fn run<F, Fut>(&self, conversation_id: &str, work: F) -> Result<String, GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| anyhow::anyhow!("concurrency gate closed"))?;

        match tokio::time::timeout(self.turn_timeout, work()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GateError::Timeout(self.turn_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn turns_in_one_conversation_are_serialized() {
        let gate = Arc::new(ConversationGate::new(8, Duration::from_secs(5)));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let gate = gate.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                gate.run("conv-a", || async {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok("ok".to_string())
                })
                .await
                .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_conversations_run_concurrently() {
        let gate = Arc::new(ConversationGate::new(8, Duration::from_secs(5)));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..4 {
            let gate = gate.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                gate.run(&format!("conv-{i}"), || async {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok("ok".to_string())
                })
                .await
                .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn queued_turns_do_not_consume_the_global_cap() {
        let gate = Arc::new(ConversationGate::new(2, Duration::from_secs(5)));

        // Two slow turns queue on the same conversation.
        let mut busy = Vec::new();
        for _ in 0..2 {
            let gate = gate.clone();
            busy.push(tokio::spawn(async move {
                gate.run("conv-busy", || async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok("slow".to_string())
                })
                .await
                .unwrap()
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        // An unrelated conversation must get a permit immediately, not
        // wait for the queued turn to release one.
        let started = std::time::Instant::now();
        gate.run("conv-other", || async { Ok("fast".to_string()) })
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));

        for task in busy {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn slow_turn_times_out() {
        let gate = ConversationGate::new(1, Duration::from_millis(10));
        let result = gate
            .run("conv-slow", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("never".to_string())
            })
            .await;
        assert!(matches!(result, Err(GateError::Timeout(_))));
    }
}
