//! In-process adapter for `core::ports::QueuePort`, backed by a bounded
//! Tokio mpsc channel. A real deployment would swap this for a durable
//! queue (SQS, Redis streams); the worker loop only ever sees the port.

use async_trait::async_trait;
use ragcore_core::ports::{IngestJob, PortError, QueuePort};
use tokio::sync::{mpsc, Mutex};

/// Default channel capacity; admission backpressures (the enqueue call
/// blocks) once this many jobs are outstanding.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

pub struct ChannelQueue {
    sender: mpsc::Sender<IngestJob>,
    receiver: Mutex<mpsc::Receiver<IngestJob>>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

impl Default for ChannelQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[async_trait]
impl QueuePort for ChannelQueue {
    async fn enqueue(&self, job: IngestJob) -> Result<(), PortError> {
        self.sender
            .send(job)
            .await
            .map_err(|_| PortError::permanent("ingest queue is closed"))
    }

    async fn dequeue(&self) -> Result<Option<IngestJob>, PortError> {
        let mut receiver = self.receiver.lock().await;
        Ok(receiver.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn enqueued_job_is_dequeued_fifo() {
        let queue = ChannelQueue::new(4);
        let job_a = IngestJob {
            document_id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            attempt: 1,
        };
        let job_b = IngestJob {
            document_id: Uuid::new_v4(),
            workspace_id: job_a.workspace_id,
            attempt: 1,
        };
        queue.enqueue(job_a.clone()).await.unwrap();
        queue.enqueue(job_b.clone()).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap(), Some(job_a));
        assert_eq!(queue.dequeue().await.unwrap(), Some(job_b));
    }
}
