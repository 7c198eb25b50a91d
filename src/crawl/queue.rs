// src/crawl/queue.rs
// =============================================================================
// The request queue: admitted requests waiting for a free worker.
//
// How it works:
// 1. `enqueue` appends an admitted request at the back
// 2. The scheduler pops from the front whenever a worker is free
// 3. On shutdown whatever is still waiting is drained and discarded
//
// Dispatch order is FIFO with respect to admission. There is no priority.
//
// The queue itself is a plain VecDeque. It is only ever touched with the
// scheduler lock held (see engine.rs), which is what makes concurrent
// enqueues from running hooks safe.
// =============================================================================

use std::collections::VecDeque;

use super::request::Request;

#[derive(Default)]
pub(crate) struct RequestQueue {
    items: VecDeque<Request>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, request: Request) {
        self.items.push_back(request);
    }

    /// Removes and returns the oldest request.
    pub fn dequeue(&mut self) -> Option<Request> {
        self.items.pop_front()
    }

    /// Puts a request back at the head, used when a dequeued request could
    /// not be matched with a worker after all.
    pub fn requeue_front(&mut self, request: Request) {
        self.items.push_front(request);
    }

    /// Empties the queue, oldest first.
    pub fn drain(&mut self) -> Vec<Request> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::fingerprint::Fingerprint;
    use crate::crawl::request::{hook_fn, RequestId, RequestInfo};
    use serde_json::Value;

    fn request(id: u64) -> Request {
        let url = format!("https://example.com/{id}");
        Request {
            info: RequestInfo {
                id: RequestId(id),
                fingerprint: Fingerprint::of(&url, None),
                url,
                payload: None,
                depth: 1,
                parent: None,
            },
            hook: hook_fn(|_session, _ctx| Box::pin(async move { Ok(Value::Null) })),
            retries: 0,
            timeout: None,
            attempt: 1,
        }
    }

    fn ids(queue: &mut RequestQueue) -> Vec<u64> {
        queue.drain().into_iter().map(|r| r.info.id.0).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = RequestQueue::new();
        for id in 1..=3 {
            queue.enqueue(request(id));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue().map(|r| r.info.id.0), Some(1));
        assert_eq!(ids(&mut queue), vec![2, 3]);
        assert!(queue.is_empty());
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_requeue_front() {
        let mut queue = RequestQueue::new();
        queue.enqueue(request(1));
        queue.enqueue(request(2));

        let first = queue.dequeue().unwrap();
        queue.requeue_front(first);
        assert_eq!(ids(&mut queue), vec![1, 2]);
    }
}
