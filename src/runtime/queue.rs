//! A closeable hand-off buffer between fibers.
//!
//! [`Queue`] carries elements from producers to a single logical consumer,
//! followed by exactly one terminal outcome: a completion value
//! ([`Queue::end`]) or a failure ([`Queue::fail_cause`]). Elements offered
//! before the terminal are always delivered before it.
//!
//! Offers suspend until the consumer has made room (backpressure). With a
//! capacity of zero the queue is a rendezvous: each offer completes only
//! once its element has been taken.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use super::BoxFuture;
use crate::cause::Cause;
use crate::nonempty::NonEmptyVec;
use crate::pull::{Pull, PullResult, Step};

/// One element, or the completion value once the queue has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Take<A, D> {
    /// The next element.
    Item(A),
    /// The queue ended with this value.
    Done(D),
}

struct QueueState<A, E, D> {
    items: VecDeque<A>,
    offered: u64,
    taken: u64,
    terminal: Option<Result<D, Cause<E>>>,
    shut_down: bool,
}

struct QueueInner<A, E, D> {
    capacity: Option<usize>,
    state: Mutex<QueueState<A, E, D>>,
    changed: Notify,
}

impl<A, E, D> QueueInner<A, E, D> {
    fn lock(&self) -> MutexGuard<'_, QueueState<A, E, D>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A bounded or unbounded multi-producer queue with a terminal outcome.
///
/// Cloning shares the same queue.
///
/// # Example
///
/// ```rust
/// use millrace::runtime::Queue;
/// use millrace::Step;
///
/// # tokio_test::block_on(async {
/// let queue: Queue<i32, String, &str> = Queue::unbounded();
/// queue.offer_all(vec![1, 2]).await;
/// queue.end("finished");
///
/// match queue.take_batch().await {
///     Ok(Step::Emit(batch)) => assert_eq!(batch.into_vec(), vec![1, 2]),
///     other => panic!("unexpected {:?}", other.map(|s| s.is_halt())),
/// }
/// assert!(matches!(queue.take_batch().await, Ok(Step::Halt("finished"))));
/// # });
/// ```
pub struct Queue<A, E, D> {
    inner: Arc<QueueInner<A, E, D>>,
}

impl<A, E, D> Clone for Queue<A, E, D> {
    fn clone(&self) -> Self {
        Queue {
            inner: self.inner.clone(),
        }
    }
}

impl<A, E, D> Queue<A, E, D> {
    /// A queue holding at most `capacity` untaken elements. Zero makes it a rendezvous.
    pub fn bounded(capacity: usize) -> Self {
        Queue::with_capacity(Some(capacity))
    }

    /// A queue whose offers never wait.
    pub fn unbounded() -> Self {
        Queue::with_capacity(None)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Queue {
            inner: Arc::new(QueueInner {
                capacity,
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    offered: 0,
                    taken: 0,
                    terminal: None,
                    shut_down: false,
                }),
                changed: Notify::new(),
            }),
        }
    }

    /// The configured capacity, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.inner.capacity
    }

    /// Number of elements waiting to be taken.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether no elements are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a terminal outcome has been recorded.
    pub fn is_done(&self) -> bool {
        self.inner.lock().terminal.is_some()
    }

    /// Offer one element, waiting until it fits.
    ///
    /// Returns `false` if the queue had already ended, or was shut down
    /// before the element was taken.
    pub async fn offer(&self, item: A) -> bool {
        self.offer_all(std::iter::once(item)).await
    }

    /// Offer several elements at once, waiting until all of them fit.
    ///
    /// Elements are enqueued before waiting; cancelling the wait does not
    /// withdraw them.
    pub async fn offer_all<I>(&self, items: I) -> bool
    where
        I: IntoIterator<Item = A>,
    {
        let target = {
            let mut state = self.inner.lock();
            if state.terminal.is_some() {
                return false;
            }
            let before = state.items.len();
            state.items.extend(items);
            let added = (state.items.len() - before) as u64;
            if added == 0 {
                return true;
            }
            state.offered += added;
            state.offered
        };
        self.inner.changed.notify_waiters();

        let Some(capacity) = self.inner.capacity else {
            return true;
        };
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.inner.lock();
                if state.shut_down {
                    return false;
                }
                if state.taken.saturating_add(capacity as u64) >= target {
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Record successful completion. Elements already offered are still delivered.
    ///
    /// Returns `false` if a terminal outcome was already recorded.
    pub fn end(&self, done: D) -> bool {
        self.set_terminal(Ok(done))
    }

    /// Record a failure. Elements already offered are still delivered first.
    pub fn fail_cause(&self, cause: Cause<E>) -> bool {
        self.set_terminal(Err(cause))
    }

    fn set_terminal(&self, terminal: Result<D, Cause<E>>) -> bool {
        {
            let mut state = self.inner.lock();
            if state.terminal.is_some() {
                return false;
            }
            state.terminal = Some(terminal);
        }
        self.inner.changed.notify_waiters();
        true
    }

    /// Discard buffered elements and end the queue as interrupted.
    ///
    /// Waiting producers return `false`; the consumer sees an interruption
    /// unless a terminal outcome was already recorded.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.lock();
            state.items.clear();
            state.shut_down = true;
            if state.terminal.is_none() {
                state.terminal = Some(Err(Cause::interrupt(None)));
            }
        }
        self.inner.changed.notify_waiters();
    }
}

impl<A, E: Clone, D: Clone> Queue<A, E, D> {
    /// Take every waiting element, or the terminal outcome once drained.
    ///
    /// Waits while the queue is empty and not done.
    pub async fn take_batch(&self) -> PullResult<A, E, D> {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let ready = {
                let mut state = self.inner.lock();
                if !state.items.is_empty() {
                    let drained: Vec<A> = state.items.drain(..).collect();
                    state.taken += drained.len() as u64;
                    Some(Ok(Step::Emit(NonEmptyVec::from_vec_unchecked(drained))))
                } else {
                    state.terminal.clone().map(|terminal| terminal.map(Step::Halt))
                }
            };
            if let Some(result) = ready {
                if matches!(result, Ok(Step::Emit(_))) {
                    self.inner.changed.notify_waiters();
                }
                return result;
            }
            notified.await;
        }
    }

    /// Take a single element, or the terminal outcome once drained.
    pub async fn take(&self) -> Result<Take<A, D>, Cause<E>> {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let ready = {
                let mut state = self.inner.lock();
                match state.items.pop_front() {
                    Some(item) => {
                        state.taken += 1;
                        Some(Ok(Take::Item(item)))
                    }
                    None => state
                        .terminal
                        .clone()
                        .map(|terminal| terminal.map(Take::Done)),
                }
            };
            if let Some(result) = ready {
                if matches!(result, Ok(Take::Item(_))) {
                    self.inner.changed.notify_waiters();
                }
                return result;
            }
            notified.await;
        }
    }

    /// A pull that drains this queue batch by batch.
    pub fn into_pull(self) -> QueuePull<A, E, D> {
        QueuePull { queue: self }
    }
}

impl<A, E, D> fmt::Debug for Queue<A, E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Queue")
            .field("capacity", &self.inner.capacity)
            .field("len", &state.items.len())
            .field("done", &state.terminal.is_some())
            .finish()
    }
}

/// Pull adapter over a [`Queue`], see [`Queue::into_pull`].
pub struct QueuePull<A, E, D> {
    queue: Queue<A, E, D>,
}

impl<A, E, D> Pull for QueuePull<A, E, D>
where
    A: Send + 'static,
    E: Clone + Send + 'static,
    D: Clone + Send + 'static,
{
    type Out = A;
    type Err = E;
    type Done = D;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, D>> {
        Box::pin(self.queue.take_batch())
    }
}

impl<A, E, D> fmt::Debug for QueuePull<A, E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuePull")
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn emitted<A: Clone, E, D>(result: &PullResult<A, E, D>) -> Vec<A> {
        match result {
            Ok(Step::Emit(batch)) => batch.as_slice().to_vec(),
            _ => Vec::new(),
        }
    }

    #[tokio::test]
    async fn items_are_delivered_before_end() {
        let queue: Queue<i32, (), &str> = Queue::unbounded();
        assert!(queue.offer(1).await);
        assert!(queue.offer(2).await);
        assert!(queue.end("done"));
        assert!(!queue.end("again"));
        assert!(!queue.offer(3).await);

        assert_eq!(emitted(&queue.take_batch().await), vec![1, 2]);
        assert!(matches!(queue.take_batch().await, Ok(Step::Halt("done"))));
        assert!(matches!(queue.take_batch().await, Ok(Step::Halt("done"))));
    }

    #[tokio::test]
    async fn failure_follows_buffered_items() {
        let queue: Queue<i32, String, ()> = Queue::unbounded();
        queue.offer(7).await;
        queue.fail_cause(Cause::fail("broken".to_string()));

        assert_eq!(queue.take().await, Ok(Take::Item(7)));
        assert_eq!(queue.take().await, Err(Cause::fail("broken".to_string())));
    }

    #[tokio::test]
    async fn rendezvous_offer_waits_for_take() {
        let queue: Queue<i32, (), ()> = Queue::bounded(0);
        let delivered = Arc::new(AtomicBool::new(false));

        let producer = {
            let queue = queue.clone();
            let delivered = delivered.clone();
            tokio::spawn(async move {
                queue.offer(1).await;
                delivered.store(true, Ordering::SeqCst);
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!delivered.load(Ordering::SeqCst));

        assert_eq!(queue.take().await, Ok(Take::Item(1)));
        producer.await.unwrap();
        assert!(delivered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn bounded_offer_applies_backpressure() {
        let queue: Queue<i32, (), ()> = Queue::bounded(2);
        assert!(queue.offer(1).await);
        assert!(queue.offer(2).await);

        let blocked = tokio::time::timeout(Duration::from_millis(20), queue.offer(3)).await;
        assert!(blocked.is_err());

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.offer(4).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.take().await, Ok(Take::Item(1)));
        assert_eq!(queue.take().await, Ok(Take::Item(2)));
        assert!(producer.await.unwrap());
    }

    #[tokio::test]
    async fn shutdown_releases_waiting_producers() {
        let queue: Queue<i32, (), ()> = Queue::bounded(0);
        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.offer(1).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.shutdown();

        assert!(!producer.await.unwrap());
        assert!(queue.is_empty());
        let cause = queue.take().await.unwrap_err();
        assert!(cause.is_interrupted_only());
    }

    #[tokio::test]
    async fn take_batch_waits_for_producer() {
        let queue: Queue<&str, (), ()> = Queue::bounded(4);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take_batch().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.offer_all(vec!["a", "b"]).await;
        let result = consumer.await.unwrap();
        assert_eq!(emitted(&result), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn into_pull_drains_queue() {
        let queue: Queue<i32, (), u8> = Queue::unbounded();
        queue.offer_all(1..=3).await;
        queue.end(9);

        let mut pull = queue.into_pull();
        assert_eq!(emitted(&pull.pull().await), vec![1, 2, 3]);
        assert!(matches!(pull.pull().await, Ok(Step::Halt(9))));
    }
}
