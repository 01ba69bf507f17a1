//! Request correlation between the orchestrator and the compute unit
//!
//! Every submitted operation gets a fresh id and a one-shot continuation.
//! Responses may arrive in any order; they are matched purely by id. A
//! response whose id is unknown (already resolved, timed out, cancelled, or
//! never issued) is dropped without effect.

pub mod envelope;

pub use envelope::{
    Operation, RequestEnvelope, RequestId, ResponseBody, ResponseEnvelope, ResultFields,
};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::channel::oneshot;
use futures_timer::Delay;
use parking_lot::Mutex;

use crate::compute::{GenerateOptions, PointGeometry};

/// Errors scoped to a single request
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("request {request_id} failed in the compute unit: {message}")]
    Remote { request_id: RequestId, message: String },

    #[error("request {request_id} timed out after {timeout:?}")]
    Timeout { request_id: RequestId, timeout: Duration },

    #[error("task channel closed before the request completed")]
    Closed,

    #[error("request {request_id} returned an unexpected result, expected {expected}")]
    UnexpectedResponse { request_id: RequestId, expected: &'static str },
}

type Continuation = oneshot::Sender<Result<ResultFields, ChannelError>>;

struct ChannelShared {
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, Continuation>>,
    /// `None` once the channel has been shut down
    outbound: Mutex<Option<flume::Sender<RequestEnvelope>>>,
    default_deadline: Option<Duration>,
}

impl ChannelShared {
    fn forget(&self, request_id: RequestId) -> bool {
        self.pending.lock().remove(&request_id).is_some()
    }
}

/// Handle for submitting work to the compute unit
///
/// Cloning shares the same id counter and pending table.
#[derive(Clone)]
pub struct TaskChannel {
    shared: Arc<ChannelShared>,
}

impl TaskChannel {
    /// Create a channel that sends envelopes over `outbound`
    ///
    /// `default_deadline` applies to every [`TaskChannel::submit`]; use
    /// [`TaskChannel::submit_with_deadline`] to override it per request.
    pub fn new(outbound: flume::Sender<RequestEnvelope>, default_deadline: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                next_id: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                outbound: Mutex::new(Some(outbound)),
                default_deadline,
            }),
        }
    }

    /// Send an operation, returning a future for its result
    ///
    /// Buffers inside `operation` move into the compute unit and are not
    /// handed back.
    pub fn submit(&self, operation: Operation) -> PendingRequest {
        self.submit_inner(operation, self.shared.default_deadline)
    }

    /// Send an operation that fails with [`ChannelError::Timeout`] if no
    /// response arrives within `deadline`
    pub fn submit_with_deadline(&self, operation: Operation, deadline: Duration) -> PendingRequest {
        self.submit_inner(operation, Some(deadline))
    }

    fn submit_inner(&self, operation: Operation, deadline: Option<Duration>) -> PendingRequest {
        let request_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let name = operation.name();

        // Registration and send happen under the outbound lock so shutdown
        // cannot slip in between and leave the entry orphaned.
        let outbound = self.shared.outbound.lock();
        match outbound.as_ref() {
            Some(outbound) => {
                self.shared.pending.lock().insert(request_id, sender);
                if outbound.send(RequestEnvelope { operation, request_id }).is_err() {
                    log::warn!("Compute unit gone, rejecting {} request {}", name, request_id);
                    if let Some(sender) = self.shared.pending.lock().remove(&request_id) {
                        let _ = sender.send(Err(ChannelError::Closed));
                    }
                } else {
                    log::debug!("Submitted {} request {}", name, request_id);
                }
            }
            None => {
                let _ = sender.send(Err(ChannelError::Closed));
            }
        }
        drop(outbound);

        PendingRequest {
            request_id,
            receiver,
            deadline: deadline.map(|timeout| (timeout, Delay::new(timeout))),
            shared: Arc::downgrade(&self.shared),
            finished: false,
        }
    }

    /// Route a response to the request that is waiting for it
    ///
    /// Returns `false` when no request with that id is pending.
    pub fn dispatch(&self, response: ResponseEnvelope) -> bool {
        let ResponseEnvelope { request_id, body } = response;
        let continuation = self.shared.pending.lock().remove(&request_id);

        let Some(continuation) = continuation else {
            log::debug!("Discarding response for unknown request {}", request_id);
            return false;
        };

        let result = match body {
            ResponseBody::Completed(fields) => Ok(fields),
            ResponseBody::Failed { error } => Err(ChannelError::Remote {
                request_id,
                message: error,
            }),
        };
        if continuation.send(result).is_err() {
            log::debug!("Request {} was dropped before its response arrived", request_id);
        }
        true
    }

    /// Close the channel and reject every pending request
    ///
    /// Safe to call more than once. Later submissions resolve immediately
    /// with [`ChannelError::Closed`].
    pub fn shutdown(&self) {
        let outbound = self.shared.outbound.lock().take();
        let drained: Vec<(RequestId, Continuation)> = self.shared.pending.lock().drain().collect();

        if outbound.is_some() || !drained.is_empty() {
            log::info!("Task channel closed, rejecting {} pending requests", drained.len());
        }
        for (_, continuation) in drained {
            let _ = continuation.send(Err(ChannelError::Closed));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.outbound.lock().is_none()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Parse a point-cloud file in the compute unit
    pub async fn load(&self, buffer: Vec<u8>) -> Result<PointGeometry, ChannelError> {
        let pending = self.submit(Operation::Load { buffer });
        let request_id = pending.request_id();
        match pending.await? {
            ResultFields::Loaded(geometry) => Ok(geometry),
            ResultFields::Generated { .. } => Err(ChannelError::UnexpectedResponse {
                request_id,
                expected: "point cloud",
            }),
        }
    }

    /// Voxelize geometry in the compute unit, returning package bytes
    pub async fn generate(
        &self,
        geometry: PointGeometry,
        options: GenerateOptions,
    ) -> Result<Vec<u8>, ChannelError> {
        let pending = self.submit(Operation::Generate { geometry, options });
        let request_id = pending.request_id();
        match pending.await? {
            ResultFields::Generated { buffer } => Ok(buffer),
            ResultFields::Loaded(_) => Err(ChannelError::UnexpectedResponse {
                request_id,
                expected: "world package",
            }),
        }
    }
}

/// Future resolving to the response of one submitted request
///
/// Dropping it before completion cancels the request: its entry is removed
/// and a response arriving later is discarded.
pub struct PendingRequest {
    request_id: RequestId,
    receiver: oneshot::Receiver<Result<ResultFields, ChannelError>>,
    deadline: Option<(Duration, Delay)>,
    shared: Weak<ChannelShared>,
    finished: bool,
}

impl PendingRequest {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Give up on the request
    pub fn cancel(mut self) {
        self.finished = true;
        if let Some(shared) = self.shared.upgrade() {
            if shared.forget(self.request_id) {
                log::debug!("Cancelled request {}", self.request_id);
            }
        }
    }
}

impl Future for PendingRequest {
    type Output = Result<ResultFields, ChannelError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(Err(ChannelError::Closed));
        }

        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.finished = true;
                return Poll::Ready(result);
            }
            Poll::Ready(Err(oneshot::Canceled)) => {
                this.finished = true;
                return Poll::Ready(Err(ChannelError::Closed));
            }
            Poll::Pending => {}
        }

        if let Some((timeout, delay)) = this.deadline.as_mut() {
            if Pin::new(delay).poll(cx).is_ready() {
                let timeout = *timeout;
                let forgotten = this
                    .shared
                    .upgrade()
                    .map_or(true, |shared| shared.forget(this.request_id));
                if !forgotten {
                    // A dispatch or shutdown already claimed the entry, its result wins
                    this.deadline = None;
                    return match this.receiver.try_recv() {
                        Ok(Some(result)) => {
                            this.finished = true;
                            Poll::Ready(result)
                        }
                        Ok(None) => Poll::Pending,
                        Err(oneshot::Canceled) => {
                            this.finished = true;
                            Poll::Ready(Err(ChannelError::Closed))
                        }
                    };
                }
                this.finished = true;
                log::warn!("Request {} timed out after {:?}", this.request_id, timeout);
                return Poll::Ready(Err(ChannelError::Timeout {
                    request_id: this.request_id,
                    timeout,
                }));
            }
        }

        Poll::Pending
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(shared) = self.shared.upgrade() {
                shared.forget(self.request_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (TaskChannel, flume::Receiver<RequestEnvelope>) {
        let (tx, rx) = flume::unbounded();
        (TaskChannel::new(tx, None), rx)
    }

    fn generated(request_id: RequestId, byte: u8) -> ResponseEnvelope {
        ResponseEnvelope::completed(request_id, ResultFields::Generated { buffer: vec![byte] })
    }

    #[test]
    fn test_ids_are_monotonic() {
        let (channel, rx) = channel();
        let a = channel.submit(Operation::Load { buffer: vec![] });
        let b = channel.submit(Operation::Load { buffer: vec![] });
        let c = channel.submit(Operation::Load { buffer: vec![] });

        assert_eq!((a.request_id(), b.request_id(), c.request_id()), (0, 1, 2));
        let sent: Vec<RequestId> = rx.try_iter().map(|r| r.request_id).collect();
        assert_eq!(sent, vec![0, 1, 2]);
        assert_eq!(channel.pending_count(), 3);
    }

    #[test]
    fn test_out_of_order_responses() {
        let (channel, _rx) = channel();
        let requests: Vec<PendingRequest> = (0..5)
            .map(|_| channel.submit(Operation::Load { buffer: vec![] }))
            .collect();

        for id in [3, 0, 4, 1, 2] {
            assert!(channel.dispatch(generated(id, id as u8 * 10)));
        }

        for (index, request) in requests.into_iter().enumerate() {
            let result = pollster::block_on(request).unwrap();
            assert_eq!(result, ResultFields::Generated { buffer: vec![index as u8 * 10] });
        }
        assert_eq!(channel.pending_count(), 0);
    }

    fn permutations(items: Vec<usize>) -> Vec<Vec<usize>> {
        if items.len() <= 1 {
            return vec![items];
        }
        let mut all = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.clone();
            let first = rest.remove(i);
            for mut tail in permutations(rest) {
                tail.insert(0, first);
                all.push(tail);
            }
        }
        all
    }

    #[test]
    fn test_every_response_order_resolves_by_id() {
        let (channel, _rx) = channel();
        let orders = permutations((0..4).collect());
        assert_eq!(orders.len(), 24);

        for order in orders {
            let requests: Vec<PendingRequest> = (0..4)
                .map(|_| channel.submit(Operation::Load { buffer: vec![] }))
                .collect();
            let ids: Vec<RequestId> = requests.iter().map(PendingRequest::request_id).collect();

            for &slot in &order {
                assert!(channel.dispatch(generated(ids[slot], slot as u8 + 1)));
            }

            for (slot, request) in requests.into_iter().enumerate() {
                let result = pollster::block_on(request).unwrap();
                assert_eq!(result, ResultFields::Generated { buffer: vec![slot as u8 + 1] }, "order {:?}", order);
            }
            assert_eq!(channel.pending_count(), 0);
        }
    }

    #[test]
    fn test_unknown_and_duplicate_responses_are_ignored() {
        let (channel, _rx) = channel();
        let request = channel.submit(Operation::Load { buffer: vec![] });

        assert!(!channel.dispatch(generated(99, 0)));
        assert!(channel.dispatch(generated(0, 1)));
        assert!(!channel.dispatch(generated(0, 2)));

        assert_eq!(
            pollster::block_on(request).unwrap(),
            ResultFields::Generated { buffer: vec![1] }
        );
    }

    #[test]
    fn test_remote_error_is_scoped_to_its_request() {
        let (channel, _rx) = channel();
        let failing = channel.submit(Operation::Load { buffer: vec![] });
        let working = channel.submit(Operation::Load { buffer: vec![] });

        channel.dispatch(ResponseEnvelope::failed(0, "not a point cloud"));
        channel.dispatch(generated(1, 5));

        assert_eq!(
            pollster::block_on(failing),
            Err(ChannelError::Remote {
                request_id: 0,
                message: "not a point cloud".to_string()
            })
        );
        assert!(pollster::block_on(working).is_ok());
        assert!(!channel.is_closed());
    }

    #[test]
    fn test_shutdown_rejects_pending_and_later_submissions() {
        let (channel, rx) = channel();
        let pending = channel.submit(Operation::Load { buffer: vec![] });

        channel.shutdown();
        channel.shutdown();

        assert_eq!(pollster::block_on(pending), Err(ChannelError::Closed));
        assert!(channel.is_closed());
        // The outbound sender was dropped with the shutdown
        assert!(rx.recv().is_ok());
        assert!(rx.recv().is_err());

        let late = channel.submit(Operation::Load { buffer: vec![] });
        assert_eq!(pollster::block_on(late), Err(ChannelError::Closed));
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn test_disconnected_worker_rejects_submission() {
        let (channel, rx) = channel();
        drop(rx);

        let request = channel.submit(Operation::Load { buffer: vec![] });
        assert_eq!(pollster::block_on(request), Err(ChannelError::Closed));
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn test_deadline_expires_and_late_response_is_ignored() {
        let (channel, _rx) = channel();
        let request =
            channel.submit_with_deadline(Operation::Load { buffer: vec![] }, Duration::from_millis(20));

        assert_eq!(
            pollster::block_on(request),
            Err(ChannelError::Timeout {
                request_id: 0,
                timeout: Duration::from_millis(20)
            })
        );
        assert_eq!(channel.pending_count(), 0);
        assert!(!channel.dispatch(generated(0, 1)));
    }

    #[test]
    fn test_response_beats_deadline() {
        let (channel, _rx) = channel();
        let request =
            channel.submit_with_deadline(Operation::Load { buffer: vec![] }, Duration::from_secs(30));
        channel.dispatch(generated(0, 4));

        assert_eq!(
            pollster::block_on(request).unwrap(),
            ResultFields::Generated { buffer: vec![4] }
        );
    }

    #[test]
    fn test_claimed_response_wins_over_expired_deadline() {
        let (channel, _rx) = channel();
        let mut request =
            channel.submit_with_deadline(Operation::Load { buffer: vec![] }, Duration::from_millis(10));

        // Dispatch has taken the continuation but not yet sent through it
        let continuation = channel.shared.pending.lock().remove(&0).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        assert!(Pin::new(&mut request).poll(&mut cx).is_pending());

        continuation
            .send(Ok(ResultFields::Generated { buffer: vec![8] }))
            .unwrap();
        assert_eq!(
            pollster::block_on(request).unwrap(),
            ResultFields::Generated { buffer: vec![8] }
        );
    }

    #[test]
    fn test_cancel_and_drop_remove_pending_entry() {
        let (channel, _rx) = channel();
        let cancelled = channel.submit(Operation::Load { buffer: vec![] });
        let dropped = channel.submit(Operation::Load { buffer: vec![] });
        assert_eq!(channel.pending_count(), 2);

        cancelled.cancel();
        drop(dropped);

        assert_eq!(channel.pending_count(), 0);
        assert!(!channel.dispatch(generated(0, 0)));
        assert!(!channel.dispatch(generated(1, 0)));
    }

    #[test]
    fn test_typed_helpers_reject_wrong_result_kind() {
        let (channel, rx) = channel();
        let responder = std::thread::spawn({
            let channel = channel.clone();
            move || {
                let request = rx.recv().unwrap();
                channel.dispatch(generated(request.request_id, 1));
            }
        });

        let result = pollster::block_on(channel.load(vec![1, 2, 3]));
        responder.join().unwrap();
        assert_eq!(
            result,
            Err(ChannelError::UnexpectedResponse {
                request_id: 0,
                expected: "point cloud"
            })
        );
    }
}
