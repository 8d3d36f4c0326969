//! Consumer side of a streaming fan-out.

use std::collections::HashSet;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tether_proto::{ConnectionId, InvokeError};
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::helpers::cancelled;
use crate::payload::PayloadPolicy;
use crate::response::{Registration, ReplyQueue, TargetReply};

/// One target's outcome, in arrival order.
#[derive(Debug)]
pub struct TargetResult<R> {
    pub connection_id: ConnectionId,
    pub received_at: Instant,
    pub result: Result<R, InvokeError>,
}

enum Step {
    Reply(TargetReply),
    Expired,
    Closed,
}

/// Lazy, finite, non-restartable sequence of per-target results.
///
/// Ends once every target is accounted for, or when the deadline passes or
/// the call is cancelled; replies already queued at that point are still
/// yielded. The admission slot and the registration are released when the
/// sequence ends or the stream is dropped.
pub struct ReplyStream<R> {
    method: String,
    queue: Option<ReplyQueue>,
    deadline: Instant,
    cancel: Option<CancellationToken>,
    policy: PayloadPolicy,
    registration: Option<Registration>,
    permit: Option<OwnedSemaphorePermit>,
    targets: Vec<ConnectionId>,
    answered: HashSet<ConnectionId>,
    expired: bool,
    _reply: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned> ReplyStream<R> {
    pub(crate) fn new(
        method: &str,
        queue: ReplyQueue,
        registration: Registration,
        permit: OwnedSemaphorePermit,
        targets: Vec<ConnectionId>,
        policy: PayloadPolicy,
    ) -> Self {
        Self {
            method: method.to_string(),
            queue: Some(queue),
            deadline: Instant::now(),
            cancel: None,
            policy,
            registration: Some(registration),
            permit: Some(permit),
            targets,
            answered: HashSet::new(),
            expired: false,
            _reply: PhantomData,
        }
    }

    pub(crate) fn with_deadline(mut self, deadline: Instant, cancel: Option<CancellationToken>) -> Self {
        self.deadline = deadline;
        self.cancel = cancel;
        self
    }

    /// A stream over zero targets; it ends immediately.
    pub fn empty(method: &str) -> Self {
        Self {
            method: method.to_string(),
            queue: None,
            deadline: Instant::now(),
            cancel: None,
            policy: PayloadPolicy::inline_only(),
            registration: None,
            permit: None,
            targets: Vec::new(),
            answered: HashSet::new(),
            expired: false,
            _reply: PhantomData,
        }
    }

    pub async fn next(&mut self) -> Option<TargetResult<R>> {
        loop {
            let queue = self.queue.as_mut()?;
            let step = if self.expired {
                match queue.try_recv() {
                    Ok(reply) => Step::Reply(reply),
                    Err(_) => Step::Closed,
                }
            } else {
                tokio::select! {
                    biased;
                    reply = queue.recv() => match reply {
                        Some(reply) => Step::Reply(reply),
                        None => Step::Closed,
                    },
                    _ = tokio::time::sleep_until(self.deadline) => Step::Expired,
                    _ = cancelled(self.cancel.as_ref()) => Step::Expired,
                }
            };

            match step {
                Step::Reply(reply) => {
                    self.answered.insert(reply.connection_id.clone());
                    let result = self.policy.consume_reply_before(reply.envelope, self.deadline).await;
                    return Some(TargetResult {
                        connection_id: reply.connection_id,
                        received_at: reply.received_at,
                        result,
                    });
                }
                Step::Expired => {
                    log::debug!(
                        "stream: {} expired with {}/{} replies",
                        self.method,
                        self.answered.len(),
                        self.targets.len()
                    );
                    self.expired = true;
                    if let Some(registration) = self.registration.as_ref() {
                        registration.close_streaming();
                    }
                }
                Step::Closed => {
                    self.finish();
                    return None;
                }
            }
        }
    }

    /// Drain the remaining results.
    pub async fn collect(mut self) -> Vec<TargetResult<R>> {
        let mut results = Vec::with_capacity(self.targets.len());
        while let Some(item) = self.next().await {
            results.push(item);
        }
        results
    }

    /// Targets that have not produced a result so far.
    pub fn pending_targets(&self) -> Vec<ConnectionId> {
        self.targets.iter().filter(|target| !self.answered.contains(*target)).cloned().collect()
    }

    pub fn targets(&self) -> &[ConnectionId] {
        &self.targets
    }

    /// `true` once the deadline passed or the call was cancelled.
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    fn finish(&mut self) {
        self.queue = None;
        self.registration = None;
        self.permit = None;
        let missing = self.targets.len().saturating_sub(self.answered.len());
        if missing > 0 {
            log::info!("stream: {} ended without replies from {} target(s)", self.method, missing);
        }
    }
}
