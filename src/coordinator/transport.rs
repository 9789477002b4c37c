//! Per-replica delivery with retry, backoff and a wall-clock deadline
//!
//! This is the only place delivery failures are classified. Whatever
//! happens, a delivery reports exactly one outcome into the write's latch.

use crate::common::protocol::validate_ack;
use crate::common::{
    backoff_delay, LogEntry, MetricsRegistry, QuorumLatch, ReplicaAddress, ReplicaChannel,
    RetryPolicy, WriteOp,
};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How one delivery ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Acked { attempts: u32 },
    /// Deadline exceeded before any attempt succeeded
    Abandoned { attempts: u32 },
    /// The owning write stopped waiting
    Cancelled { attempts: u32 },
}

pub struct ReplicaTransport {
    channel: Arc<dyn ReplicaChannel>,
    policy: RetryPolicy,
    metrics: Arc<MetricsRegistry>,
}

impl ReplicaTransport {
    pub fn new(
        channel: Arc<dyn ReplicaChannel>,
        policy: RetryPolicy,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            channel,
            policy,
            metrics,
        }
    }

    /// Deliver `entry` to `replica` and report the result into `latch`.
    pub async fn deliver(
        &self,
        replica: &ReplicaAddress,
        op: WriteOp,
        entry: &LogEntry,
        latch: &QuorumLatch,
        cancel: &CancellationToken,
    ) -> Delivery {
        let deadline = Instant::now() + self.policy.deadline;
        let mut attempts: u32 = 0;

        let delivery = loop {
            if Instant::now() >= deadline {
                break Delivery::Abandoned { attempts };
            }
            attempts += 1;
            self.metrics.delivery_attempts.inc();

            let exchange =
                tokio::time::timeout_at(deadline, self.channel.write(replica, op, entry));
            let result = tokio::select! {
                _ = cancel.cancelled() => break Delivery::Cancelled { attempts },
                result = exchange => result,
            };

            let err = match result {
                Err(_) => break Delivery::Abandoned { attempts },
                Ok(Ok(ack)) => match validate_ack(op.expected_ack(), &ack) {
                    Ok(()) => break Delivery::Acked { attempts },
                    Err(e) => e,
                },
                Ok(Err(e)) => e,
            };

            let delay = backoff_delay(
                attempts - 1,
                self.policy.backoff_base,
                self.policy.backoff_max,
            );
            if err.is_connect() {
                tracing::warn!(
                    replica = %replica,
                    index = entry.index,
                    attempt = attempts,
                    "Couldn't connect to replica: {}; retrying in {:?}",
                    err,
                    delay
                );
            } else if err.is_retryable() {
                tracing::warn!(
                    replica = %replica,
                    index = entry.index,
                    attempt = attempts,
                    "Replica reached but {} not acknowledged: {}",
                    op,
                    err
                );
            } else {
                tracing::error!(
                    replica = %replica,
                    index = entry.index,
                    attempt = attempts,
                    "Unexpected {} failure: {}",
                    op,
                    err
                );
            }

            if Instant::now() + delay >= deadline {
                break Delivery::Abandoned { attempts };
            }
            tokio::select! {
                _ = cancel.cancelled() => break Delivery::Cancelled { attempts },
                _ = tokio::time::sleep(delay) => {}
            }
        };

        match delivery {
            Delivery::Acked { attempts } => {
                tracing::debug!(
                    replica = %replica,
                    index = entry.index,
                    attempts,
                    "{} acknowledged",
                    op
                );
                self.metrics.deliveries_acked.inc();
                latch.record_success();
            }
            Delivery::Abandoned { attempts } => {
                tracing::error!(
                    replica = %replica,
                    index = entry.index,
                    attempts,
                    "Couldn't deliver {} before the deadline; abandoning",
                    op
                );
                self.metrics.deliveries_abandoned.inc();
                latch.record_failure();
            }
            Delivery::Cancelled { attempts } => {
                tracing::debug!(
                    replica = %replica,
                    index = entry.index,
                    attempts,
                    "{} delivery cancelled",
                    op
                );
                latch.record_failure();
            }
        }
        delivery
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::common::protocol::{ACK_APPENDED, ACK_DELETED, ACK_IS_ALIVE};
    use crate::common::{Error, Outcome, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;

    /// Scripted reply for one call
    #[derive(Debug, Clone)]
    pub enum Reply {
        Ack,
        Token(&'static str),
        Refused,
        Hang,
    }

    /// Channel whose replies are scripted per replica; the last script
    /// entry repeats forever.
    #[derive(Default)]
    pub struct ScriptedChannel {
        scripts: Mutex<HashMap<ReplicaAddress, VecDeque<Reply>>>,
        pub calls: Mutex<HashMap<ReplicaAddress, u32>>,
    }

    impl ScriptedChannel {
        pub fn script(&self, replica: &ReplicaAddress, replies: Vec<Reply>) {
            self.scripts
                .lock()
                .insert(replica.clone(), replies.into_iter().collect());
        }

        pub fn calls_to(&self, replica: &ReplicaAddress) -> u32 {
            self.calls.lock().get(replica).copied().unwrap_or(0)
        }

        fn next(&self, replica: &ReplicaAddress) -> Reply {
            *self.calls.lock().entry(replica.clone()).or_default() += 1;
            let mut scripts = self.scripts.lock();
            let script = scripts.entry(replica.clone()).or_default();
            if script.len() > 1 {
                script.pop_front().unwrap_or(Reply::Ack)
            } else {
                script.front().cloned().unwrap_or(Reply::Ack)
            }
        }

        async fn answer(&self, replica: &ReplicaAddress, ack: &'static str) -> Result<String> {
            match self.next(replica) {
                Reply::Ack => Ok(ack.to_string()),
                Reply::Token(token) => Ok(token.to_string()),
                Reply::Refused => Err(Error::ConnectionFailed("connection refused".into())),
                Reply::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    #[async_trait]
    impl ReplicaChannel for ScriptedChannel {
        async fn write(
            &self,
            replica: &ReplicaAddress,
            op: WriteOp,
            _entry: &LogEntry,
        ) -> Result<String> {
            let ack = match op {
                WriteOp::Append => ACK_APPENDED,
                WriteOp::Delete => ACK_DELETED,
            };
            self.answer(replica, ack).await
        }

        async fn probe(&self, replica: &ReplicaAddress) -> Result<String> {
            self.answer(replica, ACK_IS_ALIVE).await
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            deadline: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(1),
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
        }
    }

    fn setup(replies: Vec<Reply>) -> (ReplicaTransport, Arc<ScriptedChannel>, ReplicaAddress) {
        let replica = ReplicaAddress::new("replica-1", 6001);
        let channel = Arc::new(ScriptedChannel::default());
        channel.script(&replica, replies);
        let transport = ReplicaTransport::new(
            channel.clone(),
            policy(),
            Arc::new(MetricsRegistry::new()),
        );
        (transport, channel, replica)
    }

    async fn deliver_once(
        transport: &ReplicaTransport,
        replica: &ReplicaAddress,
        op: WriteOp,
        latch: &QuorumLatch,
    ) -> Delivery {
        transport
            .deliver(
                replica,
                op,
                &LogEntry::new(0, "a"),
                latch,
                &CancellationToken::new(),
            )
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_records_success() {
        let (transport, _, replica) = setup(vec![Reply::Ack]);
        let latch = QuorumLatch::with_quorum(1, 1);
        let delivery = deliver_once(&transport, &replica, WriteOp::Append, &latch).await;
        assert_eq!(delivery, Delivery::Acked { attempts: 1 });
        assert_eq!(latch.outcome(), Outcome::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_after_refused_connections() {
        let (transport, channel, replica) =
            setup(vec![Reply::Refused, Reply::Refused, Reply::Ack]);
        let latch = QuorumLatch::with_quorum(1, 1);
        let started = Instant::now();
        let delivery = deliver_once(&transport, &replica, WriteOp::Append, &latch).await;
        assert_eq!(delivery, Delivery::Acked { attempts: 3 });
        assert_eq!(channel.calls_to(&replica), 3);
        // 100ms + 200ms of backoff
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert_eq!(latch.successes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_ack_is_an_attempt_failure() {
        let (transport, _, replica) = setup(vec![Reply::Token("deleted"), Reply::Ack]);
        let latch = QuorumLatch::with_quorum(1, 2);
        let delivery = deliver_once(&transport, &replica, WriteOp::Append, &latch).await;
        assert_eq!(delivery, Delivery::Acked { attempts: 2 });
        assert_eq!(latch.failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_replica_is_abandoned_at_deadline() {
        let (transport, _, replica) = setup(vec![Reply::Refused]);
        let latch = QuorumLatch::with_quorum(1, 1);
        let started = Instant::now();
        let delivery = deliver_once(&transport, &replica, WriteOp::Append, &latch).await;
        assert!(matches!(delivery, Delivery::Abandoned { .. }));
        assert!(started.elapsed() <= policy().deadline);
        assert_eq!(latch.failures(), 1);
        assert_eq!(latch.successes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_replica_is_abandoned_at_deadline() {
        let (transport, _, replica) = setup(vec![Reply::Hang]);
        let latch = QuorumLatch::with_quorum(1, 1);
        let started = Instant::now();
        let delivery = deliver_once(&transport, &replica, WriteOp::Delete, &latch).await;
        assert_eq!(delivery, Delivery::Abandoned { attempts: 1 });
        assert_eq!(started.elapsed(), policy().deadline);
        assert_eq!(latch.outcome(), Outcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_delivery() {
        let (transport, _, replica) = setup(vec![Reply::Hang]);
        let latch = QuorumLatch::with_quorum(1, 1);
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            })
        };
        let delivery = transport
            .deliver(&replica, WriteOp::Append, &LogEntry::new(0, "a"), &latch, &cancel)
            .await;
        canceller.await.unwrap();
        assert_eq!(delivery, Delivery::Cancelled { attempts: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_expects_deleted_token() {
        let (transport, _, replica) = setup(vec![Reply::Token("appended")]);
        let latch = QuorumLatch::with_quorum(1, 1);
        let delivery = deliver_once(&transport, &replica, WriteOp::Delete, &latch).await;
        assert!(matches!(delivery, Delivery::Abandoned { .. }));
    }
}
