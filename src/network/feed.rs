// src/network/feed.rs
//! Background work fetching for one session
//!
//! The feed polls the work source on a fixed interval and, once the
//! endpoint advertises it, keeps one long-poll request open alongside.
//! Both paths push units into the same channel; ordering between them is
//! settled by the session's work book, not here.
//!
//! Failures are retried with exponential backoff. Authentication failures
//! and exhausted retry ceilings end the feed with [`FeedEvent::Fatal`].

use crate::config::RetrySettings;
use crate::miner::work::WorkUnit;
use crate::network::pool::WorkSource;
use crate::utils::Backoff;
use crate::utils::error::PoolError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What the feed reports to its session
#[derive(Debug)]
pub enum FeedEvent {
    /// A unit arrived on either path
    Work(WorkUnit),
    /// A fetch failed and will be retried after `delay`
    Trouble {
        /// The failure
        error: PoolError,
        /// Consecutive failures so far
        attempt: u32,
        /// Wait before the next fetch
        delay: Duration,
    },
    /// The feed gave up; the session cannot continue
    Fatal(String),
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Running fetch tasks of one session
///
/// Dropping or stopping the feed cancels every outstanding request.
pub struct WorkFeed {
    poller: Option<AbortOnDrop>,
}

impl WorkFeed {
    /// Starts polling `source`
    ///
    /// # Arguments
    /// * `source` - Pool client (or stand-in) to fetch from
    /// * `poll_interval` - Delay between successful short polls
    /// * `retry` - Backoff and ceilings for failed fetches
    pub fn spawn(
        source: Arc<dyn WorkSource>,
        poll_interval: Duration,
        retry: RetrySettings,
    ) -> (Self, mpsc::UnboundedReceiver<FeedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let poller = tokio::spawn(poll_loop(source, tx, poll_interval, retry));
        (
            WorkFeed {
                poller: Some(AbortOnDrop(poller)),
            },
            rx,
        )
    }

    /// Cancels polling and any open long-poll request
    pub fn stop(&mut self) {
        self.poller.take();
    }
}

async fn poll_loop(
    source: Arc<dyn WorkSource>,
    tx: mpsc::UnboundedSender<FeedEvent>,
    poll_interval: Duration,
    retry: RetrySettings,
) {
    let mut backoff = Backoff::new(retry.initial_delay(), retry.max_delay(), retry.jitter);
    let mut failures = 0u32;
    let mut protocol_errors = 0u32;
    // Owned here so cancelling the poller also cancels the long poll.
    let mut long_poll: Option<AbortOnDrop> = None;

    loop {
        match source.fetch_work().await {
            Ok(unit) => {
                failures = 0;
                protocol_errors = 0;
                backoff.reset();
                if tx.send(FeedEvent::Work(unit)).is_err() {
                    return;
                }
                if long_poll.is_none() && source.supports_long_poll() {
                    long_poll = Some(AbortOnDrop(tokio::spawn(long_poll_loop(
                        source.clone(),
                        tx.clone(),
                        retry.clone(),
                    ))));
                }
                tokio::time::sleep(poll_interval).await;
            }
            Err(error) => {
                if !error.is_transient() {
                    let _ = tx.send(FeedEvent::Fatal(error.to_string()));
                    return;
                }

                failures += 1;
                if matches!(error, PoolError::Protocol(_)) {
                    protocol_errors += 1;
                    if protocol_errors > retry.max_protocol_errors {
                        let _ = tx.send(FeedEvent::Fatal(format!(
                            "{} malformed responses in a row, last: {}",
                            protocol_errors, error
                        )));
                        return;
                    }
                }
                if let Some(max) = retry.max_fetch_failures {
                    if failures > max {
                        let _ = tx.send(FeedEvent::Fatal(format!(
                            "gave up after {} failed fetches, last: {}",
                            failures, error
                        )));
                        return;
                    }
                }

                let delay = backoff.next_delay();
                let trouble = FeedEvent::Trouble {
                    error,
                    attempt: failures,
                    delay,
                };
                if tx.send(trouble).is_err() {
                    return;
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn long_poll_loop(
    source: Arc<dyn WorkSource>,
    tx: mpsc::UnboundedSender<FeedEvent>,
    retry: RetrySettings,
) {
    let mut backoff = Backoff::new(retry.initial_delay(), retry.max_delay(), retry.jitter);
    loop {
        match source.long_poll().await {
            Ok(unit) => {
                backoff.reset();
                log::debug!("Long poll delivered work {}", unit.id);
                if tx.send(FeedEvent::Work(unit)).is_err() {
                    return;
                }
            }
            Err(PoolError::Auth(reason)) => {
                let _ = tx.send(FeedEvent::Fatal(PoolError::Auth(reason).to_string()));
                return;
            }
            Err(error) => {
                // Server-side long-poll timeouts are routine; the short-poll
                // path reports real outages.
                log::debug!("Long poll failed: {}", error);
                tokio::time::sleep(backoff.next_delay()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::work::{ShareOutcome, WorkOrigin, WorkResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Scripted {
        fetches: Mutex<VecDeque<Result<(), PoolError>>>,
        next_id: AtomicU64,
    }

    impl Scripted {
        fn new(script: Vec<Result<(), PoolError>>) -> Arc<Self> {
            Arc::new(Scripted {
                fetches: Mutex::new(script.into()),
                next_id: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl WorkSource for Scripted {
        async fn fetch_work(&self) -> Result<WorkUnit, PoolError> {
            let step = self.fetches.lock().unwrap().pop_front().unwrap_or(Ok(()));
            step?;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            WorkUnit::new(id, vec![id as u8; 128], vec![0xff; 32], WorkOrigin::Poll)
        }

        async fn submit_work(
            &self,
            _unit: &WorkUnit,
            _result: &WorkResult,
            _superseded: bool,
        ) -> Result<ShareOutcome, PoolError> {
            Ok(ShareOutcome::Accepted)
        }

        fn supports_long_poll(&self) -> bool {
            false
        }

        async fn long_poll(&self) -> Result<WorkUnit, PoolError> {
            Err(PoolError::Protocol("unsupported".into()))
        }
    }

    fn fast_retry() -> RetrySettings {
        RetrySettings {
            initial_delay_ms: 1,
            max_delay_ms: 4,
            jitter: 0.0,
            ..RetrySettings::default()
        }
    }

    #[tokio::test]
    async fn network_errors_are_retried_until_work_arrives() {
        let net = || Err(PoolError::Network("refused".into()));
        let source = Scripted::new(vec![net(), net(), net()]);
        let (_feed, mut rx) = WorkFeed::spawn(source, Duration::from_secs(60), fast_retry());

        let mut delays = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                FeedEvent::Trouble { attempt, delay, .. } => {
                    assert_eq!(attempt as usize, delays.len() + 1);
                    delays.push(delay);
                }
                FeedEvent::Work(unit) => {
                    assert_eq!(unit.id, 1);
                    break;
                }
                FeedEvent::Fatal(reason) => panic!("unexpected fatal: {}", reason),
            }
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1),
                Duration::from_millis(2),
                Duration::from_millis(4)
            ]
        );
    }

    #[tokio::test]
    async fn auth_errors_are_fatal_without_retry() {
        let source = Scripted::new(vec![Err(PoolError::Auth("401".into()))]);
        let (_feed, mut rx) = WorkFeed::spawn(source, Duration::from_secs(60), fast_retry());
        match rx.recv().await.unwrap() {
            FeedEvent::Fatal(reason) => assert!(reason.contains("authentication")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn fetch_ceiling_ends_the_feed() {
        let net = || Err(PoolError::Network("down".into()));
        let source = Scripted::new(vec![net(), net(), net()]);
        let retry = RetrySettings {
            max_fetch_failures: Some(2),
            ..fast_retry()
        };
        let (_feed, mut rx) = WorkFeed::spawn(source, Duration::from_secs(60), retry);

        let mut troubles = 0;
        loop {
            match rx.recv().await.unwrap() {
                FeedEvent::Trouble { .. } => troubles += 1,
                FeedEvent::Fatal(reason) => {
                    assert!(reason.contains("gave up after 3"));
                    break;
                }
                FeedEvent::Work(_) => panic!("work after ceiling"),
            }
        }
        assert_eq!(troubles, 2);
    }

    #[tokio::test]
    async fn repeated_protocol_errors_escalate() {
        let bad = || Err(PoolError::Protocol("garbage".into()));
        let source = Scripted::new(vec![bad(), bad(), bad()]);
        let retry = RetrySettings {
            max_protocol_errors: 2,
            ..fast_retry()
        };
        let (_feed, mut rx) = WorkFeed::spawn(source, Duration::from_secs(60), retry);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(events.last(), Some(FeedEvent::Fatal(_))));
    }

    /// Short polls always succeed; long polls answer whatever the test
    /// pushes, in order
    struct LongPolling {
        next_id: AtomicU64,
        pushes: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<(), PoolError>>>,
    }

    impl LongPolling {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<(), PoolError>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let source = Arc::new(LongPolling {
                next_id: AtomicU64::new(0),
                pushes: tokio::sync::Mutex::new(rx),
            });
            (source, tx)
        }

        fn unit(&self, origin: WorkOrigin) -> Result<WorkUnit, PoolError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            WorkUnit::new(id, vec![id as u8; 128], vec![0xff; 32], origin)
        }
    }

    #[async_trait]
    impl WorkSource for LongPolling {
        async fn fetch_work(&self) -> Result<WorkUnit, PoolError> {
            self.unit(WorkOrigin::Poll)
        }

        async fn submit_work(
            &self,
            _unit: &WorkUnit,
            _result: &WorkResult,
            _superseded: bool,
        ) -> Result<ShareOutcome, PoolError> {
            Ok(ShareOutcome::Accepted)
        }

        fn supports_long_poll(&self) -> bool {
            true
        }

        async fn long_poll(&self) -> Result<WorkUnit, PoolError> {
            match self.pushes.lock().await.recv().await {
                Some(step) => {
                    step?;
                    self.unit(WorkOrigin::LongPoll)
                }
                None => std::future::pending().await,
            }
        }
    }

    async fn next_work(rx: &mut mpsc::UnboundedReceiver<FeedEvent>) -> WorkUnit {
        match rx.recv().await.unwrap() {
            FeedEvent::Work(unit) => unit,
            other => panic!("expected work, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn long_poll_runs_alongside_short_polls() {
        let (source, pushes) = LongPolling::new();
        let (_feed, mut rx) = WorkFeed::spawn(source, Duration::from_secs(60), fast_retry());

        let polled = next_work(&mut rx).await;
        assert_eq!((polled.id, polled.origin), (1, WorkOrigin::Poll));

        pushes.send(Ok(())).unwrap();
        pushes.send(Ok(())).unwrap();
        let pushed: Vec<WorkUnit> = vec![next_work(&mut rx).await, next_work(&mut rx).await];
        assert!(pushed.iter().all(|u| u.origin == WorkOrigin::LongPoll));
        assert_eq!(pushed.iter().map(|u| u.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn long_poll_retries_quietly_until_auth_fails() {
        let (source, pushes) = LongPolling::new();
        let (_feed, mut rx) = WorkFeed::spawn(source, Duration::from_secs(60), fast_retry());
        assert_eq!(next_work(&mut rx).await.origin, WorkOrigin::Poll);

        pushes
            .send(Err(PoolError::Network("timed out".into())))
            .unwrap();
        pushes.send(Ok(())).unwrap();
        // The failed request produces no event of its own.
        assert_eq!(next_work(&mut rx).await.origin, WorkOrigin::LongPoll);

        pushes.send(Err(PoolError::Auth("HTTP 403".into()))).unwrap();
        match rx.recv().await.unwrap() {
            FeedEvent::Fatal(reason) => assert!(reason.contains("HTTP 403"), "{}", reason),
            other => panic!("unexpected {:?}", other),
        }
    }
}
