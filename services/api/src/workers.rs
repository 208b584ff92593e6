//! services/api/src/workers.rs
//!
//! Periodic background passes over the discussion core: digest generation and
//! dispatch, the stale-review reaper, trust recomputation, outbox delivery and
//! the digest-history purge.
//!
//! Every worker ticks on its own interval and stops at the next suspension
//! point once the shared `CancellationToken` is cancelled. Digest generation
//! runs one task per `userId mod N` partition.

use forum_core::domain::Frequency;
use forum_core::settings::RetryPolicy;
use forum_core::{Forum, ForumResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Items handled per pass by the batch workers.
const BATCH: u32 = 100;

/// How often each worker wakes up.
#[derive(Debug, Clone)]
pub struct WorkerIntervals {
    pub digest_generation: Duration,
    pub digest_dispatch: Duration,
    pub queue_reaper: Duration,
    pub trust_recalculation: Duration,
    pub outbox: Duration,
    pub history_purge: Duration,
}

impl Default for WorkerIntervals {
    fn default() -> Self {
        Self {
            digest_generation: Duration::from_secs(5 * 60),
            digest_dispatch: Duration::from_secs(30),
            queue_reaper: Duration::from_secs(60),
            trust_recalculation: Duration::from_secs(5 * 60),
            outbox: Duration::from_secs(10),
            history_purge: Duration::from_secs(60 * 60),
        }
    }
}

/// Spawns every worker; the handles finish once `token` is cancelled.
pub fn spawn_workers(
    forum: Forum,
    partitions: u32,
    intervals: WorkerIntervals,
    token: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let partitions = partitions.max(1);
    let mut handles = Vec::new();

    for partition in 0..partitions {
        let forum = forum.clone();
        handles.push(tokio::spawn(run_periodic(
            "digest-generation",
            intervals.digest_generation,
            token.clone(),
            move || {
                let forum = forum.clone();
                async move {
                    for frequency in [Frequency::Daily, Frequency::Weekly] {
                        generate_digests(&forum, frequency, partitions, partition).await;
                    }
                }
            },
        )));
    }

    let worker = forum.clone();
    handles.push(tokio::spawn(run_periodic(
        "digest-dispatch",
        intervals.digest_dispatch,
        token.clone(),
        move || dispatch_digests(worker.clone()),
    )));

    let worker = forum.clone();
    handles.push(tokio::spawn(run_periodic(
        "queue-reaper",
        intervals.queue_reaper,
        token.clone(),
        move || reap_stale_reviews(worker.clone()),
    )));

    let worker = forum.clone();
    handles.push(tokio::spawn(run_periodic(
        "trust-recalculation",
        intervals.trust_recalculation,
        token.clone(),
        move || recalculate_trust(worker.clone()),
    )));

    let worker = forum.clone();
    handles.push(tokio::spawn(run_periodic(
        "outbox",
        intervals.outbox,
        token.clone(),
        move || deliver_outbox(worker.clone()),
    )));

    handles.push(tokio::spawn(run_periodic(
        "history-purge",
        intervals.history_purge,
        token,
        move || purge_history(forum.clone()),
    )));

    info!(workers = handles.len(), partitions, "Background workers started");
    handles
}

/// Runs `pass` on every tick until `token` is cancelled. A pass in flight is
/// dropped at its next await point.
async fn run_periodic<F, Fut>(name: &'static str, every: Duration, token: CancellationToken, mut pass: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut timer = tokio::time::interval(every);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(worker = name, every_secs = every.as_secs(), "Worker started");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = timer.tick() => {}
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = pass() => {}
        }
    }
    info!(worker = name, "Worker stopped");
}

/// Retries `op` while it fails with a retryable error, backing off with
/// jitter, for at most `policy.max_attempts` attempts.
async fn with_retries<T, F, Fut>(policy: &RetryPolicy, what: &'static str, mut op: F) -> ForumResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ForumResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let jitter: f64 = rand::rng().random();
                let delay = policy.delay(attempt, jitter).to_std().unwrap_or_default();
                warn!(what, attempt, error = %err, delay_ms = delay.as_millis() as u64, "Retrying worker pass");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

//=========================================================================================
// Passes
//=========================================================================================

#[instrument(skip(forum))]
pub async fn generate_digests(forum: &Forum, frequency: Frequency, partitions: u32, partition: u32) {
    let result = with_retries(&forum.settings.retry, "digest generation", || {
        forum.subscriptions.generate_digests(frequency, partitions, partition)
    })
    .await;
    match result {
        Ok(0) => {}
        Ok(created) => info!(created, "Digests generated"),
        Err(err) => warn!(error = %err, "Digest generation pass failed"),
    }
}

#[instrument(skip_all)]
pub async fn dispatch_digests(forum: Forum) {
    let result = with_retries(&forum.settings.retry, "digest dispatch", || {
        forum.subscriptions.process_pending_digests(BATCH)
    })
    .await;
    match result {
        Ok(summary) if summary.sent + summary.failed > 0 => {
            info!(sent = summary.sent, failed = summary.failed, "Digests dispatched")
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "Digest dispatch pass failed"),
    }
}

#[instrument(skip_all)]
pub async fn reap_stale_reviews(forum: Forum) {
    match with_retries(&forum.settings.retry, "queue reaper", || forum.moderation.reap_stale_reviews()).await {
        Ok(released) if !released.is_empty() => info!(?released, "Stale reviews returned to the queue"),
        Ok(_) => {}
        Err(err) => warn!(error = %err, "Queue reaper pass failed"),
    }
}

#[instrument(skip_all)]
pub async fn recalculate_trust(forum: Forum) {
    match with_retries(&forum.settings.retry, "trust recalculation", || forum.trust.recalculate_stale(BATCH)).await {
        Ok(0) => {}
        Ok(refreshed) => info!(refreshed, "Trust scores recalculated"),
        Err(err) => warn!(error = %err, "Trust recalculation pass failed"),
    }
}

#[instrument(skip_all)]
pub async fn deliver_outbox(forum: Forum) {
    match with_retries(&forum.settings.retry, "outbox", || forum.outbox.deliver_due(BATCH)).await {
        Ok(summary) if summary.delivered + summary.rescheduled + summary.dead > 0 => info!(
            delivered = summary.delivered,
            rescheduled = summary.rescheduled,
            dead = summary.dead,
            "Outbox pass complete"
        ),
        Ok(_) => {}
        Err(err) => warn!(error = %err, "Outbox pass failed"),
    }
}

#[instrument(skip_all)]
pub async fn purge_history(forum: Forum) {
    match with_retries(&forum.settings.retry, "history purge", || forum.subscriptions.purge_history()).await {
        Ok(0) => {}
        Ok(purged) => info!(purged, "Digest history purged"),
        Err(err) => warn!(error = %err, "History purge failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forum_core::ForumError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: chrono::Duration::milliseconds(1),
            max_delay: chrono::Duration::milliseconds(2),
        }
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_until_success() {
        let calls = &AtomicU32::new(0);
        let result = with_retries(&fast_policy(5), "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ForumError::Timeout("store".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_stop_at_the_attempt_budget() {
        let calls = &AtomicU32::new(0);
        let result: ForumResult<()> = with_retries(&fast_policy(3), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ForumError::DependencyFailure("cache".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failures_return_immediately() {
        let calls = &AtomicU32::new(0);
        let result: ForumResult<()> = with_retries(&fast_policy(5), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ForumError::validation("bad"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn periodic_worker_stops_on_cancellation() {
        let token = CancellationToken::new();
        let ticks = std::sync::Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let handle = tokio::spawn(run_periodic("test", Duration::from_millis(5), token.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker stops")
            .expect("worker does not panic");
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }
}
