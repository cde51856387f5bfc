use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use carrier_backend::{Backend, OutgoingAssignment, SendDisposition};
use carrier_common::types::config_keys;
use carrier_common::{Channel, ChannelError, ChannelLog, LogType, MsgStatus, SendError};
use carrier_gateway::handler::{HandlerContext, SendResult};
use carrier_gateway::HandlerRegistry;

/// Backoff bounds for an empty queue.
const BACKOFF_MIN: Duration = Duration::from_millis(10);
const BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay before retrying a message deferred by a channel cap.
const THROTTLE_BACKOFF: Duration = Duration::from_millis(100);

type ChannelRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone)]
pub struct SenderPoolConfig {
    pub workers: usize,
    /// How long `stop` waits for in-flight sends before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for SenderPoolConfig {
    fn default() -> Self {
        Self {
            workers: 32,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

struct Inner {
    registry: Arc<HandlerRegistry>,
    ctx: Arc<HandlerContext>,
    /// Per-channel concurrency caps (`max_concurrent_requests` config).
    semaphores: DashMap<Uuid, Arc<Semaphore>>,
    /// Per-channel token buckets (`max_rate_per_second` config).
    rate_limiters: DashMap<Uuid, Arc<ChannelRateLimiter>>,
}

impl Inner {
    fn backend(&self) -> &Arc<dyn Backend> {
        &self.ctx.backend
    }

    /// Acquire the channel's concurrency permit, when one is configured.
    fn try_acquire_slot(&self, channel: &Channel) -> Result<Option<OwnedSemaphorePermit>, ()> {
        let Some(max) = channel
            .config_int(config_keys::MAX_CONCURRENT_REQUESTS)
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
        else {
            return Ok(None);
        };

        let semaphore = self
            .semaphores
            .entry(channel.uuid)
            .or_insert_with(|| Arc::new(Semaphore::new(max)))
            .clone();
        match semaphore.try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(_) => Err(()),
        }
    }

    /// Take one rate token, when a rate cap is configured.
    fn try_take_rate_token(&self, channel: &Channel) -> Result<(), ()> {
        let Some(rate) = channel
            .config_int(config_keys::MAX_RATE_PER_SECOND)
            .and_then(|v| u32::try_from(v).ok())
            .and_then(NonZeroU32::new)
        else {
            return Ok(());
        };

        let limiter = self
            .rate_limiters
            .entry(channel.uuid)
            .or_insert_with(|| Arc::new(RateLimiter::direct(Quota::per_second(rate))))
            .clone();
        limiter.check().map_err(|_| ())
    }
}

/// Fixed pool of send workers over the backend's outgoing queue.
pub struct SenderPool {
    inner: Arc<Inner>,
    config: SenderPoolConfig,
    shutdown: watch::Sender<bool>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl SenderPool {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        ctx: Arc<HandlerContext>,
        config: SenderPoolConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                registry,
                ctx,
                semaphores: DashMap::new(),
                rate_limiters: DashMap::new(),
            }),
            config,
            shutdown,
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker tasks.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }

        info!(workers = self.config.workers, "Starting sender pool");
        for worker_id in 0..self.config.workers {
            let inner = self.inner.clone();
            let shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(run_worker(worker_id, inner, shutdown)));
        }
    }

    /// Signal shutdown and wait up to the grace period for in-flight sends.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        let drain = async {
            for handle in &handles {
                while !handle.is_finished() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        };

        if tokio::time::timeout(self.config.shutdown_grace, drain)
            .await
            .is_err()
        {
            warn!("Sender pool shutdown grace expired, aborting in-flight sends");
            for handle in &handles {
                handle.abort();
            }
        }
        info!("Sender pool stopped");
    }
}

async fn run_worker(worker_id: usize, inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    debug!(worker_id, "Send worker started");
    let mut backoff = BACKOFF_MIN;

    loop {
        if *shutdown.borrow() {
            break;
        }

        match inner.backend().pop_next_outgoing().await {
            Ok(Some(assignment)) => {
                backoff = BACKOFF_MIN;
                process_assignment(&inner, assignment).await;
            }
            Ok(None) => {
                // empty queue; wait with capped exponential backoff
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => {}
                }
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
            Err(e) => {
                warn!(worker_id, error = %e, "Failed to pop outgoing message");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => {}
                }
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
        }
    }

    debug!(worker_id, "Send worker exited");
}

async fn process_assignment(inner: &Inner, assignment: OutgoingAssignment) {
    let OutgoingAssignment { msg, token } = assignment;

    let Some(handler) = inner.registry.get(&msg.channel_type) else {
        // nothing can ever send this message
        write_unsendable(inner, &msg, "no handler for channel type").await;
        release(inner, token, SendDisposition::Completed).await;
        return;
    };

    let channel = match inner.backend().channel(&msg.channel_type, msg.channel_uuid).await {
        Ok(channel) => channel,
        Err(e) => {
            write_unsendable(inner, &msg, &format!("unable to resolve channel: {e}")).await;
            release(inner, token, SendDisposition::Completed).await;
            return;
        }
    };

    // channel caps: on exhaustion the message goes back unchanged
    let _permit = match inner.try_acquire_slot(&channel) {
        Ok(permit) => permit,
        Err(()) => {
            debug!(channel_uuid = %channel.uuid, msg_id = msg.id, "Channel at max concurrency, deferring");
            release(inner, token, SendDisposition::Requeue).await;
            tokio::time::sleep(THROTTLE_BACKOFF).await;
            return;
        }
    };
    if inner.try_take_rate_token(&channel).is_err() {
        debug!(channel_uuid = %channel.uuid, msg_id = msg.id, "Channel rate cap reached, deferring");
        release(inner, token, SendDisposition::Requeue).await;
        tokio::time::sleep(THROTTLE_BACKOFF).await;
        return;
    }

    let mut redact_values = handler.redact_values(&channel);
    redact_values.extend(inner.ctx.config.secrets.iter().cloned());
    let mut log = ChannelLog::new(LogType::MsgSend, redact_values);
    log.set_channel(channel.uuid);

    let mut result = SendResult::new();
    let send_outcome = handler
        .send(&inner.ctx, &channel, &msg, &mut result, &mut log)
        .await;

    let statuses = match &send_outcome {
        Ok(()) => {
            // one wired row per accepted part
            if result.external_ids().is_empty() {
                vec![inner
                    .backend()
                    .new_status_update(&channel, msg.id, MsgStatus::Wired)]
            } else {
                result
                    .external_ids()
                    .iter()
                    .map(|id| {
                        inner
                            .backend()
                            .new_status_update(&channel, msg.id, MsgStatus::Wired)
                            .with_external_id(id)
                    })
                    .collect()
            }
        }
        Err(e) => {
            log.error(ChannelError::from(e));
            let mut update = inner
                .backend()
                .new_status_update(&channel, msg.id, e.status());
            if let SendError::FailedWithReason { code, description } = e {
                update = update.with_error(code, description);
            }
            vec![update]
        }
    };

    for status in statuses {
        if let Err(e) = inner.backend().write_status_update(status).await {
            warn!(msg_id = msg.id, error = %e, "Failed to write status update");
        }
    }

    match &send_outcome {
        Ok(()) => info!(
            msg_id = msg.id,
            channel_uuid = %channel.uuid,
            parts = result.external_ids().len().max(1),
            log_uuid = %log.uuid(),
            "Message wired"
        ),
        Err(e) => info!(
            msg_id = msg.id,
            channel_uuid = %channel.uuid,
            error_code = e.code(),
            status = %e.status(),
            log_uuid = %log.uuid(),
            "Message send failed"
        ),
    }

    log.end();
    if let Err(e) = inner.backend().write_channel_log(log).await {
        warn!(msg_id = msg.id, error = %e, "Failed to write channel log");
    }

    release(inner, token, SendDisposition::Completed).await;
}

/// A message nothing can deliver: permanent config failure.
async fn write_unsendable(inner: &Inner, msg: &carrier_common::MsgOut, reason: &str) {
    warn!(
        msg_id = msg.id,
        channel_type = %msg.channel_type,
        reason,
        "Message is unsendable"
    );

    let mut log = ChannelLog::new(LogType::MsgSend, inner.ctx.config.secrets.clone());
    log.set_channel(msg.channel_uuid);
    log.error(ChannelError::config(reason));
    log.end();

    let status = carrier_common::StatusUpdate {
        channel_uuid: msg.channel_uuid,
        msg_id: Some(msg.id),
        external_id: None,
        status: MsgStatus::Failed,
        error_code: None,
        error_description: None,
    };
    if let Err(e) = inner.backend().write_status_update(status).await {
        warn!(msg_id = msg.id, error = %e, "Failed to write status update");
    }
    if let Err(e) = inner.backend().write_channel_log(log).await {
        warn!(msg_id = msg.id, error = %e, "Failed to write channel log");
    }
}

async fn release(inner: &Inner, token: carrier_backend::WorkerToken, disposition: SendDisposition) {
    if let Err(e) = inner.backend().mark_outgoing_complete(token, disposition).await {
        warn!(error = %e, "Failed to release worker token");
    }
}
