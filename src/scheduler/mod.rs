//! Priority-aware asynchronous request scheduling.
//!
//! Admitted event dispatches are queued on a max-heap keyed by computed
//! priority and drained by a worker pool. Workers select destinations via
//! the tenant's regex rules, invoke the forwarder, and feed latency and
//! outcome back into the observer and the QoS manager.

mod priority;

pub use priority::{
    is_fast_user, is_high_priority, is_spam, message_priority, BehaviorPriorityStrategy,
    PriorityContext, PriorityStrategy,
};

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use tracing::{debug, error, info, warn};

use crate::bootstrap::Shutdown;
use crate::config::Config;
use crate::forward::Forwarder;
use crate::handler::payload;
use crate::load::LoadCounter;
use crate::observer::LatencyObserver;
use crate::qos::QoSManager;
use crate::stats::StatsAnalyzer;
use crate::tenant::TenantRoute;

/// One queued event dispatch, owned by the queue and then by one worker.
#[derive(Debug)]
pub struct ScheduledRequest {
    /// Raw event body
    pub body: Bytes,
    /// Original request headers, forwarded verbatim
    pub headers: HeaderMap,
    /// Tenant snapshot the request arrived for
    pub tenant: Arc<TenantRoute>,
    /// Extracted user id
    pub user_id: String,
    /// Extracted message text
    pub message: String,
    /// Computed priority
    pub priority: i32,
    /// Submission time
    pub enqueued_at: Instant,
    /// Monotonic sequence for a total order among equal priorities
    seq: u64,
}

impl PartialEq for ScheduledRequest {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for ScheduledRequest {}

impl PartialOrd for ScheduledRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap by priority; earlier submissions first among equals
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority scheduler with a fixed worker pool.
pub struct Scheduler {
    queue: Mutex<BinaryHeap<ScheduledRequest>>,
    seq: AtomicU64,
    last_request: Mutex<HashMap<String, Instant>>,
    config: RwLock<Arc<Config>>,
    strategy: Box<dyn PriorityStrategy>,

    stats: Arc<StatsAnalyzer>,
    load: Arc<LoadCounter>,
    observer: Arc<LatencyObserver>,
    qos: Arc<QoSManager>,
    forwarder: Arc<Forwarder>,
}

impl Scheduler {
    /// Create a new scheduler with the default behavior priority strategy.
    pub fn new(
        config: Arc<Config>,
        stats: Arc<StatsAnalyzer>,
        load: Arc<LoadCounter>,
        observer: Arc<LatencyObserver>,
        qos: Arc<QoSManager>,
        forwarder: Arc<Forwarder>,
    ) -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            last_request: Mutex::new(HashMap::new()),
            config: RwLock::new(config),
            strategy: Box::new(BehaviorPriorityStrategy),
            stats,
            load,
            observer,
            qos,
            forwarder,
        }
    }

    /// Submit a request for asynchronous processing.
    ///
    /// Extracts user and message, computes the priority, and enqueues.
    /// Returns false when the queue is at capacity; the request is dropped.
    pub fn submit(&self, body: Bytes, headers: HeaderMap, tenant: Arc<TenantRoute>) -> bool {
        let config = self.config.read().unwrap().clone();
        let (user_id, message) = payload::extract(&body);

        // Per-user inter-arrival tracking feeds both the burst penalty and
        // the baseline statistics
        let since_last = if config.scheduler.user_behavior.enabled {
            let now = Instant::now();
            let mut last = self.last_request.lock().unwrap();
            last.insert(user_id.clone(), now).map(|prev| now - prev)
        } else {
            None
        };

        if let Some(delta) = since_last {
            self.stats.record_interval(delta);
        }

        let ctx = PriorityContext {
            current_load: self.load.get(),
            baseline_p50: self.stats.p50(),
            since_last,
            config: &config,
        };
        let priority = self.strategy.priority(&user_id, &message, &ctx);

        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= config.scheduler.max_queue_size {
            warn!(
                user_id = %user_id,
                queue_size = queue.len(),
                "scheduler queue full, rejecting request"
            );
            metrics::counter!("botrouterd.scheduler.rejected").increment(1);
            return false;
        }

        queue.push(ScheduledRequest {
            body,
            headers,
            tenant,
            user_id,
            message,
            priority,
            enqueued_at: Instant::now(),
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
        });
        metrics::counter!("botrouterd.scheduler.submitted").increment(1);

        true
    }

    /// Current queue depth.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Pop the highest-priority request, if any.
    fn pop(&self) -> Option<ScheduledRequest> {
        self.queue.lock().unwrap().pop()
    }

    /// Run the worker pool until shutdown; returns when all workers drained.
    pub async fn run(self: Arc<Self>, shutdown: Arc<Shutdown>) {
        let configured = self.config.read().unwrap().scheduler.worker_pool_size;
        let workers = if configured == 0 {
            num_cpus::get()
        } else {
            configured
        };

        info!(workers, "scheduler worker pool started");

        let handles: Vec<_> = (0..workers)
            .map(|id| tokio::spawn(self.clone().worker(id, shutdown.clone())))
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler worker terminated abnormally");
            }
        }

        info!("scheduler worker pool stopped");
    }

    /// One worker: dequeue, process, repeat. Exits once shutdown is
    /// signaled; the in-flight request finishes first (its forwards are
    /// unblocked by the same signal).
    async fn worker(self: Arc<Self>, id: usize, shutdown: Arc<Shutdown>) {
        debug!(worker = id, "scheduler worker started");

        loop {
            if shutdown.is_signaled() {
                break;
            }

            match self.pop() {
                Some(request) => {
                    // A fault on one request must not kill the worker
                    let task = tokio::spawn(self.clone().process(request));
                    if let Err(e) = task.await {
                        error!(worker = id, error = %e, "request processing panicked");
                        metrics::counter!("botrouterd.scheduler.worker_faults").increment(1);
                    }
                }
                None => {
                    let idle = self
                        .config
                        .read()
                        .unwrap()
                        .qos
                        .timeouts
                        .idle_check_interval;
                    tokio::select! {
                        _ = tokio::time::sleep(idle) => {}
                        _ = shutdown.wait() => {}
                    }
                }
            }
        }

        debug!(worker = id, "scheduler worker stopped");
    }

    /// Process one dequeued request: select destinations, forward, report.
    async fn process(self: Arc<Self>, request: ScheduledRequest) {
        let config = self.config.read().unwrap().clone();
        let start = Instant::now();

        let destinations = request.tenant.select_destinations(&request.message);
        let results = self
            .forwarder
            .forward_many(
                destinations,
                request.body.clone(),
                request.headers.clone(),
                config.qos.timeouts.processing_timeout,
                config.qos.timeouts.forward_timeout,
            )
            .await;

        let success = results.iter().any(|result| result.success);
        let latency = start.elapsed();

        self.observer.record_latency(latency);
        self.qos.update_metrics(latency, success);

        if success {
            debug!(
                user_id = %request.user_id,
                priority = request.priority,
                destinations = results.len(),
                latency_ms = latency.as_millis() as u64,
                "request processed"
            );
        } else {
            warn!(
                user_id = %request.user_id,
                priority = request.priority,
                destinations = results.len(),
                "all forwards failed"
            );
        }
    }

    /// Apply a new configuration.
    pub fn update_config(&self, new: Arc<Config>) {
        let old = self.config.read().unwrap().clone();

        if old.scheduler.worker_pool_size != new.scheduler.worker_pool_size {
            warn!(
                old = old.scheduler.worker_pool_size,
                new = new.scheduler.worker_pool_size,
                "worker pool size changed; the pool is not resized until restart"
            );
        }

        if old.scheduler.user_behavior != new.scheduler.user_behavior {
            self.last_request.lock().unwrap().clear();
            info!("user behavior parameters changed, per-user history cleared");
        }

        *self.config.write().unwrap() = new;
    }
}
