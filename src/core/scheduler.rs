//! Cron-driven priority scheduler with bounded concurrency.
//!
//! The scheduler owns a cron table and a blocking [`PriorityQueue`] of
//! [`Plan`]s. Once started, two long-lived tokio tasks cooperate:
//!
//! - the **fetch loop** pops the best plan and forwards it to the dispatch
//!   channel, holding exclusive plans back until nothing else is in flight and
//!   then waiting for them to finish before popping again;
//! - the **dispatch loop** admits forwarded plans into a pool of
//!   `max_concurrency` slots, each admitted plan running under its own
//!   [`Executor`].
//!
//! Plan failures are recorded on the plan's task and never stop the loops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

use super::cron::{CronTable, CronTimezone, EntryId};
use super::{Context, Error, Executor, ExecutorOptions, ExecutorStats, Plan};
use crate::builders::SchedulerBuilder;
use crate::config::SchedulerConfig;
use crate::infra::queue::PriorityQueue;

/// Counter of plans handed to the dispatch loop and not finished yet.
#[derive(Debug, Clone)]
struct InFlight {
    count: Arc<watch::Sender<usize>>,
}

impl InFlight {
    fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }

    fn add(&self) {
        self.count.send_modify(|n| *n += 1);
    }

    fn done(&self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }

    async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// An admitted plan: its executor and the context its runs derive from.
#[derive(Clone)]
struct Running {
    executor: Arc<Executor>,
    ctx: Context,
}

impl Running {
    /// Stop the current run and any retry still to come, including a run
    /// that was admitted but has not started yet.
    fn cancel(&self) {
        // Executor first so the task is `canceling` before its context fires.
        self.executor.cancel();
        self.ctx.cancel();
    }
}

struct Inner {
    max_concurrency: usize,
    default_options: ExecutorOptions,
    queue: Arc<PriorityQueue<Plan>>,
    cron: CronTable,
    cron_ids: RwLock<HashMap<String, EntryId>>,
    executing: RwLock<HashMap<String, Running>>,
    shutdown: Mutex<Option<Context>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    span: Span,
}

/// Task scheduling runtime.
///
/// Cheap to clone; clones share the same runtime.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("max_concurrency", &self.inner.max_concurrency)
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .field("cron", &self.inner.cron)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Build a scheduler from configuration.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] when the configuration does not validate.
    pub fn new(config: &SchedulerConfig) -> Result<Self, Error> {
        SchedulerBuilder::from_config(config)?.build()
    }

    /// Start building a scheduler.
    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub(crate) fn from_parts(
        max_concurrency: usize,
        timezone: CronTimezone,
        default_options: ExecutorOptions,
        span: Span,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_concurrency,
                default_options,
                queue: Arc::new(PriorityQueue::blocking()),
                cron: CronTable::new(timezone),
                cron_ids: RwLock::new(HashMap::new()),
                executing: RwLock::new(HashMap::new()),
                shutdown: Mutex::new(None),
                supervisor: Mutex::new(None),
                running: AtomicBool::new(false),
                span,
            }),
        }
    }

    /// Register plans.
    ///
    /// Scheduled plans get a cron entry that enqueues a copy of the plan on
    /// every firing, replacing any earlier entry for the same key. Unscheduled
    /// plans are enqueued immediately. Plans with an empty key are ignored.
    /// Every schedule is validated before anything is registered.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCron`] for the first unparsable schedule; no plan is
    /// registered in that case.
    pub fn add(&self, plans: impl IntoIterator<Item = Plan>) -> Result<(), Error> {
        let plans: Vec<Plan> = plans.into_iter().filter(|p| !p.key().is_empty()).collect();
        for plan in &plans {
            if let Some(expr) = &plan.schedule {
                super::cron::parse_schedule(expr)?;
            }
        }

        for plan in plans {
            let key = plan.key().to_owned();
            match plan.schedule.clone() {
                Some(expr) => {
                    let queue = Arc::clone(&self.inner.queue);
                    let fired = plan.clone();
                    let id = self.inner.cron.add(
                        &expr,
                        Arc::new(move || queue.push([fired.clone()])),
                    )?;
                    let previous = self.inner.cron_ids.write().insert(key.clone(), id);
                    if let Some(previous) = previous {
                        self.inner.cron.remove(previous);
                    }
                    self.inner
                        .span
                        .in_scope(|| debug!(plan = %key, schedule = %expr, "plan scheduled"));
                }
                None => {
                    self.inner.queue.push([plan]);
                    self.inner.span.in_scope(|| debug!(plan = %key, "plan queued"));
                }
            }
        }
        Ok(())
    }

    /// Unregister plans: drop their cron entries, cancel their runs (pending
    /// retries included) and take them out of the queue if still there.
    pub fn remove<'a>(&self, plans: impl IntoIterator<Item = &'a Plan>) {
        for plan in plans {
            let key = plan.key();
            let entry = self.inner.cron_ids.write().remove(key);
            if let Some(id) = entry {
                self.inner.cron.remove(id);
            }
            let running = self.inner.executing.read().get(key).cloned();
            match running {
                Some(running) => running.cancel(),
                None => {
                    plan.task.cancel();
                }
            }
            let dequeued = self.inner.queue.remove_key(key);
            self.inner
                .span
                .in_scope(|| debug!(plan = %key, dequeued, "plan removed"));
        }
    }

    /// Arm cron entries and launch the fetch and dispatch loops.
    ///
    /// The loops run until `ctx` is cancelled or [`Scheduler::stop`] is
    /// called. Starting a running scheduler only logs a warning. Must be called
    /// inside a tokio runtime.
    pub fn start(&self, ctx: &Context) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            self.inner
                .span
                .in_scope(|| warn!("scheduler already running, ignoring start"));
            return;
        }

        let shutdown = ctx.child();
        *self.inner.shutdown.lock() = Some(shutdown.clone());
        self.inner.cron.start();

        let (tx, rx) = mpsc::channel::<Plan>(1);
        let in_flight = InFlight::new();
        let span = self.inner.span.clone();
        let fetch = tokio::spawn(
            fetch_loop(Arc::clone(&self.inner), shutdown.clone(), tx, in_flight.clone())
                .instrument(span.clone()),
        );
        let dispatch = tokio::spawn(
            dispatch_loop(Arc::clone(&self.inner), shutdown, rx, in_flight)
                .instrument(span.clone()),
        );

        let inner = Arc::clone(&self.inner);
        let supervisor = tokio::spawn(
            async move {
                let _ = fetch.await;
                let _ = dispatch.await;
                inner.shutdown.lock().take();
                inner.running.store(false, Ordering::Release);
                info!("scheduler stopped");
            }
            .instrument(span),
        );
        *self.inner.supervisor.lock() = Some(supervisor);
        self.inner.span.in_scope(|| {
            info!(max_concurrency = self.inner.max_concurrency, "scheduler started");
        });
    }

    /// Cancel the loops; with `wait`, wait until both have terminated.
    pub async fn stop(&self, wait: bool) {
        let shutdown = self.inner.shutdown.lock().clone();
        if let Some(ctx) = shutdown {
            ctx.cancel();
        }
        if wait {
            let supervisor = self.inner.supervisor.lock().take();
            if let Some(handle) = supervisor {
                let _ = handle.await;
            }
        }
    }

    /// Stats of the executor running the plan with key `id`.
    #[must_use]
    pub fn stats(&self, id: &str) -> Option<ExecutorStats> {
        self.inner
            .executing
            .read()
            .get(id)
            .map(|running| running.executor.stats())
    }

    /// Cancel the executing plan with key `id`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no such plan is executing.
    pub fn cancel(&self, id: &str) -> Result<(), Error> {
        let running = self
            .inner
            .executing
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("plan `{id}` is not executing")))?;
        running.cancel();
        Ok(())
    }

    /// Whether the loops are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Keys of plans currently executing.
    #[must_use]
    pub fn executing(&self) -> Vec<String> {
        self.inner.executing.read().keys().cloned().collect()
    }

    /// Number of plans waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Number of registered cron entries.
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.inner.cron_ids.read().len()
    }

    /// Configured concurrency bound.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }
}

/// Hand `plan` to the dispatch loop. Returns `false` on shutdown.
async fn forward(
    tx: &mpsc::Sender<Plan>,
    plan: Plan,
    shutdown: &Context,
    in_flight: &InFlight,
) -> bool {
    in_flight.add();
    let sent = tokio::select! {
        () = shutdown.done() => false,
        res = tx.send(plan) => res.is_ok(),
    };
    if !sent {
        in_flight.done();
    }
    sent
}

/// Wait until nothing is in flight. Returns `false` on shutdown.
async fn barrier(in_flight: &InFlight, shutdown: &Context) -> bool {
    tokio::select! {
        () = shutdown.done() => false,
        () = in_flight.wait_idle() => true,
    }
}

async fn fetch_loop(
    inner: Arc<Inner>,
    shutdown: Context,
    tx: mpsc::Sender<Plan>,
    in_flight: InFlight,
) {
    loop {
        let plan = tokio::select! {
            () = shutdown.done() => break,
            popped = inner.queue.pop() => match popped {
                Ok(plan) => plan,
                Err(err) => {
                    warn!(error = %err, "pop failed, stopping fetch loop");
                    break;
                }
            },
        };

        if plan.exclusive {
            debug!(plan = %plan.key(), "exclusive plan waiting for in-flight plans");
            if !barrier(&in_flight, &shutdown).await
                || !forward(&tx, plan, &shutdown, &in_flight).await
                || !barrier(&in_flight, &shutdown).await
            {
                break;
            }
        } else if !forward(&tx, plan, &shutdown, &in_flight).await {
            break;
        }
    }

    drop(tx);
    inner.queue.reset();
    debug!("fetch loop exited");
}

async fn dispatch_loop(
    inner: Arc<Inner>,
    shutdown: Context,
    mut rx: mpsc::Receiver<Plan>,
    in_flight: InFlight,
) {
    let slots = Arc::new(Semaphore::new(inner.max_concurrency));
    loop {
        let permit = tokio::select! {
            () = shutdown.done() => break,
            permit = Arc::clone(&slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let plan = tokio::select! {
            () = shutdown.done() => break,
            plan = rx.recv() => match plan {
                Some(plan) => plan,
                None => break,
            },
        };
        admit(&inner, plan, permit, in_flight.clone());
    }

    rx.close();
    inner.cron_ids.write().clear();
    inner.cron.clear();
    inner.cron.stop();
    let executing: Vec<Running> = inner.executing.read().values().cloned().collect();
    for running in executing {
        running.cancel();
    }
    debug!("dispatch loop exited");
}

fn admit(inner: &Arc<Inner>, plan: Plan, permit: OwnedSemaphorePermit, in_flight: InFlight) {
    let key = plan.key().to_owned();
    let options = plan
        .options
        .clone()
        .unwrap_or_else(|| inner.default_options.clone());
    let running = Running {
        executor: Arc::new(Executor::new(plan.task.clone(), options)),
        ctx: plan.context.child(),
    };

    {
        let mut executing = inner.executing.write();
        if executing.contains_key(&key) {
            drop(executing);
            debug!(plan = %key, "plan already executing, skipping run");
            in_flight.done();
            return;
        }
        executing.insert(key.clone(), running.clone());
    }

    let inner = Arc::clone(inner);
    tokio::spawn(
        async move {
            debug!(plan = %key, "plan admitted");
            match running.executor.start(&running.ctx).await {
                Ok(()) => debug!(plan = %key, "plan succeeded"),
                Err(err) => debug!(plan = %key, error = %err, "plan finished with error"),
            }
            inner.executing.write().remove(&key);
            running.ctx.cancel();
            drop(permit);
            in_flight.done();
        }
        .in_current_span(),
    );
}
