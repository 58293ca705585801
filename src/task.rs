//! Cancelable background runs.
//!
//! A [`TaskRunner`] owns the start/progress/complete/cancel lifecycle and nothing
//! else; the domain logic lives in a [`Work`] strategy. Events travel back to the
//! caller over a channel, so the caller consumes them on its own task and never
//! concurrently with itself.

use crate::CrawlerError;
use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// The stage specific part of a run.
#[async_trait::async_trait]
pub trait Work: Send + Sync + 'static {
    type Progress: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &str;

    async fn run(&self, ctx: &TaskContext<Self::Progress>) -> Result<Self::Output, CrawlerError>;
}

/// Handed to [`Work::run`]: progress reporting and the cooperative cancel flag.
pub struct TaskContext<P> {
    cancelled: Arc<AtomicBool>,
    report: Box<dyn Fn(P) + Send + Sync>,
}

impl<P> TaskContext<P> {
    pub fn report(&self, progress: P) {
        (self.report)(progress)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Fired once before any work is done. The run waits until the gate is answered
/// or dropped; dropping it lets the run proceed.
#[derive(Debug)]
pub struct StartGate {
    tx: oneshot::Sender<bool>,
}

impl StartGate {
    pub fn proceed(self) {
        let _ = self.tx.send(true);
    }

    /// Ends the run before its first unit of work.
    pub fn cancel(self) {
        let _ = self.tx.send(false);
    }
}

#[derive(Debug)]
pub enum Outcome<R> {
    Finished(R),
    /// Cancellation was observed. Holds the partial result unless the run was
    /// cancelled before it started working.
    Cancelled(Option<R>),
    Failed(CrawlerError),
}

#[derive(Debug)]
pub enum TaskEvent<P, R> {
    Started(StartGate),
    Progress(P),
    Completed(Outcome<R>),
}

/// Callback style consumer for [`TaskHandle::observe`].
///
/// Returning `ControlFlow::Break` from any hook requests cancellation.
pub trait TaskObserver<P, R> {
    fn on_started(&mut self) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn on_progress(&mut self, _progress: &P) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn on_completed(&mut self, outcome: &Outcome<R>);
}

/// Runs one [`Work`] at a time.
pub struct TaskRunner<W: Work> {
    work: Arc<W>,
    active: Arc<AtomicBool>,
    /// Cancel flag of the latest run. Every run gets its own.
    cancelled: Mutex<Arc<AtomicBool>>,
}

impl<W: Work> TaskRunner<W> {
    pub fn new(work: W) -> Self {
        TaskRunner {
            work: Arc::new(work),
            active: Arc::new(AtomicBool::new(false)),
            cancelled: Mutex::new(Arc::new(AtomicBool::new(false))),
        }
    }

    fn current_run(&self) -> MutexGuard<'_, Arc<AtomicBool>> {
        self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn work(&self) -> &W {
        &self.work
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Requests cooperative cancellation of the active run.
    pub fn cancel(&self) {
        if self.is_active() {
            info!("Cancel requested for {}", self.work.name());
            self.current_run().store(true, Ordering::SeqCst);
        }
    }

    /// Spawns a run on the tokio runtime. Fails with [`CrawlerError::AlreadyRunning`]
    /// while a previous run has not completed.
    pub fn start(&self) -> Result<TaskHandle<W::Progress, W::Output>, CrawlerError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(CrawlerError::AlreadyRunning);
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        *self.current_run() = Arc::clone(&cancelled);

        let (tx, rx) = mpsc::unbounded_channel();
        let work = Arc::clone(&self.work);
        let active = Arc::clone(&self.active);

        tokio::spawn(drive(work, tx, active, Arc::clone(&cancelled)));

        Ok(TaskHandle {
            events: rx,
            cancelled,
        })
    }
}

async fn drive<W: Work>(
    work: Arc<W>,
    tx: mpsc::UnboundedSender<TaskEvent<W::Progress, W::Output>>,
    active: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
) {
    let name = work.name().to_string();

    let (gate_tx, gate_rx) = oneshot::channel();
    let _ = tx.send(TaskEvent::Started(StartGate { tx: gate_tx }));
    let admitted = !matches!(gate_rx.await, Ok(false));

    let outcome = if !admitted || cancelled.load(Ordering::SeqCst) {
        info!("{} cancelled before start", name);
        Outcome::Cancelled(None)
    } else {
        debug!("{} started", name);
        let progress_tx = tx.clone();
        let ctx = TaskContext {
            cancelled: Arc::clone(&cancelled),
            report: Box::new(move |p: W::Progress| {
                let _ = progress_tx.send(TaskEvent::Progress(p));
            }),
        };

        // Run inside its own task so a panic surfaces as a JoinError instead of
        // leaving the runner marked active.
        let joined = tokio::spawn(async move {
            let result = work.run(&ctx).await;
            (result, ctx.is_cancelled())
        })
        .await;

        match joined {
            Ok((Ok(output), true)) => {
                info!("{} cancelled", name);
                Outcome::Cancelled(Some(output))
            }
            Ok((Ok(output), false)) => {
                info!("{} finished", name);
                Outcome::Finished(output)
            }
            Ok((Err(e), _)) => {
                error!("{} failed: {}", name, e);
                Outcome::Failed(e)
            }
            Err(e) => {
                error!("{} aborted: {}", name, e);
                Outcome::Failed(CrawlerError::Aborted(e.to_string()))
            }
        }
    };

    active.store(false, Ordering::SeqCst);
    let _ = tx.send(TaskEvent::Completed(outcome));
}

/// Requests cancellation of one run from anywhere, e.g. a signal handler. It has no
/// effect on later runs of the same runner.
#[derive(Debug, Clone)]
pub struct Canceller(Arc<AtomicBool>);

impl Canceller {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// The caller's end of a run.
pub struct TaskHandle<P, R> {
    events: mpsc::UnboundedReceiver<TaskEvent<P, R>>,
    cancelled: Arc<AtomicBool>,
}

impl<P, R> TaskHandle<P, R> {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn canceller(&self) -> Canceller {
        Canceller(Arc::clone(&self.cancelled))
    }

    /// The next lifecycle event; `None` after `Completed` has been delivered.
    pub async fn next_event(&mut self) -> Option<TaskEvent<P, R>> {
        self.events.recv().await
    }

    /// Lets the run proceed past `Started` and waits for its outcome, discarding
    /// progress.
    pub async fn wait(mut self) -> Outcome<R> {
        while let Some(event) = self.next_event().await {
            match event {
                TaskEvent::Started(gate) => gate.proceed(),
                TaskEvent::Progress(_) => {}
                TaskEvent::Completed(outcome) => return outcome,
            }
        }
        Outcome::Failed(CrawlerError::Aborted("run ended without completion".into()))
    }

    /// Delivers every event to `observer` on the calling task and returns the outcome.
    pub async fn observe<O: TaskObserver<P, R>>(mut self, observer: &mut O) -> Outcome<R> {
        while let Some(event) = self.next_event().await {
            match event {
                TaskEvent::Started(gate) => match observer.on_started() {
                    ControlFlow::Continue(()) => gate.proceed(),
                    ControlFlow::Break(()) => gate.cancel(),
                },
                TaskEvent::Progress(p) => {
                    if observer.on_progress(&p).is_break() {
                        self.cancel();
                    }
                }
                TaskEvent::Completed(outcome) => {
                    observer.on_completed(&outcome);
                    return outcome;
                }
            }
        }
        Outcome::Failed(CrawlerError::Aborted("run ended without completion".into()))
    }
}
