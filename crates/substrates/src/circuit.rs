//! Circuits: single-writer execution engines.
//!
//! A circuit owns one dedicated worker and two queues. External emissions
//! enter the multi-producer ingress queue; emissions made from the worker
//! itself enter the worker-local transit queue, which is always drained
//! before the next ingress item. That priority gives cascades depth-first
//! delivery and makes any recursive chain started by one external emission
//! atomic with respect to later external emitters.

use crate::cell::Cell;
use crate::clock::Clock;
use crate::conduit::{ChannelCore, Composer, Conduit, Wiring};
use crate::flow::Flow;
use crate::name::Name;
use crate::pipe::Pipe;
use crate::source::{Source, Subscriber, Subscription};
use crate::state::State;
use crate::subject::{Resource, Subject, Substrate};
use crate::types::{SubjectType, SubstratesError, SubstratesResult};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};

/// A unit of work executed on the circuit worker.
pub(crate) type Job = Box<dyn FnOnce() + Send>;

enum Task {
    Run(Job),
    Stop,
}

/// Lifecycle phases a circuit reports to its state subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    Started,
    Closed,
}

/// State shared with the worker thread. Pipes and conduits reference the
/// circuit through `CircuitCore`; the worker holds only this part, so
/// dropping the last handle closes the ingress queue and stops the worker.
struct CircuitShared {
    transit: Mutex<VecDeque<Job>>,
    closed: AtomicBool,
    worker: OnceCell<thread::ThreadId>,
}

pub(crate) struct CircuitCore {
    subject: Subject,
    shared: Arc<CircuitShared>,
    ingress: mpsc::UnboundedSender<Task>,
    resources: Mutex<Vec<Box<dyn Resource>>>,
    state_wiring: Arc<Wiring<State>>,
    state_channel: Arc<ChannelCore<State>>,
}

impl CircuitCore {
    /// Queues a job for the worker. Jobs scheduled from the worker itself go
    /// to the transit queue and run before any further ingress work. Returns
    /// false when the circuit is closed and the job was dropped.
    pub(crate) fn schedule(&self, job: Job) -> bool {
        if self.shared.closed.load(Ordering::Acquire) {
            return false;
        }
        if self.on_worker() {
            self.shared.transit.lock().push_back(job);
            true
        } else {
            self.ingress.send(Task::Run(job)).is_ok()
        }
    }

    pub(crate) fn on_worker(&self) -> bool {
        self.shared
            .worker
            .get()
            .map_or(false, |id| *id == thread::current().id())
    }

    /// Ties a resource's close to the circuit's close. Resources created
    /// against an already-closed circuit are closed on the spot.
    fn register(&self, resource: Box<dyn Resource>) {
        let mut resources = self.resources.lock();
        if self.shared.closed.load(Ordering::Acquire) {
            drop(resources);
            resource.close();
        } else {
            resources.push(resource);
        }
    }
}

/// Computational network of conduits, cells, clocks, channels and pipes,
/// executed by a single dedicated worker.
#[derive(Clone)]
pub struct Circuit {
    core: Arc<CircuitCore>,
}

impl Circuit {
    pub(crate) fn new(name: Name) -> Self {
        let subject = Subject::new(name, SubjectType::Circuit);
        let shared = Arc::new(CircuitShared {
            transit: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            worker: OnceCell::new(),
        });
        let (ingress, receiver) = mpsc::unbounded_channel();
        let worker_shared = shared.clone();
        let spawned = thread::Builder::new()
            .name(subject.name().path().to_string())
            .spawn(move || worker(worker_shared, receiver));
        if let Err(error) = spawned {
            tracing::error!(circuit = %subject.path(), %error, "failed to spawn circuit worker");
            shared.closed.store(true, Ordering::Release);
        }
        let state_wiring = Arc::new(Wiring::new(None));
        let state_channel = Arc::new(ChannelCore::new(
            Subject::with_enclosure(
                Name::intern_static("state"),
                SubjectType::Channel,
                subject.clone(),
            ),
            state_wiring.clone(),
            Vec::new(),
        ));
        Self {
            core: Arc::new(CircuitCore {
                subject,
                shared,
                ingress,
                resources: Mutex::new(Vec::new()),
                state_wiring,
                state_channel,
            }),
        }
    }

    /// Returns a conduit that composes percepts around this circuit's
    /// channels.
    pub fn conduit<P, E, C>(&self, composer: C) -> Conduit<P, E>
    where
        P: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        C: Composer<P, E> + 'static,
    {
        self.conduit_named(Name::intern_static("conduit"), composer)
    }

    /// Returns a named conduit.
    pub fn conduit_named<P, E, C>(&self, name: Name, composer: C) -> Conduit<P, E>
    where
        P: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        C: Composer<P, E> + 'static,
    {
        self.assemble_conduit(name, composer, None)
    }

    /// Returns a named conduit whose channels share a flow pipeline. The
    /// configurer runs once; operator state is shared across every channel
    /// of the conduit.
    pub fn conduit_configured<P, E, C, F>(
        &self,
        name: Name,
        composer: C,
        configure: F,
    ) -> Conduit<P, E>
    where
        P: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        C: Composer<P, E> + 'static,
        F: FnOnce(&mut Flow<E>),
    {
        let mut flow = Flow::new();
        configure(&mut flow);
        self.assemble_conduit(name, composer, Some(flow.into_pipeline()))
    }

    fn assemble_conduit<P, E, C>(
        &self,
        name: Name,
        composer: C,
        pipeline: Option<crate::flow::FlowPipeline<E>>,
    ) -> Conduit<P, E>
    where
        P: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        C: Composer<P, E> + 'static,
    {
        let subject =
            Subject::with_enclosure(name, SubjectType::Conduit, self.core.subject.clone());
        let conduit = Conduit::assemble(
            subject,
            Arc::downgrade(&self.core),
            Box::new(composer),
            pipeline,
        );
        self.core.register(Box::new(conduit.clone()));
        conduit
    }

    /// Wraps a pipe so that every emission is scheduled onto this circuit.
    /// This is the stack-safe boundary: a pipe may target itself and the
    /// cycle runs through the transit queue instead of the call stack.
    pub fn pipe<E>(&self, target: Pipe<E>) -> Pipe<E>
    where
        E: Clone + Send + Sync + 'static,
    {
        let subject = Subject::with_enclosure(
            Name::intern_static("pipe"),
            SubjectType::Pipe,
            self.core.subject.clone(),
        );
        Pipe::queue(subject, Arc::downgrade(&self.core), target)
    }

    /// As [`pipe`](Self::pipe), with a flow pipeline local to this pipe
    /// installed in front of the target.
    pub fn pipe_configured<E, F>(&self, target: Pipe<E>, configure: F) -> Pipe<E>
    where
        E: Clone + Send + Sync + 'static,
        F: FnOnce(&mut Flow<E>),
    {
        let mut flow = Flow::new();
        configure(&mut flow);
        let subject = Subject::with_enclosure(
            Name::intern_static("pipe.flow"),
            SubjectType::Pipe,
            self.core.subject.clone(),
        );
        let flowed = Pipe::flowed(subject, flow.into_pipeline(), target);
        self.pipe(flowed)
    }

    /// Returns a hierarchical cell executing on this circuit.
    pub fn cell<I, O, CI, CE>(
        &self,
        name: Name,
        ingress: CI,
        egress: CE,
    ) -> SubstratesResult<Cell<I, O>>
    where
        I: Clone + Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
        CI: Composer<Pipe<I>, O>,
        CE: Composer<Pipe<O>, O>,
    {
        let subject = Subject::with_enclosure(name, SubjectType::Cell, self.core.subject.clone());
        let cell = Cell::assemble(Arc::downgrade(&self.core), subject, &ingress, &egress, None)?;
        self.core.register(Box::new(cell.clone()));
        Ok(cell)
    }

    /// Returns a clock that uses this circuit to emit cycle events.
    pub fn clock(&self) -> Clock {
        self.clock_named(Name::intern_static("clock"))
    }

    pub fn clock_named(&self, name: Name) -> Clock {
        let subject = Subject::with_enclosure(name, SubjectType::Clock, self.core.subject.clone());
        let clock = Clock::start(subject, Arc::downgrade(&self.core));
        self.core.register(Box::new(clock.clone()));
        clock
    }

    /// Subscribes to circuit lifecycle state emissions.
    pub fn subscribe(
        &self,
        subscriber: Arc<dyn Subscriber<State>>,
    ) -> SubstratesResult<Subscription> {
        let subject = Subject::with_enclosure(
            Name::intern_static("subscription"),
            SubjectType::Subscription,
            self.core.subject.clone(),
        );
        Ok(self.core.state_wiring.subscribe(subject, subscriber))
    }

    /// Blocks until both queues have drained. Must be called from a thread
    /// other than this circuit's worker; completes promptly once the circuit
    /// is closed.
    pub fn await_empty(&self) -> SubstratesResult<()> {
        if self.core.on_worker() {
            return Err(SubstratesError::InvalidOperation(
                "cannot await from circuit thread".to_string(),
            ));
        }
        if self.core.shared.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let (ack, drained) = oneshot::channel::<()>();
        let sentinel = Task::Run(Box::new(move || {
            let _ = ack.send(());
        }));
        if self.core.ingress.send(sentinel).is_err() {
            return Ok(());
        }
        // An error here means the worker stopped before running the
        // sentinel, which only happens after close.
        let _ = drained.blocking_recv();
        Ok(())
    }

    /// Closes the circuit. Idempotent and safe to call concurrently; pending
    /// work is drained best-effort without blocking the caller. Emissions
    /// after close are dropped silently.
    pub fn close(&self) {
        if self.core.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // The closed flag already refuses new work, so the lifecycle
        // notification is enqueued directly ahead of the stop marker.
        let channel = self.core.state_channel.clone();
        let state = self.core.subject.state().with_enum(&CircuitPhase::Closed);
        let _ = self
            .core
            .ingress
            .send(Task::Run(Box::new(move || channel.deliver(state))));
        let resources = std::mem::take(&mut *self.core.resources.lock());
        for resource in resources.iter().rev() {
            resource.close();
        }
        let _ = self.core.ingress.send(Task::Stop);
        tracing::debug!(circuit = %self.core.subject.path(), "circuit closed");
    }

    pub fn is_closed(&self) -> bool {
        self.core.shared.closed.load(Ordering::Acquire)
    }

    pub fn subject(&self) -> &Subject {
        &self.core.subject
    }
}

impl Substrate for Circuit {
    fn subject(&self) -> &Subject {
        &self.core.subject
    }
}

impl Resource for Circuit {
    fn close(&self) {
        Circuit::close(self);
    }
}

impl Source<State> for Circuit {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<State>>) -> SubstratesResult<Subscription> {
        Circuit::subscribe(self, subscriber)
    }
}

impl fmt::Debug for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Circuit")
            .field("subject", &self.core.subject)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The worker loop. Transit work always runs ahead of the next ingress item;
/// the queues drain together exactly when the sentinel posted by
/// `await_empty` executes.
fn worker(shared: Arc<CircuitShared>, mut ingress: mpsc::UnboundedReceiver<Task>) {
    let _ = shared.worker.set(thread::current().id());
    loop {
        let job = shared.transit.lock().pop_front();
        if let Some(job) = job {
            job();
            continue;
        }
        match ingress.blocking_recv() {
            Some(Task::Run(job)) => job(),
            Some(Task::Stop) | None => break,
        }
    }
    // Cascades spawned by the final jobs still get their turn.
    loop {
        let job = shared.transit.lock().pop_front();
        match job {
            Some(job) => job(),
            None => break,
        }
    }
}
