//! Conduits and channels: named routing from percepts to subscriber pipes.
//!
//! A conduit pools one channel per name and hands each channel to its
//! composer exactly once to build the percept callers see. The subscriber
//! set lives on the conduit; each channel lazily rebuilds its installed pipe
//! list the first time it delivers after the subscriber set changed.

use crate::circuit::CircuitCore;
use crate::flow::FlowPipeline;
use crate::name::Name;
use crate::pipe::Pipe;
use crate::source::{Registrar, Source, Subscriber, Subscription};
use crate::subject::{Resource, Subject, Substrate};
use crate::types::{Id, SubjectType, SubstratesError, SubstratesResult};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Forms a percept around a channel. The channel reference is valid only for
/// the duration of the call; implementations retain the pipe it yields, not
/// the channel itself.
pub trait Composer<P, E>: Send + Sync {
    fn compose(&self, channel: &Channel<E>) -> SubstratesResult<P>;
}

/// Function-backed composer, for percepts built from a closure.
pub struct FnComposer<F> {
    compose: F,
}

impl<F> FnComposer<F> {
    pub fn new(compose: F) -> Self {
        Self { compose }
    }
}

impl<P, E, F> Composer<P, E> for FnComposer<F>
where
    F: Fn(&Channel<E>) -> SubstratesResult<P> + Send + Sync,
{
    fn compose(&self, channel: &Channel<E>) -> SubstratesResult<P> {
        (self.compose)(channel)
    }
}

impl<F> fmt::Debug for FnComposer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnComposer").finish()
    }
}

/// Composer whose percept is simply the channel's emitting pipe.
#[derive(Debug, Default)]
pub struct PipeComposer;

impl<E> Composer<Pipe<E>, E> for PipeComposer
where
    E: Clone + Send + Sync + 'static,
{
    fn compose(&self, channel: &Channel<E>) -> SubstratesResult<Pipe<E>> {
        Ok(channel.pipe())
    }
}

/// Subscription topology shared by all channels of one conduit: the
/// subscriber set, the version counter bumped on every mutation, and the
/// optional conduit-scoped flow pipeline.
pub(crate) struct Wiring<E> {
    subscribers: RwLock<Vec<SubscriberEntry<E>>>,
    version: AtomicU64,
    flow: Option<Mutex<FlowPipeline<E>>>,
}

struct SubscriberEntry<E> {
    id: Id,
    subscriber: Arc<dyn Subscriber<E>>,
}

impl<E: Clone + Send + Sync + 'static> Wiring<E> {
    pub(crate) fn new(flow: Option<FlowPipeline<E>>) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            // Channels cache version 0 as "never built", so the counter
            // starts at 1 to force the first rebuild.
            version: AtomicU64::new(1),
            flow: flow.map(Mutex::new),
        }
    }

    pub(crate) fn subscribe(
        self: &Arc<Self>,
        subject: Subject,
        subscriber: Arc<dyn Subscriber<E>>,
    ) -> Subscription {
        let id = Id::new();
        self.subscribers
            .write()
            .push(SubscriberEntry { id, subscriber });
        self.version.fetch_add(1, Ordering::AcqRel);
        let wiring = Arc::downgrade(self);
        Subscription::new(
            subject,
            Box::new(move || {
                if let Some(wiring) = wiring.upgrade() {
                    wiring.subscribers.write().retain(|entry| entry.id != id);
                    wiring.version.fetch_add(1, Ordering::AcqRel);
                }
            }),
        )
    }

    pub(crate) fn clear(&self) {
        self.subscribers.write().clear();
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}

/// Per-name routing node. Owns the currently installed pipe list, annotated
/// with the wiring version it was built at.
pub(crate) struct ChannelCore<E> {
    subject: Subject,
    wiring: Arc<Wiring<E>>,
    /// Pipes installed for the channel's lifetime, surviving rebuilds. Used
    /// for cell uplinks.
    fixed: Vec<Pipe<E>>,
    installed: Mutex<Installed<E>>,
}

struct Installed<E> {
    version: u64,
    pipes: Vec<Pipe<E>>,
}

impl<E> ChannelCore<E> {
    pub(crate) fn new(subject: Subject, wiring: Arc<Wiring<E>>, fixed: Vec<Pipe<E>>) -> Self {
        Self {
            subject,
            wiring,
            fixed,
            installed: Mutex::new(Installed {
                version: 0,
                pipes: Vec::new(),
            }),
        }
    }

    pub(crate) fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl<E: Clone + Send + Sync + 'static> ChannelCore<E> {
    /// Runs on the circuit worker. Rebuilds the pipe list if the wiring
    /// changed since the last delivery, applies the conduit flow, then fans
    /// the emission out in registration order. A failing pipe is surfaced
    /// and does not stop later pipes.
    pub(crate) fn deliver(&self, emission: E) {
        let version = self.wiring.version.load(Ordering::Acquire);
        let mut installed = self.installed.lock();
        if installed.version != version {
            // Snapshot the set so a callback that mutates subscriptions
            // cannot deadlock against the rebuild.
            let subscribers: Vec<Arc<dyn Subscriber<E>>> = self
                .wiring
                .subscribers
                .read()
                .iter()
                .map(|entry| entry.subscriber.clone())
                .collect();
            let mut pipes = Vec::new();
            for subscriber in subscribers {
                let mut registered = Vec::new();
                let mut registrar = Registrar::new(&mut registered);
                match subscriber.accept(&self.subject, &mut registrar) {
                    Ok(()) => pipes.extend(registered),
                    Err(error) => tracing::error!(
                        channel = %self.subject.path(),
                        %error,
                        "subscriber failed during channel rebuild"
                    ),
                }
            }
            installed.pipes = pipes;
            installed.version = version;
        }
        let emission = match &self.wiring.flow {
            Some(pipeline) => match pipeline.lock().apply(emission) {
                Some(value) => value,
                None => return,
            },
            None => emission,
        };
        for pipe in installed.pipes.iter().chain(self.fixed.iter()) {
            if let Err(error) = pipe.emit(emission.clone()) {
                tracing::error!(
                    channel = %self.subject.path(),
                    %error,
                    "pipe failed during emission"
                );
            }
        }
    }
}

/// A named port into a conduit. Only valid inside the composer callback that
/// receives it; retain the pipe, never the channel.
pub struct Channel<E> {
    core: Arc<ChannelCore<E>>,
    circuit: Weak<CircuitCore>,
}

impl<E: Clone + Send + Sync + 'static> Channel<E> {
    pub(crate) fn new(core: Arc<ChannelCore<E>>, circuit: Weak<CircuitCore>) -> Self {
        Self { core, circuit }
    }

    pub fn subject(&self) -> &Subject {
        self.core.subject()
    }

    /// Returns the pipe that emits through this channel. Emissions cross the
    /// owning circuit's queues, so delivery happens on the circuit worker.
    pub fn pipe(&self) -> Pipe<E> {
        let subject = Subject::with_enclosure(
            Name::intern_static("pipe"),
            SubjectType::Pipe,
            self.core.subject().clone(),
        );
        Pipe::queue(subject, self.circuit.clone(), Pipe::channel(self.core.clone()))
    }
}

impl<E> Substrate for Channel<E> {
    fn subject(&self) -> &Subject {
        self.core.subject()
    }
}

impl<E> fmt::Debug for Channel<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("subject", self.core.subject())
            .finish()
    }
}

/// Percept factory and channel pool for one emission type.
pub struct Conduit<P, E> {
    core: Arc<ConduitCore<P, E>>,
}

struct ConduitCore<P, E> {
    subject: Subject,
    circuit: Weak<CircuitCore>,
    composer: Box<dyn Composer<P, E>>,
    percepts: RwLock<HashMap<Name, P>>,
    wiring: Arc<Wiring<E>>,
    closed: AtomicBool,
}

impl<P, E> Conduit<P, E>
where
    P: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn assemble(
        subject: Subject,
        circuit: Weak<CircuitCore>,
        composer: Box<dyn Composer<P, E>>,
        pipeline: Option<FlowPipeline<E>>,
    ) -> Self {
        Self {
            core: Arc::new(ConduitCore {
                subject,
                circuit,
                composer,
                percepts: RwLock::new(HashMap::new()),
                wiring: Arc::new(Wiring::new(pipeline)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the pooled percept for a name, creating the channel and
    /// composing the percept on first use. Concurrent callers for the same
    /// name receive the identical instance.
    pub fn percept(&self, name: &Name) -> SubstratesResult<P> {
        if let Some(percept) = self.core.percepts.read().get(name) {
            return Ok(percept.clone());
        }
        let mut percepts = self.core.percepts.write();
        if let Some(percept) = percepts.get(name) {
            return Ok(percept.clone());
        }
        let subject = Subject::with_enclosure(
            name.clone(),
            SubjectType::Channel,
            self.core.subject.clone(),
        );
        let channel = Channel::new(
            Arc::new(ChannelCore::new(
                subject,
                self.core.wiring.clone(),
                Vec::new(),
            )),
            self.core.circuit.clone(),
        );
        let percept = self.core.composer.compose(&channel)?;
        percepts.insert(name.clone(), percept.clone());
        Ok(percept)
    }

    /// Attaches a subscriber. It is consulted during each channel's next
    /// rebuild; there is no retroactive delivery for emissions already made.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<E>>) -> SubstratesResult<Subscription> {
        if self.core.closed.load(Ordering::Acquire) {
            return Err(SubstratesError::Closed(format!(
                "conduit {}",
                self.core.subject.path()
            )));
        }
        let subject = Subject::with_enclosure(
            Name::intern_static("subscription"),
            SubjectType::Subscription,
            self.core.subject.clone(),
        );
        Ok(self.core.wiring.subscribe(subject, subscriber))
    }

    pub fn subject(&self) -> &Subject {
        &self.core.subject
    }
}

impl<P, E> Substrate for Conduit<P, E> {
    fn subject(&self) -> &Subject {
        &self.core.subject
    }
}

impl<P, E> Source<E> for Conduit<P, E>
where
    P: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<E>>) -> SubstratesResult<Subscription> {
        Conduit::subscribe(self, subscriber)
    }
}

impl<P, E> Resource for Conduit<P, E>
where
    P: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn close(&self) {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.percepts.write().clear();
        self.core.wiring.clear();
    }
}

impl<P, E> Clone for Conduit<P, E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<P, E> fmt::Debug for Conduit<P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conduit")
            .field("subject", &self.core.subject)
            .field("channels", &self.core.percepts.read().len())
            .finish()
    }
}
