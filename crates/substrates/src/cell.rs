//! Cells: hierarchical bidirectional nodes (experimental).
//!
//! A cell receives emissions of its inlet type, adapts them through its
//! ingress composer into the outlet type, and fans them out on its outlet
//! channel. Child cells are pooled by name; each child's outlet carries a
//! fixed uplink into its parent, so subscribers on an ancestor observe every
//! descendant emission. Uplinks cross the circuit queue, keeping arbitrary
//! hierarchy depth stack-safe.

use crate::circuit::CircuitCore;
use crate::conduit::{Channel, ChannelCore, Composer, PipeComposer, Wiring};
use crate::name::Name;
use crate::pipe::Pipe;
use crate::source::{Source, Subscriber, Subscription};
use crate::subject::{Resource, Subject, Substrate};
use crate::types::{SubjectType, SubstratesError, SubstratesResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Hierarchical node that is both a receiver of `I` and a source of `O`.
pub struct Cell<I, O> {
    core: Arc<CellCore<I, O>>,
}

struct CellCore<I, O> {
    subject: Subject,
    circuit: Weak<CircuitCore>,
    wiring: Arc<Wiring<O>>,
    inlet: Pipe<I>,
    outlet: Pipe<O>,
    children: RwLock<HashMap<Name, Cell<O, O>>>,
    closed: AtomicBool,
}

impl<I, O> Cell<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    pub(crate) fn assemble(
        circuit: Weak<CircuitCore>,
        subject: Subject,
        ingress: &dyn Composer<Pipe<I>, O>,
        egress: &dyn Composer<Pipe<O>, O>,
        uplink: Option<Pipe<O>>,
    ) -> SubstratesResult<Self> {
        let wiring = Arc::new(Wiring::new(None));
        let channel_subject = Subject::with_enclosure(
            Name::intern_static("outlet"),
            SubjectType::Channel,
            subject.clone(),
        );
        let channel = Channel::new(
            Arc::new(ChannelCore::new(
                channel_subject,
                wiring.clone(),
                uplink.into_iter().collect(),
            )),
            circuit.clone(),
        );
        let inlet = ingress.compose(&channel)?;
        let outlet = egress.compose(&channel)?;
        Ok(Self {
            core: Arc::new(CellCore {
                subject,
                circuit,
                wiring,
                inlet,
                outlet,
                children: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// The pipe through which this cell receives emissions.
    pub fn pipe(&self) -> Pipe<I> {
        self.core.inlet.clone()
    }

    /// Emits into this cell; shorthand for `pipe().emit(emission)`.
    pub fn emit(&self, emission: I) -> SubstratesResult<()> {
        self.core.inlet.emit(emission)
    }

    /// Returns the pooled child cell for a name, creating it on first use.
    /// Child emissions flow upward into this cell's outlet.
    pub fn cell(&self, name: &Name) -> SubstratesResult<Cell<O, O>> {
        if self.core.closed.load(Ordering::Acquire) {
            return Err(SubstratesError::Closed(format!(
                "cell {}",
                self.core.subject.path()
            )));
        }
        if let Some(child) = self.core.children.read().get(name) {
            return Ok(child.clone());
        }
        let mut children = self.core.children.write();
        if let Some(child) = children.get(name) {
            return Ok(child.clone());
        }
        let subject = Subject::with_enclosure(
            name.clone(),
            SubjectType::Cell,
            self.core.subject.clone(),
        );
        let child = Cell::assemble(
            self.core.circuit.clone(),
            subject,
            &PipeComposer,
            &PipeComposer,
            Some(self.core.outlet.clone()),
        )?;
        children.insert(name.clone(), child.clone());
        Ok(child)
    }

    /// Subscribes to this cell's outlet. Descendant emissions are observed
    /// here as well, via their uplinks.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<O>>) -> SubstratesResult<Subscription> {
        if self.core.closed.load(Ordering::Acquire) {
            return Err(SubstratesError::Closed(format!(
                "cell {}",
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

impl<I, O> Substrate for Cell<I, O> {
    fn subject(&self) -> &Subject {
        &self.core.subject
    }
}

impl<I, O> Source<O> for Cell<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<O>>) -> SubstratesResult<Subscription> {
        Cell::subscribe(self, subscriber)
    }
}

impl<I, O> Resource for Cell<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn close(&self) {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let children = std::mem::take(&mut *self.core.children.write());
        for child in children.values() {
            Resource::close(child);
        }
        self.core.wiring.clear();
    }
}

impl<I, O> Clone for Cell<I, O> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<I, O> fmt::Debug for Cell<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("subject", &self.core.subject)
            .field("children", &self.core.children.read().len())
            .finish()
    }
}
