//! Cortex: the entry point into the substrates runtime.

use crate::circuit::Circuit;
use crate::current::Current;
use crate::name::Name;
use crate::pipe::Pipe;
use crate::reservoir::Reservoir;
use crate::scope::Scope;
use crate::source::{FnSubscriber, Registrar, Source};
use crate::state::{Slot, SlotValue, State};
use crate::subject::{Subject, Substrate};
use crate::types::{SubjectType, SubstratesResult};
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Environment property naming the cortex provider. Only the default
/// provider ships with this crate; unknown values fall back with a warning.
pub const PROVIDER_PROPERTY: &str = "SUBSTRATES_SPI_PROVIDER";

static CORTEX: Lazy<Cortex> = Lazy::new(bootstrap);

fn bootstrap() -> Cortex {
    if let Ok(provider) = std::env::var(PROVIDER_PROPERTY) {
        if provider != "default" {
            tracing::warn!(%provider, "unknown cortex provider, using default");
        }
    }
    Cortex::new()
}

/// Returns the process-wide cortex.
pub fn cortex() -> &'static Cortex {
    &CORTEX
}

/// Bootstrap factory for circuits, names, pipes, subscribers, scopes, slots,
/// states, reservoirs and currents.
pub struct Cortex {
    subject: Subject,
}

impl Cortex {
    fn new() -> Self {
        Self {
            subject: Subject::new(Name::intern_static("cortex"), SubjectType::Cortex),
        }
    }

    /// Creates a new circuit.
    pub fn circuit(&self) -> Circuit {
        self.circuit_named(Name::intern_static("circuit"))
    }

    /// Creates a new named circuit. Every call creates a distinct circuit;
    /// names need not be unique.
    pub fn circuit_named(&self, name: Name) -> Circuit {
        Circuit::new(name)
    }

    /// Interns a name for a dotted path.
    pub fn name(&self, path: &str) -> SubstratesResult<Name> {
        Name::of(path)
    }

    /// Interns a name from a sequence of parts.
    pub fn name_from_parts<I, S>(&self, parts: I) -> SubstratesResult<Name>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Name::from_parts(parts)
    }

    /// Wraps a receptor callback in a pipe.
    pub fn pipe<E, F>(&self, receptor: F) -> Pipe<E>
    where
        E: Clone + Send + Sync + 'static,
        F: Fn(E) -> SubstratesResult<()> + Send + Sync + 'static,
    {
        Pipe::receptor(receptor)
    }

    /// Builds a transforming pipe in front of a downstream pipe.
    pub fn transformer<I, O, F>(&self, transform: F, target: Pipe<O>) -> Pipe<I>
    where
        I: Clone + Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        Pipe::transformer(transform, target)
    }

    /// Builds a named, function-backed subscriber.
    pub fn subscriber<E, F>(&self, name: Name, callback: F) -> Arc<FnSubscriber<E, F>>
    where
        E: Clone + Send + Sync + 'static,
        F: Fn(&Subject, &mut Registrar<'_, E>) -> SubstratesResult<()> + Send + Sync + 'static,
    {
        Arc::new(FnSubscriber::new(
            Subject::new(name, SubjectType::Subscriber),
            callback,
        ))
    }

    /// Creates an anonymous root scope.
    pub fn scope(&self) -> Scope {
        self.scope_named(Name::intern_static("scope"))
    }

    /// Creates a named root scope.
    pub fn scope_named(&self, name: Name) -> Scope {
        Scope::new(name, None)
    }

    /// Builds a slot for any supported value type.
    pub fn slot(&self, name: Name, value: impl Into<SlotValue>) -> Slot {
        Slot::new(name, value)
    }

    /// Creates an empty state.
    pub fn state(&self) -> State {
        State::new()
    }

    /// Attaches an incremental capture buffer to a source.
    pub fn reservoir<E, S>(&self, source: &S) -> SubstratesResult<Reservoir<E>>
    where
        E: Clone + Send + Sync + 'static,
        S: Source<E> + ?Sized,
    {
        Reservoir::attach(source)
    }

    /// The calling thread's identity view.
    pub fn current(&self) -> Current {
        Current::capture()
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl Substrate for Cortex {
    fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl std::fmt::Debug for Cortex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cortex")
            .field("subject", &self.subject)
            .finish()
    }
}
