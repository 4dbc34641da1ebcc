//! Pipes: typed emission sinks.
//!
//! A pipe is a tagged union behind a single `emit` operation. Receptor and
//! transforming pipes run on the caller's thread; queue pipes cross into a
//! circuit and are the stack-safe boundary that makes deep chains and cycles
//! possible.

use crate::circuit::CircuitCore;
use crate::conduit::ChannelCore;
use crate::flow::FlowPipeline;
use crate::name::Name;
use crate::subject::{Subject, Substrate};
use crate::types::{SubjectType, SubstratesResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// Carrier of emissions of a single element type.
pub struct Pipe<E> {
    core: Arc<PipeCore<E>>,
}

struct PipeCore<E> {
    subject: Subject,
    kind: PipeKind<E>,
}

enum PipeKind<E> {
    /// Discards emissions.
    Empty,
    /// Synchronous callback on the emitting thread.
    Receptor(Box<dyn Fn(E) -> SubstratesResult<()> + Send + Sync>),
    /// Schedules `target.emit` onto the owning circuit.
    Queue {
        circuit: Weak<CircuitCore>,
        target: Pipe<E>,
    },
    /// Applies a pipe-local flow pipeline, then forwards.
    Flow {
        pipeline: Mutex<FlowPipeline<E>>,
        target: Pipe<E>,
    },
    /// Delivers into a conduit channel; reached only through a queue pipe,
    /// so delivery always runs on the circuit worker.
    Channel(Arc<ChannelCore<E>>),
}

impl<E: Clone + Send + Sync + 'static> Pipe<E> {
    /// A pipe that silently discards everything emitted into it.
    pub fn empty() -> Self {
        Self::assemble(
            Subject::new(Name::intern_static("pipe.empty"), SubjectType::Pipe),
            PipeKind::Empty,
        )
    }

    /// Wraps a callback; the callback runs synchronously on the emitting
    /// thread and its error is returned to the emitter.
    pub fn receptor<F>(receptor: F) -> Self
    where
        F: Fn(E) -> SubstratesResult<()> + Send + Sync + 'static,
    {
        Self::assemble(
            Subject::new(Name::intern_static("pipe.receptor"), SubjectType::Pipe),
            PipeKind::Receptor(Box::new(receptor)),
        )
    }

    /// Applies a transformation and forwards the result to a downstream pipe
    /// of the output type.
    pub fn transformer<I, F>(transform: F, target: Pipe<E>) -> Pipe<I>
    where
        I: Clone + Send + Sync + 'static,
        F: Fn(I) -> E + Send + Sync + 'static,
    {
        Pipe::<I>::assemble(
            Subject::new(Name::intern_static("pipe.transformer"), SubjectType::Pipe),
            PipeKind::Receptor(Box::new(move |input| target.emit(transform(input)))),
        )
    }

    pub(crate) fn queue(subject: Subject, circuit: Weak<CircuitCore>, target: Pipe<E>) -> Self {
        Self::assemble(subject, PipeKind::Queue { circuit, target })
    }

    pub(crate) fn flowed(subject: Subject, pipeline: FlowPipeline<E>, target: Pipe<E>) -> Self {
        Self::assemble(
            subject,
            PipeKind::Flow {
                pipeline: Mutex::new(pipeline),
                target,
            },
        )
    }

    pub(crate) fn channel(channel: Arc<ChannelCore<E>>) -> Self {
        let subject = channel.subject().clone();
        Self::assemble(subject, PipeKind::Channel(channel))
    }

    fn assemble(subject: Subject, kind: PipeKind<E>) -> Self {
        Self {
            core: Arc::new(PipeCore { subject, kind }),
        }
    }

    /// Passes a value along the pipeline. Emissions into a closed circuit are
    /// dropped without error.
    pub fn emit(&self, emission: E) -> SubstratesResult<()> {
        match &self.core.kind {
            PipeKind::Empty => Ok(()),
            PipeKind::Receptor(receptor) => receptor(emission),
            PipeKind::Queue { circuit, target } => {
                let Some(circuit) = circuit.upgrade() else {
                    return Ok(());
                };
                let target = target.clone();
                circuit.schedule(Box::new(move || {
                    if let Err(error) = target.emit(emission) {
                        tracing::error!(
                            pipe = %target.subject().path(),
                            %error,
                            "pipe failed on circuit worker"
                        );
                    }
                }));
                Ok(())
            }
            PipeKind::Flow { pipeline, target } => match pipeline.lock().apply(emission) {
                Some(value) => target.emit(value),
                None => Ok(()),
            },
            PipeKind::Channel(channel) => {
                channel.deliver(emission);
                Ok(())
            }
        }
    }
}

impl<E> Pipe<E> {
    pub fn subject(&self) -> &Subject {
        &self.core.subject
    }
}

impl<E> Substrate for Pipe<E> {
    fn subject(&self) -> &Subject {
        &self.core.subject
    }
}

impl<E> Clone for Pipe<E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<E> fmt::Debug for Pipe<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.core.kind {
            PipeKind::Empty => "empty",
            PipeKind::Receptor(_) => "receptor",
            PipeKind::Queue { .. } => "queue",
            PipeKind::Flow { .. } => "flow",
            PipeKind::Channel(_) => "channel",
        };
        f.debug_struct("Pipe")
            .field("kind", &kind)
            .field("subject", &self.core.subject)
            .finish()
    }
}

/// An emitted value paired with the subject of the channel that emitted it.
#[derive(Clone)]
pub struct Capture<E> {
    subject: Subject,
    emission: E,
}

impl<E> Capture<E> {
    pub fn new(subject: Subject, emission: E) -> Self {
        Self { subject, emission }
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn emission(&self) -> &E {
        &self.emission
    }

    pub fn into_emission(self) -> E {
        self.emission
    }
}

impl<E: fmt::Debug> fmt::Debug for Capture<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capture")
            .field("subject", &self.subject)
            .field("emission", &self.emission)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[test]
    fn test_empty_pipe_discards() {
        let pipe = Pipe::<String>::empty();
        pipe.emit("dropped".to_string()).unwrap();
    }

    #[test]
    fn test_receptor_pipe() {
        let total = Arc::new(PlMutex::new(0));
        let inner = total.clone();
        let pipe = Pipe::receptor(move |value: i32| {
            *inner.lock() += value;
            Ok(())
        });
        pipe.emit(5).unwrap();
        pipe.emit(10).unwrap();
        assert_eq!(*total.lock(), 15);
    }

    #[test]
    fn test_receptor_error_propagates_to_emitter() {
        let pipe = Pipe::receptor(|value: i32| {
            if value < 0 {
                Err(crate::types::SubstratesError::InvalidOperation(
                    "negative value".to_string(),
                ))
            } else {
                Ok(())
            }
        });
        assert!(pipe.emit(5).is_ok());
        assert!(pipe.emit(-5).is_err());
    }

    #[test]
    fn test_transformer_applies_before_forwarding() {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let inner = seen.clone();
        let sink = Pipe::receptor(move |value: String| {
            inner.lock().push(value);
            Ok(())
        });
        let lengths = Pipe::transformer(|value: i32| format!("value-{value}"), sink);
        lengths.emit(7).unwrap();
        assert_eq!(seen.lock().as_slice(), ["value-7".to_string()]);
    }
}
