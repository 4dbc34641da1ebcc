//! Reservoirs: incremental capture buffers over a source.

use crate::pipe::{Capture, Pipe};
use crate::name::Name;
use crate::source::{Registrar, Source, Subscriber, Subscription};
use crate::subject::{Resource, Subject, Substrate};
use crate::types::{SubjectType, SubstratesResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Subscribes to a source on creation and buffers one capture per emission
/// on every channel. Draining removes and returns everything accumulated
/// since the previous drain.
pub struct Reservoir<E> {
    core: Arc<ReservoirCore<E>>,
}

struct ReservoirCore<E> {
    subject: Subject,
    buffer: Arc<Mutex<Vec<Capture<E>>>>,
    subscription: Subscription,
    closed: AtomicBool,
}

impl<E: Clone + Send + Sync + 'static> Reservoir<E> {
    pub(crate) fn attach<S>(source: &S) -> SubstratesResult<Self>
    where
        S: Source<E> + ?Sized,
    {
        let subject = Subject::with_enclosure(
            Name::intern_static("reservoir"),
            SubjectType::Reservoir,
            source.subject().clone(),
        );
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscription = source.subscribe(Arc::new(CaptureSubscriber {
            buffer: buffer.clone(),
        }))?;
        Ok(Self {
            core: Arc::new(ReservoirCore {
                subject,
                buffer,
                subscription,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Atomically removes and returns the captures accumulated since the
    /// last drain. Captures arriving afterwards appear in the next drain.
    pub fn drain(&self) -> Vec<Capture<E>> {
        std::mem::take(&mut *self.core.buffer.lock())
    }

    /// Unsubscribes from the source and frees the buffer. Idempotent.
    pub fn close(&self) {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.subscription.close();
        self.core.buffer.lock().clear();
    }

    pub fn subject(&self) -> &Subject {
        &self.core.subject
    }
}

impl<E> Substrate for Reservoir<E> {
    fn subject(&self) -> &Subject {
        &self.core.subject
    }
}

impl<E: Clone + Send + Sync + 'static> Resource for Reservoir<E> {
    fn close(&self) {
        Reservoir::close(self);
    }
}

impl<E> Clone for Reservoir<E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<E> fmt::Debug for Reservoir<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservoir")
            .field("subject", &self.core.subject)
            .field("buffered", &self.core.buffer.lock().len())
            .finish()
    }
}

/// Registers a capture pipe on every channel of the observed source.
struct CaptureSubscriber<E> {
    buffer: Arc<Mutex<Vec<Capture<E>>>>,
}

impl<E: Clone + Send + Sync + 'static> Subscriber<E> for CaptureSubscriber<E> {
    fn accept(&self, subject: &Subject, registrar: &mut Registrar<'_, E>) -> SubstratesResult<()> {
        let buffer = self.buffer.clone();
        let subject = subject.clone();
        registrar.register(Pipe::receptor(move |emission| {
            buffer
                .lock()
                .push(Capture::new(subject.clone(), emission));
            Ok(())
        }));
        Ok(())
    }
}
