//! Sources, subscribers, registrars and subscriptions.

use crate::pipe::Pipe;
use crate::subject::{Resource, Subject, Substrate};
use crate::types::SubstratesResult;
use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Anything that can be observed by subscribing.
pub trait Source<E>: Substrate {
    /// Subscribes a subscriber to receive channel registrations from this
    /// source. The handle's `close` detaches the subscriber.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<E>>) -> SubstratesResult<Subscription>;
}

/// Connects outlet pipes to emitting channels. Called once per channel
/// during that channel's rebuild, with the channel's subject and a temporal
/// registrar for installing pipes.
pub trait Subscriber<E>: Send + Sync {
    fn accept(&self, subject: &Subject, registrar: &mut Registrar<'_, E>) -> SubstratesResult<()>;
}

/// Links pipes to the channel being rebuilt. Valid only for the duration of
/// the subscriber callback; the borrow makes escaping it a compile error.
pub struct Registrar<'a, E> {
    pipes: &'a mut Vec<Pipe<E>>,
}

impl<'a, E> Registrar<'a, E> {
    pub(crate) fn new(pipes: &'a mut Vec<Pipe<E>>) -> Self {
        Self { pipes }
    }

    /// Installs a pipe that will receive the channel's emissions.
    pub fn register(&mut self, pipe: Pipe<E>) {
        self.pipes.push(pipe);
    }
}

/// Function-backed subscriber, the common case.
pub struct FnSubscriber<E, F> {
    subject: Subject,
    callback: F,
    _marker: PhantomData<fn(E)>,
}

impl<E, F> FnSubscriber<E, F>
where
    F: Fn(&Subject, &mut Registrar<'_, E>) -> SubstratesResult<()> + Send + Sync,
{
    pub fn new(subject: Subject, callback: F) -> Self {
        Self {
            subject,
            callback,
            _marker: PhantomData,
        }
    }
}

impl<E, F> Substrate for FnSubscriber<E, F> {
    fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl<E, F> Subscriber<E> for FnSubscriber<E, F>
where
    F: Fn(&Subject, &mut Registrar<'_, E>) -> SubstratesResult<()> + Send + Sync,
{
    fn accept(&self, subject: &Subject, registrar: &mut Registrar<'_, E>) -> SubstratesResult<()> {
        (self.callback)(subject, registrar)
    }
}

impl<E, F> fmt::Debug for FnSubscriber<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSubscriber")
            .field("subject", &self.subject)
            .finish()
    }
}

/// Handle returned by `subscribe`. Closing removes the subscriber and takes
/// effect at each affected channel's next emission.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    subject: Subject,
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new(subject: Subject, cancel: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                subject,
                cancel: Mutex::new(Some(cancel)),
            }),
        }
    }

    /// Detaches the subscriber. Idempotent.
    pub fn close(&self) {
        if let Some(cancel) = self.inner.cancel.lock().take() {
            cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.lock().is_none()
    }

    pub fn subject(&self) -> &Subject {
        &self.inner.subject
    }
}

impl Substrate for Subscription {
    fn subject(&self) -> &Subject {
        &self.inner.subject
    }
}

impl Resource for Subscription {
    fn close(&self) {
        Subscription::close(self);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.inner.subject)
            .field("closed", &self.is_closed())
            .finish()
    }
}
