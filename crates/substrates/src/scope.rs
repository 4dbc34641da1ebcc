//! Scopes: LIFO resource registries with one-shot closures.

use crate::name::Name;
use crate::subject::{Resource, Subject, Substrate};
use crate::types::{SubjectType, SubstratesError, SubstratesResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A resource management scope. Registered resources are closed in reverse
/// registration order when the scope closes; child scopes close with their
/// parent.
#[derive(Clone)]
pub struct Scope {
    core: Arc<ScopeCore>,
}

struct ScopeCore {
    subject: Subject,
    closed: AtomicBool,
    resources: Mutex<Vec<Box<dyn Resource>>>,
}

impl Scope {
    pub(crate) fn new(name: Name, enclosure: Option<Subject>) -> Self {
        let subject = match enclosure {
            None => Subject::new(name, SubjectType::Scope),
            Some(enclosure) => Subject::with_enclosure(name, SubjectType::Scope, enclosure),
        };
        Self {
            core: Arc::new(ScopeCore {
                subject,
                closed: AtomicBool::new(false),
                resources: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Ties a resource's close to this scope's close and returns it.
    /// Fails once the scope is closed.
    pub fn register<R>(&self, resource: R) -> SubstratesResult<R>
    where
        R: Resource + Clone + 'static,
    {
        let mut resources = self.core.resources.lock();
        if self.core.closed.load(Ordering::Acquire) {
            return Err(SubstratesError::Closed(format!(
                "scope {}",
                self.core.subject.path()
            )));
        }
        resources.push(Box::new(resource.clone()));
        Ok(resource)
    }

    /// Wraps a resource in a one-shot closure whose release is guaranteed by
    /// this scope. Created against a closed scope, the resource is released
    /// immediately and the closure is inert.
    pub fn closure<R>(&self, resource: R) -> Closure<R>
    where
        R: Resource + 'static,
    {
        let cell = Arc::new(Mutex::new(Some(resource)));
        let guard = ClosureGuard { cell: cell.clone() };
        let mut resources = self.core.resources.lock();
        if self.core.closed.load(Ordering::Acquire) {
            drop(resources);
            guard.close();
        } else {
            resources.push(Box::new(guard));
            drop(resources);
        }
        Closure {
            cell,
            scope: Arc::downgrade(&self.core),
        }
    }

    /// Creates an anonymous child scope.
    pub fn scope(&self) -> SubstratesResult<Scope> {
        self.scope_named(Name::intern_static("scope"))
    }

    /// Creates a named child scope. Fails once this scope is closed.
    pub fn scope_named(&self, name: Name) -> SubstratesResult<Scope> {
        let mut resources = self.core.resources.lock();
        if self.core.closed.load(Ordering::Acquire) {
            return Err(SubstratesError::Closed(format!(
                "cannot create scope within closed scope {}",
                self.core.subject.path()
            )));
        }
        let child = Scope::new(name, Some(self.core.subject.clone()));
        resources.push(Box::new(child.clone()));
        Ok(child)
    }

    /// Closes this scope and every registered resource, most recent first.
    /// Idempotent.
    pub fn close(&self) {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut resources = std::mem::take(&mut *self.core.resources.lock());
        while let Some(resource) = resources.pop() {
            resource.close();
        }
        tracing::debug!(scope = %self.core.subject.path(), "scope closed");
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::Acquire)
    }

    /// True when this scope sits inside the other scope's enclosure chain.
    pub fn within(&self, other: &Scope) -> bool {
        self.core.subject.within(&other.core.subject)
    }

    pub fn subject(&self) -> &Subject {
        &self.core.subject
    }
}

impl Substrate for Scope {
    fn subject(&self) -> &Subject {
        &self.core.subject
    }
}

impl Resource for Scope {
    fn close(&self) {
        Scope::close(self);
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("subject", &self.core.subject)
            .field("closed", &self.is_closed())
            .field("resources", &self.core.resources.lock().len())
            .finish()
    }
}

/// One-shot adapter around a scoped resource. `consume` runs the consumer
/// and then releases the resource exactly once, even when the consumer
/// fails; after the owning scope closes, `consume` is an inert no-op.
pub struct Closure<R> {
    cell: Arc<Mutex<Option<R>>>,
    scope: Weak<ScopeCore>,
}

impl<R: Resource> Closure<R> {
    pub fn consume<F>(&self, consumer: F) -> SubstratesResult<()>
    where
        F: FnOnce(&R) -> SubstratesResult<()>,
    {
        let open = self
            .scope
            .upgrade()
            .map_or(false, |scope| !scope.closed.load(Ordering::Acquire));
        if !open {
            return Ok(());
        }
        let Some(resource) = self.cell.lock().take() else {
            return Ok(());
        };
        let outcome = consumer(&resource);
        resource.close();
        outcome
    }

    /// True once the resource has been consumed or released.
    pub fn is_spent(&self) -> bool {
        self.cell.lock().is_none()
    }
}

impl<R> Clone for Closure<R> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<R> fmt::Debug for Closure<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("spent", &self.cell.lock().is_none())
            .finish()
    }
}

/// Releases a closure's resource when the owning scope closes first.
struct ClosureGuard<R> {
    cell: Arc<Mutex<Option<R>>>,
}

impl<R: Resource> Resource for ClosureGuard<R> {
    fn close(&self) {
        if let Some(resource) = self.cell.lock().take() {
            resource.close();
        }
    }
}
