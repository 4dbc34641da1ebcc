//! Subjects: the identity records attached to every engine entity.

use crate::name::Name;
use crate::state::State;
use crate::types::{Id, SubjectType};
use std::fmt;
use std::sync::Arc;

/// A subject is a referent that maintains identity and state. Every circuit,
/// conduit, channel, pipe, subscription, scope and reservoir carries one.
#[derive(Clone)]
pub struct Subject {
    inner: Arc<SubjectInner>,
}

struct SubjectInner {
    id: Id,
    name: Name,
    subject_type: SubjectType,
    state: State,
    enclosure: Option<Subject>,
}

impl Subject {
    pub fn new(name: Name, subject_type: SubjectType) -> Self {
        Self::assemble(name, subject_type, State::new(), None)
    }

    pub fn with_enclosure(name: Name, subject_type: SubjectType, enclosure: Subject) -> Self {
        Self::assemble(name, subject_type, State::new(), Some(enclosure))
    }

    pub fn with_state(
        name: Name,
        subject_type: SubjectType,
        state: State,
        enclosure: Option<Subject>,
    ) -> Self {
        Self::assemble(name, subject_type, state, enclosure)
    }

    fn assemble(
        name: Name,
        subject_type: SubjectType,
        state: State,
        enclosure: Option<Subject>,
    ) -> Self {
        Self {
            inner: Arc::new(SubjectInner {
                id: Id::new(),
                name,
                subject_type,
                state,
                enclosure,
            }),
        }
    }

    /// Globally unique, stable identifier.
    pub fn id(&self) -> &Id {
        &self.inner.id
    }

    pub fn name(&self) -> &Name {
        &self.inner.name
    }

    pub fn subject_type(&self) -> SubjectType {
        self.inner.subject_type
    }

    pub fn state(&self) -> &State {
        &self.inner.state
    }

    /// The (parent) subject that encloses this subject, if any.
    pub fn enclosure(&self) -> Option<&Subject> {
        self.inner.enclosure.as_ref()
    }

    /// Iterates this subject and then each enclosing subject, innermost
    /// first. Powers the other enclosure-chain queries.
    pub fn chain(&self) -> SubjectChain<'_> {
        SubjectChain { next: Some(self) }
    }

    /// The outermost subject in the enclosure chain.
    pub fn extremity(&self) -> &Subject {
        self.chain().last().unwrap_or(self)
    }

    /// Number of enclosures above this subject.
    pub fn depth(&self) -> usize {
        self.chain().count() - 1
    }

    /// A representation of just this subject.
    pub fn part(&self) -> String {
        format!(
            "{}({})#{}",
            self.inner.subject_type, self.inner.name, self.inner.id
        )
    }

    /// The subject's name path, including enclosing subjects.
    pub fn path(&self) -> String {
        self.path_with('/')
    }

    pub fn path_with(&self, separator: char) -> String {
        let mut names: Vec<&str> = self.chain().map(|subject| subject.name().path()).collect();
        names.reverse();
        names.join(&separator.to_string())
    }

    /// True when this subject occurs strictly below the enclosure argument.
    pub fn within(&self, enclosure: &Subject) -> bool {
        self.chain()
            .skip(1)
            .any(|ancestor| ancestor.id() == enclosure.id())
    }

    /// All enclosing subjects, innermost first.
    pub fn ancestors(&self) -> Vec<&Subject> {
        self.chain().skip(1).collect()
    }
}

/// Iterator over a subject and its enclosures, innermost first.
pub struct SubjectChain<'a> {
    next: Option<&'a Subject>,
}

impl<'a> Iterator for SubjectChain<'a> {
    type Item = &'a Subject;

    fn next(&mut self) -> Option<&'a Subject> {
        let subject = self.next.take()?;
        self.next = subject.enclosure();
        Some(subject)
    }
}

impl PartialEq for Subject {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Subject {}

impl std::hash::Hash for Subject {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl PartialOrd for Subject {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Subject {
    // Path-then-id: an ancestor's path is a proper prefix of each of its
    // descendants' paths, so ancestors sort strictly before descendants.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.path()
            .cmp(&other.path())
            .then_with(|| self.inner.id.cmp(&other.inner.id))
    }
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("type", &self.inner.subject_type)
            .finish()
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Anything that carries a subject.
pub trait Substrate {
    fn subject(&self) -> &Subject;
}

/// Anything whose usage ends with an explicit `close`. Closing is idempotent
/// for every engine resource.
pub trait Resource: Send + Sync {
    fn close(&self);
}
