//! Current: the per-thread identity view.

use crate::name::Name;
use crate::subject::{Subject, Substrate};
use crate::types::{Id, SubjectType};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

thread_local! {
    static IDENTITY: Subject = {
        let thread = std::thread::current();
        let name = thread
            .name()
            .and_then(|label| Name::of(label).ok())
            .unwrap_or_else(|| Name::intern_static("thread.anonymous"));
        Subject::new(name, SubjectType::Current)
    };
}

/// Identity of the calling thread, stable for the thread's lifetime. The
/// type is deliberately not `Send`: a current is only meaningful on the
/// thread that obtained it.
pub struct Current {
    subject: Subject,
    _local: PhantomData<Rc<()>>,
}

impl Current {
    pub(crate) fn capture() -> Self {
        Self {
            subject: IDENTITY.with(Subject::clone),
            _local: PhantomData,
        }
    }

    pub fn id(&self) -> &Id {
        self.subject.id()
    }

    pub fn name(&self) -> &Name {
        self.subject.name()
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl Substrate for Current {
    fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl fmt::Debug for Current {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Current")
            .field("subject", &self.subject)
            .finish()
    }
}
