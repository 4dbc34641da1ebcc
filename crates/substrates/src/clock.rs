//! Clocks: circuit-owned components emitting timestamp ticks.
//!
//! Ticks are scheduled onto the owning circuit, so clock consumers run on
//! the circuit worker, serialized with every other handler.

use crate::circuit::CircuitCore;
use crate::name::Name;
use crate::pipe::Pipe;
use crate::source::Subscription;
use crate::subject::{Resource, Subject, Substrate};
use crate::types::{Id, SubjectType, SubstratesError, SubstratesResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// Tick cadences a clock can emit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockCycle {
    /// Emitted every millisecond.
    Millisecond,
    /// Emitted every second.
    Second,
    /// Emitted every minute.
    Minute,
}

impl ClockCycle {
    /// Width of the cycle in milliseconds.
    pub fn units(&self) -> u64 {
        match self {
            ClockCycle::Millisecond => 1,
            ClockCycle::Second => 1000,
            ClockCycle::Minute => 1000 * 60,
        }
    }
}

/// Emits `DateTime<Utc>` ticks through its circuit on consumer cadences.
#[derive(Clone)]
pub struct Clock {
    core: Arc<ClockCore>,
}

struct ClockCore {
    subject: Subject,
    circuit: Weak<CircuitCore>,
    consumers: RwLock<Vec<Consumer>>,
    closed: AtomicBool,
}

struct Consumer {
    id: Id,
    cycle: ClockCycle,
    pipe: Pipe<DateTime<Utc>>,
    due: Mutex<DateTime<Utc>>,
}

impl Clock {
    pub(crate) fn start(subject: Subject, circuit: Weak<CircuitCore>) -> Self {
        let core = Arc::new(ClockCore {
            subject,
            circuit,
            consumers: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        let ticker = Arc::downgrade(&core);
        let spawned = thread::Builder::new()
            .name(format!("{}.ticker", core.subject.name().path()))
            .spawn(move || tick(ticker));
        if let Err(error) = spawned {
            tracing::error!(clock = %core.subject.path(), %error, "failed to spawn clock ticker");
            core.closed.store(true, Ordering::Release);
        }
        Self { core }
    }

    /// Subscribes a pipe to ticks of the given cycle. The returned handle
    /// cancels the consumer on close.
    pub fn consume(
        &self,
        name: Name,
        cycle: ClockCycle,
        pipe: Pipe<DateTime<Utc>>,
    ) -> SubstratesResult<Subscription> {
        if self.core.closed.load(Ordering::Acquire) {
            return Err(SubstratesError::Closed(format!(
                "clock {}",
                self.core.subject.path()
            )));
        }
        let id = Id::new();
        let due = Utc::now() + ChronoDuration::milliseconds(cycle.units() as i64);
        self.core.consumers.write().push(Consumer {
            id,
            cycle,
            pipe,
            due: Mutex::new(due),
        });
        let subject = Subject::with_enclosure(
            name,
            SubjectType::Subscription,
            self.core.subject.clone(),
        );
        let core = Arc::downgrade(&self.core);
        Ok(Subscription::new(
            subject,
            Box::new(move || {
                if let Some(core) = core.upgrade() {
                    core.consumers.write().retain(|consumer| consumer.id != id);
                }
            }),
        ))
    }

    /// Stops the ticker and cancels all consumers. Idempotent.
    pub fn close(&self) {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.consumers.write().clear();
    }

    pub fn subject(&self) -> &Subject {
        &self.core.subject
    }
}

impl Substrate for Clock {
    fn subject(&self) -> &Subject {
        &self.core.subject
    }
}

impl Resource for Clock {
    fn close(&self) {
        Clock::close(self);
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("subject", &self.core.subject)
            .field("consumers", &self.core.consumers.read().len())
            .finish()
    }
}

/// Ticker loop. Holds only a weak reference, so dropping the last clock
/// handle ends the thread; the sleep is clamped so close is honored quickly.
fn tick(core: Weak<ClockCore>) {
    loop {
        let Some(core) = core.upgrade() else {
            return;
        };
        if core.closed.load(Ordering::Acquire) {
            return;
        }
        let Some(circuit) = core.circuit.upgrade() else {
            return;
        };
        let now = Utc::now();
        let mut sleep_ms: u64 = 25;
        for consumer in core.consumers.read().iter() {
            let mut due = consumer.due.lock();
            if now >= *due {
                *due = now + ChronoDuration::milliseconds(consumer.cycle.units() as i64);
                let pipe = consumer.pipe.clone();
                let subject = core.subject.clone();
                circuit.schedule(Box::new(move || {
                    if let Err(error) = pipe.emit(now) {
                        tracing::error!(clock = %subject.path(), %error, "clock consumer failed");
                    }
                }));
                sleep_ms = sleep_ms.min(consumer.cycle.units());
            } else {
                let remaining = (*due - now).num_milliseconds().max(1) as u64;
                sleep_ms = sleep_ms.min(remaining);
            }
        }
        drop(core);
        thread::sleep(Duration::from_millis(sleep_ms.clamp(1, 25)));
    }
}
