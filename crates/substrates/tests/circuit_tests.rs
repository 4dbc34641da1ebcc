use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use substrates::*;

fn name(path: &str) -> Name {
    cortex().name(path).unwrap()
}

struct CollectSubscriber {
    sink: Arc<Mutex<Vec<i32>>>,
}

impl Subscriber<i32> for CollectSubscriber {
    fn accept(&self, _subject: &Subject, registrar: &mut Registrar<'_, i32>) -> SubstratesResult<()> {
        let sink = self.sink.clone();
        registrar.register(Pipe::receptor(move |value| {
            sink.lock().push(value);
            Ok(())
        }));
        Ok(())
    }
}

#[test]
fn test_single_emitter_fifo_ordering() {
    let circuit = cortex().circuit_named(name("fifo"));
    let conduit: Conduit<Pipe<i32>, i32> = circuit.conduit_named(name("numbers"), PipeComposer);
    let seen = Arc::new(Mutex::new(Vec::new()));
    conduit
        .subscribe(Arc::new(CollectSubscriber { sink: seen.clone() }))
        .unwrap();

    let pipe = conduit.percept(&name("input")).unwrap();
    for value in 1..=5 {
        pipe.emit(value).unwrap();
    }
    circuit.await_empty().unwrap();

    assert_eq!(*seen.lock(), vec![1, 2, 3, 4, 5]);
    circuit.close();
}

struct CascadeSubscriber {
    order: Arc<Mutex<Vec<(&'static str, i32)>>>,
    downstream: Pipe<i32>,
}

impl Subscriber<i32> for CascadeSubscriber {
    fn accept(&self, subject: &Subject, registrar: &mut Registrar<'_, i32>) -> SubstratesResult<()> {
        let order = self.order.clone();
        if subject.name().part() == "c1" {
            let downstream = self.downstream.clone();
            registrar.register(Pipe::receptor(move |value: i32| {
                order.lock().push(("c1", value));
                if value < 3 {
                    downstream.emit(value + 100)?;
                }
                Ok(())
            }));
        } else {
            registrar.register(Pipe::receptor(move |value: i32| {
                order.lock().push(("c2", value));
                Ok(())
            }));
        }
        Ok(())
    }
}

/// Worker-originated emissions run before the next external item: the
/// cascade from c1's handler lands on c2 before c1 sees its next value.
#[test]
fn test_depth_first_cascade_ordering() {
    let circuit = cortex().circuit_named(name("cascade"));
    let conduit: Conduit<Pipe<i32>, i32> = circuit.conduit_named(name("pair"), PipeComposer);
    let p1 = conduit.percept(&name("c1")).unwrap();
    let p2 = conduit.percept(&name("c2")).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    conduit
        .subscribe(Arc::new(CascadeSubscriber {
            order: order.clone(),
            downstream: p2,
        }))
        .unwrap();

    for value in 1..=3 {
        p1.emit(value).unwrap();
    }
    circuit.await_empty().unwrap();

    assert_eq!(
        *order.lock(),
        vec![("c1", 1), ("c2", 101), ("c1", 2), ("c2", 201), ("c1", 3)]
    );
    let delivered_to_c2: Vec<i32> = order
        .lock()
        .iter()
        .filter(|(channel, _)| *channel == "c2")
        .map(|(_, value)| *value)
        .collect();
    assert_eq!(delivered_to_c2, vec![101, 201]);
    circuit.close();
}

/// A pipe targeting itself is a cycle; the transit queue, not the call
/// stack, carries it.
#[test]
fn test_self_cycle_is_stack_safe() {
    let circuit = cortex().circuit_named(name("cycle"));
    let collected = Arc::new(Mutex::new(Vec::new()));
    let cycle: Arc<once_cell::sync::OnceCell<Pipe<i32>>> =
        Arc::new(once_cell::sync::OnceCell::new());

    let sink = collected.clone();
    let rebound = cycle.clone();
    let pipe = circuit.pipe(Pipe::receptor(move |value: i32| {
        sink.lock().push(value);
        if value < 10 {
            if let Some(next) = rebound.get() {
                next.emit(value + 1)?;
            }
        }
        Ok(())
    }));
    cycle.set(pipe.clone()).ok();

    pipe.emit(1).unwrap();
    circuit.await_empty().unwrap();

    assert_eq!(*collected.lock(), (1..=10).collect::<Vec<i32>>());
    circuit.close();
}

/// A deep cycle would overflow the stack if emits recursed; run enough
/// iterations to be sure they do not.
#[test]
fn test_deep_cycle_does_not_recurse() {
    let circuit = cortex().circuit_named(name("deep"));
    let count = Arc::new(AtomicUsize::new(0));
    let cycle: Arc<once_cell::sync::OnceCell<Pipe<u64>>> =
        Arc::new(once_cell::sync::OnceCell::new());

    let counter = count.clone();
    let rebound = cycle.clone();
    let pipe = circuit.pipe(Pipe::receptor(move |value: u64| {
        counter.fetch_add(1, Ordering::SeqCst);
        if value < 100_000 {
            if let Some(next) = rebound.get() {
                next.emit(value + 1)?;
            }
        }
        Ok(())
    }));
    cycle.set(pipe.clone()).ok();

    pipe.emit(1).unwrap();
    circuit.await_empty().unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 100_000);
    circuit.close();
}

#[test]
fn test_handlers_never_run_concurrently() {
    let circuit = cortex().circuit_named(name("serial"));
    let conduit: Conduit<Pipe<i32>, i32> = circuit.conduit_named(name("load"), PipeComposer);

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));
    {
        let active = active.clone();
        let peak = peak.clone();
        let total = total.clone();
        let subscriber = cortex().subscriber(
            name("load.watcher"),
            move |_subject: &Subject, registrar: &mut Registrar<'_, i32>| {
                let active = active.clone();
                let peak = peak.clone();
                let total = total.clone();
                registrar.register(Pipe::receptor(move |_value| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::yield_now();
                    total.fetch_add(1, Ordering::SeqCst);
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }));
                Ok(())
            },
        );
        conduit.subscribe(subscriber).unwrap();
    }

    let pipe = conduit.percept(&name("shared")).unwrap();
    let emitters: Vec<_> = (0..4)
        .map(|_| {
            let pipe = pipe.clone();
            std::thread::spawn(move || {
                for value in 0..50 {
                    pipe.emit(value).unwrap();
                }
            })
        })
        .collect();
    for emitter in emitters {
        emitter.join().unwrap();
    }
    circuit.await_empty().unwrap();

    assert_eq!(total.load(Ordering::SeqCst), 200);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    circuit.close();
}

#[test]
fn test_await_from_worker_is_an_error() {
    let circuit = cortex().circuit_named(name("reentrant"));
    let outcome: Arc<Mutex<Option<SubstratesResult<()>>>> = Arc::new(Mutex::new(None));

    let slot = outcome.clone();
    let reentrant = circuit.clone();
    let pipe = circuit.pipe(Pipe::receptor(move |_value: i32| {
        *slot.lock() = Some(reentrant.await_empty());
        Ok(())
    }));
    pipe.emit(1).unwrap();
    circuit.await_empty().unwrap();

    let outcome = outcome.lock().take().expect("handler ran");
    match outcome {
        Err(SubstratesError::InvalidOperation(message)) => {
            assert_eq!(message, "cannot await from circuit thread");
        }
        other => panic!("expected invalid operation, got {other:?}"),
    }
    circuit.close();
}

#[test]
fn test_emit_after_close_is_dropped_silently() {
    let circuit = cortex().circuit_named(name("drops"));
    let count = Arc::new(AtomicUsize::new(0));

    let counter = count.clone();
    let pipe = circuit.pipe(Pipe::receptor(move |_value: i32| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    pipe.emit(1).unwrap();
    circuit.await_empty().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    circuit.close();
    // No error, no delivery.
    pipe.emit(2).unwrap();
    pipe.emit(3).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_close_is_idempotent_across_threads() {
    let circuit = cortex().circuit_named(name("multiclose"));
    let closers: Vec<_> = (0..4)
        .map(|_| {
            let circuit = circuit.clone();
            std::thread::spawn(move || circuit.close())
        })
        .collect();
    for closer in closers {
        closer.join().unwrap();
    }
    assert!(circuit.is_closed());
    // Await after close completes promptly.
    circuit.await_empty().unwrap();
    circuit.close();
}

#[test]
fn test_close_notifies_state_subscribers() {
    let circuit = cortex().circuit_named(name("observed"));
    let notified = Arc::new(AtomicUsize::new(0));

    let counter = notified.clone();
    let subscriber = cortex().subscriber(
        name("lifecycle.watcher"),
        move |_subject: &Subject, registrar: &mut Registrar<'_, State>| {
            let counter = counter.clone();
            registrar.register(Pipe::receptor(move |state: State| {
                if !state.is_empty() {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }));
            Ok(())
        },
    );
    circuit.subscribe(subscriber).unwrap();
    circuit.close();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
    while notified.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn test_pipe_configured_flow_is_local_to_the_pipe() {
    let circuit = cortex().circuit_named(name("piped"));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let target = Pipe::receptor(move |value: i32| {
        sink.lock().push(value);
        Ok(())
    });
    let pipe = circuit.pipe_configured(target, |flow| {
        flow.skip(1).replace(|value| value * 2);
    });

    for value in 1..=3 {
        pipe.emit(value).unwrap();
    }
    circuit.await_empty().unwrap();

    assert_eq!(*seen.lock(), vec![4, 6]);
    circuit.close();
}
