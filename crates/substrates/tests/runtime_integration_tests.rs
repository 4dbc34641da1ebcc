use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use substrates::*;

fn name(path: &str) -> Name {
    cortex().name(path).unwrap()
}

fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// --- Reservoir ---

#[test]
fn test_reservoir_incremental_drain() {
    let circuit = cortex().circuit_named(name("captured"));
    let conduit: Conduit<Pipe<String>, String> =
        circuit.conduit_named(name("events"), PipeComposer);
    let reservoir = cortex().reservoir(&conduit).unwrap();

    let pipe = conduit.percept(&name("stream")).unwrap();
    pipe.emit("a".to_string()).unwrap();
    circuit.await_empty().unwrap();

    let first: Vec<String> = reservoir
        .drain()
        .into_iter()
        .map(Capture::into_emission)
        .collect();
    assert_eq!(first, vec!["a".to_string()]);

    pipe.emit("b".to_string()).unwrap();
    circuit.await_empty().unwrap();

    let second: Vec<String> = reservoir
        .drain()
        .into_iter()
        .map(Capture::into_emission)
        .collect();
    assert_eq!(second, vec!["b".to_string()]);
    assert!(reservoir.drain().is_empty());

    reservoir.close();
    circuit.close();
}

#[test]
fn test_reservoir_captures_carry_channel_subjects() {
    let circuit = cortex().circuit_named(name("captured.subjects"));
    let conduit: Conduit<Pipe<i32>, i32> = circuit.conduit_named(name("events"), PipeComposer);
    let reservoir = cortex().reservoir(&conduit).unwrap();

    conduit.percept(&name("left")).unwrap().emit(1).unwrap();
    conduit.percept(&name("right")).unwrap().emit(2).unwrap();
    circuit.await_empty().unwrap();

    let captures = reservoir.drain();
    assert_eq!(captures.len(), 2);
    let parts: Vec<String> = captures
        .iter()
        .map(|capture| capture.subject().name().part().to_string())
        .collect();
    assert_eq!(parts, vec!["left".to_string(), "right".to_string()]);

    reservoir.close();
    circuit.close();
}

#[test]
fn test_closed_reservoir_stops_capturing() {
    let circuit = cortex().circuit_named(name("captured.closed"));
    let conduit: Conduit<Pipe<i32>, i32> = circuit.conduit_named(name("events"), PipeComposer);
    let reservoir = cortex().reservoir(&conduit).unwrap();

    let pipe = conduit.percept(&name("stream")).unwrap();
    pipe.emit(1).unwrap();
    circuit.await_empty().unwrap();
    reservoir.close();

    pipe.emit(2).unwrap();
    circuit.await_empty().unwrap();
    assert!(reservoir.drain().is_empty());
    circuit.close();
}

// --- Scope / Closure ---

#[derive(Clone)]
struct TestResource {
    closes: Arc<AtomicUsize>,
}

impl Resource for TestResource {
    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct OrderedResource {
    id: usize,
    order: Arc<Mutex<Vec<usize>>>,
}

impl Resource for OrderedResource {
    fn close(&self) {
        self.order.lock().push(self.id);
    }
}

#[test]
fn test_scope_closes_registered_resources_in_lifo_order() {
    let scope = cortex().scope_named(name("owner"));
    let order = Arc::new(Mutex::new(Vec::new()));
    for id in 1..=3 {
        scope
            .register(OrderedResource {
                id,
                order: order.clone(),
            })
            .unwrap();
    }
    scope.close();
    assert_eq!(*order.lock(), vec![3, 2, 1]);
    // Idempotent.
    scope.close();
    assert_eq!(*order.lock(), vec![3, 2, 1]);
}

#[test]
fn test_scope_cascade() {
    let circuit = cortex().circuit_named(name("scoped"));
    let conduit: Conduit<Pipe<i32>, i32> = circuit.conduit_named(name("values"), PipeComposer);
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let subscriber = cortex().subscriber(
        name("scoped.counter"),
        move |_subject: &Subject, registrar: &mut Registrar<'_, i32>| {
            let counter = counter.clone();
            registrar.register(Pipe::receptor(move |_value| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
            Ok(())
        },
    );
    let subscription = conduit.subscribe(subscriber).unwrap();
    let pipe = conduit.percept(&name("feed")).unwrap();

    let scope = cortex().scope_named(name("owner"));
    scope.register(subscription.clone()).unwrap();
    scope.register(circuit.clone()).unwrap();

    // A closure taken out before the scope closes...
    let closes = Arc::new(AtomicUsize::new(0));
    let closure = scope.closure(TestResource {
        closes: closes.clone(),
    });

    pipe.emit(1).unwrap();
    circuit.await_empty().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    scope.close();

    assert!(subscription.is_closed());
    assert!(circuit.is_closed());
    // The scope released the closure's resource.
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    // Emissions into the closed circuit are dropped.
    pipe.emit(2).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Factory methods on a closed scope fail...
    assert!(scope.scope().is_err());
    assert!(scope
        .register(TestResource {
            closes: Arc::new(AtomicUsize::new(0)),
        })
        .is_err());

    // ...but the outstanding closure is inert, not an error.
    let consumed = Arc::new(AtomicUsize::new(0));
    let ran = consumed.clone();
    closure
        .consume(|_resource| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    assert_eq!(consumed.load(Ordering::SeqCst), 0);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_closure_consumes_once_and_releases() {
    let scope = cortex().scope_named(name("consuming"));
    let closes = Arc::new(AtomicUsize::new(0));
    let closure = scope.closure(TestResource {
        closes: closes.clone(),
    });

    let calls = Arc::new(AtomicUsize::new(0));
    let ran = calls.clone();
    closure
        .consume(|_resource| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(closure.is_spent());

    // Second consume is a no-op; the resource is not closed again.
    let ran = calls.clone();
    closure
        .consume(|_resource| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    scope.close();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_closure_releases_even_when_consumer_fails() {
    let scope = cortex().scope_named(name("failing"));
    let closes = Arc::new(AtomicUsize::new(0));
    let closure = scope.closure(TestResource {
        closes: closes.clone(),
    });

    let outcome = closure.consume(|_resource| {
        Err(SubstratesError::Internal("consumer failed".to_string()))
    });
    assert!(outcome.is_err());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    scope.close();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_child_scopes_close_with_parent() {
    let parent = cortex().scope_named(name("parent"));
    let child = parent.scope_named(name("child")).unwrap();
    assert!(child.within(&parent));
    assert!(!parent.within(&child));

    let closes = Arc::new(AtomicUsize::new(0));
    child
        .register(TestResource {
            closes: closes.clone(),
        })
        .unwrap();

    parent.close();
    assert!(child.is_closed());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(child.scope().is_err());
}

// --- Cell ---

fn collecting_subscriber(sink: Arc<Mutex<Vec<i32>>>) -> Arc<dyn Subscriber<i32>> {
    cortex().subscriber(
        name("cell.sink"),
        move |_subject: &Subject, registrar: &mut Registrar<'_, i32>| {
            let sink = sink.clone();
            registrar.register(Pipe::receptor(move |value| {
                sink.lock().push(value);
                Ok(())
            }));
            Ok(())
        },
    )
}

#[test]
fn test_cell_adapts_ingress_emissions() {
    let circuit = cortex().circuit_named(name("celled"));
    let cell: Cell<i32, i32> = circuit
        .cell(
            name("doubler"),
            FnComposer::new(|channel: &Channel<i32>| {
                Ok(Pipe::transformer(|value: i32| value * 2, channel.pipe()))
            }),
            PipeComposer,
        )
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    cell.subscribe(collecting_subscriber(seen.clone())).unwrap();

    cell.emit(3).unwrap();
    cell.emit(4).unwrap();
    circuit.await_empty().unwrap();

    assert_eq!(*seen.lock(), vec![6, 8]);
    circuit.close();
}

#[test]
fn test_cell_children_are_pooled_by_name() {
    let circuit = cortex().circuit_named(name("celled.pool"));
    let cell: Cell<i32, i32> = circuit
        .cell(name("root"), PipeComposer, PipeComposer)
        .unwrap();

    let first = cell.cell(&name("leaf")).unwrap();
    let second = cell.cell(&name("leaf")).unwrap();
    assert_eq!(first.subject().id(), second.subject().id());

    let other = cell.cell(&name("other")).unwrap();
    assert_ne!(first.subject().id(), other.subject().id());
    circuit.close();
}

/// Descendant emissions climb through each ancestor's outlet; a subscriber
/// on the root observes the whole subtree.
#[test]
fn test_ancestor_observes_descendant_emissions() {
    let circuit = cortex().circuit_named(name("celled.tree"));
    let root: Cell<i32, i32> = circuit
        .cell(name("root"), PipeComposer, PipeComposer)
        .unwrap();
    let child = root.cell(&name("child")).unwrap();
    let grandchild = child.cell(&name("grandchild")).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    root.subscribe(collecting_subscriber(seen.clone())).unwrap();

    root.emit(1).unwrap();
    child.emit(2).unwrap();
    grandchild.emit(3).unwrap();
    circuit.await_empty().unwrap();

    let mut observed = seen.lock().clone();
    observed.sort_unstable();
    assert_eq!(observed, vec![1, 2, 3]);
    circuit.close();
}

// --- Clock ---

#[test]
fn test_clock_ticks_through_the_circuit() {
    let circuit = cortex().circuit_named(name("clocked"));
    let clock = circuit.clock();

    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    let subscription = clock
        .consume(
            name("ticks"),
            ClockCycle::Millisecond,
            Pipe::receptor(move |_tick: chrono::DateTime<chrono::Utc>| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        ticks.load(Ordering::SeqCst) >= 3
    }));

    subscription.close();
    let settled = ticks.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    circuit.await_empty().unwrap();
    // Ticks already in flight may still land, nothing more.
    assert!(ticks.load(Ordering::SeqCst) <= settled + 2);

    clock.close();
    circuit.close();
}

#[test]
fn test_clock_cycle_units() {
    assert_eq!(ClockCycle::Millisecond.units(), 1);
    assert_eq!(ClockCycle::Second.units(), 1000);
    assert_eq!(ClockCycle::Minute.units(), 60_000);
}

// --- Current / Cortex ---

#[test]
fn test_current_is_stable_per_thread() {
    let first = cortex().current();
    let second = cortex().current();
    assert_eq!(first.id(), second.id());
    assert_eq!(first.name(), second.name());

    let local = *first.id();
    let remote = std::thread::spawn(|| *cortex().current().id())
        .join()
        .unwrap();
    assert_ne!(local, remote);
}

#[test]
fn test_cortex_is_a_singleton() {
    let a = cortex().subject().id();
    let b = cortex().subject().id();
    assert_eq!(a, b);
    assert_eq!(cortex().subject().subject_type(), SubjectType::Cortex);
}

#[test]
fn test_cortex_slot_and_state_helpers() {
    let slot = cortex().slot(name("limit"), 10);
    assert_eq!(slot.slot_type(), SlotType::I32);

    let state = cortex().state().state(slot.clone());
    assert_eq!(state.value(&Slot::new(name("limit"), 0)), SlotValue::I32(10));
    // Idempotent reuse of the identical head slot.
    assert!(state.state(slot).same(&state));
}

#[test]
fn test_transformer_pipe_from_cortex() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let lengths = cortex().transformer(
        |text: String| text.len() as i64,
        cortex().pipe(move |length: i64| {
            sink.lock().push(length);
            Ok(())
        }),
    );
    lengths.emit("four".to_string()).unwrap();
    assert_eq!(*seen.lock(), vec![4]);
}
