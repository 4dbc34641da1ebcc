//! Flow operators: type-preserving, stateful pipeline stages.
//!
//! A `Flow` is a builder; `FlowPipeline` is the installed form. Operator
//! state (diff baselines, counters, accumulators, extrema) lives in the
//! pipeline instance and is shared by every emission routed through that
//! installation. A pipeline installed at conduit scope is therefore shared
//! across all of the conduit's channels.

use crate::pipe::Pipe;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

type Predicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type Comparison<E> = Box<dyn Fn(&E, &E) -> bool + Send + Sync>;
type Comparator<E> = Arc<dyn Fn(&E, &E) -> Ordering + Send + Sync>;
type Operator<E> = Box<dyn Fn(&E, &E) -> E + Send + Sync>;
type Inspector<E> = Box<dyn Fn(&E) + Send + Sync>;
type Transformer<E> = Box<dyn Fn(E) -> E + Send + Sync>;

/// Builder for an operator pipeline. Operators compose in declaration order.
pub struct Flow<E> {
    ops: Vec<FlowOp<E>>,
}

impl<E: Clone + Send + Sync + 'static> Flow<E> {
    pub(crate) fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Suppresses emissions equal to the previously forwarded value. The
    /// first emission is always forwarded.
    pub fn diff(&mut self) -> &mut Self
    where
        E: PartialEq,
    {
        self.ops.push(FlowOp::Diff {
            last: None,
            eq: Box::new(|a, b| a == b),
        });
        self
    }

    /// As [`diff`](Self::diff), with a supplied prior baseline.
    pub fn diff_from(&mut self, initial: E) -> &mut Self
    where
        E: PartialEq,
    {
        self.ops.push(FlowOp::Diff {
            last: Some(initial),
            eq: Box::new(|a, b| a == b),
        });
        self
    }

    /// Forwards only emissions satisfying the predicate.
    pub fn guard<P>(&mut self, predicate: P) -> &mut Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.ops.push(FlowOp::Guard {
            predicate: Box::new(predicate),
        });
        self
    }

    /// Stateful guard comparing each emission against the most recently
    /// forwarded value (the initial value for the first emission).
    pub fn guard_from<P>(&mut self, initial: E, predicate: P) -> &mut Self
    where
        P: Fn(&E, &E) -> bool + Send + Sync + 'static,
    {
        self.ops.push(FlowOp::GuardFrom {
            previous: initial,
            predicate: Box::new(predicate),
        });
        self
    }

    /// Comparator-based range/extrema filter. The builder handed to `build`
    /// is consumed within the call; retain only the configured result.
    pub fn sift<C, B>(&mut self, comparator: C, build: B) -> &mut Self
    where
        C: Fn(&E, &E) -> Ordering + Send + Sync + 'static,
        B: FnOnce(Sift<E>) -> Sift<E>,
    {
        let sift = build(Sift { rules: Vec::new() });
        self.ops.push(FlowOp::Sift {
            comparator: Arc::new(comparator),
            rules: sift.rules,
        });
        self
    }

    /// Forwards every n-th emission, starting at the n-th. `sample(1)`
    /// forwards everything.
    pub fn sample(&mut self, every: u32) -> &mut Self {
        assert!(every >= 1, "sample interval must be at least 1");
        self.ops.push(FlowOp::Sample { every, seen: 0 });
        self
    }

    /// Probabilistic pass with the given rate in `[0, 1]`. The pseudorandom
    /// source is seeded per pipeline instance.
    pub fn sample_rate(&mut self, rate: f64) -> &mut Self {
        assert!(
            (0.0..=1.0).contains(&rate),
            "sample rate must be within [0, 1]"
        );
        self.ops.push(FlowOp::SampleRate {
            rate,
            rng: SmallRng::from_entropy(),
        });
        self
    }

    /// Drops the first `count` emissions. `skip(0)` is the identity.
    pub fn skip(&mut self, count: u64) -> &mut Self {
        self.ops.push(FlowOp::Skip { remaining: count });
        self
    }

    /// Forwards the first `count` emissions, then drops everything.
    pub fn limit(&mut self, count: u64) -> &mut Self {
        self.ops.push(FlowOp::Limit { remaining: count });
        self
    }

    /// Folds emissions into an accumulator and forwards each new total.
    pub fn reduce<F>(&mut self, seed: E, operator: F) -> &mut Self
    where
        F: Fn(&E, &E) -> E + Send + Sync + 'static,
    {
        self.ops.push(FlowOp::Reduce {
            accumulator: seed,
            operator: Box::new(operator),
        });
        self
    }

    /// Side-effect inspection; emissions pass through unchanged.
    pub fn peek<F>(&mut self, inspector: F) -> &mut Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.ops.push(FlowOp::Peek {
            inspector: Box::new(inspector),
        });
        self
    }

    /// Tee: emits each value to the supplied pipe and forwards it unchanged.
    pub fn forward(&mut self, pipe: Pipe<E>) -> &mut Self {
        self.ops.push(FlowOp::Forward { pipe });
        self
    }

    /// Forwards the transformed value.
    pub fn replace<F>(&mut self, transformer: F) -> &mut Self
    where
        F: Fn(E) -> E + Send + Sync + 'static,
    {
        self.ops.push(FlowOp::Replace {
            transformer: Box::new(transformer),
        });
        self
    }

    pub(crate) fn into_pipeline(self) -> FlowPipeline<E> {
        FlowPipeline { ops: self.ops }
    }
}

impl<E> fmt::Debug for Flow<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow").field("ops", &self.ops.len()).finish()
    }
}

/// Comparator-based filter configuration. All configured rules must pass for
/// an emission to be forwarded.
pub struct Sift<E> {
    rules: Vec<SiftRule<E>>,
}

impl<E> Sift<E> {
    /// Passes values strictly above the lower bound.
    pub fn above(mut self, lower: E) -> Self {
        self.rules.push(SiftRule::Above(lower));
        self
    }

    /// Passes values strictly below the upper bound.
    pub fn below(mut self, upper: E) -> Self {
        self.rules.push(SiftRule::Below(upper));
        self
    }

    /// Passes values at or above the minimum.
    pub fn min(mut self, min: E) -> Self {
        self.rules.push(SiftRule::Min(min));
        self
    }

    /// Passes values at or below the maximum.
    pub fn max(mut self, max: E) -> Self {
        self.rules.push(SiftRule::Max(max));
        self
    }

    /// Passes values within the inclusive range.
    pub fn range(mut self, lower: E, upper: E) -> Self {
        self.rules.push(SiftRule::Range(lower, upper));
        self
    }

    /// Passes only values exceeding every previously passed value.
    pub fn high(mut self) -> Self {
        self.rules.push(SiftRule::High(None));
        self
    }

    /// Passes only values beneath every previously passed value.
    pub fn low(mut self) -> Self {
        self.rules.push(SiftRule::Low(None));
        self
    }
}

enum SiftRule<E> {
    Above(E),
    Below(E),
    Min(E),
    Max(E),
    Range(E, E),
    High(Option<E>),
    Low(Option<E>),
}

/// The installed form of a flow: an ordered list of stateful operators.
pub(crate) struct FlowPipeline<E> {
    ops: Vec<FlowOp<E>>,
}

impl<E: Clone + Send + Sync + 'static> FlowPipeline<E> {
    /// Runs an emission through the operators in declaration order; `None`
    /// means the emission was suppressed.
    pub(crate) fn apply(&mut self, emission: E) -> Option<E> {
        let mut value = emission;
        for op in &mut self.ops {
            value = op.apply(value)?;
        }
        Some(value)
    }
}

enum FlowOp<E> {
    Diff {
        last: Option<E>,
        eq: Comparison<E>,
    },
    Guard {
        predicate: Predicate<E>,
    },
    GuardFrom {
        previous: E,
        predicate: Comparison<E>,
    },
    Sift {
        comparator: Comparator<E>,
        rules: Vec<SiftRule<E>>,
    },
    Sample {
        every: u32,
        seen: u32,
    },
    SampleRate {
        rate: f64,
        rng: SmallRng,
    },
    Skip {
        remaining: u64,
    },
    Limit {
        remaining: u64,
    },
    Reduce {
        accumulator: E,
        operator: Operator<E>,
    },
    Peek {
        inspector: Inspector<E>,
    },
    Forward {
        pipe: Pipe<E>,
    },
    Replace {
        transformer: Transformer<E>,
    },
}

impl<E: Clone + Send + Sync + 'static> FlowOp<E> {
    fn apply(&mut self, value: E) -> Option<E> {
        match self {
            FlowOp::Diff { last, eq } => {
                if let Some(previous) = last {
                    if eq(previous, &value) {
                        return None;
                    }
                }
                *last = Some(value.clone());
                Some(value)
            }
            FlowOp::Guard { predicate } => predicate(&value).then_some(value),
            FlowOp::GuardFrom {
                previous,
                predicate,
            } => {
                if predicate(previous, &value) {
                    *previous = value.clone();
                    Some(value)
                } else {
                    None
                }
            }
            FlowOp::Sift { comparator, rules } => {
                for rule in rules.iter_mut() {
                    if !rule.admits(comparator, &value) {
                        return None;
                    }
                }
                Some(value)
            }
            FlowOp::Sample { every, seen } => {
                *seen += 1;
                if *seen >= *every {
                    *seen = 0;
                    Some(value)
                } else {
                    None
                }
            }
            FlowOp::SampleRate { rate, rng } => (rng.gen::<f64>() < *rate).then_some(value),
            FlowOp::Skip { remaining } => {
                if *remaining > 0 {
                    *remaining -= 1;
                    None
                } else {
                    Some(value)
                }
            }
            FlowOp::Limit { remaining } => {
                if *remaining > 0 {
                    *remaining -= 1;
                    Some(value)
                } else {
                    None
                }
            }
            FlowOp::Reduce {
                accumulator,
                operator,
            } => {
                let next = operator(accumulator, &value);
                *accumulator = next.clone();
                Some(next)
            }
            FlowOp::Peek { inspector } => {
                inspector(&value);
                Some(value)
            }
            FlowOp::Forward { pipe } => {
                if let Err(error) = pipe.emit(value.clone()) {
                    tracing::error!(pipe = %pipe.subject().path(), %error, "forward pipe failed");
                }
                Some(value)
            }
            FlowOp::Replace { transformer } => Some(transformer(value)),
        }
    }
}

impl<E> SiftRule<E> {
    fn admits(&mut self, comparator: &Comparator<E>, value: &E) -> bool
    where
        E: Clone,
    {
        match self {
            SiftRule::Above(lower) => comparator(value, lower) == Ordering::Greater,
            SiftRule::Below(upper) => comparator(value, upper) == Ordering::Less,
            SiftRule::Min(min) => comparator(value, min) != Ordering::Less,
            SiftRule::Max(max) => comparator(value, max) != Ordering::Greater,
            SiftRule::Range(lower, upper) => {
                comparator(value, lower) != Ordering::Less
                    && comparator(value, upper) != Ordering::Greater
            }
            SiftRule::High(best) => match best {
                Some(current) if comparator(value, current) != Ordering::Greater => false,
                _ => {
                    *best = Some(value.clone());
                    true
                }
            },
            SiftRule::Low(best) => match best {
                Some(current) if comparator(value, current) != Ordering::Less => false,
                _ => {
                    *best = Some(value.clone());
                    true
                }
            },
        }
    }
}
