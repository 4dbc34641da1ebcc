//! Persistent state: immutable lists of typed, named slots.
//!
//! A `State` is a singly linked list of `Slot`s with the most recent slot at
//! the head. Prepending shares the tail, so every revision of a subject's
//! state is a cheap O(1) extension of the previous one.

use crate::name::Name;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Type tag carried by every slot. Primitive tags are distinct from the
/// reference tags (`String`, `Name`, `State`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotType {
    Bool,
    I32,
    I64,
    F32,
    F64,
    String,
    Name,
    State,
}

impl SlotType {
    pub fn is_primitive(&self) -> bool {
        !matches!(self, SlotType::String | SlotType::Name | SlotType::State)
    }
}

/// A typed slot value.
#[derive(Debug, Clone)]
pub enum SlotValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(Arc<str>),
    Name(Name),
    State(State),
}

impl SlotValue {
    pub fn slot_type(&self) -> SlotType {
        match self {
            SlotValue::Bool(_) => SlotType::Bool,
            SlotValue::I32(_) => SlotType::I32,
            SlotValue::I64(_) => SlotType::I64,
            SlotValue::F32(_) => SlotType::F32,
            SlotValue::F64(_) => SlotType::F64,
            SlotValue::String(_) => SlotType::String,
            SlotValue::Name(_) => SlotType::Name,
            SlotValue::State(_) => SlotType::State,
        }
    }
}

impl PartialEq for SlotValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SlotValue::Bool(a), SlotValue::Bool(b)) => a == b,
            (SlotValue::I32(a), SlotValue::I32(b)) => a == b,
            (SlotValue::I64(a), SlotValue::I64(b)) => a == b,
            (SlotValue::F32(a), SlotValue::F32(b)) => a == b,
            (SlotValue::F64(a), SlotValue::F64(b)) => a == b,
            (SlotValue::String(a), SlotValue::String(b)) => a == b,
            (SlotValue::Name(a), SlotValue::Name(b)) => a == b,
            (SlotValue::State(a), SlotValue::State(b)) => a.same(b),
            _ => false,
        }
    }
}

impl fmt::Display for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotValue::Bool(v) => write!(f, "{v}"),
            SlotValue::I32(v) => write!(f, "{v}"),
            SlotValue::I64(v) => write!(f, "{v}"),
            SlotValue::F32(v) => write!(f, "{v}"),
            SlotValue::F64(v) => write!(f, "{v}"),
            SlotValue::String(v) => write!(f, "{v}"),
            SlotValue::Name(v) => write!(f, "{v}"),
            SlotValue::State(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for SlotValue {
    fn from(value: bool) -> Self {
        SlotValue::Bool(value)
    }
}

impl From<i32> for SlotValue {
    fn from(value: i32) -> Self {
        SlotValue::I32(value)
    }
}

impl From<i64> for SlotValue {
    fn from(value: i64) -> Self {
        SlotValue::I64(value)
    }
}

impl From<f32> for SlotValue {
    fn from(value: f32) -> Self {
        SlotValue::F32(value)
    }
}

impl From<f64> for SlotValue {
    fn from(value: f64) -> Self {
        SlotValue::F64(value)
    }
}

impl From<&str> for SlotValue {
    fn from(value: &str) -> Self {
        SlotValue::String(Arc::from(value))
    }
}

impl From<String> for SlotValue {
    fn from(value: String) -> Self {
        SlotValue::String(Arc::from(value.as_str()))
    }
}

impl From<Name> for SlotValue {
    fn from(value: Name) -> Self {
        SlotValue::Name(value)
    }
}

impl From<State> for SlotValue {
    fn from(value: State) -> Self {
        SlotValue::State(value)
    }
}

/// A named, typed value. A slot doubles as a lookup template: its name and
/// type select matching slots, and its value is the default when none match.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    name: Name,
    value: SlotValue,
}

impl Slot {
    pub fn new(name: Name, value: impl Into<SlotValue>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }

    /// Builds a slot for an enum-like value: the slot name is the name of the
    /// type, the value is the interned name of the variant.
    pub fn of_enum<T: fmt::Debug + 'static>(variant: &T) -> Self {
        Self {
            name: Name::of_type::<T>(),
            value: SlotValue::Name(Name::of_enum(variant)),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn value(&self) -> &SlotValue {
        &self.value
    }

    pub fn slot_type(&self) -> SlotType {
        self.value.slot_type()
    }

    /// True when the other slot has the same (interned) name and type tag.
    pub fn matches(&self, other: &Slot) -> bool {
        self.name == other.name && self.slot_type() == other.slot_type()
    }

    fn slot_eq(&self, other: &Slot) -> bool {
        self.matches(other) && self.value == other.value
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

struct Node {
    slot: Slot,
    next: Option<Arc<Node>>,
}

/// Immutable, persistent list of slots; head is the most recent.
#[derive(Clone, Default)]
pub struct State {
    head: Option<Arc<Node>>,
    len: usize,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a state with the slot prepended. When the slot equals the
    /// current head (same name, type and value) the receiver is returned
    /// unchanged, making repeated identical updates free.
    pub fn state(&self, slot: Slot) -> State {
        if let Some(head) = &self.head {
            if head.slot.slot_eq(&slot) {
                return self.clone();
            }
        }
        State {
            head: Some(Arc::new(Node {
                slot,
                next: self.head.clone(),
            })),
            len: self.len + 1,
        }
    }

    pub fn with(&self, name: Name, value: impl Into<SlotValue>) -> State {
        self.state(Slot::new(name, value))
    }

    pub fn with_enum<T: fmt::Debug + 'static>(&self, variant: &T) -> State {
        self.state(Slot::of_enum(variant))
    }

    /// Head-first scan for the first slot matching the template's name and
    /// type; falls back to the template's own value.
    pub fn value(&self, template: &Slot) -> SlotValue {
        self.iter()
            .find(|slot| slot.matches(template))
            .map(|slot| slot.value().clone())
            .unwrap_or_else(|| template.value().clone())
    }

    /// All matching slot values, newest first.
    pub fn values<'a>(&'a self, template: &'a Slot) -> impl Iterator<Item = &'a SlotValue> + 'a {
        self.iter()
            .filter(|slot| slot.matches(template))
            .map(|slot| slot.value())
    }

    /// Iterates the slots head-first.
    pub fn iter(&self) -> StateIter<'_> {
        StateIter {
            node: self.head.as_deref(),
        }
    }

    /// Retains only the head-most slot per distinct (name, type) key.
    pub fn compact(&self) -> State {
        let mut seen: HashSet<(Name, SlotType)> = HashSet::new();
        let mut kept: Vec<Slot> = Vec::new();
        for slot in self.iter() {
            if seen.insert((slot.name().clone(), slot.slot_type())) {
                kept.push(slot.clone());
            }
        }
        let mut compacted = State::new();
        for slot in kept.into_iter().rev() {
            compacted = compacted.state(slot);
        }
        compacted
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reference equality on the underlying list.
    pub fn same(&self, other: &State) -> bool {
        match (&self.head, &other.head) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Head-first slot iterator.
pub struct StateIter<'a> {
    node: Option<&'a Node>,
}

impl<'a> Iterator for StateIter<'a> {
    type Item = &'a Slot;

    fn next(&mut self) -> Option<&'a Slot> {
        let node = self.node?;
        self.node = node.next.as_deref();
        Some(&node.slot)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
