//! Interned hierarchical names.
//!
//! Every distinct segment sequence maps to exactly one `Name` instance for the
//! lifetime of the process, so equality is pointer identity and hashing is the
//! hash of that pointer. Names form a tree: `a.b.c` encloses nothing but is
//! enclosed by `a.b`, which is enclosed by `a`.

use crate::types::{SubstratesError, SubstratesResult};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Process-wide canonicalising pool, keyed by the full dotted path.
static POOL: Lazy<RwLock<HashMap<String, Name>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Hierarchical, interned identifier.
#[derive(Clone)]
pub struct Name {
    inner: Arc<NameInner>,
}

struct NameInner {
    enclosure: Option<Name>,
    part: String,
    path: String,
    depth: usize,
}

impl Name {
    pub const SEPARATOR: char = '.';

    /// Interns the name for a dotted path. Empty segments are rejected.
    pub fn of(path: &str) -> SubstratesResult<Self> {
        Self::from_parts(path.split(Self::SEPARATOR))
    }

    /// Interns the name for a sequence of parts; each part may itself be a
    /// dotted path and contributes its segments in order.
    pub fn from_parts<I, S>(parts: I) -> SubstratesResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut current: Option<Name> = None;
        for part in parts {
            for segment in part.as_ref().split(Self::SEPARATOR) {
                if segment.is_empty() {
                    return Err(SubstratesError::InvalidName(
                        "empty name segment".to_string(),
                    ));
                }
                current = Some(Self::extend(current, segment));
            }
        }
        current.ok_or_else(|| {
            SubstratesError::InvalidName("name requires at least one segment".to_string())
        })
    }

    /// Interns a name from a Rust type path, e.g. `substrates::name::Name`
    /// becomes `substrates.name.Name`. Generic arguments are discarded.
    pub fn of_type<T: ?Sized>() -> Self {
        let raw = std::any::type_name::<T>();
        let raw = raw.split('<').next().unwrap_or(raw);
        let mut current: Option<Name> = None;
        for segment in raw.split("::").filter(|segment| !segment.is_empty()) {
            current = Some(Self::extend(current, segment));
        }
        current.unwrap_or_else(|| Self::intern_static("type"))
    }

    /// Interns a name for an enum-like value: the type path extended with
    /// the variant's name.
    pub fn of_enum<T: fmt::Debug + 'static>(variant: &T) -> Self {
        let rendered = format!("{variant:?}");
        let tag: String = rendered
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        let base = Self::of_type::<T>();
        if tag.is_empty() {
            base
        } else {
            Self::extend(Some(base), &tag)
        }
    }

    /// Interns a direct child of this name. The suffix is a single segment.
    pub fn child(&self, suffix: &str) -> SubstratesResult<Self> {
        if suffix.is_empty() || suffix.contains(Self::SEPARATOR) {
            return Err(SubstratesError::InvalidName(format!(
                "child segment must be a single non-empty part: {suffix:?}"
            )));
        }
        Ok(Self::extend(Some(self.clone()), suffix))
    }

    /// Interns a child of this name. The suffix may be a dotted path; its
    /// segments are appended in order.
    pub fn name(&self, suffix: &str) -> SubstratesResult<Self> {
        let mut current = self.clone();
        for segment in suffix.split(Self::SEPARATOR) {
            if segment.is_empty() {
                return Err(SubstratesError::InvalidName(
                    "empty name segment".to_string(),
                ));
            }
            current = Self::extend(Some(current), segment);
        }
        Ok(current)
    }

    /// Concatenates another name's segment sequence onto this one.
    pub fn name_of(&self, other: &Name) -> Self {
        let mut current = self.clone();
        for segment in other.segments() {
            current = Self::extend(Some(current), &segment);
        }
        current
    }

    /// Interns a known-good literal path. Segments must be non-empty.
    pub(crate) fn intern_static(path: &'static str) -> Self {
        let mut current: Option<Name> = None;
        for segment in path.split(Self::SEPARATOR).filter(|segment| !segment.is_empty()) {
            current = Some(Self::extend(current, segment));
        }
        debug_assert!(current.is_some(), "static name must have a segment");
        current.unwrap_or_else(|| Self::extend(None, "name"))
    }

    fn extend(enclosure: Option<Name>, part: &str) -> Self {
        let path = match &enclosure {
            None => part.to_string(),
            Some(parent) => {
                let mut path = String::with_capacity(parent.path().len() + part.len() + 1);
                path.push_str(parent.path());
                path.push(Self::SEPARATOR);
                path.push_str(part);
                path
            }
        };
        if let Some(name) = POOL.read().get(&path) {
            return name.clone();
        }
        let mut pool = POOL.write();
        if let Some(name) = pool.get(&path) {
            return name.clone();
        }
        let depth = enclosure.as_ref().map_or(0, |parent| parent.depth()) + 1;
        let name = Name {
            inner: Arc::new(NameInner {
                enclosure,
                part: part.to_string(),
                path: path.clone(),
                depth,
            }),
        };
        pool.insert(path, name.clone());
        name
    }

    /// The last segment.
    pub fn part(&self) -> &str {
        &self.inner.part
    }

    /// The full dotted path.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// The full path joined with an arbitrary separator.
    pub fn path_with(&self, separator: char) -> String {
        let mut segments = self.segments();
        let mut path = String::with_capacity(self.inner.path.len());
        if let Some(first) = segments.next() {
            path.push_str(&first);
        }
        for segment in segments {
            path.push(separator);
            path.push_str(&segment);
        }
        path
    }

    /// The enclosing (parent) name, if any.
    pub fn enclosure(&self) -> Option<&Name> {
        self.inner.enclosure.as_ref()
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// Iterates from this name up to the root, inclusive.
    pub fn iter(&self) -> NameIter {
        NameIter {
            current: Some(self.clone()),
        }
    }

    fn segments(&self) -> impl Iterator<Item = String> {
        let mut parts: Vec<String> = self.iter().map(|name| name.part().to_string()).collect();
        parts.reverse();
        parts.into_iter()
    }
}

/// Iterator yielding a name and then each of its enclosures, innermost first.
pub struct NameIter {
    current: Option<Name>,
}

impl Iterator for NameIter {
    type Item = Name;

    fn next(&mut self) -> Option<Name> {
        let name = self.current.take()?;
        self.current = name.enclosure().cloned();
        Some(name)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.path().cmp(other.path())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.path())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.path())
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let path = String::deserialize(deserializer)?;
        Name::of(&path).map_err(serde::de::Error::custom)
    }
}
