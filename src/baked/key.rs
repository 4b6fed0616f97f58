//! Cache keys for baked pipelines.
//!
//! A key is the ordered concatenation of initial discriminators, the seed
//! id, and for every step its id followed by its discriminators. Nested
//! eager-load plans extend their parent's key with a path part. Parameter
//! values never enter a key.

use super::StepId;
use crate::strategies::LoadPath;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Extra discriminator supplied alongside a step
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyArg {
    Bool(bool),
    Int(i64),
    Str(String),
    /// One flag per position, e.g. which identity components are null
    Flags(Vec<bool>),
}

impl From<bool> for KeyArg {
    fn from(v: bool) -> Self {
        KeyArg::Bool(v)
    }
}

impl From<i64> for KeyArg {
    fn from(v: i64) -> Self {
        KeyArg::Int(v)
    }
}

impl From<&str> for KeyArg {
    fn from(v: &str) -> Self {
        KeyArg::Str(v.to_string())
    }
}

impl From<String> for KeyArg {
    fn from(v: String) -> Self {
        KeyArg::Str(v)
    }
}

impl From<Vec<bool>> for KeyArg {
    fn from(v: Vec<bool>) -> Self {
        KeyArg::Flags(v)
    }
}

impl fmt::Display for KeyArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyArg::Bool(b) => write!(f, "{b}"),
            KeyArg::Int(i) => write!(f, "{i}"),
            KeyArg::Str(s) => write!(f, "'{s}'"),
            KeyArg::Flags(flags) => {
                write!(f, "(")?;
                for (i, flag) in flags.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{flag}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Step(StepId),
    Arg(KeyArg),
    /// Eager-load path of a nested plan
    Path(String),
}

/// Order-sensitive identity of a pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<KeyPart>);

impl CacheKey {
    pub fn new() -> Self {
        CacheKey(Vec::new())
    }

    /// Key seeded with initial discriminators
    pub fn from_args(args: &[KeyArg]) -> Self {
        CacheKey(args.iter().cloned().map(KeyPart::Arg).collect())
    }

    pub fn push_step(&mut self, id: &StepId, args: &[KeyArg]) {
        self.0.push(KeyPart::Step(id.clone()));
        self.0.extend(args.iter().cloned().map(KeyPart::Arg));
    }

    /// Key of the nested plan loading `path` under this one
    pub fn with_path(&self, path: &LoadPath) -> CacheKey {
        let mut parts = self.0.clone();
        parts.push(KeyPart::Path(path.to_string()));
        CacheKey(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short hash for log fields
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match part {
                KeyPart::Step(id) => write!(f, "{id}")?,
                KeyPart::Arg(arg) => write!(f, "{arg}")?,
                KeyPart::Path(path) => write!(f, "@{path}")?,
            }
        }
        write!(f, "]")
    }
}
