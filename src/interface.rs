//! Typed program interfaces
//!
//! A [`ProgramInterface`] declares everything a compute program expects
//! from the host: its push-constant layout and its binding slots. Passing
//! one explicitly at construction is the preferred path; the
//! [`InterfaceRegistry`] covers the legacy construct-by-name path, keyed
//! by exact logical program name. An unknown name yields an empty
//! interface, which surfaces as a slot-not-found error on the first bind
//! rather than a silent default.

use std::collections::HashMap;

use crate::binding::BindingList;
use crate::uniform::UniformSet;

/// The declared host-visible interface of one compute program
#[derive(Clone, Debug, Default)]
pub struct ProgramInterface {
    pub uniforms: UniformSet,
    pub bindings: BindingList,
}

impl ProgramInterface {
    pub fn new(uniforms: UniformSet, bindings: BindingList) -> Self {
        Self { uniforms, bindings }
    }

    /// An interface with no uniforms and no bindings
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Registry of program interfaces keyed by logical program name
///
/// Lookups match the full name only, never substrings of it.
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    map: HashMap<String, ProgramInterface>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, interface: ProgramInterface) {
        self.map.insert(name.into(), interface);
    }

    /// The interface registered for `name`, or an empty interface when the
    /// name is unknown.
    pub fn lookup(&self, name: &str) -> ProgramInterface {
        self.map.get(name).cloned().unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }
}
