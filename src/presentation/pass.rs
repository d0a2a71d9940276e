//! The caller-owned state of one generation pass.
//!
//! A [`Pass`] records, in order, the identifiers of every image tiled for
//! one collection. Canvas order in the manifest is exactly this order, so a
//! pass is created fresh per collection and handed by reference to both the
//! tile generator and the manifest builder; nothing carries over between
//! collections unless the caller reuses the value.
//!
//! Duplicate identifiers are rejected: two canvases for the same pyramid
//! would either show the same image twice or hide that two different sources
//! were tiled into one directory.

use crate::identifier::Identifier;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PassError {
    #[error("identifier '{0}' was already recorded in this pass")]
    DuplicateIdentifier(Identifier),
}

#[derive(Debug, Default, Clone)]
pub struct Pass {
    identifiers: Vec<Identifier>,
    seen: HashSet<Identifier>,
}

impl Pass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `identifier`, failing if it was already recorded.
    pub fn record(&mut self, identifier: Identifier) -> Result<(), PassError> {
        if !self.seen.insert(identifier.clone()) {
            return Err(PassError::DuplicateIdentifier(identifier));
        }
        self.identifiers.push(identifier);
        Ok(())
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.seen.contains(identifier)
    }

    /// Recorded identifiers in recording order.
    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Forget everything recorded so far.
    pub fn reset(&mut self) {
        self.identifiers.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    #[test]
    fn records_in_call_order() {
        let mut pass = Pass::new();
        pass.record(id("p2")).unwrap();
        pass.record(id("p1")).unwrap();
        pass.record(id("p3")).unwrap();

        let order: Vec<&str> = pass.identifiers().iter().map(|i| i.as_str()).collect();
        assert_eq!(order, vec!["p2", "p1", "p3"]);
        assert_eq!(pass.len(), 3);
    }

    #[test]
    fn duplicate_fails_fast_and_keeps_state() {
        let mut pass = Pass::new();
        pass.record(id("p1")).unwrap();

        let err = pass.record(id("p1")).unwrap_err();
        assert_eq!(err, PassError::DuplicateIdentifier(id("p1")));
        assert_eq!(pass.len(), 1);
    }

    #[test]
    fn reset_clears_everything() {
        let mut pass = Pass::new();
        pass.record(id("p1")).unwrap();
        pass.reset();

        assert!(pass.is_empty());
        assert!(!pass.contains(&id("p1")));
        pass.record(id("p1")).unwrap();
        assert_eq!(pass.len(), 1);
    }
}
