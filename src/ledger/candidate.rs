//! Candidate identity
//!
//! The core never holds a candidate's generating parameters. It keeps an
//! opaque identifier, an optional numeric feature vector, and (through
//! [`CandidateHandle`]) a way to ask the owner of the payload for it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a candidate
///
/// Identifiers are opaque strings (hashes or UUIDs in practice) ordered
/// lexicographically. That order is the deterministic tie-break used across
/// the crate.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    /// Create a new identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CandidateId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CandidateId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for CandidateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A candidate emitted by the generator
///
/// Immutable once registered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Unique identifier for this candidate
    pub id: CandidateId,
    /// Numeric feature vector, when the generator exposes one
    #[serde(default)]
    pub features: Option<Vec<f64>>,
}

impl Candidate {
    /// Create a candidate with no feature vector
    pub fn new(id: impl Into<CandidateId>) -> Self {
        Self {
            id: id.into(),
            features: None,
        }
    }

    /// Create a candidate with a feature vector
    pub fn with_features(id: impl Into<CandidateId>, features: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            features: Some(features),
        }
    }

    /// Dimension of the feature vector (0 when absent)
    pub fn dimension(&self) -> usize {
        self.features.as_ref().map_or(0, Vec::len)
    }
}

/// Lookup capability for candidate payloads owned outside the core
///
/// Implemented by whatever stores generated parameters (a dataset directory,
/// an object store, an in-memory map in tests).
pub trait PayloadSource {
    /// The payload type (parameters, rendered output, ...)
    type Payload;

    /// Fetch the payload for a candidate, if the source knows it
    fn payload(&self, id: &CandidateId) -> Option<Self::Payload>;
}

impl<P: Clone> PayloadSource for std::collections::HashMap<CandidateId, P> {
    type Payload = P;

    fn payload(&self, id: &CandidateId) -> Option<P> {
        self.get(id).cloned()
    }
}

/// An identifier bound to the source able to resolve its payload
#[derive(Debug)]
pub struct CandidateHandle<'a, S: PayloadSource> {
    id: CandidateId,
    source: &'a S,
}

impl<'a, S: PayloadSource> CandidateHandle<'a, S> {
    /// Bind an identifier to a payload source
    pub fn new(id: CandidateId, source: &'a S) -> Self {
        Self { id, source }
    }

    /// The candidate identifier
    pub fn id(&self) -> &CandidateId {
        &self.id
    }

    /// Resolve the payload
    pub fn resolve(&self) -> Option<S::Payload> {
        self.source.payload(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_candidate_id_ordering() {
        let mut ids = vec![CandidateId::from("c"), "a".into(), "b".into()];
        ids.sort();
        assert_eq!(ids, vec!["a".into(), "b".into(), CandidateId::from("c")]);
    }

    #[test]
    fn test_candidate_id_serializes_as_string() {
        let json = serde_json::to_string(&CandidateId::from("abc123")).unwrap();
        assert_eq!(json, "\"abc123\"");
    }

    #[test]
    fn test_candidate_dimension() {
        assert_eq!(Candidate::new("x").dimension(), 0);
        assert_eq!(Candidate::with_features("x", vec![0.1, 0.2]).dimension(), 2);
    }

    #[test]
    fn test_handle_resolves_payload() {
        let mut params: HashMap<CandidateId, Vec<f64>> = HashMap::new();
        params.insert("p1".into(), vec![1.0, 2.0]);

        let handle = CandidateHandle::new("p1".into(), &params);
        assert_eq!(handle.id().as_str(), "p1");
        assert_eq!(handle.resolve(), Some(vec![1.0, 2.0]));

        let missing = CandidateHandle::new("p2".into(), &params);
        assert_eq!(missing.resolve(), None);
    }
}
