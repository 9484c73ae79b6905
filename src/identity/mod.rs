// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resource and task identifiers.
//!
//! At the boundary to the schema layer a resource is always one opaque string.
//! Resources addressed by several remote identifiers (an instance plus a
//! listener, a zone plus a rule) keep those parts in a [`CompositeId`] and only
//! join them when the identifier leaves the crate.
//!
//! # Example
//!
//! ```
//! use cloud_reconcile::identity::CompositeId;
//!
//! let id = CompositeId::new(["lb-123", "lsn-456"]);
//! assert_eq!(id.encode(), "lb-123#lsn-456");
//!
//! let parsed = CompositeId::decode_exact("lb-123#lsn-456", 2).unwrap();
//! assert_eq!(parsed.part(1), Some("lsn-456"));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ReconcileError, Result};

/// Separator between the parts of a composite identifier.
pub const FIELD_SEPARATOR: char = '#';

/// Opaque identity of a remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a resource id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the id, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<CompositeId> for ResourceId {
    fn from(id: CompositeId) -> Self {
        Self(id.encode())
    }
}

/// Opaque handle for a long-running remote operation (flow id, request id,
/// async job id).
///
/// Handles live only between submission and the terminal task state; they are
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle(String);

impl TaskHandle {
    /// Create a task handle.
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Borrow the handle as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskHandle {
    fn from(handle: &str) -> Self {
        Self::new(handle)
    }
}

impl From<String> for TaskHandle {
    fn from(handle: String) -> Self {
        Self(handle)
    }
}

impl From<i64> for TaskHandle {
    fn from(flow_id: i64) -> Self {
        Self(flow_id.to_string())
    }
}

impl From<u64> for TaskHandle {
    fn from(flow_id: u64) -> Self {
        Self(flow_id.to_string())
    }
}

/// Identifier made of several remote identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeId {
    parts: Vec<String>,
}

impl CompositeId {
    /// Build a composite id from its parts.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// Join the parts with [`FIELD_SEPARATOR`].
    #[must_use]
    pub fn encode(&self) -> String {
        self.parts.join(&FIELD_SEPARATOR.to_string())
    }

    /// Split an encoded id into its parts.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::InvalidIdentifier`] if the id is empty or any
    /// part is empty.
    pub fn decode(encoded: &str) -> Result<Self> {
        if encoded.is_empty() {
            return Err(ReconcileError::InvalidIdentifier(
                "identifier is empty".to_string(),
            ));
        }

        let parts: Vec<String> = encoded.split(FIELD_SEPARATOR).map(str::to_string).collect();
        if parts.iter().any(String::is_empty) {
            return Err(ReconcileError::InvalidIdentifier(format!(
                "`{encoded}` contains an empty part"
            )));
        }

        Ok(Self { parts })
    }

    /// Split an encoded id that must have exactly `arity` parts.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::InvalidIdentifier`] if the id does not decode
    /// or has a different number of parts.
    pub fn decode_exact(encoded: &str, arity: usize) -> Result<Self> {
        let id = Self::decode(encoded)?;
        if id.parts.len() != arity {
            return Err(ReconcileError::InvalidIdentifier(format!(
                "`{encoded}` has {} part(s), expected {arity}",
                id.parts.len()
            )));
        }
        Ok(id)
    }

    /// Get a part by position.
    #[must_use]
    pub fn part(&self, index: usize) -> Option<&str> {
        self.parts.get(index).map(String::as_str)
    }

    /// All parts in order.
    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Number of parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the id has no parts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for CompositeId {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

impl TryFrom<&ResourceId> for CompositeId {
    type Error = ReconcileError;

    fn try_from(id: &ResourceId) -> Result<Self> {
        Self::decode(id.as_str())
    }
}
