//! Remote keys and temporary key generation.
//!
//! A [`RemoteKey`] is the only thing this crate holds locally for a column,
//! dataset or model: the artifact itself lives on the cluster. Keys are
//! unique in the cluster's key space at a point in time only; a deleted key
//! may be handed out again later.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, ProxyResult};

/// Default prefix for temporary staging artifacts.
pub const DEFAULT_TEMP_PREFIX: &str = "tmp_stage";

/// Opaque identifier of an artifact stored on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteKey(String);

impl RemoteKey {
    /// Create a key from caller-supplied text.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the name is empty or only whitespace.
    pub fn new(name: impl Into<String>) -> ProxyResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ProxyError::invalid_input("remote key must not be empty"));
        }
        Ok(Self(name))
    }

    /// Wrap a key exactly as the cluster reported it.
    pub fn from_cluster(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the underlying name.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RemoteKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generates names for temporary artifacts.
///
/// Names have the form `{prefix}_{session}_{n}`. The session tag is drawn
/// from a random UUID once per generator, so two processes (or two
/// generators in one process) do not collide, and the counter is atomic so
/// a generator can be shared between threads.
#[derive(Debug)]
pub struct TempKeyGenerator {
    prefix: String,
    session: String,
    counter: AtomicU64,
}

impl TempKeyGenerator {
    /// Create a generator with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = if prefix.is_empty() {
            DEFAULT_TEMP_PREFIX.to_string()
        } else {
            prefix
        };
        let session = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();

        Self {
            prefix,
            session,
            counter: AtomicU64::new(0),
        }
    }

    /// Mint the next temporary key.
    pub fn next_key(&self) -> RemoteKey {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        RemoteKey(format!("{}_{}_{}", self.prefix, self.session, n))
    }

    /// Whether `key` was minted by this generator.
    pub fn is_temporary(&self, key: &RemoteKey) -> bool {
        key.as_str()
            .strip_prefix(&self.prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.strip_prefix(self.session.as_str()))
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    }

    /// The prefix in use.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of keys minted so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for TempKeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_TEMP_PREFIX)
    }
}
