// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Classifier: the tag set used as the resolution key.
//!
//! Keys are kept sorted so equality, hashing, and the serialized request body
//! are independent of insertion order. Values are exact tags: no trimming,
//! no case folding.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical name of the topic or queue.
pub const NAME: &str = "name";
/// Namespace the topology belongs to.
pub const NAMESPACE: &str = "namespace";
/// Tenant scope for tenant-specific topology.
pub const TENANT_ID: &str = "tenantId";

/// Ordered mapping of tag name to tag value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Classifier {
    keys: BTreeMap<String, String>,
}

impl Classifier {
    /// Classifier with only the `name` tag set.
    pub fn new(name: impl Into<String>) -> Self {
        Self::default().with(NAME, name)
    }

    /// Set a tag, replacing any previous value for the key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.keys.insert(key.into(), value.into());
        self
    }

    pub fn with_namespace(self, namespace: impl Into<String>) -> Self {
        self.with(NAMESPACE, namespace)
    }

    pub fn with_tenant_id(self, tenant_id: impl Into<String>) -> Self {
        self.with(TENANT_ID, tenant_id)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.keys.get(key).map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.get(NAME)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.get(NAMESPACE)
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.get(TENANT_ID)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keys.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Fill in `namespace` when the caller did not set one.
    ///
    /// An explicit namespace on the classifier always wins.
    pub fn or_namespace(self, namespace: &str) -> Self {
        if self.contains_key(NAMESPACE) {
            self
        } else {
            self.with_namespace(namespace)
        }
    }

    /// True when every tag of `self` is present with the same value in `other`.
    pub fn is_subset_of(&self, other: &Classifier) -> bool {
        self.keys.iter().all(|(k, v)| other.keys.get(k) == Some(v))
    }
}

impl<K, V> FromIterator<(K, V)> for Classifier
where
    K: Into<String>,
    V: Into<String>,
{
    /// Duplicate keys resolve last-write-wins.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let keys = iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { keys }
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Classifier
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl fmt::Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;
