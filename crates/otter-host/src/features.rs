//! Feature flags of a simulated browser configuration.
//!
//! The class catalog gates classes, members and aliases with an
//! [`Availability`] predicate evaluated against a [`FeatureFlags`] provider.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::HostResult;

/// Answers whether a simulated configuration has a feature.
///
/// Providers are read-only once graph building starts.
pub trait FeatureFlags: Send + Sync {
    fn has_feature(&self, id: &str) -> bool;
}

/// A set of enabled feature ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagSet {
    enabled: BTreeSet<String>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style enable.
    pub fn with(mut self, id: impl Into<String>) -> Self {
        self.enabled.insert(id.into());
        self
    }

    pub fn enable(&mut self, id: impl Into<String>) {
        self.enabled.insert(id.into());
    }

    pub fn disable(&mut self, id: &str) {
        self.enabled.remove(id);
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.enabled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }

    /// Parse a JSON array of feature ids.
    pub fn from_json_str(json: &str) -> HostResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl FeatureFlags for FlagSet {
    fn has_feature(&self, id: &str) -> bool {
        self.enabled.contains(id)
    }
}

impl<S: Into<String>> FromIterator<S> for FlagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            enabled: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Applicability predicate over feature flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Availability {
    #[default]
    Always,
    /// Feature must be enabled
    Feature(String),
    /// Feature must be disabled
    Unless(String),
    All(Vec<Availability>),
    Any(Vec<Availability>),
}

impl Availability {
    pub fn feature(id: impl Into<String>) -> Self {
        Self::Feature(id.into())
    }

    pub fn unless(id: impl Into<String>) -> Self {
        Self::Unless(id.into())
    }

    pub fn is_satisfied(&self, flags: &dyn FeatureFlags) -> bool {
        match self {
            Self::Always => true,
            Self::Feature(id) => flags.has_feature(id),
            Self::Unless(id) => !flags.has_feature(id),
            Self::All(all) => all.iter().all(|a| a.is_satisfied(flags)),
            Self::Any(any) => any.iter().any(|a| a.is_satisfied(flags)),
        }
    }
}
