//! Normalization policy
//!
//! Decides from the source descriptor alone whether a staged artifact goes
//! through the transcode step. The decision is total: every [`SourceKind`]
//! maps to a [`Plan`], and anything not listed as needing normalization
//! (including sources with no extension) passes through unchanged.
//!
//! The signal is the locator's extension, so a source whose content does not
//! match its label is classified by the label.

use crate::config::TranscodeConfig;
use crate::types::{SourceKind, TransferRequest};
use std::collections::HashSet;

/// What to do with a staged artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Plan {
    /// Run the transcode step and deliver its output
    Transcode,
    /// Move the staged artifact to its stable location as-is
    PassThrough,
}

/// Extension-based normalization policy
#[derive(Clone, Debug)]
pub struct NormalizePolicy {
    normalize: HashSet<String>,
}

impl NormalizePolicy {
    /// Policy normalizing exactly the given extensions (case-insensitive, leading dots ignored)
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            normalize: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Policy built from configuration
    pub fn from_config(config: &TranscodeConfig) -> Self {
        Self::new(&config.normalize_extensions)
    }

    /// Plan for a source kind
    pub fn plan_for(&self, kind: &SourceKind) -> Plan {
        match kind.extension() {
            Some(ext) if self.normalize.contains(ext) => Plan::Transcode,
            _ => Plan::PassThrough,
        }
    }

    /// Plan for a request
    pub fn decide(&self, request: &TransferRequest) -> Plan {
        self.plan_for(&request.source_kind())
    }
}

impl Default for NormalizePolicy {
    fn default() -> Self {
        Self::from_config(&TranscodeConfig::default())
    }
}
