//! Append-only record of collection units that did not complete

use crate::error::{CallError, ErrorKind};
use crate::models::CollectionUnit;
use serde::Serialize;
use std::collections::BTreeSet;

/// One collection unit that failed or was abandoned
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialFailure {
    pub unit: CollectionUnit,
    pub error_kind: ErrorKind,
    pub attempts: u32,
    pub last_error: String,
}

impl PartialFailure {
    pub fn from_error(unit: CollectionUnit, error: &CallError, attempts: u32) -> Self {
        Self {
            unit,
            error_kind: error.kind(),
            attempts,
            last_error: error.root().to_string(),
        }
    }

    /// Unit still pending when the run was cancelled or timed out
    pub fn abandoned(unit: CollectionUnit, kind: ErrorKind) -> Self {
        let last_error = match kind {
            ErrorKind::DeadlineExceeded => "abandoned at run deadline",
            ErrorKind::Cancelled => "abandoned on cancellation",
            _ => "collection task did not complete",
        };
        Self {
            unit,
            error_kind: kind,
            attempts: 0,
            last_error: last_error.to_string(),
        }
    }
}

/// Failures in the order they were observed
///
/// Order is for debugging only; nothing depends on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PartialFailureLedger {
    entries: Vec<PartialFailure>,
}

impl PartialFailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, failure: PartialFailure) {
        self.entries.push(failure);
    }

    pub fn entries(&self) -> &[PartialFailure] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartialFailure> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Regions with at least one failed unit
    pub fn failed_regions(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|f| f.unit.region.as_str()).collect()
    }
}
