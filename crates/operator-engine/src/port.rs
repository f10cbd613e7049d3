//! Input and output ports
//!
//! Ports are the connection endpoints of an operator. Each port caches the
//! payload written during the current execution pass and the metadata
//! published during the last check pass. The link between ports lives in the
//! owning execution unit's wiring table, not in the ports themselves.

use serde_json::Value;

use crate::meta::{DataKind, Metadata};
use crate::validation::SetupIssue;

/// A payload cached on a port, stamped with the operator that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct IoPayload {
    pub value: Value,
    /// Provenance: the operator that produced this payload, once stamped
    pub produced_by: Option<String>,
}

impl IoPayload {
    /// Fresh, unstamped payload.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            produced_by: None,
        }
    }

    /// Payload already stamped with its producer.
    pub fn stamped(value: Value, operator: impl Into<String>) -> Self {
        Self {
            value,
            produced_by: Some(operator.into()),
        }
    }

    /// Stamp the producer if no stamp is present yet.
    pub fn stamp(&mut self, operator: &str) {
        if self.produced_by.is_none() {
            self.produced_by = Some(operator.to_string());
        }
    }
}

/// An input port: receives at most one connection
#[derive(Debug, Clone)]
pub struct InputPort {
    pub name: String,
    /// Declared requirement: the kind this port expects (the precondition)
    pub kind: DataKind,
    /// Optional ports tolerate an absent connection
    pub optional: bool,
    /// Payload staged for the current execution pass
    pub data: Option<IoPayload>,
    /// Metadata received during the last check pass
    pub metadata: Option<Metadata>,
    /// Metadata errors collected during the last check pass
    pub errors: Vec<SetupIssue>,
}

impl InputPort {
    pub fn new(name: impl Into<String>, kind: DataKind, optional: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            optional,
            data: None,
            metadata: None,
            errors: Vec::new(),
        }
    }

    /// Evaluate this port's precondition against the state of the last
    /// check pass. `connected` says whether the wiring table has a source
    /// for this port; `self.metadata` is whatever that source published.
    pub fn check_precondition(&mut self, connected: bool) {
        if !connected {
            if !self.optional {
                self.errors.push(
                    SetupIssue::error(format!("input '{}' is not connected", self.name))
                        .with_fix(format!("connect a {:?} output to '{}'", self.kind, self.name)),
                );
            }
            return;
        }
        match &self.metadata {
            None => {
                self.errors.push(SetupIssue::error(format!(
                    "no metadata delivered on input '{}'",
                    self.name
                )));
            }
            Some(meta) => {
                if !meta.kind.satisfies(&self.kind) {
                    self.errors.push(
                        SetupIssue::error(format!(
                            "input '{}' expects {:?} but receives {:?}",
                            self.name, self.kind, meta.kind
                        ))
                        .with_fix("connect a compatible output".to_string()),
                    );
                }
            }
        }
    }

    /// Drop cached data, metadata and errors (start of a check pass).
    pub fn clear_check_state(&mut self) {
        self.metadata = None;
        self.errors.clear();
    }
}

/// An output port: may fan out to any number of downstream inputs
#[derive(Debug, Clone)]
pub struct OutputPort {
    pub name: String,
    /// Declared kind this port delivers
    pub kind: DataKind,
    /// Payload written by the current execution pass
    pub data: Option<IoPayload>,
    /// Metadata published during the last check pass
    pub metadata: Option<Metadata>,
    /// Metadata errors collected during the last check pass
    pub errors: Vec<SetupIssue>,
}

impl OutputPort {
    pub fn new(name: impl Into<String>, kind: DataKind) -> Self {
        Self {
            name: name.into(),
            kind,
            data: None,
            metadata: None,
            errors: Vec::new(),
        }
    }

    /// Drop metadata and errors (start of a check pass).
    pub fn clear_check_state(&mut self) {
        self.metadata = None;
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Severity;

    #[test]
    fn test_stamp_only_once() {
        let mut payload = IoPayload::new(serde_json::json!(42));
        payload.stamp("first");
        payload.stamp("second");
        assert_eq!(payload.produced_by.as_deref(), Some("first"));
    }

    #[test]
    fn test_unconnected_required_input_is_an_error() {
        let mut port = InputPort::new("table", DataKind::Table, false);
        port.check_precondition(false);
        assert_eq!(port.errors.len(), 1);
        assert_eq!(port.errors[0].severity, Severity::Error);
        assert!(!port.errors[0].fixes.is_empty());
    }

    #[test]
    fn test_unconnected_optional_input_is_fine() {
        let mut port = InputPort::new("through", DataKind::Any, true);
        port.check_precondition(false);
        assert!(port.errors.is_empty());
    }

    #[test]
    fn test_incompatible_metadata_is_an_error() {
        let mut port = InputPort::new("table", DataKind::Table, false);
        port.metadata = Some(Metadata::of(DataKind::Number));
        port.check_precondition(true);
        assert_eq!(port.errors.len(), 1);
    }

    #[test]
    fn test_capability_compatible_metadata_passes() {
        let mut port = InputPort::new("table", DataKind::Table, false);
        port.metadata = Some(Metadata::of(DataKind::SparseTable));
        port.check_precondition(true);
        assert!(port.errors.is_empty());
    }
}
