//! Checked setup issues and structural validation
//!
//! Setup problems never abort a check pass; they are collected as
//! [`SetupIssue`] values, each with a severity and optional quick fixes.
//! [`validate_structure`] walks a whole process and returns every structural
//! problem it finds (not just the first), in the same spirit.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::operator::{Operator, OperatorKind};
use crate::process::Process;
use crate::registry::OperatorRegistry;
use crate::unit::ExecutionUnit;

/// Severity of a checked setup issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// A checked setup problem, collected rather than thrown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupIssue {
    pub severity: Severity,
    pub message: String,
    /// Zero or more suggested fixes, in display order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixes: Vec<String>,
}

impl SetupIssue {
    /// Error-severity issue.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            fixes: Vec::new(),
        }
    }

    /// Warning-severity issue.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            fixes: Vec::new(),
        }
    }

    /// Attach a suggested fix.
    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }
}

/// Validate the structure of a whole process
///
/// Returns `(operator name, issue)` pairs for every problem found. Pass a
/// registry to also check that every type tag is known. The root chain
/// itself is internal and carries no registered type.
pub fn validate_structure(
    process: &Process,
    registry: Option<&OperatorRegistry>,
) -> Vec<(String, SetupIssue)> {
    let mut found = Vec::new();
    let root = process.root();
    if let OperatorKind::Chain(units) = root.kind() {
        for unit in units {
            validate_unit(root.name(), unit, &mut found);
            for child in unit.operators() {
                validate_operator(child, registry, &mut found);
            }
        }
    }
    found
}

fn validate_operator(
    op: &Operator,
    registry: Option<&OperatorRegistry>,
    found: &mut Vec<(String, SetupIssue)>,
) {
    if let Some(reg) = registry {
        if !reg.has_type(op.type_tag()) {
            found.push((
                op.name().to_string(),
                SetupIssue::error(format!("unknown operator type '{}'", op.type_tag())),
            ));
        }
    }

    if let OperatorKind::Chain(units) = op.kind() {
        for unit in units {
            validate_unit(op.name(), unit, found);
            for child in unit.operators() {
                validate_operator(child, registry, found);
            }
        }
    }
}

fn validate_unit(chain: &str, unit: &ExecutionUnit, found: &mut Vec<(String, SetupIssue)>) {
    let names: HashSet<&str> = unit.operators().iter().map(|o| o.name()).collect();

    // Dangling wiring endpoints
    for conn in unit.wiring() {
        for endpoint in [&conn.from, &conn.to] {
            if let Some(op_name) = &endpoint.operator {
                if !names.contains(op_name.as_str()) {
                    found.push((
                        chain.to_string(),
                        SetupIssue::error(format!(
                            "wiring references unknown operator '{}'",
                            op_name
                        ))
                        .with_fix(format!("remove the connection to '{}'", endpoint.port)),
                    ));
                }
            }
        }
    }

    // Double-wired input ports
    let mut seen: HashSet<(Option<&String>, &str)> = HashSet::new();
    for conn in unit.wiring() {
        if !seen.insert((conn.to.operator.as_ref(), conn.to.port.as_str())) {
            let target = conn
                .to
                .operator
                .clone()
                .unwrap_or_else(|| chain.to_string());
            found.push((
                target,
                SetupIssue::error(format!("input '{}' is wired more than once", conn.to.port)),
            ));
        }
    }

    // Cycles
    if unit.execution_order().is_err() {
        found.push((
            chain.to_string(),
            SetupIssue::error(format!("wiring cycle in unit '{}'", unit.name())),
        ));
    }
}
