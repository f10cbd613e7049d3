//! Metadata model and transformer rules
//!
//! During the check pass every operator publishes [`Metadata`] on its output
//! ports without running the real computation. Downstream preconditions are
//! evaluated against that published metadata, so incompatibilities surface
//! before anything executes.
//!
//! Kind checking is two-tier: an exact kind always satisfies itself, and a
//! capability-compatible kind (any table-like payload where a plain table is
//! required) satisfies the looser requirement as well.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The kind of payload a port carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Accepts or produces anything
    Any,
    /// Row-oriented table
    Table,
    /// Table with mostly-empty cells, stored sparsely
    SparseTable,
    /// A single column of values
    Column,
    /// Scalar number
    Number,
    /// Text string
    Text,
    /// Fitted model handle
    Model,
    /// Arbitrary JSON object
    Json,
}

impl DataKind {
    /// Whether this kind carries tabular data.
    pub fn is_table_like(&self) -> bool {
        matches!(self, DataKind::Table | DataKind::SparseTable)
    }

    /// Whether a payload of this kind satisfies a port requiring `required`.
    ///
    /// `Any` on either side always matches. A `Table` requirement is the
    /// capability tier: any table-like kind satisfies it. Everything else
    /// is an exact match.
    pub fn satisfies(&self, required: &DataKind) -> bool {
        if matches!(self, DataKind::Any) || matches!(required, DataKind::Any) {
            return true;
        }
        if matches!(required, DataKind::Table) && self.is_table_like() {
            return true;
        }
        self == required
    }
}

/// Metadata published on a port during the check pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Kind of the payload the port will deliver at execution time
    pub kind: DataKind,
    /// Name of the operator that generated this metadata, if stamped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_by: Option<String>,
    /// Free-form annotations (column names, row count hints, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

impl Metadata {
    /// Metadata of the given kind with no annotations.
    pub fn of(kind: DataKind) -> Self {
        Self {
            kind,
            generated_by: None,
            annotations: HashMap::new(),
        }
    }

    /// Stamp the generating operator.
    pub fn generated_by(mut self, operator: impl Into<String>) -> Self {
        self.generated_by = Some(operator.into());
        self
    }

    /// Attach an annotation.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// Read-only view of an operator's port metadata handed to custom rules
pub struct RuleScope<'a> {
    /// Metadata currently present on input ports, by port name
    pub inputs: &'a HashMap<String, Metadata>,
    /// Metadata published on output ports so far in this pass, by port name
    pub outputs: &'a HashMap<String, Metadata>,
}

/// A custom transformer rule: pure function from the current metadata view
/// to a batch of (output port, metadata) publications.
pub type CustomRule = dyn Fn(&RuleScope<'_>) -> Vec<(String, Metadata)> + Send + Sync;

/// One metadata propagation rule
///
/// Rules run in registration order; later rules see what earlier rules on
/// the same operator already published.
#[derive(Clone)]
pub enum TransformRule {
    /// Copy the metadata of one input port to one output port unchanged
    PassThrough { input: String, output: String },
    /// Publish freshly generated metadata of a fixed kind
    Generate { output: String, kind: DataKind },
    /// Arbitrary transform over the current metadata view
    Custom(Arc<CustomRule>),
}

impl TransformRule {
    /// Pass-through rule from `input` to `output`.
    pub fn pass_through(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self::PassThrough {
            input: input.into(),
            output: output.into(),
        }
    }

    /// Generation rule for `output`.
    pub fn generate(output: impl Into<String>, kind: DataKind) -> Self {
        Self::Generate {
            output: output.into(),
            kind,
        }
    }

    /// Custom rule from a closure.
    pub fn custom(
        rule: impl Fn(&RuleScope<'_>) -> Vec<(String, Metadata)> + Send + Sync + 'static,
    ) -> Self {
        Self::Custom(Arc::new(rule))
    }

    /// Evaluate this rule against the given view.
    pub fn apply(&self, scope: &RuleScope<'_>) -> Vec<(String, Metadata)> {
        match self {
            Self::PassThrough { input, output } => scope
                .inputs
                .get(input)
                .map(|meta| vec![(output.clone(), meta.clone())])
                .unwrap_or_default(),
            Self::Generate { output, kind } => vec![(output.clone(), Metadata::of(*kind))],
            Self::Custom(rule) => rule(scope),
        }
    }
}

impl fmt::Debug for TransformRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PassThrough { input, output } => {
                write!(f, "PassThrough({} -> {})", input, output)
            }
            Self::Generate { output, kind } => write!(f, "Generate({} as {:?})", output, kind),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_satisfies_everything() {
        assert!(DataKind::Any.satisfies(&DataKind::Table));
        assert!(DataKind::Number.satisfies(&DataKind::Any));
    }

    #[test]
    fn test_table_capability_tier() {
        assert!(DataKind::SparseTable.satisfies(&DataKind::Table));
        // The reverse direction is an exact-match requirement
        assert!(!DataKind::Table.satisfies(&DataKind::SparseTable));
    }

    #[test]
    fn test_exact_mismatch() {
        assert!(!DataKind::Number.satisfies(&DataKind::Text));
    }

    #[test]
    fn test_pass_through_rule() {
        let mut inputs = HashMap::new();
        inputs.insert(
            "table".to_string(),
            Metadata::of(DataKind::Table).with_annotation("rows", "10"),
        );
        let outputs = HashMap::new();

        let rule = TransformRule::pass_through("table", "out");
        let published = rule.apply(&RuleScope {
            inputs: &inputs,
            outputs: &outputs,
        });

        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "out");
        assert_eq!(published[0].1.annotations.get("rows").unwrap(), "10");
    }

    #[test]
    fn test_pass_through_without_input_publishes_nothing() {
        let inputs = HashMap::new();
        let outputs = HashMap::new();
        let rule = TransformRule::pass_through("missing", "out");
        assert!(rule
            .apply(&RuleScope {
                inputs: &inputs,
                outputs: &outputs
            })
            .is_empty());
    }

    #[test]
    fn test_custom_rule_sees_earlier_publications() {
        let inputs = HashMap::new();
        let mut outputs = HashMap::new();
        outputs.insert("first".to_string(), Metadata::of(DataKind::Table));

        let rule = TransformRule::custom(|scope| {
            scope
                .outputs
                .get("first")
                .map(|meta| vec![("second".to_string(), meta.clone())])
                .unwrap_or_default()
        });

        let published = rule.apply(&RuleScope {
            inputs: &inputs,
            outputs: &outputs,
        });
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1.kind, DataKind::Table);
    }
}
