//! Operator descriptors
//!
//! A descriptor is the single source of truth for an operator type: its
//! ports, its declared parameters, its metadata transformer rules, and its
//! registry bookkeeping (label, group, deprecation note). The registry maps
//! type tags to descriptors plus computation factories; the check pass and
//! instantiation both read from here.

use crate::meta::{DataKind, TransformRule};
use crate::params::ParameterDeclaration;

/// Palette group of an operator type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorGroup {
    /// Produces data from nothing (generators, readers)
    Source,
    /// Consumes and produces data
    Transform,
    /// Consumes data without producing any (writers, loggers)
    Sink,
    /// Structural operators (subprocesses)
    Control,
    /// Everything else
    Utility,
}

/// Declaration of one port on an operator type
#[derive(Debug, Clone)]
pub struct PortDescriptor {
    pub name: String,
    pub label: String,
    pub kind: DataKind,
    /// For inputs: whether an absent connection is tolerated
    pub optional: bool,
}

impl PortDescriptor {
    /// Create a required port
    pub fn required(
        name: impl Into<String>,
        label: impl Into<String>,
        kind: DataKind,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            optional: false,
        }
    }

    /// Create an optional port
    pub fn optional(
        name: impl Into<String>,
        label: impl Into<String>,
        kind: DataKind,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            optional: true,
        }
    }
}

/// Complete declaration of an operator type
#[derive(Debug, Clone)]
pub struct OperatorDescriptor {
    /// Unique type identifier (e.g., "filter-rows")
    pub type_tag: String,
    /// Human-readable label
    pub label: String,
    /// Description of what the operator does
    pub description: String,
    /// Palette group
    pub group: OperatorGroup,
    /// Input port declarations
    pub inputs: Vec<PortDescriptor>,
    /// Output port declarations
    pub outputs: Vec<PortDescriptor>,
    /// Parameter declarations
    pub parameters: Vec<ParameterDeclaration>,
    /// Metadata transformer rules, in evaluation order
    pub transformer: Vec<TransformRule>,
    /// Deprecation note; surfaced as a warning during the check pass
    pub deprecated: Option<String>,
    /// Compatibility version stamped on new instances
    pub compatibility_version: String,
}

impl OperatorDescriptor {
    pub fn new(
        type_tag: impl Into<String>,
        label: impl Into<String>,
        group: OperatorGroup,
    ) -> Self {
        Self {
            type_tag: type_tag.into(),
            label: label.into(),
            description: String::new(),
            group,
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
            transformer: Vec::new(),
            deprecated: None,
            compatibility_version: "1.0".to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input(mut self, port: PortDescriptor) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: PortDescriptor) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn with_parameter(mut self, declaration: ParameterDeclaration) -> Self {
        self.parameters.push(declaration);
        self
    }

    pub fn with_rule(mut self, rule: TransformRule) -> Self {
        self.transformer.push(rule);
        self
    }

    pub fn deprecated(mut self, note: impl Into<String>) -> Self {
        self.deprecated = Some(note.into());
        self
    }

    pub fn with_compatibility_version(mut self, version: impl Into<String>) -> Self {
        self.compatibility_version = version.into();
        self
    }
}
