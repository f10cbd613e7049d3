//! Serialized process documents
//!
//! The document tree mirrors the chain nesting: a process carries its macro
//! table and a root operator; chain operators carry their units; units carry
//! operators and wiring. Two fidelity levels exist: `Full` keeps the
//! editor-only fields (expanded flag, breakpoints), `CoreOnly` strips them
//! so the serialized form can be compared for dirty detection or shipped
//! for remote execution.
//!
//! Maps are `BTreeMap`s: stable ordering keeps the core-only serialization
//! usable as a fingerprint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Serialization fidelity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fidelity {
    /// Everything, including editor-only state
    Full,
    /// Logic-relevant fields only
    CoreOnly,
}

/// Serialized form of a whole process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub macros: BTreeMap<String, String>,
    pub root: OperatorDocument,
}

/// Breakpoint flags of one operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointFlags {
    pub before: bool,
    pub after: bool,
}

/// Serialized form of one operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorDocument {
    pub name: String,
    pub type_tag: String,
    pub enabled: bool,
    /// Editor-only; absent at core-only fidelity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded: Option<bool>,
    /// Editor-only; absent at core-only fidelity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<BreakpointFlags>,
    pub compatibility_version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    /// Nested units; empty for leaf operators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<UnitDocument>,
}

/// Serialized form of one execution unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operators: Vec<OperatorDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wiring: Vec<ConnectionDocument>,
}

/// Serialized form of one wiring entry
///
/// An absent operator addresses a boundary port of the owning chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_operator: Option<String>,
    pub from_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_operator: Option<String>,
    pub to_port: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProcessDocument {
        ProcessDocument {
            name: "sample".to_string(),
            macros: [("dir".to_string(), "/data".to_string())].into(),
            root: OperatorDocument {
                name: "root".to_string(),
                type_tag: "process".to_string(),
                enabled: true,
                expanded: None,
                breakpoints: None,
                compatibility_version: "1.0".to_string(),
                parameters: BTreeMap::new(),
                units: vec![UnitDocument {
                    name: "main".to_string(),
                    operators: vec![OperatorDocument {
                        name: "gen".to_string(),
                        type_tag: "generate-table".to_string(),
                        enabled: true,
                        expanded: None,
                        breakpoints: Some(BreakpointFlags {
                            before: true,
                            after: false,
                        }),
                        compatibility_version: "1.0".to_string(),
                        parameters: [("rows".to_string(), "5".to_string())].into(),
                        units: vec![],
                    }],
                    wiring: vec![ConnectionDocument {
                        from_operator: Some("gen".to_string()),
                        from_port: "table".to_string(),
                        to_operator: None,
                        to_port: "result".to_string(),
                    }],
                }],
            },
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let doc = sample();
        let json = serde_json::to_string(&doc).unwrap();
        let restored: ProcessDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn test_camel_case_field_names() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("typeTag"));
        assert!(json.contains("compatibilityVersion"));
        assert!(json.contains("fromOperator"));
        assert!(!json.contains("type_tag"));
    }

    #[test]
    fn test_stable_serialization() {
        // BTreeMap keys serialize in order, so two structurally equal
        // documents always produce the same string
        let a = serde_json::to_string(&sample()).unwrap();
        let b = serde_json::to_string(&sample()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_absent_optionals_are_omitted() {
        let json = serde_json::to_string(&sample()).unwrap();
        // The root has no breakpoints set; the field is simply absent
        assert!(!json.contains("\"expanded\""));
    }
}
