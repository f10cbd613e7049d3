//! Parameter store and declarations
//!
//! Every operator owns a [`ParameterStore`]: raw string values keyed by
//! parameter name. The declared type of each parameter comes from the
//! operator's descriptor; values stay strings until a typed accessor parses
//! them, which keeps macro substitution a plain string rewrite.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Declared type of a parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    Boolean,
    Int,
    Real,
    /// One of a fixed set of choices
    Category(Vec<String>),
    Text,
    /// List of key=value pairs
    KeyValueList,
    /// Hex color, "#rrggbb"
    Color,
    /// Rows separated by ';', columns by ','
    Matrix,
    /// Path on the local filesystem
    File,
    /// Location resolved through the injected repository resolver
    RepositoryLocation,
}

/// Declaration of one parameter, carried by the operator descriptor
#[derive(Debug, Clone)]
pub struct ParameterDeclaration {
    pub key: String,
    pub kind: ParameterType,
    pub required: bool,
    pub default: Option<String>,
    pub description: String,
}

impl ParameterDeclaration {
    /// A required parameter without a default.
    pub fn required(
        key: impl Into<String>,
        kind: ParameterType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            kind,
            required: true,
            default: None,
            description: description.into(),
        }
    }

    /// An optional parameter.
    pub fn optional(
        key: impl Into<String>,
        kind: ParameterType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            kind,
            required: false,
            default: None,
            description: description.into(),
        }
    }

    /// Attach a default value.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Raw parameter values of one operator
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    values: HashMap<String, String>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a raw value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Get the raw, unsubstituted value.
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Remove a value. Idempotent.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parse a boolean parameter value ("true"/"false").
pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected 'true' or 'false', got '{}'", other)),
    }
}

/// Parse an integer parameter value.
pub fn parse_int(value: &str) -> Result<i64, String> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("not an integer: {}", e))
}

/// Parse a real-valued parameter.
pub fn parse_real(value: &str) -> Result<f64, String> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("not a number: {}", e))
}

/// Parse a key=value list: pairs separated by ';'.
pub fn parse_key_value_list(value: &str) -> Result<Vec<(String, String)>, String> {
    let mut pairs = Vec::new();
    for entry in value.split(';').filter(|e| !e.trim().is_empty()) {
        match entry.split_once('=') {
            Some((k, v)) => pairs.push((k.trim().to_string(), v.trim().to_string())),
            None => return Err(format!("entry '{}' is not key=value", entry.trim())),
        }
    }
    Ok(pairs)
}

/// Parse a "#rrggbb" color into its channels.
pub fn parse_color(value: &str) -> Result<(u8, u8, u8), String> {
    let hex = value
        .trim()
        .strip_prefix('#')
        .ok_or_else(|| format!("color '{}' must start with '#'", value.trim()))?;
    if hex.len() != 6 {
        return Err(format!("color '#{}' must have six hex digits", hex));
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16).map_err(|e| format!("bad hex digit: {}", e))
    };
    Ok((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

/// Parse a matrix: rows separated by ';', columns by ','.
pub fn parse_matrix(value: &str) -> Result<Vec<Vec<f64>>, String> {
    let mut rows = Vec::new();
    let mut width = None;
    for (i, row) in value.split(';').filter(|r| !r.trim().is_empty()).enumerate() {
        let cells: Result<Vec<f64>, String> = row
            .split(',')
            .map(|c| {
                c.trim()
                    .parse::<f64>()
                    .map_err(|e| format!("row {}: not a number: {}", i + 1, e))
            })
            .collect();
        let cells = cells?;
        match width {
            None => width = Some(cells.len()),
            Some(w) if w != cells.len() => {
                return Err(format!(
                    "row {} has {} columns, expected {}",
                    i + 1,
                    cells.len(),
                    w
                ));
            }
            Some(_) => {}
        }
        rows.push(cells);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_set_get_remove() {
        let mut store = ParameterStore::new();
        store.set("rows", "25");
        assert_eq!(store.get_raw("rows"), Some("25"));
        assert!(store.is_set("rows"));

        store.remove("rows");
        assert!(!store.is_set("rows"));
        // Removing again is fine
        assert!(store.remove("rows").is_none());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Ok(true));
        assert_eq!(parse_bool(" false "), Ok(false));
        assert!(parse_bool("yes").is_err());
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_int("42"), Ok(42));
        assert!(parse_int("4.2").is_err());
        assert_eq!(parse_real("4.2"), Ok(4.2));
    }

    #[test]
    fn test_parse_key_value_list() {
        let pairs = parse_key_value_list("a=1; b = two;").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two".to_string())
            ]
        );
        assert!(parse_key_value_list("novalue").is_err());
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#ff8000"), Ok((255, 128, 0)));
        assert!(parse_color("ff8000").is_err());
        assert!(parse_color("#ff80").is_err());
    }

    #[test]
    fn test_parse_matrix() {
        let m = parse_matrix("1,2;3,4").unwrap();
        assert_eq!(m, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert!(parse_matrix("1,2;3").is_err());
    }

    #[test]
    fn test_declaration_builders() {
        let decl = ParameterDeclaration::optional("rows", ParameterType::Int, "row count")
            .with_default("10");
        assert!(!decl.required);
        assert_eq!(decl.default.as_deref(), Some("10"));
    }
}
