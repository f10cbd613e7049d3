//! Macro substitution for parameter values
//!
//! Parameter values may contain `%{...}` placeholders. Resolution runs in
//! two passes:
//!
//! 1. process macros: placeholders defined in the process-level
//!    [`MacroTable`]; undefined names are left literal
//! 2. built-ins: operator name (`%{n}`), type tag (`%{c}`), apply count
//!    (`%{a}`, optionally offset: `%{a+1}`, `%{a-2}`), wall-clock components
//!    (`%{t}`, `%{year}`, `%{month}`, `%{day}`, `%{hour}`, `%{minute}`,
//!    `%{second}`), and cross-operator value references
//!    (`%{operatorName.valueName}`)
//!
//! Unknown simple names survive both passes unchanged. Malformed syntax is a
//! [`MacroError`]: it indicates a corrupt process definition, not a
//! recoverable condition.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use thiserror::Error;

/// Errors raised by macro expansion
///
/// These are programming-error-class failures: the authoring operation that
/// triggered the expansion is expected to abort.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MacroError {
    /// A `%{` with no closing `}`
    #[error("unterminated macro at byte {position}")]
    Unterminated { position: usize },

    /// An apply-count offset that is not a literal integer
    #[error("malformed apply-count offset '{token}'")]
    BadOffset { token: String },

    /// A value reference naming an operator that does not exist
    #[error("no operator '{operator}' to read value '{value}' from")]
    UnknownOperatorRef { operator: String, value: String },

    /// A value reference naming a value the operator does not publish
    #[error("operator '{operator}' publishes no value '{value}'")]
    UnknownValueRef { operator: String, value: String },
}

/// The process-level macro table
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
    entries: HashMap<String, String>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define or overwrite a macro.
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|s| s.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything a single expansion needs to know about its surroundings
pub struct MacroScope<'a> {
    pub macros: &'a MacroTable,
    /// Name of the operator whose parameter is being resolved
    pub operator: &'a str,
    /// Type tag of that operator
    pub type_tag: &'a str,
    pub apply_count: u64,
    pub now: DateTime<Local>,
    /// Resolver for `%{operator.value}` references
    pub values: &'a dyn Fn(&str, &str) -> Result<String, MacroError>,
}

/// Expand all placeholders in `input` within the given scope.
pub fn expand(input: &str, scope: &MacroScope<'_>) -> Result<String, MacroError> {
    // Pass 1: process macros. Undefined names stay literal for pass 2.
    let after_macros = rewrite(input, |name| {
        Ok(scope.macros.lookup(name).map(|v| v.to_string()))
    })?;

    // Pass 2: built-ins and value references.
    rewrite(&after_macros, |name| expand_builtin(name, scope))
}

/// Scan for `%{name}` tokens and rewrite each through `resolve`.
/// `Ok(None)` from the resolver leaves the token literal.
fn rewrite(
    input: &str,
    mut resolve: impl FnMut(&str) -> Result<Option<String>, MacroError>,
) -> Result<String, MacroError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut offset = 0;

    while let Some(start) = rest.find("%{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open.find('}').ok_or(MacroError::Unterminated {
            position: offset + start,
        })?;
        let name = &after_open[..end];
        match resolve(name)? {
            Some(value) => out.push_str(&value),
            None => {
                out.push_str("%{");
                out.push_str(name);
                out.push('}');
            }
        }
        let consumed = start + 2 + end + 1;
        offset += consumed;
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

fn expand_builtin(name: &str, scope: &MacroScope<'_>) -> Result<Option<String>, MacroError> {
    match name {
        "n" => return Ok(Some(scope.operator.to_string())),
        "c" => return Ok(Some(scope.type_tag.to_string())),
        "a" => return Ok(Some(scope.apply_count.to_string())),
        "t" => return Ok(Some(scope.now.format("%Y-%m-%d_%H-%M-%S").to_string())),
        "year" => return Ok(Some(scope.now.format("%Y").to_string())),
        "month" => return Ok(Some(scope.now.format("%m").to_string())),
        "day" => return Ok(Some(scope.now.format("%d").to_string())),
        "hour" => return Ok(Some(scope.now.format("%H").to_string())),
        "minute" => return Ok(Some(scope.now.format("%M").to_string())),
        "second" => return Ok(Some(scope.now.format("%S").to_string())),
        _ => {}
    }

    // Apply count with a literal offset: a+1, a-2
    if let Some(rest) = name.strip_prefix('a') {
        if rest.starts_with('+') || rest.starts_with('-') {
            let offset: i64 = rest.parse().map_err(|_| MacroError::BadOffset {
                token: name.to_string(),
            })?;
            let count = scope.apply_count as i64 + offset;
            return Ok(Some(count.to_string()));
        }
    }

    // Cross-operator value reference
    if let Some((operator, value)) = name.split_once('.') {
        return (scope.values)(operator, value).map(Some);
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope<'a>(
        macros: &'a MacroTable,
        values: &'a dyn Fn(&str, &str) -> Result<String, MacroError>,
    ) -> MacroScope<'a> {
        MacroScope {
            macros,
            operator: "filter",
            type_tag: "filter-rows",
            apply_count: 3,
            now: Local::now(),
            values,
        }
    }

    fn no_values(operator: &str, value: &str) -> Result<String, MacroError> {
        Err(MacroError::UnknownOperatorRef {
            operator: operator.to_string(),
            value: value.to_string(),
        })
    }

    #[test]
    fn test_defined_macros_leave_no_tokens() {
        let mut macros = MacroTable::new();
        macros.define("dir", "/data");
        macros.define("run", "7");
        let s = scope(&macros, &no_values);
        let out = expand("%{dir}/out-%{run}.csv", &s).unwrap();
        assert_eq!(out, "/data/out-7.csv");
        assert!(!out.contains("%{"));
    }

    #[test]
    fn test_undefined_macro_stays_literal() {
        let macros = MacroTable::new();
        let s = scope(&macros, &no_values);
        assert_eq!(expand("x-%{nope}-y", &s).unwrap(), "x-%{nope}-y");
    }

    #[test]
    fn test_builtins() {
        let macros = MacroTable::new();
        let s = scope(&macros, &no_values);
        assert_eq!(expand("%{n}", &s).unwrap(), "filter");
        assert_eq!(expand("%{c}", &s).unwrap(), "filter-rows");
        assert_eq!(expand("%{a}", &s).unwrap(), "3");
    }

    #[test]
    fn test_apply_count_offsets() {
        let macros = MacroTable::new();
        let s = scope(&macros, &no_values);
        assert_eq!(expand("%{a+2}", &s).unwrap(), "5");
        assert_eq!(expand("%{a-1}", &s).unwrap(), "2");
    }

    #[test]
    fn test_malformed_offset_is_an_error() {
        let macros = MacroTable::new();
        let s = scope(&macros, &no_values);
        assert_eq!(
            expand("%{a+two}", &s),
            Err(MacroError::BadOffset {
                token: "a+two".to_string()
            })
        );
    }

    #[test]
    fn test_unterminated_is_an_error() {
        let macros = MacroTable::new();
        let s = scope(&macros, &no_values);
        assert!(matches!(
            expand("abc %{open", &s),
            Err(MacroError::Unterminated { position: 4 })
        ));
    }

    #[test]
    fn test_value_reference() {
        let macros = MacroTable::new();
        let lookup = |operator: &str, value: &str| -> Result<String, MacroError> {
            if operator == "gen" && value == "applycount" {
                Ok("11".to_string())
            } else {
                Err(MacroError::UnknownValueRef {
                    operator: operator.to_string(),
                    value: value.to_string(),
                })
            }
        };
        let s = scope(&macros, &lookup);
        assert_eq!(expand("%{gen.applycount}", &s).unwrap(), "11");
        assert!(expand("%{gen.missing}", &s).is_err());
    }

    #[test]
    fn test_process_macro_wins_over_builtin() {
        let mut macros = MacroTable::new();
        macros.define("n", "overridden");
        let s = scope(&macros, &no_values);
        assert_eq!(expand("%{n}", &s).unwrap(), "overridden");
    }

    #[test]
    fn test_timestamp_has_no_tokens() {
        let macros = MacroTable::new();
        let s = scope(&macros, &no_values);
        let out = expand("log-%{t}.txt", &s).unwrap();
        assert!(out.starts_with("log-"));
        assert!(!out.contains("%{"));
    }
}
