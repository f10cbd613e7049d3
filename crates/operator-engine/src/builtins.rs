//! Built-in operator library
//!
//! A compact set of computations covering the common shapes: a table
//! source, two transforms, a logging sink, a cooperative delay, and a
//! generic subprocess chain. [`default_registry`] assembles them; hosts
//! merge their own types on top.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::descriptor::{OperatorDescriptor, OperatorGroup, PortDescriptor};
use crate::error::{EngineError, Result};
use crate::meta::{DataKind, Metadata, TransformRule};
use crate::operator::{Computation, ComputeContext};
use crate::params::{ParameterDeclaration, ParameterType};
use crate::registry::OperatorRegistry;

fn generate_table(ctx: &mut ComputeContext) -> Result<()> {
    let rows = ctx.param_int("rows")?.unwrap_or(10).max(0) as usize;
    let columns: Vec<String> = ctx
        .param("columns")
        .unwrap_or("index")
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let table: Vec<Value> = (0..rows)
        .map(|i| {
            let mut row = serde_json::Map::new();
            for column in &columns {
                row.insert(column.clone(), json!(i));
            }
            Value::Object(row)
        })
        .collect();

    ctx.publish("rows", rows.to_string());
    ctx.set_output("table", Value::Array(table));
    Ok(())
}

fn cell_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn filter_rows(ctx: &mut ComputeContext) -> Result<()> {
    let column = ctx.require_param("column")?.to_string();
    let equals = ctx.require_param("equals")?.to_string();
    let table = ctx.require_input("table")?;

    let rows = table.as_array().ok_or_else(|| {
        EngineError::failed(ctx.operator(), "input 'table' is not an array of rows")
    })?;

    let kept: Vec<Value> = rows
        .iter()
        .filter(|row| {
            row.get(&column)
                .map(|cell| cell_as_string(cell) == equals)
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    ctx.publish("kept", kept.len().to_string());
    ctx.set_output("table", Value::Array(kept));
    Ok(())
}

fn append_column(ctx: &mut ComputeContext) -> Result<()> {
    let column = ctx.require_param("column")?.to_string();
    let value = ctx.require_param("value")?.to_string();
    let table = ctx.require_input("table")?.clone();

    let rows = match table {
        Value::Array(rows) => rows,
        _ => {
            return Err(EngineError::failed(
                ctx.operator(),
                "input 'table' is not an array of rows",
            ))
        }
    };

    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        match row {
            Value::Object(mut fields) => {
                fields.insert(column.clone(), json!(value));
                out.push(Value::Object(fields));
            }
            _ => {
                return Err(EngineError::failed(
                    ctx.operator(),
                    format!("row {} is not an object", i),
                ))
            }
        }
    }

    ctx.set_output("table", Value::Array(out));
    Ok(())
}

fn log_sink(ctx: &mut ComputeContext) -> Result<()> {
    let level = ctx.param("level").unwrap_or("note");
    let payload = ctx.input_payload("through").cloned();

    match (&payload, level) {
        (Some(p), "warning") => log::warn!("[{}] {}", ctx.operator(), p.value),
        (Some(p), _) => log::info!("[{}] {}", ctx.operator(), p.value),
        (None, _) => log::info!("[{}] no input delivered", ctx.operator()),
    }

    if let Some(payload) = payload {
        // Pass the payload through untouched, provenance included
        ctx.forward("through", payload);
    }
    Ok(())
}

/// Sleeps in short slices, observing stop and pause at each slice.
struct Delay;

#[async_trait]
impl Computation for Delay {
    async fn compute(&self, ctx: &mut ComputeContext) -> Result<()> {
        let total = ctx.param_int("millis")?.unwrap_or(100).max(0) as u64;
        let mut remaining = total;
        while remaining > 0 {
            ctx.checkpoint().await?;
            let slice = remaining.min(10);
            tokio::time::sleep(std::time::Duration::from_millis(slice)).await;
            remaining -= slice;
        }
        ctx.checkpoint().await?;
        if let Some(payload) = ctx.input_payload("through").cloned() {
            ctx.forward("through", payload);
        }
        Ok(())
    }
}

/// Registry with every built-in operator type.
pub fn default_registry() -> OperatorRegistry {
    let mut registry = OperatorRegistry::new();

    registry.register_fn(
        OperatorDescriptor::new("generate-table", "Generate Table", OperatorGroup::Source)
            .with_description("Produces a table with numbered rows")
            .with_output(PortDescriptor::required("table", "Table", DataKind::Table))
            .with_parameter(
                ParameterDeclaration::optional("rows", ParameterType::Int, "number of rows")
                    .with_default("10"),
            )
            .with_parameter(
                ParameterDeclaration::optional(
                    "columns",
                    ParameterType::Text,
                    "comma-separated column names",
                )
                .with_default("index"),
            )
            .with_rule(TransformRule::generate("table", DataKind::Table)),
        generate_table,
    );

    registry.register_fn(
        OperatorDescriptor::new("filter-rows", "Filter Rows", OperatorGroup::Transform)
            .with_description("Keeps rows whose cell equals a literal")
            .with_input(PortDescriptor::required("table", "Table", DataKind::Table))
            .with_output(PortDescriptor::required("table", "Table", DataKind::Table))
            .with_parameter(ParameterDeclaration::required(
                "column",
                ParameterType::Text,
                "column to compare",
            ))
            .with_parameter(ParameterDeclaration::required(
                "equals",
                ParameterType::Text,
                "value to keep",
            ))
            .with_rule(TransformRule::pass_through("table", "table")),
        filter_rows,
    );

    registry.register_fn(
        OperatorDescriptor::new("append-column", "Append Column", OperatorGroup::Transform)
            .with_description("Adds a constant column to every row")
            .with_input(PortDescriptor::required("table", "Table", DataKind::Table))
            .with_output(PortDescriptor::required("table", "Table", DataKind::Table))
            .with_parameter(ParameterDeclaration::required(
                "column",
                ParameterType::Text,
                "name of the new column",
            ))
            .with_parameter(ParameterDeclaration::required(
                "value",
                ParameterType::Text,
                "cell value, macros allowed",
            ))
            // Densifies: the appended column exists in every row
            .with_rule(TransformRule::custom(|scope| {
                scope
                    .inputs
                    .get("table")
                    .map(|meta| {
                        let mut out = Metadata::of(DataKind::Table);
                        out.annotations = meta.annotations.clone();
                        vec![("table".to_string(), out)]
                    })
                    .unwrap_or_default()
            })),
        append_column,
    );

    registry.register_fn(
        OperatorDescriptor::new("log-sink", "Log", OperatorGroup::Sink)
            .with_description("Writes its input to the log, tagged with the operator name")
            .with_input(PortDescriptor::required("through", "Through", DataKind::Any))
            .with_output(PortDescriptor::optional("through", "Through", DataKind::Any))
            .with_parameter(
                ParameterDeclaration::optional(
                    "level",
                    ParameterType::Category(vec!["note".to_string(), "warning".to_string()]),
                    "log level",
                )
                .with_default("note"),
            )
            .with_rule(TransformRule::pass_through("through", "through")),
        log_sink,
    );

    registry.register_computation(
        OperatorDescriptor::new("delay", "Delay", OperatorGroup::Utility)
            .with_description("Waits, checking for stop requests while it does")
            .with_input(PortDescriptor::optional("through", "Through", DataKind::Any))
            .with_output(PortDescriptor::optional("through", "Through", DataKind::Any))
            .with_parameter(
                ParameterDeclaration::optional("millis", ParameterType::Int, "wait time")
                    .with_default("100"),
            )
            .with_rule(TransformRule::pass_through("through", "through")),
        Arc::new(Delay),
    );

    registry.register_chain(
        OperatorDescriptor::new("subprocess", "Subprocess", OperatorGroup::Control)
            .with_description("Groups operators into a nested unit")
            .with_input(PortDescriptor::optional("in", "In", DataKind::Any))
            .with_output(PortDescriptor::optional("out", "Out", DataKind::Any)),
        vec!["body".to_string()],
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ProcessControl;
    use crate::port::IoPayload;
    use std::collections::HashMap;

    fn ctx(
        inputs: Vec<(&str, Value)>,
        params: Vec<(&str, &str)>,
    ) -> ComputeContext {
        let inputs: HashMap<String, IoPayload> = inputs
            .into_iter()
            .map(|(k, v)| (k.to_string(), IoPayload::new(v)))
            .collect();
        let params: HashMap<String, Option<String>> = params
            .into_iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect();
        ComputeContext::new(
            "test",
            inputs,
            params,
            crate::config::EngineConfig::new(),
            ProcessControl::detached(),
        )
    }

    #[test]
    fn test_generate_table() {
        let mut c = ctx(vec![], vec![("rows", "3"), ("columns", "index, value")]);
        generate_table(&mut c).unwrap();
        let outputs = c.take_outputs();
        let table = outputs.get("table").unwrap().value.as_array().unwrap().clone();
        assert_eq!(table.len(), 3);
        assert_eq!(table[2]["index"], json!(2));
        assert_eq!(table[2]["value"], json!(2));
    }

    #[test]
    fn test_generate_table_defaults() {
        let mut c = ctx(vec![], vec![]);
        generate_table(&mut c).unwrap();
        let outputs = c.take_outputs();
        assert_eq!(
            outputs.get("table").unwrap().value.as_array().unwrap().len(),
            10
        );
    }

    #[test]
    fn test_filter_rows() {
        let table = json!([{"index": 0}, {"index": 1}, {"index": 2}]);
        let mut c = ctx(
            vec![("table", table)],
            vec![("column", "index"), ("equals", "1")],
        );
        filter_rows(&mut c).unwrap();
        let outputs = c.take_outputs();
        let kept = outputs.get("table").unwrap().value.as_array().unwrap().clone();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["index"], json!(1));
    }

    #[test]
    fn test_filter_rows_string_cells() {
        let table = json!([{"name": "a"}, {"name": "b"}]);
        let mut c = ctx(
            vec![("table", table)],
            vec![("column", "name"), ("equals", "b")],
        );
        filter_rows(&mut c).unwrap();
        let outputs = c.take_outputs();
        assert_eq!(
            outputs.get("table").unwrap().value.as_array().unwrap().len(),
            1
        );
    }

    #[test]
    fn test_filter_rows_missing_input() {
        let mut c = ctx(vec![], vec![("column", "x"), ("equals", "1")]);
        assert!(matches!(
            filter_rows(&mut c),
            Err(EngineError::MissingInput { .. })
        ));
    }

    #[test]
    fn test_append_column() {
        let table = json!([{"index": 0}, {"index": 1}]);
        let mut c = ctx(
            vec![("table", table)],
            vec![("column", "tag"), ("value", "run-1")],
        );
        append_column(&mut c).unwrap();
        let outputs = c.take_outputs();
        let rows = outputs.get("table").unwrap().value.as_array().unwrap().clone();
        assert_eq!(rows[0]["tag"], json!("run-1"));
        assert_eq!(rows[1]["tag"], json!("run-1"));
    }

    #[test]
    fn test_append_column_rejects_non_object_rows() {
        let mut c = ctx(
            vec![("table", json!([1, 2]))],
            vec![("column", "tag"), ("value", "x")],
        );
        assert!(matches!(
            append_column(&mut c),
            Err(EngineError::OperatorFailed { .. })
        ));
    }

    #[test]
    fn test_log_sink_forwards_provenance() {
        let mut inputs = HashMap::new();
        inputs.insert(
            "through".to_string(),
            IoPayload::stamped(json!("payload"), "upstream"),
        );
        let mut c = ComputeContext::new(
            "logger",
            inputs,
            HashMap::new(),
            crate::config::EngineConfig::new(),
            ProcessControl::detached(),
        );
        log_sink(&mut c).unwrap();
        let outputs = c.take_outputs();
        assert_eq!(
            outputs.get("through").unwrap().produced_by.as_deref(),
            Some("upstream")
        );
    }

    #[tokio::test]
    async fn test_delay_stops_mid_wait() {
        let control = ProcessControl::detached();
        let mut c = ComputeContext::new(
            "wait",
            HashMap::new(),
            [("millis".to_string(), Some("10000".to_string()))].into(),
            crate::config::EngineConfig::new(),
            control.clone(),
        );
        control.request_stop();
        let started = std::time::Instant::now();
        let result = Delay.compute(&mut c).await;
        assert!(matches!(result, Err(EngineError::Stopped)));
        assert!(started.elapsed().as_millis() < 1000);
    }

    #[test]
    fn test_default_registry_is_complete() {
        let registry = default_registry();
        for tag in [
            "generate-table",
            "filter-rows",
            "append-column",
            "log-sink",
            "delay",
            "subprocess",
        ] {
            assert!(registry.has_type(tag), "missing '{}'", tag);
        }
    }
}
