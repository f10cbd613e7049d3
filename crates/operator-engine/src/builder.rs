//! Fluent builder for processes
//!
//! Wraps the process mutation API in a chainable form for programmatic
//! construction, mirroring how hosts and tests assemble small graphs.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{EventSink, NullEventSink};
use crate::operator::Operator;
use crate::process::{ExecutionMode, Process};
use crate::registry::OperatorRegistry;
use crate::unit::PortRef;

enum Step {
    Add {
        type_tag: String,
        name: String,
        params: Vec<(String, String)>,
    },
    AddPrebuilt(Operator),
    Connect {
        from: PortRef,
        to: PortRef,
    },
}

/// Builder for a [`Process`] rooted in a registry
///
/// # Example
///
/// ```ignore
/// let process = ProcessBuilder::new("demo", registry)
///     .add("generate-table", "gen")
///     .with_param("rows", "4")
///     .add("log-sink", "log")
///     .connect("gen", "table", "log", "through")
///     .build()?;
/// ```
pub struct ProcessBuilder {
    name: String,
    registry: Arc<OperatorRegistry>,
    config: EngineConfig,
    events: Arc<dyn EventSink>,
    execution_mode: ExecutionMode,
    macros: Vec<(String, String)>,
    steps: Vec<Step>,
}

impl ProcessBuilder {
    pub fn new(name: impl Into<String>, registry: Arc<OperatorRegistry>) -> Self {
        Self {
            name: name.into(),
            registry,
            config: EngineConfig::new(),
            events: Arc::new(NullEventSink),
            execution_mode: ExecutionMode::Always,
            macros: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Define a process-level macro.
    pub fn define_macro(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.macros.push((name.into(), value.into()));
        self
    }

    /// Add an operator of a registered type to the root unit.
    pub fn add(mut self, type_tag: impl Into<String>, name: impl Into<String>) -> Self {
        self.steps.push(Step::Add {
            type_tag: type_tag.into(),
            name: name.into(),
            params: Vec::new(),
        });
        self
    }

    /// Set a parameter on the most recently added operator.
    ///
    /// Must be called after `add`.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(Step::Add { params, .. }) = self.steps.last_mut() {
            params.push((key.into(), value.into()));
        }
        self
    }

    /// Add a pre-built operator (e.g. a hand-assembled chain).
    pub fn add_operator(mut self, operator: Operator) -> Self {
        self.steps.push(Step::AddPrebuilt(operator));
        self
    }

    /// Wire two root-unit ports.
    pub fn connect(
        mut self,
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        self.steps.push(Step::Connect {
            from: PortRef::of(source, source_port),
            to: PortRef::of(target, target_port),
        });
        self
    }

    /// Build the process, instantiating and wiring in declaration order.
    pub fn build(self) -> Result<Process> {
        let mut process = Process::new(&self.name, self.config, self.events);
        process.set_execution_mode(self.execution_mode);
        for (name, value) in self.macros {
            process.define_macro(name, value);
        }
        for step in self.steps {
            match step {
                Step::Add {
                    type_tag,
                    name,
                    params,
                } => {
                    let mut op = self.registry.instantiate(&type_tag, &name)?;
                    for (key, value) in params {
                        op.parameters_mut().set(key, value);
                    }
                    process.add_operator(op)?;
                }
                Step::AddPrebuilt(op) => {
                    process.add_operator(op)?;
                }
                Step::Connect { from, to } => {
                    process.connect(from, to)?;
                }
            }
        }
        Ok(process)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::default_registry;
    use crate::error::EngineError;

    #[test]
    fn test_builder_assembles_and_wires() {
        let process = ProcessBuilder::new("demo", Arc::new(default_registry()))
            .define_macro("tag", "run-1")
            .add("generate-table", "gen")
            .with_param("rows", "4")
            .add("filter-rows", "filter")
            .with_param("column", "index")
            .with_param("equals", "2")
            .connect("gen", "table", "filter", "table")
            .build()
            .unwrap();

        assert_eq!(process.name(), "demo");
        assert!(process.find_operator("gen").is_some());
        assert!(process.find_operator("filter").is_some());
        assert_eq!(process.root_unit().wiring().len(), 1);
        assert_eq!(process.macros().lookup("tag"), Some("run-1"));
    }

    #[test]
    fn test_builder_rejects_unknown_type() {
        let result = ProcessBuilder::new("demo", Arc::new(default_registry()))
            .add("no-such-type", "x")
            .build();
        assert!(matches!(result, Err(EngineError::UnknownTypeTag(_))));
    }

    #[test]
    fn test_builder_rejects_bad_wiring() {
        let result = ProcessBuilder::new("demo", Arc::new(default_registry()))
            .add("generate-table", "gen")
            .connect("gen", "table", "ghost", "in")
            .build();
        assert!(matches!(result, Err(EngineError::UnknownOperator(_))));
    }
}
