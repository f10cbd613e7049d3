//! Operator Engine - dataflow process execution for Spindle
//!
//! This crate is the execution core behind the Spindle workflow editor: the
//! operator/port dataflow graph of an analytics process, its metadata
//! propagation, its dirty tracking, its breakpoint-driven suspend/resume
//! execution model, and its parameter/macro substitution engine. It has no
//! UI concerns; editors, schedulers and command-line runners all drive the
//! same contract.
//!
//! # Architecture
//!
//! - [`Process`]: root container: operator tree, macro table, run state
//! - [`Operator`]: unit of computation; leafs run an injected
//!   [`Computation`], chains nest [`ExecutionUnit`]s
//! - [`ExecutionUnit`]: sibling operators plus their wiring table
//! - [`ExecutionDriver`]: runs a process on its own task, with channel-based
//!   breakpoint/pause/stop rendezvous
//! - [`OperatorRegistry`]: explicit type-tag → factory mapping
//! - [`EventSink`]: single event channel replacing per-observer fan-out
//!
//! # Example
//!
//! ```ignore
//! use operator_engine::{default_registry, ProcessBuilder, ExecutionDriver};
//!
//! let process = ProcessBuilder::new("demo", registry)
//!     .add("generate-table", "gen")
//!     .with_param("rows", "25")
//!     .add("log-sink", "log")
//!     .connect("gen", "table", "log", "through")
//!     .build()?;
//! let summary = ExecutionDriver::new().run(&process.into_shared()).await?;
//! ```

pub mod builder;
pub mod builtins;
pub mod config;
pub mod descriptor;
pub mod document;
pub mod driver;
pub mod error;
pub mod events;
pub mod macros;
pub mod meta;
pub mod operator;
pub mod params;
pub mod port;
pub mod process;
pub mod registry;
pub mod unit;
pub mod validation;

// Re-export key types
pub use builder::ProcessBuilder;
pub use builtins::default_registry;
pub use config::{EngineConfig, LocationResolver};
pub use descriptor::{OperatorDescriptor, OperatorGroup, PortDescriptor};
pub use document::{Fidelity, ProcessDocument};
pub use driver::{
    BreakpointHit, BreakpointListener, BreakpointSite, ControlSignal, ExecutionDriver,
    ProcessControl, ProcessRun, RunOutcome, RunSummary,
};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventSink, NullEventSink, VecEventSink};
pub use macros::{MacroError, MacroTable};
pub use meta::{DataKind, Metadata, TransformRule};
pub use operator::{Computation, ComputeContext, Operator, OperatorKind, SyncComputation};
pub use params::{ParameterDeclaration, ParameterType};
pub use port::{InputPort, IoPayload, OutputPort};
pub use process::{ExecutionMode, Process, RunState};
pub use registry::{ComputationFactory, OperatorRegistry};
pub use unit::{Connection, ExecutionUnit, PortRef};
pub use validation::{validate_structure, SetupIssue, Severity};
