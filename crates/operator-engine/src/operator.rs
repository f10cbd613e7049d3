//! Operators: the unit of computation
//!
//! An [`Operator`] owns its ports, its parameter store, its checked-issue
//! list, and its dirty/breakpoint flags. The actual work is injected as a
//! [`Computation`] trait object for leaf operators; chain operators own
//! nested [`ExecutionUnit`]s instead and execute them in order.
//!
//! The two-phase contract: the check pass (driven by
//! [`Process::check_all`](crate::process::Process::check_all)) validates
//! parameters and propagates metadata without running anything; `execute`
//! (driven by [`ExecutionDriver`](crate::driver::ExecutionDriver)) runs the
//! real computation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::descriptor::OperatorDescriptor;
use crate::driver::ProcessControl;
use crate::error::{EngineError, Result};
use crate::meta::{Metadata, RuleScope, TransformRule};
use crate::params::{self, ParameterDeclaration, ParameterStore};
use crate::port::{InputPort, IoPayload, OutputPort};
use crate::unit::ExecutionUnit;
use crate::validation::SetupIssue;

/// Which side of the computation a breakpoint suspends on
pub use crate::driver::BreakpointSite;

/// The injected "do the work" capability of a leaf operator
///
/// Implementations read staged inputs and resolved parameters from the
/// [`ComputeContext`], write outputs back into it, and may publish runtime
/// values for cross-operator macro references. Long-running computations
/// should call [`ComputeContext::checkpoint`] inside their loops so stop
/// and pause requests take effect.
#[async_trait]
pub trait Computation: Send + Sync {
    async fn compute(&self, ctx: &mut ComputeContext) -> Result<()>;

    /// Optional extra validation hook, run during the check pass.
    fn check(&self, operator: &Operator) -> Vec<SetupIssue> {
        let _ = operator;
        Vec::new()
    }
}

/// Wraps a synchronous closure as a [`Computation`]
pub struct SyncComputation {
    f: Box<dyn Fn(&mut ComputeContext) -> Result<()> + Send + Sync>,
}

impl SyncComputation {
    pub fn new(f: impl Fn(&mut ComputeContext) -> Result<()> + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl Computation for SyncComputation {
    async fn compute(&self, ctx: &mut ComputeContext) -> Result<()> {
        (self.f)(ctx)
    }
}

/// Everything a computation sees while it runs
///
/// Built by the driver from the operator's staged inputs and resolved
/// parameters; detached from the process so the computation runs without
/// holding the process lock.
pub struct ComputeContext {
    operator: String,
    inputs: HashMap<String, IoPayload>,
    params: HashMap<String, Option<String>>,
    outputs: HashMap<String, IoPayload>,
    published: HashMap<String, String>,
    config: EngineConfig,
    control: Arc<ProcessControl>,
}

impl ComputeContext {
    pub(crate) fn new(
        operator: impl Into<String>,
        inputs: HashMap<String, IoPayload>,
        params: HashMap<String, Option<String>>,
        config: EngineConfig,
        control: Arc<ProcessControl>,
    ) -> Self {
        Self {
            operator: operator.into(),
            inputs,
            params,
            outputs: HashMap::new(),
            published: HashMap::new(),
            config,
            control,
        }
    }

    /// Name of the operator being executed.
    pub fn operator(&self) -> &str {
        &self.operator
    }

    /// Staged input value, if the port was delivered.
    pub fn input(&self, port: &str) -> Option<&Value> {
        self.inputs.get(port).map(|p| &p.value)
    }

    /// Staged input payload with provenance.
    pub fn input_payload(&self, port: &str) -> Option<&IoPayload> {
        self.inputs.get(port)
    }

    /// Staged input value, or a `MissingInput` error.
    pub fn require_input(&self, port: &str) -> Result<&Value> {
        self.input(port).ok_or_else(|| EngineError::MissingInput {
            operator: self.operator.clone(),
            port: port.to_string(),
        })
    }

    /// Resolved (macro-substituted) parameter value.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_deref())
    }

    /// Resolved parameter value, or a `MissingParameter` error.
    pub fn require_param(&self, key: &str) -> Result<&str> {
        self.param(key).ok_or_else(|| EngineError::MissingParameter {
            operator: self.operator.clone(),
            key: key.to_string(),
        })
    }

    /// Parse an optional boolean parameter.
    pub fn param_bool(&self, key: &str) -> Result<Option<bool>> {
        self.parse_with(key, params::parse_bool)
    }

    /// Parse an optional integer parameter.
    pub fn param_int(&self, key: &str) -> Result<Option<i64>> {
        self.parse_with(key, params::parse_int)
    }

    /// Parse an optional real parameter.
    pub fn param_real(&self, key: &str) -> Result<Option<f64>> {
        self.parse_with(key, params::parse_real)
    }

    fn parse_with<T>(
        &self,
        key: &str,
        parse: impl Fn(&str) -> std::result::Result<T, String>,
    ) -> Result<Option<T>> {
        match self.param(key) {
            None => Ok(None),
            Some(raw) => parse(raw)
                .map(Some)
                .map_err(|message| EngineError::InvalidParameter {
                    operator: self.operator.clone(),
                    key: key.to_string(),
                    message,
                }),
        }
    }

    /// Resolve a repository-location parameter through the injected
    /// resolver. `Ok(None)` when the parameter is absent; an error when a
    /// set location cannot be resolved.
    pub fn param_location(&self, key: &str) -> Result<Option<std::path::PathBuf>> {
        match self.param(key) {
            None => Ok(None),
            Some(location) => self
                .config
                .resolve_location(location)
                .map(Some)
                .ok_or_else(|| EngineError::InvalidParameter {
                    operator: self.operator.clone(),
                    key: key.to_string(),
                    message: format!("cannot resolve location '{}'", location),
                }),
        }
    }

    /// Write a fresh output value. Provenance is stamped by the driver.
    pub fn set_output(&mut self, port: impl Into<String>, value: Value) {
        self.outputs.insert(port.into(), IoPayload::new(value));
    }

    /// Forward a payload unchanged, keeping its provenance.
    pub fn forward(&mut self, port: impl Into<String>, payload: IoPayload) {
        self.outputs.insert(port.into(), payload);
    }

    /// Publish a runtime value for `%{operator.value}` references.
    pub fn publish(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.published.insert(key.into(), value.into());
    }

    /// Cooperative suspension point for long-running computations.
    ///
    /// Returns `Err(Stopped)` when a stop was requested; parks on the
    /// control channel when a pause was requested.
    pub async fn checkpoint(&self) -> Result<()> {
        self.control.checkpoint().await
    }

    pub(crate) fn take_outputs(&mut self) -> HashMap<String, IoPayload> {
        std::mem::take(&mut self.outputs)
    }

    pub(crate) fn take_published(&mut self) -> HashMap<String, String> {
        std::mem::take(&mut self.published)
    }
}

/// Structural variant of an operator
pub enum OperatorKind {
    /// A leaf: runs an injected computation
    Leaf(Arc<dyn Computation>),
    /// A chain: contains nested execution units
    Chain(Vec<ExecutionUnit>),
}

impl std::fmt::Debug for OperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf(_) => write!(f, "Leaf(..)"),
            Self::Chain(units) => write!(f, "Chain({} units)", units.len()),
        }
    }
}

/// Timing record of the most recent apply
#[derive(Debug, Clone)]
pub struct RunStamp {
    pub started_at: DateTime<Local>,
    /// Wall-clock duration; set once the apply finished
    pub wall_ms: Option<u64>,
}

/// A node of the process graph
#[derive(Debug)]
pub struct Operator {
    name: String,
    type_tag: String,
    enabled: bool,
    /// Display-only: whether the editor shows this operator expanded
    expanded: bool,
    compatibility_version: String,
    apply_count: u64,
    dirty: bool,
    /// Marker for the two-step dirty propagation pass
    propagated: bool,
    breakpoint_before: bool,
    breakpoint_after: bool,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    parameters: ParameterStore,
    declarations: Vec<ParameterDeclaration>,
    transformer: Vec<TransformRule>,
    deprecated: Option<String>,
    issues: Vec<SetupIssue>,
    published: HashMap<String, String>,
    last_run: Option<RunStamp>,
    kind: OperatorKind,
}

impl Operator {
    fn from_descriptor(
        name: impl Into<String>,
        descriptor: &OperatorDescriptor,
        kind: OperatorKind,
    ) -> Self {
        Self {
            name: name.into(),
            type_tag: descriptor.type_tag.clone(),
            enabled: true,
            expanded: true,
            compatibility_version: descriptor.compatibility_version.clone(),
            apply_count: 0,
            dirty: true,
            propagated: false,
            breakpoint_before: false,
            breakpoint_after: false,
            inputs: descriptor
                .inputs
                .iter()
                .map(|p| InputPort::new(&p.name, p.kind, p.optional))
                .collect(),
            outputs: descriptor
                .outputs
                .iter()
                .map(|p| OutputPort::new(&p.name, p.kind))
                .collect(),
            parameters: ParameterStore::new(),
            declarations: descriptor.parameters.clone(),
            transformer: descriptor.transformer.clone(),
            deprecated: descriptor.deprecated.clone(),
            issues: Vec::new(),
            published: HashMap::new(),
            last_run: None,
            kind,
        }
    }

    /// A leaf operator with an injected computation.
    pub fn leaf(
        name: impl Into<String>,
        descriptor: &OperatorDescriptor,
        computation: Arc<dyn Computation>,
    ) -> Self {
        Self::from_descriptor(name, descriptor, OperatorKind::Leaf(computation))
    }

    /// A chain operator containing the given execution units.
    pub fn chain(
        name: impl Into<String>,
        descriptor: &OperatorDescriptor,
        units: Vec<ExecutionUnit>,
    ) -> Self {
        Self::from_descriptor(name, descriptor, OperatorKind::Chain(units))
    }

    /// The root chain of a process: no ports, one unit.
    pub(crate) fn root() -> Self {
        use crate::descriptor::OperatorGroup;
        let descriptor = OperatorDescriptor::new("process", "Process", OperatorGroup::Control);
        Self::from_descriptor(
            "root",
            &descriptor,
            OperatorKind::Chain(vec![ExecutionUnit::new("main")]),
        )
    }

    // ------------------------------------------------------------------
    // Identity and flags
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn set_expanded(&mut self, expanded: bool) {
        self.expanded = expanded;
    }

    pub fn compatibility_version(&self) -> &str {
        &self.compatibility_version
    }

    pub(crate) fn set_compatibility_version(&mut self, version: impl Into<String>) {
        self.compatibility_version = version.into();
    }

    pub fn apply_count(&self) -> u64 {
        self.apply_count
    }

    pub fn last_run(&self) -> Option<&RunStamp> {
        self.last_run.as_ref()
    }

    pub fn breakpoint(&self, site: BreakpointSite) -> bool {
        match site {
            BreakpointSite::Before => self.breakpoint_before,
            BreakpointSite::After => self.breakpoint_after,
        }
    }

    pub(crate) fn set_breakpoint(&mut self, site: BreakpointSite, on: bool) {
        match site {
            BreakpointSite::Before => self.breakpoint_before = on,
            BreakpointSite::After => self.breakpoint_after = on,
        }
    }

    // ------------------------------------------------------------------
    // Dirty tracking
    // ------------------------------------------------------------------

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark dirty. Returns true if the flag actually flipped; an operator
    /// that is already dirty keeps its propagation marker.
    pub(crate) fn make_dirty(&mut self) -> bool {
        if self.dirty {
            return false;
        }
        self.dirty = true;
        self.propagated = false;
        true
    }

    pub(crate) fn is_propagated(&self) -> bool {
        self.propagated
    }

    pub(crate) fn mark_propagated(&mut self) {
        self.propagated = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Whether any operator nested below this one is dirty.
    pub fn has_dirty_descendant(&self) -> bool {
        match &self.kind {
            OperatorKind::Leaf(_) => false,
            OperatorKind::Chain(units) => units.iter().any(|unit| {
                unit.operators()
                    .iter()
                    .any(|op| op.is_dirty() || op.has_dirty_descendant())
            }),
        }
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    pub fn kind(&self) -> &OperatorKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut OperatorKind {
        &mut self.kind
    }

    /// Nested units, if this is a chain.
    pub fn units(&self) -> Option<&[ExecutionUnit]> {
        match &self.kind {
            OperatorKind::Chain(units) => Some(units),
            OperatorKind::Leaf(_) => None,
        }
    }

    pub(crate) fn units_mut(&mut self) -> Option<&mut Vec<ExecutionUnit>> {
        match &mut self.kind {
            OperatorKind::Chain(units) => Some(units),
            OperatorKind::Leaf(_) => None,
        }
    }

    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    pub fn input(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub(crate) fn input_mut(&mut self, name: &str) -> Option<&mut InputPort> {
        self.inputs.iter_mut().find(|p| p.name == name)
    }

    pub(crate) fn output_mut(&mut self, name: &str) -> Option<&mut OutputPort> {
        self.outputs.iter_mut().find(|p| p.name == name)
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut ParameterStore {
        &mut self.parameters
    }

    pub fn declarations(&self) -> &[ParameterDeclaration] {
        &self.declarations
    }

    pub fn deprecated(&self) -> Option<&str> {
        self.deprecated.as_deref()
    }

    /// Runtime values published by the last apply.
    pub fn published(&self) -> &HashMap<String, String> {
        &self.published
    }

    pub(crate) fn extend_published(&mut self, values: HashMap<String, String>) {
        self.published.extend(values);
    }

    // ------------------------------------------------------------------
    // Check pass
    // ------------------------------------------------------------------

    /// Operator-level issues collected during the last check pass.
    pub fn issues(&self) -> &[SetupIssue] {
        &self.issues
    }

    /// Operator-level plus per-port issues.
    pub fn all_issues(&self) -> Vec<&SetupIssue> {
        self.issues
            .iter()
            .chain(self.inputs.iter().flat_map(|p| p.errors.iter()))
            .chain(self.outputs.iter().flat_map(|p| p.errors.iter()))
            .collect()
    }

    /// Drop all issues and published metadata (start of a check pass).
    pub(crate) fn clear_check_state(&mut self) {
        self.issues.clear();
        for port in &mut self.inputs {
            port.clear_check_state();
        }
        for port in &mut self.outputs {
            port.clear_check_state();
        }
    }

    /// Validate parameters and preconditions; collect issues, never fail.
    /// `connected` holds the names of input ports the wiring table feeds.
    pub(crate) fn check_setup(&mut self, config: &EngineConfig, connected: &HashSet<String>) {
        if let Some(note) = self.deprecated.clone() {
            self.issues
                .push(SetupIssue::warning(format!("deprecated: {}", note)));
        }

        for decl in self.declarations.clone() {
            if !decl.required {
                continue;
            }
            let present = self.parameters.is_set(&decl.key)
                || decl.default.is_some()
                || config.registered_default(&decl.key).is_some();
            if !present {
                self.issues.push(
                    SetupIssue::error(format!("parameter '{}' is not set", decl.key))
                        .with_fix(format!("set parameter '{}'", decl.key)),
                );
            }
        }

        for port in &mut self.inputs {
            let name = port.name.clone();
            port.check_precondition(connected.contains(&name));
        }

        let computation = match &self.kind {
            OperatorKind::Leaf(c) => Some(c.clone()),
            OperatorKind::Chain(_) => None,
        };
        if let Some(computation) = computation {
            let extra = computation.check(self);
            self.issues.extend(extra);
        }
    }

    /// Run the metadata transformer rules, publishing output metadata.
    /// Later rules see what earlier rules already published.
    pub(crate) fn run_transformer(&mut self) {
        let input_meta: HashMap<String, Metadata> = self
            .inputs
            .iter()
            .filter_map(|p| p.metadata.clone().map(|m| (p.name.clone(), m)))
            .collect();
        let mut output_meta: HashMap<String, Metadata> = HashMap::new();

        let rules = self.transformer.clone();
        let name = self.name.clone();
        for rule in &rules {
            let published = rule.apply(&RuleScope {
                inputs: &input_meta,
                outputs: &output_meta,
            });
            for (port, mut meta) in published {
                if meta.generated_by.is_none() {
                    meta.generated_by = Some(name.clone());
                }
                if let Some(out) = self.output_mut(&port) {
                    out.metadata = Some(meta.clone());
                }
                output_meta.insert(port, meta);
            }
        }
    }

    // ------------------------------------------------------------------
    // Execution bookkeeping
    // ------------------------------------------------------------------

    /// Start an apply: bump the count, stamp the start time.
    pub(crate) fn begin_apply(&mut self) {
        self.apply_count += 1;
        self.last_run = Some(RunStamp {
            started_at: Local::now(),
            wall_ms: None,
        });
    }

    /// Finish a successful apply: clear dirty, record timing, publish the
    /// standard runtime values.
    pub(crate) fn finish_apply(&mut self, wall_ms: u64) {
        self.dirty = false;
        if let Some(stamp) = &mut self.last_run {
            stamp.wall_ms = Some(wall_ms);
        }
        self.published
            .insert("applycount".to_string(), self.apply_count.to_string());
        self.published
            .insert("time".to_string(), wall_ms.to_string());
    }

    /// Write a payload into an output port's cache.
    pub(crate) fn output_port_set_data(&mut self, name: &str, payload: IoPayload) {
        if let Some(port) = self.output_mut(name) {
            port.data = Some(payload);
        }
    }

    /// Drop cached output data (start of every execution pass).
    pub(crate) fn clear_output_data(&mut self) {
        for port in &mut self.outputs {
            port.data = None;
        }
    }

    /// Snapshot of staged input data, for breakpoint delivery.
    pub fn input_data_snapshot(&self) -> HashMap<String, Value> {
        self.inputs
            .iter()
            .filter_map(|p| p.data.as_ref().map(|d| (p.name.clone(), d.value.clone())))
            .collect()
    }

    /// Snapshot of produced output data, for breakpoint delivery.
    pub fn output_data_snapshot(&self) -> HashMap<String, Value> {
        self.outputs
            .iter()
            .filter_map(|p| p.data.as_ref().map(|d| (p.name.clone(), d.value.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{OperatorGroup, PortDescriptor};
    use crate::meta::DataKind;
    use crate::params::{ParameterDeclaration, ParameterType};
    use crate::validation::Severity;

    fn echo_descriptor() -> OperatorDescriptor {
        OperatorDescriptor::new("echo", "Echo", OperatorGroup::Transform)
            .with_input(PortDescriptor::required("in", "In", DataKind::Any))
            .with_output(PortDescriptor::required("out", "Out", DataKind::Any))
            .with_parameter(ParameterDeclaration::required(
                "label",
                ParameterType::Text,
                "label to attach",
            ))
            .with_rule(TransformRule::pass_through("in", "out"))
    }

    fn echo() -> Arc<dyn Computation> {
        Arc::new(SyncComputation::new(|ctx| {
            let value = ctx.require_input("in")?.clone();
            ctx.set_output("out", value);
            Ok(())
        }))
    }

    #[test]
    fn test_new_operator_starts_dirty() {
        let op = Operator::leaf("e", &echo_descriptor(), echo());
        assert!(op.is_dirty());
        assert_eq!(op.apply_count(), 0);
        assert!(op.is_enabled());
    }

    #[test]
    fn test_make_dirty_is_idempotent() {
        let mut op = Operator::leaf("e", &echo_descriptor(), echo());
        op.clear_dirty();
        assert!(op.make_dirty());
        op.mark_propagated();
        // Already dirty: the propagation marker must survive
        assert!(!op.make_dirty());
        assert!(op.is_propagated());
    }

    #[test]
    fn test_check_setup_missing_required_parameter() {
        let mut op = Operator::leaf("e", &echo_descriptor(), echo());
        let connected: HashSet<String> = ["in".to_string()].into_iter().collect();
        op.check_setup(&EngineConfig::new(), &connected);
        assert_eq!(op.issues().len(), 1);
        assert_eq!(op.issues()[0].severity, Severity::Error);
        assert!(!op.issues()[0].fixes.is_empty());
    }

    #[test]
    fn test_check_setup_registered_default_counts_as_present() {
        let mut op = Operator::leaf("e", &echo_descriptor(), echo());
        let connected: HashSet<String> = ["in".to_string()].into_iter().collect();
        let config = EngineConfig::new().with_default("label", "from-config");
        op.check_setup(&config, &connected);
        assert!(op.issues().is_empty());
    }

    #[test]
    fn test_deprecated_descriptor_warns() {
        let descriptor = echo_descriptor().deprecated("use echo-v2");
        let mut op = Operator::leaf("e", &descriptor, echo());
        op.parameters_mut().set("label", "x");
        let connected: HashSet<String> = ["in".to_string()].into_iter().collect();
        op.check_setup(&EngineConfig::new(), &connected);
        assert_eq!(op.issues().len(), 1);
        assert_eq!(op.issues()[0].severity, Severity::Warning);
    }

    #[test]
    fn test_transformer_stamps_generated_by() {
        let mut op = Operator::leaf("e", &echo_descriptor(), echo());
        op.input_mut("in").unwrap().metadata = Some(Metadata::of(DataKind::Table));
        op.run_transformer();
        let meta = op.output("out").unwrap().metadata.as_ref().unwrap();
        assert_eq!(meta.kind, DataKind::Table);
        assert_eq!(meta.generated_by.as_deref(), Some("e"));
    }

    #[test]
    fn test_apply_bookkeeping() {
        let mut op = Operator::leaf("e", &echo_descriptor(), echo());
        op.begin_apply();
        assert_eq!(op.apply_count(), 1);
        assert!(op.is_dirty());
        op.finish_apply(12);
        assert!(!op.is_dirty());
        assert_eq!(op.published().get("applycount").unwrap(), "1");
        assert_eq!(op.last_run().unwrap().wall_ms, Some(12));
    }

    #[tokio::test]
    async fn test_compute_context_accessors() {
        let mut inputs = HashMap::new();
        inputs.insert("in".to_string(), IoPayload::new(serde_json::json!(5)));
        let mut params = HashMap::new();
        params.insert("rows".to_string(), Some("25".to_string()));
        params.insert("absent".to_string(), None);

        let mut ctx = ComputeContext::new(
            "e",
            inputs,
            params,
            EngineConfig::new(),
            ProcessControl::detached(),
        );
        assert_eq!(ctx.require_input("in").unwrap(), &serde_json::json!(5));
        assert!(ctx.require_input("nope").is_err());
        assert_eq!(ctx.param_int("rows").unwrap(), Some(25));
        assert_eq!(ctx.param("absent"), None);
        assert!(ctx.require_param("absent").is_err());

        ctx.set_output("out", serde_json::json!("v"));
        let outputs = ctx.take_outputs();
        assert!(outputs.get("out").unwrap().produced_by.is_none());
    }

    #[tokio::test]
    async fn test_compute_context_parse_error() {
        let mut params = HashMap::new();
        params.insert("rows".to_string(), Some("many".to_string()));
        let ctx = ComputeContext::new(
            "e",
            HashMap::new(),
            params,
            EngineConfig::new(),
            ProcessControl::detached(),
        );
        assert!(matches!(
            ctx.param_int("rows"),
            Err(EngineError::InvalidParameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_param_location_resolution() {
        let mut params = HashMap::new();
        params.insert("target".to_string(), Some("/out/result.json".to_string()));
        let config =
            EngineConfig::new().with_resolver(crate::config::directory_resolver("/repo"));
        let ctx = ComputeContext::new(
            "e",
            HashMap::new(),
            params,
            config,
            ProcessControl::detached(),
        );

        let path = ctx.param_location("target").unwrap().unwrap();
        assert_eq!(path, std::path::PathBuf::from("/repo/out/result.json"));
        assert_eq!(ctx.param_location("absent").unwrap(), None);
    }

    #[tokio::test]
    async fn test_param_location_without_resolver_is_an_error() {
        let mut params = HashMap::new();
        params.insert("target".to_string(), Some("/out/x".to_string()));
        let ctx = ComputeContext::new(
            "e",
            HashMap::new(),
            params,
            EngineConfig::new(),
            ProcessControl::detached(),
        );
        assert!(matches!(
            ctx.param_location("target"),
            Err(EngineError::InvalidParameter { .. })
        ));
    }
}
