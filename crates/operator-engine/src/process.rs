//! The process: root container of the operator tree
//!
//! A [`Process`] owns the root chain, the global macro table, the injected
//! [`EngineConfig`], the run state, and the registry of operator names
//! (unique per process). All authoring mutations go through the process so
//! that name uniqueness holds and every externally visible change reaches
//! the event sink.
//!
//! Dirty tracking is the two-step mark/propagate split: `make_dirty` flips
//! the flag and resets the propagation marker; [`Process::propagate_dirtiness`]
//! walks forward from every marked-but-unpropagated operator until the
//! graph reaches a fixpoint. The pass takes `&mut self`, so overlapping
//! propagation passes cannot exist by construction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Local;

use crate::config::EngineConfig;
use crate::document::{
    BreakpointFlags, ConnectionDocument, Fidelity, OperatorDocument, ProcessDocument, UnitDocument,
};
use crate::driver::BreakpointSite;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::macros::{expand, MacroError, MacroScope, MacroTable};
use crate::meta::Metadata;
use crate::operator::{Operator, OperatorKind};
use crate::port::IoPayload;
use crate::registry::OperatorRegistry;
use crate::unit::{Connection, ExecutionUnit, PortRef};

/// Run state of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

/// Whether a run executes everything or only dirty operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Execute every enabled operator
    Always,
    /// Skip operators whose results are still current
    OnlyDirty,
}

/// Root container of an operator tree
pub struct Process {
    name: String,
    root: Operator,
    macros: MacroTable,
    config: EngineConfig,
    run_state: RunState,
    execution_mode: ExecutionMode,
    registered: HashSet<String>,
    events: Arc<dyn EventSink>,
}

impl Process {
    pub fn new(name: impl Into<String>, config: EngineConfig, events: Arc<dyn EventSink>) -> Self {
        let root = Operator::root();
        let mut registered = HashSet::new();
        registered.insert(root.name().to_string());
        Self {
            name: name.into(),
            root,
            macros: MacroTable::new(),
            config,
            run_state: RunState::Stopped,
            execution_mode: ExecutionMode::Always,
            registered,
            events,
        }
    }

    /// Wrap this process for sharing with the execution driver.
    pub fn into_shared(self) -> Arc<parking_lot::Mutex<Process>> {
        Arc::new(parking_lot::Mutex::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    /// Define a process-level macro.
    pub fn define_macro(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.macros.define(name, value);
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub(crate) fn set_run_state(&mut self, state: RunState) {
        self.run_state = state;
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    pub fn set_execution_mode(&mut self, mode: ExecutionMode) {
        self.execution_mode = mode;
    }

    /// The root chain.
    pub fn root(&self) -> &Operator {
        &self.root
    }

    /// The root chain's single unit.
    pub fn root_unit(&self) -> &ExecutionUnit {
        &self.root.units().expect("root is a chain")[0]
    }

    pub(crate) fn root_unit_mut(&mut self) -> &mut ExecutionUnit {
        &mut self.root.units_mut().expect("root is a chain")[0]
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Structure mutations
    // ------------------------------------------------------------------

    /// Add an operator (and any nested children) to the root unit.
    pub fn add_operator(&mut self, operator: Operator) -> Result<()> {
        let root_name = self.root.name().to_string();
        self.add_operator_into(&root_name, 0, operator)
    }

    /// Add an operator to a unit of a chain. All names in the new subtree
    /// are registered; any collision rejects the whole subtree.
    pub fn add_operator_into(
        &mut self,
        chain: &str,
        unit_idx: usize,
        operator: Operator,
    ) -> Result<()> {
        let mut names = Vec::new();
        collect_names(&operator, &mut names);
        let mut fresh = HashSet::new();
        for name in &names {
            if !fresh.insert(name.clone()) || self.registered.contains(name) {
                return Err(EngineError::DuplicateName(name.clone()));
            }
        }

        let chain_op = find_in(&mut self.root, chain)
            .ok_or_else(|| EngineError::UnknownOperator(chain.to_string()))?;
        let units = chain_op
            .units_mut()
            .ok_or_else(|| EngineError::NotAChain(chain.to_string()))?;
        let unit = units.get_mut(unit_idx).ok_or(EngineError::UnknownUnit {
            operator: chain.to_string(),
            unit: unit_idx,
        })?;
        unit.add(operator);

        self.registered.extend(names);
        Ok(())
    }

    /// Find an operator anywhere in the tree.
    pub fn find_operator(&self, name: &str) -> Option<&Operator> {
        find_in_ref(&self.root, name)
    }

    pub(crate) fn find_operator_mut(&mut self, name: &str) -> Option<&mut Operator> {
        find_in(&mut self.root, name)
    }

    /// Rename an operator, re-registering the name and rewriting every
    /// wiring reference to it.
    pub fn rename_operator(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        if self.registered.contains(to) {
            return Err(EngineError::DuplicateName(to.to_string()));
        }
        let op = find_in(&mut self.root, from)
            .ok_or_else(|| EngineError::UnknownOperator(from.to_string()))?;
        op.set_name(to);
        rewrite_wiring(&mut self.root, from, to);
        self.registered.remove(from);
        self.registered.insert(to.to_string());
        self.emit(EngineEvent::OperatorRenamed {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    /// Enable or disable an operator.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let op = find_in(&mut self.root, name)
            .ok_or_else(|| EngineError::UnknownOperator(name.to_string()))?;
        op.set_enabled(enabled);
        self.emit(EngineEvent::EnabledChanged {
            operator: name.to_string(),
            enabled,
        });
        Ok(())
    }

    /// Set or clear a breakpoint flag.
    pub fn set_breakpoint(&mut self, name: &str, site: BreakpointSite, on: bool) -> Result<()> {
        let op = find_in(&mut self.root, name)
            .ok_or_else(|| EngineError::UnknownOperator(name.to_string()))?;
        op.set_breakpoint(site, on);
        self.emit(EngineEvent::BreakpointChanged {
            operator: name.to_string(),
            site,
            set: on,
        });
        Ok(())
    }

    /// Set a parameter value. The operator becomes dirty.
    pub fn set_parameter(
        &mut self,
        operator: &str,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        let op = find_in(&mut self.root, operator)
            .ok_or_else(|| EngineError::UnknownOperator(operator.to_string()))?;
        op.parameters_mut().set(key, value);
        self.make_dirty(operator)
    }

    /// Wire two ports in the root unit.
    pub fn connect(&mut self, from: PortRef, to: PortRef) -> Result<()> {
        let root_name = self.root.name().to_string();
        self.connect_in(&root_name, 0, from, to)
    }

    /// Wire two ports in a unit of a chain. The consumer becomes dirty.
    pub fn connect_in(
        &mut self,
        chain: &str,
        unit_idx: usize,
        from: PortRef,
        to: PortRef,
    ) -> Result<()> {
        let target = to.operator.clone();
        {
            let chain_op = find_in(&mut self.root, chain)
                .ok_or_else(|| EngineError::UnknownOperator(chain.to_string()))?;
            let units = chain_op
                .units_mut()
                .ok_or_else(|| EngineError::NotAChain(chain.to_string()))?;
            let unit = units.get_mut(unit_idx).ok_or(EngineError::UnknownUnit {
                operator: chain.to_string(),
                unit: unit_idx,
            })?;
            unit.connect(from, to)?;
        }
        if let Some(target) = target {
            self.make_dirty(&target)?;
        }
        Ok(())
    }

    /// Remove the connection feeding an input in the root unit. Idempotent.
    pub fn disconnect(&mut self, to: &PortRef) -> Result<()> {
        let root_name = self.root.name().to_string();
        self.disconnect_in(&root_name, 0, to)
    }

    /// Remove the connection feeding an input in a chain unit. Idempotent.
    pub fn disconnect_in(&mut self, chain: &str, unit_idx: usize, to: &PortRef) -> Result<()> {
        {
            let chain_op = find_in(&mut self.root, chain)
                .ok_or_else(|| EngineError::UnknownOperator(chain.to_string()))?;
            let units = chain_op
                .units_mut()
                .ok_or_else(|| EngineError::NotAChain(chain.to_string()))?;
            let unit = units.get_mut(unit_idx).ok_or(EngineError::UnknownUnit {
                operator: chain.to_string(),
                unit: unit_idx,
            })?;
            unit.disconnect(to);
        }
        if let Some(target) = to.operator.clone() {
            self.make_dirty(&target)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dirty tracking
    // ------------------------------------------------------------------

    /// Mark an operator dirty. Idempotent: an operator that is already
    /// dirty keeps its propagation marker.
    pub fn make_dirty(&mut self, name: &str) -> Result<()> {
        let op = find_in(&mut self.root, name)
            .ok_or_else(|| EngineError::UnknownOperator(name.to_string()))?;
        if op.make_dirty() {
            self.emit(EngineEvent::DirtyChanged {
                operator: name.to_string(),
                dirty: true,
            });
        }
        Ok(())
    }

    /// Walk forward from every dirty-but-unpropagated operator, marking
    /// each downstream operator dirty exactly once per pass.
    pub fn propagate_dirtiness(&mut self) {
        let adjacency = self.forward_adjacency();
        while let Some(name) = self.find_dirty_unpropagated() {
            if let Some(downstream) = adjacency.get(&name) {
                for target in downstream.clone() {
                    let _ = self.make_dirty(&target);
                }
            }
            if let Some(op) = find_in(&mut self.root, &name) {
                op.mark_propagated();
            }
        }
    }

    /// Forward reachability edges: sibling wiring plus the hops through
    /// chain boundary ports.
    fn forward_adjacency(&self) -> HashMap<String, Vec<String>> {
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        collect_adjacency(&self.root, &mut adjacency);
        adjacency
    }

    fn find_dirty_unpropagated(&self) -> Option<String> {
        fn walk(op: &Operator) -> Option<String> {
            if op.is_dirty() && !op.is_propagated() {
                return Some(op.name().to_string());
            }
            if let Some(units) = op.units() {
                for unit in units {
                    for child in unit.operators() {
                        if let Some(found) = walk(child) {
                            return Some(found);
                        }
                    }
                }
            }
            None
        }
        walk(&self.root)
    }

    // ------------------------------------------------------------------
    // Check pass
    // ------------------------------------------------------------------

    /// Clear all prior issues and metadata, re-validate parameters,
    /// recompute metadata for every port across the whole tree, and
    /// propagate the dirty flag downstream. Never fails; all problems
    /// land in the operators' issue lists.
    pub fn check_all(&mut self) {
        for_each_mut(&mut self.root, &mut |op| op.clear_check_state());
        let config = self.config.clone();
        check_chain(&config, &mut self.root);
        self.propagate_dirtiness();
    }

    /// Sum of all issues across the tree, for quick assertions and UIs.
    pub fn issue_count(&self) -> usize {
        let mut count = 0;
        for_each(&self.root, &mut |op| count += op.all_issues().len());
        count
    }

    // ------------------------------------------------------------------
    // Parameter resolution
    // ------------------------------------------------------------------

    /// Resolve one parameter: explicit value, else declared default, else
    /// the registered default from the engine config; macro-expanded.
    /// `Ok(None)` means the parameter is absent (optional semantics).
    pub fn resolve_parameter(&self, operator: &str, key: &str) -> Result<Option<String>> {
        let op = find_in_ref(&self.root, operator)
            .ok_or_else(|| EngineError::UnknownOperator(operator.to_string()))?;
        let raw = op
            .parameters()
            .get_raw(key)
            .map(|s| s.to_string())
            .or_else(|| {
                op.declarations()
                    .iter()
                    .find(|d| d.key == key)
                    .and_then(|d| d.default.clone())
            })
            .or_else(|| self.config.registered_default(key).map(|s| s.to_string()));
        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(self.expand_for(op, &raw)?)),
        }
    }

    /// Resolve every declared parameter plus any explicitly set ones.
    pub(crate) fn resolved_parameters(
        &self,
        operator: &str,
    ) -> Result<HashMap<String, Option<String>>> {
        let op = find_in_ref(&self.root, operator)
            .ok_or_else(|| EngineError::UnknownOperator(operator.to_string()))?;
        let mut keys: Vec<String> = op.declarations().iter().map(|d| d.key.clone()).collect();
        for (key, _) in op.parameters().iter() {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
        let mut resolved = HashMap::new();
        for key in keys {
            let value = self.resolve_parameter(operator, &key)?;
            resolved.insert(key, value);
        }
        Ok(resolved)
    }

    /// Read a runtime value published by a named operator.
    pub fn published_value(&self, operator: &str, key: &str) -> Result<String> {
        lookup_published(&self.root, operator, key).map_err(EngineError::from)
    }

    fn expand_for(&self, op: &Operator, raw: &str) -> Result<String> {
        let values = |operator: &str, value: &str| -> std::result::Result<String, MacroError> {
            lookup_published(&self.root, operator, value)
        };
        let scope = MacroScope {
            macros: &self.macros,
            operator: op.name(),
            type_tag: op.type_tag(),
            apply_count: op.apply_count(),
            now: Local::now(),
            values: &values,
        };
        expand(raw, &scope).map_err(EngineError::from)
    }

    // ------------------------------------------------------------------
    // Driver support
    // ------------------------------------------------------------------

    pub(crate) fn operator_at_path(&self, path: &[(usize, usize)]) -> Option<&Operator> {
        let mut current = &self.root;
        for &(unit, op) in path {
            current = current.units()?.get(unit)?.operators().get(op)?;
        }
        Some(current)
    }

    pub(crate) fn operator_at_path_mut(
        &mut self,
        path: &[(usize, usize)],
    ) -> Option<&mut Operator> {
        let mut current = &mut self.root;
        for &(unit, op) in path {
            current = current.units_mut()?.get_mut(unit)?.operators_mut().get_mut(op)?;
        }
        Some(current)
    }

    /// Stage the inputs of the operator at `path` from its parent unit's
    /// wiring, pulling boundary data from the owning chain's input ports.
    pub(crate) fn stage_inputs_at(
        &mut self,
        path: &[(usize, usize)],
    ) -> HashMap<String, IoPayload> {
        let Some((&(unit_idx, op_idx), parent_path)) = path.split_last() else {
            // The root has no ports to stage
            return HashMap::new();
        };
        let Some(parent) = self.operator_at_path_mut(parent_path) else {
            return HashMap::new();
        };
        let chain_inputs: HashMap<String, IoPayload> = parent
            .inputs()
            .iter()
            .filter_map(|p| p.data.clone().map(|d| (p.name.clone(), d)))
            .collect();
        let Some(units) = parent.units_mut() else {
            return HashMap::new();
        };
        let Some(unit) = units.get_mut(unit_idx) else {
            return HashMap::new();
        };
        unit.stage_inputs(op_idx, &chain_inputs)
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Serialize at the given fidelity level. Core-only strips the
    /// editor-only fields (expanded flag, breakpoints).
    pub fn to_document(&self, fidelity: Fidelity) -> ProcessDocument {
        ProcessDocument {
            name: self.name.clone(),
            macros: self.macros.iter().map(|(k, v)| (k.into(), v.into())).collect(),
            root: operator_document(&self.root, fidelity),
        }
    }

    /// Stable serialization of the logic-relevant state, for dirty
    /// comparison and remote submission.
    pub fn core_fingerprint(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_document(Fidelity::CoreOnly))?)
    }

    /// Rebuild a process from its serialized form.
    pub fn from_document(
        doc: &ProcessDocument,
        registry: &OperatorRegistry,
        config: EngineConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let mut process = Process::new(&doc.name, config, events);
        for (name, value) in &doc.macros {
            process.macros.define(name, value);
        }

        if !doc.root.units.is_empty() {
            let units: Result<Vec<ExecutionUnit>> = doc
                .root
                .units
                .iter()
                .map(|u| build_unit(u, registry, None))
                .collect();
            *process.root.units_mut().expect("root is a chain") = units?;
        }
        for (key, value) in &doc.root.parameters {
            process.root.parameters_mut().set(key, value);
        }

        let mut names = Vec::new();
        collect_names(&process.root, &mut names);
        let mut registered = HashSet::new();
        for name in names {
            if !registered.insert(name.clone()) {
                return Err(EngineError::DuplicateName(name));
            }
        }
        process.registered = registered;
        Ok(process)
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.name)
            .field("run_state", &self.run_state)
            .field("operators", &self.registered.len())
            .finish()
    }
}

// ----------------------------------------------------------------------
// Tree walking helpers
// ----------------------------------------------------------------------

fn find_in<'a>(op: &'a mut Operator, name: &str) -> Option<&'a mut Operator> {
    if op.name() == name {
        return Some(op);
    }
    if let Some(units) = op.units_mut() {
        for unit in units {
            for child in unit.operators_mut() {
                if let Some(found) = find_in(child, name) {
                    return Some(found);
                }
            }
        }
    }
    None
}

fn find_in_ref<'a>(op: &'a Operator, name: &str) -> Option<&'a Operator> {
    if op.name() == name {
        return Some(op);
    }
    if let Some(units) = op.units() {
        for unit in units {
            for child in unit.operators() {
                if let Some(found) = find_in_ref(child, name) {
                    return Some(found);
                }
            }
        }
    }
    None
}

fn collect_names(op: &Operator, out: &mut Vec<String>) {
    out.push(op.name().to_string());
    if let Some(units) = op.units() {
        for unit in units {
            for child in unit.operators() {
                collect_names(child, out);
            }
        }
    }
}

fn for_each(op: &Operator, f: &mut impl FnMut(&Operator)) {
    f(op);
    if let Some(units) = op.units() {
        for unit in units {
            for child in unit.operators() {
                for_each(child, f);
            }
        }
    }
}

fn for_each_mut(op: &mut Operator, f: &mut impl FnMut(&mut Operator)) {
    f(op);
    if let Some(units) = op.units_mut() {
        for unit in units {
            for child in unit.operators_mut() {
                for_each_mut(child, f);
            }
        }
    }
}

fn rewrite_wiring(op: &mut Operator, old: &str, new: &str) {
    if let Some(units) = op.units_mut() {
        for unit in units {
            for conn in unit.wiring_mut() {
                if conn.from.operator.as_deref() == Some(old) {
                    conn.from.operator = Some(new.to_string());
                }
                if conn.to.operator.as_deref() == Some(old) {
                    conn.to.operator = Some(new.to_string());
                }
            }
            for child in unit.operators_mut() {
                rewrite_wiring(child, old, new);
            }
        }
    }
}

fn collect_adjacency(chain: &Operator, adjacency: &mut HashMap<String, Vec<String>>) {
    let chain_name = chain.name().to_string();
    if let Some(units) = chain.units() {
        for unit in units {
            for conn in unit.wiring() {
                match (&conn.from.operator, &conn.to.operator) {
                    (Some(from), Some(to)) => {
                        adjacency.entry(from.clone()).or_default().push(to.clone());
                    }
                    // An operator feeding a boundary sink reaches the
                    // chain's output port, hence the chain itself
                    (Some(from), None) => {
                        adjacency
                            .entry(from.clone())
                            .or_default()
                            .push(chain_name.clone());
                    }
                    // The chain's input port feeds operators inside
                    (None, Some(to)) => {
                        adjacency
                            .entry(chain_name.clone())
                            .or_default()
                            .push(to.clone());
                    }
                    (None, None) => {}
                }
            }
            for child in unit.operators() {
                if matches!(child.kind(), OperatorKind::Chain(_)) {
                    collect_adjacency(child, adjacency);
                }
            }
        }
    }
}

fn lookup_published(
    root: &Operator,
    operator: &str,
    value: &str,
) -> std::result::Result<String, MacroError> {
    match find_in_ref(root, operator) {
        None => Err(MacroError::UnknownOperatorRef {
            operator: operator.to_string(),
            value: value.to_string(),
        }),
        Some(target) => target
            .published()
            .get(value)
            .cloned()
            .ok_or_else(|| MacroError::UnknownValueRef {
                operator: operator.to_string(),
                value: value.to_string(),
            }),
    }
}

/// Recursive check pass over one chain: stage input metadata in execution
/// order, validate each operator, run transformers, and lift boundary
/// metadata up to the chain's output ports.
fn check_chain(config: &EngineConfig, chain: &mut Operator) {
    let chain_meta: HashMap<String, Metadata> = chain
        .inputs()
        .iter()
        .filter_map(|p| p.metadata.clone().map(|m| (p.name.clone(), m)))
        .collect();
    let mut boundary_meta = HashMap::new();

    if let Some(units) = chain.units_mut() {
        for unit in units.iter_mut() {
            let order = unit
                .execution_order()
                .unwrap_or_else(|_| (0..unit.operators().len()).collect());
            for idx in order {
                let connected = unit.stage_input_metadata(idx, &chain_meta);
                let child = &mut unit.operators_mut()[idx];
                child.check_setup(config, &connected);
                if matches!(child.kind(), OperatorKind::Chain(_)) {
                    check_chain(config, child);
                } else {
                    child.run_transformer();
                }
            }
            boundary_meta.extend(unit.collect_boundary_metadata());
        }
    }

    for (port, meta) in boundary_meta {
        if let Some(out) = chain.output_mut(&port) {
            out.metadata = Some(meta);
        }
    }
}

fn operator_document(op: &Operator, fidelity: Fidelity) -> OperatorDocument {
    let breakpoints = match fidelity {
        Fidelity::Full
            if op.breakpoint(BreakpointSite::Before) || op.breakpoint(BreakpointSite::After) =>
        {
            Some(BreakpointFlags {
                before: op.breakpoint(BreakpointSite::Before),
                after: op.breakpoint(BreakpointSite::After),
            })
        }
        _ => None,
    };
    OperatorDocument {
        name: op.name().to_string(),
        type_tag: op.type_tag().to_string(),
        enabled: op.is_enabled(),
        expanded: match fidelity {
            Fidelity::Full => Some(op.is_expanded()),
            Fidelity::CoreOnly => None,
        },
        breakpoints,
        compatibility_version: op.compatibility_version().to_string(),
        parameters: op
            .parameters()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        units: op
            .units()
            .map(|units| units.iter().map(|u| unit_document(u, fidelity)).collect())
            .unwrap_or_default(),
    }
}

fn unit_document(unit: &ExecutionUnit, fidelity: Fidelity) -> UnitDocument {
    UnitDocument {
        name: unit.name().to_string(),
        operators: unit
            .operators()
            .iter()
            .map(|op| operator_document(op, fidelity))
            .collect(),
        wiring: unit
            .wiring()
            .iter()
            .map(|conn| ConnectionDocument {
                from_operator: conn.from.operator.clone(),
                from_port: conn.from.port.clone(),
                to_operator: conn.to.operator.clone(),
                to_port: conn.to.port.clone(),
            })
            .collect(),
    }
}

fn build_operator(doc: &OperatorDocument, registry: &OperatorRegistry) -> Result<Operator> {
    let mut op = registry.instantiate(&doc.type_tag, &doc.name)?;
    if !doc.units.is_empty() {
        let descriptor = registry
            .descriptor(&doc.type_tag)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTypeTag(doc.type_tag.clone()))?;
        let units: Result<Vec<ExecutionUnit>> = doc
            .units
            .iter()
            .map(|u| build_unit(u, registry, Some(&descriptor)))
            .collect();
        match op.units_mut() {
            Some(existing) => *existing = units?,
            None => return Err(EngineError::NotAChain(doc.name.clone())),
        }
    }
    op.set_enabled(doc.enabled);
    if let Some(expanded) = doc.expanded {
        op.set_expanded(expanded);
    }
    if let Some(flags) = &doc.breakpoints {
        op.set_breakpoint(BreakpointSite::Before, flags.before);
        op.set_breakpoint(BreakpointSite::After, flags.after);
    }
    op.set_compatibility_version(&doc.compatibility_version);
    for (key, value) in &doc.parameters {
        op.parameters_mut().set(key, value);
    }
    Ok(op)
}

fn build_unit(
    doc: &UnitDocument,
    registry: &OperatorRegistry,
    chain: Option<&crate::descriptor::OperatorDescriptor>,
) -> Result<ExecutionUnit> {
    let mut unit = match chain {
        Some(descriptor) => ExecutionUnit::for_chain(&doc.name, descriptor),
        None => ExecutionUnit::new(&doc.name),
    };
    for op_doc in &doc.operators {
        unit.add(build_operator(op_doc, registry)?);
    }
    for conn in &doc.wiring {
        unit.wiring_mut().push(Connection {
            from: PortRef {
                operator: conn.from_operator.clone(),
                port: conn.from_port.clone(),
            },
            to: PortRef {
                operator: conn.to_operator.clone(),
                port: conn.to_port.clone(),
            },
        });
    }
    Ok(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{OperatorDescriptor, OperatorGroup, PortDescriptor};
    use crate::events::NullEventSink;
    use crate::meta::{DataKind, TransformRule};
    use crate::operator::SyncComputation;

    fn process() -> Process {
        Process::new("test", EngineConfig::new(), Arc::new(NullEventSink))
    }

    fn pass_through(name: &str) -> Operator {
        let descriptor = OperatorDescriptor::new("echo", "Echo", OperatorGroup::Transform)
            .with_input(PortDescriptor::required("in", "In", DataKind::Any))
            .with_output(PortDescriptor::required("out", "Out", DataKind::Any))
            .with_rule(TransformRule::pass_through("in", "out"));
        Operator::leaf(
            name,
            &descriptor,
            Arc::new(SyncComputation::new(|ctx| {
                if let Some(payload) = ctx.input_payload("in").cloned() {
                    ctx.forward("out", payload);
                }
                Ok(())
            })),
        )
    }

    fn source(name: &str) -> Operator {
        let descriptor = OperatorDescriptor::new("gen", "Gen", OperatorGroup::Source)
            .with_output(PortDescriptor::required("out", "Out", DataKind::Table))
            .with_rule(TransformRule::generate("out", DataKind::Table));
        Operator::leaf(
            name,
            &descriptor,
            Arc::new(SyncComputation::new(|ctx| {
                ctx.set_output("out", serde_json::json!([]));
                Ok(())
            })),
        )
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut p = process();
        p.add_operator(source("a")).unwrap();
        let err = p.add_operator(source("a")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateName(_)));
    }

    #[test]
    fn test_rename_re_registers_and_rewrites_wiring() {
        let mut p = process();
        p.add_operator(source("a")).unwrap();
        p.add_operator(pass_through("b")).unwrap();
        p.connect(PortRef::of("a", "out"), PortRef::of("b", "in"))
            .unwrap();

        p.rename_operator("a", "alpha").unwrap();
        assert!(p.find_operator("a").is_none());
        assert!(p.find_operator("alpha").is_some());
        let conn = p.root_unit().source_of(&PortRef::of("b", "in")).unwrap();
        assert_eq!(conn.from.operator.as_deref(), Some("alpha"));

        // The freed name is available again
        p.add_operator(source("a")).unwrap();
        // The taken one is not
        assert!(matches!(
            p.rename_operator("a", "alpha"),
            Err(EngineError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_dirty_propagation_closure() {
        let mut p = process();
        p.add_operator(source("a")).unwrap();
        p.add_operator(pass_through("b")).unwrap();
        p.add_operator(pass_through("c")).unwrap();
        p.add_operator(source("lone")).unwrap();
        p.connect(PortRef::of("a", "out"), PortRef::of("b", "in"))
            .unwrap();
        p.connect(PortRef::of("b", "out"), PortRef::of("c", "in"))
            .unwrap();

        // Settle everything clean first
        p.propagate_dirtiness();
        for name in ["a", "b", "c", "lone"] {
            p.find_operator_mut(name).unwrap().clear_dirty();
        }

        p.make_dirty("a").unwrap();
        p.propagate_dirtiness();

        assert!(p.find_operator("a").unwrap().is_dirty());
        assert!(p.find_operator("b").unwrap().is_dirty());
        assert!(p.find_operator("c").unwrap().is_dirty());
        // Unreachable operator untouched
        assert!(!p.find_operator("lone").unwrap().is_dirty());
    }

    #[test]
    fn test_parameter_change_marks_dirty() {
        let mut p = process();
        p.add_operator(source("a")).unwrap();
        p.propagate_dirtiness();
        p.find_operator_mut("a").unwrap().clear_dirty();

        p.set_parameter("a", "rows", "5").unwrap();
        assert!(p.find_operator("a").unwrap().is_dirty());
    }

    #[test]
    fn test_check_all_flags_incompatibility_on_exactly_one_port() {
        let mut p = process();
        // Source produces Number, consumer requires Table
        let bad_descriptor = OperatorDescriptor::new("num", "Num", OperatorGroup::Source)
            .with_output(PortDescriptor::required("out", "Out", DataKind::Any))
            .with_rule(TransformRule::generate("out", DataKind::Number));
        let bad = Operator::leaf(
            "a",
            &bad_descriptor,
            Arc::new(SyncComputation::new(|_| Ok(()))),
        );
        let consumer_descriptor = OperatorDescriptor::new("take", "Take", OperatorGroup::Sink)
            .with_input(PortDescriptor::required("table", "Table", DataKind::Table));
        let consumer = Operator::leaf(
            "b",
            &consumer_descriptor,
            Arc::new(SyncComputation::new(|_| Ok(()))),
        );
        p.add_operator(bad).unwrap();
        p.add_operator(consumer).unwrap();
        p.connect(PortRef::of("a", "out"), PortRef::of("b", "table"))
            .unwrap();

        p.check_all();
        let b = p.find_operator("b").unwrap();
        assert_eq!(b.input("table").unwrap().errors.len(), 1);
        assert_eq!(p.issue_count(), 1);

        // Fix the source kind and re-check: all clear
        let a = p.find_operator_mut("a").unwrap();
        let fixed = OperatorDescriptor::new("num", "Num", OperatorGroup::Source)
            .with_output(PortDescriptor::required("out", "Out", DataKind::Any))
            .with_rule(TransformRule::generate("out", DataKind::Table));
        *a = Operator::leaf("a", &fixed, Arc::new(SyncComputation::new(|_| Ok(()))));
        p.connect(PortRef::of("a", "out"), PortRef::of("b", "table"))
            .unwrap_err(); // still wired from before
        p.check_all();
        assert_eq!(p.issue_count(), 0);
    }

    #[test]
    fn test_metadata_propagates_through_chain_boundary() {
        let mut p = process();
        let sub_descriptor = OperatorDescriptor::new("subprocess", "Subprocess", OperatorGroup::Control)
            .with_input(PortDescriptor::optional("in", "In", DataKind::Any))
            .with_output(PortDescriptor::required("out", "Out", DataKind::Any));
        let mut body = ExecutionUnit::for_chain("body", &sub_descriptor);
        body.add(source("inner"));
        body.connect(PortRef::of("inner", "out"), PortRef::boundary("out"))
            .unwrap();
        let sub = Operator::chain("sub", &sub_descriptor, vec![body]);
        p.add_operator(sub).unwrap();
        p.add_operator(pass_through("after")).unwrap();
        p.connect(PortRef::of("sub", "out"), PortRef::of("after", "in"))
            .unwrap();

        p.check_all();

        let sub = p.find_operator("sub").unwrap();
        assert_eq!(
            sub.output("out").unwrap().metadata.as_ref().unwrap().kind,
            DataKind::Table
        );
        let after = p.find_operator("after").unwrap();
        assert_eq!(
            after.input("in").unwrap().metadata.as_ref().unwrap().kind,
            DataKind::Table
        );
    }

    #[test]
    fn test_resolve_parameter_precedence() {
        let config = EngineConfig::new().with_default("seed", "1992");
        let mut p = Process::new("test", config, Arc::new(NullEventSink));
        let descriptor = OperatorDescriptor::new("gen", "Gen", OperatorGroup::Source)
            .with_parameter(
                crate::params::ParameterDeclaration::optional(
                    "rows",
                    crate::params::ParameterType::Int,
                    "rows",
                )
                .with_default("10"),
            )
            .with_parameter(crate::params::ParameterDeclaration::optional(
                "seed",
                crate::params::ParameterType::Int,
                "seed",
            ));
        p.add_operator(Operator::leaf(
            "g",
            &descriptor,
            Arc::new(SyncComputation::new(|_| Ok(()))),
        ))
        .unwrap();

        // Declared default
        assert_eq!(p.resolve_parameter("g", "rows").unwrap().as_deref(), Some("10"));
        // Registered default from the config
        assert_eq!(p.resolve_parameter("g", "seed").unwrap().as_deref(), Some("1992"));
        // Explicit value wins
        p.set_parameter("g", "rows", "25").unwrap();
        assert_eq!(p.resolve_parameter("g", "rows").unwrap().as_deref(), Some("25"));
        // Undeclared, unset: absent
        assert_eq!(p.resolve_parameter("g", "nothing").unwrap(), None);
    }

    #[test]
    fn test_resolve_parameter_expands_macros() {
        let mut p = process();
        p.define_macro("dir", "/data");
        p.add_operator(source("g")).unwrap();
        p.set_parameter("g", "path", "%{dir}/%{n}.csv").unwrap();
        assert_eq!(
            p.resolve_parameter("g", "path").unwrap().as_deref(),
            Some("/data/g.csv")
        );
    }

    #[test]
    fn test_cross_operator_value_reference() {
        let mut p = process();
        p.add_operator(source("g")).unwrap();
        p.add_operator(pass_through("h")).unwrap();
        p.find_operator_mut("g")
            .unwrap()
            .extend_published([("applycount".to_string(), "4".to_string())].into());
        p.set_parameter("h", "note", "g ran %{g.applycount} times")
            .unwrap();
        assert_eq!(
            p.resolve_parameter("h", "note").unwrap().as_deref(),
            Some("g ran 4 times")
        );

        // Dangling reference is a hard error
        p.set_parameter("h", "bad", "%{ghost.applycount}").unwrap();
        assert!(matches!(
            p.resolve_parameter("h", "bad"),
            Err(EngineError::Macro(MacroError::UnknownOperatorRef { .. }))
        ));
    }

    #[test]
    fn test_document_roundtrip_core_vs_full() {
        let mut p = process();
        p.define_macro("dir", "/data");
        p.add_operator(source("a")).unwrap();
        p.add_operator(pass_through("b")).unwrap();
        p.connect(PortRef::of("a", "out"), PortRef::of("b", "in"))
            .unwrap();
        p.set_breakpoint("a", BreakpointSite::Before, true).unwrap();
        p.set_parameter("a", "rows", "5").unwrap();

        let full = p.to_document(Fidelity::Full);
        let core = p.to_document(Fidelity::CoreOnly);

        let a_full = &full.root.units[0].operators[0];
        assert!(a_full.breakpoints.is_some());
        assert!(a_full.expanded.is_some());

        let a_core = &core.root.units[0].operators[0];
        assert!(a_core.breakpoints.is_none());
        assert!(a_core.expanded.is_none());
        assert_eq!(a_core.parameters.get("rows").unwrap(), "5");
        assert_eq!(core.root.units[0].wiring.len(), 1);
    }

    #[test]
    fn test_core_fingerprint_ignores_breakpoints() {
        let mut p = process();
        p.add_operator(source("a")).unwrap();
        let before = p.core_fingerprint().unwrap();
        p.set_breakpoint("a", BreakpointSite::After, true).unwrap();
        assert_eq!(p.core_fingerprint().unwrap(), before);
        p.set_parameter("a", "rows", "99").unwrap();
        assert_ne!(p.core_fingerprint().unwrap(), before);
    }
}
