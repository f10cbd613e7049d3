//! Execution units: one nesting level of the graph
//!
//! A unit owns an ordered list of sibling operators and the wiring table
//! that connects their ports. Wiring never crosses unit borders directly;
//! data enters and leaves through the boundary ports the owning chain
//! exposes to its parent.

use std::collections::{HashMap, HashSet};

use crate::descriptor::OperatorDescriptor;
use crate::error::{EngineError, Result};
use crate::meta::Metadata;
use crate::operator::Operator;
use crate::port::IoPayload;

/// Address of one port within a unit
///
/// `operator: None` addresses a boundary port of the owning chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRef {
    pub operator: Option<String>,
    pub port: String,
}

impl PortRef {
    /// Port on a sibling operator.
    pub fn of(operator: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            operator: Some(operator.into()),
            port: port.into(),
        }
    }

    /// Boundary port of the owning chain.
    pub fn boundary(port: impl Into<String>) -> Self {
        Self {
            operator: None,
            port: port.into(),
        }
    }
}

/// One entry of the wiring table: an output feeding an input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub from: PortRef,
    pub to: PortRef,
}

/// An ordered collection of sibling operators plus their wiring
#[derive(Debug)]
pub struct ExecutionUnit {
    name: String,
    operators: Vec<Operator>,
    wiring: Vec<Connection>,
    /// Chain input ports visible inside this unit as data sources
    boundary_inputs: Vec<String>,
    /// Chain output ports this unit feeds
    boundary_outputs: Vec<String>,
}

impl ExecutionUnit {
    /// An empty unit with no boundary ports (the root unit).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operators: Vec::new(),
            wiring: Vec::new(),
            boundary_inputs: Vec::new(),
            boundary_outputs: Vec::new(),
        }
    }

    /// A unit whose boundary mirrors the chain descriptor's ports.
    pub fn for_chain(name: impl Into<String>, descriptor: &OperatorDescriptor) -> Self {
        let mut unit = Self::new(name);
        unit.boundary_inputs = descriptor.inputs.iter().map(|p| p.name.clone()).collect();
        unit.boundary_outputs = descriptor.outputs.iter().map(|p| p.name.clone()).collect();
        unit
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn boundary_inputs(&self) -> &[String] {
        &self.boundary_inputs
    }

    pub fn boundary_outputs(&self) -> &[String] {
        &self.boundary_outputs
    }

    /// Append an operator. Name registration happens at the process level.
    pub fn add(&mut self, operator: Operator) {
        self.operators.push(operator);
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub(crate) fn operators_mut(&mut self) -> &mut Vec<Operator> {
        &mut self.operators
    }

    pub fn operator(&self, name: &str) -> Option<&Operator> {
        self.operators.iter().find(|o| o.name() == name)
    }

    pub(crate) fn operator_mut(&mut self, name: &str) -> Option<&mut Operator> {
        self.operators.iter_mut().find(|o| o.name() == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.operators.iter().position(|o| o.name() == name)
    }

    pub fn wiring(&self) -> &[Connection] {
        &self.wiring
    }

    pub(crate) fn wiring_mut(&mut self) -> &mut Vec<Connection> {
        &mut self.wiring
    }

    /// The connection feeding an input, if any.
    pub fn source_of(&self, to: &PortRef) -> Option<&Connection> {
        self.wiring.iter().find(|c| &c.to == to)
    }

    /// Wire an output into an input.
    ///
    /// Fails without touching the table when the input is already
    /// connected, an endpoint does not exist, or the declared kinds are
    /// statically incompatible.
    pub fn connect(&mut self, from: PortRef, to: PortRef) -> Result<()> {
        let source_kind = match &from.operator {
            Some(name) => {
                let op = self
                    .operator(name)
                    .ok_or_else(|| EngineError::UnknownOperator(name.clone()))?;
                let port = op
                    .output(&from.port)
                    .ok_or_else(|| EngineError::UnknownPort {
                        operator: name.clone(),
                        port: from.port.clone(),
                    })?;
                Some(port.kind)
            }
            None => {
                if !self.boundary_inputs.contains(&from.port) {
                    return Err(EngineError::UnknownPort {
                        operator: self.name.clone(),
                        port: from.port.clone(),
                    });
                }
                None
            }
        };

        let target_kind = match &to.operator {
            Some(name) => {
                let op = self
                    .operator(name)
                    .ok_or_else(|| EngineError::UnknownOperator(name.clone()))?;
                let port = op.input(&to.port).ok_or_else(|| EngineError::UnknownPort {
                    operator: name.clone(),
                    port: to.port.clone(),
                })?;
                Some(port.kind)
            }
            None => {
                if !self.boundary_outputs.contains(&to.port) {
                    return Err(EngineError::UnknownPort {
                        operator: self.name.clone(),
                        port: to.port.clone(),
                    });
                }
                None
            }
        };

        if self.source_of(&to).is_some() {
            return Err(EngineError::AlreadyConnected {
                operator: to.operator.clone().unwrap_or_else(|| self.name.clone()),
                port: to.port.clone(),
            });
        }

        if let (Some(produced), Some(required)) = (source_kind, target_kind) {
            if !produced.satisfies(&required) {
                return Err(EngineError::IncompatibleConnection {
                    operator: to.operator.clone().unwrap_or_else(|| self.name.clone()),
                    port: to.port.clone(),
                    produced,
                    required,
                });
            }
        }

        self.wiring.push(Connection { from, to });
        Ok(())
    }

    /// Remove the connection feeding an input. Idempotent.
    pub fn disconnect(&mut self, to: &PortRef) {
        self.wiring.retain(|c| &c.to != to);
    }

    /// Names of the input ports of `operator` that have a source.
    pub fn connected_inputs(&self, operator: &str) -> HashSet<String> {
        self.wiring
            .iter()
            .filter(|c| c.to.operator.as_deref() == Some(operator))
            .map(|c| c.to.port.clone())
            .collect()
    }

    /// Operators directly downstream of `operator` via the wiring table.
    pub fn downstream_of(&self, operator: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut downstream = Vec::new();
        for conn in &self.wiring {
            if conn.from.operator.as_deref() == Some(operator) {
                if let Some(target) = &conn.to.operator {
                    if seen.insert(target.clone()) {
                        downstream.push(target.clone());
                    }
                }
            }
        }
        downstream
    }

    /// Topological execution order (producers before consumers), stable
    /// with respect to insertion order.
    pub fn execution_order(&self) -> Result<Vec<usize>> {
        let n = self.operators.len();
        let mut in_degree = vec![0usize; n];
        let index: HashMap<&str, usize> = self
            .operators
            .iter()
            .enumerate()
            .map(|(i, o)| (o.name(), i))
            .collect();

        for conn in &self.wiring {
            if let (Some(from), Some(to)) = (&conn.from.operator, &conn.to.operator) {
                if let (Some(_), Some(&ti)) = (index.get(from.as_str()), index.get(to.as_str())) {
                    in_degree[ti] += 1;
                }
            }
        }

        let mut order = Vec::with_capacity(n);
        let mut placed = vec![false; n];
        while order.len() < n {
            // Lowest insertion index first keeps sibling order deterministic
            let next = (0..n).find(|&i| !placed[i] && in_degree[i] == 0);
            let Some(i) = next else {
                return Err(EngineError::Cycle(self.name.clone()));
            };
            placed[i] = true;
            order.push(i);
            let name = self.operators[i].name();
            for conn in &self.wiring {
                if conn.from.operator.as_deref() == Some(name) {
                    if let Some(to) = &conn.to.operator {
                        if let Some(&ti) = index.get(to.as_str()) {
                            in_degree[ti] -= 1;
                        }
                    }
                }
            }
        }
        Ok(order)
    }

    /// Stage the inputs of the operator at `idx` from its wired sources,
    /// writing each payload into the input port's cache and returning the
    /// staged map. `chain_inputs` carries the owning chain's input data for
    /// boundary connections.
    pub(crate) fn stage_inputs(
        &mut self,
        idx: usize,
        chain_inputs: &HashMap<String, IoPayload>,
    ) -> HashMap<String, IoPayload> {
        let op_name = self.operators[idx].name().to_string();
        let port_names: Vec<String> = self.operators[idx]
            .inputs()
            .iter()
            .map(|p| p.name.clone())
            .collect();

        let mut staged: HashMap<String, IoPayload> = HashMap::new();
        for port in &port_names {
            let target = PortRef::of(op_name.clone(), port.clone());
            if let Some(conn) = self.source_of(&target) {
                let payload = match &conn.from.operator {
                    Some(src) => self
                        .operator(src)
                        .and_then(|o| o.output(&conn.from.port))
                        .and_then(|p| p.data.clone()),
                    None => chain_inputs.get(&conn.from.port).cloned(),
                };
                if let Some(payload) = payload {
                    staged.insert(port.clone(), payload);
                }
            }
        }

        let op = &mut self.operators[idx];
        for port in &port_names {
            let data = staged.get(port).cloned();
            if let Some(input) = op.input_mut(port) {
                input.data = data;
            }
        }
        staged
    }

    /// Stage the input metadata of the operator at `idx` from its wired
    /// sources. Returns the set of connected input port names.
    pub(crate) fn stage_input_metadata(
        &mut self,
        idx: usize,
        chain_meta: &HashMap<String, Metadata>,
    ) -> HashSet<String> {
        let op_name = self.operators[idx].name().to_string();
        let port_names: Vec<String> = self.operators[idx]
            .inputs()
            .iter()
            .map(|p| p.name.clone())
            .collect();

        let mut staged: HashMap<String, Option<Metadata>> = HashMap::new();
        let mut connected = HashSet::new();
        for port in &port_names {
            let target = PortRef::of(op_name.clone(), port.clone());
            if let Some(conn) = self.source_of(&target) {
                connected.insert(port.clone());
                let meta = match &conn.from.operator {
                    Some(src) => self
                        .operator(src)
                        .and_then(|o| o.output(&conn.from.port))
                        .and_then(|p| p.metadata.clone()),
                    None => chain_meta.get(&conn.from.port).cloned(),
                };
                staged.insert(port.clone(), meta);
            }
        }

        let op = &mut self.operators[idx];
        for (port, meta) in staged {
            if let Some(input) = op.input_mut(&port) {
                input.metadata = meta;
            }
        }
        connected
    }

    /// Data delivered to the chain's output ports by this unit's boundary
    /// sinks.
    pub(crate) fn collect_boundary_outputs(&self) -> HashMap<String, IoPayload> {
        let mut out = HashMap::new();
        for conn in &self.wiring {
            if conn.to.operator.is_none() {
                let payload = match &conn.from.operator {
                    Some(src) => self
                        .operator(src)
                        .and_then(|o| o.output(&conn.from.port))
                        .and_then(|p| p.data.clone()),
                    None => None,
                };
                if let Some(payload) = payload {
                    out.insert(conn.to.port.clone(), payload);
                }
            }
        }
        out
    }

    /// Metadata delivered to the chain's output ports by this unit.
    pub(crate) fn collect_boundary_metadata(&self) -> HashMap<String, Metadata> {
        let mut out = HashMap::new();
        for conn in &self.wiring {
            if conn.to.operator.is_none() {
                let meta = match &conn.from.operator {
                    Some(src) => self
                        .operator(src)
                        .and_then(|o| o.output(&conn.from.port))
                        .and_then(|p| p.metadata.clone()),
                    None => None,
                };
                if let Some(meta) = meta {
                    out.insert(conn.to.port.clone(), meta);
                }
            }
        }
        out
    }
}
