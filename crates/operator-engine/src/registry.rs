//! Operator type registry
//!
//! Maps a string type tag to a descriptor plus a way to build instances:
//! a computation factory for leaf operators, or a unit layout for chains.
//! The registry is populated explicitly at start-up; there is no runtime
//! class discovery.
//!
//! # Composability
//!
//! Registries can be composed by merging:
//! ```ignore
//! let mut registry = default_registry();
//! registry.merge(plugin_registry);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::{OperatorDescriptor, OperatorGroup};
use crate::error::{EngineError, Result};
use crate::operator::{Computation, ComputeContext, Operator, SyncComputation};
use crate::unit::ExecutionUnit;

/// Factory producing (or sharing) the computation for one operator type
pub trait ComputationFactory: Send + Sync {
    fn create(&self) -> Arc<dyn Computation>;
}

/// Factory that hands out one shared computation instance
struct SharedComputationFactory {
    computation: Arc<dyn Computation>,
}

impl ComputationFactory for SharedComputationFactory {
    fn create(&self) -> Arc<dyn Computation> {
        self.computation.clone()
    }
}

/// How instances of a type are built
enum Flavor {
    Leaf(Arc<dyn ComputationFactory>),
    Chain { units: Vec<String> },
}

struct RegistryEntry {
    descriptor: OperatorDescriptor,
    flavor: Option<Flavor>,
}

/// Registry of operator types
pub struct OperatorRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a leaf type with an explicit factory.
    pub fn register(&mut self, descriptor: OperatorDescriptor, factory: Arc<dyn ComputationFactory>) {
        self.entries.insert(
            descriptor.type_tag.clone(),
            RegistryEntry {
                descriptor,
                flavor: Some(Flavor::Leaf(factory)),
            },
        );
    }

    /// Register a leaf type backed by one shared computation instance.
    pub fn register_computation(
        &mut self,
        descriptor: OperatorDescriptor,
        computation: Arc<dyn Computation>,
    ) {
        self.register(
            descriptor,
            Arc::new(SharedComputationFactory { computation }),
        );
    }

    /// Register a leaf type from a synchronous closure.
    pub fn register_fn(
        &mut self,
        descriptor: OperatorDescriptor,
        f: impl Fn(&mut ComputeContext) -> Result<()> + Send + Sync + 'static,
    ) {
        self.register_computation(descriptor, Arc::new(SyncComputation::new(f)));
    }

    /// Register a chain type. New instances get one empty unit per name,
    /// each with a boundary mirroring the descriptor's ports.
    pub fn register_chain(&mut self, descriptor: OperatorDescriptor, units: Vec<String>) {
        self.entries.insert(
            descriptor.type_tag.clone(),
            RegistryEntry {
                descriptor,
                flavor: Some(Flavor::Chain { units }),
            },
        );
    }

    /// Register metadata only (no instances can be built). Used for
    /// palette listings of host-provided types.
    pub fn register_descriptor(&mut self, descriptor: OperatorDescriptor) {
        self.entries.insert(
            descriptor.type_tag.clone(),
            RegistryEntry {
                descriptor,
                flavor: None,
            },
        );
    }

    /// Get the descriptor for a type tag.
    pub fn descriptor(&self, type_tag: &str) -> Option<&OperatorDescriptor> {
        self.entries.get(type_tag).map(|e| &e.descriptor)
    }

    /// All registered descriptors.
    pub fn descriptors(&self) -> Vec<&OperatorDescriptor> {
        self.entries.values().map(|e| &e.descriptor).collect()
    }

    /// Descriptors grouped by palette group.
    pub fn by_group(&self) -> HashMap<OperatorGroup, Vec<&OperatorDescriptor>> {
        let mut grouped: HashMap<OperatorGroup, Vec<&OperatorDescriptor>> = HashMap::new();
        for entry in self.entries.values() {
            grouped
                .entry(entry.descriptor.group)
                .or_default()
                .push(&entry.descriptor);
        }
        grouped
    }

    pub fn has_type(&self, type_tag: &str) -> bool {
        self.entries.contains_key(type_tag)
    }

    pub fn type_tags(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Merge another registry into this one. Entries from `other` override
    /// entries sharing the same type tag.
    pub fn merge(&mut self, other: OperatorRegistry) {
        self.entries.extend(other.entries);
    }

    /// Build a new operator instance of the given type.
    pub fn instantiate(&self, type_tag: &str, name: impl Into<String>) -> Result<Operator> {
        let entry = self
            .entries
            .get(type_tag)
            .ok_or_else(|| EngineError::UnknownTypeTag(type_tag.to_string()))?;
        match &entry.flavor {
            None => Err(EngineError::NoComputation(type_tag.to_string())),
            Some(Flavor::Leaf(factory)) => Ok(Operator::leaf(
                name,
                &entry.descriptor,
                factory.create(),
            )),
            Some(Flavor::Chain { units }) => {
                let built = units
                    .iter()
                    .map(|unit_name| ExecutionUnit::for_chain(unit_name, &entry.descriptor))
                    .collect();
                Ok(Operator::chain(name, &entry.descriptor, built))
            }
        }
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
