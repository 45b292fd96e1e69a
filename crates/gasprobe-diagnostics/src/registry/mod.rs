//! Declarative probe definitions and their execution plan.
//!
//! A [`ProbeSpec`] names one adapter interaction, its parameters and how it relates to
//! the other probes. The [`ProbeRegistry`] validates the set as it is built and derives
//! the plan the executor walks: a dependency order, stable with respect to registration,
//! in which state-mutating probes follow each other by ascending `sequence`.

mod method;

use std::collections::{BTreeSet, HashMap, HashSet};

use alloy_primitives::U256;
use gasprobe_ethereum::Quantity;
use indexmap::IndexMap;
pub use method::{Invocation, RpcMethod};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::serde_as;
use thiserror::Error;

/// Configuration faults. They are fatal to the probe set and surface before any I/O.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("probe {0} is already registered")]
    DuplicateId(String),

    #[error("cyclic dependency between probes {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    #[error("probe {probe} depends on unknown probe {dependency}")]
    UnknownDependency { probe: String, dependency: String },

    #[error("probe {probe} reads the output of {reference} without depending on it")]
    UnresolvedReference { probe: String, reference: String },

    #[error("probes {probe} and {other} share mutation sequence {sequence}")]
    DuplicateSequence { probe: String, other: String, sequence: u32 },

    #[error("invalid parameters for probe {probe}: {cause}")]
    InvalidParameters { probe: String, cause: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeRole {
    #[default]
    Informational,

    /// Gas estimate feeding the calibration
    GasSample,

    /// Gas-bearing probe kept out of the calibration
    BaselineSample,
}

impl ProbeRole {
    pub fn is_gas_bearing(&self) -> bool {
        matches!(self, Self::GasSample | Self::BaselineSample)
    }
}

/// A parameter value, either written down or read from the output of an earlier probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Output(OutputReference),
    Literal(Value),
}

/// JSON pointer into the `Ok` value of another probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputReference {
    pub output_of: String,

    #[serde(default)]
    pub pointer: String,

    /// Scales a quantity output, in percent (e.g. 110 adds a 10% margin)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u32>,
}

/// Named parameters of a probe, in declaration order.
pub type ParamsTemplate = IndexMap<String, ParamValue>;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub id: String,
    pub method: RpcMethod,

    #[serde(default)]
    pub params: ParamsTemplate,

    #[serde(default)]
    pub depends_on: BTreeSet<String>,

    #[serde(default)]
    pub mutates_chain_state: bool,

    #[serde(default)]
    pub sequence: u32,

    #[serde(default)]
    pub role: ProbeRole,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<Quantity>")]
    pub target_gas: Option<U256>,
}

impl ProbeSpec {
    pub fn new(id: impl Into<String>, method: RpcMethod) -> Self {
        Self {
            id: id.into(),
            method,
            params: ParamsTemplate::new(),
            depends_on: BTreeSet::new(),
            mutates_chain_state: false,
            sequence: 0,
            role: ProbeRole::Informational,
            target_gas: None,
        }
    }

    pub fn literal(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), ParamValue::Literal(value.into()));
        self
    }

    /// Reads a parameter from the output of `probe`, which becomes a dependency.
    pub fn output(self, key: impl Into<String>, probe: impl Into<String>, pointer: impl Into<String>) -> Self {
        self.output_scaled(key, probe, pointer, None)
    }

    pub fn output_scaled(mut self, key: impl Into<String>, probe: impl Into<String>, pointer: impl Into<String>, percent: Option<u32>) -> Self {
        let probe = probe.into();
        self.depends_on.insert(probe.clone());
        self.params.insert(
            key.into(),
            ParamValue::Output(OutputReference {
                output_of: probe,
                pointer: pointer.into(),
                percent,
            }),
        );
        self
    }

    pub fn depends_on(mut self, probe: impl Into<String>) -> Self {
        self.depends_on.insert(probe.into());
        self
    }

    pub fn mutating(mut self, sequence: u32) -> Self {
        self.mutates_chain_state = true;
        self.sequence = sequence;
        self
    }

    pub fn gas_sample(mut self, target_gas: U256) -> Self {
        self.role = ProbeRole::GasSample;
        self.target_gas = Some(target_gas);
        self
    }

    pub fn baseline_sample(mut self) -> Self {
        self.role = ProbeRole::BaselineSample;
        self
    }

    /// Probes whose outputs feed the parameters.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.params.values().filter_map(|value| match value {
            ParamValue::Output(reference) => Some(reference.output_of.as_str()),
            ParamValue::Literal(_) => None,
        })
    }

    /// Parameters as an object when every one of them is a literal.
    pub fn literal_params(&self) -> Option<Value> {
        self.params
            .iter()
            .map(|(key, value)| match value {
                ParamValue::Literal(value) => Some((key.clone(), value.clone())),
                ParamValue::Output(_) => None,
            })
            .collect::<Option<serde_json::Map<_, _>>>()
            .map(Value::Object)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if let Some(reference) = self.references().find(|reference| !self.depends_on.contains(*reference)) {
            return Err(RegistryError::UnresolvedReference {
                probe: self.id.clone(),
                reference: reference.to_string(),
            });
        }

        if self.role == ProbeRole::GasSample && self.target_gas.map(|gas| gas.is_zero()).unwrap_or(true) {
            return Err(RegistryError::InvalidParameters {
                probe: self.id.clone(),
                cause: "gas sample without a positive target gas".to_string(),
            });
        }

        if let Some(params) = self.literal_params() {
            self.method.decode(params).map_err(|cause| RegistryError::InvalidParameters {
                probe: self.id.clone(),
                cause,
            })?;
        }

        Ok(())
    }
}

/// Probe set of one diagnostic run.
#[derive(Debug, Clone, Default)]
pub struct ProbeRegistry {
    probes: IndexMap<String, ProbeSpec>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ProbeSpec) -> Result<&mut Self, RegistryError> {
        if self.probes.contains_key(&spec.id) {
            return Err(RegistryError::DuplicateId(spec.id));
        }

        spec.validate()?;

        if spec.mutates_chain_state {
            let duplicate = self.probes.values().find(|other| other.mutates_chain_state && other.sequence == spec.sequence);
            if let Some(other) = duplicate {
                return Err(RegistryError::DuplicateSequence {
                    probe: spec.id,
                    other: other.id.clone(),
                    sequence: spec.sequence,
                });
            }
        }

        self.probes.insert(spec.id.clone(), spec);
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&ProbeSpec> {
        self.probes.get(id)
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeSpec> {
        self.probes.values()
    }

    /// Dependency order of the probes. Among the probes ready at a given point, the one
    /// registered first comes first. Mutating probes are chained by ascending `sequence`.
    pub fn topological_order(&self) -> Result<Vec<ProbeSpec>, RegistryError> {
        let mut predecessors: Vec<HashSet<usize>> = Vec::with_capacity(self.probes.len());
        for spec in self.probes.values() {
            let mut edges = HashSet::new();
            for dependency in &spec.depends_on {
                let index = self.probes.get_index_of(dependency).ok_or_else(|| RegistryError::UnknownDependency {
                    probe: spec.id.clone(),
                    dependency: dependency.clone(),
                })?;
                edges.insert(index);
            }
            predecessors.push(edges);
        }

        let mut mutating: Vec<(u32, usize)> = self
            .probes
            .values()
            .enumerate()
            .filter(|(_, spec)| spec.mutates_chain_state)
            .map(|(index, spec)| (spec.sequence, index))
            .collect();
        mutating.sort();
        for pair in mutating.windows(2) {
            predecessors[pair[1].1].insert(pair[0].1);
        }

        let mut placed = vec![false; self.probes.len()];
        let mut order = Vec::with_capacity(self.probes.len());
        while order.len() < self.probes.len() {
            let next = (0..self.probes.len()).find(|&index| !placed[index] && predecessors[index].iter().all(|&p| placed[p]));

            match next {
                Some(index) => {
                    placed[index] = true;
                    order.push(index);
                },
                None => {
                    let cycle = self
                        .probes
                        .keys()
                        .enumerate()
                        .filter(|(index, _)| !placed[*index] && on_cycle(&predecessors, *index))
                        .map(|(_, id)| id.clone())
                        .collect();
                    return Err(RegistryError::CyclicDependency(cycle));
                },
            }
        }

        Ok(order.into_iter().filter_map(|index| self.probes.get_index(index)).map(|(_, spec)| spec.clone()).collect())
    }

    /// Position of each probe in the plan, keyed by id.
    pub fn positions(plan: &[ProbeSpec]) -> HashMap<&str, usize> {
        plan.iter().enumerate().map(|(index, spec)| (spec.id.as_str(), index)).collect()
    }
}

/// Whether `start` can reach itself through its predecessors.
fn on_cycle(predecessors: &[HashSet<usize>], start: usize) -> bool {
    let mut seen = HashSet::new();
    let mut stack: Vec<usize> = predecessors[start].iter().copied().collect();
    while let Some(index) = stack.pop() {
        if index == start {
            return true;
        }

        if seen.insert(index) {
            stack.extend(predecessors[index].iter().copied());
        }
    }

    false
}
