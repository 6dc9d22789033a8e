//! The dynamic dependency DAG.
//!
//! Nodes are steps; edges are never declared, only inferred from each
//! node's input/depends/output target sets and context-change flag. Because
//! edges are a pure function of node state, any state change (an executor
//! reporting the real targets of a completed step) triggers local
//! re-inference instead of a global rebuild.
//!
//! Nodes live in an arena indexed by position; edges are `(from, to)` pairs
//! in a side table.

pub mod driver;

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::eval::expr::{eval_expr, parse_directive, parse_expression};
use crate::eval::{Bindings, EvalError};
use crate::script::section::{DirectiveKind, Section, SectionOption};
use crate::target::{realise_targets, Target, TargetProbe, TargetSet};
use crate::workflow::{section_sigil, Workflow};

/// Execution state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeStatus {
    #[default]
    Unset,
    Running,
    Completed,
    Failed,
}

/// One step of the workflow, as a DAG vertex.
#[derive(Debug, Clone)]
pub struct Node {
    pub uuid: Uuid,
    pub name: String,
    pub index: Option<u32>,
    pub input_targets: TargetSet,
    pub depends_targets: TargetSet,
    pub output_targets: TargetSet,
    /// The section declares an input or output alias; every later step
    /// depends on this one.
    pub change_context: bool,
    pub status: NodeStatus,
}

impl Node {
    /// The dependency predicate: does `self` depend on `other`?
    ///
    /// A completed node is a fixed point and depends on nothing. Otherwise
    /// an edge exists when `other` changes context earlier in the order,
    /// when `self`'s inputs are undetermined and `other` is the immediately
    /// preceding step, or when `other` is known to produce something
    /// `self` consumes.
    pub fn depends_on(&self, other: &Node) -> bool {
        if self.status == NodeStatus::Completed {
            return false;
        }
        if other.change_context {
            if let (Some(other_index), Some(self_index)) = (other.index, self.index) {
                if other_index < self_index {
                    return true;
                }
            }
        }
        if self.input_targets.is_undetermined() {
            if let (Some(other_index), Some(self_index)) = (other.index, self.index) {
                if other_index + 1 == self_index {
                    return true;
                }
            }
        }
        if !other.output_targets.is_undetermined()
            && (self.input_targets.intersects(&other.output_targets)
                || self.depends_targets.intersects(&other.output_targets))
        {
            return true;
        }
        false
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({:?}): input {}, depends {}, output {}",
            self.name, self.status, self.input_targets, self.depends_targets, self.output_targets
        )
    }
}

/// The graph: an arena of nodes, an edge side table, and the two target
/// indexes used for dangling detection and re-edging.
#[derive(Debug, Default)]
pub struct Dag {
    nodes: Vec<Node>,
    edges: HashSet<(usize, usize)>,
    dependent_files: HashMap<Target, Vec<usize>>,
    output_files: HashMap<Target, Vec<usize>>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the DAG for a workflow by realising every step's directives
    /// against the bound symbol table.
    pub fn from_workflow(workflow: &Workflow, bindings: &Bindings) -> Result<Self> {
        let mut dag = Dag::new();
        for section in workflow.steps() {
            let (input, depends, output) = realise_step_sets(section, bindings)?;
            let change_context = section.has_option(SectionOption::InputAlias)
                || section.has_option(SectionOption::OutputAlias);
            dag.add_step(
                workflow.step_name(section),
                Some(Workflow::section_index(section)),
                input,
                depends,
                output,
                change_context,
            );
        }
        dag.build()?;
        Ok(dag)
    }

    /// Add a node and index its known targets. Returns the node's arena
    /// position.
    pub fn add_step(
        &mut self,
        name: impl Into<String>,
        index: Option<u32>,
        input_targets: TargetSet,
        depends_targets: TargetSet,
        output_targets: TargetSet,
        change_context: bool,
    ) -> usize {
        let position = self.nodes.len();
        if let Some(targets) = input_targets.targets() {
            for target in targets {
                self.dependent_files
                    .entry(target.clone())
                    .or_default()
                    .push(position);
            }
        }
        if let Some(targets) = depends_targets.targets() {
            for target in targets {
                self.dependent_files
                    .entry(target.clone())
                    .or_default()
                    .push(position);
            }
        }
        if let Some(targets) = output_targets.targets() {
            for target in targets {
                self.output_files
                    .entry(target.clone())
                    .or_default()
                    .push(position);
            }
        }
        self.nodes.push(Node {
            uuid: Uuid::new_v4(),
            name: name.into(),
            index,
            input_targets,
            depends_targets,
            output_targets,
            change_context,
            status: NodeStatus::Unset,
        });
        position
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, position: usize) -> &Node {
        &self.nodes[position]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn mark_status(&mut self, position: usize, status: NodeStatus) {
        self.nodes[position].status = status;
    }

    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.edges.contains(&(from, to))
    }

    pub fn in_edges(&self, to: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .iter()
            .filter(move |(_, t)| *t == to)
            .map(|(f, _)| *f)
    }

    /// Connect nodes by evaluating the dependency predicate over every
    /// ordered pair, then reject cycles.
    pub fn build(&mut self) -> Result<()> {
        for i in 0..self.nodes.len() {
            for j in 0..self.nodes.len() {
                if i == j {
                    continue;
                }
                if self.nodes[j].depends_on(&self.nodes[i]) {
                    trace!(from = %self.nodes[i].name, to = %self.nodes[j].name, "edge");
                    self.edges.insert((i, j));
                }
            }
        }
        self.check_acyclic()
    }

    /// Find a node ready to execute: unset, with every predecessor
    /// completed. When none is ready but incomplete nodes remain, the
    /// declarations are contradictory (a cycle or a missing producer) and
    /// the run cannot make progress.
    pub fn find_executable(&self) -> Result<Option<usize>> {
        if let Some(position) = self.next_ready() {
            return Ok(Some(position));
        }
        if let Some(node) = self.nodes.iter().find(|n| n.status != NodeStatus::Completed) {
            return Err(Error::Scheduler(format!(
                "{} is not completed yet has dependency",
                node.name
            )));
        }
        Ok(None)
    }

    /// The ready-node scan without the stall fault, for use while workers
    /// are still in flight.
    pub fn next_ready(&self) -> Option<usize> {
        self.nodes.iter().enumerate().find_map(|(position, node)| {
            if node.status != NodeStatus::Unset {
                return None;
            }
            let blocked = self
                .in_edges(position)
                .any(|from| self.nodes[from].status != NodeStatus::Completed);
            if blocked { None } else { Some(position) }
        })
    }

    /// Mark a node completed, replace its undetermined sets with what the
    /// executor actually observed, and re-infer edges for every node the
    /// new knowledge can affect. Returns the re-edged nodes.
    pub fn on_completed(
        &mut self,
        position: usize,
        observed_inputs: Option<TargetSet>,
        observed_outputs: Option<TargetSet>,
    ) -> Result<Vec<usize>> {
        if let Some(inputs) = observed_inputs {
            if self.nodes[position].input_targets.is_undetermined() {
                if let Some(targets) = inputs.targets() {
                    for target in targets {
                        self.dependent_files
                            .entry(target.clone())
                            .or_default()
                            .push(position);
                    }
                }
                self.nodes[position].input_targets = inputs;
            }
        }
        if let Some(outputs) = observed_outputs {
            if self.nodes[position].output_targets.is_undetermined() {
                if let Some(targets) = outputs.targets() {
                    for target in targets {
                        self.output_files
                            .entry(target.clone())
                            .or_default()
                            .push(position);
                    }
                }
                self.nodes[position].output_targets = outputs;
            }
        }
        self.nodes[position].status = NodeStatus::Completed;

        let outputs = self.nodes[position].output_targets.clone();
        let mut affected = vec![position];
        for (j, node) in self.nodes.iter().enumerate() {
            if j == position {
                continue;
            }
            if node.input_targets.is_undetermined()
                || node.input_targets.intersects(&outputs)
                || node.depends_targets.intersects(&outputs)
            {
                affected.push(j);
            }
        }
        debug!(
            node = %self.nodes[position].name,
            affected = affected.len(),
            "re-inferring edges after completion"
        );
        self.rebuild_edges_for(&affected)?;
        Ok(affected)
    }

    /// Re-derive the incoming edges of the given nodes from current state.
    fn rebuild_edges_for(&mut self, affected: &[usize]) -> Result<()> {
        for &to in affected {
            self.edges.retain(|(_, t)| *t != to);
            for from in 0..self.nodes.len() {
                if from != to && self.nodes[to].depends_on(&self.nodes[from]) {
                    self.edges.insert((from, to));
                }
            }
        }
        self.check_acyclic()
    }

    /// Targets that some step consumes, no step produces, and the probe
    /// cannot find.
    pub fn dangling(&self, probe: &dyn TargetProbe) -> Vec<Target> {
        let mut missing: Vec<Target> = self
            .dependent_files
            .keys()
            .filter(|target| !self.output_files.contains_key(target) && !probe.exists(target))
            .cloned()
            .collect();
        missing.sort_by_key(|t| t.to_string());
        missing
    }

    /// Kahn's algorithm; leftover nodes mean a cycle.
    fn check_acyclic(&self) -> Result<()> {
        let mut in_degree: Vec<usize> = vec![0; self.nodes.len()];
        for (_, to) in &self.edges {
            in_degree[*to] += 1;
        }
        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut visited = 0usize;
        while let Some(node) = queue.pop_front() {
            visited += 1;
            for (from, to) in &self.edges {
                if *from == node {
                    in_degree[*to] -= 1;
                    if in_degree[*to] == 0 {
                        queue.push_back(*to);
                    }
                }
            }
        }
        if visited != self.nodes.len() {
            let stuck = in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(i, _)| self.nodes[i].name.clone())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(Error::Scheduler(format!(
                "conflicting declarations form a dependency cycle involving {}",
                stuck
            )));
        }
        Ok(())
    }
}

/// Realise a step's input, depends, and output sets.
///
/// Step-local assignments are evaluated into a scoped copy of the bindings
/// first (names that cannot be resolved yet simply stay unbound, which
/// makes directives referencing them undetermined). A step that declares no
/// `input` inherits from its predecessor, expressed as an undetermined
/// input set; a step that declares no `output` has undetermined outputs
/// until it runs.
pub fn realise_step_sets(
    section: &Section,
    bindings: &Bindings,
) -> Result<(TargetSet, TargetSet, TargetSet)> {
    let mut local = bindings.clone();
    if let Some((left, right)) = section_sigil(section)? {
        local.set_sigil(left, right);
    }
    for (name, expr) in &section.assignments {
        let parsed = parse_expression(expr)
            .map_err(|e| Error::Eval(format!("invalid value for {}: {}", name, e)))?;
        match eval_expr(&parsed, &local) {
            Ok(value) => local.set(name, value),
            Err(EvalError::Unknown(_)) | Err(EvalError::Dynamic) => {}
            Err(err) => {
                return Err(Error::Eval(format!("invalid value for {}: {}", name, err)));
            }
        }
    }

    let mut input: Option<TargetSet> = None;
    let mut depends = TargetSet::empty();
    let mut output: Option<TargetSet> = None;
    for (kind, value) in &section.directives {
        let body = parse_directive(value)
            .map_err(|e| Error::Eval(format!("invalid {} directive: {}", kind, e)))?;
        let set = realise_targets(&body, &local)
            .map_err(|e| Error::Eval(format!("invalid {} directive: {}", kind, e)))?;
        match kind {
            DirectiveKind::Input => input.get_or_insert_with(TargetSet::empty).union(set),
            DirectiveKind::Depends => depends.union(set),
            DirectiveKind::Output => output.get_or_insert_with(TargetSet::empty).union(set),
        }
    }
    Ok((
        input.unwrap_or(TargetSet::Undetermined),
        depends,
        output.unwrap_or(TargetSet::Undetermined),
    ))
}
