//! Step execution seam.
//!
//! The driver never interprets a step itself: it hands a node, its section,
//! and the bound symbol table to a [`StepExecutor`] and gets back the
//! concrete targets and fingerprints the run produced. Executors that shell
//! out to external interpreters plug in behind the same trait;
//! [`LocalExecutor`] realises target sets in-process and fingerprints step
//! content so incremental re-execution works without them.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, trace};

use crate::dag::{realise_step_sets, Node};
use crate::eval::Bindings;
use crate::script::section::Section;
use crate::target::{Target, TargetSet};

/// What a successful step execution reports back.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The inputs actually consumed; replaces an undetermined declaration.
    pub input_targets: TargetSet,
    /// The outputs actually produced; replaces an undetermined declaration.
    pub output_targets: TargetSet,
    /// One fingerprint per substep, in order.
    pub substep_signatures: Vec<String>,
    /// Fingerprints of produced targets.
    pub target_signatures: Vec<(Target, String)>,
}

/// Executor failures, split by whether a retry can help.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("transient executor failure: {0}")]
    Transient(String),
    #[error("step failed: {0}")]
    Fatal(String),
}

/// The execution seam consumed by the driver.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// One content fingerprint per substep, in order, or `None` when the
    /// step cannot be tracked for incremental re-execution.
    fn signatures(&self, section: &Section, bindings: &Bindings) -> Option<Vec<String>>;

    /// Run the step. `up_to_date` flags the substeps whose stored
    /// fingerprint still matches; a tracking executor re-runs only the
    /// stale ones.
    async fn execute(
        &self,
        node: &Node,
        section: &Section,
        bindings: &Bindings,
        up_to_date: &[bool],
    ) -> Result<StepResult, ExecError>;
}

/// In-process executor: realises the step's target sets against the
/// current bindings and fingerprints its content. Action statements are
/// recorded, not interpreted; interpreter backends supply their own
/// [`StepExecutor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    /// One fingerprint per statement block. Assignments and directives are
    /// folded into every substep: a changed input invalidates all of them.
    /// A step without statements is a single substep.
    fn substep_fingerprints(section: &Section) -> Vec<String> {
        let mut base = DefaultHasher::new();
        for (name, value) in &section.assignments {
            name.hash(&mut base);
            value.hash(&mut base);
        }
        for (kind, value) in &section.directives {
            kind.as_str().hash(&mut base);
            value.hash(&mut base);
        }
        let base = base.finish();
        if section.statements.is_empty() {
            return vec![format!("{:016x}", base)];
        }
        section
            .statements
            .iter()
            .map(|block| {
                let mut hasher = DefaultHasher::new();
                base.hash(&mut hasher);
                block.hash(&mut hasher);
                format!("{:016x}", hasher.finish())
            })
            .collect()
    }

    fn target_fingerprint(target: &Target) -> Option<String> {
        let Target::File(path) = target else {
            return None;
        };
        let meta = std::fs::metadata(path).ok()?;
        let mut hasher = DefaultHasher::new();
        meta.len().hash(&mut hasher);
        if let Ok(modified) = meta.modified() {
            if let Ok(stamp) = modified.duration_since(UNIX_EPOCH) {
                stamp.as_nanos().hash(&mut hasher);
            }
        }
        Some(format!("{:016x}", hasher.finish()))
    }
}

#[async_trait]
impl StepExecutor for LocalExecutor {
    fn signatures(&self, section: &Section, _bindings: &Bindings) -> Option<Vec<String>> {
        Some(Self::substep_fingerprints(section))
    }

    async fn execute(
        &self,
        node: &Node,
        section: &Section,
        bindings: &Bindings,
        up_to_date: &[bool],
    ) -> Result<StepResult, ExecError> {
        let (input, _, output) = realise_step_sets(section, bindings)
            .map_err(|e| ExecError::Fatal(e.to_string()))?;

        // by now earlier steps have run; whatever is still unresolvable is
        // reported as the empty set
        let input_targets = match input {
            TargetSet::Undetermined => TargetSet::empty(),
            determined => determined,
        };
        let output_targets = match output {
            TargetSet::Undetermined => TargetSet::empty(),
            determined => determined,
        };

        info!(step = %node.name, "running step");
        for (substep, block) in section.statements.iter().enumerate() {
            if up_to_date.get(substep).copied().unwrap_or(false) {
                trace!(step = %node.name, substep, "substep up to date");
                continue;
            }
            trace!(step = %node.name, action = block.as_str(), "step action");
        }

        let substep_signatures = Self::substep_fingerprints(section);

        let target_signatures = output_targets
            .targets()
            .unwrap_or_default()
            .iter()
            .filter_map(|t| Self::target_fingerprint(t).map(|sig| (t.clone(), sig)))
            .collect();

        Ok(StepResult {
            input_targets,
            output_targets,
            substep_signatures,
            target_signatures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::DslEvaluator;
    use crate::script::parser::Script;
    use crate::target::TargetSet;

    fn step_section(source: &str) -> Section {
        Script::parse(source).unwrap().sections[0].clone()
    }

    #[test]
    fn test_fingerprints_track_content() {
        let a = step_section("[0]\ninput:\noutput: 'x'\nrun('one')\n");
        let b = step_section("[0]\ninput:\noutput: 'x'\nrun('two')\n");
        let ex = LocalExecutor;
        let bindings = Bindings::new();
        let sigs_a = ex.signatures(&a, &bindings).unwrap();
        let sigs_b = ex.signatures(&b, &bindings).unwrap();
        assert_ne!(sigs_a, sigs_b);
        assert_eq!(sigs_a, ex.signatures(&a, &bindings).unwrap());
    }

    #[test]
    fn test_substep_fingerprints_are_independent() {
        let a = step_section("[0]\ninput:\nrun('one')\n\nrun('two')\n");
        let b = step_section("[0]\ninput:\nrun('one')\n\nrun('three')\n");
        let ex = LocalExecutor;
        let bindings = Bindings::new();
        let sigs_a = ex.signatures(&a, &bindings).unwrap();
        let sigs_b = ex.signatures(&b, &bindings).unwrap();
        assert_eq!(sigs_a.len(), 2);
        // only the edited substep changes
        assert_eq!(sigs_a[0], sigs_b[0]);
        assert_ne!(sigs_a[1], sigs_b[1]);
    }

    #[test]
    fn test_directive_change_invalidates_all_substeps() {
        let a = step_section("[0]\ninput: 'x.txt'\nrun('one')\n\nrun('two')\n");
        let b = step_section("[0]\ninput: 'y.txt'\nrun('one')\n\nrun('two')\n");
        let ex = LocalExecutor;
        let bindings = Bindings::new();
        let sigs_a = ex.signatures(&a, &bindings).unwrap();
        let sigs_b = ex.signatures(&b, &bindings).unwrap();
        assert_ne!(sigs_a[0], sigs_b[0]);
        assert_ne!(sigs_a[1], sigs_b[1]);
    }

    #[tokio::test]
    async fn test_execute_realises_targets() {
        let script = Script::parse("[0]\ninput: 'in.txt'\noutput: 'out.txt'\n").unwrap();
        let workflow = script.workflow("default").unwrap();
        let bindings = workflow.bind(&[], &DslEvaluator).unwrap();
        let dag = crate::dag::Dag::from_workflow(workflow, &bindings).unwrap();
        let node = dag.node(0).clone();
        let result = LocalExecutor
            .execute(&node, &workflow.steps()[0], &bindings, &[])
            .await
            .unwrap();
        assert!(result.input_targets.contains(&Target::file("in.txt")));
        assert!(result.output_targets.contains(&Target::file("out.txt")));
        assert_eq!(result.substep_signatures.len(), 1);
    }

    #[tokio::test]
    async fn test_execute_resolves_undetermined_to_empty() {
        let script = Script::parse("[0]\ninput: dynamic()\n").unwrap();
        let workflow = script.workflow("default").unwrap();
        let bindings = workflow.bind(&[], &DslEvaluator).unwrap();
        let dag = crate::dag::Dag::from_workflow(workflow, &bindings).unwrap();
        let node = dag.node(0).clone();
        let result = LocalExecutor
            .execute(&node, &workflow.steps()[0], &bindings, &[])
            .await
            .unwrap();
        assert_eq!(result.input_targets, TargetSet::empty());
        assert_eq!(result.output_targets, TargetSet::empty());
    }
}
