//! Dependency targets.
//!
//! A target is whatever a step declares it consumes or produces: a file on
//! disk or an abstract named goal. Directive bodies are realised into target
//! sets lazily; a set that cannot be known before earlier steps run is the
//! `Undetermined` sentinel.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::eval::expr::{eval_expr, CallArgs, Expr};
use crate::eval::{Bindings, EvalError, Value};

/// A single dependency element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// A path on the filesystem.
    File(PathBuf),
    /// An abstract goal, provided by an auxiliary step or recorded
    /// signature rather than a file.
    Named(String),
}

impl Target {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Target::File(path.into())
    }

    pub fn named(name: impl Into<String>) -> Self {
        Target::Named(name.into())
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::File(path) => write!(f, "{}", path.display()),
            Target::Named(name) => write!(f, "{}", name),
        }
    }
}

/// A step's declared input, output, or depends set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSet {
    Determined(Vec<Target>),
    /// The set cannot be known until earlier steps run.
    Undetermined,
}

impl Default for TargetSet {
    fn default() -> Self {
        TargetSet::Determined(Vec::new())
    }
}

impl TargetSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_targets(targets: Vec<Target>) -> Self {
        TargetSet::Determined(targets)
    }

    pub fn is_undetermined(&self) -> bool {
        matches!(self, TargetSet::Undetermined)
    }

    /// The concrete targets, or `None` while undetermined.
    pub fn targets(&self) -> Option<&[Target]> {
        match self {
            TargetSet::Determined(targets) => Some(targets),
            TargetSet::Undetermined => None,
        }
    }

    pub fn contains(&self, target: &Target) -> bool {
        matches!(self, TargetSet::Determined(targets) if targets.contains(target))
    }

    /// Set intersection; vacuously false when either side is undetermined.
    pub fn intersects(&self, other: &TargetSet) -> bool {
        match (self, other) {
            (TargetSet::Determined(a), TargetSet::Determined(b)) => {
                a.iter().any(|t| b.contains(t))
            }
            _ => false,
        }
    }

    /// Merge another set in. Undetermined poisons the union: a step with one
    /// undeterminable directive has an undeterminable set overall.
    pub fn union(&mut self, other: TargetSet) {
        match (&mut *self, other) {
            (TargetSet::Undetermined, _) => {}
            (_, TargetSet::Undetermined) => *self = TargetSet::Undetermined,
            (TargetSet::Determined(mine), TargetSet::Determined(theirs)) => {
                for target in theirs {
                    if !mine.contains(&target) {
                        mine.push(target);
                    }
                }
            }
        }
    }
}

impl std::fmt::Display for TargetSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetSet::Undetermined => write!(f, "<undetermined>"),
            TargetSet::Determined(targets) => {
                let names: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
                write!(f, "[{}]", names.join(", "))
            }
        }
    }
}

/// Observed state of a target relative to the signature store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// Present on disk, fingerprint not yet recorded.
    ExistsWithoutSignature,
    /// Absent but previously fingerprinted; assumed for dependency checks,
    /// regenerated when actually needed.
    AbsentWithSignature,
    /// Absent and unknown; must be produced.
    AbsentWithoutSignature,
    /// Declared by a set whose members cannot be known until earlier
    /// steps run.
    Undetermined,
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetStatus::ExistsWithoutSignature => write!(f, "exists"),
            TargetStatus::AbsentWithSignature => write!(f, "absent, signature recorded"),
            TargetStatus::AbsentWithoutSignature => write!(f, "absent"),
            TargetStatus::Undetermined => write!(f, "undetermined"),
        }
    }
}

pub fn target_status(target: &Target, has_signature: bool, probe: &dyn TargetProbe) -> TargetStatus {
    match (probe.exists(target), has_signature) {
        (true, _) => TargetStatus::ExistsWithoutSignature,
        (false, true) => TargetStatus::AbsentWithSignature,
        (false, false) => TargetStatus::AbsentWithoutSignature,
    }
}

/// Classify every declared element of a set. An undetermined set has no
/// nameable members yet, so it reports the single `Undetermined` status
/// with no target attached.
pub fn set_statuses<F>(
    set: &TargetSet,
    has_signature: F,
    probe: &dyn TargetProbe,
) -> Vec<(Option<Target>, TargetStatus)>
where
    F: Fn(&Target) -> bool,
{
    match set.targets() {
        None => vec![(None, TargetStatus::Undetermined)],
        Some(targets) => targets
            .iter()
            .map(|target| {
                (
                    Some(target.clone()),
                    target_status(target, has_signature(target), probe),
                )
            })
            .collect(),
    }
}

/// Existence probe, injectable so schedulers can be tested off-disk.
pub trait TargetProbe: Send + Sync {
    fn exists(&self, target: &Target) -> bool;
}

/// The real filesystem probe. Named goals never exist on disk; they are
/// satisfied only by recorded signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl TargetProbe for FsProbe {
    fn exists(&self, target: &Target) -> bool {
        match target {
            Target::File(path) => Path::new(path).exists(),
            Target::Named(_) => false,
        }
    }
}

/// Realise a directive body into a target set.
///
/// Positional arguments become targets (strings are files, `named('x')` is
/// an abstract goal, lists flatten); keyword arguments are step options and
/// contribute no targets. A `dynamic(...)` marker or a reference to a name
/// that is not bound yet makes the whole set undetermined.
pub fn realise_targets(body: &CallArgs, bindings: &Bindings) -> Result<TargetSet, EvalError> {
    let mut targets: Vec<Target> = Vec::new();
    for arg in &body.args {
        match collect_into(arg, bindings, &mut targets) {
            Ok(()) => {}
            Err(EvalError::Dynamic) | Err(EvalError::Unknown(_)) => {
                return Ok(TargetSet::Undetermined);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(TargetSet::Determined(targets))
}

fn collect_into(
    expr: &Expr,
    bindings: &Bindings,
    out: &mut Vec<Target>,
) -> Result<(), EvalError> {
    if let Expr::Call(call) = expr {
        if call.func == "named" {
            if call.args.len() != 1 || !call.kwargs.is_empty() {
                return Err(EvalError::Type(
                    "named() takes exactly one string argument".to_string(),
                ));
            }
            match eval_expr(&call.args[0], bindings)? {
                Value::Str(name) => {
                    push_unique(out, Target::Named(name));
                    return Ok(());
                }
                other => {
                    return Err(EvalError::Type(format!(
                        "named() argument must be a string, got {}",
                        other.type_name()
                    )));
                }
            }
        }
    }
    let value = eval_expr(expr, bindings)?;
    flatten_value(value, out)
}

fn flatten_value(value: Value, out: &mut Vec<Target>) -> Result<(), EvalError> {
    match value {
        Value::Str(path) => {
            push_unique(out, Target::file(path));
            Ok(())
        }
        Value::List(items) => {
            for item in items {
                flatten_value(item, out)?;
            }
            Ok(())
        }
        other => Err(EvalError::Type(format!(
            "a target must be a string or list of strings, got {}",
            other.type_name()
        ))),
    }
}

fn push_unique(out: &mut Vec<Target>, target: Target) {
    if !out.contains(&target) {
        out.push(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::expr::parse_directive;

    fn realise(text: &str, bindings: &Bindings) -> TargetSet {
        realise_targets(&parse_directive(text).unwrap(), bindings).unwrap()
    }

    #[test]
    fn test_realise_plain_files() {
        let set = realise("'a.txt', 'b.txt'", &Bindings::new());
        assert_eq!(
            set.targets().unwrap(),
            &[Target::file("a.txt"), Target::file("b.txt")]
        );
    }

    #[test]
    fn test_realise_flattens_lists_and_variables() {
        let mut b = Bindings::new();
        b.set(
            "files",
            Value::List(vec![Value::Str("a.txt".into()), Value::Str("b.txt".into())]),
        );
        let set = realise("'a.pdf', files, skip=False", &b);
        assert_eq!(set.targets().unwrap().len(), 3);
        assert!(set.contains(&Target::file("b.txt")));
    }

    #[test]
    fn test_realise_dynamic_is_undetermined() {
        assert!(realise("dynamic()", &Bindings::new()).is_undetermined());
        assert!(realise("'a.txt', dynamic('*.out')", &Bindings::new()).is_undetermined());
    }

    #[test]
    fn test_realise_unknown_name_is_undetermined() {
        assert!(realise("produced_later", &Bindings::new()).is_undetermined());
    }

    #[test]
    fn test_realise_named_goal() {
        let set = realise("named('reference')", &Bindings::new());
        assert_eq!(set.targets().unwrap(), &[Target::named("reference")]);
    }

    #[test]
    fn test_realise_rejects_non_string() {
        let body = parse_directive("42").unwrap();
        assert!(matches!(
            realise_targets(&body, &Bindings::new()),
            Err(EvalError::Type(_))
        ));
    }

    #[test]
    fn test_intersects() {
        let a = TargetSet::from_targets(vec![Target::file("a.txt"), Target::file("b.txt")]);
        let b = TargetSet::from_targets(vec![Target::file("b.txt")]);
        let c = TargetSet::from_targets(vec![Target::file("c.txt")]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(!a.intersects(&TargetSet::Undetermined));
        assert!(!TargetSet::Undetermined.intersects(&TargetSet::Undetermined));
    }

    #[test]
    fn test_union_poisons_on_undetermined() {
        let mut set = TargetSet::from_targets(vec![Target::file("a.txt")]);
        set.union(TargetSet::from_targets(vec![Target::file("a.txt")]));
        assert_eq!(set.targets().unwrap().len(), 1);
        set.union(TargetSet::Undetermined);
        assert!(set.is_undetermined());
    }

    #[test]
    fn test_fs_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        std::fs::write(&path, "content").unwrap();
        let probe = FsProbe;
        assert!(probe.exists(&Target::File(path.clone())));
        assert!(!probe.exists(&Target::file(dir.path().join("missing.txt"))));
        assert!(!probe.exists(&Target::named("goal")));
    }

    #[test]
    fn test_target_status() {
        let dir = tempfile::tempdir().unwrap();
        let present = Target::File(dir.path().join("y.txt"));
        std::fs::write(dir.path().join("y.txt"), "z").unwrap();
        let absent = Target::file(dir.path().join("gone.txt"));
        assert_eq!(
            target_status(&present, false, &FsProbe),
            TargetStatus::ExistsWithoutSignature
        );
        assert_eq!(
            target_status(&absent, true, &FsProbe),
            TargetStatus::AbsentWithSignature
        );
        assert_eq!(
            target_status(&absent, false, &FsProbe),
            TargetStatus::AbsentWithoutSignature
        );
    }

    #[test]
    fn test_set_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let present = Target::File(dir.path().join("y.txt"));
        std::fs::write(dir.path().join("y.txt"), "z").unwrap();
        let absent = Target::file(dir.path().join("gone.txt"));

        // an undetermined set reports a single undetermined status
        let statuses = set_statuses(&TargetSet::Undetermined, |_| false, &FsProbe);
        assert_eq!(statuses, [(None, TargetStatus::Undetermined)]);

        let set = TargetSet::from_targets(vec![present.clone(), absent.clone()]);
        let statuses = set_statuses(&set, |t| *t == absent, &FsProbe);
        assert_eq!(
            statuses,
            [
                (Some(present), TargetStatus::ExistsWithoutSignature),
                (Some(absent), TargetStatus::AbsentWithSignature),
            ]
        );
    }
}
