//! Workflow materialisation and parameter binding.
//!
//! A workflow is the ordered view of a script for one workflow name:
//! the shared global and parameters sections, the indexed steps that match
//! the name (directly or through a wildcard), and the auxiliary sections.
//! Binding applies command-line overrides onto the parameters section and
//! produces the symbol table every later evaluation runs against.

use clap::{Arg, ArgAction, Command};
use glob::Pattern;
use tracing::debug;

use crate::error::{Error, Result};
use crate::eval::expr::{interpolate, parse_expression, Expr};
use crate::eval::{Bindings, Evaluator, Value};
use crate::script::parser::Script;
use crate::script::section::{Section, SectionOption};
use crate::target::Target;

/// An ordered workflow selected out of a parsed script.
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    pub name: String,
    pub global_section: Option<Section>,
    pub parameters_section: Option<Section>,
    /// Indexed steps, ascending by index.
    pub sections: Vec<Section>,
    /// Named sections without an index, matched on demand by target.
    pub auxiliary_sections: Vec<Section>,
    pub description: String,
}

impl Workflow {
    /// Select and rename sections for `workflow_name`.
    ///
    /// A section joins the workflow when one of its names equals the
    /// workflow name or is a wildcard pattern matching it; the joined copy
    /// is renamed to `(workflow_name, index)`. Steps are then ordered by
    /// index; an index collision is a duplicate-section error.
    pub fn materialise(workflow_name: &str, sections: &[Section]) -> Result<Self> {
        let mut workflow = Workflow {
            name: workflow_name.to_string(),
            ..Default::default()
        };
        for section in sections {
            if section.is_global {
                workflow.global_section = Some(section.clone());
                continue;
            }
            if section.is_parameters {
                workflow.parameters_section = Some(section.clone());
                continue;
            }
            for (name, index) in &section.names {
                let Some(index) = index else {
                    workflow.auxiliary_sections.push(section.clone());
                    continue;
                };
                let adopted = if name.contains('*') {
                    Pattern::new(name)
                        .map(|pattern| pattern.matches(workflow_name))
                        .unwrap_or(false)
                } else {
                    name == workflow_name
                };
                if adopted {
                    let mut copy = section.clone();
                    copy.names = vec![(workflow_name.to_string(), Some(*index))];
                    workflow.sections.push(copy);
                }
            }
        }
        workflow.sections.sort_by_key(Self::section_index);
        for pair in workflow.sections.windows(2) {
            let left = Self::section_index(&pair[0]);
            if left == Self::section_index(&pair[1]) {
                return Err(Error::DuplicateSection {
                    workflow: workflow_name.to_string(),
                    index: left,
                });
            }
        }
        debug!(
            workflow = workflow_name,
            steps = workflow.sections.len(),
            auxiliary = workflow.auxiliary_sections.len(),
            "materialised workflow"
        );
        Ok(workflow)
    }

    pub(crate) fn section_index(section: &Section) -> u32 {
        section
            .names
            .first()
            .and_then(|(_, index)| *index)
            .unwrap_or(0)
    }

    /// The indexed steps in execution order.
    pub fn steps(&self) -> &[Section] {
        &self.sections
    }

    /// `name_index` display name of a step.
    pub fn step_name(&self, section: &Section) -> String {
        format!("{}_{}", self.name, Self::section_index(section))
    }

    /// Evaluate globals and bind parameters from an argument vector.
    pub fn bind(&self, args: &[String], evaluator: &dyn Evaluator) -> Result<Bindings> {
        bind_parameters(
            self.global_section.as_ref(),
            self.parameters_section.as_ref(),
            args,
            evaluator,
        )
    }

    /// The auxiliary section able to provide `target`, if any: its `target`
    /// option names the target, or its own name equals a named goal.
    pub fn auxiliary_for(&self, target: &Target) -> Option<&Section> {
        self.auxiliary_sections.iter().find(|section| {
            if let Some(Some(value)) = section.option(SectionOption::Target) {
                if let Ok(Expr::Str(provided)) = parse_expression(value) {
                    if provided == target.to_string() {
                        return true;
                    }
                }
            }
            matches!(target, Target::Named(name)
                if section.names.iter().any(|(n, _)| n == name))
        })
    }
}

impl Script {
    /// Bind parameters against the script's own global and parameters
    /// sections, outside any particular workflow.
    pub fn bind(&self, args: &[String], evaluator: &dyn Evaluator) -> Result<Bindings> {
        bind_parameters(
            self.sections.iter().find(|s| s.is_global),
            self.sections.iter().find(|s| s.is_parameters),
            args,
            evaluator,
        )
    }
}

/// The sigil declared on a section, parsed from its `sigil` option:
/// a string literal of the form `"<left> <right>"`.
pub fn section_sigil(section: &Section) -> Result<Option<(String, String)>> {
    let Some(Some(value)) = section.option(SectionOption::Sigil) else {
        return Ok(None);
    };
    let Ok(Expr::Str(literal)) = parse_expression(value) else {
        return Err(Error::Eval(format!("invalid sigil {}", value)));
    };
    match literal.split_once(' ') {
        Some((left, right)) if !left.is_empty() && !right.is_empty() => {
            Ok(Some((left.to_string(), right.to_string())))
        }
        _ => Err(Error::Eval(format!(
            "sigil must be two delimiters separated by a space, got '{}'",
            literal
        ))),
    }
}

/// Evaluate global assignments, then bind the parameters section against
/// the supplied argument vector.
///
/// Defaults are evaluated first so each parameter's type is known by
/// example; the argument parser then accepts `--<name>` with one token for
/// scalars and many for sequences. Overrides are coerced to the default's
/// type; a mismatch is an argument error.
pub fn bind_parameters(
    global: Option<&Section>,
    parameters: Option<&Section>,
    args: &[String],
    evaluator: &dyn Evaluator,
) -> Result<Bindings> {
    let mut bindings = Bindings::new();
    if let Some(global) = global {
        for (name, expr) in &global.assignments {
            let value = evaluator
                .eval(expr, &bindings)
                .map_err(|e| Error::Eval(format!("incorrect value for {}: {}", name, e)))?;
            bindings.set(name, value);
        }
    }

    let Some(parameters) = parameters else {
        if args.is_empty() {
            return Ok(bindings);
        }
        return Err(Error::Argument(format!(
            "unrecognized arguments: {} (the script has no parameters section)",
            args.join(" ")
        )));
    };

    if let Some((left, right)) = section_sigil(parameters)? {
        bindings.set_sigil(left, right);
    }

    // Step 1: learn each parameter's type from its evaluated default.
    let mut defaults: Vec<(String, Value)> = Vec::with_capacity(parameters.parameters.len());
    for parameter in &parameters.parameters {
        let value = evaluator.eval(&parameter.default, &bindings).map_err(|e| {
            Error::Eval(format!(
                "incorrect initial value for parameter {}: {}",
                parameter.name, e
            ))
        })?;
        defaults.push((parameter.name.clone(), value));
    }

    // Step 2: a `--<name>` argument per parameter.
    let mut command = Command::new("parameters")
        .no_binary_name(true)
        .disable_help_flag(true);
    for (name, default) in &defaults {
        let arg = Arg::new(name.clone()).long(name.clone());
        let arg = match default {
            Value::List(_) => arg.num_args(1..).action(ArgAction::Append),
            _ => arg.num_args(1).action(ArgAction::Set),
        };
        command = command.arg(arg);
    }

    // Step 3: parse; unknown flags and wrong arity surface here.
    let matches = command
        .try_get_matches_from(args)
        .map_err(|e| Error::Argument(e.to_string()))?;

    // Step 4: override or keep the default.
    for (name, default) in defaults {
        let supplied = if let Value::List(items) = &default {
            match matches.get_many::<String>(&name) {
                Some(raw) => {
                    let element_kind = items.first().cloned();
                    let mut out = Vec::new();
                    for token in raw {
                        out.push(coerce_scalar(&name, token, element_kind.as_ref(), &bindings)?);
                    }
                    Some(Value::List(out))
                }
                None => None,
            }
        } else {
            match matches.get_one::<String>(&name) {
                Some(raw) => Some(coerce_scalar(&name, raw, Some(&default), &bindings)?),
                None => None,
            }
        };
        bindings.set(name, supplied.unwrap_or(default));
    }
    Ok(bindings)
}

/// Coerce a raw command-line token to the type of the default it overrides.
fn coerce_scalar(
    name: &str,
    raw: &str,
    default: Option<&Value>,
    bindings: &Bindings,
) -> Result<Value> {
    match default {
        Some(Value::Int(_)) => raw.parse::<i64>().map(Value::Int).map_err(|_| {
            Error::Argument(format!(
                "invalid value '{}' for --{}: an integer is required",
                raw, name
            ))
        }),
        Some(Value::Map(_)) => Err(Error::Argument(format!(
            "parameter --{} has a map default and cannot be overridden",
            name
        ))),
        // strings keep the same sigil interpolation as directive values
        _ => interpolate(raw, bindings)
            .map(Value::Str)
            .map_err(|e| Error::Argument(format!("invalid value for --{}: {}", name, e))),
    }
}
