//! Line-oriented script parser.
//!
//! One pass over the source with a 1-based line counter. Every line falls
//! into exactly one precedence-ordered rule: comment, blank, indented
//! continuation, unfinished-item continuation, section header, assignment,
//! directive, or free-form statement. Failures are collected and raised once
//! at end of input so a single run reports as many problems as possible.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::error::{Error, ParsingError, Result};
use crate::eval::{CompileMode, DslEvaluator, Evaluator};
use crate::script::section::{DirectiveKind, LastItem, Section, SectionOption};
use crate::script::stack::{ExprStack, StackCategory};
use crate::workflow::Workflow;

/// A fully parsed script: sections in source order plus the workflows
/// materialised from them.
#[derive(Debug, Default)]
pub struct Script {
    /// Format version from the `#fileformat=SOS<version>` header.
    pub format_version: String,
    pub sections: Vec<Section>,
    /// Comment blocks outside section content, blank-line demarcated.
    pub descriptions: Vec<Vec<String>>,
    /// Script-level description assembled from blocks that name no workflow.
    pub description: String,
    pub workflows: BTreeMap<String, Workflow>,
}

impl Script {
    /// Parse from a string with the default evaluator.
    pub fn parse(content: &str) -> Result<Self> {
        ScriptParser::new().parse(content)
    }

    pub fn workflow(&self, name: &str) -> Option<&Workflow> {
        self.workflows.get(name)
    }

    /// Workflow names in sorted order.
    pub fn workflow_names(&self) -> Vec<&str> {
        self.workflows.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for section in &self.sections {
            writeln!(f, "{}", section)?;
        }
        Ok(())
    }
}

/// The parser. Holds the compiled line classifiers and the evaluator used
/// for completeness judgement.
pub struct ScriptParser {
    evaluator: Arc<dyn Evaluator>,
    section_header: Regex,
    directive: Regex,
    assignment: Regex,
    format_line: Regex,
    directive_lookalike: Regex,
    section_name: Regex,
    section_option: Regex,
}

impl Default for ScriptParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptParser {
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(DslEvaluator))
    }

    /// Use a custom evaluator; the parser's completeness judgement then
    /// matches whatever grammar executes the script.
    pub fn with_evaluator(evaluator: Arc<dyn Evaluator>) -> Self {
        // The patterns are fixed strings; compilation cannot fail.
        Self {
            evaluator,
            section_header: Regex::new(r"^\[([\w,*\s]+)(?::\s*(.*))?\]\s*$").unwrap(),
            directive: Regex::new(r"^(input|output|depends)\s*:\s*(.*)$").unwrap(),
            assignment: Regex::new(r"^([a-zA-Z_]\w*)\s*=\s*(.*)$").unwrap(),
            format_line: Regex::new(r"^#fileformat\s*=\s*(.*?)\s*$").unwrap(),
            directive_lookalike: Regex::new(r"^([A-Za-z_]\w*)\s*:").unwrap(),
            section_name: Regex::new(r"^[a-zA-Z*][\w*]*$").unwrap(),
            section_option: Regex::new(r"^(\w+)(?:\s*=\s*(.+?))?\s*$").unwrap(),
        }
    }

    /// Read and parse a script file.
    pub fn read(&self, path: &Path) -> Result<Script> {
        let content = std::fs::read_to_string(path)?;
        self.parse_named(&content, &path.display().to_string())
    }

    pub fn parse(&self, content: &str) -> Result<Script> {
        self.parse_named(content, "<string>")
    }

    pub fn parse_named(&self, content: &str, source_name: &str) -> Result<Script> {
        let mut sections: Vec<Section> = Vec::new();
        let mut cursect: Option<usize> = None;
        let mut errors = ParsingError::new(source_name);
        let mut stack = ExprStack::new();
        let mut format_version = "1.0".to_string();
        let mut descriptions: Vec<Vec<String>> = Vec::new();
        // 1 while reading the first comment block; bumped by pre-section
        // blank lines. The first block is only eligible for #fileformat.
        let mut comment_block = 1usize;
        // Set by a blank line after a complete statement: the next
        // statement line opens a new block.
        let mut statement_boundary = false;
        // Set by a blank line inside a section: a following comment opens a
        // fresh description block for the next section.
        let mut open_description_block = false;
        // True while consecutive comment lines are extending that block;
        // any other line seals it.
        let mut description_block_open = false;
        let mut last_line_no = 0usize;

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx + 1;
            last_line_no = line_no;

            // Rule 1: comment.
            if line.starts_with('#') {
                match cursect {
                    None => {
                        if comment_block == 1 {
                            if let Some(caps) = self.format_line.captures(line) {
                                self.check_format(
                                    &caps[1],
                                    line,
                                    line_no,
                                    &mut format_version,
                                    &mut errors,
                                );
                            }
                        } else if let Some(block) = descriptions.last_mut() {
                            block.push(line.trim_start_matches('#').trim().to_string());
                        }
                    }
                    Some(i) => {
                        let section = &mut sections[i];
                        if section.is_parameters {
                            // every comment describes the next parameter
                            section.add_comment(line);
                        } else if !section.comment_done && section.is_empty() {
                            section.add_comment(line);
                        } else if open_description_block {
                            // a comment block after section content,
                            // separated by a blank line, describes what
                            // comes next
                            descriptions
                                .push(vec![line.trim_start_matches('#').trim().to_string()]);
                            open_description_block = false;
                            description_block_open = true;
                        } else if description_block_open {
                            if let Some(block) = descriptions.last_mut() {
                                block.push(line.trim_start_matches('#').trim().to_string());
                            }
                        }
                    }
                }
                continue;
            }

            // Rule 2: blank line.
            if line.trim().is_empty() {
                match cursect {
                    None => {
                        comment_block += 1;
                        descriptions.push(Vec::new());
                    }
                    Some(i) => {
                        if !sections[i].comment.is_empty() {
                            sections[i].comment_done = true;
                        }
                        if stack.is_valid(self.evaluator.as_ref()) {
                            statement_boundary = true;
                        }
                        open_description_block = true;
                        description_block_open = false;
                    }
                }
                continue;
            }

            // Rule 3: indented continuation of the current item.
            if line.starts_with(char::is_whitespace) {
                if let Some(i) = cursect {
                    if !sections[i].is_empty() {
                        sections[i].extend(line);
                        if let Err(err) = stack.push(line) {
                            errors.append(line_no, line, err.to_string());
                        }
                        statement_boundary = false;
                        open_description_block = false;
                        description_block_open = false;
                        continue;
                    }
                }
            }

            // Rule 4: the current item is incomplete; everything continues
            // it, indented or not.
            if !stack.is_valid(self.evaluator.as_ref()) {
                if let Err(err) = stack.push(line) {
                    errors.append(line_no, line, err.to_string());
                }
                if let Some(i) = cursect {
                    sections[i].extend(line);
                }
                continue;
            }

            // Rule 5: section header.
            if let Some(caps) = self.section_header.captures(line) {
                self.check_pending(&mut stack, line_no, &mut errors);
                let names = self.parse_names(&caps[1], line, line_no, &mut errors);
                let options = match caps.get(2) {
                    Some(m) => self.parse_options(m.as_str(), line, line_no, &mut errors),
                    None => Vec::new(),
                };
                sections.push(Section::new(names, options));
                cursect = Some(sections.len() - 1);
                statement_boundary = false;
                open_description_block = false;
                description_block_open = false;
                continue;
            }

            // Rule 6: assignment. `name == value` is a comparison, not an
            // assignment whose value starts with '='.
            let assignment = self
                .assignment
                .captures(line)
                .filter(|caps| !caps[2].starts_with('='));
            if let Some(caps) = assignment {
                let var_name = caps.get(1).map_or("", |m| m.as_str()).to_string();
                let var_value = caps.get(2).map_or("", |m| m.as_str()).to_string();
                let i = match cursect {
                    Some(i) => i,
                    None => {
                        sections.push(Section::new_global());
                        cursect = Some(sections.len() - 1);
                        sections.len() - 1
                    }
                };
                self.check_pending(&mut stack, line_no, &mut errors);
                if DirectiveKind::from_name(&var_name).is_some() {
                    errors.append(
                        line_no,
                        line,
                        format!("Directive name '{}' cannot be used as a variable", var_name),
                    );
                    continue;
                }
                let section = &mut sections[i];
                match section.last_item() {
                    None | Some(LastItem::Assignment) => {
                        section.add_assignment(&var_name, &var_value);
                        if let Err(err) = stack.set(&var_value, StackCategory::Expression) {
                            errors.append(line_no, line, err.to_string());
                        }
                    }
                    Some(LastItem::Directive) => {
                        // first line of the step action
                        section.add_statement(line);
                        if let Err(err) = stack.set(line, StackCategory::Statements) {
                            errors.append(line_no, line, err.to_string());
                        }
                    }
                    Some(LastItem::Statement) => {
                        if statement_boundary {
                            section.add_statement(line);
                        } else {
                            section.extend(line);
                        }
                        if let Err(err) = stack.set(line, StackCategory::Statements) {
                            errors.append(line_no, line, err.to_string());
                        }
                    }
                }
                statement_boundary = false;
                open_description_block = false;
                description_block_open = false;
                continue;
            }

            // Rule 7: directive.
            if let Some(caps) = self.directive.captures(line) {
                self.check_pending(&mut stack, line_no, &mut errors);
                let name = caps.get(1).map_or("", |m| m.as_str());
                let value = caps.get(2).map_or("", |m| m.as_str());
                let Some(kind) = DirectiveKind::from_name(name) else {
                    // unreachable: the pattern only matches known names
                    continue;
                };
                let section = match cursect {
                    None => {
                        errors.append(
                            line_no,
                            line,
                            format!("Directive {} is not allowed outside of a step", name),
                        );
                        continue;
                    }
                    Some(i) => &mut sections[i],
                };
                if section.is_global {
                    errors.append(
                        line_no,
                        line,
                        format!("Directive {} is not allowed outside of a step", name),
                    );
                    continue;
                }
                if section.is_parameters {
                    errors.append(
                        line_no,
                        line,
                        format!("Directive {} is not allowed in the parameters section", name),
                    );
                    continue;
                }
                if !section.is_empty() && section.last_item() == Some(LastItem::Statement) {
                    errors.append(
                        line_no,
                        line,
                        format!("Directive {} must appear before step actions", name),
                    );
                    continue;
                }
                section.add_directive(kind, value);
                if let Err(err) = stack.set(value, StackCategory::Directive) {
                    errors.append(line_no, line, err.to_string());
                }
                statement_boundary = false;
                open_description_block = false;
                description_block_open = false;
                continue;
            }

            // Rule 8: everything else.
            let i = match cursect {
                None => {
                    errors.append(
                        line_no,
                        line,
                        "Only variable assignment is allowed before section definitions",
                    );
                    continue;
                }
                Some(i) => i,
            };
            if sections[i].is_global {
                errors.append(
                    line_no,
                    line,
                    "Only variable assignment is allowed in the global section",
                );
                continue;
            }
            if sections[i].is_parameters {
                errors.append(
                    line_no,
                    line,
                    "Action statements are not allowed in the parameters section",
                );
                continue;
            }
            if let Some(caps) = self.directive_lookalike.captures(line) {
                errors.append(
                    line_no,
                    line,
                    format!("Unrecognized directive '{}'", &caps[1]),
                );
                continue;
            }
            let section = &mut sections[i];
            if section.is_empty()
                || section.last_item() != Some(LastItem::Statement)
                || statement_boundary
            {
                section.add_statement(line);
                stack.clear();
                if let Err(err) = stack.set(line, StackCategory::Statements) {
                    errors.append(line_no, line, err.to_string());
                }
            } else {
                section.extend(line);
                if let Err(err) = stack.push(line) {
                    errors.append(line_no, line, err.to_string());
                }
            }
            statement_boundary = false;
            open_description_block = false;
            description_block_open = false;
        }

        // The last item must be complete at end of input.
        self.check_pending(&mut stack, last_line_no + 1, &mut errors);

        if !errors.is_empty() {
            return Err(Error::Parsing(errors));
        }

        // Workflow discovery: indexed, non-wildcard names.
        let workflow_names: BTreeSet<String> = sections
            .iter()
            .flat_map(|s| s.names.iter())
            .filter(|(name, index)| index.is_some() && !name.contains('*'))
            .map(|(name, _)| name.clone())
            .collect();
        debug!(workflows = ?workflow_names, "discovered workflows");

        let (description, mut workflow_descriptions) =
            assemble_descriptions(&descriptions, &workflow_names);

        let mut workflows = BTreeMap::new();
        for name in &workflow_names {
            let mut workflow = Workflow::materialise(name, &sections)?;
            if let Some(text) = workflow_descriptions.remove(name) {
                workflow.description = text;
            }
            workflows.insert(name.clone(), workflow);
        }

        Ok(Script {
            format_version,
            sections,
            descriptions,
            description,
            workflows,
        })
    }

    /// Record an error when the in-flight item never became complete, then
    /// reset the stack.
    fn check_pending(&self, stack: &mut ExprStack, line_no: usize, errors: &mut ParsingError) {
        if !stack.is_valid(self.evaluator.as_ref()) {
            let label = stack.category().map_or("item", |c| c.label());
            errors.append(
                line_no.saturating_sub(1),
                stack.text(),
                format!("Invalid {}", label),
            );
        }
        stack.clear();
    }

    fn check_format(
        &self,
        token: &str,
        line: &str,
        line_no: usize,
        format_version: &mut String,
        errors: &mut ParsingError,
    ) {
        let token = token.trim();
        if !token.to_uppercase().starts_with("SOS") {
            errors.append(
                line_no,
                line,
                format!("Unrecognized file format name {}. Expecting SOS.", token),
            );
            return;
        }
        let version = &token[3..];
        if version.is_empty() {
            // bare `SOS` keeps the default 1.0
        } else if version.chars().all(|c| c.is_ascii_digit() || c == '.') {
            *format_version = version.to_string();
        } else {
            errors.append(
                line_no,
                line,
                format!("Unrecognized file format version in {}.", token),
            );
        }
    }

    /// Parse the comma-separated name list of a section header.
    fn parse_names(
        &self,
        text: &str,
        line: &str,
        line_no: usize,
        errors: &mut ParsingError,
    ) -> Vec<(String, Option<u32>)> {
        let mut names = Vec::new();
        for part in text.split(',') {
            let part = part.trim();
            if part.is_empty() {
                errors.append(line_no, line, "Invalid section name");
                continue;
            }
            // a bare index names a step of the default workflow
            if part.chars().all(|c| c.is_ascii_digit()) {
                match part.parse::<u32>() {
                    Ok(index) => names.push(("default".to_string(), Some(index))),
                    Err(_) => errors.append(line_no, line, "Invalid section index"),
                }
                continue;
            }
            let (name, index) = match part.rsplit_once('_') {
                Some((prefix, suffix))
                    if !prefix.is_empty()
                        && !suffix.is_empty()
                        && suffix.chars().all(|c| c.is_ascii_digit()) =>
                {
                    match suffix.parse::<u32>() {
                        Ok(index) => (prefix, Some(index)),
                        Err(_) => {
                            errors.append(line_no, line, "Invalid section index");
                            continue;
                        }
                    }
                }
                _ => (part, None),
            };
            if !self.section_name.is_match(name) || name.ends_with('_') {
                errors.append(line_no, line, "Invalid section name");
                continue;
            }
            // a wildcard-only section is unreachable without an index
            if name.chars().all(|c| c == '*') && index.is_none() {
                errors.append(line_no, line, "Invalid section name");
                continue;
            }
            names.push((name.to_string(), index));
        }
        names
    }

    /// Parse the option list of a section header against the closed set.
    fn parse_options(
        &self,
        text: &str,
        line: &str,
        line_no: usize,
        errors: &mut ParsingError,
    ) -> Vec<(SectionOption, Option<String>)> {
        let mut options: Vec<(SectionOption, Option<String>)> = Vec::new();
        if text.trim().is_empty() {
            return options;
        }
        for part in split_options(text) {
            let Some(caps) = self.section_option.captures(part.trim()) else {
                errors.append(line_no, line, "Invalid section option");
                continue;
            };
            let Some(option) = SectionOption::from_name(&caps[1]) else {
                errors.append(line_no, line, "Invalid section option");
                continue;
            };
            if options.iter().any(|(o, _)| *o == option) {
                errors.append(
                    line_no,
                    line,
                    format!("Duplicate section option '{}'", option.as_str()),
                );
                continue;
            }
            let value = caps.get(2).map(|m| m.as_str().to_string());
            if let Some(value) = &value {
                if !self.evaluator.compile(value, CompileMode::Expression) {
                    errors.append(
                        line_no,
                        line,
                        format!("Invalid value for option '{}'", option.as_str()),
                    );
                    continue;
                }
                // aliases and sigils must be knowable without a symbol table
                if matches!(
                    option,
                    SectionOption::Sigil | SectionOption::InputAlias | SectionOption::OutputAlias
                ) && !matches!(
                    crate::eval::expr::parse_expression(value),
                    Ok(crate::eval::expr::Expr::Str(_))
                ) {
                    errors.append(
                        line_no,
                        line,
                        format!("Option '{}' requires a string literal", option.as_str()),
                    );
                    continue;
                }
            }
            options.push((option, value));
        }
        options
    }
}

/// Split a header option list on commas that are outside string literals,
/// so values like `sigil='a, b'` survive.
fn split_options(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                ',' => {
                    parts.push(&text[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Split outside-content comment blocks into the script description and
/// per-workflow descriptions. A block whose first line names a workflow
/// starts that workflow's description; following anonymous blocks continue
/// it; anonymous blocks before any match describe the script itself.
fn assemble_descriptions(
    blocks: &[Vec<String>],
    workflow_names: &BTreeSet<String>,
) -> (String, HashMap<String, String>) {
    let mut script_description = String::new();
    let mut workflow_descriptions: HashMap<String, String> = HashMap::new();
    let mut current: Option<String> = None;

    for block in blocks {
        if block.iter().all(|l| l.is_empty()) {
            continue;
        }
        let first = block[0].as_str();
        if workflow_names.contains(first) {
            current = Some(first.to_string());
            let entry = workflow_descriptions.entry(first.to_string()).or_default();
            for line in block.iter().skip(1).filter(|l| !l.is_empty()) {
                entry.push_str(line);
                entry.push('\n');
            }
        } else if let Some(name) = &current {
            let entry = workflow_descriptions.entry(name.clone()).or_default();
            for line in block.iter().filter(|l| !l.is_empty()) {
                entry.push_str(line);
                entry.push('\n');
            }
        } else {
            for line in block.iter().filter(|l| !l.is_empty()) {
                script_description.push_str(line);
                script_description.push('\n');
            }
            script_description.push('\n');
        }
    }
    (script_description, workflow_descriptions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Script> {
        Script::parse(content)
    }

    #[test]
    fn test_file_format() {
        // file format must be SOS, optionally versioned
        assert!(matches!(parse("#fileformat=SS2"), Err(Error::Parsing(_))));
        assert!(matches!(
            parse("#fileformat=SOS1.0beta"),
            Err(Error::Parsing(_))
        ));
        let script = parse("#fileformat=SOS1.1\n[0]").unwrap();
        assert_eq!(script.format_version, "1.1");
        let script = parse("#fileformat=SOS\n[0]").unwrap();
        assert_eq!(script.format_version, "1.0");
        let script = parse("[0]").unwrap();
        assert_eq!(script.format_version, "1.0");
    }

    #[test]
    fn test_workflow_discovery() {
        assert_eq!(parse("[0]").unwrap().workflow_names(), ["default"]);
        assert_eq!(parse("[0]\n[1]").unwrap().workflow_names(), ["default"]);
        assert_eq!(parse("[0]\n[*_1]").unwrap().workflow_names(), ["default"]);
        assert_eq!(
            parse("[0]\n[*_1]\n[auxiliary]").unwrap().workflow_names(),
            ["default"]
        );
        assert_eq!(
            parse("[0]\n[*_1]\n[human_2]").unwrap().workflow_names(),
            ["default", "human"]
        );
        assert_eq!(
            parse("[0]\n[*_1]\n[human_2]\n[mouse_2]")
                .unwrap()
                .workflow_names(),
            ["default", "human", "mouse"]
        );
        // wildcard names never become workflows
        assert_eq!(
            parse("[0]\n[*_1]\n[human_2]\n[mouse_2]\n[s*_3]")
                .unwrap()
                .workflow_names(),
            ["default", "human", "mouse"]
        );
    }

    #[test]
    fn test_wildcard_collision_is_duplicate() {
        // *_1 is adopted by workflow human and collides with human_1
        assert!(matches!(
            parse("[0]\n[*_1]\n[human_1]\n[mouse_2]"),
            Err(Error::DuplicateSection {
                index: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_section_names() {
        for bad in ["56_1", "_a", "a_", "1x", "*", "?"] {
            let result = parse(&format!("[{}]", bad));
            assert!(matches!(result, Err(Error::Parsing(_))), "accepted [{}]", bad);
        }
        for good in ["a5", "a_5", "*_0", "a*1_100"] {
            parse(&format!("[{}]", good)).unwrap_or_else(|e| panic!("rejected [{}]: {}", good, e));
        }
    }

    #[test]
    fn test_section_options() {
        for bad in ["ss", "skip a", "skip:_", "skip, skip", "sigil=a", "input_alias=a"] {
            let result = parse(&format!("[0:{}]", bad));
            assert!(matches!(result, Err(Error::Parsing(_))), "accepted [0:{}]", bad);
        }
        for good in ["sigil='[ ]'", "input_alias=\"a\"", "skip", "skip=False, blocking"] {
            parse(&format!("[0:{}]", good))
                .unwrap_or_else(|e| panic!("rejected [0:{}]: {}", good, e));
        }
    }

    #[test]
    fn test_duplicate_sections() {
        assert!(matches!(
            parse("[1]\n[1]"),
            Err(Error::DuplicateSection { .. })
        ));
        assert!(matches!(
            parse("[1]\n[3]\n[2,1]"),
            Err(Error::DuplicateSection { .. })
        ));
        assert!(matches!(
            parse("[a_1]\n[a_3]\n[*_1]"),
            Err(Error::DuplicateSection { .. })
        ));
        // the wildcard does not match workflow `a`, so no collision
        parse("[a_1]\n[a_3]\n[b*_1]").unwrap();
    }

    #[test]
    fn test_global_section() {
        // directives are not allowed outside of a step
        assert!(parse("input: 'filename'").is_err());
        // unrecognized directive
        assert!(parse("inputs: 'filename'").is_err());
        // bare words and calls are not assignments
        assert!(parse("something").is_err());
        assert!(parse("somefunc()").is_err());
        // assignments are fine
        parse("a = '1'").unwrap();
        parse("a = ['a', 'b']").unwrap();
        // unterminated string
        assert!(parse("a = 'b").is_err());
        // multi-line string literal
        parse("a = \"\"\"\nthis is a multi line\nstring \"\"\"\n").unwrap();
        // multi-line list literal, even with a blank line inside
        parse("a = [\n'a',\n\n'b'\n]\n").unwrap();
    }

    #[test]
    fn test_directive_name_not_assignable() {
        for name in ["input", "output", "depends"] {
            let result = parse(&format!("[0]\n{}='a.txt'", name));
            assert!(matches!(result, Err(Error::Parsing(_))), "accepted {}=", name);
        }
    }

    #[test]
    fn test_directives() {
        // multi-line directive values
        parse("\n[0]\ninput: 'filename',\n    'filename1'\n\n").unwrap();
        // continuation driven by the trailing comma and unfinished stack,
        // from the first column and across blank lines
        parse(
            "\n[0]\ninput: 'filename',\n'filename1',\n\nfilename4,\nopt1=value\noutput: \n    blah\n\ndepends:\n'something else'\n",
        )
        .unwrap();
        // option with expression
        parse("\n[0]\ninput: 'filename',  'filename2', opt=value==1\n\n").unwrap();
        // unrecognized directive
        assert!(parse("\n[0]\nsomething: 'filename', opt=value==1\n").is_err());
        // values need a comma between them
        assert!(parse("\n[0]\ninput: 'filename'  filename2\n").is_err());
        // directives may not follow actions
        assert!(parse("\n[0]\nfunc()\ninput: 'filename'\n").is_err());
        // no assignment between directives
        assert!(parse("\n[0]\ninput: 'a.txt'\na = 'some text'\noutput: 'b.txt'\n").is_err());
        // no action between directives
        assert!(parse("\n[0]\ninput: 'a.txt'\nabc\noutput: 'b.txt'\n").is_err());
    }

    #[test]
    fn test_directive_items_recorded() {
        let script =
            parse("[0]\nfiles = ['a.txt', 'b.txt']\ninput: 'a.pdf', files, skip=False\n").unwrap();
        let section = &script.sections[0];
        assert_eq!(section.assignments.len(), 1);
        assert_eq!(section.directives.len(), 1);
        assert_eq!(section.directives[0].0, DirectiveKind::Input);
        assert_eq!(section.directives[0].1, "'a.pdf', files, skip=False");
    }

    #[test]
    fn test_section_actions() {
        assert!(parse("func()").is_err());
        parse("\n[0]\nfunc('''\nmultiline \nstring''', with_option=1\n)\n").unwrap();
        assert!(parse("\n[0]\nfunc(\n").is_err());
    }

    #[test]
    fn test_statement_blocks_split_on_blank_lines() {
        let script = parse("[0]\nfunc1()\nfunc2()\n\nfunc3()\n").unwrap();
        let section = &script.sections[0];
        assert_eq!(section.statements.len(), 2);
        assert_eq!(section.statements[0], "func1()\nfunc2()");
        assert_eq!(section.statements[1], "func3()");
    }

    #[test]
    fn test_parameters_section_restrictions() {
        assert!(parse("\n[parameters]\ninput: 'filename'\n").is_err());
        assert!(parse("\n[parameters]\nfunc()\n").is_err());
        parse("\n[parameters]\n# threads\nn = 4\n").unwrap();
    }

    #[test]
    fn test_parameter_comments() {
        let script =
            parse("[parameters]\n# number of threads\nn = 4\n# genome build\nbuild = 'hg19'\n")
                .unwrap();
        let section = &script.sections[0];
        assert_eq!(section.parameters.len(), 2);
        assert_eq!(section.parameters[0].comment, "number of threads");
        assert_eq!(section.parameters[1].comment, "genome build");
    }

    #[test]
    fn test_descriptions() {
        let script = parse(
            "# first block\n\n# global\n# description\n\n# human\n# description of human\n\n# description of human continued\n\n[human_1]\n\na = '1'\n\n# mouse\n# mouse description\n#\n\n[mouse_1]\n",
        )
        .unwrap();
        assert_eq!(script.description, "global\ndescription\n\n");
        assert_eq!(
            script.workflow("human").unwrap().description,
            "description of human\ndescription of human continued\n"
        );
        assert_eq!(
            script.workflow("mouse").unwrap().description,
            "mouse description\n"
        );
    }

    #[test]
    fn test_leading_section_comment_only() {
        let script =
            parse("[a_1]\n# leading comment\n# continued\na = 1\n# trailing comment\nb = 2\n")
                .unwrap();
        let section = &script.sections[0];
        assert_eq!(section.comment, "leading comment continued");
        assert_eq!(section.assignments.len(), 2);
    }

    #[test]
    fn test_roundtrip_emission() {
        let source = "a = 100\n\n[parameters]\n# threads\nn = 4\n\n[human_1 : skip=False]\n# align reads\ninput: 'a.txt',\n    'b.txt'\noutput: 'c.txt'\nrun('align')\n";
        let script = parse(source).unwrap();
        let emitted = script.to_string();
        let reparsed = parse(&emitted).unwrap();
        assert_eq!(reparsed.sections.len(), script.sections.len());
        for (a, b) in script.sections.iter().zip(reparsed.sections.iter()) {
            assert_eq!(a.names, b.names);
            assert_eq!(a.options, b.options);
            assert_eq!(a.assignments, b.assignments);
            assert_eq!(a.directives.len(), b.directives.len());
            for ((ka, va), (kb, vb)) in a.directives.iter().zip(b.directives.iter()) {
                assert_eq!(ka, kb);
                assert_eq!(
                    va.split_whitespace().collect::<Vec<_>>(),
                    vb.split_whitespace().collect::<Vec<_>>()
                );
            }
            assert_eq!(a.parameters.len(), b.parameters.len());
            assert_eq!(a.statements, b.statements);
        }
    }

    #[test]
    fn test_error_positions_are_collected() {
        let err = parse("input: 'x'\n[0]\nsomething: 'x'\n").unwrap_err();
        match err {
            Error::Parsing(parsing) => {
                assert_eq!(parsing.issues.len(), 2);
                assert_eq!(parsing.issues[0].line_no, 1);
                assert_eq!(parsing.issues[1].line_no, 3);
            }
            other => panic!("expected parsing error, got {}", other),
        }
    }

    #[test]
    fn test_split_options_respects_quotes() {
        assert_eq!(split_options("skip=False, blocking"), vec!["skip=False", " blocking"]);
        assert_eq!(split_options("sigil='a, b', skip"), vec!["sigil='a, b'", " skip"]);
    }
}
