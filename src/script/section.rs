//! Parsed section model.
//!
//! A section is one `[...]` block of a script: its names, options, leading
//! comment, and the ordered item lists the parser committed into it. The
//! implicit global block and the `parameters` block are sections too.

/// The three directive kinds a step may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Input,
    Output,
    Depends,
}

impl DirectiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "input" => Some(DirectiveKind::Input),
            "output" => Some(DirectiveKind::Output),
            "depends" => Some(DirectiveKind::Depends),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DirectiveKind::Input => "input",
            DirectiveKind::Output => "output",
            DirectiveKind::Depends => "depends",
        }
    }
}

impl std::fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of section header options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionOption {
    InputAlias,
    OutputAlias,
    Nonconcurrent,
    Skip,
    Blocking,
    Sigil,
    Target,
}

impl SectionOption {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "input_alias" => Some(SectionOption::InputAlias),
            "output_alias" => Some(SectionOption::OutputAlias),
            "nonconcurrent" => Some(SectionOption::Nonconcurrent),
            "skip" => Some(SectionOption::Skip),
            "blocking" => Some(SectionOption::Blocking),
            "sigil" => Some(SectionOption::Sigil),
            "target" => Some(SectionOption::Target),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SectionOption::InputAlias => "input_alias",
            SectionOption::OutputAlias => "output_alias",
            SectionOption::Nonconcurrent => "nonconcurrent",
            SectionOption::Skip => "skip",
            SectionOption::Blocking => "blocking",
            SectionOption::Sigil => "sigil",
            SectionOption::Target => "target",
        }
    }
}

/// A `parameters` section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    /// Unevaluated default expression.
    pub default: String,
    /// Description comment accumulated immediately above the parameter.
    pub comment: String,
}

/// Kind of the most recently committed item, used by the parser to decide
/// how the next column-0 line is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastItem {
    Assignment,
    Directive,
    Statement,
}

/// One parsed section.
#[derive(Debug, Clone, Default)]
pub struct Section {
    /// `(name, index)` pairs from the header; a bare index becomes
    /// `("default", index)`, a name without index is auxiliary.
    pub names: Vec<(String, Option<u32>)>,
    /// Header options with their unevaluated value expressions.
    pub options: Vec<(SectionOption, Option<String>)>,
    /// Leading description comment (pending parameter comment in the
    /// parameters section).
    pub comment: String,
    pub parameters: Vec<Parameter>,
    pub assignments: Vec<(String, String)>,
    pub directives: Vec<(DirectiveKind, String)>,
    /// Statement blocks; continuation lines stay inside their block.
    pub statements: Vec<String>,
    pub is_global: bool,
    pub is_parameters: bool,
    last_item: Option<LastItem>,
    /// Set once the leading comment block has been closed off.
    pub(crate) comment_done: bool,
}

impl Section {
    pub fn new(
        names: Vec<(String, Option<u32>)>,
        options: Vec<(SectionOption, Option<String>)>,
    ) -> Self {
        let is_parameters = matches!(names.as_slice(), [(name, _)] if name == "parameters");
        Self {
            names,
            options,
            is_parameters,
            ..Default::default()
        }
    }

    pub fn new_global() -> Self {
        Self {
            is_global: true,
            ..Default::default()
        }
    }

    /// A section with no committed items; comments alone do not count.
    pub fn is_empty(&self) -> bool {
        self.last_item.is_none()
    }

    pub fn last_item(&self) -> Option<LastItem> {
        self.last_item
    }

    pub fn option(&self, option: SectionOption) -> Option<Option<&str>> {
        self.options
            .iter()
            .find(|(o, _)| *o == option)
            .map(|(_, value)| value.as_deref())
    }

    pub fn has_option(&self, option: SectionOption) -> bool {
        self.option(option).is_some()
    }

    /// Append a comment line to the pending comment.
    pub fn add_comment(&mut self, line: &str) {
        let text = line.trim_start_matches('#').trim();
        if !self.comment.is_empty() {
            self.comment.push(' ');
        }
        self.comment.push_str(text);
    }

    /// Commit an assignment (a parameter, in the parameters section).
    pub fn add_assignment(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.is_parameters {
            self.parameters.push(Parameter {
                name: name.into(),
                default: value.into(),
                comment: std::mem::take(&mut self.comment),
            });
        } else {
            self.assignments.push((name.into(), value.into()));
        }
        self.last_item = Some(LastItem::Assignment);
    }

    pub fn add_directive(&mut self, kind: DirectiveKind, value: impl Into<String>) {
        self.directives.push((kind, value.into()));
        self.last_item = Some(LastItem::Directive);
    }

    /// Open a new statement block.
    pub fn add_statement(&mut self, line: impl Into<String>) {
        self.statements.push(line.into());
        self.last_item = Some(LastItem::Statement);
    }

    /// Append a continuation line to the current item.
    pub fn extend(&mut self, line: &str) {
        match self.last_item {
            Some(LastItem::Directive) => {
                if let Some((_, value)) = self.directives.last_mut() {
                    value.push('\n');
                    value.push_str(line);
                }
            }
            Some(LastItem::Assignment) => {
                if self.is_parameters {
                    if let Some(parameter) = self.parameters.last_mut() {
                        parameter.default.push('\n');
                        parameter.default.push_str(line);
                    }
                } else if let Some((_, value)) = self.assignments.last_mut() {
                    value.push('\n');
                    value.push_str(line);
                }
            }
            Some(LastItem::Statement) => {
                if let Some(block) = self.statements.last_mut() {
                    block.push('\n');
                    block.push_str(line);
                }
            }
            None => self.add_statement(line),
        }
    }

    /// The header text, e.g. `human_1,mouse_2 : skip=False`.
    pub fn header(&self) -> String {
        let names = self
            .names
            .iter()
            .map(|(name, index)| match index {
                Some(index) => format!("{}_{}", name, index),
                None => name.clone(),
            })
            .collect::<Vec<_>>()
            .join(",");
        if self.options.is_empty() {
            names
        } else {
            let options = self
                .options
                .iter()
                .map(|(option, value)| match value {
                    Some(value) => format!("{}={}", option.as_str(), value),
                    None => option.as_str().to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} : {}", names, options)
        }
    }
}

impl std::fmt::Display for Section {
    /// Re-emit the section as script source. Items come back in category
    /// order with their original per-list ordering and values verbatim, so
    /// re-parsing reproduces the same structure.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_global {
            writeln!(f, "[{}]", self.header())?;
        }
        if !self.is_parameters && !self.comment.is_empty() {
            writeln!(f, "# {}", self.comment)?;
        }
        for parameter in &self.parameters {
            if !parameter.comment.is_empty() {
                writeln!(f, "# {}", parameter.comment)?;
            }
            writeln!(f, "{} = {}", parameter.name, parameter.default)?;
        }
        for (name, value) in &self.assignments {
            writeln!(f, "{} = {}", name, value)?;
        }
        for (kind, value) in &self.directives {
            writeln!(f, "{}: {}", kind, value)?;
        }
        for block in &self.statements {
            writeln!(f, "{}", block)?;
        }
        Ok(())
    }
}
