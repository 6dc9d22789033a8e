//! Accumulator for multi-line logical items.
//!
//! The parser pushes physical lines here while an assignment value,
//! directive body, or statement block is still open, and commits the item
//! once the fragment compiles under its category's grammar. Completeness is
//! judged by the same evaluator used at execution time.

use thiserror::Error;

use crate::eval::{CompileMode, Evaluator};

/// Grammar category of the item being accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackCategory {
    /// An assignment's right-hand side.
    Expression,
    /// A directive body (argument-list grammar).
    Directive,
    /// An opaque action block.
    Statements,
}

impl StackCategory {
    pub fn compile_mode(self) -> CompileMode {
        match self {
            StackCategory::Expression => CompileMode::Expression,
            StackCategory::Directive => CompileMode::Directive,
            StackCategory::Statements => CompileMode::Statements,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StackCategory::Expression => "expression",
            StackCategory::Directive => "directive",
            StackCategory::Statements => "statements",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StackError {
    /// `set` on a non-empty stack: the previous item was never validated.
    #[error("expression stack must be cleared before starting a new item")]
    NotCleared,
    /// `push` before `set`.
    #[error("cannot extend an expression stack with no category")]
    Uninitialised,
}

/// Scratch buffer of fragments for one in-flight logical item.
#[derive(Debug, Default)]
pub struct ExprStack {
    category: Option<StackCategory>,
    fragments: Vec<String>,
}

impl ExprStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.category = None;
        self.fragments.clear();
    }

    /// Begin a new item with its first fragment.
    pub fn set(
        &mut self,
        fragment: impl Into<String>,
        category: StackCategory,
    ) -> Result<(), StackError> {
        if !self.fragments.is_empty() {
            return Err(StackError::NotCleared);
        }
        self.fragments.push(fragment.into());
        self.category = Some(category);
        Ok(())
    }

    /// Append a continuation fragment.
    pub fn push(&mut self, fragment: impl Into<String>) -> Result<(), StackError> {
        if self.category.is_none() {
            return Err(StackError::Uninitialised);
        }
        self.fragments.push(fragment.into());
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn category(&self) -> Option<StackCategory> {
        self.category
    }

    /// The accumulated text, physical lines rejoined.
    pub fn text(&self) -> String {
        self.fragments.join("\n")
    }

    /// True iff the accumulated text is a complete item.
    ///
    /// An empty stack is vacuously valid. A directive whose last fragment
    /// ends in a comma is treated as inherently incomplete even when the
    /// argument grammar would accept it: the comma forces continuation.
    pub fn is_valid(&self, evaluator: &dyn Evaluator) -> bool {
        if self.fragments.is_empty() {
            return true;
        }
        let Some(category) = self.category else {
            return false;
        };
        if category == StackCategory::Directive {
            if let Some(last) = self.fragments.last() {
                if last.trim_end().ends_with(',') {
                    return false;
                }
            }
        }
        evaluator.compile(&self.text(), category.compile_mode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::DslEvaluator;

    #[test]
    fn test_empty_stack_is_valid() {
        let stack = ExprStack::new();
        assert!(stack.is_valid(&DslEvaluator));
    }

    #[test]
    fn test_set_requires_cleared_stack() {
        let mut stack = ExprStack::new();
        stack.set("'a'", StackCategory::Expression).unwrap();
        assert_eq!(
            stack.set("'b'", StackCategory::Expression),
            Err(StackError::NotCleared)
        );
        stack.clear();
        stack.set("'b'", StackCategory::Expression).unwrap();
    }

    #[test]
    fn test_push_requires_category() {
        let mut stack = ExprStack::new();
        assert_eq!(stack.push("x"), Err(StackError::Uninitialised));
        stack.set("[", StackCategory::Expression).unwrap();
        stack.push("'a']").unwrap();
        assert_eq!(stack.text(), "[\n'a']");
    }

    #[test]
    fn test_expression_completeness_across_lines() {
        let mut stack = ExprStack::new();
        stack.set("[", StackCategory::Expression).unwrap();
        assert!(!stack.is_valid(&DslEvaluator));
        stack.push("'a',").unwrap();
        assert!(!stack.is_valid(&DslEvaluator));
        stack.push("'b'").unwrap();
        assert!(!stack.is_valid(&DslEvaluator));
        stack.push("]").unwrap();
        assert!(stack.is_valid(&DslEvaluator));
    }

    #[test]
    fn test_directive_trailing_comma_forces_continuation() {
        let mut stack = ExprStack::new();
        stack.set("'filename',", StackCategory::Directive).unwrap();
        assert!(!stack.is_valid(&DslEvaluator));
        stack.push("'filename1'").unwrap();
        assert!(stack.is_valid(&DslEvaluator));
    }

    #[test]
    fn test_statement_block() {
        let mut stack = ExprStack::new();
        stack.set("func('''", StackCategory::Statements).unwrap();
        assert!(!stack.is_valid(&DslEvaluator));
        stack.push("multiline").unwrap();
        stack.push("string''', with_option=1").unwrap();
        assert!(!stack.is_valid(&DslEvaluator));
        stack.push(")").unwrap();
        assert!(stack.is_valid(&DslEvaluator));
    }
}
