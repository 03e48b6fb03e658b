//! PromQL dependency analysis
//!
//! Parses alerting expressions into a closed expression tree ([`Expr`]) and
//! finds the time series an expression depends on. The crate never evaluates
//! expressions.

pub mod ast;
pub mod extract;
mod lexer;
pub mod parser;

pub use ast::Expr;
pub use extract::{metric_names, selector_names, SCRAPE_HEALTH_METRIC};
pub use parser::parse_expr;

use thiserror::Error;

/// Syntax error in a PromQL expression
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("parse error at char {position}: {message}")]
pub struct ParseError {
    /// Byte offset into the expression where parsing failed
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}
