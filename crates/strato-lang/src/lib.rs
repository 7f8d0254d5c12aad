//! # strato-lang
//!
//! Front end for the strato configuration language: a hand-written lexer and
//! recursive-descent parser producing a small statement/expression AST, plus
//! the runtime [`Value`] model the resolver evaluates expressions into.
//!
//! The grammar is deliberately small; the engine depends only on the node
//! kinds (pairs, resource blocks, key blocks, iteration, conditionals,
//! literals, interpolated strings, collections, references), never on the
//! concrete syntax.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod value;

pub use ast::{
    BinaryExpr, BinaryOp, Expr, Filter, FilterOp, ForNode, IfNode, KeyBlockNode, Location, Node,
    PairNode, ReferenceExpr, ResourceNode, SourceFile,
};
pub use error::ParseError;
pub use parser::{parse, parse_file};
pub use value::Value;
