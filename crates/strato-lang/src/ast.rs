//! Syntax tree for the configuration language
//!
//! The resolver consumes these nodes; node locations are carried for
//! diagnostics only and never affect evaluation.

use crate::value::Value;
use std::fmt;

/// Source position of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A parsed source file: the path it came from plus its statements
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub body: Vec<Node>,
}

/// A statement in a file or block body
#[derive(Debug, Clone)]
pub enum Node {
    /// `key: value`
    Pair(PairNode),
    /// `cloud::network "main" ... end`
    Resource(ResourceNode),
    /// `rule ... end` - a nested sub-entity body
    KeyBlock(KeyBlockNode),
    /// `for x in [...] ... end`
    For(ForNode),
    /// `if cond ... else ... end`
    If(IfNode),
}

impl Node {
    pub fn location(&self) -> &Location {
        match self {
            Self::Pair(n) => &n.location,
            Self::Resource(n) => &n.location,
            Self::KeyBlock(n) => &n.location,
            Self::For(n) => &n.location,
            Self::If(n) => &n.location,
        }
    }

    /// The bound key, for pair statements only
    pub fn pair_key(&self) -> Option<&str> {
        match self {
            Self::Pair(n) => Some(&n.key),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PairNode {
    pub key: String,
    pub value: Expr,
    pub location: Location,
}

/// Declares a resource of a registered (namespaced) type. The name is an
/// expression so iteration constructs can compute it.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub type_name: String,
    pub name: Expr,
    pub body: Vec<Node>,
    pub location: Location,
}

/// A nested block keyed by a field name of the enclosing entity. The
/// optional name labels one instance among repeated blocks.
#[derive(Debug, Clone)]
pub struct KeyBlockNode {
    pub key: String,
    pub name: Option<Expr>,
    pub body: Vec<Node>,
    pub location: Location,
}

/// Repeated iteration: the body is expanded once per element; all iterated
/// lists must have equal length.
#[derive(Debug, Clone)]
pub struct ForNode {
    pub variables: Vec<String>,
    pub lists: Vec<Expr>,
    pub body: Vec<Node>,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct IfNode {
    pub condition: Expr,
    pub then_body: Vec<Node>,
    pub else_body: Vec<Node>,
    pub location: Location,
}

/// A value-producing expression
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value, Location),
    /// String with embedded references, e.g. `"net-$(region)"`
    Interpolated(Vec<Expr>, Location),
    List(Vec<Expr>, Location),
    Map(Vec<(String, Expr)>, Location),
    Reference(Box<ReferenceExpr>),
    Binary(Box<BinaryExpr>),
}

impl Expr {
    pub fn location(&self) -> &Location {
        match self {
            Self::Literal(_, location)
            | Self::Interpolated(_, location)
            | Self::List(_, location)
            | Self::Map(_, location) => location,
            Self::Reference(reference) => &reference.location,
            Self::Binary(binary) => &binary.location,
        }
    }
}

/// `$(target [name] [path...] [| field == value]...)`
///
/// A namespaced target (`cloud::network`) looks up a resource by name, where
/// the name may end in `*` for a wildcard match; a bare target walks the
/// scope chain. Path segments drill into the resolved value.
#[derive(Debug, Clone)]
pub struct ReferenceExpr {
    pub target: String,
    pub name: Option<Expr>,
    pub path: Vec<String>,
    pub filters: Vec<Filter>,
    pub location: Location,
}

impl ReferenceExpr {
    /// Whether the target names a resource type rather than a scope variable
    pub fn is_resource(&self) -> bool {
        self.target.contains("::")
    }
}

/// Query filter applied to wildcard reference results
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub left: Expr,
    pub right: Expr,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "and",
            Self::Or => "or",
        };
        write!(f, "{op}")
    }
}
