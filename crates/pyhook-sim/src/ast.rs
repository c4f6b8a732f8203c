use std::sync::Arc;

/// Body of some code executed within its own frame: module, function, or
/// class body.
#[derive(Debug)]
pub struct CodeBody {
    /// Code name (`<module>`, function or class name).
    pub name: String,
    /// Positional parameters.
    pub params: Vec<String>,
    /// Statements.
    pub body: Vec<Stmt>,
    /// Line of the header (or 1 for a module).
    pub first_line: i32,
    /// Last line of the body.
    pub last_line: i32,
    /// Local variable names, parameters first.
    pub var_names: Vec<String>,
    /// Names declared `global`.
    pub globals: Vec<String>,
}

/// Statement with its line.
#[derive(Debug)]
pub struct Stmt {
    /// Line of the statement.
    pub line: i32,
    /// Statement kind.
    pub kind: StmtKind,
}

/// Kind of statement.
#[derive(Debug)]
pub enum StmtKind {
    Expr(Expr),
    Assign { target: Expr, value: Expr },
    AugAssign { target: Expr, op: BinOp, value: Expr },
    If { branches: Vec<(Expr, Vec<Stmt>)>, orelse: Vec<Stmt> },
    While { test: Expr, body: Vec<Stmt> },
    For { target: Expr, iter: Expr, body: Vec<Stmt> },
    Def(Arc<CodeBody>),
    Class { base: Option<Expr>, body: Arc<CodeBody> },
    Return(Option<Expr>),
    Try { body: Vec<Stmt>, handlers: Vec<Handler>, finally: Vec<Stmt> },
    Raise(Option<Expr>),
    Pass,
    Break,
    Continue,
    Import(String),
    Global(Vec<String>),
}

/// `except` clause.
#[derive(Debug)]
pub struct Handler {
    /// Line of the clause.
    pub line: i32,
    /// Caught class(es), `None` catching everything.
    pub class: Option<Expr>,
    /// Name bound to the exception.
    pub name: Option<String>,
    /// Handler body.
    pub body: Vec<Stmt>,
}

/// Expression.
#[derive(Debug, Clone)]
pub enum Expr {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    Name(String),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Returns the dotted name this expression spells, if any.
    pub fn dotted_name(&self) -> Option<String> {
        match self {
            Self::Name(name) => Some(name.clone()),
            Self::Attr(base, attr) => Some(format!("{}.{attr}", base.dotted_name()?)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    /// Returns the operator symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    /// Returns the operator symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Is => "is",
            Self::IsNot => "is not",
        }
    }
}
