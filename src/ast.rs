use std::fmt;

/// Expression nodes live in a `typed_arena::Arena` owned by whoever parsed them.
pub type Expr<'arena> = &'arena ExprBody<'arena>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprBody<'arena> {
    Int(u64),
    Str(Vec<u8>),
    Var(Var),
    Add(Expr<'arena>, Expr<'arena>),
    Sub(Expr<'arena>, Expr<'arena>),
    Mul(Expr<'arena>, Expr<'arena>),
    Neg(Expr<'arena>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement<'arena> {
    Assign(Var, Expr<'arena>),
    Print(Var),
    PrintLog,
    Delete(Var),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program<'arena> {
    pub statements: Vec<Statement<'arena>>,
}

impl<'arena> Program<'arena> {
    pub fn new(statements: Vec<Statement<'arena>>) -> Self {
        Self { statements }
    }
}

/// A variable reference. Only single-character names can be bound, but the
/// parser accepts any identifier and leaves the check to slot allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Var {
    name: String,
}

impl Var {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Display for ExprBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprBody::Int(n) => write!(f, "{}", n),
            ExprBody::Str(s) => write!(f, "{:?}", String::from_utf8_lossy(s)),
            ExprBody::Var(var) => write!(f, "{}", var),
            ExprBody::Add(lhs, rhs) => write!(f, "({} + {})", lhs, rhs),
            ExprBody::Sub(lhs, rhs) => write!(f, "({} - {})", lhs, rhs),
            ExprBody::Mul(lhs, rhs) => write!(f, "({} * {})", lhs, rhs),
            ExprBody::Neg(expr) => write!(f, "(-{})", expr),
        }
    }
}

impl fmt::Display for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Assign(var, expr) => write!(f, "{} = {};", var, expr),
            Statement::Print(var) => write!(f, "print {};", var),
            Statement::PrintLog => f.write_str("print_log;"),
            Statement::Delete(var) => write!(f, "del {};", var),
        }
    }
}
