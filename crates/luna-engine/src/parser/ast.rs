//! Abstract syntax tree for Luna chunks.

use std::rc::Rc;

/// A sequence of statements with its own local scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub stats: Vec<Stat>,
}

/// A statement tagged with the line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Stat {
    pub kind: StatKind,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatKind {
    /// `local a, b = e1, e2`
    Local { names: Vec<Rc<str>>, exprs: Vec<Expr> },
    /// `a, t.k = e1, e2`
    Assign { targets: Vec<Expr>, exprs: Vec<Expr> },
    /// A call used as a statement
    Call(Expr),
    Do(Block),
    While { cond: Expr, body: Block },
    Repeat { body: Block, cond: Expr },
    If {
        branches: Vec<(Expr, Block)>,
        otherwise: Option<Block>,
    },
    NumericFor {
        var: Rc<str>,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        names: Vec<Rc<str>>,
        exprs: Vec<Expr>,
        body: Block,
    },
    /// `function a.b:c() end`; `target` is a name or index expression
    Function { target: Expr, body: Rc<FunctionBody> },
    LocalFunction { name: Rc<str>, body: Rc<FunctionBody> },
    Return(Vec<Expr>),
    Break,
}

/// Parameters and body of a function literal.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub params: Vec<Rc<str>>,
    pub is_vararg: bool,
    pub body: Block,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Nil,
    True,
    False,
    VarArgs,
    Number(f64),
    String(Rc<str>),
    Function(Rc<FunctionBody>),
    Name(Rc<str>),
    Index {
        object: Box<Expr>,
        key: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        line: u32,
    },
    MethodCall {
        object: Box<Expr>,
        method: Rc<str>,
        args: Vec<Expr>,
        line: u32,
    },
    Table(Vec<TableField>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    /// Parenthesized expression, truncated to one value
    Paren(Box<Expr>),
}

impl Expr {
    /// Whether the expression can produce more than one value.
    pub fn is_multi(&self) -> bool {
        matches!(self, Expr::Call { .. } | Expr::MethodCall { .. } | Expr::VarArgs)
    }

    /// Whether the expression may appear on the left of `=`.
    pub fn is_assignable(&self) -> bool {
        matches!(self, Expr::Name(_) | Expr::Index { .. })
    }

    /// Short description used in error messages (`global 'f'`, `field 'x'`).
    pub fn describe(&self) -> Option<String> {
        match self {
            Expr::Name(name) => Some(format!("global '{}'", name)),
            Expr::Index { key, .. } => match key.as_ref() {
                Expr::String(k) => Some(format!("field '{}'", k)),
                _ => None,
            },
            Expr::MethodCall { method, .. } => Some(format!("method '{}'", method)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableField {
    /// `{ e }`
    Positional(Expr),
    /// `{ name = e }`
    Named(Rc<str>, Expr),
    /// `{ [k] = e }`
    Keyed(Expr, Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    /// Left and right binding power.
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOp::Or => (1, 1),
            BinOp::And => (2, 2),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => (3, 3),
            BinOp::Concat => (5, 4),
            BinOp::Add | BinOp::Sub => (6, 6),
            BinOp::Mul | BinOp::Div | BinOp::Mod => (7, 7),
            BinOp::Pow => (10, 9),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

impl UnOp {
    pub const PRIORITY: u8 = 8;
}
