//! Typed C syntax tree produced by [`crate::sema`].
//!
//! Every expression carries its static type and a unique [`ExprId`] so the
//! symbolic engine can bind per-path values to it.

use crate::diagnostics::Span;
use crate::types::{CType, TypeContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Global,
    Local,
    Param,
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub id: VarId,
    pub name: String,
    pub ty: CType,
    pub storage: Storage,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TranslationUnit {
    pub types: TypeContext,
    pub vars: Vec<VarDecl>,
    pub globals: Vec<LocalDecl>,
    pub functions: Vec<FunctionDecl>,
}

impl TranslationUnit {
    pub fn var(&self, id: VarId) -> &VarDecl {
        &self.vars[id.0 as usize]
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name && f.body.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub ret: CType,
    pub params: Vec<VarId>,
    pub body: Option<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct LocalDecl {
    pub var: VarId,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Compound(Vec<Stmt>),
    Expr(Expr),
    Decl(Vec<LocalDecl>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    /// `switch`: the body's statements in source order, and the index of
    /// the first statement under each label. Execution starts at a label and
    /// falls through to the end of `body`.
    Switch {
        cond: Expr,
        body: Vec<Stmt>,
        cases: Vec<SwitchCase>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Empty,
    /// Statements the engine does not model (goto, asm).
    Unsupported(String),
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub label: CaseLabel,
    pub start: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseLabel {
    Value(i128),
    /// A `case` whose value did not fold to a constant.
    Unknown,
    Default,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
    pub ty: CType,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    /// Conversion inserted by the front end (assignment, argument passing, return).
    Implicit,
    /// Cast written in the source.
    Explicit,
    ArrayToPointer,
    FunctionToPointer,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLiteral(i128),
    FloatLiteral(f64),
    StringLiteral(String),
    DeclRef(VarId),
    FunctionRef(String),
    Paren(Box<Expr>),
    Cast {
        kind: CastKind,
        operand: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary(BinaryExpr),
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        /// `None` for calls through function pointers.
        callee: Option<String>,
        args: Vec<Expr>,
    },
    /// `sizeof(type)` / `sizeof expr`; `value` is `None` for types without a
    /// constant size (VLAs, incomplete types).
    SizeOf {
        operand: CType,
        value: Option<u64>,
    },
    /// `offsetof(type, member)`; `value` is `None` if the layout is unknown.
    OffsetOf {
        record: CType,
        member: String,
        value: Option<u64>,
    },
    AlignOf {
        operand: CType,
        value: Option<u64>,
    },
    Member {
        base: Box<Expr>,
        field: String,
        arrow: bool,
    },
    Subscript {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// A brace initialiser flattened to the cells it writes. Members the
    /// braces leave out appear as explicit zeros.
    InitList(Vec<InitItem>),
    Unsupported(String),
}

/// One initialised cell: a char offset into the object and its value.
#[derive(Debug, Clone)]
pub struct InitItem {
    pub offset: u64,
    pub value: Expr,
}

impl Expr {
    /// Strip parentheses.
    pub fn ignore_parens(&self) -> &Expr {
        match &self.kind {
            ExprKind::Paren(inner) => inner.ignore_parens(),
            _ => self,
        }
    }

    pub fn as_binary(&self) -> Option<&BinaryExpr> {
        match &self.kind {
            ExprKind::Binary(bin) => Some(bin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    Deref,
    AddrOf,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalOr,
    Assign,
    MulAssign,
    DivAssign,
    RemAssign,
    AddAssign,
    SubAssign,
    ShlAssign,
    ShrAssign,
    AndAssign,
    XorAssign,
    OrAssign,
    Comma,
}

impl BinaryOp {
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "<<" => BinaryOp::Shl,
            ">>" => BinaryOp::Shr,
            "<" => BinaryOp::Lt,
            ">" => BinaryOp::Gt,
            "<=" => BinaryOp::Le,
            ">=" => BinaryOp::Ge,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "&" => BinaryOp::BitAnd,
            "^" => BinaryOp::BitXor,
            "|" => BinaryOp::BitOr,
            "&&" => BinaryOp::LogicalAnd,
            "||" => BinaryOp::LogicalOr,
            "=" => BinaryOp::Assign,
            "*=" => BinaryOp::MulAssign,
            "/=" => BinaryOp::DivAssign,
            "%=" => BinaryOp::RemAssign,
            "+=" => BinaryOp::AddAssign,
            "-=" => BinaryOp::SubAssign,
            "<<=" => BinaryOp::ShlAssign,
            ">>=" => BinaryOp::ShrAssign,
            "&=" => BinaryOp::AndAssign,
            "^=" => BinaryOp::XorAssign,
            "|=" => BinaryOp::OrAssign,
            "," => BinaryOp::Comma,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
            BinaryOp::Assign => "=",
            BinaryOp::MulAssign => "*=",
            BinaryOp::DivAssign => "/=",
            BinaryOp::RemAssign => "%=",
            BinaryOp::AddAssign => "+=",
            BinaryOp::SubAssign => "-=",
            BinaryOp::ShlAssign => "<<=",
            BinaryOp::ShrAssign => ">>=",
            BinaryOp::AndAssign => "&=",
            BinaryOp::XorAssign => "^=",
            BinaryOp::OrAssign => "|=",
            BinaryOp::Comma => ",",
        }
    }

    /// `+` and `-`.
    pub fn is_additive(&self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Sub)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }

    pub fn is_assignment(&self) -> bool {
        *self == BinaryOp::Assign || self.compound_base().is_some()
    }

    /// For `a op= b`, the operator `op`.
    pub fn compound_base(&self) -> Option<BinaryOp> {
        Some(match self {
            BinaryOp::MulAssign => BinaryOp::Mul,
            BinaryOp::DivAssign => BinaryOp::Div,
            BinaryOp::RemAssign => BinaryOp::Rem,
            BinaryOp::AddAssign => BinaryOp::Add,
            BinaryOp::SubAssign => BinaryOp::Sub,
            BinaryOp::ShlAssign => BinaryOp::Shl,
            BinaryOp::ShrAssign => BinaryOp::Shr,
            BinaryOp::AndAssign => BinaryOp::BitAnd,
            BinaryOp::XorAssign => BinaryOp::BitXor,
            BinaryOp::OrAssign => BinaryOp::BitOr,
            _ => return None,
        })
    }
}
