//! Abstract syntax tree for Structured Text.
//!
//! Three node families: declarations (the compilation unit and its POUs),
//! statements, and expressions. Every node carries the 1-based source
//! line/column it started at, for diagnostics and the debug map.

use crate::types::Type;

/// A parsed source file: globals, POUs and type definitions in declaration
/// order.
#[derive(Debug, Clone, Default)]
pub struct CompilationUnit {
    pub globals: Vec<VarBlock>,
    pub functions: Vec<FunctionDecl>,
    pub function_blocks: Vec<FunctionBlockDecl>,
    pub interfaces: Vec<InterfaceDecl>,
    pub type_defs: Vec<TypeDef>,
    pub programs: Vec<ProgramDecl>,
}

#[derive(Debug, Clone)]
pub enum TypeDef {
    Struct(StructDecl),
    Enum(EnumDecl),
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub members: Vec<VarDecl>,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: String,
    /// Underlying integer type name; DINT when not spelled out.
    pub base: Type,
    /// `(name, explicit value)` — implicit values are assigned by the
    /// symbol table as previous + 1, starting at 0.
    pub values: Vec<(String, Option<i64>)>,
    pub line: usize,
    pub column: usize,
}

/// Which declaration section a variable came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Var,
    VarInput,
    VarOutput,
    VarInOut,
    VarTemp,
    VarGlobal,
}

impl Section {
    pub fn keyword(self) -> &'static str {
        match self {
            Section::Var => "VAR",
            Section::VarInput => "VAR_INPUT",
            Section::VarOutput => "VAR_OUTPUT",
            Section::VarInOut => "VAR_IN_OUT",
            Section::VarTemp => "VAR_TEMP",
            Section::VarGlobal => "VAR_GLOBAL",
        }
    }
}

/// One `VAR… END_VAR` block.
#[derive(Debug, Clone)]
pub struct VarBlock {
    pub section: Section,
    pub constant: bool,
    pub retain: bool,
    pub vars: Vec<VarDecl>,
}

/// A single variable declaration inside a block.
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub ty: Type,
    /// `AT %I…` / `AT %Q…` binding, raw token text.
    pub io_at: Option<String>,
    pub init: Option<Expr>,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub return_type: Type,
    pub var_blocks: Vec<VarBlock>,
    pub body: Vec<Statement>,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub struct FunctionBlockDecl {
    pub name: String,
    pub extends: Option<String>,
    pub implements: Vec<String>,
    pub var_blocks: Vec<VarBlock>,
    pub methods: Vec<MethodDecl>,
    /// The FB body emitted on each invocation of an instance.
    pub body: Vec<Statement>,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Private,
    Protected,
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub name: String,
    pub return_type: Option<Type>,
    pub access: Access,
    pub is_abstract: bool,
    pub is_final: bool,
    pub is_override: bool,
    pub var_blocks: Vec<VarBlock>,
    pub body: Vec<Statement>,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub struct InterfaceDecl {
    pub name: String,
    pub extends: Vec<String>,
    pub methods: Vec<MethodSignature>,
    pub line: usize,
    pub column: usize,
}

/// Signature of an interface method: no body, no locals.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSignature {
    pub name: String,
    pub return_type: Option<Type>,
    pub inputs: Vec<(String, Type)>,
    pub outputs: Vec<(String, Type)>,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub struct ProgramDecl {
    pub name: String,
    pub var_blocks: Vec<VarBlock>,
    pub body: Vec<Statement>,
    pub line: usize,
    pub column: usize,
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Assign {
        target: Expr,
        value: Expr,
    },
    If {
        /// `(condition, body)` for the IF and every ELSIF, in order.
        branches: Vec<(Expr, Vec<Statement>)>,
        else_body: Option<Vec<Statement>>,
    },
    While {
        condition: Expr,
        body: Vec<Statement>,
    },
    For {
        counter: String,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Vec<Statement>,
    },
    Repeat {
        body: Vec<Statement>,
        until: Expr,
    },
    Case {
        selector: Expr,
        branches: Vec<CaseBranch>,
        else_body: Option<Vec<Statement>>,
    },
    Exit,
    Continue,
    Return,
    /// Function-block invocation by instance name with named parameters.
    FbCall {
        instance: String,
        args: Vec<(String, Expr)>,
    },
    /// A method call in statement position; a returned value is dropped.
    MethodCall(Expr),
}

#[derive(Debug, Clone)]
pub struct CaseBranch {
    pub labels: Vec<CaseLabel>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub enum CaseLabel {
    Value(Expr),
    Range(Expr, Expr),
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    BoolLit(bool),
    IntLit(i64),
    RealLit(f64),
    /// Milliseconds.
    TimeLit(i64),
    /// Days since 1970-01-01.
    DateLit(i64),
    /// Milliseconds since midnight.
    TodLit(i64),
    /// Seconds since 1970-01-01.
    DtLit(i64),
    StringLit {
        value: String,
        wide: bool,
    },
    Ident(String),
    Member {
        base: Box<Expr>,
        name: String,
    },
    Index {
        base: Box<Expr>,
        indices: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `REF(x)` — address of an L-value.
    AddrOf(Box<Expr>),
    /// `p^` — dereference.
    Deref(Box<Expr>),
    /// Function call (user function or stdlib function).
    Call {
        name: String,
        args: Vec<CallArg>,
    },
    /// `obj.method(args)`.
    MethodCall {
        base: Box<Expr>,
        method: String,
        args: Vec<CallArg>,
    },
    This,
}

/// An argument in a call: positional, or named via `name := expr`.
#[derive(Debug, Clone)]
pub struct CallArg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    Xor,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "OR",
            BinaryOp::Xor => "XOR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "MOD",
        }
    }
}

impl Expr {
    pub fn new(kind: ExprKind, line: usize, column: usize) -> Expr {
        Expr { kind, line, column }
    }
}

impl Statement {
    pub fn new(kind: StatementKind, line: usize, column: usize) -> Statement {
        Statement { kind, line, column }
    }
}
