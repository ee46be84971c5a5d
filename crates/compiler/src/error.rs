//! Error types for the compilation pipeline.
//!
//! Every stage reports a single fatal error carrying the originating source
//! line and column (1-based). The pipeline never recovers or emits partial
//! output; `CompileError` is the union the public entry points return.

/// Error from the lexer: unterminated string/comment, disallowed character,
/// malformed typed-literal body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Error from the parser: unexpected token, missing terminator, invalid
/// expression, bad array bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Error from symbol-table construction or statement checking: duplicate
/// symbols, unknown identifiers, inheritance and interface violations,
/// argument mismatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Error from the code generator proper: unknown stdlib block, address of a
/// non-L-value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

macro_rules! positioned_error {
    ($name:ident, $stage:expr) => {
        impl $name {
            pub fn new(line: usize, column: usize, message: impl Into<String>) -> $name {
                $name {
                    line,
                    column,
                    message: message.into(),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(
                    f,
                    "{} error at line {}, column {}: {}",
                    $stage, self.line, self.column, self.message
                )
            }
        }

        impl std::error::Error for $name {}
    };
}

positioned_error!(LexError, "lex");
positioned_error!(ParseError, "parse");
positioned_error!(SemanticError, "semantic");
positioned_error!(CodegenError, "codegen");

/// Union error for the top-level compile entry points.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    Lex(LexError),
    Parse(ParseError),
    Semantic(SemanticError),
    Codegen(CodegenError),
    /// Failure in the second-stage assembler. Reaching this from compiler
    /// output indicates a generator bug, but it is reported, not swallowed.
    Asm(rung_asm::AsmError),
}

impl CompileError {
    /// Source position the error originates from, when it has one.
    pub fn position(&self) -> Option<(usize, usize)> {
        match self {
            CompileError::Lex(e) => Some((e.line, e.column)),
            CompileError::Parse(e) => Some((e.line, e.column)),
            CompileError::Semantic(e) => Some((e.line, e.column)),
            CompileError::Codegen(e) => Some((e.line, e.column)),
            CompileError::Asm(_) => None,
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Lex(e) => e.fmt(f),
            CompileError::Parse(e) => e.fmt(f),
            CompileError::Semantic(e) => e.fmt(f),
            CompileError::Codegen(e) => e.fmt(f),
            CompileError::Asm(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::Lex(e)
    }
}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::Parse(e)
    }
}

impl From<SemanticError> for CompileError {
    fn from(e: SemanticError) -> Self {
        CompileError::Semantic(e)
    }
}

impl From<CodegenError> for CompileError {
    fn from(e: CodegenError) -> Self {
        CompileError::Codegen(e)
    }
}

impl From<rung_asm::AsmError> for CompileError {
    fn from(e: rung_asm::AsmError) -> Self {
        CompileError::Asm(e)
    }
}
