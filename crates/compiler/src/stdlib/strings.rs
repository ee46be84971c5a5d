//! String functions.
//!
//! Builder-style functions (CONCAT, LEFT, RIGHT, MID, INSERT, DELETE,
//! REPLACE) assemble their result in the work-memory scratch buffers the
//! capability record provides and push the result buffer's header address.
//! The scratch pair is per nesting level, so a builder used as another
//! builder's argument writes into its own buffers; past the nesting budget
//! the record carries no pair and the builder fails cleanly.
//! INSERT/DELETE/REPLACE honor the IEC position/length parameters. All of
//! these operate on narrow strings; wide strings only support comparison.

use super::{FuncDef, TemplateCaps};
use crate::ast::Expr;
use crate::error::{CompileError, SemanticError};
use crate::types::Type;

macro_rules! e {
    ($caps:expr, $($arg:tt)*) => {
        $caps.emit(&format!($($arg)*))
    };
}

/// Clamp value for "rest of the string" substring lengths.
const LEN_MAX: i32 = 32767;

pub fn definitions() -> Vec<FuncDef> {
    vec![
        FuncDef { name: "LEN", min_args: 1, max_args: Some(1), emit: emit_len },
        FuncDef { name: "CONCAT", min_args: 2, max_args: None, emit: emit_concat },
        FuncDef { name: "LEFT", min_args: 2, max_args: Some(2), emit: emit_left },
        FuncDef { name: "RIGHT", min_args: 2, max_args: Some(2), emit: emit_right },
        FuncDef { name: "MID", min_args: 3, max_args: Some(3), emit: emit_mid },
        FuncDef { name: "INSERT", min_args: 3, max_args: Some(3), emit: emit_insert },
        FuncDef { name: "DELETE", min_args: 3, max_args: Some(3), emit: emit_delete },
        FuncDef { name: "REPLACE", min_args: 4, max_args: Some(4), emit: emit_replace },
        FuncDef { name: "FIND", min_args: 2, max_args: Some(2), emit: emit_find },
    ]
}

/// This invocation's scratch pair, or a clean error when builder calls
/// nest deeper than the reserved levels.
fn scratch(caps: &TemplateCaps, line: usize, column: usize) -> Result<[u32; 2], CompileError> {
    caps.string_scratch.ok_or_else(|| {
        SemanticError::new(line, column, "string expressions nested too deeply").into()
    })
}

/// Evaluate an argument that must push a string header address.
fn emit_string_arg(caps: &mut TemplateCaps, arg: &Expr) -> Result<(), CompileError> {
    let ty = caps.expr(arg)?;
    if !ty.is_string() {
        return Err(SemanticError::new(
            arg.line,
            arg.column,
            format!("expected a STRING argument, got {}", ty),
        )
        .into());
    }
    Ok(())
}

/// Evaluate an integer argument (position/length), narrowing floats.
fn emit_int_arg(caps: &mut TemplateCaps, arg: &Expr) -> Result<(), CompileError> {
    let ty = caps.expr(arg)?;
    if ty.is_float() {
        e!(caps, "FTOI");
    }
    Ok(())
}

fn emit_len(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    emit_string_arg(caps, &args[0])?;
    e!(caps, "LOADIN16"); // len field is the first header word
    Ok(Type::DINT)
}

fn emit_concat(
    caps: &mut TemplateCaps,
    args: &[Expr],
    line: usize,
    column: usize,
) -> Result<Type, CompileError> {
    let [dst, _] = scratch(caps, line, column)?;
    emit_string_arg(caps, &args[0])?;
    e!(caps, "PUSH32 {}", dst);
    e!(caps, "SCPY");
    for arg in &args[1..] {
        emit_string_arg(caps, arg)?;
        e!(caps, "PUSH32 {}", dst);
        e!(caps, "SAPP");
    }
    e!(caps, "PUSH32 {}", dst);
    Ok(Type::STRING)
}

fn emit_left(
    caps: &mut TemplateCaps,
    args: &[Expr],
    line: usize,
    column: usize,
) -> Result<Type, CompileError> {
    let [dst, _] = scratch(caps, line, column)?;
    emit_string_arg(caps, &args[0])?;
    e!(caps, "PUSH8 1");
    emit_int_arg(caps, &args[1])?;
    e!(caps, "PUSH32 {}", dst);
    e!(caps, "SSUB");
    e!(caps, "PUSH32 {}", dst);
    Ok(Type::STRING)
}

fn emit_right(
    caps: &mut TemplateCaps,
    args: &[Expr],
    line: usize,
    column: usize,
) -> Result<Type, CompileError> {
    let [dst, _] = scratch(caps, line, column)?;
    emit_string_arg(caps, &args[0])?; // [src]
    e!(caps, "DUP");
    e!(caps, "LOADIN16"); // [src, len]
    emit_int_arg(caps, &args[1])?;
    e!(caps, "SUB");
    e!(caps, "PUSH8 1");
    e!(caps, "ADD"); // pos = len - n + 1
    emit_int_arg(caps, &args[1])?;
    e!(caps, "PUSH32 {}", dst);
    e!(caps, "SSUB");
    e!(caps, "PUSH32 {}", dst);
    Ok(Type::STRING)
}

/// `MID(IN, L, P)` — L characters starting at position P.
fn emit_mid(
    caps: &mut TemplateCaps,
    args: &[Expr],
    line: usize,
    column: usize,
) -> Result<Type, CompileError> {
    let [dst, _] = scratch(caps, line, column)?;
    emit_string_arg(caps, &args[0])?;
    emit_int_arg(caps, &args[2])?; // P
    emit_int_arg(caps, &args[1])?; // L
    e!(caps, "PUSH32 {}", dst);
    e!(caps, "SSUB");
    e!(caps, "PUSH32 {}", dst);
    Ok(Type::STRING)
}

/// `INSERT(IN1, IN2, P)` — IN2 inserted after character position P of IN1.
fn emit_insert(
    caps: &mut TemplateCaps,
    args: &[Expr],
    line: usize,
    column: usize,
) -> Result<Type, CompileError> {
    let [dst, tail] = scratch(caps, line, column)?;
    // dst := IN1[1..P]
    emit_string_arg(caps, &args[0])?;
    e!(caps, "PUSH8 1");
    emit_int_arg(caps, &args[2])?;
    e!(caps, "PUSH32 {}", dst);
    e!(caps, "SSUB");
    // dst += IN2
    emit_string_arg(caps, &args[1])?;
    e!(caps, "PUSH32 {}", dst);
    e!(caps, "SAPP");
    // tail := IN1[P+1..], dst += tail
    emit_string_arg(caps, &args[0])?;
    emit_int_arg(caps, &args[2])?;
    e!(caps, "PUSH8 1");
    e!(caps, "ADD");
    e!(caps, "PUSH16 {}", LEN_MAX);
    e!(caps, "PUSH32 {}", tail);
    e!(caps, "SSUB");
    e!(caps, "PUSH32 {}", tail);
    e!(caps, "PUSH32 {}", dst);
    e!(caps, "SAPP");
    e!(caps, "PUSH32 {}", dst);
    Ok(Type::STRING)
}

/// `DELETE(IN, L, P)` — remove L characters starting at position P.
fn emit_delete(
    caps: &mut TemplateCaps,
    args: &[Expr],
    line: usize,
    column: usize,
) -> Result<Type, CompileError> {
    let [dst, tail] = scratch(caps, line, column)?;
    // dst := IN[1..P-1]
    emit_string_arg(caps, &args[0])?;
    e!(caps, "PUSH8 1");
    emit_int_arg(caps, &args[2])?;
    e!(caps, "PUSH8 1");
    e!(caps, "SUB");
    e!(caps, "PUSH32 {}", dst);
    e!(caps, "SSUB");
    // tail := IN[P+L..], dst += tail
    emit_string_arg(caps, &args[0])?;
    emit_int_arg(caps, &args[2])?;
    emit_int_arg(caps, &args[1])?;
    e!(caps, "ADD");
    e!(caps, "PUSH16 {}", LEN_MAX);
    e!(caps, "PUSH32 {}", tail);
    e!(caps, "SSUB");
    e!(caps, "PUSH32 {}", tail);
    e!(caps, "PUSH32 {}", dst);
    e!(caps, "SAPP");
    e!(caps, "PUSH32 {}", dst);
    Ok(Type::STRING)
}

/// `REPLACE(IN1, IN2, L, P)` — L characters at position P replaced by IN2.
fn emit_replace(
    caps: &mut TemplateCaps,
    args: &[Expr],
    line: usize,
    column: usize,
) -> Result<Type, CompileError> {
    let [dst, tail] = scratch(caps, line, column)?;
    // dst := IN1[1..P-1]
    emit_string_arg(caps, &args[0])?;
    e!(caps, "PUSH8 1");
    emit_int_arg(caps, &args[3])?;
    e!(caps, "PUSH8 1");
    e!(caps, "SUB");
    e!(caps, "PUSH32 {}", dst);
    e!(caps, "SSUB");
    // dst += IN2
    emit_string_arg(caps, &args[1])?;
    e!(caps, "PUSH32 {}", dst);
    e!(caps, "SAPP");
    // tail := IN1[P+L..], dst += tail
    emit_string_arg(caps, &args[0])?;
    emit_int_arg(caps, &args[3])?;
    emit_int_arg(caps, &args[2])?;
    e!(caps, "ADD");
    e!(caps, "PUSH16 {}", LEN_MAX);
    e!(caps, "PUSH32 {}", tail);
    e!(caps, "SSUB");
    e!(caps, "PUSH32 {}", tail);
    e!(caps, "PUSH32 {}", dst);
    e!(caps, "SAPP");
    e!(caps, "PUSH32 {}", dst);
    Ok(Type::STRING)
}

fn emit_find(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    emit_string_arg(caps, &args[0])?; // haystack
    emit_string_arg(caps, &args[1])?; // needle
    e!(caps, "SFIND");
    Ok(Type::DINT)
}
