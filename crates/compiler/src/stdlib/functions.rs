//! Stateless selection and bitwise functions.
//!
//! Every template evaluates its arguments through the expression-emitter
//! capability and leaves exactly one result on the stack. Numeric functions
//! pick the float opcode family when any argument is REAL/LREAL and insert
//! `ITOF` on integer operands.

use super::{FuncDef, TemplateCaps};
use crate::ast::Expr;
use crate::error::CompileError;
use crate::types::Type;

macro_rules! e {
    ($caps:expr, $($arg:tt)*) => {
        $caps.emit(&format!($($arg)*))
    };
}

pub fn definitions() -> Vec<FuncDef> {
    vec![
        FuncDef { name: "ABS", min_args: 1, max_args: Some(1), emit: emit_abs },
        FuncDef { name: "MIN", min_args: 2, max_args: Some(2), emit: emit_min },
        FuncDef { name: "MAX", min_args: 2, max_args: Some(2), emit: emit_max },
        FuncDef { name: "LIMIT", min_args: 3, max_args: Some(3), emit: emit_limit },
        FuncDef { name: "SEL", min_args: 3, max_args: Some(3), emit: emit_sel },
        FuncDef { name: "MUX", min_args: 3, max_args: None, emit: emit_mux },
        FuncDef { name: "SHL", min_args: 2, max_args: Some(2), emit: emit_shl },
        FuncDef { name: "SHR", min_args: 2, max_args: Some(2), emit: emit_shr },
        FuncDef { name: "ROL", min_args: 2, max_args: Some(2), emit: emit_rol },
        FuncDef { name: "ROR", min_args: 2, max_args: Some(2), emit: emit_ror },
    ]
}

/// Do any of the arguments have float type?
pub(super) fn any_float(caps: &mut TemplateCaps, args: &[Expr]) -> Result<bool, CompileError> {
    for arg in args {
        if caps.expr_type(arg)?.is_float() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Evaluate an argument, converting to float when the caller works in
/// float mode.
pub(super) fn emit_numeric_arg(
    caps: &mut TemplateCaps,
    arg: &Expr,
    float: bool,
) -> Result<Type, CompileError> {
    let ty = caps.expr(arg)?;
    if float && !ty.is_float() {
        e!(caps, "ITOF");
    }
    Ok(ty)
}

/// With `[a, b]` on the stack, keep the smaller.
pub(super) fn emit_min2(caps: &mut TemplateCaps, float: bool) {
    let l_b = caps.label("min_b");
    let l_end = caps.label("min_end");
    e!(caps, "OVER");
    e!(caps, "OVER");
    e!(caps, "{}", if float { "LEF" } else { "LE" });
    e!(caps, "JZ {}", l_b);
    e!(caps, "DROP");
    e!(caps, "JMP {}", l_end);
    caps.emit_label(&l_b);
    e!(caps, "SWAP");
    e!(caps, "DROP");
    caps.emit_label(&l_end);
}

/// With `[a, b]` on the stack, keep the larger.
pub(super) fn emit_max2(caps: &mut TemplateCaps, float: bool) {
    let l_b = caps.label("max_b");
    let l_end = caps.label("max_end");
    e!(caps, "OVER");
    e!(caps, "OVER");
    e!(caps, "{}", if float { "GEF" } else { "GE" });
    e!(caps, "JZ {}", l_b);
    e!(caps, "DROP");
    e!(caps, "JMP {}", l_end);
    caps.emit_label(&l_b);
    e!(caps, "SWAP");
    e!(caps, "DROP");
    caps.emit_label(&l_end);
}

fn result_type(float: bool, first: &Type) -> Type {
    if float { Type::REAL } else { first.clone() }
}

fn emit_abs(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    let ty = caps.expr(&args[0])?;
    let l_pos = caps.label("abs_pos");
    e!(caps, "DUP");
    if ty.is_float() {
        e!(caps, "PUSH32 0");
        e!(caps, "LTF");
        e!(caps, "JZ {}", l_pos);
        e!(caps, "NEGF");
    } else {
        e!(caps, "PUSH8 0");
        e!(caps, "LT");
        e!(caps, "JZ {}", l_pos);
        e!(caps, "NEG");
    }
    caps.emit_label(&l_pos);
    Ok(ty)
}

fn emit_min(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    let float = any_float(caps, args)?;
    let first = emit_numeric_arg(caps, &args[0], float)?;
    emit_numeric_arg(caps, &args[1], float)?;
    emit_min2(caps, float);
    Ok(result_type(float, &first))
}

fn emit_max(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    let float = any_float(caps, args)?;
    let first = emit_numeric_arg(caps, &args[0], float)?;
    emit_numeric_arg(caps, &args[1], float)?;
    emit_max2(caps, float);
    Ok(result_type(float, &first))
}

/// `LIMIT(MN, IN, MX)` = MIN(MAX(IN, MN), MX).
fn emit_limit(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    let float = any_float(caps, args)?;
    let in_ty = emit_numeric_arg(caps, &args[1], float)?;
    emit_numeric_arg(caps, &args[0], float)?;
    emit_max2(caps, float);
    emit_numeric_arg(caps, &args[2], float)?;
    emit_min2(caps, float);
    Ok(result_type(float, &in_ty))
}

/// `SEL(G, IN0, IN1)` — IN1 when G is TRUE.
fn emit_sel(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    let l_one = caps.label("sel_1");
    let l_end = caps.label("sel_end");
    caps.expr(&args[0])?;
    e!(caps, "JNZ {}", l_one);
    let ty = caps.expr(&args[1])?;
    e!(caps, "JMP {}", l_end);
    caps.emit_label(&l_one);
    caps.expr(&args[2])?;
    caps.emit_label(&l_end);
    Ok(ty)
}

/// `MUX(K, IN0, …, INn)` — input selected by K, last input when K is out
/// of range.
fn emit_mux(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    let inputs = &args[1..];
    let l_end = caps.label("mux_end");
    let branch_labels: Vec<String> = (0..inputs.len() - 1)
        .map(|_| caps.label("mux_in"))
        .collect();

    caps.expr(&args[0])?;
    for (i, label) in branch_labels.iter().enumerate() {
        e!(caps, "DUP");
        e!(caps, "{}", super::push_int(i as i64));
        e!(caps, "EQ");
        e!(caps, "JNZ {}", label);
    }
    // default: the last input
    e!(caps, "DROP");
    let ty = caps.expr(inputs.last().unwrap_or(&args[1]))?;
    e!(caps, "JMP {}", l_end);
    for (i, label) in branch_labels.iter().enumerate() {
        caps.emit_label(label);
        e!(caps, "DROP");
        caps.expr(&inputs[i])?;
        if i + 1 < branch_labels.len() {
            e!(caps, "JMP {}", l_end);
        }
    }
    caps.emit_label(&l_end);
    Ok(ty)
}

fn emit_shl(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    caps.expr(&args[0])?;
    caps.expr(&args[1])?;
    e!(caps, "SHL");
    Ok(Type::DINT)
}

fn emit_shr(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    caps.expr(&args[0])?;
    caps.expr(&args[1])?;
    e!(caps, "SHR");
    Ok(Type::DINT)
}

/// Low 32 bits of a stack slot. Loads sign-extend, so the rotated operand
/// must be masked before any right shift feeds the low bits, and the
/// result is masked back to the 32-bit domain.
const DWORD_MASK: i64 = 0xFFFF_FFFF;

/// `(IN << N) | ((IN AND 16#FFFFFFFF) >> (32-N))`, masked to 32 bits —
/// the argument expressions are evaluated twice; ST expressions are
/// side-effect free.
fn emit_rol(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    caps.expr(&args[0])?;
    caps.expr(&args[1])?;
    e!(caps, "SHL");
    caps.expr(&args[0])?;
    e!(caps, "{}", super::push_int(DWORD_MASK));
    e!(caps, "AND");
    e!(caps, "PUSH8 32");
    caps.expr(&args[1])?;
    e!(caps, "SUB");
    e!(caps, "SHR");
    e!(caps, "OR");
    e!(caps, "{}", super::push_int(DWORD_MASK));
    e!(caps, "AND");
    Ok(Type::DINT)
}

fn emit_ror(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    caps.expr(&args[0])?;
    e!(caps, "{}", super::push_int(DWORD_MASK));
    e!(caps, "AND");
    caps.expr(&args[1])?;
    e!(caps, "SHR");
    caps.expr(&args[0])?;
    e!(caps, "PUSH8 32");
    caps.expr(&args[1])?;
    e!(caps, "SUB");
    e!(caps, "SHL");
    e!(caps, "OR");
    e!(caps, "{}", super::push_int(DWORD_MASK));
    e!(caps, "AND");
    Ok(Type::DINT)
}
