//! Numerical-approximation functions.
//!
//! Each template emits a fixed instruction sequence with IEEE-754 bit
//! pattern constants baked in: Horner-form polynomials for the
//! transcendentals and a fixed-iteration Newton-Raphson for SQRT. All of
//! them work in the VM's single-precision float domain; integer arguments
//! are converted with `ITOF` first.

use super::{push_f32, FuncDef, TemplateCaps};
use crate::ast::Expr;
use crate::error::CompileError;
use crate::types::Type;

macro_rules! e {
    ($caps:expr, $($arg:tt)*) => {
        $caps.emit(&format!($($arg)*))
    };
}

/// Newton-Raphson iterations for SQRT, starting from IN/2.
const SQRT_ITERATIONS: usize = 8;

pub fn definitions() -> Vec<FuncDef> {
    vec![
        FuncDef { name: "SQRT", min_args: 1, max_args: Some(1), emit: emit_sqrt },
        FuncDef { name: "SIN", min_args: 1, max_args: Some(1), emit: emit_sin },
        FuncDef { name: "COS", min_args: 1, max_args: Some(1), emit: emit_cos },
        FuncDef { name: "TAN", min_args: 1, max_args: Some(1), emit: emit_tan },
        FuncDef { name: "ASIN", min_args: 1, max_args: Some(1), emit: emit_asin },
        FuncDef { name: "ACOS", min_args: 1, max_args: Some(1), emit: emit_acos },
        FuncDef { name: "ATAN", min_args: 1, max_args: Some(1), emit: emit_atan },
        FuncDef { name: "ATAN2", min_args: 2, max_args: Some(2), emit: emit_atan2 },
        FuncDef { name: "LN", min_args: 1, max_args: Some(1), emit: emit_ln },
        FuncDef { name: "LOG", min_args: 1, max_args: Some(1), emit: emit_log },
        FuncDef { name: "EXP", min_args: 1, max_args: Some(1), emit: emit_exp },
    ]
}

/// Evaluate the argument and make sure a float is on top of the stack.
fn emit_float_arg(caps: &mut TemplateCaps, arg: &Expr) -> Result<(), CompileError> {
    let ty = caps.expr(arg)?;
    if !ty.is_float() {
        e!(caps, "ITOF");
    }
    Ok(())
}

/// Horner chain over the value below the accumulator. Entry stack `[t]`,
/// exit `[t, p(t)]`; `coeffs` are ordered highest degree first.
fn emit_horner(caps: &mut TemplateCaps, coeffs: &[f32]) {
    e!(caps, "{}", push_f32(coeffs[0]));
    for &c in &coeffs[1..] {
        e!(caps, "OVER");
        e!(caps, "MULF");
        e!(caps, "{}", push_f32(c));
        e!(caps, "ADDF");
    }
}

/// Odd series: entry `[x]`, exit `[x * p(x²)]`.
fn emit_odd_poly(caps: &mut TemplateCaps, coeffs: &[f32]) {
    e!(caps, "DUP");
    e!(caps, "DUP");
    e!(caps, "MULF"); // [x, x²]
    emit_horner(caps, coeffs); // [x, x², p]
    e!(caps, "SWAP");
    e!(caps, "DROP"); // [x, p]
    e!(caps, "MULF");
}

/// Even series: entry `[x]`, exit `[p(x²)]`.
fn emit_even_poly(caps: &mut TemplateCaps, coeffs: &[f32]) {
    e!(caps, "DUP");
    e!(caps, "MULF"); // [x²]
    emit_horner(caps, coeffs); // [x², p]
    e!(caps, "SWAP");
    e!(caps, "DROP");
}

// sin x ≈ x(1 - x²/6 + x⁴/120 - x⁶/5040)
const SIN_COEFFS: [f32; 4] = [-1.0 / 5040.0, 1.0 / 120.0, -1.0 / 6.0, 1.0];
// cos x ≈ 1 - x²/2 + x⁴/24 - x⁶/720
const COS_COEFFS: [f32; 4] = [-1.0 / 720.0, 1.0 / 24.0, -1.0 / 2.0, 1.0];
// asin x ≈ x(1 + x²/6 + 3x⁴/40 + 15x⁶/336)
const ASIN_COEFFS: [f32; 4] = [15.0 / 336.0, 3.0 / 40.0, 1.0 / 6.0, 1.0];
// ln x = 2 artanh z with z = (x-1)/(x+1); p(z²) = 2 + 2z²/3 + 2z⁴/5 + 2z⁶/7
const LN_COEFFS: [f32; 4] = [2.0 / 7.0, 2.0 / 5.0, 2.0 / 3.0, 2.0];
// exp x ≈ Σ xⁿ/n!, n = 0..7
const EXP_COEFFS: [f32; 8] = [
    1.0 / 5040.0,
    1.0 / 720.0,
    1.0 / 120.0,
    1.0 / 24.0,
    1.0 / 6.0,
    1.0 / 2.0,
    1.0,
    1.0,
];

const PI: f32 = std::f32::consts::PI;
const FRAC_PI_2: f32 = std::f32::consts::FRAC_PI_2;
const LOG10_E: f32 = std::f32::consts::LOG10_E;

fn emit_sqrt(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    emit_float_arg(caps, &args[0])?;
    // guess := IN/2, then g' = (g + IN/g)/2, a fixed number of rounds
    e!(caps, "DUP");
    e!(caps, "{}", push_f32(0.5));
    e!(caps, "MULF"); // [x, g]
    for _ in 0..SQRT_ITERATIONS {
        e!(caps, "OVER");
        e!(caps, "OVER");
        e!(caps, "DIVF"); // [x, g, x/g]
        e!(caps, "ADDF"); // [x, g + x/g]
        e!(caps, "{}", push_f32(0.5));
        e!(caps, "MULF"); // [x, g']
    }
    e!(caps, "SWAP");
    e!(caps, "DROP");
    Ok(Type::REAL)
}

fn emit_sin(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    emit_float_arg(caps, &args[0])?;
    emit_odd_poly(caps, &SIN_COEFFS);
    Ok(Type::REAL)
}

fn emit_cos(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    emit_float_arg(caps, &args[0])?;
    emit_even_poly(caps, &COS_COEFFS);
    Ok(Type::REAL)
}

fn emit_tan(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    emit_float_arg(caps, &args[0])?;
    e!(caps, "DUP"); // [x, x]
    emit_odd_poly(caps, &SIN_COEFFS); // [x, sin]
    e!(caps, "SWAP"); // [sin, x]
    emit_even_poly(caps, &COS_COEFFS); // [sin, cos]
    e!(caps, "DIVF");
    Ok(Type::REAL)
}

fn emit_asin(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    emit_float_arg(caps, &args[0])?;
    emit_odd_poly(caps, &ASIN_COEFFS);
    Ok(Type::REAL)
}

fn emit_acos(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    emit_float_arg(caps, &args[0])?;
    emit_odd_poly(caps, &ASIN_COEFFS); // [asin]
    e!(caps, "{}", push_f32(FRAC_PI_2));
    e!(caps, "SWAP");
    e!(caps, "SUBF"); // pi/2 - asin
    Ok(Type::REAL)
}

/// atan x ≈ x / (1 + 0.28 x²) — within ~0.005 rad on |x| <= 1.
fn emit_atan_body(caps: &mut TemplateCaps) {
    e!(caps, "DUP");
    e!(caps, "DUP");
    e!(caps, "MULF"); // [x, x²]
    e!(caps, "{}", push_f32(0.28));
    e!(caps, "MULF");
    e!(caps, "{}", push_f32(1.0));
    e!(caps, "ADDF"); // [x, 1 + 0.28x²]
    e!(caps, "DIVF");
}

fn emit_atan(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    emit_float_arg(caps, &args[0])?;
    emit_atan_body(caps);
    Ok(Type::REAL)
}

/// `ATAN2(Y, X)` with the correction applied in all four quadrants:
/// X < 0 adds π when Y >= 0 and subtracts π when Y < 0.
fn emit_atan2(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    let l_xpos = caps.label("atan2_xpos");
    let l_yneg = caps.label("atan2_yneg");
    let l_end = caps.label("atan2_end");
    emit_float_arg(caps, &args[0])?; // Y
    emit_float_arg(caps, &args[1])?; // X — stack [y, x]
    e!(caps, "OVER");
    e!(caps, "OVER");
    e!(caps, "DIVF"); // [y, x, y/x]
    emit_atan_body(caps); // [y, x, a]
    e!(caps, "SWAP"); // [y, a, x]
    e!(caps, "PUSH32 0");
    e!(caps, "LTF"); // [y, a, x<0]
    e!(caps, "JZ {}", l_xpos);
    // X < 0: shift by ±π depending on the sign of Y
    e!(caps, "SWAP"); // [a, y]
    e!(caps, "PUSH32 0");
    e!(caps, "GEF");
    e!(caps, "JZ {}", l_yneg);
    e!(caps, "{}", push_f32(PI));
    e!(caps, "ADDF");
    e!(caps, "JMP {}", l_end);
    caps.emit_label(&l_yneg);
    e!(caps, "{}", push_f32(PI));
    e!(caps, "SUBF");
    e!(caps, "JMP {}", l_end);
    caps.emit_label(&l_xpos);
    // X >= 0: result is the raw arctangent; drop Y
    e!(caps, "SWAP");
    e!(caps, "DROP");
    caps.emit_label(&l_end);
    Ok(Type::REAL)
}

fn emit_ln(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    emit_float_arg(caps, &args[0])?;
    emit_ln_body(caps);
    Ok(Type::REAL)
}

/// ln x = 2 artanh((x-1)/(x+1)); entry `[x]`, exit `[ln x]`.
fn emit_ln_body(caps: &mut TemplateCaps) {
    e!(caps, "DUP");
    e!(caps, "{}", push_f32(1.0));
    e!(caps, "SUBF"); // [x, x-1]
    e!(caps, "SWAP");
    e!(caps, "{}", push_f32(1.0));
    e!(caps, "ADDF"); // [x-1, x+1]
    e!(caps, "DIVF"); // [z]
    emit_odd_poly(caps, &LN_COEFFS);
}

fn emit_log(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    emit_float_arg(caps, &args[0])?;
    emit_ln_body(caps);
    e!(caps, "{}", push_f32(LOG10_E));
    e!(caps, "MULF");
    Ok(Type::REAL)
}

fn emit_exp(
    caps: &mut TemplateCaps,
    args: &[Expr],
    _line: usize,
    _column: usize,
) -> Result<Type, CompileError> {
    emit_float_arg(caps, &args[0])?;
    emit_horner(caps, &EXP_COEFFS); // [x, p(x)]
    e!(caps, "SWAP");
    e!(caps, "DROP");
    Ok(Type::REAL)
}
