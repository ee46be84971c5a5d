//! String-literal pool.
//!
//! A single pre-pass walks every declaration initializer and every
//! statement before emission starts, collecting distinct literals
//! (deduplicated by width and content) into an append-only list. Each
//! entry is laid out in work memory as `[len:2][cap:2][bytes:cap+1]`
//! (code units doubled for wide strings) with `cap = len`; the pool is
//! frozen before code generation and never mutated during emission.

use crate::ast::{
    CaseLabel, CompilationUnit, Expr, ExprKind, Statement, StatementKind, VarBlock,
};
use crate::error::SemanticError;
use crate::symbols::SymbolTable;

#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub text: String,
    pub wide: bool,
    pub address: u32,
    /// Length in code units (bytes for narrow, UTF-16 units for wide).
    pub len: u32,
}

#[derive(Debug, Default)]
pub struct StringPool {
    entries: Vec<PoolEntry>,
}

impl StringPool {
    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    pub fn address_of(&self, text: &str, wide: bool) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.wide == wide && entry.text == text)
            .map(|entry| entry.address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collect every distinct string literal of the unit and lay the pool out
/// after all symbols in work memory.
pub fn collect_string_pool(
    unit: &CompilationUnit,
    table: &mut SymbolTable,
) -> Result<StringPool, SemanticError> {
    let mut found: Vec<(String, bool)> = Vec::new();

    for block in &unit.globals {
        walk_block(block, &mut found);
    }
    for f in &unit.functions {
        for block in &f.var_blocks {
            walk_block(block, &mut found);
        }
        walk_statements(&f.body, &mut found);
    }
    for fb in &unit.function_blocks {
        for block in &fb.var_blocks {
            walk_block(block, &mut found);
        }
        for method in &fb.methods {
            for block in &method.var_blocks {
                walk_block(block, &mut found);
            }
            walk_statements(&method.body, &mut found);
        }
        walk_statements(&fb.body, &mut found);
    }
    for def in &unit.type_defs {
        if let crate::ast::TypeDef::Struct(s) = def {
            for member in &s.members {
                if let Some(init) = &member.init {
                    walk_expr(init, &mut found);
                }
            }
        }
    }
    for program in &unit.programs {
        for block in &program.var_blocks {
            walk_block(block, &mut found);
        }
        walk_statements(&program.body, &mut found);
    }

    // Dedup by (width, content), first occurrence wins the pool slot.
    let mut pool = StringPool::default();
    for (text, wide) in found {
        if pool.address_of(&text, wide).is_some() {
            continue;
        }
        let len = if wide {
            text.encode_utf16().count() as u32
        } else {
            text.len() as u32
        };
        let size = if wide { 4 + 2 * (len + 1) } else { 4 + len + 1 };
        let address = table.alloc_work(size, 0, 0)?;
        pool.entries.push(PoolEntry {
            text,
            wide,
            address,
            len,
        });
    }
    Ok(pool)
}

fn walk_block(block: &VarBlock, out: &mut Vec<(String, bool)>) {
    for var in &block.vars {
        if let Some(init) = &var.init {
            walk_expr(init, out);
        }
    }
}

fn walk_statements(statements: &[Statement], out: &mut Vec<(String, bool)>) {
    for statement in statements {
        walk_statement(statement, out);
    }
}

fn walk_statement(s: &Statement, out: &mut Vec<(String, bool)>) {
    match &s.kind {
        StatementKind::Assign { target, value } => {
            walk_expr(target, out);
            walk_expr(value, out);
        }
        StatementKind::If {
            branches,
            else_body,
        } => {
            for (condition, body) in branches {
                walk_expr(condition, out);
                walk_statements(body, out);
            }
            if let Some(body) = else_body {
                walk_statements(body, out);
            }
        }
        StatementKind::While { condition, body } => {
            walk_expr(condition, out);
            walk_statements(body, out);
        }
        StatementKind::For {
            start,
            end,
            step,
            body,
            ..
        } => {
            walk_expr(start, out);
            walk_expr(end, out);
            if let Some(step) = step {
                walk_expr(step, out);
            }
            walk_statements(body, out);
        }
        StatementKind::Repeat { body, until } => {
            walk_statements(body, out);
            walk_expr(until, out);
        }
        StatementKind::Case {
            selector,
            branches,
            else_body,
        } => {
            walk_expr(selector, out);
            for branch in branches {
                for label in &branch.labels {
                    match label {
                        CaseLabel::Value(value) => walk_expr(value, out),
                        CaseLabel::Range(lo, hi) => {
                            walk_expr(lo, out);
                            walk_expr(hi, out);
                        }
                    }
                }
                walk_statements(&branch.body, out);
            }
            if let Some(body) = else_body {
                walk_statements(body, out);
            }
        }
        StatementKind::FbCall { args, .. } => {
            for (_, value) in args {
                walk_expr(value, out);
            }
        }
        StatementKind::MethodCall(call) => walk_expr(call, out),
        StatementKind::Exit | StatementKind::Continue | StatementKind::Return => {}
    }
}

fn walk_expr(e: &Expr, out: &mut Vec<(String, bool)>) {
    match &e.kind {
        ExprKind::StringLit { value, wide } => out.push((value.clone(), *wide)),
        ExprKind::Member { base, .. } => walk_expr(base, out),
        ExprKind::Index { base, indices } => {
            walk_expr(base, out);
            for index in indices {
                walk_expr(index, out);
            }
        }
        ExprKind::Unary { operand, .. } => walk_expr(operand, out),
        ExprKind::Binary { lhs, rhs, .. } => {
            walk_expr(lhs, out);
            walk_expr(rhs, out);
        }
        ExprKind::AddrOf(inner) | ExprKind::Deref(inner) => walk_expr(inner, out),
        ExprKind::Call { args, .. } => {
            for arg in args {
                walk_expr(&arg.value, out);
            }
        }
        ExprKind::MethodCall { base, args, .. } => {
            walk_expr(base, out);
            for arg in args {
                walk_expr(&arg.value, out);
            }
        }
        ExprKind::BoolLit(_)
        | ExprKind::IntLit(_)
        | ExprKind::RealLit(_)
        | ExprKind::TimeLit(_)
        | ExprKind::DateLit(_)
        | ExprKind::TodLit(_)
        | ExprKind::DtLit(_)
        | ExprKind::Ident(_)
        | ExprKind::This => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;
    use crate::parser::parse;

    #[test]
    fn test_pool_dedup_and_layout() {
        let unit = parse(
            "PROGRAM P VAR s : STRING := 'boot'; t : STRING; END_VAR
             s := 'boot';
             t := 'other';
             END_PROGRAM",
        )
        .unwrap();
        let mut table = SymbolTable::build(&unit, &CompilerOptions::default()).unwrap();
        let pool = collect_string_pool(&unit, &mut table).unwrap();
        assert_eq!(pool.len(), 2);
        let boot = pool.address_of("boot", false).unwrap();
        let other = pool.address_of("other", false).unwrap();
        assert_ne!(boot, other);
        // narrow entry occupies [len:2][cap:2][bytes:len+1]
        let entry = &pool.entries()[0];
        assert_eq!(entry.len, 4);
    }

    #[test]
    fn test_wide_and_narrow_are_distinct() {
        let unit = parse(
            "PROGRAM P VAR w : WSTRING; END_VAR w := \"x\"; END_PROGRAM",
        )
        .unwrap();
        let mut table = SymbolTable::build(&unit, &CompilerOptions::default()).unwrap();
        let pool = collect_string_pool(&unit, &mut table).unwrap();
        assert!(pool.address_of("x", true).is_some());
        assert!(pool.address_of("x", false).is_none());
    }
}
