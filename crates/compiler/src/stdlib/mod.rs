//! Standard-library catalog: canonical layouts and emission templates.
//!
//! The catalog is a registry keyed by block/function name, built once per
//! process by [`catalog`]. Stateful function blocks declare their in-memory
//! layout authoritatively (ordered members with offset, size, role) plus a
//! template that emits the block's state machine against a caller-provided
//! instance base address. Stateless functions emit pure stack sequences.
//!
//! Templates are polymorphic over the capability set {emit instructions,
//! emit labels, generate labels, lower subexpressions}, passed explicitly as
//! [`TemplateCaps`]. Template contract: stateless functions net exactly one
//! pushed result, stateful blocks net zero (they communicate through their
//! instance memory); all labels come from the generator; no writes outside
//! the declared instance range.

pub mod blocks;
pub mod functions;
pub mod math;
pub mod strings;

use crate::ast::Expr;
use crate::error::{CodegenError, CompileError};
use crate::types::{ElementaryType, Type};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Role of a stdlib block member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Input,
    Output,
    Internal,
}

/// One member of a stdlib block's authoritative layout.
#[derive(Debug, Clone, Copy)]
pub struct BlockMember {
    pub name: &'static str,
    pub ty: ElementaryType,
    pub offset: u32,
    pub role: Role,
}

impl BlockMember {
    pub fn size(&self) -> u32 {
        self.ty.size()
    }
}

/// What the code generator provides to templates. One implementation
/// exists (the generator itself); templates only ever see the capability
/// record below.
pub trait TemplateHost {
    fn emit(&mut self, line: &str);
    fn emit_label(&mut self, label: &str);
    fn fresh_label(&mut self, hint: &str) -> String;
    fn emit_expr(&mut self, e: &Expr) -> Result<Type, CompileError>;
    fn infer_expr(&mut self, e: &Expr) -> Result<Type, CompileError>;
}

/// Capability record handed to every emission template: emit instructions,
/// emit/generate labels, lower subexpressions, plus the scratch string
/// buffers for builder templates (CONCAT, LEFT, INSERT, …).
///
/// The scratch pair belongs to this invocation's nesting level, so a
/// builder evaluated as another builder's argument writes into different
/// buffers. `None` means the nesting budget is exhausted; builders report
/// that as an error, templates that never touch scratch are unaffected.
pub struct TemplateCaps<'a> {
    host: &'a mut dyn TemplateHost,
    pub string_scratch: Option<[u32; 2]>,
}

impl<'a> TemplateCaps<'a> {
    pub fn new(
        host: &'a mut dyn TemplateHost,
        string_scratch: Option<[u32; 2]>,
    ) -> TemplateCaps<'a> {
        TemplateCaps {
            host,
            string_scratch,
        }
    }

    /// Emit one instruction or `;` comment line (indented by the sink).
    pub fn emit(&mut self, line: &str) {
        self.host.emit(line);
    }

    /// Emit a `name:` label definition at column 0.
    pub fn emit_label(&mut self, label: &str) {
        self.host.emit_label(label);
    }

    /// Generate a unique label from a hint.
    pub fn label(&mut self, hint: &str) -> String {
        self.host.fresh_label(hint)
    }

    /// Lower an expression, leaving its value on the stack; returns its type.
    pub fn expr(&mut self, e: &Expr) -> Result<Type, CompileError> {
        self.host.emit_expr(e)
    }

    /// Infer an expression's type without emitting anything.
    pub fn expr_type(&mut self, e: &Expr) -> Result<Type, CompileError> {
        self.host.infer_expr(e)
    }
}

/// A stateful standard function block.
#[derive(Debug)]
pub struct BlockDef {
    pub name: &'static str,
    /// Total instance size in bytes (members plus any internal buffer).
    pub size: u32,
    pub members: &'static [BlockMember],
    /// Emit the state machine for one invocation. Inputs have already been
    /// stored to their member addresses by the caller.
    pub emit: fn(&mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError>,
}

impl BlockDef {
    pub fn member(&self, name: &str) -> Option<&BlockMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// A stateless standard function.
#[derive(Debug)]
pub struct FuncDef {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` for variadic functions.
    pub max_args: Option<usize>,
    /// Emit argument evaluation and the operation; returns the result type.
    pub emit: fn(&mut TemplateCaps, args: &[Expr], line: usize, column: usize) -> Result<Type, CompileError>,
}

/// The registry of standard blocks and functions.
#[derive(Debug)]
pub struct Catalog {
    blocks: HashMap<&'static str, BlockDef>,
    functions: HashMap<&'static str, FuncDef>,
}

impl Catalog {
    pub fn block(&self, name: &str) -> Option<&BlockDef> {
        self.blocks.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&FuncDef> {
        self.functions.get(name)
    }

    pub fn block_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.blocks.keys().copied()
    }
}

/// The process-wide catalog, built on first use. Expressing the registry as
/// a constructed value keeps registration independent of module load order.
pub fn catalog() -> &'static Catalog {
    static CATALOG: OnceLock<Catalog> = OnceLock::new();
    CATALOG.get_or_init(build_catalog)
}

fn build_catalog() -> Catalog {
    let mut blocks = HashMap::new();
    for def in blocks::definitions() {
        blocks.insert(def.name, def);
    }
    let mut functions = HashMap::new();
    for def in functions::definitions()
        .into_iter()
        .chain(math::definitions())
        .chain(strings::definitions())
    {
        functions.insert(def.name, def);
    }
    Catalog { blocks, functions }
}

// ----------------------------------------------------------------------
// Emission utilities shared by templates and the code generator
// ----------------------------------------------------------------------

/// Load mnemonic for a value of the given byte size.
pub fn load_op(size: u32) -> &'static str {
    match size {
        1 => "LOAD8",
        2 => "LOAD16",
        8 => "LOAD64",
        _ => "LOAD32",
    }
}

/// Store mnemonic for a value of the given byte size.
pub fn store_op(size: u32) -> &'static str {
    match size {
        1 => "STORE8",
        2 => "STORE16",
        8 => "STORE64",
        _ => "STORE32",
    }
}

/// Indirect-load mnemonic for a value of the given byte size.
pub fn load_indirect_op(size: u32) -> &'static str {
    match size {
        1 => "LOADIN8",
        2 => "LOADIN16",
        8 => "LOADIN64",
        _ => "LOADIN32",
    }
}

/// Indirect-store mnemonic for a value of the given byte size.
pub fn store_indirect_op(size: u32) -> &'static str {
    match size {
        1 => "STOREIN8",
        2 => "STOREIN16",
        8 => "STOREIN64",
        _ => "STOREIN32",
    }
}

/// The smallest push instruction whose immediate range contains `v`.
pub fn push_int(v: i64) -> String {
    if i8::try_from(v).is_ok() {
        format!("PUSH8 {}", v)
    } else if i16::try_from(v).is_ok() {
        format!("PUSH16 {}", v)
    } else if i32::try_from(v).is_ok() {
        format!("PUSH32 {}", v)
    } else {
        format!("PUSH64 {}", v)
    }
}

/// Push a REAL constant as its 32-bit IEEE-754 bit pattern.
pub fn push_f32(v: f32) -> String {
    format!("PUSH32 0x{:08X}", v.to_bits())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_standard_blocks() {
        let cat = catalog();
        for name in [
            "TON", "TOF", "TP", "CTU", "CTD", "CTUD", "R_TRIG", "F_TRIG", "SR", "RS",
            "HYSTERESIS", "PID", "FIFO", "LIFO",
        ] {
            assert!(cat.block(name).is_some(), "missing block {}", name);
        }
        for name in [
            "ABS", "MIN", "MAX", "LIMIT", "SEL", "MUX", "SQRT", "SIN", "COS", "TAN", "ASIN",
            "ACOS", "ATAN", "ATAN2", "LN", "LOG", "EXP", "SHL", "SHR", "ROL", "ROR", "LEN",
            "CONCAT", "LEFT", "RIGHT", "MID", "INSERT", "DELETE", "REPLACE", "FIND",
        ] {
            assert!(cat.function(name).is_some(), "missing function {}", name);
        }
    }

    #[test]
    fn test_block_layouts_are_well_formed() {
        for def in blocks::definitions() {
            let mut last_end = 0;
            for member in def.members {
                assert!(
                    member.offset >= last_end,
                    "{}.{} overlaps the previous member",
                    def.name,
                    member.name
                );
                assert!(
                    member.offset + member.size() <= def.size,
                    "{}.{} spans past the declared size",
                    def.name,
                    member.name
                );
                last_end = member.offset + member.size();
            }
        }
    }

    #[test]
    fn test_push_width_selection() {
        assert_eq!(push_int(4), "PUSH8 4");
        assert_eq!(push_int(-128), "PUSH8 -128");
        assert_eq!(push_int(300), "PUSH16 300");
        assert_eq!(push_int(70_000), "PUSH32 70000");
        assert_eq!(push_int(1 << 40), format!("PUSH64 {}", 1u64 << 40));
    }

    #[test]
    fn test_push_f32_bit_pattern() {
        assert_eq!(push_f32(0.5), "PUSH32 0x3F000000");
        assert_eq!(push_f32(2.0), "PUSH32 0x40000000");
    }
}
