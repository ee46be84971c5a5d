//! Code generation: AST to textual VM assembly.
//!
//! The generator walks the symbol table and the program body and produces
//! the assembly stream the second-stage assembler consumes. Structural
//! skeleton of every emitted unit:
//!
//! 1. header and memory-map comments
//! 2. `JMP _start` — the entry PC is always 0
//! 3. user-function bodies (real `CALL`/`RET` targets)
//! 4. `_start`: one-time init guard, initial-value stores, string-pool
//!    initializer
//! 5. `_cycle`: the program body, terminated by `HALT`
//!
//! Function blocks and methods are not called: FB bodies and methods are
//! inlined at each invocation site with the instance context bound, so
//! unqualified member references resolve against the caller's instance.
//!
//! # Module structure
//!
//! - `expressions.rs`: expression lowering, type inference, the L-value
//!   address path, type-directed opcode selection
//! - `statements.rs`: statement lowering and the loop-context stack
//! - `invoke.rs`: FB invocation, method inlining, function calls
//! - `strings.rs`: string-literal pool collection and emission

mod expressions;
mod invoke;
mod statements;
mod strings;

pub use strings::{collect_string_pool, PoolEntry, StringPool};

use crate::ast::{CompilationUnit, Expr, FunctionDecl, ProgramDecl, Section};
use crate::config::CompilerOptions;
use crate::error::{CompileError, SemanticError};
use crate::stdlib::{self, load_op, store_op, Catalog, TemplateHost};
use crate::symbols::{MethodInfo, Region, Symbol, SymbolTable};
use crate::types::{ElementaryType, Type, STRING_DEFAULT_CAPACITY};

/// Loop labels for `EXIT`/`CONTINUE`.
pub(crate) struct LoopContext {
    pub continue_label: String,
    pub exit_label: String,
}

/// The function-block instance whose members unqualified identifiers
/// resolve against while an FB body or method is being inlined.
#[derive(Clone)]
pub(crate) struct FbInstance {
    pub type_name: String,
    pub base: u32,
}

/// Inline-expansion context of a method.
pub(crate) struct MethodContext {
    pub info: MethodInfo,
    pub end_label: String,
}

pub struct CodeGen<'a> {
    pub(crate) symbols: &'a SymbolTable,
    pub(crate) catalog: &'static Catalog,
    options: &'a CompilerOptions,
    pub(crate) pool: &'a StringPool,
    out: String,
    label_counter: usize,
    pub(crate) loop_stack: Vec<LoopContext>,
    /// Scope key (program or function name) for local-symbol resolution.
    pub(crate) pou: Option<String>,
    /// Set while emitting a function body; `RETURN` jumps to its epilogue.
    pub(crate) current_function: Option<String>,
    pub(crate) method_stack: Vec<MethodContext>,
    pub(crate) current_fb: Option<FbInstance>,
    /// Guards against unbounded inline expansion of recursive methods.
    pub(crate) inline_stack: Vec<(String, String)>,
    /// Nesting depth of stdlib-template invocations; selects which scratch
    /// string-buffer pair a builder template may use.
    pub(crate) string_depth: usize,
    last_annotated_line: usize,
}

impl<'a> CodeGen<'a> {
    pub fn new(
        symbols: &'a SymbolTable,
        options: &'a CompilerOptions,
        pool: &'a StringPool,
    ) -> CodeGen<'a> {
        CodeGen {
            symbols,
            catalog: stdlib::catalog(),
            options,
            pool,
            out: String::new(),
            label_counter: 0,
            loop_stack: Vec::new(),
            pou: None,
            current_function: None,
            method_stack: Vec::new(),
            current_fb: None,
            inline_stack: Vec::new(),
            string_depth: 0,
            last_annotated_line: 0,
        }
    }

    /// Emit the full unit for one program and return the assembly text.
    pub fn emit_unit(
        mut self,
        unit: &CompilationUnit,
        program: &ProgramDecl,
    ) -> Result<String, CompileError> {
        self.emit_header(program);
        self.emit("JMP _start");

        for function in &unit.functions {
            self.emit_function(function)?;
        }

        self.emit_label_line("_start");
        let flag = self.options.init_flag();
        self.emit(&format!("LOAD8 {}", flag));
        self.emit("JNZ _cycle");
        self.emit_init_section(unit)?;
        self.emit("PUSH8 1");
        self.emit(&format!("STORE8 {}", flag));

        self.emit_label_line("_cycle");
        self.pou = Some(program.name.clone());
        for statement in &program.body {
            self.emit_statement(statement)?;
        }
        self.pou = None;
        self.emit("HALT");
        Ok(self.out)
    }

    // ------------------------------------------------------------------
    // Emit sinks
    // ------------------------------------------------------------------

    pub(crate) fn emit(&mut self, line: &str) {
        self.out.push_str("  ");
        self.out.push_str(line);
        self.out.push('\n');
    }

    pub(crate) fn emit_label_line(&mut self, label: &str) {
        self.out.push_str(label);
        self.out.push_str(":\n");
    }

    pub(crate) fn comment(&mut self, text: &str) {
        self.out.push_str("  ; ");
        self.out.push_str(text);
        self.out.push('\n');
    }

    pub(crate) fn next_label(&mut self, hint: &str) -> String {
        self.label_counter += 1;
        format!("_{}_{}", hint, self.label_counter)
    }

    /// `; @source <line>` ahead of a statement, when enabled and the line
    /// differs from the last annotation.
    pub(crate) fn maybe_annotate(&mut self, line: usize) {
        if self.options.emit_source_annotations && line != self.last_annotated_line {
            self.out.push_str(&format!("  ; @source {}\n", line));
            self.last_annotated_line = line;
        }
    }

    // ------------------------------------------------------------------
    // Header
    // ------------------------------------------------------------------

    fn emit_header(&mut self, program: &ProgramDecl) {
        self.comment("Rung VM assembly");
        self.comment(&format!("program: {}", program.name));
        self.comment("memory map:");
        let map: Vec<String> = self
            .symbols
            .symbols_by_address()
            .iter()
            .map(|s| format!("  0x{:04X} {} : {} ({} bytes)", s.address, s.name, s.ty, s.size))
            .collect();
        for line in map {
            self.comment(&line);
        }
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn emit_function(&mut self, decl: &FunctionDecl) -> Result<(), CompileError> {
        let info = self.symbols.functions.get(&decl.name).ok_or_else(|| {
            SemanticError::new(decl.line, decl.column, format!("unknown function '{}'", decl.name))
        })?;
        let label = info.label.clone();
        let inputs = info.inputs.clone();

        self.comment(&format!("FUNCTION {}", decl.name));
        self.emit_label_line(&label);
        self.pou = Some(decl.name.clone());
        self.current_function = Some(decl.name.clone());

        // The caller pushed arguments left-to-right; pop them in reverse
        // into their storage.
        for input in inputs.iter().rev() {
            let symbol = self
                .symbols
                .lookup(Some(&decl.name), input)
                .cloned()
                .ok_or_else(|| {
                    SemanticError::new(decl.line, decl.column, format!("unknown input '{}'", input))
                })?;
            self.emit_store_direct(symbol.address, &symbol.ty);
        }

        // Locals with explicit initializers are reset on every call.
        for block in &decl.var_blocks {
            if !matches!(block.section, Section::Var | Section::VarTemp) {
                continue;
            }
            for var in &block.vars {
                if let Some(init) = &var.init {
                    let symbol = self
                        .symbols
                        .lookup(Some(&decl.name), &var.name)
                        .cloned()
                        .ok_or_else(|| {
                            SemanticError::new(
                                var.line,
                                var.column,
                                format!("unknown local '{}'", var.name),
                            )
                        })?;
                    if symbol.is_constant() {
                        continue;
                    }
                    self.emit_assign_value_to(init, symbol.address, &symbol.ty)?;
                }
            }
        }

        for statement in &decl.body {
            self.emit_statement(statement)?;
        }

        // Return path: push the return pseudo-variable, then RET.
        self.emit_label_line(&format!("_ret_{}", decl.name));
        let ret = self
            .symbols
            .lookup(Some(&decl.name), &decl.name)
            .cloned()
            .ok_or_else(|| {
                SemanticError::new(decl.line, decl.column, "missing return variable".to_string())
            })?;
        self.emit_load_direct(ret.address, &ret.ty, None);
        self.emit("RET");

        self.current_function = None;
        self.pou = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Init section
    // ------------------------------------------------------------------

    /// Initial-value stores for every variable with an initial expression,
    /// string-header setup, and the string-literal pool initializer.
    fn emit_init_section(&mut self, _unit: &CompilationUnit) -> Result<(), CompileError> {
        self.comment("one-time initialization");

        let symbols: Vec<Symbol> = self
            .symbols
            .symbols_by_address()
            .into_iter()
            .cloned()
            .collect();
        for symbol in &symbols {
            // The process images are refreshed by the VM and retentive
            // variables keep their values across restarts.
            if symbol.io.is_some() || symbol.region == Region::Retain {
                continue;
            }
            self.emit_var_init(symbol.address, &symbol.ty, symbol.init.as_ref())?;
        }

        // Scratch string buffers used by the string templates, one pair
        // per nesting level.
        let scratch_levels = self.symbols.string_scratch.clone();
        for pair in scratch_levels {
            for addr in pair {
                self.emit_string_header(addr, false);
            }
        }

        self.emit_pool_init();
        Ok(())
    }

    /// Recursive default/explicit initialization of one variable at an
    /// absolute address.
    fn emit_var_init(
        &mut self,
        addr: u32,
        ty: &Type,
        init: Option<&Expr>,
    ) -> Result<(), CompileError> {
        match ty {
            Type::Elementary(e) if e.is_string() => {
                self.emit_string_header(addr, *e == ElementaryType::WStr);
                if let Some(init) = init {
                    self.emit_expr(init)?; // pushes the literal's pool address
                    self.emit(&format!("PUSH32 {}", addr));
                    self.emit("SCPY");
                }
            }
            Type::Elementary(_) | Type::Pointer(_) => {
                if let Some(init) = init {
                    self.emit_assign_value_to(init, addr, ty)?;
                }
            }
            Type::Array { element, dims } => {
                // No array initializer syntax; elements still need their
                // defaults (string headers, struct member initials).
                if self.type_needs_default_init(element) {
                    let elem_size = self.symbols.type_size(element, 0, 0)?;
                    let count: i64 = dims.iter().map(|(lo, hi)| hi - lo + 1).product();
                    for i in 0..count as u32 {
                        self.emit_var_init(addr + i * elem_size, element, None)?;
                    }
                }
            }
            Type::Named(name) => {
                if let Some(def) = self.symbols.structs.get(name) {
                    for (_, member) in def.members.clone() {
                        self.emit_var_init(addr + member.offset, &member.ty, member.init.as_ref())?;
                    }
                } else if let Some(def) = self.symbols.fbs.get(name) {
                    for (_, member) in def.members.clone() {
                        self.emit_var_init(addr + member.offset, &member.ty, member.init.as_ref())?;
                    }
                } else if let Some(e) = self.symbols.enums.get(name) {
                    let base = Type::Elementary(match e.base {
                        b if b.is_integer() => b,
                        _ => ElementaryType::DInt,
                    });
                    if let Some(init) = init {
                        self.emit_assign_value_to(init, addr, &base)?;
                    }
                }
                // stdlib blocks boot zeroed; their state machines do the rest
            }
        }
        Ok(())
    }

    fn type_needs_default_init(&self, ty: &Type) -> bool {
        match ty {
            Type::Elementary(e) => e.is_string(),
            Type::Named(name) => {
                if let Some(def) = self.symbols.structs.get(name) {
                    def.members
                        .iter()
                        .any(|(_, m)| m.init.is_some() || self.type_needs_default_init(&m.ty))
                } else if let Some(def) = self.symbols.fbs.get(name) {
                    def.members
                        .iter()
                        .any(|(_, m)| m.init.is_some() || self.type_needs_default_init(&m.ty))
                } else {
                    false
                }
            }
            Type::Array { element, .. } => self.type_needs_default_init(element),
            Type::Pointer(_) => false,
        }
    }

    /// `[len:2][cap:2]` header writes for a string variable.
    pub(crate) fn emit_string_header(&mut self, addr: u32, wide: bool) {
        let _ = wide; // capacity is in code units either way
        self.emit("PUSH8 0");
        self.emit(&format!("STORE16 {}", addr));
        self.emit(&format!("PUSH16 {}", STRING_DEFAULT_CAPACITY));
        self.emit(&format!("STORE16 {}", addr + 2));
    }

    /// Pre-computed initializer for every pool entry: header, content
    /// bytes, null terminator.
    fn emit_pool_init(&mut self) {
        let entries: Vec<PoolEntry> = self.pool.entries().to_vec();
        for entry in &entries {
            self.comment(&format!("pool {:?}", entry.text));
            let a = entry.address;
            self.emit(&format!("PUSH16 {}", entry.len));
            self.emit(&format!("STORE16 {}", a));
            self.emit(&format!("PUSH16 {}", entry.len));
            self.emit(&format!("STORE16 {}", a + 2));
            if entry.wide {
                for (i, unit) in entry.text.encode_utf16().enumerate() {
                    self.emit(&format!("PUSH16 {}", unit));
                    self.emit(&format!("STORE16 {}", a + 4 + 2 * i as u32));
                }
                self.emit("PUSH8 0");
                self.emit(&format!("STORE16 {}", a + 4 + 2 * entry.len));
            } else {
                for (i, byte) in entry.text.bytes().enumerate() {
                    self.emit(&format!("PUSH8 {}", byte));
                    self.emit(&format!("STORE8 {}", a + 4 + i as u32));
                }
                self.emit("PUSH8 0");
                self.emit(&format!("STORE8 {}", a + 4 + entry.len));
            }
        }
    }

    // ------------------------------------------------------------------
    // Width-directed direct load/store
    // ------------------------------------------------------------------

    /// Push the value of a symbol-sized location. Strings push the header
    /// address; LREAL is narrowed to the VM's f32 stack domain.
    pub(crate) fn emit_load_direct(&mut self, addr: u32, ty: &Type, bit: Option<u8>) {
        if let Some(bit) = bit {
            self.emit(&format!("LOAD8 {}", addr));
            self.emit(&format!("PUSH8 {}", 1u8 << bit));
            self.emit("AND");
            self.emit("PUSH8 0");
            self.emit("NE");
            return;
        }
        if ty.is_string() {
            self.emit(&format!("PUSH32 {}", addr));
            return;
        }
        let size = self.storage_size(ty);
        self.emit(&format!("{} {}", load_op(size), addr));
        if matches!(ty, Type::Elementary(ElementaryType::LReal)) {
            self.emit("F64TO32");
        }
    }

    /// Store the value on top of the stack to an absolute address.
    /// String stores copy via `SCPY` (the stack holds a source header
    /// address).
    pub(crate) fn emit_store_direct(&mut self, addr: u32, ty: &Type) {
        if ty.is_string() {
            self.emit(&format!("PUSH32 {}", addr));
            self.emit("SCPY");
            return;
        }
        if matches!(ty, Type::Elementary(ElementaryType::LReal)) {
            self.emit("F32TO64");
            self.emit(&format!("STORE64 {}", addr));
            return;
        }
        let size = self.storage_size(ty);
        self.emit(&format!("{} {}", store_op(size), addr));
    }

    /// Evaluate `value`, convert it to `ty`, and store it at `addr`.
    pub(crate) fn emit_assign_value_to(
        &mut self,
        value: &Expr,
        addr: u32,
        ty: &Type,
    ) -> Result<(), CompileError> {
        let value_ty = self.emit_expr(value)?;
        self.check_assignable(ty, &value_ty, value.line, value.column)?;
        self.emit_numeric_conversion(&value_ty, ty);
        self.emit_store_direct(addr, ty);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn emit(source: &str) -> String {
        let unit = parse(source).unwrap();
        let options = CompilerOptions::default();
        let mut table = SymbolTable::build(&unit, &options).unwrap();
        let pool = collect_string_pool(&unit, &mut table).unwrap();
        let generator = CodeGen::new(&table, &options, &pool);
        generator.emit_unit(&unit, &unit.programs[0]).unwrap()
    }

    #[test]
    fn test_unit_skeleton() {
        let asm = emit("PROGRAM P VAR a : INT := 3; END_VAR a := a + 1; END_PROGRAM");
        // bootstrap jump, guard, cycle, halt — in that order
        let jmp = asm.find("JMP _start").unwrap();
        let start = asm.find("_start:").unwrap();
        let guard = asm.find("JNZ _cycle").unwrap();
        let cycle = asm.find("_cycle:").unwrap();
        let halt = asm.rfind("HALT").unwrap();
        assert!(jmp < start && start < guard && guard < cycle && cycle < halt);
        // the memory map lists the variable
        assert!(asm.contains("0x2000 a : INT (2 bytes)"));
    }

    #[test]
    fn test_init_guard_set_once() {
        let asm = emit("PROGRAM P VAR a : INT := 3; END_VAR a := a; END_PROGRAM");
        // guard is read before init and written after it
        let read = asm.find("LOAD8 16383").unwrap();
        let write = asm.find("STORE8 16383").unwrap();
        let init_store = asm.find("STORE16 8192").unwrap();
        assert!(read < init_store && init_store < write);
    }

    #[test]
    fn test_source_annotations() {
        let source = "PROGRAM P VAR a : INT; END_VAR\na := 1;\na := 2;\nEND_PROGRAM";
        let unit = parse(source).unwrap();
        let options = CompilerOptions::default().with_source_annotations();
        let mut table = SymbolTable::build(&unit, &options).unwrap();
        let pool = collect_string_pool(&unit, &mut table).unwrap();
        let generator = CodeGen::new(&table, &options, &pool);
        let asm = generator.emit_unit(&unit, &unit.programs[0]).unwrap();
        assert!(asm.contains("; @source 2"));
        assert!(asm.contains("; @source 3"));
    }
}

impl TemplateHost for CodeGen<'_> {
    fn emit(&mut self, line: &str) {
        CodeGen::emit(self, line);
    }

    fn emit_label(&mut self, label: &str) {
        self.emit_label_line(label);
    }

    fn fresh_label(&mut self, hint: &str) -> String {
        self.next_label(hint)
    }

    fn emit_expr(&mut self, e: &Expr) -> Result<Type, CompileError> {
        CodeGen::emit_expr(self, e)
    }

    fn infer_expr(&mut self, e: &Expr) -> Result<Type, CompileError> {
        self.infer_type(e)
    }
}
