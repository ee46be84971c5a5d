//! Symbol table and memory layout.
//!
//! A single pass over the unit, in a fixed order: type definitions, then
//! interfaces, then function blocks (in `extends`-topological order), then
//! globals, functions and programs. Every variable gets one absolute byte
//! address in one of four regions (input image, output image, work, retain).
//! Composite member offsets are fixed when the definition is registered and
//! never move; inherited members always occupy the prefix of a derived
//! instance.

use crate::ast::*;
use crate::config::CompilerOptions;
use crate::error::SemanticError;
use crate::stdlib::{self, Catalog};
use crate::types::{align_up, alignment_of, ElementaryType, Type};
use rung_isa::{INPUT_BASE, OUTPUT_BASE, RETAIN_BASE, WORK_REGION_SIZE};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Input,
    Output,
    Work,
    Retain,
}

/// Resolved `AT %I…` / `AT %Q…` binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoBinding {
    pub is_input: bool,
    pub byte: u32,
    /// Bit index for bit-addressed bindings (`%QX0.3`).
    pub bit: Option<u8>,
}

/// A laid-out variable.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
    pub address: u32,
    pub size: u32,
    pub region: Region,
    pub section: Section,
    pub io: Option<IoBinding>,
    /// Set for enum tags and `CONSTANT` symbols; such symbols occupy no
    /// memory and are inlined as immediates.
    pub constant_value: Option<i64>,
    pub init: Option<Expr>,
}

impl Symbol {
    pub fn is_constant(&self) -> bool {
        self.constant_value.is_some()
    }
}

/// A member of a user composite.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub offset: u32,
    pub size: u32,
    pub ty: Type,
    /// Declaration section the member came from; controls which members an
    /// FB invocation may bind (`VAR_INPUT`/`VAR_IN_OUT`).
    pub section: Section,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub size: u32,
    pub members: Vec<(String, MemberInfo)>,
}

impl StructDef {
    pub fn member(&self, name: &str) -> Option<&MemberInfo> {
        self.members.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: String,
    pub base: ElementaryType,
    pub values: Vec<(String, i64)>,
}

#[derive(Debug, Clone)]
pub struct InterfaceDef {
    pub name: String,
    pub extends: Vec<String>,
    pub methods: Vec<MethodSignature>,
}

/// A method's layout: inputs/outputs/locals live as process-wide work
/// memory under mangled names (`__M_<fb>_<method>_<var>`), re-initialized
/// on each entry. `fb` is the defining block, so a method inherited into a
/// derived block keeps sharing its storage.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub fb: String,
    pub return_type: Option<Type>,
    pub access: Access,
    pub is_abstract: bool,
    pub is_final: bool,
    pub is_override: bool,
    pub inputs: Vec<ParamInfo>,
    pub outputs: Vec<ParamInfo>,
    pub locals: Vec<ParamInfo>,
    pub body: Vec<Statement>,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    pub ty: Type,
    pub mangled: String,
    pub init: Option<Expr>,
}

/// A user function block definition: flat member map (inherited prefix
/// first) and flat method map for O(1) lookup during inlining.
#[derive(Debug, Clone)]
pub struct FbDef {
    pub name: String,
    pub size: u32,
    pub extends: Option<String>,
    pub implements: Vec<String>,
    pub members: Vec<(String, MemberInfo)>,
    pub methods: HashMap<String, MethodInfo>,
    pub body: Vec<Statement>,
    pub has_abstract: bool,
}

impl FbDef {
    pub fn member(&self, name: &str) -> Option<&MemberInfo> {
        self.members.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }
}

/// A user function: real `CALL`/`RET` target. The return value lives in a
/// pseudo-variable named after the function itself.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: String,
    pub return_type: Type,
    /// Input names in declaration order (symbols live in the function's
    /// scope map).
    pub inputs: Vec<String>,
    pub label: String,
}

#[derive(Debug)]
pub struct SymbolTable {
    pub work_base: u32,
    /// First address past usable work memory; the top byte is reserved for
    /// the init guard.
    pub work_limit: u32,
    next_work: u32,
    next_retain: u32,
    pub structs: HashMap<String, StructDef>,
    pub enums: HashMap<String, EnumDef>,
    pub interfaces: HashMap<String, InterfaceDef>,
    pub fbs: HashMap<String, FbDef>,
    pub functions: HashMap<String, FunctionInfo>,
    pub globals: HashMap<String, Symbol>,
    /// Per-POU local scopes, keyed by function/program name.
    pub scopes: HashMap<String, HashMap<String, Symbol>>,
    /// Scratch string-buffer pairs for string-builder stdlib templates,
    /// one pair per nesting level so nested builders never alias.
    pub string_scratch: Vec<[u32; 2]>,
    catalog: &'static Catalog,
}

/// How deep string-builder calls may nest inside one expression; each
/// level costs two scratch string buffers of work memory.
pub const STRING_SCRATCH_DEPTH: usize = 4;

impl SymbolTable {
    /// Build the full table for a unit.
    pub fn build(unit: &CompilationUnit, options: &CompilerOptions) -> Result<SymbolTable, SemanticError> {
        let work_base = options.work_memory_base;
        let mut table = SymbolTable {
            work_base,
            work_limit: work_base + WORK_REGION_SIZE - 1,
            next_work: work_base,
            next_retain: RETAIN_BASE,
            structs: HashMap::new(),
            enums: HashMap::new(),
            interfaces: HashMap::new(),
            fbs: HashMap::new(),
            functions: HashMap::new(),
            globals: HashMap::new(),
            scopes: HashMap::new(),
            string_scratch: Vec::new(),
            catalog: stdlib::catalog(),
        };

        table.register_type_defs(&unit.type_defs)?;
        table.register_interfaces(&unit.interfaces)?;
        table.register_function_blocks(&unit.function_blocks)?;
        table.register_globals(&unit.globals)?;
        table.register_functions(&unit.functions)?;
        table.register_programs(&unit.programs)?;

        // Scratch buffers for string templates, after all user symbols:
        // one pair per nesting level.
        for _ in 0..STRING_SCRATCH_DEPTH {
            let dst = table.alloc_work(ElementaryType::Str.size(), 0, 0)?;
            let tail = table.alloc_work(ElementaryType::Str.size(), 0, 0)?;
            table.string_scratch.push([dst, tail]);
        }
        Ok(table)
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    pub(crate) fn alloc_work(&mut self, size: u32, line: usize, column: usize) -> Result<u32, SemanticError> {
        let addr = align_up(self.next_work, alignment_of(size));
        if addr + size > self.work_limit {
            return Err(SemanticError::new(
                line,
                column,
                format!(
                    "work memory exhausted: need {} bytes at 0x{:04X}, region ends at 0x{:04X}",
                    size, addr, self.work_limit
                ),
            ));
        }
        self.next_work = addr + size;
        Ok(addr)
    }

    fn alloc_retain(&mut self, size: u32) -> u32 {
        let addr = align_up(self.next_retain, alignment_of(size));
        self.next_retain = addr + size;
        addr
    }

    /// Size in bytes of a declared type.
    pub fn type_size(&self, ty: &Type, line: usize, column: usize) -> Result<u32, SemanticError> {
        match ty {
            Type::Elementary(e) => Ok(e.size()),
            Type::Pointer(_) => Ok(4),
            Type::Array { element, dims } => {
                let elem = self.type_size(element, line, column)?;
                let count: i64 = dims.iter().map(|(lo, hi)| hi - lo + 1).product();
                Ok(elem * count as u32)
            }
            Type::Named(name) => {
                if let Some(s) = self.structs.get(name) {
                    Ok(s.size)
                } else if let Some(fb) = self.fbs.get(name) {
                    Ok(fb.size)
                } else if let Some(e) = self.enums.get(name) {
                    Ok(e.base.size())
                } else if let Some(block) = self.catalog.block(name) {
                    Ok(block.size)
                } else if self.interfaces.contains_key(name) {
                    Err(SemanticError::new(
                        line,
                        column,
                        format!("cannot declare a variable of interface type '{}'", name),
                    ))
                } else {
                    Err(SemanticError::new(
                        line,
                        column,
                        format!("unknown type '{}'", name),
                    ))
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Pass 1: type definitions
    // ------------------------------------------------------------------

    fn register_type_defs(&mut self, defs: &[TypeDef]) -> Result<(), SemanticError> {
        for def in defs {
            match def {
                TypeDef::Struct(s) => self.register_struct(s)?,
                TypeDef::Enum(e) => self.register_enum(e)?,
            }
        }
        Ok(())
    }

    fn check_type_name_free(&self, name: &str, line: usize, column: usize) -> Result<(), SemanticError> {
        let taken = self.structs.contains_key(name)
            || self.enums.contains_key(name)
            || self.fbs.contains_key(name)
            || self.interfaces.contains_key(name)
            || self.catalog.block(name).is_some();
        if taken {
            Err(SemanticError::new(
                line,
                column,
                format!("duplicate type name '{}'", name),
            ))
        } else {
            Ok(())
        }
    }

    fn register_struct(&mut self, decl: &StructDecl) -> Result<(), SemanticError> {
        self.check_type_name_free(&decl.name, decl.line, decl.column)?;
        let mut members: Vec<(String, MemberInfo)> = Vec::new();
        let mut size = 0u32;
        for var in &decl.members {
            if members.iter().any(|(n, _)| n == &var.name) {
                return Err(SemanticError::new(
                    var.line,
                    var.column,
                    format!("duplicate member '{}' in struct '{}'", var.name, decl.name),
                ));
            }
            let member_size = self.type_size(&var.ty, var.line, var.column)?;
            let offset = align_up(size, alignment_of(member_size));
            members.push((
                var.name.clone(),
                MemberInfo {
                    offset,
                    size: member_size,
                    ty: var.ty.clone(),
                    section: Section::Var,
                    init: var.init.clone(),
                },
            ));
            size = offset + member_size;
        }
        self.structs.insert(
            decl.name.clone(),
            StructDef {
                name: decl.name.clone(),
                size: align_up(size, 4).max(1),
                members,
            },
        );
        Ok(())
    }

    fn register_enum(&mut self, decl: &EnumDecl) -> Result<(), SemanticError> {
        self.check_type_name_free(&decl.name, decl.line, decl.column)?;
        let base = decl
            .ty_base()
            .ok_or_else(|| {
                SemanticError::new(
                    decl.line,
                    decl.column,
                    format!("enum '{}' must have an integer base type", decl.name),
                )
            })?;
        let mut next = 0i64;
        let mut values = Vec::new();
        for (name, explicit) in &decl.values {
            let value = explicit.unwrap_or(next);
            next = value + 1;
            values.push((name.clone(), value));
            // Each tag becomes a global constant symbol so enum values are
            // usable as primary expressions.
            self.insert_global(Symbol {
                name: name.clone(),
                ty: Type::Named(decl.name.clone()),
                address: 0,
                size: 0,
                region: Region::Work,
                section: Section::VarGlobal,
                io: None,
                constant_value: Some(value),
                init: None,
            }, decl.line, decl.column)?;
        }
        self.enums.insert(
            decl.name.clone(),
            EnumDef {
                name: decl.name.clone(),
                base,
                values,
            },
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pass 2: interfaces
    // ------------------------------------------------------------------

    fn register_interfaces(&mut self, decls: &[InterfaceDecl]) -> Result<(), SemanticError> {
        for decl in decls {
            self.check_type_name_free(&decl.name, decl.line, decl.column)?;
            for base in &decl.extends {
                if !self.interfaces.contains_key(base) {
                    return Err(SemanticError::new(
                        decl.line,
                        decl.column,
                        format!(
                            "interface '{}' extends unknown interface '{}'",
                            decl.name, base
                        ),
                    ));
                }
            }
            self.interfaces.insert(
                decl.name.clone(),
                InterfaceDef {
                    name: decl.name.clone(),
                    extends: decl.extends.clone(),
                    methods: decl.methods.clone(),
                },
            );
        }
        Ok(())
    }

    /// All method signatures an interface requires, including inherited ones.
    fn interface_all_methods(
        &self,
        name: &str,
        line: usize,
        column: usize,
    ) -> Result<Vec<MethodSignature>, SemanticError> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let def = self.interfaces.get(&current).ok_or_else(|| {
                SemanticError::new(line, column, format!("unknown interface '{}'", current))
            })?;
            out.extend(def.methods.iter().cloned());
            stack.extend(def.extends.iter().cloned());
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Pass 3: function blocks
    // ------------------------------------------------------------------

    fn register_function_blocks(
        &mut self,
        decls: &[FunctionBlockDecl],
    ) -> Result<(), SemanticError> {
        let by_name: HashMap<&str, &FunctionBlockDecl> =
            decls.iter().map(|d| (d.name.as_str(), d)).collect();

        // Topological order over `extends`, cycle and missing-base fatal.
        let mut order: Vec<&FunctionBlockDecl> = Vec::new();
        let mut state: HashMap<&str, u8> = HashMap::new(); // 1 = visiting, 2 = done
        for decl in decls {
            self.visit_fb(decl, &by_name, &mut state, &mut order)?;
        }
        for decl in order {
            self.register_fb(decl)?;
        }
        Ok(())
    }

    fn visit_fb<'d>(
        &self,
        decl: &'d FunctionBlockDecl,
        by_name: &HashMap<&str, &'d FunctionBlockDecl>,
        state: &mut HashMap<&'d str, u8>,
        order: &mut Vec<&'d FunctionBlockDecl>,
    ) -> Result<(), SemanticError> {
        match state.get(decl.name.as_str()) {
            Some(2) => return Ok(()),
            Some(_) => {
                return Err(SemanticError::new(
                    decl.line,
                    decl.column,
                    format!("cyclic inheritance involving function block '{}'", decl.name),
                ));
            }
            None => {}
        }
        state.insert(&decl.name, 1);
        if let Some(base) = &decl.extends {
            let base_decl = by_name.get(base.as_str()).ok_or_else(|| {
                SemanticError::new(
                    decl.line,
                    decl.column,
                    format!("function block '{}' extends unknown base '{}'", decl.name, base),
                )
            })?;
            self.visit_fb(base_decl, by_name, state, order)?;
        }
        state.insert(&decl.name, 2);
        order.push(decl);
        Ok(())
    }

    fn register_fb(&mut self, decl: &FunctionBlockDecl) -> Result<(), SemanticError> {
        self.check_type_name_free(&decl.name, decl.line, decl.column)?;

        // Inherited members occupy the prefix; inherited methods are copied
        // flat so lookup never walks the chain.
        let (mut members, mut size, mut methods) = match &decl.extends {
            Some(base) => {
                let base_def = &self.fbs[base];
                (base_def.members.clone(), base_def.size, base_def.methods.clone())
            }
            None => (Vec::new(), 0u32, HashMap::new()),
        };

        for block in &decl.var_blocks {
            match block.section {
                Section::Var | Section::VarInput | Section::VarOutput | Section::VarInOut => {}
                other => {
                    return Err(SemanticError::new(
                        decl.line,
                        decl.column,
                        format!(
                            "{} is not allowed inside function block '{}'",
                            other.keyword(),
                            decl.name
                        ),
                    ));
                }
            }
            for var in &block.vars {
                if members.iter().any(|(n, _)| n == &var.name) {
                    return Err(SemanticError::new(
                        var.line,
                        var.column,
                        format!("duplicate member '{}' in function block '{}'", var.name, decl.name),
                    ));
                }
                let member_size = self.type_size(&var.ty, var.line, var.column)?;
                let offset = align_up(size, alignment_of(member_size));
                members.push((
                    var.name.clone(),
                    MemberInfo {
                        offset,
                        size: member_size,
                        ty: var.ty.clone(),
                        section: block.section,
                        init: var.init.clone(),
                    },
                ));
                size = offset + member_size;
            }
        }

        for m in &decl.methods {
            let base_method = methods.get(&m.name).cloned();
            match &base_method {
                Some(base) => {
                    if !m.is_override {
                        return Err(SemanticError::new(
                            m.line,
                            m.column,
                            format!(
                                "method '{}' hides '{}.{}'; mark it OVERRIDE",
                                m.name, base.fb, m.name
                            ),
                        ));
                    }
                    if base.is_final {
                        return Err(SemanticError::new(
                            m.line,
                            m.column,
                            format!("cannot override FINAL method '{}.{}'", base.fb, m.name),
                        ));
                    }
                }
                None => {
                    if m.is_override {
                        return Err(SemanticError::new(
                            m.line,
                            m.column,
                            format!("OVERRIDE method '{}' has no base method to override", m.name),
                        ));
                    }
                }
            }

            let info = self.register_method(decl, m)?;
            if let Some(base) = &base_method {
                self.check_override_signature(base, &info)?;
            }
            methods.insert(m.name.clone(), info);
        }

        let has_abstract = methods.values().any(|m| m.is_abstract);

        // Interface conformance: every required signature must exist with
        // matching return type, inputs, and outputs.
        for iface in &decl.implements {
            for required in self.interface_all_methods(iface, decl.line, decl.column)? {
                let found = methods.get(&required.name).ok_or_else(|| {
                    SemanticError::new(
                        decl.line,
                        decl.column,
                        format!(
                            "function block '{}' does not implement method '{}' of interface '{}'",
                            decl.name, required.name, iface
                        ),
                    )
                })?;
                self.check_interface_signature(decl, iface, &required, found)?;
            }
        }

        self.fbs.insert(
            decl.name.clone(),
            FbDef {
                name: decl.name.clone(),
                size: align_up(size, 4).max(4),
                extends: decl.extends.clone(),
                implements: decl.implements.clone(),
                members,
                methods,
                body: decl.body.clone(),
                has_abstract,
            },
        );
        Ok(())
    }

    /// Mangle and lay out one method's variables, producing its info record.
    fn register_method(
        &mut self,
        fb: &FunctionBlockDecl,
        m: &MethodDecl,
    ) -> Result<MethodInfo, SemanticError> {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut locals = Vec::new();
        for block in &m.var_blocks {
            let sink = match block.section {
                Section::VarInput => &mut inputs,
                Section::VarOutput => &mut outputs,
                Section::Var | Section::VarTemp => &mut locals,
                other => {
                    return Err(SemanticError::new(
                        m.line,
                        m.column,
                        format!("{} is not allowed inside method '{}'", other.keyword(), m.name),
                    ));
                }
            };
            for var in &block.vars {
                let mangled = format!("__M_{}_{}_{}", fb.name, m.name, var.name);
                let size = self.type_size(&var.ty, var.line, var.column)?;
                let address = self.alloc_work(size, var.line, var.column)?;
                self.insert_global(
                    Symbol {
                        name: mangled.clone(),
                        ty: var.ty.clone(),
                        address,
                        size,
                        region: Region::Work,
                        section: block.section,
                        io: None,
                        constant_value: None,
                        init: var.init.clone(),
                    },
                    var.line,
                    var.column,
                )?;
                sink.push(ParamInfo {
                    name: var.name.clone(),
                    ty: var.ty.clone(),
                    mangled,
                    init: var.init.clone(),
                });
            }
        }
        Ok(MethodInfo {
            name: m.name.clone(),
            fb: fb.name.clone(),
            return_type: m.return_type.clone(),
            access: m.access,
            is_abstract: m.is_abstract,
            is_final: m.is_final,
            is_override: m.is_override,
            inputs,
            outputs,
            locals,
            body: m.body.clone(),
            line: m.line,
            column: m.column,
        })
    }

    fn check_override_signature(
        &self,
        base: &MethodInfo,
        derived: &MethodInfo,
    ) -> Result<(), SemanticError> {
        let params_match = |a: &[ParamInfo], b: &[ParamInfo]| {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|(x, y)| x.name == y.name && x.ty == y.ty)
        };
        if base.return_type != derived.return_type
            || !params_match(&base.inputs, &derived.inputs)
            || !params_match(&base.outputs, &derived.outputs)
        {
            return Err(SemanticError::new(
                derived.line,
                derived.column,
                format!(
                    "override of '{}.{}' does not match the base signature",
                    base.fb, base.name
                ),
            ));
        }
        Ok(())
    }

    fn check_interface_signature(
        &self,
        fb: &FunctionBlockDecl,
        iface: &str,
        required: &MethodSignature,
        found: &MethodInfo,
    ) -> Result<(), SemanticError> {
        let params_match = |sig: &[(String, Type)], actual: &[ParamInfo]| {
            sig.len() == actual.len()
                && sig
                    .iter()
                    .zip(actual)
                    .all(|((n, t), p)| *n == p.name && *t == p.ty)
        };
        if required.return_type != found.return_type
            || !params_match(&required.inputs, &found.inputs)
            || !params_match(&required.outputs, &found.outputs)
        {
            return Err(SemanticError::new(
                fb.line,
                fb.column,
                format!(
                    "method '{}' of '{}' does not match the signature required by interface '{}'",
                    required.name, fb.name, iface
                ),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pass 4: globals
    // ------------------------------------------------------------------

    fn register_globals(&mut self, blocks: &[VarBlock]) -> Result<(), SemanticError> {
        for block in blocks {
            for var in &block.vars {
                let symbol = self.layout_var(var, block)?;
                self.insert_global(symbol, var.line, var.column)?;
            }
        }
        Ok(())
    }

    /// Lay out one variable according to its block: constant, I/O-bound,
    /// retentive, or plain work memory.
    fn layout_var(&mut self, var: &VarDecl, block: &VarBlock) -> Result<Symbol, SemanticError> {
        if block.constant {
            let init = var.init.as_ref().ok_or_else(|| {
                SemanticError::new(
                    var.line,
                    var.column,
                    format!("CONSTANT '{}' needs an initial value", var.name),
                )
            })?;
            let value = self.const_eval(None, init).ok_or_else(|| {
                SemanticError::new(
                    var.line,
                    var.column,
                    format!("CONSTANT '{}' must have a constant initial value", var.name),
                )
            })?;
            return Ok(Symbol {
                name: var.name.clone(),
                ty: var.ty.clone(),
                address: 0,
                size: 0,
                region: Region::Work,
                section: block.section,
                io: None,
                constant_value: Some(value),
                init: var.init.clone(),
            });
        }

        self.check_instantiable(&var.ty, var.line, var.column)?;
        let size = self.type_size(&var.ty, var.line, var.column)?;

        if let Some(raw) = &var.io_at {
            let binding = parse_io_address(raw, var.line, var.column)?;
            let (region, base) = if binding.is_input {
                (Region::Input, INPUT_BASE)
            } else {
                (Region::Output, OUTPUT_BASE)
            };
            return Ok(Symbol {
                name: var.name.clone(),
                ty: var.ty.clone(),
                address: base + binding.byte,
                size,
                region,
                section: block.section,
                io: Some(binding),
                constant_value: None,
                init: var.init.clone(),
            });
        }

        let (region, address) = if block.retain {
            (Region::Retain, self.alloc_retain(size))
        } else {
            (Region::Work, self.alloc_work(size, var.line, var.column)?)
        };
        Ok(Symbol {
            name: var.name.clone(),
            ty: var.ty.clone(),
            address,
            size,
            region,
            section: block.section,
            io: None,
            constant_value: None,
            init: var.init.clone(),
        })
    }

    fn check_instantiable(&self, ty: &Type, line: usize, column: usize) -> Result<(), SemanticError> {
        if let Type::Named(name) = ty
            && let Some(fb) = self.fbs.get(name)
            && fb.has_abstract
        {
            return Err(SemanticError::new(
                line,
                column,
                format!("cannot instantiate '{}': it has abstract methods", name),
            ));
        }
        Ok(())
    }

    fn insert_global(&mut self, symbol: Symbol, line: usize, column: usize) -> Result<(), SemanticError> {
        let name = symbol.name.clone();
        if self.globals.insert(name.clone(), symbol).is_some() {
            return Err(SemanticError::new(
                line,
                column,
                format!("duplicate symbol '{}'", name),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pass 5: functions
    // ------------------------------------------------------------------

    fn register_functions(&mut self, decls: &[FunctionDecl]) -> Result<(), SemanticError> {
        for decl in decls {
            if self.functions.contains_key(&decl.name)
                || self.catalog.function(&decl.name).is_some()
            {
                return Err(SemanticError::new(
                    decl.line,
                    decl.column,
                    format!("duplicate function name '{}'", decl.name),
                ));
            }
            let mut scope: HashMap<String, Symbol> = HashMap::new();
            let mut inputs = Vec::new();
            for block in &decl.var_blocks {
                match block.section {
                    Section::VarInput | Section::Var | Section::VarTemp => {}
                    other => {
                        return Err(SemanticError::new(
                            decl.line,
                            decl.column,
                            format!(
                                "{} is not allowed inside function '{}'",
                                other.keyword(),
                                decl.name
                            ),
                        ));
                    }
                }
                for var in &block.vars {
                    let symbol = self.layout_var(var, block)?;
                    if block.section == Section::VarInput {
                        inputs.push(var.name.clone());
                    }
                    self.insert_scoped(&mut scope, symbol, var.line, var.column)?;
                }
            }
            // Pseudo-variable holding the return value.
            let ret_size = self.type_size(&decl.return_type, decl.line, decl.column)?;
            let ret_addr = self.alloc_work(ret_size, decl.line, decl.column)?;
            self.insert_scoped(
                &mut scope,
                Symbol {
                    name: decl.name.clone(),
                    ty: decl.return_type.clone(),
                    address: ret_addr,
                    size: ret_size,
                    region: Region::Work,
                    section: Section::VarOutput,
                    io: None,
                    constant_value: None,
                    init: None,
                },
                decl.line,
                decl.column,
            )?;
            self.functions.insert(
                decl.name.clone(),
                FunctionInfo {
                    name: decl.name.clone(),
                    return_type: decl.return_type.clone(),
                    inputs,
                    label: format!("_fn_{}", decl.name),
                },
            );
            self.scopes.insert(decl.name.clone(), scope);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pass 6: programs
    // ------------------------------------------------------------------

    fn register_programs(&mut self, decls: &[ProgramDecl]) -> Result<(), SemanticError> {
        for decl in decls {
            if self.scopes.contains_key(&decl.name) {
                return Err(SemanticError::new(
                    decl.line,
                    decl.column,
                    format!("duplicate program name '{}'", decl.name),
                ));
            }
            let mut scope: HashMap<String, Symbol> = HashMap::new();
            for block in &decl.var_blocks {
                match block.section {
                    Section::Var | Section::VarTemp => {}
                    other => {
                        return Err(SemanticError::new(
                            decl.line,
                            decl.column,
                            format!(
                                "{} is not allowed inside program '{}'",
                                other.keyword(),
                                decl.name
                            ),
                        ));
                    }
                }
                for var in &block.vars {
                    let symbol = self.layout_var(var, block)?;
                    self.insert_scoped(&mut scope, symbol, var.line, var.column)?;
                }
            }
            self.scopes.insert(decl.name.clone(), scope);
        }
        Ok(())
    }

    fn insert_scoped(
        &self,
        scope: &mut HashMap<String, Symbol>,
        symbol: Symbol,
        line: usize,
        column: usize,
    ) -> Result<(), SemanticError> {
        let name = symbol.name.clone();
        if scope.insert(name.clone(), symbol).is_some() {
            return Err(SemanticError::new(
                line,
                column,
                format!("duplicate symbol '{}'", name),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup helpers for the code generator
    // ------------------------------------------------------------------

    /// Resolve an identifier: POU scope first, then globals.
    pub fn lookup(&self, pou: Option<&str>, name: &str) -> Option<&Symbol> {
        if let Some(pou) = pou
            && let Some(symbol) = self.scopes.get(pou).and_then(|s| s.get(name))
        {
            return Some(symbol);
        }
        self.globals.get(name)
    }

    /// `{offset, size, type}` of a member inside a named composite,
    /// searching user structs, then user FBs, then stdlib blocks.
    pub fn member_info(&self, type_name: &str, member: &str) -> Option<MemberInfo> {
        if let Some(s) = self.structs.get(type_name) {
            return s.member(member).cloned();
        }
        if let Some(fb) = self.fbs.get(type_name) {
            return fb.member(member).cloned();
        }
        if let Some(block) = self.catalog.block(type_name) {
            return block.member(member).map(|m| MemberInfo {
                offset: m.offset,
                size: m.size(),
                ty: Type::Elementary(m.ty),
                section: match m.role {
                    stdlib::Role::Input => Section::VarInput,
                    stdlib::Role::Output => Section::VarOutput,
                    stdlib::Role::Internal => Section::Var,
                },
                init: None,
            });
        }
        None
    }

    /// Constant-fold an expression to an integer, resolving enum tags and
    /// CONSTANT symbols. Returns `None` when not statically constant.
    pub fn const_eval(&self, pou: Option<&str>, e: &Expr) -> Option<i64> {
        match &e.kind {
            ExprKind::IntLit(v) => Some(*v),
            ExprKind::BoolLit(b) => Some(*b as i64),
            ExprKind::TimeLit(v)
            | ExprKind::DateLit(v)
            | ExprKind::TodLit(v)
            | ExprKind::DtLit(v) => Some(*v),
            ExprKind::Ident(name) => self.lookup(pou, name).and_then(|s| s.constant_value),
            ExprKind::Unary { op, operand } => {
                let v = self.const_eval(pou, operand)?;
                match op {
                    UnaryOp::Neg => Some(-v),
                    UnaryOp::Not => Some(if v == 0 { 1 } else { 0 }),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let a = self.const_eval(pou, lhs)?;
                let b = self.const_eval(pou, rhs)?;
                match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    BinaryOp::Mul => a.checked_mul(b),
                    BinaryOp::Div => a.checked_div(b),
                    BinaryOp::Mod => a.checked_rem(b),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Non-constant symbols of the unit sorted by address, for the memory
    /// map comment.
    pub fn symbols_by_address(&self) -> Vec<&Symbol> {
        let mut all: Vec<&Symbol> = self
            .globals
            .values()
            .chain(self.scopes.values().flat_map(|s| s.values()))
            .filter(|s| !s.is_constant())
            .collect();
        all.sort_by_key(|s| (s.address, s.name.clone()));
        all
    }
}

impl EnumDecl {
    fn ty_base(&self) -> Option<ElementaryType> {
        match &self.base {
            Type::Elementary(e) if e.is_integer() => Some(*e),
            _ => None,
        }
    }
}

/// Parse `%IX0.3` / `%Q1` / `%IW4` into a binding. The size letter is
/// accepted but only the byte offset matters for addressing; the bit
/// component is preserved for bit-level read-modify-write.
pub fn parse_io_address(raw: &str, line: usize, column: usize) -> Result<IoBinding, SemanticError> {
    let err = || SemanticError::new(line, column, format!("malformed I/O address '{}'", raw));
    let body = raw.strip_prefix('%').ok_or_else(err)?;
    let mut chars = body.chars().peekable();
    let is_input = match chars.next() {
        Some('I') => true,
        Some('Q') => false,
        _ => return Err(err()),
    };
    // Optional size letter (X, B, W, D)
    if matches!(chars.peek(), Some('X') | Some('B') | Some('W') | Some('D')) {
        chars.next();
    }
    let digits: String = chars.clone().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(err());
    }
    for _ in 0..digits.len() {
        chars.next();
    }
    let byte: u32 = digits.parse().map_err(|_| err())?;
    let bit = match chars.next() {
        None => None,
        Some('.') => {
            let rest: String = chars.collect();
            let b: u8 = rest.parse().map_err(|_| err())?;
            if b > 7 {
                return Err(err());
            }
            Some(b)
        }
        Some(_) => return Err(err()),
    };
    Ok(IoBinding {
        is_input,
        byte,
        bit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn build(source: &str) -> SymbolTable {
        let unit = parse(source).unwrap();
        SymbolTable::build(&unit, &CompilerOptions::default()).unwrap()
    }

    fn build_err(source: &str) -> SemanticError {
        let unit = parse(source).unwrap();
        SymbolTable::build(&unit, &CompilerOptions::default()).unwrap_err()
    }

    #[test]
    fn test_global_layout_is_aligned_and_disjoint() {
        let table = build("VAR_GLOBAL flag : BOOL; count : INT; total : DINT; wide : LREAL; END_VAR");
        let flag = table.lookup(None, "flag").unwrap();
        let count = table.lookup(None, "count").unwrap();
        let total = table.lookup(None, "total").unwrap();
        let wide = table.lookup(None, "wide").unwrap();
        assert_eq!(flag.address, 0x2000);
        assert_eq!(count.address, 0x2002); // aligned to 2
        assert_eq!(total.address, 0x2004);
        assert_eq!(wide.address, 0x2008);
        // pairwise disjoint
        let mut ranges = [
            (flag.address, flag.size),
            (count.address, count.size),
            (total.address, total.size),
            (wide.address, wide.size),
        ];
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0);
        }
    }

    #[test]
    fn test_struct_offsets() {
        let table = build(
            "TYPE Mix : STRUCT a : BOOL; b : DINT; c : INT; d : BOOL; END_STRUCT; END_TYPE",
        );
        let def = &table.structs["Mix"];
        assert_eq!(def.member("a").unwrap().offset, 0);
        assert_eq!(def.member("b").unwrap().offset, 4);
        assert_eq!(def.member("c").unwrap().offset, 8);
        assert_eq!(def.member("d").unwrap().offset, 10);
        assert_eq!(def.size, 12);
    }

    #[test]
    fn test_enum_tags_are_constants() {
        let table = build("TYPE Color : (Red, Green := 5, Blue); END_TYPE");
        assert_eq!(table.lookup(None, "Red").unwrap().constant_value, Some(0));
        assert_eq!(table.lookup(None, "Green").unwrap().constant_value, Some(5));
        assert_eq!(table.lookup(None, "Blue").unwrap().constant_value, Some(6));
    }

    #[test]
    fn test_fb_inheritance_prefix() {
        let table = build(
            "FUNCTION_BLOCK Base VAR_INPUT x : DINT; END_VAR END_FUNCTION_BLOCK
             FUNCTION_BLOCK Derived EXTENDS Base VAR y : INT; END_VAR END_FUNCTION_BLOCK",
        );
        let base = &table.fbs["Base"];
        let derived = &table.fbs["Derived"];
        assert_eq!(base.member("x").unwrap().offset, 0);
        assert_eq!(derived.member("x").unwrap().offset, 0);
        assert_eq!(derived.member("y").unwrap().offset, base.size);
    }

    #[test]
    fn test_missing_base_and_cycle() {
        let err = build_err("FUNCTION_BLOCK D EXTENDS Nope END_FUNCTION_BLOCK");
        assert!(err.message.contains("unknown base"));
        let err = build_err(
            "FUNCTION_BLOCK A EXTENDS B END_FUNCTION_BLOCK
             FUNCTION_BLOCK B EXTENDS A END_FUNCTION_BLOCK",
        );
        assert!(err.message.contains("cyclic inheritance"));
    }

    #[test]
    fn test_override_rules() {
        // silent hide
        let err = build_err(
            "FUNCTION_BLOCK B METHOD F : BOOL END_METHOD END_FUNCTION_BLOCK
             FUNCTION_BLOCK D EXTENDS B METHOD F : BOOL END_METHOD END_FUNCTION_BLOCK",
        );
        assert!(err.message.contains("mark it OVERRIDE"));
        // FINAL target
        let err = build_err(
            "FUNCTION_BLOCK B METHOD PUBLIC FINAL F : BOOL END_METHOD END_FUNCTION_BLOCK
             FUNCTION_BLOCK D EXTENDS B METHOD PUBLIC OVERRIDE F : BOOL END_METHOD END_FUNCTION_BLOCK",
        );
        assert!(err.message.contains("FINAL"));
        // override without target
        let err = build_err(
            "FUNCTION_BLOCK D METHOD OVERRIDE F : BOOL END_METHOD END_FUNCTION_BLOCK",
        );
        assert!(err.message.contains("no base method"));
    }

    #[test]
    fn test_interface_conformance() {
        let err = build_err(
            "INTERFACE IMotor METHOD Start : BOOL END_METHOD END_INTERFACE
             FUNCTION_BLOCK M IMPLEMENTS IMotor END_FUNCTION_BLOCK",
        );
        assert!(err.message.contains("does not implement method 'Start'"));

        let err = build_err(
            "INTERFACE IMotor METHOD Start : BOOL VAR_INPUT speed : INT; END_VAR END_METHOD END_INTERFACE
             FUNCTION_BLOCK M IMPLEMENTS IMotor
             METHOD Start : BOOL END_METHOD
             END_FUNCTION_BLOCK",
        );
        assert!(err.message.contains("does not match the signature"));

        // conforming block builds fine
        build(
            "INTERFACE IMotor METHOD Start : BOOL VAR_INPUT speed : INT; END_VAR END_METHOD END_INTERFACE
             FUNCTION_BLOCK M IMPLEMENTS IMotor
             METHOD Start : BOOL VAR_INPUT speed : INT; END_VAR END_METHOD
             END_FUNCTION_BLOCK",
        );
    }

    #[test]
    fn test_method_vars_are_mangled_into_work_memory() {
        let table = build(
            "FUNCTION_BLOCK B METHOD F : BOOL VAR_INPUT a : INT; END_VAR VAR t : DINT; END_VAR END_METHOD END_FUNCTION_BLOCK",
        );
        let a = table.lookup(None, "__M_B_F_a").unwrap();
        assert_eq!(a.ty, Type::INT);
        assert!(a.address >= 0x2000);
        assert!(table.lookup(None, "__M_B_F_t").is_some());
        let info = &table.fbs["B"].methods["F"];
        assert_eq!(info.inputs[0].mangled, "__M_B_F_a");
        assert_eq!(info.locals[0].mangled, "__M_B_F_t");
    }

    #[test]
    fn test_io_binding_addresses() {
        let table = build("VAR_GLOBAL s AT %I0 : BOOL; lamp AT %QX1.3 : BOOL; w AT %IW4 : INT; END_VAR");
        assert_eq!(table.lookup(None, "s").unwrap().address, 0x0000);
        let lamp = table.lookup(None, "lamp").unwrap();
        assert_eq!(lamp.address, 0x1001);
        assert_eq!(lamp.io.as_ref().unwrap().bit, Some(3));
        assert_eq!(table.lookup(None, "w").unwrap().address, 0x0004);
    }

    #[test]
    fn test_stdlib_instance_size() {
        let table = build("PROGRAM P VAR t : TON; h : HYSTERESIS; END_VAR END_PROGRAM");
        assert_eq!(table.lookup(Some("P"), "t").unwrap().size, 16);
        assert_eq!(table.lookup(Some("P"), "h").unwrap().size, 16);
    }

    #[test]
    fn test_function_scope_and_return_var() {
        let table = build(
            "FUNCTION Add2 : INT VAR_INPUT a : INT; b : INT; END_VAR Add2 := a + b; END_FUNCTION",
        );
        let info = &table.functions["Add2"];
        assert_eq!(info.inputs, ["a", "b"]);
        let ret = table.lookup(Some("Add2"), "Add2").unwrap();
        assert_eq!(ret.ty, Type::INT);
    }

    #[test]
    fn test_constants_fold() {
        let table = build("VAR_GLOBAL CONSTANT LIMIT_HI : INT := 10 * 4 + 2; END_VAR");
        assert_eq!(table.lookup(None, "LIMIT_HI").unwrap().constant_value, Some(42));
    }

    #[test]
    fn test_duplicate_symbol() {
        let err = build_err("VAR_GLOBAL a : INT; a : INT; END_VAR");
        assert!(err.message.contains("duplicate symbol"));
    }

    #[test]
    fn test_unknown_type() {
        let err = build_err("VAR_GLOBAL a : Mystery; END_VAR");
        assert!(err.message.contains("unknown type"));
    }

    #[test]
    fn test_retain_region() {
        let table = build("VAR_GLOBAL RETAIN hours : DINT; END_VAR");
        let sym = table.lookup(None, "hours").unwrap();
        assert_eq!(sym.region, Region::Retain);
        assert_eq!(sym.address, RETAIN_BASE);
    }
}
