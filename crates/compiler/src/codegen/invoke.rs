//! Invocation lowering: stdlib templates, user-FB body inlining, method
//! inlining, and real function calls.
//!
//! Stateful blocks and user FBs communicate through instance memory: the
//! caller stores each named input to its member address, then either the
//! catalog template or the FB body runs with `current_fb` bound. Methods
//! are always inlined; their inputs/outputs/locals are process-wide
//! mangled storage shared across call sites, which is safe because the
//! compiler targets a single-threaded cycle.

use super::expressions::IdentInfo;
use super::{CodeGen, FbInstance, MethodContext};
use crate::ast::{Access, CallArg, Expr, ExprKind, Section};
use crate::error::{CompileError, SemanticError};
use crate::stdlib::{store_op, Role, TemplateCaps};
use crate::symbols::MethodInfo;
use crate::types::{ElementaryType, Type};

impl CodeGen<'_> {
    // ------------------------------------------------------------------
    // Function calls (stdlib templates and user functions)
    // ------------------------------------------------------------------

    pub(crate) fn emit_call(
        &mut self,
        name: &str,
        args: &[CallArg],
        line: usize,
        column: usize,
    ) -> Result<Type, CompileError> {
        // Unqualified method call on the current instance.
        if let Some(fb) = self.current_fb.clone()
            && self
                .symbols
                .fbs
                .get(&fb.type_name)
                .is_some_and(|d| d.methods.contains_key(name))
        {
            let this = Expr::new(ExprKind::This, line, column);
            let result = self.emit_method_call(&this, name, args, line, column)?;
            return result.ok_or_else(|| {
                SemanticError::new(line, column, format!("method '{}' returns no value", name))
                    .into()
            });
        }

        let catalog = self.catalog;
        if let Some(def) = catalog.function(name) {
            if let Some(arg) = args.iter().find(|a| a.name.is_some()) {
                return Err(SemanticError::new(
                    arg.value.line,
                    arg.value.column,
                    format!("'{}' takes positional arguments only", name),
                )
                .into());
            }
            if args.len() < def.min_args
                || def.max_args.is_some_and(|max| args.len() > max)
            {
                return Err(SemanticError::new(
                    line,
                    column,
                    match def.max_args {
                        Some(max) if max == def.min_args => format!(
                            "'{}' expects {} argument(s), got {}",
                            name,
                            def.min_args,
                            args.len()
                        ),
                        Some(max) => format!(
                            "'{}' expects {} to {} arguments, got {}",
                            name,
                            def.min_args,
                            max,
                            args.len()
                        ),
                        None => format!(
                            "'{}' expects at least {} arguments, got {}",
                            name,
                            def.min_args,
                            args.len()
                        ),
                    },
                )
                .into());
            }
            let values: Vec<Expr> = args.iter().map(|a| a.value.clone()).collect();
            // Each nesting level gets its own scratch pair; beyond the
            // reserved depth the record carries none and builder templates
            // fail with a clean error.
            let scratch = self.symbols.string_scratch.get(self.string_depth).copied();
            self.string_depth += 1;
            let mut caps = TemplateCaps::new(self, scratch);
            let result = (def.emit)(&mut caps, &values, line, column);
            self.string_depth -= 1;
            return result;
        }

        if let Some(info) = self.symbols.functions.get(name).cloned() {
            if args.len() != info.inputs.len() {
                return Err(SemanticError::new(
                    line,
                    column,
                    format!(
                        "function '{}' expects {} argument(s), got {}",
                        name,
                        info.inputs.len(),
                        args.len()
                    ),
                )
                .into());
            }
            if let Some(arg) = args.iter().find(|a| a.name.is_some()) {
                return Err(SemanticError::new(
                    arg.value.line,
                    arg.value.column,
                    format!("function '{}' takes positional arguments only", name),
                )
                .into());
            }
            // Arguments push left-to-right; the callee pops them in
            // reverse into its input storage.
            for (input, arg) in info.inputs.iter().zip(args) {
                let param = self
                    .symbols
                    .lookup(Some(&info.name), input)
                    .cloned()
                    .ok_or_else(|| {
                        SemanticError::new(line, column, format!("unknown input '{}'", input))
                    })?;
                let value_ty = self.emit_expr(&arg.value)?;
                self.check_assignable(&param.ty, &value_ty, arg.value.line, arg.value.column)?;
                self.emit_numeric_conversion(&value_ty, &param.ty);
            }
            self.emit(&format!("CALL {}", info.label));
            return Ok(info.return_type);
        }

        Err(SemanticError::new(line, column, format!("unknown function '{}'", name)).into())
    }

    /// Result type of a call, without emitting. Stdlib result types follow
    /// the catalog conventions (math is REAL, bitwise/LEN/FIND are DINT,
    /// string builders are STRING, selection follows the selected input).
    pub(crate) fn infer_call_type(
        &mut self,
        name: &str,
        args: &[CallArg],
        line: usize,
        column: usize,
    ) -> Result<Type, CompileError> {
        if let Some(fb) = self.current_fb.clone()
            && let Some(info) = self
                .symbols
                .fbs
                .get(&fb.type_name)
                .and_then(|d| d.methods.get(name))
                .cloned()
        {
            return info.return_type.ok_or_else(|| {
                SemanticError::new(line, column, format!("method '{}' returns no value", name))
                    .into()
            });
        }

        let arg_at = |i: usize| -> Result<&Expr, CompileError> {
            args.get(i).map(|a| &a.value).ok_or_else(|| {
                SemanticError::new(line, column, format!("'{}' is missing arguments", name)).into()
            })
        };

        if self.catalog.function(name).is_some() {
            return match name {
                "ABS" => {
                    let arg = arg_at(0)?.clone();
                    self.infer_type(&arg)
                }
                "MIN" | "MAX" | "LIMIT" => {
                    let mut float = false;
                    for arg in args {
                        float |= self.infer_type(&arg.value)?.is_float();
                    }
                    if float {
                        Ok(Type::REAL)
                    } else {
                        let first = arg_at(if name == "LIMIT" { 1 } else { 0 })?.clone();
                        self.infer_type(&first)
                    }
                }
                "SEL" | "MUX" => {
                    let arg = arg_at(1)?.clone();
                    self.infer_type(&arg)
                }
                "SHL" | "SHR" | "ROL" | "ROR" | "LEN" | "FIND" => Ok(Type::DINT),
                "CONCAT" | "LEFT" | "RIGHT" | "MID" | "INSERT" | "DELETE" | "REPLACE" => {
                    Ok(Type::STRING)
                }
                _ => Ok(Type::REAL), // numeric approximations
            };
        }

        if let Some(info) = self.symbols.functions.get(name) {
            return Ok(info.return_type.clone());
        }
        Err(SemanticError::new(line, column, format!("unknown function '{}'", name)).into())
    }

    // ------------------------------------------------------------------
    // Method inlining
    // ------------------------------------------------------------------

    /// Statically resolve an expression naming an FB/struct instance to
    /// `(type name, absolute base address)`.
    pub(crate) fn resolve_static_instance(
        &self,
        e: &Expr,
    ) -> Result<(String, u32), CompileError> {
        match &e.kind {
            ExprKind::Ident(name) => match self.resolve_ident(name, e.line, e.column)? {
                IdentInfo::Direct {
                    addr,
                    ty: Type::Named(type_name),
                    ..
                } => Ok((type_name, addr)),
                _ => Err(SemanticError::new(
                    e.line,
                    e.column,
                    format!("'{}' is not a function block instance", name),
                )
                .into()),
            },
            ExprKind::This => {
                let fb = self.current_fb.as_ref().ok_or_else(|| {
                    SemanticError::new(e.line, e.column, "THIS outside a function block")
                })?;
                Ok((fb.type_name.clone(), fb.base))
            }
            ExprKind::Member { base, name } => {
                let (base_ty, base_addr) = self.resolve_static_instance(base)?;
                let member = self.symbols.member_info(&base_ty, name).ok_or_else(|| {
                    SemanticError::new(
                        e.line,
                        e.column,
                        format!("unknown member '{}' on type '{}'", name, base_ty),
                    )
                })?;
                match member.ty {
                    Type::Named(type_name) => Ok((type_name, base_addr + member.offset)),
                    other => Err(SemanticError::new(
                        e.line,
                        e.column,
                        format!("member '{}' has type {}, not a function block", name, other),
                    )
                    .into()),
                }
            }
            _ => Err(SemanticError::new(
                e.line,
                e.column,
                "method calls require a statically addressable instance",
            )
            .into()),
        }
    }

    pub(crate) fn resolve_method(
        &self,
        base: &Expr,
        method: &str,
        line: usize,
        column: usize,
    ) -> Result<((String, u32), MethodInfo), CompileError> {
        let (type_name, addr) = self.resolve_static_instance(base)?;
        let def = self.symbols.fbs.get(&type_name).ok_or_else(|| {
            SemanticError::new(line, column, format!("type '{}' has no methods", type_name))
        })?;
        let info = def.methods.get(method).cloned().ok_or_else(|| {
            SemanticError::new(
                line,
                column,
                format!("unknown method '{}' on '{}'", method, type_name),
            )
        })?;

        let caller = self.current_fb.as_ref().map(|fb| fb.type_name.as_str());
        let allowed = match info.access {
            Access::Public => true,
            Access::Private => caller == Some(info.fb.as_str()),
            Access::Protected => caller.is_some_and(|c| self.derives_from(c, &info.fb)),
        };
        if !allowed {
            return Err(SemanticError::new(
                line,
                column,
                format!(
                    "method '{}.{}' is {} and not accessible here",
                    info.fb,
                    method,
                    match info.access {
                        Access::Private => "PRIVATE",
                        _ => "PROTECTED",
                    }
                ),
            )
            .into());
        }
        Ok(((type_name, addr), info))
    }

    fn derives_from(&self, derived: &str, base: &str) -> bool {
        let mut current = Some(derived.to_string());
        while let Some(name) = current {
            if name == base {
                return true;
            }
            current = self.symbols.fbs.get(&name).and_then(|d| d.extends.clone());
        }
        false
    }

    /// Inline a method at the call site. Returns the method's return type;
    /// when present, the method body left the result on the stack.
    pub(crate) fn emit_method_call(
        &mut self,
        base: &Expr,
        method: &str,
        args: &[CallArg],
        line: usize,
        column: usize,
    ) -> Result<Option<Type>, CompileError> {
        let ((type_name, instance_base), info) = self.resolve_method(base, method, line, column)?;
        if info.is_abstract {
            return Err(SemanticError::new(
                line,
                column,
                format!("cannot call abstract method '{}.{}'", info.fb, method),
            )
            .into());
        }
        let key = (info.fb.clone(), info.name.clone());
        if self.inline_stack.contains(&key) {
            return Err(SemanticError::new(
                line,
                column,
                format!("recursive call of method '{}.{}' cannot be inlined", info.fb, method),
            )
            .into());
        }

        // Bind arguments to inputs: positional in declaration order, named
        // by input name; unknown and duplicate names are fatal.
        let mut bound: Vec<Option<&Expr>> = vec![None; info.inputs.len()];
        let mut positional = 0usize;
        for arg in args {
            match &arg.name {
                Some(arg_name) => {
                    let idx = info
                        .inputs
                        .iter()
                        .position(|p| p.name == *arg_name)
                        .ok_or_else(|| {
                            SemanticError::new(
                                arg.value.line,
                                arg.value.column,
                                format!(
                                    "unknown named argument '{}' for method '{}'",
                                    arg_name, method
                                ),
                            )
                        })?;
                    if bound[idx].is_some() {
                        return Err(SemanticError::new(
                            arg.value.line,
                            arg.value.column,
                            format!("input '{}' bound more than once", arg_name),
                        )
                        .into());
                    }
                    bound[idx] = Some(&arg.value);
                }
                None => {
                    while positional < bound.len() && bound[positional].is_some() {
                        positional += 1;
                    }
                    if positional >= bound.len() {
                        return Err(SemanticError::new(
                            arg.value.line,
                            arg.value.column,
                            format!("too many arguments to method '{}'", method),
                        )
                        .into());
                    }
                    bound[positional] = Some(&arg.value);
                    positional += 1;
                }
            }
        }

        self.comment(&format!("method {}.{}", type_name, method));

        // Write arguments into the mangled input slots (caller context).
        for (param, value) in info.inputs.iter().zip(&bound) {
            let value = (*value).ok_or_else(|| {
                SemanticError::new(
                    line,
                    column,
                    format!("missing input '{}' in call to method '{}'", param.name, method),
                )
            })?;
            let addr = self.mangled_address(&param.mangled, line, column)?;
            let value_ty = self.emit_expr(value)?;
            self.check_assignable(&param.ty, &value_ty, value.line, value.column)?;
            self.emit_numeric_conversion(&value_ty, &param.ty);
            self.emit_store_direct(addr, &param.ty);
        }

        // Locals (including temporaries) restart from their initial
        // expressions or zero on every entry.
        for local in &info.locals {
            let addr = self.mangled_address(&local.mangled, line, column)?;
            self.emit_method_local_init(addr, &local.ty, local.init.as_ref())?;
        }

        self.inline_stack.push(key);
        let saved_loops = std::mem::take(&mut self.loop_stack);
        let saved_fb = self.current_fb.replace(FbInstance {
            type_name: type_name.clone(),
            base: instance_base,
        });
        let saved_pou = self.pou.take();
        let saved_function = self.current_function.take();
        let end_label = self.next_label("m_end");
        self.method_stack.push(MethodContext {
            info: info.clone(),
            end_label: end_label.clone(),
        });

        for statement in &info.body {
            self.emit_statement(statement)?;
        }

        self.emit_label_line(&end_label);
        self.method_stack.pop();
        self.current_function = saved_function;
        self.pou = saved_pou;
        self.current_fb = saved_fb;
        self.loop_stack = saved_loops;
        self.inline_stack.pop();

        Ok(info.return_type)
    }

    fn mangled_address(
        &self,
        mangled: &str,
        line: usize,
        column: usize,
    ) -> Result<u32, CompileError> {
        self.symbols
            .globals
            .get(mangled)
            .map(|s| s.address)
            .ok_or_else(|| {
                SemanticError::new(
                    line,
                    column,
                    format!("missing storage for method variable '{}'", mangled),
                )
                .into()
            })
    }

    fn emit_method_local_init(
        &mut self,
        addr: u32,
        ty: &Type,
        init: Option<&Expr>,
    ) -> Result<(), CompileError> {
        match ty {
            Type::Elementary(e) if e.is_string() => {
                self.emit_string_header(addr, *e == ElementaryType::WStr);
                if let Some(init) = init {
                    self.emit_expr(init)?;
                    self.emit(&format!("PUSH32 {}", addr));
                    self.emit("SCPY");
                }
            }
            Type::Named(name) if !self.symbols.enums.contains_key(name) => {
                // composite locals keep their previous contents
            }
            Type::Elementary(_) | Type::Pointer(_) | Type::Named(_) => match init {
                Some(init) => self.emit_assign_value_to(init, addr, ty)?,
                None => {
                    self.emit("PUSH8 0");
                    self.emit_store_direct(addr, ty);
                }
            },
            // arrays keep their previous contents; there is no literal
            // syntax to restore them from
            Type::Array { .. } => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Function-block invocation statements
    // ------------------------------------------------------------------

    pub(crate) fn emit_fb_call(
        &mut self,
        instance: &str,
        args: &[(String, Expr)],
        line: usize,
        column: usize,
    ) -> Result<(), CompileError> {
        // `M(x := 1);` inside an FB: a method call on the current instance.
        if let Some(fb) = self.current_fb.clone()
            && self
                .symbols
                .fbs
                .get(&fb.type_name)
                .is_some_and(|d| d.methods.contains_key(instance))
        {
            let this = Expr::new(ExprKind::This, line, column);
            let call_args: Vec<CallArg> = args
                .iter()
                .map(|(n, v)| CallArg {
                    name: Some(n.clone()),
                    value: v.clone(),
                })
                .collect();
            let result = self.emit_method_call(&this, instance, &call_args, line, column)?;
            if result.is_some() {
                self.emit("DROP");
            }
            return Ok(());
        }

        let info = self.resolve_ident(instance, line, column)?;
        let IdentInfo::Direct {
            addr: base,
            ty: Type::Named(type_name),
            ..
        } = info
        else {
            return Err(SemanticError::new(
                line,
                column,
                format!("'{}' is not a function block instance", instance),
            )
            .into());
        };

        let catalog = self.catalog;
        if let Some(block) = catalog.block(&type_name) {
            for (name, value) in args {
                let member = block.member(name).ok_or_else(|| {
                    SemanticError::new(
                        value.line,
                        value.column,
                        format!("unknown parameter '{}' on {}", name, type_name),
                    )
                })?;
                if member.role != Role::Input {
                    return Err(SemanticError::new(
                        value.line,
                        value.column,
                        format!("'{}' is not an input of {}", name, type_name),
                    )
                    .into());
                }
                let member_ty = Type::Elementary(member.ty);
                let value_ty = self.emit_expr(value)?;
                self.check_assignable(&member_ty, &value_ty, value.line, value.column)?;
                self.emit_numeric_conversion(&value_ty, &member_ty);
                self.emit(&format!("{} {}", store_op(member.size()), base + member.offset));
            }
            // Block templates never build strings; any scratch level does.
            let scratch = self.symbols.string_scratch.first().copied();
            let mut caps = TemplateCaps::new(self, scratch);
            return Ok((block.emit)(&mut caps, base, instance)?);
        }

        if let Some(fb) = self.symbols.fbs.get(&type_name).cloned() {
            let key = (type_name.clone(), String::new());
            if self.inline_stack.contains(&key) {
                return Err(SemanticError::new(
                    line,
                    column,
                    format!("recursive invocation of function block '{}'", type_name),
                )
                .into());
            }
            for (name, value) in args {
                let member = fb.member(name).cloned().ok_or_else(|| {
                    SemanticError::new(
                        value.line,
                        value.column,
                        format!("unknown member '{}' on '{}'", name, type_name),
                    )
                })?;
                if !matches!(member.section, Section::VarInput | Section::VarInOut) {
                    return Err(SemanticError::new(
                        value.line,
                        value.column,
                        format!("'{}' is not an input of '{}'", name, type_name),
                    )
                    .into());
                }
                let value_ty = self.emit_expr(value)?;
                self.check_assignable(&member.ty, &value_ty, value.line, value.column)?;
                self.emit_numeric_conversion(&value_ty, &member.ty);
                self.emit_store_direct(base + member.offset, &member.ty);
            }

            self.comment(&format!("{} {}", type_name, instance));
            self.inline_stack.push(key);
            let saved_loops = std::mem::take(&mut self.loop_stack);
            let saved_fb = self.current_fb.replace(FbInstance {
                type_name: type_name.clone(),
                base,
            });
            let saved_pou = self.pou.take();
            for statement in &fb.body {
                self.emit_statement(statement)?;
            }
            self.pou = saved_pou;
            self.current_fb = saved_fb;
            self.loop_stack = saved_loops;
            self.inline_stack.pop();
            return Ok(());
        }

        Err(SemanticError::new(
            line,
            column,
            format!("unknown function block type '{}'", type_name),
        )
        .into())
    }
}
