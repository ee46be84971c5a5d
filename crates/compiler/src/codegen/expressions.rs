//! Expression lowering with type-directed opcode selection.
//!
//! Every expression pushes exactly one value. Widths come from the resolved
//! type (1/2/4/8 bytes), numeric binary operators switch to the float
//! opcode family when either side is REAL/LREAL, and STRING values travel
//! as header addresses. L-values go through a dedicated address path
//! ([`CodeGen::emit_place`]) so indirect stores can consume a computed
//! absolute address.

use super::CodeGen;
use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::error::{CodegenError, CompileError, SemanticError};
use crate::stdlib::{load_indirect_op, push_int};
use crate::types::{ElementaryType, Type};

/// Where an L-value lives: a compile-time absolute address, or an address
/// computed onto the stack.
pub(crate) enum Place {
    Static { addr: u32, bit: Option<u8> },
    Stack,
}

/// Resolution of a bare identifier.
pub(crate) enum IdentInfo {
    Constant { value: i64, ty: Type },
    Direct { addr: u32, ty: Type, bit: Option<u8> },
}

impl CodeGen<'_> {
    // ------------------------------------------------------------------
    // Identifier resolution
    // ------------------------------------------------------------------

    /// Hierarchical visibility: method scope (mangled storage), implicit
    /// `this` scope (FB members), POU locals, globals.
    pub(crate) fn resolve_ident(
        &self,
        name: &str,
        line: usize,
        column: usize,
    ) -> Result<IdentInfo, CompileError> {
        if let Some(ctx) = self.method_stack.last() {
            let params = ctx
                .info
                .inputs
                .iter()
                .chain(&ctx.info.outputs)
                .chain(&ctx.info.locals);
            for param in params {
                if param.name == name {
                    let symbol = self.symbols.globals.get(&param.mangled).ok_or_else(|| {
                        SemanticError::new(
                            line,
                            column,
                            format!("missing storage for method variable '{}'", name),
                        )
                    })?;
                    return Ok(IdentInfo::Direct {
                        addr: symbol.address,
                        ty: symbol.ty.clone(),
                        bit: None,
                    });
                }
            }
        }
        if let Some(fb) = &self.current_fb
            && let Some(member) = self.symbols.member_info(&fb.type_name, name)
        {
            return Ok(IdentInfo::Direct {
                addr: fb.base + member.offset,
                ty: member.ty,
                bit: None,
            });
        }
        // Inside a method or FB body the caller's program locals are not
        // visible, so the POU scope only applies at program/function level.
        let pou = if self.current_fb.is_some() {
            None
        } else {
            self.pou.as_deref()
        };
        if let Some(symbol) = self.symbols.lookup(pou, name) {
            if let Some(value) = symbol.constant_value {
                return Ok(IdentInfo::Constant {
                    value,
                    ty: symbol.ty.clone(),
                });
            }
            return Ok(IdentInfo::Direct {
                addr: symbol.address,
                ty: symbol.ty.clone(),
                bit: symbol.io.as_ref().and_then(|io| io.bit),
            });
        }
        Err(SemanticError::new(line, column, format!("unknown identifier '{}'", name)).into())
    }

    // ------------------------------------------------------------------
    // Storage widths
    // ------------------------------------------------------------------

    /// Byte width of a loadable/storable value of this type (enums decay
    /// to their base integer).
    pub(crate) fn storage_size(&self, ty: &Type) -> u32 {
        match ty {
            Type::Elementary(e) => e.size(),
            Type::Pointer(_) => 4,
            Type::Named(name) => self
                .symbols
                .enums
                .get(name)
                .map(|e| e.base.size())
                .unwrap_or(4),
            Type::Array { .. } => 4,
        }
    }

    /// Is this a scalar the stack machine can hold in one slot?
    fn is_loadable(&self, ty: &Type) -> bool {
        match ty {
            Type::Elementary(_) | Type::Pointer(_) => true,
            Type::Named(name) => self.symbols.enums.contains_key(name),
            Type::Array { .. } => false,
        }
    }

    fn is_float_class(&self, ty: &Type) -> bool {
        ty.is_float()
    }

    fn is_int_class(&self, ty: &Type) -> bool {
        match ty {
            Type::Elementary(e) => e.is_integer(),
            Type::Named(name) => self.symbols.enums.contains_key(name),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Type inference (no emission)
    // ------------------------------------------------------------------

    pub(crate) fn infer_type(&mut self, e: &Expr) -> Result<Type, CompileError> {
        match &e.kind {
            ExprKind::BoolLit(_) => Ok(Type::BOOL),
            ExprKind::IntLit(v) => Ok(int_literal_type(*v)),
            ExprKind::RealLit(_) => Ok(Type::REAL),
            ExprKind::TimeLit(_) => Ok(Type::TIME),
            ExprKind::DateLit(_) => Ok(Type::Elementary(ElementaryType::Date)),
            ExprKind::TodLit(_) => Ok(Type::Elementary(ElementaryType::Tod)),
            ExprKind::DtLit(_) => Ok(Type::Elementary(ElementaryType::Dt)),
            ExprKind::StringLit { wide, .. } => Ok(Type::Elementary(if *wide {
                ElementaryType::WStr
            } else {
                ElementaryType::Str
            })),
            ExprKind::Ident(name) => match self.resolve_ident(name, e.line, e.column)? {
                IdentInfo::Constant { ty, .. } => Ok(ty),
                IdentInfo::Direct { ty, .. } => Ok(ty),
            },
            ExprKind::Member { base, name } => {
                let mut base_ty = self.infer_type(base)?;
                // `THIS` is a pointer to the instance, but `THIS.x`
                // addresses the pointee directly.
                if matches!(base.kind, ExprKind::This)
                    && let Type::Pointer(inner) = base_ty
                {
                    base_ty = *inner;
                }
                self.member_of(&base_ty, name, e.line, e.column)
                    .map(|m| m.ty)
            }
            ExprKind::Index { base, .. } => {
                let base_ty = self.infer_type(base)?;
                match base_ty {
                    Type::Array { element, .. } => Ok(*element),
                    other => Err(SemanticError::new(
                        e.line,
                        e.column,
                        format!("cannot index a value of type {}", other),
                    )
                    .into()),
                }
            }
            ExprKind::Deref(base) => {
                let base_ty = self.infer_type(base)?;
                match base_ty {
                    Type::Pointer(inner) => Ok(*inner),
                    other => Err(SemanticError::new(
                        e.line,
                        e.column,
                        format!("cannot dereference a value of type {}", other),
                    )
                    .into()),
                }
            }
            ExprKind::Unary { op, operand } => {
                let ty = self.infer_type(operand)?;
                match op {
                    UnaryOp::Not => Ok(if ty.is_bool() { Type::BOOL } else { ty }),
                    UnaryOp::Neg => Ok(ty),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                if op.is_comparison() {
                    return Ok(Type::BOOL);
                }
                let lt = self.infer_type(lhs)?;
                let rt = self.infer_type(rhs)?;
                if matches!(op, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
                    && lt.is_bool()
                    && rt.is_bool()
                {
                    return Ok(Type::BOOL);
                }
                Ok(self.arithmetic_result(&lt, &rt))
            }
            ExprKind::AddrOf(inner) => {
                let ty = self.infer_type(inner)?;
                Ok(Type::Pointer(Box::new(ty)))
            }
            ExprKind::Call { name, args } => self.infer_call_type(name, args, e.line, e.column),
            ExprKind::MethodCall { base, method, .. } => {
                let info = self.resolve_method(base, method, e.line, e.column)?.1;
                info.return_type.ok_or_else(|| {
                    SemanticError::new(
                        e.line,
                        e.column,
                        format!("method '{}' returns no value", method),
                    )
                    .into()
                })
            }
            ExprKind::This => {
                let fb = self.current_fb.as_ref().ok_or_else(|| {
                    SemanticError::new(e.line, e.column, "THIS outside a function block")
                })?;
                Ok(Type::Pointer(Box::new(Type::Named(fb.type_name.clone()))))
            }
        }
    }

    /// Numeric result type of an arithmetic operator.
    fn arithmetic_result(&self, lt: &Type, rt: &Type) -> Type {
        if matches!(lt, Type::Elementary(ElementaryType::LReal))
            || matches!(rt, Type::Elementary(ElementaryType::LReal))
        {
            return Type::Elementary(ElementaryType::LReal);
        }
        if self.is_float_class(lt) || self.is_float_class(rt) {
            return Type::REAL;
        }
        if self.storage_size(rt) > self.storage_size(lt) {
            rt.clone()
        } else {
            lt.clone()
        }
    }

    fn member_of(
        &self,
        base_ty: &Type,
        name: &str,
        line: usize,
        column: usize,
    ) -> Result<crate::symbols::MemberInfo, CompileError> {
        match base_ty {
            Type::Named(type_name) => {
                self.symbols.member_info(type_name, name).ok_or_else(|| {
                    SemanticError::new(
                        line,
                        column,
                        format!("unknown member '{}' on type '{}'", name, type_name),
                    )
                    .into()
                })
            }
            other => Err(SemanticError::new(
                line,
                column,
                format!("type {} has no members", other),
            )
            .into()),
        }
    }

    // ------------------------------------------------------------------
    // R-value emission
    // ------------------------------------------------------------------

    pub(crate) fn emit_expr(&mut self, e: &Expr) -> Result<Type, CompileError> {
        match &e.kind {
            ExprKind::BoolLit(b) => {
                self.emit(if *b { "PUSH8 1" } else { "PUSH8 0" });
                Ok(Type::BOOL)
            }
            ExprKind::IntLit(v) => {
                self.emit(&push_int(*v));
                Ok(int_literal_type(*v))
            }
            ExprKind::RealLit(v) => {
                self.emit(&format!("PUSH32 0x{:08X}", (*v as f32).to_bits()));
                Ok(Type::REAL)
            }
            ExprKind::TimeLit(v) => {
                self.emit(&push_int(*v));
                Ok(Type::TIME)
            }
            ExprKind::DateLit(v) => {
                self.emit(&push_int(*v));
                Ok(Type::Elementary(ElementaryType::Date))
            }
            ExprKind::TodLit(v) => {
                self.emit(&push_int(*v));
                Ok(Type::Elementary(ElementaryType::Tod))
            }
            ExprKind::DtLit(v) => {
                self.emit(&push_int(*v));
                Ok(Type::Elementary(ElementaryType::Dt))
            }
            ExprKind::StringLit { value, wide } => {
                let addr = self.pool.address_of(value, *wide).ok_or_else(|| {
                    CodegenError::new(e.line, e.column, "string literal missing from pool")
                })?;
                self.emit(&format!("PUSH32 {}", addr));
                Ok(Type::Elementary(if *wide {
                    ElementaryType::WStr
                } else {
                    ElementaryType::Str
                }))
            }
            ExprKind::Ident(name) => match self.resolve_ident(name, e.line, e.column)? {
                IdentInfo::Constant { value, ty } => {
                    self.emit(&push_int(value));
                    Ok(ty)
                }
                IdentInfo::Direct { addr, ty, bit } => {
                    if !self.is_loadable(&ty) && !ty.is_string() {
                        return Err(SemanticError::new(
                            e.line,
                            e.column,
                            format!("'{}' is a composite and cannot be used as a value", name),
                        )
                        .into());
                    }
                    self.emit_load_direct(addr, &ty, bit);
                    Ok(ty)
                }
            },
            ExprKind::Member { .. } | ExprKind::Index { .. } | ExprKind::Deref(_) => {
                let (ty, place) = self.emit_place(e)?;
                match place {
                    Place::Static { addr, bit } => {
                        if !self.is_loadable(&ty) && !ty.is_string() {
                            return Err(SemanticError::new(
                                e.line,
                                e.column,
                                "composite values cannot be loaded onto the stack".to_string(),
                            )
                            .into());
                        }
                        self.emit_load_direct(addr, &ty, bit);
                    }
                    Place::Stack => {
                        if ty.is_string() {
                            // a string value is its header address
                        } else if self.is_loadable(&ty) {
                            let size = self.storage_size(&ty);
                            self.emit(load_indirect_op(size));
                            if matches!(ty, Type::Elementary(ElementaryType::LReal)) {
                                self.emit("F64TO32");
                            }
                        } else {
                            return Err(SemanticError::new(
                                e.line,
                                e.column,
                                "composite values cannot be loaded onto the stack".to_string(),
                            )
                            .into());
                        }
                    }
                }
                Ok(ty)
            }
            ExprKind::Unary { op, operand } => self.emit_unary(*op, operand, e),
            ExprKind::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs, e),
            ExprKind::AddrOf(inner) => {
                let (ty, place) = self.emit_place(inner)?;
                if let Place::Static { addr, .. } = place {
                    self.emit(&format!("PUSH32 {}", addr));
                }
                Ok(Type::Pointer(Box::new(ty)))
            }
            ExprKind::Call { name, args } => self.emit_call(name, args, e.line, e.column),
            ExprKind::MethodCall { base, method, args } => {
                let result = self.emit_method_call(base, method, args, e.line, e.column)?;
                result.ok_or_else(|| {
                    SemanticError::new(
                        e.line,
                        e.column,
                        format!("method '{}' returns no value", method),
                    )
                    .into()
                })
            }
            ExprKind::This => {
                let fb = self.current_fb.clone().ok_or_else(|| {
                    SemanticError::new(e.line, e.column, "THIS outside a function block")
                })?;
                self.emit(&format!("PUSH32 {}", fb.base));
                Ok(Type::Pointer(Box::new(Type::Named(fb.type_name))))
            }
        }
    }

    fn emit_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        e: &Expr,
    ) -> Result<Type, CompileError> {
        match op {
            UnaryOp::Not => {
                let ty = self.emit_expr(operand)?;
                if ty.is_bool() {
                    // mask back down to 0/1
                    self.emit("NOT");
                    self.emit("PUSH8 1");
                    self.emit("AND");
                    Ok(Type::BOOL)
                } else if self.is_int_class(&ty) {
                    self.emit("NOT");
                    Ok(ty)
                } else {
                    Err(SemanticError::new(
                        e.line,
                        e.column,
                        format!("NOT is not defined for {}", ty),
                    )
                    .into())
                }
            }
            UnaryOp::Neg => {
                // Fold negated literals so `-5` uses the smallest push op.
                if let ExprKind::IntLit(v) = &operand.kind {
                    self.emit(&push_int(-*v));
                    return Ok(int_literal_type(-*v));
                }
                if let ExprKind::RealLit(v) = &operand.kind {
                    self.emit(&format!("PUSH32 0x{:08X}", (-*v as f32).to_bits()));
                    return Ok(Type::REAL);
                }
                let ty = self.emit_expr(operand)?;
                if self.is_float_class(&ty) {
                    self.emit("NEGF");
                } else if self.is_int_class(&ty) {
                    self.emit("NEG");
                } else {
                    return Err(SemanticError::new(
                        e.line,
                        e.column,
                        format!("unary minus is not defined for {}", ty),
                    )
                    .into());
                }
                Ok(ty)
            }
        }
    }

    fn emit_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        e: &Expr,
    ) -> Result<Type, CompileError> {
        let lt = self.infer_type(lhs)?;
        let rt = self.infer_type(rhs)?;

        // String operands: only comparison is direct; concatenation needs
        // an output buffer, which is what CONCAT is for.
        if lt.is_string() || rt.is_string() {
            if !(lt.is_string() && rt.is_string()) {
                return Err(SemanticError::new(
                    e.line,
                    e.column,
                    format!("'{}' cannot combine {} and {}", op.symbol(), lt, rt),
                )
                .into());
            }
            if op == BinaryOp::Add {
                return Err(SemanticError::new(
                    e.line,
                    e.column,
                    "'+' is not defined for STRING; use CONCAT",
                )
                .into());
            }
            if !op.is_comparison() {
                return Err(SemanticError::new(
                    e.line,
                    e.column,
                    format!("'{}' is not defined for STRING", op.symbol()),
                )
                .into());
            }
            self.emit_expr(lhs)?;
            self.emit_expr(rhs)?;
            self.emit("SCMP");
            self.emit("PUSH8 0");
            self.emit(comparison_op(op, false));
            return Ok(Type::BOOL);
        }

        // Fold constant integer arithmetic.
        if !op.is_comparison()
            && self.is_int_class(&lt)
            && self.is_int_class(&rt)
            && let Some(value) = self.symbols.const_eval(self.pou.as_deref(), e)
        {
            self.emit(&push_int(value));
            return Ok(int_literal_type(value));
        }

        let float = self.is_float_class(&lt) || self.is_float_class(&rt);

        match op {
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                if float {
                    return Err(SemanticError::new(
                        e.line,
                        e.column,
                        format!("'{}' is not defined for floats", op.symbol()),
                    )
                    .into());
                }
                self.emit_expr(lhs)?;
                self.emit_expr(rhs)?;
                self.emit(match op {
                    BinaryOp::And => "AND",
                    BinaryOp::Or => "OR",
                    _ => "XOR",
                });
                if lt.is_bool() && rt.is_bool() {
                    Ok(Type::BOOL)
                } else {
                    Ok(self.arithmetic_result(&lt, &rt))
                }
            }
            BinaryOp::Mod => {
                if float {
                    return Err(SemanticError::new(
                        e.line,
                        e.column,
                        "MOD is only defined for integers",
                    )
                    .into());
                }
                self.emit_expr(lhs)?;
                self.emit_expr(rhs)?;
                self.emit("MOD");
                Ok(self.arithmetic_result(&lt, &rt))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                let lt2 = self.emit_expr(lhs)?;
                if float && !self.is_float_class(&lt2) {
                    self.emit("ITOF");
                }
                let rt2 = self.emit_expr(rhs)?;
                if float && !self.is_float_class(&rt2) {
                    self.emit("ITOF");
                }
                self.emit(match (op, float) {
                    (BinaryOp::Add, false) => "ADD",
                    (BinaryOp::Sub, false) => "SUB",
                    (BinaryOp::Mul, false) => "MUL",
                    (BinaryOp::Div, false) => "DIV",
                    (BinaryOp::Add, true) => "ADDF",
                    (BinaryOp::Sub, true) => "SUBF",
                    (BinaryOp::Mul, true) => "MULF",
                    (BinaryOp::Div, true) => "DIVF",
                    _ => unreachable!(),
                });
                Ok(self.arithmetic_result(&lt, &rt))
            }
            _ => {
                // comparisons
                let lt2 = self.emit_expr(lhs)?;
                if float && !self.is_float_class(&lt2) {
                    self.emit("ITOF");
                }
                let rt2 = self.emit_expr(rhs)?;
                if float && !self.is_float_class(&rt2) {
                    self.emit("ITOF");
                }
                self.emit(comparison_op(op, float));
                Ok(Type::BOOL)
            }
        }
    }

    // ------------------------------------------------------------------
    // Address path (L-values)
    // ------------------------------------------------------------------

    /// Resolve an L-value to either a static absolute address or an
    /// address pushed onto the stack.
    pub(crate) fn emit_place(&mut self, e: &Expr) -> Result<(Type, Place), CompileError> {
        match &e.kind {
            ExprKind::Ident(name) => match self.resolve_ident(name, e.line, e.column)? {
                IdentInfo::Constant { .. } => Err(CodegenError::new(
                    e.line,
                    e.column,
                    format!("'{}' is a constant, not an assignable location", name),
                )
                .into()),
                IdentInfo::Direct { addr, ty, bit } => Ok((ty, Place::Static { addr, bit })),
            },
            ExprKind::This => {
                let fb = self.current_fb.clone().ok_or_else(|| {
                    SemanticError::new(e.line, e.column, "THIS outside a function block")
                })?;
                Ok((
                    Type::Named(fb.type_name),
                    Place::Static {
                        addr: fb.base,
                        bit: None,
                    },
                ))
            }
            ExprKind::Member { base, name } => {
                let (base_ty, place) = self.emit_place_through_pointer(base)?;
                let member = self.member_of(&base_ty, name, e.line, e.column)?;
                match place {
                    Place::Static { addr, .. } => Ok((
                        member.ty,
                        Place::Static {
                            addr: addr + member.offset,
                            bit: None,
                        },
                    )),
                    Place::Stack => {
                        if member.offset > 0 {
                            self.emit(&push_int(member.offset as i64));
                            self.emit("ADD");
                        }
                        Ok((member.ty, Place::Stack))
                    }
                }
            }
            ExprKind::Index { base, indices } => self.emit_index_place(base, indices, e),
            ExprKind::Deref(base) => {
                let ty = self.emit_expr(base)?;
                match ty {
                    Type::Pointer(inner) => Ok((*inner, Place::Stack)),
                    other => Err(SemanticError::new(
                        e.line,
                        e.column,
                        format!("cannot dereference a value of type {}", other),
                    )
                    .into()),
                }
            }
            _ => Err(CodegenError::new(
                e.line,
                e.column,
                "expression is not an assignable location",
            )
            .into()),
        }
    }

    /// Like `emit_place`, but `THIS`-style pointers are transparent so
    /// `THIS.x` and `p^.x` address the pointee.
    fn emit_place_through_pointer(&mut self, e: &Expr) -> Result<(Type, Place), CompileError> {
        if let ExprKind::This = e.kind {
            let fb = self.current_fb.clone().ok_or_else(|| {
                SemanticError::new(e.line, e.column, "THIS outside a function block")
            })?;
            return Ok((
                Type::Named(fb.type_name),
                Place::Static {
                    addr: fb.base,
                    bit: None,
                },
            ));
        }
        self.emit_place(e)
    }

    /// `base + ((i0-l0)*s1*s2 + (i1-l1)*s2 + (i2-l2)) * element_size`,
    /// folded to a static address when every index is a compile-time
    /// constant within bounds.
    fn emit_index_place(
        &mut self,
        base: &Expr,
        indices: &[Expr],
        e: &Expr,
    ) -> Result<(Type, Place), CompileError> {
        let (base_ty, base_place) = self.emit_place(base)?;
        let (element, dims) = match base_ty {
            Type::Array { element, dims } => (*element, dims),
            other => {
                return Err(SemanticError::new(
                    e.line,
                    e.column,
                    format!("cannot index a value of type {}", other),
                )
                .into());
            }
        };
        if indices.len() != dims.len() {
            return Err(SemanticError::new(
                e.line,
                e.column,
                format!(
                    "array has {} dimension(s) but {} index(es) were given",
                    dims.len(),
                    indices.len()
                ),
            )
            .into());
        }
        let elem_size = self.symbols.type_size(&element, e.line, e.column)?;

        // Stride of dimension k is the product of the extents after it.
        let strides: Vec<i64> = (0..dims.len())
            .map(|k| dims[k + 1..].iter().map(|(lo, hi)| hi - lo + 1).product())
            .collect();

        let consts: Vec<Option<i64>> = indices
            .iter()
            .map(|idx| self.symbols.const_eval(self.pou.as_deref(), idx))
            .collect();

        if consts.iter().all(Option::is_some) {
            let mut linear = 0i64;
            for (k, idx) in consts.iter().enumerate() {
                let idx = idx.unwrap_or(0);
                let (lo, hi) = dims[k];
                if idx < lo || idx > hi {
                    return Err(SemanticError::new(
                        e.line,
                        e.column,
                        format!("index {} is outside the declared bounds {}..{}", idx, lo, hi),
                    )
                    .into());
                }
                linear += (idx - lo) * strides[k];
            }
            let offset = linear as u32 * elem_size;
            return match base_place {
                Place::Static { addr, .. } => Ok((
                    element,
                    Place::Static {
                        addr: addr + offset,
                        bit: None,
                    },
                )),
                Place::Stack => {
                    if offset > 0 {
                        self.emit(&push_int(offset as i64));
                        self.emit("ADD");
                    }
                    Ok((element, Place::Stack))
                }
            };
        }

        // Dynamic: materialize the base address, then the scaled sum.
        if let Place::Static { addr, .. } = base_place {
            self.emit(&format!("PUSH32 {}", addr));
        }
        for (k, idx) in indices.iter().enumerate() {
            let ty = self.emit_expr(idx)?;
            if !self.is_int_class(&ty) && !ty.is_bool() {
                return Err(SemanticError::new(
                    idx.line,
                    idx.column,
                    format!("array index must be an integer, got {}", ty),
                )
                .into());
            }
            let (lo, _) = dims[k];
            if lo != 0 {
                self.emit(&push_int(lo));
                self.emit("SUB");
            }
            if strides[k] != 1 {
                self.emit(&push_int(strides[k]));
                self.emit("MUL");
            }
            if k > 0 {
                self.emit("ADD");
            }
        }
        if elem_size != 1 {
            self.emit(&push_int(elem_size as i64));
            self.emit("MUL");
        }
        self.emit("ADD");
        Ok((element, Place::Stack))
    }

    // ------------------------------------------------------------------
    // Assignment compatibility and conversions
    // ------------------------------------------------------------------

    pub(crate) fn check_assignable(
        &self,
        target: &Type,
        value: &Type,
        line: usize,
        column: usize,
    ) -> Result<(), CompileError> {
        let compatible = if target.is_bool() {
            value.is_bool()
        } else if target.is_string() {
            value.is_string() && target == value
        } else if matches!(target, Type::Pointer(_)) {
            matches!(value, Type::Pointer(_))
        } else if self.is_int_class(target) || self.is_float_class(target) {
            self.is_int_class(value) || self.is_float_class(value) || value.is_bool()
        } else {
            false
        };
        if compatible {
            Ok(())
        } else {
            Err(SemanticError::new(
                line,
                column,
                format!("cannot assign a value of type {} to a {} target", value, target),
            )
            .into())
        }
    }

    /// Convert the value on top of the stack between the integer and float
    /// domains when the target requires it.
    pub(crate) fn emit_numeric_conversion(&mut self, from: &Type, to: &Type) {
        let from_float = self.is_float_class(from);
        let to_float = self.is_float_class(to);
        if to_float && !from_float {
            self.emit("ITOF");
        } else if !to_float && from_float {
            self.emit("FTOI");
        }
    }
}

/// DINT for anything that fits in 32 bits, LINT beyond.
fn int_literal_type(v: i64) -> Type {
    if i32::try_from(v).is_ok() {
        Type::DINT
    } else {
        Type::Elementary(ElementaryType::LInt)
    }
}

fn comparison_op(op: BinaryOp, float: bool) -> &'static str {
    match (op, float) {
        (BinaryOp::Eq, false) => "EQ",
        (BinaryOp::Ne, false) => "NE",
        (BinaryOp::Lt, false) => "LT",
        (BinaryOp::Le, false) => "LE",
        (BinaryOp::Gt, false) => "GT",
        (BinaryOp::Ge, false) => "GE",
        (BinaryOp::Eq, true) => "EQF",
        (BinaryOp::Ne, true) => "NEF",
        (BinaryOp::Lt, true) => "LTF",
        (BinaryOp::Le, true) => "LEF",
        (BinaryOp::Gt, true) => "GTF",
        (BinaryOp::Ge, true) => "GEF",
        _ => "EQ",
    }
}
