//! Statement lowering.
//!
//! Loops push a `{continue_label, exit_label}` context before their body
//! and pop it after; `EXIT`/`CONTINUE` always target the innermost context
//! and are fatal outside any loop. `RETURN` depends on where it appears:
//! program bodies halt the cycle, functions jump to their epilogue, and
//! inlined methods jump to the inline end label.

use super::expressions::Place;
use super::{CodeGen, LoopContext};
use crate::ast::{CaseLabel, Expr, ExprKind, Statement, StatementKind};
use crate::error::{CompileError, SemanticError};
use crate::stdlib::{push_int, store_indirect_op};
use crate::types::{ElementaryType, Type};

impl CodeGen<'_> {
    pub(crate) fn emit_statement(&mut self, s: &Statement) -> Result<(), CompileError> {
        self.maybe_annotate(s.line);
        match &s.kind {
            StatementKind::Assign { target, value } => self.emit_assign(target, value),
            StatementKind::If {
                branches,
                else_body,
            } => self.emit_if(branches, else_body.as_deref()),
            StatementKind::While { condition, body } => self.emit_while(condition, body),
            StatementKind::For {
                counter,
                start,
                end,
                step,
                body,
            } => self.emit_for(counter, start, end, step.as_ref(), body, s),
            StatementKind::Repeat { body, until } => self.emit_repeat(body, until),
            StatementKind::Case {
                selector,
                branches,
                else_body,
            } => self.emit_case(selector, branches, else_body.as_deref()),
            StatementKind::Exit => {
                let label = self
                    .loop_stack
                    .last()
                    .map(|ctx| ctx.exit_label.clone())
                    .ok_or_else(|| {
                        SemanticError::new(s.line, s.column, "EXIT outside of a loop")
                    })?;
                self.emit(&format!("JMP {}", label));
                Ok(())
            }
            StatementKind::Continue => {
                let label = self
                    .loop_stack
                    .last()
                    .map(|ctx| ctx.continue_label.clone())
                    .ok_or_else(|| {
                        SemanticError::new(s.line, s.column, "CONTINUE outside of a loop")
                    })?;
                self.emit(&format!("JMP {}", label));
                Ok(())
            }
            StatementKind::Return => {
                if let Some(ctx) = self.method_stack.last() {
                    let label = ctx.end_label.clone();
                    self.emit(&format!("JMP {}", label));
                } else if let Some(name) = &self.current_function {
                    let label = format!("_ret_{}", name);
                    self.emit(&format!("JMP {}", label));
                } else {
                    self.emit("HALT");
                }
                Ok(())
            }
            StatementKind::FbCall { instance, args } => {
                self.emit_fb_call(instance, args, s.line, s.column)
            }
            StatementKind::MethodCall(call) => {
                let ExprKind::MethodCall { base, method, args } = &call.kind else {
                    return Err(SemanticError::new(
                        s.line,
                        s.column,
                        "malformed method-call statement",
                    )
                    .into());
                };
                let result = self.emit_method_call(base, method, args, call.line, call.column)?;
                if result.is_some() {
                    self.emit("DROP");
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    fn emit_assign(&mut self, target: &Expr, value: &Expr) -> Result<(), CompileError> {
        // `_` discards a value.
        if let ExprKind::Ident(name) = &target.kind
            && name == "_"
        {
            self.emit_expr(value)?;
            self.emit("DROP");
            return Ok(());
        }

        // Inside a method, assigning to the method's own name leaves the
        // result on the stack for the caller.
        if let Some(ctx) = self.method_stack.last()
            && let ExprKind::Ident(name) = &target.kind
            && *name == ctx.info.name
        {
            let return_type = ctx.info.return_type.clone().ok_or_else(|| {
                SemanticError::new(
                    target.line,
                    target.column,
                    format!("method '{}' has no return type", name),
                )
            })?;
            let value_ty = self.emit_expr(value)?;
            self.check_assignable(&return_type, &value_ty, value.line, value.column)?;
            self.emit_numeric_conversion(&value_ty, &return_type);
            return Ok(());
        }

        let target_ty = self.infer_type(target)?;
        let value_ty = self.emit_expr(value)?;
        self.check_assignable(&target_ty, &value_ty, value.line, value.column)?;
        self.emit_numeric_conversion(&value_ty, &target_ty);

        let (place_ty, place) = self.emit_place(target)?;
        match place {
            Place::Static { addr, bit } => {
                if let Some(bit) = bit {
                    self.emit_bit_store(addr, bit);
                } else {
                    self.emit_store_direct(addr, &place_ty);
                }
            }
            Place::Stack => {
                if place_ty.is_string() {
                    // stack is [src, dst]
                    self.emit("SCPY");
                } else if matches!(place_ty, Type::Elementary(ElementaryType::LReal)) {
                    self.emit("SWAP");
                    self.emit("F32TO64");
                    self.emit("SWAP");
                    self.emit("STOREIN64");
                } else {
                    let size = self.storage_size(&place_ty);
                    self.emit(store_indirect_op(size));
                }
            }
        }
        Ok(())
    }

    /// Read-modify-write of one bit in an I/O byte: the boolean value on
    /// the stack selects set or clear.
    fn emit_bit_store(&mut self, addr: u32, bit: u8) {
        let l_clear = self.next_label("bit_clear");
        let l_end = self.next_label("bit_end");
        self.emit(&format!("JZ {}", l_clear));
        self.emit(&format!("LOAD8 {}", addr));
        self.emit(&format!("PUSH8 {}", 1u8 << bit));
        self.emit("OR");
        self.emit(&format!("STORE8 {}", addr));
        self.emit(&format!("JMP {}", l_end));
        self.emit_label_line(&l_clear);
        self.emit(&format!("LOAD8 {}", addr));
        self.emit(&format!("PUSH8 {}", !(1u8 << bit)));
        self.emit("AND");
        self.emit(&format!("STORE8 {}", addr));
        self.emit_label_line(&l_end);
    }

    // ------------------------------------------------------------------
    // Conditionals
    // ------------------------------------------------------------------

    fn emit_if(
        &mut self,
        branches: &[(Expr, Vec<Statement>)],
        else_body: Option<&[Statement]>,
    ) -> Result<(), CompileError> {
        let l_end = self.next_label("if_end");
        for (condition, body) in branches {
            let l_next = self.next_label("if_next");
            self.emit_expr(condition)?;
            self.emit(&format!("JZ {}", l_next));
            for statement in body {
                self.emit_statement(statement)?;
            }
            self.emit(&format!("JMP {}", l_end));
            self.emit_label_line(&l_next);
        }
        if let Some(body) = else_body {
            for statement in body {
                self.emit_statement(statement)?;
            }
        }
        self.emit_label_line(&l_end);
        Ok(())
    }

    fn emit_case(
        &mut self,
        selector: &Expr,
        branches: &[crate::ast::CaseBranch],
        else_body: Option<&[Statement]>,
    ) -> Result<(), CompileError> {
        let l_end = self.next_label("case_end");
        self.emit_expr(selector)?;

        for branch in branches {
            let l_body = self.next_label("case_body");
            let l_next = self.next_label("case_next");
            for label in &branch.labels {
                match label {
                    CaseLabel::Value(value) => {
                        let v = self.case_constant(value)?;
                        self.emit("DUP");
                        self.emit(&push_int(v));
                        self.emit("EQ");
                        self.emit(&format!("JNZ {}", l_body));
                    }
                    CaseLabel::Range(lo, hi) => {
                        let lo = self.case_constant(lo)?;
                        let hi = self.case_constant(hi)?;
                        let l_skip = self.next_label("case_skip");
                        self.emit("DUP");
                        self.emit(&push_int(lo));
                        self.emit("GE");
                        self.emit(&format!("JZ {}", l_skip));
                        self.emit("DUP");
                        self.emit(&push_int(hi));
                        self.emit("LE");
                        self.emit(&format!("JNZ {}", l_body));
                        self.emit_label_line(&l_skip);
                    }
                }
            }
            self.emit(&format!("JMP {}", l_next));
            self.emit_label_line(&l_body);
            self.emit("DROP");
            for statement in &branch.body {
                self.emit_statement(statement)?;
            }
            self.emit(&format!("JMP {}", l_end));
            self.emit_label_line(&l_next);
        }

        // No branch matched: drop the selector, run ELSE if present.
        self.emit("DROP");
        if let Some(body) = else_body {
            for statement in body {
                self.emit_statement(statement)?;
            }
        }
        self.emit_label_line(&l_end);
        Ok(())
    }

    fn case_constant(&mut self, e: &Expr) -> Result<i64, CompileError> {
        self.symbols
            .const_eval(self.pou.as_deref(), e)
            .ok_or_else(|| {
                SemanticError::new(e.line, e.column, "CASE labels must be compile-time constants")
                    .into()
            })
    }

    // ------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------

    fn emit_while(&mut self, condition: &Expr, body: &[Statement]) -> Result<(), CompileError> {
        let l_test = self.next_label("while_test");
        let l_end = self.next_label("while_end");
        self.emit_label_line(&l_test);
        self.emit_expr(condition)?;
        self.emit(&format!("JZ {}", l_end));
        self.loop_stack.push(LoopContext {
            continue_label: l_test.clone(),
            exit_label: l_end.clone(),
        });
        for statement in body {
            self.emit_statement(statement)?;
        }
        self.loop_stack.pop();
        self.emit(&format!("JMP {}", l_test));
        self.emit_label_line(&l_end);
        Ok(())
    }

    fn emit_repeat(&mut self, body: &[Statement], until: &Expr) -> Result<(), CompileError> {
        let l_body = self.next_label("repeat_body");
        let l_until = self.next_label("repeat_until");
        let l_end = self.next_label("repeat_end");
        self.emit_label_line(&l_body);
        self.loop_stack.push(LoopContext {
            continue_label: l_until.clone(),
            exit_label: l_end.clone(),
        });
        for statement in body {
            self.emit_statement(statement)?;
        }
        self.loop_stack.pop();
        self.emit_label_line(&l_until);
        self.emit_expr(until)?;
        self.emit(&format!("JZ {}", l_body));
        self.emit_label_line(&l_end);
        Ok(())
    }

    fn emit_for(
        &mut self,
        counter: &str,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &[Statement],
        s: &Statement,
    ) -> Result<(), CompileError> {
        use super::expressions::IdentInfo;
        let info = self.resolve_ident(counter, s.line, s.column)?;
        let IdentInfo::Direct { addr, ty, bit: None } = info else {
            return Err(SemanticError::new(
                s.line,
                s.column,
                format!("FOR counter '{}' must be a plain integer variable", counter),
            )
            .into());
        };

        let l_test = self.next_label("for_test");
        let l_cont = self.next_label("for_cont");
        let l_end = self.next_label("for_end");

        let start_ty = self.emit_expr(start)?;
        self.check_assignable(&ty, &start_ty, start.line, start.column)?;
        self.emit_numeric_conversion(&start_ty, &ty);
        self.emit_store_direct(addr, &ty);

        // Loop test: counter > end exits, so the body runs while
        // counter <= end.
        self.emit_label_line(&l_test);
        self.emit_load_direct(addr, &ty, None);
        self.emit_expr(end)?;
        self.emit("GT");
        self.emit(&format!("JNZ {}", l_end));

        self.loop_stack.push(LoopContext {
            continue_label: l_cont.clone(),
            exit_label: l_end.clone(),
        });
        for statement in body {
            self.emit_statement(statement)?;
        }
        self.loop_stack.pop();

        self.emit_label_line(&l_cont);
        self.emit_load_direct(addr, &ty, None);
        match step {
            Some(step) => {
                self.emit_expr(step)?;
            }
            None => self.emit("PUSH8 1"),
        }
        self.emit("ADD");
        self.emit_store_direct(addr, &ty);
        self.emit(&format!("JMP {}", l_test));
        self.emit_label_line(&l_end);
        Ok(())
    }
}
