//! Recursive-descent parser for Structured Text.
//!
//! The top level cycles across `VAR_GLOBAL`, `FUNCTION`, `FUNCTION_BLOCK`,
//! `PROGRAM`, `TYPE` and `INTERFACE` sections until end of input.
//! Expressions use precedence climbing; primaries greedily consume a postfix
//! chain of member access, method calls, indexing and dereference.

use crate::ast::*;
use crate::error::{CompileError, ParseError};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::types::{ElementaryType, Type};

/// Tokenize and parse a full source string.
pub fn parse(source: &str) -> Result<CompilationUnit, CompileError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    Ok(parser.parse_unit()?)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Parser {
        Parser { tokens, pos: 0 }
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn bump(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn at_kw(&self, kw: &str) -> bool {
        self.current().is_keyword(kw)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let tok = self.current();
        ParseError::new(tok.line, tok.column, message)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(self.error_here(format!("expected {}, got '{}'", what, self.describe_current())))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), ParseError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected '{}', got '{}'", kw, self.describe_current())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<Token, ParseError> {
        self.expect(TokenKind::Identifier, what)
    }

    fn describe_current(&self) -> String {
        let tok = self.current();
        if tok.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            tok.text.clone()
        }
    }

    /// Consume `;` separators; at least one is required when `required`.
    fn semicolons(&mut self, required: bool) -> Result<(), ParseError> {
        if required && !self.at(TokenKind::Semicolon) {
            return Err(self.error_here(format!(
                "expected ';', got '{}'",
                self.describe_current()
            )));
        }
        while self.eat(TokenKind::Semicolon) {}
        Ok(())
    }

    // ------------------------------------------------------------------
    // Top level
    // ------------------------------------------------------------------

    pub fn parse_unit(&mut self) -> Result<CompilationUnit, ParseError> {
        let mut unit = CompilationUnit::default();
        loop {
            if self.at(TokenKind::Eof) {
                return Ok(unit);
            }
            if self.at_kw("VAR_GLOBAL") {
                unit.globals.push(self.parse_var_block()?);
            } else if self.at_kw("FUNCTION") {
                unit.functions.push(self.parse_function()?);
            } else if self.at_kw("FUNCTION_BLOCK") {
                unit.function_blocks.push(self.parse_function_block()?);
            } else if self.at_kw("PROGRAM") {
                unit.programs.push(self.parse_program()?);
            } else if self.at_kw("TYPE") {
                self.parse_type_defs(&mut unit.type_defs)?;
            } else if self.at_kw("INTERFACE") {
                unit.interfaces.push(self.parse_interface()?);
            } else {
                return Err(self.error_here(format!(
                    "expected a declaration (VAR_GLOBAL, FUNCTION, FUNCTION_BLOCK, PROGRAM, TYPE, INTERFACE), got '{}'",
                    self.describe_current()
                )));
            }
        }
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn parse_type(&mut self) -> Result<Type, ParseError> {
        if self.at_kw("ARRAY") {
            return self.parse_array_type();
        }
        if self.eat_kw("REF_TO") {
            let inner = self.parse_type()?;
            return Ok(Type::Pointer(Box::new(inner)));
        }
        let tok = self.bump();
        match tok.kind {
            TokenKind::Keyword => ElementaryType::from_name(&tok.text)
                .map(Type::Elementary)
                .ok_or_else(|| {
                    ParseError::new(tok.line, tok.column, format!("'{}' is not a type", tok.text))
                }),
            TokenKind::Identifier => Ok(Type::Named(tok.text)),
            _ => Err(ParseError::new(
                tok.line,
                tok.column,
                format!("expected a type, got '{}'", tok.text),
            )),
        }
    }

    fn parse_array_type(&mut self) -> Result<Type, ParseError> {
        self.expect_kw("ARRAY")?;
        self.expect(TokenKind::LBracket, "'['")?;
        let mut dims = Vec::new();
        loop {
            let (line, column) = {
                let t = self.current();
                (t.line, t.column)
            };
            let lower = self.parse_const_int()?;
            self.expect(TokenKind::DotDot, "'..'")?;
            let upper = self.parse_const_int()?;
            if upper < lower {
                return Err(ParseError::new(
                    line,
                    column,
                    format!("array bounds {}..{} have upper < lower", lower, upper),
                ));
            }
            dims.push((lower, upper));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        if dims.len() > 3 {
            return Err(self.error_here(format!(
                "too many array dimensions ({}), the VM supports at most 3",
                dims.len()
            )));
        }
        self.expect(TokenKind::RBracket, "']'")?;
        self.expect_kw("OF")?;
        let element = self.parse_type()?;
        Ok(Type::Array {
            element: Box::new(element),
            dims,
        })
    }

    /// Signed integer literal (array bounds, enum values).
    fn parse_const_int(&mut self) -> Result<i64, ParseError> {
        let negative = self.eat(TokenKind::Minus);
        let tok = self.expect(TokenKind::Integer, "an integer")?;
        let value = parse_int_text(&tok.text)
            .ok_or_else(|| ParseError::new(tok.line, tok.column, "integer literal out of range"))?;
        Ok(if negative { -value } else { value })
    }

    // ------------------------------------------------------------------
    // Variable blocks
    // ------------------------------------------------------------------

    fn parse_var_block(&mut self) -> Result<VarBlock, ParseError> {
        let section = if self.eat_kw("VAR_GLOBAL") {
            Section::VarGlobal
        } else if self.eat_kw("VAR_INPUT") {
            Section::VarInput
        } else if self.eat_kw("VAR_OUTPUT") {
            Section::VarOutput
        } else if self.eat_kw("VAR_IN_OUT") {
            Section::VarInOut
        } else if self.eat_kw("VAR_TEMP") {
            Section::VarTemp
        } else if self.eat_kw("VAR") {
            Section::Var
        } else {
            return Err(self.error_here("expected a VAR section"));
        };
        let constant = self.eat_kw("CONSTANT");
        let retain = self.eat_kw("RETAIN");

        let mut vars = Vec::new();
        while !self.at_kw("END_VAR") {
            self.parse_var_decls(&mut vars)?;
        }
        self.expect_kw("END_VAR")?;
        self.semicolons(false)?;
        Ok(VarBlock {
            section,
            constant,
            retain,
            vars,
        })
    }

    /// One declaration line: `a, b AT %Q0 : INT := 3;`
    /// (an `AT` binding is only meaningful for a single name).
    fn parse_var_decls(&mut self, out: &mut Vec<VarDecl>) -> Result<(), ParseError> {
        let mut names = Vec::new();
        loop {
            let tok = self.expect_ident("a variable name")?;
            names.push((tok.text, tok.line, tok.column));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        let io_at = if self.eat_kw("AT") {
            let addr = self.expect(TokenKind::IoAddress, "an I/O address")?;
            Some(addr.text)
        } else {
            None
        };

        self.expect(TokenKind::Colon, "':'")?;
        let ty = self.parse_type()?;
        let init = if self.eat(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.semicolons(true)?;

        for (name, line, column) in names {
            out.push(VarDecl {
                name,
                ty: ty.clone(),
                io_at: io_at.clone(),
                init: init.clone(),
                line,
                column,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // POUs
    // ------------------------------------------------------------------

    fn parse_function(&mut self) -> Result<FunctionDecl, ParseError> {
        let kw = self.current().clone();
        self.expect_kw("FUNCTION")?;
        let name = self.expect_ident("a function name")?.text;
        self.expect(TokenKind::Colon, "':' before the return type")?;
        let return_type = self.parse_type()?;
        self.semicolons(false)?;

        let mut var_blocks = Vec::new();
        while self.at_var_section() {
            var_blocks.push(self.parse_var_block()?);
        }
        let body = self.parse_statements(&["END_FUNCTION"])?;
        self.expect_kw("END_FUNCTION")?;
        self.semicolons(false)?;
        Ok(FunctionDecl {
            name,
            return_type,
            var_blocks,
            body,
            line: kw.line,
            column: kw.column,
        })
    }

    fn parse_program(&mut self) -> Result<ProgramDecl, ParseError> {
        let kw = self.current().clone();
        self.expect_kw("PROGRAM")?;
        let name = self.expect_ident("a program name")?.text;
        self.semicolons(false)?;

        let mut var_blocks = Vec::new();
        while self.at_var_section() {
            var_blocks.push(self.parse_var_block()?);
        }
        let body = self.parse_statements(&["END_PROGRAM"])?;
        self.expect_kw("END_PROGRAM")?;
        self.semicolons(false)?;
        Ok(ProgramDecl {
            name,
            var_blocks,
            body,
            line: kw.line,
            column: kw.column,
        })
    }

    fn at_var_section(&self) -> bool {
        ["VAR", "VAR_INPUT", "VAR_OUTPUT", "VAR_IN_OUT", "VAR_TEMP", "VAR_GLOBAL"]
            .iter()
            .any(|kw| self.at_kw(kw))
    }

    fn parse_function_block(&mut self) -> Result<FunctionBlockDecl, ParseError> {
        let kw = self.current().clone();
        self.expect_kw("FUNCTION_BLOCK")?;
        let name = self.expect_ident("a function block name")?.text;

        let extends = if self.eat_kw("EXTENDS") {
            Some(self.expect_ident("a base function block name")?.text)
        } else {
            None
        };
        let mut implements = Vec::new();
        if self.eat_kw("IMPLEMENTS") {
            loop {
                implements.push(self.expect_ident("an interface name")?.text);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.semicolons(false)?;

        let mut var_blocks = Vec::new();
        let mut methods = Vec::new();
        let mut body = Vec::new();
        loop {
            if self.at_kw("END_FUNCTION_BLOCK") {
                break;
            } else if self.at_var_section() {
                var_blocks.push(self.parse_var_block()?);
            } else if self.at_kw("METHOD") {
                methods.push(self.parse_method()?);
            } else {
                body.extend(self.parse_statements(&["END_FUNCTION_BLOCK", "METHOD"])?);
            }
        }
        self.expect_kw("END_FUNCTION_BLOCK")?;
        self.semicolons(false)?;
        Ok(FunctionBlockDecl {
            name,
            extends,
            implements,
            var_blocks,
            methods,
            body,
            line: kw.line,
            column: kw.column,
        })
    }

    fn parse_method(&mut self) -> Result<MethodDecl, ParseError> {
        let kw = self.current().clone();
        self.expect_kw("METHOD")?;

        let mut access = Access::Public;
        let mut is_abstract = false;
        let mut is_final = false;
        let mut is_override = false;
        loop {
            if self.eat_kw("PUBLIC") {
                access = Access::Public;
            } else if self.eat_kw("PRIVATE") {
                access = Access::Private;
            } else if self.eat_kw("PROTECTED") {
                access = Access::Protected;
            } else if self.eat_kw("ABSTRACT") {
                is_abstract = true;
            } else if self.eat_kw("FINAL") {
                is_final = true;
            } else if self.eat_kw("OVERRIDE") {
                is_override = true;
            } else {
                break;
            }
        }

        let name = self.expect_ident("a method name")?.text;
        let return_type = if self.eat(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.semicolons(false)?;

        let mut var_blocks = Vec::new();
        while self.at_var_section() {
            var_blocks.push(self.parse_var_block()?);
        }
        let body = self.parse_statements(&["END_METHOD"])?;
        self.expect_kw("END_METHOD")?;
        self.semicolons(false)?;
        Ok(MethodDecl {
            name,
            return_type,
            access,
            is_abstract,
            is_final,
            is_override,
            var_blocks,
            body,
            line: kw.line,
            column: kw.column,
        })
    }

    fn parse_interface(&mut self) -> Result<InterfaceDecl, ParseError> {
        let kw = self.current().clone();
        self.expect_kw("INTERFACE")?;
        let name = self.expect_ident("an interface name")?.text;
        let mut extends = Vec::new();
        if self.eat_kw("EXTENDS") {
            loop {
                extends.push(self.expect_ident("a base interface name")?.text);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.semicolons(false)?;

        let mut methods = Vec::new();
        while self.at_kw("METHOD") {
            methods.push(self.parse_method_signature()?);
        }
        self.expect_kw("END_INTERFACE")?;
        self.semicolons(false)?;
        Ok(InterfaceDecl {
            name,
            extends,
            methods,
            line: kw.line,
            column: kw.column,
        })
    }

    fn parse_method_signature(&mut self) -> Result<MethodSignature, ParseError> {
        let kw = self.current().clone();
        self.expect_kw("METHOD")?;
        let name = self.expect_ident("a method name")?.text;
        let return_type = if self.eat(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.semicolons(false)?;

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        while self.at_var_section() {
            let block = self.parse_var_block()?;
            let sink = match block.section {
                Section::VarInput => &mut inputs,
                Section::VarOutput => &mut outputs,
                other => {
                    return Err(ParseError::new(
                        kw.line,
                        kw.column,
                        format!(
                            "interface method '{}' may only declare VAR_INPUT/VAR_OUTPUT, found {}",
                            name,
                            other.keyword()
                        ),
                    ));
                }
            };
            for var in block.vars {
                sink.push((var.name, var.ty));
            }
        }
        self.expect_kw("END_METHOD")?;
        self.semicolons(false)?;
        Ok(MethodSignature {
            name,
            return_type,
            inputs,
            outputs,
            line: kw.line,
            column: kw.column,
        })
    }

    // ------------------------------------------------------------------
    // TYPE definitions
    // ------------------------------------------------------------------

    fn parse_type_defs(&mut self, out: &mut Vec<TypeDef>) -> Result<(), ParseError> {
        self.expect_kw("TYPE")?;
        while !self.at_kw("END_TYPE") {
            let name_tok = self.expect_ident("a type name")?;
            self.expect(TokenKind::Colon, "':'")?;
            if self.at_kw("STRUCT") {
                self.expect_kw("STRUCT")?;
                let mut members = Vec::new();
                while !self.at_kw("END_STRUCT") {
                    self.parse_var_decls(&mut members)?;
                }
                self.expect_kw("END_STRUCT")?;
                self.semicolons(false)?;
                out.push(TypeDef::Struct(StructDecl {
                    name: name_tok.text,
                    members,
                    line: name_tok.line,
                    column: name_tok.column,
                }));
            } else if self.at(TokenKind::LParen) {
                self.bump();
                let mut values = Vec::new();
                loop {
                    let value_name = self.expect_ident("an enum value name")?.text;
                    let explicit = if self.eat(TokenKind::Assign) {
                        Some(self.parse_const_int()?)
                    } else {
                        None
                    };
                    values.push((value_name, explicit));
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen, "')'")?;
                // Optional underlying integer type after the value list.
                let base = if self.at(TokenKind::Keyword)
                    && ElementaryType::from_name(&self.current().text).is_some()
                {
                    self.parse_type()?
                } else {
                    Type::DINT
                };
                self.semicolons(true)?;
                out.push(TypeDef::Enum(EnumDecl {
                    name: name_tok.text,
                    base,
                    values,
                    line: name_tok.line,
                    column: name_tok.column,
                }));
            } else {
                return Err(self.error_here(
                    "expected STRUCT or an enum value list in TYPE definition",
                ));
            }
        }
        self.expect_kw("END_TYPE")?;
        self.semicolons(false)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statements(&mut self, terminators: &[&str]) -> Result<Vec<Statement>, ParseError> {
        let mut body = Vec::new();
        loop {
            if self.at(TokenKind::Eof) || terminators.iter().any(|kw| self.at_kw(kw)) {
                return Ok(body);
            }
            body.push(self.parse_statement()?);
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let tok = self.current().clone();
        let (line, column) = (tok.line, tok.column);

        if tok.kind == TokenKind::Keyword {
            match tok.text.as_str() {
                "IF" => return self.parse_if(),
                "WHILE" => return self.parse_while(),
                "FOR" => return self.parse_for(),
                "REPEAT" => return self.parse_repeat(),
                "CASE" => return self.parse_case(),
                "EXIT" => {
                    self.bump();
                    self.semicolons(true)?;
                    return Ok(Statement::new(StatementKind::Exit, line, column));
                }
                "CONTINUE" => {
                    self.bump();
                    self.semicolons(true)?;
                    return Ok(Statement::new(StatementKind::Continue, line, column));
                }
                "RETURN" => {
                    self.bump();
                    self.semicolons(true)?;
                    return Ok(Statement::new(StatementKind::Return, line, column));
                }
                "THIS" => return self.parse_assignment_or_call(),
                other => {
                    return Err(self.error_here(format!("unexpected '{}' at statement start", other)));
                }
            }
        }

        if tok.kind == TokenKind::Identifier {
            // identifier followed by '(' is a function-block invocation
            if self.peek(1).kind == TokenKind::LParen {
                return self.parse_fb_call();
            }
            return self.parse_assignment_or_call();
        }

        Err(self.error_here(format!(
            "expected a statement, got '{}'",
            self.describe_current()
        )))
    }

    /// Assignment (`target := value;`) or a method call in statement
    /// position (`inst.Method(...);`).
    fn parse_assignment_or_call(&mut self) -> Result<Statement, ParseError> {
        let tok = self.current().clone();
        let target = self.parse_postfix()?;
        if self.eat(TokenKind::Assign) {
            let value = self.parse_expression()?;
            self.semicolons(true)?;
            return Ok(Statement::new(
                StatementKind::Assign { target, value },
                tok.line,
                tok.column,
            ));
        }
        if matches!(target.kind, ExprKind::MethodCall { .. }) {
            self.semicolons(true)?;
            return Ok(Statement::new(
                StatementKind::MethodCall(target),
                tok.line,
                tok.column,
            ));
        }
        Err(self.error_here(format!(
            "expected ':=' after assignment target, got '{}'",
            self.describe_current()
        )))
    }

    /// `inst(IN := x, PT := T#1s);`
    fn parse_fb_call(&mut self) -> Result<Statement, ParseError> {
        let name_tok = self.expect_ident("an instance name")?;
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.at(TokenKind::RParen) {
            loop {
                let arg_name = self.expect_ident("a parameter name")?.text;
                self.expect(TokenKind::Assign, "':=' after the parameter name")?;
                let value = self.parse_expression()?;
                args.push((arg_name, value));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        self.semicolons(true)?;
        Ok(Statement::new(
            StatementKind::FbCall {
                instance: name_tok.text,
                args,
            },
            name_tok.line,
            name_tok.column,
        ))
    }

    fn parse_if(&mut self) -> Result<Statement, ParseError> {
        let kw = self.current().clone();
        self.expect_kw("IF")?;
        let mut branches = Vec::new();
        let condition = self.parse_expression()?;
        self.expect_kw("THEN")?;
        let body = self.parse_statements(&["ELSIF", "ELSE", "END_IF"])?;
        branches.push((condition, body));
        let mut else_body = None;
        loop {
            if self.eat_kw("ELSIF") {
                let condition = self.parse_expression()?;
                self.expect_kw("THEN")?;
                let body = self.parse_statements(&["ELSIF", "ELSE", "END_IF"])?;
                branches.push((condition, body));
            } else if self.eat_kw("ELSE") {
                else_body = Some(self.parse_statements(&["END_IF"])?);
                break;
            } else {
                break;
            }
        }
        self.expect_kw("END_IF")?;
        self.semicolons(false)?;
        Ok(Statement::new(
            StatementKind::If {
                branches,
                else_body,
            },
            kw.line,
            kw.column,
        ))
    }

    fn parse_while(&mut self) -> Result<Statement, ParseError> {
        let kw = self.current().clone();
        self.expect_kw("WHILE")?;
        let condition = self.parse_expression()?;
        self.expect_kw("DO")?;
        let body = self.parse_statements(&["END_WHILE"])?;
        self.expect_kw("END_WHILE")?;
        self.semicolons(false)?;
        Ok(Statement::new(
            StatementKind::While { condition, body },
            kw.line,
            kw.column,
        ))
    }

    fn parse_for(&mut self) -> Result<Statement, ParseError> {
        let kw = self.current().clone();
        self.expect_kw("FOR")?;
        let counter = self.expect_ident("a loop counter")?.text;
        self.expect(TokenKind::Assign, "':='")?;
        let start = self.parse_expression()?;
        self.expect_kw("TO")?;
        let end = self.parse_expression()?;
        let step = if self.eat_kw("BY") {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect_kw("DO")?;
        let body = self.parse_statements(&["END_FOR"])?;
        self.expect_kw("END_FOR")?;
        self.semicolons(false)?;
        Ok(Statement::new(
            StatementKind::For {
                counter,
                start,
                end,
                step,
                body,
            },
            kw.line,
            kw.column,
        ))
    }

    fn parse_repeat(&mut self) -> Result<Statement, ParseError> {
        let kw = self.current().clone();
        self.expect_kw("REPEAT")?;
        let body = self.parse_statements(&["UNTIL"])?;
        self.expect_kw("UNTIL")?;
        let until = self.parse_expression()?;
        self.expect_kw("END_REPEAT")?;
        self.semicolons(false)?;
        Ok(Statement::new(
            StatementKind::Repeat { body, until },
            kw.line,
            kw.column,
        ))
    }

    fn parse_case(&mut self) -> Result<Statement, ParseError> {
        let kw = self.current().clone();
        self.expect_kw("CASE")?;
        let selector = self.parse_expression()?;
        self.expect_kw("OF")?;

        let mut branches = Vec::new();
        let mut else_body = None;
        loop {
            if self.at_kw("END_CASE") {
                break;
            }
            if self.eat_kw("ELSE") {
                else_body = Some(self.parse_statements(&["END_CASE"])?);
                break;
            }
            let mut labels = Vec::new();
            loop {
                let first = self.parse_expression()?;
                if self.eat(TokenKind::DotDot) {
                    let last = self.parse_expression()?;
                    labels.push(CaseLabel::Range(first, last));
                } else {
                    labels.push(CaseLabel::Value(first));
                }
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Colon, "':' after case labels")?;
            let mut body = Vec::new();
            loop {
                if self.at(TokenKind::Eof)
                    || self.at_kw("END_CASE")
                    || self.at_kw("ELSE")
                    || self.at_case_label()
                {
                    break;
                }
                body.push(self.parse_statement()?);
            }
            branches.push(CaseBranch { labels, body });
        }
        self.expect_kw("END_CASE")?;
        self.semicolons(false)?;
        Ok(Statement::new(
            StatementKind::Case {
                selector,
                branches,
                else_body,
            },
            kw.line,
            kw.column,
        ))
    }

    /// Lookahead: does the current position start a new case label?
    /// Labels begin with a constant (integer, negative integer, typed
    /// literal, TRUE/FALSE) or an identifier directly followed by `:`,
    /// `,` or `..` — statements never do.
    fn at_case_label(&self) -> bool {
        match self.current().kind {
            TokenKind::Integer
            | TokenKind::Minus
            | TokenKind::TimeLiteral
            | TokenKind::DateLiteral
            | TokenKind::TodLiteral
            | TokenKind::DtLiteral => true,
            TokenKind::Keyword => self.at_kw("TRUE") || self.at_kw("FALSE"),
            TokenKind::Identifier => matches!(
                self.peek(1).kind,
                TokenKind::Colon | TokenKind::Comma | TokenKind::DotDot
            ),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Expressions (precedence climbing)
    // ------------------------------------------------------------------

    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_xor()?;
        while self.at_kw("OR") {
            let tok = self.bump();
            let rhs = self.parse_xor()?;
            lhs = binary(BinaryOp::Or, lhs, rhs, &tok);
        }
        Ok(lhs)
    }

    fn parse_xor(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.at_kw("XOR") {
            let tok = self.bump();
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Xor, lhs, rhs, &tok);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_comparison()?;
        while self.at_kw("AND") {
            let tok = self.bump();
            let rhs = self.parse_comparison()?;
            lhs = binary(BinaryOp::And, lhs, rhs, &tok);
        }
        Ok(lhs)
    }

    /// Comparisons are non-associative: at most one per chain.
    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_additive()?;
        let op = match self.current().kind {
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::Neq => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        let tok = self.bump();
        let rhs = self.parse_additive()?;
        Ok(binary(op, lhs, rhs, &tok))
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            let tok = self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs, &tok);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.at(TokenKind::Star) {
                BinaryOp::Mul
            } else if self.at(TokenKind::Slash) {
                BinaryOp::Div
            } else if self.at_kw("MOD") {
                BinaryOp::Mod
            } else {
                return Ok(lhs);
            };
            let tok = self.bump();
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs, &tok);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.at_kw("NOT") {
            let tok = self.bump();
            let operand = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                tok.line,
                tok.column,
            ));
        }
        if self.at(TokenKind::Minus) {
            let tok = self.bump();
            let operand = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                tok.line,
                tok.column,
            ));
        }
        self.parse_postfix()
    }

    /// Primary expression followed by a greedy postfix chain:
    /// `.name`, `.name(args)`, `[i,j,k]`, `^`.
    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.at(TokenKind::Dot) {
                self.bump();
                let name_tok = self.expect_ident("a member name")?;
                if self.at(TokenKind::LParen) {
                    let args = self.parse_call_args()?;
                    expr = Expr::new(
                        ExprKind::MethodCall {
                            base: Box::new(expr),
                            method: name_tok.text,
                            args,
                        },
                        name_tok.line,
                        name_tok.column,
                    );
                } else {
                    expr = Expr::new(
                        ExprKind::Member {
                            base: Box::new(expr),
                            name: name_tok.text,
                        },
                        name_tok.line,
                        name_tok.column,
                    );
                }
            } else if self.at(TokenKind::LBracket) {
                let tok = self.bump();
                let mut indices = Vec::new();
                loop {
                    indices.push(self.parse_expression()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                if indices.len() > 3 {
                    return Err(ParseError::new(
                        tok.line,
                        tok.column,
                        format!("too many array indices ({}), at most 3 supported", indices.len()),
                    ));
                }
                self.expect(TokenKind::RBracket, "']'")?;
                expr = Expr::new(
                    ExprKind::Index {
                        base: Box::new(expr),
                        indices,
                    },
                    tok.line,
                    tok.column,
                );
            } else if self.at(TokenKind::Caret) {
                let tok = self.bump();
                expr = Expr::new(ExprKind::Deref(Box::new(expr)), tok.line, tok.column);
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.current().clone();
        let (line, column) = (tok.line, tok.column);
        match tok.kind {
            TokenKind::Integer => {
                self.bump();
                let value = parse_int_text(&tok.text).ok_or_else(|| {
                    ParseError::new(line, column, "integer literal out of range")
                })?;
                Ok(Expr::new(ExprKind::IntLit(value), line, column))
            }
            TokenKind::Real => {
                self.bump();
                let value: f64 = tok.text.parse().map_err(|_| {
                    ParseError::new(line, column, format!("malformed real literal '{}'", tok.text))
                })?;
                Ok(Expr::new(ExprKind::RealLit(value), line, column))
            }
            TokenKind::TimeLiteral => {
                self.bump();
                Ok(Expr::new(
                    ExprKind::TimeLit(tok.text.parse().unwrap_or(0)),
                    line,
                    column,
                ))
            }
            TokenKind::DateLiteral => {
                self.bump();
                Ok(Expr::new(
                    ExprKind::DateLit(tok.text.parse().unwrap_or(0)),
                    line,
                    column,
                ))
            }
            TokenKind::TodLiteral => {
                self.bump();
                Ok(Expr::new(
                    ExprKind::TodLit(tok.text.parse().unwrap_or(0)),
                    line,
                    column,
                ))
            }
            TokenKind::DtLiteral => {
                self.bump();
                Ok(Expr::new(
                    ExprKind::DtLit(tok.text.parse().unwrap_or(0)),
                    line,
                    column,
                ))
            }
            TokenKind::StringLiteral => {
                self.bump();
                Ok(Expr::new(
                    ExprKind::StringLit {
                        value: tok.text,
                        wide: false,
                    },
                    line,
                    column,
                ))
            }
            TokenKind::WStringLiteral => {
                self.bump();
                Ok(Expr::new(
                    ExprKind::StringLit {
                        value: tok.text,
                        wide: true,
                    },
                    line,
                    column,
                ))
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Keyword => match tok.text.as_str() {
                "TRUE" => {
                    self.bump();
                    Ok(Expr::new(ExprKind::BoolLit(true), line, column))
                }
                "FALSE" => {
                    self.bump();
                    Ok(Expr::new(ExprKind::BoolLit(false), line, column))
                }
                "THIS" => {
                    self.bump();
                    Ok(Expr::new(ExprKind::This, line, column))
                }
                "REF" => {
                    self.bump();
                    self.expect(TokenKind::LParen, "'(' after REF")?;
                    let inner = self.parse_expression()?;
                    self.expect(TokenKind::RParen, "')'")?;
                    Ok(Expr::new(ExprKind::AddrOf(Box::new(inner)), line, column))
                }
                other => Err(ParseError::new(
                    line,
                    column,
                    format!("unexpected '{}' in expression", other),
                )),
            },
            TokenKind::Identifier => {
                self.bump();
                if self.at(TokenKind::LParen) {
                    let args = self.parse_call_args()?;
                    Ok(Expr::new(
                        ExprKind::Call {
                            name: tok.text,
                            args,
                        },
                        line,
                        column,
                    ))
                } else {
                    Ok(Expr::new(ExprKind::Ident(tok.text), line, column))
                }
            }
            _ => Err(ParseError::new(
                line,
                column,
                format!("unexpected '{}' in expression", self.describe_current()),
            )),
        }
    }

    /// `(expr, name := expr, ...)` — positional and named arguments may mix.
    fn parse_call_args(&mut self) -> Result<Vec<CallArg>, ParseError> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.at(TokenKind::RParen) {
            loop {
                if self.at(TokenKind::Identifier) && self.peek(1).kind == TokenKind::Assign {
                    let name = self.bump().text;
                    self.bump(); // :=
                    let value = self.parse_expression()?;
                    args.push(CallArg {
                        name: Some(name),
                        value,
                    });
                } else {
                    let value = self.parse_expression()?;
                    args.push(CallArg { name: None, value });
                }
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(args)
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, tok: &Token) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        tok.line,
        tok.column,
    )
}

fn parse_int_text(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> CompilationUnit {
        parse(source).unwrap()
    }

    #[test]
    fn test_parse_minimal_program() {
        let unit = parse_ok(
            "PROGRAM P VAR a : INT := 3; b : INT; END_VAR b := a + 4; END_PROGRAM",
        );
        assert_eq!(unit.programs.len(), 1);
        let p = &unit.programs[0];
        assert_eq!(p.name, "P");
        assert_eq!(p.var_blocks[0].vars.len(), 2);
        assert_eq!(p.body.len(), 1);
        match &p.body[0].kind {
            StatementKind::Assign { value, .. } => match &value.kind {
                ExprKind::Binary { op, .. } => assert_eq!(*op, BinaryOp::Add),
                other => panic!("expected binary add, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let unit = parse_ok("PROGRAM P VAR a : BOOL; END_VAR a := 1 + 2 * 3 < 10 AND TRUE; END_PROGRAM");
        // AND binds looser than comparison: (((1 + (2*3)) < 10) AND TRUE)
        let StatementKind::Assign { value, .. } = &unit.programs[0].body[0].kind else {
            panic!()
        };
        let ExprKind::Binary { op, lhs, .. } = &value.kind else { panic!() };
        assert_eq!(*op, BinaryOp::And);
        let ExprKind::Binary { op: cmp, .. } = &lhs.kind else { panic!() };
        assert_eq!(*cmp, BinaryOp::Lt);
    }

    #[test]
    fn test_postfix_chain() {
        let unit = parse_ok("PROGRAM P VAR x : INT; END_VAR x := a.b[1,2].c^; END_PROGRAM");
        let StatementKind::Assign { value, .. } = &unit.programs[0].body[0].kind else {
            panic!()
        };
        let ExprKind::Deref(inner) = &value.kind else { panic!("expected deref") };
        let ExprKind::Member { name, .. } = &inner.kind else { panic!("expected member") };
        assert_eq!(name, "c");
    }

    #[test]
    fn test_method_call_args() {
        let unit =
            parse_ok("PROGRAM P VAR x : INT; END_VAR x := drive.Start(5, speed := 10); END_PROGRAM");
        let StatementKind::Assign { value, .. } = &unit.programs[0].body[0].kind else {
            panic!()
        };
        let ExprKind::MethodCall { method, args, .. } = &value.kind else { panic!() };
        assert_eq!(method, "Start");
        assert_eq!(args.len(), 2);
        assert!(args[0].name.is_none());
        assert_eq!(args[1].name.as_deref(), Some("speed"));
    }

    #[test]
    fn test_fb_call_statement() {
        let unit = parse_ok("PROGRAM P VAR t : TON; END_VAR t(IN := TRUE, PT := T#1s); END_PROGRAM");
        let StatementKind::FbCall { instance, args } = &unit.programs[0].body[0].kind else {
            panic!()
        };
        assert_eq!(instance, "t");
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].0, "IN");
    }

    #[test]
    fn test_control_flow() {
        let unit = parse_ok(
            "PROGRAM P VAR i : INT; s : INT; END_VAR
             FOR i := 1 TO 10 BY 2 DO
               IF i > 5 THEN EXIT; ELSIF i = 3 THEN CONTINUE; ELSE s := s + i; END_IF
             END_FOR
             REPEAT s := s - 1; UNTIL s <= 0 END_REPEAT
             WHILE s < 100 DO s := s * 2; END_WHILE
             END_PROGRAM",
        );
        assert_eq!(unit.programs[0].body.len(), 3);
    }

    #[test]
    fn test_case_labels() {
        let unit = parse_ok(
            "PROGRAM P VAR x : INT; y : INT; END_VAR
             CASE x OF
               1: y := 1;
               2, 3: y := 2;
               4..6: y := 3;
             ELSE
               y := 0;
             END_CASE
             END_PROGRAM",
        );
        let StatementKind::Case {
            branches,
            else_body,
            ..
        } = &unit.programs[0].body[0].kind
        else {
            panic!()
        };
        assert_eq!(branches.len(), 3);
        assert_eq!(branches[1].labels.len(), 2);
        assert!(matches!(branches[2].labels[0], CaseLabel::Range(..)));
        assert!(else_body.is_some());
    }

    #[test]
    fn test_function_block_with_method() {
        let unit = parse_ok(
            "FUNCTION_BLOCK Motor EXTENDS Device IMPLEMENTS IMotor, INamed
             VAR_INPUT enable : BOOL; END_VAR
             VAR speed : INT; END_VAR
             METHOD PUBLIC OVERRIDE Start : BOOL
               VAR_INPUT target : INT; END_VAR
               Start := TRUE;
             END_METHOD
             speed := 0;
             END_FUNCTION_BLOCK",
        );
        let fb = &unit.function_blocks[0];
        assert_eq!(fb.extends.as_deref(), Some("Device"));
        assert_eq!(fb.implements, ["IMotor", "INamed"]);
        assert_eq!(fb.methods.len(), 1);
        assert!(fb.methods[0].is_override);
        assert_eq!(fb.body.len(), 1);
    }

    #[test]
    fn test_interface() {
        let unit = parse_ok(
            "INTERFACE IMotor
             METHOD Start : BOOL VAR_INPUT target : INT; END_VAR END_METHOD
             METHOD Stop END_METHOD
             END_INTERFACE",
        );
        let iface = &unit.interfaces[0];
        assert_eq!(iface.methods.len(), 2);
        assert_eq!(iface.methods[0].inputs.len(), 1);
        assert!(iface.methods[1].return_type.is_none());
    }

    #[test]
    fn test_type_defs() {
        let unit = parse_ok(
            "TYPE
               Point : STRUCT x : REAL; y : REAL; END_STRUCT;
               Color : (Red, Green := 5, Blue);
             END_TYPE",
        );
        assert_eq!(unit.type_defs.len(), 2);
        match &unit.type_defs[1] {
            TypeDef::Enum(e) => {
                assert_eq!(e.values[1], ("Green".to_string(), Some(5)));
                assert_eq!(e.values[2], ("Blue".to_string(), None));
            }
            other => panic!("expected enum, got {:?}", other),
        }
    }

    #[test]
    fn test_array_types() {
        let unit = parse_ok(
            "VAR_GLOBAL grid : ARRAY[0..9, -1..1] OF INT; p : REF_TO REAL; END_VAR",
        );
        let vars = &unit.globals[0].vars;
        match &vars[0].ty {
            Type::Array { dims, .. } => assert_eq!(dims, &[(0, 9), (-1, 1)]),
            other => panic!("expected array, got {:?}", other),
        }
        assert!(matches!(vars[1].ty, Type::Pointer(_)));
    }

    #[test]
    fn test_bad_array_bounds() {
        let err = parse("VAR_GLOBAL a : ARRAY[5..1] OF INT; END_VAR").unwrap_err();
        assert!(err.to_string().contains("upper < lower"));
        let err = parse("VAR_GLOBAL a : ARRAY[0..1,0..1,0..1,0..1] OF INT; END_VAR").unwrap_err();
        assert!(err.to_string().contains("too many array dimensions"));
    }

    #[test]
    fn test_io_binding() {
        let unit = parse_ok("VAR_GLOBAL sensor AT %I0 : BOOL; lamp AT %QX1.3 : BOOL; END_VAR");
        assert_eq!(unit.globals[0].vars[0].io_at.as_deref(), Some("%I0"));
        assert_eq!(unit.globals[0].vars[1].io_at.as_deref(), Some("%QX1.3"));
    }

    #[test]
    fn test_missing_semicolon() {
        let err = parse("PROGRAM P VAR a : INT; END_VAR a := 1 END_PROGRAM").unwrap_err();
        assert!(err.to_string().contains("expected ';'"));
    }
}
