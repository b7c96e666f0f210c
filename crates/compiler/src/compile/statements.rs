//! Declarations and statements
//!
//! Statement parselets consume their form and leave both stacks balanced.
//! Loops and `match` install a `BreakContext`; `break`/`continue` emit scope
//! exits down to the context's depth before their forward jump, and the
//! jumps are patched when the construct closes.

use super::expressions::unquote;
use super::{BreakContext, BreakKind, Compiler, FunctionKind};
use crate::pattern::{self, Pattern};
use erkao_core::{Op, ObjRef, TokenKind, Value};

impl Compiler<'_> {
    pub(crate) fn declaration(&mut self) {
        let config = self.config;
        let mut handled = false;
        for plugin in config.plugins() {
            if plugin.parse_statement(self) {
                handled = true;
                break;
            }
        }
        if !handled {
            if self.matches(TokenKind::Let) {
                self.let_declaration(false);
            } else if self.matches(TokenKind::Const) {
                self.let_declaration(true);
            } else if self.matches(TokenKind::Fun) {
                self.fun_declaration();
            } else if self.matches(TokenKind::Class) {
                self.class_declaration();
            } else if self.matches(TokenKind::Enum) {
                self.enum_declaration();
            } else if self.matches(TokenKind::Import) {
                self.import_statement();
            } else if self.matches(TokenKind::Export) {
                self.export_statement();
            } else if self.matches(TokenKind::Private) {
                self.private_statement();
            } else {
                self.statement();
            }
        }
        // Yield point between statements.
        self.emit_op(Op::Gc);
        if self.panic_mode {
            self.synchronize();
        }
    }

    pub(crate) fn statement(&mut self) {
        if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::Match) {
            self.match_statement();
        } else if self.matches(TokenKind::Break) {
            self.break_statement();
        } else if self.matches(TokenKind::Continue) {
            self.continue_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::Throw) {
            self.throw_statement();
        } else if self.matches(TokenKind::Try) {
            self.try_statement();
        } else if self.matches(TokenKind::Defer) {
            self.defer_statement();
        } else if self.matches(TokenKind::Yield) {
            self.yield_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.checker.pop();
        self.emit_op(Op::Pop);
        self.consume(TokenKind::Semicolon, "Expect ';' after expression");
    }

    // ----- variable declarations -----

    pub(crate) fn let_declaration(&mut self, is_const: bool) -> Option<String> {
        if self.check(TokenKind::LeftBracket) || self.check(TokenKind::LeftBrace) {
            // Destructuring: failure throws.
            let pat = pattern::parse_pattern(self);
            self.consume(TokenKind::Equal, "Expect '=' after pattern");
            self.expression();
            self.checker.pop();
            pattern::lower_destructuring(self, &pat, is_const);
            self.consume(TokenKind::Semicolon, "Expect ';' after declaration");
            return None;
        }

        self.consume(TokenKind::Identifier, "Expect variable name");
        let name = self.previous().lexeme.clone();
        let index = self.name_constant(&name);
        if self.matches(TokenKind::Equal) {
            self.expression();
            self.checker.pop();
        } else if is_const {
            self.error("Const declaration requires an initializer");
            self.emit_op(Op::Null);
        } else {
            self.emit_op(Op::Null);
        }
        self.emit_op(if is_const { Op::DefineConst } else { Op::DefineVar });
        self.emit_short(index);
        self.consume(TokenKind::Semicolon, "Expect ';' after declaration");
        Some(name)
    }

    // ----- functions -----

    pub(crate) fn fun_declaration(&mut self) -> Option<String> {
        self.consume(TokenKind::Identifier, "Expect function name");
        let name = self.previous().lexeme.clone();
        let index = self.name_constant(&name);
        let proto = compile_function(self, FunctionKind::Function, Some(name.clone()));
        let constant = self.make_constant(Value::Obj(proto));
        self.emit_op(Op::Closure);
        self.emit_short(constant);
        self.emit_op(Op::DefineVar);
        self.emit_short(index);
        Some(name)
    }

    // ----- classes -----

    pub(crate) fn class_declaration(&mut self) -> Option<String> {
        self.consume(TokenKind::Identifier, "Expect class name");
        let name = self.previous().lexeme.clone();
        let index = self.name_constant(&name);
        let name_ref = self.vm.intern(&name);
        let class = self.vm.alloc_class(name_ref);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.consume(TokenKind::Identifier, "Expect method name");
            let method_name = self.previous().lexeme.clone();
            let kind = if method_name == "init" {
                FunctionKind::Initializer
            } else {
                FunctionKind::Method
            };
            let proto = compile_function(self, kind, Some(method_name.clone()));
            let method_ref = self.vm.intern(&method_name);
            self.vm
                .heap
                .class_add_method(class, method_ref, Value::Obj(proto));
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body");
        self.emit_constant(Value::Obj(class));
        self.emit_op(Op::DefineVar);
        self.emit_short(index);
        Some(name)
    }

    // ----- enums -----

    pub(crate) fn enum_declaration(&mut self) -> Option<String> {
        self.consume(TokenKind::Identifier, "Expect enum name");
        let name = self.previous().lexeme.clone();
        let index = self.name_constant(&name);
        let enum_ref = self.vm.intern(&name);
        let enum_map = self.vm.heap.alloc_map();

        let mut variants: Vec<(String, u8)> = Vec::new();
        self.consume(TokenKind::LeftBrace, "Expect '{' before enum body");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.consume(TokenKind::Identifier, "Expect variant name");
            let variant = self.previous().lexeme.clone();
            if variants.iter().any(|(v, _)| *v == variant) {
                self.compile_error("Duplicate enum variant");
            }
            let mut arity: u8 = 0;
            if self.matches(TokenKind::LeftParen) {
                while !self.check(TokenKind::RightParen) && !self.check(TokenKind::Eof) {
                    self.consume(TokenKind::Identifier, "Expect payload name");
                    if arity == u8::MAX {
                        self.compile_error("Too many enum payload fields");
                    } else {
                        arity += 1;
                    }
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                self.consume(TokenKind::RightParen, "Expect ')' after payload names");
            }

            let variant_ref = self.vm.intern(&variant);
            let value = if arity > 0 {
                Value::Obj(self.vm.alloc_enum_ctor(enum_ref, variant_ref, arity))
            } else {
                // Payload-free variants are singleton `{name, values}` maps.
                let tag = format!("{}.{}", name, variant);
                let tag_ref = self.vm.intern(&tag);
                let values = self.vm.heap.alloc_array(Vec::new());
                let singleton = self.vm.heap.alloc_map();
                let name_key = self.vm.intern("name");
                self.vm.heap.map_set(singleton, name_key, Value::Obj(tag_ref));
                let values_key = self.vm.intern("values");
                self.vm.heap.map_set(singleton, values_key, Value::Obj(values));
                Value::Obj(singleton)
            };
            self.vm.heap.map_set(enum_map, variant_ref, value);
            variants.push((variant, arity));

            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after enum body");

        let is_adt = variants.iter().any(|(_, arity)| *arity > 0);
        self.enums.insert(
            name.clone(),
            super::EnumInfo {
                variants,
                is_adt,
            },
        );
        self.emit_constant(Value::Obj(enum_map));
        self.emit_op(Op::DefineConst);
        self.emit_short(index);
        Some(name)
    }

    // ----- modules -----

    fn import_statement(&mut self) {
        self.consume(TokenKind::String, "Expect module path string");
        let path = unquote(&self.previous().lexeme);
        let path_ref = self.vm.intern(&path);
        self.emit_constant(Value::Obj(path_ref));
        if self.matches(TokenKind::As) {
            self.consume(TokenKind::Identifier, "Expect alias after 'as'");
            let alias = self.previous().lexeme.clone();
            let alias_index = self.name_constant(&alias);
            self.emit_op(Op::Import);
            self.emit_byte(1);
            self.emit_short(alias_index);
        } else {
            self.emit_op(Op::Import);
            self.emit_byte(0);
            self.emit_short(0);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after import");
    }

    fn export_statement(&mut self) {
        if self.matches(TokenKind::Default) {
            self.expression();
            self.checker.pop();
            let index = self.name_constant("default");
            self.emit_op(Op::ExportValue);
            self.emit_short(index);
            self.consume(TokenKind::Semicolon, "Expect ';' after export");
            return;
        }

        if self.matches(TokenKind::LeftBrace) {
            let mut pairs: Vec<(u16, u16)> = Vec::new();
            loop {
                self.consume(TokenKind::Identifier, "Expect export name");
                let from = self.name_constant(&self.previous().lexeme.clone());
                let to = if self.matches(TokenKind::As) {
                    self.consume(TokenKind::Identifier, "Expect name after 'as'");
                    self.name_constant(&self.previous().lexeme.clone())
                } else {
                    from
                };
                pairs.push((from, to));
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::RightBrace, "Expect '}' after export list");

            if self.matches(TokenKind::From) {
                self.consume(TokenKind::String, "Expect module path string");
                let path = unquote(&self.previous().lexeme);
                let path_ref = self.vm.intern(&path);
                self.emit_constant(Value::Obj(path_ref));
                self.emit_op(Op::ImportModule);
                self.emit_op(Op::ExportFrom);
                self.emit_short(pairs.len() as u16);
                for (from, to) in pairs {
                    self.emit_short(from);
                    self.emit_short(to);
                }
            } else {
                for (from, to) in pairs {
                    if from != to {
                        self.error("Renaming exports requires a 'from' clause");
                    }
                    self.emit_op(Op::Export);
                    self.emit_short(from);
                }
            }
            self.consume(TokenKind::Semicolon, "Expect ';' after export");
            return;
        }

        // `export <declaration>`
        let declared = if self.matches(TokenKind::Let) {
            self.let_declaration(false)
        } else if self.matches(TokenKind::Const) {
            self.let_declaration(true)
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration()
        } else if self.matches(TokenKind::Class) {
            self.class_declaration()
        } else if self.matches(TokenKind::Enum) {
            self.enum_declaration()
        } else {
            self.error_at_current("Expect declaration or export list after 'export'");
            None
        };
        if let Some(name) = declared {
            let index = self.name_constant(&name);
            self.emit_op(Op::Export);
            self.emit_short(index);
        }
    }

    fn private_statement(&mut self) {
        self.consume(TokenKind::Identifier, "Expect name after 'private'");
        let index = self.name_constant(&self.previous().lexeme.clone());
        self.emit_op(Op::Private);
        self.emit_short(index);
        self.consume(TokenKind::Semicolon, "Expect ';' after private");
    }

    // ----- control flow -----

    fn if_statement(&mut self) {
        if self.matches(TokenKind::Let) {
            self.if_let_statement();
            return;
        }
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'");
        self.expression();
        self.checker.pop();
        self.consume(TokenKind::RightParen, "Expect ')' after condition");

        let then_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit_op(Op::Pop);
        self.statement();
        let else_jump = self.emit_jump(Op::Jump);
        self.patch_jump(then_jump);
        self.emit_op(Op::Pop);
        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    /// `if let <pattern> = <expr> { ... } else { ... }` — the boolean
    /// matching mode outside `match`.
    fn if_let_statement(&mut self) {
        let pat = pattern::parse_pattern(self);
        self.consume(TokenKind::Equal, "Expect '=' after pattern");
        self.expression();
        self.checker.pop();

        self.begin_scope();
        let hidden = format!("__iflet{}", self.func.chunk.len());
        let hidden_index = self.name_constant(&hidden);
        self.emit_op(Op::DefineVar);
        self.emit_short(hidden_index);

        pattern::lower_bool_matcher(self, &pat, hidden_index, false);
        self.checker.pop();
        let then_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit_op(Op::Pop);
        self.statement();
        let else_jump = self.emit_jump(Op::Jump);
        self.patch_jump(then_jump);
        self.emit_op(Op::Pop);
        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
        self.end_scope();
    }

    fn while_statement(&mut self) {
        let loop_start = self.func.chunk.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'");
        self.expression();
        self.checker.pop();
        self.consume(TokenKind::RightParen, "Expect ')' after condition");

        let exit_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit_op(Op::Pop);

        self.func.breaks.push(BreakContext {
            kind: BreakKind::Loop,
            scope_depth: self.func.scope_depth,
            breaks: Vec::new(),
            continues: Vec::new(),
        });
        self.statement();
        let ctx = self.func.breaks.pop().expect("loop context");

        // `continue` lands on the back-edge.
        for continue_jump in &ctx.continues {
            self.patch_jump(*continue_jump);
        }
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        self.emit_op(Op::Pop);
        for break_jump in &ctx.breaks {
            self.patch_jump(*break_jump);
        }
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'");

        // Initializer clause.
        if self.matches(TokenKind::Semicolon) {
            // none
        } else if self.matches(TokenKind::Let) {
            self.let_declaration(false);
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.func.chunk.len();

        // Condition clause.
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.checker.pop();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition");
            exit_jump = Some(self.emit_jump(Op::JumpIfFalse));
            self.emit_op(Op::Pop);
        }

        // Increment clause runs after the body; jump over it on the way in.
        if !self.check(TokenKind::RightParen) {
            let body_jump = self.emit_jump(Op::Jump);
            let increment_start = self.func.chunk.len();
            self.expression();
            self.checker.pop();
            self.emit_op(Op::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses");
            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        } else {
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses");
        }

        self.func.breaks.push(BreakContext {
            kind: BreakKind::Loop,
            scope_depth: self.func.scope_depth,
            breaks: Vec::new(),
            continues: Vec::new(),
        });
        self.statement();
        let ctx = self.func.breaks.pop().expect("loop context");

        for continue_jump in &ctx.continues {
            self.patch_jump(*continue_jump);
        }
        self.emit_loop(loop_start);
        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(Op::Pop);
        }
        for break_jump in &ctx.breaks {
            self.patch_jump(*break_jump);
        }
        self.end_scope();
    }

    fn break_statement(&mut self) {
        let Some(target) = self.func.breaks.last().map(|ctx| ctx.scope_depth) else {
            self.error("Cannot use 'break' outside of a loop or match");
            self.consume(TokenKind::Semicolon, "Expect ';' after 'break'");
            return;
        };
        self.emit_scope_exits(target);
        let jump = self.emit_jump(Op::Jump);
        self.func
            .breaks
            .last_mut()
            .expect("break context")
            .breaks
            .push(jump);
        self.consume(TokenKind::Semicolon, "Expect ';' after 'break'");
    }

    fn continue_statement(&mut self) {
        let Some(position) = self
            .func
            .breaks
            .iter()
            .rposition(|ctx| ctx.kind == BreakKind::Loop)
        else {
            self.error("Cannot use 'continue' outside of a loop");
            self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'");
            return;
        };
        let target = self.func.breaks[position].scope_depth;
        self.emit_scope_exits(target);
        let jump = self.emit_jump(Op::Jump);
        self.func.breaks[position].continues.push(jump);
        self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'");
    }

    fn return_statement(&mut self) {
        if self.func.kind == FunctionKind::Script {
            self.error("Cannot return from top-level code");
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_op(Op::Null);
        } else {
            if self.func.kind == FunctionKind::Initializer {
                self.error("Cannot return a value from an initializer");
            }
            self.expression();
            self.checker.pop();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value");
        }
        self.emit_scope_exits(0);
        if self.func.kind == FunctionKind::Initializer {
            let this_index = self.name_constant("this");
            self.emit_op(Op::Pop);
            self.emit_op(Op::GetThis);
            self.emit_short(this_index);
        }
        self.emit_return();
    }

    /// Emit the return sequence, honouring the generator rewrite: a function
    /// that yielded returns its collected `__yield` array instead of the
    /// explicit value.
    pub(crate) fn emit_return(&mut self) {
        if self.func.uses_yield {
            let used_index = self.name_constant("__yield_used");
            let array_index = self.name_constant("__yield");
            self.emit_op(Op::GetVar);
            self.emit_short(used_index);
            let normal = self.emit_jump(Op::JumpIfFalse);
            self.emit_op(Op::Pop);
            self.emit_op(Op::Pop);
            self.emit_op(Op::GetVar);
            self.emit_short(array_index);
            self.emit_op(Op::Return);
            self.patch_jump(normal);
            self.emit_op(Op::Pop);
        }
        self.emit_op(Op::Return);
    }

    fn throw_statement(&mut self) {
        self.expression();
        self.checker.pop();
        self.consume(TokenKind::Semicolon, "Expect ';' after throw value");
        // Unwind emitted scopes down to the innermost handler's depth (or
        // the function base) so scope opens and closes stay balanced.
        let target = self.func.try_scopes.last().copied().unwrap_or(0);
        self.emit_scope_exits(target);
        self.emit_op(Op::Throw);
    }

    fn try_statement(&mut self) {
        let handler = self.emit_jump(Op::Try);
        self.func.try_scopes.push(self.func.scope_depth);
        self.consume(TokenKind::LeftBrace, "Expect '{' after 'try'");
        self.begin_scope();
        self.block();
        self.end_scope();
        self.func.try_scopes.pop();
        self.emit_op(Op::EndTry);
        let end = self.emit_jump(Op::Jump);

        // Catch target: the interpreter pushes the thrown value here.
        self.patch_jump(handler);
        self.consume(TokenKind::Catch, "Expect 'catch' after try block");
        self.consume(TokenKind::LeftParen, "Expect '(' after 'catch'");
        self.consume(TokenKind::Identifier, "Expect exception binding name");
        let binding = self.name_constant(&self.previous().lexeme.clone());
        self.consume(TokenKind::RightParen, "Expect ')' after exception binding");
        self.begin_scope();
        self.emit_op(Op::DefineVar);
        self.emit_short(binding);
        self.consume(TokenKind::LeftBrace, "Expect '{' after catch clause");
        self.block();
        self.end_scope();
        self.patch_jump(end);
    }

    fn defer_statement(&mut self) {
        // Registration call; the callee is evaluated now, invoked at scope
        // exit, LIFO per scope.
        let register = self.name_constant("__defer");
        self.emit_op(Op::GetVar);
        self.emit_short(register);
        self.expression();
        self.checker.pop();
        self.emit_op(Op::Call);
        self.emit_byte(1);
        self.emit_op(Op::Pop);
        self.consume(TokenKind::Semicolon, "Expect ';' after defer expression");
    }

    fn yield_statement(&mut self) {
        if !self.func.uses_yield {
            self.error("Cannot yield from top-level code");
            // Still parse the expression to stay synchronised.
            self.expression();
            self.checker.pop();
            self.emit_op(Op::Pop);
            self.consume(TokenKind::Semicolon, "Expect ';' after yield value");
            return;
        }
        let used_index = self.name_constant("__yield_used");
        let array_index = self.name_constant("__yield");
        self.emit_op(Op::True);
        self.emit_op(Op::SetVar);
        self.emit_short(used_index);
        self.emit_op(Op::Pop);
        self.emit_op(Op::GetVar);
        self.emit_short(array_index);
        self.expression();
        self.checker.pop();
        self.emit_op(Op::ArrayAppend);
        self.emit_op(Op::Pop);
        self.consume(TokenKind::Semicolon, "Expect ';' after yield value");
    }

    // ----- match -----

    fn match_statement(&mut self) {
        let match_token = self.previous().clone();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'match'");
        self.expression();
        self.checker.pop();
        self.consume(TokenKind::RightParen, "Expect ')' after scrutinee");
        self.consume(TokenKind::LeftBrace, "Expect '{' before match arms");

        self.func.breaks.push(BreakContext {
            kind: BreakKind::Switch,
            scope_depth: self.func.scope_depth,
            breaks: Vec::new(),
            continues: Vec::new(),
        });
        self.begin_scope();
        let hidden = format!("__match{}", self.func.chunk.len());
        let hidden_index = self.name_constant(&hidden);
        self.emit_op(Op::DefineVar);
        self.emit_short(hidden_index);

        let mut end_jumps = Vec::new();
        let mut arms = pattern::ArmTracker::new();

        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            if self.matches(TokenKind::Default) {
                self.consume(TokenKind::Colon, "Expect ':' after 'default'");
                arms.saw_default();
                self.begin_scope();
                self.arm_body();
                self.end_scope();
                end_jumps.push(self.emit_jump(Op::Jump));
                continue;
            }

            self.consume(TokenKind::Case, "Expect 'case' or 'default'");
            let pat = pattern::parse_pattern(self);
            let has_guard = self.matches(TokenKind::If);
            arms.track(self, &pat, has_guard);
            // Guard tokens are consumed by the matcher after bindings exist.

            self.begin_scope();
            pattern::lower_bool_matcher(self, &pat, hidden_index, has_guard);
            self.checker.pop();
            self.consume(TokenKind::Colon, "Expect ':' after pattern");
            let fail = self.emit_jump(Op::JumpIfFalse);
            self.emit_op(Op::Pop);
            self.arm_body();
            self.end_scope();
            end_jumps.push(self.emit_jump(Op::Jump));

            // Failure path: drop the false and close the arm scope.
            self.patch_jump(fail);
            self.emit_op(Op::Pop);
            self.emit_op(Op::EndScope);
            self.emit_op(Op::Gc);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after match arms");

        for end_jump in end_jumps {
            self.patch_jump(end_jump);
        }
        self.end_scope();
        let ctx = self.func.breaks.pop().expect("match context");
        for break_jump in &ctx.breaks {
            self.patch_jump(*break_jump);
        }

        arms.check_exhaustive(self, &match_token);
    }

    fn arm_body(&mut self) {
        while !self.check(TokenKind::Case)
            && !self.check(TokenKind::Default)
            && !self.check(TokenKind::RightBrace)
            && !self.check(TokenKind::Eof)
        {
            self.declaration();
        }
    }

    // ----- helpers shared with expressions -----

    /// Look ahead from the current position (just past a body's `{`) for a
    /// `yield` at this function's own level, skipping nested function
    /// bodies. Single-pass emission needs to know before the prologue.
    pub(crate) fn scan_for_yield(&self) -> bool {
        let mut depth = 1usize;
        let mut index = self.position();
        while depth > 0 {
            let Some(token) = self.token_at(index) else {
                return false;
            };
            match token.kind {
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace => depth -= 1,
                TokenKind::Yield => return true,
                TokenKind::Fun => {
                    // Skip the nested function's balanced body.
                    index = self.skip_function_body(index + 1);
                    continue;
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            index += 1;
        }
        false
    }

    /// Advance past a nested `fun`'s parameter list and body, returning the
    /// index just after its closing brace. Tolerant of malformed input.
    fn skip_function_body(&self, mut index: usize) -> usize {
        // Find the body's opening brace.
        while let Some(token) = self.token_at(index) {
            match token.kind {
                TokenKind::LeftBrace => break,
                TokenKind::Eof | TokenKind::Semicolon => return index,
                _ => index += 1,
            }
        }
        let mut depth = 0usize;
        while let Some(token) = self.token_at(index) {
            match token.kind {
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace => {
                    depth -= 1;
                    if depth == 0 {
                        return index + 1;
                    }
                }
                TokenKind::Eof => return index,
                _ => {}
            }
            index += 1;
        }
        index
    }
}

/// Compile a function body into a prototype object. Used by `fun`
/// declarations, `fun` expressions, and class methods; the caller decides
/// whether to emit a `Closure` site or store the prototype in a class.
pub(crate) fn compile_function(
    c: &mut Compiler,
    kind: FunctionKind,
    name: Option<String>,
) -> ObjRef {
    c.push_function(kind, name);
    c.consume(TokenKind::LeftParen, "Expect '(' after function name");

    let mut arity: u8 = 0;
    let mut min_arity: Option<u8> = None;
    if !c.check(TokenKind::RightParen) {
        loop {
            c.consume(TokenKind::Identifier, "Expect parameter name");
            let param = c.previous().lexeme.clone();
            if c.func.params.contains(&param) {
                c.error("Duplicate parameter name");
            }
            c.func.params.push(param.clone());
            if arity == u8::MAX {
                c.compile_error("Cannot have more than 255 parameters");
            } else {
                arity += 1;
            }
            if c.matches(TokenKind::Equal) {
                if min_arity.is_none() {
                    min_arity = Some(arity - 1);
                }
                emit_default_prologue(c, arity - 1, &param);
            } else if min_arity.is_some() {
                c.error("Parameter without a default cannot follow one with a default");
            }
            if !c.matches(TokenKind::Comma) {
                break;
            }
        }
    }
    c.consume(TokenKind::RightParen, "Expect ')' after parameters");
    c.func.arity = arity;
    c.func.min_arity = min_arity.unwrap_or(arity);

    c.consume(TokenKind::LeftBrace, "Expect '{' before function body");
    if c.scan_for_yield() {
        c.func.uses_yield = true;
        let array_index = c.name_constant("__yield");
        let used_index = c.name_constant("__yield_used");
        c.emit_op(Op::Array);
        c.emit_short(0);
        c.emit_op(Op::DefineVar);
        c.emit_short(array_index);
        c.emit_op(Op::False);
        c.emit_op(Op::DefineVar);
        c.emit_short(used_index);
    }
    while !c.check(TokenKind::RightBrace) && !c.check(TokenKind::Eof) {
        c.declaration();
    }
    c.consume(TokenKind::RightBrace, "Expect '}' after function body");

    // Implicit return: null, or the receiver for initializers.
    if c.func.kind == FunctionKind::Initializer {
        let this_index = c.name_constant("this");
        c.emit_op(Op::GetThis);
        c.emit_short(this_index);
    } else {
        c.emit_op(Op::Null);
    }
    c.emit_return();

    let ctx = c.pop_function();
    let params: Vec<ObjRef> = ctx.params.iter().map(|p| c.vm.intern(p)).collect();
    let name_ref = ctx.name.as_deref().map(|n| c.vm.intern(n));
    let is_initializer = ctx.kind == FunctionKind::Initializer;
    c.vm.alloc_function(
        name_ref,
        ctx.arity,
        ctx.min_arity,
        is_initializer,
        params,
        ctx.chunk,
        Some(c.program.clone()),
    )
}

/// `ArgCount; i+1; Less; JumpIfFalse; <default>; SetVar; Pop` — the caller
/// may pass fewer arguments than `arity`; missing parameters read null
/// until this prologue assigns their defaults. Keeping defaults in the
/// callee keeps the call convention uniform.
fn emit_default_prologue(c: &mut Compiler, index: u8, param: &str) {
    let param_index = c.name_constant(param);
    c.emit_op(Op::ArgCount);
    c.emit_constant(Value::Number((index + 1) as f64));
    c.emit_op(Op::Less);
    let provided = c.emit_jump(Op::JumpIfFalse);
    c.emit_op(Op::Pop);
    c.expression();
    c.checker.pop();
    c.emit_op(Op::SetVar);
    c.emit_short(param_index);
    c.emit_op(Op::Pop);
    let done = c.emit_jump(Op::Jump);
    c.patch_jump(provided);
    c.emit_op(Op::Pop);
    c.patch_jump(done);
}
