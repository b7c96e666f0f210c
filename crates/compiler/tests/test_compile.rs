//! Integration tests for the single-pass compiler
//!
//! Programs lex through the test harness lexer, compile into a real VM, and
//! the emitted chunks are decoded and checked structurally: folded
//! constants, opcode shapes, jump validity, scope balance, and diagnostic
//! rendering.

mod common;

use common::{assert_jumps_valid, chunk_of, compile_src, contains_sequence, decode, find_function_constant, ops};
use erkao_core::{Op, Value};
use erkao_runtime::{ObjKind, Vm};

#[test]
fn test_pure_literal_arithmetic_folds_to_one_constant() {
    let mut vm = Vm::new();
    let out = compile_src(&mut vm, "let x = 1 + 2 * 3;").unwrap();
    let chunk = chunk_of(&vm, out.function);
    let ops = ops(chunk);
    assert!(!ops.contains(&Op::Add));
    assert!(!ops.contains(&Op::Multiply));
    assert!(chunk.constants().contains(&Value::Number(7.0)));
    assert!(contains_sequence(&ops, &[Op::Constant, Op::DefineVar]));
}

#[test]
fn test_folding_respects_grouping() {
    let mut vm = Vm::new();
    let out = compile_src(&mut vm, "let x = (1 + 2) * 3;").unwrap();
    let chunk = chunk_of(&vm, out.function);
    assert!(chunk.constants().contains(&Value::Number(9.0)));
    assert!(!ops(chunk).contains(&Op::Multiply));
}

#[test]
fn test_string_concat_folds_to_interned_constant() {
    let mut vm = Vm::new();
    let out = compile_src(&mut vm, "let s = \"foo\" + \"bar\";").unwrap();
    let expected = vm.intern("foobar");
    let chunk = chunk_of(&vm, out.function);
    assert!(chunk.constants().contains(&Value::Obj(expected)));
    assert!(!ops(chunk).contains(&Op::Add));
}

#[test]
fn test_comparison_and_not_fold() {
    let mut vm = Vm::new();
    let out = compile_src(&mut vm, "let b = !(1 < 2);").unwrap();
    let chunk = chunk_of(&vm, out.function);
    let ops = ops(chunk);
    assert!(!ops.contains(&Op::Less));
    assert!(!ops.contains(&Op::Not));
    assert!(ops.contains(&Op::False));
}

#[test]
fn test_non_literal_operands_do_not_fold() {
    let mut vm = Vm::new();
    let out = compile_src(&mut vm, "let x = 0; let y = x + 1;").unwrap();
    let chunk = chunk_of(&vm, out.function);
    let ops = ops(chunk);
    assert!(ops.contains(&Op::Add));
    assert!(ops.contains(&Op::GetVar));
}

#[test]
fn test_default_argument_prologue_shape() {
    let mut vm = Vm::new();
    let out = compile_src(&mut vm, "fun f(x, y = 10) { return x + y; }").unwrap();
    let script_chunk = chunk_of(&vm, out.function);
    let proto = find_function_constant(&vm, script_chunk, "f").expect("prototype constant");
    match &vm.heap.get(proto).kind {
        ObjKind::Function(f) => {
            assert_eq!(f.arity, 2);
            assert_eq!(f.min_arity, 1);
            let body_ops = ops(&f.chunk);
            assert!(contains_sequence(
                &body_ops,
                &[Op::ArgCount, Op::Constant, Op::Less, Op::JumpIfFalse, Op::Pop]
            ));
            assert!(contains_sequence(&body_ops, &[Op::SetVar, Op::Pop]));
            assert_jumps_valid(&f.chunk);
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_scope_opcodes_balance_statically() {
    let mut vm = Vm::new();
    let out = compile_src(
        &mut vm,
        "{ let a = 1; { let b = 2; } } if (true) { let c = 3; } else { let d = 4; }",
    )
    .unwrap();
    let chunk = chunk_of(&vm, out.function);
    let ops = ops(chunk);
    let begins = ops.iter().filter(|op| **op == Op::BeginScope).count();
    let ends = ops.iter().filter(|op| **op == Op::EndScope).count();
    assert_eq!(begins, ends);
    assert!(begins >= 3);
}

#[test]
fn test_jump_targets_land_on_opcode_boundaries() {
    let mut vm = Vm::new();
    let source = "
        let total = 0;
        for (let i = 0; i < 10; i = i + 1) {
            if (i == 3) { continue; }
            if (i == 8) { break; }
            total = total + i;
        }
        while (total > 0) { total = total - 1; }
    ";
    let out = compile_src(&mut vm, source).unwrap();
    let chunk = chunk_of(&vm, out.function);
    assert_jumps_valid(chunk);
    let ops = ops(chunk);
    assert!(ops.contains(&Op::Loop));
    assert!(ops.contains(&Op::JumpIfFalse));
}

#[test]
fn test_logical_operators_peek_then_pop() {
    let mut vm = Vm::new();
    let out = compile_src(&mut vm, "let x = 0; let y = x and x + 1; let z = x or 2;").unwrap();
    let chunk = chunk_of(&vm, out.function);
    let ops = ops(chunk);
    // `and`: JumpIfFalse peeks, Pop discards only on the taken branch.
    assert!(contains_sequence(&ops, &[Op::JumpIfFalse, Op::Pop]));
    // `or`: false path jumps over an unconditional Jump.
    assert!(contains_sequence(&ops, &[Op::JumpIfFalse, Op::Jump]));
    assert_jumps_valid(chunk);
}

#[test]
fn test_gc_yield_point_after_every_statement() {
    let mut vm = Vm::new();
    let out = compile_src(&mut vm, "let a = 1; let b = 2; let c = 3;").unwrap();
    let chunk = chunk_of(&vm, out.function);
    let gc_count = ops(chunk).iter().filter(|op| **op == Op::Gc).count();
    assert!(gc_count >= 3);
}

#[test]
fn test_parse_error_reports_position_and_recovers() {
    let mut vm = Vm::new();
    let err = compile_src(&mut vm, "let = 1;\nlet x = 2;").unwrap_err();
    assert_eq!(err.diagnostics.len(), 1);
    let rendered = err.diagnostics[0].to_string();
    assert!(
        rendered.starts_with("test.ek:1:5: Error at '=': Expect variable name"),
        "got: {rendered}"
    );
    assert!(rendered.contains("let = 1;"));
    assert!(rendered.contains('^'));
}

#[test]
fn test_cascading_errors_resynchronise_per_statement() {
    let mut vm = Vm::new();
    let err = compile_src(&mut vm, "let = 1;\nlet = 2;\nlet ok = 3;").unwrap_err();
    // One diagnostic per broken statement, none for the good one.
    assert_eq!(err.diagnostics.len(), 2);
}

#[test]
fn test_type_errors_are_advisory() {
    let mut vm = Vm::new();
    let out = compile_src(&mut vm, "let x = 0; let y = x + 1; let bad = 1 - true;").unwrap();
    // Compilation succeeded, bytecode exists, and the mismatch surfaced.
    assert!(!out.diagnostics.is_empty());
    let chunk = chunk_of(&vm, out.function);
    assert!(ops(chunk).contains(&Op::Subtract));
}

#[test]
fn test_assignment_precedence_is_enforced() {
    let mut vm = Vm::new();
    let err = compile_src(&mut vm, "let a = 1; let b = 2; a + b = 3;").unwrap_err();
    assert!(
        err.diagnostics
            .iter()
            .any(|d| d.message.contains("Invalid assignment target"))
    );
}

#[test]
fn test_member_and_index_forms() {
    let mut vm = Vm::new();
    let source = "
        let m = {\"k\": 1};
        let a = [1, 2, 3];
        a[1] = 9;
        let v = m.k;
        let w = m[\"missing\"];
        let x = m?.k;
        let y = a?.[0];
        m.k = 2;
    ";
    let out = compile_src(&mut vm, source).unwrap();
    let chunk = chunk_of(&vm, out.function);
    let ops = ops(chunk);
    for expected in [
        Op::Map,
        Op::Array,
        Op::SetIndex,
        Op::GetProperty,
        Op::GetIndex,
        Op::GetPropertyOptional,
        Op::GetIndexOptional,
        Op::SetProperty,
    ] {
        assert!(ops.contains(&expected), "missing {expected:?}");
    }
}

#[test]
fn test_method_invoke_is_fused() {
    let mut vm = Vm::new();
    let out = compile_src(&mut vm, "let m = {\"k\": 1}; m.get(1);").unwrap();
    let chunk = chunk_of(&vm, out.function);
    let ops = ops(chunk);
    assert!(ops.contains(&Op::Invoke));
    assert!(!ops.contains(&Op::GetProperty));
}

#[test]
fn test_class_declaration_compiles_methods_into_class_constant() {
    let mut vm = Vm::new();
    let source = "
        class Point {
            init(x, y) { this.x = x; this.y = y; }
            sum() { return this.x + this.y; }
        }
        let p = Point(1, 2);
    ";
    let out = compile_src(&mut vm, source).unwrap();
    let chunk = chunk_of(&vm, out.function);
    let class = chunk
        .constants()
        .iter()
        .find_map(|constant| match constant {
            Value::Obj(r) => match &vm.heap.get(*r).kind {
                ObjKind::Class(_) => Some(*r),
                _ => None,
            },
            _ => None,
        })
        .expect("class constant");
    let init = vm.intern("init");
    let sum = vm.intern("sum");
    let init_fn = vm.heap.class_method(class, init).expect("init method");
    assert!(vm.heap.class_method(class, sum).is_some());
    let Value::Obj(init_ref) = init_fn else { panic!() };
    match &vm.heap.get(init_ref).kind {
        ObjKind::Function(f) => {
            assert!(f.is_initializer);
            assert_eq!(f.arity, 2);
            // Initializers return the receiver.
            assert!(contains_sequence(&ops(&f.chunk), &[Op::GetThis, Op::Return]));
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_this_outside_method_is_an_error() {
    let mut vm = Vm::new();
    let err = compile_src(&mut vm, "let x = this;").unwrap_err();
    assert!(
        err.diagnostics
            .iter()
            .any(|d| d.message.contains("outside of a class"))
    );
}

#[test]
fn test_closure_sites_and_fun_expressions() {
    let mut vm = Vm::new();
    let out = compile_src(&mut vm, "fun outer() { return fun (x) { return x; }; }").unwrap();
    let script_chunk = chunk_of(&vm, out.function);
    assert!(ops(script_chunk).contains(&Op::Closure));
    let outer = find_function_constant(&vm, script_chunk, "outer").unwrap();
    let outer_chunk = match &vm.heap.get(outer).kind {
        ObjKind::Function(f) => &f.chunk,
        _ => unreachable!(),
    };
    assert!(ops(outer_chunk).contains(&Op::Closure));
}

#[test]
fn test_yield_lowering_rewrites_prologue_and_returns() {
    let mut vm = Vm::new();
    let source = "
        fun gen(n) {
            yield n;
            yield n + 1;
            return 0;
        }
    ";
    let out = compile_src(&mut vm, source).unwrap();
    let script_chunk = chunk_of(&vm, out.function);
    let proto = find_function_constant(&vm, script_chunk, "gen").unwrap();
    let body_ops = match &vm.heap.get(proto).kind {
        ObjKind::Function(f) => ops(&f.chunk),
        _ => unreachable!(),
    };
    // Hidden prologue: __yield = [] and __yield_used = false.
    assert!(contains_sequence(
        &body_ops,
        &[Op::Array, Op::DefineVar, Op::False, Op::DefineVar]
    ));
    // Each yield marks the flag and appends.
    assert!(contains_sequence(
        &body_ops,
        &[Op::True, Op::SetVar, Op::Pop, Op::GetVar]
    ));
    assert!(body_ops.contains(&Op::ArrayAppend));
    // Returns consult the flag.
    assert!(contains_sequence(
        &body_ops,
        &[Op::GetVar, Op::JumpIfFalse, Op::Pop, Op::Pop, Op::GetVar, Op::Return]
    ));
}

#[test]
fn test_yield_only_rewrites_functions_that_yield() {
    let mut vm = Vm::new();
    let source = "
        fun plain() { return 1; }
        fun wrapper() { fun inner() { yield 1; } return 2; }
    ";
    let out = compile_src(&mut vm, source).unwrap();
    let script_chunk = chunk_of(&vm, out.function);
    let plain = find_function_constant(&vm, script_chunk, "plain").unwrap();
    match &vm.heap.get(plain).kind {
        ObjKind::Function(f) => assert!(!ops(&f.chunk).contains(&Op::ArrayAppend)),
        _ => unreachable!(),
    }
    // `wrapper` contains a yielding inner function but does not itself
    // yield; its own return must be the plain form.
    let wrapper = find_function_constant(&vm, script_chunk, "wrapper").unwrap();
    match &vm.heap.get(wrapper).kind {
        ObjKind::Function(f) => {
            let body_ops = ops(&f.chunk);
            assert!(!body_ops.contains(&Op::ArrayAppend));
            assert!(!contains_sequence(&body_ops, &[Op::False, Op::DefineVar]));
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_try_catch_defer_and_throw() {
    let mut vm = Vm::new();
    let source = "
        fun risky() {
            defer fun () { return 0; };
            try {
                throw {\"kind\": \"boom\"};
            } catch (e) {
                return e;
            }
            return null;
        }
    ";
    let out = compile_src(&mut vm, source).unwrap();
    let script_chunk = chunk_of(&vm, out.function);
    let proto = find_function_constant(&vm, script_chunk, "risky").unwrap();
    let body = match &vm.heap.get(proto).kind {
        ObjKind::Function(f) => &f.chunk,
        _ => unreachable!(),
    };
    let body_ops = ops(body);
    for expected in [Op::Try, Op::EndTry, Op::Throw, Op::DefineVar, Op::Call] {
        assert!(body_ops.contains(&expected), "missing {expected:?}");
    }
    assert_jumps_valid(body);
}

#[test]
fn test_module_opcode_forms() {
    let mut vm = Vm::new();
    let source = "
        import \"util\";
        import \"geometry\" as geo;
        export let answer = 42;
        export default 7;
        export { sin, cos as cosine } from \"trig\";
        private scratch;
    ";
    let out = compile_src(&mut vm, source).unwrap();
    let chunk = chunk_of(&vm, out.function);
    let decoded = decode(chunk);
    let all: Vec<Op> = decoded.iter().map(|(_, op)| *op).collect();
    for expected in [
        Op::Import,
        Op::Export,
        Op::ExportValue,
        Op::ImportModule,
        Op::ExportFrom,
        Op::Private,
    ] {
        assert!(all.contains(&expected), "missing {expected:?}");
    }
    // The aliased import carries hasAlias=1; the bare one 0.
    let import_flags: Vec<u8> = decoded
        .iter()
        .filter(|(_, op)| *op == Op::Import)
        .map(|(offset, _)| chunk.byte(offset + 1).unwrap())
        .collect();
    assert_eq!(import_flags, vec![0, 1]);
    // ExportFrom carries its pair count.
    let (export_from_offset, _) = decoded
        .iter()
        .find(|(_, op)| *op == Op::ExportFrom)
        .unwrap();
    assert_eq!(chunk.read_u16(export_from_offset + 1), Some(2));
}

#[test]
fn test_return_outside_function_is_an_error() {
    let mut vm = Vm::new();
    let err = compile_src(&mut vm, "return 1;").unwrap_err();
    assert!(
        err.diagnostics
            .iter()
            .any(|d| d.message.contains("Cannot return from top-level code"))
    );
}

#[test]
fn test_break_outside_loop_is_an_error() {
    let mut vm = Vm::new();
    let err = compile_src(&mut vm, "break;").unwrap_err();
    assert!(
        err.diagnostics
            .iter()
            .any(|d| d.message.contains("outside of a loop"))
    );
}

#[test]
fn test_constant_pool_overflow_is_a_compile_error() {
    let mut vm = Vm::new();
    let mut source = String::new();
    for i in 0..40_000 {
        source.push_str(&format!("let v{} = {};\n", i, i));
    }
    let err = compile_src(&mut vm, &source).unwrap_err();
    assert!(
        err.diagnostics
            .iter()
            .any(|d| d.message.contains("Too many constants"))
    );
}

#[test]
fn test_compiler_survives_hostile_token_arrays() {
    use erkao_core::{Token, TokenKind};
    let mut vm = Vm::new();

    // No Eof terminator.
    let tokens = vec![
        Token::new(TokenKind::RightBrace, "}", 0, 0),
        Token::new(TokenKind::Else, "else", 0, 1),
    ];
    let _ = erkao_compiler::compile(&mut vm, &tokens, "} else", None);

    // Embedded NULs in lexemes.
    let tokens = vec![
        Token::new(TokenKind::Let, "let", 0, 0),
        Token::new(TokenKind::Identifier, "a\0b", 0, 4),
        Token::new(TokenKind::Equal, "=", 0, 8),
        Token::new(TokenKind::Number, "1\0", 0, 10),
        Token::new(TokenKind::Semicolon, ";", 0, 12),
        Token::new(TokenKind::Eof, "", 0, 13),
    ];
    let _ = erkao_compiler::compile(&mut vm, &tokens, "", None);

    // A wall of keyword tokens with no structure.
    let mut tokens = vec![Token::new(TokenKind::Case, "case", 0, 0); 200];
    tokens.push(Token::new(TokenKind::Eof, "", 0, 0));
    let result = erkao_compiler::compile(&mut vm, &tokens, "", None);
    assert!(result.is_err());
}

#[test]
fn test_unterminated_string_is_a_lex_error() {
    let mut vm = Vm::new();
    let err = compile_src(&mut vm, "let s = \"oops;").unwrap_err();
    assert!(matches!(
        err.diagnostics[0].kind,
        erkao_compiler::DiagnosticKind::Lex
    ));
}
