//! Whole programs run through a kernel, most of them with the stress
//! collector on so a missing root turns into a panic.

use std::sync::Arc;
use std::sync::mpsc;

use crate::{
    ArgKind, BinaryOp, BufferedOutput, Code, CodeBuilder, ErrorCode, Expr, FatalError,
    HeapSettings, Instruction, Kernel, KernelCreateInfo, KernelError, NativeArgument,
    NativeContext, NativeLibrary, NativeSignature, PackageDefinition, PoolReturn,
    RaiseInstruction, RexxError, ShvBlock, ShvStatus, Unwind, Value,
};

fn stress_kernel() -> Kernel {
    Kernel::new(KernelCreateInfo {
        heap: HeapSettings {
            stress: true,
            ..Default::default()
        },
        ..Default::default()
    })
    .unwrap()
}

fn code(name: &str, body: impl FnOnce(&mut CodeBuilder)) -> Code {
    let mut builder = CodeBuilder::new(name);
    body(&mut builder);
    builder.build().unwrap()
}

fn run(kernel: &Kernel, program: &str) -> (Result<Option<String>, RexxError>, Vec<String>) {
    let output = Arc::new(BufferedOutput::new());
    let mut activity = kernel.create_activity();
    activity.set_output(output.clone());
    let result = activity.run_program(program, &[]);
    (result, output.lines())
}

fn concat(parts: Vec<Expr>) -> Expr {
    let mut parts = parts.into_iter();
    let first = parts.next().unwrap();
    parts.fold(first, |left, right| Expr::binary(BinaryOp::ConcatBlank, left, right))
}

fn condition(option: &str) -> Expr {
    Expr::call("condition", vec![Expr::lit(option)])
}

fn syntax_code(result: &Result<Option<String>, RexxError>) -> Option<ErrorCode> {
    match result {
        Err(RexxError::Condition(report)) => report.code,
        _ => None,
    }
}

// ── Control transfer ──────────────────────────────────────────────────

#[test]
fn signal_skips_to_the_label() {
    let kernel = stress_kernel();
    let main = code("jump", |b| {
        b.signal("l1");
        b.say(Expr::lit("skipped"));
        b.label("l1");
        b.say(Expr::lit("after"));
        b.say(Expr::var("sigl"));
    });
    kernel.register_package(PackageDefinition::new("jump", main)).unwrap();

    let (result, lines) = run(&kernel, "jump");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["after", "1"]);
}

#[test]
fn call_on_syntax_runs_handler_and_rearms() {
    let kernel = stress_kernel();
    let main = code("callon", |b| {
        b.assign("count", Expr::lit("0"));
        b.call_on("syntax", "handler");
        b.raise(
            RaiseInstruction::new("syntax")
                .code(Expr::lit("40.1"))
                .array(vec![Expr::lit("bad"), Expr::lit("value")]),
        );
        b.say(Expr::lit("resumed"));
        b.raise(
            RaiseInstruction::new("syntax")
                .code(Expr::lit("40.1"))
                .array(vec![Expr::lit("bad"), Expr::lit("value")]),
        );
        b.say(concat(vec![Expr::lit("count"), Expr::var("count")]));
        b.exit(None);
        b.label("handler");
        b.assign(
            "count",
            Expr::binary(BinaryOp::Add, Expr::var("count"), Expr::lit("1")),
        );
        b.assign("a", condition("A"));
        b.say(concat(vec![
            condition("C"),
            condition("I"),
            Expr::send(Expr::var("a"), "items", vec![]),
            Expr::send(Expr::var("a"), "[]", vec![Expr::lit("1")]),
            Expr::send(Expr::var("a"), "[]", vec![Expr::lit("2")]),
        ]));
        b.say(condition("S"));
        b.ret(None);
    });
    kernel.register_package(PackageDefinition::new("callon", main)).unwrap();

    let (result, lines) = run(&kernel, "callon");
    assert_eq!(result.unwrap(), None);
    assert_eq!(
        lines,
        [
            "SYNTAX CALL 2 bad value",
            "DELAYED",
            "resumed",
            "SYNTAX CALL 2 bad value",
            "DELAYED",
            "count 2",
        ]
    );
}

#[test]
fn untrapped_raise_syntax_reaches_the_caller() {
    let kernel = stress_kernel();
    let main = code("raise", |b| {
        b.say(Expr::lit("before"));
        b.raise(
            RaiseInstruction::new("syntax")
                .code(Expr::lit("99.1"))
                .array(vec![Expr::lit("x"), Expr::lit("y")]),
        );
        b.say(Expr::lit("after"));
    });
    kernel.register_package(PackageDefinition::new("raise", main)).unwrap();

    let (result, lines) = run(&kernel, "raise");
    assert_eq!(lines, ["before"]);
    let Err(RexxError::Condition(report)) = result else {
        panic!("expected an untrapped condition, got {result:?}");
    };
    assert_eq!(report.condition, "SYNTAX");
    assert_eq!(report.code.map(|c| c.major), Some(99));
    assert_eq!(report.message, "Translation error in \"x\": y");
    assert_eq!(report.additional, ["x", "y"]);
    assert_eq!(report.line, Some(2));
}

#[test]
fn delayed_call_trap_does_not_reenter() {
    let kernel = stress_kernel();
    let main = code("delay", |b| {
        b.assign("count", Expr::lit("0"));
        b.call_on("error", "h");
        b.raise(RaiseInstruction::new("error").code(Expr::lit("1")));
        b.raise(RaiseInstruction::new("error").code(Expr::lit("2")));
        b.say(concat(vec![Expr::lit("count"), Expr::var("count")]));
        b.exit(None);
        b.label("h");
        b.assign(
            "count",
            Expr::binary(BinaryOp::Add, Expr::var("count"), Expr::lit("1")),
        );
        b.raise(RaiseInstruction::new("error").code(Expr::lit("3")));
        b.say(concat(vec![Expr::lit("handled"), Expr::var("count")]));
        b.ret(None);
    });
    kernel.register_package(PackageDefinition::new("delay", main)).unwrap();

    let (result, lines) = run(&kernel, "delay");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["handled 1", "handled 2", "count 2"]);
}

#[test]
fn signal_trap_in_caller_catches_condition_from_callee() {
    let kernel = stress_kernel();
    let main = code("outer", |b| {
        b.signal_on("syntax", "caught");
        b.call("inner", vec![]);
        b.say(Expr::lit("not reached"));
        b.exit(None);
        b.label("caught");
        b.say(concat(vec![condition("C"), Expr::var("rc"), Expr::var("sigl")]));
    });
    let inner = code("inner", |b| {
        b.nop();
        b.raise(RaiseInstruction::new("syntax").code(Expr::lit("41.1")).array(vec![Expr::lit("q")]));
    });
    kernel
        .register_package(PackageDefinition::new("outer", main).routine("inner", false, inner))
        .unwrap();

    let (result, lines) = run(&kernel, "outer");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["SYNTAX 41 2"]);
}

#[test]
fn raise_return_from_handler_goes_to_the_parent() {
    let kernel = stress_kernel();
    let main = code("relay", |b| {
        b.signal_on("error", "caught");
        b.call("sub", vec![]);
        b.say(Expr::lit("not reached"));
        b.exit(None);
        b.label("caught");
        b.say(concat(vec![Expr::lit("caught"), condition("D")]));
        b.exit(None);
        b.label("sub");
        b.call_on("error", "h");
        b.raise(RaiseInstruction::new("error").code(Expr::lit("1")));
        b.say(Expr::lit("sub resumed"));
        b.ret(None);
        b.label("h");
        b.raise(
            RaiseInstruction::new("error")
                .code(Expr::lit("9"))
                .description(Expr::lit("again"))
                .returning(),
        );
    });
    kernel.register_package(PackageDefinition::new("relay", main)).unwrap();

    let (result, lines) = run(&kernel, "relay");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["caught again"]);
}

#[test]
fn raise_exit_completes_the_program_with_the_result() {
    let kernel = stress_kernel();
    let main = code("leave", |b| {
        b.call("sub", vec![]);
        b.say(Expr::lit("not reached"));
        b.exit(None);
        b.label("sub");
        b.raise(
            RaiseInstruction::new("error")
                .code(Expr::lit("1"))
                .result(Expr::lit("r"))
                .exiting(),
        );
    });
    kernel.register_package(PackageDefinition::new("leave", main)).unwrap();

    let (result, lines) = run(&kernel, "leave");
    assert_eq!(result.unwrap(), Some("r".to_string()));
    assert!(lines.is_empty());
}

#[test]
fn propagate_marks_the_condition() {
    let kernel = stress_kernel();
    let main = code("prop", |b| {
        b.signal_on("error", "top");
        b.call("sub", vec![]);
        b.exit(None);
        b.label("top");
        b.say(concat(vec![
            condition("D"),
            Expr::send(condition("O"), "propagated", vec![]),
        ]));
        b.exit(None);
        b.label("sub");
        b.signal_on("error", "h");
        b.raise(
            RaiseInstruction::new("error")
                .code(Expr::lit("4"))
                .description(Expr::lit("inner")),
        );
        b.label("h");
        b.raise(RaiseInstruction::propagate());
    });
    kernel.register_package(PackageDefinition::new("prop", main)).unwrap();

    let (result, lines) = run(&kernel, "prop");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["inner 1"]);
}

#[test]
fn propagate_without_a_condition_is_fatal() {
    let kernel = stress_kernel();
    let main = code("nothing", |b| {
        b.raise(RaiseInstruction::propagate());
    });
    kernel.register_package(PackageDefinition::new("nothing", main)).unwrap();

    let (result, _) = run(&kernel, "nothing");
    assert!(matches!(
        result,
        Err(RexxError::Fatal(FatalError::NoConditionToPropagate { line: 1, .. }))
    ));
}

#[test]
fn runaway_recursion_fills_the_control_stack() {
    let kernel = Kernel::new(KernelCreateInfo {
        activity: crate::ActivitySettings {
            max_depth: 16,
            ..Default::default()
        },
        ..Default::default()
    })
    .unwrap();
    let main = code("deep", |b| {
        b.label("again");
        b.call("again", vec![]);
    });
    kernel.register_package(PackageDefinition::new("deep", main)).unwrap();

    let (result, _) = run(&kernel, "deep");
    assert!(matches!(
        result,
        Err(RexxError::Fatal(FatalError::ControlStackFull { depth: 16 }))
    ));
}

// ── Call resolution ───────────────────────────────────────────────────

#[test]
fn internal_labels_win_over_builtins_and_externals() {
    let kernel = stress_kernel();
    let main = code("order", |b| {
        b.say(Expr::call("length", vec![Expr::lit("abc")]));
        b.say(Expr::quoted_call("length", vec![Expr::lit("abc")]));
        b.say(Expr::call("shared", vec![]));
        b.say(Expr::call("helper", vec![]));
        b.exit(None);
        b.label("length");
        b.ret(Some(concat(vec![
            Expr::lit("internal"),
            Expr::call("arg", vec![Expr::lit("1")]),
        ])));
        b.label("helper");
        b.ret(Some(Expr::lit("internal helper")));
    });
    let helper = code("helper", |b| {
        b.ret(Some(Expr::lit("external helper")));
    });
    let shared = code("shared", |b| {
        b.ret(Some(Expr::lit("from library")));
    });
    let library = code("library", |b| {
        b.nop();
    });
    kernel
        .register_package(PackageDefinition::new("library", library).routine("shared", true, shared))
        .unwrap();
    kernel
        .register_package(
            PackageDefinition::new("order", main)
                .routine("helper", false, helper)
                .requires("library"),
        )
        .unwrap();

    let (result, lines) = run(&kernel, "order");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["internal abc", "3", "from library", "internal helper"]);
}

#[test]
fn registered_programs_are_external_routines() {
    let kernel = stress_kernel();
    let callee = code("callee", |b| {
        b.ret(Some(concat(vec![
            Expr::lit("callee got"),
            Expr::call("arg", vec![Expr::lit("1")]),
        ])));
    });
    let main = code("caller", |b| {
        b.call("callee", vec![Expr::lit("7")]);
        b.say(Expr::var("result"));
    });
    kernel.register_package(PackageDefinition::new("callee", callee)).unwrap();
    kernel.register_package(PackageDefinition::new("caller", main)).unwrap();

    let (result, lines) = run(&kernel, "caller");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["callee got 7"]);
}

#[test]
fn unknown_routines_raise_by_call_form() {
    let kernel = stress_kernel();
    let fixed = code("fixed", |b| {
        b.call("nowhere", vec![]);
    });
    let dynamic = code("dynamic", |b| {
        b.call_dynamic(Expr::lit("nowhere"), vec![]);
    });
    kernel.register_package(PackageDefinition::new("fixed", fixed)).unwrap();
    kernel.register_package(PackageDefinition::new("dynamic", dynamic)).unwrap();

    let (result, _) = run(&kernel, "fixed");
    assert_eq!(syntax_code(&result), Some(ErrorCode::ROUTINE_NOT_FOUND));
    let (result, _) = run(&kernel, "dynamic");
    assert_eq!(syntax_code(&result), Some(ErrorCode::LABEL_NOT_FOUND));
}

#[test]
fn duplicate_packages_are_rejected() {
    let kernel = stress_kernel();
    let first = code("dup", |b| {
        b.nop();
    });
    let second = code("dup", |b| {
        b.nop();
    });
    kernel.register_package(PackageDefinition::new("dup", first)).unwrap();
    assert_eq!(
        kernel.register_package(PackageDefinition::new("DUP", second)),
        Err(KernelError::DuplicatePackage("DUP".into()))
    );
}

// ── Native routines ───────────────────────────────────────────────────

fn twice(ctx: &mut NativeContext<'_, '_>, args: &[NativeArgument]) -> Result<Value, Unwind> {
    let n = match args.first() {
        Some(NativeArgument::Int64(n)) => *n,
        _ => 0,
    };
    Ok(ctx.string(&(n * 2).to_string()))
}

fn pool_access(ctx: &mut NativeContext<'_, '_>, _args: &[NativeArgument]) -> Result<Value, Unwind> {
    ctx.set_variable_pool_enabled(false);
    let disabled = ctx.variable_pool(&mut [ShvBlock::fetch("X")]) == PoolReturn::NotAvailable;
    ctx.set_variable_pool_enabled(true);

    let mut requests = [
        ShvBlock::fetch("X"),
        ShvBlock::set("Y", "from native"),
        ShvBlock::sym_fetch("s.k"),
        ShvBlock::fetch("x"),
        ShvBlock::private("PARM"),
    ];
    let PoolReturn::Ok(status) = ctx.variable_pool(&mut requests) else {
        return Err(ctx.raise_error(ErrorCode::INCORRECT_ARGUMENT, &["pool unavailable"]));
    };
    let text = format!(
        "{disabled} {} {} {} {} {}",
        requests[0].value.as_deref().unwrap_or_default(),
        requests[2].value.as_deref().unwrap_or_default(),
        requests[3].status == ShvStatus::BADN,
        requests[4].value.as_deref().unwrap_or_default(),
        status.contains(ShvStatus::NEWV),
    );
    Ok(ctx.string(&text))
}

fn list_variables(ctx: &mut NativeContext<'_, '_>, _args: &[NativeArgument]) -> Result<Value, Unwind> {
    let mut names = Vec::new();
    loop {
        let mut request = [ShvBlock::next()];
        match ctx.variable_pool(&mut request) {
            PoolReturn::Ok(status) if status.contains(ShvStatus::LVAR) => break,
            PoolReturn::Ok(_) => {
                let [request] = request;
                names.push(format!("{}={}", request.name, request.value.unwrap_or_default()));
            }
            PoolReturn::NotAvailable => {
                return Err(ctx.raise_error(ErrorCode::INCORRECT_ARGUMENT, &["pool unavailable"]));
            }
        }
    }
    names.sort();
    Ok(ctx.string(&names.join(" ")))
}

fn complain(ctx: &mut NativeContext<'_, '_>, _args: &[NativeArgument]) -> Result<Value, Unwind> {
    ctx.raise_condition("ERROR", "from native")?;
    Ok(ctx.string("done"))
}

fn native_library() -> NativeLibrary {
    NativeLibrary::new("testlib")
        .entry("twice", twice)
        .entry("poolaccess", pool_access)
        .entry("listvars", list_variables)
        .entry("complain", complain)
}

fn with_natives(definition: PackageDefinition) -> PackageDefinition {
    definition
        .native_routine("twice", false, "testlib", "twice", NativeSignature::new(&[ArgKind::Int64], 1))
        .native_routine("poolaccess", false, "testlib", "poolaccess", NativeSignature::default())
        .native_routine("listvars", false, "testlib", "listvars", NativeSignature::default())
        .native_routine("complain", false, "testlib", "complain", NativeSignature::default())
}

#[test]
fn native_routines_resolve_once_and_again_after_restore() {
    let kernel = stress_kernel();
    kernel.register_library(native_library());
    let main = code("natives", |b| {
        b.say(Expr::call("twice", vec![Expr::lit("21")]));
        b.say(Expr::call("twice", vec![Expr::lit("-4")]));
    });
    kernel.register_package(with_natives(PackageDefinition::new("natives", main))).unwrap();

    let (result, lines) = run(&kernel, "natives");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["42", "-8"]);
    assert_eq!(kernel.native_resolutions(), 1);

    let image = kernel.save_image().unwrap();
    let restored = Kernel::new(KernelCreateInfo {
        heap: HeapSettings {
            stress: true,
            ..Default::default()
        },
        image: Some(image),
        ..Default::default()
    })
    .unwrap();
    restored.register_library(native_library());
    let (result, lines) = run(&restored, "natives");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["42", "-8"]);
    assert_eq!(restored.native_resolutions(), 1);
}

#[test]
fn native_arguments_are_checked() {
    let kernel = stress_kernel();
    kernel.register_library(native_library());
    let word = code("word", |b| {
        b.say(Expr::call("twice", vec![Expr::lit("abc")]));
    });
    let none = code("none", |b| {
        b.say(Expr::call("twice", vec![]));
    });
    let many = code("many", |b| {
        b.say(Expr::call("twice", vec![Expr::lit("1"), Expr::lit("2")]));
    });
    for (name, main) in [("word", word), ("none", none), ("many", many)] {
        kernel.register_package(with_natives(PackageDefinition::new(name, main))).unwrap();
    }

    let (result, _) = run(&kernel, "word");
    assert_eq!(syntax_code(&result), Some(ErrorCode::NATIVE_WHOLE_NUMBER));
    let (result, _) = run(&kernel, "none");
    assert_eq!(syntax_code(&result), Some(ErrorCode::MISSING_METHOD_ARGUMENT));
    let (result, _) = run(&kernel, "many");
    assert_eq!(syntax_code(&result), Some(ErrorCode::TOO_MANY_METHOD_ARGUMENTS));
}

#[test]
fn unresolvable_native_raises_98_900() {
    let kernel = stress_kernel();
    let main = code("missing", |b| {
        b.say(Expr::call("twice", vec![Expr::lit("1")]));
    });
    kernel.register_package(with_natives(PackageDefinition::new("missing", main))).unwrap();

    let (result, _) = run(&kernel, "missing");
    let Err(RexxError::Condition(report)) = result else {
        panic!("expected an untrapped condition, got {result:?}");
    };
    assert_eq!(report.code, Some(ErrorCode::UNRESOLVED_NATIVE));
    assert_eq!(
        report.message,
        "Could not resolve external routine \"TWICE\" in library \"TESTLIB\""
    );
}

#[test]
fn variable_pool_reaches_the_caller() {
    let kernel = stress_kernel();
    kernel.register_library(native_library());
    let main = code("pool", |b| {
        b.assign("x", Expr::lit("hello"));
        b.assign("k", Expr::lit("key"));
        b.assign("s.k", Expr::lit("via symbol"));
        b.say(Expr::call("poolaccess", vec![]));
        b.say(Expr::var("y"));
    });
    kernel.register_package(with_natives(PackageDefinition::new("pool", main))).unwrap();

    let (result, lines) = run(&kernel, "pool");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["true hello via symbol true 0 true", "from native"]);
}

#[test]
fn nextv_walks_simple_variables_and_stem_tails() {
    let kernel = stress_kernel();
    kernel.register_library(native_library());
    let main = code("walk", |b| {
        b.assign("a", Expr::lit("1"));
        b.assign("s.1", Expr::lit("one"));
        b.assign("s.2", Expr::lit("two"));
        b.say(Expr::call("listvars", vec![]));
    });
    kernel.register_package(with_natives(PackageDefinition::new("walk", main))).unwrap();

    let (result, lines) = run(&kernel, "walk");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["A=1 S.1=one S.2=two"]);
}

#[test]
fn call_on_handler_queued_by_the_last_clause_still_runs() {
    let kernel = stress_kernel();
    kernel.register_library(native_library());
    let main = code("last", |b| {
        b.call_on("error", "handler");
        b.exit(Some(Expr::call("complain", vec![])));
        b.label("handler");
        b.say(concat(vec![condition("C"), condition("D")]));
        b.ret(None);
    });
    kernel.register_package(with_natives(PackageDefinition::new("last", main))).unwrap();

    let (result, lines) = run(&kernel, "last");
    assert_eq!(result.unwrap(), Some("done".to_string()));
    assert_eq!(lines, ["ERROR from native"]);
}

// ── Commands and security ─────────────────────────────────────────────

fn test_environment(_environment: &str, command: &str) -> i32 {
    command.trim().parse().unwrap_or(0)
}

#[test]
fn command_return_codes_raise_error_and_failure() {
    let kernel = stress_kernel();
    kernel.register_command_handler("test", test_environment);
    let main = code("commands", |b| {
        b.push(Instruction::Address {
            environment: Some("TEST".into()),
            command: None,
        });
        b.call_on("error", "err");
        b.call_on("failure", "fail");
        b.command(Expr::lit("0"));
        b.say(Expr::var("rc"));
        b.command(Expr::lit("5"));
        b.command(Expr::lit("-1"));
        b.say(Expr::var("rc"));
        b.exit(None);
        b.label("err");
        b.say(concat(vec![Expr::lit("error"), Expr::var("rc")]));
        b.ret(None);
        b.label("fail");
        b.say(concat(vec![Expr::lit("failure"), Expr::var("rc")]));
        b.ret(None);
    });
    kernel.register_package(PackageDefinition::new("commands", main)).unwrap();

    let (result, lines) = run(&kernel, "commands");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["0", "error 5", "failure -1", "-1"]);
}

#[test]
fn unknown_environment_sets_rc_minus_three() {
    let kernel = stress_kernel();
    let main = code("noenv", |b| {
        b.push(Instruction::Address {
            environment: Some("NOWHERE".into()),
            command: None,
        });
        b.command(Expr::lit("anything"));
        b.say(Expr::var("rc"));
        b.say(Expr::call("address", vec![]));
    });
    kernel.register_package(PackageDefinition::new("noenv", main)).unwrap();

    let (result, lines) = run(&kernel, "noenv");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["-3", "NOWHERE"]);
}

#[test]
fn security_manager_intercepts_external_calls() {
    let kernel = stress_kernel();
    let check = code("callcheck", |b| {
        b.use_arg(&["info"]);
        b.expression(Expr::send(
            Expr::var("info"),
            "result=",
            vec![concat(vec![
                Expr::lit("intercepted"),
                Expr::send(Expr::var("info"), "name", vec![]),
            ])],
        ));
        b.ret(Some(Expr::lit("1")));
    });
    let main = code("guarded", |b| {
        b.assign("manager", Expr::send(Expr::env("directory"), "new", vec![]));
        b.expression(Expr::send(
            Expr::var("manager"),
            "setmethod",
            vec![
                Expr::lit("CALL"),
                Expr::send(Expr::env("methods"), "callcheck", vec![]),
            ],
        ));
        b.expression(Expr::send(
            Expr::env("package"),
            "setsecuritymanager",
            vec![Expr::var("manager")],
        ));
        b.say(Expr::call("secret", vec![Expr::lit("x")]));
    });
    kernel
        .register_package(PackageDefinition::new("guarded", main).method("callcheck", check))
        .unwrap();

    let (result, lines) = run(&kernel, "guarded");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["intercepted SECRET"]);
}

// ── Activities ────────────────────────────────────────────────────────

#[test]
fn halt_from_another_thread_stops_the_program() {
    let kernel = Kernel::new(KernelCreateInfo::default()).unwrap();
    let main = code("spin", |b| {
        b.do_while(Expr::lit("1"), |b| {
            b.nop();
        });
    });
    kernel.register_package(PackageDefinition::new("spin", main)).unwrap();

    let (sender, receiver) = mpsc::channel();
    let handle = kernel
        .spawn_activity(move |activity| {
            sender.send(activity.id()).unwrap();
            activity.set_output(Arc::new(BufferedOutput::new()));
            activity.run_program("spin", &[])
        })
        .unwrap();
    let id = receiver.recv().unwrap();
    assert!(kernel.halt(id, "stop requested"));
    assert!(!kernel.halt(id + 1000, "nobody"));

    let result = handle.join().unwrap();
    let Err(RexxError::Condition(report)) = result else {
        panic!("expected HALT, got {result:?}");
    };
    assert_eq!(report.condition, "HALT");
    assert_eq!(report.code, Some(ErrorCode::HALT));
    assert_eq!(report.description, "stop requested");
}

#[test]
fn collection_keeps_registered_programs() {
    let kernel = stress_kernel();
    let main = code("kept", |b| {
        b.say(Expr::lit("still here"));
    });
    kernel.register_package(PackageDefinition::new("kept", main)).unwrap();
    let stats = kernel.collect_garbage();
    assert!(stats.live > 0);
    assert_eq!(stats.live, kernel.live_objects());

    let (result, lines) = run(&kernel, "kept");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["still here"]);
}

// ── Conditions raised by evaluation ───────────────────────────────────

#[test]
fn arithmetic_limits_raise_trappable_syntax_errors() {
    let kernel = stress_kernel();
    let main = code("limits", |b| {
        b.signal_on("syntax", "bad");
        b.say(Expr::binary(
            BinaryOp::Add,
            Expr::lit("1E5000000000000000000"),
            Expr::lit("1E-5000000000000000000"),
        ));
        b.label("bad");
        b.say(concat(vec![condition("C"), Expr::var("rc")]));
        b.signal_on("syntax", "over");
        b.say(Expr::binary(
            BinaryOp::Multiply,
            Expr::lit("1E999999999"),
            Expr::lit("1E999999999"),
        ));
        b.label("over");
        b.say(concat(vec![Expr::var("rc"), condition("D")]));
        b.signal_on("syntax", "under");
        b.say(Expr::binary(
            BinaryOp::Divide,
            Expr::lit("1E-999999999"),
            Expr::lit("1E999999999"),
        ));
        b.label("under");
        b.say(concat(vec![Expr::var("rc"), condition("D")]));
    });
    kernel.register_package(PackageDefinition::new("limits", main)).unwrap();

    let (result, lines) = run(&kernel, "limits");
    assert_eq!(result.unwrap(), None);
    assert_eq!(
        lines,
        [
            "SYNTAX 41",
            "42 Arithmetic overflow; exponent of result exceeds 999999999",
            "42 Arithmetic underflow; exponent of result is below -999999999",
        ]
    );
}

#[test]
fn novalue_is_raised_only_when_trapped() {
    let kernel = stress_kernel();
    let main = code("novalue", |b| {
        b.say(Expr::var("unset"));
        b.signal_on("novalue", "missing");
        b.say(Expr::var("other"));
        b.say(Expr::lit("not reached"));
        b.label("missing");
        b.say(concat(vec![condition("C"), condition("D"), Expr::var("sigl")]));
    });
    kernel.register_package(PackageDefinition::new("novalue", main)).unwrap();

    let (result, lines) = run(&kernel, "novalue");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["UNSET", "NOVALUE OTHER 3"]);
}

#[test]
fn lostdigits_fires_when_an_operand_is_too_long() {
    let kernel = stress_kernel();
    let main = code("lost", |b| {
        b.push(Instruction::Digits(Some(Expr::lit("5"))));
        b.say(Expr::binary(BinaryOp::Add, Expr::lit("1234567"), Expr::lit("1")));
        b.signal_on("lostdigits", "lost");
        b.say(Expr::binary(BinaryOp::Add, Expr::lit("1234567"), Expr::lit("1")));
        b.label("lost");
        b.say(concat(vec![condition("C"), condition("D")]));
    });
    kernel.register_package(PackageDefinition::new("lost", main)).unwrap();

    let (result, lines) = run(&kernel, "lost");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["1.2346E+6", "LOSTDIGITS 1234567"]);
}

#[test]
fn call_on_any_catches_callable_conditions_only() {
    let kernel = stress_kernel();
    let main = code("any", |b| {
        b.call_on("any", "handler");
        b.raise(
            RaiseInstruction::new("error")
                .code(Expr::lit("7"))
                .description(Expr::lit("went wrong")),
        );
        b.say(Expr::lit("resumed"));
        b.say(Expr::var("novar"));
        b.exit(None);
        b.label("handler");
        b.say(concat(vec![condition("C"), condition("I"), condition("D")]));
        b.ret(None);
    });
    kernel.register_package(PackageDefinition::new("any", main)).unwrap();

    let (result, lines) = run(&kernel, "any");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["ERROR CALL went wrong", "resumed", "NOVAR"]);
}

#[test]
fn syntax_additional_must_be_a_single_dimension_array() {
    let kernel = stress_kernel();
    let grid = code("grid", |b| {
        b.raise(RaiseInstruction::new("syntax").code(Expr::lit("40.1")).additional(
            Expr::send(Expr::env("array"), "new", vec![Expr::lit("2"), Expr::lit("2")]),
        ));
    });
    let text = code("text", |b| {
        b.raise(
            RaiseInstruction::new("syntax")
                .code(Expr::lit("40.1"))
                .additional(Expr::lit("oops")),
        );
    });
    kernel.register_package(PackageDefinition::new("grid", grid)).unwrap();
    kernel.register_package(PackageDefinition::new("text", text)).unwrap();

    let (result, _) = run(&kernel, "grid");
    assert_eq!(syntax_code(&result), Some(ErrorCode::NOT_SINGLE_DIMENSION));
    let (result, _) = run(&kernel, "text");
    assert_eq!(syntax_code(&result), Some(ErrorCode::NOT_SINGLE_DIMENSION));
    let Err(RexxError::Condition(report)) = result else {
        panic!("expected SYNTAX, got {result:?}");
    };
    assert_eq!(
        report.message,
        "Unable to convert object \"oops\" to a single-dimensional array value"
    );
}

// ── Message dispatch ──────────────────────────────────────────────────

#[test]
fn string_messages() {
    let kernel = stress_kernel();
    let main = code("strings", |b| {
        b.assign("s", Expr::lit("Abc"));
        b.say(concat(
            ["length", "upper", "lower", "reverse"]
                .into_iter()
                .map(|message| Expr::send(Expr::var("s"), message, vec![]))
                .collect(),
        ));
    });
    kernel.register_package(PackageDefinition::new("strings", main)).unwrap();

    let (result, lines) = run(&kernel, "strings");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["3 ABC abc cbA"]);
}

#[test]
fn array_messages() {
    let kernel = stress_kernel();
    let main = code("arrays", |b| {
        b.assign("a", Expr::send(Expr::env("array"), "new", vec![]));
        b.assign("x", Expr::lit("x"));
        b.assign("y", Expr::lit("y"));
        b.expression(Expr::send(Expr::var("a"), "put", vec![Expr::var("x"), Expr::lit("3")]));
        b.say(concat(vec![
            Expr::send(Expr::var("a"), "size", vec![]),
            Expr::send(Expr::var("a"), "items", vec![]),
            Expr::send(Expr::var("a"), "first", vec![]),
            Expr::send(Expr::var("a"), "last", vec![]),
        ]));
        b.say(Expr::send(Expr::var("a"), "append", vec![Expr::var("y")]));
        b.say(concat(vec![
            Expr::send(Expr::var("a"), "index", vec![Expr::var("y")]),
            Expr::send(Expr::var("a"), "hasitem", vec![Expr::var("x")]),
            Expr::send(Expr::var("a"), "hasitem", vec![Expr::lit("z")]),
        ]));
        b.say(concat(vec![
            Expr::send(Expr::var("a"), "remove", vec![Expr::lit("3")]),
            Expr::send(Expr::var("a"), "items", vec![]),
        ]));
        b.assign(
            "g",
            Expr::send(Expr::env("array"), "new", vec![Expr::lit("2"), Expr::lit("3")]),
        );
        b.expression(Expr::send(
            Expr::var("g"),
            "put",
            vec![Expr::lit("corner"), Expr::lit("2"), Expr::lit("3")],
        ));
        b.say(concat(vec![
            Expr::send(Expr::var("g"), "dimension", vec![]),
            Expr::send(Expr::var("g"), "size", vec![]),
            Expr::send(Expr::var("g"), "at", vec![Expr::lit("2"), Expr::lit("3")]),
        ]));
    });
    kernel.register_package(PackageDefinition::new("arrays", main)).unwrap();

    let (result, lines) = run(&kernel, "arrays");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["3 1 3 3", "4", "4 1 0", "x 1", "2 6 corner"]);
}

#[test]
fn oversized_arrays_raise_instead_of_allocating() {
    let kernel = stress_kernel();
    let far = code("far", |b| {
        b.assign("a", Expr::send(Expr::env("array"), "new", vec![]));
        b.expression(Expr::send(
            Expr::var("a"),
            "put",
            vec![Expr::lit("x"), Expr::lit("999999999999999999")],
        ));
    });
    let wide = code("wide", |b| {
        b.assign(
            "g",
            Expr::send(
                Expr::env("array"),
                "new",
                vec![Expr::lit("1000000000"), Expr::lit("1000000000")],
            ),
        );
    });
    let trapped = code("trapped", |b| {
        b.signal_on("syntax", "caught");
        b.assign("a", Expr::send(Expr::env("array"), "new", vec![]));
        b.expression(Expr::send(
            Expr::var("a"),
            "put",
            vec![Expr::lit("x"), Expr::lit("999999999999999999")],
        ));
        b.label("caught");
        b.say(concat(vec![Expr::var("rc"), Expr::send(Expr::var("a"), "size", vec![])]));
    });
    for (name, main) in [("far", far), ("wide", wide), ("trapped", trapped)] {
        kernel.register_package(PackageDefinition::new(name, main)).unwrap();
    }

    for program in ["far", "wide"] {
        let (result, _) = run(&kernel, program);
        assert_eq!(syntax_code(&result), Some(ErrorCode::INCORRECT_ARGUMENT), "{program}");
        let Err(RexxError::Condition(report)) = result else {
            panic!("expected SYNTAX from {program}");
        };
        assert!(report.message.contains("exceeds the maximum"), "{}", report.message);
    }
    let (result, lines) = run(&kernel, "trapped");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["93 0"]);
}

#[test]
fn relation_messages_keep_duplicate_keys() {
    let kernel = stress_kernel();
    let main = code("relation", |b| {
        b.assign("r", Expr::send(Expr::env("relation"), "new", vec![]));
        for item in ["a", "b", "c"] {
            b.assign(item, Expr::lit(item));
        }
        for (item, key) in [("a", "k"), ("b", "k"), ("c", "j")] {
            b.expression(Expr::send(Expr::var("r"), "put", vec![Expr::var(item), Expr::lit(key)]));
        }
        let all_k = || {
            Expr::send(
                Expr::send(Expr::var("r"), "allat", vec![Expr::lit("k")]),
                "items",
                vec![],
            )
        };
        b.say(concat(vec![all_k(), Expr::send(Expr::var("r"), "items", vec![])]));
        b.say(concat(vec![
            Expr::send(Expr::var("r"), "hasitem", vec![Expr::var("b"), Expr::lit("k")]),
            Expr::send(Expr::var("r"), "hasitem", vec![Expr::var("c"), Expr::lit("k")]),
            Expr::send(Expr::var("r"), "hasitem", vec![Expr::var("c")]),
        ]));
        b.say(concat(vec![
            Expr::send(Expr::var("r"), "removeitem", vec![Expr::var("a"), Expr::lit("k")]),
            all_k(),
        ]));
        b.say(Expr::send(Expr::var("r"), "index", vec![Expr::var("c")]));
    });
    kernel.register_package(PackageDefinition::new("relation", main)).unwrap();

    let (result, lines) = run(&kernel, "relation");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["2 3", "1 0 1", "a 1", "J"]);
}

#[test]
fn directory_entries_and_unknown_fallback() {
    let kernel = stress_kernel();
    let fallback = code("fallback", |b| {
        b.use_arg(&["name"]);
        b.ret(Some(concat(vec![Expr::lit("no"), Expr::var("name")])));
    });
    let main = code("lookup", |b| {
        b.assign("d", Expr::send(Expr::env("directory"), "new", vec![]));
        b.say(Expr::send(Expr::send(Expr::var("d"), "shape", vec![]), "isnil", vec![]));
        b.expression(Expr::send(
            Expr::var("d"),
            "setmethod",
            vec![
                Expr::lit("UNKNOWN"),
                Expr::send(Expr::env("methods"), "fallback", vec![]),
            ],
        ));
        b.expression(Expr::send(Expr::var("d"), "color=", vec![Expr::lit("red")]));
        b.say(Expr::send(Expr::var("d"), "color", vec![]));
        b.say(Expr::send(Expr::var("d"), "shape", vec![]));
        b.say(Expr::send(Expr::var("d"), "[]", vec![Expr::lit("size")]));
        b.say(Expr::send(Expr::var("d"), "items", vec![]));
    });
    kernel
        .register_package(PackageDefinition::new("lookup", main).method("fallback", fallback))
        .unwrap();

    let (result, lines) = run(&kernel, "lookup");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["1", "red", "no SHAPE", "no SIZE", "1"]);
}

#[test]
fn unknown_messages_raise_nomethod() {
    let kernel = stress_kernel();
    let untrapped = code("untrapped", |b| {
        b.say(Expr::send(Expr::lit("abc"), "frobnicate", vec![]));
    });
    let trapped = code("nomethod", |b| {
        b.signal_on("nomethod", "missing");
        b.say(Expr::send(Expr::lit("abc"), "frobnicate", vec![]));
        b.label("missing");
        b.say(concat(vec![condition("C"), condition("D")]));
    });
    kernel.register_package(PackageDefinition::new("untrapped", untrapped)).unwrap();
    kernel.register_package(PackageDefinition::new("nomethod", trapped)).unwrap();

    let (result, _) = run(&kernel, "untrapped");
    assert_eq!(syntax_code(&result), Some(ErrorCode::NO_METHOD));
    let Err(RexxError::Condition(report)) = result else {
        panic!("expected SYNTAX, got {result:?}");
    };
    assert_eq!(report.message, "Object \"abc\" does not understand message \"FROBNICATE\"");

    let (result, lines) = run(&kernel, "nomethod");
    assert_eq!(result.unwrap(), None);
    assert_eq!(lines, ["NOMETHOD FROBNICATE"]);
}

// ── Requests from other threads ───────────────────────────────────────

fn spin_kernel() -> Kernel {
    let kernel = Kernel::new(KernelCreateInfo::default()).unwrap();
    let main = code("spin", |b| {
        b.do_while(Expr::lit("1"), |b| {
            b.nop();
        });
    });
    kernel.register_package(PackageDefinition::new("spin", main)).unwrap();
    kernel
}

#[test]
fn halt_by_thread_reaches_the_activity_on_that_thread() {
    let kernel = spin_kernel();
    let (sender, receiver) = mpsc::channel();
    let handle = kernel
        .spawn_activity(move |activity| {
            sender.send(std::thread::current().id()).unwrap();
            activity.set_output(Arc::new(BufferedOutput::new()));
            activity.run_program("spin", &[])
        })
        .unwrap();
    let thread = receiver.recv().unwrap();
    assert!(!kernel.halt_thread(std::thread::current().id(), "nobody here"));
    assert!(kernel.halt_thread(thread, "thread stop"));

    let result = handle.join().unwrap();
    let Err(RexxError::Condition(report)) = result else {
        panic!("expected HALT, got {result:?}");
    };
    assert_eq!(report.condition, "HALT");
    assert_eq!(report.description, "thread stop");
}

#[test]
fn set_trace_switches_tracing_on_a_running_activity() {
    let kernel = spin_kernel();
    let output = Arc::new(BufferedOutput::new());
    let activity_output = output.clone();
    let (sender, receiver) = mpsc::channel();
    let handle = kernel
        .spawn_activity(move |activity| {
            activity.set_output(activity_output);
            sender.send(activity.id()).unwrap();
            activity.run_program("spin", &[])
        })
        .unwrap();
    let id = receiver.recv().unwrap();
    assert!(!kernel.set_trace(id + 1000, true));
    assert!(kernel.set_trace(id, true));

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while output.trace_lines().is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert!(kernel.halt(id, "done tracing"));
    let result = handle.join().unwrap();
    assert!(matches!(result, Err(RexxError::Condition(ref report)) if report.condition == "HALT"));
    let traced = output.trace_lines();
    assert!(traced.iter().any(|line| line.contains("*-*")), "{traced:?}");
}
