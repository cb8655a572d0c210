use std::process;

use clap::Parser as ClapParser;

use rexx::{
    ActivitySettings, ArgKind, BinaryOp, CodeBuilder, Expr, HeapSettings, Kernel,
    KernelCreateInfo, NativeArgument, NativeContext, NativeLibrary, NativeSignature,
    PackageDefinition, RaiseInstruction, TraceSetting, Unwind, Value,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Demo program to run
    #[arg(default_value = "HELLO", help = "Name of the demo program to run")]
    program: String,

    /// Arguments passed to the program
    args: Vec<String>,

    #[arg(long, help = "List the demo programs and exit")]
    list: bool,

    #[arg(long, help = "Collect at every safe point and never reuse freed slots")]
    stress_gc: bool,

    #[arg(long, help = "Allocations between collections")]
    gc_threshold: Option<usize>,

    #[arg(long, help = "Maximum depth of the activation stack")]
    max_depth: Option<usize>,

    #[arg(long, help = "Initial TRACE setting letter (N, A, C, E, F, I, L, R, O)")]
    trace: Option<char>,
}

const DEMOS: &[(&str, &str)] = &[
    ("HELLO", "internal CALL with an argument and a RESULT"),
    ("SIGNAL", "SIGNAL ON SYNTAX catching a raised error"),
    ("CALLON", "CALL ON ERROR around a failing host command"),
    ("NATIVE", "external routine resolved from a native library"),
    ("RAISE", "untrapped RAISE SYNTAX with substitutions"),
];

fn hello() -> PackageDefinition {
    let mut b = CodeBuilder::new("hello");
    b.call("greet", vec![Expr::call("arg", vec![Expr::lit("1")])]);
    b.say(Expr::var("result"));
    b.exit(None);
    b.label("greet").procedure(&[]).use_arg(&["who"]);
    b.if_then(
        Expr::binary(BinaryOp::Equal, Expr::var("who"), Expr::lit("")),
        |b| {
            b.assign("who", Expr::lit("world"));
        },
    );
    b.ret(Some(Expr::binary(
        BinaryOp::ConcatBlank,
        Expr::lit("Hello,"),
        Expr::var("who"),
    )));
    PackageDefinition::new("hello", build(b))
}

fn signal() -> PackageDefinition {
    let mut b = CodeBuilder::new("signal");
    b.signal_on("syntax", "oops");
    b.raise(RaiseInstruction::new("syntax").code(Expr::lit("40.1")).array(vec![Expr::lit("DEMO")]));
    b.say(Expr::lit("not reached"));
    b.label("oops");
    b.say(Expr::binary(
        BinaryOp::ConcatBlank,
        Expr::lit("caught"),
        Expr::call("condition", vec![Expr::lit("C")]),
    ));
    b.say(Expr::binary(BinaryOp::ConcatBlank, Expr::lit("rc ="), Expr::var("rc")));
    b.say(Expr::call("condition", vec![Expr::lit("D")]));
    PackageDefinition::new("signal", build(b))
}

fn call_on() -> PackageDefinition {
    let mut b = CodeBuilder::new("callon");
    b.call_on("error", "failed");
    b.command(Expr::lit("fail 3"));
    b.say(Expr::lit("continued after the command"));
    b.exit(None);
    b.label("failed");
    b.say(Expr::binary(
        BinaryOp::ConcatBlank,
        Expr::lit("command failed, rc ="),
        Expr::var("rc"),
    ));
    b.ret(None);
    PackageDefinition::new("callon", build(b))
}

fn native() -> PackageDefinition {
    let mut b = CodeBuilder::new("native");
    b.say(Expr::call("twice", vec![Expr::lit("21")]));
    PackageDefinition::new("native", build(b)).native_routine(
        "twice",
        false,
        "demolib",
        "twice",
        NativeSignature::new(&[ArgKind::Int64], 1),
    )
}

fn raise() -> PackageDefinition {
    let mut b = CodeBuilder::new("raise");
    b.raise(
        RaiseInstruction::new("syntax")
            .code(Expr::lit("99.1"))
            .array(vec![Expr::lit("x"), Expr::lit("y")]),
    );
    PackageDefinition::new("raise", build(b))
}

fn build(builder: CodeBuilder) -> rexx::Code {
    match builder.build() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error building demo: {err}");
            process::exit(1);
        }
    }
}

fn twice(ctx: &mut NativeContext<'_, '_>, args: &[NativeArgument]) -> Result<Value, Unwind> {
    let n = match args.first() {
        Some(NativeArgument::Int64(n)) => *n,
        _ => 0,
    };
    Ok(ctx.string(&(n * 2).to_string()))
}

/// DEMO environment: `fail n` returns n, anything else succeeds.
fn demo_command(_environment: &str, command: &str) -> i32 {
    let mut words = command.split_whitespace();
    match (words.next(), words.next()) {
        (Some(w), Some(rc)) if w.eq_ignore_ascii_case("fail") => rc.parse().unwrap_or(1),
        _ => 0,
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.list {
        for (name, about) in DEMOS {
            println!("{name:<8} {about}");
        }
        return;
    }

    let mut heap = HeapSettings {
        stress: cli.stress_gc,
        ..Default::default()
    };
    if let Some(threshold) = cli.gc_threshold {
        heap.allocations_before_gc = threshold;
    }
    let mut activity = ActivitySettings {
        address: "DEMO".into(),
        ..Default::default()
    };
    if let Some(depth) = cli.max_depth {
        activity.max_depth = depth;
    }
    if let Some(letter) = cli.trace {
        match TraceSetting::parse(letter) {
            Some(setting) => activity.trace = setting,
            None => {
                eprintln!("Unknown trace setting '{letter}'");
                process::exit(2);
            }
        }
    }

    let kernel = match Kernel::new(KernelCreateInfo {
        heap,
        activity,
        ..Default::default()
    }) {
        Ok(kernel) => kernel,
        Err(err) => {
            eprintln!("Error creating kernel: {err}");
            process::exit(1);
        }
    };
    kernel.register_library(NativeLibrary::new("demolib").entry("twice", twice));
    kernel.register_command_handler("DEMO", demo_command);
    for package in [hello(), signal(), call_on(), native(), raise()] {
        if let Err(err) = kernel.register_package(package) {
            eprintln!("Error registering demo: {err}");
            process::exit(1);
        }
    }

    let args: Vec<&str> = cli.args.iter().map(String::as_str).collect();
    let mut activity = kernel.create_activity();
    match activity.run_program(&cli.program, &args) {
        Ok(Some(result)) => println!("{result}"),
        Ok(None) => {}
        Err(err) => {
            eprintln!("{err}");
            if let Some(report) = err.report() {
                for line in &report.traceback {
                    eprintln!("{line}");
                }
            }
            process::exit(1);
        }
    }
}
