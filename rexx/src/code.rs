//! Parsed program representation.
//!
//! Programs arrive already parsed: an ordered list of clauses plus a label
//! table. [`CodeBuilder`] assembles that list and runs the resolve pass once
//! the whole block is known, binding forward labels and call targets.

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;

use crate::builtins::BuiltinFunction;
use crate::native::NativeSignature;
use crate::numeric::NumericForm;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Clause {
    pub instruction: Instruction,
    pub location: SourceLocation,
}

/// Label name to clause index. The first definition of a name wins.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    labels: AHashMap<String, usize>,
}

impl LabelTable {
    pub fn get(&self, name: &str) -> Option<usize> {
        self.labels.get(&name.to_ascii_uppercase()).copied()
    }

    fn define(&mut self, name: &str, clause: usize) {
        self.labels.entry(name.to_ascii_uppercase()).or_insert(clause);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug)]
pub struct Code {
    pub name: String,
    pub clauses: Vec<Clause>,
    pub labels: LabelTable,
}

impl Code {
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn location(&self, clause: usize) -> Option<&SourceLocation> {
        self.clauses.get(clause).map(|c| &c.location)
    }
}

// ── Variables ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailPart {
    Constant(String),
    Variable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableRef {
    Simple(String),
    /// Stem name including the trailing period (`A.`).
    Stem(String),
    Compound { stem: String, tails: Vec<TailPart> },
}

impl VariableRef {
    /// Classifies a symbol the way the tokenizer would: `A` is simple,
    /// `A.` a stem, `A.I.2` a compound whose tail parts are variables
    /// unless they start with a digit.
    pub fn symbol(name: &str) -> VariableRef {
        let name = name.to_ascii_uppercase();
        match name.find('.') {
            None => VariableRef::Simple(name),
            Some(pos) if pos + 1 == name.len() => VariableRef::Stem(name),
            Some(pos) => {
                let stem = name[..=pos].to_string();
                let tails = name[pos + 1..]
                    .split('.')
                    .map(|part| {
                        if part.is_empty() || part.starts_with(|c: char| c.is_ascii_digit()) {
                            TailPart::Constant(part.to_string())
                        } else {
                            TailPart::Variable(part.to_string())
                        }
                    })
                    .collect();
                VariableRef::Compound { stem, tails }
            }
        }
    }

    pub fn name(&self) -> String {
        match self {
            VariableRef::Simple(name) | VariableRef::Stem(name) => name.clone(),
            VariableRef::Compound { stem, tails } => {
                let parts: Vec<&str> = tails
                    .iter()
                    .map(|t| match t {
                        TailPart::Constant(s) | TailPart::Variable(s) => s.as_str(),
                    })
                    .collect();
                format!("{stem}{}", parts.join("."))
            }
        }
    }
}

// ── Expressions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    IntegerDivide,
    Remainder,
    Power,
    /// Abuttal, no blank.
    Concat,
    ConcatBlank,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Not,
    Minus,
    Plus,
}

/// How a CALL or function name was bound by the resolve pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    Unresolved,
    Internal(usize),
    Builtin(BuiltinFunction),
    External,
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub name: String,
    pub args: Vec<Option<Expr>>,
    /// False for the quoted-string form, which skips internal labels.
    pub internal_allowed: bool,
    pub target: CallTarget,
}

impl Invocation {
    pub fn new(name: &str, args: Vec<Option<Expr>>) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            args,
            internal_allowed: true,
            target: CallTarget::Unresolved,
        }
    }

    /// `'NAME'(args)` form.
    pub fn quoted(name: &str, args: Vec<Option<Expr>>) -> Self {
        Self {
            internal_allowed: false,
            ..Self::new(name, args)
        }
    }

    fn resolve(&mut self, labels: &LabelTable) {
        self.target = resolve_target(&self.name, self.internal_allowed, labels);
        for arg in self.args.iter_mut().flatten() {
            arg.resolve(labels);
        }
    }
}

/// Internal labels take precedence over built-ins, which take precedence
/// over external routines.
pub fn resolve_target(name: &str, internal_allowed: bool, labels: &LabelTable) -> CallTarget {
    if internal_allowed {
        if let Some(idx) = labels.get(name) {
            return CallTarget::Internal(idx);
        }
    }
    match BuiltinFunction::lookup(name) {
        Some(builtin) => CallTarget::Builtin(builtin),
        None => CallTarget::External,
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(String),
    Variable(VariableRef),
    /// Environment symbol, `.NAME`.
    Environment(String),
    SelfObject,
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Prefix {
        op: PrefixOp,
        operand: Box<Expr>,
    },
    Function(Invocation),
    Message {
        receiver: Box<Expr>,
        message: String,
        args: Vec<Option<Expr>>,
    },
    /// `.array~of(...)` shorthand.
    ArrayOf(Vec<Expr>),
}

impl Expr {
    pub fn lit(text: impl Into<String>) -> Expr {
        Expr::Literal(text.into())
    }

    pub fn var(name: &str) -> Expr {
        Expr::Variable(VariableRef::symbol(name))
    }

    pub fn env(name: &str) -> Expr {
        Expr::Environment(name.to_ascii_uppercase())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn prefix(op: PrefixOp, operand: Expr) -> Expr {
        Expr::Prefix {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Function(Invocation::new(name, args.into_iter().map(Some).collect()))
    }

    pub fn quoted_call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Function(Invocation::quoted(name, args.into_iter().map(Some).collect()))
    }

    pub fn send(receiver: Expr, message: &str, args: Vec<Expr>) -> Expr {
        Expr::Message {
            receiver: Box::new(receiver),
            message: message.to_ascii_uppercase(),
            args: args.into_iter().map(Some).collect(),
        }
    }

    fn resolve(&mut self, labels: &LabelTable) {
        match self {
            Expr::Literal(_) | Expr::Variable(_) | Expr::Environment(_) | Expr::SelfObject => {}
            Expr::Binary { left, right, .. } => {
                left.resolve(labels);
                right.resolve(labels);
            }
            Expr::Prefix { operand, .. } => operand.resolve(labels),
            Expr::Function(invocation) => invocation.resolve(labels),
            Expr::Message { receiver, args, .. } => {
                receiver.resolve(labels);
                for arg in args.iter_mut().flatten() {
                    arg.resolve(labels);
                }
            }
            Expr::ArrayOf(items) => items.iter_mut().for_each(|e| e.resolve(labels)),
        }
    }
}

// ── Instructions ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RaiseExit {
    /// Raise in the current activation.
    #[default]
    None,
    /// Complete the current activation, then raise in the caller.
    Return,
    /// Leave the whole program, then raise in its caller.
    Exit,
}

#[derive(Debug, Clone)]
pub enum RaiseAdditional {
    Expr(Expr),
    /// `ARRAY(e1, e2, ...)`
    Array(Vec<Expr>),
}

#[derive(Debug, Clone, Default)]
pub struct RaiseInstruction {
    pub condition: String,
    /// RC for ERROR/FAILURE, error number for SYNTAX.
    pub code: Option<Expr>,
    pub description: Option<Expr>,
    pub additional: Option<RaiseAdditional>,
    pub result: Option<Expr>,
    pub exit: RaiseExit,
    pub propagate: bool,
}

impl RaiseInstruction {
    pub fn new(condition: &str) -> Self {
        Self {
            condition: condition.to_ascii_uppercase(),
            ..Self::default()
        }
    }

    pub fn propagate() -> Self {
        Self {
            propagate: true,
            ..Self::default()
        }
    }

    pub fn code(mut self, code: Expr) -> Self {
        self.code = Some(code);
        self
    }

    pub fn description(mut self, description: Expr) -> Self {
        self.description = Some(description);
        self
    }

    pub fn additional(mut self, additional: Expr) -> Self {
        self.additional = Some(RaiseAdditional::Expr(additional));
        self
    }

    pub fn array(mut self, items: Vec<Expr>) -> Self {
        self.additional = Some(RaiseAdditional::Array(items));
        self
    }

    pub fn result(mut self, result: Expr) -> Self {
        self.result = Some(result);
        self
    }

    pub fn returning(mut self) -> Self {
        self.exit = RaiseExit::Return;
        self
    }

    pub fn exiting(mut self) -> Self {
        self.exit = RaiseExit::Exit;
        self
    }

    fn resolve(&mut self, labels: &LabelTable) {
        for expr in [&mut self.code, &mut self.description, &mut self.result]
            .into_iter()
            .flatten()
        {
            expr.resolve(labels);
        }
        match &mut self.additional {
            Some(RaiseAdditional::Expr(expr)) => expr.resolve(labels),
            Some(RaiseAdditional::Array(items)) => {
                items.iter_mut().for_each(|e| e.resolve(labels))
            }
            None => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct UseArgTarget {
    pub target: VariableRef,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum TraceRequest {
    Setting(String),
    Value(Expr),
}

#[derive(Debug, Clone)]
pub enum Instruction {
    Nop,
    Label(String),
    Assign { target: VariableRef, value: Expr },
    Say(Option<Expr>),
    /// A message term used as an instruction; its result is discarded.
    Expression(Expr),
    /// Host command sent to the current ADDRESS environment.
    Command(Expr),
    Call(Invocation),
    /// `CALL (expr) args`: the name is computed and resolved at run time.
    CallDynamic { name: Expr, args: Vec<Option<Expr>> },
    CallOn { condition: String, label: String, target: Option<usize> },
    CallOff { condition: String },
    Signal { label: String, target: Option<usize> },
    SignalDynamic(Expr),
    SignalOn { condition: String, label: String, target: Option<usize> },
    SignalOff { condition: String },
    Raise(Box<RaiseInstruction>),
    Return(Option<Expr>),
    Exit(Option<Expr>),
    Jump(usize),
    JumpIfFalse { condition: Expr, target: usize },
    Procedure { expose: Vec<String> },
    Expose(Vec<String>),
    Drop(Vec<VariableRef>),
    Digits(Option<Expr>),
    Fuzz(Option<Expr>),
    Form(NumericForm),
    Trace(TraceRequest),
    Address { environment: Option<String>, command: Option<Expr> },
    UseArg(Vec<UseArgTarget>),
}

impl Instruction {
    /// Resolve hook run once after the enclosing block is complete.
    pub fn resolve(&mut self, labels: &LabelTable) {
        match self {
            Instruction::Assign { value, .. } => value.resolve(labels),
            Instruction::Say(Some(expr))
            | Instruction::Expression(expr)
            | Instruction::Command(expr)
            | Instruction::SignalDynamic(expr)
            | Instruction::Return(Some(expr))
            | Instruction::Exit(Some(expr))
            | Instruction::Digits(Some(expr))
            | Instruction::Fuzz(Some(expr))
            | Instruction::Trace(TraceRequest::Value(expr))
            | Instruction::JumpIfFalse {
                condition: expr, ..
            } => expr.resolve(labels),
            Instruction::Address {
                command: Some(expr),
                ..
            } => expr.resolve(labels),
            Instruction::Call(invocation) => invocation.resolve(labels),
            Instruction::CallDynamic { name, args } => {
                name.resolve(labels);
                for arg in args.iter_mut().flatten() {
                    arg.resolve(labels);
                }
            }
            Instruction::CallOn { label, target, .. }
            | Instruction::SignalOn { label, target, .. }
            | Instruction::Signal { label, target } => *target = labels.get(label),
            Instruction::Raise(raise) => raise.resolve(labels),
            Instruction::UseArg(targets) => {
                for default in targets.iter_mut().filter_map(|t| t.default.as_mut()) {
                    default.resolve(labels);
                }
            }
            _ => {}
        }
    }

    /// Clause text used when the builder is not given any.
    fn keyword(&self) -> String {
        match self {
            Instruction::Nop => "NOP".into(),
            Instruction::Label(name) => format!("{name}:"),
            Instruction::Assign { target, .. } => format!("{} = ...", target.name()),
            Instruction::Say(_) => "SAY".into(),
            Instruction::Expression(_) => "(message)".into(),
            Instruction::Command(_) => "(command)".into(),
            Instruction::Call(inv) => format!("CALL {}", inv.name),
            Instruction::CallDynamic { .. } => "CALL (...)".into(),
            Instruction::CallOn {
                condition, label, ..
            } => format!("CALL ON {condition} NAME {label}"),
            Instruction::CallOff { condition } => format!("CALL OFF {condition}"),
            Instruction::Signal { label, .. } => format!("SIGNAL {label}"),
            Instruction::SignalDynamic(_) => "SIGNAL VALUE".into(),
            Instruction::SignalOn {
                condition, label, ..
            } => format!("SIGNAL ON {condition} NAME {label}"),
            Instruction::SignalOff { condition } => format!("SIGNAL OFF {condition}"),
            Instruction::Raise(raise) if raise.propagate => "RAISE PROPAGATE".into(),
            Instruction::Raise(raise) => format!("RAISE {}", raise.condition),
            Instruction::Return(_) => "RETURN".into(),
            Instruction::Exit(_) => "EXIT".into(),
            Instruction::Jump(_) => "END".into(),
            Instruction::JumpIfFalse { .. } => "IF".into(),
            Instruction::Procedure { .. } => "PROCEDURE".into(),
            Instruction::Expose(_) => "EXPOSE".into(),
            Instruction::Drop(_) => "DROP".into(),
            Instruction::Digits(_) => "NUMERIC DIGITS".into(),
            Instruction::Fuzz(_) => "NUMERIC FUZZ".into(),
            Instruction::Form(form) => format!("NUMERIC FORM {}", form.name()),
            Instruction::Trace(_) => "TRACE".into(),
            Instruction::Address { environment, .. } => {
                format!("ADDRESS {}", environment.as_deref().unwrap_or(""))
            }
            Instruction::UseArg(_) => "USE ARG".into(),
        }
    }
}

// ── Building ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationError {
    pub program: String,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for TranslationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} line {}: {}", self.program, self.line, self.message)
    }
}

impl std::error::Error for TranslationError {}

/// Placeholder for a jump whose destination is not known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpPatch(usize);

pub struct CodeBuilder {
    name: String,
    clauses: Vec<Clause>,
    next_line: usize,
}

impl CodeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            clauses: Vec::new(),
            next_line: 1,
        }
    }

    /// Index the next clause will get.
    pub fn position(&self) -> usize {
        self.clauses.len()
    }

    pub fn clause(&mut self, text: &str, instruction: Instruction) -> &mut Self {
        let line = self.next_line;
        self.next_line += 1;
        self.clauses.push(Clause {
            instruction,
            location: SourceLocation {
                line,
                text: text.to_string(),
            },
        });
        self
    }

    pub fn push(&mut self, instruction: Instruction) -> &mut Self {
        let text = instruction.keyword();
        self.clause(&text, instruction)
    }

    pub fn label(&mut self, name: &str) -> &mut Self {
        self.push(Instruction::Label(name.to_ascii_uppercase()))
    }

    pub fn nop(&mut self) -> &mut Self {
        self.push(Instruction::Nop)
    }

    pub fn assign(&mut self, name: &str, value: Expr) -> &mut Self {
        self.push(Instruction::Assign {
            target: VariableRef::symbol(name),
            value,
        })
    }

    pub fn say(&mut self, value: Expr) -> &mut Self {
        self.push(Instruction::Say(Some(value)))
    }

    pub fn expression(&mut self, value: Expr) -> &mut Self {
        self.push(Instruction::Expression(value))
    }

    pub fn command(&mut self, command: Expr) -> &mut Self {
        self.push(Instruction::Command(command))
    }

    pub fn call(&mut self, name: &str, args: Vec<Expr>) -> &mut Self {
        self.push(Instruction::Call(Invocation::new(
            name,
            args.into_iter().map(Some).collect(),
        )))
    }

    pub fn call_quoted(&mut self, name: &str, args: Vec<Expr>) -> &mut Self {
        self.push(Instruction::Call(Invocation::quoted(
            name,
            args.into_iter().map(Some).collect(),
        )))
    }

    pub fn call_dynamic(&mut self, name: Expr, args: Vec<Expr>) -> &mut Self {
        self.push(Instruction::CallDynamic {
            name,
            args: args.into_iter().map(Some).collect(),
        })
    }

    pub fn call_on(&mut self, condition: &str, label: &str) -> &mut Self {
        self.push(Instruction::CallOn {
            condition: condition.to_ascii_uppercase(),
            label: label.to_ascii_uppercase(),
            target: None,
        })
    }

    pub fn call_off(&mut self, condition: &str) -> &mut Self {
        self.push(Instruction::CallOff {
            condition: condition.to_ascii_uppercase(),
        })
    }

    pub fn signal(&mut self, label: &str) -> &mut Self {
        self.push(Instruction::Signal {
            label: label.to_ascii_uppercase(),
            target: None,
        })
    }

    pub fn signal_value(&mut self, target: Expr) -> &mut Self {
        self.push(Instruction::SignalDynamic(target))
    }

    pub fn signal_on(&mut self, condition: &str, label: &str) -> &mut Self {
        self.push(Instruction::SignalOn {
            condition: condition.to_ascii_uppercase(),
            label: label.to_ascii_uppercase(),
            target: None,
        })
    }

    pub fn signal_off(&mut self, condition: &str) -> &mut Self {
        self.push(Instruction::SignalOff {
            condition: condition.to_ascii_uppercase(),
        })
    }

    pub fn raise(&mut self, raise: RaiseInstruction) -> &mut Self {
        self.push(Instruction::Raise(Box::new(raise)))
    }

    pub fn ret(&mut self, value: Option<Expr>) -> &mut Self {
        self.push(Instruction::Return(value))
    }

    pub fn exit(&mut self, value: Option<Expr>) -> &mut Self {
        self.push(Instruction::Exit(value))
    }

    pub fn procedure(&mut self, expose: &[&str]) -> &mut Self {
        self.push(Instruction::Procedure {
            expose: expose.iter().map(|s| s.to_ascii_uppercase()).collect(),
        })
    }

    pub fn expose(&mut self, names: &[&str]) -> &mut Self {
        self.push(Instruction::Expose(
            names.iter().map(|s| s.to_ascii_uppercase()).collect(),
        ))
    }

    pub fn drop_vars(&mut self, names: &[&str]) -> &mut Self {
        self.push(Instruction::Drop(
            names.iter().map(|s| VariableRef::symbol(s)).collect(),
        ))
    }

    pub fn use_arg(&mut self, names: &[&str]) -> &mut Self {
        self.push(Instruction::UseArg(
            names
                .iter()
                .map(|s| UseArgTarget {
                    target: VariableRef::symbol(s),
                    default: None,
                })
                .collect(),
        ))
    }

    pub fn jump_if_false(&mut self, condition: Expr) -> JumpPatch {
        let at = self.position();
        self.push(Instruction::JumpIfFalse {
            condition,
            target: usize::MAX,
        });
        JumpPatch(at)
    }

    pub fn jump(&mut self) -> JumpPatch {
        let at = self.position();
        self.push(Instruction::Jump(usize::MAX));
        JumpPatch(at)
    }

    pub fn jump_to(&mut self, target: usize) -> &mut Self {
        self.push(Instruction::Jump(target))
    }

    /// Points a pending jump at the next clause.
    pub fn patch(&mut self, patch: JumpPatch) {
        let here = self.position();
        match &mut self.clauses[patch.0].instruction {
            Instruction::Jump(target) | Instruction::JumpIfFalse { target, .. } => *target = here,
            _ => {}
        }
    }

    pub fn if_then(&mut self, condition: Expr, then: impl FnOnce(&mut Self)) -> &mut Self {
        let skip = self.jump_if_false(condition);
        then(self);
        self.patch(skip);
        self
    }

    pub fn if_else(
        &mut self,
        condition: Expr,
        then: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let to_else = self.jump_if_false(condition);
        then(self);
        let to_end = self.jump();
        self.patch(to_else);
        otherwise(self);
        self.patch(to_end);
        self
    }

    pub fn do_while(&mut self, condition: Expr, body: impl FnOnce(&mut Self)) -> &mut Self {
        let top = self.position();
        let exit = self.jump_if_false(condition);
        body(self);
        self.jump_to(top);
        self.patch(exit);
        self
    }

    /// Builds the label table and runs every clause's resolve hook.
    pub fn build(self) -> Result<Code, TranslationError> {
        let mut labels = LabelTable::default();
        for (idx, clause) in self.clauses.iter().enumerate() {
            if let Instruction::Label(name) = &clause.instruction {
                labels.define(name, idx);
            }
        }
        let count = self.clauses.len();
        let mut clauses = self.clauses;
        for clause in &mut clauses {
            match &clause.instruction {
                Instruction::Jump(target) | Instruction::JumpIfFalse { target, .. }
                    if *target > count =>
                {
                    return Err(TranslationError {
                        program: self.name.clone(),
                        line: clause.location.line,
                        message: "unterminated control structure".into(),
                    });
                }
                Instruction::Raise(raise) if !raise.propagate && raise.condition.is_empty() => {
                    return Err(TranslationError {
                        program: self.name.clone(),
                        line: clause.location.line,
                        message: "RAISE requires a condition name".into(),
                    });
                }
                _ => {}
            }
            clause.instruction.resolve(&labels);
        }
        Ok(Code {
            name: self.name,
            clauses,
            labels,
        })
    }
}

// ── Packages ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum RoutineSource {
    Rexx(Arc<Code>),
    Native {
        library: String,
        entry: String,
        signature: NativeSignature,
    },
}

#[derive(Debug, Clone)]
pub struct RoutineDefinition {
    pub name: String,
    pub public: bool,
    pub source: RoutineSource,
}

/// One translation unit as produced by the parser: the main program plus
/// its directives.
#[derive(Debug, Clone)]
pub struct PackageDefinition {
    pub name: String,
    pub main: Arc<Code>,
    pub routines: Vec<RoutineDefinition>,
    pub methods: Vec<(String, Arc<Code>)>,
    pub requires: Vec<String>,
}

impl PackageDefinition {
    pub fn new(name: &str, main: Code) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            main: Arc::new(main),
            routines: Vec::new(),
            methods: Vec::new(),
            requires: Vec::new(),
        }
    }

    pub fn routine(mut self, name: &str, public: bool, code: Code) -> Self {
        self.routines.push(RoutineDefinition {
            name: name.to_ascii_uppercase(),
            public,
            source: RoutineSource::Rexx(Arc::new(code)),
        });
        self
    }

    pub fn native_routine(
        mut self,
        name: &str,
        public: bool,
        library: &str,
        entry: &str,
        signature: NativeSignature,
    ) -> Self {
        self.routines.push(RoutineDefinition {
            name: name.to_ascii_uppercase(),
            public,
            source: RoutineSource::Native {
                library: library.to_ascii_uppercase(),
                entry: entry.to_ascii_uppercase(),
                signature,
            },
        });
        self
    }

    pub fn method(mut self, name: &str, code: Code) -> Self {
        self.methods.push((name.to_ascii_uppercase(), Arc::new(code)));
        self
    }

    pub fn requires(mut self, name: &str) -> Self {
        self.requires.push(name.to_ascii_uppercase());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_classify() {
        assert_eq!(VariableRef::symbol("abc"), VariableRef::Simple("ABC".into()));
        assert_eq!(VariableRef::symbol("a."), VariableRef::Stem("A.".into()));
        assert_eq!(
            VariableRef::symbol("a.i.2"),
            VariableRef::Compound {
                stem: "A.".into(),
                tails: vec![TailPart::Variable("I".into()), TailPart::Constant("2".into())],
            }
        );
        assert_eq!(VariableRef::symbol("a.i.2").name(), "A.I.2");
    }

    #[test]
    fn labels_resolve_forward_and_first_wins() {
        let mut b = CodeBuilder::new("t");
        b.signal("l1").call("l1", vec![]).call("length", vec![Expr::lit("x")]);
        b.call("nowhere", vec![]).label("L1").label("l1").nop();
        let code = b.build().unwrap();
        assert_eq!(code.labels.get("L1"), Some(4));
        assert!(matches!(
            code.clauses[0].instruction,
            Instruction::Signal { target: Some(4), .. }
        ));
        let Instruction::Call(inv) = &code.clauses[1].instruction else {
            panic!("expected call");
        };
        assert_eq!(inv.target, CallTarget::Internal(4));
        let Instruction::Call(inv) = &code.clauses[2].instruction else {
            panic!("expected call");
        };
        assert_eq!(inv.target, CallTarget::Builtin(BuiltinFunction::Length));
        let Instruction::Call(inv) = &code.clauses[3].instruction else {
            panic!("expected call");
        };
        assert_eq!(inv.target, CallTarget::External);
    }

    #[test]
    fn quoted_calls_skip_labels() {
        let mut b = CodeBuilder::new("t");
        b.call_quoted("length", vec![]).call_quoted("sub", vec![]).label("sub").label("length");
        let code = b.build().unwrap();
        let targets: Vec<CallTarget> = code.clauses[..2]
            .iter()
            .map(|c| match &c.instruction {
                Instruction::Call(inv) => inv.target,
                _ => CallTarget::Unresolved,
            })
            .collect();
        assert_eq!(targets, vec![CallTarget::Builtin(BuiltinFunction::Length), CallTarget::External]);
    }

    #[test]
    fn structured_jumps_are_patched() {
        let mut b = CodeBuilder::new("t");
        b.if_else(
            Expr::lit("1"),
            |b| {
                b.say(Expr::lit("yes"));
            },
            |b| {
                b.say(Expr::lit("no"));
            },
        );
        let code = b.build().unwrap();
        assert!(matches!(code.clauses[0].instruction, Instruction::JumpIfFalse { target: 3, .. }));
        assert!(matches!(code.clauses[2].instruction, Instruction::Jump(4)));
    }

    #[test]
    fn unpatched_jump_is_a_translation_error() {
        let mut b = CodeBuilder::new("t");
        b.jump();
        let err = b.build().unwrap_err();
        assert_eq!(err.line, 1);
    }
}
