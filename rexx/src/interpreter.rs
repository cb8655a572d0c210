//! The clause loop.
//!
//! An [`Interpreter`] borrows the kernel lock and one activity's frame
//! stack for as long as it runs. Each activation is driven by
//! [`Interpreter::run_activation`], which runs the clause-boundary work
//! (asynchronous requests, queued CALL ON handlers, the GC safe point,
//! cooperative yields) before every clause.
//!
//! Handles held across anything that can reach a clause boundary live on
//! a frame's operand stack, never only in Rust locals.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::MutexGuard;

use crate::Value;
use crate::activation::{
    ActivationKind, ActivationSettings, ActivationState, Frame, PendingTrap, RexxActivation,
    TraceSetting,
};
use crate::activity::ActivityState;
use crate::alloc::{alloc_directory, alloc_string, alloc_variables};
use crate::builtins;
use crate::code::{
    CallTarget, Code, Expr, Instruction, TraceRequest, UseArgTarget, resolve_target,
};
use crate::collections::{array_items, directory_at, directory_put};
use crate::condition::{Completion, RESULT, Unwind, is_severe};
use crate::errors::{ErrorCode, FatalError, RexxError};
use crate::globals::Globals;
use crate::heap::RootProvider;
use crate::kernel::{Kernel, Memory};
use crate::numeric::MAX_DIGITS;
use crate::object::ObjectBody;
use crate::package;
use crate::trap::TrapKind;
use crate::variables::stem_default;

/// What a clause asks the loop to do next.
pub(crate) enum Step {
    Continue,
    Complete(Completion),
}

pub struct Interpreter<'a> {
    pub(crate) memory: MutexGuard<'a, Memory>,
    pub(crate) kernel: &'a Kernel,
    pub(crate) activity: &'a mut ActivityState,
}

/// Roots at a safe point: the globals, every parked activity, and this
/// activity's frames.
struct SafepointRoots<'r> {
    globals: &'r mut Globals,
    parked: &'r mut AHashMap<u64, Vec<Value>>,
    frames: &'r mut [Frame],
}

impl RootProvider for SafepointRoots<'_> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        self.globals.visit_roots(visitor);
        for roots in self.parked.values_mut() {
            roots.iter_mut().for_each(&mut *visitor);
        }
        for frame in self.frames.iter_mut() {
            frame.visit_roots(visitor);
        }
    }
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(
        memory: MutexGuard<'a, Memory>,
        kernel: &'a Kernel,
        activity: &'a mut ActivityState,
    ) -> Self {
        Self {
            memory,
            kernel,
            activity,
        }
    }

    // ── Frame access ──────────────────────────────────────────────────

    pub(crate) fn act(&self, idx: usize) -> &RexxActivation {
        match &self.activity.frames[idx] {
            Frame::Rexx(act) => act,
            Frame::Native(_) => panic!("frame {idx} is a native activation"),
        }
    }

    pub(crate) fn act_mut(&mut self, idx: usize) -> &mut RexxActivation {
        match &mut self.activity.frames[idx] {
            Frame::Rexx(act) => act,
            Frame::Native(_) => panic!("frame {idx} is a native activation"),
        }
    }

    pub(crate) fn push(&mut self, idx: usize, value: Value) {
        self.act_mut(idx).stack.push(value);
    }

    pub(crate) fn pop(&mut self, idx: usize) -> Value {
        self.act_mut(idx).stack.pop().unwrap_or(Value::NULL)
    }

    /// Copies of the top `argc` stack entries; they stay on the stack.
    pub(crate) fn stack_args(&self, idx: usize, argc: usize) -> Vec<Value> {
        let stack = &self.act(idx).stack;
        stack[stack.len().saturating_sub(argc)..].to_vec()
    }

    pub(crate) fn nil(&self) -> Value {
        self.memory.globals.special.nil
    }

    pub(crate) fn boolean(&self, value: bool) -> Value {
        self.memory.globals.boolean(value)
    }

    pub(crate) fn string(&mut self, text: impl Into<String>) -> Value {
        alloc_string(&mut self.memory.heap, text)
    }

    /// Shared string for program text constants.
    pub(crate) fn literal(&mut self, text: &str) -> Value {
        let memory = &mut *self.memory;
        memory.globals.intern(&mut memory.heap, text)
    }

    /// String form without raising NOSTRING.
    pub(crate) fn plain_string(&self, value: Value) -> String {
        let heap = &self.memory.heap;
        match heap.try_get(value).map(|o| &o.body) {
            None => String::new(),
            Some(ObjectBody::String(text)) => text.clone(),
            Some(ObjectBody::Stem(stem)) => {
                let default = stem_default(heap, value);
                if default.is_null() {
                    stem.name.clone()
                } else {
                    self.plain_string(default)
                }
            }
            Some(body) => body.default_name(),
        }
    }

    /// String form for interpreted code. Objects without a string value
    /// raise NOSTRING and then use their default name.
    pub(crate) fn string_of(&mut self, idx: usize, value: Value) -> Result<String, Unwind> {
        let needs_condition = matches!(
            self.memory.heap.try_get(value).map(|o| &o.body),
            Some(body) if !matches!(body, ObjectBody::String(_) | ObjectBody::Stem(_) | ObjectBody::Nil)
        );
        let text = self.plain_string(value);
        if needs_condition && self.trap_available(idx, "NOSTRING") {
            let condition = self.new_condition("NOSTRING", &text);
            self.raise_condition(idx, condition)?;
        }
        Ok(text)
    }

    pub(crate) fn is_true(&self, value: Value) -> bool {
        self.plain_string(value) == "1"
    }

    /// `0` or `1`, else SYNTAX `code`.
    pub(crate) fn logical(&mut self, idx: usize, value: Value, code: ErrorCode) -> Result<bool, Unwind> {
        let text = self.string_of(idx, value)?;
        match text.as_str() {
            "1" => Ok(true),
            "0" => Ok(false),
            _ => Err(self.syntax_error(idx, code, &[&text])),
        }
    }

    // ── Programs and activations ──────────────────────────────────────

    /// Runs the main program of registered package `name`.
    pub fn run_program(&mut self, name: &str, args: &[&str]) -> Result<Option<String>, RexxError> {
        let memory = &mut *self.memory;
        let package = directory_at(&memory.heap, memory.globals.programs, name);
        if package.is_null() {
            return Err(FatalError::ProgramNotFound(name.to_ascii_uppercase()).into());
        }
        package::ensure_installed(&mut memory.heap, &memory.globals, package);
        let Some(code) = package::main_code(&memory.heap, package) else {
            return Err(FatalError::ProgramNotFound(name.to_ascii_uppercase()).into());
        };
        let arguments = args.iter().map(|a| self.string(*a)).collect();
        let act = self.new_activation(None, code, ActivationKind::Program, package, arguments);
        log::debug!("activity {} running {}", self.activity.id, name);
        let outcome = self.invoke_rexx(act);
        self.memory.parked.remove(&self.activity.id);
        self.finish(outcome)
    }

    fn finish(&mut self, outcome: Result<Completion, Unwind>) -> Result<Option<String>, RexxError> {
        match outcome {
            Ok(Completion::Returned(value)) if value.is_null() => Ok(None),
            Ok(Completion::Returned(value)) => Ok(Some(self.plain_string(value))),
            Ok(Completion::Raised { condition }) => {
                let name = self.condition_name(condition);
                let result = directory_at(&self.memory.heap, condition, RESULT);
                if is_severe(&name) {
                    Err(RexxError::Condition(self.condition_report(0, condition)))
                } else if result.is_null() {
                    Ok(None)
                } else {
                    Ok(Some(self.plain_string(result)))
                }
            }
            Err(Unwind::Terminate(report)) => Err(RexxError::Condition(*report)),
            Err(Unwind::Fatal(err)) => Err(RexxError::Fatal(err)),
            Err(other) => {
                log::error!("control transfer escaped the program: {other:?}");
                Err(FatalError::LostTransfer.into())
            }
        }
    }

    /// Activation for a program, routine or method; EXIT stops here.
    pub(crate) fn new_activation(
        &mut self,
        caller: Option<usize>,
        code: Arc<Code>,
        kind: ActivationKind,
        package: Value,
        arguments: Vec<Value>,
    ) -> RexxActivation {
        let settings = match caller {
            Some(idx) => self.act(idx).settings.clone(),
            None => {
                let defaults = &self.activity.settings;
                ActivationSettings {
                    trace: defaults.trace,
                    address: defaults.address.clone(),
                    previous_address: defaults.address.clone(),
                    ..ActivationSettings::default()
                }
            }
        };
        let mut act = RexxActivation::new(code, kind, settings);
        act.package = package;
        act.arguments = arguments;
        act.variables = alloc_variables(&mut self.memory.heap);
        act.parent = caller;
        act.program_root = self.activity.frames.len();
        act
    }

    /// Activation sharing the caller's code and variables, as for an
    /// internal CALL or a CALL ON handler.
    fn internal_activation(
        &self,
        caller: usize,
        kind: ActivationKind,
        target: usize,
        arguments: Vec<Value>,
        condition: Value,
    ) -> RexxActivation {
        let parent = self.act(caller);
        let mut act = RexxActivation::new(parent.code.clone(), kind, parent.settings.clone());
        act.package = parent.package;
        act.executable = parent.executable;
        act.receiver = parent.receiver;
        act.variables = parent.variables;
        act.traps = parent.traps.clone();
        act.condition = if condition.is_null() {
            parent.condition
        } else {
            condition
        };
        act.arguments = arguments;
        act.parent = Some(caller);
        act.program_root = parent.program_root;
        act.procedure_allowed = true;
        act.pc = target;
        act.current_clause = target;
        act
    }

    /// Pushes `act`, runs it, and pops it (and anything above it) again.
    pub(crate) fn invoke_rexx(&mut self, act: RexxActivation) -> Result<Completion, Unwind> {
        let base = self.activity.frames.len();
        if base >= self.activity.settings.max_depth {
            return Err(Unwind::Fatal(FatalError::ControlStackFull { depth: base }));
        }
        self.activity.frames.push(Frame::Rexx(Box::new(act)));
        let result = self.run_activation(base);
        self.activity.frames.truncate(base);
        result
    }

    pub(crate) fn run_activation(&mut self, idx: usize) -> Result<Completion, Unwind> {
        let code = self.act(idx).code.clone();
        self.act_mut(idx).state = ActivationState::Running;
        loop {
            if let Err(unwind) = self.clause_boundary(idx) {
                if let Some(done) = self.catch(idx, unwind)? {
                    return Ok(done);
                }
                continue;
            }
            let act = self.act_mut(idx);
            let pc = act.pc;
            let Some(clause) = code.clauses.get(pc) else {
                act.state = ActivationState::Returned;
                return Ok(Completion::Returned(Value::NULL));
            };
            act.current_clause = pc;
            act.pc = pc + 1;
            self.trace_clause(idx, &clause.instruction);

            match self.step(idx, &code, &clause.instruction) {
                Ok(Step::Continue) => {
                    if !matches!(clause.instruction, Instruction::Label(_)) {
                        self.act_mut(idx).procedure_allowed = false;
                    }
                }
                Ok(Step::Complete(done)) => {
                    // Handlers queued by the completing clause still run.
                    if !self.act(idx).pending.is_empty() {
                        let held = match done {
                            Completion::Returned(value) => value,
                            Completion::Raised { condition } => condition,
                        };
                        self.push(idx, held);
                        let drained = self.run_pending_traps(idx);
                        self.pop(idx);
                        if let Err(unwind) = drained {
                            if let Some(done) = self.catch(idx, unwind)? {
                                return Ok(done);
                            }
                            continue;
                        }
                    }
                    self.act_mut(idx).state = match done {
                        Completion::Returned(_) => ActivationState::Returned,
                        Completion::Raised { .. } => ActivationState::Raised,
                    };
                    return Ok(done);
                }
                Err(unwind) => {
                    if let Some(done) = self.catch(idx, unwind)? {
                        return Ok(done);
                    }
                }
            }
        }
    }

    /// Handles the transfers aimed at frame `idx`; everything else keeps
    /// unwinding.
    fn catch(&mut self, idx: usize, unwind: Unwind) -> Result<Option<Completion>, Unwind> {
        match unwind {
            Unwind::Signal { frame, target } if frame == idx => {
                let act = self.act_mut(idx);
                act.stack.clear();
                act.pc = target;
                act.procedure_allowed = false;
                act.state = ActivationState::Running;
                Ok(None)
            }
            Unwind::Trap { frame } if frame == idx => {
                let act = self.act_mut(idx);
                act.stack.clear();
                act.state = ActivationState::Running;
                Ok(None)
            }
            Unwind::Exit { frame, value } if frame == idx => {
                self.act_mut(idx).state = ActivationState::Returned;
                Ok(Some(Completion::Returned(value)))
            }
            Unwind::ExitRaise { frame, condition } if frame == idx => {
                self.act_mut(idx).state = ActivationState::Raised;
                Ok(Some(Completion::Raised { condition }))
            }
            other => Err(other),
        }
    }

    // ── Clause boundary ───────────────────────────────────────────────

    fn clause_boundary(&mut self, idx: usize) -> Result<(), Unwind> {
        self.poll_requests(idx)?;
        self.run_pending_traps(idx)?;
        if self.memory.heap.should_collect() {
            self.collect_garbage();
        }
        self.activity.clauses_since_yield += 1;
        if self.activity.clauses_since_yield >= self.activity.settings.yield_interval {
            self.yield_kernel();
        }
        Ok(())
    }

    /// Asynchronous HALT and trace requests posted by other threads.
    fn poll_requests(&mut self, idx: usize) -> Result<(), Unwind> {
        let control = self.activity.control.clone();
        if let Some(on) = control.take_trace() {
            log::info!("activity {}: interactive trace {}", self.activity.id, if on { "on" } else { "off" });
            let settings = &mut self.act_mut(idx).settings;
            settings.interactive = on;
            settings.trace = if on {
                TraceSetting::All
            } else {
                TraceSetting::Normal
            };
        }
        if let Some(description) = control.take_halt() {
            log::info!("activity {}: halt requested", self.activity.id);
            let condition = self.new_condition("HALT", &description);
            self.raise_condition(idx, condition)?;
        }
        Ok(())
    }

    pub(crate) fn collect_garbage(&mut self) {
        let memory = &mut *self.memory;
        let mut roots = SafepointRoots {
            globals: &mut memory.globals,
            parked: &mut memory.parked,
            frames: &mut self.activity.frames,
        };
        memory.heap.collect(&mut roots);
    }

    /// Every handle this activity's frames hold.
    pub(crate) fn snapshot_roots(&mut self) -> Vec<Value> {
        let mut roots = Vec::new();
        for frame in self.activity.frames.iter_mut() {
            frame.visit_roots(&mut |v: &mut Value| roots.push(*v));
        }
        roots
    }

    /// Publishes this activity's roots so a collection on another thread
    /// can see them while the lock is released.
    pub(crate) fn park(&mut self) {
        let roots = self.snapshot_roots();
        self.memory.parked.insert(self.activity.id, roots);
    }

    pub(crate) fn unpark(&mut self) {
        self.memory.parked.remove(&self.activity.id);
    }

    fn yield_kernel(&mut self) {
        self.activity.clauses_since_yield = 0;
        self.park();
        log::trace!("activity {} yielding", self.activity.id);
        MutexGuard::unlocked_fair(&mut self.memory, || {});
        self.unpark();
    }

    fn run_pending_traps(&mut self, idx: usize) -> Result<(), Unwind> {
        while let Some(pending) = self.act_mut(idx).pending.pop_front() {
            let outcome = self.run_trap_handler(idx, &pending);
            self.act_mut(idx).traps.restore(&pending.trap);
            match outcome? {
                Completion::Returned(_) => {}
                Completion::Raised { condition } => {
                    // The handler's own frame does not see what it raised.
                    match self.act(idx).parent.and_then(|p| self.nearest_rexx(p)) {
                        Some(parent) => {
                            self.raise_condition(parent, condition)?;
                        }
                        None if is_severe(&self.condition_name(condition)) => {
                            return Err(Unwind::Terminate(Box::new(
                                self.condition_report(idx, condition),
                            )));
                        }
                        None => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn run_trap_handler(&mut self, idx: usize, pending: &PendingTrap) -> Result<Completion, Unwind> {
        self.set_special(idx, "SIGL", &pending.line.to_string());
        let Some(target) = pending.target else {
            return Err(self.syntax_error(idx, ErrorCode::LABEL_NOT_FOUND, &[&pending.label]));
        };
        log::debug!("running CALL ON handler {} in frame {idx}", pending.label);
        let act = self.internal_activation(
            idx,
            ActivationKind::TrapHandler,
            target,
            Vec::new(),
            pending.condition,
        );
        self.act_mut(idx).state = ActivationState::SuspendedOnCall;
        let result = self.invoke_rexx(act);
        self.act_mut(idx).state = ActivationState::Running;
        result
    }

    // ── Tracing ───────────────────────────────────────────────────────

    fn trace_clause(&mut self, idx: usize, instruction: &Instruction) {
        let act = self.act(idx);
        let trace = act.settings.trace;
        let wanted = trace.traces_clauses()
            || (trace == TraceSetting::Labels && matches!(instruction, Instruction::Label(_)))
            || (trace == TraceSetting::Commands && matches!(instruction, Instruction::Command(_)));
        if wanted {
            let location = act.location();
            self.activity
                .output
                .trace(&format!("{:>6} *-* {}", location.line, location.text));
        }
    }

    pub(crate) fn trace_result(&mut self, idx: usize, value: Value) {
        if self.act(idx).settings.trace.traces_results() {
            let text = self.plain_string(value);
            self.activity.output.trace(&format!("       >>>   \"{text}\""));
        }
    }

    // ── Instructions ──────────────────────────────────────────────────

    fn step(&mut self, idx: usize, code: &Code, instruction: &Instruction) -> Result<Step, Unwind> {
        match instruction {
            Instruction::Nop | Instruction::Label(_) => {}
            Instruction::Assign { target, value } => {
                self.evaluate(idx, value)?;
                let value = self.pop(idx);
                self.trace_result(idx, value);
                self.assign_variable(idx, target, value);
            }
            Instruction::Say(value) => {
                let text = match value {
                    Some(expr) => self.eval_string(idx, expr)?,
                    None => String::new(),
                };
                self.activity.output.say(&text);
            }
            Instruction::Expression(expr) => self.evaluate_discard(idx, expr)?,
            Instruction::Command(expr) => {
                let command = self.eval_string(idx, expr)?;
                let environment = self.act(idx).settings.address.clone();
                self.run_command(idx, &environment, &command)?;
            }
            Instruction::Call(invocation) => {
                let result =
                    self.invoke(idx, &invocation.name, invocation.target, &invocation.args, false)?;
                self.set_result(idx, result);
            }
            Instruction::CallDynamic { name, args } => {
                let name = self.eval_string(idx, name)?.to_ascii_uppercase();
                let target = resolve_target(&name, true, &code.labels);
                let result = self.invoke(idx, &name, target, args, true)?;
                self.set_result(idx, result);
            }
            Instruction::CallOn {
                condition,
                label,
                target,
            } => self
                .act_mut(idx)
                .traps
                .trap_on(condition, TrapKind::Call, label, *target),
            Instruction::SignalOn {
                condition,
                label,
                target,
            } => self
                .act_mut(idx)
                .traps
                .trap_on(condition, TrapKind::Signal, label, *target),
            Instruction::CallOff { condition } | Instruction::SignalOff { condition } => {
                self.act_mut(idx).traps.trap_off(condition);
            }
            Instruction::Signal { label, target } => match target {
                Some(target) => self.signal_to(idx, *target),
                None => return Err(self.syntax_error(idx, ErrorCode::LABEL_NOT_FOUND, &[label])),
            },
            Instruction::SignalDynamic(expr) => {
                let label = self.eval_string(idx, expr)?.to_ascii_uppercase();
                match code.labels.get(&label) {
                    Some(target) => self.signal_to(idx, target),
                    None => {
                        return Err(self.syntax_error(idx, ErrorCode::LABEL_NOT_FOUND, &[&label]));
                    }
                }
            }
            Instruction::Raise(raise) => return self.execute_raise(idx, raise),
            Instruction::Return(value) => {
                let value = self.optional_value(idx, value.as_ref())?;
                return Ok(Step::Complete(Completion::Returned(value)));
            }
            Instruction::Exit(value) => {
                let value = self.optional_value(idx, value.as_ref())?;
                let root = self.act(idx).program_root;
                if root == idx {
                    return Ok(Step::Complete(Completion::Returned(value)));
                }
                return Err(Unwind::Exit { frame: root, value });
            }
            Instruction::Jump(target) => self.act_mut(idx).pc = *target,
            Instruction::JumpIfFalse { condition, target } => {
                self.evaluate(idx, condition)?;
                let value = self.pop(idx);
                if !self.logical(idx, value, ErrorCode::LOGICAL_IF)? {
                    self.act_mut(idx).pc = *target;
                }
            }
            Instruction::Procedure { expose } => {
                let act = self.act(idx);
                let allowed = act.procedure_allowed
                    && matches!(act.kind, ActivationKind::InternalCall | ActivationKind::TrapHandler);
                if !allowed {
                    return Err(self.syntax_error(idx, ErrorCode::UNEXPECTED_PROCEDURE, &[]));
                }
                let scope = self.new_scope(idx, expose);
                self.act_mut(idx).variables = scope;
            }
            Instruction::Expose(names) => {
                let act = self.act(idx);
                if !act.procedure_allowed || act.kind != ActivationKind::Method {
                    return Err(self.syntax_error(idx, ErrorCode::UNEXPECTED_EXPOSE, &[]));
                }
                let receiver = act.receiver;
                let locals = act.variables;
                let attributes = self.object_variables(receiver);
                for name in names {
                    self.expose_variable(attributes, locals, name);
                }
            }
            Instruction::Drop(targets) => {
                for target in targets {
                    self.drop_variable_ref(idx, target);
                }
            }
            Instruction::Digits(value) => self.set_digits(idx, value.as_ref())?,
            Instruction::Fuzz(value) => self.set_fuzz(idx, value.as_ref())?,
            Instruction::Form(form) => self.act_mut(idx).settings.numeric.form = *form,
            Instruction::Trace(request) => {
                let text = match request {
                    TraceRequest::Setting(text) => text.clone(),
                    TraceRequest::Value(expr) => self.eval_string(idx, expr)?,
                };
                self.apply_trace(idx, &text)?;
            }
            Instruction::Address {
                environment,
                command,
            } => self.execute_address(idx, environment.as_deref(), command.as_ref())?,
            Instruction::UseArg(targets) => self.use_arg(idx, targets)?,
        }
        Ok(Step::Continue)
    }

    fn signal_to(&mut self, idx: usize, target: usize) {
        let line = self.act(idx).line();
        self.set_special(idx, "SIGL", &line.to_string());
        let act = self.act_mut(idx);
        act.pc = target;
        act.stack.clear();
    }

    fn optional_value(&mut self, idx: usize, expr: Option<&Expr>) -> Result<Value, Unwind> {
        match expr {
            Some(expr) => {
                self.evaluate(idx, expr)?;
                Ok(self.pop(idx))
            }
            None => Ok(Value::NULL),
        }
    }

    /// RESULT after a CALL: set to the returned value, dropped when there
    /// was none.
    fn set_result(&mut self, idx: usize, result: Value) {
        if result.is_null() {
            self.drop_context_variable(idx, "RESULT");
        } else {
            self.set_variable_value(idx, "RESULT", result);
        }
    }

    /// Attribute dictionary of `receiver`, created on first use.
    fn object_variables(&mut self, receiver: Value) -> Value {
        let existing = self.memory.heap.get(receiver).object_variables;
        if !existing.is_null() {
            return existing;
        }
        let variables = alloc_variables(&mut self.memory.heap);
        self.memory.heap.get_mut(receiver).object_variables = variables;
        variables
    }

    fn set_digits(&mut self, idx: usize, value: Option<&Expr>) -> Result<(), Unwind> {
        let digits = match value {
            Some(expr) => {
                let (text, n) = self.whole_operand(idx, expr)?;
                if n < 1 {
                    return Err(self.syntax_error(idx, ErrorCode::INVALID_DIGITS, &[&text]));
                }
                if n as usize > MAX_DIGITS {
                    let max = MAX_DIGITS.to_string();
                    return Err(self.syntax_error(idx, ErrorCode::DIGITS_TOO_LARGE, &[&text, &max]));
                }
                n as usize
            }
            None => crate::numeric::DEFAULT_DIGITS,
        };
        let numeric = self.act(idx).settings.numeric;
        if numeric.fuzz >= digits {
            let (fuzz, digits) = (numeric.fuzz.to_string(), digits.to_string());
            return Err(self.syntax_error(idx, ErrorCode::INVALID_FUZZ, &[&fuzz, &digits]));
        }
        self.act_mut(idx).settings.numeric.digits = digits;
        Ok(())
    }

    fn set_fuzz(&mut self, idx: usize, value: Option<&Expr>) -> Result<(), Unwind> {
        let fuzz = match value {
            Some(expr) => {
                let (text, n) = self.whole_operand(idx, expr)?;
                let digits = self.act(idx).settings.numeric.digits;
                if n < 0 || n as usize >= digits {
                    let digits = digits.to_string();
                    return Err(self.syntax_error(idx, ErrorCode::INVALID_FUZZ, &[&text, &digits]));
                }
                n as usize
            }
            None => 0,
        };
        self.act_mut(idx).settings.numeric.fuzz = fuzz;
        Ok(())
    }

    fn whole_operand(&mut self, idx: usize, expr: &Expr) -> Result<(String, i64), Unwind> {
        self.evaluate(idx, expr)?;
        let value = self.pop(idx);
        let text = self.string_of(idx, value)?;
        let n = self.whole_number(idx, &text)?;
        Ok((text, n))
    }

    /// `TRACE [?]letter`; a bare `?` toggles interactive tracing.
    pub(crate) fn apply_trace(&mut self, idx: usize, text: &str) -> Result<(), Unwind> {
        let text = text.trim();
        let (toggle, rest) = match text.strip_prefix('?') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let setting = match rest.chars().next() {
            None => None,
            Some(letter) => match TraceSetting::parse(letter) {
                Some(setting) => Some(setting),
                None => return Err(self.syntax_error(idx, ErrorCode::INVALID_TRACE, &[rest])),
            },
        };
        let settings = &mut self.act_mut(idx).settings;
        if let Some(setting) = setting {
            settings.trace = setting;
        }
        if toggle {
            settings.interactive = !settings.interactive;
        }
        if settings.trace == TraceSetting::Off {
            settings.interactive = false;
        }
        Ok(())
    }

    fn execute_address(
        &mut self,
        idx: usize,
        environment: Option<&str>,
        command: Option<&Expr>,
    ) -> Result<(), Unwind> {
        match (environment, command) {
            (None, None) => {
                let settings = &mut self.act_mut(idx).settings;
                std::mem::swap(&mut settings.address, &mut settings.previous_address);
            }
            (Some(environment), Some(command)) => {
                let command = self.eval_string(idx, command)?;
                self.run_command(idx, environment, &command)?;
            }
            (environment, command) => {
                let environment = match (environment, command) {
                    (Some(environment), _) => environment.to_ascii_uppercase(),
                    (None, Some(expr)) => self.eval_string(idx, expr)?.to_ascii_uppercase(),
                    (None, None) => return Ok(()),
                };
                let settings = &mut self.act_mut(idx).settings;
                settings.previous_address = std::mem::replace(&mut settings.address, environment);
            }
        }
        Ok(())
    }

    fn use_arg(&mut self, idx: usize, targets: &[UseArgTarget]) -> Result<(), Unwind> {
        for (i, target) in targets.iter().enumerate() {
            let value = self.act(idx).arguments.get(i).copied().unwrap_or(Value::NULL);
            if !value.is_null() {
                self.assign_variable(idx, &target.target, value);
                continue;
            }
            match &target.default {
                Some(expr) => {
                    self.evaluate(idx, expr)?;
                    let value = self.pop(idx);
                    self.assign_variable(idx, &target.target, value);
                }
                None => self.drop_variable_ref(idx, &target.target),
            }
        }
        Ok(())
    }

    // ── Calls ─────────────────────────────────────────────────────────

    /// Evaluates `args` onto the stack and calls `name` through `target`.
    /// Returns NULL when the callee gave no result.
    pub(crate) fn invoke(
        &mut self,
        idx: usize,
        name: &str,
        target: CallTarget,
        args: &[Option<Expr>],
        dynamic: bool,
    ) -> Result<Value, Unwind> {
        let base = self.act(idx).stack.len();
        for arg in args {
            match arg {
                Some(expr) => self.evaluate(idx, expr)?,
                None => self.push(idx, Value::NULL),
            }
        }
        let argc = args.len();
        self.act_mut(idx).state = ActivationState::SuspendedOnCall;
        let result = match target {
            CallTarget::Internal(label) => self.call_internal(idx, label, argc),
            CallTarget::Builtin(function) => builtins::call_builtin(self, idx, function, argc),
            CallTarget::External | CallTarget::Unresolved => {
                self.call_external(idx, name, argc, dynamic)
            }
        };
        let act = self.act_mut(idx);
        act.state = ActivationState::Running;
        act.stack.truncate(base);
        result
    }

    fn call_internal(&mut self, idx: usize, target: usize, argc: usize) -> Result<Value, Unwind> {
        let line = self.act(idx).line();
        self.set_special(idx, "SIGL", &line.to_string());
        let args = self.stack_args(idx, argc);
        let act =
            self.internal_activation(idx, ActivationKind::InternalCall, target, args, Value::NULL);
        let completion = self.invoke_rexx(act)?;
        self.complete_call(idx, completion)
    }

    /// A callee that completed by raising hands its condition to the
    /// caller; if that returns, the call yields the condition's RESULT.
    pub(crate) fn complete_call(&mut self, idx: usize, completion: Completion) -> Result<Value, Unwind> {
        match completion {
            Completion::Returned(value) => Ok(value),
            Completion::Raised { condition } => {
                let result = directory_at(&self.memory.heap, condition, RESULT);
                self.raise_condition(idx, condition)?;
                Ok(result)
            }
        }
    }

    fn call_external(
        &mut self,
        idx: usize,
        name: &str,
        argc: usize,
        dynamic: bool,
    ) -> Result<Value, Unwind> {
        if let Some(result) = self.check_call_security(idx, name, argc)? {
            return Ok(result);
        }
        let package = self.act(idx).package;
        let memory = &mut *self.memory;
        let routine = package::find_routine(&mut memory.heap, &memory.globals, package, name);
        if routine.is_null() {
            let code = if dynamic {
                ErrorCode::LABEL_NOT_FOUND
            } else {
                ErrorCode::ROUTINE_NOT_FOUND
            };
            return Err(self.syntax_error(idx, code, &[name]));
        }
        self.call_routine_object(idx, routine, argc)
    }

    /// Calls a Routine, native routine or program package with the top
    /// `argc` stack entries as arguments.
    pub(crate) fn call_routine_object(
        &mut self,
        idx: usize,
        routine: Value,
        argc: usize,
    ) -> Result<Value, Unwind> {
        let args = self.stack_args(idx, argc);
        let (code, package, kind) = match self.memory.heap.body(routine) {
            ObjectBody::Routine(body) => (body.code.clone(), body.package, ActivationKind::Routine),
            ObjectBody::NativeRoutine(_) => return self.call_native(idx, routine, argc),
            ObjectBody::Package(_) => {
                let memory = &mut *self.memory;
                package::ensure_installed(&mut memory.heap, &memory.globals, routine);
                match package::main_code(&memory.heap, routine) {
                    Some(code) => (code, routine, ActivationKind::Program),
                    None => return Ok(Value::NULL),
                }
            }
            _ => return Ok(Value::NULL),
        };
        let mut act = self.new_activation(Some(idx), code, kind, package, args);
        act.executable = routine;
        let completion = self.invoke_rexx(act)?;
        self.complete_call(idx, completion)
    }

    /// Runs `method` with `receiver` as SELF; the arguments are the top
    /// `argc` stack entries.
    pub(crate) fn run_method(
        &mut self,
        idx: usize,
        method: Value,
        receiver: Value,
        argc: usize,
    ) -> Result<Value, Unwind> {
        let (code, package) = match self.memory.heap.body(method) {
            ObjectBody::Method(body) => (body.code.clone(), body.package),
            _ => return Ok(Value::NULL),
        };
        let args = self.stack_args(idx, argc);
        let mut act = self.new_activation(Some(idx), code, ActivationKind::Method, package, args);
        act.executable = method;
        act.receiver = receiver;
        act.procedure_allowed = true;
        let completion = self.invoke_rexx(act)?;
        self.complete_call(idx, completion)
    }

    // ── Security manager ──────────────────────────────────────────────

    /// Nearest security manager: the frame's own, then its callers', then
    /// the frame's package.
    fn security_manager(&self, idx: usize) -> Value {
        let mut cursor = self.nearest_rexx(idx);
        while let Some(at) = cursor {
            let act = self.act(at);
            if !act.security_manager.is_null() {
                return act.security_manager;
            }
            cursor = act.parent.and_then(|p| self.nearest_rexx(p));
        }
        let package = self.act(idx).package;
        match self.memory.heap.try_get(package).map(|o| &o.body) {
            Some(ObjectBody::Package(body)) => body.security_manager,
            _ => Value::NULL,
        }
    }

    /// Sends `message` with an information directory to the security
    /// manager. Returns the directory when the manager handled the request.
    fn consult_security(
        &mut self,
        idx: usize,
        message: &str,
        entries: &[(&str, Value)],
    ) -> Result<Option<Value>, Unwind> {
        let manager = self.security_manager(idx);
        if manager.is_null() {
            return Ok(None);
        }
        let info = alloc_directory(&mut self.memory.heap);
        for (key, value) in entries {
            directory_put(&mut self.memory.heap, info, key, *value);
        }
        self.push(idx, info);
        self.push(idx, manager);
        self.push(idx, info);
        let handled = self.send_message(idx, message, 1);
        let info = self.pop(idx);
        let handled = handled?;
        Ok((!handled.is_null() && self.is_true(handled)).then_some(info))
    }

    fn check_call_security(
        &mut self,
        idx: usize,
        name: &str,
        argc: usize,
    ) -> Result<Option<Value>, Unwind> {
        if self.security_manager(idx).is_null() {
            return Ok(None);
        }
        let args = self.stack_args(idx, argc);
        let nil = self.nil();
        let args: Vec<Value> = args.into_iter().map(|a| a.or(nil)).collect();
        let arguments = crate::alloc::alloc_array(&mut self.memory.heap, args);
        self.push(idx, arguments);
        let name = self.string(name);
        let info = self.consult_security(idx, "CALL", &[("NAME", name), ("ARGUMENTS", arguments)]);
        self.pop(idx);
        Ok(info?.map(|info| directory_at(&self.memory.heap, info, RESULT)))
    }

    /// Return code chosen by the security manager for a command, if it
    /// handled it.
    pub(crate) fn check_command_security(
        &mut self,
        idx: usize,
        environment: &str,
        command: &str,
    ) -> Result<Option<i32>, Unwind> {
        if self.security_manager(idx).is_null() {
            return Ok(None);
        }
        let environment = self.string(environment);
        let command = self.string(command);
        let info =
            self.consult_security(idx, "COMMAND", &[("ADDRESS", environment), ("COMMAND", command)])?;
        Ok(info.map(|info| {
            let rc = directory_at(&self.memory.heap, info, "RC");
            self.plain_string(rc).trim().parse().unwrap_or(0)
        }))
    }

    /// Items of a single-dimension Array, or None.
    pub(crate) fn single_dimension_items(&self, value: Value) -> Option<Vec<Value>> {
        match self.memory.heap.try_get(value).map(|o| &o.body) {
            Some(ObjectBody::Array(array)) if array.dimensions.len() <= 1 => {
                array_items(&self.memory.heap, value).map(<[Value]>::to_vec)
            }
            _ => None,
        }
    }
}
