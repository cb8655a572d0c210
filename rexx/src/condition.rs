//! Conditions: the condition object, non-local transfers, and the walk
//! that finds a trap for a raised condition.
//!
//! A condition object is a Directory. It is copied whenever it is handed
//! to a trap or propagated, so interpreted code never sees an alias of an
//! object another activation still holds.

use std::fmt;

use crate::Value;
use crate::activation::{Frame, PendingTrap};
use crate::alloc::{alloc_directory, alloc_string};
use crate::collections::{array_items, directory_at, directory_copy, directory_put, string_value};
use crate::code::{Expr, RaiseAdditional, RaiseExit, RaiseInstruction};
use crate::errors::{ErrorCode, FatalError};
use crate::interpreter::{Interpreter, Step};
use crate::trap::{TrapKind, TrapState};

pub const CONDITION: &str = "CONDITION";
pub const DESCRIPTION: &str = "DESCRIPTION";
pub const ADDITIONAL: &str = "ADDITIONAL";
pub const RESULT: &str = "RESULT";
pub const PROPAGATED: &str = "PROPAGATED";
pub const INSTRUCTION: &str = "INSTRUCTION";
pub const RC: &str = "RC";
pub const CODE: &str = "CODE";
pub const ERRORTEXT: &str = "ERRORTEXT";
pub const MESSAGE: &str = "MESSAGE";
pub const POSITION: &str = "POSITION";
pub const PROGRAM: &str = "PROGRAM";
/// Receiver of a message that raised NOMETHOD.
pub const OBJECT: &str = "OBJECT";

/// SYNTAX and HALT terminate the program when nobody traps them.
pub fn is_severe(condition: &str) -> bool {
    matches!(condition, "SYNTAX" | "HALT")
}

/// Non-local control transfer, carried in the `Err` arm while the Rust
/// stack unwinds to the activation that owns it.
#[derive(Debug)]
pub enum Unwind {
    /// SIGNAL (or a SIGNAL ON trap) to clause `target` of frame `frame`.
    Signal { frame: usize, target: usize },
    /// The clause running in `frame` is abandoned; a CALL ON handler is
    /// queued there and runs at its next clause boundary.
    Trap { frame: usize },
    /// EXIT: `frame` is the program root that completes with `value`.
    Exit { frame: usize, value: Value },
    /// RAISE ... EXIT: `frame` completes and `condition` is raised in its
    /// caller.
    ExitRaise { frame: usize, condition: Value },
    /// An untrapped SYNTAX or HALT condition.
    Terminate(Box<ConditionReport>),
    Fatal(FatalError),
}

impl From<FatalError> for Unwind {
    fn from(err: FatalError) -> Self {
        Unwind::Fatal(err)
    }
}

/// How an activation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// RETURN or EXIT, NULL when no value was given.
    Returned(Value),
    /// RAISE ... RETURN, RAISE PROPAGATE, or RAISE ... EXIT reaching its
    /// program root. The caller raises `condition` in its own context.
    Raised { condition: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A CALL ON handler was queued; execution continues.
    Trapped,
    /// Nobody handled it; the default action applies.
    Untrapped,
}

/// An untrapped condition as seen by whoever started the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionReport {
    pub condition: String,
    pub code: Option<ErrorCode>,
    pub error_text: String,
    pub message: String,
    pub description: String,
    pub additional: Vec<String>,
    pub program: String,
    pub line: Option<usize>,
    /// Innermost first: `"     3 *-* call sub"`.
    pub traceback: Vec<String>,
    pub propagated: bool,
}

impl fmt::Display for ConditionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = self.line.map_or_else(String::new, |l| format!(" line {l}"));
        match self.code {
            Some(code) => {
                write!(
                    f,
                    "Error {} running {}{}: {}",
                    code.major, self.program, line, self.error_text
                )?;
                if !self.message.is_empty() {
                    write!(f, "\nError {code}: {}", self.message)?;
                }
                Ok(())
            }
            None => write!(
                f,
                "{} condition raised in {}{}: {}",
                self.condition, self.program, line, self.description
            ),
        }
    }
}

impl Interpreter<'_> {
    // ── Building condition objects ────────────────────────────────────

    /// New condition object with CONDITION, DESCRIPTION and PROPAGATED set.
    pub(crate) fn new_condition(&mut self, name: &str, description: &str) -> Value {
        let heap = &mut self.memory.heap;
        let condition = alloc_directory(heap);
        let name = alloc_string(heap, name.to_ascii_uppercase());
        let description = alloc_string(heap, description);
        let propagated = self.memory.globals.special.false_;
        let heap = &mut self.memory.heap;
        directory_put(heap, condition, CONDITION, name);
        directory_put(heap, condition, DESCRIPTION, description);
        directory_put(heap, condition, PROPAGATED, propagated);
        condition
    }

    /// SYNTAX condition for `code`, with `additional` (a single-dimension
    /// Array or NULL) as the message substitutions.
    pub(crate) fn syntax_condition(
        &mut self,
        code: ErrorCode,
        additional: Value,
        description: Option<&str>,
    ) -> Value {
        let substitutions: Vec<String> = if additional.is_null() {
            Vec::new()
        } else {
            array_items(&self.memory.heap, additional)
                .unwrap_or_default()
                .iter()
                .map(|&v| self.plain_string(v))
                .collect()
        };
        let kernel = self.kernel;
        let catalog = kernel.catalog();
        let message = catalog.format(code, &substitutions);
        let error_text = catalog.error_text(code.major).unwrap_or_default().to_string();
        let condition = self.new_condition("SYNTAX", description.unwrap_or(&message));
        let heap = &mut self.memory.heap;
        let entries = [
            (CODE, alloc_string(heap, code.to_string())),
            (RC, alloc_string(heap, code.major.to_string())),
            (ERRORTEXT, alloc_string(heap, error_text)),
            (MESSAGE, alloc_string(heap, message)),
        ];
        for (key, value) in entries {
            directory_put(heap, condition, key, value);
        }
        if !additional.is_null() {
            directory_put(heap, condition, ADDITIONAL, additional);
        }
        condition
    }

    /// Raises SYNTAX `code` in frame `origin` and returns the transfer it
    /// produced. SYNTAX never resumes the clause that raised it.
    pub(crate) fn syntax_error(&mut self, origin: usize, code: ErrorCode, subs: &[&str]) -> Unwind {
        let additional = crate::alloc::alloc_string_array(&mut self.memory.heap, subs);
        let condition = self.syntax_condition(code, additional, None);
        match self.raise_condition(origin, condition) {
            Err(unwind) => unwind,
            Ok(_) => Unwind::Terminate(Box::new(self.condition_report(origin, condition))),
        }
    }

    pub(crate) fn condition_name(&self, condition: Value) -> String {
        let name = directory_at(&self.memory.heap, condition, CONDITION);
        string_value(&self.memory.heap, name)
            .unwrap_or_default()
            .to_string()
    }

    /// Copy handed to a trap or to CONDITION('O').
    pub(crate) fn copy_condition(&mut self, condition: Value) -> Value {
        let heap = &mut self.memory.heap;
        let copy = directory_copy(heap, condition);
        let additional = directory_at(heap, copy, ADDITIONAL);
        if !additional.is_null() {
            let additional = directory_copy(heap, additional);
            directory_put(heap, copy, ADDITIONAL, additional);
        }
        copy
    }

    fn set_condition_entry(&mut self, condition: Value, key: &str, text: &str) {
        let heap = &mut self.memory.heap;
        let value = alloc_string(heap, text);
        directory_put(heap, condition, key, value);
    }

    /// Records where the condition happened, unless it already knows.
    fn stamp_position(&mut self, origin: usize, condition: Value) {
        if !directory_at(&self.memory.heap, condition, POSITION).is_null() {
            return;
        }
        let Some(at) = self.nearest_rexx(origin) else {
            return;
        };
        let act = self.act(at);
        let line = act.line().to_string();
        let program = act.code.name.clone();
        self.set_condition_entry(condition, POSITION, &line);
        self.set_condition_entry(condition, PROGRAM, &program);
    }

    /// `frame` itself when it is a Rexx activation, else its nearest Rexx
    /// ancestor.
    pub(crate) fn nearest_rexx(&self, frame: usize) -> Option<usize> {
        let mut cursor = Some(frame);
        while let Some(idx) = cursor {
            match self.activity.frames.get(idx)? {
                Frame::Rexx(_) => return Some(idx),
                Frame::Native(native) => cursor = native.parent,
            }
        }
        None
    }

    pub(crate) fn condition_report(&self, origin: usize, condition: Value) -> ConditionReport {
        let heap = &self.memory.heap;
        let text = |key: &str| {
            string_value(heap, directory_at(heap, condition, key))
                .unwrap_or_default()
                .to_string()
        };
        let additional_value = directory_at(heap, condition, ADDITIONAL);
        let additional = if additional_value.is_null() {
            Vec::new()
        } else {
            match array_items(heap, additional_value) {
                Some(items) => items.iter().map(|&v| self.plain_string(v)).collect(),
                None => vec![self.plain_string(additional_value)],
            }
        };
        let mut traceback = Vec::new();
        let mut cursor = self.nearest_rexx(origin);
        while let Some(idx) = cursor {
            let act = self.act(idx);
            let location = act.location();
            traceback.push(format!("{:>6} *-* {}", location.line, location.text));
            cursor = act.parent.and_then(|p| self.nearest_rexx(p));
        }
        let mut condition_name = text(CONDITION);
        let mut code = ErrorCode::parse(&text(CODE));
        let mut message = text(MESSAGE);
        let mut error_text = text(ERRORTEXT);
        if condition_name == "HALT" {
            let catalog = self.kernel.catalog();
            code = Some(ErrorCode::HALT);
            message = catalog.format(ErrorCode::HALT, &[text(DESCRIPTION)]);
            error_text = catalog.error_text(4).unwrap_or_default().to_string();
        }
        if condition_name.is_empty() {
            condition_name = "SYNTAX".into();
        }
        ConditionReport {
            condition: condition_name,
            code,
            error_text,
            message,
            description: text(DESCRIPTION),
            additional,
            program: text(PROGRAM),
            line: text(POSITION).parse().ok(),
            traceback,
            propagated: text(PROPAGATED) == "1",
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────

    /// Offers `condition` to frame `origin` and then to each caller.
    ///
    /// A SIGNAL trap turns itself off and returns `Err(Signal)` aimed at
    /// the trapping frame. A CALL trap that is ON is delayed and its
    /// handler queued on the trapping frame; severe conditions then
    /// abandon the current clause with `Err(Trap)`, others return
    /// `Ok(Trapped)` and let the clause finish. A DELAYED trap never
    /// re-enters its handler. Native frames have no traps of their own.
    pub(crate) fn raise_condition(
        &mut self,
        origin: usize,
        condition: Value,
    ) -> Result<Disposition, Unwind> {
        let name = self.condition_name(condition);
        let severe = is_severe(&name);
        self.stamp_position(origin, condition);

        let mut cursor = self.nearest_rexx(origin);
        while let Some(idx) = cursor {
            let act = self.act(idx);
            let parent = act.parent.and_then(|p| self.nearest_rexx(p));
            let handler = act.traps.find(&name).map(|h| {
                (h.condition.clone(), h.kind, h.state, h.label.clone(), h.target)
            });
            match handler {
                Some((key, TrapKind::Signal, _, label, target)) => {
                    log::debug!("{name} trapped by SIGNAL ON {key} in frame {idx}");
                    return Err(self.signal_trap(idx, &key, &label, target, condition));
                }
                Some((key, TrapKind::Call, TrapState::On, label, target)) => {
                    log::debug!("{name} trapped by CALL ON {key} in frame {idx}");
                    let copy = self.copy_condition(condition);
                    self.set_condition_entry(copy, INSTRUCTION, "CALL");
                    let act = self.act_mut(idx);
                    let line = act.line();
                    act.traps.delay(&key, copy);
                    act.pending.push_back(PendingTrap {
                        trap: key,
                        label,
                        target,
                        condition: copy,
                        line,
                    });
                    return if severe {
                        Err(Unwind::Trap { frame: idx })
                    } else {
                        Ok(Disposition::Trapped)
                    };
                }
                Some((_, TrapKind::Call, TrapState::Delayed, ..)) if !severe => {
                    return Ok(Disposition::Untrapped);
                }
                _ => cursor = parent,
            }
        }

        if name == "NOMETHOD" {
            let heap = &self.memory.heap;
            let receiver = directory_at(heap, condition, OBJECT);
            let receiver = self.plain_string(receiver);
            let message = string_value(heap, directory_at(heap, condition, DESCRIPTION))
                .unwrap_or_default()
                .to_string();
            return Err(self.syntax_error(origin, ErrorCode::NO_METHOD, &[&receiver, &message]));
        }
        if severe {
            log::debug!("{name} not trapped; terminating");
            return Err(Unwind::Terminate(Box::new(
                self.condition_report(origin, condition),
            )));
        }
        Ok(Disposition::Untrapped)
    }

    /// Whether a trap in `origin` or a caller would currently accept
    /// `condition`.
    pub(crate) fn trap_available(&self, origin: usize, condition: &str) -> bool {
        let mut cursor = self.nearest_rexx(origin);
        while let Some(idx) = cursor {
            let act = self.act(idx);
            if let Some(handler) = act.traps.find(condition) {
                return handler.kind == TrapKind::Signal || handler.state == TrapState::On;
            }
            cursor = act.parent.and_then(|p| self.nearest_rexx(p));
        }
        false
    }

    fn signal_trap(
        &mut self,
        idx: usize,
        key: &str,
        label: &str,
        target: Option<usize>,
        condition: Value,
    ) -> Unwind {
        let copy = self.copy_condition(condition);
        self.set_condition_entry(copy, INSTRUCTION, "SIGNAL");
        let is_syntax = self.condition_name(copy) == "SYNTAX";
        let rc = directory_at(&self.memory.heap, copy, RC);
        let act = self.act_mut(idx);
        act.traps.trap_off(key);
        act.condition = copy;
        let line = act.line();
        self.set_special(idx, "SIGL", &line.to_string());
        if is_syntax && !rc.is_null() {
            self.set_variable_value(idx, "RC", rc);
        }
        match target {
            Some(target) => {
                self.act_mut(idx).state = crate::activation::ActivationState::SuspendedOnSignal;
                Unwind::Signal { frame: idx, target }
            }
            None => self.syntax_error(idx, ErrorCode::LABEL_NOT_FOUND, &[label]),
        }
    }
}

// ── RAISE ───────────────────────────────────────────────────────────

impl Interpreter<'_> {
    /// RAISE. The option values stay on the frame's stack until the
    /// condition object holds them.
    pub(crate) fn execute_raise(
        &mut self,
        idx: usize,
        raise: &RaiseInstruction,
    ) -> Result<Step, Unwind> {
        let base = self.act(idx).stack.len();
        let condition = self.build_raise(idx, raise);
        self.act_mut(idx).stack.truncate(base);
        let condition = condition?;

        if raise.exit == RaiseExit::Exit {
            let root = self.act(idx).program_root;
            if root != idx {
                return Err(Unwind::ExitRaise {
                    frame: root,
                    condition,
                });
            }
            return Ok(Step::Complete(Completion::Raised { condition }));
        }
        if raise.exit == RaiseExit::Return || raise.propagate {
            return Ok(Step::Complete(Completion::Raised { condition }));
        }
        self.raise_condition(idx, condition)?;
        Ok(Step::Continue)
    }

    fn raise_option(&mut self, idx: usize, expr: Option<&Expr>) -> Result<Value, Unwind> {
        match expr {
            Some(expr) => {
                self.evaluate(idx, expr)?;
                Ok(*self.act(idx).stack.last().unwrap_or(&Value::NULL))
            }
            None => Ok(Value::NULL),
        }
    }

    fn build_raise(&mut self, idx: usize, raise: &RaiseInstruction) -> Result<Value, Unwind> {
        let code = self.raise_option(idx, raise.code.as_ref())?;
        let description = self.raise_option(idx, raise.description.as_ref())?;
        let additional = match &raise.additional {
            None => Value::NULL,
            Some(RaiseAdditional::Expr(expr)) => self.raise_option(idx, Some(expr))?,
            Some(RaiseAdditional::Array(items)) => {
                for item in items {
                    self.evaluate(idx, item)?;
                }
                let values = self.stack_args(idx, items.len());
                let array = crate::alloc::alloc_array(&mut self.memory.heap, values);
                self.push(idx, array);
                array
            }
        };
        let result = self.raise_option(idx, raise.result.as_ref())?;
        let description = if description.is_null() {
            None
        } else {
            Some(self.string_of(idx, description)?)
        };

        let condition = if raise.propagate {
            let current = self.act(idx).condition;
            if current.is_null() {
                let act = self.act(idx);
                return Err(Unwind::Fatal(FatalError::NoConditionToPropagate {
                    program: act.code.name.clone(),
                    line: act.line(),
                }));
            }
            let copy = self.copy_condition(current);
            let propagated = self.memory.globals.special.true_;
            directory_put(&mut self.memory.heap, copy, PROPAGATED, propagated);
            if let Some(text) = &description {
                self.set_condition_entry(copy, DESCRIPTION, text);
            }
            if !additional.is_null() {
                directory_put(&mut self.memory.heap, copy, ADDITIONAL, additional);
            }
            copy
        } else if raise.condition == "SYNTAX" {
            let text = self.string_of(idx, code)?;
            let Some(number) = ErrorCode::parse(&text) else {
                return Err(self.syntax_error(idx, ErrorCode::WHOLE_NUMBER, &[&text]));
            };
            if !additional.is_null() && self.single_dimension_items(additional).is_none() {
                let shown = self.plain_string(additional);
                return Err(self.syntax_error(idx, ErrorCode::NOT_SINGLE_DIMENSION, &[&shown]));
            }
            self.syntax_condition(number, additional, description.as_deref())
        } else {
            let condition = self.new_condition(&raise.condition, description.as_deref().unwrap_or(""));
            if !code.is_null() {
                directory_put(&mut self.memory.heap, condition, RC, code);
            }
            if !additional.is_null() {
                directory_put(&mut self.memory.heap, condition, ADDITIONAL, additional);
            }
            condition
        };
        if !result.is_null() {
            directory_put(&mut self.memory.heap, condition, RESULT, result);
        }
        Ok(condition)
    }
}
