//! Expression evaluation.
//!
//! Every intermediate lives on the activation's operand stack until the
//! operator that consumes it has produced its result, so a call or message
//! in one operand cannot lose the other to a collection.

use std::cmp::Ordering;

use crate::Value;
use crate::alloc::alloc_array;
use crate::code::{BinaryOp, Expr, PrefixOp};
use crate::collections::directory_at;
use crate::condition::Unwind;
use crate::errors::ErrorCode;
use crate::interpreter::Interpreter;
use crate::numeric::{ArithmeticError, MAX_EXPONENT, RexxNumber};
use crate::object::ObjectBody;

impl Interpreter<'_> {
    /// Evaluates `expr` in frame `idx` and pushes the result.
    pub(crate) fn evaluate(&mut self, idx: usize, expr: &Expr) -> Result<(), Unwind> {
        match expr {
            Expr::Literal(text) => {
                let value = self.literal(text);
                self.push(idx, value);
            }
            Expr::Variable(var) => {
                let value = self.fetch_variable(idx, var)?;
                self.push(idx, value);
            }
            Expr::Environment(name) => {
                let value = self.environment_symbol(idx, name);
                self.push(idx, value);
            }
            Expr::SelfObject => {
                let act = self.act(idx);
                let value = act.receiver.or(act.executable).or(self.nil());
                self.push(idx, value);
            }
            Expr::Binary { op, left, right } => {
                self.evaluate(idx, left)?;
                self.evaluate(idx, right)?;
                let value = self.binary(idx, *op)?;
                let act = self.act_mut(idx);
                act.stack.truncate(act.stack.len() - 2);
                act.stack.push(value);
            }
            Expr::Prefix { op, operand } => {
                self.evaluate(idx, operand)?;
                let value = self.prefix(idx, *op)?;
                self.pop(idx);
                self.push(idx, value);
            }
            Expr::Function(invocation) => {
                let result = self.invoke(
                    idx,
                    &invocation.name,
                    invocation.target,
                    &invocation.args,
                    false,
                )?;
                if result.is_null() {
                    return Err(self.syntax_error(
                        idx,
                        ErrorCode::NO_DATA_RETURNED,
                        &[&invocation.name],
                    ));
                }
                self.push(idx, result);
            }
            Expr::Message {
                receiver,
                message,
                args,
            } => {
                let result = self.evaluate_message(idx, receiver, message, args)?;
                if result.is_null() {
                    return Err(self.syntax_error(idx, ErrorCode::NO_DATA_RETURNED, &[message]));
                }
                self.push(idx, result);
            }
            Expr::ArrayOf(items) => {
                for item in items {
                    self.evaluate(idx, item)?;
                }
                let act = self.act_mut(idx);
                let items = act.stack.split_off(act.stack.len() - items.len());
                let array = alloc_array(&mut self.memory.heap, items);
                self.push(idx, array);
            }
        }
        Ok(())
    }

    /// Evaluates a message term used as an instruction. A message that
    /// returns nothing is fine here.
    pub(crate) fn evaluate_discard(&mut self, idx: usize, expr: &Expr) -> Result<(), Unwind> {
        match expr {
            Expr::Message {
                receiver,
                message,
                args,
            } => {
                self.evaluate_message(idx, receiver, message, args)?;
            }
            other => {
                self.evaluate(idx, other)?;
                self.pop(idx);
            }
        }
        Ok(())
    }

    pub(crate) fn eval_string(&mut self, idx: usize, expr: &Expr) -> Result<String, Unwind> {
        self.evaluate(idx, expr)?;
        let value = self.pop(idx);
        self.trace_result(idx, value);
        self.string_of(idx, value)
    }

    fn evaluate_message(
        &mut self,
        idx: usize,
        receiver: &Expr,
        message: &str,
        args: &[Option<Expr>],
    ) -> Result<Value, Unwind> {
        self.evaluate(idx, receiver)?;
        for arg in args {
            match arg {
                Some(expr) => self.evaluate(idx, expr)?,
                None => self.push(idx, Value::NULL),
            }
        }
        self.send_message(idx, message, args.len())
    }

    /// `.NAME`: `.METHODS` is the package's method directory and
    /// `.PACKAGE` the package itself, anything else comes from the
    /// environment directory or is the symbol itself.
    fn environment_symbol(&mut self, idx: usize, name: &str) -> Value {
        let package = self.act(idx).package;
        if let Some(ObjectBody::Package(body)) = self.memory.heap.try_get(package).map(|o| &o.body) {
            match name {
                "METHODS" => return body.methods,
                "PACKAGE" => return package,
                _ => {}
            }
        }
        let environment = self.memory.globals.environment;
        let value = directory_at(&self.memory.heap, environment, name);
        if value.is_null() {
            self.string(format!(".{name}"))
        } else {
            value
        }
    }

    // ── Numbers ───────────────────────────────────────────────────────

    /// Numeric value of `value` under the frame's DIGITS. Non-numbers
    /// raise SYNTAX 41.1; extra digits raise LOSTDIGITS when trapped.
    pub(crate) fn number_of(&mut self, idx: usize, value: Value) -> Result<RexxNumber, Unwind> {
        let text = self.string_of(idx, value)?;
        let digits = self.act(idx).settings.numeric.digits;
        let Some(parsed) = RexxNumber::parse(&text, digits) else {
            return Err(self.syntax_error(idx, ErrorCode::NONNUMERIC, &[&text]));
        };
        if parsed.lost_digits && self.trap_available(idx, "LOSTDIGITS") {
            let condition = self.new_condition("LOSTDIGITS", &text);
            self.raise_condition(idx, condition)?;
        }
        Ok(parsed.number)
    }

    /// Whole number for DIGITS, FUZZ, powers and the like; SYNTAX 26.1
    /// otherwise.
    pub(crate) fn whole_number(&mut self, idx: usize, text: &str) -> Result<i64, Unwind> {
        let digits = self.act(idx).settings.numeric.digits;
        match RexxNumber::parse(text, digits).and_then(|p| p.number.to_i64()) {
            Some(n) => Ok(n),
            None => Err(self.syntax_error(idx, ErrorCode::WHOLE_NUMBER, &[text])),
        }
    }

    fn number_value(&mut self, idx: usize, number: RexxNumber) -> Value {
        let numeric = self.act(idx).settings.numeric;
        let text = number.format(numeric.digits, numeric.form);
        self.string(text)
    }

    fn arithmetic_error(&mut self, idx: usize, err: ArithmeticError) -> Unwind {
        match err {
            ArithmeticError::DivideByZero => self.syntax_error(idx, ErrorCode::DIVIDE_BY_ZERO, &[]),
            ArithmeticError::IntegerOverflow => {
                let digits = self.act(idx).settings.numeric.digits.to_string();
                self.syntax_error(idx, ErrorCode::INTEGER_DIVISION_OVERFLOW, &[&digits])
            }
            ArithmeticError::Overflow => {
                let limit = MAX_EXPONENT.to_string();
                self.syntax_error(idx, ErrorCode::ARITHMETIC_OVERFLOW, &[&limit])
            }
            ArithmeticError::Underflow => {
                let limit = MAX_EXPONENT.to_string();
                self.syntax_error(idx, ErrorCode::ARITHMETIC_UNDERFLOW, &[&limit])
            }
        }
    }

    // ── Operators ─────────────────────────────────────────────────────

    /// Applies `op` to the top two stack entries without popping them.
    fn binary(&mut self, idx: usize, op: BinaryOp) -> Result<Value, Unwind> {
        let operands = self.stack_args(idx, 2);
        let (left, right) = (operands[0], operands[1]);
        match op {
            BinaryOp::Concat | BinaryOp::ConcatBlank => {
                let mut text = self.string_of(idx, left)?;
                if op == BinaryOp::ConcatBlank {
                    text.push(' ');
                }
                text.push_str(&self.string_of(idx, right)?);
                Ok(self.string(text))
            }
            BinaryOp::Add
            | BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::IntegerDivide
            | BinaryOp::Remainder
            | BinaryOp::Power => self.arithmetic(idx, op, left, right),
            BinaryOp::StrictEqual | BinaryOp::StrictNotEqual => {
                let equal = self.string_of(idx, left)? == self.string_of(idx, right)?;
                Ok(self.boolean(equal == (op == BinaryOp::StrictEqual)))
            }
            BinaryOp::Equal
            | BinaryOp::NotEqual
            | BinaryOp::Greater
            | BinaryOp::Less
            | BinaryOp::GreaterEqual
            | BinaryOp::LessEqual => {
                let ordering = self.compare(idx, left, right)?;
                let result = match op {
                    BinaryOp::Equal => ordering == Ordering::Equal,
                    BinaryOp::NotEqual => ordering != Ordering::Equal,
                    BinaryOp::Greater => ordering == Ordering::Greater,
                    BinaryOp::Less => ordering == Ordering::Less,
                    BinaryOp::GreaterEqual => ordering != Ordering::Less,
                    _ => ordering != Ordering::Greater,
                };
                Ok(self.boolean(result))
            }
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                let a = self.logical(idx, left, ErrorCode::LOGICAL_VALUE)?;
                let b = self.logical(idx, right, ErrorCode::LOGICAL_VALUE)?;
                let result = match op {
                    BinaryOp::And => a && b,
                    BinaryOp::Or => a || b,
                    _ => a != b,
                };
                Ok(self.boolean(result))
            }
        }
    }

    fn arithmetic(
        &mut self,
        idx: usize,
        op: BinaryOp,
        left: Value,
        right: Value,
    ) -> Result<Value, Unwind> {
        let digits = self.act(idx).settings.numeric.digits;
        let a = self.number_of(idx, left)?;
        if op == BinaryOp::Power {
            let text = self.string_of(idx, right)?;
            let exponent = self.whole_number(idx, &text)?;
            let result = a.power(exponent, digits);
            return match result {
                Ok(n) => Ok(self.number_value(idx, n)),
                Err(err) => Err(self.arithmetic_error(idx, err)),
            };
        }
        let b = self.number_of(idx, right)?;
        let result = match op {
            BinaryOp::Add => a.add(b, digits),
            BinaryOp::Subtract => a.subtract(b, digits),
            BinaryOp::Multiply => a.multiply(b, digits),
            BinaryOp::Divide => a.divide(b, digits),
            BinaryOp::IntegerDivide => a.integer_divide(b, digits),
            _ => a.remainder(b, digits),
        };
        match result {
            Ok(n) => Ok(self.number_value(idx, n)),
            Err(err) => Err(self.arithmetic_error(idx, err)),
        }
    }

    /// Non-strict comparison: numeric (with FUZZ) when both sides are
    /// numbers, otherwise blank-stripped strings padded with blanks.
    fn compare(&mut self, idx: usize, left: Value, right: Value) -> Result<Ordering, Unwind> {
        let a = self.string_of(idx, left)?;
        let b = self.string_of(idx, right)?;
        let numeric = self.act(idx).settings.numeric;
        if let (Some(x), Some(y)) = (
            RexxNumber::parse(&a, numeric.digits),
            RexxNumber::parse(&b, numeric.digits),
        ) {
            return Ok(x.number.compare(y.number, &numeric));
        }
        Ok(compare_padded(a.trim_matches(' '), b.trim_matches(' ')))
    }

    fn prefix(&mut self, idx: usize, op: PrefixOp) -> Result<Value, Unwind> {
        let operand = self.stack_args(idx, 1)[0];
        match op {
            PrefixOp::Not => {
                let value = self.logical(idx, operand, ErrorCode::LOGICAL_VALUE)?;
                Ok(self.boolean(!value))
            }
            PrefixOp::Minus | PrefixOp::Plus => {
                let digits = self.act(idx).settings.numeric.digits;
                let n = self.number_of(idx, operand)?;
                let result = if op == PrefixOp::Minus {
                    RexxNumber::ZERO.subtract(n, digits)
                } else {
                    RexxNumber::ZERO.add(n, digits)
                };
                match result {
                    Ok(n) => Ok(self.number_value(idx, n)),
                    Err(err) => Err(self.arithmetic_error(idx, err)),
                }
            }
        }
    }
}

/// Compares two strings as if the shorter were padded with blanks.
fn compare_padded(a: &str, b: &str) -> Ordering {
    fn pad(s: &str, width: usize) -> impl Iterator<Item = u8> + '_ {
        s.bytes().chain(std::iter::repeat(b' ')).take(width)
    }
    let width = a.len().max(b.len());
    pad(a, width).cmp(pad(b, width))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_comparison_ignores_trailing_blanks() {
        assert_eq!(compare_padded("abc", "abc  "), Ordering::Equal);
        assert_eq!(compare_padded("ab", "abc"), Ordering::Less);
        assert_eq!(compare_padded("b", "abc"), Ordering::Greater);
        assert_eq!(compare_padded("", " "), Ordering::Equal);
    }
}
