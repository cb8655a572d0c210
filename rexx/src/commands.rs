//! Host commands and address environments.

use parking_lot::MutexGuard;

use crate::activation::TraceSetting;
use crate::alloc::alloc_string;
use crate::collections::directory_put;
use crate::condition::{RC, Unwind};
use crate::interpreter::Interpreter;

/// Return code of a command that names no registered environment.
pub const UNKNOWN_ENVIRONMENT_RC: i32 = -3;

/// An address environment. Handlers run with the kernel lock released,
/// so they may block.
pub trait CommandHandler: Send + Sync {
    fn execute(&self, environment: &str, command: &str) -> i32;
}

impl<F> CommandHandler for F
where
    F: Fn(&str, &str) -> i32 + Send + Sync,
{
    fn execute(&self, environment: &str, command: &str) -> i32 {
        self(environment, command)
    }
}

impl Interpreter<'_> {
    /// Sends `command` to `environment`, sets RC and raises ERROR or
    /// FAILURE for a non-zero return code.
    pub(crate) fn run_command(
        &mut self,
        idx: usize,
        environment: &str,
        command: &str,
    ) -> Result<(), Unwind> {
        let environment = environment.to_ascii_uppercase();
        let rc = match self.check_command_security(idx, &environment, command)? {
            Some(rc) => rc,
            None => match self.kernel.command_handler(&environment) {
                Some(handler) => {
                    self.park();
                    let rc = MutexGuard::unlocked(&mut self.memory, || {
                        handler.execute(&environment, command)
                    });
                    self.unpark();
                    rc
                }
                None => {
                    log::warn!("no handler for address environment {environment}");
                    UNKNOWN_ENVIRONMENT_RC
                }
            },
        };
        self.set_special(idx, "RC", &rc.to_string());
        if rc == 0 {
            return Ok(());
        }

        let trace = self.act(idx).settings.trace;
        let traced = match trace {
            TraceSetting::Errors | TraceSetting::All | TraceSetting::Commands => true,
            TraceSetting::Normal | TraceSetting::Failure => rc < 0,
            _ => false,
        };
        if traced {
            if !matches!(trace, TraceSetting::All | TraceSetting::Commands) {
                let line = self.act(idx).line();
                self.activity.output.trace(&format!("{line:>6} *-* {command}"));
            }
            self.activity.output.trace(&format!("       +++   RC({rc})"));
        }

        let failure = rc < 0
            && (self.trap_available(idx, "FAILURE") || !self.trap_available(idx, "ERROR"));
        let name = if failure { "FAILURE" } else { "ERROR" };
        let condition = self.new_condition(name, command);
        let heap = &mut self.memory.heap;
        let rc = alloc_string(heap, rc.to_string());
        directory_put(heap, condition, RC, rc);
        self.raise_condition(idx, condition)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_handlers() {
        let handler = |env: &str, cmd: &str| -> i32 { (env.len() + cmd.len()) as i32 };
        assert_eq!(CommandHandler::execute(&handler, "ENV", "ls"), 5);
    }
}
