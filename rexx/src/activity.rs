//! Activities: one logical thread of interpretation with its own frame
//! stack, sharing the kernel's heap with every other activity.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::activation::{Frame, TraceSetting};
use crate::errors::RexxError;
use crate::interpreter::Interpreter;
use crate::kernel::Kernel;
use crate::output::{Output, StdOutput};

#[derive(Debug, Clone)]
pub struct ActivitySettings {
    /// Frames (Rexx and native) allowed on the stack.
    pub max_depth: usize,
    /// Clauses between cooperative yields of the kernel lock.
    pub yield_interval: usize,
    pub trace: TraceSetting,
    pub address: String,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            max_depth: 200,
            yield_interval: 1000,
            trace: TraceSetting::Normal,
            address: "DEFAULT".into(),
        }
    }
}

const TRACE_NONE: u8 = 0;
const TRACE_ON: u8 = 1;
const TRACE_OFF: u8 = 2;

/// Requests posted to an activity from other threads. The activity polls
/// them at clause boundaries.
#[derive(Debug, Default)]
pub struct ActivityControl {
    halt: AtomicBool,
    description: Mutex<Option<String>>,
    trace: AtomicU8,
}

impl ActivityControl {
    pub fn request_halt(&self, description: &str) {
        *self.description.lock() = Some(description.to_string());
        self.halt.store(true, Ordering::Release);
    }

    pub fn request_trace(&self, on: bool) {
        let request = if on { TRACE_ON } else { TRACE_OFF };
        self.trace.store(request, Ordering::Release);
    }

    pub(crate) fn take_halt(&self) -> Option<String> {
        if !self.halt.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(self.description.lock().take().unwrap_or_default())
    }

    pub(crate) fn take_trace(&self) -> Option<bool> {
        match self.trace.swap(TRACE_NONE, Ordering::AcqRel) {
            TRACE_ON => Some(true),
            TRACE_OFF => Some(false),
            _ => None,
        }
    }
}

/// Everything an activity owns outside the heap.
pub struct ActivityState {
    pub(crate) id: u64,
    pub(crate) frames: Vec<Frame>,
    pub(crate) settings: ActivitySettings,
    pub(crate) control: Arc<ActivityControl>,
    pub(crate) output: Arc<dyn Output>,
    pub(crate) clauses_since_yield: usize,
}

impl ActivityState {
    pub(crate) fn new(id: u64, settings: ActivitySettings, control: Arc<ActivityControl>) -> Self {
        Self {
            id,
            frames: Vec::new(),
            settings,
            control,
            output: Arc::new(StdOutput),
            clauses_since_yield: 0,
        }
    }
}

pub struct Activity {
    kernel: Kernel,
    state: ActivityState,
}

impl Activity {
    pub(crate) fn new(kernel: Kernel, state: ActivityState) -> Self {
        Self { kernel, state }
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn set_output(&mut self, output: Arc<dyn Output>) {
        self.state.output = output;
    }

    pub fn settings_mut(&mut self) -> &mut ActivitySettings {
        &mut self.state.settings
    }

    /// Runs the main program of registered package `name` with string
    /// arguments. Returns the program's result, if it gave one.
    pub fn run_program(&mut self, name: &str, args: &[&str]) -> Result<Option<String>, RexxError> {
        let memory = self.kernel.lock_memory();
        let mut interpreter = Interpreter::new(memory, &self.kernel, &mut self.state);
        let result = interpreter.run_program(name, args);
        drop(interpreter);
        self.state.frames.clear();
        result
    }
}

impl Drop for Activity {
    fn drop(&mut self) {
        self.kernel.unregister_activity(self.state.id);
    }
}
