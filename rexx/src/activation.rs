use std::collections::VecDeque;
use std::sync::Arc;

use crate::Value;
use crate::code::{Code, SourceLocation};
use crate::hashtable::Link;
use crate::numeric::NumericSettings;
use crate::trap::TrapTable;
use crate::visitor::Visitable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Program,
    Routine,
    Method,
    InternalCall,
    /// Internal call made to run a CALL ON handler.
    TrapHandler,
}

impl ActivationKind {
    /// Whether EXIT and RAISE EXIT stop at this activation.
    pub fn is_top_level(self) -> bool {
        matches!(
            self,
            ActivationKind::Program | ActivationKind::Routine | ActivationKind::Method
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Ready,
    Running,
    SuspendedOnCall,
    SuspendedOnSignal,
    Returned,
    Raised,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceSetting {
    Off,
    #[default]
    Normal,
    All,
    Commands,
    Errors,
    Failure,
    Intermediates,
    Labels,
    Results,
}

impl TraceSetting {
    pub fn parse(letter: char) -> Option<Self> {
        Some(match letter.to_ascii_uppercase() {
            'O' => TraceSetting::Off,
            'N' => TraceSetting::Normal,
            'A' => TraceSetting::All,
            'C' => TraceSetting::Commands,
            'E' => TraceSetting::Errors,
            'F' => TraceSetting::Failure,
            'I' => TraceSetting::Intermediates,
            'L' => TraceSetting::Labels,
            'R' => TraceSetting::Results,
            _ => return None,
        })
    }

    pub fn letter(self) -> char {
        match self {
            TraceSetting::Off => 'O',
            TraceSetting::Normal => 'N',
            TraceSetting::All => 'A',
            TraceSetting::Commands => 'C',
            TraceSetting::Errors => 'E',
            TraceSetting::Failure => 'F',
            TraceSetting::Intermediates => 'I',
            TraceSetting::Labels => 'L',
            TraceSetting::Results => 'R',
        }
    }

    pub fn traces_clauses(self) -> bool {
        matches!(
            self,
            TraceSetting::All | TraceSetting::Intermediates | TraceSetting::Results
        )
    }

    pub fn traces_results(self) -> bool {
        matches!(self, TraceSetting::Intermediates | TraceSetting::Results)
    }
}

/// Settings inherited by every activation from its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationSettings {
    pub numeric: NumericSettings,
    pub trace: TraceSetting,
    pub interactive: bool,
    pub address: String,
    pub previous_address: String,
}

impl Default for ActivationSettings {
    fn default() -> Self {
        Self {
            numeric: NumericSettings::default(),
            trace: TraceSetting::Normal,
            interactive: false,
            address: "DEFAULT".into(),
            previous_address: "DEFAULT".into(),
        }
    }
}

/// A CALL ON handler waiting for the next clause boundary.
#[derive(Debug, Clone)]
pub struct PendingTrap {
    /// Registered trap name (may be ANY).
    pub trap: String,
    pub label: String,
    pub target: Option<usize>,
    pub condition: Value,
    /// Line of the clause that was interrupted.
    pub line: usize,
}

/// Cursor state of the NEXTV variable-pool request. One enumeration at a
/// time per activation.
#[derive(Debug, Clone, Default)]
pub struct VariablePoolCursor {
    pub active: bool,
    pub variable: Option<Link>,
    /// Stem whose tails are being walked, NULL when none.
    pub stem: Value,
    pub compound: Option<Link>,
}

#[derive(Debug, Clone)]
pub struct RexxActivation {
    pub code: Arc<Code>,
    pub kind: ActivationKind,
    pub state: ActivationState,
    pub package: Value,
    /// Routine or method object being run; NULL for a program or internal call.
    pub executable: Value,
    /// SELF for methods, NULL otherwise.
    pub receiver: Value,
    pub pc: usize,
    pub current_clause: usize,
    pub variables: Value,
    pub stack: Vec<Value>,
    pub arguments: Vec<Value>,
    pub settings: ActivationSettings,
    pub traps: TrapTable,
    pub pending: VecDeque<PendingTrap>,
    /// Condition made visible to CONDITION() and RAISE PROPAGATE.
    pub condition: Value,
    pub parent: Option<usize>,
    /// Activation that EXIT returns from.
    pub program_root: usize,
    /// NULL delegates to the parent activation.
    pub security_manager: Value,
    pub procedure_allowed: bool,
    pub pool_cursor: VariablePoolCursor,
}

impl RexxActivation {
    /// Fresh activation at clause 0 with no variables, traps or arguments.
    pub fn new(code: Arc<Code>, kind: ActivationKind, settings: ActivationSettings) -> Self {
        Self {
            code,
            kind,
            state: ActivationState::Ready,
            package: Value::NULL,
            executable: Value::NULL,
            receiver: Value::NULL,
            pc: 0,
            current_clause: 0,
            variables: Value::NULL,
            stack: Vec::new(),
            arguments: Vec::new(),
            settings,
            traps: TrapTable::default(),
            pending: VecDeque::new(),
            condition: Value::NULL,
            parent: None,
            program_root: 0,
            security_manager: Value::NULL,
            procedure_allowed: false,
            pool_cursor: VariablePoolCursor::default(),
        }
    }

    pub fn location(&self) -> SourceLocation {
        self.code
            .location(self.current_clause)
            .cloned()
            .unwrap_or_default()
    }

    pub fn line(&self) -> usize {
        self.code
            .location(self.current_clause)
            .map_or(0, |l| l.line)
    }

    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        let mut each = |v: &mut Value| {
            if !v.is_null() {
                visitor(v);
            }
        };
        each(&mut self.package);
        each(&mut self.executable);
        each(&mut self.receiver);
        each(&mut self.variables);
        each(&mut self.condition);
        each(&mut self.security_manager);
        each(&mut self.pool_cursor.stem);
        for v in self.stack.iter_mut().chain(self.arguments.iter_mut()) {
            each(v);
        }
        for pending in self.pending.iter_mut() {
            each(&mut pending.condition);
        }
        self.traps.visit_edges_mut(&mut |v: &mut Value| each(v));
    }
}

#[derive(Debug, Clone)]
pub struct NativeActivation {
    pub routine: Value,
    pub name: String,
    pub arguments: Vec<Value>,
    pub result: Value,
    pub variable_pool_enabled: bool,
    /// Objects created by the native code; kept alive until it returns.
    pub protected: Vec<Value>,
    pub parent: Option<usize>,
}

impl NativeActivation {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        let values = std::iter::once(&mut self.routine)
            .chain(std::iter::once(&mut self.result))
            .chain(self.arguments.iter_mut())
            .chain(self.protected.iter_mut());
        for v in values {
            if !v.is_null() {
                visitor(v);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Frame {
    Rexx(Box<RexxActivation>),
    Native(NativeActivation),
}

impl Frame {
    pub fn parent(&self) -> Option<usize> {
        match self {
            Frame::Rexx(act) => act.parent,
            Frame::Native(native) => native.parent,
        }
    }

    pub fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        match self {
            Frame::Rexx(act) => act.visit_roots(visitor),
            Frame::Native(native) => native.visit_roots(visitor),
        }
    }
}
