mod activation;
mod activity;
mod alloc;
mod builtins;
mod code;
mod collections;
mod commands;
mod condition;
mod errors;
mod expression;
mod globals;
mod hashtable;
mod heap;
mod image;
mod interpreter;
mod kernel;
mod methods;
mod native;
mod numeric;
mod object;
mod output;
mod package;
mod trap;
mod value;
mod variables;
mod varpool;
mod visitor;

#[cfg(test)]
mod scenarios;

pub use activation::{ActivationKind, TraceSetting};
pub use activity::{Activity, ActivityControl, ActivitySettings};
pub use builtins::BuiltinFunction;
pub use code::{
    BinaryOp, Code, CodeBuilder, Expr, Instruction, Invocation, JumpPatch, PackageDefinition,
    PrefixOp, RaiseAdditional, RaiseExit, RaiseInstruction, RoutineDefinition, RoutineSource,
    TailPart, TraceRequest, TranslationError, UseArgTarget, VariableRef,
};
pub use commands::{CommandHandler, UNKNOWN_ENVIRONMENT_RC};
pub use condition::{ConditionReport, Unwind};
pub use errors::{
    DefaultCatalog, ErrorCode, FatalError, ImageError, KernelError, MessageCatalog, RexxError,
};
pub use heap::{GcStats, HeapSettings};
pub use image::Image;
pub use kernel::{Kernel, KernelCreateInfo};
pub use native::{ArgKind, NativeArgument, NativeContext, NativeFn, NativeLibrary, NativeSignature};
pub use numeric::{MAX_DIGITS, NumericForm};
pub use output::{BufferedOutput, Output, StdOutput};
pub use value::Value;
pub use varpool::{PoolReturn, ShvBlock, ShvCode, ShvStatus};
