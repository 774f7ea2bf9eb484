//! Error taxonomy of the transformer.
//!
//! Reflection metadata is a best-effort decoration: unresolved references and
//! unsupported syntax degrade to `any` silently and never surface here. Only
//! invariant violations inside the compiler program and encoding-ceiling
//! overflows abort a transform, in which case the host keeps the source tree
//! unchanged.

use crate::bytecode::PACK_SIZE;

/// Invariant violations in the compiler program builder.
///
/// These indicate a bug in the walker (unbalanced frame or coroutine
/// lifecycles), not bad input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgramError {
    /// `popCoRoutine` was called with no open coroutine.
    #[error("no open coroutine to close")]
    NoOpenCoroutine,
    /// `popFrame` was called on the root frame.
    #[error("frame stack underflow")]
    FrameUnderflow,
}

/// Failures of the byte-packed wire encoding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PackError {
    /// An opcode or operand does not fit the 6-bit encoding alphabet.
    #[error("value {value} for {what} exceeds the {PACK_SIZE}-value encoding ceiling")]
    Overflow {
        /// What carried the value (an opcode name, or `"operand of <op>"`).
        what: &'static str,
        /// The offending value.
        value: u16,
    },
    /// A stack-referencing operand points outside the literal stack.
    #[error("stack index {index} out of range for stack of {len} entries")]
    StackIndexOutOfRange { index: u16, len: usize },
    /// The opcode stream ended in the middle of an instruction.
    #[error("truncated program: {op} expects {expected} operand(s), found {found}")]
    Truncated {
        op: &'static str,
        expected: u8,
        found: u8,
    },
    /// A byte decoded to a value that is not an opcode.
    #[error("unknown opcode value {0}")]
    UnknownOpcode(u16),
    /// A payload character is below the printable encoding offset.
    #[error("payload character {0:?} is outside the encoding alphabet")]
    InvalidChar(char),
}

/// Error returned by [`transform_source_file`](crate::ReflectionTransformer::transform_source_file).
///
/// The host is expected to catch this diagnostic and keep the original
/// source tree.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error(transparent)]
    Pack(#[from] PackError),
}
