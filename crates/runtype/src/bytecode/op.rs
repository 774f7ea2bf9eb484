//! Opcode definitions for the type bytecode.
//!
//! Programs are stacks of type values: each opcode pushes, combines or
//! decorates entries on the runtime stack of the companion virtual machine.
//! Operands are inline integers following the opcode in the stream; their
//! count is a closed function of the opcode ([`Op::params`]).
//!
//! # Operand encoding
//!
//! - No operand: primitives, combinators, `frame`, `return`, well-known
//!   classes.
//! - One operand: ops naming things through the literal stack (`literal`,
//!   `property`, `template`, `inline`, …) and single-value ops (`jump`,
//!   `numberBrand`, `call`, `arg`, `pointer`).
//! - Two operands: `mappedType <coroutineOffset, modifierBits>`,
//!   `inlineCall <nameIndex, arity>`, `loads <frameOffset, varIndex>`,
//!   `infer <frameOffset, varIndex>`.
//!
//! The whole repertoire must stay within [`PACK_SIZE`] values so opcodes and
//! operands share the 6-bit wire alphabet.

use num_enum::TryFromPrimitive;

/// Number of bits of the wire alphabet.
pub const PACK_SIZE_BYTE: u8 = 6;

/// Size of the wire alphabet; opcodes and operand bytes must stay below it.
pub const PACK_SIZE: u16 = 1 << PACK_SIZE_BYTE;

/// Offset added to every packed value so the payload stays printable ASCII.
pub const ENCODING_OFFSET: u8 = 33;

/// One instruction of the type-bytecode VM.
///
/// The set is closed at exactly [`PACK_SIZE`] values. `public` carries no
/// opcode (it is the source default and never emitted); constructors are
/// encoded as [`Op::Method`] with the name `"constructor"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
#[repr(u8)]
pub enum Op {
    // primitives
    Never = 0,
    Any = 1,
    Void = 2,
    String = 3,
    Number = 4,
    /// Branded number. Operand: a [`NumberBrand`] value.
    NumberBrand = 5,
    Boolean = 6,
    Bigint = 7,
    Null = 8,
    Undefined = 9,

    /// Literal type. Operand: stack index of the literal.
    Literal = 10,

    // structural builders
    /// Collects the members pushed in the current frame into a class.
    Class = 11,
    /// Collects the members pushed in the current frame into an object shape.
    ObjectLiteral = 12,
    /// Wraps the top of the stack into an array type.
    Array = 13,
    /// Wraps the top of the stack into a set type.
    Set = 14,
    /// Wraps the top two entries (key, value) into a map type.
    Map = 15,

    // members
    /// Class property. Operand: stack index of the name.
    Property = 16,
    /// Interface/object property. Operand: stack index of the name.
    PropertySignature = 17,
    /// Class method. Operand: stack index of the name.
    Method = 18,
    /// Interface/object method. Operand: stack index of the name.
    MethodSignature = 19,
    /// Function type. Operand: stack index of the name (empty string when
    /// anonymous).
    Function = 20,
    /// Function parameter. Operand: stack index of the name.
    Parameter = 21,
    /// Index signature over the top two entries (key, value).
    IndexSignature = 22,

    // trailing member decorations
    Optional = 23,
    Readonly = 24,
    Private = 25,
    Protected = 26,
    Abstract = 27,
    /// Default value. Operand: stack index of a zero-argument thunk.
    DefaultValue = 28,
    /// Doc text. Operand: stack index of the description string.
    Description = 29,

    // algebraic combinators
    Union = 30,
    Intersection = 31,

    // generics and references
    /// Binds a type parameter in the current frame. Operand: stack index of
    /// the name.
    Template = 32,
    /// Reference to a live class binding. Operand: stack index of an
    /// accessor thunk.
    ClassReference = 33,
    /// By-name reference to a hoisted program. Operand: stack index of an
    /// accessor thunk.
    Inline = 34,
    /// Generic application of a hoisted program. Operands: stack index of
    /// an accessor thunk, argument count.
    InlineCall = 35,
    /// Loads a frame variable. Operands: frame offset, variable index.
    Loads = 36,
    /// Allocates the next variable slot in the current frame.
    Var = 37,
    /// Reserved pointer indirection. Operand: absolute program offset.
    Pointer = 38,
    /// Reserved calling-convention argument. Operand: argument index.
    Arg = 39,

    // conditional types and inference
    /// Pops (extendee, extender) and pushes the assignability verdict.
    Extends = 40,
    /// Pops (false branch, true branch, verdict) and pushes the selected
    /// branch.
    Condition = 41,
    /// Stores the top of the stack into an inference slot. Operands: frame
    /// offset, variable index.
    Infer = 42,
    /// Reserved conditional jump for the VM calling convention.
    JumpCondition = 43,
    /// Unconditional jump. Operand: absolute program offset.
    Jump = 44,

    /// Mapped type. Operands: coroutine start offset, modifier bits (see
    /// [`MappedModifiers`]).
    MappedType = 45,

    // operators
    KeyOf = 46,
    /// Indexed access: pops (index, container) and pushes the element type.
    Query = 47,
    /// Reserved membership operator for the VM calling convention.
    In = 48,

    /// Enum reference. Operand: stack index of an accessor thunk.
    Enum = 49,

    // control
    /// Opens a runtime frame.
    Frame = 50,
    /// Ends a subprogram, yielding its top of stack to the caller.
    Return = 51,
    /// Invokes a subprogram. Operand: absolute program offset.
    Call = 52,

    // well-known classes
    Date = 53,
    /// Wraps the top of the stack into a promise type.
    Promise = 54,
    ArrayBuffer = 55,
    Int8Array = 56,
    Uint8Array = 57,
    Int16Array = 58,
    Uint16Array = 59,
    Int32Array = 60,
    Uint32Array = 61,
    Float32Array = 62,
    Float64Array = 63,
}

impl Op {
    /// Number of inline operands following this opcode in the stream.
    #[must_use]
    pub const fn params(self) -> u8 {
        match self {
            Op::Literal
            | Op::Pointer
            | Op::Arg
            | Op::ClassReference
            | Op::PropertySignature
            | Op::Property
            | Op::Jump
            | Op::Enum
            | Op::Template
            | Op::Call
            | Op::Inline
            | Op::DefaultValue
            | Op::Parameter
            | Op::Method
            | Op::MethodSignature
            | Op::Function
            | Op::Description
            | Op::NumberBrand => 1,
            Op::MappedType | Op::InlineCall | Op::Loads | Op::Infer => 2,
            _ => 0,
        }
    }

    /// True when the first operand indexes the literal stack.
    #[must_use]
    pub const fn references_stack(self) -> bool {
        matches!(
            self,
            Op::Literal
                | Op::ClassReference
                | Op::PropertySignature
                | Op::Property
                | Op::Enum
                | Op::Template
                | Op::Inline
                | Op::InlineCall
                | Op::DefaultValue
                | Op::Parameter
                | Op::Method
                | Op::MethodSignature
                | Op::Function
                | Op::Description
        )
    }
}

/// Operand values of [`Op::NumberBrand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum NumberBrand {
    Integer = 0,
    Int8 = 1,
    Uint8 = 2,
    Int16 = 3,
    Uint16 = 4,
    Int32 = 5,
    Uint32 = 6,
    Float = 7,
    Float32 = 8,
    Float64 = 9,
}

impl NumberBrand {
    /// Maps a source-level brand alias name to its operand value.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "integer" => NumberBrand::Integer,
            "int8" => NumberBrand::Int8,
            "uint8" => NumberBrand::Uint8,
            "int16" => NumberBrand::Int16,
            "uint16" => NumberBrand::Uint16,
            "int32" => NumberBrand::Int32,
            "uint32" => NumberBrand::Uint32,
            "float" => NumberBrand::Float,
            "float32" => NumberBrand::Float32,
            "float64" => NumberBrand::Float64,
            _ => return None,
        })
    }
}

bitflags::bitflags! {
    /// Modifier bits of the second [`Op::MappedType`] operand.
    ///
    /// The adding and removing senses are independent bits so the runtime
    /// can distinguish `?` from `-?` and `readonly` from `-readonly`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MappedModifiers: u16 {
        const OPTIONAL = 1;
        const REMOVE_OPTIONAL = 1 << 1;
        const READONLY = 1 << 2;
        const REMOVE_READONLY = 1 << 3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repertoire_fits_the_pack_alphabet() {
        for value in 0..PACK_SIZE {
            let op = Op::try_from(value as u8);
            assert!(op.is_ok(), "value {value} must be a valid opcode");
        }
        assert!(Op::try_from(PACK_SIZE as u8).is_err());
    }

    #[test]
    fn arities_match_the_closed_map() {
        assert_eq!(Op::String.params(), 0);
        assert_eq!(Op::Literal.params(), 1);
        assert_eq!(Op::Function.params(), 1);
        assert_eq!(Op::MethodSignature.params(), 1);
        assert_eq!(Op::MappedType.params(), 2);
        assert_eq!(Op::Loads.params(), 2);
        assert_eq!(Op::Infer.params(), 2);
        assert_eq!(Op::InlineCall.params(), 2);
        assert_eq!(Op::JumpCondition.params(), 0);
    }

    #[test]
    fn stack_referencing_ops_carry_an_operand() {
        for value in 0..PACK_SIZE {
            let op = Op::try_from(value as u8).unwrap();
            if op.references_stack() {
                assert!(op.params() >= 1, "{op} references the stack but has no operand");
            }
        }
    }

    #[test]
    fn display_uses_source_casing() {
        assert_eq!(Op::MappedType.to_string(), "mappedType");
        assert_eq!(Op::PropertySignature.to_string(), "propertySignature");
        assert_eq!(NumberBrand::Uint16.to_string(), "uint16");
    }
}
