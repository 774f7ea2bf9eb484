//! Instruction set, pack structure and wire encoding of the type bytecode.

pub mod dis;
mod op;
mod pack;

pub use op::{MappedModifiers, NumberBrand, Op, ENCODING_OFFSET, PACK_SIZE, PACK_SIZE_BYTE};
pub use pack::{pack, unpack, PackStruct, Payload, StackEntry};
