//! Pack structure and printable wire encoding.
//!
//! A compiled program travels as an opcode sequence plus a sidecar *stack*
//! of values that cannot be expressed as inline integers: literal nodes,
//! accessor thunks and symbolic names. The opcode sequence is encoded one
//! character per value as `char(value + 33)`, keeping the payload printable
//! and source-safe; decoding is opcode-directed, so an operand byte is never
//! mistaken for an opcode.
//!
//! Values above the 6-bit alphabet are rejected with a diagnostic rather
//! than silently wrapped; very large programs are expected to fail loudly.

use crate::ast::{Expr, Literal};
use crate::bytecode::op::{Op, ENCODING_OFFSET, PACK_SIZE};
use crate::error::PackError;

/// A compile-time stack entry packaged alongside the opcode string.
#[derive(Debug, Clone, PartialEq)]
pub enum StackEntry {
    /// A literal AST node preserved verbatim in the payload.
    Literal(Literal),
    /// A zero-argument accessor thunk around an expression.
    Thunk(Expr),
    /// A plain string used as a symbolic name.
    Name(String),
}

impl StackEntry {
    pub fn name(value: impl Into<String>) -> Self {
        StackEntry::Name(value.into())
    }

    /// Renders the entry as the expression that appears in the payload
    /// array.
    #[must_use]
    pub fn to_expr(&self) -> Expr {
        match self {
            StackEntry::Literal(lit) => Expr::Literal(lit.clone()),
            StackEntry::Thunk(expr) => Expr::thunk(expr.clone()),
            StackEntry::Name(name) => Expr::str(name.clone()),
        }
    }
}

/// An opcode sequence paired with its literal stack.
///
/// Operand values live inline in `ops`, after their opcode. Every opcode
/// whose first operand references the stack carries an index within
/// `0..stack.len()`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackStruct {
    pub ops: Vec<u16>,
    pub stack: Vec<StackEntry>,
}

/// A packed program: the encoded opcode string plus the stack entries that
/// precede it in the payload array.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub stack: Vec<StackEntry>,
    pub encoded: String,
}

impl Payload {
    /// Renders the payload as the expression attached to a carrier: the
    /// encoded string alone, or an array ending in it when the stack is
    /// non-empty.
    #[must_use]
    pub fn to_expr(&self) -> Expr {
        if self.stack.is_empty() {
            Expr::str(self.encoded.clone())
        } else {
            let mut items: Vec<Expr> = self.stack.iter().map(StackEntry::to_expr).collect();
            items.push(Expr::str(self.encoded.clone()));
            Expr::Array(items)
        }
    }
}

/// Checks that `ops` is a well-formed stream: every value within the
/// alphabet, every opcode followed by its declared operand count, and every
/// stack-referencing operand in range.
fn validate(ops: &[u16], stack_len: usize) -> Result<(), PackError> {
    let mut i = 0;
    while i < ops.len() {
        let value = ops[i];
        if value >= PACK_SIZE {
            return Err(PackError::UnknownOpcode(value));
        }
        let op = Op::try_from(value as u8).map_err(|_| PackError::UnknownOpcode(value))?;
        let arity = op.params();
        for k in 0..arity {
            let Some(&operand) = ops.get(i + 1 + k as usize) else {
                return Err(PackError::Truncated {
                    op: op.into(),
                    expected: arity,
                    found: k,
                });
            };
            if operand >= PACK_SIZE {
                return Err(PackError::Overflow {
                    what: op.into(),
                    value: operand,
                });
            }
            if k == 0 && op.references_stack() && operand as usize >= stack_len {
                return Err(PackError::StackIndexOutOfRange {
                    index: operand,
                    len: stack_len,
                });
            }
        }
        i += 1 + arity as usize;
    }
    Ok(())
}

/// Encodes a pack structure into its wire payload.
pub fn pack(pack: &PackStruct) -> Result<Payload, PackError> {
    validate(&pack.ops, pack.stack.len())?;
    let encoded = pack
        .ops
        .iter()
        .map(|&v| char::from(v as u8 + ENCODING_OFFSET))
        .collect();
    Ok(Payload {
        stack: pack.stack.clone(),
        encoded,
    })
}

/// Decodes a wire payload back into a pack structure.
pub fn unpack(payload: &Payload) -> Result<PackStruct, PackError> {
    let mut ops = Vec::with_capacity(payload.encoded.len());
    for c in payload.encoded.chars() {
        let code = u32::from(c);
        let offset = u32::from(ENCODING_OFFSET);
        if code < offset || code >= offset + u32::from(PACK_SIZE) {
            return Err(PackError::InvalidChar(c));
        }
        ops.push((code - offset) as u16);
    }
    validate(&ops, payload.stack.len())?;
    Ok(PackStruct {
        ops,
        stack: payload.stack.clone(),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ops(ops: &[u16]) -> PackStruct {
        PackStruct {
            ops: ops.to_vec(),
            stack: Vec::new(),
        }
    }

    #[test]
    fn packs_a_single_primitive() {
        let payload = pack(&ops(&[Op::String as u16])).unwrap();
        assert_eq!(payload.encoded, "$");
        assert!(payload.stack.is_empty());
    }

    #[test]
    fn round_trips_struct_through_payload() {
        let original = PackStruct {
            ops: vec![
                Op::String as u16,
                Op::PropertySignature as u16,
                0,
                Op::ObjectLiteral as u16,
            ],
            stack: vec![StackEntry::name("title")],
        };
        let payload = pack(&original).unwrap();
        assert_eq!(unpack(&payload).unwrap(), original);
    }

    #[test]
    fn round_trips_payload_through_struct() {
        let payload = Payload {
            stack: vec![StackEntry::name("v")],
            encoded: pack(&PackStruct {
                ops: vec![Op::Number as u16, Op::Property as u16, 0, Op::Class as u16],
                stack: vec![StackEntry::name("v")],
            })
            .unwrap()
            .encoded,
        };
        let unpacked = unpack(&payload).unwrap();
        assert_eq!(pack(&unpacked).unwrap(), payload);
    }

    #[test]
    fn rejects_values_beyond_the_ceiling() {
        let err = pack(&ops(&[Op::Jump as u16, 64])).unwrap_err();
        assert_eq!(
            err,
            PackError::Overflow {
                what: "jump",
                value: 64
            }
        );
        assert_eq!(pack(&ops(&[64])).unwrap_err(), PackError::UnknownOpcode(64));
    }

    #[test]
    fn rejects_truncated_instructions() {
        let err = pack(&ops(&[Op::Loads as u16, 1])).unwrap_err();
        assert_eq!(
            err,
            PackError::Truncated {
                op: "loads",
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn rejects_dangling_stack_indices() {
        let err = pack(&ops(&[Op::Literal as u16, 0])).unwrap_err();
        assert_eq!(err, PackError::StackIndexOutOfRange { index: 0, len: 0 });
    }

    #[test]
    fn rejects_characters_outside_the_alphabet() {
        let payload = Payload {
            stack: Vec::new(),
            encoded: " ".to_string(),
        };
        assert_eq!(unpack(&payload).unwrap_err(), PackError::InvalidChar(' '));
    }

    #[test]
    fn payload_expression_is_the_string_when_stack_is_empty() {
        let payload = pack(&ops(&[Op::Never as u16])).unwrap();
        assert_eq!(payload.to_expr(), Expr::str("!"));
    }

    #[test]
    fn payload_expression_ends_with_the_encoded_string() {
        let payload = pack(&PackStruct {
            ops: vec![Op::Literal as u16, 0],
            stack: vec![StackEntry::Literal(Literal::Bool(true))],
        })
        .unwrap();
        let Expr::Array(items) = payload.to_expr() else {
            panic!("expected an array payload");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[1], Expr::str(payload.encoded.clone()));
    }
}
