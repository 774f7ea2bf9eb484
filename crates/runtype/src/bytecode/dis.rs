//! Human-readable rendering of packed programs.
//!
//! Used by diagnostics and tests to assert on op sequences without spelling
//! raw byte values.

use std::fmt::Write;

use crate::bytecode::op::{Op, ENCODING_OFFSET, PACK_SIZE};
use crate::bytecode::pack::{unpack, Payload};
use crate::error::PackError;

/// Renders an opcode stream as `op(operand, …)` words separated by spaces.
///
/// # Errors
/// Returns the same structural errors as [`unpack`] when the stream is
/// malformed.
pub fn disassemble(ops: &[u16]) -> Result<String, PackError> {
    let mut out = String::new();
    let mut i = 0;
    while i < ops.len() {
        let value = ops[i];
        let op = u8::try_from(value)
            .ok()
            .and_then(|v| Op::try_from(v).ok())
            .ok_or(PackError::UnknownOpcode(value))?;
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(op.into());
        let arity = op.params() as usize;
        if arity > 0 {
            let operands = ops.get(i + 1..i + 1 + arity).ok_or(PackError::Truncated {
                op: op.into(),
                expected: op.params(),
                found: (ops.len() - i - 1) as u8,
            })?;
            out.push('(');
            for (k, operand) in operands.iter().enumerate() {
                if k > 0 {
                    out.push_str(", ");
                }
                write!(out, "{operand}").expect("writing to a string");
            }
            out.push(')');
        }
        i += 1 + arity;
    }
    Ok(out)
}

/// Decodes and renders an encoded payload string.
///
/// # Errors
/// Returns [`PackError`] when the payload is not a valid encoding.
pub fn disassemble_encoded(encoded: &str) -> Result<String, PackError> {
    // Stack indices cannot be validated without the sidecar stack; fall
    // back to a structure-only decode when that is all that failed.
    let payload = Payload {
        stack: Vec::new(),
        encoded: encoded.to_string(),
    };
    let ops = match unpack(&payload) {
        Ok(pack) => pack.ops,
        Err(PackError::StackIndexOutOfRange { .. }) => decode_unchecked(encoded)?,
        Err(e) => return Err(e),
    };
    disassemble(&ops)
}

fn decode_unchecked(encoded: &str) -> Result<Vec<u16>, PackError> {
    encoded
        .chars()
        .map(|c| {
            let code = u32::from(c);
            let offset = u32::from(ENCODING_OFFSET);
            if (offset..offset + u32::from(PACK_SIZE)).contains(&code) {
                Ok((code - offset) as u16)
            } else {
                Err(PackError::InvalidChar(c))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn renders_operand_free_ops() {
        let listing = disassemble(&[Op::String as u16, Op::Number as u16, Op::Union as u16]).unwrap();
        assert_eq!(listing, "string number union");
    }

    #[test]
    fn renders_operands_in_parens() {
        let listing = disassemble(&[
            Op::Frame as u16,
            Op::Var as u16,
            Op::Loads as u16,
            1,
            0,
            Op::KeyOf as u16,
            Op::MappedType as u16,
            2,
            1,
        ])
        .unwrap();
        assert_eq!(listing, "frame var loads(1, 0) keyOf mappedType(2, 1)");
    }

    #[test]
    fn reports_unknown_values() {
        assert_eq!(disassemble(&[64]).unwrap_err(), PackError::UnknownOpcode(64));
    }
}
