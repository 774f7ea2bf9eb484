//! Mutable builder for one type-bytecode program.
//!
//! A program is created per rewritten carrier, populated by a single walk of
//! the type syntax, finalized once into a [`PackStruct`] and discarded. The
//! builder owns the op buffers (main program plus any open mapped-type
//! coroutines), the shared literal stack, and the chain of lexical frames.
//!
//! Frames open and close in strict LIFO order following the source
//! structure. While a coroutine is open it receives all pushed ops; closed
//! coroutines are prepended to the final program behind a `jump` prelude so
//! execution starts at the main program.

use crate::bytecode::{Op, PackStruct, StackEntry};
use crate::error::ProgramError;

/// A lexical scope of the program under construction.
#[derive(Debug)]
struct Frame {
    /// Buffer this frame's ops live in.
    buffer: usize,
    /// Index into the buffer at which the frame was opened; late `var` ops
    /// are spliced here.
    op_index: usize,
    /// Names bound in this frame, in slot order.
    variables: Vec<String>,
    /// Marks the immediate scope of a conditional-type `extends` clause.
    conditional: bool,
    /// Count of `var` ops already spliced at `op_index`.
    spliced: usize,
}

#[derive(Debug, Default)]
struct OpBuffer {
    id: usize,
    ops: Vec<u16>,
    /// Length of the template-parameter prologue; ops past it count as body
    /// ops for frame-push suppression.
    watermark: usize,
}

/// Reference to an open frame, usable while the frame is still on the chain.
pub type FrameRef = usize;

/// A resolved frame-variable reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableRef {
    /// Hops outward from the current frame.
    pub frame_offset: u16,
    /// Slot index within the resolved frame.
    pub index: u16,
}

/// Builder for a single compiled program.
#[derive(Debug)]
pub struct CompilerProgram {
    main: OpBuffer,
    stack: Vec<StackEntry>,
    /// Open coroutines, innermost last.
    open: Vec<OpBuffer>,
    /// Completed coroutine subprograms in close order.
    completed: Vec<Vec<u16>>,
    /// Open frames, root first.
    frames: Vec<Frame>,
    /// Absolute index at which the main program begins once coroutines are
    /// prepended; starts at 2 to reserve the `jump` prelude.
    main_offset: u16,
    next_buffer: usize,
}

impl Default for CompilerProgram {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerProgram {
    #[must_use]
    pub fn new() -> Self {
        CompilerProgram {
            main: OpBuffer::default(),
            stack: Vec::new(),
            open: Vec::new(),
            completed: Vec::new(),
            frames: vec![Frame {
                buffer: 0,
                op_index: 0,
                variables: Vec::new(),
                conditional: false,
                spliced: 0,
            }],
            main_offset: 2,
            next_buffer: 1,
        }
    }

    fn active(&mut self) -> &mut OpBuffer {
        self.open.last_mut().unwrap_or(&mut self.main)
    }

    fn active_ref(&self) -> &OpBuffer {
        self.open.last().unwrap_or(&self.main)
    }

    /// Appends an operand-free op to the active buffer.
    pub fn push_op(&mut self, op: Op) {
        debug_assert_eq!(op.params(), 0, "{op} requires operands");
        self.active().ops.push(op as u16);
    }

    /// Appends an op and its inline operands to the active buffer.
    pub fn push_op_with(&mut self, op: Op, params: &[u16]) {
        debug_assert_eq!(usize::from(op.params()), params.len(), "{op} operand count");
        let buffer = self.active();
        buffer.ops.push(op as u16);
        buffer.ops.extend_from_slice(params);
    }

    /// Appends an entry to the shared literal stack and returns its index.
    pub fn push_stack(&mut self, entry: StackEntry) -> u16 {
        self.stack.push(entry);
        (self.stack.len() - 1) as u16
    }

    /// Returns the index of an equal stack entry, appending it first when
    /// absent. Used for names and constants that recur.
    pub fn find_or_add_stack(&mut self, entry: StackEntry) -> u16 {
        match self.stack.iter().position(|existing| *existing == entry) {
            Some(index) => index as u16,
            None => self.push_stack(entry),
        }
    }

    /// True when the active buffer holds ops past its template-parameter
    /// prologue. Several constructs only isolate themselves in a frame when
    /// something precedes them.
    #[must_use]
    pub fn has_body_ops(&self) -> bool {
        let buffer = self.active_ref();
        buffer.ops.len() > buffer.watermark
    }

    /// Opens a frame, emitting its `frame` op.
    pub fn push_frame(&mut self) {
        self.push_op(Op::Frame);
        self.open_frame(false);
    }

    /// Opens a frame and marks it as the scope of a conditional type.
    pub fn push_conditional_frame(&mut self) {
        self.push_op(Op::Frame);
        self.open_frame(true);
    }

    fn open_frame(&mut self, conditional: bool) {
        let buffer = self.active_ref();
        self.frames.push(Frame {
            buffer: buffer.id,
            op_index: buffer.ops.len(),
            variables: Vec::new(),
            conditional,
            spliced: 0,
        });
    }

    /// Restores the parent frame. Emits nothing.
    ///
    /// # Errors
    /// [`ProgramError::FrameUnderflow`] when only the root frame remains.
    pub fn pop_frame(&mut self) -> Result<(), ProgramError> {
        if self.frames.len() <= 1 {
            return Err(ProgramError::FrameUnderflow);
        }
        self.frames.pop();
        Ok(())
    }

    /// The current frame.
    #[must_use]
    pub fn current_frame(&self) -> FrameRef {
        self.frames.len() - 1
    }

    /// The nearest enclosing conditional frame, if any.
    #[must_use]
    pub fn find_conditional_frame(&self) -> Option<FrameRef> {
        self.frames.iter().rposition(|frame| frame.conditional)
    }

    /// Hops outward from the current frame to `frame`.
    #[must_use]
    pub fn frame_offset_to(&self, frame: FrameRef) -> u16 {
        (self.frames.len() - 1 - frame) as u16
    }

    /// Slot index of `name` within `frame`, if bound there.
    #[must_use]
    pub fn variable_in_frame(&self, frame: FrameRef, name: &str) -> Option<u16> {
        self.frames[frame]
            .variables
            .iter()
            .position(|v| v == name)
            .map(|i| i as u16)
    }

    /// Binds `name` in the current frame, splicing its `var` op at the frame
    /// opening.
    pub fn push_variable(&mut self, name: &str) -> u16 {
        self.push_variable_at(self.current_frame(), name)
    }

    /// Binds `name` in `frame`, splicing its `var` op at the frame opening.
    ///
    /// The splice lands after any `var` ops already inserted for the frame so
    /// runtime slot order matches binding order; recorded opening indices of
    /// deeper frames in the same buffer shift right by one.
    pub fn push_variable_at(&mut self, frame: FrameRef, name: &str) -> u16 {
        let buffer_id = self.frames[frame].buffer;
        let insert_at = self.frames[frame].op_index + self.frames[frame].spliced;

        let buffer = if buffer_id == 0 {
            &mut self.main
        } else {
            self.open
                .iter_mut()
                .find(|b| b.id == buffer_id)
                .expect("frame buffer is still open")
        };
        buffer.ops.insert(insert_at, Op::Var as u16);

        for (i, other) in self.frames.iter_mut().enumerate() {
            if i != frame && other.buffer == buffer_id && other.op_index >= insert_at {
                other.op_index += 1;
            }
        }

        let target = &mut self.frames[frame];
        target.spliced += 1;
        target.variables.push(name.to_string());
        (target.variables.len() - 1) as u16
    }

    /// Emits `template <nameIndex>` and binds `name` in the current frame.
    /// Used at entry to a generic declaration; the ops it emits count as
    /// prologue, not body.
    pub fn push_template_parameter(&mut self, name: &str) -> u16 {
        let name_index = self.find_or_add_stack(StackEntry::name(name));
        self.push_op_with(Op::Template, &[name_index]);
        let buffer = self.active();
        buffer.watermark = buffer.ops.len();
        let frame = self.frames.last_mut().expect("root frame always present");
        frame.variables.push(name.to_string());
        (frame.variables.len() - 1) as u16
    }

    /// Resolves `name` against the frame chain, walking outward.
    #[must_use]
    pub fn find_variable(&self, name: &str) -> Option<VariableRef> {
        for (offset, frame) in self.frames.iter().rev().enumerate() {
            if let Some(index) = frame.variables.iter().position(|v| v == name) {
                return Some(VariableRef {
                    frame_offset: offset as u16,
                    index: index as u16,
                });
            }
        }
        None
    }

    /// Opens a coroutine with its implicit frame. The calling convention
    /// reserves a frame per invocation, so no `frame` op is emitted.
    pub fn push_co_routine(&mut self) {
        let id = self.next_buffer;
        self.next_buffer += 1;
        self.open.push(OpBuffer {
            id,
            ops: Vec::new(),
            watermark: 0,
        });
        self.open_frame(false);
    }

    /// Closes the innermost coroutine, terminating it with `return`, and
    /// returns the absolute offset at which it will live in the final
    /// program.
    ///
    /// # Errors
    /// [`ProgramError::NoOpenCoroutine`] when no coroutine is open, and
    /// [`ProgramError::FrameUnderflow`] when frames opened inside the
    /// coroutine were not closed.
    pub fn pop_co_routine(&mut self) -> Result<u16, ProgramError> {
        let mut co = self.open.pop().ok_or(ProgramError::NoOpenCoroutine)?;
        co.ops.push(Op::Return as u16);
        match self.frames.last() {
            Some(frame) if frame.buffer == co.id => {
                self.frames.pop();
            }
            _ => return Err(ProgramError::FrameUnderflow),
        }
        let start = self.main_offset;
        self.main_offset += co.ops.len() as u16;
        self.completed.push(co.ops);
        Ok(start)
    }

    /// Finalizes the program into a pack structure.
    ///
    /// Completed coroutines are prepended in close order; when any exist, a
    /// `jump <mainOffset>` prelude is prepended so execution skips them.
    #[must_use]
    pub fn build(self) -> PackStruct {
        if self.completed.is_empty() {
            return PackStruct {
                ops: self.main.ops,
                stack: self.stack,
            };
        }
        let total: usize = self.completed.iter().map(Vec::len).sum();
        let mut ops = Vec::with_capacity(2 + total + self.main.ops.len());
        ops.push(Op::Jump as u16);
        ops.push(self.main_offset);
        for co in self.completed {
            ops.extend(co);
        }
        ops.extend(self.main.ops);
        PackStruct {
            ops,
            stack: self.stack,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn plain_program_has_no_jump_prelude() {
        let mut program = CompilerProgram::new();
        program.push_op(Op::String);
        assert_eq!(program.build().ops, vec![Op::String as u16]);
    }

    #[test]
    fn find_variable_counts_frame_hops() {
        let mut program = CompilerProgram::new();
        program.push_template_parameter("T");
        program.push_frame();
        program.push_variable("P");
        assert_eq!(
            program.find_variable("P"),
            Some(VariableRef {
                frame_offset: 0,
                index: 0
            })
        );
        assert_eq!(
            program.find_variable("T"),
            Some(VariableRef {
                frame_offset: 1,
                index: 0
            })
        );
        assert_eq!(program.find_variable("missing"), None);
    }

    #[test]
    fn template_parameters_do_not_count_as_body_ops() {
        let mut program = CompilerProgram::new();
        assert!(!program.has_body_ops());
        program.push_template_parameter("T");
        assert!(!program.has_body_ops());
        program.push_op(Op::String);
        assert!(program.has_body_ops());
    }

    #[test]
    fn variables_splice_at_the_frame_opening() {
        let mut program = CompilerProgram::new();
        program.push_conditional_frame();
        let frame = program.current_frame();
        program.push_op(Op::String);
        program.push_op(Op::Number);
        // Late binding discovered mid-scope lands at the opening, not here.
        program.push_variable_at(frame, "X");
        assert_eq!(
            program.build().ops,
            vec![
                Op::Frame as u16,
                Op::Var as u16,
                Op::String as u16,
                Op::Number as u16
            ]
        );
    }

    #[test]
    fn spliced_variables_keep_binding_order() {
        let mut program = CompilerProgram::new();
        program.push_conditional_frame();
        let frame = program.current_frame();
        program.push_op(Op::String);
        let first = program.push_variable_at(frame, "A");
        let second = program.push_variable_at(frame, "B");
        assert_eq!((first, second), (0, 1));
        assert_eq!(
            program.build().ops,
            vec![
                Op::Frame as u16,
                Op::Var as u16,
                Op::Var as u16,
                Op::String as u16
            ]
        );
    }

    #[test]
    fn splice_shifts_deeper_frame_openings() {
        let mut program = CompilerProgram::new();
        program.push_conditional_frame();
        let outer = program.current_frame();
        program.push_frame();
        program.push_variable_at(outer, "X");
        // The inner frame's opening shifted by one; a variable bound there
        // still lands right after its `frame` op.
        program.push_variable("Y");
        assert_eq!(
            program.build().ops,
            vec![
                Op::Frame as u16,
                Op::Var as u16,
                Op::Frame as u16,
                Op::Var as u16
            ]
        );
    }

    #[test]
    fn coroutines_are_prepended_behind_a_jump() {
        let mut program = CompilerProgram::new();
        program.push_co_routine();
        program.push_op(Op::String);
        let start = program.pop_co_routine().unwrap();
        assert_eq!(start, 2);
        program.push_op_with(Op::MappedType, &[start, 0]);
        let ops = program.build().ops;
        assert_eq!(
            ops,
            vec![
                Op::Jump as u16,
                4,
                Op::String as u16,
                Op::Return as u16,
                Op::MappedType as u16,
                2,
                0
            ]
        );
    }

    #[test]
    fn consecutive_coroutines_advance_the_main_offset() {
        let mut program = CompilerProgram::new();
        program.push_co_routine();
        program.push_op(Op::String);
        let first = program.pop_co_routine().unwrap();
        program.push_co_routine();
        program.push_op(Op::Number);
        let second = program.pop_co_routine().unwrap();
        assert_eq!((first, second), (2, 4));
        let ops = program.build().ops;
        assert_eq!(ops[0], Op::Jump as u16);
        assert_eq!(ops[1], 6);
        assert_eq!(ops[6..], [] as [u16; 0]);
    }

    #[test]
    fn pop_frame_on_root_is_an_error() {
        let mut program = CompilerProgram::new();
        assert_eq!(program.pop_frame(), Err(ProgramError::FrameUnderflow));
    }

    #[test]
    fn pop_co_routine_without_open_coroutine_is_an_error() {
        let mut program = CompilerProgram::new();
        assert_eq!(program.pop_co_routine(), Err(ProgramError::NoOpenCoroutine));
    }

    #[test]
    fn stack_entries_deduplicate_by_equality() {
        let mut program = CompilerProgram::new();
        let a = program.find_or_add_stack(StackEntry::name("v"));
        let b = program.find_or_add_stack(StackEntry::name("v"));
        let c = program.find_or_add_stack(StackEntry::name("w"));
        assert_eq!((a, b, c), (0, 0, 1));
    }
}
