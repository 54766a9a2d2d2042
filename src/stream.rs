//! Forward-only cursor over a method's decoded instructions.
//!
//! The decoded instruction list is owned by the IR; a stream owns only its
//! cursor, so any number of independent scans over the same method can run.

use crate::errors::EngineError;
use crate::ir::{CallSite, ConstValue, FieldRef, Instruction, Operand};

pub(crate) struct InstructionStream<'a> {
    instructions: &'a [Instruction],
    cursor: usize,
}

impl<'a> InstructionStream<'a> {
    pub(crate) fn new(instructions: &'a [Instruction]) -> Self {
        InstructionStream {
            instructions,
            cursor: 0,
        }
    }

    /// The instruction at the cursor, or `None` for an empty method.
    pub(crate) fn current(&self) -> Option<&'a Instruction> {
        self.instructions.get(self.cursor)
    }

    /// Move the cursor forward one instruction.
    pub(crate) fn advance(&mut self) -> Result<&'a Instruction, EngineError> {
        let next = self.cursor + 1;
        let instruction = self
            .instructions
            .get(next)
            .ok_or(EngineError::EndOfStream)?;
        self.cursor = next;
        Ok(instruction)
    }

    /// Program counter of the current instruction.
    pub(crate) fn pc(&self) -> u32 {
        self.current().map(|insn| insn.offset).unwrap_or(0)
    }

    /// Absolute target of a branch instruction.
    pub(crate) fn branch_target(&self, insn: &Instruction) -> Result<u32, EngineError> {
        match &insn.operand {
            Operand::Branch(relative) => Ok((insn.offset as i64 + *relative as i64) as u32),
            _ => Err(EngineError::WrongOperandKind {
                pc: insn.offset,
                expected: "a branch offset",
            }),
        }
    }

    /// Absolute targets of a tableswitch/lookupswitch, default first.
    pub(crate) fn switch_targets(&self, insn: &Instruction) -> Result<Vec<u32>, EngineError> {
        match &insn.operand {
            Operand::Switch(relatives) => Ok(relatives
                .iter()
                .map(|relative| (insn.offset as i64 + *relative as i64) as u32)
                .collect()),
            _ => Err(EngineError::WrongOperandKind {
                pc: insn.offset,
                expected: "switch offsets",
            }),
        }
    }

    pub(crate) fn operand_int(&self) -> Result<i32, EngineError> {
        match self.current().map(|insn| &insn.operand) {
            Some(Operand::Int(value)) => Ok(*value),
            _ => Err(self.wrong_operand("an integer")),
        }
    }

    pub(crate) fn local_slot(&self) -> Result<u16, EngineError> {
        match self.current().map(|insn| &insn.operand) {
            Some(Operand::Local(slot)) => Ok(*slot),
            Some(Operand::Iinc { slot, .. }) => Ok(*slot),
            _ => Err(self.wrong_operand("a local slot")),
        }
    }

    pub(crate) fn constant_operand(&self) -> Result<&'a ConstValue, EngineError> {
        match self.current().map(|insn| &insn.operand) {
            Some(Operand::Const(value)) => Ok(value),
            _ => Err(self.wrong_operand("a constant")),
        }
    }

    pub(crate) fn invoked_method(&self) -> Result<&'a CallSite, EngineError> {
        match self.current().map(|insn| &insn.operand) {
            Some(Operand::Invoke(call)) => Ok(call),
            _ => Err(self.wrong_operand("a method reference")),
        }
    }

    pub(crate) fn field_operand(&self) -> Result<&'a FieldRef, EngineError> {
        match self.current().map(|insn| &insn.operand) {
            Some(Operand::Field(field)) => Ok(field),
            _ => Err(self.wrong_operand("a field reference")),
        }
    }

    pub(crate) fn class_operand(&self) -> Result<&'a str, EngineError> {
        match self.current().map(|insn| &insn.operand) {
            Some(Operand::Type(name)) => Ok(name),
            Some(Operand::MultiArray { class_name, .. }) => Ok(class_name),
            _ => Err(self.wrong_operand("a class reference")),
        }
    }

    fn wrong_operand(&self, expected: &'static str) -> EngineError {
        EngineError::WrongOperandKind {
            pc: self.pc(),
            expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes;

    fn instructions() -> Vec<Instruction> {
        vec![
            Instruction {
                offset: 0,
                opcode: opcodes::ILOAD_1,
                operand: Operand::Local(1),
            },
            Instruction {
                offset: 1,
                opcode: opcodes::IFEQ,
                operand: Operand::Branch(4),
            },
            Instruction {
                offset: 4,
                opcode: opcodes::RETURN,
                operand: Operand::None,
            },
        ]
    }

    #[test]
    fn advance_walks_to_end_of_stream() {
        let instructions = instructions();
        let mut stream = InstructionStream::new(&instructions);

        assert_eq!(0, stream.pc());
        assert_eq!(1, stream.advance().expect("second").offset);
        assert_eq!(4, stream.advance().expect("third").offset);
        assert!(matches!(stream.advance(), Err(EngineError::EndOfStream)));
        // A failed advance leaves the cursor in place.
        assert_eq!(4, stream.pc());
    }

    #[test]
    fn branch_target_is_absolute() {
        let instructions = instructions();
        let stream = InstructionStream::new(&instructions);

        let target = stream
            .branch_target(&instructions[1])
            .expect("branch target");
        assert_eq!(5, target);
    }

    #[test]
    fn operand_accessors_check_the_union_variant() {
        let instructions = instructions();
        let stream = InstructionStream::new(&instructions);

        assert_eq!(Ok(1), stream.local_slot());
        assert_eq!(
            Err(EngineError::WrongOperandKind {
                pc: 0,
                expected: "an integer",
            }),
            stream.operand_int()
        );
    }

    #[test]
    fn independent_streams_do_not_share_cursors() {
        let instructions = instructions();
        let mut first = InstructionStream::new(&instructions);
        let second = InstructionStream::new(&instructions);

        first.advance().expect("advance first");
        assert_eq!(1, first.pc());
        assert_eq!(0, second.pc());
    }
}
