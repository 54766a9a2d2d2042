use thiserror::Error;

/// Invariant violations raised by the instruction stream and symbolic stack.
///
/// These indicate that an assumption about an instruction's operands or stack
/// effect was wrong. They are programming errors of a rule (or the engine),
/// never of the analyzed bytecode; the driver recovers by abandoning the
/// current method scan only.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub(crate) enum EngineError {
    #[error("end of instruction stream")]
    EndOfStream,
    #[error("operand at pc {pc} is not {expected}")]
    WrongOperandKind { pc: u32, expected: &'static str },
    #[error("stack underflow at pc {pc} (depth {depth}, wanted {wanted})")]
    StackUnderflow {
        pc: u32,
        depth: usize,
        wanted: usize,
    },
}
