use crate::engine::{InstructionContext, MethodContext, Severity};
use crate::errors::EngineError;
use crate::ir::CallSite;
use crate::opcodes;
use crate::rules::{Detector, RuleMetadata, Verdict};

const RULE_ID: &str = "REPEATED_DATE_COMPARISON";

/// Flags a `java/util/Date` comparison that is repeated, on the same pair of
/// local variables, right after a conditional branch already tested its
/// result. The operands are correlated through the symbolic stack's source
/// registers, so only genuine re-reads of the same two locals fire.
pub(crate) struct DuplicateCompareRule {
    state: State,
}

#[derive(Clone, Debug, PartialEq)]
enum State {
    Watching,
    /// A comparison was seen, no branch on its result yet.
    Primed(Comparison),
    /// The comparison result was branched on; a repeat now is redundant.
    Armed(Comparison),
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Comparison {
    name: String,
    receiver_slot: u16,
    argument_slot: u16,
}

impl DuplicateCompareRule {
    pub(crate) fn new() -> Self {
        DuplicateCompareRule {
            state: State::Watching,
        }
    }
}

impl Detector for DuplicateCompareRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: RULE_ID,
            name: "Repeated comparison of the same Date values",
            description:
                "The same java/util/Date comparison on the same two local variables is \
                 evaluated again after its result was already tested",
        }
    }

    fn on_method_start(&mut self, _context: &MethodContext) -> bool {
        self.state = State::Watching;
        true
    }

    fn on_instruction(
        &mut self,
        context: &mut InstructionContext,
    ) -> Result<Verdict, EngineError> {
        let insn = context.insn;
        if insn.opcode == opcodes::INVOKEVIRTUAL {
            let call = context.stream.invoked_method()?;
            if is_date_comparison(context, call) {
                let argument_slot = context.stack.peek(0)?.source_register;
                let receiver_slot = context.stack.peek(1)?.source_register;
                let (Some(argument_slot), Some(receiver_slot)) =
                    (argument_slot, receiver_slot)
                else {
                    // Operands not read straight from locals; cannot correlate.
                    self.state = State::Watching;
                    return Ok(Verdict::Continue);
                };
                let comparison = Comparison {
                    name: call.name.clone(),
                    receiver_slot,
                    argument_slot,
                };
                if matches!(&self.state, State::Armed(previous) if *previous == comparison) {
                    self.state = State::Watching;
                    return Ok(Verdict::Report(context.finding(
                        RULE_ID,
                        Severity::Normal,
                        format!(
                            "{}() on the Date values in locals {} and {} is evaluated \
                             again although its result was already tested",
                            comparison.name,
                            comparison.receiver_slot,
                            comparison.argument_slot
                        ),
                    )));
                }
                self.state = State::Primed(comparison);
                return Ok(Verdict::Continue);
            }
        }

        self.state = match std::mem::replace(&mut self.state, State::Watching) {
            State::Primed(comparison) if opcodes::is_conditional_branch(insn.opcode) => {
                State::Armed(comparison)
            }
            State::Primed(comparison) if is_load(insn.opcode) => State::Primed(comparison),
            State::Armed(comparison) if is_load(insn.opcode) => State::Armed(comparison),
            _ => State::Watching,
        };
        Ok(Verdict::Continue)
    }
}

fn is_date_comparison(context: &InstructionContext, call: &CallSite) -> bool {
    let comparison = matches!(
        (call.name.as_str(), call.descriptor.as_str()),
        ("compareTo", "(Ljava/util/Date;)I")
            | ("before", "(Ljava/util/Date;)Z")
            | ("after", "(Ljava/util/Date;)Z")
            | ("equals", "(Ljava/lang/Object;)Z")
    );
    comparison && context.hierarchy.is_subtype(&call.owner, "java/util/Date")
}

fn is_load(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ILOAD_0..=opcodes::ALOAD_3
    )
}
