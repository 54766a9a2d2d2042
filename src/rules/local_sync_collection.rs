use std::collections::BTreeMap;

use crate::descriptor;
use crate::engine::{Finding, InstructionContext, MethodContext, Severity};
use crate::errors::EngineError;
use crate::ir::Operand;
use crate::opcodes;
use crate::rules::{Detector, RuleMetadata, Verdict};
use crate::stack::{SymbolicValue, ValueTag};

const RULE_ID: &str = "LOCAL_SYNCHRONIZED_COLLECTION";

/// Flags `Collections.synchronized*` wrappers that stay local to one method.
/// The factory result is tagged when pushed, survives store/load round trips,
/// and a candidate is dropped as soon as the value escapes through a field
/// write, a return, or a call argument. Whatever is left at method end never
/// needed synchronization.
pub(crate) struct LocalSyncCollectionRule {
    /// Local slot -> pc of the first tagged store.
    candidates: BTreeMap<u16, u32>,
}

impl LocalSyncCollectionRule {
    pub(crate) fn new() -> Self {
        LocalSyncCollectionRule {
            candidates: BTreeMap::new(),
        }
    }

    fn forget_if_tagged(&mut self, value: &SymbolicValue) {
        if value.tag == Some(ValueTag::SynchronizedCollection) {
            if let Some(slot) = value.source_register {
                self.candidates.remove(&slot);
            }
        }
    }
}

impl Detector for LocalSyncCollectionRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: RULE_ID,
            name: "Synchronized collection never leaves the method",
            description:
                "A java/util/Collections.synchronized* wrapper is only used by local \
                 variables of a single method; the synchronization is pure overhead",
        }
    }

    fn on_method_start(&mut self, _context: &MethodContext) -> bool {
        self.candidates.clear();
        true
    }

    fn on_instruction(
        &mut self,
        context: &mut InstructionContext,
    ) -> Result<Verdict, EngineError> {
        let insn = context.insn;
        match insn.opcode {
            opcodes::ASTORE | opcodes::ASTORE_0..=opcodes::ASTORE_3 => {
                let slot = context.stream.local_slot()?;
                if context.stack.tag_at(0)? == Some(ValueTag::SynchronizedCollection) {
                    self.candidates.entry(slot).or_insert(insn.offset);
                } else {
                    self.candidates.remove(&slot);
                }
            }
            opcodes::PUTFIELD | opcodes::PUTSTATIC => {
                let value = context.stack.peek(0)?.clone();
                self.forget_if_tagged(&value);
            }
            opcodes::ARETURN => {
                let value = context.stack.peek(0)?.clone();
                self.forget_if_tagged(&value);
            }
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
                let call = context.stream.invoked_method()?;
                let Ok(summary) = descriptor::method_summary(&call.descriptor) else {
                    return Ok(Verdict::Continue);
                };
                // Arguments escape; the receiver does not.
                for depth in 0..summary.params.len() {
                    let value = context.stack.peek(depth)?.clone();
                    self.forget_if_tagged(&value);
                }
            }
            _ => {}
        }
        Ok(Verdict::Continue)
    }

    fn after_instruction(&mut self, context: &mut InstructionContext) {
        let insn = context.insn;
        if insn.opcode != opcodes::INVOKESTATIC {
            return;
        }
        let Operand::Invoke(call) = &insn.operand else {
            return;
        };
        if call.owner == "java/util/Collections" && call.name.starts_with("synchronized") {
            // The factory result is on top of the post-effect stack.
            let _ = context.stack.set_tag(0, ValueTag::SynchronizedCollection);
        }
    }

    fn on_method_end(&mut self, context: &MethodContext) -> Vec<Finding> {
        let candidates = std::mem::take(&mut self.candidates);
        candidates
            .into_iter()
            .map(|(slot, pc)| {
                let variable = context
                    .method
                    .local_variables
                    .iter()
                    .find(|var| var.slot == slot)
                    .map(|var| var.name.clone())
                    .unwrap_or_else(|| format!("slot {slot}"));
                context.finding(
                    RULE_ID,
                    Severity::Low,
                    pc,
                    format!(
                        "Local variable {variable} in {}.{}{} holds a synchronized \
                         collection wrapper that never leaves the method",
                        context.class.name, context.method.name, context.method.descriptor
                    ),
                )
            })
            .collect()
    }
}
