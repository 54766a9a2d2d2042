use std::collections::BTreeMap;

use crate::engine::{Finding, InstructionContext, MethodContext, Severity};
use crate::errors::EngineError;
use crate::ir::{Class, ConstValue};
use crate::opcodes;
use crate::rules::{Detector, RuleMetadata, Verdict};

const RULE_ID: &str = "TWO_VALUED_FIELD";

/// Flags private fields whose every write, across all methods of the class,
/// is one of exactly two distinct constants. Such a field is a boolean in
/// disguise. A non-constant write or a third distinct value permanently
/// disqualifies the field.
pub(crate) struct TwoValuedFieldRule {
    class_name: String,
    candidates: BTreeMap<String, Vec<ConstValue>>,
}

impl TwoValuedFieldRule {
    pub(crate) fn new() -> Self {
        TwoValuedFieldRule {
            class_name: String::new(),
            candidates: BTreeMap::new(),
        }
    }
}

impl Detector for TwoValuedFieldRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: RULE_ID,
            name: "Field only ever holds one of two constants",
            description:
                "Every write to a private field assigns one of exactly two distinct \
                 constant values; a boolean (or an enum) would state the intent",
        }
    }

    fn on_class_start(&mut self, class: &Class) {
        self.class_name = class.name.clone();
        self.candidates = class
            .fields
            .iter()
            .filter(|field| field.access.is_private)
            .map(|field| (field.name.clone(), Vec::new()))
            .collect();
    }

    fn on_method_start(&mut self, _context: &MethodContext) -> bool {
        !self.candidates.is_empty()
    }

    fn on_instruction(
        &mut self,
        context: &mut InstructionContext,
    ) -> Result<Verdict, EngineError> {
        let insn = context.insn;
        if insn.opcode != opcodes::PUTFIELD && insn.opcode != opcodes::PUTSTATIC {
            return Ok(Verdict::Continue);
        }
        let field = context.stream.field_operand()?;
        if field.owner != self.class_name {
            return Ok(Verdict::Continue);
        }
        // The written value sits on top of the pre-effect stack for both
        // putfield and putstatic.
        let written = context.stack.peek(0)?.constant.clone();
        let Some(values) = self.candidates.get_mut(&field.name) else {
            return Ok(Verdict::Continue);
        };
        let disqualified = match written {
            Some(value) => {
                if !values.contains(&value) {
                    values.push(value);
                }
                values.len() > 2
            }
            None => true,
        };
        if disqualified {
            self.candidates.remove(&field.name);
            if self.candidates.is_empty() {
                return Ok(Verdict::SkipMethod);
            }
        }
        Ok(Verdict::Continue)
    }

    fn on_class_end(&mut self, class: &Class) -> Vec<Finding> {
        let candidates = std::mem::take(&mut self.candidates);
        let mut findings: Vec<Finding> = candidates
            .into_iter()
            .filter(|(_, values)| values.len() == 2)
            .map(|(name, values)| Finding {
                rule_id: RULE_ID,
                severity: Severity::Low,
                class_name: class.name.clone(),
                method_name: None,
                descriptor: None,
                pc: None,
                line: None,
                message: format!(
                    "Private field {}.{name} is only ever assigned the values {} and {}",
                    class.name,
                    render(&values[0]),
                    render(&values[1])
                ),
            })
            .collect();
        findings.sort_by(|a, b| a.message.cmp(&b.message));
        findings
    }
}

fn render(value: &ConstValue) -> String {
    match value {
        ConstValue::Null => "null".to_string(),
        ConstValue::Int(value) => value.to_string(),
        ConstValue::Long(value) => format!("{value}L"),
        ConstValue::Float(value) => format!("{value}f"),
        ConstValue::Double(value) => value.to_string(),
        ConstValue::Str(value) => format!("\"{value}\""),
        ConstValue::Class(value) => format!("{value}.class"),
    }
}
