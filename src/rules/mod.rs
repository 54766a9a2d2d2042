use serde_sarif::sarif::{
    Location, LogicalLocation, Message, MultiformatMessageString, ReportingDescriptor,
};

use crate::engine::{Finding, InstructionContext, MethodContext};
use crate::errors::EngineError;
use crate::ir::Class;

pub(crate) mod abstract_throw;
pub(crate) mod duplicate_compare;
pub(crate) mod local_sync_collection;
pub(crate) mod two_valued_field;

/// Metadata describing an analysis rule.
#[derive(Clone, Debug)]
pub(crate) struct RuleMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

impl RuleMetadata {
    /// SARIF reporting descriptor for `tool.driver.rules`.
    pub(crate) fn descriptor(&self) -> ReportingDescriptor {
        ReportingDescriptor::builder()
            .id(self.id)
            .name(self.name)
            .short_description(
                MultiformatMessageString::builder()
                    .text(self.description)
                    .build(),
            )
            .build()
    }
}

/// Detector decision after observing one instruction.
pub(crate) enum Verdict {
    Continue,
    /// Decline the rest of the current method; other detectors are unaffected.
    SkipMethod,
    Report(Finding),
}

/// A bytecode anti-pattern detector.
///
/// Detectors are instantiated fresh per class. `on_instruction` sees the
/// operand stack *before* the instruction's effect, `after_instruction` sees
/// it after, so freshly pushed values can be tagged there. Returning an
/// [`EngineError`] deactivates the detector for the rest of the current
/// method only.
pub(crate) trait Detector {
    fn metadata(&self) -> RuleMetadata;

    fn on_class_start(&mut self, _class: &Class) {}

    /// Precondition gate; `false` declines the whole method.
    fn on_method_start(&mut self, _context: &MethodContext) -> bool {
        true
    }

    fn on_instruction(
        &mut self,
        context: &mut InstructionContext,
    ) -> Result<Verdict, EngineError>;

    fn after_instruction(&mut self, _context: &mut InstructionContext) {}

    /// Flush findings buffered across the whole method.
    fn on_method_end(&mut self, _context: &MethodContext) -> Vec<Finding> {
        Vec::new()
    }

    /// Flush findings aggregated across all of the class's methods.
    fn on_class_end(&mut self, _class: &Class) -> Vec<Finding> {
        Vec::new()
    }
}

/// The rule registry, in deterministic execution order.
pub(crate) fn all_detectors() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(abstract_throw::AbstractThrowRule::new()),
        Box::new(duplicate_compare::DuplicateCompareRule::new()),
        Box::new(local_sync_collection::LocalSyncCollectionRule::new()),
        Box::new(two_valued_field::TwoValuedFieldRule::new()),
    ]
}

pub(crate) fn method_location(class_name: &str, method_name: &str, descriptor: &str) -> Location {
    let logical = method_logical_location(class_name, method_name, descriptor);
    Location::builder().logical_locations(vec![logical]).build()
}

pub(crate) fn method_logical_location(
    class_name: &str,
    method_name: &str,
    descriptor: &str,
) -> LogicalLocation {
    LogicalLocation::builder()
        .name(format!("{class_name}.{method_name}{descriptor}"))
        .kind("function")
        .build()
}

pub(crate) fn class_location(class_name: &str) -> Location {
    let logical = LogicalLocation::builder()
        .name(class_name)
        .kind("type")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::ir::{
        Class, ClassAccess, Field, FieldAccess, Instruction, Method, MethodAccess, Operand,
    };

    pub(crate) fn instruction(offset: u32, opcode: u8, operand: Operand) -> Instruction {
        Instruction {
            offset,
            opcode,
            operand,
        }
    }

    pub(crate) fn method(name: &str, descriptor: &str, instructions: Vec<Instruction>) -> Method {
        Method {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access: MethodAccess {
                is_public: true,
                ..MethodAccess::default()
            },
            instructions,
            line_numbers: Vec::new(),
            local_variables: Vec::new(),
            exception_handlers: Vec::new(),
        }
    }

    pub(crate) fn class(name: &str, methods: Vec<Method>) -> Class {
        Class {
            name: name.to_string(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            access: ClassAccess::default(),
            fields: Vec::new(),
            methods,
            artifact_index: 0,
        }
    }

    pub(crate) fn private_field(name: &str, descriptor: &str) -> Field {
        Field {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access: FieldAccess {
                is_private: true,
                ..FieldAccess::default()
            },
        }
    }
}
