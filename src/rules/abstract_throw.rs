use crate::engine::{InstructionContext, MethodContext, Severity};
use crate::errors::EngineError;
use crate::ir::ConstValue;
use crate::opcodes;
use crate::rules::{Detector, RuleMetadata, Verdict};

const RULE_ID: &str = "ABSTRACT_CLASS_EMPTY_METHOD";

/// Flags abstract-class methods that are stubs: a body that is a lone
/// `return`, or that only constructs an exception and throws it
/// (`new X; dup; ldc "msg"; invokespecial X.<init>(String); athrow`).
/// Such methods should be declared abstract instead.
pub(crate) struct AbstractThrowRule {
    state: State,
    exception: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Nothing,
    SawNew,
    SawDup,
    SawLdc,
    SawInvokeSpecial,
    Done,
}

impl AbstractThrowRule {
    pub(crate) fn new() -> Self {
        AbstractThrowRule {
            state: State::Nothing,
            exception: None,
        }
    }
}

impl Detector for AbstractThrowRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: RULE_ID,
            name: "Abstract class method is an unimplemented stub",
            description:
                "A method of an abstract class only returns or only throws an exception; \
                 declaring it abstract forces subclasses to implement it",
        }
    }

    fn on_method_start(&mut self, context: &MethodContext) -> bool {
        self.state = State::Nothing;
        self.exception = None;

        let class = context.class;
        let method = context.method;
        if !class.access.is_abstract || class.access.is_interface {
            return false;
        }
        if method.name == "<init>" || method.name == "<clinit>" {
            return false;
        }
        if method.access.is_synthetic || method.access.is_abstract {
            return false;
        }
        // Overrides of interface methods must exist, stub or not.
        !context
            .hierarchy
            .interface_declares(&class.name, &method.name, &method.descriptor)
    }

    fn on_instruction(
        &mut self,
        context: &mut InstructionContext,
    ) -> Result<Verdict, EngineError> {
        let insn = context.insn;
        let next = match (self.state, insn.opcode) {
            (State::Nothing, opcodes::RETURN)
                if insn.offset == 0 && context.method.instructions.len() == 1 =>
            {
                self.state = State::Done;
                return Ok(Verdict::Report(context.finding(
                    RULE_ID,
                    Severity::Normal,
                    format!(
                        "Method {}.{}{} of an abstract class has an empty body; \
                         consider declaring it abstract",
                        context.class.name, context.method.name, context.method.descriptor
                    ),
                )));
            }
            (State::Nothing, opcodes::NEW) if insn.offset == 0 => {
                self.exception = Some(context.stream.class_operand()?.to_string());
                State::SawNew
            }
            (State::SawNew, opcodes::DUP) => State::SawDup,
            (State::SawDup, opcodes::LDC | opcodes::LDC_W) => {
                if !matches!(context.stream.constant_operand()?, ConstValue::Str(_)) {
                    return Ok(Verdict::SkipMethod);
                }
                State::SawLdc
            }
            (State::SawLdc, opcodes::INVOKESPECIAL) => {
                let call = context.stream.invoked_method()?;
                let matches_constructor = match &self.exception {
                    Some(exception) => {
                        call.owner == *exception
                            && call.name == "<init>"
                            && call.descriptor == "(Ljava/lang/String;)V"
                    }
                    None => false,
                };
                if !matches_constructor {
                    return Ok(Verdict::SkipMethod);
                }
                State::SawInvokeSpecial
            }
            (State::SawInvokeSpecial, opcodes::ATHROW) => {
                let Some(exception) = self.exception.take() else {
                    return Ok(Verdict::SkipMethod);
                };
                if !context.hierarchy.is_subtype(&exception, "java/lang/Exception") {
                    return Ok(Verdict::SkipMethod);
                }
                self.state = State::Done;
                let simple_name = exception.rsplit('/').next().unwrap_or(&exception);
                return Ok(Verdict::Report(context.finding(
                    RULE_ID,
                    Severity::Normal,
                    format!(
                        "Method {}.{}{} of an abstract class only throws {simple_name}; \
                         consider declaring it abstract",
                        context.class.name, context.method.name, context.method.descriptor
                    ),
                )));
            }
            // The body must be exactly the pattern; anything else disproves it.
            _ => return Ok(Verdict::SkipMethod),
        };
        self.state = next;
        Ok(Verdict::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{context_for, Engine};
    use crate::ir::{CallKind, CallSite, Class, FieldRef, Instruction, Method, MethodAccess, Operand};
    use crate::rules::testutil::{class, instruction, method};

    const EXCEPTION: &str = "java/lang/UnsupportedOperationException";

    fn throw_body() -> Vec<Instruction> {
        vec![
            instruction(0, opcodes::NEW, Operand::Type(EXCEPTION.to_string())),
            instruction(3, opcodes::DUP, Operand::None),
            instruction(
                4,
                opcodes::LDC,
                Operand::Const(ConstValue::Str("not implemented".to_string())),
            ),
            instruction(
                6,
                opcodes::INVOKESPECIAL,
                Operand::Invoke(CallSite {
                    owner: EXCEPTION.to_string(),
                    name: "<init>".to_string(),
                    descriptor: "(Ljava/lang/String;)V".to_string(),
                    kind: CallKind::Special,
                }),
            ),
            instruction(9, opcodes::ATHROW, Operand::None),
        ]
    }

    fn abstract_class(methods: Vec<Method>) -> Class {
        let mut class = class("com/example/AbstractBase", methods);
        class.access.is_abstract = true;
        class
    }

    fn rule_messages(classes: Vec<Class>) -> Vec<String> {
        let context = context_for(classes);
        Engine::new()
            .analyze(&context)
            .into_iter()
            .filter(|result| result.rule_id.as_deref() == Some(RULE_ID))
            .map(|result| result.message.text.unwrap_or_default())
            .collect()
    }

    #[test]
    fn construct_and_throw_body_is_reported_once() {
        let classes = vec![abstract_class(vec![method("save", "()V", throw_body())])];

        let messages = rule_messages(classes);

        assert_eq!(1, messages.len());
        assert!(messages[0].contains("only throws UnsupportedOperationException"));
    }

    #[test]
    fn lone_return_is_reported_as_empty() {
        let body = vec![instruction(0, opcodes::RETURN, Operand::None)];
        let classes = vec![abstract_class(vec![method("save", "()V", body)])];

        let messages = rule_messages(classes);

        assert_eq!(1, messages.len());
        assert!(messages[0].contains("empty body"));
    }

    #[test]
    fn removing_any_pattern_instruction_disarms_the_rule() {
        for skipped in 0..5 {
            let body: Vec<Instruction> = throw_body()
                .into_iter()
                .enumerate()
                .filter(|(index, _)| *index != skipped)
                .map(|(_, insn)| insn)
                .collect();
            let classes = vec![abstract_class(vec![method("save", "()V", body)])];

            assert!(rule_messages(classes).is_empty(), "variant {skipped}");
        }
    }

    #[test]
    fn concrete_classes_never_fire() {
        let classes = vec![class(
            "com/example/Concrete",
            vec![method("save", "()V", throw_body())],
        )];

        assert!(rule_messages(classes).is_empty());
    }

    #[test]
    fn field_access_body_is_not_a_stub() {
        let body = vec![
            instruction(0, opcodes::ALOAD_0, Operand::Local(0)),
            instruction(
                1,
                opcodes::GETFIELD,
                Operand::Field(FieldRef {
                    owner: "com/example/AbstractBase".to_string(),
                    name: "state".to_string(),
                    descriptor: "I".to_string(),
                }),
            ),
            instruction(4, opcodes::POP, Operand::None),
            instruction(5, opcodes::RETURN, Operand::None),
        ];
        let classes = vec![abstract_class(vec![method("save", "()V", body)])];

        assert!(rule_messages(classes).is_empty());
    }

    #[test]
    fn constructors_and_synthetic_methods_are_skipped() {
        let body = vec![instruction(0, opcodes::RETURN, Operand::None)];
        let mut synthetic = method("access$000", "()V", body.clone());
        synthetic.access.is_synthetic = true;
        let classes = vec![abstract_class(vec![
            method("<init>", "()V", body),
            synthetic,
        ])];

        assert!(rule_messages(classes).is_empty());
    }

    #[test]
    fn interface_declared_overrides_are_skipped() {
        let mut task = class("com/example/Task", Vec::new());
        task.access.is_interface = true;
        task.methods.push(Method {
            name: "save".to_string(),
            descriptor: "()V".to_string(),
            access: MethodAccess {
                is_public: true,
                is_abstract: true,
                ..MethodAccess::default()
            },
            instructions: Vec::new(),
            line_numbers: Vec::new(),
            local_variables: Vec::new(),
            exception_handlers: Vec::new(),
        });
        let mut base = abstract_class(vec![method("save", "()V", throw_body())]);
        base.interfaces.push("com/example/Task".to_string());

        assert!(rule_messages(vec![task, base]).is_empty());
    }
}
