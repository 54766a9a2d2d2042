//! Intermediate representation for parsed JVM classes and methods.
//!
//! The decoder in `scan.rs` resolves constant-pool references eagerly, so an
//! [`Instruction`] carries fully resolved operands and the analysis layers
//! never touch the constant pool again.

/// A parsed class with its methods and the metadata rules filter on.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) access: ClassAccess,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
    pub(crate) artifact_index: i64,
}

/// Class access flags used for rule filtering.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ClassAccess {
    pub(crate) is_abstract: bool,
    pub(crate) is_interface: bool,
}

/// A declared field.
#[derive(Clone, Debug)]
pub(crate) struct Field {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: FieldAccess,
}

/// Field access flags used for rule filtering.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FieldAccess {
    pub(crate) is_static: bool,
    pub(crate) is_private: bool,
}

/// A method, its decoded bytecode, and the Code attribute metadata.
///
/// `instructions` is empty for abstract and native methods.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: MethodAccess,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) line_numbers: Vec<LineNumber>,
    pub(crate) local_variables: Vec<LocalVariable>,
    pub(crate) exception_handlers: Vec<ExceptionHandler>,
}

impl Method {
    /// Source line for a bytecode offset, from the LineNumberTable if present.
    pub(crate) fn line_for_pc(&self, pc: u32) -> Option<u32> {
        let mut line = None;
        for entry in &self.line_numbers {
            if entry.start_pc > pc {
                break;
            }
            line = Some(entry.line);
        }
        line
    }
}

/// Method access flags used for rule filtering.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct MethodAccess {
    pub(crate) is_public: bool,
    pub(crate) is_static: bool,
    pub(crate) is_abstract: bool,
    pub(crate) is_synthetic: bool,
}

/// LineNumberTable entry from the Code attribute.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LineNumber {
    pub(crate) start_pc: u32,
    pub(crate) line: u32,
}

/// LocalVariableTable entry from the Code attribute.
#[derive(Clone, Debug)]
pub(crate) struct LocalVariable {
    pub(crate) slot: u16,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) start_pc: u32,
    pub(crate) length: u32,
}

/// Exception handler metadata from the Code attribute.
#[derive(Clone, Debug)]
pub(crate) struct ExceptionHandler {
    pub(crate) start_pc: u32,
    pub(crate) end_pc: u32,
    pub(crate) handler_pc: u32,
    pub(crate) catch_type: Option<String>,
}

/// One decoded bytecode instruction.
#[derive(Clone, Debug)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    pub(crate) operand: Operand,
}

/// Resolved operand union for one instruction.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Operand {
    None,
    /// bipush/sipush immediate or newarray element type code.
    Int(i32),
    /// ldc/ldc_w/ldc2_w constant.
    Const(ConstValue),
    /// Local slot for load/store/ret, including wide and the _n short forms.
    Local(u16),
    Iinc {
        slot: u16,
        delta: i32,
    },
    /// Branch offset relative to this instruction.
    Branch(i32),
    /// Relative switch targets, default first.
    Switch(Vec<i32>),
    Invoke(CallSite),
    Field(FieldRef),
    /// Class operand of new/anewarray/checkcast/instanceof.
    Type(String),
    MultiArray {
        class_name: String,
        dims: u8,
    },
}

/// Statically known constant value.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ConstValue {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Class(String),
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CallSite {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: CallKind,
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

/// Field reference from getfield/putfield/getstatic/putstatic.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FieldRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}
