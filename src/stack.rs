//! Symbolic operand stack and local variable simulation.
//!
//! The simulator walks a method's instructions in linear program-counter order
//! and mirrors each opcode's stack effect. Every slot carries best-effort
//! provenance: an inferred type, a statically known constant, the local slot
//! the value was copied from, and a rule-attached tag. Provenance (not depth)
//! is conservatively invalidated at every control-flow merge point, because
//! the linear scan does not reason about joins.

use std::collections::{BTreeMap, BTreeSet};

use crate::descriptor::{self, JavaType};
use crate::errors::EngineError;
use crate::ir::{ConstValue, Instruction, Method, Operand};
use crate::opcodes;
use crate::stream::InstructionStream;

/// Rule-attached annotation riding along with a symbolic value.
///
/// Tags survive stack shuffling and store/load round trips; they are cleared
/// at control-flow merge points together with all other provenance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ValueTag {
    /// Value returned by a `java/util/Collections.synchronized*` factory.
    SynchronizedCollection,
}

/// Contents of one stack slot or local variable slot.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct SymbolicValue {
    pub(crate) inferred_type: Option<JavaType>,
    pub(crate) constant: Option<ConstValue>,
    pub(crate) source_register: Option<u16>,
    pub(crate) tag: Option<ValueTag>,
}

impl SymbolicValue {
    pub(crate) fn unknown() -> Self {
        SymbolicValue::default()
    }

    fn typed(ty: JavaType) -> Self {
        SymbolicValue {
            inferred_type: Some(ty),
            ..SymbolicValue::default()
        }
    }

    fn constant(ty: JavaType, value: ConstValue) -> Self {
        SymbolicValue {
            inferred_type: Some(ty),
            constant: Some(value),
            ..SymbolicValue::default()
        }
    }

    pub(crate) fn int_constant(&self) -> Option<i32> {
        match self.constant {
            Some(ConstValue::Int(value)) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn string_constant(&self) -> Option<&str> {
        match &self.constant {
            Some(ConstValue::Str(value)) => Some(value),
            _ => None,
        }
    }

    fn is_category2(&self) -> bool {
        self.inferred_type
            .as_ref()
            .is_some_and(JavaType::is_category2)
    }

    fn clear_provenance(&mut self) {
        self.constant = None;
        self.source_register = None;
        self.tag = None;
    }
}

/// The simulated operand stack plus local variable table for one method scan.
///
/// Top of stack is depth 0. Category-2 values (long, double) are modeled as a
/// single entry; `pop2`/`dup2` and friends are category-aware.
pub(crate) struct SymbolicStack {
    stack: Vec<SymbolicValue>,
    locals: BTreeMap<u16, SymbolicValue>,
    reset_points: BTreeSet<u32>,
    pc: u32,
}

impl SymbolicStack {
    pub(crate) fn new() -> Self {
        SymbolicStack {
            stack: Vec::new(),
            locals: BTreeMap::new(),
            reset_points: BTreeSet::new(),
            pc: 0,
        }
    }

    /// Clear all state and seed locals from `this` and the parameter list.
    ///
    /// Must be called before scanning a method; it also precomputes the merge
    /// points (branch targets and exception handler entries) at which
    /// provenance is invalidated.
    pub(crate) fn reset_for_method_entry(&mut self, class_name: &str, method: &Method) {
        self.stack.clear();
        self.locals.clear();
        self.pc = 0;
        self.reset_points = merge_points(method);

        let mut slot = 0u16;
        if !method.access.is_static {
            let mut this = SymbolicValue::typed(JavaType::object(class_name));
            this.source_register = Some(0);
            self.locals.insert(0, this);
            slot = 1;
        }
        if let Ok(summary) = descriptor::method_summary(&method.descriptor) {
            for ty in summary.params {
                let wide = ty.is_category2();
                let mut value = SymbolicValue::typed(ty);
                value.source_register = Some(slot);
                self.locals.insert(slot, value);
                slot += if wide { 2 } else { 1 };
            }
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Value at the given distance from the top of the stack.
    pub(crate) fn peek(&self, depth: usize) -> Result<&SymbolicValue, EngineError> {
        let len = self.stack.len();
        if depth >= len {
            return Err(self.underflow(depth + 1));
        }
        Ok(&self.stack[len - 1 - depth])
    }

    pub(crate) fn set_tag(&mut self, depth: usize, tag: ValueTag) -> Result<(), EngineError> {
        let len = self.stack.len();
        if depth >= len {
            return Err(self.underflow(depth + 1));
        }
        self.stack[len - 1 - depth].tag = Some(tag);
        Ok(())
    }

    pub(crate) fn tag_at(&self, depth: usize) -> Result<Option<ValueTag>, EngineError> {
        Ok(self.peek(depth)?.tag)
    }

    /// Value last stored to a local slot, or an unknown value if never written.
    pub(crate) fn local(&self, slot: u16) -> SymbolicValue {
        self.locals.get(&slot).cloned().unwrap_or_default()
    }

    /// Apply one instruction's stack effect.
    pub(crate) fn execute(&mut self, insn: &Instruction) -> Result<(), EngineError> {
        self.pc = insn.offset;
        if self.reset_points.contains(&insn.offset) {
            self.invalidate_provenance();
        }

        match insn.opcode {
            opcodes::NOP => {}
            opcodes::ACONST_NULL => self.push(SymbolicValue {
                constant: Some(ConstValue::Null),
                ..SymbolicValue::default()
            }),
            opcodes::ICONST_M1..=opcodes::ICONST_5 => {
                let value = insn.opcode as i32 - opcodes::ICONST_0 as i32;
                self.push(SymbolicValue::constant(JavaType::Int, ConstValue::Int(value)));
            }
            opcodes::LCONST_0 | opcodes::LCONST_1 => {
                let value = (insn.opcode - opcodes::LCONST_0) as i64;
                self.push(SymbolicValue::constant(
                    JavaType::Long,
                    ConstValue::Long(value),
                ));
            }
            opcodes::FCONST_0..=opcodes::FCONST_2 => {
                let value = (insn.opcode - opcodes::FCONST_0) as f32;
                self.push(SymbolicValue::constant(
                    JavaType::Float,
                    ConstValue::Float(value),
                ));
            }
            opcodes::DCONST_0 | opcodes::DCONST_1 => {
                let value = (insn.opcode - opcodes::DCONST_0) as f64;
                self.push(SymbolicValue::constant(
                    JavaType::Double,
                    ConstValue::Double(value),
                ));
            }
            opcodes::BIPUSH | opcodes::SIPUSH => {
                let value = match insn.operand {
                    Operand::Int(value) => value,
                    _ => 0,
                };
                self.push(SymbolicValue::constant(JavaType::Int, ConstValue::Int(value)));
            }
            opcodes::LDC | opcodes::LDC_W | opcodes::LDC2_W => {
                let value = match &insn.operand {
                    Operand::Const(value) => SymbolicValue::constant(
                        constant_type(value),
                        value.clone(),
                    ),
                    _ => SymbolicValue::unknown(),
                };
                self.push(value);
            }
            opcodes::ILOAD..=opcodes::ALOAD | opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                let slot = operand_slot(insn);
                let mut value = self.local(slot);
                if value.inferred_type.is_none() {
                    value.inferred_type = load_family_type(insn.opcode);
                }
                value.source_register = Some(slot);
                self.push(value);
            }
            opcodes::IALOAD..=opcodes::SALOAD => {
                self.pop()?;
                let array = self.pop()?;
                let element = match insn.opcode {
                    opcodes::AALOAD => array_element_type(&array),
                    _ => array_load_type(insn.opcode),
                };
                self.push(SymbolicValue {
                    inferred_type: element,
                    ..SymbolicValue::default()
                });
            }
            opcodes::ISTORE..=opcodes::ASTORE | opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                let slot = operand_slot(insn);
                let mut value = self.pop()?;
                let wide = value.is_category2();
                value.source_register = Some(slot);
                self.locals.insert(slot, value);
                if wide {
                    self.locals.insert(slot + 1, SymbolicValue::unknown());
                }
            }
            opcodes::IASTORE..=opcodes::SASTORE => {
                self.pop_n(3)?;
            }
            opcodes::POP => {
                self.pop()?;
            }
            opcodes::POP2 => {
                let top = self.pop()?;
                if !top.is_category2() {
                    self.pop()?;
                }
            }
            opcodes::DUP => {
                let top = self.peek(0)?.clone();
                self.push(top);
            }
            opcodes::DUP_X1 => {
                let top = self.peek(0)?.clone();
                self.insert_below(2, vec![top])?;
            }
            opcodes::DUP_X2 => {
                let top = self.peek(0)?.clone();
                let below = if self.peek(1)?.is_category2() { 2 } else { 3 };
                self.insert_below(below, vec![top])?;
            }
            opcodes::DUP2 => {
                if self.peek(0)?.is_category2() {
                    let top = self.peek(0)?.clone();
                    self.push(top);
                } else {
                    let pair = vec![self.peek(1)?.clone(), self.peek(0)?.clone()];
                    self.stack.extend(pair);
                }
            }
            opcodes::DUP2_X1 => {
                if self.peek(0)?.is_category2() {
                    let top = self.peek(0)?.clone();
                    self.insert_below(2, vec![top])?;
                } else {
                    let pair = vec![self.peek(1)?.clone(), self.peek(0)?.clone()];
                    self.insert_below(3, pair)?;
                }
            }
            opcodes::DUP2_X2 => {
                if self.peek(0)?.is_category2() {
                    let top = self.peek(0)?.clone();
                    let below = if self.peek(1)?.is_category2() { 2 } else { 3 };
                    self.insert_below(below, vec![top])?;
                } else {
                    let pair = vec![self.peek(1)?.clone(), self.peek(0)?.clone()];
                    let below = if self.peek(2)?.is_category2() { 3 } else { 4 };
                    self.insert_below(below, pair)?;
                }
            }
            opcodes::SWAP => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(self.underflow(2));
                }
                self.stack.swap(len - 1, len - 2);
            }
            opcodes::IADD..=opcodes::LXOR if insn.opcode < opcodes::INEG => {
                self.binary_arithmetic(insn.opcode)?;
            }
            opcodes::INEG..=opcodes::DNEG => {
                let operand = self.pop()?;
                let ty = arithmetic_result_type(insn.opcode);
                let mut result = SymbolicValue::typed(ty);
                if insn.opcode == opcodes::INEG {
                    if let Some(value) = operand.int_constant() {
                        result.constant = Some(ConstValue::Int(value.wrapping_neg()));
                    }
                }
                self.push(result);
            }
            opcodes::ISHL..=opcodes::LXOR => {
                self.binary_arithmetic(insn.opcode)?;
            }
            opcodes::IINC => {
                if let Operand::Iinc { slot, delta } = insn.operand {
                    let mut value = self.local(slot);
                    value.inferred_type = Some(JavaType::Int);
                    value.constant = value
                        .int_constant()
                        .map(|current| ConstValue::Int(current.wrapping_add(delta)));
                    value.tag = None;
                    value.source_register = Some(slot);
                    self.locals.insert(slot, value);
                }
            }
            opcodes::I2L..=opcodes::I2S => {
                self.pop()?;
                self.push(SymbolicValue::typed(conversion_result_type(insn.opcode)));
            }
            opcodes::LCMP..=opcodes::DCMPG => {
                self.pop_n(2)?;
                self.push(SymbolicValue::typed(JavaType::Int));
            }
            opcodes::IFEQ..=opcodes::IFLE | opcodes::IFNULL | opcodes::IFNONNULL => {
                self.pop()?;
            }
            opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => {
                self.pop_n(2)?;
            }
            opcodes::GOTO | opcodes::GOTO_W | opcodes::RET => {}
            opcodes::JSR | opcodes::JSR_W => self.push(SymbolicValue::unknown()),
            opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => {
                self.pop()?;
            }
            opcodes::IRETURN..=opcodes::RETURN | opcodes::ATHROW => {
                self.stack.clear();
            }
            opcodes::GETSTATIC => {
                self.push(field_value(insn));
            }
            opcodes::PUTSTATIC => {
                self.pop()?;
            }
            opcodes::GETFIELD => {
                self.pop()?;
                self.push(field_value(insn));
            }
            opcodes::PUTFIELD => {
                self.pop_n(2)?;
            }
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
                let Operand::Invoke(call) = &insn.operand else {
                    return Err(EngineError::WrongOperandKind {
                        pc: insn.offset,
                        expected: "a method reference",
                    });
                };
                let Ok(summary) = descriptor::method_summary(&call.descriptor) else {
                    // Unparsable descriptor in the constant pool: give up on
                    // tracking this frame.
                    self.stack.clear();
                    return Ok(());
                };
                let mut pops = summary.params.len();
                if insn.opcode != opcodes::INVOKESTATIC {
                    pops += 1;
                }
                self.pop_n(pops)?;
                if let Some(ret) = summary.ret {
                    self.push(SymbolicValue::typed(ret));
                }
            }
            opcodes::INVOKEDYNAMIC => {
                // Unknown stack effect without bootstrap method resolution.
                self.stack.clear();
            }
            opcodes::NEW => {
                let value = match &insn.operand {
                    Operand::Type(name) => SymbolicValue::typed(JavaType::object(name.clone())),
                    _ => SymbolicValue::unknown(),
                };
                self.push(value);
            }
            opcodes::NEWARRAY => {
                self.pop()?;
                let descriptor = match insn.operand {
                    Operand::Int(atype) => primitive_array_descriptor(atype),
                    _ => None,
                };
                self.push(SymbolicValue {
                    inferred_type: descriptor.map(JavaType::Object),
                    ..SymbolicValue::default()
                });
            }
            opcodes::ANEWARRAY => {
                self.pop()?;
                let value = match &insn.operand {
                    Operand::Type(name) => {
                        SymbolicValue::typed(JavaType::Object(reference_array_descriptor(name)))
                    }
                    _ => SymbolicValue::unknown(),
                };
                self.push(value);
            }
            opcodes::MULTIANEWARRAY => {
                if let Operand::MultiArray { class_name, dims } = &insn.operand {
                    self.pop_n(*dims as usize)?;
                    self.push(SymbolicValue::typed(JavaType::Object(class_name.clone())));
                }
            }
            opcodes::ARRAYLENGTH => {
                self.pop()?;
                self.push(SymbolicValue::typed(JavaType::Int));
            }
            opcodes::CHECKCAST => {
                let mut top = self.pop()?;
                if let Operand::Type(name) = &insn.operand {
                    top.inferred_type = Some(cast_target_type(name));
                }
                self.push(top);
            }
            opcodes::INSTANCEOF => {
                self.pop()?;
                self.push(SymbolicValue::typed(JavaType::Int));
            }
            opcodes::MONITORENTER | opcodes::MONITOREXIT => {
                self.pop()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn binary_arithmetic(&mut self, opcode: u8) -> Result<(), EngineError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let ty = arithmetic_result_type(opcode);
        let mut result = SymbolicValue::typed(ty);
        if let (Some(a), Some(b)) = (left.int_constant(), right.int_constant()) {
            result.constant = fold_int(opcode, a, b).map(ConstValue::Int);
        }
        self.push(result);
        Ok(())
    }

    fn push(&mut self, value: SymbolicValue) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<SymbolicValue, EngineError> {
        self.stack.pop().ok_or_else(|| self.underflow(1))
    }

    fn pop_n(&mut self, count: usize) -> Result<(), EngineError> {
        if self.stack.len() < count {
            return Err(self.underflow(count));
        }
        self.stack.truncate(self.stack.len() - count);
        Ok(())
    }

    /// Insert `values` (bottom first) so that the top `below` stack entries,
    /// the value being duplicated included, end up above them.
    fn insert_below(&mut self, below: usize, values: Vec<SymbolicValue>) -> Result<(), EngineError> {
        let len = self.stack.len();
        if below > len {
            return Err(self.underflow(below));
        }
        let at = len - below;
        for (offset, value) in values.into_iter().enumerate() {
            self.stack.insert(at + offset, value);
        }
        Ok(())
    }

    fn invalidate_provenance(&mut self) {
        for value in &mut self.stack {
            value.clear_provenance();
        }
        for value in self.locals.values_mut() {
            value.clear_provenance();
        }
    }

    fn underflow(&self, wanted: usize) -> EngineError {
        EngineError::StackUnderflow {
            pc: self.pc,
            depth: self.stack.len(),
            wanted,
        }
    }
}

/// Branch targets and exception handler entries of a method.
fn merge_points(method: &Method) -> BTreeSet<u32> {
    let mut points = BTreeSet::new();
    let stream = InstructionStream::new(&method.instructions);
    for insn in &method.instructions {
        match &insn.operand {
            Operand::Branch(_) => {
                if let Ok(target) = stream.branch_target(insn) {
                    points.insert(target);
                }
            }
            Operand::Switch(_) => {
                if let Ok(targets) = stream.switch_targets(insn) {
                    points.extend(targets);
                }
            }
            _ => {}
        }
    }
    for handler in &method.exception_handlers {
        points.insert(handler.handler_pc);
    }
    points
}

fn operand_slot(insn: &Instruction) -> u16 {
    match insn.operand {
        Operand::Local(slot) => slot,
        _ => 0,
    }
}

fn constant_type(value: &ConstValue) -> JavaType {
    match value {
        ConstValue::Null => JavaType::object("java/lang/Object"),
        ConstValue::Int(_) => JavaType::Int,
        ConstValue::Long(_) => JavaType::Long,
        ConstValue::Float(_) => JavaType::Float,
        ConstValue::Double(_) => JavaType::Double,
        ConstValue::Str(_) => JavaType::object("java/lang/String"),
        ConstValue::Class(_) => JavaType::object("java/lang/Class"),
    }
}

fn load_family_type(opcode: u8) -> Option<JavaType> {
    let family = match opcode {
        opcodes::ILOAD..=opcodes::ALOAD => (opcode - opcodes::ILOAD) % 5,
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => (opcode - opcodes::ILOAD_0) / 4,
        _ => return None,
    };
    match family {
        0 => Some(JavaType::Int),
        1 => Some(JavaType::Long),
        2 => Some(JavaType::Float),
        3 => Some(JavaType::Double),
        _ => None,
    }
}

fn array_load_type(opcode: u8) -> Option<JavaType> {
    match opcode {
        opcodes::IALOAD => Some(JavaType::Int),
        opcodes::LALOAD => Some(JavaType::Long),
        opcodes::FALOAD => Some(JavaType::Float),
        opcodes::DALOAD => Some(JavaType::Double),
        opcodes::BALOAD => Some(JavaType::Byte),
        opcodes::CALOAD => Some(JavaType::Char),
        opcodes::SALOAD => Some(JavaType::Short),
        _ => None,
    }
}

/// Element type of an `aaload`, derived from the array's descriptor.
fn array_element_type(array: &SymbolicValue) -> Option<JavaType> {
    match &array.inferred_type {
        Some(JavaType::Object(array_descriptor)) => {
            let element = array_descriptor.strip_prefix('[')?;
            descriptor::field_type(element)
        }
        _ => None,
    }
}

fn arithmetic_result_type(opcode: u8) -> JavaType {
    match opcode {
        opcodes::IADD..=0x73 => match (opcode - opcodes::IADD) % 4 {
            0 => JavaType::Int,
            1 => JavaType::Long,
            2 => JavaType::Float,
            _ => JavaType::Double,
        },
        opcodes::INEG..=opcodes::DNEG => match opcode - opcodes::INEG {
            0 => JavaType::Int,
            1 => JavaType::Long,
            2 => JavaType::Float,
            _ => JavaType::Double,
        },
        // Shift and logic opcodes alternate int/long.
        _ => {
            if (opcode - opcodes::ISHL) % 2 == 0 {
                JavaType::Int
            } else {
                JavaType::Long
            }
        }
    }
}

fn conversion_result_type(opcode: u8) -> JavaType {
    match opcode {
        0x85 => JavaType::Long,
        0x86 => JavaType::Float,
        0x87 => JavaType::Double,
        0x88 => JavaType::Int,
        0x89 => JavaType::Float,
        0x8a => JavaType::Double,
        0x8b => JavaType::Int,
        0x8c => JavaType::Long,
        0x8d => JavaType::Double,
        0x8e => JavaType::Int,
        0x8f => JavaType::Long,
        0x90 => JavaType::Float,
        // i2b/i2c/i2s stay int-sized on the operand stack.
        _ => JavaType::Int,
    }
}

fn fold_int(opcode: u8, a: i32, b: i32) -> Option<i32> {
    match opcode {
        opcodes::IADD => Some(a.wrapping_add(b)),
        opcodes::ISUB => Some(a.wrapping_sub(b)),
        opcodes::IMUL => Some(a.wrapping_mul(b)),
        opcodes::IDIV if b != 0 => Some(a.wrapping_div(b)),
        opcodes::IREM if b != 0 => Some(a.wrapping_rem(b)),
        opcodes::ISHL => Some(a.wrapping_shl(b as u32 & 0x1f)),
        opcodes::ISHR => Some(a.wrapping_shr(b as u32 & 0x1f)),
        opcodes::IUSHR => Some(((a as u32) >> (b as u32 & 0x1f)) as i32),
        opcodes::IAND => Some(a & b),
        opcodes::IOR => Some(a | b),
        opcodes::IXOR => Some(a ^ b),
        _ => None,
    }
}

fn field_value(insn: &Instruction) -> SymbolicValue {
    match &insn.operand {
        Operand::Field(field) => SymbolicValue {
            inferred_type: descriptor::field_type(&field.descriptor),
            ..SymbolicValue::default()
        },
        _ => SymbolicValue::unknown(),
    }
}

fn primitive_array_descriptor(atype: i32) -> Option<String> {
    let element = match atype {
        4 => 'Z',
        5 => 'C',
        6 => 'F',
        7 => 'D',
        8 => 'B',
        9 => 'S',
        10 => 'I',
        11 => 'J',
        _ => return None,
    };
    Some(format!("[{element}"))
}

fn reference_array_descriptor(name: &str) -> String {
    if name.starts_with('[') {
        format!("[{name}")
    } else {
        format!("[L{name};")
    }
}

fn cast_target_type(name: &str) -> JavaType {
    // checkcast operands are internal names, or full descriptors for arrays.
    JavaType::object(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ExceptionHandler, Method, MethodAccess};

    fn insn(opcode: u8, operand: Operand) -> Instruction {
        Instruction {
            offset: 0,
            opcode,
            operand,
        }
    }

    fn method_with(instructions: Vec<Instruction>) -> Method {
        Method {
            name: "run".to_string(),
            descriptor: "()V".to_string(),
            access: MethodAccess::default(),
            instructions,
            line_numbers: Vec::new(),
            local_variables: Vec::new(),
            exception_handlers: Vec::new(),
        }
    }

    fn fresh_stack() -> SymbolicStack {
        let mut stack = SymbolicStack::new();
        stack.reset_for_method_entry("com/example/App", &method_with(Vec::new()));
        stack
    }

    fn run(stack: &mut SymbolicStack, program: &[Instruction]) {
        for (index, instruction) in program.iter().enumerate() {
            let mut placed = instruction.clone();
            placed.offset = index as u32;
            stack.execute(&placed).expect("execute");
        }
    }

    #[test]
    fn push_pop_round_trip_restores_depth() {
        let mut stack = fresh_stack();
        let before = stack.depth();

        run(
            &mut stack,
            &[
                insn(opcodes::ICONST_1, Operand::None),
                insn(opcodes::ICONST_2, Operand::None),
                insn(opcodes::ICONST_3, Operand::None),
                insn(opcodes::POP, Operand::None),
                insn(opcodes::POP, Operand::None),
                insn(opcodes::POP, Operand::None),
            ],
        );

        assert_eq!(before, stack.depth());
    }

    #[test]
    fn underflow_is_reported_with_location() {
        let mut stack = fresh_stack();

        let err = stack
            .execute(&insn(opcodes::POP, Operand::None))
            .expect_err("underflow");

        assert_eq!(
            EngineError::StackUnderflow {
                pc: 0,
                depth: 0,
                wanted: 1,
            },
            err
        );
    }

    #[test]
    fn constants_fold_through_int_arithmetic() {
        let mut stack = fresh_stack();

        run(
            &mut stack,
            &[
                insn(opcodes::BIPUSH, Operand::Int(21)),
                insn(opcodes::ICONST_2, Operand::None),
                insn(opcodes::IMUL, Operand::None),
            ],
        );

        assert_eq!(Some(42), stack.peek(0).expect("top").int_constant());
    }

    #[test]
    fn division_by_constant_zero_is_not_folded() {
        let mut stack = fresh_stack();

        run(
            &mut stack,
            &[
                insn(opcodes::ICONST_1, Operand::None),
                insn(opcodes::ICONST_0, Operand::None),
                insn(opcodes::IDIV, Operand::None),
            ],
        );

        assert_eq!(None, stack.peek(0).expect("top").constant);
        assert_eq!(
            Some(JavaType::Int),
            stack.peek(0).expect("top").inferred_type
        );
    }

    #[test]
    fn load_records_source_register_and_store_keeps_tags() {
        let mut stack = fresh_stack();

        run(
            &mut stack,
            &[insn(opcodes::LDC, Operand::Const(ConstValue::Str("x".to_string())))],
        );
        stack
            .set_tag(0, ValueTag::SynchronizedCollection)
            .expect("tag top");
        run(
            &mut stack,
            &[
                insn(opcodes::ASTORE_1, Operand::Local(1)),
                insn(opcodes::ALOAD_1, Operand::Local(1)),
            ],
        );

        let top = stack.peek(0).expect("top");
        assert_eq!(Some(1), top.source_register);
        assert_eq!(Some(ValueTag::SynchronizedCollection), top.tag);
        assert_eq!(Some("x"), top.string_constant());
    }

    #[test]
    fn dup_duplicates_tags() {
        let mut stack = fresh_stack();

        run(&mut stack, &[insn(opcodes::ICONST_1, Operand::None)]);
        stack
            .set_tag(0, ValueTag::SynchronizedCollection)
            .expect("tag top");
        run(&mut stack, &[insn(opcodes::DUP, Operand::None)]);

        assert_eq!(
            Some(ValueTag::SynchronizedCollection),
            stack.tag_at(0).expect("top tag")
        );
        assert_eq!(
            Some(ValueTag::SynchronizedCollection),
            stack.tag_at(1).expect("second tag")
        );
    }

    #[test]
    fn branch_target_clears_provenance_but_not_depth() {
        // iconst_1; ifeq +4 (target pc 5); iconst_2; <pc 5 is a merge point>
        let program = vec![
            Instruction {
                offset: 0,
                opcode: opcodes::ICONST_1,
                operand: Operand::None,
            },
            Instruction {
                offset: 1,
                opcode: opcodes::IFEQ,
                operand: Operand::Branch(4),
            },
            Instruction {
                offset: 4,
                opcode: opcodes::ICONST_2,
                operand: Operand::None,
            },
            Instruction {
                offset: 5,
                opcode: opcodes::NOP,
                operand: Operand::None,
            },
        ];
        let method = method_with(program.clone());
        let mut stack = SymbolicStack::new();
        stack.reset_for_method_entry("com/example/App", &method);

        stack.execute(&program[0]).expect("iconst_1");
        stack.execute(&program[1]).expect("ifeq");
        stack.execute(&program[2]).expect("iconst_2");
        stack.set_tag(0, ValueTag::SynchronizedCollection).expect("tag");
        assert_eq!(Some(2), stack.peek(0).expect("top").int_constant());

        stack.execute(&program[3]).expect("nop at merge point");

        assert_eq!(1, stack.depth());
        let top = stack.peek(0).expect("top");
        assert_eq!(None, top.tag);
        assert_eq!(None, top.constant);
    }

    #[test]
    fn dup_x1_places_the_copy_below_both_values() {
        let mut stack = fresh_stack();

        // ..., v2, v1 becomes ..., v1, v2, v1.
        run(
            &mut stack,
            &[
                insn(opcodes::ICONST_2, Operand::None),
                insn(opcodes::ICONST_1, Operand::None),
                insn(opcodes::DUP_X1, Operand::None),
            ],
        );

        assert_eq!(3, stack.depth());
        assert_eq!(Some(1), stack.peek(0).expect("top").int_constant());
        assert_eq!(Some(2), stack.peek(1).expect("middle").int_constant());
        assert_eq!(Some(1), stack.peek(2).expect("bottom").int_constant());
    }

    #[test]
    fn dup2_x1_places_a_wide_copy_below_both_values() {
        let mut stack = fresh_stack();

        // ..., v2, long becomes ..., long, v2, long.
        run(
            &mut stack,
            &[
                insn(opcodes::ICONST_3, Operand::None),
                insn(opcodes::LCONST_1, Operand::None),
                insn(opcodes::DUP2_X1, Operand::None),
            ],
        );

        assert_eq!(3, stack.depth());
        assert_eq!(
            Some(ConstValue::Long(1)),
            stack.peek(0).expect("top").constant
        );
        assert_eq!(Some(3), stack.peek(1).expect("middle").int_constant());
        assert_eq!(
            Some(ConstValue::Long(1)),
            stack.peek(2).expect("bottom").constant
        );
    }

    #[test]
    fn category2_values_are_single_entries() {
        let mut stack = fresh_stack();

        run(
            &mut stack,
            &[
                insn(opcodes::LCONST_1, Operand::None),
                insn(opcodes::DUP2, Operand::None),
            ],
        );

        assert_eq!(2, stack.depth());
        run(&mut stack, &[insn(opcodes::POP2, Operand::None)]);
        assert_eq!(1, stack.depth());
    }

    #[test]
    fn handler_entry_clears_provenance_but_not_depth() {
        let program = vec![
            Instruction {
                offset: 0,
                opcode: opcodes::ICONST_1,
                operand: Operand::None,
            },
            Instruction {
                offset: 1,
                opcode: opcodes::NOP,
                operand: Operand::None,
            },
            Instruction {
                offset: 2,
                opcode: opcodes::NOP,
                operand: Operand::None,
            },
        ];
        let mut method = method_with(program.clone());
        method.exception_handlers.push(ExceptionHandler {
            start_pc: 0,
            end_pc: 2,
            handler_pc: 2,
            catch_type: None,
        });
        let mut stack = SymbolicStack::new();
        stack.reset_for_method_entry("com/example/App", &method);

        stack.execute(&program[0]).expect("iconst_1");
        stack.execute(&program[1]).expect("nop");
        stack.set_tag(0, ValueTag::SynchronizedCollection).expect("tag");
        assert_eq!(Some(1), stack.peek(0).expect("top").int_constant());

        stack.execute(&program[2]).expect("nop at handler entry");

        assert_eq!(1, stack.depth());
        let top = stack.peek(0).expect("top");
        assert_eq!(None, top.tag);
        assert_eq!(None, top.constant);
    }

    #[test]
    fn invoke_pops_receiver_and_arguments_and_pushes_return() {
        let mut stack = fresh_stack();
        let call = crate::ir::CallSite {
            owner: "java/util/Map".to_string(),
            name: "put".to_string(),
            descriptor:
                "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;".to_string(),
            kind: crate::ir::CallKind::Interface,
        };

        run(
            &mut stack,
            &[
                insn(opcodes::ACONST_NULL, Operand::None),
                insn(opcodes::ACONST_NULL, Operand::None),
                insn(opcodes::ACONST_NULL, Operand::None),
                insn(opcodes::INVOKEINTERFACE, Operand::Invoke(call)),
            ],
        );

        assert_eq!(1, stack.depth());
        assert_eq!(
            Some(JavaType::object("java/lang/Object")),
            stack.peek(0).expect("top").inferred_type
        );
    }

    #[test]
    fn method_entry_seeds_this_and_parameters() {
        let mut method = method_with(Vec::new());
        method.descriptor = "(JLjava/lang/String;)V".to_string();
        let mut stack = SymbolicStack::new();
        stack.reset_for_method_entry("com/example/App", &method);

        assert_eq!(
            Some(JavaType::object("com/example/App")),
            stack.local(0).inferred_type
        );
        assert_eq!(Some(JavaType::Long), stack.local(1).inferred_type);
        // Long takes slots 1 and 2; the String lands in slot 3.
        assert_eq!(
            Some(JavaType::object("java/lang/String")),
            stack.local(3).inferred_type
        );
        assert_eq!(None, stack.local(9).inferred_type);
    }

    #[test]
    fn return_clears_the_stack() {
        let mut stack = fresh_stack();

        run(
            &mut stack,
            &[
                insn(opcodes::ICONST_1, Operand::None),
                insn(opcodes::ICONST_2, Operand::None),
                insn(opcodes::RETURN, Operand::None),
            ],
        );

        assert_eq!(0, stack.depth());
    }

    #[test]
    fn checkcast_retypes_but_keeps_provenance() {
        let mut stack = fresh_stack();

        run(&mut stack, &[insn(opcodes::ALOAD_1, Operand::Local(1))]);
        stack.set_tag(0, ValueTag::SynchronizedCollection).expect("tag");
        run(
            &mut stack,
            &[insn(
                opcodes::CHECKCAST,
                Operand::Type("java/util/SortedMap".to_string()),
            )],
        );

        let top = stack.peek(0).expect("top");
        assert_eq!(
            Some(JavaType::object("java/util/SortedMap")),
            top.inferred_type
        );
        assert_eq!(Some(1), top.source_register);
        assert_eq!(Some(ValueTag::SynchronizedCollection), top.tag);
    }
}
