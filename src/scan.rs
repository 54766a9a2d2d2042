use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use log::debug;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use zip::ZipArchive;

use crate::ir::{
    CallKind, CallSite, Class, ClassAccess, ConstValue, ExceptionHandler, Field, FieldAccess,
    FieldRef, Instruction, LineNumber, LocalVariable, Method, MethodAccess, Operand,
};
use crate::opcodes;

/// Snapshot of parsed artifacts and classes for a scan.
///
/// `classes` are analysis targets; `classpath_classes` only feed the type
/// hierarchy and are never scanned by rules.
pub(crate) struct ScanOutput {
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) class_count: usize,
    pub(crate) classes: Vec<Class>,
    pub(crate) classpath_classes: Vec<Class>,
}

#[derive(Default)]
struct ScanAccumulator {
    artifacts: Vec<Artifact>,
    class_count: usize,
    classes: Vec<Class>,
    classpath_classes: Vec<Class>,
}

pub(crate) fn scan_inputs(input: &Path, classpath: &[PathBuf]) -> Result<ScanOutput> {
    let mut acc = ScanAccumulator::default();

    scan_path(input, true, true, &mut acc)?;

    // Keep deterministic ordering by sorting classpath entries and directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in classpath_entries {
        scan_path(&entry, false, true, &mut acc)?;
    }

    Ok(ScanOutput {
        artifacts: acc.artifacts,
        class_count: acc.class_count,
        classes: acc.classes,
        classpath_classes: acc.classpath_classes,
    })
}

fn scan_path(path: &Path, is_input: bool, strict: bool, acc: &mut ScanAccumulator) -> Result<()> {
    if path.is_dir() {
        scan_dir(path, is_input, acc)?;
        return Ok(());
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let roles = if is_input {
        Some(vec![
            serde_json::to_value(ArtifactRoles::AnalysisTarget).expect("serialize artifact role"),
        ])
    } else {
        None
    };

    match extension {
        "class" => scan_class_file(path, is_input, roles, acc),
        "jar" => scan_jar_file(path, is_input, roles, acc),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display())
            } else {
                Ok(())
            }
        }
    }
}

fn scan_dir(path: &Path, is_input: bool, acc: &mut ScanAccumulator) -> Result<()> {
    let mut entries = Vec::new();
    for entry in
        fs::read_dir(path).with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, is_input, acc)?;
        } else {
            scan_path(&entry, is_input, false, acc)?;
        }
    }

    Ok(())
}

fn scan_class_file(
    path: &Path,
    is_input: bool,
    roles: Option<Vec<Value>>,
    acc: &mut ScanAccumulator,
) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let index = push_path_artifact(path, roles, data.len() as u64, None, &mut acc.artifacts)?;
    let class = parse_class_bytes(&data, index)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    acc.class_count += 1;
    if is_input {
        acc.classes.push(class);
    } else {
        acc.classpath_classes.push(class);
    }
    Ok(())
}

fn scan_jar_file(
    path: &Path,
    is_input: bool,
    roles: Option<Vec<Value>>,
    acc: &mut ScanAccumulator,
) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let jar_len = fs::metadata(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .len();
    let jar_index = push_path_artifact(path, roles, jar_len, None, &mut acc.artifacts)?;

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.ends_with(".class") && !name.ends_with("module-info.class") {
            entry_names.push(name);
        }
    }

    entry_names.sort();

    for name in entry_names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let entry_uri = jar_entry_uri(path, &name);
        let entry_index = push_artifact(
            entry_uri,
            entry.size(),
            Some(jar_index),
            None,
            &mut acc.artifacts,
        );
        let class = parse_class_bytes(&data, entry_index)
            .with_context(|| format!("failed to parse {}:{}", path.display(), name))?;
        acc.class_count += 1;
        if is_input {
            acc.classes.push(class);
        } else {
            acc.classpath_classes.push(class);
        }
    }

    Ok(())
}

/// Push a path-based artifact and return its index for parent linkage (e.g., JAR entries).
fn push_path_artifact(
    path: &Path,
    roles: Option<Vec<Value>>,
    len: u64,
    parent_index: Option<i64>,
    artifacts: &mut Vec<Artifact>,
) -> Result<i64> {
    let uri = path_to_uri(path);
    Ok(push_artifact(uri, len, parent_index, roles, artifacts))
}

fn push_artifact(
    uri: String,
    len: u64,
    parent_index: Option<i64>,
    roles: Option<Vec<Value>>,
    artifacts: &mut Vec<Artifact>,
) -> i64 {
    let location = ArtifactLocation::builder().uri(uri).build();
    let artifact = match (parent_index, roles) {
        (Some(parent_index), Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .roles(roles)
            .build(),
        (Some(parent_index), None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .build(),
        (None, Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        (None, None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    let index = artifacts.len() as i64;
    artifacts.push(artifact);
    index
}

fn path_to_uri(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn jar_entry_uri(jar_path: &Path, entry_name: &str) -> String {
    format!("jar:{}!/{}", jar_path.to_string_lossy(), entry_name)
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Parse one class file into the IR.
pub(crate) fn parse_class_bytes(data: &[u8], artifact_index: i64) -> Result<Class> {
    let class_file = class_file::parse(data).context("failed to parse class file bytes")?;
    let constant_pool = class_file.constant_pool();
    let raw = raw_class_info(data).context("failed to read raw class info")?;

    let class_name =
        resolve_class_name(constant_pool, class_file.this_class()).context("resolve class name")?;
    let super_name = if class_file.super_class() == 0 {
        None
    } else {
        Some(
            resolve_class_name(constant_pool, class_file.super_class())
                .context("resolve super class name")?,
        )
    };
    let mut interfaces = Vec::new();
    for interface in class_file.interfaces() {
        interfaces
            .push(resolve_class_name(constant_pool, *interface).context("resolve interface name")?);
    }

    let access = ClassAccess {
        is_abstract: raw.class_flags & 0x0400 != 0,
        is_interface: raw.class_flags & 0x0200 != 0,
    };

    let fields = parse_fields(constant_pool, class_file.fields(), &raw.field_flags)
        .context("parse fields")?;
    let methods = parse_methods(
        constant_pool,
        class_file.methods(),
        &raw.method_flags,
        &raw.numeric_constants,
    )
    .context("parse methods")?;

    debug!(
        "parsed {} ({} methods, {} fields)",
        class_name,
        methods.len(),
        fields.len()
    );

    Ok(Class {
        name: class_name,
        super_name,
        interfaces,
        access,
        fields,
        methods,
        artifact_index,
    })
}

fn resolve_class_name(constant_pool: &[ConstantPool], class_index: u16) -> Result<String> {
    let entry = constant_pool
        .get(class_index as usize)
        .context("missing class entry")?;
    match entry {
        ConstantPool::Class { name_index } => resolve_utf8(constant_pool, *name_index),
        _ => anyhow::bail!("unexpected class entry"),
    }
}

fn resolve_utf8(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing utf8 entry")?;
    match entry {
        ConstantPool::Utf8 { value } => Ok(value.clone()),
        _ => anyhow::bail!("unexpected utf8 entry"),
    }
}

fn parse_fields(
    constant_pool: &[ConstantPool],
    fields: &[jclassfile::fields::FieldInfo],
    raw_flags: &[u16],
) -> Result<Vec<Field>> {
    let mut parsed = Vec::new();
    for (index, field) in fields.iter().enumerate() {
        let name = resolve_utf8(constant_pool, field.name_index()).context("resolve field name")?;
        let descriptor = resolve_utf8(constant_pool, field.descriptor_index())
            .context("resolve field descriptor")?;
        let flags = raw_flags.get(index).copied().unwrap_or(0);
        parsed.push(Field {
            name,
            descriptor,
            access: FieldAccess {
                is_static: flags & 0x0008 != 0,
                is_private: flags & 0x0002 != 0,
            },
        });
    }
    Ok(parsed)
}

fn parse_methods(
    constant_pool: &[ConstantPool],
    methods: &[jclassfile::methods::MethodInfo],
    raw_flags: &[u16],
    numeric_constants: &std::collections::BTreeMap<u16, ConstValue>,
) -> Result<Vec<Method>> {
    let mut parsed = Vec::new();
    for (index, method) in methods.iter().enumerate() {
        let name =
            resolve_utf8(constant_pool, method.name_index()).context("resolve method name")?;
        let descriptor = resolve_utf8(constant_pool, method.descriptor_index())
            .context("resolve method descriptor")?;
        let flags = raw_flags.get(index).copied().unwrap_or(0);
        let access = MethodAccess {
            is_public: flags & 0x0001 != 0,
            is_static: flags & 0x0008 != 0,
            is_abstract: flags & 0x0400 != 0,
            is_synthetic: flags & 0x1000 != 0,
        };
        let code = method
            .attributes()
            .iter()
            .find_map(|attribute| match attribute {
                jclassfile::attributes::Attribute::Code {
                    code,
                    exception_table,
                    attributes,
                    ..
                } => Some((code, exception_table, attributes)),
                _ => None,
            });
        let Some((code, exception_table, code_attributes)) = code else {
            // Abstract and native methods keep their declared signature but no body.
            parsed.push(Method {
                name,
                descriptor,
                access,
                instructions: Vec::new(),
                line_numbers: Vec::new(),
                local_variables: Vec::new(),
                exception_handlers: Vec::new(),
            });
            continue;
        };
        let instructions = decode_bytecode(code, constant_pool, numeric_constants)
            .with_context(|| format!("decode bytecode of {name}{descriptor}"))?;
        let line_numbers = parse_line_numbers(code_attributes);
        let local_variables =
            parse_local_variables(code_attributes, constant_pool).context("parse local variables")?;
        let exception_handlers =
            parse_exception_handlers(exception_table, constant_pool).context("parse handlers")?;
        parsed.push(Method {
            name,
            descriptor,
            access,
            instructions,
            line_numbers,
            local_variables,
            exception_handlers,
        });
    }
    Ok(parsed)
}

fn parse_line_numbers(attributes: &[jclassfile::attributes::Attribute]) -> Vec<LineNumber> {
    let mut entries = Vec::new();
    for attribute in attributes {
        let jclassfile::attributes::Attribute::LineNumberTable { line_number_table } = attribute
        else {
            continue;
        };
        for record in line_number_table {
            entries.push(LineNumber {
                start_pc: record.start_pc() as u32,
                line: record.line_number() as u32,
            });
        }
    }
    entries.sort_by_key(|entry| entry.start_pc);
    entries
}

fn parse_local_variables(
    attributes: &[jclassfile::attributes::Attribute],
    constant_pool: &[ConstantPool],
) -> Result<Vec<LocalVariable>> {
    let mut entries = Vec::new();
    for attribute in attributes {
        let jclassfile::attributes::Attribute::LocalVariableTable {
            local_variable_table,
        } = attribute
        else {
            continue;
        };
        for record in local_variable_table {
            entries.push(LocalVariable {
                slot: record.index(),
                name: resolve_utf8(constant_pool, record.name_index())
                    .context("resolve local variable name")?,
                descriptor: resolve_utf8(constant_pool, record.descriptor_index())
                    .context("resolve local variable descriptor")?,
                start_pc: record.start_pc() as u32,
                length: record.length() as u32,
            });
        }
    }
    entries.sort_by_key(|entry| (entry.slot, entry.start_pc));
    Ok(entries)
}

fn parse_exception_handlers(
    table: &[jclassfile::attributes::ExceptionRecord],
    constant_pool: &[ConstantPool],
) -> Result<Vec<ExceptionHandler>> {
    let mut handlers = Vec::new();
    for entry in table {
        let catch_type = if entry.catch_type() == 0 {
            None
        } else {
            Some(
                resolve_class_name(constant_pool, entry.catch_type())
                    .context("resolve catch type")?,
            )
        };
        handlers.push(ExceptionHandler {
            start_pc: entry.start_pc() as u32,
            end_pc: entry.end_pc() as u32,
            handler_pc: entry.handler_pc() as u32,
            catch_type,
        });
    }
    Ok(handlers)
}

/// Decode raw Code bytes into resolved instructions.
pub(crate) fn decode_bytecode(
    code: &[u8],
    constant_pool: &[ConstantPool],
    numeric_constants: &std::collections::BTreeMap<u16, ConstValue>,
) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let mut opcode = code[offset];
        let start_offset = offset as u32;
        let length = opcode_length(code, offset)?;
        if length == 0 || offset + length > code.len() {
            anyhow::bail!("invalid bytecode length at offset {}", offset);
        }
        let operand = match opcode {
            opcodes::BIPUSH => Operand::Int(code[offset + 1] as i8 as i32),
            opcodes::SIPUSH => Operand::Int(read_i16(code, offset + 1)? as i32),
            opcodes::LDC => {
                let index = code.get(offset + 1).copied().context("ldc index")? as u16;
                constant_operand(constant_pool, numeric_constants, index)
            }
            opcodes::LDC_W | opcodes::LDC2_W => {
                let index = read_u16(code, offset + 1)?;
                constant_operand(constant_pool, numeric_constants, index)
            }
            opcodes::ILOAD..=opcodes::ALOAD => Operand::Local(code[offset + 1] as u16),
            opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                Operand::Local(((opcode - opcodes::ILOAD_0) % 4) as u16)
            }
            opcodes::ISTORE..=opcodes::ASTORE => Operand::Local(code[offset + 1] as u16),
            opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                Operand::Local(((opcode - opcodes::ISTORE_0) % 4) as u16)
            }
            opcodes::IINC => Operand::Iinc {
                slot: code[offset + 1] as u16,
                delta: code[offset + 2] as i8 as i32,
            },
            opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
                Operand::Branch(read_i16(code, offset + 1)? as i32)
            }
            opcodes::GOTO_W | opcodes::JSR_W => Operand::Branch(read_i32(code, offset + 1)?),
            opcodes::RET => Operand::Local(code[offset + 1] as u16),
            opcodes::TABLESWITCH => Operand::Switch(tableswitch_offsets(code, offset)?),
            opcodes::LOOKUPSWITCH => Operand::Switch(lookupswitch_offsets(code, offset)?),
            opcodes::GETSTATIC..=opcodes::PUTFIELD => {
                let index = read_u16(code, offset + 1)?;
                Operand::Field(resolve_field_ref(constant_pool, index).context("resolve field ref")?)
            }
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
                let index = read_u16(code, offset + 1)?;
                let call_kind = match opcode {
                    opcodes::INVOKEVIRTUAL => CallKind::Virtual,
                    opcodes::INVOKESPECIAL => CallKind::Special,
                    opcodes::INVOKESTATIC => CallKind::Static,
                    _ => CallKind::Interface,
                };
                let method_ref =
                    resolve_method_ref(constant_pool, index).context("resolve method ref")?;
                Operand::Invoke(CallSite {
                    owner: method_ref.0,
                    name: method_ref.1,
                    descriptor: method_ref.2,
                    kind: call_kind,
                })
            }
            opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
                let index = read_u16(code, offset + 1)?;
                Operand::Type(resolve_class_name(constant_pool, index).context("resolve type")?)
            }
            opcodes::NEWARRAY => Operand::Int(code[offset + 1] as i32),
            opcodes::MULTIANEWARRAY => {
                let index = read_u16(code, offset + 1)?;
                Operand::MultiArray {
                    class_name: resolve_class_name(constant_pool, index)
                        .context("resolve array type")?,
                    dims: code[offset + 3],
                }
            }
            opcodes::WIDE => {
                let wide_opcode = code.get(offset + 1).copied().context("missing wide opcode")?;
                opcode = wide_opcode;
                if wide_opcode == opcodes::IINC {
                    Operand::Iinc {
                        slot: read_u16(code, offset + 2)?,
                        delta: read_i16(code, offset + 4)? as i32,
                    }
                } else {
                    Operand::Local(read_u16(code, offset + 2)?)
                }
            }
            _ => Operand::None,
        };

        instructions.push(Instruction {
            offset: start_offset,
            opcode,
            operand,
        });
        offset += length;
    }
    Ok(instructions)
}

fn constant_operand(
    constant_pool: &[ConstantPool],
    numeric_constants: &std::collections::BTreeMap<u16, ConstValue>,
    index: u16,
) -> Operand {
    if let Some(value) = numeric_constants.get(&index) {
        return Operand::Const(value.clone());
    }
    match constant_pool.get(index as usize) {
        Some(ConstantPool::String { string_index }) => {
            match resolve_utf8(constant_pool, *string_index) {
                Ok(value) => Operand::Const(ConstValue::Str(value)),
                Err(_) => Operand::None,
            }
        }
        Some(ConstantPool::Class { name_index }) => {
            match resolve_utf8(constant_pool, *name_index) {
                Ok(value) => Operand::Const(ConstValue::Class(value)),
                Err(_) => Operand::None,
            }
        }
        _ => Operand::None,
    }
}

fn resolve_method_ref(
    constant_pool: &[ConstantPool],
    index: u16,
) -> Result<(String, String, String)> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing method ref entry")?;
    let (class_index, name_and_type_index) = match entry {
        ConstantPool::Methodref {
            class_index,
            name_and_type_index,
        } => (*class_index, *name_and_type_index),
        ConstantPool::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => (*class_index, *name_and_type_index),
        _ => anyhow::bail!("unexpected method ref entry"),
    };
    let owner = resolve_class_name(constant_pool, class_index).context("resolve owner")?;
    let (name_index, descriptor_index) = resolve_name_and_type(constant_pool, name_and_type_index)?;
    let name = resolve_utf8(constant_pool, name_index).context("resolve method name")?;
    let descriptor =
        resolve_utf8(constant_pool, descriptor_index).context("resolve method descriptor")?;
    Ok((owner, name, descriptor))
}

fn resolve_field_ref(constant_pool: &[ConstantPool], index: u16) -> Result<FieldRef> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing field ref entry")?;
    let ConstantPool::Fieldref {
        class_index,
        name_and_type_index,
    } = entry
    else {
        anyhow::bail!("unexpected field ref entry");
    };
    let owner = resolve_class_name(constant_pool, *class_index).context("resolve owner")?;
    let (name_index, descriptor_index) =
        resolve_name_and_type(constant_pool, *name_and_type_index)?;
    Ok(FieldRef {
        owner,
        name: resolve_utf8(constant_pool, name_index).context("resolve field name")?,
        descriptor: resolve_utf8(constant_pool, descriptor_index)
            .context("resolve field descriptor")?,
    })
}

fn resolve_name_and_type(constant_pool: &[ConstantPool], index: u16) -> Result<(u16, u16)> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing name and type entry")?;
    match entry {
        ConstantPool::NameAndType {
            name_index,
            descriptor_index,
        } => Ok((*name_index, *descriptor_index)),
        _ => anyhow::bail!("unexpected name and type entry"),
    }
}

fn tableswitch_offsets(code: &[u8], offset: usize) -> Result<Vec<i32>> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let default = read_i32(code, base)?;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    if count < 0 {
        anyhow::bail!("invalid tableswitch range");
    }
    let mut offsets = vec![default];
    let mut idx = base + 12;
    for _ in 0..count {
        offsets.push(read_i32(code, idx)?);
        idx += 4;
    }
    Ok(offsets)
}

fn lookupswitch_offsets(code: &[u8], offset: usize) -> Result<Vec<i32>> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let default = read_i32(code, base)?;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    let mut offsets = vec![default];
    let mut idx = base + 8;
    for _ in 0..npairs {
        offsets.push(read_i32(code, idx + 4)?);
        idx += 8;
    }
    Ok(offsets)
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x4e => 1,
        0x4f..=0x56 => 1,
        0x57..=0x5f => 1,
        0x60..=0x83 => 1,
        0x84 => 3,
        0x85..=0x98 => 1,
        0x99..=0xa6 => 3,
        opcodes::GOTO | opcodes::JSR => 3,
        0xa9 => 2,
        0xaa => tableswitch_length(code, offset)?,
        0xab => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb5 => 3,
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        0xc4 => wide_length(code, offset)?,
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        0xca => 1,
        0xfe | 0xff => 1,
        _ => anyhow::bail!("unsupported opcode 0x{:02x}", opcode),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    if count < 0 {
        anyhow::bail!("invalid tableswitch range");
    }
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code
        .get(offset + 1)
        .copied()
        .context("missing wide opcode")?;
    if opcode == opcodes::IINC { Ok(6) } else { Ok(4) }
}

pub(crate) fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .context("bytecode u16 out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

pub(crate) fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    let slice = code
        .get(offset..offset + 4)
        .context("bytecode u32 out of bounds")?;
    Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    let value = read_u16(code, offset)?;
    Ok(i16::from_be_bytes(value.to_be_bytes()))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let value = read_u32(code, offset)?;
    Ok(i32::from_be_bytes(value.to_be_bytes()))
}

/// Class-level access flags, per-member raw flags, and numeric constant pool
/// values, read straight from the class bytes.
///
/// jclassfile's accessor surface stops short of these; the walk follows the
/// constant pool layout of JVMS §4.4.
struct RawClassInfo {
    class_flags: u16,
    field_flags: Vec<u16>,
    method_flags: Vec<u16>,
    numeric_constants: std::collections::BTreeMap<u16, ConstValue>,
}

fn raw_class_info(data: &[u8]) -> Result<RawClassInfo> {
    let mut offset = 0usize;
    let magic = read_raw_u32(data, &mut offset)?;
    if magic != 0xCAFEBABE {
        anyhow::bail!("invalid class file magic");
    }
    let _minor = read_raw_u16(data, &mut offset)?;
    let _major = read_raw_u16(data, &mut offset)?;

    let count = read_raw_u16(data, &mut offset)?;
    let mut numeric_constants = std::collections::BTreeMap::new();
    let mut index = 1u16;
    while index < count {
        let tag = read_raw_u8(data, &mut offset)?;
        match tag {
            1 => {
                let len = read_raw_u16(data, &mut offset)? as usize;
                skip_raw(data, &mut offset, len)?;
            }
            3 => {
                let bytes = read_raw_bytes(data, &mut offset, 4)?;
                let value = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                numeric_constants.insert(index, ConstValue::Int(value));
            }
            4 => {
                let bytes = read_raw_bytes(data, &mut offset, 4)?;
                let value = f32::from_bits(u32::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ]));
                numeric_constants.insert(index, ConstValue::Float(value));
            }
            5 | 6 => {
                let bytes = read_raw_bytes(data, &mut offset, 8)?;
                let raw = u64::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]);
                let value = if tag == 5 {
                    ConstValue::Long(raw as i64)
                } else {
                    ConstValue::Double(f64::from_bits(raw))
                };
                numeric_constants.insert(index, value);
                // Long and double entries take two pool slots.
                index += 1;
            }
            7 | 8 | 16 | 19 | 20 => skip_raw(data, &mut offset, 2)?,
            15 => skip_raw(data, &mut offset, 3)?,
            9 | 10 | 11 | 12 | 17 | 18 => skip_raw(data, &mut offset, 4)?,
            _ => anyhow::bail!("unsupported constant pool tag: {}", tag),
        }
        index += 1;
    }

    let class_flags = read_raw_u16(data, &mut offset)?;
    let _this_class = read_raw_u16(data, &mut offset)?;
    let _super_class = read_raw_u16(data, &mut offset)?;
    let interface_count = read_raw_u16(data, &mut offset)? as usize;
    skip_raw(data, &mut offset, interface_count * 2)?;

    let field_flags = read_member_flags(data, &mut offset)?;
    let method_flags = read_member_flags(data, &mut offset)?;

    Ok(RawClassInfo {
        class_flags,
        field_flags,
        method_flags,
        numeric_constants,
    })
}

fn read_member_flags(data: &[u8], offset: &mut usize) -> Result<Vec<u16>> {
    let count = read_raw_u16(data, offset)?;
    let mut flags = Vec::with_capacity(count as usize);
    for _ in 0..count {
        flags.push(read_raw_u16(data, offset)?);
        skip_raw(data, offset, 4)?;
        skip_raw_attributes(data, offset)?;
    }
    Ok(flags)
}

fn skip_raw_attributes(data: &[u8], offset: &mut usize) -> Result<()> {
    let count = read_raw_u16(data, offset)?;
    for _ in 0..count {
        skip_raw(data, offset, 2)?;
        let length = read_raw_u32(data, offset)? as usize;
        skip_raw(data, offset, length)?;
    }
    Ok(())
}

fn read_raw_u8(data: &[u8], offset: &mut usize) -> Result<u8> {
    let byte = *data.get(*offset).context("class file out of bounds")?;
    *offset += 1;
    Ok(byte)
}

fn read_raw_u16(data: &[u8], offset: &mut usize) -> Result<u16> {
    let bytes = read_raw_bytes(data, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_raw_u32(data: &[u8], offset: &mut usize) -> Result<u32> {
    let bytes = read_raw_bytes(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_raw_bytes<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    let start = *offset;
    let end = start + len;
    let slice = data.get(start..end).context("class file out of bounds")?;
    *offset = end;
    Ok(slice)
}

fn skip_raw(data: &[u8], offset: &mut usize, len: usize) -> Result<()> {
    read_raw_bytes(data, offset, len)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Hand-assembled class files for tests that need real bytes on disk.

    /// A minimal abstract class `Demo` extending `java/lang/Object` with one
    /// public method `run()V` whose body is a bare `return`.
    pub(crate) fn minimal_class() -> Vec<u8> {
        minimal_class_with_body(0x0421, &[crate::opcodes::RETURN])
    }

    /// Build a one-method class with the given class access flags and body.
    pub(crate) fn minimal_class_with_body(class_flags: u16, body: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes()); // minor
        data.extend_from_slice(&52u16.to_be_bytes()); // major (Java 8)

        // Constant pool: 1 Utf8 "java/lang/Object", 2 Class #1, 3 Utf8 "Demo",
        // 4 Class #3, 5 Utf8 "run", 6 Utf8 "()V", 7 Utf8 "Code".
        data.extend_from_slice(&8u16.to_be_bytes());
        push_utf8(&mut data, "java/lang/Object");
        push_class(&mut data, 1);
        push_utf8(&mut data, "Demo");
        push_class(&mut data, 3);
        push_utf8(&mut data, "run");
        push_utf8(&mut data, "()V");
        push_utf8(&mut data, "Code");

        data.extend_from_slice(&class_flags.to_be_bytes());
        data.extend_from_slice(&4u16.to_be_bytes()); // this_class
        data.extend_from_slice(&2u16.to_be_bytes()); // super_class
        data.extend_from_slice(&0u16.to_be_bytes()); // interfaces
        data.extend_from_slice(&0u16.to_be_bytes()); // fields

        data.extend_from_slice(&1u16.to_be_bytes()); // methods
        data.extend_from_slice(&0x0001u16.to_be_bytes()); // ACC_PUBLIC
        data.extend_from_slice(&5u16.to_be_bytes()); // name "run"
        data.extend_from_slice(&6u16.to_be_bytes()); // descriptor "()V"
        data.extend_from_slice(&1u16.to_be_bytes()); // one attribute: Code
        data.extend_from_slice(&7u16.to_be_bytes());
        let code_length = 12 + body.len() as u32;
        data.extend_from_slice(&code_length.to_be_bytes());
        data.extend_from_slice(&2u16.to_be_bytes()); // max_stack
        data.extend_from_slice(&1u16.to_be_bytes()); // max_locals
        data.extend_from_slice(&(body.len() as u32).to_be_bytes());
        data.extend_from_slice(body);
        data.extend_from_slice(&0u16.to_be_bytes()); // exception table
        data.extend_from_slice(&0u16.to_be_bytes()); // code attributes

        data.extend_from_slice(&0u16.to_be_bytes()); // class attributes
        data
    }

    fn push_utf8(data: &mut Vec<u8>, value: &str) {
        data.push(1);
        data.extend_from_slice(&(value.len() as u16).to_be_bytes());
        data.extend_from_slice(value.as_bytes());
    }

    fn push_class(data: &mut Vec<u8>, name_index: u16) {
        data.push(7);
        data.extend_from_slice(&name_index.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_inputs_rejects_invalid_class_file() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let class_path = temp_dir.path().join("bad.class");
        fs::write(&class_path, b"nope").expect("write test class");

        let result = scan_inputs(&class_path, &[]);

        assert!(result.is_err());
    }

    #[test]
    fn scan_inputs_accepts_minimal_class_file() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let class_path = temp_dir.path().join("Demo.class");
        fs::write(&class_path, fixtures::minimal_class()).expect("write test class");

        let result = scan_inputs(&class_path, &[]).expect("scan class");

        assert_eq!(1, result.class_count);
        assert_eq!(1, result.artifacts.len());
        assert_eq!(1, result.classes.len());
        let class = &result.classes[0];
        assert_eq!("Demo", class.name);
        assert_eq!(Some("java/lang/Object"), class.super_name.as_deref());
        assert!(class.access.is_abstract);
        assert_eq!(1, class.methods.len());
        let method = &class.methods[0];
        assert_eq!("run", method.name);
        assert_eq!(1, method.instructions.len());
        assert_eq!(opcodes::RETURN, method.instructions[0].opcode);
    }

    #[test]
    fn classpath_classes_are_not_analysis_targets() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let input = temp_dir.path().join("Demo.class");
        fs::write(&input, fixtures::minimal_class()).expect("write input class");
        let dep_dir = temp_dir.path().join("deps");
        fs::create_dir_all(&dep_dir).expect("create deps dir");
        let dep = dep_dir.join("Dep.class");
        fs::write(&dep, fixtures::minimal_class()).expect("write dep class");

        let result = scan_inputs(&input, &[dep_dir.clone()]).expect("scan with classpath");

        assert_eq!(1, result.classes.len());
        assert_eq!(1, result.classpath_classes.len());
        assert_eq!(2, result.class_count);
    }

    #[test]
    fn decode_handles_branches_and_locals() {
        let code = vec![
            opcodes::ILOAD_1,
            opcodes::IFEQ,
            0x00,
            0x04,
            opcodes::ICONST_0,
            opcodes::RETURN,
        ];
        let instructions =
            decode_bytecode(&code, &[], &std::collections::BTreeMap::new()).expect("decode");

        assert_eq!(4, instructions.len());
        assert_eq!(Operand::Local(1), instructions[0].operand);
        assert_eq!(Operand::Branch(4), instructions[1].operand);
        assert_eq!(1, instructions[1].offset);
        assert_eq!(5, instructions[3].offset);
    }

    #[test]
    fn decode_reports_truncated_bytecode() {
        // bipush with the immediate byte missing
        let code = vec![opcodes::BIPUSH];
        let result = decode_bytecode(&code, &[], &std::collections::BTreeMap::new());

        assert!(result.is_err());
    }

    #[test]
    fn raw_class_info_reads_flags() {
        let data = fixtures::minimal_class();
        let raw = raw_class_info(&data).expect("raw class info");

        assert_eq!(0x0421, raw.class_flags);
        assert_eq!(vec![0x0001], raw.method_flags);
        assert!(raw.field_flags.is_empty());
        assert!(raw.numeric_constants.is_empty());
    }
}
