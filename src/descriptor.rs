use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

/// Best-effort static type of a symbolic value.
///
/// `Object` carries a JVM internal name (`java/util/Date`) for class types and
/// a full descriptor (`[Ljava/lang/Object;`) for array types.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum JavaType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Object(String),
}

impl JavaType {
    /// Long and double occupy two local slots.
    pub(crate) fn is_category2(&self) -> bool {
        matches!(self, JavaType::Long | JavaType::Double)
    }

    pub(crate) fn object(internal_name: impl Into<String>) -> JavaType {
        JavaType::Object(internal_name.into())
    }
}

/// Parameter and return types of a method descriptor.
#[derive(Clone, Debug)]
pub(crate) struct MethodSummary {
    pub(crate) params: Vec<JavaType>,
    pub(crate) ret: Option<JavaType>,
}

pub(crate) fn method_summary(descriptor: &str) -> Result<MethodSummary> {
    let parsed = MethodDescriptor::from_str(descriptor)
        .with_context(|| format!("invalid method descriptor {descriptor}"))?;
    let params = parsed
        .parameter_types()
        .iter()
        .filter_map(java_type)
        .collect();
    let ret = java_type(parsed.return_type());
    Ok(MethodSummary { params, ret })
}

/// Map a parsed descriptor type to a [`JavaType`]; `None` for void.
pub(crate) fn java_type(descriptor: &TypeDescriptor) -> Option<JavaType> {
    let ty = match descriptor {
        TypeDescriptor::Boolean => JavaType::Boolean,
        TypeDescriptor::Byte => JavaType::Byte,
        TypeDescriptor::Char => JavaType::Char,
        TypeDescriptor::Short => JavaType::Short,
        TypeDescriptor::Integer => JavaType::Int,
        TypeDescriptor::Long => JavaType::Long,
        TypeDescriptor::Float => JavaType::Float,
        TypeDescriptor::Double => JavaType::Double,
        TypeDescriptor::Void => return None,
        TypeDescriptor::Object(name) => JavaType::Object(name.clone()),
        TypeDescriptor::Array(inner, dims) => {
            let mut raw = "[".repeat(*dims as usize);
            raw.push_str(&raw_descriptor(inner));
            JavaType::Object(raw)
        }
    };
    Some(ty)
}

fn raw_descriptor(descriptor: &TypeDescriptor) -> String {
    match descriptor {
        TypeDescriptor::Boolean => "Z".to_string(),
        TypeDescriptor::Byte => "B".to_string(),
        TypeDescriptor::Char => "C".to_string(),
        TypeDescriptor::Short => "S".to_string(),
        TypeDescriptor::Integer => "I".to_string(),
        TypeDescriptor::Long => "J".to_string(),
        TypeDescriptor::Float => "F".to_string(),
        TypeDescriptor::Double => "D".to_string(),
        TypeDescriptor::Void => "V".to_string(),
        TypeDescriptor::Object(name) => format!("L{name};"),
        TypeDescriptor::Array(inner, dims) => {
            let mut raw = "[".repeat(*dims as usize);
            raw.push_str(&raw_descriptor(inner));
            raw
        }
    }
}

/// Interpret a field descriptor without going through the constant pool.
pub(crate) fn field_type(descriptor: &str) -> Option<JavaType> {
    let mut chars = descriptor.chars();
    let ty = match chars.next()? {
        'Z' => JavaType::Boolean,
        'B' => JavaType::Byte,
        'C' => JavaType::Char,
        'S' => JavaType::Short,
        'I' => JavaType::Int,
        'J' => JavaType::Long,
        'F' => JavaType::Float,
        'D' => JavaType::Double,
        'L' => {
            let name: String = chars.collect();
            JavaType::Object(name.strip_suffix(';')?.to_string())
        }
        '[' => JavaType::Object(descriptor.to_string()),
        _ => return None,
    };
    Some(ty)
}
