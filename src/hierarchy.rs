//! Type hierarchy oracle over the scanned classes and the auxiliary classpath.
//!
//! Subtype queries answer from the classes actually scanned, a small table of
//! well-known JDK edges, and nothing else. Unresolvable classes make queries
//! answer conservatively (not a subtype) and are collected for a single debug
//! summary instead of a warning per lookup.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use crate::ir::Class;

/// Hierarchy-relevant slice of one class.
#[derive(Clone, Debug)]
pub(crate) struct ClassInfo {
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) is_interface: bool,
    pub(crate) methods: Vec<MethodSignature>,
}

/// Declared method signature, including bodiless (abstract/native) methods.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodSignature {
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

pub(crate) struct TypeHierarchy {
    classes: BTreeMap<String, ClassInfo>,
    missing: RefCell<BTreeSet<String>>,
}

impl TypeHierarchy {
    /// Index the scanned input classes and the auxiliary classpath classes.
    ///
    /// Input classes win on duplicate names, so a stale classpath copy of an
    /// input class never shadows the version under analysis.
    pub(crate) fn build(inputs: &[Class], classpath: &[Class]) -> Self {
        let mut classes = BTreeMap::new();
        for class in classpath.iter().chain(inputs) {
            classes.insert(class.name.clone(), class_info(class));
        }
        TypeHierarchy {
            classes,
            missing: RefCell::new(BTreeSet::new()),
        }
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<&ClassInfo> {
        let info = self.classes.get(name);
        if info.is_none() && name != "java/lang/Object" && builtin_super(name).is_none() {
            self.missing.borrow_mut().insert(name.to_string());
        }
        info
    }

    /// Whether `name` is `supertype` or inherits from it, classes and
    /// interfaces alike. Answers `false` when the chain leaves the known
    /// classes.
    pub(crate) fn is_subtype(&self, name: &str, supertype: &str) -> bool {
        if supertype == "java/lang/Object" {
            return true;
        }
        let mut pending = vec![name.to_string()];
        let mut visited = BTreeSet::new();
        while let Some(current) = pending.pop() {
            if current == supertype {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(info) = self.resolve(&current) {
                if let Some(super_name) = &info.super_name {
                    pending.push(super_name.clone());
                }
                pending.extend(info.interfaces.iter().cloned());
            } else if let Some(super_name) = builtin_super(&current) {
                pending.push(super_name.to_string());
            }
        }
        false
    }

    pub(crate) fn implements_interface(&self, name: &str, interface: &str) -> bool {
        name != interface && self.is_subtype(name, interface)
    }

    /// Whether any interface implemented by `class_name` (transitively, and
    /// through superclasses) declares the given method.
    pub(crate) fn interface_declares(
        &self,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
    ) -> bool {
        let mut pending = vec![class_name.to_string()];
        let mut visited = BTreeSet::new();
        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(info) = self.resolve(&current) else {
                continue;
            };
            if info.is_interface
                && info
                    .methods
                    .iter()
                    .any(|sig| sig.name == method_name && sig.descriptor == descriptor)
            {
                return true;
            }
            if let Some(super_name) = &info.super_name {
                pending.push(super_name.clone());
            }
            pending.extend(info.interfaces.iter().cloned());
        }
        false
    }

    /// Classes referenced by queries but absent from the scan; logged once by
    /// the driver after the run.
    pub(crate) fn missing_classes(&self) -> Vec<String> {
        self.missing.borrow().iter().cloned().collect()
    }
}

fn class_info(class: &Class) -> ClassInfo {
    ClassInfo {
        super_name: class.super_name.clone(),
        interfaces: class.interfaces.clone(),
        is_interface: class.access.is_interface,
        methods: class
            .methods
            .iter()
            .map(|method| MethodSignature {
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
            })
            .collect(),
    }
}

/// Superclass edges for JDK classes the rules care about, since the JDK is
/// normally not part of the scan.
fn builtin_super(name: &str) -> Option<&'static str> {
    match name {
        "java/lang/Exception" | "java/lang/Error" => Some("java/lang/Throwable"),
        "java/lang/Throwable" => Some("java/lang/Object"),
        "java/lang/RuntimeException" => Some("java/lang/Exception"),
        "java/lang/ArithmeticException"
        | "java/lang/ClassCastException"
        | "java/lang/IllegalArgumentException"
        | "java/lang/IllegalStateException"
        | "java/lang/IndexOutOfBoundsException"
        | "java/lang/NullPointerException"
        | "java/lang/UnsupportedOperationException" => Some("java/lang/RuntimeException"),
        "java/io/IOException" => Some("java/lang/Exception"),
        "java/io/FileNotFoundException" => Some("java/io/IOException"),
        "java/sql/Timestamp" | "java/sql/Date" | "java/sql/Time" => Some("java/util/Date"),
        "java/util/Date" => Some("java/lang/Object"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ClassAccess, Method, MethodAccess};

    fn class(name: &str, super_name: Option<&str>, interfaces: &[&str]) -> Class {
        Class {
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
            access: ClassAccess::default(),
            fields: Vec::new(),
            methods: Vec::new(),
            artifact_index: 0,
        }
    }

    fn interface_with_method(name: &str, method_name: &str, descriptor: &str) -> Class {
        let mut class = class(name, Some("java/lang/Object"), &[]);
        class.access.is_interface = true;
        class.methods.push(Method {
            name: method_name.to_string(),
            descriptor: descriptor.to_string(),
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
        class
    }

    #[test]
    fn subtype_walks_scanned_superclass_chain() {
        let inputs = vec![
            class("com/example/Base", Some("java/lang/Object"), &[]),
            class("com/example/Middle", Some("com/example/Base"), &[]),
            class("com/example/Leaf", Some("com/example/Middle"), &[]),
        ];
        let hierarchy = TypeHierarchy::build(&inputs, &[]);

        assert!(hierarchy.is_subtype("com/example/Leaf", "com/example/Base"));
        assert!(!hierarchy.is_subtype("com/example/Base", "com/example/Leaf"));
    }

    #[test]
    fn everything_is_a_subtype_of_object() {
        let hierarchy = TypeHierarchy::build(&[], &[]);

        assert!(hierarchy.is_subtype("com/example/Unknown", "java/lang/Object"));
    }

    #[test]
    fn builtin_edges_cover_jdk_exceptions() {
        let hierarchy = TypeHierarchy::build(&[], &[]);

        assert!(hierarchy.is_subtype(
            "java/lang/UnsupportedOperationException",
            "java/lang/Exception"
        ));
        assert!(hierarchy.is_subtype("java/sql/Timestamp", "java/util/Date"));
        assert!(!hierarchy.is_subtype("java/lang/Error", "java/lang/Exception"));
    }

    #[test]
    fn custom_exception_chains_into_builtin_edges() {
        let inputs = vec![class(
            "com/example/AppException",
            Some("java/lang/IllegalStateException"),
            &[],
        )];
        let hierarchy = TypeHierarchy::build(&inputs, &[]);

        assert!(hierarchy.is_subtype("com/example/AppException", "java/lang/Exception"));
    }

    #[test]
    fn interface_implementations_are_transitive() {
        let inputs = vec![
            interface_with_method("com/example/Task", "run", "()V"),
            class("com/example/Base", Some("java/lang/Object"), &["com/example/Task"]),
            class("com/example/Impl", Some("com/example/Base"), &[]),
        ];
        let hierarchy = TypeHierarchy::build(&inputs, &[]);

        assert!(hierarchy.implements_interface("com/example/Impl", "com/example/Task"));
        assert!(hierarchy.interface_declares("com/example/Impl", "run", "()V"));
        assert!(!hierarchy.interface_declares("com/example/Impl", "run", "(I)V"));
    }

    #[test]
    fn unresolved_classes_are_collected_not_fatal() {
        let hierarchy = TypeHierarchy::build(&[], &[]);

        assert!(!hierarchy.is_subtype("com/example/Gone", "java/util/Date"));
        assert_eq!(vec!["com/example/Gone".to_string()], hierarchy.missing_classes());
    }

    #[test]
    fn input_classes_shadow_classpath_duplicates() {
        let inputs = vec![class("com/example/Dup", Some("com/example/NewBase"), &[])];
        let classpath = vec![class("com/example/Dup", Some("com/example/OldBase"), &[])];
        let hierarchy = TypeHierarchy::build(&inputs, &classpath);

        let info = hierarchy.resolve("com/example/Dup").expect("resolved");
        assert_eq!(Some("com/example/NewBase".to_string()), info.super_name);
    }
}
