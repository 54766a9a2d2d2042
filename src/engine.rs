//! Analysis driver: runs every registered detector over every scanned method.
//!
//! The driver owns the two-phase instruction loop: detectors observe the
//! pre-effect stack in `on_instruction`, the stack effect is applied, then
//! detectors may tag freshly pushed values in `after_instruction`. Errors are
//! recovered at single-method granularity; a detector that raises an engine
//! error is deactivated for the rest of the method, a stack simulation error
//! abandons the method for all detectors.

use serde_sarif::sarif::{ReportingDescriptor, Result as SarifResult, ResultLevel};

use crate::hierarchy::TypeHierarchy;
use crate::ir::{Class, Instruction, Method};
use crate::rules::{self, Detector, Verdict};
use crate::scan::ScanOutput;
use crate::stack::SymbolicStack;
use crate::stream::InstructionStream;

/// Finding severity, mapped to the SARIF `level` at the reporting boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Severity {
    Low,
    Normal,
    High,
}

impl Severity {
    fn sarif_level(self) -> ResultLevel {
        match self {
            Severity::Low => ResultLevel::Note,
            Severity::Normal => ResultLevel::Warning,
            Severity::High => ResultLevel::Error,
        }
    }
}

/// One reported anti-pattern occurrence.
///
/// `method_name`/`descriptor`/`pc` are absent for class-level findings.
#[derive(Clone, Debug)]
pub(crate) struct Finding {
    pub(crate) rule_id: &'static str,
    pub(crate) severity: Severity,
    pub(crate) class_name: String,
    pub(crate) method_name: Option<String>,
    pub(crate) descriptor: Option<String>,
    pub(crate) pc: Option<u32>,
    pub(crate) line: Option<u32>,
    pub(crate) message: String,
}

/// Per-method view handed to detector start/end hooks.
pub(crate) struct MethodContext<'a> {
    pub(crate) class: &'a Class,
    pub(crate) method: &'a Method,
    pub(crate) hierarchy: &'a TypeHierarchy,
}

impl MethodContext<'_> {
    pub(crate) fn finding(
        &self,
        rule_id: &'static str,
        severity: Severity,
        pc: u32,
        message: String,
    ) -> Finding {
        Finding {
            rule_id,
            severity,
            class_name: self.class.name.clone(),
            method_name: Some(self.method.name.clone()),
            descriptor: Some(self.method.descriptor.clone()),
            pc: Some(pc),
            line: self.method.line_for_pc(pc),
            message,
        }
    }
}

/// Per-instruction view handed to detector instruction hooks.
///
/// In `on_instruction` the stack holds the state *before* this instruction's
/// effect; in `after_instruction` the state after it.
pub(crate) struct InstructionContext<'a, 'b> {
    pub(crate) class: &'a Class,
    pub(crate) method: &'a Method,
    pub(crate) insn: &'a Instruction,
    /// Cursor positioned at `insn`; rules read operands through its typed
    /// accessors.
    pub(crate) stream: &'b InstructionStream<'a>,
    pub(crate) stack: &'b mut SymbolicStack,
    pub(crate) hierarchy: &'a TypeHierarchy,
}

impl InstructionContext<'_, '_> {
    pub(crate) fn finding(
        &self,
        rule_id: &'static str,
        severity: Severity,
        message: String,
    ) -> Finding {
        MethodContext {
            class: self.class,
            method: self.method,
            hierarchy: self.hierarchy,
        }
        .finding(rule_id, severity, self.insn.offset, message)
    }
}

/// Classes under analysis plus the hierarchy oracle built over them.
pub(crate) struct AnalysisContext {
    pub(crate) classes: Vec<Class>,
    pub(crate) hierarchy: TypeHierarchy,
}

/// Index the scan output for analysis. Classes are sorted by name so the
/// emitted results are deterministic regardless of input walk order.
pub(crate) fn build_context(scan: &ScanOutput) -> AnalysisContext {
    let hierarchy = TypeHierarchy::build(&scan.classes, &scan.classpath_classes);
    let mut classes = scan.classes.clone();
    classes.sort_by(|a, b| a.name.cmp(&b.name));
    AnalysisContext { classes, hierarchy }
}

pub(crate) struct Engine;

impl Engine {
    pub(crate) fn new() -> Self {
        Engine
    }

    /// Reporting descriptors for `tool.driver.rules`, in registry order.
    pub(crate) fn rule_descriptors(&self) -> Vec<ReportingDescriptor> {
        rules::all_detectors()
            .iter()
            .map(|detector| detector.metadata().descriptor())
            .collect()
    }

    /// Run every detector over every class and return SARIF results.
    pub(crate) fn analyze(&self, context: &AnalysisContext) -> Vec<SarifResult> {
        let mut findings = Vec::new();
        for class in &context.classes {
            // Fresh detector instances per class; no state leaks across classes.
            let mut detectors = rules::all_detectors();
            findings.extend(scan_class(class, &context.hierarchy, &mut detectors));
        }
        for name in context.hierarchy.missing_classes() {
            log::debug!("class not found on scan path: {name}");
        }
        findings.iter().map(finding_to_result).collect()
    }
}

fn scan_class(
    class: &Class,
    hierarchy: &TypeHierarchy,
    detectors: &mut [Box<dyn Detector>],
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for detector in detectors.iter_mut() {
        detector.on_class_start(class);
    }
    let mut stack = SymbolicStack::new();
    for method in &class.methods {
        if method.instructions.is_empty() {
            continue;
        }
        scan_method(class, method, hierarchy, detectors, &mut stack, &mut findings);
    }
    for detector in detectors.iter_mut() {
        findings.extend(detector.on_class_end(class));
    }
    findings
}

fn scan_method(
    class: &Class,
    method: &Method,
    hierarchy: &TypeHierarchy,
    detectors: &mut [Box<dyn Detector>],
    stack: &mut SymbolicStack,
    findings: &mut Vec<Finding>,
) {
    let method_context = MethodContext {
        class,
        method,
        hierarchy,
    };
    let mut active: Vec<bool> = detectors
        .iter_mut()
        .map(|detector| detector.on_method_start(&method_context))
        .collect();
    if active.iter().all(|enabled| !enabled) {
        return;
    }

    stack.reset_for_method_entry(&class.name, method);
    let mut stream = InstructionStream::new(&method.instructions);
    let mut current = stream.current();
    while let Some(insn) = current {
        for (index, detector) in detectors.iter_mut().enumerate() {
            if !active[index] {
                continue;
            }
            let mut context = InstructionContext {
                class,
                method,
                insn,
                stream: &stream,
                stack: &mut *stack,
                hierarchy,
            };
            match detector.on_instruction(&mut context) {
                Ok(Verdict::Continue) => {}
                Ok(Verdict::SkipMethod) => active[index] = false,
                Ok(Verdict::Report(finding)) => findings.push(finding),
                Err(err) => {
                    log::debug!(
                        "rule {} deactivated in {}.{}{}: {err}",
                        detector.metadata().id,
                        class.name,
                        method.name,
                        method.descriptor
                    );
                    active[index] = false;
                }
            }
        }
        if let Err(err) = stack.execute(insn) {
            // Simulation can no longer be trusted; findings collected so far
            // in this method are kept, buffered candidates are dropped.
            log::debug!(
                "abandoning {}.{}{} at pc {}: {err}",
                class.name,
                method.name,
                method.descriptor,
                insn.offset
            );
            return;
        }
        for (index, detector) in detectors.iter_mut().enumerate() {
            if !active[index] {
                continue;
            }
            let mut context = InstructionContext {
                class,
                method,
                insn,
                stream: &stream,
                stack: &mut *stack,
                hierarchy,
            };
            detector.after_instruction(&mut context);
        }
        current = stream.advance().ok();
    }
    for (index, detector) in detectors.iter_mut().enumerate() {
        if active[index] {
            findings.extend(detector.on_method_end(&method_context));
        }
    }
}

fn finding_to_result(finding: &Finding) -> SarifResult {
    let location = match (&finding.method_name, &finding.descriptor) {
        (Some(method_name), Some(descriptor)) => {
            rules::method_location(&finding.class_name, method_name, descriptor)
        }
        _ => rules::class_location(&finding.class_name),
    };
    SarifResult::builder()
        .rule_id(finding.rule_id)
        .level(finding.severity.sarif_level())
        .message(rules::result_message(finding.message.clone()))
        .locations(vec![location])
        .build()
}

#[cfg(test)]
pub(crate) fn context_for(classes: Vec<Class>) -> AnalysisContext {
    let hierarchy = TypeHierarchy::build(&classes, &[]);
    let mut sorted = classes;
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    AnalysisContext {
        classes: sorted,
        hierarchy,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::scan::parse_class_bytes;

    #[test]
    fn analyze_reports_nothing_for_a_trivial_class() {
        let class = parse_class_bytes(&crate::scan::fixtures::minimal_class(), 0)
            .map(|mut class| {
                // A lone return in a concrete class is not a finding.
                class.access.is_abstract = false;
                class
            })
            .expect("parse fixture");
        let context = context_for(vec![class]);

        let results = Engine::new().analyze(&context);

        assert!(results.is_empty());
    }

    #[test]
    fn rule_descriptors_cover_the_registry() {
        let descriptors = Engine::new().rule_descriptors();

        assert_eq!(crate::rules::all_detectors().len(), descriptors.len());
        assert!(descriptors.iter().all(|rule| !rule.id.is_empty()));
    }

    #[test]
    fn severity_maps_to_sarif_levels() {
        let levels: Vec<_> = [Severity::Low, Severity::Normal, Severity::High]
            .into_iter()
            .map(|severity| serde_json::to_value(severity.sarif_level()).expect("serialize level"))
            .collect();

        assert_eq!(vec![json!("note"), json!("warning"), json!("error")], levels);
    }

    #[test]
    fn class_level_findings_use_a_type_location() {
        let finding = Finding {
            rule_id: "EXAMPLE",
            severity: Severity::Low,
            class_name: "com/example/App".to_string(),
            method_name: None,
            descriptor: None,
            pc: None,
            line: None,
            message: "example".to_string(),
        };

        let result = finding_to_result(&finding);
        let value = serde_json::to_value(&result).expect("serialize result");

        assert_eq!(value["ruleId"], "EXAMPLE");
        assert_eq!(value["level"], "note");
        assert_eq!(
            value["locations"][0]["logicalLocations"][0]["kind"],
            "type"
        );
    }
}
