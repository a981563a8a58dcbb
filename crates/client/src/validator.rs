//! Pluggable pre-submission parameter checks.

use std::fmt;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Blocks the submission.
    Error,
    /// Logged; the submission proceeds.
    Warning,
}

/// One finding about a parameter object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// Location within the parameters, e.g. `steps.resize.robot`.
    pub path: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            path: None,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path: None,
            message: message.into(),
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{path}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Inspects assembly parameters before anything is sent.
pub trait ParamsValidator: Send + Sync {
    fn validate(&self, params: &Value) -> Vec<ValidationIssue>;
}

/// Checks the parameter shape the API requires: an object whose `steps`,
/// if present, is an object of objects each naming a `robot` or `use`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructureValidator;

impl ParamsValidator for StructureValidator {
    fn validate(&self, params: &Value) -> Vec<ValidationIssue> {
        let Some(map) = params.as_object() else {
            return vec![ValidationIssue::error("params must be a JSON object")];
        };

        let mut issues = Vec::new();
        match map.get("steps") {
            None => {
                if !map.contains_key("template_id") {
                    issues.push(ValidationIssue::warning(
                        "neither steps nor template_id is set",
                    ));
                }
            }
            Some(Value::Object(steps)) => {
                for (name, step) in steps {
                    let path = format!("steps.{name}");
                    match step.as_object() {
                        None => issues.push(ValidationIssue::error("step must be an object").at(path)),
                        Some(step) if !step.contains_key("robot") && !step.contains_key("use") => {
                            issues.push(
                                ValidationIssue::warning("step names neither robot nor use")
                                    .at(path),
                            );
                        }
                        Some(_) => {}
                    }
                }
            }
            Some(_) => issues.push(ValidationIssue::error("steps must be an object").at("steps")),
        }
        issues
    }
}
