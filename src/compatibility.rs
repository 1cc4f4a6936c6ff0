//! Schema compatibility checking
//!
//! Structural diff of record field lists, judged under a compatibility mode.
//! Runs strictly before a candidate reaches the registry, so a rejected body
//! never consumes a sequential id.
//!
//! Rules:
//! - removing a field without a default breaks backward compatibility
//! - narrowing a field type breaks backward compatibility
//! - adding a field without a default breaks forward compatibility
//! - widening a field type breaks forward compatibility
//! - any other type change breaks both

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

use crate::error::{ForgeError, Result, Violation};
use crate::schema::SchemaBody;

/// Policy governing which changes are admissible across versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityMode {
    /// No compatibility checking
    None,
    /// Every field the latest version carries stays readable: none removed
    /// without a default, none narrowed
    #[default]
    Backward,
    /// Like `Backward`, against every registered version
    BackwardTransitive,
    /// Every field the new version adds can be filled in for older records:
    /// none added without a default, none widened
    Forward,
    /// Like `Forward`, against every registered version
    ForwardTransitive,
    /// Both backward and forward
    Full,
    /// Both, against every registered version
    FullTransitive,
}

impl CompatibilityMode {
    pub fn checks_backward(self) -> bool {
        matches!(
            self,
            CompatibilityMode::Backward
                | CompatibilityMode::BackwardTransitive
                | CompatibilityMode::Full
                | CompatibilityMode::FullTransitive
        )
    }

    pub fn checks_forward(self) -> bool {
        matches!(
            self,
            CompatibilityMode::Forward
                | CompatibilityMode::ForwardTransitive
                | CompatibilityMode::Full
                | CompatibilityMode::FullTransitive
        )
    }

    pub fn is_transitive(self) -> bool {
        matches!(
            self,
            CompatibilityMode::BackwardTransitive
                | CompatibilityMode::ForwardTransitive
                | CompatibilityMode::FullTransitive
        )
    }

    fn enforces(self, direction: Direction) -> bool {
        match direction {
            Direction::Backward => self.checks_backward(),
            Direction::Forward => self.checks_forward(),
        }
    }
}

impl fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompatibilityMode::None => "none",
            CompatibilityMode::Backward => "backward",
            CompatibilityMode::BackwardTransitive => "backward_transitive",
            CompatibilityMode::Forward => "forward",
            CompatibilityMode::ForwardTransitive => "forward_transitive",
            CompatibilityMode::Full => "full",
            CompatibilityMode::FullTransitive => "full_transitive",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for CompatibilityMode {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(CompatibilityMode::None),
            "backward" => Ok(CompatibilityMode::Backward),
            "backward_transitive" => Ok(CompatibilityMode::BackwardTransitive),
            "forward" => Ok(CompatibilityMode::Forward),
            "forward_transitive" => Ok(CompatibilityMode::ForwardTransitive),
            "full" => Ok(CompatibilityMode::Full),
            "full_transitive" => Ok(CompatibilityMode::FullTransitive),
            other => Err(ForgeError::Config(format!(
                "unknown compatibility mode '{}'",
                other
            ))),
        }
    }
}

/// Which side of a schema change a reader sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// New reader, old data
    Backward,
    /// Old reader, new data
    Forward,
}

/// Type of schema change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    FieldAdded,
    FieldRemoved,
    /// Promotion the old type can be read as (e.g. int -> long)
    TypeWidened,
    /// Reverse of a promotion (e.g. long -> int)
    TypeNarrowed,
    /// Unrelated type change
    TypeChanged,
    DefaultChanged,
    DocumentationChanged,
}

/// A detected change to one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub change_type: ChangeType,
    pub field: String,
    pub old_type: Option<String>,
    pub new_type: Option<String>,
    /// Directions this change breaks, regardless of mode
    pub breaks: Vec<Direction>,
    pub description: String,
}

impl FieldChange {
    pub fn is_breaking_under(&self, mode: CompatibilityMode) -> bool {
        self.breaks.iter().any(|d| mode.enforces(*d))
    }
}

/// Result of a compatibility check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub mode: CompatibilityMode,
    pub is_compatible: bool,
    /// Every change found, breaking or not
    pub changes: Vec<FieldChange>,
    /// Changes the mode refuses
    pub violations: Vec<FieldChange>,
    pub summary: String,
}

impl CompatibilityResult {
    fn from_changes(mode: CompatibilityMode, changes: Vec<FieldChange>) -> Self {
        let violations: Vec<FieldChange> = changes
            .iter()
            .filter(|c| c.is_breaking_under(mode))
            .cloned()
            .collect();
        let summary = if !violations.is_empty() {
            format!("{} breaking changes under {} compatibility", violations.len(), mode)
        } else if changes.is_empty() {
            "No changes detected".to_string()
        } else {
            format!("{} compatible changes detected", changes.len())
        };
        Self {
            mode,
            is_compatible: violations.is_empty(),
            changes,
            violations,
            summary,
        }
    }

    /// Field-level violations in error form
    pub fn violation_list(&self) -> Vec<Violation> {
        self.violations
            .iter()
            .map(|c| Violation {
                field: c.field.clone(),
                reason: c.description.clone(),
            })
            .collect()
    }
}

/// Compatibility checker for schema versions
pub struct CompatibilityChecker {
    mode: CompatibilityMode,
}

impl CompatibilityChecker {
    pub fn new(mode: CompatibilityMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> CompatibilityMode {
        self.mode
    }

    /// Check a candidate against one existing version
    pub fn check(&self, existing: &SchemaBody, candidate: &SchemaBody) -> CompatibilityResult {
        if self.mode == CompatibilityMode::None {
            return CompatibilityResult::from_changes(self.mode, Vec::new());
        }
        CompatibilityResult::from_changes(self.mode, detect_changes(existing, candidate))
    }

    /// Check a candidate against a subject's history (oldest first).
    ///
    /// Non-transitive modes only look at the latest entry; an empty history
    /// (first registration) is always compatible.
    pub fn check_history(&self, history: &[SchemaBody], candidate: &SchemaBody) -> CompatibilityResult {
        let against: &[SchemaBody] = if self.mode.is_transitive() {
            history
        } else {
            match history.last() {
                Some(_) => &history[history.len() - 1..],
                None => &[],
            }
        };

        let mut changes: Vec<FieldChange> = Vec::new();
        for existing in against {
            for change in self.check(existing, candidate).changes {
                if !changes.contains(&change) {
                    changes.push(change);
                }
            }
        }
        CompatibilityResult::from_changes(self.mode, changes)
    }

    /// Refuse a candidate the mode does not admit
    pub fn admit(&self, subject: &str, history: &[SchemaBody], candidate: &SchemaBody) -> Result<CompatibilityResult> {
        let result = self.check_history(history, candidate);
        if result.is_compatible {
            Ok(result)
        } else {
            Err(ForgeError::IncompatibleSchema {
                subject: subject.to_string(),
                violations: result.violation_list(),
            })
        }
    }
}

/// Field-by-field structural diff, in field order
pub fn detect_changes(old: &SchemaBody, new: &SchemaBody) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    for old_field in old.fields() {
        if new.field(&old_field.name).is_none() {
            let required = !old_field.has_default();
            changes.push(FieldChange {
                change_type: ChangeType::FieldRemoved,
                field: old_field.name.clone(),
                old_type: Some(old_field.field_type.to_string()),
                new_type: None,
                breaks: if required { vec![Direction::Backward] } else { Vec::new() },
                description: if required {
                    format!("required field '{}' was removed", old_field.name)
                } else {
                    format!("field '{}' with default was removed", old_field.name)
                },
            });
        }
    }

    for new_field in new.fields() {
        let Some(old_field) = old.field(&new_field.name) else {
            let has_default = new_field.has_default();
            changes.push(FieldChange {
                change_type: ChangeType::FieldAdded,
                field: new_field.name.clone(),
                old_type: None,
                new_type: Some(new_field.field_type.to_string()),
                breaks: if has_default { Vec::new() } else { vec![Direction::Forward] },
                description: if has_default {
                    format!("field '{}' was added with default value", new_field.name)
                } else {
                    format!("field '{}' was added without default", new_field.name)
                },
            });
            continue;
        };

        let old_type = &old_field.field_type;
        let new_type = &new_field.field_type;
        if old_type != new_type {
            let (change_type, breaks, verb) = if old_type.promotes_to(new_type) {
                (ChangeType::TypeWidened, vec![Direction::Forward], "widened")
            } else if new_type.promotes_to(old_type) {
                (ChangeType::TypeNarrowed, vec![Direction::Backward], "narrowed")
            } else {
                (
                    ChangeType::TypeChanged,
                    vec![Direction::Backward, Direction::Forward],
                    "changed",
                )
            };
            changes.push(FieldChange {
                change_type,
                field: new_field.name.clone(),
                old_type: Some(old_type.to_string()),
                new_type: Some(new_type.to_string()),
                breaks,
                description: format!(
                    "field '{}' type {} from {} to {}",
                    new_field.name, verb, old_type, new_type
                ),
            });
        } else if old_field.default != new_field.default {
            changes.push(FieldChange {
                change_type: ChangeType::DefaultChanged,
                field: new_field.name.clone(),
                old_type: Some(old_type.to_string()),
                new_type: Some(new_type.to_string()),
                breaks: Vec::new(),
                description: format!("field '{}' default changed", new_field.name),
            });
        } else if old_field.doc != new_field.doc {
            changes.push(FieldChange {
                change_type: ChangeType::DocumentationChanged,
                field: new_field.name.clone(),
                old_type: None,
                new_type: None,
                breaks: Vec::new(),
                description: format!("field '{}' documentation changed", new_field.name),
            });
        }
    }

    changes
}

/// Line diff of two bodies' pretty JSON, `-`/`+` prefixed
pub fn render_diff(old: &SchemaBody, new: &SchemaBody) -> Result<String> {
    let old_text = old.pretty_json()?;
    let new_text = new.pretty_json()?;
    let diff = TextDiff::from_lines(&old_text, &new_text);

    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        out.push_str(sign);
        out.push_str(change.value());
        if change.missing_newline() {
            out.push('\n');
        }
    }
    Ok(out)
}
