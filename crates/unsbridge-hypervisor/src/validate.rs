use std::collections::HashMap;

use globset::{Glob, GlobMatcher};
use unsbridge_config::{SemanticConfig, ValidationLevel};
use unsbridge_domain::LeafRecord;

use crate::error::HypervisorError;

/// Verdict for one record. At level 1 violations warn, at level 2 they
/// reject; `reject_invalid` decides downstream whether Reject drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Warn(String),
    Reject(String),
}

impl Outcome {
    pub fn is_reject(&self) -> bool {
        matches!(self, Outcome::Reject(_))
    }
}

/// Rule evaluation over the leaf stream: presence of semantic ids for the
/// configured kinds, and per-semantic-id `{min, max, unit, pattern}`
/// constraints.
pub struct Validator {
    config: SemanticConfig,
    patterns: HashMap<String, GlobMatcher>,
}

impl Validator {
    /// Compile the constraint patterns up front so validation is infallible.
    pub fn new(config: SemanticConfig) -> Result<Self, HypervisorError> {
        let mut patterns = HashMap::new();
        for (semantic_id, constraint) in &config.constraints {
            if let Some(pattern) = &constraint.pattern {
                let matcher = Glob::new(pattern)
                    .map_err(|source| HypervisorError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })?
                    .compile_matcher();
                patterns.insert(semantic_id.clone(), matcher);
            }
        }
        Ok(Validator { config, patterns })
    }

    pub fn level(&self) -> ValidationLevel {
        self.config.level
    }

    pub fn reject_invalid(&self) -> bool {
        self.config.reject_invalid
    }

    pub fn validate(&self, record: &LeafRecord) -> Outcome {
        if self.config.level == ValidationLevel::Off {
            return Outcome::Pass;
        }
        match self.first_violation(record) {
            None => Outcome::Pass,
            Some(reason) if self.config.level == ValidationLevel::Warn => Outcome::Warn(reason),
            Some(reason) => Outcome::Reject(reason),
        }
    }

    fn first_violation(&self, record: &LeafRecord) -> Option<String> {
        if self.config.enforce_semantic_ids
            && self.config.required_for_types.contains(&record.kind)
            && record.semantic_id.is_none()
        {
            return Some(format!("{} carries no semantic id", record.kind));
        }

        let semantic_id = record.semantic_id.as_deref()?;
        let constraint = self.config.constraints.get(semantic_id)?;

        if constraint.min.is_some() || constraint.max.is_some() {
            match record.value.as_f64() {
                Some(v) => {
                    if let Some(min) = constraint.min {
                        if v < min {
                            return Some(format!("value {} below minimum {}", v, min));
                        }
                    }
                    if let Some(max) = constraint.max {
                        if v > max {
                            return Some(format!("value {} above maximum {}", v, max));
                        }
                    }
                }
                None => {
                    return Some(format!(
                        "numeric constraint on non-numeric value of type {}",
                        record.value_type
                    ));
                }
            }
        }

        if let Some(expected) = &constraint.unit {
            if record.unit.as_deref() != Some(expected.as_str()) {
                return Some(format!(
                    "unit {:?} does not match expected '{}'",
                    record.unit, expected
                ));
            }
        }

        if let Some(matcher) = self.patterns.get(semantic_id) {
            if let Some(text) = record.value.as_text() {
                if !matcher.is_match(text) {
                    return Some(format!("'{}' does not match the configured pattern", text));
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use unsbridge_config::SemanticConstraint;
    use unsbridge_domain::{AssetUri, LeafKind, LeafValue};

    fn record(semantic_id: Option<&str>, value: LeafValue, unit: Option<&str>) -> LeafRecord {
        LeafRecord {
            asset_uri: AssetUri::new("urn:a"),
            submodel_id: "urn:sm".into(),
            submodel_id_short: "SM".into(),
            path: vec!["X".into()],
            kind: LeafKind::Property,
            value,
            value_type: "xs:double".into(),
            semantic_id: semantic_id.map(String::from),
            unit: unit.map(String::from),
            source_timestamp_ms: 0,
            origin_uri: "file:///x".into(),
        }
    }

    fn config(level: ValidationLevel) -> SemanticConfig {
        let mut constraints = HashMap::new();
        constraints.insert(
            "temp".to_string(),
            SemanticConstraint {
                min: Some(-40.0),
                max: Some(180.0),
                unit: Some("degC".into()),
                pattern: None,
            },
        );
        constraints.insert(
            "serial".to_string(),
            SemanticConstraint {
                pattern: Some("AB*".into()),
                ..Default::default()
            },
        );
        SemanticConfig {
            level,
            enforce_semantic_ids: true,
            required_for_types: vec![LeafKind::Property],
            reject_invalid: true,
            constraints,
        }
    }

    #[test]
    fn level_zero_passes_everything() {
        let v = Validator::new(config(ValidationLevel::Off)).unwrap();
        assert_eq!(v.validate(&record(None, LeafValue::Float(1.0), None)), Outcome::Pass);
    }

    #[test]
    fn missing_semantic_id_flags_required_kinds() {
        let v = Validator::new(config(ValidationLevel::Warn)).unwrap();
        assert!(matches!(
            v.validate(&record(None, LeafValue::Float(1.0), None)),
            Outcome::Warn(_)
        ));
        let v = Validator::new(config(ValidationLevel::Enforce)).unwrap();
        assert!(v.validate(&record(None, LeafValue::Float(1.0), None)).is_reject());
    }

    #[test]
    fn range_constraint_enforced() {
        let v = Validator::new(config(ValidationLevel::Enforce)).unwrap();
        assert_eq!(
            v.validate(&record(Some("temp"), LeafValue::Float(25.5), Some("degC"))),
            Outcome::Pass
        );
        assert!(v
            .validate(&record(Some("temp"), LeafValue::Float(200.0), Some("degC")))
            .is_reject());
        assert!(v
            .validate(&record(Some("temp"), LeafValue::Float(-100.0), Some("degC")))
            .is_reject());
    }

    #[test]
    fn numeric_constraint_rejects_text_value() {
        let v = Validator::new(config(ValidationLevel::Enforce)).unwrap();
        assert!(v
            .validate(&record(Some("temp"), LeafValue::Text("hot".into()), Some("degC")))
            .is_reject());
    }

    #[test]
    fn unit_mismatch_flags() {
        let v = Validator::new(config(ValidationLevel::Enforce)).unwrap();
        assert!(v
            .validate(&record(Some("temp"), LeafValue::Float(20.0), Some("degF")))
            .is_reject());
    }

    #[test]
    fn pattern_applies_to_text() {
        let v = Validator::new(config(ValidationLevel::Enforce)).unwrap();
        assert_eq!(
            v.validate(&record(Some("serial"), LeafValue::Text("AB123".into()), None)),
            Outcome::Pass
        );
        assert!(v
            .validate(&record(Some("serial"), LeafValue::Text("XY123".into()), None))
            .is_reject());
    }

    #[test]
    fn unconstrained_semantic_id_passes() {
        let v = Validator::new(config(ValidationLevel::Enforce)).unwrap();
        assert_eq!(
            v.validate(&record(Some("other"), LeafValue::Float(9.9), None)),
            Outcome::Pass
        );
    }
}
