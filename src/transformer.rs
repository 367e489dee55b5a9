//! Per-field value coercion.

use std::fmt;

use crate::params::CanonicalParameterSet;
use crate::rules::{TransformKind, ValueRules};

/// A value that could not be coerced. The field keeps its original value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercionError {
    pub key: String,
    pub kind: TransformKind,
    pub value: String,
}

impl fmt::Display for CoercionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Coercion error: cannot convert '{}' = '{}' to {}",
            self.key,
            self.value,
            self.kind.as_str()
        )
    }
}

impl std::error::Error for CoercionError {}

/// Applies the value-transform table to parameter sets.
///
/// Keys without a rule pass through, rules for absent keys are ignored and
/// null values are never touched.
#[derive(Debug, Clone, Default)]
pub struct FieldValueTransformer {
    rules: ValueRules,
}

impl FieldValueTransformer {
    pub fn new(rules: ValueRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ValueRules {
        &self.rules
    }

    /// Transform `params`, returning the new set and every coercion that
    /// failed. Failures are logged and leave the original value in place.
    pub fn transform(&self, mut params: CanonicalParameterSet) -> (CanonicalParameterSet, Vec<CoercionError>) {
        let mut errors = Vec::new();

        for (key, slot) in params.iter_mut() {
            let (Some(kind), Some(value)) = (self.rules.get(key), slot.as_ref()) else {
                continue;
            };

            match kind.apply(value) {
                Some(coerced) => *slot = Some(coerced),
                None => {
                    let error = CoercionError {
                        key: key.clone(),
                        kind,
                        value: value.clone(),
                    };
                    tracing::warn!("{}", error);
                    errors.push(error);
                }
            }
        }

        (params, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Option<&str>)]) -> CanonicalParameterSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    fn storm_rules() -> ValueRules {
        ValueRules::new()
            .with_rule("forcing.stormnumber", TransformKind::Integer)
            .with_rule("storm", TransformKind::Float)
            .with_rule("stormnumber", TransformKind::String)
            .with_rule("forcing.stormname", TransformKind::Uppercase)
            .with_rule("stormname", TransformKind::Lowercase)
            .with_rule("forcing.tropicalcyclone.stormname", TransformKind::Sentencecase)
    }

    #[test]
    fn test_transform_applies_each_kind() {
        let input = params(&[
            ("forcing.stormnumber", Some("03")),
            ("stormnumber", Some("no_change")),
            ("storm", Some("1.5e10")),
            ("stormname", Some("LOWerCase")),
            ("forcing.stormname", Some("UPPERcase")),
            ("forcing.tropicalcyclone.stormname", Some("sentenceCASE")),
            ("nokey", Some("no_change")),
            ("physical_location", Some("no_change")),
        ]);

        let expected = params(&[
            ("forcing.stormnumber", Some("3")),
            ("stormnumber", Some("no_change")),
            ("storm", Some("15000000000.0")),
            ("stormname", Some("lowercase")),
            ("forcing.stormname", Some("UPPERCASE")),
            ("forcing.tropicalcyclone.stormname", Some("Sentencecase")),
            ("nokey", Some("no_change")),
            ("physical_location", Some("no_change")),
        ]);

        let (output, errors) = FieldValueTransformer::new(storm_rules()).transform(input);

        assert_eq!(output, expected);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_rules_for_missing_fields_insert_nothing() {
        let input = params(&[("physical_location", Some("RENCI"))]);
        let (output, errors) = FieldValueTransformer::new(storm_rules()).transform(input.clone());

        assert_eq!(output, input);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_nulls_pass_through() {
        let input = params(&[("storm", None), ("stormname", None)]);
        let (output, errors) = FieldValueTransformer::new(storm_rules()).transform(input.clone());

        assert_eq!(output, input);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_failed_coercion_keeps_value_and_reports() {
        let input = params(&[
            ("forcing.stormnumber", Some("three")),
            ("storm", Some("1.5e10")),
        ]);
        let (output, errors) = FieldValueTransformer::new(storm_rules()).transform(input);

        assert_eq!(output["forcing.stormnumber"], Some("three".to_string()));
        assert_eq!(output["storm"], Some("15000000000.0".to_string()));
        assert_eq!(
            errors,
            vec![CoercionError {
                key: "forcing.stormnumber".to_string(),
                kind: TransformKind::Integer,
                value: "three".to_string(),
            }]
        );
        assert!(errors[0].to_string().contains("INTEGER"));
    }

    #[test]
    fn test_empty_rules_are_identity() {
        let input = params(&[("stormname", Some("MiXeD")), ("uid", None)]);
        let (output, _) = FieldValueTransformer::default().transform(input.clone());

        assert_eq!(output, input);
    }
}
