//! Value-transform kinds and the global field → kind table.

use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a single field value is coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransformKind {
    /// Base-10 integer, rendered without leading zeros
    Integer,
    /// Decimal or scientific real, rendered in canonical decimal form
    Float,
    /// Explicitly untransformed
    String,
    Uppercase,
    Lowercase,
    /// First character upper-cased, the rest lower-cased
    Sentencecase,
}

impl TransformKind {
    /// Apply the coercion. Returns `None` when the value cannot be coerced.
    pub fn apply(self, value: &str) -> Option<String> {
        match self {
            TransformKind::Integer => coerce_integer(value),
            TransformKind::Float => coerce_float(value),
            TransformKind::String => Some(value.to_string()),
            TransformKind::Uppercase => Some(value.to_uppercase()),
            TransformKind::Lowercase => Some(value.to_lowercase()),
            TransformKind::Sentencecase => Some(sentence_case(value)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransformKind::Integer => "INTEGER",
            TransformKind::Float => "FLOAT",
            TransformKind::String => "STRING",
            TransformKind::Uppercase => "UPPERCASE",
            TransformKind::Lowercase => "LOWERCASE",
            TransformKind::Sentencecase => "SENTENCECASE",
        }
    }
}

fn integer_re() -> &'static Regex {
    static INTEGER_RE: OnceLock<Regex> = OnceLock::new();
    INTEGER_RE.get_or_init(|| Regex::new(r"^\s*([+-]?)0*(\d+)\s*$").expect("valid integer regex"))
}

fn float_re() -> &'static Regex {
    static FLOAT_RE: OnceLock<Regex> = OnceLock::new();
    FLOAT_RE.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("valid float regex")
    })
}

/// Works on the digit string so arbitrarily long integers survive unchanged.
fn coerce_integer(value: &str) -> Option<String> {
    let caps = integer_re().captures(value)?;
    let digits = caps.get(2)?.as_str();
    let negative = caps.get(1).map_or(false, |sign| sign.as_str() == "-");

    if negative && digits != "0" {
        Some(format!("-{}", digits))
    } else {
        Some(digits.to_string())
    }
}

fn coerce_float(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if !float_re().is_match(trimmed) {
        return None;
    }

    let parsed: f64 = trimmed.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }

    Some(render_float(parsed))
}

/// Shortest round-trip rendering with a trailing ".0" on integral values.
/// Exponent form (below 1e-4 or from 1e16) carries an explicit sign and at
/// least two exponent digits: `1e+16`, `1.5e-07`.
fn render_float(value: f64) -> String {
    let rendered = format!("{:?}", value);

    match rendered.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => rendered,
    }
}

fn sentence_case(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Global field → transform-kind table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueRules {
    rules: IndexMap<String, TransformKind>,
}

impl ValueRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storm numbers arrive zero-padded from some producers.
    pub fn builtin() -> Self {
        [
            ("forcing.stormnumber", TransformKind::Integer),
            ("stormnumber", TransformKind::Integer),
        ]
        .into_iter()
        .collect()
    }

    pub fn with_rule(mut self, field: impl Into<String>, kind: TransformKind) -> Self {
        self.rules.insert(field.into(), kind);
        self
    }

    pub fn get(&self, field: &str) -> Option<TransformKind> {
        self.rules.get(field).copied()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, TransformKind)> for ValueRules {
    fn from_iter<I: IntoIterator<Item = (K, TransformKind)>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().map(|(field, kind)| (field.into(), kind)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_strips_leading_zeros() {
        assert_eq!(TransformKind::Integer.apply("03"), Some("3".to_string()));
        assert_eq!(TransformKind::Integer.apply("000"), Some("0".to_string()));
        assert_eq!(TransformKind::Integer.apply("-007"), Some("-7".to_string()));
        assert_eq!(TransformKind::Integer.apply("+12"), Some("12".to_string()));
        assert_eq!(TransformKind::Integer.apply("-0"), Some("0".to_string()));
        assert_eq!(TransformKind::Integer.apply(" 42 "), Some("42".to_string()));
        assert_eq!(
            TransformKind::Integer.apply("000123456789012345678901234567890"),
            Some("123456789012345678901234567890".to_string())
        );
    }

    #[test]
    fn test_integer_rejects_non_integers() {
        assert_eq!(TransformKind::Integer.apply("no_change"), None);
        assert_eq!(TransformKind::Integer.apply("1.5"), None);
        assert_eq!(TransformKind::Integer.apply(""), None);
        assert_eq!(TransformKind::Integer.apply("0x1f"), None);
    }

    #[test]
    fn test_float_canonical_rendering() {
        assert_eq!(TransformKind::Float.apply("1.5e10"), Some("15000000000.0".to_string()));
        assert_eq!(TransformKind::Float.apply("2.50"), Some("2.5".to_string()));
        assert_eq!(TransformKind::Float.apply("7"), Some("7.0".to_string()));
        assert_eq!(TransformKind::Float.apply("-.25"), Some("-0.25".to_string()));
        assert_eq!(TransformKind::Float.apply("3.E2"), Some("300.0".to_string()));
        assert_eq!(TransformKind::Float.apply("0.0001"), Some("0.0001".to_string()));
    }

    #[test]
    fn test_float_exponent_form() {
        assert_eq!(TransformKind::Float.apply("1e16"), Some("1e+16".to_string()));
        assert_eq!(TransformKind::Float.apply("0.00001"), Some("1e-05".to_string()));
        assert_eq!(TransformKind::Float.apply("1.5E-7"), Some("1.5e-07".to_string()));
        assert_eq!(TransformKind::Float.apply("-2.5e123"), Some("-2.5e+123".to_string()));
    }

    #[test]
    fn test_float_rejects_non_numbers() {
        assert_eq!(TransformKind::Float.apply("inf"), None);
        assert_eq!(TransformKind::Float.apply("NaN"), None);
        assert_eq!(TransformKind::Float.apply("1e999"), None);
        assert_eq!(TransformKind::Float.apply("gfsforecast"), None);
    }

    #[test]
    fn test_case_transforms() {
        assert_eq!(TransformKind::Uppercase.apply("lowercase"), Some("LOWERCASE".to_string()));
        assert_eq!(TransformKind::Lowercase.apply("LOWerCase"), Some("lowercase".to_string()));
        assert_eq!(TransformKind::Sentencecase.apply("sentenceCASE"), Some("Sentencecase".to_string()));
        assert_eq!(TransformKind::Sentencecase.apply(""), Some(String::new()));
        assert_eq!(TransformKind::String.apply("no_change"), Some("no_change".to_string()));
    }

    #[test]
    fn test_kind_names_round_trip_through_yaml() {
        let rules: ValueRules = serde_yaml::from_str("storm: FLOAT\nname: SENTENCECASE\n").unwrap();

        assert_eq!(rules.get("storm"), Some(TransformKind::Float));
        assert_eq!(rules.get("name"), Some(TransformKind::Sentencecase));
        assert_eq!(TransformKind::Sentencecase.as_str(), "SENTENCECASE");
    }
}
