// ── Parameter normalization ──
//
// Callers ask for "one thing or many things, by id or by name". These
// types flatten that into one canonical key list while remembering the
// shape the caller used, so results can be handed back the same way.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ── Params ───────────────────────────────────────────────────────────

/// A single argument or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params<T> {
    Single(T),
    Many(Vec<T>),
}

impl<T> Params<T> {
    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }

    /// Split into the cardinality flag and the flat list of values.
    pub fn into_parts(self) -> (bool, Vec<T>) {
        match self {
            Self::Single(value) => (true, vec![value]),
            Self::Many(values) => (false, values),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first(&self) -> Option<&T> {
        match self {
            Self::Single(value) => Some(value),
            Self::Many(values) => values.first(),
        }
    }
}

impl<T> From<Vec<T>> for Params<T> {
    fn from(values: Vec<T>) -> Self {
        Self::Many(values)
    }
}

impl<T, const N: usize> From<[T; N]> for Params<T> {
    fn from(values: [T; N]) -> Self {
        Self::Many(values.into())
    }
}

impl<T> FromIterator<T> for Params<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::Many(iter.into_iter().collect())
    }
}

// ── ParamValue ───────────────────────────────────────────────────────

/// A loosely-typed key as a caller might pass it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(i64),
    Boolean(bool),
    String(String),
}

impl ParamValue {
    pub fn tag(&self) -> TypeTag {
        match self {
            Self::Number(_) => TypeTag::Number,
            Self::String(_) => TypeTag::String,
            Self::Boolean(_) => TypeTag::Boolean,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a numeric-looking string into a number; anything else is kept.
    fn coerce_numeric(self) -> Self {
        match self {
            Self::String(s) => match s.parse::<i64>() {
                Ok(n) => Self::Number(n),
                Err(_) => Self::String(s),
            },
            other => other,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for ParamValue {
    fn from(n: i32) -> Self {
        Self::Number(i64::from(n))
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

macro_rules! single_param_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Params<ParamValue> {
                fn from(value: $ty) -> Self {
                    Self::Single(ParamValue::from(value))
                }
            }
        )*
    };
}

single_param_from!(i64, i32, bool, String, &str);

impl From<ParamValue> for Params<ParamValue> {
    fn from(value: ParamValue) -> Self {
        Self::Single(value)
    }
}

/// Runtime type of a [`ParamValue`], used to pick a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum TypeTag {
    Number,
    String,
    Boolean,
}

// ── VariantMap ───────────────────────────────────────────────────────

/// Which key representation each value type stands for,
/// e.g. numbers are ids and strings are names.
#[derive(Debug, Clone)]
pub struct VariantMap<V> {
    variants: HashMap<TypeTag, V>,
}

impl<V> VariantMap<V> {
    pub fn new() -> Self {
        Self {
            variants: HashMap::new(),
        }
    }

    pub fn with(mut self, tag: TypeTag, variant: V) -> Self {
        self.variants.insert(tag, variant);
        self
    }

    pub fn insert(&mut self, tag: TypeTag, variant: V) -> Option<V> {
        self.variants.insert(tag, variant)
    }

    pub fn get(&self, tag: TypeTag) -> Option<&V> {
        self.variants.get(&tag)
    }
}

impl<V> Default for VariantMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FromIterator<(TypeTag, V)> for VariantMap<V> {
    fn from_iter<I: IntoIterator<Item = (TypeTag, V)>>(iter: I) -> Self {
        Self {
            variants: iter.into_iter().collect(),
        }
    }
}

// ── Normalization ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Read `"42"` as the number 42 when a number variant exists.
    ///
    /// A name that happens to be all digits is read as a numeric key too.
    pub coerce_numeric_strings: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            coerce_numeric_strings: true,
        }
    }
}

/// Result of [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized<V> {
    /// Whether the caller passed a scalar.
    pub single: bool,

    /// Variant chosen from the first value's type; `None` when unclassified.
    pub variant: Option<V>,

    /// Canonical flat list, coerced when a numeric variant was selected.
    pub normalized: Vec<ParamValue>,

    /// The arguments exactly as given.
    pub actual: Params<ParamValue>,
}

impl<V> Normalized<V> {
    /// Canonical values re-wrapped in the caller's cardinality.
    pub fn into_params(self) -> Params<ParamValue> {
        if self.single {
            if let Some(value) = self.normalized.into_iter().next() {
                return Params::Single(value);
            }
            return Params::Many(Vec::new());
        }
        Params::Many(self.normalized)
    }

    /// The selected variant, or [`CoreError::UnclassifiedParams`].
    pub fn require_variant(&self) -> Result<&V, CoreError> {
        self.variant
            .as_ref()
            .ok_or_else(|| CoreError::UnclassifiedParams {
                reason: match self.normalized.first() {
                    Some(first) => format!("no variant for {} value {first:?}", first.tag()),
                    None => "no values given".into(),
                },
            })
    }
}

/// [`normalize_with`] using default options.
pub fn normalize<V: Clone>(
    args: impl Into<Params<ParamValue>>,
    variants: &VariantMap<V>,
) -> Normalized<V> {
    normalize_with(args, variants, NormalizeOptions::default())
}

/// Classify and flatten caller arguments.
///
/// The first value's type selects the variant. When coercion is on, the
/// first value is a numeric string and a number variant exists, every
/// value is parsed as a number; values that do not parse stay strings.
pub fn normalize_with<V: Clone>(
    args: impl Into<Params<ParamValue>>,
    variants: &VariantMap<V>,
    opts: NormalizeOptions,
) -> Normalized<V> {
    let actual = args.into();
    let single = actual.is_single();
    let (_, values) = actual.clone().into_parts();

    let Some(first) = values.first() else {
        return Normalized {
            single,
            variant: None,
            normalized: Vec::new(),
            actual,
        };
    };

    let numeric_string =
        matches!(first, ParamValue::String(s) if s.parse::<i64>().is_ok());
    let number_variant = variants.get(TypeTag::Number);

    match number_variant {
        Some(variant) if opts.coerce_numeric_strings && numeric_string => Normalized {
            single,
            variant: Some(variant.clone()),
            normalized: values.into_iter().map(ParamValue::coerce_numeric).collect(),
            actual,
        },
        _ => Normalized {
            single,
            variant: variants.get(first.tag()).cloned(),
            normalized: values,
            actual,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Lookup {
        ByKey,
        ByName,
    }

    fn variants() -> VariantMap<Lookup> {
        VariantMap::new()
            .with(TypeTag::Number, Lookup::ByKey)
            .with(TypeTag::String, Lookup::ByName)
    }

    #[test]
    fn numeric_string_scalar_is_coerced() {
        let only_number = VariantMap::new().with(TypeTag::Number, "n");
        let out = normalize("5", &only_number);

        assert!(out.single);
        assert_eq!(out.variant, Some("n"));
        assert_eq!(out.normalized, vec![ParamValue::Number(5)]);
        assert_eq!(out.actual, Params::Single(ParamValue::from("5")));
    }

    #[test]
    fn list_of_names_selects_string_variant() {
        let out = normalize(
            vec![ParamValue::from("alpha"), ParamValue::from("beta")],
            &variants(),
        );

        assert!(!out.single);
        assert_eq!(out.variant, Some(Lookup::ByName));
        assert_eq!(
            out.normalized,
            vec![ParamValue::from("alpha"), ParamValue::from("beta")]
        );
    }

    #[test]
    fn coercion_keeps_unparseable_values() {
        let out = normalize(
            vec![ParamValue::from("1"), ParamValue::from("two")],
            &variants(),
        );
        assert_eq!(out.variant, Some(Lookup::ByKey));
        assert_eq!(
            out.normalized,
            vec![ParamValue::Number(1), ParamValue::from("two")]
        );
    }

    #[test]
    fn coercion_can_be_disabled() {
        let out = normalize_with(
            "7",
            &variants(),
            NormalizeOptions {
                coerce_numeric_strings: false,
            },
        );
        assert_eq!(out.variant, Some(Lookup::ByName));
        assert_eq!(out.normalized, vec![ParamValue::from("7")]);
    }

    #[test]
    fn numeric_string_without_number_variant_stays_string() {
        let names_only = VariantMap::new().with(TypeTag::String, Lookup::ByName);
        let out = normalize("42", &names_only);
        assert_eq!(out.variant, Some(Lookup::ByName));
        assert_eq!(out.normalized, vec![ParamValue::from("42")]);
    }

    #[test]
    fn empty_list_is_unclassified() {
        let out = normalize(Vec::<ParamValue>::new(), &variants());
        assert!(!out.single);
        assert_eq!(out.variant, None);
        assert!(out.normalized.is_empty());
        assert!(matches!(
            out.require_variant(),
            Err(CoreError::UnclassifiedParams { .. })
        ));
    }

    #[test]
    fn missing_variant_is_unclassified() {
        let out = normalize(true, &variants());
        assert!(out.single);
        assert_eq!(out.variant, None);
        assert!(out.require_variant().is_err());
    }

    #[test]
    fn into_params_restores_cardinality() {
        let out = normalize("9", &variants());
        assert_eq!(out.into_params(), Params::Single(ParamValue::Number(9)));

        let out = normalize(vec![ParamValue::from(3)], &variants());
        assert_eq!(out.into_params(), Params::Many(vec![ParamValue::Number(3)]));
    }

    #[test]
    fn params_into_parts() {
        assert_eq!(Params::Single(4_u32).into_parts(), (true, vec![4]));
        assert_eq!(Params::from([1_u32, 2]).into_parts(), (false, vec![1, 2]));
        assert!(Params::<u32>::Many(Vec::new()).is_empty());
    }
}
