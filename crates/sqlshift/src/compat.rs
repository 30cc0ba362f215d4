//! Column type compatibility.
//!
//! Decides whether changing a column from one declared type to another can
//! lose or corrupt data. Conversions inside one type family compare sizes
//! (`varchar(50)` → `varchar(255)` widens, the reverse truncates). Conversions
//! across families are looked up in a [`CompatibilityTable`] of
//! [`ConversionRule`]s; pairs without a rule are only safe on an empty column.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Broad class of a declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFamily {
    /// `BOOLEAN`, `BOOL`.
    Boolean,
    /// `TINYINT` through `BIGINT`, ranked by width.
    Integer,
    /// Floating point: `REAL`, `FLOAT`, `DOUBLE`.
    Real,
    /// `NUMERIC`/`DECIMAL`, with optional precision and scale.
    Numeric,
    /// Character types, bounded (`varchar(n)`) or not.
    Text,
    /// Raw bytes.
    Blob,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// `DATETIME`, `TIMESTAMP`.
    DateTime,
    /// Anything the parser does not recognize. Never converted safely.
    Unknown,
}

/// A declared type split into its family and size parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedType {
    /// Type family.
    pub family: TypeFamily,
    /// Relative width for integer types (`TINYINT` < `SMALLINT` < ... < `BIGINT`).
    pub rank: u8,
    /// Length or precision, if declared.
    pub length: Option<u32>,
    /// Scale for `DECIMAL(p, s)`.
    pub scale: Option<u32>,
}

fn type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_ ]*?)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?\s*$")
            .expect("Invalid type pattern regex")
    })
}

/// Parses a declared type such as `varchar(255)` or `DECIMAL(10, 2)`.
#[must_use]
pub fn parse_type(raw: &str) -> ParsedType {
    let unknown = ParsedType {
        family: TypeFamily::Unknown,
        rank: 0,
        length: None,
        scale: None,
    };
    let Some(caps) = type_pattern().captures(raw) else {
        return unknown;
    };

    let name = caps[1].split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
    let length = caps.get(2).and_then(|m| m.as_str().parse().ok());
    let scale = caps.get(3).and_then(|m| m.as_str().parse().ok());

    let (family, rank) = match name.as_str() {
        "BOOLEAN" | "BOOL" => (TypeFamily::Boolean, 0),
        "TINYINT" | "INT1" => (TypeFamily::Integer, 1),
        "SMALLINT" | "INT2" => (TypeFamily::Integer, 2),
        "MEDIUMINT" | "INT3" => (TypeFamily::Integer, 3),
        "INT" | "INTEGER" | "INT4" => (TypeFamily::Integer, 4),
        "BIGINT" | "INT8" | "UNSIGNED BIG INT" => (TypeFamily::Integer, 5),
        "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" => (TypeFamily::Real, 0),
        "NUMERIC" | "DECIMAL" => (TypeFamily::Numeric, 0),
        "CHAR" | "CHARACTER" | "VARCHAR" | "NCHAR" | "NVARCHAR" | "VARYING CHARACTER"
        | "NATIVE CHARACTER" | "TEXT" | "CLOB" => (TypeFamily::Text, 0),
        "BLOB" => (TypeFamily::Blob, 0),
        "DATE" => (TypeFamily::Date, 0),
        "TIME" => (TypeFamily::Time, 0),
        "DATETIME" | "TIMESTAMP" => (TypeFamily::DateTime, 0),
        _ => return unknown,
    };

    ParsedType {
        family,
        rank,
        length,
        scale,
    }
}

/// Whether a conversion is safe on populated columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Safety {
    /// Every existing value survives unchanged.
    Widening,
    /// Existing values may be lost or reinterpreted.
    RequiresEmptyColumn,
}

/// A cross-family conversion and its safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRule {
    /// Source family.
    pub from: TypeFamily,
    /// Target family.
    pub to: TypeFamily,
    /// Safety of the conversion.
    pub safety: Safety,
}

impl ConversionRule {
    /// A conversion that keeps every value.
    #[must_use]
    pub const fn widening(from: TypeFamily, to: TypeFamily) -> Self {
        Self {
            from,
            to,
            safety: Safety::Widening,
        }
    }

    /// A conversion that is only allowed when the column holds no values.
    #[must_use]
    pub const fn requires_empty(from: TypeFamily, to: TypeFamily) -> Self {
        Self {
            from,
            to,
            safety: Safety::RequiresEmptyColumn,
        }
    }
}

const DEFAULT_RULES: &[ConversionRule] = &[
    ConversionRule::widening(TypeFamily::Boolean, TypeFamily::Integer),
    ConversionRule::widening(TypeFamily::Boolean, TypeFamily::Numeric),
    ConversionRule::widening(TypeFamily::Integer, TypeFamily::Real),
    ConversionRule::widening(TypeFamily::Integer, TypeFamily::Numeric),
    ConversionRule::widening(TypeFamily::Text, TypeFamily::Blob),
    ConversionRule::widening(TypeFamily::Date, TypeFamily::DateTime),
    ConversionRule::widening(TypeFamily::Date, TypeFamily::Text),
    ConversionRule::widening(TypeFamily::Time, TypeFamily::Text),
    ConversionRule::widening(TypeFamily::DateTime, TypeFamily::Text),
    ConversionRule::requires_empty(TypeFamily::Integer, TypeFamily::Boolean),
    ConversionRule::requires_empty(TypeFamily::Real, TypeFamily::Integer),
    ConversionRule::requires_empty(TypeFamily::Text, TypeFamily::Integer),
    ConversionRule::requires_empty(TypeFamily::Text, TypeFamily::Real),
    ConversionRule::requires_empty(TypeFamily::Text, TypeFamily::Numeric),
    ConversionRule::requires_empty(TypeFamily::Integer, TypeFamily::Text),
    ConversionRule::requires_empty(TypeFamily::Text, TypeFamily::Date),
    ConversionRule::requires_empty(TypeFamily::Text, TypeFamily::DateTime),
    ConversionRule::requires_empty(TypeFamily::DateTime, TypeFamily::Date),
];

/// Lookup table for type conversions.
#[derive(Debug, Clone)]
pub struct CompatibilityTable {
    rules: Vec<ConversionRule>,
}

impl Default for CompatibilityTable {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
        }
    }
}

impl CompatibilityTable {
    /// A table with no cross-family rules: every cross-family change needs an
    /// empty column.
    #[must_use]
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Adds a rule. Later rules override earlier ones for the same pair.
    #[must_use]
    pub fn with_rule(mut self, rule: ConversionRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The configured rules, in insertion order.
    #[must_use]
    pub fn rules(&self) -> &[ConversionRule] {
        &self.rules
    }

    /// Classifies a change from type `from` to type `to`.
    #[must_use]
    pub fn classify(&self, from: &str, to: &str) -> Safety {
        if normalize(from) == normalize(to) {
            return Safety::Widening;
        }

        let source = parse_type(from);
        let target = parse_type(to);
        if source.family == TypeFamily::Unknown || target.family == TypeFamily::Unknown {
            return Safety::RequiresEmptyColumn;
        }

        if source.family == target.family {
            return same_family(&source, &target);
        }

        let safety = self
            .rules
            .iter()
            .rev()
            .find(|r| r.from == source.family && r.to == target.family)
            .map_or(Safety::RequiresEmptyColumn, |r| r.safety);

        // A bounded text target can still truncate.
        if safety == Safety::Widening
            && target.family == TypeFamily::Text
            && target.length.is_some()
        {
            return Safety::RequiresEmptyColumn;
        }
        safety
    }

    /// Returns true if the conversion keeps every value.
    #[must_use]
    pub fn is_safe(&self, from: &str, to: &str) -> bool {
        self.classify(from, to) == Safety::Widening
    }
}

fn same_family(source: &ParsedType, target: &ParsedType) -> Safety {
    let widens = match source.family {
        TypeFamily::Integer => target.rank >= source.rank,
        TypeFamily::Numeric => {
            fits(source.length, target.length) && fits(source.scale, target.scale)
        }
        _ => fits(source.length, target.length),
    };
    if widens {
        Safety::Widening
    } else {
        Safety::RequiresEmptyColumn
    }
}

/// `None` means unbounded.
fn fits(source: Option<u32>, target: Option<u32>) -> bool {
    match (source, target) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(s), Some(t)) => t >= s,
    }
}

fn normalize(ty: &str) -> String {
    ty.split_whitespace()
        .collect::<String>()
        .to_ascii_uppercase()
}
