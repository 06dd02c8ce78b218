//! Column type universe for the connector-sync protocol.
//!
//! `ColumnType` is the closed set of semantic types a destination column can
//! carry. Connectors either declare column types explicitly or let the
//! schema registry infer them from emitted values; in both cases a column's
//! type may only move *up* the widening lattice within and across runs:
//!
//! ```text
//! integer ──▸ float ──▸ decimal ──▸ string
//! date ──▸ timestamp ──▸ string
//! boolean ──▸ string
//! json ──▸ string
//! ```
//!
//! Binary never widens. Widening is monotonic: once a column has been
//! widened it never narrows back, so previously delivered data stays
//! representable.

use serde::{Deserialize, Serialize};

/// Semantic type of a destination column.
///
/// Serialized in snake_case tagged form so schema snapshots remain readable
/// and stable across versions:
///
/// ```yaml
/// type: integer
/// type:
///   type: decimal
///   precision: 10
///   scale: 2
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnType {
    /// Boolean value
    Boolean,

    /// 64-bit signed integer
    Integer,

    /// 64-bit IEEE 754 floating point
    Float,

    /// Exact decimal with specified precision and scale.
    ///
    /// Stored and transmitted as a string so precision beyond the binary
    /// float range is never silently lost.
    Decimal {
        /// Total number of digits
        precision: u8,
        /// Number of digits after the decimal point
        scale: u8,
    },

    /// Unicode string
    String,

    /// Raw binary data
    Binary,

    /// Calendar date (no time component)
    Date,

    /// Timestamp with timezone, UTC-normalized
    Timestamp,

    /// Arbitrary JSON document
    Json,
}

impl ColumnType {
    /// Short name used in error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Decimal { .. } => "decimal",
            ColumnType::String => "string",
            ColumnType::Binary => "binary",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
        }
    }

    /// Whether a value of `self` is representable in a column of `target`.
    ///
    /// This is the reflexive-transitive closure of the widening lattice.
    /// Two decimals are compatible when the target's precision and scale
    /// cover the source's.
    pub fn widens_to(&self, target: &ColumnType) -> bool {
        use ColumnType::*;

        match (self, target) {
            // Reflexive, with decimal bounds checked explicitly below
            (a, b) if a == b => true,

            (Integer, Float) => true,
            (Integer, Decimal { .. }) => true,
            (Float, Decimal { .. }) => true,
            (
                Decimal {
                    precision: p1,
                    scale: s1,
                },
                Decimal {
                    precision: p2,
                    scale: s2,
                },
            ) => p2 >= p1 && s2 >= s1,

            (Date, Timestamp) => true,

            // Everything except binary widens to string
            (Boolean | Integer | Float | Decimal { .. } | Date | Timestamp | Json, String) => true,

            _ => false,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Decimal { precision, scale } => {
                write!(f, "decimal({precision},{scale})")
            }
            other => f.write_str(other.name()),
        }
    }
}
