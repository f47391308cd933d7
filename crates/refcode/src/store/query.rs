//! Logical queries issued by the engine.
//!
//! The engine never builds SQL. It describes what it needs with [`Query`] and
//! [`WriteQuery`], and each backend renders them for its own dialect. Every
//! table and column name travels as an [`Identifier`], which is validated once
//! at configuration time so backends can quote it without escaping.

use core::fmt;

use crate::{Error, Result};

/// A validated SQL identifier: `name` or `schema.name`, where each part
/// matches `[A-Za-z_][A-Za-z0-9_]*`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Validates and wraps `name`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if `name` is empty, has more than one
    /// `.`, or contains characters outside `[A-Za-z0-9_]`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() > 2 || !parts.iter().all(|part| Self::is_valid_part(part)) {
            return Err(Error::invalid_config(format!(
                "`{name}` is not a valid table or column identifier"
            )));
        }
        Ok(Self(name))
    }

    fn is_valid_part(part: &str) -> bool {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The dot-separated parts (one or two).
    pub fn parts(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.0)
    }
}

/// Primary entity table in store A.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrimaryTable {
    pub table: Identifier,
    pub id_column: Identifier,
    pub code_column: Identifier,
}

/// Bridge table in store A, mapping a primary id to a bridge id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeTable {
    pub table: Identifier,
    /// Column holding the bridge id (the join key into store B).
    pub id_column: Identifier,
    /// Column referencing the primary entity's id.
    pub primary_column: Identifier,
}

/// Secondary entity table in store B, keyed by bridge id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecondaryTable {
    pub table: Identifier,
    pub key_column: Identifier,
    pub code_column: Identifier,
}

/// Table and column names for both stores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    pub primary: PrimaryTable,
    pub bridge: BridgeTable,
    pub secondary: SecondaryTable,
}

impl Schema {
    /// Builds a schema from raw names, validating every identifier.
    ///
    /// Arguments are in order: primary table/id/code, bridge
    /// table/id/primary-reference, secondary table/key/code.
    #[allow(clippy::too_many_arguments)]
    pub fn from_names(
        primary_table: &str,
        primary_id: &str,
        primary_code: &str,
        bridge_table: &str,
        bridge_id: &str,
        bridge_primary: &str,
        secondary_table: &str,
        secondary_key: &str,
        secondary_code: &str,
    ) -> Result<Self> {
        Ok(Self {
            primary: PrimaryTable {
                table: Identifier::new(primary_table)?,
                id_column: Identifier::new(primary_id)?,
                code_column: Identifier::new(primary_code)?,
            },
            bridge: BridgeTable {
                table: Identifier::new(bridge_table)?,
                id_column: Identifier::new(bridge_id)?,
                primary_column: Identifier::new(bridge_primary)?,
            },
            secondary: SecondaryTable {
                table: Identifier::new(secondary_table)?,
                key_column: Identifier::new(secondary_key)?,
                code_column: Identifier::new(secondary_code)?,
            },
        })
    }

    /// `user(id, user_code)`, `user_bridge(id, user_id)`,
    /// `user_info(user_id, referral_code)`.
    pub fn users() -> Self {
        Self::from_names(
            "user",
            "id",
            "user_code",
            "user_bridge",
            "id",
            "user_id",
            "user_info",
            "user_id",
            "referral_code",
        )
        .unwrap_or_else(|_| unreachable!("built-in identifiers are valid"))
    }

    pub(crate) fn count_primary_code<'a>(&'a self, code: &'a str) -> Query<'a> {
        Query::CountMatching {
            table: &self.primary.table,
            column: &self.primary.code_column,
            value: code,
        }
    }

    pub(crate) fn count_secondary_code<'a>(&'a self, code: &'a str) -> Query<'a> {
        Query::CountMatching {
            table: &self.secondary.table,
            column: &self.secondary.code_column,
            value: code,
        }
    }

    pub(crate) fn select_primary_code(&self, id: i64) -> Query<'_> {
        Query::SelectCode {
            table: &self.primary.table,
            id_column: &self.primary.id_column,
            id,
            code_column: &self.primary.code_column,
        }
    }

    pub(crate) fn select_secondary_code(&self, key: i64) -> Query<'_> {
        Query::SelectCode {
            table: &self.secondary.table,
            id_column: &self.secondary.key_column,
            id: key,
            code_column: &self.secondary.code_column,
        }
    }

    pub(crate) fn update_primary_code<'a>(&'a self, id: i64, code: &'a str) -> WriteQuery<'a> {
        WriteQuery::ConditionalUpdate {
            table: &self.primary.table,
            id_column: &self.primary.id_column,
            id,
            code_column: &self.primary.code_column,
            code,
        }
    }

    pub(crate) fn update_secondary_code<'a>(&'a self, key: i64, code: &'a str) -> WriteQuery<'a> {
        WriteQuery::ConditionalUpdate {
            table: &self.secondary.table,
            id_column: &self.secondary.key_column,
            id: key,
            code_column: &self.secondary.code_column,
            code,
        }
    }

    pub(crate) fn bridged_pairs(&self) -> Query<'_> {
        Query::BridgedPairs {
            primary: &self.primary,
            bridge: &self.bridge,
        }
    }

    pub(crate) fn missing_secondary_codes(&self) -> Query<'_> {
        Query::MissingCodes {
            table: &self.secondary.table,
            key_column: &self.secondary.key_column,
            code_column: &self.secondary.code_column,
        }
    }
}

/// A read issued against one store.
///
/// Row shapes returned per variant:
/// - `CountMatching`: one row, `[Int(count)]`.
/// - `SelectCode`: zero rows if the record does not exist, otherwise one row
///   `[Text(code)]` or `[Null]`.
/// - `BridgedPairs`: one row per bridge reference, `[Int(primary id),
///   Int(bridge id)]`, ordered by primary id then bridge id.
/// - `MissingCodes`: one row per record whose code column is NULL or empty,
///   `[Int(key)]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Query<'a> {
    CountMatching {
        table: &'a Identifier,
        column: &'a Identifier,
        value: &'a str,
    },
    SelectCode {
        table: &'a Identifier,
        id_column: &'a Identifier,
        id: i64,
        code_column: &'a Identifier,
    },
    BridgedPairs {
        primary: &'a PrimaryTable,
        bridge: &'a BridgeTable,
    },
    MissingCodes {
        table: &'a Identifier,
        key_column: &'a Identifier,
        code_column: &'a Identifier,
    },
}

/// A write issued against one store. Returns the number of affected rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteQuery<'a> {
    /// Sets `code_column = code` on the row where `id_column = id`, only if
    /// the column is currently NULL or empty.
    ConditionalUpdate {
        table: &'a Identifier,
        id_column: &'a Identifier,
        id: i64,
        code_column: &'a Identifier,
        code: &'a str,
    },
}

/// A single column value in a result row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
}

/// A result row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Reads column `index` as an integer.
    pub fn int(&self, index: usize) -> Result<i64> {
        match self.0.get(index) {
            Some(Value::Int(v)) => Ok(*v),
            other => Err(Error::decode(format!(
                "expected integer in column {index}, found {other:?}"
            ))),
        }
    }

    /// Reads column `index` as an optional string. NULL and the empty string
    /// both read as `None`.
    pub fn code(&self, index: usize) -> Result<Option<&str>> {
        match self.0.get(index) {
            Some(Value::Null) => Ok(None),
            Some(Value::Text(s)) if s.is_empty() => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s.as_str())),
            other => Err(Error::decode(format!(
                "expected text in column {index}, found {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_accept_plain_and_qualified_names() {
        assert!(Identifier::new("user").is_ok());
        assert!(Identifier::new("_user_2").is_ok());
        let qualified = Identifier::new("db_uaa.user_bridge").unwrap();
        assert_eq!(qualified.parts().collect::<Vec<_>>(), ["db_uaa", "user_bridge"]);
    }

    #[test]
    fn identifiers_reject_injection_shapes() {
        for bad in ["", "1user", "user;", "us er", "a.b.c", "user`", "a.", ".a", "user--"] {
            assert!(
                matches!(Identifier::new(bad), Err(Error::InvalidConfig { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn row_code_treats_empty_as_missing() {
        let row = Row::new(vec![
            Value::Text(String::new()),
            Value::Null,
            Value::Text("ABCDEFGH".into()),
        ]);
        assert_eq!(row.code(0).unwrap(), None);
        assert_eq!(row.code(1).unwrap(), None);
        assert_eq!(row.code(2).unwrap(), Some("ABCDEFGH"));
        assert!(row.code(3).is_err());
        assert!(row.int(2).is_err());
    }

    #[test]
    fn default_schema_matches_user_tables() {
        let schema = Schema::users();
        assert_eq!(schema.primary.code_column.as_str(), "user_code");
        assert_eq!(schema.bridge.primary_column.as_str(), "user_id");
        assert_eq!(schema.secondary.code_column.as_str(), "referral_code");
    }
}
