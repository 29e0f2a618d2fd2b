//! Variable types, values and scopes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    /// UTF-8 string
    String,
    /// 64-bit signed integer
    Int,
    /// true or false
    Bool,
    /// List of strings
    StringList,
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Int => f.write_str("int"),
            Self::Bool => f.write_str("bool"),
            Self::StringList => f.write_str("stringlist"),
        }
    }
}

/// Where a value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Process-wide
    Global,
    /// Owned by the stack being deployed; cleared on teardown
    Stack,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Stack => f.write_str("stack"),
        }
    }
}

/// Variable value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// String
    String(String),
    /// String list
    StringList(Vec<String>),
}

impl VarValue {
    /// Type of this value
    pub fn var_type(&self) -> VarType {
        match self {
            Self::Bool(_) => VarType::Bool,
            Self::Int(_) => VarType::Int,
            Self::String(_) => VarType::String,
            Self::StringList(_) => VarType::StringList,
        }
    }

    /// Convert to `target`, parsing strings where the target is not a string.
    ///
    /// Returns `None` when the value has no sensible reading as `target`.
    pub fn coerce(self, target: VarType) -> Option<VarValue> {
        if self.var_type() == target {
            return Some(self);
        }

        match (self, target) {
            (Self::String(s), VarType::Int) => s.trim().parse().ok().map(Self::Int),
            (Self::String(s), VarType::Bool) => parse_bool(&s).map(Self::Bool),
            (Self::String(s), VarType::StringList) => Some(Self::StringList(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect(),
            )),
            (Self::Int(i), VarType::String) => Some(Self::String(i.to_string())),
            (Self::Bool(b), VarType::String) => Some(Self::String(b.to_string())),
            _ => None,
        }
    }

    /// Borrow a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Int value, if this is one
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Bool value, if this is one
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow a list value
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::StringList(items) => Some(items),
            _ => None,
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::String(s) => f.write_str(s),
            Self::StringList(items) => f.write_str(&items.join(",")),
        }
    }
}

impl From<&str> for VarValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for VarValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for VarValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for VarValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<bool> for VarValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<String>> for VarValue {
    fn from(items: Vec<String>) -> Self {
        Self::StringList(items)
    }
}

impl From<&[&str]> for VarValue {
    fn from(items: &[&str]) -> Self {
        Self::StringList(items.iter().map(|s| s.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_from_strings() {
        assert_eq!(VarValue::from("42").coerce(VarType::Int), Some(VarValue::Int(42)));
        assert_eq!(VarValue::from(" yes ").coerce(VarType::Bool), Some(VarValue::Bool(true)));
        assert_eq!(VarValue::from("0").coerce(VarType::Bool), Some(VarValue::Bool(false)));
        assert_eq!(
            VarValue::from("us-east-1, us-west-2,").coerce(VarType::StringList),
            Some(VarValue::from(&["us-east-1", "us-west-2"][..]))
        );
    }

    #[test]
    fn test_coerce_rejects_nonsense() {
        assert_eq!(VarValue::from("forty").coerce(VarType::Int), None);
        assert_eq!(VarValue::from("maybe").coerce(VarType::Bool), None);
        assert_eq!(VarValue::Bool(true).coerce(VarType::Int), None);
        assert_eq!(VarValue::from(&["a"][..]).coerce(VarType::String), None);
    }

    #[test]
    fn test_untagged_serde() {
        let json = serde_json::to_string(&VarValue::from(&["a", "b"][..])).unwrap();
        assert_eq!(json, r#"["a","b"]"#);

        let back: VarValue = serde_json::from_str("7").unwrap();
        assert_eq!(back, VarValue::Int(7));
        let back: VarValue = serde_json::from_str("true").unwrap();
        assert_eq!(back, VarValue::Bool(true));
    }
}
