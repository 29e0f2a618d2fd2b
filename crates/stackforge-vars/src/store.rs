//! Variable store
//!
//! Single writer, many readers. Declarations and values sit behind one
//! `RwLock`, so a bulk write is never partially visible. Reads go through a
//! moka cache keyed by `(name, scope)`; a write invalidates only the keys of
//! the variable it touched, while still holding the write lock.

use moka::sync::Cache;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, VariableError};
use crate::validators::Validator;
use crate::value::{Scope, VarType, VarValue};

/// Variable declaration
#[derive(Clone)]
pub struct VariableDecl {
    /// Unique name
    pub name: String,
    /// Declared type
    pub var_type: VarType,
    /// Narrowest scope the variable may be set at
    pub scope: Scope,
    /// Used when no value is set
    pub default: Option<VarValue>,
    /// Extra check on every value
    pub validator: Option<Validator>,
    /// Shown in listings
    pub description: String,
}

impl VariableDecl {
    /// Global declaration with no default
    pub fn new(name: impl Into<String>, var_type: VarType) -> Self {
        Self {
            name: name.into(),
            var_type,
            scope: Scope::Global,
            default: None,
            validator: None,
            description: String::new(),
        }
    }

    /// Narrowest settable scope
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Default value
    pub fn default_value(mut self, value: impl Into<VarValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Value validator
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Coerce and validate a candidate value
    fn check(&self, value: VarValue) -> Result<VarValue> {
        let found = value.var_type();
        let coerced = value.coerce(self.var_type).ok_or_else(|| VariableError::TypeMismatch {
            name: self.name.clone(),
            expected: self.var_type,
            found: found.to_string(),
        })?;

        if let Some(validator) = &self.validator {
            if !validator(&coerced) {
                return Err(VariableError::ValidationFailed {
                    name: self.name.clone(),
                    value: coerced.to_string(),
                });
            }
        }
        Ok(coerced)
    }

    /// Global-declared variables may not be overridden per stack
    fn allows(&self, scope: Scope) -> bool {
        self.scope == Scope::Stack || scope == Scope::Global
    }
}

impl fmt::Debug for VariableDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableDecl")
            .field("name", &self.name)
            .field("var_type", &self.var_type)
            .field("scope", &self.scope)
            .field("default", &self.default)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

#[derive(Default)]
struct StoreInner {
    decls: HashMap<String, VariableDecl>,
    values: HashMap<(String, Scope), VarValue>,
}

impl StoreInner {
    fn decl(&self, name: &str) -> Result<&VariableDecl> {
        self.decls
            .get(name)
            .ok_or_else(|| VariableError::UnknownVariable(name.to_string()))
    }

    /// Stack reads fall back to global, then to the default
    fn resolve(&self, name: &str, scope: Scope) -> Result<VarValue> {
        let decl = self.decl(name)?;

        let mut lookup = vec![Scope::Global];
        if scope == Scope::Stack {
            lookup.insert(0, Scope::Stack);
        }

        lookup
            .into_iter()
            .find_map(|s| self.values.get(&(name.to_string(), s)).cloned())
            .or_else(|| decl.default.clone())
            .ok_or_else(|| VariableError::Unset(name.to_string()))
    }
}

/// Typed, scoped variable store
pub struct VariableStore {
    inner: RwLock<StoreInner>,
    cache: Cache<(String, Scope), VarValue>,
}

impl VariableStore {
    /// Store with a 10K entry, 5 minute read cache
    pub fn new() -> Self {
        Self::with_cache(10_000, Duration::from_secs(300))
    }

    /// Store with a custom read cache
    pub fn with_cache(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self {
            inner: RwLock::new(StoreInner::default()),
            cache,
        }
    }

    /// Declare a variable
    pub fn register(&self, decl: VariableDecl) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.decls.contains_key(&decl.name) {
            return Err(VariableError::DuplicateVariable(decl.name));
        }

        let mut decl = decl;
        if let Some(default) = decl.default.take() {
            decl.default = Some(decl.check(default)?);
        }

        tracing::debug!("registered variable {} ({}, {})", decl.name, decl.var_type, decl.scope);
        inner.decls.insert(decl.name.clone(), decl);
        Ok(())
    }

    /// Whether `name` is declared
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.read().decls.contains_key(name)
    }

    /// Set a value. A rejected value leaves the previous one in place.
    pub fn set(&self, name: &str, value: impl Into<VarValue>, scope: Scope) -> Result<()> {
        let mut inner = self.inner.write();
        let coerced = Self::admit(&inner, name, value.into(), scope)?;

        inner.values.insert((name.to_string(), scope), coerced);
        self.invalidate(name);
        Ok(())
    }

    /// Effective value at `scope`
    pub fn get(&self, name: &str, scope: Scope) -> Result<VarValue> {
        let key = (name.to_string(), scope);
        if let Some(value) = self.cache.get(&key) {
            return Ok(value);
        }

        let inner = self.inner.read();
        let value = inner.resolve(name, scope)?;
        self.cache.insert(key, value.clone());
        Ok(value)
    }

    /// Set several values at once. Either every value is stored or none is.
    pub fn set_bulk<I, K, V>(&self, values: I, scope: Scope) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<VarValue>,
    {
        let mut inner = self.inner.write();

        let mut admitted = Vec::new();
        for (name, value) in values {
            let name = name.into();
            let coerced = Self::admit(&inner, &name, value.into(), scope)?;
            admitted.push((name, coerced));
        }

        for (name, value) in admitted {
            self.invalidate(&name);
            inner.values.insert((name, scope), value);
        }
        Ok(())
    }

    /// Read several values from one consistent view
    pub fn get_bulk(&self, names: &[&str], scope: Scope) -> Result<BTreeMap<String, VarValue>> {
        let inner = self.inner.read();
        names
            .iter()
            .map(|name| -> Result<(String, VarValue)> {
                Ok((name.to_string(), inner.resolve(name, scope)?))
            })
            .collect()
    }

    /// Read a string variable
    pub fn get_string(&self, name: &str, scope: Scope) -> Result<String> {
        match self.get(name, scope)? {
            VarValue::String(s) => Ok(s),
            other => Err(self.mismatch(name, VarType::String, &other)),
        }
    }

    /// Read an int variable
    pub fn get_int(&self, name: &str, scope: Scope) -> Result<i64> {
        match self.get(name, scope)? {
            VarValue::Int(i) => Ok(i),
            other => Err(self.mismatch(name, VarType::Int, &other)),
        }
    }

    /// Read a bool variable
    pub fn get_bool(&self, name: &str, scope: Scope) -> Result<bool> {
        match self.get(name, scope)? {
            VarValue::Bool(b) => Ok(b),
            other => Err(self.mismatch(name, VarType::Bool, &other)),
        }
    }

    /// Read a list variable
    pub fn get_list(&self, name: &str, scope: Scope) -> Result<Vec<String>> {
        match self.get(name, scope)? {
            VarValue::StringList(items) => Ok(items),
            other => Err(self.mismatch(name, VarType::StringList, &other)),
        }
    }

    /// Drop every value set at `scope` (stack teardown)
    pub fn clear_scope(&self, scope: Scope) {
        let mut inner = self.inner.write();
        let names: Vec<String> = inner
            .values
            .keys()
            .filter(|(_, s)| *s == scope)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &names {
            inner.values.remove(&(name.clone(), scope));
            self.invalidate(name);
        }
        tracing::debug!("cleared {} {}-scoped values", names.len(), scope);
    }

    /// Every variable with an effective value at `scope`
    pub fn snapshot(&self, scope: Scope) -> BTreeMap<String, VarValue> {
        let inner = self.inner.read();
        inner
            .decls
            .keys()
            .filter_map(|name| inner.resolve(name, scope).ok().map(|v| (name.clone(), v)))
            .collect()
    }

    fn admit(inner: &StoreInner, name: &str, value: VarValue, scope: Scope) -> Result<VarValue> {
        let decl = inner.decl(name)?;
        if !decl.allows(scope) {
            return Err(VariableError::ScopeViolation {
                name: name.to_string(),
                declared: decl.scope,
                requested: scope,
            });
        }
        decl.check(value)
    }

    /// A global write changes what stack reads resolve to, so both keys go
    fn invalidate(&self, name: &str) {
        self.cache.invalidate(&(name.to_string(), Scope::Global));
        self.cache.invalidate(&(name.to_string(), Scope::Stack));
    }

    fn mismatch(&self, name: &str, expected: VarType, found: &VarValue) -> VariableError {
        VariableError::TypeMismatch {
            name: name.to_string(),
            expected,
            found: found.var_type().to_string(),
        }
    }
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn store() -> VariableStore {
        let store = VariableStore::new();
        store
            .register(
                VariableDecl::new("fleet_size", VarType::Int)
                    .scope(Scope::Stack)
                    .default_value(1)
                    .validator(validators::int_range(1, 20)),
            )
            .unwrap();
        store
            .register(VariableDecl::new("region", VarType::String).scope(Scope::Stack))
            .unwrap();
        store
            .register(VariableDecl::new("max_spot_price", VarType::String).default_value("2.00"))
            .unwrap();
        store
    }

    #[test]
    fn test_duplicate_registration() {
        let store = store();
        let err = store
            .register(VariableDecl::new("region", VarType::String))
            .unwrap_err();
        assert_eq!(err, VariableError::DuplicateVariable("region".into()));
    }

    #[test]
    fn test_invalid_default_rejected() {
        let store = VariableStore::new();
        let err = store
            .register(
                VariableDecl::new("fleet_size", VarType::Int)
                    .default_value(0)
                    .validator(validators::int_range(1, 20)),
            )
            .unwrap_err();
        assert!(matches!(err, VariableError::ValidationFailed { .. }));
        assert!(!store.is_registered("fleet_size"));
    }

    #[test]
    fn test_get_default_and_unset() {
        let store = store();
        assert_eq!(store.get_int("fleet_size", Scope::Stack).unwrap(), 1);
        assert_eq!(
            store.get("region", Scope::Stack).unwrap_err(),
            VariableError::Unset("region".into())
        );
        assert_eq!(
            store.get("missing", Scope::Global).unwrap_err(),
            VariableError::UnknownVariable("missing".into())
        );
    }

    #[test]
    fn test_set_rejections_keep_previous_value() {
        let store = store();
        store.set("fleet_size", 4, Scope::Stack).unwrap();

        let err = store.set("fleet_size", "lots", Scope::Stack).unwrap_err();
        assert!(matches!(err, VariableError::TypeMismatch { .. }));

        let err = store.set("fleet_size", 99, Scope::Stack).unwrap_err();
        assert!(matches!(err, VariableError::ValidationFailed { .. }));

        assert_eq!(store.get_int("fleet_size", Scope::Stack).unwrap(), 4);
    }

    #[test]
    fn test_scope_rules() {
        let store = store();
        let err = store.set("max_spot_price", "1.50", Scope::Stack).unwrap_err();
        assert!(matches!(err, VariableError::ScopeViolation { .. }));

        // Stack reads fall back to global
        store.set("region", "eu-west-1", Scope::Global).unwrap();
        assert_eq!(store.get_string("region", Scope::Stack).unwrap(), "eu-west-1");

        store.set("region", "us-west-2", Scope::Stack).unwrap();
        assert_eq!(store.get_string("region", Scope::Stack).unwrap(), "us-west-2");
        assert_eq!(store.get_string("region", Scope::Global).unwrap(), "eu-west-1");

        store.clear_scope(Scope::Stack);
        assert_eq!(store.get_string("region", Scope::Stack).unwrap(), "eu-west-1");
    }

    #[test]
    fn test_write_invalidates_cached_read() {
        let store = store();
        store.set("region", "eu-west-1", Scope::Global).unwrap();
        assert_eq!(store.get_string("region", Scope::Stack).unwrap(), "eu-west-1");

        // Cached stack read must see the new global value
        store.set("region", "ap-southeast-2", Scope::Global).unwrap();
        assert_eq!(store.get_string("region", Scope::Stack).unwrap(), "ap-southeast-2");
    }

    #[test]
    fn test_bulk_is_all_or_nothing() {
        let store = store();
        let err = store
            .set_bulk([("region", VarValue::from("us-east-1")), ("fleet_size", VarValue::Int(50))], Scope::Stack)
            .unwrap_err();
        assert!(matches!(err, VariableError::ValidationFailed { .. }));
        assert!(store.get("region", Scope::Stack).is_err());

        store
            .set_bulk([("region", VarValue::from("us-east-1")), ("fleet_size", VarValue::from("3"))], Scope::Stack)
            .unwrap();
        let values = store.get_bulk(&["region", "fleet_size"], Scope::Stack).unwrap();
        assert_eq!(values["region"], VarValue::from("us-east-1"));
        assert_eq!(values["fleet_size"], VarValue::Int(3));
    }

    #[test]
    fn test_snapshot_skips_unset() {
        let store = store();
        let snapshot = store.snapshot(Scope::Stack);
        assert!(snapshot.contains_key("fleet_size"));
        assert!(snapshot.contains_key("max_spot_price"));
        assert!(!snapshot.contains_key("region"));
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_bulk() {
        let store = Arc::new(VariableStore::new());
        store.register(VariableDecl::new("a", VarType::Int).default_value(0)).unwrap();
        store.register(VariableDecl::new("b", VarType::Int).default_value(0)).unwrap();

        let reader = {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    let values = store.get_bulk(&["a", "b"], Scope::Global).unwrap();
                    assert_eq!(values["a"], values["b"]);
                }
            })
        };

        for i in 1..=1_000i64 {
            store.set_bulk([("a", i), ("b", i)], Scope::Global).unwrap();
        }
        reader.join().unwrap();
    }

    proptest! {
        #[test]
        fn prop_valid_values_round_trip(value in 1i64..=20, bad in 21i64..1000) {
            let store = store();
            store.set("fleet_size", value, Scope::Stack).unwrap();
            prop_assert_eq!(store.get_int("fleet_size", Scope::Stack).unwrap(), value);

            prop_assert!(store.set("fleet_size", bad, Scope::Stack).is_err());
            prop_assert_eq!(store.get_int("fleet_size", Scope::Stack).unwrap(), value);
        }
    }
}
