//! Argset registry
//!
//! Named parameter sets handed to analysis functions. Provides single and
//! batch insertion (from [`Table`] rows or lists of records) with
//! deterministic name synthesis, lookup, and bulk rewriting.

use crate::config::DuplicatePolicy;
use crate::error::{EntryKind, PlanError, Result};
use crate::naming::NameSequence;
use crate::table::{Fields, Table};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// A named set of analysis parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argset {
    name: String,
    fields: Fields,
}

impl Argset {
    /// Create a new argset
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Fields) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Argset name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All fields
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Mutable access to fields
    #[inline]
    pub fn fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }

    /// Consume into fields
    #[inline]
    #[must_use]
    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// Get a field
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a field, falling back to `default` when absent
    #[inline]
    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.fields.get(key).unwrap_or(default)
    }

    /// Get a field deserialized as `T`
    ///
    /// # Errors
    /// Returns `InvalidInput` if the field is missing or has the wrong shape
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.fields.get(key).ok_or_else(|| {
            PlanError::InvalidInput(format!("argset '{}' has no field '{key}'", self.name))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            PlanError::InvalidInput(format!("argset '{}' field '{key}': {e}", self.name))
        })
    }

    /// Set a field, returning the previous value
    #[inline]
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }

    /// Builder-style [`Argset::set`]
    #[inline]
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }
}

/// Registry of argsets, in registration order
#[derive(Debug, Clone)]
pub struct ArgsetRegistry {
    entries: IndexMap<String, Argset>,
    names: NameSequence,
    policy: DuplicatePolicy,
}

impl ArgsetRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(prefix: &str, policy: DuplicatePolicy) -> Self {
        Self {
            entries: IndexMap::new(),
            names: NameSequence::new(prefix),
            policy,
        }
    }

    /// Insert one argset; synthesizes a name when `name` is `None`
    ///
    /// # Errors
    /// - `DuplicateKey` if the name exists and the policy rejects duplicates
    /// - `InvalidInput` if an explicit name is empty
    pub fn add_argset(&mut self, name: Option<&str>, fields: Fields) -> Result<String> {
        let name = match name {
            Some(name) => {
                self.check_insertable(name)?;
                name.to_string()
            }
            None => self.synthesize_name(),
        };
        self.insert(name.clone(), fields);
        Ok(name)
    }

    /// Insert one argset per record, in order
    ///
    /// With `name_field`, that field supplies each argset's name and is removed
    /// from its fields; otherwise names are synthesized. The whole batch is
    /// validated before anything is inserted.
    ///
    /// # Errors
    /// - `InvalidInput` if a record lacks a usable name field or names repeat
    /// - `DuplicateKey` if a name already exists and the policy rejects duplicates
    pub fn add_argset_from_list<I>(&mut self, items: I, name_field: Option<&str>) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = Fields>,
    {
        let mut items: Vec<Fields> = items.into_iter().collect();
        let names = match name_field {
            Some(field) => {
                let names = take_names(&mut items, field)?;
                for name in &names {
                    self.check_insertable(name)?;
                }
                names
            }
            None => items.iter().map(|_| self.synthesize_name()).collect(),
        };

        for (name, fields) in names.iter().zip(items) {
            self.insert(name.clone(), fields);
        }
        tracing::debug!(count = names.len(), "added argsets from list");
        Ok(names)
    }

    /// Insert one argset per table row; see [`ArgsetRegistry::add_argset_from_list`]
    ///
    /// # Errors
    /// Same as [`ArgsetRegistry::add_argset_from_list`]
    pub fn add_argset_from_table(&mut self, table: &Table, name_field: Option<&str>) -> Result<Vec<String>> {
        self.add_argset_from_list(table.records()?, name_field)
    }

    /// Look up an argset
    ///
    /// # Errors
    /// Returns `NotFound` if absent
    pub fn get_argset(&self, name: &str) -> Result<&Argset> {
        self.entries
            .get(name)
            .ok_or_else(|| PlanError::not_found(EntryKind::Argset, name))
    }

    /// Rewrite every argset with `f`, in registration order
    ///
    /// Iterates over a snapshot of names taken up front; each result replaces
    /// the stored argset under its original name.
    ///
    /// # Errors
    /// Returns `ActionFailed` on the first argset `f` fails on; earlier
    /// argsets keep their rewritten values
    pub fn apply_action_fn_to_all_argsets<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(Argset) -> anyhow::Result<Argset>,
    {
        let names: Vec<String> = self.entries.keys().cloned().collect();
        for name in names {
            let Some(current) = self.entries.get(&name).cloned() else {
                continue;
            };
            let mut updated = f(current).map_err(|source| PlanError::ActionFailed {
                argset: name.clone(),
                source,
            })?;
            updated.name.clone_from(&name);
            if let Some(slot) = self.entries.get_mut(&name) {
                *slot = updated;
            }
        }
        Ok(())
    }

    /// Check if an argset exists
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Remove an argset
    pub fn remove(&mut self, name: &str) -> Option<Argset> {
        self.entries.shift_remove(name)
    }

    /// Names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Iterate over argsets in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Argset> {
        self.entries.values()
    }

    /// Number of argsets
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove everything and restart name synthesis
    pub fn clear(&mut self) {
        self.entries.clear();
        self.names.reset();
    }

    pub(crate) fn check_insertable(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(PlanError::InvalidInput("argset name must not be empty".to_string()));
        }
        if self.policy == DuplicatePolicy::Reject && self.entries.contains_key(name) {
            return Err(PlanError::duplicate(EntryKind::Argset, name));
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, name: String, fields: Fields) {
        tracing::debug!(argset = %name, fields = fields.len(), "registered argset");
        let argset = Argset::new(name.clone(), fields);
        self.entries.insert(name, argset);
    }

    fn synthesize_name(&mut self) -> String {
        let entries = &self.entries;
        self.names.next_free(|n| entries.contains_key(n))
    }
}

impl Default for ArgsetRegistry {
    fn default() -> Self {
        Self::new("argset_", DuplicatePolicy::Reject)
    }
}

/// Pull the name column out of every record, checking uniqueness within the batch
pub(crate) fn take_names(items: &mut [Fields], field: &str) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(items.len());
    for (row, item) in items.iter_mut().enumerate() {
        let name = take_text(item, field, row)?;
        if !seen.insert(name.clone()) {
            return Err(PlanError::InvalidInput(format!(
                "name '{name}' repeats in field '{field}' (row {row})"
            )));
        }
        names.push(name);
    }
    Ok(names)
}

/// Remove `field` from a record and render it as a name
pub(crate) fn take_text(item: &mut Fields, field: &str, row: usize) -> Result<String> {
    let text = match item.shift_remove(field) {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(PlanError::InvalidInput(format!(
                "field '{field}' in row {row} is not a usable name: {other}"
            )))
        }
        None => {
            return Err(PlanError::InvalidInput(format!(
                "row {row} has no field '{field}'"
            )))
        }
    };
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn add_argset_synthesizes_names() {
        let mut reg = ArgsetRegistry::default();
        let a = reg.add_argset(None, fields(&[("x", json!(1))])).unwrap();
        let b = reg.add_argset(None, fields(&[("x", json!(2))])).unwrap();
        assert_eq!(a, "argset_1");
        assert_eq!(b, "argset_2");
        assert_eq!(reg.get_argset("argset_2").unwrap().get("x"), Some(&json!(2)));
    }

    #[test]
    fn synthesized_names_skip_explicit() {
        let mut reg = ArgsetRegistry::default();
        reg.add_argset(Some("argset_1"), Fields::new()).unwrap();
        let name = reg.add_argset(None, Fields::new()).unwrap();
        assert_eq!(name, "argset_2");
    }

    #[test]
    fn duplicate_rejected() {
        let mut reg = ArgsetRegistry::default();
        reg.add_argset(Some("a"), Fields::new()).unwrap();
        let err = reg.add_argset(Some("a"), Fields::new()).unwrap_err();
        assert!(matches!(
            err,
            PlanError::DuplicateKey {
                kind: EntryKind::Argset,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_overwritten_under_policy() {
        let mut reg = ArgsetRegistry::new("argset_", DuplicatePolicy::Overwrite);
        reg.add_argset(Some("a"), fields(&[("v", json!(1))])).unwrap();
        reg.add_argset(Some("a"), fields(&[("v", json!(2))])).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get_argset("a").unwrap().get("v"), Some(&json!(2)));
    }

    #[test]
    fn empty_name_rejected() {
        let mut reg = ArgsetRegistry::default();
        assert!(matches!(
            reg.add_argset(Some(""), Fields::new()),
            Err(PlanError::InvalidInput(_))
        ));
    }

    #[test]
    fn get_missing_not_found() {
        let reg = ArgsetRegistry::default();
        assert!(matches!(
            reg.get_argset("nope"),
            Err(PlanError::NotFound {
                kind: EntryKind::Argset,
                ..
            })
        ));
    }

    #[test]
    fn from_list_with_name_field() {
        let mut reg = ArgsetRegistry::default();
        let names = reg
            .add_argset_from_list(
                vec![
                    fields(&[("id", json!("north")), ("age", json!(10))]),
                    fields(&[("id", json!(7)), ("age", json!(20))]),
                ],
                Some("id"),
            )
            .unwrap();
        assert_eq!(names, vec!["north", "7"]);
        let north = reg.get_argset("north").unwrap();
        assert!(north.get("id").is_none());
        assert_eq!(north.get("age"), Some(&json!(10)));
    }

    #[test]
    fn from_list_repeated_name_inserts_nothing() {
        let mut reg = ArgsetRegistry::default();
        let result = reg.add_argset_from_list(
            vec![fields(&[("id", json!("a"))]), fields(&[("id", json!("a"))])],
            Some("id"),
        );
        assert!(matches!(result, Err(PlanError::InvalidInput(_))));
        assert!(reg.is_empty());
    }

    #[test]
    fn from_list_collision_with_registry_inserts_nothing() {
        let mut reg = ArgsetRegistry::default();
        reg.add_argset(Some("b"), Fields::new()).unwrap();
        let result = reg.add_argset_from_list(
            vec![fields(&[("id", json!("a"))]), fields(&[("id", json!("b"))])],
            Some("id"),
        );
        assert!(matches!(result, Err(PlanError::DuplicateKey { .. })));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn from_table_synthesized() {
        let table = Table::new(["p"])
            .with_row(vec![json!(0.1)])
            .unwrap()
            .with_row(vec![json!(0.2)])
            .unwrap();
        let mut reg = ArgsetRegistry::default();
        let names = reg.add_argset_from_table(&table, None).unwrap();
        assert_eq!(names, vec!["argset_1", "argset_2"]);
        assert_eq!(reg.get_argset("argset_1").unwrap().get("p"), Some(&json!(0.1)));
    }

    #[test]
    fn apply_action_rewrites_in_order() {
        let mut reg = ArgsetRegistry::default();
        reg.add_argset(Some("a"), fields(&[("v", json!(1))])).unwrap();
        reg.add_argset(Some("b"), fields(&[("v", json!(2))])).unwrap();

        let mut visited = Vec::new();
        reg.apply_action_fn_to_all_argsets(|argset| {
            visited.push(argset.name().to_string());
            let v: i64 = argset.get_as("v")?;
            Ok(argset.with_field("doubled", json!(v * 2)))
        })
        .unwrap();

        assert_eq!(visited, vec!["a", "b"]);
        assert_eq!(reg.get_argset("b").unwrap().get("doubled"), Some(&json!(4)));
    }

    #[test]
    fn apply_action_keeps_key_name() {
        let mut reg = ArgsetRegistry::default();
        reg.add_argset(Some("a"), Fields::new()).unwrap();
        reg.apply_action_fn_to_all_argsets(|_| Ok(Argset::new("renamed", Fields::new())))
            .unwrap();
        assert_eq!(reg.get_argset("a").unwrap().name(), "a");
        assert!(!reg.contains("renamed"));
    }

    #[test]
    fn apply_action_error_names_argset() {
        let mut reg = ArgsetRegistry::default();
        reg.add_argset(Some("a"), Fields::new()).unwrap();
        let err = reg
            .apply_action_fn_to_all_argsets(|_| Err(anyhow::anyhow!("nope")))
            .unwrap_err();
        assert!(matches!(err, PlanError::ActionFailed { ref argset, .. } if argset == "a"));
    }

    #[test]
    fn argset_accessors() {
        let argset = Argset::new("a", fields(&[("n", json!(3))]));
        let fallback = json!("dflt");
        assert_eq!(argset.get_or("missing", &fallback), &fallback);
        assert_eq!(argset.get_as::<u32>("n").unwrap(), 3);
        assert!(argset.get_as::<String>("n").is_err());
        assert!(argset.get_as::<u32>("missing").is_err());
    }
}
