use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::json;

use crate::codec::Value;
use crate::display::portray;
use crate::error::RegMapError;
use crate::map_parser::RegisterMap;
use crate::register::{Register, RegisterDescriptor};

/// Lock a mutex, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a register is addressed by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterKey<'a> {
    Name(&'a str),
    Address(u16),
}

impl<'a> From<&'a str> for RegisterKey<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a String> for RegisterKey<'a> {
    fn from(name: &'a String) -> Self {
        Self::Name(name)
    }
}

impl From<u16> for RegisterKey<'_> {
    fn from(address: u16) -> Self {
        Self::Address(address)
    }
}

impl fmt::Display for RegisterKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(n) => write!(f, "name {n:?}"),
            Self::Address(a) => write!(f, "address {a}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// By address, then name.
    #[default]
    Numerical,
    Alphabetical,
}

/// Live registers in map order, unique by name.
#[derive(Clone, Debug, Default)]
pub struct RegisterStore {
    registers: Vec<Register>,
    index: HashMap<String, usize>,
}

impl From<RegisterMap> for RegisterStore {
    fn from(map: RegisterMap) -> Self {
        let mut store = Self::default();
        for descriptor in map {
            store.insert(descriptor);
        }
        store
    }
}

impl RegisterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a register. A repeated name replaces the earlier register in place.
    pub fn insert(&mut self, descriptor: RegisterDescriptor) {
        let register = Register::new(descriptor);
        if let Some(&pos) = self.index.get(register.name()) {
            self.registers[pos] = register;
        } else {
            self.index
                .insert(register.name().to_string(), self.registers.len());
            self.registers.push(register);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Position in map order. Address lookup returns the first match.
    ///
    /// # Errors
    ///
    /// `RegMapError::Lookup` when nothing matches.
    pub fn position<'k>(&self, key: impl Into<RegisterKey<'k>>) -> Result<usize, RegMapError> {
        let key = key.into();
        let found = match key {
            RegisterKey::Name(name) => self.index.get(name).copied(),
            RegisterKey::Address(address) => {
                self.registers.iter().position(|r| r.address() == address)
            }
        };
        found.ok_or_else(|| RegMapError::Lookup(key.to_string()))
    }

    /// # Errors
    ///
    /// `RegMapError::Lookup` when nothing matches.
    pub fn get<'k>(&self, key: impl Into<RegisterKey<'k>>) -> Result<&Register, RegMapError> {
        let pos = self.position(key)?;
        Ok(&self.registers[pos])
    }

    /// # Errors
    ///
    /// `RegMapError::Lookup` when nothing matches.
    pub fn get_mut<'k>(
        &mut self,
        key: impl Into<RegisterKey<'k>>,
    ) -> Result<&mut Register, RegMapError> {
        let pos = self.position(key)?;
        Ok(&mut self.registers[pos])
    }

    pub(crate) fn at_mut(&mut self, pos: usize) -> Option<&mut Register> {
        self.registers.get_mut(pos)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.registers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Register> {
        self.registers.iter_mut()
    }

    /// Stage `value` for the next sweep.
    ///
    /// # Errors
    ///
    /// `RegMapError::Lookup` when nothing matches.
    pub fn stage_write<'k>(
        &mut self,
        key: impl Into<RegisterKey<'k>>,
        value: impl Into<Value>,
    ) -> Result<(), RegMapError> {
        self.get_mut(key)?.stage_write(value.into());
        Ok(())
    }

    /// Enable exactly the named registers for polling.
    ///
    /// Unknown names are reported and ignored.
    pub fn apply_query_filter<S: AsRef<str>>(&mut self, names: &[S]) {
        for r in &mut self.registers {
            r.set_query(false);
        }
        for name in names {
            match self.get_mut(name.as_ref()) {
                Ok(r) => r.set_query(true),
                Err(e) => log::warn!("query filter: {e}"),
            }
        }
    }

    /// Register names in the given order; only query-enabled ones unless `include_all`.
    #[must_use]
    pub fn names_sorted(&self, order: SortOrder, include_all: bool) -> Vec<String> {
        let mut selected: Vec<&Register> = self
            .registers
            .iter()
            .filter(|r| include_all || r.query_enabled())
            .collect();
        match order {
            SortOrder::Numerical => selected.sort_by(|a, b| {
                a.address()
                    .cmp(&b.address())
                    .then_with(|| a.name().cmp(b.name()))
            }),
            SortOrder::Alphabetical => selected.sort_by(|a, b| a.name().cmp(b.name())),
        }
        selected.iter().map(|r| r.name().to_string()).collect()
    }

    /// One JSON object per register, in map order.
    #[must_use]
    pub fn snapshot_json(&self, include_all: bool) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = self
            .registers
            .iter()
            .filter(|r| include_all || r.query_enabled())
            .map(|r| {
                let d = r.descriptor();
                json!({
                    "address": d.address(),
                    "name": d.name(),
                    "query": r.query_enabled(),
                    "value": r.value(),
                    "rendered": portray(r),
                    "unit": d.unit(),
                    "hint": d.hint(),
                })
            })
            .collect();
        serde_json::Value::Array(rows)
    }
}

impl<'a> IntoIterator for &'a RegisterStore {
    type Item = &'a Register;
    type IntoIter = std::slice::Iter<'a, Register>;

    fn into_iter(self) -> Self::IntoIter {
        self.registers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_parser::parse_map;

    fn sample() -> RegisterStore {
        let (map, _) = parse_map([
            r#"30,1,1,0,"ZETA",">H","","","""#,
            r#"10,1,1,0,"ALPHA",">H","","","""#,
            r#"10,2,2,0,"ALIAS",">I","","","""#,
            r#"20,1,1,0,"MID",">h","V","","""#,
        ]);
        RegisterStore::from(map)
    }

    #[test]
    fn lookup_by_name_and_address() {
        let store = sample();
        assert_eq!(store.get("MID").unwrap().address(), 20);
        assert_eq!(store.get(10u16).unwrap().name(), "ALPHA");
        assert!(matches!(store.get("NOPE"), Err(RegMapError::Lookup(_))));
        assert!(matches!(store.get(99u16), Err(RegMapError::Lookup(_))));
    }

    #[test]
    fn staging_marks_write_pending() {
        let mut store = sample();
        store.stage_write("ZETA", 7u16).unwrap();
        let r = store.get("ZETA").unwrap();
        assert!(r.write_pending());
        assert_eq!(r.value(), Some(&Value::UInt(7)));
        assert!(store.stage_write(1234u16, 1u16).is_err());
    }

    #[test]
    fn iteration_follows_map_order() {
        let store = sample();
        let names: Vec<_> = store.iter().map(Register::name).collect();
        assert_eq!(names, ["ZETA", "ALPHA", "ALIAS", "MID"]);
    }

    #[test]
    fn sorted_names_and_filter() {
        let mut store = sample();
        assert_eq!(
            store.names_sorted(SortOrder::Numerical, false),
            ["ALIAS", "ALPHA", "MID", "ZETA"]
        );
        store.apply_query_filter(&["MID", "ZETA", "MISSING"]);
        assert_eq!(
            store.names_sorted(SortOrder::Alphabetical, false),
            ["MID", "ZETA"]
        );
        assert_eq!(store.names_sorted(SortOrder::Alphabetical, true).len(), 4);
    }

    #[test]
    fn snapshot_has_one_row_per_register() {
        let mut store = sample();
        store.get_mut("MID").unwrap().set_query(false);
        let snap = store.snapshot_json(false);
        let rows = snap.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["name"], "ZETA");
        assert_eq!(rows[0]["value"], serde_json::Value::Null);
        assert_eq!(rows[0]["rendered"], "None");
    }
}
