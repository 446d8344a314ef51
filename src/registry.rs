//! Symbolic variables mapped onto register ranges, with engineering-unit
//! conversion.

use crate::activity::WriteSource;
use crate::store::{RegisterBank, RegisterStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub bank: RegisterBank,
    pub address: u16,
    /// Number of consecutive cells: 1 for bits and 16-bit words, 2 for 32-bit words.
    pub count: u16,
    pub scale: f64,
    pub unit: String,
    pub writable: bool,
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub description: String,
}

impl Variable {
    pub fn new(name: &str, bank: RegisterBank, address: u16, scale: f64, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            bank,
            address,
            count: 1,
            scale,
            unit: unit.to_string(),
            writable: !bank.is_read_only(),
            signed: false,
            description: String::new(),
        }
    }

    pub fn wide(mut self) -> Self {
        self.count = 2;
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    fn bits(&self) -> u32 {
        if self.bank.is_bit() {
            1
        } else {
            16 * u32::from(self.count)
        }
    }

    /// Inclusive raw range representable by this variable.
    fn raw_limits(&self) -> (i64, i64) {
        let bits = self.bits();
        if self.signed && !self.bank.is_bit() {
            (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
        } else {
            (0, (1i64 << bits) - 1)
        }
    }

    fn validate(&self, bank_size: u16) -> Result<(), RegistryError> {
        if self.name.is_empty() {
            return Err(RegistryError::Range("variable name is empty".to_string()));
        }
        let count_ok = if self.bank.is_bit() {
            self.count == 1
        } else {
            self.count == 1 || self.count == 2
        };
        if !count_ok {
            return Err(RegistryError::Range(format!(
                "{}: count {} unsupported for {}",
                self.name, self.count, self.bank
            )));
        }
        if u32::from(self.address) + u32::from(self.count) > u32::from(bank_size) {
            return Err(RegistryError::Range(format!(
                "{}: {} {}+{} outside bank of {}",
                self.name, self.bank, self.address, self.count, bank_size
            )));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(RegistryError::Range(format!(
                "{}: scale {} must be positive and finite",
                self.name, self.scale
            )));
        }
        Ok(())
    }

    fn decode(&self, cells: &[u16]) -> i64 {
        let unsigned = match cells {
            [hi, lo] => (u32::from(*hi) << 16) | u32::from(*lo),
            [single] => u32::from(*single),
            _ => 0,
        };
        if !self.signed || self.bank.is_bit() {
            return i64::from(unsigned);
        }
        if self.count == 2 {
            i64::from(unsigned as i32)
        } else {
            i64::from(unsigned as u16 as i16)
        }
    }

    fn encode(&self, raw: i64) -> Vec<u16> {
        if self.count == 2 {
            let word = raw as u32;
            vec![(word >> 16) as u16, word as u16]
        } else {
            vec![raw as u16]
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("variable '{0}' already defined")]
    DuplicateName(String),
    #[error("unknown variable '{0}'")]
    UnknownName(String),
    #[error("range error: {0}")]
    Range(String),
    #[error("variable '{0}' is not writable")]
    NotWritable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Name-indexed variable table over a shared register store.
#[derive(Debug)]
pub struct VariableRegistry {
    store: Arc<RegisterStore>,
    variables: RwLock<BTreeMap<String, Variable>>,
}

impl VariableRegistry {
    pub fn new(store: Arc<RegisterStore>) -> Self {
        Self {
            store,
            variables: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<RegisterStore> {
        &self.store
    }

    fn table(&self) -> RwLockReadGuard<'_, BTreeMap<String, Variable>> {
        self.variables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Variable>> {
        self.variables.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn define(&self, variable: Variable) -> Result<(), RegistryError> {
        variable.validate(self.store.size())?;
        let mut table = self.table_mut();
        if table.contains_key(&variable.name) {
            return Err(RegistryError::DuplicateName(variable.name));
        }
        table.insert(variable.name.clone(), variable);
        Ok(())
    }

    /// Remove a variable. Register contents are left as they are.
    pub fn remove(&self, name: &str) -> Result<Variable, RegistryError> {
        self.table_mut()
            .remove(name)
            .ok_or_else(|| RegistryError::UnknownName(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<Variable> {
        self.table().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table().contains_key(name)
    }

    /// First variable (by name) whose span covers the given cell.
    pub fn find_by_address(&self, bank: RegisterBank, address: u16) -> Option<Variable> {
        self.table()
            .values()
            .find(|v| v.bank == bank && address >= v.address && address - v.address < v.count)
            .cloned()
    }

    pub fn list(&self) -> Vec<Variable> {
        self.table().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    fn lookup(&self, name: &str) -> Result<Variable, RegistryError> {
        self.get(name)
            .ok_or_else(|| RegistryError::UnknownName(name.to_string()))
    }

    /// Raw integer value, sign-extended when the variable is signed.
    pub fn read_raw(&self, name: &str) -> Result<i64, RegistryError> {
        let variable = self.lookup(name)?;
        let cells = self.store.read(variable.bank, variable.address, variable.count)?;
        Ok(variable.decode(&cells))
    }

    pub fn read_engineering(&self, name: &str) -> Result<f64, RegistryError> {
        let variable = self.lookup(name)?;
        let cells = self.store.read(variable.bank, variable.address, variable.count)?;
        Ok(quantize(variable.decode(&cells) as f64 * variable.scale, variable.scale))
    }

    /// Convert to raw units and store. Returns the raw value written.
    pub fn write_engineering(&self, name: &str, value: f64, source: WriteSource) -> Result<i64, RegistryError> {
        let variable = self.lookup(name)?;
        if !variable.writable && source == WriteSource::ExternalApi {
            return Err(RegistryError::NotWritable(variable.name));
        }
        if !value.is_finite() {
            return Err(RegistryError::Range(format!("{name}: value {value} is not finite")));
        }

        let scaled = (value / variable.scale).round();
        let (min, max) = variable.raw_limits();
        if scaled < min as f64 || scaled > max as f64 {
            return Err(RegistryError::Range(format!(
                "{name}: raw value {scaled} outside {min}..={max}"
            )));
        }
        let raw = scaled as i64;

        let cells = variable.encode(raw);
        if let [single] = cells.as_slice() {
            self.store.write_one(variable.bank, variable.address, *single, source)?;
        } else {
            self.store.write_many(variable.bank, variable.address, &cells, source)?;
        }
        Ok(raw)
    }

    /// Replace the whole table. Every definition is validated before the swap.
    pub fn replace_all(&self, variables: Vec<Variable>) -> Result<(), RegistryError> {
        let mut next = BTreeMap::new();
        for variable in variables {
            variable.validate(self.store.size())?;
            if next.contains_key(&variable.name) {
                return Err(RegistryError::DuplicateName(variable.name));
            }
            next.insert(variable.name.clone(), variable);
        }
        *self.table_mut() = next;
        Ok(())
    }
}

/// Round `value` to the number of decimals the scale can express.
fn quantize(value: f64, scale: f64) -> f64 {
    let mut factor = 1.0;
    for _ in 0..=9 {
        let shifted = scale * factor;
        if (shifted - shifted.round()).abs() < 1e-9 * shifted.max(1.0) {
            return (value * factor).round() / factor;
        }
        factor *= 10.0;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityLog;

    fn registry() -> VariableRegistry {
        let store = Arc::new(RegisterStore::new(100, Arc::new(ActivityLog::new())));
        VariableRegistry::new(store)
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(2305.0 * 0.1, 0.1), 230.5);
        assert_eq!(quantize(6000.0 * 0.01, 0.01), 60.0);
        assert_eq!(quantize(950.0 * 0.001, 0.001), 0.95);
        assert_eq!(quantize(42.0, 1.0), 42.0);
    }

    #[test]
    fn test_define_validation() {
        let registry = registry();
        let bad_span = Variable::new("X", RegisterBank::HoldingRegister, 99, 1.0, "").wide();
        assert!(matches!(registry.define(bad_span), Err(RegistryError::Range(_))));

        let wide_bit = Variable::new("B", RegisterBank::Coil, 0, 1.0, "").wide();
        assert!(matches!(registry.define(wide_bit), Err(RegistryError::Range(_))));

        let zero_scale = Variable::new("Z", RegisterBank::InputRegister, 0, 0.0, "");
        assert!(matches!(registry.define(zero_scale), Err(RegistryError::Range(_))));

        registry
            .define(Variable::new("V", RegisterBank::InputRegister, 0, 0.1, "V"))
            .unwrap();
        assert_eq!(
            registry.define(Variable::new("V", RegisterBank::Coil, 1, 1.0, "")),
            Err(RegistryError::DuplicateName("V".to_string()))
        );
    }

    #[test]
    fn test_signed_round_trip() {
        let registry = registry();
        registry
            .define(Variable::new("Q", RegisterBank::HoldingRegister, 3, 0.1, "kvar").signed())
            .unwrap();

        registry.write_engineering("Q", -12.5, WriteSource::ExternalApi).unwrap();
        assert_eq!(registry.read_raw("Q").unwrap(), -125);
        assert_eq!(registry.read_engineering("Q").unwrap(), -12.5);
        assert_eq!(
            registry.store().read_one(RegisterBank::HoldingRegister, 3).unwrap(),
            (-125i16) as u16
        );
    }

    #[test]
    fn test_wide_variable_high_word_first() {
        let registry = registry();
        registry
            .define(Variable::new("E", RegisterBank::InputRegister, 10, 1.0, "Wh").wide())
            .unwrap();

        registry.write_engineering("E", 70_000.0, WriteSource::Simulation).unwrap();
        assert_eq!(
            registry.store().read(RegisterBank::InputRegister, 10, 2).unwrap(),
            vec![1, 4_464]
        );
        assert_eq!(registry.read_engineering("E").unwrap(), 70_000.0);
    }

    #[test]
    fn test_out_of_width_rejected() {
        let registry = registry();
        registry
            .define(Variable::new("P", RegisterBank::HoldingRegister, 0, 1.0, ""))
            .unwrap();
        assert!(matches!(
            registry.write_engineering("P", 65_536.0, WriteSource::ExternalApi),
            Err(RegistryError::Range(_))
        ));
        assert!(matches!(
            registry.write_engineering("P", -1.0, WriteSource::ExternalApi),
            Err(RegistryError::Range(_))
        ));
        assert!(matches!(
            registry.write_engineering("P", f64::NAN, WriteSource::ExternalApi),
            Err(RegistryError::Range(_))
        ));
        assert_eq!(registry.read_raw("P").unwrap(), 0);
    }

    #[test]
    fn test_not_writable_blocks_external_api_only() {
        let registry = registry();
        registry
            .define(Variable::new("F", RegisterBank::InputRegister, 0, 0.01, "Hz"))
            .unwrap();
        assert_eq!(
            registry.write_engineering("F", 60.0, WriteSource::ExternalApi),
            Err(RegistryError::NotWritable("F".to_string()))
        );
        assert_eq!(registry.write_engineering("F", 60.0, WriteSource::Simulation), Ok(6000));
    }

    #[test]
    fn test_find_by_address_covers_span() {
        let registry = registry();
        registry
            .define(Variable::new("E", RegisterBank::InputRegister, 10, 1.0, "Wh").wide())
            .unwrap();
        assert_eq!(
            registry.find_by_address(RegisterBank::InputRegister, 11).map(|v| v.name),
            Some("E".to_string())
        );
        assert!(registry.find_by_address(RegisterBank::InputRegister, 12).is_none());
        assert!(registry.find_by_address(RegisterBank::HoldingRegister, 10).is_none());
    }

    #[test]
    fn test_replace_all_is_all_or_nothing() {
        let registry = registry();
        registry
            .define(Variable::new("A", RegisterBank::Coil, 0, 1.0, ""))
            .unwrap();

        let batch = vec![
            Variable::new("B", RegisterBank::Coil, 1, 1.0, ""),
            Variable::new("B", RegisterBank::Coil, 2, 1.0, ""),
        ];
        assert!(registry.replace_all(batch).is_err());
        assert!(registry.contains("A"));

        registry
            .replace_all(vec![Variable::new("C", RegisterBank::Coil, 3, 1.0, "")])
            .unwrap();
        assert_eq!(registry.list().len(), 1);
        assert!(registry.get("A").is_none());
    }
}
