//! Register memory shared by the protocol server, the simulation engine and
//! the operator API.
//!
//! Every bank sits behind its own `RwLock`. Multi-cell writes hold the write
//! lock across validation and application, so a reader never observes a
//! partially applied request. Activity entries are recorded while the lock is
//! held, which keeps the log order identical to the apply order.

use crate::activity::{ActivityLog, WriteSource};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

pub const DEFAULT_REGISTER_COUNT: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterBank {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

impl RegisterBank {
    pub const ALL: [RegisterBank; 4] = [
        RegisterBank::Coil,
        RegisterBank::DiscreteInput,
        RegisterBank::HoldingRegister,
        RegisterBank::InputRegister,
    ];

    /// Single-bit banks hold 0 or 1 only.
    pub fn is_bit(self) -> bool {
        matches!(self, RegisterBank::Coil | RegisterBank::DiscreteInput)
    }

    /// Read-only as seen from the protocol; plant-side writers may still mutate it.
    pub fn is_read_only(self) -> bool {
        matches!(self, RegisterBank::DiscreteInput | RegisterBank::InputRegister)
    }

    fn index(self) -> usize {
        match self {
            RegisterBank::Coil => 0,
            RegisterBank::DiscreteInput => 1,
            RegisterBank::HoldingRegister => 2,
            RegisterBank::InputRegister => 3,
        }
    }
}

impl core::fmt::Display for RegisterBank {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RegisterBank::Coil => write!(f, "coil"),
            RegisterBank::DiscreteInput => write!(f, "discrete_input"),
            RegisterBank::HoldingRegister => write!(f, "holding_register"),
            RegisterBank::InputRegister => write!(f, "input_register"),
        }
    }
}

impl core::str::FromStr for RegisterBank {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coil" | "coils" | "co" => Ok(RegisterBank::Coil),
            "discrete_input" | "discrete_inputs" | "di" => Ok(RegisterBank::DiscreteInput),
            "holding_register" | "holding_registers" | "hr" => Ok(RegisterBank::HoldingRegister),
            "input_register" | "input_registers" | "ir" => Ok(RegisterBank::InputRegister),
            other => Err(StoreError::UnknownBank(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{bank} range {address}+{count} exceeds bank size {size}")]
    OutOfRange {
        bank: RegisterBank,
        address: u16,
        count: usize,
        size: u16,
    },
    #[error("{bank} is read-only for protocol writes")]
    ReadOnlyViolation { bank: RegisterBank },
    #[error("value {value} is not valid for {bank}")]
    InvalidValue { bank: RegisterBank, value: u16 },
    #[error("snapshot bank {bank} has {actual} cells, expected {expected}")]
    SizeMismatch {
        bank: RegisterBank,
        expected: u16,
        actual: usize,
    },
    #[error("unknown register bank '{0}'")]
    UnknownBank(String),
}

/// Full copy of all four banks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub register_count: u16,
    pub coils: Vec<u16>,
    pub discrete_inputs: Vec<u16>,
    pub holding_registers: Vec<u16>,
    pub input_registers: Vec<u16>,
}

impl StoreSnapshot {
    pub fn bank(&self, bank: RegisterBank) -> &[u16] {
        match bank {
            RegisterBank::Coil => &self.coils,
            RegisterBank::DiscreteInput => &self.discrete_inputs,
            RegisterBank::HoldingRegister => &self.holding_registers,
            RegisterBank::InputRegister => &self.input_registers,
        }
    }
}

#[derive(Debug)]
pub struct RegisterStore {
    size: u16,
    banks: [RwLock<Vec<u16>>; 4],
    activity: Arc<ActivityLog>,
}

impl RegisterStore {
    pub fn new(size: u16, activity: Arc<ActivityLog>) -> Self {
        let bank = || RwLock::new(vec![0u16; usize::from(size)]);
        Self {
            size,
            banks: [bank(), bank(), bank(), bank()],
            activity,
        }
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    fn read_bank(&self, bank: RegisterBank) -> RwLockReadGuard<'_, Vec<u16>> {
        self.banks[bank.index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_bank(&self, bank: RegisterBank) -> RwLockWriteGuard<'_, Vec<u16>> {
        self.banks[bank.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn span(&self, bank: RegisterBank, address: u16, count: usize) -> Result<Range<usize>, StoreError> {
        let start = usize::from(address);
        let end = start + count;
        if end > usize::from(self.size) {
            return Err(StoreError::OutOfRange {
                bank,
                address,
                count,
                size: self.size,
            });
        }
        Ok(start..end)
    }

    fn check_value(bank: RegisterBank, value: u16) -> Result<(), StoreError> {
        if bank.is_bit() && value > 1 {
            return Err(StoreError::InvalidValue { bank, value });
        }
        Ok(())
    }

    fn check_writer(bank: RegisterBank, source: WriteSource) -> Result<(), StoreError> {
        if bank.is_read_only() && source == WriteSource::ProtocolWrite {
            return Err(StoreError::ReadOnlyViolation { bank });
        }
        Ok(())
    }

    pub fn read(&self, bank: RegisterBank, address: u16, count: u16) -> Result<Vec<u16>, StoreError> {
        let span = self.span(bank, address, usize::from(count))?;
        Ok(self.read_bank(bank)[span].to_vec())
    }

    pub fn read_one(&self, bank: RegisterBank, address: u16) -> Result<u16, StoreError> {
        let span = self.span(bank, address, 1)?;
        Ok(self.read_bank(bank)[span.start])
    }

    /// Bit banks read back as booleans.
    pub fn read_bits(&self, bank: RegisterBank, address: u16, count: u16) -> Result<Vec<bool>, StoreError> {
        Ok(self
            .read(bank, address, count)?
            .into_iter()
            .map(|v| v != 0)
            .collect())
    }

    /// Write one cell and return its previous value.
    pub fn write_one(
        &self,
        bank: RegisterBank,
        address: u16,
        value: u16,
        source: WriteSource,
    ) -> Result<u16, StoreError> {
        Self::check_writer(bank, source)?;
        Self::check_value(bank, value)?;
        let span = self.span(bank, address, 1)?;

        let mut cells = self.write_bank(bank);
        let previous = cells[span.start];
        cells[span.start] = value;
        if previous != value {
            self.activity.record(bank, address, previous, value, source);
        }
        Ok(previous)
    }

    /// Write a contiguous run of cells. Either every cell changes or none does.
    pub fn write_many(
        &self,
        bank: RegisterBank,
        address: u16,
        values: &[u16],
        source: WriteSource,
    ) -> Result<(), StoreError> {
        Self::check_writer(bank, source)?;
        let span = self.span(bank, address, values.len())?;
        for &value in values {
            Self::check_value(bank, value)?;
        }

        let mut cells = self.write_bank(bank);
        for (offset, (cell, &value)) in cells[span].iter_mut().zip(values).enumerate() {
            let previous = *cell;
            *cell = value;
            if previous != value {
                self.activity
                    .record(bank, address + offset as u16, previous, value, source);
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            register_count: self.size,
            coils: self.read_bank(RegisterBank::Coil).clone(),
            discrete_inputs: self.read_bank(RegisterBank::DiscreteInput).clone(),
            holding_registers: self.read_bank(RegisterBank::HoldingRegister).clone(),
            input_registers: self.read_bank(RegisterBank::InputRegister).clone(),
        }
    }

    /// Check a snapshot against this store without applying it.
    pub fn validate_snapshot(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        for bank in RegisterBank::ALL {
            let cells = snapshot.bank(bank);
            if cells.len() != usize::from(self.size) {
                return Err(StoreError::SizeMismatch {
                    bank,
                    expected: self.size,
                    actual: cells.len(),
                });
            }
            for &value in cells {
                Self::check_value(bank, value)?;
            }
        }
        Ok(())
    }

    /// Replace every bank with the snapshot contents, all or nothing.
    pub fn restore(&self, snapshot: &StoreSnapshot, source: WriteSource) -> Result<(), StoreError> {
        self.validate_snapshot(snapshot)?;

        // Locks are taken in bank order so concurrent restores cannot deadlock.
        let mut guards: Vec<_> = RegisterBank::ALL
            .iter()
            .map(|&bank| (bank, self.write_bank(bank)))
            .collect();

        for (bank, cells) in &mut guards {
            for (address, (cell, &value)) in cells.iter_mut().zip(snapshot.bank(*bank)).enumerate() {
                if *cell != value {
                    self.activity
                        .record(*bank, address as u16, *cell, value, source);
                    *cell = value;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(size: u16) -> RegisterStore {
        RegisterStore::new(size, Arc::new(ActivityLog::new()))
    }

    #[test]
    fn test_write_one_then_read() {
        let store = store(100);
        let previous = store
            .write_one(RegisterBank::HoldingRegister, 7, 0xBEEF, WriteSource::ExternalApi)
            .unwrap();
        assert_eq!(previous, 0);
        assert_eq!(store.read(RegisterBank::HoldingRegister, 7, 1).unwrap(), vec![0xBEEF]);
    }

    #[test]
    fn test_read_boundaries() {
        let store = store(100);
        assert_eq!(store.read(RegisterBank::Coil, 90, 10).unwrap().len(), 10);
        assert!(matches!(
            store.read(RegisterBank::Coil, 91, 10),
            Err(StoreError::OutOfRange { .. })
        ));
        assert!(store.read_one(RegisterBank::InputRegister, 100).is_err());
    }

    #[test]
    fn test_protocol_cannot_write_read_only_banks() {
        let store = store(10);
        assert_eq!(
            store.write_one(RegisterBank::InputRegister, 0, 5, WriteSource::ProtocolWrite),
            Err(StoreError::ReadOnlyViolation { bank: RegisterBank::InputRegister })
        );
        assert!(store
            .write_one(RegisterBank::InputRegister, 0, 5, WriteSource::Simulation)
            .is_ok());
        assert!(store
            .write_one(RegisterBank::DiscreteInput, 0, 1, WriteSource::ExternalApi)
            .is_ok());
    }

    #[test]
    fn test_bit_banks_reject_non_boolean() {
        let store = store(10);
        assert!(matches!(
            store.write_one(RegisterBank::Coil, 0, 2, WriteSource::ExternalApi),
            Err(StoreError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_write_many_is_all_or_nothing() {
        let store = store(20);
        let result = store.write_many(
            RegisterBank::HoldingRegister,
            18,
            &[1, 2, 3],
            WriteSource::ProtocolWrite,
        );
        assert!(result.is_err());
        assert_eq!(store.read(RegisterBank::HoldingRegister, 0, 20).unwrap(), vec![0; 20]);

        // Invalid value in the middle leaves earlier cells untouched
        let result = store.write_many(RegisterBank::Coil, 0, &[1, 1, 7, 1], WriteSource::ProtocolWrite);
        assert!(result.is_err());
        assert_eq!(store.read(RegisterBank::Coil, 0, 4).unwrap(), vec![0; 4]);
        assert!(store.activity().is_empty());
    }

    #[test]
    fn test_changes_are_logged_per_cell() {
        let store = store(20);
        store
            .write_many(RegisterBank::HoldingRegister, 0, &[5, 0, 7], WriteSource::ProtocolWrite)
            .unwrap();

        // Cell 1 did not change
        let entries = store.activity().recent(10);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].address, 0);
        assert_eq!(entries[1].address, 2);
        assert_eq!(entries[1].new, 7);
        assert_eq!(entries[1].source, WriteSource::ProtocolWrite);

        // Identical rewrite is not logged
        store
            .write_one(RegisterBank::HoldingRegister, 0, 5, WriteSource::ExternalApi)
            .unwrap();
        assert_eq!(store.activity().len(), 2);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let source = store(16);
        source.write_one(RegisterBank::Coil, 3, 1, WriteSource::ExternalApi).unwrap();
        source
            .write_many(RegisterBank::InputRegister, 4, &[10, 20], WriteSource::Simulation)
            .unwrap();
        let snapshot = source.snapshot();

        let target = store(16);
        target.restore(&snapshot, WriteSource::ExternalApi).unwrap();
        assert_eq!(target.snapshot(), snapshot);
    }

    #[test]
    fn test_restore_rejects_bad_snapshot_untouched() {
        let target = store(8);
        target
            .write_one(RegisterBank::HoldingRegister, 0, 99, WriteSource::ExternalApi)
            .unwrap();

        let mut snapshot = target.snapshot();
        snapshot.holding_registers[0] = 1;
        snapshot.coils[1] = 3;
        assert!(target.restore(&snapshot, WriteSource::ExternalApi).is_err());
        assert_eq!(target.read_one(RegisterBank::HoldingRegister, 0).unwrap(), 99);

        let mut short = target.snapshot();
        short.input_registers.pop();
        assert!(matches!(
            target.restore(&short, WriteSource::ExternalApi),
            Err(StoreError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_bank_parsing() {
        assert_eq!("hr".parse::<RegisterBank>().unwrap(), RegisterBank::HoldingRegister);
        assert_eq!("coils".parse::<RegisterBank>().unwrap(), RegisterBank::Coil);
        assert!("bogus".parse::<RegisterBank>().is_err());
    }
}
