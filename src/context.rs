//! Slave register context
//!
//! Four banks (coils, discrete inputs, holding registers, input registers),
//! each a sparse map from address to value built from a
//! [`RegisterContextConfig`]. Only configured addresses exist; touching any
//! other address fails with `IllegalDataAddress`, which the slave reports as
//! exception code 2.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{RegisterContextConfig, RegisterEntry};
use crate::constants::ADDRESS_SPACE;
use crate::error::{ModbusError, ModbusResult};

/// Register context shared by every connection of a slave
pub type SharedContext = Arc<Mutex<RegisterContext>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

impl RegisterKind {
    pub const ALL: [RegisterKind; 4] = [
        RegisterKind::Coil,
        RegisterKind::DiscreteInput,
        RegisterKind::HoldingRegister,
        RegisterKind::InputRegister,
    ];

    /// Coils and discrete inputs hold single bits
    pub fn is_bit(self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::DiscreteInput)
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegisterKind::Coil => "coil",
            RegisterKind::DiscreteInput => "discrete_input",
            RegisterKind::HoldingRegister => "holding_register",
            RegisterKind::InputRegister => "input_register",
        };
        f.write_str(name)
    }
}

/// Sparse address → value map for one bank
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterBank<T> {
    values: BTreeMap<u16, T>,
}

impl<T: Copy> RegisterBank<T> {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, address: u16) -> bool {
        self.values.contains_key(&address)
    }

    /// Every address in `address..address+count` is configured
    pub fn covers(&self, address: u16, count: usize) -> bool {
        if count == 0 || address as usize + count > ADDRESS_SPACE {
            return false;
        }
        let end = (address as usize + count - 1) as u16;
        self.values.range(address..=end).count() == count
    }

    fn check(&self, address: u16, count: usize) -> ModbusResult<()> {
        if self.covers(address, count) {
            Ok(())
        } else {
            Err(ModbusError::IllegalDataAddress { address, count })
        }
    }

    pub fn read(&self, address: u16, count: usize) -> ModbusResult<Vec<T>> {
        self.check(address, count)?;
        let end = (address as usize + count - 1) as u16;
        Ok(self.values.range(address..=end).map(|(_, v)| *v).collect())
    }

    /// All-or-nothing: nothing changes unless the whole range is configured
    pub fn write(&mut self, address: u16, values: &[T]) -> ModbusResult<()> {
        self.check(address, values.len())?;
        for (offset, value) in values.iter().enumerate() {
            self.values.insert(address + offset as u16, *value);
        }
        Ok(())
    }

    /// Add a configured address during construction
    fn define(&mut self, address: u16, value: T) -> bool {
        self.values.insert(address, value).is_none()
    }
}

/// The four register banks of a slave
#[derive(Debug, Clone, Default)]
pub struct RegisterContext {
    coils: RegisterBank<bool>,
    discrete_inputs: RegisterBank<bool>,
    holding_registers: RegisterBank<u16>,
    input_registers: RegisterBank<u16>,
    config: RegisterContextConfig,
}

impl RegisterContext {
    /// Empty context; every access fails with `IllegalDataAddress`
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the banks from a declarative configuration.
    ///
    /// Rejects entries with no values, entries running past address 65535
    /// and entries overlapping an earlier entry of the same bank.
    pub fn from_config(config: RegisterContextConfig) -> ModbusResult<Self> {
        let mut ctx = Self::default();

        for kind in RegisterKind::ALL {
            for entry in entries_of(&config, kind) {
                ctx.define_entry(kind, entry)?;
            }
        }

        debug!(
            "Register context built: {} coils, {} discrete inputs, {} holding registers, {} input registers",
            ctx.coils.len(),
            ctx.discrete_inputs.len(),
            ctx.holding_registers.len(),
            ctx.input_registers.len()
        );

        ctx.config = config;
        Ok(ctx)
    }

    pub fn from_json_str(json: &str) -> ModbusResult<Self> {
        Self::from_config(RegisterContextConfig::from_json_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ModbusResult<Self> {
        Self::from_config(RegisterContextConfig::from_json_file(path)?)
    }

    pub fn into_shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    fn define_entry(&mut self, kind: RegisterKind, entry: &RegisterEntry) -> ModbusResult<()> {
        let values = entry.value.as_slice();
        if values.is_empty() {
            return Err(ModbusError::configuration(format!(
                "{} entry at {} has no values",
                kind, entry.start_address
            )));
        }
        if entry.start_address as usize + values.len() > ADDRESS_SPACE {
            return Err(ModbusError::configuration(format!(
                "{} entry at {} with {} values runs past address 65535",
                kind,
                entry.start_address,
                values.len()
            )));
        }

        for (offset, value) in values.iter().enumerate() {
            let address = entry.start_address + offset as u16;
            let fresh = match kind {
                RegisterKind::Coil => self.coils.define(address, value.as_bit()),
                RegisterKind::DiscreteInput => self.discrete_inputs.define(address, value.as_bit()),
                RegisterKind::HoldingRegister => {
                    self.holding_registers.define(address, value.as_register()?)
                }
                RegisterKind::InputRegister => {
                    self.input_registers.define(address, value.as_register()?)
                }
            };
            if !fresh {
                return Err(ModbusError::configuration(format!(
                    "{} address {} configured twice (overlapping entries)",
                    kind, address
                )));
            }
        }
        Ok(())
    }

    /// Read `count` values; bits come back as 0/1
    pub fn get(&self, kind: RegisterKind, address: u16, count: usize) -> ModbusResult<Vec<u16>> {
        match kind {
            RegisterKind::Coil | RegisterKind::DiscreteInput => Ok(self
                .get_bits(kind, address, count)?
                .into_iter()
                .map(u16::from)
                .collect()),
            RegisterKind::HoldingRegister | RegisterKind::InputRegister => {
                self.get_registers(kind, address, count)
            }
        }
    }

    /// Write one value; bit banks store any non-zero value as true
    pub fn set(&mut self, kind: RegisterKind, address: u16, value: u16) -> ModbusResult<()> {
        self.set_multi(kind, address, &[value])
    }

    /// Write consecutive values starting at `address`
    pub fn set_multi(&mut self, kind: RegisterKind, address: u16, values: &[u16]) -> ModbusResult<()> {
        if kind.is_bit() {
            let bits: Vec<bool> = values.iter().map(|&v| v != 0).collect();
            self.set_bits(kind, address, &bits)
        } else {
            self.set_registers(kind, address, values)
        }
    }

    pub fn get_bits(&self, kind: RegisterKind, address: u16, count: usize) -> ModbusResult<Vec<bool>> {
        self.bit_bank(kind)?.read(address, count)
    }

    pub fn get_registers(&self, kind: RegisterKind, address: u16, count: usize) -> ModbusResult<Vec<u16>> {
        self.register_bank(kind)?.read(address, count)
    }

    pub fn set_bits(&mut self, kind: RegisterKind, address: u16, values: &[bool]) -> ModbusResult<()> {
        let bank = match kind {
            RegisterKind::Coil => &mut self.coils,
            RegisterKind::DiscreteInput => &mut self.discrete_inputs,
            _ => return Err(not_bits(kind)),
        };
        bank.write(address, values)
    }

    pub fn set_registers(&mut self, kind: RegisterKind, address: u16, values: &[u16]) -> ModbusResult<()> {
        let bank = match kind {
            RegisterKind::HoldingRegister => &mut self.holding_registers,
            RegisterKind::InputRegister => &mut self.input_registers,
            _ => return Err(not_registers(kind)),
        };
        bank.write(address, values)
    }

    /// Whether `address` is configured in `kind`
    pub fn contains(&self, kind: RegisterKind, address: u16) -> bool {
        match kind {
            RegisterKind::Coil => self.coils.contains(address),
            RegisterKind::DiscreteInput => self.discrete_inputs.contains(address),
            RegisterKind::HoldingRegister => self.holding_registers.contains(address),
            RegisterKind::InputRegister => self.input_registers.contains(address),
        }
    }

    /// Number of configured addresses in `kind`
    pub fn len(&self, kind: RegisterKind) -> usize {
        match kind {
            RegisterKind::Coil => self.coils.len(),
            RegisterKind::DiscreteInput => self.discrete_inputs.len(),
            RegisterKind::HoldingRegister => self.holding_registers.len(),
            RegisterKind::InputRegister => self.input_registers.len(),
        }
    }

    /// Configuration entry covering `address`, for its description and unit
    pub fn entry(&self, kind: RegisterKind, address: u16) -> Option<&RegisterEntry> {
        entries_of(&self.config, kind)
            .iter()
            .find(|entry| entry.contains(address))
    }

    pub fn config(&self) -> &RegisterContextConfig {
        &self.config
    }

    fn bit_bank(&self, kind: RegisterKind) -> ModbusResult<&RegisterBank<bool>> {
        match kind {
            RegisterKind::Coil => Ok(&self.coils),
            RegisterKind::DiscreteInput => Ok(&self.discrete_inputs),
            _ => Err(not_bits(kind)),
        }
    }

    fn register_bank(&self, kind: RegisterKind) -> ModbusResult<&RegisterBank<u16>> {
        match kind {
            RegisterKind::HoldingRegister => Ok(&self.holding_registers),
            RegisterKind::InputRegister => Ok(&self.input_registers),
            _ => Err(not_registers(kind)),
        }
    }
}

fn entries_of(config: &RegisterContextConfig, kind: RegisterKind) -> &[RegisterEntry] {
    match kind {
        RegisterKind::Coil => &config.coils,
        RegisterKind::DiscreteInput => &config.discrete_inputs,
        RegisterKind::HoldingRegister => &config.holding_registers,
        RegisterKind::InputRegister => &config.input_registers,
    }
}

fn not_bits(kind: RegisterKind) -> ModbusError {
    ModbusError::invalid_data(format!("{} bank does not hold bits", kind))
}

fn not_registers(kind: RegisterKind) -> ModbusError {
    ModbusError::invalid_data(format!("{} bank does not hold registers", kind))
}
