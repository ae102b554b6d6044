//! Modbus data domains as seen through the gateway
//!
//! The three readable domains (holding registers, coils, discrete inputs)
//! share one polling design; each fixes its own address limits and value type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub mod channel;
pub mod client;
pub mod range;
pub mod scheduler;
pub mod selection;
pub mod writer;

pub use channel::{ChannelSnapshot, DataChannel, PollState};
pub use client::{Gateway, HttpGateway, Readout};
pub use range::{validate, RangeEditor};
pub use scheduler::PollingScheduler;
pub use selection::{Selection, SelectionTracker};
pub use writer::{WriteCommandExecutor, WriteConfirmation, WriteRequest};

/// The single device behind the gateway. Not user-editable.
pub const SLAVE_ID: u8 = 1;

/// Highest register address accepted by the write path
pub const MAX_WRITE_ADDRESS: u16 = 200;

/// Readable data domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    Registers,
    Coils,
    DiscreteInputs,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Registers, Domain::Coils, Domain::DiscreteInputs];

    /// Exclusive upper bound of the address space
    pub fn max_address(self) -> u16 {
        match self {
            Domain::Registers => 200,
            Domain::Coils | Domain::DiscreteInputs => 50,
        }
    }

    /// Largest count the gateway accepts in a single request
    pub fn count_limit(self) -> u16 {
        match self {
            Domain::Registers => 124,
            Domain::Coils | Domain::DiscreteInputs => 50,
        }
    }

    /// Gateway path serving reads for this domain
    pub fn read_path(self) -> &'static str {
        match self {
            Domain::Registers => "/modbus/master/read-registers",
            Domain::Coils => "/modbus/master/read-coils",
            Domain::DiscreteInputs => "/modbus/master/read-discrete-inputs",
        }
    }

    /// Short label for logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Registers => "registers",
            Domain::Coils => "coils",
            Domain::DiscreteInputs => "discrete_inputs",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, contiguous span of addresses: `[start, start + count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: u16,
    pub count: u16,
}

impl AddressRange {
    /// One past the last address
    pub fn end(&self) -> u16 {
        self.start.saturating_add(self.count)
    }

    pub fn contains(&self, address: u16) -> bool {
        address >= self.start && address < self.end()
    }

    pub fn addresses(&self) -> impl Iterator<Item = u16> {
        self.start..self.end()
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}

/// State of a coil or discrete input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BinaryState {
    On,
    #[default]
    Off,
}

impl FromStr for BinaryState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("on") {
            Ok(BinaryState::On)
        } else if s.eq_ignore_ascii_case("off") {
            Ok(BinaryState::Off)
        } else {
            Err(Error::malformed(format!("unexpected binary state {:?}", s)))
        }
    }
}

impl fmt::Display for BinaryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryState::On => f.write_str("ON"),
            BinaryState::Off => f.write_str("OFF"),
        }
    }
}

/// One complete fetch, keyed by address and covering exactly its range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadResult<V> {
    pub range: AddressRange,
    pub values: BTreeMap<u16, V>,
    pub fetched_at: DateTime<Utc>,
}

impl<V> ReadResult<V> {
    pub fn get(&self, address: u16) -> Option<&V> {
        self.values.get(&address)
    }

    pub fn contains(&self, address: u16) -> bool {
        self.values.contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &V)> {
        self.values.iter().map(|(address, value)| (*address, value))
    }
}

/// Compile-time description of a readable domain.
///
/// `densify` turns whatever the gateway returned into a dense [`ReadResult`]
/// over the requested range.
pub trait DataDomain: Send + Sync + 'static {
    type Value: Clone
        + Default
        + PartialEq
        + fmt::Debug
        + fmt::Display
        + Serialize
        + Send
        + Sync
        + 'static;

    const DOMAIN: Domain;

    fn densify(range: AddressRange, readout: Readout) -> Result<ReadResult<Self::Value>>;
}

/// Holding registers: 16-bit words, returned as a dense list
pub struct HoldingRegisters;

/// Coils: writable binary points, returned as a sparse map
pub struct Coils;

/// Discrete inputs: read-only binary points, returned as a sparse map
pub struct DiscreteInputs;

impl DataDomain for HoldingRegisters {
    type Value = u16;

    const DOMAIN: Domain = Domain::Registers;

    fn densify(range: AddressRange, readout: Readout) -> Result<ReadResult<u16>> {
        let Readout::Registers(words) = readout else {
            return Err(Error::malformed("expected register values"));
        };
        if words.len() != range.count as usize {
            return Err(Error::malformed(format!(
                "expected {} register values, got {}",
                range.count,
                words.len()
            )));
        }

        Ok(ReadResult {
            range,
            values: range.addresses().zip(words).collect(),
            fetched_at: Utc::now(),
        })
    }
}

fn densify_binary(range: AddressRange, readout: Readout) -> Result<ReadResult<BinaryState>> {
    let Readout::Binary(sparse) = readout else {
        return Err(Error::malformed("expected binary values"));
    };

    let values = range
        .addresses()
        .map(|address| (address, sparse.get(&address).copied().unwrap_or_default()))
        .collect();

    Ok(ReadResult {
        range,
        values,
        fetched_at: Utc::now(),
    })
}

impl DataDomain for Coils {
    type Value = BinaryState;

    const DOMAIN: Domain = Domain::Coils;

    fn densify(range: AddressRange, readout: Readout) -> Result<ReadResult<BinaryState>> {
        densify_binary(range, readout)
    }
}

impl DataDomain for DiscreteInputs {
    type Value = BinaryState;

    const DOMAIN: Domain = Domain::DiscreteInputs;

    fn densify(range: AddressRange, readout: Readout) -> Result<ReadResult<BinaryState>> {
        densify_binary(range, readout)
    }
}
