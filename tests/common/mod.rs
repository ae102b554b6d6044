//! Scriptable in-process gateway shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use modbus_monitor::error::{Error, Result};
use modbus_monitor::modbus::{AddressRange, BinaryState, Domain, Gateway, Readout};

/// One scripted read: wait `delay`, then resolve with `outcome`
pub struct Step {
    pub delay: Duration,
    pub outcome: Result<Readout>,
}

/// Fake gateway.
///
/// Scripted steps are consumed in call order. Once the script is empty,
/// register reads return the call number for every address and binary reads
/// return the configured sparse map, after `delay`.
pub struct FakeGateway {
    script: Mutex<VecDeque<Step>>,
    binary: Mutex<BTreeMap<u16, BinaryState>>,
    delay: Mutex<Duration>,
    reads: AtomicUsize,
    requested: Mutex<Vec<(Domain, AddressRange)>>,
    writes: Mutex<Vec<(u16, u16)>>,
    write_script: Mutex<VecDeque<(Duration, Result<String>)>>,
    write_failure: Mutex<Option<Error>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            binary: Mutex::new(BTreeMap::new()),
            delay: Mutex::new(Duration::ZERO),
            reads: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            write_script: Mutex::new(VecDeque::new()),
            write_failure: Mutex::new(None),
        }
    }

    pub fn push(&self, delay: Duration, outcome: Result<Readout>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Step { delay, outcome });
    }

    /// Script the next write: wait `delay`, then resolve with `outcome`
    pub fn push_write(&self, delay: Duration, outcome: Result<String>) {
        self.write_script
            .lock()
            .unwrap()
            .push_back((delay, outcome));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_binary(&self, states: BTreeMap<u16, BinaryState>) {
        *self.binary.lock().unwrap() = states;
    }

    pub fn fail_writes(&self, err: Error) {
        *self.write_failure.lock().unwrap() = Some(err);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<(Domain, AddressRange)> {
        self.requested.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn read(&self, domain: Domain, range: AddressRange) -> Result<Readout> {
        let call = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        self.requested.lock().unwrap().push((domain, range));

        let scripted = self.script.lock().unwrap().pop_front();
        let (delay, outcome) = match scripted {
            Some(step) => (step.delay, step.outcome),
            None => {
                let outcome = match domain {
                    Domain::Registers => Ok(Readout::Registers(vec![
                        call as u16;
                        range.count as usize
                    ])),
                    Domain::Coils | Domain::DiscreteInputs => {
                        Ok(Readout::Binary(self.binary.lock().unwrap().clone()))
                    }
                };
                (*self.delay.lock().unwrap(), outcome)
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    async fn write_single(&self, address: u16, value: u16) -> Result<String> {
        if let Some(err) = self.write_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.writes.lock().unwrap().push((address, value));

        let scripted = self.write_script.lock().unwrap().pop_front();
        match scripted {
            Some((delay, outcome)) => {
                tokio::time::sleep(delay).await;
                outcome
            }
            None => Ok("Write successful".to_string()),
        }
    }
}
