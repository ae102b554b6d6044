//! Gateway client
//!
//! The gateway speaks Modbus to the device; this side only sees its HTTP
//! contract. Responses are parsed into explicit schemas at the boundary and
//! anything that does not match is reported as a malformed response.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

use super::{AddressRange, BinaryState, Domain, SLAVE_ID};
use crate::config::GatewayConfig;
use crate::error::{Error, Result};

/// Path of the single-register write endpoint
pub const WRITE_SINGLE_PATH: &str = "/modbus/slave/write-single";

/// Parsed body of a successful read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readout {
    /// Dense register words, one per address in the requested range
    Registers(Vec<u16>),
    /// Sparse binary states keyed by address
    Binary(BTreeMap<u16, BinaryState>),
}

/// Request/response contract of the remote gateway
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Read `range` from `domain` on the fixed slave
    async fn read(&self, domain: Domain, range: AddressRange) -> Result<Readout>;

    /// Write one holding register, returning the gateway's acknowledgement
    async fn write_single(&self, address: u16, value: u16) -> Result<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistersResponse {
    register_values: Vec<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoilsResponse {
    coil_values: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscreteInputsResponse {
    input_values: HashMap<String, String>,
}

/// Parse a read response body for `domain`
pub fn parse_readout(domain: Domain, range: AddressRange, body: &[u8]) -> Result<Readout> {
    match domain {
        Domain::Registers => {
            let parsed: RegistersResponse = from_json(body)?;
            if parsed.register_values.len() != range.count as usize {
                return Err(Error::malformed(format!(
                    "expected {} register values, got {}",
                    range.count,
                    parsed.register_values.len()
                )));
            }
            Ok(Readout::Registers(parsed.register_values))
        }
        Domain::Coils => {
            let parsed: CoilsResponse = from_json(body)?;
            parse_binary_map(range, parsed.coil_values).map(Readout::Binary)
        }
        Domain::DiscreteInputs => {
            let parsed: DiscreteInputsResponse = from_json(body)?;
            parse_binary_map(range, parsed.input_values).map(Readout::Binary)
        }
    }
}

fn from_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::malformed(e.to_string()))
}

fn parse_binary_map(
    range: AddressRange,
    raw: HashMap<String, String>,
) -> Result<BTreeMap<u16, BinaryState>> {
    let mut states = BTreeMap::new();
    for (key, value) in raw {
        let address: u16 = key
            .trim()
            .parse()
            .map_err(|_| Error::malformed(format!("non-numeric address key {:?}", key)))?;
        let state: BinaryState = value.parse()?;

        if range.contains(address) {
            states.insert(address, state);
        } else {
            debug!("ignoring address {} outside {}", address, range);
        }
    }
    Ok(states)
}

/// HTTP implementation of [`Gateway`]
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and return the body of a 2xx response
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Connectivity(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Server {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Connectivity(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn read(&self, domain: Domain, range: AddressRange) -> Result<Readout> {
        debug!("GET {} {} on slave {}", domain.read_path(), range, SLAVE_ID);

        let request = self.client.get(self.url(domain.read_path())).query(&[
            ("slaveId", SLAVE_ID.to_string()),
            ("startAddress", range.start.to_string()),
            ("count", range.count.to_string()),
        ]);

        let body = self.send(request).await?;
        parse_readout(domain, range, &body)
    }

    async fn write_single(&self, address: u16, value: u16) -> Result<String> {
        debug!("POST {} {}={}", WRITE_SINGLE_PATH, address, value);

        let request = self.client.post(self.url(WRITE_SINGLE_PATH)).query(&[
            ("slaveId", SLAVE_ID.to_string()),
            ("startAddress", address.to_string()),
            ("registerValue", value.to_string()),
        ]);

        let body = self.send(request).await?;
        Ok(String::from_utf8_lossy(&body).trim().to_string())
    }
}
