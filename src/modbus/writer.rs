//! Single-register writes
//!
//! A write is validated locally, sent once, and its outcome is kept as a
//! feedback message. Success messages expire after a fixed window; the expiry
//! timer is replaced whenever a newer message supersedes it.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::channel::InFlight;
use super::client::Gateway;
use super::SLAVE_ID;
use crate::config::WriteConfig;
use crate::error::{Error, Result, ValidationError};
use crate::metrics;

/// Raw user input for a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub address: i64,
    pub value: i64,
}

/// Gateway acknowledgement of a completed write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteConfirmation {
    pub address: u16,
    pub value: u16,
    pub acknowledgement: String,
}

/// Message shown after a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum WriteFeedback {
    Success(String),
    Failure(String),
}

/// Form contents; cleared after a successful write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteForm {
    pub address: Option<i64>,
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteStatus {
    pub form: WriteForm,
    pub feedback: Option<WriteFeedback>,
    pub submitting: bool,
    /// Submission whose outcome is on display
    #[serde(skip)]
    applied: u64,
}

/// One-shot validated writer for holding registers
pub struct WriteCommandExecutor {
    gateway: Arc<dyn Gateway>,
    max_address: u16,
    message_ttl: Duration,
    status: Arc<RwLock<WriteStatus>>,
    expiry: Mutex<Option<JoinHandle<()>>>,
    issued: AtomicU64,
    pending: AtomicUsize,
}

impl WriteCommandExecutor {
    pub fn new(gateway: Arc<dyn Gateway>, config: &WriteConfig) -> Self {
        Self {
            gateway,
            max_address: config.max_address,
            message_ttl: Duration::from_millis(config.message_ttl_ms),
            status: Arc::new(RwLock::new(WriteStatus::default())),
            expiry: Mutex::new(None),
            issued: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn max_address(&self) -> u16 {
        self.max_address
    }

    /// Check a request against the write limits
    pub fn validate(&self, request: WriteRequest) -> Result<(u16, u16), ValidationError> {
        if request.address < 0 || request.address > i64::from(self.max_address) {
            return Err(ValidationError::WriteAddress {
                address: request.address,
                max: self.max_address,
            });
        }
        let value =
            u16::try_from(request.value).map_err(|_| ValidationError::WriteValue(request.value))?;

        Ok((request.address as u16, value))
    }

    /// Validate and send one write.
    ///
    /// Validation failures return before any request is made. Submissions may
    /// overlap; feedback follows submission order, so an older write that
    /// resolves late never replaces the message of a newer one.
    pub async fn submit(&self, request: WriteRequest) -> Result<WriteConfirmation> {
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let _pending = InFlight::enter(&self.pending);
        self.status.write().await.form = WriteForm {
            address: Some(request.address),
            value: Some(request.value),
        };

        let outcome = match self.validate(request) {
            Ok((address, value)) => self
                .gateway
                .write_single(address, value)
                .await
                .map(|acknowledgement| WriteConfirmation {
                    address,
                    value,
                    acknowledgement,
                }),
            Err(e) => Err(Error::Validation(e)),
        };

        match &outcome {
            Ok(confirmation) => {
                info!(
                    "Wrote value {} to register {} on slave {}",
                    confirmation.value, confirmation.address, SLAVE_ID
                );
                metrics::record_write("success");
            }
            Err(e) => {
                warn!("Write of {:?} failed: {}", request, e);
                metrics::record_write(e.kind());
            }
        }

        self.settle(seq, &outcome).await;
        outcome
    }

    async fn settle(&self, seq: u64, outcome: &Result<WriteConfirmation>) {
        let feedback = match outcome {
            Ok(c) => WriteFeedback::Success(format!(
                "Value {} written to register {}",
                c.value, c.address
            )),
            Err(e) => WriteFeedback::Failure(failure_message(e)),
        };

        // Held until the new timer is installed so settles apply in order
        let mut expiry = self.expiry.lock().await;
        {
            let mut status = self.status.write().await;
            if seq < status.applied {
                debug!(
                    "Write #{} resolved after #{}, keeping newer feedback",
                    seq, status.applied
                );
                return;
            }
            status.applied = seq;
            status.feedback = Some(feedback);
            if outcome.is_ok() {
                status.form = WriteForm::default();
            }
        }

        if let Some(timer) = expiry.take() {
            timer.abort();
        }

        if outcome.is_ok() {
            let status = self.status.clone();
            let ttl = self.message_ttl;
            *expiry = Some(tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                let mut status = status.write().await;
                if status.applied == seq {
                    status.feedback = None;
                }
            }));
        }
    }

    pub async fn status(&self) -> WriteStatus {
        let mut status = self.status.read().await.clone();
        status.submitting = self.pending.load(Ordering::SeqCst) > 0;
        status
    }
}

impl Drop for WriteCommandExecutor {
    fn drop(&mut self) {
        if let Some(timer) = self.expiry.get_mut().take() {
            timer.abort();
        }
    }
}

/// User-facing text for a failed write
fn failure_message(err: &Error) -> String {
    match err {
        Error::Validation(e) => e.to_string(),
        Error::Connectivity(_) => {
            "Failed to send data: the gateway could not be reached".to_string()
        }
        Error::Server { status } => {
            format!("Failed to send data. Server responded with status: {}", status)
        }
        Error::MalformedResponse(e) => format!("Failed to send data: {}", e),
    }
}
