//! Periodic-fetch unit for one data domain
//!
//! A channel owns its last good result, its poll state and its selection.
//! Results are applied in issuance order: every fetch takes a sequence number
//! when it is issued, and a resolution older than the last applied one is
//! dropped, so a slow request can never overwrite a fresher result.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::client::Gateway;
use super::{
    AddressRange, DataDomain, Domain, RangeEditor, ReadResult, Selection, SelectionTracker,
    SLAVE_ID,
};
use crate::error::{Error, RangeError, Result};
use crate::metrics::{self, ReadMetrics};

/// Poll bookkeeping exposed to the dashboard
#[derive(Debug, Clone, PartialEq)]
pub struct PollState {
    pub auto_refresh_enabled: bool,
    pub loading: bool,
    pub last_error: Option<Error>,
}

impl Default for PollState {
    fn default() -> Self {
        Self {
            auto_refresh_enabled: true,
            loading: false,
            last_error: None,
        }
    }
}

struct ChannelState<V> {
    editor: RangeEditor,
    result: Option<ReadResult<V>>,
    poll: PollState,
    selection: SelectionTracker<V>,
    /// Sequence number of the last applied resolution
    applied: u64,
}

/// Counts one outstanding request for as long as it lives.
///
/// The count drops when the guard does, so a request whose future is
/// abandoned mid-flight still stops counting as outstanding.
pub(crate) struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    pub(crate) fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One addressable point in a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct Point<V> {
    pub address: u16,
    pub value: V,
}

/// Serializable view of a channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSnapshot<V> {
    pub domain: Domain,
    pub slave_id: u8,
    pub range: AddressRange,
    pub range_error: Option<String>,
    pub auto_refresh_enabled: bool,
    pub loading: bool,
    pub last_error: Option<String>,
    pub last_error_kind: Option<&'static str>,
    pub fetched_at: Option<String>,
    pub values: Vec<Point<V>>,
    pub selection: Selection<V>,
}

/// Fetch unit bound to domain `D`
pub struct DataChannel<D: DataDomain> {
    gateway: Arc<dyn Gateway>,
    state: RwLock<ChannelState<D::Value>>,
    issued: AtomicU64,
    in_flight: AtomicUsize,
}

impl<D: DataDomain> DataChannel<D> {
    pub fn new(gateway: Arc<dyn Gateway>, range: AddressRange) -> Result<Self, RangeError> {
        let editor = RangeEditor::new(D::DOMAIN, range)?;

        Ok(Self {
            gateway,
            state: RwLock::new(ChannelState {
                editor,
                result: None,
                poll: PollState::default(),
                selection: SelectionTracker::new(),
                applied: 0,
            }),
            issued: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        })
    }

    pub fn domain(&self) -> Domain {
        D::DOMAIN
    }

    /// Fetch exactly `range` from the gateway and apply the outcome.
    ///
    /// On failure the previous result stays in place and `last_error` is set.
    /// The outcome is returned to the caller even when it arrived too late to
    /// be applied.
    pub async fn fetch(&self, range: AddressRange) -> Result<ReadResult<D::Value>> {
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight::enter(&self.in_flight);

        debug!("{} fetch #{} for {}", D::DOMAIN, seq, range);
        let read_metrics = ReadMetrics::start(D::DOMAIN);
        let outcome = match self.gateway.read(D::DOMAIN, range).await {
            Ok(readout) => D::densify(range, readout),
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(result) => read_metrics.success(result.len()),
            Err(e) => read_metrics.failure(e.kind()),
        }

        let mut state = self.state.write().await;
        if seq < state.applied {
            debug!(
                "{} fetch #{} resolved after #{}, discarding",
                D::DOMAIN,
                seq,
                state.applied
            );
            metrics::record_stale_result(D::DOMAIN);
            return outcome;
        }
        state.applied = seq;

        match &outcome {
            Ok(result) => {
                state.selection.recompute(result);
                state.result = Some(result.clone());
                state.poll.last_error = None;
            }
            Err(e) => {
                warn!(
                    "{} read of {} from slave {} failed: {}",
                    D::DOMAIN,
                    range,
                    SLAVE_ID,
                    e
                );
                state.poll.last_error = Some(e.clone());
            }
        }

        outcome
    }

    /// Fetch the range currently held by the editor.
    ///
    /// If the last range edit was rejected, the rejection is surfaced as
    /// `last_error` and no request is sent.
    pub async fn fetch_current(&self) -> Result<ReadResult<D::Value>> {
        let range = {
            let mut state = self.state.write().await;
            if let Some(rejected) = state.editor.rejected().cloned() {
                let err = Error::from(rejected);
                state.poll.last_error = Some(err.clone());
                return Err(err);
            }
            state.editor.range()
        };

        self.fetch(range).await
    }

    pub async fn range(&self) -> AddressRange {
        self.state.read().await.editor.range()
    }

    pub async fn set_start(&self, start: i64) -> Result<AddressRange, RangeError> {
        self.state.write().await.editor.set_start(start)
    }

    pub async fn set_count(&self, count: i64) -> Result<AddressRange, RangeError> {
        self.state.write().await.editor.set_count(count)
    }

    /// Select `address` in the latest result
    pub async fn select(&self, address: u16) -> Selection<D::Value> {
        let mut state = self.state.write().await;
        let state = &mut *state;
        state
            .selection
            .on_address_click(address, state.result.as_ref())
    }

    pub async fn selection(&self) -> Selection<D::Value> {
        self.state.read().await.selection.current().clone()
    }

    pub async fn result(&self) -> Option<ReadResult<D::Value>> {
        self.state.read().await.result.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub async fn poll_state(&self) -> PollState {
        let mut poll = self.state.read().await.poll.clone();
        poll.loading = self.is_loading();
        poll
    }

    pub(crate) async fn set_auto_refresh(&self, enabled: bool) {
        self.state.write().await.poll.auto_refresh_enabled = enabled;
    }

    pub async fn snapshot(&self) -> ChannelSnapshot<D::Value> {
        let state = self.state.read().await;

        let values = state
            .result
            .iter()
            .flat_map(|result| result.iter())
            .map(|(address, value)| Point {
                address,
                value: value.clone(),
            })
            .collect();

        ChannelSnapshot {
            domain: D::DOMAIN,
            slave_id: SLAVE_ID,
            range: state.editor.range(),
            range_error: state.editor.rejected().map(|e| e.to_string()),
            auto_refresh_enabled: state.poll.auto_refresh_enabled,
            loading: self.is_loading(),
            last_error: state.poll.last_error.as_ref().map(|e| e.to_string()),
            last_error_kind: state.poll.last_error.as_ref().map(|e| e.kind()),
            fetched_at: state.result.as_ref().map(|r| r.fetched_at.to_rfc3339()),
            values,
            selection: state.selection.current().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::client::{MockGateway, Readout};
    use crate::modbus::{BinaryState, Coils, HoldingRegisters};
    use std::collections::BTreeMap;
    use tokio_test::{assert_err, assert_ok};

    fn range(start: u16, count: u16) -> AddressRange {
        AddressRange { start, count }
    }

    fn registers_channel(mock: MockGateway) -> DataChannel<HoldingRegisters> {
        DataChannel::new(Arc::new(mock), range(0, 10)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_applies_result_and_selection() {
        let mut mock = MockGateway::new();
        mock.expect_read()
            .times(1)
            .returning(|_, _| Ok(Readout::Registers((1..=10).collect())));
        let channel = registers_channel(mock);

        assert_ok!(channel.fetch_current().await);
        let selection = channel.select(3).await;

        assert_eq!(selection.address, Some(3));
        assert_eq!(selection.value, Some(4));
        let state = channel.poll_state().await;
        assert!(!state.loading);
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn test_failure_keeps_last_good_result() {
        let mut mock = MockGateway::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_read()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Readout::Registers(vec![7; 10])));
        mock.expect_read()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(Error::Server { status: 500 }));
        let channel = registers_channel(mock);

        assert_ok!(channel.fetch_current().await);
        assert_err!(channel.fetch_current().await);

        let result = channel.result().await.unwrap();
        assert_eq!(result.get(0), Some(&7));
        assert_eq!(
            channel.poll_state().await.last_error,
            Some(Error::Server { status: 500 })
        );
    }

    #[tokio::test]
    async fn test_success_clears_previous_error() {
        let mut mock = MockGateway::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_read()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(Error::Connectivity("refused".into())));
        mock.expect_read()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Readout::Registers(vec![0; 10])));
        let channel = registers_channel(mock);

        assert_err!(channel.fetch_current().await);
        assert_ok!(channel.fetch_current().await);

        assert!(channel.poll_state().await.last_error.is_none());
    }

    #[tokio::test]
    async fn test_rejected_edit_blocks_fetch() {
        let mut mock = MockGateway::new();
        mock.expect_read().times(0);
        let channel = registers_channel(mock);

        assert!(channel.set_count(500).await.is_err());
        let err = channel.fetch_current().await.unwrap_err();

        assert_eq!(err.kind(), "validation");
        assert_eq!(channel.poll_state().await.last_error, Some(err));
        assert_eq!(channel.range().await, range(0, 10));
    }

    #[tokio::test]
    async fn test_fetch_uses_edited_range() {
        let mut mock = MockGateway::new();
        mock.expect_read()
            .withf(|domain, r| *domain == Domain::Coils && *r == range(30, 20))
            .times(1)
            .returning(|_, _| Ok(Readout::Binary(BTreeMap::from([(31, BinaryState::On)]))));
        let channel: DataChannel<Coils> =
            DataChannel::new(Arc::new(mock), range(40, 10)).unwrap();

        assert_eq!(channel.set_count(20).await.unwrap(), range(30, 20));
        let result = channel.fetch_current().await.unwrap();

        assert_eq!(result.len(), 20);
        assert_eq!(result.get(31), Some(&BinaryState::On));
        assert_eq!(result.get(30), Some(&BinaryState::Off));
    }

    #[tokio::test]
    async fn test_new_result_clears_out_of_range_selection() {
        let mut mock = MockGateway::new();
        mock.expect_read()
            .returning(|_, r| Ok(Readout::Registers(vec![1; r.count as usize])));
        let channel = registers_channel(mock);

        channel.fetch_current().await.unwrap();
        assert_eq!(channel.select(7).await.address, Some(7));

        channel.set_start(10).await.unwrap();
        channel.set_count(5).await.unwrap();
        channel.fetch_current().await.unwrap();

        assert!(channel.selection().await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_reports_state() {
        let mut mock = MockGateway::new();
        mock.expect_read()
            .returning(|_, _| Err(Error::malformed("missing registerValues")));
        let channel = registers_channel(mock);

        let _ = channel.fetch_current().await;
        let snapshot = channel.snapshot().await;

        assert_eq!(snapshot.domain, Domain::Registers);
        assert_eq!(snapshot.slave_id, 1);
        assert!(snapshot.values.is_empty());
        assert_eq!(snapshot.last_error_kind, Some("malformed_response"));
        assert!(snapshot.auto_refresh_enabled);
    }
}
