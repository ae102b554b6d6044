//! Binding a clicked address to its value in the latest read

use serde::Serialize;

use super::ReadResult;

/// The address the user picked and the value currently shown for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection<V> {
    pub address: Option<u16>,
    pub value: Option<V>,
}

impl<V> Selection<V> {
    pub fn none() -> Self {
        Self {
            address: None,
            value: None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.address.is_none()
    }
}

impl<V> Default for Selection<V> {
    fn default() -> Self {
        Self::none()
    }
}

/// Resolve `address` in `current`. An address the result does not cover
/// yields an empty selection; the address is not retained.
fn resolve<V: Clone>(address: u16, current: Option<&ReadResult<V>>) -> Selection<V> {
    match current.and_then(|result| result.get(address)) {
        Some(value) => Selection {
            address: Some(address),
            value: Some(value.clone()),
        },
        None => Selection::none(),
    }
}

/// Re-bind an existing selection to a freshly landed result
pub fn recompute<V: Clone>(current: &ReadResult<V>, selection: &Selection<V>) -> Selection<V> {
    match selection.address {
        Some(address) => resolve(address, Some(current)),
        None => Selection::none(),
    }
}

/// Per-channel selection state
#[derive(Debug, Clone)]
pub struct SelectionTracker<V> {
    selection: Selection<V>,
}

impl<V: Clone> SelectionTracker<V> {
    pub fn new() -> Self {
        Self {
            selection: Selection::none(),
        }
    }

    pub fn current(&self) -> &Selection<V> {
        &self.selection
    }

    pub fn on_address_click(
        &mut self,
        address: u16,
        current: Option<&ReadResult<V>>,
    ) -> Selection<V> {
        self.selection = resolve(address, current);
        self.selection.clone()
    }

    pub fn recompute(&mut self, current: &ReadResult<V>) -> Selection<V> {
        self.selection = recompute(current, &self.selection);
        self.selection.clone()
    }
}

impl<V: Clone> Default for SelectionTracker<V> {
    fn default() -> Self {
        Self::new()
    }
}
