//! Batch planning
//!
//! Splits an ordered list of intents into consecutive groups of at most
//! `group_size`, each of which becomes one transaction. Order is preserved
//! within and across groups and nothing is dropped or duplicated.

use super::errors::CustodyTxError;

/// Partition `items` into ordered groups of at most `group_size`
///
/// An empty input yields an empty plan. A zero group size is a caller error.
pub fn partition<T: Clone>(items: &[T], group_size: usize) -> Result<Vec<Vec<T>>, CustodyTxError> {
    if group_size == 0 {
        return Err(CustodyTxError::invalid_intent("group size must be at least 1"));
    }
    Ok(items.chunks(group_size).map(<[T]>::to_vec).collect())
}

/// Number of groups `partition` would produce
pub fn group_count(len: usize, group_size: usize) -> usize {
    if group_size == 0 {
        return 0;
    }
    len.div_ceil(group_size)
}
