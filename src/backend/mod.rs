//! Implementations of the [`cluster`](crate::cluster) capabilities.
use std::collections::BTreeMap;

use tracing::warn;

use crate::protocol::assignment::decode_member_assignment;

pub mod memory;
#[cfg(feature = "rdkafka")]
pub mod rdkafka;

/// Decodes the assignment blob of a group member.
///
/// A blob that cannot be decoded results in an empty assignment for that member only.
pub(crate) fn member_assignment(
    group_id: &str,
    member_id: &str,
    data: &[u8],
) -> BTreeMap<String, Vec<i32>> {
    match decode_member_assignment(data) {
        Ok(assignment) => assignment,
        Err(e) => {
            warn!(
                group_id,
                member_id,
                e = %e,
                "cannot decode member assignment, ignoring it",
            );
            BTreeMap::new()
        }
    }
}
