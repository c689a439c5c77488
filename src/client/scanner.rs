use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::{cluster::PartitionLog, error::Result, metadata::TopicPartition, record::Record};

/// Upper bound for pre-allocation, ranges can be huge while the scan stops early.
const MAX_PREALLOC: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    /// Read up to the end of the range.
    Complete,

    /// No record within the read timeout.
    CaughtUp,

    Deadline,

    /// The connection broke after it was opened.
    ReadFailed,
}

/// Reads a bounded offset range of one partition.
#[derive(Debug, Clone)]
pub struct PartitionScanner {
    log: Arc<dyn PartitionLog>,
    read_timeout: Duration,
}

impl PartitionScanner {
    pub fn new(log: Arc<dyn PartitionLog>, read_timeout: Duration) -> Self {
        Self { log, read_timeout }
    }

    /// Reads records in `[start, end)`.
    ///
    /// Stops early once the deadline passes or no record arrives within the read timeout and returns what was
    /// collected so far, possibly nothing. Only failing to open the partition is an error.
    ///
    /// The read connection is released before this returns, or when the future is dropped.
    pub async fn scan(
        &self,
        partition: &TopicPartition,
        start: i64,
        end: i64,
        deadline: Instant,
    ) -> Result<Vec<Record>> {
        if start >= end {
            return Ok(vec![]);
        }
        let expected = usize::try_from(end - start).unwrap_or(usize::MAX);

        let mut reader = match timeout_at(deadline, self.log.open_reader(partition, start)).await {
            Ok(reader) => reader?,
            Err(_) => {
                debug!(%partition, start, end, "deadline passed before partition was opened");
                return Ok(vec![]);
            }
        };

        let mut records = Vec::with_capacity(expected.min(MAX_PREALLOC));
        let stop = loop {
            if records.len() >= expected {
                break StopReason::Complete;
            }

            match timeout_at(deadline, reader.next_record(self.read_timeout)).await {
                Err(_) => break StopReason::Deadline,
                Ok(Ok(None)) => break StopReason::CaughtUp,
                Ok(Ok(Some(record))) => {
                    let offset = record.offset;
                    // compaction leaves gaps, so the next offset may be past the range
                    if offset >= end {
                        break StopReason::Complete;
                    }
                    if offset >= start {
                        records.push(record);
                    }
                    if offset >= end - 1 {
                        break StopReason::Complete;
                    }
                }
                Ok(Err(e)) => {
                    warn!(%partition, e = %e, "read failed, keeping records read so far");
                    break StopReason::ReadFailed;
                }
            }
        };

        debug!(
            %partition,
            start,
            end,
            n_records = records.len(),
            ?stop,
            "scan finished",
        );
        Ok(records)
    }
}
