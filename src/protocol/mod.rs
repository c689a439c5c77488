//! The parts of the Kafka wire format that surface through the admin APIs.
//!
//! # References
//! - <https://kafka.apache.org/protocol#protocol_types>
//! - <https://github.com/apache/kafka/blob/trunk/clients/src/main/resources/common/message/ConsumerProtocolAssignment.json>
pub mod assignment;
pub mod primitives;
pub mod traits;
