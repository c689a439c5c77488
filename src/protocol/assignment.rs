//! `ConsumerProtocolAssignment`, the opaque assignment blob a group coordinator hands out per member.
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use super::{
    primitives::{Array, Int16, Int32, String_},
    traits::{ReadError, ReadType, WriteError, WriteType},
};

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TopicPartitions {
    pub topic: String_,
    pub partitions: Array<Int32>,
}

impl<R> ReadType<R> for TopicPartitions
where
    R: Read,
{
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            topic: String_::read(reader)?,
            partitions: Array::read(reader)?,
        })
    }
}

impl<W> WriteType<W> for TopicPartitions
where
    W: Write,
{
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.topic.write(writer)?;
        self.partitions.write(writer)
    }
}

/// Head of a consumer protocol assignment.
///
/// Trailing user data is not decoded.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ConsumerProtocolAssignment {
    pub version: Int16,
    pub assigned_partitions: Array<TopicPartitions>,
}

impl<R> ReadType<R> for ConsumerProtocolAssignment
where
    R: Read,
{
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            version: Int16::read(reader)?,
            assigned_partitions: Array::read(reader)?,
        })
    }
}

impl<W> WriteType<W> for ConsumerProtocolAssignment
where
    W: Write,
{
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.version.write(writer)?;
        self.assigned_partitions.write(writer)
    }
}

impl ConsumerProtocolAssignment {
    pub fn into_map(self) -> BTreeMap<String, Vec<i32>> {
        let mut map: BTreeMap<String, Vec<i32>> = BTreeMap::new();
        for tp in self.assigned_partitions.0.unwrap_or_default() {
            map.entry(tp.topic.0)
                .or_default()
                .extend(tp.partitions.0.unwrap_or_default().into_iter().map(|p| p.0));
        }
        for partitions in map.values_mut() {
            partitions.sort_unstable();
            partitions.dedup();
        }
        map
    }
}

/// Decode a member assignment into partitions by topic.
///
/// An empty blob is an empty assignment (e.g. a member that joined but was not assigned yet).
pub fn decode_member_assignment(data: &[u8]) -> Result<BTreeMap<String, Vec<i32>>, ReadError> {
    if data.is_empty() {
        return Ok(BTreeMap::new());
    }
    let mut cursor = Cursor::new(data);
    Ok(ConsumerProtocolAssignment::read(&mut cursor)?.into_map())
}

/// Encode an assignment the way the Java consumer does (version 0, no user data).
pub fn encode_member_assignment(
    assignment: &BTreeMap<String, Vec<i32>>,
) -> Result<Vec<u8>, WriteError> {
    let msg = ConsumerProtocolAssignment {
        version: Int16(0),
        assigned_partitions: Array(Some(
            assignment
                .iter()
                .map(|(topic, partitions)| TopicPartitions {
                    topic: String_(topic.clone()),
                    partitions: Array(Some(partitions.iter().copied().map(Int32).collect())),
                })
                .collect(),
        )),
    };
    let mut buf = Vec::new();
    msg.write(&mut buf)?;
    // null user data
    Int32(-1).write(&mut buf)?;
    Ok(buf)
}
