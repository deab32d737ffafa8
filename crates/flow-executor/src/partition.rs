// Archivo: partition.rs
// Propósito: identificador de partición y hash estable flow_id -> partición.
use flow::FlowId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Partición dueña de un flow: blake3 del `flow_id`, primeros 8 bytes
/// little-endian, módulo `partition_count`. Estable entre nodos y procesos.
pub fn partition_for(flow_id: &FlowId, partition_count: u32) -> PartitionId {
    let hash = blake3::hash(flow_id.as_str().as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    let count = u64::from(partition_count.max(1));
    PartitionId((u64::from_le_bytes(head) % count) as u32)
}
