//! Wire: the edge weight connecting two ports.
//!
//! One arena edge represents one reciprocal connection. The edge direction
//! is the data flow direction (value provider -> value consumer) and each
//! endpoint records which port slot it attaches to. Carrying the full slot
//! (side + index) on both ends, rather than a bare port index, lets the same
//! weight express all three wiring shapes:
//!
//! - sibling: `out -> in`
//! - container push wiring: `boundary in -> child in`
//! - container lift wiring: `child out -> boundary out`

use crate::port::PortSlot;

/// Edge weight: the port slot on each endpoint of the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wire {
    /// Slot on the edge's source node (the value provider).
    pub source: PortSlot,
    /// Slot on the edge's target node (the value consumer).
    pub target: PortSlot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortDir;

    #[test]
    fn wire_records_both_slots() {
        let wire = Wire {
            source: PortSlot {
                dir: PortDir::Out,
                index: 0,
            },
            target: PortSlot {
                dir: PortDir::In,
                index: 1,
            },
        };
        assert_eq!(wire.source.dir, PortDir::Out);
        assert_eq!(wire.target.index, 1);
    }
}
