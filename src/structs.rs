use std::fmt::Debug;

/// Identifier of a UDP flow: its source port
pub type PortId = u16;

/// Identifier of a TCP flow: the index of its connection in the client connection set
pub type ConnId = usize;

/// A flow and its share of the schedule
#[derive(Debug, Clone, PartialEq)]
pub struct Flow<T> {
    pub id: T,
    pub weight: f64,
    pub ratio: usize,
}

/// The bounded sequence of flow identifiers cycled by the transmission engine.
/// Each flow appears `ratio` times, flows being kept in allocation order.
#[derive(Debug, Clone)]
pub struct Schedule<T> {
    slots: Vec<T>,
    capacity: usize,
}

impl<T: Copy + PartialEq + Debug> Schedule<T> {
    /// Build a schedule from flows. The caller guarantees that the sum of the ratios fits
    /// into the capacity.
    pub fn from_flows(flows: &[Flow<T>], capacity: usize) -> Self {
        let len: usize = flows.iter().map(|f| f.ratio).sum();
        assert!(len <= capacity, "schedule overflow: {len} > {capacity}");
        let mut slots = Vec::with_capacity(len);
        for f in flows {
            slots.extend(std::iter::repeat(f.id).take(f.ratio));
        }
        Schedule { slots, capacity }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.slots
    }

    /// Number of slots given to a flow
    pub fn count_of(&self, id: T) -> usize {
        self.slots.iter().filter(|s| **s == id).count()
    }
}

/// How a transmission loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The configured packet cap has been reached
    CountReached(u64),
    /// The loop was asked to stop
    Stopped(u64),
}

impl Outcome {
    pub fn sent(&self) -> u64 {
        match self {
            Outcome::CountReached(n) | Outcome::Stopped(n) => *n,
        }
    }
}
