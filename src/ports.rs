use anyhow::bail;
use rand::Rng;
use std::collections::HashSet;

use crate::structs::PortId;

/// Maximum number of draws per requested port before randomized allocation gives up
const DRAWS_PER_PORT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A half-open range of ports [start, end)
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..self.end).contains(&port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// start, start+1, ..., start+n-1
    Sequential,
    /// n distinct ports drawn uniformly in the range
    Randomized,
}

impl Allocation {
    pub fn new(randomized: bool) -> Self {
        if randomized {
            Allocation::Randomized
        } else {
            Allocation::Sequential
        }
    }
}

/// Allocate `n` distinct flow identifiers in `range`, in allocation order
pub fn allocate(
    n: usize,
    mode: Allocation,
    range: PortRange,
    rng: &mut impl Rng,
) -> anyhow::Result<Vec<PortId>> {
    if n > range.len() {
        bail!(
            "cannot allocate {n} ports in [{}, {})",
            range.start,
            range.end
        );
    }
    let ports = match mode {
        Allocation::Sequential => (range.start..).take(n).collect(),
        Allocation::Randomized => draw_distinct(n, range, rng)?,
    };
    for (i, p) in ports.iter().enumerate() {
        log::debug!("Flow {i:3} is {p}");
    }
    Ok(ports)
}

fn draw_distinct(n: usize, range: PortRange, rng: &mut impl Rng) -> anyhow::Result<Vec<PortId>> {
    let mut ports = Vec::with_capacity(n);
    let mut seen = HashSet::with_capacity(n);
    let max_draws = DRAWS_PER_PORT * n.max(1);
    let mut draws = 0;
    while ports.len() < n {
        if draws == max_draws {
            bail!("could only draw {} distinct ports out of {n}", ports.len());
        }
        draws += 1;
        let candidate = rng.gen_range(range.start..range.end);
        if seen.insert(candidate) {
            ports.push(candidate);
        }
    }
    log::trace!("{n} ports drawn in {draws} draws");
    Ok(ports)
}
