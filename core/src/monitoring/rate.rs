//! Derive bit rates from consecutive octet counter samples.

use std::collections::{HashMap, HashSet};

use super::types::{CounterSample, RateSample};

/// Rate between two samples of the same interface.
///
/// Returns `None` when the clock did not advance. A direction whose
/// counter decreased (device reset or wrap) is reported as unavailable
/// rather than negative.
pub fn compute_rate(previous: &CounterSample, current: &CounterSample) -> Option<RateSample> {
    let elapsed = current.sampled_at - previous.sampled_at;
    let interval_secs = elapsed
        .num_microseconds()
        .map(|us| us as f64 / 1_000_000.0)
        .unwrap_or_else(|| elapsed.num_milliseconds() as f64 / 1_000.0);
    if interval_secs <= 0.0 {
        return None;
    }

    let bps = |prev: u64, curr: u64| {
        curr.checked_sub(prev)
            .map(|delta| delta as f64 * 8.0 / interval_secs)
    };

    Some(RateSample {
        interface: current.interface.clone(),
        rx_bps: bps(previous.rx_octets, current.rx_octets),
        tx_bps: bps(previous.tx_octets, current.tx_octets),
        interval_secs,
    })
}

#[derive(Debug, Clone)]
struct SamplePair {
    previous: Option<CounterSample>,
    current: CounterSample,
}

/// Keeps the two most recent samples per interface.
#[derive(Debug, Default)]
pub struct RateTracker {
    interfaces: HashMap<String, SamplePair>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `sample` as the newest sample of its interface and return the
    /// rate against the one before it, if any.
    pub fn record(&mut self, sample: CounterSample) -> Option<RateSample> {
        let pair = match self.interfaces.remove(&sample.interface) {
            Some(old) => SamplePair {
                previous: Some(old.current),
                current: sample,
            },
            None => SamplePair {
                previous: None,
                current: sample,
            },
        };
        let rate = pair
            .previous
            .as_ref()
            .and_then(|prev| compute_rate(prev, &pair.current));
        self.interfaces.insert(pair.current.interface.clone(), pair);
        rate
    }

    /// Most recent sample of `interface`.
    #[cfg(test)]
    fn latest(&self, interface: &str) -> Option<&CounterSample> {
        self.interfaces.get(interface).map(|p| &p.current)
    }

    /// Drop every interface not in `keep`.
    pub fn retain_interfaces(&mut self, keep: &HashSet<String>) {
        self.interfaces.retain(|name, _| keep.contains(name));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.interfaces.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn clear(&mut self) {
        self.interfaces.clear();
    }
}
