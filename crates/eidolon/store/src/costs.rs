use serde::{Deserialize, Serialize};

/// Timing breakdown of manifest flushes, in milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlushBreakdown {
    pub prepare: f64,
    pub hash: f64,
    pub serialize: f64,
    pub write: f64,
    pub fsync: f64,
    pub misc: f64,
}

impl FlushBreakdown {
    pub fn total(&self) -> f64 {
        self.prepare + self.hash + self.serialize + self.write + self.fsync + self.misc
    }

    pub(crate) fn accumulate(&mut self, other: &FlushBreakdown) {
        self.prepare += other.prepare;
        self.hash += other.hash;
        self.serialize += other.serialize;
        self.write += other.write;
        self.fsync += other.fsync;
        self.misc += other.misc;
    }
}

/// Cost accumulators of an [`ArtifactStore`](crate::ArtifactStore) handle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreCosts {
    pub puts: u64,
    pub blob_writes: u64,
    pub manifest_flushes: u64,
    pub hash_ms: f64,
    pub blob_write_ms: f64,
    pub manifest_ms: f64,
    pub flush: FlushBreakdown,
}

pub(crate) fn elapsed_ms(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakdown_total_and_accumulate() {
        let mut a = FlushBreakdown {
            prepare: 1.0,
            write: 2.0,
            ..Default::default()
        };
        let b = FlushBreakdown {
            fsync: 0.5,
            misc: 0.5,
            ..Default::default()
        };
        a.accumulate(&b);
        assert_eq!(a.total(), 4.0);
    }
}
