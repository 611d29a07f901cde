use std::collections::BTreeMap;

/// Receiver of named counters.
pub trait StatisticsSink {
    fn update(&mut self, key: &str, value: u64);
}

impl StatisticsSink for BTreeMap<String, u64> {
    fn update(&mut self, key: &str, value: u64) {
        *self.entry(key.to_string()).or_default() += value;
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Stats {
    pub steps: u64,
    pub restarts: u64,
    pub propagations: u64,
    pub repairs: u64,
    pub failed_repairs: u64,
    pub global_searches: u64,
}

impl Stats {
    pub fn collect(&self, sink: &mut impl StatisticsSink) {
        sink.update("sls-arith-steps", self.steps);
        sink.update("sls-arith-restarts", self.restarts);
        sink.update("sls-arith-propagations", self.propagations);
        sink.update("sls-arith-repairs", self.repairs);
        sink.update("sls-arith-failed-repairs", self.failed_repairs);
        sink.update("sls-arith-global-searches", self.global_searches);
    }
}
