use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use iota::iota;
use rustc_hash::FxHashMap;

iota! {
            // Inputs
    pub const INPUT_TOTAL: u64 = iota;
            , INPUT_OBSERVATIONS
            , INPUT_CONDITIONS          // pending conditions inferred.
            , INPUT_PRUNED              // conditions dropped once covered.
            // Reports
            , REPORT_SENT
            , REPORT_DROPPED            // over the wire ceiling.
            , REPORT_SKIPPED            // target not in the program.
            , REPORT_WRITE_ADDRESSES
            // Write-set cache
            , CACHE_HITS
            , CACHE_MISSES
            // Session
            , SESSION_RUN_TIME          // in seconds.
            , SESSION_RECONNECTS
            , SESSION_BLOCKS_COVERED

            , STATS_LEN // place holder.
}

lazy_static! {
    pub static ref STATS: FxHashMap<u64, &'static str> = {
        fxhashmap! {
            INPUT_TOTAL                 => "inputs",
            INPUT_OBSERVATIONS          => "observations",
            INPUT_CONDITIONS            => "conditions",
            INPUT_PRUNED                => "pruned",
            REPORT_SENT                 => "sent",
            REPORT_DROPPED              => "dropped",
            REPORT_SKIPPED              => "skipped",
            REPORT_WRITE_ADDRESSES      => "write addrs",
            CACHE_HITS                  => "hits",
            CACHE_MISSES                => "misses",
            SESSION_RUN_TIME            => "run time",
            SESSION_RECONNECTS          => "reconnects",
            SESSION_BLOCKS_COVERED      => "blocks covered"
        }
    };
    pub static ref GROUPS: FxHashMap<&'static str, Vec<u64>> = {
        fxhashmap! {
            "INPUT" => vec![
                INPUT_TOTAL,
                INPUT_OBSERVATIONS,
                INPUT_CONDITIONS,
                INPUT_PRUNED
            ],
            "REPORT" => vec![
                REPORT_SENT,
                REPORT_DROPPED,
                REPORT_SKIPPED,
                REPORT_WRITE_ADDRESSES
            ],
            "CACHE" => vec![CACHE_HITS, CACHE_MISSES],
            "SESSION" => vec![
                SESSION_RUN_TIME,
                SESSION_RECONNECTS,
                SESSION_BLOCKS_COVERED
            ]
        }
    };
}

const ZERO: AtomicU64 = AtomicU64::new(0);

pub struct Stats {
    start_tm: Instant,
    stats: [AtomicU64; STATS_LEN as usize],
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            start_tm: Instant::now(),
            stats: [ZERO; STATS_LEN as usize],
        }
    }

    pub fn inc(&self, stat: u64) -> u64 {
        self.stats[stat as usize].fetch_add(1, Ordering::Relaxed)
    }

    pub fn add(&self, stat: u64, n: u64) -> u64 {
        self.stats[stat as usize].fetch_add(n, Ordering::Relaxed)
    }

    pub fn load(&self, stat: u64) -> u64 {
        self.stats[stat as usize].load(Ordering::Relaxed)
    }

    pub fn store(&self, stat: u64, val: u64) {
        self.stats[stat as usize].store(val, Ordering::Relaxed);
    }

    pub fn update_time(&self) {
        let secs = self.start_tm.elapsed().as_secs();
        self.store(SESSION_RUN_TIME, secs);
    }

    pub fn to_json_str(&self) -> String {
        let mut grouped = HashMap::new(); // json crate can not stringify FxHashMap.
        for (&group_name, keys) in GROUPS.iter() {
            let mut sub_vals = HashMap::new();
            for key in keys.iter().copied() {
                sub_vals.insert(STATS[&key], self.load(key));
            }
            grouped.insert(group_name, sub_vals);
        }
        json::stringify(grouped)
    }

    pub fn report(&self) {
        self.update_time();
        log::info!("stats: {}", self.to_json_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_stat_named_and_grouped() {
        for i in 0..STATS_LEN {
            assert!(STATS.contains_key(&i));
            assert!(GROUPS.values().any(|g| g.contains(&i)));
        }
    }

    #[test]
    fn stats_to_json() {
        let s = Stats::new();
        s.inc(REPORT_SENT);
        s.add(CACHE_HITS, 3);
        let v = json::parse(&s.to_json_str()).unwrap();
        assert_eq!(v["REPORT"]["sent"], 1);
        assert_eq!(v["CACHE"]["hits"], 3);
        assert_eq!(v["CACHE"]["misses"], 0);
    }
}
