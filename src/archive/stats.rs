use std::collections::BTreeMap;

use enum_map::{Enum, EnumMap};
use itertools::Itertools;

use crate::archive::dump_region::percent_of;

/// The two regions objects are copied into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum)]
pub enum Placement {
    Ro,
    Rw,
}

impl Placement {
    pub fn of(read_only: bool) -> Placement {
        if read_only {
            Placement::Ro
        } else {
            Placement::Rw
        }
    }
}

/// The name under which bytes that do not belong to an object are recorded.
pub const OTHER: &str = "Other";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct KindStats {
    pub count: usize,
    pub bytes: usize,
}

/// Counts the objects and bytes copied into each region, per kind.
#[derive(Default)]
pub struct DumpAllocStats {
    per_kind: EnumMap<Placement, BTreeMap<&'static str, KindStats>>,
}

impl DumpAllocStats {
    /// Record one copied object of kind `name` taking `bytes` bytes, alignment padding included.
    pub fn record(&mut self, name: &'static str, bytes: usize, read_only: bool) {
        let s = self.per_kind[Placement::of(read_only)]
            .entry(name)
            .or_default();
        s.count += 1;
        s.bytes += bytes;
    }

    /// Record bytes that belong to no object, such as index slots and serialized data.
    pub fn record_other(&mut self, bytes: usize, read_only: bool) {
        self.per_kind[Placement::of(read_only)]
            .entry(OTHER)
            .or_default()
            .bytes += bytes;
    }

    pub fn get(&self, placement: Placement, name: &str) -> KindStats {
        self.per_kind[placement]
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    /// Total bytes recorded for a region.
    pub fn total_bytes(&self, placement: Placement) -> usize {
        self.per_kind[placement].values().map(|s| s.bytes).sum()
    }

    /// Log the table. The rw column includes the mc region, whose bytes are recorded as other.
    /// Every byte used in ro and rw must have been recorded.
    pub fn print_stats(&mut self, ro_all: usize, rw_all: usize, mc_all: usize) {
        self.record_other(mc_all, false);
        let rw_all = rw_all + mc_all;

        let names = self.per_kind[Placement::Ro]
            .keys()
            .chain(self.per_kind[Placement::Rw].keys())
            .copied()
            .unique()
            .sorted_by_key(|name| (*name == OTHER, *name))
            .collect::<Vec<_>>();

        let sep = "--------------------+---------------------------+---------------------------+--------------------------";
        let hdr = "                        ro_cnt   ro_bytes     % |   rw_cnt   rw_bytes     % |  all_cnt  all_bytes     %";

        info!("Detailed metadata info (rw stats include the mc region):");
        info!("{}", hdr);
        info!("{}", sep);
        let mut all_ro = KindStats::default();
        let mut all_rw = KindStats::default();
        for name in names {
            let ro = self.get(Placement::Ro, name);
            let rw = self.get(Placement::Rw, name);
            info!(
                "{}",
                format_row(name, ro, rw, ro_all, rw_all)
            );
            all_ro.count += ro.count;
            all_ro.bytes += ro.bytes;
            all_rw.count += rw.count;
            all_rw.bytes += rw.bytes;
        }
        info!("{}", sep);
        info!("{}", format_row("Total", all_ro, all_rw, ro_all, rw_all));

        assert_eq!(all_ro.bytes, ro_all, "ro region bytes do not add up");
        assert_eq!(all_rw.bytes, rw_all, "rw region bytes do not add up");
    }
}

fn format_row(name: &str, ro: KindStats, rw: KindStats, ro_all: usize, rw_all: usize) -> String {
    format!(
        "{:<20}: {:>8} {:>10} {:>5.1} | {:>8} {:>10} {:>5.1} | {:>8} {:>10} {:>5.1}",
        name,
        ro.count,
        ro.bytes,
        percent_of(ro.bytes, ro_all),
        rw.count,
        rw.bytes,
        percent_of(rw.bytes, rw_all),
        ro.count + rw.count,
        ro.bytes + rw.bytes,
        percent_of(ro.bytes + rw.bytes, ro_all + rw_all)
    )
}
