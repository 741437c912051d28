use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

use crate::models::Event;

/// One detected scanning episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanAlert {
    pub source_address: IpAddr,
    pub window_start: DateTime<Utc>,
    pub distinct_port_count: usize,
}

/// Find sources that touched `port_threshold` distinct destination
/// ports within any `window`-long interval.
///
/// Each event of a source anchors a candidate window
/// `[timestamp, timestamp + window]`, inclusive at both ends. The first
/// candidate in time order that crosses the threshold yields that
/// source's single alert for this pass; later windows for the same
/// source are not considered. Alerts come out in source address order,
/// so a fixed input always yields the same sequence.
pub fn detect(events: &[Event], window: Duration, port_threshold: u32) -> Vec<ScanAlert> {
    let threshold = port_threshold as usize;

    let mut by_source: BTreeMap<IpAddr, Vec<(DateTime<Utc>, u16)>> = BTreeMap::new();
    for event in events {
        by_source
            .entry(event.source_address)
            .or_default()
            .push((event.timestamp, event.destination_port));
    }

    let mut alerts = Vec::new();

    for (source, mut probes) in by_source {
        // Fewer events than the threshold can never reach it
        if probes.len() < threshold {
            continue;
        }

        // Stable sort: equal timestamps keep their arrival order
        probes.sort_by_key(|(ts, _)| *ts);

        for (start, _) in &probes {
            let end = *start + window;

            let ports: HashSet<u16> = probes
                .iter()
                .filter(|(ts, _)| *ts >= *start && *ts <= end)
                .map(|(_, port)| *port)
                .collect();

            if ports.len() >= threshold {
                alerts.push(ScanAlert {
                    source_address: source,
                    window_start: *start,
                    distinct_port_count: ports.len(),
                });
                break;
            }
        }
    }

    alerts
}
