use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::models::Event;

/// Aggregate view over a set of events
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub total: usize,
    pub by_source: Vec<(IpAddr, usize)>,
    pub by_port: Vec<(u16, usize)>,
}

/// Count events per source address and per destination port.
///
/// Both lists are sorted by descending count, ties broken by
/// address/port, so identical inputs render identically.
pub fn summarize(events: &[Event]) -> Summary {
    let mut by_source: HashMap<IpAddr, usize> = HashMap::new();
    let mut by_port: HashMap<u16, usize> = HashMap::new();

    for event in events {
        *by_source.entry(event.source_address).or_default() += 1;
        *by_port.entry(event.destination_port).or_default() += 1;
    }

    let mut by_source: Vec<_> = by_source.into_iter().collect();
    by_source.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut by_port: Vec<_> = by_port.into_iter().collect();
    by_port.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    Summary {
        total: events.len(),
        by_source,
        by_port,
    }
}

/// Earliest and latest timestamps over a set of events.
///
/// Journal reads yield events in completion order, not accept order,
/// so the bounds cannot be taken from the first and last elements.
pub fn time_bounds(events: &[Event]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let first = events.iter().map(|e| e.timestamp).min()?;
    let last = events.iter().map(|e| e.timestamp).max()?;
    Some((first, last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hit(ip: &str, port: u16) -> Event {
        Event {
            id: None,
            timestamp: Utc::now(),
            source_address: ip.parse().unwrap(),
            source_port: 50000,
            destination_port: port,
            banner: String::new(),
            payload: String::new(),
            byte_count: 0,
            duration_secs: 0.0,
            location: None,
        }
    }

    #[test]
    fn test_counts() {
        let events = vec![
            hit("1.1.1.1", 2222),
            hit("1.1.1.1", 2121),
            hit("1.1.1.1", 2222),
            hit("2.2.2.2", 2222),
        ];

        let summary = summarize(&events);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.by_source[0], ("1.1.1.1".parse().unwrap(), 3));
        assert_eq!(summary.by_source[1], ("2.2.2.2".parse().unwrap(), 1));
        assert_eq!(summary.by_port[0], (2222, 3));
        assert_eq!(summary.by_port[1], (2121, 1));
    }

    #[test]
    fn test_ties_order_by_key() {
        let events = vec![hit("9.9.9.9", 2323), hit("1.1.1.1", 2121)];

        let summary = summarize(&events);
        assert_eq!(summary.by_source[0].0.to_string(), "1.1.1.1");
        assert_eq!(summary.by_source[1].0.to_string(), "9.9.9.9");
        assert_eq!(summary.by_port[0].0, 2121);
        assert_eq!(summary.by_port[1].0, 2323);
    }

    #[test]
    fn test_empty() {
        let summary = summarize(&[]);
        assert_eq!(summary.total, 0);
        assert!(summary.by_source.is_empty());
        assert!(summary.by_port.is_empty());
    }

    #[test]
    fn test_time_bounds_ignore_input_order() {
        let at = |secs: i64| {
            let mut event = hit("1.1.1.1", 2222);
            event.timestamp = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
            event
        };

        // Completion order: the oldest event is in the middle
        let events = vec![at(50), at(10), at(30)];
        let (first, last) = time_bounds(&events).unwrap();
        assert_eq!(first, Utc.timestamp_opt(1_700_000_010, 0).unwrap());
        assert_eq!(last, Utc.timestamp_opt(1_700_000_050, 0).unwrap());

        assert!(time_bounds(&[]).is_none());
    }
}
