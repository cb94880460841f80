use crate::models::ChainEvent;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

// The engine can not undo an event so events have to reach it in chain order.
// Events collected from several sources (or delivered twice) are buffered here
// ordered by their position in the chain before being applied.

#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
struct EventSortKey {
    block_number: u64,
    log_index: u64,
}

impl From<&ChainEvent> for EventSortKey {
    fn from(event: &ChainEvent) -> Self {
        EventSortKey {
            block_number: event.block_number,
            log_index: event.log_index,
        }
    }
}

#[derive(Debug, Default)]
pub struct EventLog {
    events: BTreeMap<EventSortKey, ChainEvent>,
}

impl EventLog {
    /// Reads one JSON encoded `ChainEvent` per line. Blank lines are skipped.
    pub fn read_json_lines(reader: impl BufRead) -> Result<Self> {
        let mut log = EventLog::default();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event = serde_json::from_str(&line)
                .with_context(|| format!("invalid event on line {}", index + 1))?;
            log.insert(event);
        }
        Ok(log)
    }

    /// Adds an event. An event at the same position as an earlier one
    /// replaces it.
    pub fn insert(&mut self, event: ChainEvent) {
        if let Some(replaced) = self.events.insert(EventSortKey::from(&event), event) {
            log::debug!(
                "replaced event at block {} log {}",
                replaced.block_number,
                replaced.log_index
            );
        }
    }

    pub fn delete_events_starting_at_block(&mut self, block_number: u64) {
        self.events.split_off(&EventSortKey {
            block_number,
            log_index: 0,
        });
    }

    pub fn last_handled_block(&self) -> Option<u64> {
        Some(self.events.keys().next_back()?.block_number)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// All events in chain order.
    pub fn events(&self) -> impl DoubleEndedIterator<Item = &'_ ChainEvent> + '_ {
        self.events.values()
    }

    pub fn into_events(self) -> impl Iterator<Item = ChainEvent> {
        self.events.into_iter().map(|(_, event)| event)
    }
}

impl TryFrom<&Path> for EventLog {
    type Error = anyhow::Error;

    fn try_from(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("couldn't open {}", path.display()))?;
        let log = EventLog::read_json_lines(BufReader::new(file))
            .with_context(|| format!("failed to read events from {}", path.display()))?;
        log::info!("Loaded {} events from {}", log.len(), path.display());
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LoanEvent;
    use ethcontract::H256;

    fn event(block_number: u64, log_index: u64) -> ChainEvent {
        ChainEvent {
            block_number,
            block_timestamp: block_number * 10,
            transaction_hash: H256::from_low_u64_be(block_number),
            log_index,
            event: LoanEvent::RequestCanceled {
                request_id: (block_number * 100 + log_index).into(),
            },
        }
    }

    fn positions(log: &EventLog) -> Vec<(u64, u64)> {
        log.events()
            .map(|event| (event.block_number, event.log_index))
            .collect()
    }

    #[test]
    fn orders_events_by_chain_position() {
        let mut log = EventLog::default();
        for (block_number, log_index) in &[(2, 0), (1, 1), (2, 3), (1, 0)] {
            log.insert(event(*block_number, *log_index));
        }
        assert_eq!(positions(&log), vec![(1, 0), (1, 1), (2, 0), (2, 3)]);
        assert_eq!(log.last_handled_block(), Some(2));
    }

    #[test]
    fn same_position_replaces() {
        let mut log = EventLog::default();
        log.insert(event(1, 0));
        log.insert(event(1, 0));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn delete_events_starting_at_block() {
        let mut log = EventLog::default();
        for block_number in 0..5 {
            log.insert(event(block_number, 0));
            log.insert(event(block_number, 1));
        }
        log.delete_events_starting_at_block(3);
        assert_eq!(log.last_handled_block(), Some(2));
        assert_eq!(log.len(), 6);
        log.delete_events_starting_at_block(0);
        assert!(log.is_empty());
        assert_eq!(log.last_handled_block(), None);
    }

    #[test]
    fn reads_json_lines() {
        let lines = [event(2, 0), event(1, 0)]
            .iter()
            .map(|event| serde_json::to_string(event).unwrap())
            .collect::<Vec<_>>()
            .join("\n\n");
        let log = EventLog::read_json_lines(lines.as_bytes()).unwrap();
        assert_eq!(
            log.into_events().collect::<Vec<_>>(),
            vec![event(1, 0), event(2, 0)]
        );
    }

    #[test]
    fn reports_malformed_line() {
        let valid = serde_json::to_string(&event(1, 0)).unwrap();
        let lines = format!("{}\n{{\"blockNumber\": 1}}", valid);
        let err = EventLog::read_json_lines(lines.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
