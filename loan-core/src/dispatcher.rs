//! Applies events on several threads while keeping the per id order.
//!
//! Events are partitioned by the id they concern and every partition is
//! drained by its own worker thread, so events of one id are applied one
//! after another in submission order while unrelated ids progress in
//! parallel.

use crate::error::Anomaly;
use crate::lifecycle::LoanLifecycle;
use crate::models::{ChainEvent, EventKey, RequestId};
use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// An event that was not applied.
#[derive(Debug)]
pub struct Failure {
    pub event: ChainEvent,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Report {
    /// Number of events that took effect.
    pub applied: usize,
    pub anomalies: Vec<(EventKey, Anomaly)>,
    /// Unapplied events in chain order.
    pub failures: Vec<Failure>,
}

impl Report {
    fn merge(&mut self, other: Report) {
        self.applied += other.applied;
        self.anomalies.extend(other.anomalies);
        self.failures.extend(other.failures);
    }
}

pub struct Dispatcher {
    queues: Vec<Sender<ChainEvent>>,
    workers: Vec<JoinHandle<Report>>,
}

impl Dispatcher {
    pub fn new(lifecycle: Arc<LoanLifecycle>, partitions: NonZeroUsize) -> Self {
        let (queues, workers) = (0..partitions.get())
            .map(|_| {
                let (sender, receiver) = mpsc::channel();
                let lifecycle = lifecycle.clone();
                let worker = thread::spawn(move || work(&lifecycle, receiver));
                (sender, worker)
            })
            .unzip();
        Self { queues, workers }
    }

    /// Queues an event behind all previously submitted events of its id.
    pub fn submit(&self, event: ChainEvent) -> Result<()> {
        let partition = match event.event.subject() {
            Some(id) => id.partition(self.queues.len()),
            None => 0,
        };
        self.queues[partition]
            .send(event)
            .map_err(|_| anyhow!("worker of partition {} exited", partition))
    }

    /// Waits for all queued events to be processed.
    pub fn finish(self) -> Result<Report> {
        // Closing the queues ends the workers once they are drained.
        drop(self.queues);
        let mut report = Report::default();
        for worker in self.workers {
            let partial = worker
                .join()
                .map_err(|_| anyhow!("lifecycle worker panicked"))?;
            report.merge(partial);
        }
        report
            .failures
            .sort_by_key(|failure| (failure.event.block_number, failure.event.log_index));
        Ok(report)
    }
}

fn work(lifecycle: &LoanLifecycle, events: Receiver<ChainEvent>) -> Report {
    let mut report = Report::default();
    // Ids with a failed event. Applying their later events would break the
    // order so they are failed as well.
    let mut stalled = HashSet::<RequestId>::new();

    for event in events {
        let subject = event.event.subject();
        if let Some(id) = subject.filter(|id| stalled.contains(id)) {
            report.failures.push(Failure {
                reason: format!("an earlier event of {} was not applied", id),
                event,
            });
            continue;
        }

        match lifecycle.apply(&event) {
            Ok(applied) => {
                if applied.is_applied() {
                    report.applied += 1;
                }
                if let Some(anomaly) = applied.anomaly {
                    report.anomalies.push((event.key(), anomaly));
                }
            }
            Err(err) => {
                let err = anyhow::Error::from(err);
                log::error!(
                    "failed to apply {} event {}: {:?}",
                    event.event.name(),
                    event.key(),
                    err
                );
                if let Some(id) = subject {
                    stalled.insert(id);
                }
                report.failures.push(Failure {
                    reason: format!("{:#}", err),
                    event,
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LoanEvent, NULL_ADDRESS};
    use crate::request_state::{MockRequestStateReading, RequestState};
    use crate::store::{Entity, EntityKind, EntityStore, InMemoryStore};
    use ethcontract::{Address, H256};
    use mockall::predicate::{always, eq};

    fn address(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn transfer(block_number: u64, from: Address, to: Address, id: u64) -> ChainEvent {
        ChainEvent {
            block_number,
            block_timestamp: block_number * 10,
            transaction_hash: H256::from_low_u64_be(block_number * 1000 + id),
            log_index: id,
            event: LoanEvent::Transfer {
                from,
                to,
                token_id: id.into(),
            },
        }
    }

    fn loan_lifecycle(
        contract: MockRequestStateReading,
    ) -> (Arc<LoanLifecycle>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::default());
        let lifecycle = LoanLifecycle::new(Arc::new(contract), store.clone());
        (Arc::new(lifecycle), store)
    }

    #[test]
    fn keeps_order_per_id() {
        let mut contract = MockRequestStateReading::new();
        contract
            .expect_read_request_state()
            .returning(|_, _| Ok(RequestState::default()));
        let (lifecycle, store) = loan_lifecycle(contract);
        let dispatcher = Dispatcher::new(lifecycle, NonZeroUsize::new(3).unwrap());

        for id in 0..20 {
            dispatcher
                .submit(transfer(1, NULL_ADDRESS, address(1), id))
                .unwrap();
        }
        for id in 0..20 {
            dispatcher
                .submit(transfer(2, address(1), address(2), id))
                .unwrap();
            dispatcher
                .submit(transfer(3, address(2), NULL_ADDRESS, id))
                .unwrap();
        }
        let report = dispatcher.finish().unwrap();

        assert_eq!(report.applied, 60);
        assert!(report.anomalies.is_empty());
        assert!(report.failures.is_empty());
        for id in 0..20 {
            match store.load(EntityKind::Loan, &id.to_string()).unwrap() {
                Some(Entity::Loan(loan)) => {
                    assert_eq!(loan.creditor, address(2));
                    assert_eq!(loan.destroyed_at, Some(30));
                }
                entity => panic!("unexpected entity {:?}", entity),
            }
        }
    }

    #[test]
    fn failed_id_is_stalled() {
        let mut contract = MockRequestStateReading::new();
        contract
            .expect_read_request_state()
            .with(eq(RequestId::from(7)), always())
            .returning(|_, _| Err(anyhow!("node unavailable")));
        contract
            .expect_read_request_state()
            .with(eq(RequestId::from(8)), always())
            .returning(|_, _| Ok(RequestState::default()));
        let (lifecycle, store) = loan_lifecycle(contract);
        let dispatcher = Dispatcher::new(lifecycle, NonZeroUsize::new(1).unwrap());

        dispatcher
            .submit(transfer(1, NULL_ADDRESS, address(1), 7))
            .unwrap();
        dispatcher
            .submit(transfer(1, NULL_ADDRESS, address(1), 8))
            .unwrap();
        dispatcher
            .submit(transfer(2, address(1), address(2), 7))
            .unwrap();
        dispatcher
            .submit(transfer(2, address(1), address(2), 8))
            .unwrap();
        let report = dispatcher.finish().unwrap();

        assert_eq!(report.applied, 2);
        assert!(report.anomalies.is_empty());
        let failed = report
            .failures
            .iter()
            .map(|failure| (failure.event.block_number, failure.event.event.subject()))
            .collect::<Vec<_>>();
        assert_eq!(
            failed,
            vec![(1, Some(RequestId::from(7))), (2, Some(RequestId::from(7)))]
        );
        assert!(report.failures[0].reason.contains("node unavailable"));
        assert!(store.load(EntityKind::Loan, "7").unwrap().is_none());
        assert!(store.load(EntityKind::Loan, "8").unwrap().is_some());
    }

    #[test]
    fn anomalies_are_reported() {
        let (lifecycle, _) = loan_lifecycle(MockRequestStateReading::new());
        let dispatcher = Dispatcher::new(lifecycle, NonZeroUsize::new(2).unwrap());
        let event = transfer(1, address(1), address(2), 7);
        dispatcher.submit(event.clone()).unwrap();
        let report = dispatcher.finish().unwrap();

        assert_eq!(report.applied, 0);
        assert_eq!(
            report.anomalies,
            vec![(
                event.key(),
                Anomaly::MissingAggregate {
                    kind: EntityKind::Loan,
                    id: 7.into()
                }
            )]
        );
    }
}
