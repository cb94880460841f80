//! Derives the `Request` and `Loan` entities from the loan contract's events.
//!
//! Events of one id have to be applied in the order they were emitted. Every
//! transition assumes it sees the entity as left by the previous event of the
//! same id (creation before cancellation, mint before transfer and so on).
//! Events of different ids are independent.

use crate::error::{Anomaly, Error};
use crate::models::{
    ChainEvent, EventRecord, Loan, LoanEvent, Request, RequestId, Timestamp, TransferKind,
};
use crate::request_state::{RequestState, RequestStateReading};
use crate::store::{Entity, EntityKind, EntityStore};
use anyhow::anyhow;
use ethcontract::{Address, U256};
use std::sync::Arc;

/// The result of applying one event.
#[derive(Debug, Default, PartialEq)]
pub struct Applied {
    /// The entity written by this event. `None` if nothing changed.
    pub updated: Option<Entity>,
    pub anomaly: Option<Anomaly>,
}

impl Applied {
    fn updated(entity: Entity) -> Self {
        Applied {
            updated: Some(entity),
            anomaly: None,
        }
    }

    fn unchanged() -> Self {
        Applied::default()
    }

    fn skipped(anomaly: Anomaly) -> Self {
        Applied {
            updated: None,
            anomaly: Some(anomaly),
        }
    }

    /// Whether the event took effect, even if it was a no-op.
    pub fn is_applied(&self) -> bool {
        self.anomaly.as_ref().map_or(true, Anomaly::is_applied)
    }
}

pub struct LoanLifecycle {
    contract: Arc<dyn RequestStateReading>,
    store: Arc<dyn EntityStore>,
}

impl LoanLifecycle {
    pub fn new(contract: Arc<dyn RequestStateReading>, store: Arc<dyn EntityStore>) -> Self {
        Self { contract, store }
    }

    /// Applies an event to the entities it concerns.
    ///
    /// Events that were already applied are recognized by their transaction
    /// hash and log index and skipped. On error nothing has been written.
    pub fn apply(&self, event: &ChainEvent) -> Result<Applied, Error> {
        let key = event.key();
        if self.load(EntityKind::Event, &key.to_string())?.is_some() {
            let applied = Applied::skipped(Anomaly::Redelivered { key });
            log_anomaly(event, &applied);
            return Ok(applied);
        }

        log::debug!(
            "applying {} event {} from block {}",
            event.event.name(),
            key,
            event.block_number
        );
        let applied = match &event.event {
            LoanEvent::Approval { .. } | LoanEvent::ApprovalForAll { .. } => Applied::unchanged(),
            LoanEvent::RequestCreation {
                request_id,
                debtor,
                request_metadata,
            } => self.request_creation(
                *request_id,
                *debtor,
                request_metadata,
                event.block_number,
            )?,
            LoanEvent::RequestCanceled { request_id } => {
                self.request_canceled(*request_id, event.block_timestamp)?
            }
            LoanEvent::Transfer { from, to, token_id } => self.transfer(
                *from,
                *to,
                *token_id,
                event.block_number,
                event.block_timestamp,
            )?,
            LoanEvent::LoanRepayment {
                request_id,
                repaid_amount,
                ..
            } => self.loan_repayment(
                *request_id,
                *repaid_amount,
                event.block_number,
                event.block_timestamp,
            )?,
            LoanEvent::LoanForgiven { request_id, .. } => {
                self.loan_forgiven(*request_id, event.block_timestamp)?
            }
        };
        log_anomaly(event, &applied);

        if applied.is_applied() {
            // The entity and the record of its event are written in one batch.
            let writes = applied
                .updated
                .iter()
                .cloned()
                .chain(Some(Entity::Event(EventRecord::from(event))))
                .collect();
            self.store.upsert_all(writes).map_err(Error::Store)?;
        }
        Ok(applied)
    }

    fn request_creation(
        &self,
        id: RequestId,
        debtor: Address,
        metadata: &str,
        block_number: u64,
    ) -> Result<Applied, Error> {
        if self.request(id)?.is_some() {
            return Ok(Applied::skipped(Anomaly::DuplicateCreation {
                kind: EntityKind::Request,
                id,
            }));
        }
        let contract = self.read(id, block_number)?;
        let request = Request::create(id, debtor, metadata.to_string(), block_number, &contract);
        Ok(Applied::updated(Entity::Request(request)))
    }

    fn request_canceled(&self, id: RequestId, timestamp: Timestamp) -> Result<Applied, Error> {
        let mut request = match self.request(id)? {
            Some(request) => request,
            None => return Ok(missing(EntityKind::Request, id)),
        };
        if !request.cancel(timestamp) {
            log::debug!("request {} is already canceled", id);
            return Ok(Applied::unchanged());
        }
        if self.loan(id)?.is_some() {
            log::warn!("request {} canceled after it was funded", id);
        }
        Ok(Applied::updated(Entity::Request(request)))
    }

    fn transfer(
        &self,
        from: Address,
        to: Address,
        id: RequestId,
        block_number: u64,
        timestamp: Timestamp,
    ) -> Result<Applied, Error> {
        let (kind, ambiguous) = TransferKind::classify(from, to);
        match kind {
            TransferKind::Mint => {
                if self.loan(id)?.is_some() {
                    if ambiguous {
                        log::warn!(
                            "transfer of token {} from and to the null address treated as mint",
                            id
                        );
                    }
                    return Ok(Applied::skipped(Anomaly::DuplicateCreation {
                        kind: EntityKind::Loan,
                        id,
                    }));
                }
                let contract = self.read(id, block_number)?;
                if self.request(id)?.is_none() {
                    log::warn!("loan {} funded without an indexed request", id);
                }
                let mut applied = Applied::updated(Entity::Loan(Loan::fund(id, &contract)));
                if ambiguous {
                    applied.anomaly = Some(Anomaly::AmbiguousTransfer { id });
                }
                Ok(applied)
            }
            TransferKind::Burn => self.destroy_loan(id, timestamp),
            TransferKind::Ordinary => {
                let mut loan = match self.loan(id)? {
                    Some(loan) => loan,
                    None => return Ok(missing(EntityKind::Loan, id)),
                };
                loan.transfer_to(to);
                Ok(Applied::updated(Entity::Loan(loan)))
            }
        }
    }

    fn loan_repayment(
        &self,
        id: RequestId,
        amount: U256,
        block_number: u64,
        timestamp: Timestamp,
    ) -> Result<Applied, Error> {
        let mut loan = match self.loan(id)? {
            Some(loan) => loan,
            None => return Ok(missing(EntityKind::Loan, id)),
        };
        let contract = self.read(id, block_number)?;
        loan.record_repayment(amount, &contract, timestamp);
        Ok(Applied::updated(Entity::Loan(loan)))
    }

    fn loan_forgiven(&self, id: RequestId, timestamp: Timestamp) -> Result<Applied, Error> {
        self.destroy_loan(id, timestamp)
    }

    fn destroy_loan(&self, id: RequestId, timestamp: Timestamp) -> Result<Applied, Error> {
        let mut loan = match self.loan(id)? {
            Some(loan) => loan,
            None => return Ok(missing(EntityKind::Loan, id)),
        };
        if !loan.destroy(timestamp) {
            log::debug!("loan {} is already destroyed", id);
            return Ok(Applied::unchanged());
        }
        log::info!("loan {} destroyed at {}", id, timestamp);
        Ok(Applied::updated(Entity::Loan(loan)))
    }

    fn read(&self, id: RequestId, block_number: u64) -> Result<RequestState, Error> {
        self.contract
            .read_request_state(id, block_number)
            .map_err(|source| Error::ContractRead {
                id,
                block_number,
                source,
            })
    }

    fn load(&self, kind: EntityKind, id: &str) -> Result<Option<Entity>, Error> {
        let entity = self.store.load(kind, id).map_err(Error::Store)?;
        match entity {
            Some(entity) if entity.kind() != kind => Err(Error::Store(anyhow!(
                "store returned a {} when loading {} {}",
                entity.kind(),
                kind,
                id
            ))),
            entity => Ok(entity),
        }
    }

    fn request(&self, id: RequestId) -> Result<Option<Request>, Error> {
        match self.load(EntityKind::Request, &id.to_string())? {
            Some(Entity::Request(request)) => Ok(Some(request)),
            _ => Ok(None),
        }
    }

    fn loan(&self, id: RequestId) -> Result<Option<Loan>, Error> {
        match self.load(EntityKind::Loan, &id.to_string())? {
            Some(Entity::Loan(loan)) => Ok(Some(loan)),
            _ => Ok(None),
        }
    }

}

fn missing(kind: EntityKind, id: RequestId) -> Applied {
    Applied::skipped(Anomaly::MissingAggregate { kind, id })
}

fn log_anomaly(event: &ChainEvent, applied: &Applied) {
    if let Some(anomaly) = &applied.anomaly {
        log::warn!(
            "{} event {} in block {}: {}",
            event.event.name(),
            event.key(),
            event.block_number,
            anomaly
        );
    }
}
