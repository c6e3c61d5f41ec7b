use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{Booking, BookingStatus};
use crate::inventory::{InventoryError, SeatOperation};
use crate::schedule::SeatInventory;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The per-schedule lock could not be taken in time.
    #[error("Lock contention on {0}")]
    Contended(Uuid),

    #[error("Record not found: {0}")]
    NotFound(Uuid),

    #[error("Record already exists: {0}")]
    AlreadyExists(Uuid),

    /// The operation ran inside the critical section and was refused.
    #[error(transparent)]
    Rejected(#[from] InventoryError),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for InventoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(e) => e,
            StoreError::NotFound(id) => InventoryError::ScheduleNotFound(id),
            StoreError::AlreadyExists(id) => InventoryError::ScheduleAlreadyExists(id),
            StoreError::Contended(id) => InventoryError::ConcurrencyExhausted {
                schedule_id: id,
                attempts: 1,
            },
            StoreError::Backend(msg) => InventoryError::Storage(msg),
        }
    }
}

/// Storage for schedule seat counters.
///
/// Implementations own the critical section: `apply` must load, mutate with
/// [`SeatOperation::apply_to`] and persist as one atomic unit per schedule,
/// while calls on different schedules proceed independently.
#[async_trait]
pub trait SeatStore: Send + Sync {
    async fn create(&self, inventory: &SeatInventory) -> Result<(), StoreError>;

    /// Consistent point-in-time read that never waits on the writer lock.
    async fn snapshot(&self, schedule_id: Uuid) -> Result<Option<SeatInventory>, StoreError>;

    async fn apply(
        &self,
        schedule_id: Uuid,
        operation: SeatOperation,
    ) -> Result<SeatInventory, StoreError>;
}

/// Outcome of a conditional status change.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    /// The booking was in an allowed source status and has been moved.
    /// Carries the status it moved away from.
    Applied {
        booking: Booking,
        previous: BookingStatus,
    },
    /// The booking was left as it is.
    Unchanged(Booking),
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: &Booking) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;

    /// Compare-and-set on the status: moves booking `id` to `to` only if its
    /// current status is one of `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> Result<StatusChange, StoreError>;

    /// Pending bookings created at or before `cutoff`, oldest first.
    async fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, StoreError>;
}
