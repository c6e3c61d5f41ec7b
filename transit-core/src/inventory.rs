use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::{ScheduleStatus, SeatInventory};

/// A single mutation of a schedule's seat inventory.
///
/// Storage backends run `apply_to` inside their critical section, so the
/// admission rules live in one place no matter where the counters are kept.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum SeatOperation {
    Reserve(u32),
    Release(u32),
    SetStatus(ScheduleStatus),
}

impl SeatOperation {
    /// Apply the operation to `inventory`.
    ///
    /// On error `inventory` is left untouched.
    pub fn apply_to(&self, inventory: &mut SeatInventory) -> Result<(), InventoryError> {
        match *self {
            SeatOperation::Reserve(count) => reserve(inventory, count)?,
            SeatOperation::Release(count) => release(inventory, count)?,
            SeatOperation::SetStatus(status) => inventory.status = status,
        }
        inventory.version += 1;
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            SeatOperation::Reserve(_) => "reserve",
            SeatOperation::Release(_) => "release",
            SeatOperation::SetStatus(_) => "set_status",
        }
    }
}

fn reserve(inventory: &mut SeatInventory, count: u32) -> Result<(), InventoryError> {
    if count == 0 {
        return Err(InventoryError::InvalidPassengerCount(count));
    }
    if !inventory.status.is_bookable() {
        return Err(InventoryError::ScheduleNotBookable {
            schedule_id: inventory.schedule_id,
            status: inventory.status,
        });
    }
    if inventory.available < count {
        return Err(InventoryError::InsufficientCapacity {
            schedule_id: inventory.schedule_id,
            requested: count,
            available: inventory.available,
        });
    }

    inventory.available -= count;
    inventory.booked += count;
    Ok(())
}

fn release(inventory: &mut SeatInventory, count: u32) -> Result<(), InventoryError> {
    if count == 0 {
        return Err(InventoryError::InvalidPassengerCount(count));
    }
    if inventory.booked < count {
        return Err(InventoryError::ReleaseExceedsBooked {
            schedule_id: inventory.schedule_id,
            requested: count,
            booked: inventory.booked,
        });
    }

    inventory.booked -= count;
    inventory.available += count;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InventoryError {
    #[error("Schedule not found: {0}")]
    ScheduleNotFound(Uuid),

    #[error("Schedule already registered: {0}")]
    ScheduleAlreadyExists(Uuid),

    #[error("Invalid passenger count: {0}")]
    InvalidPassengerCount(u32),

    #[error("Insufficient capacity on schedule {schedule_id}: requested {requested}, available {available}")]
    InsufficientCapacity {
        schedule_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("Schedule {schedule_id} is not bookable (status: {status})")]
    ScheduleNotBookable {
        schedule_id: Uuid,
        status: ScheduleStatus,
    },

    #[error("Release exceeds booked seats on schedule {schedule_id}: requested {requested}, booked {booked}")]
    ReleaseExceedsBooked {
        schedule_id: Uuid,
        requested: u32,
        booked: u32,
    },

    #[error("Gave up on schedule {schedule_id} after {attempts} contended attempts")]
    ConcurrencyExhausted { schedule_id: Uuid, attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl InventoryError {
    /// Worth retrying later with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, InventoryError::ConcurrencyExhausted { .. })
    }

    /// Rejected by a business rule rather than by a fault.
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            InventoryError::InsufficientCapacity { .. }
                | InventoryError::ScheduleNotBookable { .. }
                | InventoryError::InvalidPassengerCount(_)
        )
    }
}
