use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::{ScheduleStatus, SeatInventory};

/// Published after every committed inventory mutation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryEvent {
    SeatsReserved {
        schedule_id: Uuid,
        passenger_count: u32,
        snapshot: SeatInventory,
        at: DateTime<Utc>,
    },
    SeatsReleased {
        schedule_id: Uuid,
        passenger_count: u32,
        snapshot: SeatInventory,
        at: DateTime<Utc>,
    },
    ScheduleStatusChanged {
        schedule_id: Uuid,
        status: ScheduleStatus,
        snapshot: SeatInventory,
        at: DateTime<Utc>,
    },
}

impl InventoryEvent {
    pub fn schedule_id(&self) -> Uuid {
        match self {
            InventoryEvent::SeatsReserved { schedule_id, .. }
            | InventoryEvent::SeatsReleased { schedule_id, .. }
            | InventoryEvent::ScheduleStatusChanged { schedule_id, .. } => *schedule_id,
        }
    }

    pub fn snapshot(&self) -> &SeatInventory {
        match self {
            InventoryEvent::SeatsReserved { snapshot, .. }
            | InventoryEvent::SeatsReleased { snapshot, .. }
            | InventoryEvent::ScheduleStatusChanged { snapshot, .. } => snapshot,
        }
    }
}
