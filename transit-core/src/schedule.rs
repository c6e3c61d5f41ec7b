use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreError;

/// Operational status of a departure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled,
    Boarding,
    Departed,
    Arrived,
    Cancelled,
    Delayed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "scheduled",
            ScheduleStatus::Boarding => "boarding",
            ScheduleStatus::Departed => "departed",
            ScheduleStatus::Arrived => "arrived",
            ScheduleStatus::Cancelled => "cancelled",
            ScheduleStatus::Delayed => "delayed",
        }
    }

    /// Only a schedule that has not started boarding (and is not disrupted) sells seats.
    pub fn is_bookable(&self) -> bool {
        matches!(self, ScheduleStatus::Scheduled)
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(ScheduleStatus::Scheduled),
            "boarding" => Ok(ScheduleStatus::Boarding),
            "departed" => Ok(ScheduleStatus::Departed),
            "arrived" => Ok(ScheduleStatus::Arrived),
            "cancelled" => Ok(ScheduleStatus::Cancelled),
            "delayed" => Ok(ScheduleStatus::Delayed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Seat counters of one schedule.
///
/// `available + booked == total_capacity` holds for every value produced by
/// this crate; the fields stay public so storage backends can rebuild a
/// snapshot from their rows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatInventory {
    pub schedule_id: Uuid,
    pub total_capacity: u32,
    pub available: u32,
    pub booked: u32,
    pub status: ScheduleStatus,
    /// Bumped on every committed mutation.
    pub version: u64,
}

impl SeatInventory {
    pub fn new(schedule_id: Uuid, total_capacity: u32) -> Self {
        Self {
            schedule_id,
            total_capacity,
            available: total_capacity,
            booked: 0,
            status: ScheduleStatus::Scheduled,
            version: 0,
        }
    }

    pub fn is_consistent(&self) -> bool {
        u64::from(self.available) + u64::from(self.booked) == u64::from(self.total_capacity)
    }

    /// Share of capacity already sold, in `0.0..=1.0`.
    pub fn utilization(&self) -> f64 {
        if self.total_capacity == 0 {
            0.0
        } else {
            f64::from(self.booked) / f64::from(self.total_capacity)
        }
    }
}
