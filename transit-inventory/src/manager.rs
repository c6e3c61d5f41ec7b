use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use transit_core::{
    InventoryError, InventoryEvent, ScheduleStatus, SeatInventory, SeatOperation, SeatStore,
    StoreError,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Seats held for a caller after a successful reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub schedule_id: Uuid,
    pub passenger_count: u32,
    /// Counters as they stood right after this reservation committed.
    pub snapshot: SeatInventory,
    pub reserved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per call, including the first one.
    pub max_attempts: u32,
    /// Attempt `n` waits `n * backoff` before retrying.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(25),
        }
    }
}

/// The sole writer of schedule seat counters.
pub struct SeatInventoryManager {
    store: Arc<dyn SeatStore>,
    retry: RetryPolicy,
    events: broadcast::Sender<InventoryEvent>,
}

impl SeatInventoryManager {
    pub fn new(store: Arc<dyn SeatStore>, retry: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.max(1),
                ..retry
            },
            events,
        }
    }

    /// Receive every committed seat change.
    ///
    /// Events are sent after the schedule lock is released, so concurrent
    /// writers can deliver them out of commit order. Consumers that track
    /// state should order a schedule's events by `snapshot.version`.
    pub fn subscribe(&self) -> broadcast::Receiver<InventoryEvent> {
        self.events.subscribe()
    }

    /// Open a schedule for sale with every seat available.
    pub async fn register_schedule(
        &self,
        schedule_id: Uuid,
        total_capacity: u32,
    ) -> Result<SeatInventory, InventoryError> {
        let inventory = SeatInventory::new(schedule_id, total_capacity);
        self.store.create(&inventory).await?;
        info!("Schedule {} registered with {} seats", schedule_id, total_capacity);
        Ok(inventory)
    }

    pub async fn reserve(
        &self,
        schedule_id: Uuid,
        passenger_count: u32,
    ) -> Result<Reservation, InventoryError> {
        if passenger_count == 0 {
            return Err(InventoryError::InvalidPassengerCount(passenger_count));
        }

        let snapshot = match self
            .apply_with_retry(schedule_id, SeatOperation::Reserve(passenger_count))
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Reservation of {} seats on {} rejected: {}", passenger_count, schedule_id, e);
                return Err(e);
            }
        };

        info!(
            "Reserved {} seats on {} ({} of {} left)",
            passenger_count, schedule_id, snapshot.available, snapshot.total_capacity
        );

        let reserved_at = Utc::now();
        let _ = self.events.send(InventoryEvent::SeatsReserved {
            schedule_id,
            passenger_count,
            snapshot,
            at: reserved_at,
        });

        Ok(Reservation {
            schedule_id,
            passenger_count,
            snapshot,
            reserved_at,
        })
    }

    pub async fn release(
        &self,
        schedule_id: Uuid,
        passenger_count: u32,
    ) -> Result<SeatInventory, InventoryError> {
        if passenger_count == 0 {
            return Err(InventoryError::InvalidPassengerCount(passenger_count));
        }

        let snapshot = match self
            .apply_with_retry(schedule_id, SeatOperation::Release(passenger_count))
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e @ InventoryError::ReleaseExceedsBooked { .. }) => {
                error!("Refusing to release {} seats on {}: {}", passenger_count, schedule_id, e);
                return Err(e);
            }
            Err(e) => {
                warn!("Release of {} seats on {} failed: {}", passenger_count, schedule_id, e);
                return Err(e);
            }
        };

        info!(
            "Released {} seats on {} ({} of {} left)",
            passenger_count, schedule_id, snapshot.available, snapshot.total_capacity
        );

        let _ = self.events.send(InventoryEvent::SeatsReleased {
            schedule_id,
            passenger_count,
            snapshot,
            at: Utc::now(),
        });

        Ok(snapshot)
    }

    /// Current counters without taking the writer lock.
    pub async fn peek(&self, schedule_id: Uuid) -> Result<SeatInventory, InventoryError> {
        self.store
            .snapshot(schedule_id)
            .await?
            .ok_or(InventoryError::ScheduleNotFound(schedule_id))
    }

    pub async fn set_status(
        &self,
        schedule_id: Uuid,
        status: ScheduleStatus,
    ) -> Result<SeatInventory, InventoryError> {
        let snapshot = self
            .apply_with_retry(schedule_id, SeatOperation::SetStatus(status))
            .await?;

        info!("Schedule {} is now {}", schedule_id, status);
        let _ = self.events.send(InventoryEvent::ScheduleStatusChanged {
            schedule_id,
            status,
            snapshot,
            at: Utc::now(),
        });

        Ok(snapshot)
    }

    async fn apply_with_retry(
        &self,
        schedule_id: Uuid,
        operation: SeatOperation,
    ) -> Result<SeatInventory, InventoryError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.apply(schedule_id, operation).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(StoreError::Contended(_)) if attempt < self.retry.max_attempts => {
                    warn!(
                        "Schedule {} contended on {} (attempt {}/{})",
                        schedule_id,
                        operation.name(),
                        attempt,
                        self.retry.max_attempts
                    );
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
                Err(StoreError::Contended(_)) => {
                    return Err(InventoryError::ConcurrencyExhausted {
                        schedule_id,
                        attempts: attempt,
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
