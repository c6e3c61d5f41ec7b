//! Process-local stores.
//!
//! Seat counters sit behind one async mutex per schedule. `tokio::sync::Mutex`
//! hands the lock out in FIFO order, which is what makes admission
//! first-come-first-served. Readers never touch that mutex: every commit
//! publishes an immutable copy through an `ArcSwap`.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use transit_core::{
    Booking, BookingRepository, BookingStatus, SeatInventory, SeatOperation, SeatStore,
    StatusChange, StoreError,
};

struct ScheduleSlot {
    state: Mutex<SeatInventory>,
    published: ArcSwap<SeatInventory>,
}

impl ScheduleSlot {
    fn new(inventory: SeatInventory) -> Self {
        Self {
            state: Mutex::new(inventory),
            published: ArcSwap::from_pointee(inventory),
        }
    }
}

pub struct InMemorySeatStore {
    slots: DashMap<Uuid, Arc<ScheduleSlot>>,
    lock_timeout: Duration,
}

impl InMemorySeatStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            lock_timeout,
        }
    }

    fn slot(&self, schedule_id: Uuid) -> Option<Arc<ScheduleSlot>> {
        // Clone the Arc out so the shard guard is gone before any await.
        self.slots.get(&schedule_id).map(|e| e.value().clone())
    }
}

impl Default for InMemorySeatStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl SeatStore for InMemorySeatStore {
    async fn create(&self, inventory: &SeatInventory) -> Result<(), StoreError> {
        match self.slots.entry(inventory.schedule_id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(inventory.schedule_id)),
            Entry::Vacant(v) => {
                v.insert(Arc::new(ScheduleSlot::new(*inventory)));
                Ok(())
            }
        }
    }

    async fn snapshot(&self, schedule_id: Uuid) -> Result<Option<SeatInventory>, StoreError> {
        Ok(self.slot(schedule_id).map(|slot| **slot.published.load()))
    }

    async fn apply(
        &self,
        schedule_id: Uuid,
        operation: SeatOperation,
    ) -> Result<SeatInventory, StoreError> {
        let slot = self
            .slot(schedule_id)
            .ok_or(StoreError::NotFound(schedule_id))?;

        let mut guard = tokio::time::timeout(self.lock_timeout, slot.state.lock())
            .await
            .map_err(|_| StoreError::Contended(schedule_id))?;

        let mut next = *guard;
        operation.apply_to(&mut next)?;

        *guard = next;
        slot.published.store(Arc::new(next));
        Ok(next)
    }
}

#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: DashMap<Uuid, Booking>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn insert(&self, booking: &Booking) -> Result<(), StoreError> {
        match self.bookings.entry(booking.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(booking.id)),
            Entry::Vacant(v) => {
                v.insert(booking.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(&id).map(|e| e.value().clone()))
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> Result<StatusChange, StoreError> {
        // get_mut holds the shard write lock for the whole check-and-set.
        let mut entry = self.bookings.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let booking = entry.value_mut();

        if !from.contains(&booking.status) {
            return Ok(StatusChange::Unchanged(booking.clone()));
        }

        let previous = booking.status;
        booking.update_status(to, Utc::now());
        Ok(StatusChange::Applied {
            booking: booking.clone(),
            previous,
        })
    }

    async fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, StoreError> {
        let mut stale: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| e.status == BookingStatus::Pending && e.booked_at <= cutoff)
            .map(|e| e.value().clone())
            .collect();
        stale.sort_by_key(|b| b.booked_at);
        stale.truncate(limit);
        Ok(stale)
    }
}
