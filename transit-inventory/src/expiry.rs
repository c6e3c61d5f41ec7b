use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use transit_core::BookingRepository;

use crate::workflow::{BookingError, BookingWorkflow};

/// Cancels bookings left `Pending` longer than the hold window.
pub struct PendingBookingSweeper {
    workflow: Arc<BookingWorkflow>,
    bookings: Arc<dyn BookingRepository>,
    hold: chrono::Duration,
    batch_size: usize,
}

impl PendingBookingSweeper {
    pub fn new(
        workflow: Arc<BookingWorkflow>,
        bookings: Arc<dyn BookingRepository>,
        hold: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            workflow,
            bookings,
            hold: chrono::Duration::from_std(hold).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            batch_size: batch_size.max(1),
        }
    }

    /// One pass over stale pending bookings. Returns how many were expired.
    ///
    /// A booking that fails to expire is logged and left for the next pass.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, BookingError> {
        let Some(cutoff) = now.checked_sub_signed(self.hold) else {
            // Hold window reaches past the earliest representable time.
            debug!("Pending hold of {} is too long to expire anything", self.hold);
            return Ok(0);
        };
        let stale = self
            .bookings
            .list_pending_before(cutoff, self.batch_size)
            .await
            .map_err(|e| BookingError::Storage(e.to_string()))?;

        let mut expired = 0;
        for booking in stale {
            match self.workflow.expire_pending(booking.id).await {
                Ok(Some(_)) => expired += 1,
                Ok(None) => debug!("Booking {} left pending state before expiry", booking.id),
                Err(e) => warn!("Could not expire booking {}: {}", booking.id, e),
            }
        }

        if expired > 0 {
            info!("Expired {} pending bookings older than {}", expired, cutoff);
        }
        Ok(expired)
    }

    /// Sweep every `interval` until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Pending booking sweeper started (every {:?})", interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        error!("Pending booking sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Pending booking sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{RetryPolicy, SeatInventoryManager};
    use crate::workflow::PricingRules;
    use transit_core::NewBooking;
    use transit_store::{InMemoryBookingRepository, InMemorySeatStore};
    use uuid::Uuid;

    async fn setup(hold: Duration) -> (PendingBookingSweeper, Arc<BookingWorkflow>, Uuid) {
        let inventory = Arc::new(SeatInventoryManager::new(
            Arc::new(InMemorySeatStore::default()),
            RetryPolicy::default(),
        ));
        let schedule_id = Uuid::new_v4();
        inventory.register_schedule(schedule_id, 10).await.unwrap();

        let bookings: Arc<dyn BookingRepository> = Arc::new(InMemoryBookingRepository::new());
        let workflow = Arc::new(BookingWorkflow::new(
            inventory,
            bookings.clone(),
            PricingRules::default(),
        ));
        let sweeper = PendingBookingSweeper::new(workflow.clone(), bookings, hold, 10);
        (sweeper, workflow, schedule_id)
    }

    fn request(schedule_id: Uuid) -> NewBooking {
        NewBooking {
            schedule_id,
            passenger_user_id: "user-3".to_string(),
            passenger_name: "Tunde Bello".to_string(),
            passenger_email: "tunde@example.com".to_string(),
            number_of_passengers: 2,
            unit_price: 1_000,
            special_requests: None,
        }
    }

    #[tokio::test]
    async fn test_sweep_expires_only_stale_pending() {
        let (sweeper, workflow, schedule_id) = setup(Duration::from_secs(600)).await;
        let stale = workflow.create_booking(request(schedule_id)).await.unwrap();
        let kept = workflow.create_booking(request(schedule_id)).await.unwrap();
        workflow.confirm(kept.id).await.unwrap();

        // Nothing is old enough yet.
        assert_eq!(sweeper.sweep_once(Utc::now()).await.unwrap(), 0);

        let later = Utc::now() + chrono::Duration::seconds(601);
        assert_eq!(sweeper.sweep_once(later).await.unwrap(), 1);
        assert_eq!(workflow.get(stale.id).await.unwrap().status, transit_core::BookingStatus::Cancelled);

        let inv = workflow.inventory().peek(schedule_id).await.unwrap();
        assert_eq!(inv.booked, 2);
        assert_eq!(inv.available, 8);

        // A second pass finds nothing left to do.
        assert_eq!(sweeper.sweep_once(later).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_huge_hold_expires_nothing() {
        let (sweeper, workflow, schedule_id) = setup(Duration::from_secs(10_u64.pow(13))).await;
        workflow.create_booking(request(schedule_id)).await.unwrap();

        assert_eq!(sweeper.sweep_once(Utc::now()).await.unwrap(), 0);
        assert_eq!(workflow.inventory().peek(schedule_id).await.unwrap().booked, 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (sweeper, _, _) = setup(Duration::from_secs(0)).await;
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            sweeper.run(Duration::from_millis(10), rx).await;
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
