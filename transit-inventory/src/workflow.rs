use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use transit_core::{
    Booking, BookingRepository, BookingStatus, BookingTotals, CoreError, InventoryError,
    NewBooking, StatusChange, StoreError,
};

use crate::manager::SeatInventoryManager;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),

    #[error("Booking cannot move from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Booking {0} is being cancelled")]
    CancellationInProgress(Uuid),

    #[error("Unit price {unit_price} for {passengers} passengers is out of range")]
    InvalidPrice { unit_price: i64, passengers: u32 },

    #[error("Booking storage error: {0}")]
    Storage(String),
}

impl From<CoreError> for BookingError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidPrice {
                unit_price,
                passengers,
            } => BookingError::InvalidPrice {
                unit_price,
                passengers,
            },
            other => BookingError::Storage(other.to_string()),
        }
    }
}

fn booking_store_error(id: Uuid, err: StoreError) -> BookingError {
    match err {
        StoreError::NotFound(_) => BookingError::BookingNotFound(id),
        other => BookingError::Storage(other.to_string()),
    }
}

/// Fare inputs applied to every new booking.
#[derive(Debug, Clone)]
pub struct PricingRules {
    pub tax_rate: f64,
    /// Flat fee per booking, in minor units.
    pub booking_fee: i64,
    pub currency: String,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self {
            tax_rate: 0.0,
            booking_fee: 0,
            currency: "USD".to_string(),
        }
    }
}

/// Drives bookings through their lifecycle and applies the seat effect of each step.
///
/// A booking reserves its seats exactly once, when it is created, and gives
/// them back exactly once, on the way into `Cancelled`. Every other
/// transition leaves the schedule untouched.
///
/// A cancel first moves the booking to `Cancelling`, releases the seats and
/// only then marks it `Cancelled`, so `Cancelled` is never visible for a
/// booking whose seats are still held.
pub struct BookingWorkflow {
    inventory: Arc<SeatInventoryManager>,
    bookings: Arc<dyn BookingRepository>,
    pricing: PricingRules,
}

impl BookingWorkflow {
    pub fn new(
        inventory: Arc<SeatInventoryManager>,
        bookings: Arc<dyn BookingRepository>,
        pricing: PricingRules,
    ) -> Self {
        Self {
            inventory,
            bookings,
            pricing,
        }
    }

    pub fn inventory(&self) -> &Arc<SeatInventoryManager> {
        &self.inventory
    }

    pub async fn get(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.bookings
            .get(id)
            .await
            .map_err(|e| booking_store_error(id, e))?
            .ok_or(BookingError::BookingNotFound(id))
    }

    /// Reserve seats and record a `Pending` booking for them.
    pub async fn create_booking(&self, request: NewBooking) -> Result<Booking, BookingError> {
        let schedule_id = request.schedule_id;
        let passengers = request.number_of_passengers;

        // Priced before reserving so a bad fare never holds seats.
        let totals = BookingTotals::compute(
            request.unit_price,
            passengers,
            self.pricing.tax_rate,
            self.pricing.booking_fee,
            &self.pricing.currency,
        )?;

        self.inventory.reserve(schedule_id, passengers).await?;
        let booking = Booking::pending(request, totals);

        if let Err(e) = self.bookings.insert(&booking).await {
            error!("Failed to persist booking for schedule {}: {}", schedule_id, e);
            // Hand the seats back; nothing references them.
            if let Err(release_err) = self.inventory.release(schedule_id, passengers).await {
                error!(
                    "Could not return {} seats to schedule {} after failed insert: {}",
                    passengers, schedule_id, release_err
                );
            }
            return Err(BookingError::Storage(e.to_string()));
        }

        info!(
            "Booking {} ({}) created on schedule {} for {} passengers",
            booking.booking_reference, booking.id, schedule_id, passengers
        );
        Ok(booking)
    }

    pub async fn confirm(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.advance(id, BookingStatus::Confirmed).await
    }

    pub async fn check_in(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.advance(id, BookingStatus::CheckedIn).await
    }

    pub async fn board(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.advance(id, BookingStatus::Boarded).await
    }

    pub async fn complete(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.advance(id, BookingStatus::Completed).await
    }

    pub async fn mark_no_show(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.advance(id, BookingStatus::NoShow).await
    }

    /// Cancel a `Pending` or `Confirmed` booking and release its seats.
    ///
    /// Cancelling a booking that is already cancelled returns it unchanged
    /// and releases nothing. While another cancel of the same booking is
    /// still releasing seats this fails with `CancellationInProgress`.
    pub async fn cancel(&self, id: Uuid) -> Result<Booking, BookingError> {
        let to = BookingStatus::Cancelled;
        match self
            .change_status(id, BookingStatus::Cancelling.allowed_sources(), BookingStatus::Cancelling)
            .await?
        {
            StatusChange::Applied { booking, previous } => {
                let booking = self.finish_cancel(booking, previous).await?;
                info!("Booking {} cancelled, {} seats released", id, booking.number_of_passengers);
                Ok(booking)
            }
            StatusChange::Unchanged(booking) => match booking.status {
                BookingStatus::Cancelled => {
                    debug!("Booking {} was already cancelled", id);
                    Ok(booking)
                }
                BookingStatus::Cancelling => Err(BookingError::CancellationInProgress(id)),
                from => Err(BookingError::InvalidTransition { from, to }),
            },
        }
    }

    /// Cancel the booking only if it is still `Pending`.
    ///
    /// Returns `None` when the booking has moved on in the meantime.
    pub async fn expire_pending(&self, id: Uuid) -> Result<Option<Booking>, BookingError> {
        match self
            .change_status(id, &[BookingStatus::Pending], BookingStatus::Cancelling)
            .await?
        {
            StatusChange::Applied { booking, previous } => {
                let booking = self.finish_cancel(booking, previous).await?;
                info!("Pending booking {} expired, {} seats released", id, booking.number_of_passengers);
                Ok(Some(booking))
            }
            StatusChange::Unchanged(_) => Ok(None),
        }
    }

    async fn advance(&self, id: Uuid, to: BookingStatus) -> Result<Booking, BookingError> {
        match self.change_status(id, to.allowed_sources(), to).await? {
            StatusChange::Applied { booking, .. } => {
                info!("Booking {} is now {}", id, to);
                Ok(booking)
            }
            StatusChange::Unchanged(booking) => {
                warn!("Booking {} cannot move from {} to {}", id, booking.status, to);
                Err(BookingError::InvalidTransition {
                    from: booking.status,
                    to,
                })
            }
        }
    }

    async fn change_status(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> Result<StatusChange, BookingError> {
        self.bookings
            .transition(id, from, to)
            .await
            .map_err(|e| booking_store_error(id, e))
    }

    /// Release the seats of a booking held in `Cancelling`, then mark it `Cancelled`.
    /// If the release fails the booking goes back to `previous` so a later cancel can retry.
    async fn finish_cancel(&self, booking: Booking, previous: BookingStatus) -> Result<Booking, BookingError> {
        let id = booking.id;
        if let Err(e) = self
            .inventory
            .release(booking.schedule_id, booking.number_of_passengers)
            .await
        {
            match self
                .bookings
                .transition(id, &[BookingStatus::Cancelling], previous)
                .await
            {
                Ok(_) => warn!("Release for booking {} failed, status restored to {}: {}", id, previous, e),
                Err(revert_err) => error!(
                    "Release for booking {} failed ({}) and it is stuck in cancelling: {}",
                    id, e, revert_err
                ),
            }
            return Err(e.into());
        }

        match self
            .change_status(id, &[BookingStatus::Cancelling], BookingStatus::Cancelled)
            .await
        {
            Ok(StatusChange::Applied { booking, .. }) => Ok(booking),
            Ok(StatusChange::Unchanged(current)) => {
                error!("Booking {} left cancelling as {} while its seats were released", id, current.status);
                Err(BookingError::InvalidTransition {
                    from: current.status,
                    to: BookingStatus::Cancelled,
                })
            }
            Err(e) => {
                error!("Seats of booking {} were released but it could not be marked cancelled: {}", id, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::RetryPolicy;
    use transit_core::{ScheduleStatus, SeatStore};
    use transit_store::{InMemoryBookingRepository, InMemorySeatStore};

    struct Fixture {
        workflow: BookingWorkflow,
        schedule_id: Uuid,
    }

    async fn fixture(capacity: u32) -> Fixture {
        let store: Arc<dyn SeatStore> = Arc::new(InMemorySeatStore::default());
        let inventory = Arc::new(SeatInventoryManager::new(store, RetryPolicy::default()));
        let schedule_id = Uuid::new_v4();
        inventory.register_schedule(schedule_id, capacity).await.unwrap();

        let workflow = BookingWorkflow::new(
            inventory,
            Arc::new(InMemoryBookingRepository::new()),
            PricingRules {
                tax_rate: 0.1,
                booking_fee: 300,
                currency: "USD".to_string(),
            },
        );
        Fixture {
            workflow,
            schedule_id,
        }
    }

    fn request(schedule_id: Uuid, passengers: u32) -> NewBooking {
        NewBooking {
            schedule_id,
            passenger_user_id: "user-7".to_string(),
            passenger_name: "Kemi Adeyemi".to_string(),
            passenger_email: "kemi@example.com".to_string(),
            number_of_passengers: passengers,
            unit_price: 2_500,
            special_requests: None,
        }
    }

    #[tokio::test]
    async fn test_create_booking_reserves_and_prices() {
        let f = fixture(10).await;
        let booking = f.workflow.create_booking(request(f.schedule_id, 3)).await.unwrap();

        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.totals.subtotal, 7_500);
        assert_eq!(booking.totals.taxes, 750);
        assert_eq!(booking.totals.total_amount, 8_550);

        let inv = f.workflow.inventory().peek(f.schedule_id).await.unwrap();
        assert_eq!(inv.available, 7);
        assert_eq!(inv.booked, 3);
    }

    #[tokio::test]
    async fn test_create_booking_fails_when_full() {
        let f = fixture(2).await;
        let err = f.workflow.create_booking(request(f.schedule_id, 3)).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Inventory(InventoryError::InsufficientCapacity {
                requested: 3,
                available: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unpriceable_fare_holds_no_seats() {
        let f = fixture(10).await;
        let mut oversized = request(f.schedule_id, 3);
        oversized.unit_price = i64::MAX / 2;
        assert!(matches!(
            f.workflow.create_booking(oversized).await,
            Err(BookingError::InvalidPrice { passengers: 3, .. })
        ));

        let mut negative = request(f.schedule_id, 1);
        negative.unit_price = -100;
        assert!(matches!(
            f.workflow.create_booking(negative).await,
            Err(BookingError::InvalidPrice { unit_price: -100, .. })
        ));

        let inv = f.workflow.inventory().peek(f.schedule_id).await.unwrap();
        assert_eq!(inv.booked, 0);
        assert_eq!(inv.available, 10);
    }

    #[tokio::test]
    async fn test_lifecycle_to_completion_keeps_seats() {
        let f = fixture(5).await;
        let id = f.workflow.create_booking(request(f.schedule_id, 2)).await.unwrap().id;

        let confirmed = f.workflow.confirm(id).await.unwrap();
        assert!(confirmed.confirmed_at.is_some());
        f.workflow.check_in(id).await.unwrap();
        f.workflow.board(id).await.unwrap();
        let done = f.workflow.complete(id).await.unwrap();
        assert_eq!(done.status, BookingStatus::Completed);
        assert!(done.checked_in_at.is_some());
        assert!(done.boarded_at.is_some());
        assert!(done.completed_at.is_some());

        assert_eq!(f.workflow.inventory().peek(f.schedule_id).await.unwrap().booked, 2);
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_rejected() {
        let f = fixture(5).await;
        let id = f.workflow.create_booking(request(f.schedule_id, 1)).await.unwrap().id;

        assert!(matches!(
            f.workflow.board(id).await,
            Err(BookingError::InvalidTransition {
                from: BookingStatus::Pending,
                to: BookingStatus::Boarded
            })
        ));

        f.workflow.confirm(id).await.unwrap();
        f.workflow.mark_no_show(id).await.unwrap();
        assert!(matches!(
            f.workflow.cancel(id).await,
            Err(BookingError::InvalidTransition {
                from: BookingStatus::NoShow,
                to: BookingStatus::Cancelled
            })
        ));
        // A no-show keeps its seats.
        assert_eq!(f.workflow.inventory().peek(f.schedule_id).await.unwrap().booked, 1);
    }

    #[tokio::test]
    async fn test_cancel_twice_releases_once() {
        let f = fixture(4).await;
        let id = f.workflow.create_booking(request(f.schedule_id, 2)).await.unwrap().id;
        f.workflow.confirm(id).await.unwrap();

        let first = f.workflow.cancel(id).await.unwrap();
        assert_eq!(first.status, BookingStatus::Cancelled);
        assert!(first.cancelled_at.is_some());

        let second = f.workflow.cancel(id).await.unwrap();
        assert_eq!(second.status, BookingStatus::Cancelled);

        let inv = f.workflow.inventory().peek(f.schedule_id).await.unwrap();
        assert_eq!(inv.available, 4);
        assert_eq!(inv.booked, 0);
    }

    #[tokio::test]
    async fn test_cancel_after_schedule_cancelled_still_releases() {
        let f = fixture(4).await;
        let id = f.workflow.create_booking(request(f.schedule_id, 3)).await.unwrap().id;
        f.workflow
            .inventory()
            .set_status(f.schedule_id, ScheduleStatus::Cancelled)
            .await
            .unwrap();

        f.workflow.cancel(id).await.unwrap();
        assert_eq!(f.workflow.inventory().peek(f.schedule_id).await.unwrap().available, 4);
    }

    #[tokio::test]
    async fn test_expire_pending_skips_confirmed() {
        let f = fixture(6).await;
        let pending = f.workflow.create_booking(request(f.schedule_id, 1)).await.unwrap().id;
        let confirmed = f.workflow.create_booking(request(f.schedule_id, 2)).await.unwrap().id;
        f.workflow.confirm(confirmed).await.unwrap();

        assert!(f.workflow.expire_pending(pending).await.unwrap().is_some());
        assert!(f.workflow.expire_pending(confirmed).await.unwrap().is_none());
        assert!(f.workflow.expire_pending(pending).await.unwrap().is_none());

        let inv = f.workflow.inventory().peek(f.schedule_id).await.unwrap();
        assert_eq!(inv.booked, 2);
    }

    #[tokio::test]
    async fn test_unknown_booking() {
        let f = fixture(1).await;
        let id = Uuid::new_v4();
        assert!(matches!(f.workflow.get(id).await, Err(BookingError::BookingNotFound(_))));
        assert!(matches!(f.workflow.cancel(id).await, Err(BookingError::BookingNotFound(_))));
    }
}
