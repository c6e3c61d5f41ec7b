pub mod booking;
pub mod events;
pub mod inventory;
pub mod repository;
pub mod schedule;

pub use booking::{Booking, BookingStatus, BookingTotals, NewBooking};
pub use events::InventoryEvent;
pub use inventory::{InventoryError, SeatOperation};
pub use repository::{BookingRepository, SeatStore, StatusChange, StoreError};
pub use schedule::{ScheduleStatus, SeatInventory};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Unit price {unit_price} for {passengers} passengers is out of range")]
    InvalidPrice { unit_price: i64, passengers: u32 },
}
