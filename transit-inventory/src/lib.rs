pub mod expiry;
pub mod manager;
pub mod workflow;

pub use expiry::PendingBookingSweeper;
pub use manager::{Reservation, RetryPolicy, SeatInventoryManager};
pub use workflow::{BookingError, BookingWorkflow, PricingRules};
