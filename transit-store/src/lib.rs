pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod memory;
pub mod redis_repo;
pub mod schedule_repo;

pub use booking_repo::PgBookingRepository;
pub use database::DbClient;
pub use memory::{InMemoryBookingRepository, InMemorySeatStore};
pub use redis_repo::RedisSeatStore;
pub use schedule_repo::PgSeatStore;

use transit_core::StoreError;
use uuid::Uuid;

/// lock_not_available, serialization_failure, deadlock_detected
const CONTENTION_SQLSTATES: [&str; 3] = ["55P03", "40001", "40P01"];

fn is_contention_code(code: &str) -> bool {
    CONTENTION_SQLSTATES.contains(&code)
}

pub(crate) fn pg_error(id: Uuid, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().is_some_and(|code| is_contention_code(&code)) {
            return StoreError::Contended(id);
        }
    }
    StoreError::Backend(err.to_string())
}
