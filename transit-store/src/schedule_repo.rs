use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use transit_core::{SeatInventory, SeatOperation, SeatStore, StoreError};

use crate::pg_error;

/// Seat counters in the `schedules` table.
///
/// Each mutation is one transaction holding `SELECT ... FOR UPDATE` on the
/// schedule row. Postgres queues row-lock waiters in request order, and
/// `lock_timeout` bounds how long a caller waits before it is reported as
/// contended.
pub struct PgSeatStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgSeatStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: Uuid,
    total_capacity: i32,
    available_seats: i32,
    booked_seats: i32,
    status: String,
    version: i64,
}

impl TryFrom<ScheduleRow> for SeatInventory {
    type Error = StoreError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        let count = |value: i32, column: &str| {
            u32::try_from(value).map_err(|_| {
                StoreError::Backend(format!("schedule {} has negative {}: {}", row.id, column, value))
            })
        };

        Ok(SeatInventory {
            schedule_id: row.id,
            total_capacity: count(row.total_capacity, "total_capacity")?,
            available: count(row.available_seats, "available_seats")?,
            booked: count(row.booked_seats, "booked_seats")?,
            status: row
                .status
                .parse()
                .map_err(|e: transit_core::CoreError| StoreError::Backend(e.to_string()))?,
            version: u64::try_from(row.version)
                .map_err(|_| StoreError::Backend(format!("schedule {} has negative version", row.id)))?,
        })
    }
}

fn column(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Backend(format!("seat count {} out of range", value)))
}

#[async_trait]
impl SeatStore for PgSeatStore {
    async fn create(&self, inventory: &SeatInventory) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO schedules (id, total_capacity, available_seats, booked_seats, status, version)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(inventory.schedule_id)
        .bind(column(inventory.total_capacity)?)
        .bind(column(inventory.available)?)
        .bind(column(inventory.booked)?)
        .bind(inventory.status.as_str())
        .bind(inventory.version as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| pg_error(inventory.schedule_id, e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(inventory.schedule_id));
        }
        Ok(())
    }

    async fn snapshot(&self, schedule_id: Uuid) -> Result<Option<SeatInventory>, StoreError> {
        // A plain read sees the last committed row version; no lock is taken.
        let row: Option<ScheduleRow> = sqlx::query_as(
            "SELECT id, total_capacity, available_seats, booked_seats, status, version FROM schedules WHERE id = $1",
        )
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| pg_error(schedule_id, e))?;

        row.map(SeatInventory::try_from).transpose()
    }

    async fn apply(
        &self,
        schedule_id: Uuid,
        operation: SeatOperation,
    ) -> Result<SeatInventory, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| pg_error(schedule_id, e))?;

        // SET LOCAL does not take bind parameters; the value is an integer we format ourselves.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| pg_error(schedule_id, e))?;

        let row: Option<ScheduleRow> = sqlx::query_as(
            r#"
            SELECT id, total_capacity, available_seats, booked_seats, status, version
            FROM schedules
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(schedule_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| pg_error(schedule_id, e))?;

        let current = row
            .ok_or(StoreError::NotFound(schedule_id))
            .and_then(SeatInventory::try_from)?;

        let mut next = current;
        // Dropping `tx` on the error path rolls back.
        operation.apply_to(&mut next)?;

        sqlx::query(
            r#"
            UPDATE schedules
            SET available_seats = $2, booked_seats = $3, status = $4, version = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(schedule_id)
        .bind(column(next.available)?)
        .bind(column(next.booked)?)
        .bind(next.status.as_str())
        .bind(next.version as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| pg_error(schedule_id, e))?;

        tx.commit().await.map_err(|e| pg_error(schedule_id, e))?;

        debug!(
            "Schedule {} {}: available {} booked {} (v{})",
            schedule_id,
            operation.name(),
            next.available,
            next.booked,
            next.version
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_core::ScheduleStatus;

    fn row(available: i32, booked: i32) -> ScheduleRow {
        ScheduleRow {
            id: Uuid::new_v4(),
            total_capacity: 30,
            available_seats: available,
            booked_seats: booked,
            status: "boarding".to_string(),
            version: 4,
        }
    }

    #[test]
    fn test_row_converts_to_inventory() {
        let inv = SeatInventory::try_from(row(12, 18)).unwrap();
        assert_eq!(inv.available, 12);
        assert_eq!(inv.booked, 18);
        assert_eq!(inv.status, ScheduleStatus::Boarding);
        assert_eq!(inv.version, 4);
        assert!(inv.is_consistent());
    }

    #[test]
    fn test_negative_counts_are_rejected() {
        assert!(matches!(
            SeatInventory::try_from(row(-1, 31)),
            Err(StoreError::Backend(_))
        ));
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let mut r = row(30, 0);
        r.status = "teleported".to_string();
        assert!(SeatInventory::try_from(r).is_err());
    }
}
