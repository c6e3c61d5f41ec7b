use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use transit_core::{
    Booking, BookingRepository, BookingStatus, BookingTotals, CoreError, StatusChange, StoreError,
};

use crate::pg_error;

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const BOOKING_COLUMNS: &str = "id, booking_reference, schedule_id, passenger_user_id, passenger_name, \
    passenger_email, number_of_passengers, unit_price, subtotal, taxes, fees, total_amount, currency, \
    status, special_requests, booked_at, confirmed_at, checked_in_at, boarded_at, completed_at, \
    cancelled_at, updated_at";

// Internal struct for type-safe querying
#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    booking_reference: String,
    schedule_id: Uuid,
    passenger_user_id: String,
    passenger_name: String,
    passenger_email: String,
    number_of_passengers: i32,
    unit_price: i64,
    subtotal: i64,
    taxes: i64,
    fees: i64,
    total_amount: i64,
    currency: String,
    status: String,
    special_requests: Option<String>,
    booked_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    checked_in_at: Option<DateTime<Utc>>,
    boarded_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let number_of_passengers = u32::try_from(row.number_of_passengers).map_err(|_| {
            StoreError::Backend(format!("booking {} has negative passenger count", row.id))
        })?;
        let status: BookingStatus = row
            .status
            .parse()
            .map_err(|e: CoreError| StoreError::Backend(e.to_string()))?;

        Ok(Booking {
            id: row.id,
            booking_reference: row.booking_reference,
            schedule_id: row.schedule_id,
            passenger_user_id: row.passenger_user_id,
            passenger_name: row.passenger_name,
            passenger_email: row.passenger_email,
            number_of_passengers,
            totals: BookingTotals {
                unit_price: row.unit_price,
                subtotal: row.subtotal,
                taxes: row.taxes,
                fees: row.fees,
                total_amount: row.total_amount,
                currency: row.currency,
            },
            status,
            special_requests: row.special_requests,
            booked_at: row.booked_at,
            confirmed_at: row.confirmed_at,
            checked_in_at: row.checked_in_at,
            boarded_at: row.boarded_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert(&self, booking: &Booking) -> Result<(), StoreError> {
        let passengers = i32::try_from(booking.number_of_passengers)
            .map_err(|_| StoreError::Backend("passenger count out of range".to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO bookings (
                id, booking_reference, schedule_id, passenger_user_id, passenger_name, passenger_email,
                number_of_passengers, unit_price, subtotal, taxes, fees, total_amount, currency,
                status, special_requests, booked_at, confirmed_at, checked_in_at, boarded_at,
                completed_at, cancelled_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                    $19, $20, $21, $22)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(booking.id)
        .bind(&booking.booking_reference)
        .bind(booking.schedule_id)
        .bind(&booking.passenger_user_id)
        .bind(&booking.passenger_name)
        .bind(&booking.passenger_email)
        .bind(passengers)
        .bind(booking.totals.unit_price)
        .bind(booking.totals.subtotal)
        .bind(booking.totals.taxes)
        .bind(booking.totals.fees)
        .bind(booking.totals.total_amount)
        .bind(&booking.totals.currency)
        .bind(booking.status.as_str())
        .bind(&booking.special_requests)
        .bind(booking.booked_at)
        .bind(booking.confirmed_at)
        .bind(booking.checked_in_at)
        .bind(booking.boarded_at)
        .bind(booking.completed_at)
        .bind(booking.cancelled_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| pg_error(booking.id, e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(booking.id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let row: Option<BookingRow> =
            sqlx::query_as(&format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| pg_error(id, e))?;

        row.map(Booking::try_from).transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> Result<StatusChange, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| pg_error(id, e))?;

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM bookings WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| pg_error(id, e))?;

        let previous: BookingStatus = current
            .ok_or(StoreError::NotFound(id))?
            .0
            .parse()
            .map_err(|e: CoreError| StoreError::Backend(e.to_string()))?;

        if !from.contains(&previous) {
            let row: BookingRow =
                sqlx::query_as(&format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS))
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| pg_error(id, e))?;
            tx.commit().await.map_err(|e| pg_error(id, e))?;
            return Ok(StatusChange::Unchanged(row.try_into()?));
        }

        let row: BookingRow = sqlx::query_as(&format!(
            r#"
            UPDATE bookings
            SET status = $2,
                updated_at = NOW(),
                confirmed_at = CASE WHEN $2::text = 'confirmed' THEN COALESCE(confirmed_at, NOW()) ELSE confirmed_at END,
                checked_in_at = CASE WHEN $2::text = 'checked_in' THEN COALESCE(checked_in_at, NOW()) ELSE checked_in_at END,
                boarded_at = CASE WHEN $2::text = 'boarded' THEN COALESCE(boarded_at, NOW()) ELSE boarded_at END,
                completed_at = CASE WHEN $2::text = 'completed' THEN COALESCE(completed_at, NOW()) ELSE completed_at END,
                cancelled_at = CASE WHEN $2::text = 'cancelled' THEN NOW() ELSE NULL END
            WHERE id = $1
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(to.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| pg_error(id, e))?;

        tx.commit().await.map_err(|e| pg_error(id, e))?;

        Ok(StatusChange::Applied {
            booking: row.try_into()?,
            previous,
        })
    }

    async fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE status = 'pending' AND booked_at <= $1 ORDER BY booked_at LIMIT $2",
            BOOKING_COLUMNS
        ))
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| pg_error(Uuid::nil(), e))?;

        rows.into_iter().map(Booking::try_from).collect()
    }
}
