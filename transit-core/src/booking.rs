use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    Boarded,
    Completed,
    /// Cancel accepted, seats not yet released.
    Cancelling,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::Boarded => "boarded",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelling => "cancelling",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }

    /// Statuses a booking may move to `self` from.
    ///
    /// `Pending` is only ever assigned at creation. A cancel passes through
    /// `Cancelling` while its seats are released, so both share one source set.
    pub fn allowed_sources(&self) -> &'static [BookingStatus] {
        match self {
            BookingStatus::Pending => &[],
            BookingStatus::Confirmed => &[BookingStatus::Pending],
            BookingStatus::CheckedIn => &[BookingStatus::Confirmed],
            BookingStatus::Boarded => &[BookingStatus::CheckedIn],
            BookingStatus::Completed => &[BookingStatus::Boarded],
            BookingStatus::NoShow => &[BookingStatus::Confirmed, BookingStatus::CheckedIn],
            BookingStatus::Cancelling | BookingStatus::Cancelled => {
                &[BookingStatus::Pending, BookingStatus::Confirmed]
            }
        }
    }

    /// Seats held by a booking in this status still count as booked on the schedule.
    /// Moving into `Cancelled` is the only transition that gives them back.
    pub fn releases_seats(&self) -> bool {
        matches!(self, BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "checked_in" => Ok(BookingStatus::CheckedIn),
            "boarded" => Ok(BookingStatus::Boarded),
            "completed" => Ok(BookingStatus::Completed),
            "cancelling" => Ok(BookingStatus::Cancelling),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "no_show" => Ok(BookingStatus::NoShow),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Monetary totals of a booking, in minor currency units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingTotals {
    pub unit_price: i64,
    pub subtotal: i64,
    pub taxes: i64,
    pub fees: i64,
    pub total_amount: i64,
    pub currency: String,
}

impl BookingTotals {
    /// Fails on a negative unit price or when any amount leaves the `i64` range.
    pub fn compute(
        unit_price: i64,
        passengers: u32,
        tax_rate: f64,
        booking_fee: i64,
        currency: &str,
    ) -> Result<Self, CoreError> {
        let invalid = || CoreError::InvalidPrice {
            unit_price,
            passengers,
        };
        if unit_price < 0 {
            return Err(invalid());
        }

        let subtotal = unit_price
            .checked_mul(i64::from(passengers))
            .ok_or_else(invalid)?;
        let taxes = (subtotal as f64 * tax_rate).round();
        if !taxes.is_finite() || taxes.abs() >= i64::MAX as f64 {
            return Err(invalid());
        }
        let taxes = taxes as i64;
        let total_amount = subtotal
            .checked_add(taxes)
            .and_then(|sum| sum.checked_add(booking_fee))
            .ok_or_else(invalid)?;

        Ok(Self {
            unit_price,
            subtotal,
            taxes,
            fees: booking_fee,
            total_amount,
            currency: currency.to_string(),
        })
    }
}

/// Input for creating a booking against a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBooking {
    pub schedule_id: Uuid,
    pub passenger_user_id: String,
    pub passenger_name: String,
    pub passenger_email: String,
    pub number_of_passengers: u32,
    pub unit_price: i64,
    pub special_requests: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub booking_reference: String,
    pub schedule_id: Uuid,
    pub passenger_user_id: String,
    pub passenger_name: String,
    pub passenger_email: String,
    pub number_of_passengers: u32,
    pub totals: BookingTotals,
    pub status: BookingStatus,
    pub special_requests: Option<String>,
    pub booked_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub boarded_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn pending(request: NewBooking, totals: BookingTotals) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            booking_reference: generate_booking_reference(),
            schedule_id: request.schedule_id,
            passenger_user_id: request.passenger_user_id,
            passenger_name: request.passenger_name,
            passenger_email: request.passenger_email,
            number_of_passengers: request.number_of_passengers,
            totals,
            status: BookingStatus::Pending,
            special_requests: request.special_requests,
            booked_at: now,
            confirmed_at: None,
            checked_in_at: None,
            boarded_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: now,
        }
    }

    /// Record a status change and stamp the matching timestamp.
    ///
    /// `cancelled_at` is cleared again if a failed cancellation is rolled back.
    pub fn update_status(&mut self, status: BookingStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
        let stamp = match status {
            BookingStatus::Confirmed => Some(&mut self.confirmed_at),
            BookingStatus::CheckedIn => Some(&mut self.checked_in_at),
            BookingStatus::Boarded => Some(&mut self.boarded_at),
            BookingStatus::Completed => Some(&mut self.completed_at),
            _ => None,
        };
        if let Some(stamp) = stamp {
            stamp.get_or_insert(at);
        }
        self.cancelled_at = match status {
            BookingStatus::Cancelled => Some(at),
            _ => None,
        };
    }
}

/// `TRP-` followed by eight upper-case alphanumerics.
pub fn generate_booking_reference() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("TRP-{}", suffix)
}
