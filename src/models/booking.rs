//! Booking model
//!
//! This module provides:
//! - `Booking` entity: a customer's table reservation at a restaurant
//! - `BookingStatus` and the transition table every status change consults
//! - `MealCategory`, derived from the hour of the reservation
//! - `CreateBookingInput` for new bookings
//! - `PaymentLink`, attached on accept

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Booking entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    /// Unique identifier
    pub id: String,
    /// Customer who made the booking
    pub customer_id: String,
    /// Restaurant being booked
    pub restaurant_id: String,
    /// Reserved instant
    pub scheduled_at: DateTime<Utc>,
    /// Party size (at least 1)
    pub guest_count: u32,
    /// Optional note from the customer, trimmed
    pub message: Option<String>,
    /// Derived from `scheduled_at`
    pub meal_category: MealCategory,
    /// Contact number
    pub phone_number: String,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Payment link issued on accept
    pub payment_link_id: Option<String>,
    pub payment_link_url: Option<String>,
    /// Set by the restaurant payout job
    pub transferred_to_restaurant: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Build a new pending booking from validated input
    pub fn new(id: String, customer_id: String, input: CreateBookingInput) -> Self {
        let now = Utc::now();
        let message = input
            .message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());

        Self {
            id,
            customer_id,
            restaurant_id: input.restaurant_id,
            meal_category: MealCategory::for_time(input.scheduled_at),
            scheduled_at: input.scheduled_at,
            guest_count: input.guest_count,
            message,
            phone_number: input.phone_number.trim().to_string(),
            status: BookingStatus::Pending,
            payment_link_id: None,
            payment_link_url: None,
            transferred_to_restaurant: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Booking lifecycle status
///
/// The wire value of `PaymentPending` contains a space (`"payment pending"`);
/// clients depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "payment pending")]
    PaymentPending,
    #[serde(rename = "rejected")]
    Rejected,
    #[serde(rename = "confirmed")]
    Confirmed,
    #[serde(rename = "executed")]
    Executed,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::PaymentPending,
        BookingStatus::Rejected,
        BookingStatus::Confirmed,
        BookingStatus::Executed,
    ];

    /// Wire and storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::PaymentPending => "payment pending",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Executed => "executed",
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Rejected | BookingStatus::Executed)
    }
}

/// The booking transition table
///
/// `pending → payment pending → confirmed → executed` and `pending → rejected`.
/// No other edge exists.
pub fn is_valid_transition(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    matches!(
        (from, to),
        (Pending, PaymentPending)
            | (Pending, Rejected)
            | (PaymentPending, Confirmed)
            | (Confirmed, Executed)
    )
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid booking status: {}", s))
    }
}

/// Meal slot of a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealCategory {
    Breakfast,
    Lunch,
    Dinner,
}

impl MealCategory {
    /// Fixed partition of the day (UTC hour):
    /// 04:00-10:59 breakfast, 11:00-16:59 lunch, everything else dinner
    pub fn for_hour(hour: u32) -> Self {
        match hour {
            4..=10 => MealCategory::Breakfast,
            11..=16 => MealCategory::Lunch,
            _ => MealCategory::Dinner,
        }
    }

    pub fn for_time(at: DateTime<Utc>) -> Self {
        Self::for_hour(at.hour())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MealCategory::Breakfast => "breakfast",
            MealCategory::Lunch => "lunch",
            MealCategory::Dinner => "dinner",
        }
    }
}

impl fmt::Display for MealCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "breakfast" => Ok(MealCategory::Breakfast),
            "lunch" => Ok(MealCategory::Lunch),
            "dinner" => Ok(MealCategory::Dinner),
            _ => Err(anyhow::anyhow!("Invalid meal category: {}", s)),
        }
    }
}

/// Hosted payment link minted when a booking is accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub id: String,
    pub url: String,
}

/// Input for creating a booking
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingInput {
    pub restaurant_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub guest_count: u32,
    pub phone_number: String,
    #[serde(default)]
    pub message: Option<String>,
}
