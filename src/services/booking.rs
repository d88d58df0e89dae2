//! Booking ledger
//!
//! The booking state machine:
//!
//! ```text
//! pending ──accept──▶ payment pending ──confirm──▶ confirmed ──execute──▶ executed
//!    └──────reject──▶ rejected
//! ```
//!
//! Every transition is a conditional write on the expected current status
//! (see [`BookingRepository::transition`]). A request that passed validation
//! but lost the write to a concurrent request gets [`LedgerError::Conflict`].
//!
//! Side effects:
//! - create publishes `new-booking` to the restaurant's room
//! - accept mints a payment link *before* writing; a failed mint aborts the
//!   transition with a retryable error
//! - accept and reject email the customer; email failures are logged only

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::db::repositories::{BookingRepository, RestaurantRepository, UserRepository};
use crate::models::{
    is_valid_transition, Booking, BookingStatus, CreateBookingInput, PaymentLink, Restaurant,
};
use crate::services::email::{EmailNotifier, EmailTemplate};
use crate::services::notifications::{NewBookingEvent, RoomRegistry, ServerEvent};
use crate::services::payment::{PaymentLinkError, PaymentLinkIssuer};

const MAX_MESSAGE_LEN: usize = 500;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("You do not manage this restaurant")]
    Forbidden,

    #[error("Booking cannot move from '{from}' to '{to}'")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Booking was updated by another request, reload and try again")]
    Conflict,

    #[error("Payment link could not be created, please try again")]
    ExternalService(#[from] PaymentLinkError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Owner decision on a pending booking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerDecision {
    Accept,
    Reject,
}

pub struct BookingLedger {
    bookings: Arc<dyn BookingRepository>,
    restaurants: Arc<dyn RestaurantRepository>,
    users: Arc<dyn UserRepository>,
    payments: Arc<dyn PaymentLinkIssuer>,
    email: Arc<dyn EmailNotifier>,
    rooms: Arc<RoomRegistry>,
}

impl BookingLedger {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        restaurants: Arc<dyn RestaurantRepository>,
        users: Arc<dyn UserRepository>,
        payments: Arc<dyn PaymentLinkIssuer>,
        email: Arc<dyn EmailNotifier>,
        rooms: Arc<RoomRegistry>,
    ) -> Self {
        Self {
            bookings,
            restaurants,
            users,
            payments,
            email,
            rooms,
        }
    }

    /// Create a pending booking and notify the restaurant's dashboards
    pub async fn create(
        &self,
        customer_id: &str,
        input: CreateBookingInput,
    ) -> Result<Booking, LedgerError> {
        validate_create(&input, Utc::now())?;

        self.restaurants
            .get_by_id(&input.restaurant_id)
            .await?
            .ok_or(LedgerError::NotFound("Restaurant"))?;

        let booking = Booking::new(
            uuid::Uuid::new_v4().to_string(),
            customer_id.to_string(),
            input,
        );
        let booking = self.bookings.create(&booking).await?;

        tracing::info!(
            "Booking {} created for restaurant {} ({} guests, {})",
            booking.id,
            booking.restaurant_id,
            booking.guest_count,
            booking.meal_category
        );

        let delivered = self.rooms.publish(
            &booking.restaurant_id,
            ServerEvent::NewBooking(NewBookingEvent::for_booking(&booking)),
        );
        tracing::debug!("new-booking delivered to {} dashboard(s)", delivered);

        Ok(booking)
    }

    /// Apply an owner's accept/reject decision
    pub async fn decide(
        &self,
        booking_id: &str,
        owner_id: &str,
        decision: OwnerDecision,
    ) -> Result<Booking, LedgerError> {
        match decision {
            OwnerDecision::Accept => self.accept(booking_id, owner_id).await,
            OwnerDecision::Reject => self.reject(booking_id, owner_id).await,
        }
    }

    /// pending → payment pending, with a freshly minted payment link
    pub async fn accept(&self, booking_id: &str, owner_id: &str) -> Result<Booking, LedgerError> {
        let (booking, restaurant) = self.load_owned(booking_id, owner_id).await?;
        ensure_transition(booking.status, BookingStatus::PaymentPending)?;

        let link = self
            .payments
            .create_payment_link(&booking.id, None)
            .await
            .map_err(|e| {
                tracing::warn!("Payment link for booking {} failed: {}", booking.id, e);
                LedgerError::ExternalService(e)
            })?;

        let updated = match self
            .bookings
            .transition(
                &booking.id,
                BookingStatus::Pending,
                BookingStatus::PaymentPending,
                Some(&link),
            )
            .await?
        {
            Some(updated) => updated,
            None => {
                tracing::warn!(
                    "Booking {} changed while accepting; payment link {} is orphaned",
                    booking.id,
                    link.id
                );
                return Err(LedgerError::Conflict);
            }
        };

        log_transition(&updated, BookingStatus::Pending);
        self.notify_customer(EmailTemplate::Accepted, &updated, &restaurant, Some(&link))
            .await;
        Ok(updated)
    }

    /// pending → rejected
    pub async fn reject(&self, booking_id: &str, owner_id: &str) -> Result<Booking, LedgerError> {
        let (booking, restaurant) = self.load_owned(booking_id, owner_id).await?;
        let updated = self
            .apply(&booking, BookingStatus::Pending, BookingStatus::Rejected)
            .await?;

        self.notify_customer(EmailTemplate::Rejected, &updated, &restaurant, None)
            .await;
        Ok(updated)
    }

    /// payment pending → confirmed, driven by the payment webhook
    pub async fn confirm(&self, booking_id: &str) -> Result<Booking, LedgerError> {
        let booking = self.load(booking_id).await?;
        self.apply(&booking, BookingStatus::PaymentPending, BookingStatus::Confirmed)
            .await
    }

    /// confirmed → executed, once the reservation time has passed and the
    /// booking has not been transferred to the restaurant
    pub async fn mark_executed(&self, booking_id: &str) -> Result<Booking, LedgerError> {
        let booking = self.load(booking_id).await?;
        if booking.status == BookingStatus::Confirmed {
            if booking.transferred_to_restaurant {
                return Err(LedgerError::Validation(
                    "Booking was already transferred to the restaurant".to_string(),
                ));
            }
            if booking.scheduled_at > Utc::now() {
                return Err(LedgerError::Validation(
                    "Booking has not taken place yet".to_string(),
                ));
            }
        }
        self.apply(&booking, BookingStatus::Confirmed, BookingStatus::Executed)
            .await
    }

    /// Mark every past, untransferred, confirmed booking executed.
    ///
    /// Returns how many bookings moved. Bookings another process moved first
    /// are skipped.
    pub async fn execute_due(&self, now: DateTime<Utc>) -> Result<usize, LedgerError> {
        let due = self.bookings.list_due(BookingStatus::Confirmed, now).await?;
        let mut executed = 0;

        for booking in due.into_iter().filter(|b| !b.transferred_to_restaurant) {
            match self
                .apply(&booking, BookingStatus::Confirmed, BookingStatus::Executed)
                .await
            {
                Ok(_) => executed += 1,
                Err(LedgerError::Conflict | LedgerError::InvalidTransition { .. }) => {
                    tracing::debug!("Booking {} moved before the sweep reached it", booking.id);
                }
                Err(e) => tracing::warn!("Failed to execute booking {}: {}", booking.id, e),
            }
        }

        Ok(executed)
    }

    pub async fn list_for_customer(&self, customer_id: &str) -> Result<Vec<Booking>, LedgerError> {
        Ok(self.bookings.list_by_customer(customer_id).await?)
    }

    /// Bookings of a restaurant, visible to its owner only
    pub async fn list_for_restaurant(
        &self,
        restaurant_id: &str,
        owner_id: &str,
    ) -> Result<Vec<Booking>, LedgerError> {
        self.owned_restaurant(restaurant_id, owner_id).await?;
        Ok(self.bookings.list_by_restaurant(restaurant_id).await?)
    }

    async fn load(&self, booking_id: &str) -> Result<Booking, LedgerError> {
        self.bookings
            .get_by_id(booking_id)
            .await?
            .ok_or(LedgerError::NotFound("Booking"))
    }

    async fn owned_restaurant(
        &self,
        restaurant_id: &str,
        owner_id: &str,
    ) -> Result<Restaurant, LedgerError> {
        let restaurant = self
            .restaurants
            .get_by_id(restaurant_id)
            .await?
            .ok_or(LedgerError::NotFound("Restaurant"))?;
        if !restaurant.is_owned_by(owner_id) {
            return Err(LedgerError::Forbidden);
        }
        Ok(restaurant)
    }

    async fn load_owned(
        &self,
        booking_id: &str,
        owner_id: &str,
    ) -> Result<(Booking, Restaurant), LedgerError> {
        let booking = self.load(booking_id).await?;
        let restaurant = self
            .owned_restaurant(&booking.restaurant_id, owner_id)
            .await?;
        Ok((booking, restaurant))
    }

    /// Validate the edge against the stored status, then write conditionally
    async fn apply(
        &self,
        booking: &Booking,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<Booking, LedgerError> {
        if booking.status != from {
            return Err(LedgerError::InvalidTransition {
                from: booking.status,
                to,
            });
        }
        ensure_transition(from, to)?;

        let updated = self
            .bookings
            .transition(&booking.id, from, to, None)
            .await?
            .ok_or(LedgerError::Conflict)?;

        log_transition(&updated, from);
        Ok(updated)
    }

    async fn notify_customer(
        &self,
        template: EmailTemplate,
        booking: &Booking,
        restaurant: &Restaurant,
        link: Option<&PaymentLink>,
    ) {
        let customer = match self.users.get_by_id(&booking.customer_id).await {
            Ok(Some(customer)) => customer,
            Ok(None) => {
                tracing::warn!("Customer {} of booking {} not found", booking.customer_id, booking.id);
                return;
            }
            Err(e) => {
                tracing::warn!("Customer lookup for booking {} failed: {:#}", booking.id, e);
                return;
            }
        };

        let data = json!({
            "customer_name": customer.name,
            "restaurant_name": restaurant.name,
            "guest_count": booking.guest_count,
            "scheduled_at": booking.scheduled_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            "meal_category": booking.meal_category.as_str(),
            "message": booking.message,
            "payment_link_url": link.map(|l| l.url.as_str()),
        });

        if let Err(e) = self.email.send(template, &customer.email, &data).await {
            tracing::warn!(
                "Failed to send '{}' email for booking {}: {:#}",
                template.name(),
                booking.id,
                e
            );
        }
    }
}

fn ensure_transition(from: BookingStatus, to: BookingStatus) -> Result<(), LedgerError> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition { from, to })
    }
}

fn log_transition(booking: &Booking, from: BookingStatus) {
    tracing::info!("Booking {}: '{}' -> '{}'", booking.id, from, booking.status);
}

fn validate_create(input: &CreateBookingInput, now: DateTime<Utc>) -> Result<(), LedgerError> {
    if input.restaurant_id.trim().is_empty() {
        return Err(LedgerError::Validation("Restaurant is required".to_string()));
    }
    if input.guest_count < 1 {
        return Err(LedgerError::Validation(
            "At least one guest is required".to_string(),
        ));
    }
    if input.phone_number.trim().is_empty() {
        return Err(LedgerError::Validation("Phone number is required".to_string()));
    }
    if input.scheduled_at <= now {
        return Err(LedgerError::Validation(
            "Booking time must be in the future".to_string(),
        ));
    }
    if input
        .message
        .as_deref()
        .is_some_and(|m| m.trim().chars().count() > MAX_MESSAGE_LEN)
    {
        return Err(LedgerError::Validation(format!(
            "Message must be at most {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    Ok(())
}
