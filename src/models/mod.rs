//! Data models
//!
//! This module contains the entities the booking service works with:
//! - Database entities (User, Restaurant, Booking)
//! - Session token claims
//! - Input types for creating bookings

mod booking;
mod restaurant;
mod session;
mod user;

pub use booking::{
    is_valid_transition, Booking, BookingStatus, CreateBookingInput, MealCategory,
    PaymentLink,
};
pub use restaurant::Restaurant;
pub use session::SessionClaims;
pub use user::{Role, User};
