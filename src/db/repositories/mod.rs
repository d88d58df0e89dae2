//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the queries for one entity.

pub mod booking;
pub mod restaurant;
pub mod user;

pub use booking::{BookingRepository, SqlxBookingRepository};
pub use restaurant::{RestaurantRepository, SqlxRestaurantRepository};
pub use user::{SqlxUserRepository, UserRepository};
