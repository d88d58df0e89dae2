//! Booking repository
//!
//! This module provides:
//! - `BookingRepository` trait defining booking data access
//! - `SqlxBookingRepository` implementing it for SQLite and MySQL
//!
//! Status changes go through [`BookingRepository::transition`], a conditional
//! write that only succeeds while the row still holds the expected source
//! status. Two racing writers cannot both win.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Booking, BookingStatus, MealCategory, PaymentLink};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Insert a new booking
    async fn create(&self, booking: &Booking) -> Result<Booking>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Booking>>;

    /// Bookings made by a customer, soonest reservation last
    async fn list_by_customer(&self, customer_id: &str) -> Result<Vec<Booking>>;

    /// Bookings for a restaurant, soonest reservation last
    async fn list_by_restaurant(&self, restaurant_id: &str) -> Result<Vec<Booking>>;

    /// Move a booking from `from` to `to` if and only if it is still in `from`.
    ///
    /// A payment link, when given, is stored in the same write. Returns the
    /// updated booking, or `None` when no row matched (the booking is gone or
    /// another writer moved it first).
    async fn transition(
        &self,
        id: &str,
        from: BookingStatus,
        to: BookingStatus,
        payment_link: Option<&PaymentLink>,
    ) -> Result<Option<Booking>>;

    /// Bookings in `status` whose reservation time is at or before `cutoff`
    async fn list_due(&self, status: BookingStatus, cutoff: DateTime<Utc>) -> Result<Vec<Booking>>;
}

/// SQLx-based booking repository for SQLite and MySQL
pub struct SqlxBookingRepository {
    pool: DynDatabasePool,
}

impl SqlxBookingRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn BookingRepository> {
        Arc::new(Self::new(pool))
    }

    /// Run a SELECT with string binds and map every row
    async fn select(&self, sql: &str, binds: &[&str]) -> Result<Vec<Booking>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut query = sqlx::query(sql);
                for value in binds {
                    query = query.bind(*value);
                }
                let rows = query
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to query bookings")?;
                rows.iter().map(row_to_booking_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let mut query = sqlx::query(sql);
                for value in binds {
                    query = query.bind(*value);
                }
                let rows = query
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to query bookings")?;
                rows.iter().map(row_to_booking_mysql).collect()
            }
        }
    }
}

const SELECT_BOOKING: &str = r#"
    SELECT id, customer_id, restaurant_id, scheduled_at, guest_count, message,
           meal_category, phone_number, status, payment_link_id, payment_link_url,
           transferred_to_restaurant, created_at, updated_at
    FROM bookings
"#;

const INSERT_BOOKING: &str = r#"
    INSERT INTO bookings (id, customer_id, restaurant_id, scheduled_at, guest_count, message,
                          meal_category, phone_number, status, payment_link_id, payment_link_url,
                          transferred_to_restaurant, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const TRANSITION_BOOKING: &str = r#"
    UPDATE bookings
    SET status = ?,
        payment_link_id = COALESCE(?, payment_link_id),
        payment_link_url = COALESCE(?, payment_link_url),
        updated_at = ?
    WHERE id = ? AND status = ?
"#;

#[async_trait]
impl BookingRepository for SqlxBookingRepository {
    async fn create(&self, booking: &Booking) -> Result<Booking> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_booking_sqlite(self.pool.sqlite()?, booking).await,
            DatabaseDriver::Mysql => create_booking_mysql(self.pool.mysql()?, booking).await,
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Booking>> {
        let sql = format!("{} WHERE id = ?", SELECT_BOOKING);
        Ok(self.select(&sql, &[id]).await?.into_iter().next())
    }

    async fn list_by_customer(&self, customer_id: &str) -> Result<Vec<Booking>> {
        let sql = format!(
            "{} WHERE customer_id = ? ORDER BY scheduled_at DESC, id",
            SELECT_BOOKING
        );
        self.select(&sql, &[customer_id]).await
    }

    async fn list_by_restaurant(&self, restaurant_id: &str) -> Result<Vec<Booking>> {
        let sql = format!(
            "{} WHERE restaurant_id = ? ORDER BY scheduled_at DESC, id",
            SELECT_BOOKING
        );
        self.select(&sql, &[restaurant_id]).await
    }

    async fn transition(
        &self,
        id: &str,
        from: BookingStatus,
        to: BookingStatus,
        payment_link: Option<&PaymentLink>,
    ) -> Result<Option<Booking>> {
        let now = Utc::now();
        let link_id = payment_link.map(|l| l.id.as_str());
        let link_url = payment_link.map(|l| l.url.as_str());

        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(TRANSITION_BOOKING)
                .bind(to.as_str())
                .bind(link_id)
                .bind(link_url)
                .bind(now)
                .bind(id)
                .bind(from.as_str())
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to transition booking")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(TRANSITION_BOOKING)
                .bind(to.as_str())
                .bind(link_id)
                .bind(link_url)
                .bind(now)
                .bind(id)
                .bind(from.as_str())
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to transition booking")?
                .rows_affected(),
        };

        if affected == 0 {
            return Ok(None);
        }
        self.get_by_id(id).await
    }

    async fn list_due(&self, status: BookingStatus, cutoff: DateTime<Utc>) -> Result<Vec<Booking>> {
        let sql = format!(
            "{} WHERE status = ? AND scheduled_at <= ? ORDER BY scheduled_at, id",
            SELECT_BOOKING
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(&sql)
                    .bind(status.as_str())
                    .bind(cutoff)
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to list due bookings")?;
                rows.iter().map(row_to_booking_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(&sql)
                    .bind(status.as_str())
                    .bind(cutoff)
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to list due bookings")?;
                rows.iter().map(row_to_booking_mysql).collect()
            }
        }
    }
}

fn guest_count_from_db(value: i64) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("Invalid guest count in database: {}", value))
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_booking_sqlite(pool: &SqlitePool, booking: &Booking) -> Result<Booking> {
    sqlx::query(INSERT_BOOKING)
        .bind(&booking.id)
        .bind(&booking.customer_id)
        .bind(&booking.restaurant_id)
        .bind(booking.scheduled_at)
        .bind(i64::from(booking.guest_count))
        .bind(&booking.message)
        .bind(booking.meal_category.as_str())
        .bind(&booking.phone_number)
        .bind(booking.status.as_str())
        .bind(&booking.payment_link_id)
        .bind(&booking.payment_link_url)
        .bind(booking.transferred_to_restaurant)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(pool)
        .await
        .context("Failed to create booking")?;

    Ok(booking.clone())
}

fn row_to_booking_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Booking> {
    let status: String = row.get("status");
    let meal_category: String = row.get("meal_category");
    Ok(Booking {
        id: row.get("id"),
        customer_id: row.get("customer_id"),
        restaurant_id: row.get("restaurant_id"),
        scheduled_at: row.get("scheduled_at"),
        guest_count: guest_count_from_db(row.get("guest_count"))?,
        message: row.get("message"),
        meal_category: MealCategory::from_str(&meal_category)?,
        phone_number: row.get("phone_number"),
        status: BookingStatus::from_str(&status)?,
        payment_link_id: row.get("payment_link_id"),
        payment_link_url: row.get("payment_link_url"),
        transferred_to_restaurant: row.get("transferred_to_restaurant"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_booking_mysql(pool: &MySqlPool, booking: &Booking) -> Result<Booking> {
    sqlx::query(INSERT_BOOKING)
        .bind(&booking.id)
        .bind(&booking.customer_id)
        .bind(&booking.restaurant_id)
        .bind(booking.scheduled_at)
        .bind(i64::from(booking.guest_count))
        .bind(&booking.message)
        .bind(booking.meal_category.as_str())
        .bind(&booking.phone_number)
        .bind(booking.status.as_str())
        .bind(&booking.payment_link_id)
        .bind(&booking.payment_link_url)
        .bind(booking.transferred_to_restaurant)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(pool)
        .await
        .context("Failed to create booking")?;

    Ok(booking.clone())
}

fn row_to_booking_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Booking> {
    let status: String = row.get("status");
    let meal_category: String = row.get("meal_category");
    let guest_count: i32 = row.get("guest_count");
    Ok(Booking {
        id: row.get("id"),
        customer_id: row.get("customer_id"),
        restaurant_id: row.get("restaurant_id"),
        scheduled_at: row.get("scheduled_at"),
        guest_count: guest_count_from_db(i64::from(guest_count))?,
        message: row.get("message"),
        meal_category: MealCategory::from_str(&meal_category)?,
        phone_number: row.get("phone_number"),
        status: BookingStatus::from_str(&status)?,
        payment_link_id: row.get("payment_link_id"),
        payment_link_url: row.get("payment_link_url"),
        transferred_to_restaurant: row.get("transferred_to_restaurant"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{
        RestaurantRepository, SqlxRestaurantRepository, SqlxUserRepository, UserRepository,
    };
    use crate::db::{create_test_pool, migrations::run_migrations};
    use crate::models::{CreateBookingInput, Restaurant, Role, User};
    use chrono::{Duration, TimeZone};

    async fn setup() -> Arc<dyn BookingRepository> {
        let pool = create_test_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let users = SqlxUserRepository::boxed(pool.clone());
        users
            .create(&User::new(
                "owner".into(),
                "Owner".into(),
                "owner@example.com".into(),
                "hash".into(),
                Role::Owner,
            ))
            .await
            .unwrap();
        users
            .create(&User::new(
                "cust".into(),
                "Customer".into(),
                "cust@example.com".into(),
                "hash".into(),
                Role::Customer,
            ))
            .await
            .unwrap();
        SqlxRestaurantRepository::boxed(pool.clone())
            .create(&Restaurant::new("r1".into(), "owner".into(), "Bistro".into()))
            .await
            .unwrap();

        SqlxBookingRepository::boxed(pool)
    }

    fn booking(id: &str, scheduled_at: DateTime<Utc>) -> Booking {
        Booking::new(
            id.to_string(),
            "cust".to_string(),
            CreateBookingInput {
                restaurant_id: "r1".to_string(),
                scheduled_at,
                guest_count: 3,
                phone_number: "555-0100".to_string(),
                message: Some("anniversary".to_string()),
            },
        )
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let repo = setup().await;
        let at = Utc.with_ymd_and_hms(2030, 6, 1, 12, 30, 0).unwrap();
        repo.create(&booking("b1", at)).await.unwrap();

        let found = repo.get_by_id("b1").await.unwrap().unwrap();
        assert_eq!(found.scheduled_at, at);
        assert_eq!(found.guest_count, 3);
        assert_eq!(found.meal_category, MealCategory::Lunch);
        assert_eq!(found.status, BookingStatus::Pending);
        assert_eq!(found.message.as_deref(), Some("anniversary"));

        assert_eq!(repo.list_by_customer("cust").await.unwrap().len(), 1);
        assert_eq!(repo.list_by_restaurant("r1").await.unwrap().len(), 1);
        assert!(repo.list_by_restaurant("r2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let repo = setup().await;
        repo.create(&booking("b1", Utc::now() + Duration::days(1)))
            .await
            .unwrap();

        let link = PaymentLink {
            id: "plink_1".to_string(),
            url: "https://pay.example.com/plink_1".to_string(),
        };
        let updated = repo
            .transition("b1", BookingStatus::Pending, BookingStatus::PaymentPending, Some(&link))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, BookingStatus::PaymentPending);
        assert_eq!(updated.payment_link_id.as_deref(), Some("plink_1"));

        // Second writer expecting the old status loses
        let lost = repo
            .transition("b1", BookingStatus::Pending, BookingStatus::Rejected, None)
            .await
            .unwrap();
        assert!(lost.is_none());

        // Link survives later transitions that carry none
        let confirmed = repo
            .transition("b1", BookingStatus::PaymentPending, BookingStatus::Confirmed, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(confirmed.payment_link_url.as_deref(), Some("https://pay.example.com/plink_1"));

        assert!(repo
            .transition("missing", BookingStatus::Pending, BookingStatus::Rejected, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_due() {
        let repo = setup().await;
        let now = Utc::now();
        repo.create(&booking("past", now - Duration::hours(2))).await.unwrap();
        repo.create(&booking("future", now + Duration::hours(2))).await.unwrap();

        for id in ["past", "future"] {
            repo.transition(id, BookingStatus::Pending, BookingStatus::PaymentPending, None)
                .await
                .unwrap();
            repo.transition(id, BookingStatus::PaymentPending, BookingStatus::Confirmed, None)
                .await
                .unwrap();
        }

        let due = repo.list_due(BookingStatus::Confirmed, now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "past");

        assert!(repo
            .list_due(BookingStatus::Pending, now)
            .await
            .unwrap()
            .is_empty());
    }
}
