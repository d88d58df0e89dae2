//! Restaurant repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Restaurant;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait RestaurantRepository: Send + Sync {
    async fn create(&self, restaurant: &Restaurant) -> Result<Restaurant>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Restaurant>>;

    /// Restaurants owned by a user, newest first
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Restaurant>>;
}

/// SQLx-based restaurant repository for SQLite and MySQL
pub struct SqlxRestaurantRepository {
    pool: DynDatabasePool,
}

impl SqlxRestaurantRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn RestaurantRepository> {
        Arc::new(Self::new(pool))
    }
}

const SELECT_RESTAURANT: &str = "SELECT id, owner_id, name, created_at, updated_at FROM restaurants";

#[async_trait]
impl RestaurantRepository for SqlxRestaurantRepository {
    async fn create(&self, restaurant: &Restaurant) -> Result<Restaurant> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_restaurant_sqlite(self.pool.sqlite()?, restaurant).await,
            DatabaseDriver::Mysql => create_restaurant_mysql(self.pool.mysql()?, restaurant).await,
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Restaurant>> {
        let sql = format!("{} WHERE id = ?", SELECT_RESTAURANT);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to get restaurant by ID")?;
                Ok(row.map(|r| row_to_restaurant_sqlite(&r)))
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to get restaurant by ID")?;
                Ok(row.map(|r| row_to_restaurant_mysql(&r)))
            }
        }
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Restaurant>> {
        let sql = format!(
            "{} WHERE owner_id = ? ORDER BY created_at DESC, id",
            SELECT_RESTAURANT
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(&sql)
                    .bind(owner_id)
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to list restaurants by owner")?;
                Ok(rows.iter().map(row_to_restaurant_sqlite).collect())
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(&sql)
                    .bind(owner_id)
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to list restaurants by owner")?;
                Ok(rows.iter().map(row_to_restaurant_mysql).collect())
            }
        }
    }
}

async fn create_restaurant_sqlite(pool: &SqlitePool, restaurant: &Restaurant) -> Result<Restaurant> {
    sqlx::query(
        "INSERT INTO restaurants (id, owner_id, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&restaurant.id)
    .bind(&restaurant.owner_id)
    .bind(&restaurant.name)
    .bind(restaurant.created_at)
    .bind(restaurant.updated_at)
    .execute(pool)
    .await
    .context("Failed to create restaurant")?;

    Ok(restaurant.clone())
}

fn row_to_restaurant_sqlite(row: &sqlx::sqlite::SqliteRow) -> Restaurant {
    Restaurant {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn create_restaurant_mysql(pool: &MySqlPool, restaurant: &Restaurant) -> Result<Restaurant> {
    sqlx::query(
        "INSERT INTO restaurants (id, owner_id, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&restaurant.id)
    .bind(&restaurant.owner_id)
    .bind(&restaurant.name)
    .bind(restaurant.created_at)
    .bind(restaurant.updated_at)
    .execute(pool)
    .await
    .context("Failed to create restaurant")?;

    Ok(restaurant.clone())
}

fn row_to_restaurant_mysql(row: &sqlx::mysql::MySqlRow) -> Restaurant {
    Restaurant {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations::run_migrations};
    use crate::models::{Role, User};

    #[tokio::test]
    async fn test_create_get_and_list_by_owner() {
        let pool = create_test_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let users = SqlxUserRepository::boxed(pool.clone());
        for (id, email) in [("o1", "o1@example.com"), ("o2", "o2@example.com")] {
            users
                .create(&User::new(
                    id.to_string(),
                    "Owner".to_string(),
                    email.to_string(),
                    "hash".to_string(),
                    Role::Owner,
                ))
                .await
                .unwrap();
        }

        let repo = SqlxRestaurantRepository::boxed(pool);
        repo.create(&Restaurant::new("r1".into(), "o1".into(), "Bistro".into()))
            .await
            .unwrap();
        repo.create(&Restaurant::new("r2".into(), "o2".into(), "Diner".into()))
            .await
            .unwrap();

        let found = repo.get_by_id("r1").await.unwrap().unwrap();
        assert!(found.is_owned_by("o1"));
        assert!(!found.is_owned_by("o2"));

        let mine = repo.list_by_owner("o1").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].name, "Bistro");

        assert!(repo.get_by_id("nope").await.unwrap().is_none());
    }
}
