use std::{str::FromStr, time::Duration};

use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

use customer_registry_core::{Customer, NewCustomer};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    /// The pragmas apply to every pooled connection.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle to operate on customer records.
    pub fn customers(&self) -> CustomerRepository {
        CustomerRepository {
            pool: self.pool.clone(),
        }
    }

    /// Closes every pooled connection. Subsequent queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
}

/// Repository responsible for the `customers` table.
#[derive(Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    /// Begins a deferred SQLite transaction. Its first statement must be the
    /// write, so the lock is taken before any read snapshot exists.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, CustomerStoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Inserts a customer and returns it with the identifier assigned by SQLite.
    pub async fn create(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        customer: &NewCustomer,
    ) -> Result<Customer, CustomerStoreError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            "INSERT INTO customers (name, email, phone) \
             VALUES (?, ?, ?) \
             RETURNING id, name, email, phone",
        )
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.into_domain())
    }

    /// Loads a single customer outside of any transaction.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Customer>, CustomerStoreError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            "SELECT id, name, email, phone FROM customers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CustomerRow::into_domain))
    }

    /// Lists every customer ordered by identifier.
    pub async fn find_all(&self) -> Result<Vec<Customer>, CustomerStoreError> {
        let rows = sqlx::query_as::<_, CustomerRow>(
            "SELECT id, name, email, phone FROM customers ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CustomerRow::into_domain).collect())
    }

    /// Overwrites the stored columns of a customer. Returns `None` when no row
    /// has the customer's identifier.
    pub async fn update(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        customer: &Customer,
    ) -> Result<Option<Customer>, CustomerStoreError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            "UPDATE customers \
             SET name = ?, email = ?, phone = ? \
             WHERE id = ? \
             RETURNING id, name, email, phone",
        )
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(customer.id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(CustomerRow::into_domain))
    }

    /// Deletes the customer with the given identifier and reports whether a
    /// row was removed.
    pub async fn delete(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<bool, CustomerStoreError> {
        let result = sqlx::query("DELETE FROM customers WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Raw `customers` row.
#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    id: i64,
    name: Option<String>,
    email: Option<String>,
    phone: String,
}

impl CustomerRow {
    fn into_domain(self) -> Customer {
        Customer {
            id: self.id,
            name: self.name,
            email: self.email,
            phone: self.phone,
        }
    }
}

/// Errors that can occur while reading or mutating customers.
#[derive(Debug, Error)]
pub enum CustomerStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
