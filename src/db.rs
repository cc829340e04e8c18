use crate::error::SwapError;
use crate::types::{RequestStatus, Slot, SlotStatus, SwapFilter, SwapRequest, User};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{FromRow, Row, Sqlite, Transaction};
use std::str::FromStr;

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(database_url: &str) -> Result<Self, SwapError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| SwapError::Database(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| SwapError::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), SwapError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| SwapError::Database(format!("Migration failed: {}", e)))?;
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction for a multi-record write
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, SwapError> {
        self.pool
            .begin()
            .await
            .map_err(|e| SwapError::TransactionFailed(e.to_string()))
    }
}

// User repository
impl Database {
    /// Insert a new user; a duplicate email maps to `UserExists`
    pub async fn create_user(&self, user: &User) -> Result<(), SwapError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(timestamp(&user.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => SwapError::UserExists(user.email.clone()),
            _ => SwapError::Database(e.to_string()),
        })?;

        Ok(())
    }

    /// Look up a user by (normalized) email
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, SwapError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, created_at
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SwapError::Database(e.to_string()))
    }
}

// Slot repository
impl Database {
    /// Insert a slot
    pub async fn create_slot(&self, slot: &Slot) -> Result<(), SwapError> {
        sqlx::query(
            r#"
            INSERT INTO slots (id, owner_id, title, date, is_swappable, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&slot.id)
        .bind(&slot.owner_id)
        .bind(&slot.title)
        .bind(timestamp(&slot.date))
        .bind(slot.is_swappable)
        .bind(slot.status.to_string())
        .bind(timestamp(&slot.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| SwapError::Database(e.to_string()))?;

        Ok(())
    }

    /// Get a slot by ID
    pub async fn get_slot(&self, id: &str) -> Result<Option<Slot>, SwapError> {
        sqlx::query_as::<_, Slot>(
            r#"
            SELECT id, owner_id, title, date, is_swappable, status, created_at
            FROM slots
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SwapError::Database(e.to_string()))
    }

    /// All slots owned by a user
    pub async fn list_slots_by_owner(&self, owner_id: &str) -> Result<Vec<Slot>, SwapError> {
        sqlx::query_as::<_, Slot>(
            r#"
            SELECT id, owner_id, title, date, is_swappable, status, created_at
            FROM slots
            WHERE owner_id = ?
            ORDER BY date ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SwapError::Database(e.to_string()))
    }

    /// Swappable slots belonging to anyone but `exclude_owner`
    pub async fn list_swappable_slots(&self, exclude_owner: &str) -> Result<Vec<Slot>, SwapError> {
        sqlx::query_as::<_, Slot>(
            r#"
            SELECT id, owner_id, title, date, is_swappable, status, created_at
            FROM slots
            WHERE is_swappable = 1 AND owner_id != ?
            ORDER BY date ASC
            "#,
        )
        .bind(exclude_owner)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SwapError::Database(e.to_string()))
    }

    /// Swappable slots owned by a user
    pub async fn list_owner_swappable(&self, owner_id: &str) -> Result<Vec<Slot>, SwapError> {
        sqlx::query_as::<_, Slot>(
            r#"
            SELECT id, owner_id, title, date, is_swappable, status, created_at
            FROM slots
            WHERE is_swappable = 1 AND owner_id = ?
            ORDER BY date ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SwapError::Database(e.to_string()))
    }

    /// Owner-side update of a slot that is not under negotiation.
    ///
    /// Returns `false` when no row matched: the slot is missing, owned by
    /// someone else, or currently pending.
    pub async fn update_slot_flags(
        &self,
        id: &str,
        owner_id: &str,
        is_swappable: bool,
        status: SlotStatus,
    ) -> Result<bool, SwapError> {
        let result = sqlx::query(
            r#"
            UPDATE slots
            SET is_swappable = ?, status = ?
            WHERE id = ? AND owner_id = ? AND status != 'pending'
            "#,
        )
        .bind(is_swappable)
        .bind(status.to_string())
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(|e| SwapError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }
}

// Swap request repository
impl Database {
    /// Get a swap request by ID
    pub async fn get_swap_request(&self, id: &str) -> Result<Option<SwapRequest>, SwapError> {
        sqlx::query_as::<_, SwapRequest>(
            r#"
            SELECT id, from_user_id, to_user_id, offered_slot_id, requested_slot_id,
                   status, created_at, responded_at
            FROM swap_requests
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SwapError::Database(e.to_string()))
    }

    /// Requests sent by a user, newest first
    pub async fn list_swap_requests_from(
        &self,
        user_id: &str,
        filter: SwapFilter,
    ) -> Result<Vec<SwapRequest>, SwapError> {
        let status = filter.status.map(|s| s.to_string());

        sqlx::query_as::<_, SwapRequest>(
            r#"
            SELECT id, from_user_id, to_user_id, offered_slot_id, requested_slot_id,
                   status, created_at, responded_at
            FROM swap_requests
            WHERE from_user_id = ? AND (? IS NULL OR status = ?)
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(&status)
        .bind(&status)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SwapError::Database(e.to_string()))
    }

    /// Requests addressed to a user, newest first
    pub async fn list_swap_requests_to(
        &self,
        user_id: &str,
        filter: SwapFilter,
    ) -> Result<Vec<SwapRequest>, SwapError> {
        let status = filter.status.map(|s| s.to_string());

        sqlx::query_as::<_, SwapRequest>(
            r#"
            SELECT id, from_user_id, to_user_id, offered_slot_id, requested_slot_id,
                   status, created_at, responded_at
            FROM swap_requests
            WHERE to_user_id = ? AND (? IS NULL OR status = ?)
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(&status)
        .bind(&status)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SwapError::Database(e.to_string()))
    }
}

// Negotiation writes. These run on a connection borrowed from a caller-owned
// transaction so the engine decides where the commit boundary is.
impl Database {
    /// Move the requester's own slot into negotiation if it is still on offer
    pub async fn claim_offered_slot(
        conn: &mut SqliteConnection,
        slot_id: &str,
        requester_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE slots
            SET status = 'pending', is_swappable = 0
            WHERE id = ? AND owner_id = ? AND is_swappable = 1 AND status = 'available'
            "#,
        )
        .bind(slot_id)
        .bind(requester_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Move another user's slot into negotiation if it is still on offer
    pub async fn claim_desired_slot(
        conn: &mut SqliteConnection,
        slot_id: &str,
        requester_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE slots
            SET status = 'pending', is_swappable = 0
            WHERE id = ? AND owner_id != ? AND is_swappable = 1 AND status = 'available'
            "#,
        )
        .bind(slot_id)
        .bind(requester_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Read a slot inside a transaction
    pub async fn fetch_slot(
        conn: &mut SqliteConnection,
        slot_id: &str,
    ) -> Result<Option<Slot>, sqlx::Error> {
        sqlx::query_as::<_, Slot>(
            r#"
            SELECT id, owner_id, title, date, is_swappable, status, created_at
            FROM slots
            WHERE id = ?
            "#,
        )
        .bind(slot_id)
        .fetch_optional(conn)
        .await
    }

    /// Record a new pending swap request
    pub async fn insert_swap_request(
        conn: &mut SqliteConnection,
        request: &SwapRequest,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO swap_requests (
                id, from_user_id, to_user_id, offered_slot_id, requested_slot_id,
                status, created_at, responded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.id)
        .bind(&request.from_user_id)
        .bind(&request.to_user_id)
        .bind(&request.offered_slot_id)
        .bind(&request.requested_slot_id)
        .bind(request.status.to_string())
        .bind(timestamp(&request.created_at))
        .bind(request.responded_at.as_ref().map(timestamp))
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Apply the terminal transition of a request still pending for `responder_id`
    pub async fn resolve_swap_request(
        conn: &mut SqliteConnection,
        request_id: &str,
        responder_id: &str,
        status: RequestStatus,
        responded_at: &DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE swap_requests
            SET status = ?, responded_at = ?
            WHERE id = ? AND to_user_id = ? AND status = 'pending'
            "#,
        )
        .bind(status.to_string())
        .bind(timestamp(responded_at))
        .bind(request_id)
        .bind(responder_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Release a pending slot with its final owner and flags
    pub async fn settle_slot(
        conn: &mut SqliteConnection,
        slot_id: &str,
        owner_id: &str,
        is_swappable: bool,
        status: SlotStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE slots
            SET owner_id = ?, is_swappable = ?, status = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(owner_id)
        .bind(is_swappable)
        .bind(status.to_string())
        .bind(slot_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Fixed-width UTC encoding so that stored timestamps sort lexically
pub(crate) fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(column: &str, raw: &str) -> sqlx::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(format!("Invalid {} timestamp {:?}: {}", column, raw, e).into()))
}

fn decode_status<T: FromStr<Err = String>>(raw: &str) -> sqlx::Result<T> {
    raw.parse::<T>().map_err(|e| sqlx::Error::Decode(e.into()))
}

impl FromRow<'_, SqliteRow> for Slot {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let date: String = row.try_get("date")?;
        let created_at: String = row.try_get("created_at")?;
        let status: String = row.try_get("status")?;

        Ok(Slot {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            title: row.try_get("title")?,
            date: parse_timestamp("date", &date)?,
            is_swappable: row.try_get("is_swappable")?,
            status: decode_status(&status)?,
            created_at: parse_timestamp("created_at", &created_at)?,
        })
    }
}

impl FromRow<'_, SqliteRow> for SwapRequest {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        let responded_at: Option<String> = row.try_get("responded_at")?;

        Ok(SwapRequest {
            id: row.try_get("id")?,
            from_user_id: row.try_get("from_user_id")?,
            to_user_id: row.try_get("to_user_id")?,
            offered_slot_id: row.try_get("offered_slot_id")?,
            requested_slot_id: row.try_get("requested_slot_id")?,
            status: decode_status(&status)?,
            created_at: parse_timestamp("created_at", &created_at)?,
            responded_at: responded_at
                .as_deref()
                .map(|raw| parse_timestamp("responded_at", raw))
                .transpose()?,
        })
    }
}

impl FromRow<'_, SqliteRow> for User {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let created_at: String = row.try_get("created_at")?;

        Ok(User {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            created_at: parse_timestamp("created_at", &created_at)?,
        })
    }
}
