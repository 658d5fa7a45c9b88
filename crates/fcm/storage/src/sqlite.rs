//! SQLite storage implementation.

use color_eyre::eyre::WrapErr as _;
use diesel::connection::SimpleConnection as _;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use fcm_core::{
    DeliveryLogEntry, NewLogEntry, NewNotification, NotificationFilter, NotificationRequest,
    NotificationStatus,
};

use crate::models::*;
use crate::schema::*;
use crate::traits::*;

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// Per-connection pragmas. Foreign keys are off by default in SQLite.
#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// SQLite-based storage.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage from a database URL.
    pub fn new(database_url: &str) -> color_eyre::eyre::Result<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(10)
            .connection_customizer(Box::new(ConnectionOptions))
            .build(manager)
            .wrap_err("failed to create connection pool")?;

        Ok(Self { pool })
    }

    /// Create a migrated in-memory database.
    ///
    /// Every SQLite `:memory:` connection is its own database, so the pool
    /// holds exactly one connection.
    pub fn in_memory() -> color_eyre::eyre::Result<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .connection_customizer(Box::new(ConnectionOptions))
            .build(manager)
            .wrap_err("failed to create in-memory pool")?;

        let storage = Self { pool };
        storage.run_migrations()?;
        Ok(storage)
    }

    /// Run migrations.
    pub fn run_migrations(&self) -> color_eyre::eyre::Result<()> {
        use diesel_migrations::MigrationHarness as _;

        let mut conn = self
            .pool
            .get()
            .wrap_err("failed to get connection for migrations")?;

        conn.run_pending_migrations(crate::MIGRATIONS)
            .map_err(|e| color_eyre::eyre::eyre!("migration failed: {}", e))?;

        Ok(())
    }

    fn conn(
        &self,
    ) -> color_eyre::eyre::Result<PooledConnection<ConnectionManager<SqliteConnection>>> {
        self.pool
            .get()
            .wrap_err("failed to get database connection")
    }

    fn load_request(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> color_eyre::eyre::Result<Option<NotificationRequest>> {
        let row: Option<NotificationRow> = fcm_notification::table
            .find(id)
            .select(NotificationRow::as_select())
            .first(conn)
            .optional()
            .wrap_err("failed to load notification")?;

        row.map(NotificationRequest::try_from).transpose()
    }

    fn insert_logs(
        conn: &mut SqliteConnection,
        id: i64,
        entries: &[NewLogEntry],
    ) -> color_eyre::eyre::Result<Vec<DeliveryLogEntry>> {
        let mut stored = Vec::with_capacity(entries.len());

        for entry in entries {
            let row = NewLogRow {
                fcm_notification_id: id,
                result: serde_json::to_string(&entry.result)
                    .wrap_err("failed to serialize delivery result")?,
                status: entry.status().code(),
                send_datetime: entry.sent_at.naive_utc(),
            };

            let inserted: LogRow = diesel::insert_into(fcm_notification_log::table)
                .values(&row)
                .returning(LogRow::as_returning())
                .get_result(conn)
                .wrap_err("failed to insert log entry")?;

            stored.push(DeliveryLogEntry::try_from(inserted)?);
        }

        Ok(stored)
    }
}

impl NotificationStore for SqliteStorage {
    fn create(&self, request: &NewNotification) -> color_eyre::eyre::Result<i64> {
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().naive_utc();

        let target =
            serde_json::to_string(&request.target).wrap_err("failed to serialize target")?;
        let extra_data = request
            .extra_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .wrap_err("failed to serialize extra data")?;
        let delay_time =
            i32::try_from(request.delay_seconds).wrap_err("delay out of range")?;

        let new_row = NewNotificationRow {
            title: &request.title,
            body: &request.body,
            image: request.image.as_deref(),
            target: &target,
            delay_time,
            status: NotificationStatus::Pending.code(),
            extra_data: extra_data.as_deref(),
            create_datetime: now,
            update_datetime: now,
        };

        let id: i64 = diesel::insert_into(fcm_notification::table)
            .values(&new_row)
            .returning(fcm_notification::id)
            .get_result(&mut conn)
            .wrap_err("failed to create notification")?;

        tracing::debug!(
            notification_id = id,
            target_kind = request.target.kind(),
            "notification created"
        );

        Ok(id)
    }

    fn get(&self, id: i64) -> color_eyre::eyre::Result<Option<NotificationRequest>> {
        let mut conn = self.conn()?;
        Self::load_request(&mut conn, id)
    }

    fn list(
        &self,
        filter: &NotificationFilter,
    ) -> color_eyre::eyre::Result<Vec<NotificationRequest>> {
        let mut conn = self.conn()?;

        let mut query = fcm_notification::table
            .select(NotificationRow::as_select())
            .order(fcm_notification::id.asc())
            .into_boxed();

        if let Some(status) = filter.status {
            query = query.filter(fcm_notification::status.eq(status.code()));
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = filter.offset {
            query = query.offset(offset);
        }

        let rows: Vec<NotificationRow> = query
            .load(&mut conn)
            .wrap_err("failed to list notifications")?;

        rows.into_iter().map(NotificationRequest::try_from).collect()
    }

    fn update_status(&self, id: i64, status: NotificationStatus) -> color_eyre::eyre::Result<()> {
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().naive_utc();

        let updated = diesel::update(fcm_notification::table.find(id))
            .set((
                fcm_notification::status.eq(status.code()),
                fcm_notification::update_datetime.eq(now),
            ))
            .execute(&mut conn)
            .wrap_err("failed to update notification status")?;

        if updated == 0 {
            color_eyre::eyre::bail!("notification {} not found", id);
        }

        Ok(())
    }

    fn append_log_entries(
        &self,
        id: i64,
        entries: &[NewLogEntry],
    ) -> color_eyre::eyre::Result<Vec<DeliveryLogEntry>> {
        let mut conn = self.conn()?;

        conn.immediate_transaction::<_, color_eyre::eyre::Report, _>(|conn| {
            let exists: i64 = fcm_notification::table
                .find(id)
                .count()
                .get_result(conn)
                .wrap_err("failed to check notification")?;

            if exists == 0 {
                color_eyre::eyre::bail!("notification {} not found", id);
            }

            Self::insert_logs(conn, id, entries)
        })
    }

    fn log_entries(&self, id: i64) -> color_eyre::eyre::Result<Vec<DeliveryLogEntry>> {
        let mut conn = self.conn()?;

        let rows: Vec<LogRow> = fcm_notification_log::table
            .filter(fcm_notification_log::fcm_notification_id.eq(id))
            .order(fcm_notification_log::id.asc())
            .select(LogRow::as_select())
            .load(&mut conn)
            .wrap_err("failed to load log entries")?;

        rows.into_iter().map(DeliveryLogEntry::try_from).collect()
    }

    fn claim(&self, id: i64) -> color_eyre::eyre::Result<Claim> {
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().naive_utc();

        conn.immediate_transaction::<_, color_eyre::eyre::Report, _>(|conn| {
            let Some(request) = Self::load_request(conn, id)? else {
                return Ok(Claim::NotFound);
            };

            if request.status != NotificationStatus::Pending {
                return Ok(Claim::NotPending(request.status));
            }

            // Compare-and-set: only a pending row moves to sending
            let updated = diesel::update(
                fcm_notification::table
                    .filter(fcm_notification::id.eq(id))
                    .filter(fcm_notification::status.eq(NotificationStatus::Pending.code())),
            )
            .set((
                fcm_notification::status.eq(NotificationStatus::Sending.code()),
                fcm_notification::update_datetime.eq(now),
            ))
            .execute(conn)
            .wrap_err("failed to claim notification")?;

            if updated == 0 {
                return Ok(Claim::NotPending(NotificationStatus::Sending));
            }

            Ok(Claim::Claimed(NotificationRequest {
                status: NotificationStatus::Sending,
                updated_at: chrono::DateTime::from_naive_utc_and_offset(now, chrono::Utc),
                ..request
            }))
        })
    }

    fn finalize(
        &self,
        id: i64,
        status: NotificationStatus,
        entries: &[NewLogEntry],
    ) -> color_eyre::eyre::Result<Vec<DeliveryLogEntry>> {
        if !status.is_terminal() {
            color_eyre::eyre::bail!("cannot finalize notification {} as {}", id, status);
        }

        let mut conn = self.conn()?;
        let now = chrono::Utc::now().naive_utc();

        conn.immediate_transaction::<_, color_eyre::eyre::Report, _>(|conn| {
            let updated = diesel::update(
                fcm_notification::table
                    .filter(fcm_notification::id.eq(id))
                    .filter(fcm_notification::status.eq(NotificationStatus::Sending.code())),
            )
            .set((
                fcm_notification::status.eq(status.code()),
                fcm_notification::update_datetime.eq(now),
            ))
            .execute(conn)
            .wrap_err("failed to store final status")?;

            if updated == 0 {
                color_eyre::eyre::bail!("notification {} is not being dispatched", id);
            }

            Self::insert_logs(conn, id, entries)
        })
    }

    fn delete(&self, id: i64) -> color_eyre::eyre::Result<bool> {
        let mut conn = self.conn()?;

        conn.immediate_transaction::<_, color_eyre::eyre::Report, _>(|conn| {
            diesel::delete(
                fcm_notification_log::table
                    .filter(fcm_notification_log::fcm_notification_id.eq(id)),
            )
            .execute(conn)
            .wrap_err("failed to delete log entries")?;

            let deleted = diesel::delete(fcm_notification::table.find(id))
                .execute(conn)
                .wrap_err("failed to delete notification")?;

            Ok(deleted > 0)
        })
    }
}

impl DeviceRegistry for SqliteStorage {
    fn register(&self, device_key: &str, token: &str) -> color_eyre::eyre::Result<()> {
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().naive_utc();

        let new_device = NewDevice {
            device_key,
            token,
            create_datetime: now,
            update_datetime: now,
        };

        diesel::insert_into(fcm_device::table)
            .values(&new_device)
            .on_conflict(fcm_device::device_key)
            .do_update()
            .set((
                fcm_device::token.eq(token),
                fcm_device::update_datetime.eq(now),
            ))
            .execute(&mut conn)
            .wrap_err("failed to register device")?;

        Ok(())
    }

    fn lookup(&self, device_key: &str) -> color_eyre::eyre::Result<Option<String>> {
        let mut conn = self.conn()?;

        let result: Option<String> = fcm_device::table
            .filter(fcm_device::device_key.eq(device_key))
            .select(fcm_device::token)
            .first(&mut conn)
            .optional()
            .wrap_err("failed to look up device")?;

        Ok(result)
    }

    fn lookup_many(&self, device_keys: &[&str]) -> color_eyre::eyre::Result<Vec<String>> {
        let mut conn = self.conn()?;

        let rows: Vec<(String, String)> = fcm_device::table
            .filter(fcm_device::device_key.eq_any(device_keys))
            .select((fcm_device::device_key, fcm_device::token))
            .load(&mut conn)
            .wrap_err("failed to look up devices")?;

        let by_key: std::collections::HashMap<String, String> = rows.into_iter().collect();

        Ok(device_keys
            .iter()
            .filter_map(|key| by_key.get(*key).cloned())
            .collect())
    }

    fn unregister(&self, device_key: &str) -> color_eyre::eyre::Result<bool> {
        let mut conn = self.conn()?;

        let deleted = diesel::delete(fcm_device::table.filter(fcm_device::device_key.eq(device_key)))
            .execute(&mut conn)
            .wrap_err("failed to unregister device")?;

        Ok(deleted > 0)
    }
}
