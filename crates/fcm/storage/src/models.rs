//! Database models.

use color_eyre::eyre::WrapErr as _;
use diesel::prelude::*;
use fcm_core::{DeliveryLogEntry, LogStatus, NotificationRequest, NotificationStatus};

use crate::schema::{fcm_device, fcm_notification, fcm_notification_log};

/// Notification request record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = fcm_notification)]
pub struct NotificationRow {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub image: Option<String>,
    pub target: String,
    pub delay_time: i32,
    pub status: i16,
    pub extra_data: Option<String>,
    pub create_datetime: chrono::NaiveDateTime,
    pub update_datetime: chrono::NaiveDateTime,
}

/// New notification request for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = fcm_notification)]
pub struct NewNotificationRow<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub image: Option<&'a str>,
    pub target: &'a str,
    pub delay_time: i32,
    pub status: i16,
    pub extra_data: Option<&'a str>,
    pub create_datetime: chrono::NaiveDateTime,
    pub update_datetime: chrono::NaiveDateTime,
}

/// Delivery log record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = fcm_notification_log)]
pub struct LogRow {
    pub id: i64,
    pub fcm_notification_id: i64,
    pub result: String,
    pub status: i16,
    pub send_datetime: chrono::NaiveDateTime,
}

/// New delivery log record for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = fcm_notification_log)]
pub struct NewLogRow {
    pub fcm_notification_id: i64,
    pub result: String,
    pub status: i16,
    pub send_datetime: chrono::NaiveDateTime,
}

/// Device registration record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = fcm_device, primary_key(device_key))]
pub struct DeviceRow {
    pub device_key: String,
    pub token: String,
    pub create_datetime: chrono::NaiveDateTime,
    pub update_datetime: chrono::NaiveDateTime,
}

/// New device registration for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = fcm_device)]
pub struct NewDevice<'a> {
    pub device_key: &'a str,
    pub token: &'a str,
    pub create_datetime: chrono::NaiveDateTime,
    pub update_datetime: chrono::NaiveDateTime,
}

fn utc(naive: chrono::NaiveDateTime) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_naive_utc_and_offset(naive, chrono::Utc)
}

impl TryFrom<NotificationRow> for NotificationRequest {
    type Error = color_eyre::eyre::Report;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let target: fcm_core::TargetSpec = serde_json::from_str(&row.target)
            .wrap_err_with(|| format!("invalid target for notification {}", row.id))?;

        let extra_data: Option<fcm_core::ExtraData> = row
            .extra_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .wrap_err_with(|| format!("invalid extra data for notification {}", row.id))?;

        let status = NotificationStatus::from_code(row.status).ok_or_else(|| {
            color_eyre::eyre::eyre!("unknown status {} for notification {}", row.status, row.id)
        })?;

        let delay_seconds = u32::try_from(row.delay_time)
            .wrap_err_with(|| format!("negative delay for notification {}", row.id))?;

        Ok(Self {
            id: row.id,
            title: row.title,
            body: row.body,
            image: row.image,
            target,
            delay_seconds,
            extra_data,
            status,
            created_at: utc(row.create_datetime),
            updated_at: utc(row.update_datetime),
        })
    }
}

impl TryFrom<LogRow> for DeliveryLogEntry {
    type Error = color_eyre::eyre::Report;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        let status = LogStatus::from_code(row.status).ok_or_else(|| {
            color_eyre::eyre::eyre!("unknown status {} for log entry {}", row.status, row.id)
        })?;

        Ok(Self {
            id: row.id,
            notification_id: row.fcm_notification_id,
            result: row.result,
            status,
            sent_at: utc(row.send_datetime),
        })
    }
}
