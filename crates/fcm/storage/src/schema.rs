//! Diesel schema definitions.

diesel::table! {
    fcm_notification (id) {
        id -> BigInt,
        title -> Text,
        body -> Text,
        image -> Nullable<Text>,
        target -> Text,
        delay_time -> Integer,
        status -> SmallInt,
        extra_data -> Nullable<Text>,
        create_datetime -> Timestamp,
        update_datetime -> Timestamp,
    }
}

diesel::table! {
    fcm_notification_log (id) {
        id -> BigInt,
        fcm_notification_id -> BigInt,
        result -> Text,
        status -> SmallInt,
        send_datetime -> Timestamp,
    }
}

diesel::table! {
    fcm_device (device_key) {
        device_key -> Text,
        token -> Text,
        create_datetime -> Timestamp,
        update_datetime -> Timestamp,
    }
}

diesel::joinable!(fcm_notification_log -> fcm_notification (fcm_notification_id));

diesel::allow_tables_to_appear_in_same_query!(fcm_notification, fcm_notification_log, fcm_device,);
