//! FCM Push Delivery
//!
//! Firebase Cloud Messaging delivery over the HTTP v1 and Instance ID APIs.

mod credentials;
mod fcm;
mod traits;

pub use credentials::ServiceAccount;
pub use fcm::*;
pub use traits::*;
