//! FCM Core Types
//!
//! Data model for push notification requests, delivery logs, and the
//! target resolution rules that gate every provider call.

mod delivery;
mod message;
mod notification;
mod target;

pub use delivery::*;
pub use message::*;
pub use notification::*;
pub use target::*;
