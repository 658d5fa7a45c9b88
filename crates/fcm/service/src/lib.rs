//! FCM Service Layer
//!
//! Dispatch of stored notification requests, direct topic and token
//! operations, and configuration-time wiring of the whole stack.

mod config;
mod dispatcher;
mod manager;
mod runtime;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigError, RegistryKind};
pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
pub use manager::{DeviceInfo, FcmManager, ManagerError};
pub use runtime::FcmRuntime;
