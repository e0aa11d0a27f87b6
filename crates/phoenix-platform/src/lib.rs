//! Ambient platform stack shared by every Phoenix service: configuration,
//! the injected `AppContext`, the service runtime, and telemetry.

pub mod clock;
pub mod config;
pub mod context;
pub mod runtime;
pub mod service;
pub mod telemetry;
pub mod template;

pub use clock::{Clock, FrozenClock, SystemClock};
pub use config::{ObservabilitySettings, PlatformConfig};
pub use context::AppContext;
pub use runtime::{Platform, PlatformRuntime};
pub use service::ServiceRegistration;
