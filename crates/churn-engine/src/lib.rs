// Churn engine for exercising ephemeral subscription lifecycles under load.
//
// The engine keeps N independent consumer slots cycling
// create -> run -> destroy -> cooldown against a messaging platform, feeds the
// subject space with synthetic traffic, and keeps enough bookkeeping to tell a
// client-side accounting error apart from resources the platform failed to
// release.
//
// The platform itself sits behind the `Platform` trait. `InProcessPlatform`
// implements it in memory for tests and local runs.
#[macro_use]
mod macros;

pub mod engine;
pub mod error;
pub mod inprocess;
pub mod lifecycle;
pub mod platform;
pub mod provision;
pub mod readiness;
pub mod reporter;
pub mod stats;
pub mod subjects;
pub mod traffic;

pub use engine::{Engine, EngineConfig, EngineHandle};
pub use error::{ConnectionError, PlatformError, PlatformResult, ProvisioningError};
pub use inprocess::InProcessPlatform;
pub use lifecycle::{ConsumerLifecycle, ConsumerSlot, LifecycleTiming, Phase};
pub use platform::{
    Delivery, DeliveryOptions, DeliveryStream, Platform, Retention, StartPosition, StreamSpec,
    Subscription, SubscriptionId, SubscriptionRequest,
};
pub use provision::{RetryPolicy, ensure_stream};
pub use readiness::wait_ready;
pub use reporter::{ReportTally, Reporter};
pub use stats::{SlotId, SlotSnapshot, StatsRegistry, StatsSnapshot};
pub use subjects::SubjectSpace;
pub use traffic::{TrafficConfig, TrafficGenerator, TrafficMessage};
