pub mod monitor;

pub use monitor::{
    HealthCallbacks, HealthHandle, HealthMonitor, NoopCallbacks, RecoveryTarget,
};
