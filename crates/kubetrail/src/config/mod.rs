pub mod loader;
pub mod schema;

pub use schema::{
    AuditConfig, GitAuthSettings, GitAuthType, GitSettings, HelmSettings, ScheduleSettings,
    SYSTEM_NAMESPACES,
};
