//! Row types for the tenant schema. Table definitions live in `migrations/`.

pub mod core;
pub mod documents;
pub mod usage;

pub use self::core::{Folder, Organization, SubscriptionStatus, User};
pub use documents::{AuditAction, AuditEntityType, AuditLog, Document};
pub use usage::{ModelPricing, SubscriptionPlan, UsageDailySummary, UsageEvent, UsageLimits};
