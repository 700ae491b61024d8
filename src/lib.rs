//! # a3s-alerts
//!
//! Security alert store, live unread-alert feed, and dashboard state for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-alerts` records login attempts, raises alerts when an account sees a
//! burst of failed sign-ins, emails the account owner, and feeds an operator
//! dashboard with a live list of unread alerts and aggregate counters. The
//! store sits behind a provider trait, so the same code runs in-process or
//! against NATS.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_alerts::{LoginMonitor, MonitorConfig, SecurityService};
//! use a3s_alerts::provider::memory::MemoryProvider;
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_alerts::Result<()> {
//! let provider = Arc::new(MemoryProvider::default());
//! let monitor = LoginMonitor::new(provider.clone(), MonitorConfig::default())?;
//! let service = SecurityService::from_shared(provider);
//!
//! for _ in 0..5 {
//!     monitor.record_attempt("user@example.com", false, None).await?;
//! }
//!
//! let mut feed = service.subscribe_unread_alerts().await?;
//! if let Some(snapshot) = feed.next().await? {
//!     println!("{} unread alerts", snapshot.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **memory**: in-process store for tests and single-process use
//! - **nats**: NATS JetStream key-value buckets shared across processes
//!
//! ## Architecture
//!
//! - **AlertProvider** trait: core abstraction all stores implement
//! - **SecurityService**: unread feed, stats, and mark-as-read
//! - **LoginMonitor**: turns failed login bursts into alerts and lockouts
//! - **AlertNotifier**: emails account owners and flips `emailSent`
//! - **Dashboard**: the operator view over a `SecurityService`

pub mod dashboard;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod provider;
pub mod schema;
pub mod service;
pub mod types;

// Re-export core types
pub use dashboard::{
    AlertView, Dashboard, DashboardView, FeedState, Notice, NoticeLevel, Notices, StatsState,
};
pub use error::{AlertError, ErrorClass, Result};
pub use monitor::{AttemptOutcome, LockoutStatus, LoginMonitor, MonitorConfig};
pub use notify::{
    AlertEmail, AlertNotifier, DeliveryFailure, DispatchReport, Mailer, MemoryMailer,
    NotifierConfig,
};
pub use provider::{AlertProvider, AlertSubscription, ProviderInfo};
pub use service::{SecurityService, ServiceConfig};
pub use types::{
    AlertQuery, AlertSnapshot, EmailStatus, LoginAttempt, NewAlert, SecurityAlert, SecurityStats,
};

// Re-export providers for convenience
pub use provider::memory::{Fault, MemoryConfig, MemoryProvider};
pub use provider::nats::{NatsClient, NatsConfig, NatsProvider, NatsSubscription, StorageType};
