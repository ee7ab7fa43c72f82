//! # authpool
//!
//! Async connection pool that authenticates every physical connection it
//! opens, with first-class Kerberos support.
//!
//! The pool is protocol-agnostic: a driver plugs in through the
//! [`Connector`] trait, and credentials come from a
//! [`CredentialProvider`](authpool_auth::CredentialProvider) built from the
//! pool's [`Credentials`].
//!
//! ## Features
//!
//! - Bounded pool size with deadline-aware acquisition
//! - Liveness probe before an idle connection is handed out
//! - `max_lifetime` and `idle_timeout` enforcement by a background reaper
//! - Password and Kerberos (keytab or credential cache) authentication
//! - Graceful shutdown with a grace period and revocation of stragglers
//! - Configuration from Java-style `.properties` files
//! - Metrics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use authpool::{Credentials, KerberosConfig, Pool, PoolConfig};
//! use std::time::Duration;
//!
//! // Using the builder pattern
//! let pool = Pool::builder(connector)
//!     .max_pool_size(20)
//!     .idle_timeout(Duration::from_secs(300))
//!     .credentials(Credentials::kerberos(
//!         KerberosConfig::new("svc_reports").keytab("/etc/security/svc_reports.keytab"),
//!     ))
//!     .build()
//!     .await?;
//!
//! // Or from a properties file
//! let config = PoolConfig::from_properties(&std::fs::read_to_string("app.properties")?, "main")?;
//! let pool = Pool::new(config, connector).await?;
//!
//! // Get a connection from the pool
//! let conn = pool.acquire().await?;
//! // Use connection...
//! // Connection automatically returned to pool on drop
//!
//! // Check pool status
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//!
//! // Get metrics
//! let metrics = pool.metrics();
//! println!("Checkout success rate: {:.2}", metrics.checkout_success_rate());
//!
//! pool.shutdown(Duration::from_secs(10)).await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod properties;
pub mod reaper;

// Configuration
pub use config::{ConnectParams, PoolConfig};

// Error types
pub use error::PoolError;

// Driver seam
pub use connector::{Connector, ConnectorError};

// Pool types
pub use pool::{
    Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection, ShutdownReport,
};

// Lifecycle management
pub use lifecycle::{ConnectionMetadata, ConnectionState, HealthCheckResult, RetireReason};

// Authentication
pub use authpool_auth::{
    AuthContext, AuthError, AuthMode, CredentialProvider, Credentials, KerberosConfig,
};
