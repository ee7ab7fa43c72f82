//! # authpool-testing
//!
//! Test infrastructure for `authpool`.
//!
//! - [`MockConnector`]: in-memory connector with counters and fault
//!   injection (failing opens, broken connections, slow probes)
//! - [`KerberosFixture`]: temporary `krb5.conf`, keytab and credential cache
//!   files for exercising the Kerberos provider
//! - [`init_tracing`]: log output for tests, filtered by `RUST_LOG`
//!
//! ## Example
//!
//! ```rust,ignore
//! use authpool::Pool;
//! use authpool_testing::{KerberosFixture, MockConnector};
//!
//! let fixture = KerberosFixture::new()?;
//! let connector = MockConnector::new();
//! let pool = Pool::builder(connector.clone())
//!     .credentials(authpool::Credentials::kerberos(fixture.config()))
//!     .build()
//!     .await?;
//!
//! let conn = pool.acquire().await?;
//! assert_eq!(connector.opened(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock;

pub use fixtures::KerberosFixture;
pub use mock::{MockConnector, MockHandle, OpenFault};

use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once per process. Later calls are
/// no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
