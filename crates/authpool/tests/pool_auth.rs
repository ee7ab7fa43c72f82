//! Authentication through the pool: Kerberos, password and failures at
//! connection open.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use authpool::{AuthError, AuthMode, Credentials, Pool, PoolConfig, PoolError};
use authpool_auth::KerberosAuth;
use authpool_testing::{KerberosFixture, MockConnector, OpenFault, init_tracing};

// =============================================================================
// Kerberos
// =============================================================================

#[tokio::test]
async fn test_kerberos_pool_opens_authenticated_connections() {
    init_tracing();
    let fixture = KerberosFixture::new().unwrap();
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .credentials(Credentials::kerberos(fixture.config()))
        .build()
        .await
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.auth, AuthMode::Kerberos);
    assert_eq!(connector.last_auth(), Some(AuthMode::Kerberos));
}

#[tokio::test]
async fn test_kerberos_ticket_shared_between_connections() {
    let fixture = KerberosFixture::new().unwrap();
    let connector = MockConnector::new();
    let provider = Arc::new(KerberosAuth::new(fixture.config()));
    let pool = Pool::builder(connector.clone())
        .credential_provider(provider.clone())
        .build()
        .await
        .unwrap();

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    let c = pool.acquire().await.unwrap();
    assert_eq!(connector.opened(), 3);
    assert_eq!(provider.tickets_issued(), 1);
    drop((a, b, c));
}

#[tokio::test]
async fn test_invalid_keytab_fails_without_opening() {
    let fixture = KerberosFixture::new().unwrap();
    fixture.corrupt_keytab().unwrap();
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .credentials(Credentials::kerberos(fixture.config()))
        .build()
        .await
        .unwrap();

    let err = pool.acquire().await.unwrap_err();
    match err {
        PoolError::AuthenticationFailed(AuthError::Keytab(_)) => {}
        other => panic!("expected keytab failure, got {other:?}"),
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.connections_created, 0);
    assert_eq!(metrics.authentication_failures, 1);
    assert_eq!(connector.opened(), 0);
    assert_eq!(pool.status().total(), 0);
}

#[tokio::test]
async fn test_missing_keytab_fails() {
    let fixture = KerberosFixture::new().unwrap();
    let connector = MockConnector::new();
    let config = fixture
        .config()
        .keytab(fixture.path().join("does-not-exist.keytab"));
    let pool = Pool::builder(connector.clone())
        .credentials(Credentials::kerberos(config))
        .build()
        .await
        .unwrap();

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PoolError::AuthenticationFailed(_)));
    assert_eq!(connector.opened(), 0);
}

#[tokio::test]
async fn test_credential_cache_pool() {
    let fixture = KerberosFixture::new().unwrap();
    let ccache = fixture.write_ccache("krb5cc_test", 3600).unwrap();
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .credentials(Credentials::kerberos(fixture.ccache_config(&ccache)))
        .build()
        .await
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.auth, AuthMode::Kerberos);
}

#[tokio::test]
async fn test_expired_credential_cache_fails() {
    let fixture = KerberosFixture::new().unwrap();
    let ccache = fixture.write_ccache("krb5cc_expired", -60).unwrap();
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .credentials(Credentials::kerberos(fixture.ccache_config(&ccache)))
        .build()
        .await
        .unwrap();

    let err = pool.acquire().await.unwrap_err();
    match err {
        PoolError::AuthenticationFailed(AuthError::TicketExpired { .. }) => {}
        other => panic!("expected expired ticket, got {other:?}"),
    }
    assert_eq!(connector.opened(), 0);
}

#[tokio::test]
async fn test_server_rejection_invalidates_ticket_and_is_not_retried() {
    let fixture = KerberosFixture::new().unwrap();
    let connector = MockConnector::new();
    let provider = Arc::new(KerberosAuth::new(fixture.config()));
    let pool = Pool::builder(connector.clone())
        .credential_provider(provider.clone())
        .build()
        .await
        .unwrap();

    connector.push_open_faults([OpenFault::Authentication("ticket not yet valid".into())]);
    let err = pool.acquire().await.unwrap_err();
    match &err {
        PoolError::AuthenticationFailed(AuthError::Rejected(reason)) => {
            assert!(reason.contains("not yet valid"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(!err.is_retryable());
    assert_eq!(connector.opened(), 0);
    assert_eq!(pool.metrics().authentication_failures, 1);

    let _conn = pool.acquire().await.unwrap();
    assert_eq!(provider.tickets_issued(), 2);
}

// =============================================================================
// Password and none
// =============================================================================

#[tokio::test]
async fn test_password_pool() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .credentials(Credentials::password("app", "s3cret"))
        .build()
        .await
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.auth, AuthMode::Password);
}

#[tokio::test]
async fn test_invalid_credentials_rejected_at_build() {
    let connector = MockConnector::new();
    let err = Pool::builder(connector)
        .credentials(Credentials::password("  ", "s3cret"))
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Configuration(_)));
}

// =============================================================================
// Open failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_open_failures_are_retried() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .acquire_timeout(Duration::from_secs(5))
        .build()
        .await
        .unwrap();

    connector.push_open_faults([OpenFault::Io, OpenFault::Io]);
    let conn = pool.acquire().await.unwrap();
    assert_eq!(connector.opened(), 1);
    assert_eq!(pool.metrics().connections_created, 1);
    drop(conn);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_give_up_before_deadline() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .acquire_timeout(Duration::from_millis(200))
        .validation_timeout(Duration::from_millis(100))
        .build()
        .await
        .unwrap();

    connector.push_open_faults(std::iter::repeat_n(OpenFault::Io, 100));
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PoolError::Connect(_)), "got {err:?}");
    assert!(err.is_retryable());
    assert_eq!(pool.status().creating, 0);
}

#[tokio::test]
async fn test_protocol_error_is_not_retried() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone()).build().await.unwrap();

    connector.push_open_faults([OpenFault::Protocol("unexpected token 0xFF".into())]);
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PoolError::Connect(_)));
    assert!(!err.is_retryable());

    // The fault queue is drained, so the next open succeeds.
    let _conn = pool.acquire().await.unwrap();
    assert_eq!(connector.opened(), 1);
}

// =============================================================================
// Properties file
// =============================================================================

#[tokio::test]
async fn test_pool_from_properties() {
    let fixture = KerberosFixture::new().unwrap();
    let text = format!(
        "datasource.reports.url=jdbc:sqlserver://db.example.com:1433;databaseName=reports\n\
         datasource.reports.maximumPoolSize=3\n\
         datasource.reports.idleTimeout=60000\n\
         datasource.reports.poolName=reports\n\
         datasource.other.maximumPoolSize=99\n\
         authentication.type=kerberos\n\
         authentication.kerberos.krb5FilePath={}\n\
         authentication.kerberos.principal=svc_reports\n\
         authentication.kerberos.keytabPath={}\n",
        fixture.krb5_conf_path().display(),
        fixture.keytab_path().display(),
    );

    let config = PoolConfig::from_properties(&text, "reports").unwrap();
    assert_eq!(config.max_pool_size, 3);
    assert_eq!(config.pool_name, "reports");

    let connector = MockConnector::new();
    let pool = Pool::new(config, connector.clone()).await.unwrap();
    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.auth, AuthMode::Kerberos);
    assert_eq!(
        conn.url,
        "jdbc:sqlserver://db.example.com:1433;databaseName=reports"
    );
    drop(conn);

    let report = pool.shutdown(Duration::from_secs(1)).await;
    assert_eq!(report.idle_closed, 1);
}
