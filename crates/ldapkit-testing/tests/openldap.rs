//! Live tests against OpenLDAP in Docker.
//!
//! ```bash
//! cargo test -p ldapkit-testing --test openldap -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use ldapkit_client::{PagedResultsClient, SearchRequest, TransportFactory};
use ldapkit_pool::{LdapConnectionManager, LdapLifecycle, Pool};
use ldapkit_testing::OpenLdapContainer;

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_pool_against_openldap() {
    let server = OpenLdapContainer::start().await.unwrap();
    let manager = LdapConnectionManager::from_config(server.admin_config().unwrap()).unwrap();
    let lifecycle = LdapLifecycle::new(Arc::clone(manager.factory()));
    let pool = Pool::builder(manager)
        .min_connections(2)
        .max_connections(4)
        .checkout_timeout(Duration::from_secs(10))
        .validate_on_checkout(true)
        .lifecycle(lifecycle)
        .build()
        .await
        .unwrap();

    let mut conn = pool.get().await.unwrap();
    assert_eq!(
        conn.who_am_i().await.unwrap(),
        format!("dn:{}", OpenLdapContainer::ADMIN_DN)
    );
    let base = conn
        .search(&SearchRequest::new(OpenLdapContainer::BASE_DN, "(objectClass=*)").unwrap())
        .await
        .unwrap();
    assert!(!base.is_empty());
    conn.release().await;

    pool.close().await;
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_paged_search_against_openldap() {
    let server = OpenLdapContainer::start().await.unwrap();
    let factory = TransportFactory::new(server.admin_config().unwrap()).unwrap();
    let mut conn = factory.connect().await.unwrap();

    let request = SearchRequest::new(OpenLdapContainer::BASE_DN, "(objectClass=*)").unwrap();
    let everything = conn.search(&request).await.unwrap();
    let paged = PagedResultsClient::new(1)
        .execute_to_completion(&mut conn, &request)
        .await
        .unwrap();
    assert_eq!(paged.len(), everything.len());
}
