//! Client integration tests against the in-process mock server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use ldap_protocol::message::{ModifyOperation, PartialAttribute};
use ldap_protocol::{PasswordPolicyError, ResultCode};
use ldapkit_client::{
    AddRequest, AsyncRequestRunner, AuthenticationRequest, AuthenticationResultCode, Authenticator,
    CacheConfig, CachingSearcher, CompareRequest, ConnectionConfig, DeleteRequest, Error,
    ModifyRequest, PagedResultsClient, ResultCache, SearchDnResolver, SearchItem, SearchRequest,
    TransportFactory,
};
use ldapkit_testing::{DEFAULT_BASE_DN, MockLdapServer};

fn factory(server: &MockLdapServer) -> TransportFactory {
    TransportFactory::new(ConnectionConfig::new(&server.url()).unwrap()).unwrap()
}

async fn server_with_users(count: usize) -> MockLdapServer {
    let mut builder = MockLdapServer::builder();
    for i in 0..count {
        builder = builder.user(&format!("user{i}"), "secret");
    }
    builder.start().await.unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_search_scopes_and_attribute_selection() {
    let server = server_with_users(3).await;
    let mut conn = factory(&server).connect().await.unwrap();

    let people = SearchRequest::new(DEFAULT_BASE_DN, "(objectClass=inetOrgPerson)")
        .unwrap()
        .attributes(["mail"]);
    let result = conn.search(&people).await.unwrap();
    assert_eq!(result.len(), 3);
    for entry in &result.entries {
        assert_eq!(entry.attributes.len(), 1);
        assert!(entry.first_value("mail").unwrap().ends_with("@example.com"));
    }

    let children = SearchRequest::new(DEFAULT_BASE_DN, "(objectClass=*)")
        .unwrap()
        .scope(ldap_protocol::message::SearchScope::SingleLevel);
    let result = conn.search(&children).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.entries[0].dn, format!("ou=people,{DEFAULT_BASE_DN}"));

    let limited = SearchRequest::new(DEFAULT_BASE_DN, "(uid=user*)")
        .unwrap()
        .size_limit(2);
    let err = conn.search(&limited).await.unwrap_err();
    assert_eq!(err.result_code(), Some(ResultCode::SizeLimitExceeded));

    conn.close().await;
    wait_until(|| server.unbinds() == 1).await;
}

#[tokio::test]
async fn test_write_operations() {
    let server = MockLdapServer::start().await.unwrap();
    let mut conn = factory(&server).connect().await.unwrap();
    let dn = format!("cn=printer,{DEFAULT_BASE_DN}");

    conn.add(&AddRequest::new(
        dn.clone(),
        vec![
            PartialAttribute::new("objectClass", ["device"]),
            PartialAttribute::new("cn", ["printer"]),
            PartialAttribute::new("l", ["floor 1"]),
        ],
    ))
    .await
    .unwrap();

    let duplicate = conn
        .add(&AddRequest::new(dn.clone(), Vec::new()))
        .await
        .unwrap_err();
    assert_eq!(duplicate.result_code(), Some(ResultCode::EntryAlreadyExists));

    let same = conn
        .compare(&CompareRequest::new(dn.clone(), "l", "FLOOR 1"))
        .await
        .unwrap();
    assert!(same.matched);

    conn.modify(
        &ModifyRequest::new(dn.clone())
            .change(ModifyOperation::Replace, PartialAttribute::new("l", ["floor 2"])),
    )
    .await
    .unwrap();
    assert_eq!(server.entry(&dn).unwrap().first_value("l"), Some("floor 2"));

    let moved = conn
        .compare(&CompareRequest::new(dn.clone(), "l", "floor 1"))
        .await
        .unwrap();
    assert!(!moved.matched);

    conn.delete(&DeleteRequest::new(dn.clone())).await.unwrap();
    assert!(server.entry(&dn).is_none());
    let missing = conn.delete(&DeleteRequest::new(dn)).await.unwrap_err();
    assert_eq!(missing.result_code(), Some(ResultCode::NoSuchObject));
}

#[tokio::test]
async fn test_paged_search_collects_every_page() {
    let server = server_with_users(7).await;
    let mut conn = factory(&server).connect().await.unwrap();

    let request = SearchRequest::new(DEFAULT_BASE_DN, "(uid=*)").unwrap();
    let mut pager = PagedResultsClient::new(3);

    let first = pager.execute(&mut conn, &request).await.unwrap();
    assert_eq!(first.len(), 3);
    assert!(pager.has_more());

    let all = PagedResultsClient::new(3)
        .execute_to_completion(&mut conn, &request)
        .await
        .unwrap();
    assert_eq!(all.len(), 7);

    // one first page, then three pages for the full run
    assert_eq!(server.searches().len(), 4);
}

#[tokio::test]
async fn test_async_search_can_be_abandoned() {
    let server = MockLdapServer::builder()
        .user("a", "pw")
        .user("b", "pw")
        .user("c", "pw")
        .user("d", "pw")
        .search_delay(Duration::from_millis(100))
        .start()
        .await
        .unwrap();
    let runner = AsyncRequestRunner::new(Arc::new(factory(&server)));

    let mut search = runner.execute(SearchRequest::new(DEFAULT_BASE_DN, "(uid=*)").unwrap());
    let first = search.next_item().await.unwrap().unwrap();
    assert!(matches!(first, SearchItem::Entry(_)));

    search.abandon();
    wait_until(|| server.abandoned().len() == 1).await;
    wait_until(|| runner.active() == 0).await;

    // the stream ends without a final result
    let mut rest = 0;
    while let Some(item) = search.next_item().await {
        assert!(matches!(item.unwrap(), SearchItem::Entry(_)));
        rest += 1;
    }
    assert!(rest < 3);
}

#[tokio::test]
async fn test_async_search_collects_results() {
    let server = server_with_users(2).await;
    let runner = AsyncRequestRunner::new(Arc::new(factory(&server)));

    let search = runner.execute(SearchRequest::new(DEFAULT_BASE_DN, "(uid=user1)").unwrap());
    let result = search.collect().await.unwrap();
    assert_eq!(result.len(), 1);
    assert!(server.abandoned().is_empty());
}

#[tokio::test]
async fn test_caching_searcher_skips_repeat_searches() {
    let server = server_with_users(2).await;
    let cache = ResultCache::from_config(&CacheConfig::default()).unwrap();
    let searcher = CachingSearcher::new(factory(&server), cache);

    let request = SearchRequest::new(DEFAULT_BASE_DN, "(uid=user0)").unwrap();
    let first = searcher.search(&request).await.unwrap();
    let second = searcher.search(&request).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(server.searches().len(), 1);

    let other = SearchRequest::new(DEFAULT_BASE_DN, "(uid=user1)").unwrap();
    searcher.search(&other).await.unwrap();
    assert_eq!(server.searches().len(), 2);
    assert_eq!(searcher.cache().len(), 2);
}

#[tokio::test]
async fn test_authenticator_outcomes() {
    let locked_dn = format!("uid=locked,ou=people,{DEFAULT_BASE_DN}");
    let server = MockLdapServer::builder()
        .user("jdoe", "secret")
        .user("locked", "secret")
        .locked(&locked_dn)
        .start()
        .await
        .unwrap();
    let factory = Arc::new(factory(&server));
    let resolver =
        SearchDnResolver::new(Arc::clone(&factory), DEFAULT_BASE_DN, "(uid={user})").unwrap();
    let authenticator = Authenticator::new(resolver, factory);

    let ok = authenticator
        .authenticate(&AuthenticationRequest::new("jdoe", "secret").return_attributes(["mail"]))
        .await
        .unwrap();
    assert!(ok.is_success());
    assert_eq!(ok.dn.as_deref(), Some("uid=jdoe,ou=people,dc=example,dc=com"));
    assert_eq!(
        ok.entry.unwrap().first_value("mail"),
        Some("jdoe@example.com")
    );

    let wrong = authenticator
        .authenticate(&AuthenticationRequest::new("jdoe", "nope"))
        .await
        .unwrap();
    assert_eq!(wrong.code, AuthenticationResultCode::InvalidCredential);

    let unknown = authenticator
        .authenticate(&AuthenticationRequest::new("nobody", "secret"))
        .await
        .unwrap();
    assert_eq!(unknown.code, AuthenticationResultCode::DnResolutionFailure);
    assert!(unknown.result.is_none());

    let locked = authenticator
        .authenticate(&AuthenticationRequest::new("locked", "secret"))
        .await
        .unwrap();
    assert_eq!(locked.code, AuthenticationResultCode::InvalidCredential);
    assert_eq!(
        locked.password_policy().unwrap().error,
        Some(PasswordPolicyError::AccountLocked)
    );

    let empty = authenticator
        .authenticate(&AuthenticationRequest::new("jdoe", ""))
        .await;
    assert!(matches!(empty, Err(Error::InvalidRequest(_))));
}

#[tokio::test]
async fn test_who_am_i_follows_binds() {
    let server = MockLdapServer::builder()
        .user("jdoe", "secret")
        .start()
        .await
        .unwrap();
    let mut conn = factory(&server).connect().await.unwrap();
    assert_eq!(conn.who_am_i().await.unwrap(), "");

    conn.bind(&ldapkit_client::BindRequest::new(
        "uid=jdoe,ou=people,dc=example,dc=com",
        "secret",
    ))
    .await
    .unwrap();
    assert_eq!(
        conn.who_am_i().await.unwrap(),
        "dn:uid=jdoe,ou=people,dc=example,dc=com"
    );
}

#[tokio::test]
async fn test_notice_of_disconnection_closes_connection() {
    let server = MockLdapServer::start().await.unwrap();
    let mut conn = factory(&server).connect().await.unwrap();
    wait_until(|| server.active_connections() == 1).await;

    server.disconnect_all();
    wait_until(|| server.active_connections() == 0).await;

    let err = conn
        .search(&SearchRequest::root_dse(&["*"]))
        .await
        .unwrap_err();
    assert!(err.is_connection_broken(), "unexpected error: {err}");
    assert!(!conn.is_open());
}
