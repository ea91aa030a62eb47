//! OpenLDAP server in a Docker container.
//!
//! Requires a running Docker daemon. Tests using it should be
//! `#[ignore]`d so the default test run stays hermetic.

use ldapkit_client::{ConnectionConfig, Credentials};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt, TestcontainersError};
use thiserror::Error;

const IMAGE: &str = "osixia/openldap";
const TAG: &str = "1.5.0";
const LDAP_PORT: u16 = 389;

/// Errors starting a container.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContainerError {
    /// Docker or testcontainers failed.
    #[error("container error: {0}")]
    Testcontainers(#[from] TestcontainersError),

    /// The container started but its address is unusable.
    #[error("invalid container address: {0}")]
    Address(#[from] ldapkit_client::Error),
}

/// A running OpenLDAP container for the `example.com` domain.
///
/// The container stops when this value is dropped.
pub struct OpenLdapContainer {
    _container: ContainerAsync<GenericImage>,
    url: String,
    admin_password: String,
}

impl OpenLdapContainer {
    /// Base DN of the directory.
    pub const BASE_DN: &'static str = "dc=example,dc=com";
    /// Administrator DN.
    pub const ADMIN_DN: &'static str = "cn=admin,dc=example,dc=com";

    /// Start a container with the default admin password.
    pub async fn start() -> Result<Self, ContainerError> {
        Self::start_with_password("admin").await
    }

    /// Start a container with the given admin password.
    pub async fn start_with_password(admin_password: &str) -> Result<Self, ContainerError> {
        let container = GenericImage::new(IMAGE, TAG)
            .with_exposed_port(LDAP_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stderr("slapd starting"))
            .with_env_var("LDAP_ORGANISATION", "Example")
            .with_env_var("LDAP_DOMAIN", "example.com")
            .with_env_var("LDAP_ADMIN_PASSWORD", admin_password)
            .with_env_var("LDAP_TLS", "false")
            .start()
            .await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(LDAP_PORT.tcp()).await?;
        let url = format!("ldap://{host}:{port}");
        tracing::info!(url = %url, "OpenLDAP container ready");

        Ok(Self {
            _container: container,
            url,
            admin_password: admin_password.to_string(),
        })
    }

    /// `ldap://` URL of the mapped port.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connection configuration binding as the administrator.
    pub fn admin_config(&self) -> Result<ConnectionConfig, ContainerError> {
        Ok(ConnectionConfig::new(&self.url)?
            .credentials(Credentials::simple(Self::ADMIN_DN, self.admin_password.clone())))
    }
}

impl std::fmt::Debug for OpenLdapContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenLdapContainer")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}
