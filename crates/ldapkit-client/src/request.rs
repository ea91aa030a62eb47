//! Client requests.
//!
//! Requests are immutable values once built. Equality and hashing cover
//! every field including controls, so a request can key the
//! [`ResultCache`](crate::ResultCache).

use std::sync::Arc;

use bytes::Bytes;
use ldap_protocol::message::{
    self, DerefAliases, Modification, ModifyOperation, PartialAttribute, SearchScope,
};
use ldap_protocol::{Control, Filter};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

// RFC 4512 attribute description: descr or numericoid, then options.
static ATTRIBUTE_DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z][A-Za-z0-9-]*|[0-9]+(?:\.[0-9]+)*)(?:;[A-Za-z0-9-]+)*$")
        .unwrap_or_else(|_| unreachable!("static pattern compiles"))
});

/// Whether `name` is a valid attribute selector for a search.
///
/// Accepts attribute descriptions plus the special selectors `*`, `+` and
/// `1.1`.
pub fn is_valid_attribute(name: &str) -> bool {
    matches!(name, "*" | "+" | "1.1") || ATTRIBUTE_DESCRIPTION.is_match(name)
}

/// A search request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchRequest {
    /// Search base DN.
    pub base_dn: String,
    /// Search filter.
    pub filter: Filter,
    /// Search scope (default: whole subtree).
    pub scope: SearchScope,
    /// Alias dereferencing (default: never).
    pub deref_aliases: DerefAliases,
    /// Attributes to return. Empty returns all user attributes.
    pub attributes: Vec<String>,
    /// Maximum number of entries, zero for no limit.
    pub size_limit: i32,
    /// Maximum seconds the server should spend, zero for no limit.
    pub time_limit: i32,
    /// Return attribute names without values.
    pub types_only: bool,
    /// Request controls.
    pub controls: Vec<Arc<dyn Control>>,
}

impl SearchRequest {
    /// Create a search request, parsing `filter` as an RFC 4515 string.
    pub fn new(base_dn: impl Into<String>, filter: &str) -> Result<Self> {
        Ok(Self::with_filter(base_dn, Filter::parse(filter)?))
    }

    /// Create a search request with an already built filter.
    pub fn with_filter(base_dn: impl Into<String>, filter: Filter) -> Self {
        Self {
            base_dn: base_dn.into(),
            filter,
            scope: SearchScope::default(),
            deref_aliases: DerefAliases::default(),
            attributes: Vec::new(),
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            controls: Vec::new(),
        }
    }

    /// A base-object search for the root DSE.
    pub fn root_dse(attributes: &[&str]) -> Self {
        Self::with_filter("", Filter::present("objectClass"))
            .scope(SearchScope::BaseObject)
            .attributes(attributes.iter().copied())
    }

    /// Set the scope.
    #[must_use]
    pub fn scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set alias dereferencing.
    #[must_use]
    pub fn deref_aliases(mut self, deref: DerefAliases) -> Self {
        self.deref_aliases = deref;
        self
    }

    /// Set the attributes to return.
    #[must_use]
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Set the size limit.
    #[must_use]
    pub fn size_limit(mut self, limit: i32) -> Self {
        self.size_limit = limit;
        self
    }

    /// Set the time limit in seconds.
    #[must_use]
    pub fn time_limit(mut self, seconds: i32) -> Self {
        self.time_limit = seconds;
        self
    }

    /// Return attribute names only.
    #[must_use]
    pub fn types_only(mut self, types_only: bool) -> Self {
        self.types_only = types_only;
        self
    }

    /// Set the request controls.
    #[must_use]
    pub fn controls(mut self, controls: Vec<Arc<dyn Control>>) -> Self {
        self.controls = controls;
        self
    }

    /// Add a request control.
    #[must_use]
    pub fn control(mut self, control: impl Control) -> Self {
        self.controls.push(Arc::new(control));
        self
    }

    /// Check limits and attribute names before sending.
    pub fn validate(&self) -> Result<()> {
        if self.size_limit < 0 {
            return Err(Error::InvalidRequest(format!(
                "negative size limit: {}",
                self.size_limit
            )));
        }
        if self.time_limit < 0 {
            return Err(Error::InvalidRequest(format!(
                "negative time limit: {}",
                self.time_limit
            )));
        }
        if let Some(bad) = self.attributes.iter().find(|a| !is_valid_attribute(a)) {
            return Err(Error::InvalidRequest(format!("invalid attribute: {bad}")));
        }
        Ok(())
    }

    pub(crate) fn to_protocol(&self) -> message::SearchRequest {
        message::SearchRequest {
            base_dn: self.base_dn.clone(),
            scope: self.scope,
            deref_aliases: self.deref_aliases,
            size_limit: self.size_limit,
            time_limit: self.time_limit,
            types_only: self.types_only,
            filter: self.filter.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

/// A compare request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompareRequest {
    /// Entry DN.
    pub dn: String,
    /// Attribute description.
    pub attribute: String,
    /// Assertion value.
    pub value: Bytes,
    /// Request controls.
    pub controls: Vec<Arc<dyn Control>>,
}

impl CompareRequest {
    /// Create a compare request.
    pub fn new(dn: impl Into<String>, attribute: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            dn: dn.into(),
            attribute: attribute.into(),
            value: value.into(),
            controls: Vec::new(),
        }
    }

    /// Add a request control.
    #[must_use]
    pub fn control(mut self, control: impl Control) -> Self {
        self.controls.push(Arc::new(control));
        self
    }
}

/// An add request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddRequest {
    /// DN of the new entry.
    pub dn: String,
    /// Attributes of the new entry.
    pub attributes: Vec<PartialAttribute>,
    /// Request controls.
    pub controls: Vec<Arc<dyn Control>>,
}

impl AddRequest {
    /// Create an add request.
    pub fn new(dn: impl Into<String>, attributes: Vec<PartialAttribute>) -> Self {
        Self {
            dn: dn.into(),
            attributes,
            controls: Vec::new(),
        }
    }
}

/// A modify request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModifyRequest {
    /// Entry DN.
    pub dn: String,
    /// Changes, applied in order.
    pub changes: Vec<Modification>,
    /// Request controls.
    pub controls: Vec<Arc<dyn Control>>,
}

impl ModifyRequest {
    /// Create an empty modify request.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            changes: Vec::new(),
            controls: Vec::new(),
        }
    }

    /// Append a change.
    #[must_use]
    pub fn change(mut self, operation: ModifyOperation, attribute: PartialAttribute) -> Self {
        self.changes.push(Modification {
            operation,
            attribute,
        });
        self
    }
}

/// A delete request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeleteRequest {
    /// Entry DN.
    pub dn: String,
    /// Request controls.
    pub controls: Vec<Arc<dyn Control>>,
}

impl DeleteRequest {
    /// Create a delete request.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            controls: Vec::new(),
        }
    }
}

/// An extended operation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtendedRequest {
    /// Request OID.
    pub name: String,
    /// Request value.
    pub value: Option<Bytes>,
    /// Request controls.
    pub controls: Vec<Arc<dyn Control>>,
}

impl ExtendedRequest {
    /// Create an extended request.
    pub fn new(name: impl Into<String>, value: Option<Bytes>) -> Self {
        Self {
            name: name.into(),
            value,
            controls: Vec::new(),
        }
    }
}

/// A simple bind request.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BindRequest {
    /// Bind DN.
    pub dn: String,
    /// Password.
    pub password: Bytes,
    /// Request controls.
    pub controls: Vec<Arc<dyn Control>>,
}

impl BindRequest {
    /// Create a simple bind request.
    pub fn new(dn: impl Into<String>, password: impl Into<Bytes>) -> Self {
        Self {
            dn: dn.into(),
            password: password.into(),
            controls: Vec::new(),
        }
    }

    /// Set the request controls.
    #[must_use]
    pub fn controls(mut self, controls: Vec<Arc<dyn Control>>) -> Self {
        self.controls = controls;
        self
    }
}

impl std::fmt::Debug for BindRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindRequest")
            .field("dn", &self.dn)
            .field("password", &"[REDACTED]")
            .field("controls", &self.controls)
            .finish()
    }
}

/// Any request a [`Connection`](crate::Connection) can execute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Request {
    /// Search.
    Search(SearchRequest),
    /// Compare.
    Compare(CompareRequest),
    /// Add.
    Add(AddRequest),
    /// Modify.
    Modify(ModifyRequest),
    /// Delete.
    Delete(DeleteRequest),
    /// Extended operation.
    Extended(ExtendedRequest),
    /// Simple bind.
    Bind(BindRequest),
}

impl Request {
    /// Operation name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Search(_) => "search",
            Self::Compare(_) => "compare",
            Self::Add(_) => "add",
            Self::Modify(_) => "modify",
            Self::Delete(_) => "delete",
            Self::Extended(_) => "extended",
            Self::Bind(_) => "bind",
        }
    }
}

macro_rules! impl_from_request {
    ($($variant:ident($ty:ty)),*) => {
        $(impl From<$ty> for Request {
            fn from(r: $ty) -> Self {
                Self::$variant(r)
            }
        })*
    };
}

impl_from_request!(
    Search(SearchRequest),
    Compare(CompareRequest),
    Add(AddRequest),
    Modify(ModifyRequest),
    Delete(DeleteRequest),
    Extended(ExtendedRequest),
    Bind(BindRequest)
);
