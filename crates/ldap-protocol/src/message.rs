//! LDAPMessage envelope and protocol operations (RFC 4511 §4).

use bytes::{Bytes, BytesMut};

use crate::ber::{BerReader, BerWriter, decode_integer, tag, utf8};
use crate::control::RawControl;
use crate::error::ProtocolError;
use crate::filter::Filter;

/// Message identifier. Zero is reserved for unsolicited notifications.
pub type MessageId = i32;

/// OID of the StartTLS extended operation.
pub const START_TLS_OID: &str = "1.3.6.1.4.1.1466.20037";
/// OID of the Notice of Disconnection unsolicited notification.
pub const NOTICE_OF_DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";
/// OID of the "Who am I?" extended operation (RFC 4532).
pub const WHO_AM_I_OID: &str = "1.3.6.1.4.1.4203.1.11.3";

/// Protocol operation tags.
pub mod op_tag {
    use crate::ber::tag;

    /// BindRequest.
    pub const BIND_REQUEST: u8 = tag::application_constructed(0);
    /// BindResponse.
    pub const BIND_RESPONSE: u8 = tag::application_constructed(1);
    /// UnbindRequest.
    pub const UNBIND_REQUEST: u8 = tag::application(2);
    /// SearchRequest.
    pub const SEARCH_REQUEST: u8 = tag::application_constructed(3);
    /// SearchResultEntry.
    pub const SEARCH_RESULT_ENTRY: u8 = tag::application_constructed(4);
    /// SearchResultDone.
    pub const SEARCH_RESULT_DONE: u8 = tag::application_constructed(5);
    /// ModifyRequest.
    pub const MODIFY_REQUEST: u8 = tag::application_constructed(6);
    /// ModifyResponse.
    pub const MODIFY_RESPONSE: u8 = tag::application_constructed(7);
    /// AddRequest.
    pub const ADD_REQUEST: u8 = tag::application_constructed(8);
    /// AddResponse.
    pub const ADD_RESPONSE: u8 = tag::application_constructed(9);
    /// DelRequest.
    pub const DELETE_REQUEST: u8 = tag::application(10);
    /// DelResponse.
    pub const DELETE_RESPONSE: u8 = tag::application_constructed(11);
    /// CompareRequest.
    pub const COMPARE_REQUEST: u8 = tag::application_constructed(14);
    /// CompareResponse.
    pub const COMPARE_RESPONSE: u8 = tag::application_constructed(15);
    /// AbandonRequest.
    pub const ABANDON_REQUEST: u8 = tag::application(16);
    /// SearchResultReference.
    pub const SEARCH_RESULT_REFERENCE: u8 = tag::application_constructed(19);
    /// ExtendedRequest.
    pub const EXTENDED_REQUEST: u8 = tag::application_constructed(23);
    /// ExtendedResponse.
    pub const EXTENDED_RESPONSE: u8 = tag::application_constructed(24);
}

const CONTROLS: u8 = tag::context_constructed(0);
const REFERRAL: u8 = tag::context_constructed(3);
const SIMPLE_AUTH: u8 = tag::context(0);
const SASL_AUTH: u8 = tag::context_constructed(3);
const SERVER_SASL_CREDS: u8 = tag::context(7);
const EXTENDED_REQUEST_NAME: u8 = tag::context(0);
const EXTENDED_REQUEST_VALUE: u8 = tag::context(1);
const EXTENDED_RESPONSE_NAME: u8 = tag::context(10);
const EXTENDED_RESPONSE_VALUE: u8 = tag::context(11);

macro_rules! result_codes {
    ($($(#[$doc:meta])* $name:ident = $value:literal,)*) => {
        /// LDAP result codes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum ResultCode {
            $($(#[$doc])* $name,)*
            /// A code not known to this crate.
            Unknown(i32),
        }

        impl ResultCode {
            /// Create from the wire value.
            pub fn from_code(code: i32) -> Self {
                match code {
                    $($value => Self::$name,)*
                    other => Self::Unknown(other),
                }
            }

            /// Wire value.
            pub fn code(self) -> i32 {
                match self {
                    $(Self::$name => $value,)*
                    Self::Unknown(code) => code,
                }
            }
        }
    };
}

result_codes! {
    /// success
    Success = 0,
    /// operationsError
    OperationsError = 1,
    /// protocolError
    ProtocolError = 2,
    /// timeLimitExceeded
    TimeLimitExceeded = 3,
    /// sizeLimitExceeded
    SizeLimitExceeded = 4,
    /// compareFalse
    CompareFalse = 5,
    /// compareTrue
    CompareTrue = 6,
    /// authMethodNotSupported
    AuthMethodNotSupported = 7,
    /// strongerAuthRequired
    StrongerAuthRequired = 8,
    /// referral
    Referral = 10,
    /// adminLimitExceeded
    AdminLimitExceeded = 11,
    /// unavailableCriticalExtension
    UnavailableCriticalExtension = 12,
    /// confidentialityRequired
    ConfidentialityRequired = 13,
    /// saslBindInProgress
    SaslBindInProgress = 14,
    /// noSuchAttribute
    NoSuchAttribute = 16,
    /// undefinedAttributeType
    UndefinedAttributeType = 17,
    /// inappropriateMatching
    InappropriateMatching = 18,
    /// constraintViolation
    ConstraintViolation = 19,
    /// attributeOrValueExists
    AttributeOrValueExists = 20,
    /// invalidAttributeSyntax
    InvalidAttributeSyntax = 21,
    /// noSuchObject
    NoSuchObject = 32,
    /// aliasProblem
    AliasProblem = 33,
    /// invalidDNSyntax
    InvalidDnSyntax = 34,
    /// aliasDereferencingProblem
    AliasDereferencingProblem = 36,
    /// inappropriateAuthentication
    InappropriateAuthentication = 48,
    /// invalidCredentials
    InvalidCredentials = 49,
    /// insufficientAccessRights
    InsufficientAccessRights = 50,
    /// busy
    Busy = 51,
    /// unavailable
    Unavailable = 52,
    /// unwillingToPerform
    UnwillingToPerform = 53,
    /// loopDetect
    LoopDetect = 54,
    /// namingViolation
    NamingViolation = 64,
    /// objectClassViolation
    ObjectClassViolation = 65,
    /// notAllowedOnNonLeaf
    NotAllowedOnNonLeaf = 66,
    /// notAllowedOnRDN
    NotAllowedOnRdn = 67,
    /// entryAlreadyExists
    EntryAlreadyExists = 68,
    /// objectClassModsProhibited
    ObjectClassModsProhibited = 69,
    /// affectsMultipleDSAs
    AffectsMultipleDsas = 71,
    /// other
    Other = 80,
    /// canceled (RFC 3909)
    Canceled = 118,
    /// noSuchOperation (RFC 3909)
    NoSuchOperation = 119,
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown({code})"),
            other => write!(f, "{other:?}({})", other.code()),
        }
    }
}

/// The LDAPResult structure shared by most responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LdapResult {
    /// Result code.
    pub code: ResultCode,
    /// Matched DN, possibly empty.
    pub matched_dn: String,
    /// Diagnostic message, possibly empty.
    pub diagnostic_message: String,
    /// Referral URIs.
    pub referrals: Vec<String>,
}

impl LdapResult {
    /// A successful result.
    pub fn success() -> Self {
        Self::new(ResultCode::Success, "")
    }

    /// A result with the given code and diagnostic message.
    pub fn new(code: ResultCode, diagnostic_message: impl Into<String>) -> Self {
        Self {
            code,
            matched_dn: String::new(),
            diagnostic_message: diagnostic_message.into(),
            referrals: Vec::new(),
        }
    }

    /// Whether the code is `success`.
    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }

    fn encode_fields(&self, w: &mut BerWriter) {
        w.write_enumerated(i64::from(self.code.code()));
        w.write_octet_string(self.matched_dn.as_bytes());
        w.write_octet_string(self.diagnostic_message.as_bytes());
        if !self.referrals.is_empty() {
            w.write_constructed(REFERRAL, |refs| {
                for r in &self.referrals {
                    refs.write_octet_string(r.as_bytes());
                }
            });
        }
    }

    fn decode_fields(r: &mut BerReader<'_>) -> Result<Self, ProtocolError> {
        let code = r.read_enumerated()?;
        let code = i32::try_from(code).map_err(|_| ProtocolError::InvalidField {
            field: "result code",
            value: code,
        })?;
        let matched_dn = r.read_string("matched DN")?;
        let diagnostic_message = r.read_string("diagnostic message")?;
        let mut referrals = Vec::new();
        if let Some(content) = r.read_optional(REFERRAL)? {
            let mut refs = BerReader::new(content);
            while !refs.is_empty() {
                referrals.push(refs.read_string("referral")?);
            }
        }
        Ok(Self {
            code: ResultCode::from_code(code),
            matched_dn,
            diagnostic_message,
            referrals,
        })
    }
}

/// Bind authentication choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAuthentication {
    /// Simple bind with a password.
    Simple(Bytes),
    /// SASL bind step.
    Sasl {
        /// Mechanism name.
        mechanism: String,
        /// Client credentials for this step.
        credentials: Option<Bytes>,
    },
}

/// BindRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    /// Protocol version, always 3.
    pub version: u8,
    /// Bind DN, empty for anonymous or most SASL binds.
    pub name: String,
    /// Authentication choice.
    pub authentication: BindAuthentication,
}

impl BindRequest {
    /// Simple bind request.
    pub fn simple(name: impl Into<String>, password: impl Into<Bytes>) -> Self {
        Self {
            version: 3,
            name: name.into(),
            authentication: BindAuthentication::Simple(password.into()),
        }
    }

    /// SASL bind request.
    pub fn sasl(mechanism: impl Into<String>, credentials: Option<Bytes>) -> Self {
        Self {
            version: 3,
            name: String::new(),
            authentication: BindAuthentication::Sasl {
                mechanism: mechanism.into(),
                credentials,
            },
        }
    }
}

/// BindResponse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindResponse {
    /// Result.
    pub result: LdapResult,
    /// SASL server challenge or final data.
    pub server_sasl_credentials: Option<Bytes>,
}

/// Search scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SearchScope {
    /// Only the base entry.
    BaseObject,
    /// Immediate children of the base.
    SingleLevel,
    /// The base and all descendants.
    #[default]
    WholeSubtree,
}

impl SearchScope {
    /// Create from the wire value.
    pub fn from_i64(value: i64) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::BaseObject),
            1 => Ok(Self::SingleLevel),
            2 => Ok(Self::WholeSubtree),
            _ => Err(ProtocolError::InvalidField {
                field: "search scope",
                value,
            }),
        }
    }

    /// Wire value.
    pub fn code(self) -> i64 {
        match self {
            Self::BaseObject => 0,
            Self::SingleLevel => 1,
            Self::WholeSubtree => 2,
        }
    }
}

/// Alias dereferencing policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DerefAliases {
    /// Never dereference.
    #[default]
    Never,
    /// Dereference while searching below the base.
    InSearching,
    /// Dereference when locating the base.
    FindingBaseObject,
    /// Always dereference.
    Always,
}

impl DerefAliases {
    /// Create from the wire value.
    pub fn from_i64(value: i64) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Never),
            1 => Ok(Self::InSearching),
            2 => Ok(Self::FindingBaseObject),
            3 => Ok(Self::Always),
            _ => Err(ProtocolError::InvalidField {
                field: "deref aliases",
                value,
            }),
        }
    }

    /// Wire value.
    pub fn code(self) -> i64 {
        match self {
            Self::Never => 0,
            Self::InSearching => 1,
            Self::FindingBaseObject => 2,
            Self::Always => 3,
        }
    }
}

/// SearchRequest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchRequest {
    /// Search base DN.
    pub base_dn: String,
    /// Scope.
    pub scope: SearchScope,
    /// Alias dereferencing.
    pub deref_aliases: DerefAliases,
    /// Maximum entries, zero for no client limit.
    pub size_limit: i32,
    /// Maximum seconds, zero for no client limit.
    pub time_limit: i32,
    /// Return attribute names only.
    pub types_only: bool,
    /// Filter.
    pub filter: Filter,
    /// Requested attributes. Empty means all user attributes.
    pub attributes: Vec<String>,
}

/// An attribute with its values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartialAttribute {
    /// Attribute description.
    pub name: String,
    /// Values.
    pub values: Vec<Bytes>,
}

impl PartialAttribute {
    /// Create an attribute from string values.
    pub fn new<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bytes>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Values that are valid UTF-8.
    pub fn string_values(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .filter_map(|v| std::str::from_utf8(v).ok())
    }

    fn encode(&self, w: &mut BerWriter) {
        w.write_sequence(|seq| {
            seq.write_octet_string(self.name.as_bytes());
            seq.write_constructed(tag::SET, |set| {
                for v in &self.values {
                    set.write_octet_string(v);
                }
            });
        });
    }

    fn decode(r: &mut BerReader<'_>) -> Result<Self, ProtocolError> {
        let mut seq = r.read_sequence()?;
        let name = seq.read_string("attribute description")?;
        let mut set = seq.read_constructed(tag::SET)?;
        let mut values = Vec::new();
        while !set.is_empty() {
            values.push(Bytes::copy_from_slice(set.read_octet_string()?));
        }
        seq.finish("attribute")?;
        Ok(Self { name, values })
    }
}

/// SearchResultEntry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchResultEntry {
    /// Entry DN.
    pub dn: String,
    /// Returned attributes.
    pub attributes: Vec<PartialAttribute>,
}

impl SearchResultEntry {
    /// Look up an attribute by name, ignoring case.
    pub fn attribute(&self, name: &str) -> Option<&PartialAttribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// First UTF-8 value of the named attribute.
    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.attribute(name)?.string_values().next()
    }
}

/// CompareRequest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompareRequest {
    /// Entry DN.
    pub dn: String,
    /// Attribute description.
    pub attribute: String,
    /// Assertion value.
    pub value: Bytes,
}

/// AddRequest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddRequest {
    /// New entry DN.
    pub dn: String,
    /// Entry attributes.
    pub attributes: Vec<PartialAttribute>,
}

/// Modification type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModifyOperation {
    /// Add values.
    Add,
    /// Delete values, or the attribute when no values are given.
    Delete,
    /// Replace all values.
    Replace,
}

impl ModifyOperation {
    fn code(self) -> i64 {
        match self {
            Self::Add => 0,
            Self::Delete => 1,
            Self::Replace => 2,
        }
    }

    fn from_i64(value: i64) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Add),
            1 => Ok(Self::Delete),
            2 => Ok(Self::Replace),
            _ => Err(ProtocolError::InvalidField {
                field: "modify operation",
                value,
            }),
        }
    }
}

/// A single change in a ModifyRequest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Modification {
    /// Change type.
    pub operation: ModifyOperation,
    /// Attribute and values.
    pub attribute: PartialAttribute,
}

/// ModifyRequest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModifyRequest {
    /// Entry DN.
    pub dn: String,
    /// Changes, applied in order.
    pub changes: Vec<Modification>,
}

/// ExtendedRequest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtendedRequest {
    /// Request OID.
    pub name: String,
    /// Request value.
    pub value: Option<Bytes>,
}

impl ExtendedRequest {
    /// Create an extended request.
    pub fn new(name: impl Into<String>, value: Option<Bytes>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// ExtendedResponse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtendedResponse {
    /// Result.
    pub result: LdapResult,
    /// Response OID.
    pub name: Option<String>,
    /// Response value.
    pub value: Option<Bytes>,
}

/// The protocolOp CHOICE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOp {
    /// BindRequest.
    BindRequest(BindRequest),
    /// BindResponse.
    BindResponse(BindResponse),
    /// UnbindRequest.
    UnbindRequest,
    /// SearchRequest.
    SearchRequest(SearchRequest),
    /// SearchResultEntry.
    SearchResultEntry(SearchResultEntry),
    /// SearchResultDone.
    SearchResultDone(LdapResult),
    /// SearchResultReference.
    SearchResultReference(Vec<String>),
    /// ModifyRequest.
    ModifyRequest(ModifyRequest),
    /// ModifyResponse.
    ModifyResponse(LdapResult),
    /// AddRequest.
    AddRequest(AddRequest),
    /// AddResponse.
    AddResponse(LdapResult),
    /// DelRequest.
    DeleteRequest(String),
    /// DelResponse.
    DeleteResponse(LdapResult),
    /// CompareRequest.
    CompareRequest(CompareRequest),
    /// CompareResponse.
    CompareResponse(LdapResult),
    /// AbandonRequest.
    AbandonRequest(MessageId),
    /// ExtendedRequest.
    ExtendedRequest(ExtendedRequest),
    /// ExtendedResponse.
    ExtendedResponse(ExtendedResponse),
}

impl ProtocolOp {
    /// Protocol name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BindRequest(_) => "bindRequest",
            Self::BindResponse(_) => "bindResponse",
            Self::UnbindRequest => "unbindRequest",
            Self::SearchRequest(_) => "searchRequest",
            Self::SearchResultEntry(_) => "searchResEntry",
            Self::SearchResultDone(_) => "searchResDone",
            Self::SearchResultReference(_) => "searchResRef",
            Self::ModifyRequest(_) => "modifyRequest",
            Self::ModifyResponse(_) => "modifyResponse",
            Self::AddRequest(_) => "addRequest",
            Self::AddResponse(_) => "addResponse",
            Self::DeleteRequest(_) => "delRequest",
            Self::DeleteResponse(_) => "delResponse",
            Self::CompareRequest(_) => "compareRequest",
            Self::CompareResponse(_) => "compareResponse",
            Self::AbandonRequest(_) => "abandonRequest",
            Self::ExtendedRequest(_) => "extendedReq",
            Self::ExtendedResponse(_) => "extendedResp",
        }
    }

    /// The LDAPResult of a response operation.
    pub fn result(&self) -> Option<&LdapResult> {
        match self {
            Self::BindResponse(r) => Some(&r.result),
            Self::ExtendedResponse(r) => Some(&r.result),
            Self::SearchResultDone(r)
            | Self::ModifyResponse(r)
            | Self::AddResponse(r)
            | Self::DeleteResponse(r)
            | Self::CompareResponse(r) => Some(r),
            _ => None,
        }
    }

    fn encode(&self, w: &mut BerWriter) {
        match self {
            Self::BindRequest(req) => w.write_constructed(op_tag::BIND_REQUEST, |op| {
                op.write_integer(i64::from(req.version));
                op.write_octet_string(req.name.as_bytes());
                match &req.authentication {
                    BindAuthentication::Simple(password) => op.write_tlv(SIMPLE_AUTH, password),
                    BindAuthentication::Sasl {
                        mechanism,
                        credentials,
                    } => op.write_constructed(SASL_AUTH, |sasl| {
                        sasl.write_octet_string(mechanism.as_bytes());
                        if let Some(credentials) = credentials {
                            sasl.write_octet_string(credentials);
                        }
                    }),
                }
            }),
            Self::BindResponse(resp) => w.write_constructed(op_tag::BIND_RESPONSE, |op| {
                resp.result.encode_fields(op);
                if let Some(creds) = &resp.server_sasl_credentials {
                    op.write_tlv(SERVER_SASL_CREDS, creds);
                }
            }),
            Self::UnbindRequest => w.write_null(op_tag::UNBIND_REQUEST),
            Self::SearchRequest(req) => w.write_constructed(op_tag::SEARCH_REQUEST, |op| {
                op.write_octet_string(req.base_dn.as_bytes());
                op.write_enumerated(req.scope.code());
                op.write_enumerated(req.deref_aliases.code());
                op.write_integer(i64::from(req.size_limit));
                op.write_integer(i64::from(req.time_limit));
                op.write_boolean(req.types_only);
                req.filter.encode(op);
                op.write_sequence(|attrs| {
                    for a in &req.attributes {
                        attrs.write_octet_string(a.as_bytes());
                    }
                });
            }),
            Self::SearchResultEntry(entry) => {
                w.write_constructed(op_tag::SEARCH_RESULT_ENTRY, |op| {
                    op.write_octet_string(entry.dn.as_bytes());
                    op.write_sequence(|attrs| {
                        for a in &entry.attributes {
                            a.encode(attrs);
                        }
                    });
                });
            }
            Self::SearchResultDone(result) => {
                w.write_constructed(op_tag::SEARCH_RESULT_DONE, |op| result.encode_fields(op));
            }
            Self::SearchResultReference(uris) => {
                w.write_constructed(op_tag::SEARCH_RESULT_REFERENCE, |op| {
                    for uri in uris {
                        op.write_octet_string(uri.as_bytes());
                    }
                });
            }
            Self::ModifyRequest(req) => w.write_constructed(op_tag::MODIFY_REQUEST, |op| {
                op.write_octet_string(req.dn.as_bytes());
                op.write_sequence(|changes| {
                    for change in &req.changes {
                        changes.write_sequence(|seq| {
                            seq.write_enumerated(change.operation.code());
                            change.attribute.encode(seq);
                        });
                    }
                });
            }),
            Self::ModifyResponse(result) => {
                w.write_constructed(op_tag::MODIFY_RESPONSE, |op| result.encode_fields(op));
            }
            Self::AddRequest(req) => w.write_constructed(op_tag::ADD_REQUEST, |op| {
                op.write_octet_string(req.dn.as_bytes());
                op.write_sequence(|attrs| {
                    for a in &req.attributes {
                        a.encode(attrs);
                    }
                });
            }),
            Self::AddResponse(result) => {
                w.write_constructed(op_tag::ADD_RESPONSE, |op| result.encode_fields(op));
            }
            Self::DeleteRequest(dn) => w.write_tlv(op_tag::DELETE_REQUEST, dn.as_bytes()),
            Self::DeleteResponse(result) => {
                w.write_constructed(op_tag::DELETE_RESPONSE, |op| result.encode_fields(op));
            }
            Self::CompareRequest(req) => w.write_constructed(op_tag::COMPARE_REQUEST, |op| {
                op.write_octet_string(req.dn.as_bytes());
                op.write_sequence(|ava| {
                    ava.write_octet_string(req.attribute.as_bytes());
                    ava.write_octet_string(&req.value);
                });
            }),
            Self::CompareResponse(result) => {
                w.write_constructed(op_tag::COMPARE_RESPONSE, |op| result.encode_fields(op));
            }
            Self::AbandonRequest(id) => {
                w.write_integer_tagged(op_tag::ABANDON_REQUEST, i64::from(*id));
            }
            Self::ExtendedRequest(req) => w.write_constructed(op_tag::EXTENDED_REQUEST, |op| {
                op.write_tlv(EXTENDED_REQUEST_NAME, req.name.as_bytes());
                if let Some(value) = &req.value {
                    op.write_tlv(EXTENDED_REQUEST_VALUE, value);
                }
            }),
            Self::ExtendedResponse(resp) => {
                w.write_constructed(op_tag::EXTENDED_RESPONSE, |op| {
                    resp.result.encode_fields(op);
                    if let Some(name) = &resp.name {
                        op.write_tlv(EXTENDED_RESPONSE_NAME, name.as_bytes());
                    }
                    if let Some(value) = &resp.value {
                        op.write_tlv(EXTENDED_RESPONSE_VALUE, value);
                    }
                });
            }
        }
    }

    fn decode(tag_byte: u8, content: &[u8]) -> Result<Self, ProtocolError> {
        // primitive operations
        match tag_byte {
            op_tag::UNBIND_REQUEST => return Ok(Self::UnbindRequest),
            op_tag::DELETE_REQUEST => return Ok(Self::DeleteRequest(utf8(content, "entry DN")?)),
            op_tag::ABANDON_REQUEST => {
                let id = decode_integer(content)?;
                return i32::try_from(id).map(Self::AbandonRequest).map_err(|_| {
                    ProtocolError::InvalidField {
                        field: "abandoned message id",
                        value: id,
                    }
                });
            }
            _ => {}
        }

        let mut r = BerReader::new(content);
        let op = match tag_byte {
            op_tag::BIND_REQUEST => {
                let version = r.read_integer()?;
                let version = u8::try_from(version).map_err(|_| ProtocolError::InvalidField {
                    field: "bind version",
                    value: version,
                })?;
                let name = r.read_string("bind DN")?;
                let (auth_tag, auth) = r.read_tlv()?;
                let authentication = match auth_tag {
                    SIMPLE_AUTH => BindAuthentication::Simple(Bytes::copy_from_slice(auth)),
                    SASL_AUTH => {
                        let mut sasl = BerReader::new(auth);
                        let mechanism = sasl.read_string("SASL mechanism")?;
                        let credentials = sasl
                            .read_optional(tag::OCTET_STRING)?
                            .map(Bytes::copy_from_slice);
                        sasl.finish("SASL credentials")?;
                        BindAuthentication::Sasl {
                            mechanism,
                            credentials,
                        }
                    }
                    other => {
                        return Err(ProtocolError::UnexpectedTag {
                            expected: SIMPLE_AUTH,
                            actual: other,
                        });
                    }
                };
                Self::BindRequest(BindRequest {
                    version,
                    name,
                    authentication,
                })
            }
            op_tag::BIND_RESPONSE => {
                let result = LdapResult::decode_fields(&mut r)?;
                let server_sasl_credentials = r
                    .read_optional(SERVER_SASL_CREDS)?
                    .map(Bytes::copy_from_slice);
                Self::BindResponse(BindResponse {
                    result,
                    server_sasl_credentials,
                })
            }
            op_tag::SEARCH_REQUEST => {
                let base_dn = r.read_string("base DN")?;
                let scope = SearchScope::from_i64(r.read_enumerated()?)?;
                let deref_aliases = DerefAliases::from_i64(r.read_enumerated()?)?;
                let size_limit = r.read_i32("size limit")?;
                let time_limit = r.read_i32("time limit")?;
                let types_only = r.read_boolean()?;
                let filter = Filter::decode(&mut r)?;
                let mut attrs = r.read_sequence()?;
                let mut attributes = Vec::new();
                while !attrs.is_empty() {
                    attributes.push(attrs.read_string("attribute selector")?);
                }
                Self::SearchRequest(SearchRequest {
                    base_dn,
                    scope,
                    deref_aliases,
                    size_limit,
                    time_limit,
                    types_only,
                    filter,
                    attributes,
                })
            }
            op_tag::SEARCH_RESULT_ENTRY => {
                let dn = r.read_string("entry DN")?;
                let mut attrs = r.read_sequence()?;
                let mut attributes = Vec::new();
                while !attrs.is_empty() {
                    attributes.push(PartialAttribute::decode(&mut attrs)?);
                }
                Self::SearchResultEntry(SearchResultEntry { dn, attributes })
            }
            op_tag::SEARCH_RESULT_DONE => {
                Self::SearchResultDone(LdapResult::decode_fields(&mut r)?)
            }
            op_tag::SEARCH_RESULT_REFERENCE => {
                let mut uris = Vec::new();
                while !r.is_empty() {
                    uris.push(r.read_string("referral")?);
                }
                Self::SearchResultReference(uris)
            }
            op_tag::MODIFY_REQUEST => {
                let dn = r.read_string("entry DN")?;
                let mut list = r.read_sequence()?;
                let mut changes = Vec::new();
                while !list.is_empty() {
                    let mut seq = list.read_sequence()?;
                    let operation = ModifyOperation::from_i64(seq.read_enumerated()?)?;
                    let attribute = PartialAttribute::decode(&mut seq)?;
                    seq.finish("modification")?;
                    changes.push(Modification {
                        operation,
                        attribute,
                    });
                }
                Self::ModifyRequest(ModifyRequest { dn, changes })
            }
            op_tag::MODIFY_RESPONSE => Self::ModifyResponse(LdapResult::decode_fields(&mut r)?),
            op_tag::ADD_REQUEST => {
                let dn = r.read_string("entry DN")?;
                let mut list = r.read_sequence()?;
                let mut attributes = Vec::new();
                while !list.is_empty() {
                    attributes.push(PartialAttribute::decode(&mut list)?);
                }
                Self::AddRequest(AddRequest { dn, attributes })
            }
            op_tag::ADD_RESPONSE => Self::AddResponse(LdapResult::decode_fields(&mut r)?),
            op_tag::DELETE_RESPONSE => Self::DeleteResponse(LdapResult::decode_fields(&mut r)?),
            op_tag::COMPARE_REQUEST => {
                let dn = r.read_string("entry DN")?;
                let mut ava = r.read_sequence()?;
                let attribute = ava.read_string("attribute description")?;
                let value = Bytes::copy_from_slice(ava.read_octet_string()?);
                ava.finish("attribute value assertion")?;
                Self::CompareRequest(CompareRequest {
                    dn,
                    attribute,
                    value,
                })
            }
            op_tag::COMPARE_RESPONSE => {
                Self::CompareResponse(LdapResult::decode_fields(&mut r)?)
            }
            op_tag::EXTENDED_REQUEST => {
                let name = utf8(r.read_expected(EXTENDED_REQUEST_NAME)?, "request name")?;
                let value = r
                    .read_optional(EXTENDED_REQUEST_VALUE)?
                    .map(Bytes::copy_from_slice);
                Self::ExtendedRequest(ExtendedRequest { name, value })
            }
            op_tag::EXTENDED_RESPONSE => {
                let result = LdapResult::decode_fields(&mut r)?;
                let name = r
                    .read_optional(EXTENDED_RESPONSE_NAME)?
                    .map(|n| utf8(n, "response name"))
                    .transpose()?;
                let value = r
                    .read_optional(EXTENDED_RESPONSE_VALUE)?
                    .map(Bytes::copy_from_slice);
                Self::ExtendedResponse(ExtendedResponse {
                    result,
                    name,
                    value,
                })
            }
            other => return Err(ProtocolError::UnknownOperation(other)),
        };
        r.finish("protocol operation")?;
        Ok(op)
    }
}

/// An LDAPMessage envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapMessage {
    /// Message identifier.
    pub message_id: MessageId,
    /// Operation.
    pub op: ProtocolOp,
    /// Controls attached to the message.
    pub controls: Vec<RawControl>,
}

impl LdapMessage {
    /// Create a message without controls.
    pub fn new(message_id: MessageId, op: ProtocolOp) -> Self {
        Self {
            message_id,
            op,
            controls: Vec::new(),
        }
    }

    /// Attach controls.
    #[must_use]
    pub fn with_controls(mut self, controls: Vec<RawControl>) -> Self {
        self.controls = controls;
        self
    }

    /// Whether this is an unsolicited notification (message id 0).
    pub fn is_unsolicited(&self) -> bool {
        self.message_id == 0
    }

    /// Encode into `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        let mut w = BerWriter::new();
        w.write_sequence(|msg| {
            msg.write_integer(i64::from(self.message_id));
            self.op.encode(msg);
            if !self.controls.is_empty() {
                msg.write_constructed(CONTROLS, |controls| {
                    for c in &self.controls {
                        c.encode(controls);
                    }
                });
            }
        });
        dst.extend_from_slice(w.as_slice());
    }

    /// Encode to a new buffer.
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode_into(&mut dst);
        dst.freeze()
    }

    /// Decode exactly one message from `data`.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut outer = BerReader::new(data);
        let mut r = outer.read_sequence()?;
        outer.finish("LDAPMessage")?;

        let message_id = r.read_i32("message id")?;
        if message_id < 0 {
            return Err(ProtocolError::InvalidField {
                field: "message id",
                value: i64::from(message_id),
            });
        }
        let (tag_byte, content) = r.read_tlv()?;
        let op = ProtocolOp::decode(tag_byte, content)?;

        let mut controls = Vec::new();
        if let Some(content) = r.read_optional(CONTROLS)? {
            let mut list = BerReader::new(content);
            while !list.is_empty() {
                controls.push(RawControl::decode(&mut list)?);
            }
        }
        r.finish("LDAPMessage")?;

        Ok(Self {
            message_id,
            op,
            controls,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn round_trip(message: &LdapMessage) {
        let bytes = message.encode();
        assert_eq!(&LdapMessage::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_simple_bind_encoding() {
        let message = LdapMessage::new(
            1,
            ProtocolOp::BindRequest(BindRequest::simple("cn=admin", "secret")),
        );
        let bytes = message.encode();
        let mut expected = vec![0x30, 0x1A, 0x02, 0x01, 0x01, 0x60, 0x15, 0x02, 0x01, 0x03];
        expected.extend_from_slice(&[0x04, 0x08]);
        expected.extend_from_slice(b"cn=admin");
        expected.extend_from_slice(&[0x80, 0x06]);
        expected.extend_from_slice(b"secret");
        assert_eq!(&bytes[..], &expected[..]);
        round_trip(&message);
    }

    #[test]
    fn test_unbind_and_abandon_encoding() {
        let unbind = LdapMessage::new(3, ProtocolOp::UnbindRequest).encode();
        assert_eq!(&unbind[..], &[0x30, 0x05, 0x02, 0x01, 0x03, 0x42, 0x00]);

        let abandon = LdapMessage::new(4, ProtocolOp::AbandonRequest(2)).encode();
        assert_eq!(
            &abandon[..],
            &[0x30, 0x06, 0x02, 0x01, 0x04, 0x50, 0x01, 0x02]
        );
    }

    #[test]
    fn test_search_request_with_controls() {
        let message = LdapMessage::new(
            7,
            ProtocolOp::SearchRequest(SearchRequest {
                base_dn: "dc=example,dc=com".into(),
                scope: SearchScope::WholeSubtree,
                deref_aliases: DerefAliases::Never,
                size_limit: 0,
                time_limit: 30,
                types_only: false,
                filter: Filter::parse("(&(objectClass=person)(uid=j*))").unwrap(),
                attributes: vec!["cn".into(), "mail".into()],
            }),
        )
        .with_controls(vec![RawControl::new(
            "1.2.840.113556.1.4.319",
            true,
            Some(Bytes::from_static(&[0x30, 0x05, 0x02, 0x01, 0x0A, 0x04, 0x00])),
        )]);
        round_trip(&message);
    }

    #[test]
    fn test_root_dse_search_round_trip() {
        round_trip(&LdapMessage::new(
            1,
            ProtocolOp::SearchRequest(SearchRequest {
                base_dn: String::new(),
                scope: SearchScope::BaseObject,
                deref_aliases: DerefAliases::Never,
                size_limit: 0,
                time_limit: 0,
                types_only: false,
                filter: Filter::present("objectClass"),
                attributes: vec!["namingContexts".into()],
            }),
        ));
    }

    #[test]
    fn test_search_entry_and_done() {
        round_trip(&LdapMessage::new(
            2,
            ProtocolOp::SearchResultEntry(SearchResultEntry {
                dn: "uid=jdoe,ou=people,dc=example,dc=com".into(),
                attributes: vec![
                    PartialAttribute::new("cn", ["John Doe"]),
                    PartialAttribute::new("mail", ["jdoe@example.com", "john@example.com"]),
                ],
            }),
        ));

        let mut result = LdapResult::new(ResultCode::Referral, "see elsewhere");
        result.referrals = vec!["ldap://other.example.com/".into()];
        round_trip(&LdapMessage::new(2, ProtocolOp::SearchResultDone(result)));
    }

    #[test]
    fn test_entry_helpers() {
        let entry = SearchResultEntry {
            dn: "cn=x".into(),
            attributes: vec![PartialAttribute::new("mail", ["a@b"])],
        };
        assert_eq!(entry.first_value("MAIL"), Some("a@b"));
        assert!(entry.attribute("cn").is_none());
    }

    #[test]
    fn test_sasl_bind_round_trip() {
        round_trip(&LdapMessage::new(
            1,
            ProtocolOp::BindRequest(BindRequest::sasl("CRAM-MD5", None)),
        ));
        round_trip(&LdapMessage::new(
            1,
            ProtocolOp::BindResponse(BindResponse {
                result: LdapResult::new(ResultCode::SaslBindInProgress, ""),
                server_sasl_credentials: Some(Bytes::from_static(b"<1.2@host>")),
            }),
        ));
    }

    #[test]
    fn test_write_operations_round_trip() {
        round_trip(&LdapMessage::new(
            5,
            ProtocolOp::AddRequest(AddRequest {
                dn: "cn=new,dc=example".into(),
                attributes: vec![PartialAttribute::new("objectClass", ["top", "person"])],
            }),
        ));
        round_trip(&LdapMessage::new(
            6,
            ProtocolOp::ModifyRequest(ModifyRequest {
                dn: "cn=new,dc=example".into(),
                changes: vec![Modification {
                    operation: ModifyOperation::Replace,
                    attribute: PartialAttribute::new("sn", ["Doe"]),
                }],
            }),
        ));
        round_trip(&LdapMessage::new(
            7,
            ProtocolOp::DeleteRequest("cn=new,dc=example".into()),
        ));
        round_trip(&LdapMessage::new(
            8,
            ProtocolOp::CompareRequest(CompareRequest {
                dn: "cn=new,dc=example".into(),
                attribute: "sn".into(),
                value: Bytes::from_static(b"Doe"),
            }),
        ));
    }

    #[test]
    fn test_extended_round_trip() {
        round_trip(&LdapMessage::new(
            1,
            ProtocolOp::ExtendedRequest(ExtendedRequest::new(START_TLS_OID, None)),
        ));
        round_trip(&LdapMessage::new(
            0,
            ProtocolOp::ExtendedResponse(ExtendedResponse {
                result: LdapResult::new(ResultCode::Unavailable, "shutting down"),
                name: Some(NOTICE_OF_DISCONNECTION_OID.into()),
                value: None,
            }),
        ));
    }

    #[test]
    fn test_unknown_result_code_survives() {
        let result = LdapResult::new(ResultCode::from_code(4096), "");
        assert_eq!(result.code, ResultCode::Unknown(4096));
        round_trip(&LdapMessage::new(1, ProtocolOp::DeleteResponse(result)));
    }

    #[test]
    fn test_rejects_unknown_operation() {
        let bytes = [0x30, 0x05, 0x02, 0x01, 0x01, 0x7F, 0x00];
        assert!(LdapMessage::decode(&bytes).is_err());
        let bytes = [0x30, 0x05, 0x02, 0x01, 0x01, 0x5E, 0x00];
        assert_eq!(
            LdapMessage::decode(&bytes),
            Err(ProtocolError::UnknownOperation(0x5E))
        );
    }

    #[test]
    fn test_rejects_negative_message_id() {
        let bytes = [0x30, 0x05, 0x02, 0x01, 0xFF, 0x42, 0x00];
        assert!(LdapMessage::decode(&bytes).is_err());
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = LdapMessage::new(1, ProtocolOp::UnbindRequest)
            .encode()
            .to_vec();
        bytes.push(0);
        assert!(LdapMessage::decode(&bytes).is_err());
    }
}
