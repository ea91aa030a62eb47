//! Request and response controls (RFC 4511 §4.1.11).
//!
//! A control travels on the wire as [`RawControl`]: an OID, a criticality
//! flag and an optional opaque value. Typed controls implement
//! [`ControlCodec`] and are handled as `Arc<dyn Control>` by everything above
//! this crate. The [`ControlRegistry`](crate::ControlRegistry) maps one to the
//! other.
//!
//! `dyn Control` has content-based equality and hashing, so requests carrying
//! controls can be used as cache keys.

pub mod manage_dsa_it;
pub mod paged;
pub mod ppolicy;
pub mod registry;
pub mod sort;

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;

use crate::ber::{BerReader, BerWriter, tag, utf8};
use crate::error::ProtocolError;

pub use manage_dsa_it::ManageDsaItControl;
pub use paged::PagedResultsControl;
pub use ppolicy::{PasswordPolicyControl, PasswordPolicyError};
pub use sort::{SortKey, SortRequestControl, SortResponseControl};

/// Well-known control OIDs.
pub mod oid {
    /// Simple paged results (RFC 2696).
    pub const PAGED_RESULTS: &str = "1.2.840.113556.1.4.319";
    /// Password policy (draft-behera-ldap-password-policy).
    pub const PASSWORD_POLICY: &str = "1.3.6.1.4.1.42.2.27.8.5.1";
    /// Server-side sort request (RFC 2891).
    pub const SORT_REQUEST: &str = "1.2.840.113556.1.4.473";
    /// Server-side sort response (RFC 2891).
    pub const SORT_RESPONSE: &str = "1.2.840.113556.1.4.474";
    /// ManageDsaIT (RFC 3296).
    pub const MANAGE_DSA_IT: &str = "2.16.840.1.113730.3.4.2";
}

/// A control as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawControl {
    /// Control type OID.
    pub oid: String,
    /// Criticality flag.
    pub critical: bool,
    /// Encoded control value, if any.
    pub value: Option<Bytes>,
}

impl RawControl {
    /// Create a raw control.
    pub fn new(oid: impl Into<String>, critical: bool, value: Option<Bytes>) -> Self {
        Self {
            oid: oid.into(),
            critical,
            value,
        }
    }

    /// Encode as a `Control` SEQUENCE.
    pub fn encode(&self, w: &mut BerWriter) {
        w.write_sequence(|seq| {
            seq.write_octet_string(self.oid.as_bytes());
            // criticality is DEFAULT FALSE
            if self.critical {
                seq.write_boolean(true);
            }
            if let Some(value) = &self.value {
                seq.write_octet_string(value);
            }
        });
    }

    /// Decode a `Control` SEQUENCE.
    pub fn decode(r: &mut BerReader<'_>) -> Result<Self, ProtocolError> {
        let mut seq = r.read_sequence()?;
        let oid = utf8(seq.read_octet_string()?, "control type")?;
        let critical = match seq.peek_tag() {
            Some(tag::BOOLEAN) => seq.read_boolean()?,
            _ => false,
        };
        let value = seq
            .read_optional(tag::OCTET_STRING)?
            .map(Bytes::copy_from_slice);
        seq.finish("control")?;
        Ok(Self {
            oid,
            critical,
            value,
        })
    }
}

/// Implemented by concrete control types.
///
/// Types implementing this get [`Control`] for free.
pub trait ControlValue: fmt::Debug + PartialEq + Eq + Hash + Send + Sync + 'static {
    /// Control type OID.
    const OID: &'static str;

    /// Criticality flag of this instance.
    fn criticality(&self) -> bool;
}

/// Wire encoding of a control value.
///
/// The same type can serve as a request control, a response control, or
/// both, depending on how it is registered.
pub trait ControlCodec: ControlValue + Sized {
    /// Encode the control value. `None` means the control has no value.
    fn encode_value(&self) -> Result<Option<Bytes>, ProtocolError>;

    /// Decode a control value received on the wire.
    ///
    /// `request` is the request control with the same OID, when the
    /// originating request carried one.
    fn decode_value(
        critical: bool,
        value: Option<&[u8]>,
        request: Option<&dyn Control>,
    ) -> Result<Self, ProtocolError>;
}

/// Object-safe view of a control.
pub trait Control: fmt::Debug + Send + Sync + 'static {
    /// Control type OID.
    fn oid(&self) -> &str;

    /// Criticality flag.
    fn critical(&self) -> bool;

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Content equality with another control.
    fn dyn_eq(&self, other: &dyn Control) -> bool;

    /// Feed the concrete type and content into `state`.
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T: ControlValue> Control for T {
    fn oid(&self) -> &str {
        T::OID
    }

    fn critical(&self) -> bool {
        self.criticality()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn Control) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

impl<'a> dyn Control + 'a {
    /// Downcast to a concrete control type.
    pub fn downcast_ref<T: Control>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for dyn Control {
    fn eq(&self, other: &Self) -> bool {
        self.dyn_eq(other)
    }
}

impl Eq for dyn Control {}

impl Hash for dyn Control {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dyn_hash(state);
    }
}

/// Find the first control of type `T` in `controls`.
pub fn find<T: Control>(controls: &[std::sync::Arc<dyn Control>]) -> Option<&T> {
    controls.iter().find_map(|c| c.downcast_ref::<T>())
}
