//! OID-keyed control codec registry.
//!
//! A registry holds at most one request codec and one response codec per
//! OID. It is built once, then shared read-only (usually behind an `Arc`)
//! by every connection that needs it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use super::{
    Control, ControlCodec, ManageDsaItControl, PagedResultsControl, PasswordPolicyControl,
    RawControl, SortRequestControl, SortResponseControl,
};
use crate::error::{ProtocolError, RegistryError};

type EncodeFn = Arc<dyn Fn(&dyn Control) -> Result<Option<Bytes>, ProtocolError> + Send + Sync>;
type DecodeFn = Arc<
    dyn Fn(&RawControl, Option<&dyn Control>) -> Result<Arc<dyn Control>, ProtocolError>
        + Send
        + Sync,
>;

/// Maps control OIDs to their wire codecs.
#[derive(Clone, Default)]
pub struct ControlRegistry {
    request: HashMap<String, EncodeFn>,
    response: HashMap<String, DecodeFn>,
}

impl ControlRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with codecs for the built-in controls.
    ///
    /// Request codecs: paged results, password policy, sort request,
    /// ManageDsaIT. Response codecs: paged results, password policy, sort
    /// response.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.insert_request::<PagedResultsControl>();
        registry.insert_request::<PasswordPolicyControl>();
        registry.insert_request::<SortRequestControl>();
        registry.insert_request::<ManageDsaItControl>();
        registry.insert_response::<PagedResultsControl>();
        registry.insert_response::<PasswordPolicyControl>();
        registry.insert_response::<SortResponseControl>();
        registry
    }

    /// Register an encoder for request controls with the given OID.
    pub fn register_request_codec<F>(
        &mut self,
        oid: impl Into<String>,
        encode: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&dyn Control) -> Result<Option<Bytes>, ProtocolError> + Send + Sync + 'static,
    {
        let oid = oid.into();
        if self.request.contains_key(&oid) {
            return Err(RegistryError::DuplicateCodec {
                oid,
                direction: "request",
            });
        }
        tracing::debug!(oid = %oid, "registered request control codec");
        self.request.insert(oid, Arc::new(encode));
        Ok(())
    }

    /// Register a decoder for response controls with the given OID.
    pub fn register_response_codec<F>(
        &mut self,
        oid: impl Into<String>,
        decode: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&RawControl, Option<&dyn Control>) -> Result<Arc<dyn Control>, ProtocolError>
            + Send
            + Sync
            + 'static,
    {
        let oid = oid.into();
        if self.response.contains_key(&oid) {
            return Err(RegistryError::DuplicateCodec {
                oid,
                direction: "response",
            });
        }
        tracing::debug!(oid = %oid, "registered response control codec");
        self.response.insert(oid, Arc::new(decode));
        Ok(())
    }

    /// Register `C` as a request control.
    pub fn register_request<C: ControlCodec>(&mut self) -> Result<(), RegistryError> {
        self.register_request_codec(C::OID, |control: &dyn Control| {
            control
                .downcast_ref::<C>()
                .ok_or_else(|| {
                    ProtocolError::invalid_control(C::OID, "control type does not match codec")
                })?
                .encode_value()
        })
    }

    /// Register `C` as a response control.
    pub fn register_response<C: ControlCodec>(&mut self) -> Result<(), RegistryError> {
        self.register_response_codec(C::OID, |raw: &RawControl, request: Option<&dyn Control>| {
            let control = C::decode_value(raw.critical, raw.value.as_deref(), request)?;
            Ok(Arc::new(control) as Arc<dyn Control>)
        })
    }

    // Registering into a fresh registry cannot collide.
    fn insert_request<C: ControlCodec>(&mut self) {
        let _ = self.register_request::<C>();
    }

    fn insert_response<C: ControlCodec>(&mut self) {
        let _ = self.register_response::<C>();
    }

    /// Whether a request codec exists for `oid`.
    pub fn supports_request(&self, oid: &str) -> bool {
        self.request.contains_key(oid)
    }

    /// Whether a response codec exists for `oid`.
    pub fn supports_response(&self, oid: &str) -> bool {
        self.response.contains_key(oid)
    }

    /// Encode a single request control.
    pub fn encode(&self, control: &dyn Control) -> Result<RawControl, ProtocolError> {
        let encode =
            self.request
                .get(control.oid())
                .ok_or_else(|| ProtocolError::UnsupportedControl {
                    oid: control.oid().to_string(),
                })?;
        Ok(RawControl::new(
            control.oid(),
            control.critical(),
            encode(control)?,
        ))
    }

    /// Encode request controls to their wire form, preserving order.
    pub fn encode_all(
        &self,
        controls: &[Arc<dyn Control>],
    ) -> Result<Vec<RawControl>, ProtocolError> {
        controls.iter().map(|c| self.encode(c.as_ref())).collect()
    }

    /// Decode a single response control.
    pub fn decode(
        &self,
        raw: &RawControl,
        request: Option<&dyn Control>,
    ) -> Result<Arc<dyn Control>, ProtocolError> {
        let decode = self
            .response
            .get(&raw.oid)
            .ok_or_else(|| ProtocolError::UnsupportedControl {
                oid: raw.oid.clone(),
            })?;
        decode(raw, request)
    }

    /// Decode response controls, pairing each with the request control of
    /// the same OID.
    pub fn decode_all(
        &self,
        request_controls: &[Arc<dyn Control>],
        raw: &[RawControl],
    ) -> Result<Vec<Arc<dyn Control>>, ProtocolError> {
        raw.iter()
            .map(|r| {
                let request = request_controls
                    .iter()
                    .find(|c| c.oid() == r.oid)
                    .map(|c| c.as_ref());
                self.decode(r, request)
            })
            .collect()
    }
}

impl fmt::Debug for ControlRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut request: Vec<_> = self.request.keys().collect();
        let mut response: Vec<_> = self.response.keys().collect();
        request.sort();
        response.sort();
        f.debug_struct("ControlRegistry")
            .field("request", &request)
            .field("response", &response)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::control::{ControlValue, SortKey, find, oid};
    use crate::message::ResultCode;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    #[derive(Debug, PartialEq, Eq, Hash)]
    struct Unknown;

    impl ControlValue for Unknown {
        const OID: &'static str = "1.2.3.4.5";

        fn criticality(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_defaults() {
        let registry = ControlRegistry::with_defaults();
        assert!(registry.supports_request(oid::PAGED_RESULTS));
        assert!(registry.supports_request(oid::PASSWORD_POLICY));
        assert!(registry.supports_request(oid::SORT_REQUEST));
        assert!(registry.supports_request(oid::MANAGE_DSA_IT));
        assert!(registry.supports_response(oid::PAGED_RESULTS));
        assert!(registry.supports_response(oid::PASSWORD_POLICY));
        assert!(registry.supports_response(oid::SORT_RESPONSE));
        assert!(!registry.supports_response(oid::SORT_REQUEST));
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let mut registry = ControlRegistry::with_defaults();
        let err = registry
            .register_request::<PagedResultsControl>()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateCodec {
                oid: oid::PAGED_RESULTS.to_string(),
                direction: "request",
            }
        );
        assert!(registry.register_response::<PagedResultsControl>().is_err());
    }

    #[test]
    fn test_same_oid_both_directions_is_allowed() {
        let mut registry = ControlRegistry::new();
        registry.register_request::<PagedResultsControl>().unwrap();
        registry.register_response::<PagedResultsControl>().unwrap();
    }

    #[test]
    fn test_unsupported_request_control_names_oid() {
        let registry = ControlRegistry::with_defaults();
        let controls: Vec<Arc<dyn Control>> = vec![Arc::new(Unknown)];
        assert_eq!(
            registry.encode_all(&controls).unwrap_err(),
            ProtocolError::UnsupportedControl {
                oid: "1.2.3.4.5".to_string()
            }
        );
    }

    #[test]
    fn test_unsupported_response_control_names_oid() {
        let registry = ControlRegistry::with_defaults();
        let raw = vec![RawControl::new("1.2.3.4.5", false, None)];
        assert_eq!(
            registry.decode_all(&[], &raw).unwrap_err(),
            ProtocolError::UnsupportedControl {
                oid: "1.2.3.4.5".to_string()
            }
        );
    }

    #[test]
    fn test_encode_paged_wire_value() {
        let registry = ControlRegistry::with_defaults();
        let controls: Vec<Arc<dyn Control>> =
            vec![Arc::new(PagedResultsControl::new(0).with_critical(true))];
        let raw = registry.encode_all(&controls).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].oid, oid::PAGED_RESULTS);
        assert!(raw[0].critical);
        assert_eq!(
            STANDARD.encode(raw[0].value.as_ref().unwrap()),
            "MAUCAQAEAA=="
        );
    }

    #[test]
    fn test_decode_all_preserves_order() {
        let registry = ControlRegistry::with_defaults();
        let raw = vec![
            RawControl::new(
                oid::SORT_RESPONSE,
                false,
                SortResponseControl::new(ResultCode::Success, None, false)
                    .encode_value()
                    .unwrap(),
            ),
            RawControl::new(
                oid::PAGED_RESULTS,
                false,
                Some(Bytes::from(STANDARD.decode("MA0CARQECKfHGAAAAAAA").unwrap())),
            ),
        ];
        let decoded = registry.decode_all(&[], &raw).unwrap();
        assert_eq!(decoded[0].oid(), oid::SORT_RESPONSE);
        let paged = find::<PagedResultsControl>(&decoded).unwrap();
        assert_eq!(paged.size, 20);
        assert!(paged.has_more());
    }

    #[test]
    fn test_decoder_receives_matching_request_control() {
        let mut registry = ControlRegistry::new();
        registry
            .register_response_codec(oid::PAGED_RESULTS, |raw, request| {
                let requested = request
                    .and_then(|c| c.downcast_ref::<PagedResultsControl>())
                    .map(|c| c.size)
                    .unwrap_or(-1);
                let mut control =
                    PagedResultsControl::decode_value(raw.critical, raw.value.as_deref(), None)?;
                control.size = requested;
                Ok(Arc::new(control) as Arc<dyn Control>)
            })
            .unwrap();

        let request: Vec<Arc<dyn Control>> = vec![
            Arc::new(SortRequestControl::new(vec![SortKey::new("cn")], false)),
            Arc::new(PagedResultsControl::new(7)),
        ];
        let raw = vec![RawControl::new(
            oid::PAGED_RESULTS,
            false,
            PagedResultsControl::new(0).encode_value().unwrap(),
        )];
        let decoded = registry.decode_all(&request, &raw).unwrap();
        assert_eq!(find::<PagedResultsControl>(&decoded).unwrap().size, 7);
    }

    #[test]
    fn test_debug_lists_oids() {
        let debug = format!("{:?}", ControlRegistry::with_defaults());
        assert!(debug.contains(oid::MANAGE_DSA_IT));
    }
}
