//! ManageDsaIT control (RFC 3296). Carries no value.

use bytes::Bytes;

use super::{Control, ControlCodec, ControlValue, oid};
use crate::error::ProtocolError;

/// Treat referral objects as ordinary entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ManageDsaItControl {
    /// Criticality flag.
    pub critical: bool,
}

impl ManageDsaItControl {
    /// Create the control.
    pub fn new(critical: bool) -> Self {
        Self { critical }
    }
}

impl ControlValue for ManageDsaItControl {
    const OID: &'static str = oid::MANAGE_DSA_IT;

    fn criticality(&self) -> bool {
        self.critical
    }
}

impl ControlCodec for ManageDsaItControl {
    fn encode_value(&self) -> Result<Option<Bytes>, ProtocolError> {
        Ok(None)
    }

    fn decode_value(
        critical: bool,
        value: Option<&[u8]>,
        _request: Option<&dyn Control>,
    ) -> Result<Self, ProtocolError> {
        match value {
            Some(v) if !v.is_empty() => Err(ProtocolError::invalid_control(
                Self::OID,
                "control must not have a value",
            )),
            _ => Ok(Self { critical }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_no_value() {
        for critical in [true, false] {
            let control = ManageDsaItControl::new(critical);
            assert_eq!(control.encode_value().unwrap(), None);
            assert_eq!(
                ManageDsaItControl::decode_value(critical, None, None).unwrap(),
                control
            );
        }
    }

    #[test]
    fn test_rejects_value() {
        assert!(ManageDsaItControl::decode_value(false, Some(&[0x01]), None).is_err());
    }
}
