//! Password policy control.
//!
//! The request carries no value. The response value is:
//!
//! ```text
//! PasswordPolicyResponseValue ::= SEQUENCE {
//!     warning [0] CHOICE {
//!         timeBeforeExpiration [0] INTEGER (0 .. maxInt),
//!         graceAuthNsRemaining [1] INTEGER (0 .. maxInt) } OPTIONAL,
//!     error   [1] ENUMERATED { ... } OPTIONAL }
//! ```

use bytes::Bytes;

use super::{Control, ControlCodec, ControlValue, oid};
use crate::ber::{BerReader, BerWriter, decode_integer, tag};
use crate::error::ProtocolError;

const WARNING: u8 = tag::context_constructed(0);
const TIME_BEFORE_EXPIRATION: u8 = tag::context(0);
const GRACE_AUTHNS_REMAINING: u8 = tag::context(1);
const ERROR: u8 = tag::context(1);

/// Password policy error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PasswordPolicyError {
    /// The password has expired.
    PasswordExpired = 0,
    /// The account is locked.
    AccountLocked = 1,
    /// The password must be changed after an administrative reset.
    ChangeAfterReset = 2,
    /// The user may not change the password.
    PasswordModNotAllowed = 3,
    /// The old password must be supplied with the change.
    MustSupplyOldPassword = 4,
    /// The new password fails quality checks.
    InsufficientPasswordQuality = 5,
    /// The new password is too short.
    PasswordTooShort = 6,
    /// The password was changed too recently.
    PasswordTooYoung = 7,
    /// The new password was used before.
    PasswordInHistory = 8,
}

impl PasswordPolicyError {
    /// Create from the wire enumeration value.
    pub fn from_i64(value: i64) -> Result<Self, ProtocolError> {
        Ok(match value {
            0 => Self::PasswordExpired,
            1 => Self::AccountLocked,
            2 => Self::ChangeAfterReset,
            3 => Self::PasswordModNotAllowed,
            4 => Self::MustSupplyOldPassword,
            5 => Self::InsufficientPasswordQuality,
            6 => Self::PasswordTooShort,
            7 => Self::PasswordTooYoung,
            8 => Self::PasswordInHistory,
            _ => {
                return Err(ProtocolError::InvalidField {
                    field: "password policy error",
                    value,
                });
            }
        })
    }

    /// Wire enumeration value.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human-readable description.
    pub fn message(self) -> &'static str {
        match self {
            Self::PasswordExpired => "password expired",
            Self::AccountLocked => "account locked",
            Self::ChangeAfterReset => "password must be changed after reset",
            Self::PasswordModNotAllowed => "password modification not allowed",
            Self::MustSupplyOldPassword => "old password must be supplied",
            Self::InsufficientPasswordQuality => "insufficient password quality",
            Self::PasswordTooShort => "password too short",
            Self::PasswordTooYoung => "password too young",
            Self::PasswordInHistory => "password in history",
        }
    }
}

/// Password policy request/response.
///
/// Sent with all fields empty as a request. A response carries at most one
/// warning and an optional error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PasswordPolicyControl {
    /// Criticality flag.
    pub critical: bool,
    /// Seconds until the password expires.
    pub time_before_expiration: Option<i32>,
    /// Grace logins remaining.
    pub grace_authns_remaining: Option<i32>,
    /// Policy error, if any.
    pub error: Option<PasswordPolicyError>,
}

impl PasswordPolicyControl {
    /// Create a request control.
    pub fn new(critical: bool) -> Self {
        Self {
            critical,
            ..Self::default()
        }
    }

    /// Set the time-before-expiration warning.
    #[must_use]
    pub fn with_time_before_expiration(mut self, seconds: i32) -> Self {
        self.time_before_expiration = Some(seconds);
        self.grace_authns_remaining = None;
        self
    }

    /// Set the grace-logins-remaining warning.
    #[must_use]
    pub fn with_grace_authns_remaining(mut self, count: i32) -> Self {
        self.grace_authns_remaining = Some(count);
        self.time_before_expiration = None;
        self
    }

    /// Set the error.
    #[must_use]
    pub fn with_error(mut self, error: PasswordPolicyError) -> Self {
        self.error = Some(error);
        self
    }

    fn has_response(&self) -> bool {
        self.time_before_expiration.is_some()
            || self.grace_authns_remaining.is_some()
            || self.error.is_some()
    }
}

impl ControlValue for PasswordPolicyControl {
    const OID: &'static str = oid::PASSWORD_POLICY;

    fn criticality(&self) -> bool {
        self.critical
    }
}

impl ControlCodec for PasswordPolicyControl {
    fn encode_value(&self) -> Result<Option<Bytes>, ProtocolError> {
        if !self.has_response() {
            return Ok(None);
        }
        if self.time_before_expiration.is_some() && self.grace_authns_remaining.is_some() {
            return Err(ProtocolError::invalid_control(
                Self::OID,
                "at most one warning may be present",
            ));
        }
        for value in [self.time_before_expiration, self.grace_authns_remaining]
            .into_iter()
            .flatten()
        {
            if value < 0 {
                return Err(ProtocolError::invalid_control(
                    Self::OID,
                    format!("negative warning value {value}"),
                ));
            }
        }

        let mut w = BerWriter::new();
        w.write_sequence(|seq| {
            if let Some(seconds) = self.time_before_expiration {
                seq.write_constructed(WARNING, |warning| {
                    warning.write_integer_tagged(TIME_BEFORE_EXPIRATION, i64::from(seconds));
                });
            } else if let Some(count) = self.grace_authns_remaining {
                seq.write_constructed(WARNING, |warning| {
                    warning.write_integer_tagged(GRACE_AUTHNS_REMAINING, i64::from(count));
                });
            }
            if let Some(error) = self.error {
                seq.write_integer_tagged(ERROR, i64::from(error.code()));
            }
        });
        Ok(Some(w.into_bytes()))
    }

    fn decode_value(
        critical: bool,
        value: Option<&[u8]>,
        _request: Option<&dyn Control>,
    ) -> Result<Self, ProtocolError> {
        let mut control = Self::new(critical);
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            return Ok(control);
        };

        let mut r = BerReader::new(value);
        let mut seq = r.read_sequence()?;
        if let Some(warning) = seq.read_optional(WARNING)? {
            let mut warning = BerReader::new(warning);
            let (choice, content) = warning.read_tlv()?;
            let amount = i32::try_from(decode_integer(content)?).map_err(|_| {
                ProtocolError::invalid_control(Self::OID, "warning value out of range")
            })?;
            match choice {
                TIME_BEFORE_EXPIRATION => control.time_before_expiration = Some(amount),
                GRACE_AUTHNS_REMAINING => control.grace_authns_remaining = Some(amount),
                other => {
                    return Err(ProtocolError::invalid_control(
                        Self::OID,
                        format!("unknown warning choice {other:#04x}"),
                    ));
                }
            }
            warning.finish("password policy warning")?;
        }
        if let Some(error) = seq.read_optional(ERROR)? {
            control.error = Some(PasswordPolicyError::from_i64(decode_integer(error)?)?);
        }
        seq.finish("password policy control")?;
        r.finish("password policy control")?;
        Ok(control)
    }
}
