//! SASL DIGEST-MD5 (RFC 2831).
//!
//! Only the `auth` quality of protection is implemented. Integrity and
//! confidentiality layers are left to TLS.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use rand::RngCore;

use super::SaslMechanism;
use crate::credentials::{QualityOfProtection, SaslConfig};
use crate::error::AuthError;

const NONCE_COUNT: &str = "00000001";
const QOP_AUTH: &str = "auth";

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Initial,
    AwaitingRspauth { expected: String },
    Complete,
}

/// DIGEST-MD5 client.
pub struct DigestMd5 {
    user: String,
    password: String,
    authorization_id: Option<String>,
    realm: Option<String>,
    digest_uri: String,
    cnonce: String,
    mutual_authentication: bool,
    state: State,
}

impl DigestMd5 {
    /// Create the mechanism from a SASL configuration for a connection to
    /// `host`.
    pub fn new(config: &SaslConfig, host: &str) -> Result<Self, AuthError> {
        let user = super::required(&config.authentication_id, "authentication id")?;
        let password = super::required(&config.credential, "credential")?;

        if !config.qop.is_empty() && !config.qop.contains(&QualityOfProtection::Auth) {
            let requested: Vec<_> = config.qop.iter().map(|q| q.as_str()).collect();
            return Err(AuthError::UnsupportedQop(requested.join(",")));
        }

        Ok(Self {
            user,
            password,
            authorization_id: config.authorization_id.clone(),
            realm: config.realm.clone(),
            digest_uri: format!("ldap/{}", host.to_ascii_lowercase()),
            cnonce: generate_cnonce(),
            mutual_authentication: config.mutual_authentication,
            state: State::Initial,
        })
    }

    fn respond(&mut self, challenge: &str) -> Result<Vec<u8>, AuthError> {
        let directives = parse_directives(challenge)?;

        let mut nonce = None;
        let mut realms = Vec::new();
        let mut qop_offered = None;
        let mut utf8 = false;
        let mut algorithm = None;
        for (key, value) in directives {
            match key.as_str() {
                "nonce" => {
                    if nonce.replace(value).is_some() {
                        return Err(AuthError::InvalidChallenge("duplicate nonce".into()));
                    }
                }
                "realm" => realms.push(value),
                "qop" => qop_offered = Some(value),
                "charset" => utf8 = value.eq_ignore_ascii_case("utf-8"),
                "algorithm" => algorithm = Some(value),
                "stale" | "maxbuf" | "cipher" => {}
                other => tracing::trace!(directive = other, "ignoring DIGEST-MD5 directive"),
            }
        }

        let nonce = nonce.ok_or_else(|| AuthError::InvalidChallenge("missing nonce".into()))?;
        match algorithm {
            Some(a) if a.eq_ignore_ascii_case("md5-sess") => {}
            Some(a) => {
                return Err(AuthError::InvalidChallenge(format!(
                    "unsupported algorithm: {a}"
                )));
            }
            None => return Err(AuthError::InvalidChallenge("missing algorithm".into())),
        }

        let offered = qop_offered.unwrap_or_else(|| QOP_AUTH.to_string());
        if !offered.split(',').any(|q| q.trim() == QOP_AUTH) {
            return Err(AuthError::UnsupportedQop(offered));
        }

        let realm = self
            .realm
            .clone()
            .or_else(|| realms.into_iter().next())
            .unwrap_or_default();

        let session_key = self.session_key(&realm, &nonce);
        let response = response_digest(
            &session_key,
            &nonce,
            &self.cnonce,
            &format!("AUTHENTICATE:{}", self.digest_uri),
        );
        let expected = response_digest(
            &session_key,
            &nonce,
            &self.cnonce,
            &format!(":{}", self.digest_uri),
        );

        let mut out = Vec::new();
        if utf8 {
            out.push("charset=utf-8".to_string());
        }
        out.push(format!("username={}", quote(&self.user)));
        if !realm.is_empty() {
            out.push(format!("realm={}", quote(&realm)));
        }
        out.push(format!("nonce={}", quote(&nonce)));
        out.push(format!("nc={NONCE_COUNT}"));
        out.push(format!("cnonce={}", quote(&self.cnonce)));
        out.push(format!("digest-uri={}", quote(&self.digest_uri)));
        out.push(format!("response={response}"));
        out.push(format!("qop={QOP_AUTH}"));
        if let Some(authzid) = &self.authorization_id {
            out.push(format!("authzid={}", quote(authzid)));
        }

        self.state = State::AwaitingRspauth { expected };
        Ok(out.join(",").into_bytes())
    }

    // A1 = { H( { username-value, ":", realm-value, ":", passwd } ),
    //        ":", nonce-value, ":", cnonce-value [ ":", authzid-value ] }
    fn session_key(&self, realm: &str, nonce: &str) -> String {
        let secret = Md5::digest(format!("{}:{realm}:{}", self.user, self.password).as_bytes());
        let mut a1 = secret.to_vec();
        a1.extend_from_slice(format!(":{nonce}:{}", self.cnonce).as_bytes());
        if let Some(authzid) = &self.authorization_id {
            a1.extend_from_slice(format!(":{authzid}").as_bytes());
        }
        hex::encode(Md5::digest(&a1))
    }

    fn check_rspauth(&mut self, data: &[u8]) -> Result<(), AuthError> {
        let State::AwaitingRspauth { expected } = &self.state else {
            return Err(AuthError::UnexpectedChallenge {
                mechanism: "DIGEST-MD5",
            });
        };
        let text = std::str::from_utf8(data)
            .map_err(|_| AuthError::InvalidChallenge("challenge is not UTF-8".into()))?;
        let rspauth = parse_directives(text)?
            .into_iter()
            .find(|(k, _)| k == "rspauth")
            .map(|(_, v)| v)
            .ok_or_else(|| AuthError::ServerVerification("missing rspauth".into()))?;
        if !rspauth.eq_ignore_ascii_case(expected) {
            return Err(AuthError::ServerVerification("rspauth mismatch".into()));
        }
        tracing::debug!("DIGEST-MD5 server response verified");
        self.state = State::Complete;
        Ok(())
    }
}

impl std::fmt::Debug for DigestMd5 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestMd5")
            .field("user", &self.user)
            .field("authorization_id", &self.authorization_id)
            .field("realm", &self.realm)
            .field("digest_uri", &self.digest_uri)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl SaslMechanism for DigestMd5 {
    fn name(&self) -> &'static str {
        "DIGEST-MD5"
    }

    fn initial_response(&mut self) -> Result<Option<Vec<u8>>, AuthError> {
        Ok(None)
    }

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>, AuthError> {
        match self.state {
            State::Initial => {
                let text = std::str::from_utf8(challenge)
                    .map_err(|_| AuthError::InvalidChallenge("challenge is not UTF-8".into()))?;
                self.respond(text)
            }
            State::AwaitingRspauth { .. } => {
                self.check_rspauth(challenge)?;
                Ok(Vec::new())
            }
            State::Complete => Err(AuthError::UnexpectedChallenge {
                mechanism: "DIGEST-MD5",
            }),
        }
    }

    fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    fn verify_final(&mut self, server_credentials: Option<&[u8]>) -> Result<(), AuthError> {
        match (&self.state, server_credentials) {
            (State::Complete, _) => Ok(()),
            (State::AwaitingRspauth { .. }, Some(data)) if !data.is_empty() => {
                self.check_rspauth(data)
            }
            _ if self.mutual_authentication => Err(AuthError::ServerVerification(
                "server did not send rspauth".into(),
            )),
            _ => {
                tracing::debug!("bind completed without DIGEST-MD5 rspauth");
                Ok(())
            }
        }
    }
}

fn response_digest(session_key: &str, nonce: &str, cnonce: &str, a2: &str) -> String {
    let ha2 = hex::encode(Md5::digest(a2.as_bytes()));
    let kd = format!("{session_key}:{nonce}:{NONCE_COUNT}:{cnonce}:{QOP_AUTH}:{ha2}");
    hex::encode(Md5::digest(kd.as_bytes()))
}

fn generate_cnonce() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Split a digest challenge into `(key, value)` pairs with quoting removed.
fn parse_directives(input: &str) -> Result<Vec<(String, String)>, AuthError> {
    let mut out = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.next() != Some('=') {
            return Err(AuthError::InvalidChallenge(format!(
                "directive without value: {}",
                key.trim()
            )));
        }

        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(AuthError::InvalidChallenge(format!(
                    "unterminated quoted value for {}",
                    key.trim()
                )));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        out.push((key.trim().to_ascii_lowercase(), value));
    }

    Ok(out)
}
