//! Signed action descriptors carried in confirmation button values.
//!
//! A pending close or reply is never stored server side. The prompt embeds an
//! [`ActionDescriptor`] in the confirm button and the callback hands it back; the codec signs the
//! payload so a tampered value is rejected before any ticket is touched. Ticket ids are never part
//! of the descriptor: membership is recomputed on confirm.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::domain::operator::OperatorId;
use crate::domain::tenant::TenantId;

type HmacSha256 = Hmac<Sha256>;

/// Slack rejects button values longer than this.
pub const MAX_BUTTON_VALUE_LEN: usize = 2000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkActionKind {
    Close,
    Reply,
}

impl BulkActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Reply => "reply",
        }
    }

    pub fn confirm_action_id(&self) -> &'static str {
        match self {
            Self::Close => "bulk_close_confirm",
            Self::Reply => "bulk_reply_confirm",
        }
    }

    pub fn cancel_action_id(&self) -> &'static str {
        match self {
            Self::Close => "bulk_close_cancel",
            Self::Reply => "bulk_reply_cancel",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationDecision {
    Confirm,
    Cancel,
}

/// Maps an interactive `action_id` to the bulk action it belongs to.
pub fn parse_action_id(action_id: &str) -> Option<(BulkActionKind, ConfirmationDecision)> {
    [BulkActionKind::Close, BulkActionKind::Reply].into_iter().find_map(|kind| {
        if action_id == kind.confirm_action_id() {
            Some((kind, ConfirmationDecision::Confirm))
        } else if action_id == kind.cancel_action_id() {
            Some((kind, ConfirmationDecision::Cancel))
        } else {
            None
        }
    })
}

/// Where a command came from and on whose behalf it runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOrigin {
    pub tenant_id: TenantId,
    pub operator_id: OperatorId,
    pub channel_id: String,
    pub thread_ts: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub kind: BulkActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_threshold: Option<u32>,
    #[serde(flatten)]
    pub origin: ActionOrigin,
    pub issued_at: DateTime<Utc>,
}

impl ActionDescriptor {
    pub fn close(
        origin: ActionOrigin,
        search_term: Option<String>,
        days_threshold: Option<u32>,
    ) -> Self {
        Self {
            kind: BulkActionKind::Close,
            search_term,
            reply_message: None,
            days_threshold,
            origin,
            issued_at: Utc::now(),
        }
    }

    pub fn reply(origin: ActionOrigin, search_term: Option<String>, message: String) -> Self {
        Self {
            kind: BulkActionKind::Reply,
            search_term,
            reply_message: Some(message),
            days_threshold: None,
            origin,
            issued_at: Utc::now(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SignedDescriptor {
    #[serde(flatten)]
    descriptor: ActionDescriptor,
    sig: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor could not be decoded: {0}")]
    Malformed(String),
    #[error("descriptor signature does not match")]
    BadSignature,
    #[error("descriptor expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },
    #[error("descriptor kind `{found}` does not match action `{expected}`")]
    KindMismatch { expected: &'static str, found: &'static str },
    #[error("reply descriptor is missing a message body")]
    MissingReplyMessage,
    #[error("encoded descriptor is {len} bytes, over the 2000 byte button value limit")]
    TooLarge { len: usize },
    #[error("descriptor signing failed: {0}")]
    Signing(String),
}

/// Encodes and verifies [`ActionDescriptor`] values.
#[derive(Clone, Debug)]
pub struct DescriptorCodec {
    signing_key: SecretString,
    max_age: Option<Duration>,
}

impl DescriptorCodec {
    pub fn new(signing_key: SecretString, max_age: Option<Duration>) -> Self {
        Self { signing_key, max_age }
    }

    pub fn encode(&self, descriptor: &ActionDescriptor) -> Result<String, DescriptorError> {
        let sig = self.sign(descriptor)?;
        let value = serde_json::to_string(&SignedDescriptor { descriptor: descriptor.clone(), sig })
            .map_err(|error| DescriptorError::Malformed(error.to_string()))?;

        if value.len() > MAX_BUTTON_VALUE_LEN {
            return Err(DescriptorError::TooLarge { len: value.len() });
        }
        Ok(value)
    }

    pub fn decode(
        &self,
        expected: BulkActionKind,
        value: &str,
    ) -> Result<ActionDescriptor, DescriptorError> {
        self.decode_at(expected, value, Utc::now())
    }

    pub fn decode_at(
        &self,
        expected: BulkActionKind,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<ActionDescriptor, DescriptorError> {
        let signed: SignedDescriptor = serde_json::from_str(value)
            .map_err(|error| DescriptorError::Malformed(error.to_string()))?;
        let descriptor = signed.descriptor;

        let provided = decode_hex(&signed.sig).ok_or(DescriptorError::BadSignature)?;
        let mut mac = self.mac()?;
        mac.update(&canonical_bytes(&descriptor)?);
        mac.verify_slice(&provided).map_err(|_| DescriptorError::BadSignature)?;

        if let Some(max_age) = self.max_age {
            let max_age = chrono::Duration::from_std(max_age)
                .map_err(|error| DescriptorError::Malformed(error.to_string()))?;
            let expired_at = descriptor.issued_at + max_age;
            if now > expired_at {
                return Err(DescriptorError::Expired { expired_at });
            }
        }

        if descriptor.kind != expected {
            return Err(DescriptorError::KindMismatch {
                expected: expected.as_str(),
                found: descriptor.kind.as_str(),
            });
        }

        if descriptor.kind == BulkActionKind::Reply
            && descriptor.reply_message.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(DescriptorError::MissingReplyMessage);
        }

        Ok(descriptor)
    }

    fn sign(&self, descriptor: &ActionDescriptor) -> Result<String, DescriptorError> {
        let mut mac = self.mac()?;
        mac.update(&canonical_bytes(descriptor)?);
        Ok(encode_hex(mac.finalize().into_bytes().as_slice()))
    }

    fn mac(&self) -> Result<HmacSha256, DescriptorError> {
        HmacSha256::new_from_slice(self.signing_key.expose_secret().as_bytes())
            .map_err(|error| DescriptorError::Signing(error.to_string()))
    }
}

fn canonical_bytes(descriptor: &ActionDescriptor) -> Result<Vec<u8>, DescriptorError> {
    serde_json::to_vec(descriptor).map_err(|error| DescriptorError::Malformed(error.to_string()))
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn decode_hex(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 || !value.is_ascii() {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&value[index..index + 2], 16).ok())
        .collect()
}
