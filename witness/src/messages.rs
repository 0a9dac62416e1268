// Copyright (c) 2024 The dep2p Authors

//! Witness protocol messages.
//!
//! Reports and confirmations travel on the Realm broadcast channel behind
//! an ASCII tag (`witness:` or `wconfirm:`) followed by a JSON body. Both
//! message types are signed by their sender; the signature covers a
//! deterministic concatenation of the fields, never the JSON encoding.

use crate::error::WitnessError;
use dep2p_common::{keys, keys::signature_hex, Keypair, NodeId, RealmId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Broadcast tag for reports.
pub const WITNESS_TAG: &[u8] = b"witness:";

/// Broadcast tag for confirmations.
pub const CONFIRM_TAG: &[u8] = b"wconfirm:";

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Random 16-byte report identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ReportId(
    /// The raw identifier bytes.
    pub [u8; 16],
);

impl ReportId {
    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        getrandom::getrandom(&mut bytes).expect("system randomness unavailable");
        Self(bytes)
    }

    /// The identifier bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Display for ReportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for ReportId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        hex::encode(self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ReportId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex_str = String::deserialize(deserializer)?;
        let bytes = hex::decode(&hex_str).map_err(serde::de::Error::custom)?;
        let arr: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("report id must be 16 bytes"))?;
        Ok(Self(arr))
    }
}

/// How the disconnect was detected.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DetectionMethod {
    /// The peer closed its connection gracefully. Treated as reliable.
    QuicClose,
    /// The connection timed out.
    QuicTimeout,
    /// Detection method unknown.
    Unknown,
}

impl DetectionMethod {
    fn as_byte(&self) -> u8 {
        match self {
            DetectionMethod::QuicClose => 1,
            DetectionMethod::QuicTimeout => 2,
            DetectionMethod::Unknown => 0,
        }
    }
}

/// A signed claim that a Realm member appears disconnected.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WitnessReport {
    /// Random identifier binding confirmations to this report.
    pub report_id: ReportId,
    /// The node making the claim.
    pub reporter_id: NodeId,
    /// The allegedly disconnected node.
    pub target_id: NodeId,
    /// The realm the claim applies to.
    pub realm_id: RealmId,
    /// How the disconnect was detected.
    pub detection_method: DetectionMethod,
    /// When the report was created (epoch milliseconds).
    pub timestamp_millis: u64,
    /// The reporter's last successful contact with the target.
    pub last_contact_millis: u64,
    /// Signature by `reporter_id`.
    #[serde(with = "signature_hex")]
    pub signature: Vec<u8>,
}

impl WitnessReport {
    /// Create an unsigned report stamped now.
    pub fn new(
        reporter_id: NodeId,
        target_id: NodeId,
        realm_id: RealmId,
        detection_method: DetectionMethod,
        last_contact_millis: u64,
    ) -> Self {
        Self {
            report_id: ReportId::random(),
            reporter_id,
            target_id,
            realm_id,
            detection_method,
            timestamp_millis: now_millis(),
            last_contact_millis,
            signature: Vec::new(),
        }
    }

    /// The bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.report_id.as_bytes());
        bytes.extend_from_slice(self.reporter_id.as_bytes());
        bytes.extend_from_slice(self.target_id.as_bytes());
        bytes.extend_from_slice(self.realm_id.as_bytes());
        bytes.push(self.detection_method.as_byte());
        bytes.extend_from_slice(&self.timestamp_millis.to_be_bytes());
        bytes.extend_from_slice(&self.last_contact_millis.to_be_bytes());
        bytes
    }

    /// Sign as the reporter.
    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = keypair.sign(&self.signing_bytes());
    }

    /// Verify the reporter's signature.
    pub fn verify_signature(&self) -> bool {
        keys::is_valid_signature(&self.reporter_id, &self.signing_bytes(), &self.signature)
    }

    /// Age of the report relative to `now` (epoch milliseconds).
    pub fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp_millis)
    }
}

/// A witness's vote on a report.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ConfirmationType {
    /// The witness's evidence matches the report.
    Agree,
    /// The witness has heard from the target more recently.
    Disagree,
    /// The witness has no contact history for the target.
    Abstain,
}

/// A signed vote contributing to a report's voting session.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WitnessConfirmation {
    /// The report being voted on.
    pub report_id: ReportId,
    /// The voting witness.
    pub witness_id: NodeId,
    /// The vote.
    pub confirmation: ConfirmationType,
    /// When the vote was cast (epoch milliseconds).
    pub timestamp_millis: u64,
    /// The witness's last successful contact with the target.
    pub last_contact_millis: u64,
    /// Free-form explanation, for logs only.
    pub reason: String,
    /// Signature by `witness_id`.
    #[serde(with = "signature_hex")]
    pub signature: Vec<u8>,
}

impl WitnessConfirmation {
    /// Create an unsigned confirmation stamped now.
    pub fn new(
        report_id: ReportId,
        witness_id: NodeId,
        confirmation: ConfirmationType,
        last_contact_millis: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            report_id,
            witness_id,
            confirmation,
            timestamp_millis: now_millis(),
            last_contact_millis,
            reason: reason.into(),
            signature: Vec::new(),
        }
    }

    /// The bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.report_id.as_bytes());
        bytes.extend_from_slice(self.witness_id.as_bytes());
        bytes.push(match self.confirmation {
            ConfirmationType::Agree => 1,
            ConfirmationType::Disagree => 2,
            ConfirmationType::Abstain => 0,
        });
        bytes.extend_from_slice(&self.timestamp_millis.to_be_bytes());
        bytes.extend_from_slice(&self.last_contact_millis.to_be_bytes());
        bytes.extend_from_slice(self.reason.as_bytes());
        bytes
    }

    /// Sign as the witness.
    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = keypair.sign(&self.signing_bytes());
    }

    /// Verify the witness's signature.
    pub fn verify_signature(&self) -> bool {
        keys::is_valid_signature(&self.witness_id, &self.signing_bytes(), &self.signature)
    }
}

/// A tagged message on the Realm broadcast channel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WitnessMessage {
    /// `witness:` — a disconnect report.
    Report(WitnessReport),
    /// `wconfirm:` — a vote.
    Confirmation(WitnessConfirmation),
}

/// Encode a message for the broadcast channel: ASCII tag plus JSON body.
pub fn encode_broadcast(message: &WitnessMessage) -> Result<Vec<u8>, WitnessError> {
    let (tag, body) = match message {
        WitnessMessage::Report(report) => (
            WITNESS_TAG,
            serde_json::to_vec(report).map_err(|e| WitnessError::Decode(e.to_string()))?,
        ),
        WitnessMessage::Confirmation(confirmation) => (
            CONFIRM_TAG,
            serde_json::to_vec(confirmation).map_err(|e| WitnessError::Decode(e.to_string()))?,
        ),
    };
    let mut out = Vec::with_capacity(tag.len() + body.len());
    out.extend_from_slice(tag);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a broadcast payload. Unknown tags are an error the caller drops.
pub fn decode_broadcast(payload: &[u8]) -> Result<WitnessMessage, WitnessError> {
    if let Some(body) = payload.strip_prefix(WITNESS_TAG) {
        let report: WitnessReport =
            serde_json::from_slice(body).map_err(|e| WitnessError::Decode(e.to_string()))?;
        return Ok(WitnessMessage::Report(report));
    }
    if let Some(body) = payload.strip_prefix(CONFIRM_TAG) {
        let confirmation: WitnessConfirmation =
            serde_json::from_slice(body).map_err(|e| WitnessError::Decode(e.to_string()))?;
        return Ok(WitnessMessage::Confirmation(confirmation));
    }
    Err(WitnessError::Decode("unknown broadcast tag".to_string()))
}
