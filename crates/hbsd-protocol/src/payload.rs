//! Router-to-router payloads
//!
//! Peers exchange small text payloads through the DTN daemon. The first line
//! names the payload type, the rest is type specific:
//!
//! - `EpidemicSV1` / `EpidemicSV2`: summary vector, one bundle key per line
//! - `EpidemicSC`: statistics digest
//! - `EpidemicSR`: statistics version digest, asking the peer for newer records

use crate::error::{ProtocolError, Result};
use crate::gbof::EndpointId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    /// Summary vector opening an epidemic session
    SessionStart,
    /// Summary vector sent back to the session initiator
    SessionReply,
    StatisticsDigest,
    StatisticsRequest,
}

impl PayloadKind {
    pub const fn tag(self) -> &'static str {
        match self {
            PayloadKind::SessionStart => "EpidemicSV1",
            PayloadKind::SessionReply => "EpidemicSV2",
            PayloadKind::StatisticsDigest => "EpidemicSC",
            PayloadKind::StatisticsRequest => "EpidemicSR",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.trim() {
            "EpidemicSV1" => Ok(PayloadKind::SessionStart),
            "EpidemicSV2" => Ok(PayloadKind::SessionReply),
            "EpidemicSC" => Ok(PayloadKind::StatisticsDigest),
            "EpidemicSR" => Ok(PayloadKind::StatisticsRequest),
            other => Err(ProtocolError::UnknownPayloadType(other.to_string())),
        }
    }

    pub fn is_summary_vector(self) -> bool {
        matches!(self, PayloadKind::SessionStart | PayloadKind::SessionReply)
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Typed payload ready to be injected as a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub kind: PayloadKind,
    pub body: String,
}

impl Payload {
    pub fn new(kind: PayloadKind, body: impl Into<String>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> String {
        if self.body.is_empty() {
            format!("{}\n", self.kind.tag())
        } else {
            format!("{}\n{}", self.kind.tag(), self.body)
        }
    }

    pub fn decode(text: &str) -> Result<Self> {
        let text = text.trim_start();
        if text.is_empty() {
            return Err(ProtocolError::EmptyPayload);
        }
        let (tag, body) = text.split_once('\n').unwrap_or((text, ""));
        Ok(Self {
            kind: PayloadKind::from_tag(tag)?,
            body: body.to_string(),
        })
    }

    /// Non-empty, trimmed body lines
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.body.lines().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// A payload received from a peer router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPayload {
    pub source: EndpointId,
    pub payload: Payload,
}
