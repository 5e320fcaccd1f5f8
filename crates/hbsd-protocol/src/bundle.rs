//! Bundle records
//!
//! The external event layer hands over a [`BundleDescriptor`] for every
//! bundle it sees. Converting a descriptor into a [`Bundle`] validates the
//! required fields and derives the content key, creation time and
//! expiration once.

use crate::error::{ProtocolError, Result};
use crate::gbof::{creation_seconds, expiration_millis, BundleKey, EndpointId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Identifier assigned to a bundle by the local DTN daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransientId(pub u64);

impl fmt::Display for TransientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fragmentation fields that take part in the content key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentInfo {
    pub offset: u64,
    pub length: u64,
    pub is_fragment: bool,
}

/// Normalized bundle event as produced by the daemon event layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleDescriptor {
    pub creation_timestamp: Option<u64>,
    pub fragment: FragmentInfo,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub custodian: Option<String>,
    pub reply_to: Option<String>,
    /// Bundle lifetime in seconds
    pub ttl_secs: Option<u64>,
    pub transient_id: Option<TransientId>,
    pub elapsed_secs: Option<u64>,
    /// Set for bundles delivered to the router registration itself
    pub is_statistics_payload: bool,
}

impl BundleDescriptor {
    /// Validates the descriptor and builds the bundle record.
    ///
    /// `now` is the local Unix time used to anchor the bundle's age.
    pub fn into_bundle(self, now: u64) -> Result<Bundle> {
        let creation_timestamp = self
            .creation_timestamp
            .ok_or(ProtocolError::MissingField("creation_timestamp"))?;
        let source = EndpointId::parse(
            self.source
                .as_deref()
                .ok_or(ProtocolError::MissingField("source"))?,
        )?;
        let destination = EndpointId::parse(
            self.destination
                .as_deref()
                .ok_or(ProtocolError::MissingField("destination"))?,
        )?;
        let ttl_secs = self.ttl_secs.ok_or(ProtocolError::MissingField("ttl_secs"))?;
        let expiration_millis = expiration_millis(creation_timestamp, ttl_secs)
            .ok_or(ProtocolError::InvalidLifetime(ttl_secs))?;
        let custodian = self.custodian.as_deref().map(EndpointId::parse).transpose()?;
        let reply_to = self.reply_to.as_deref().map(EndpointId::parse).transpose()?;

        let key = BundleKey::from_parts(
            creation_timestamp,
            &source,
            self.fragment.offset,
            self.fragment.length,
            self.fragment.is_fragment,
        );
        let creation_secs = creation_seconds(creation_timestamp);
        let elapsed_at_receipt = self
            .elapsed_secs
            .unwrap_or_else(|| now.saturating_sub(creation_secs));

        Ok(Bundle {
            key,
            transient_id: self.transient_id,
            creation_timestamp,
            creation_secs,
            ttl_secs,
            expiration_millis,
            fragment: self.fragment,
            source,
            destination,
            custodian,
            reply_to,
            injected: false,
            is_statistics_payload: self.is_statistics_payload,
            elapsed_at_receipt,
            received_at: now,
        })
    }
}

/// A bundle tracked by the router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    key: BundleKey,
    pub transient_id: Option<TransientId>,
    pub creation_timestamp: u64,
    pub creation_secs: u64,
    pub ttl_secs: u64,
    pub expiration_millis: u64,
    pub fragment: FragmentInfo,
    pub source: EndpointId,
    pub destination: EndpointId,
    pub custodian: Option<EndpointId>,
    pub reply_to: Option<EndpointId>,
    /// Bundle was injected on request of the router (peer payload, gateway traffic)
    pub injected: bool,
    pub is_statistics_payload: bool,
    elapsed_at_receipt: u64,
    received_at: u64,
}

impl Bundle {
    pub fn key(&self) -> &BundleKey {
        &self.key
    }

    /// Seconds since creation, as seen from local time `now`
    pub fn elapsed_at(&self, now: u64) -> u64 {
        self.elapsed_at_receipt
            .saturating_add(now.saturating_sub(self.received_at))
    }

    /// True when the bundle was created by an application registered on `local`
    pub fn is_local_origin(&self, local: &EndpointId) -> bool {
        self.source.is_under(local)
    }

    /// Points the bundle at a new destination, used for gateway-forwarded traffic
    pub fn redirect(&mut self, destination: EndpointId) {
        self.destination = destination;
        self.injected = false;
    }
}
