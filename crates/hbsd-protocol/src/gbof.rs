//! GBOF (global bundle or fragment) identity
//!
//! A bundle is identified network-wide by its creation timestamp, its source
//! endpoint and its fragmentation fields. The textual key built from those
//! fields is what peers exchange in summary vectors and statistics digests:
//!
//! ```text
//! <creation ts>[<source eid>]<frag offset>+<frag length>:<1 if fragment, else 0>
//! ```

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds between the Unix epoch and the DTN epoch (2000-01-01T00:00:00Z)
pub const DTN_EPOCH_OFFSET_SECS: u64 = 946_684_800;

/// Absolute creation time in Unix seconds.
///
/// The high 32 bits of the raw creation timestamp count seconds since the
/// DTN epoch; the low 32 bits are a sequence number.
pub fn creation_seconds(creation_timestamp: u64) -> u64 {
    (creation_timestamp >> 32) + DTN_EPOCH_OFFSET_SECS
}

/// Absolute expiration time in Unix milliseconds, rounded up to the end of the second.
///
/// None when the lifetime does not fit the millisecond clock.
pub fn expiration_millis(creation_timestamp: u64, lifetime_secs: u64) -> Option<u64> {
    creation_seconds(creation_timestamp)
        .checked_add(lifetime_secs)?
        .checked_mul(1000)?
        .checked_add(999)
}

/// Characters that delimit fields in statistics digests
const RESERVED_CHARS: &[char] = &['\\', '$', '*', '[', ']'];

/// A DTN endpoint identifier such as `dtn://node1/app`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let Some((scheme, rest)) = uri.split_once("://") else {
            return Err(ProtocolError::InvalidEndpoint(uri.to_string()));
        };
        let bad_char = |c: char| c.is_whitespace() || RESERVED_CHARS.contains(&c);
        if scheme.is_empty() || rest.is_empty() || uri.chars().any(bad_char) {
            return Err(ProtocolError::InvalidEndpoint(uri.to_string()));
        }
        Ok(Self(uri.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The node part of the endpoint: everything before the third `/`.
    ///
    /// `dtn://node1/app/x` becomes `dtn://node1`; a bare node endpoint is
    /// returned unchanged.
    pub fn node_eid(&self) -> EndpointId {
        match self.0.match_indices('/').nth(2) {
            Some((idx, _)) => EndpointId(self.0[..idx].to_string()),
            None => self.clone(),
        }
    }

    /// True when this endpoint is an application endpoint registered below `parent`
    pub fn is_under(&self, parent: &EndpointId) -> bool {
        self.0
            .strip_prefix(parent.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Appends a demux suffix, e.g. `dtn://node1` + `ext.rtr/HBSD`
    pub fn join(&self, suffix: &str) -> EndpointId {
        EndpointId(format!("{}/{}", self.0, suffix.trim_start_matches('/')))
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content-addressed bundle key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BundleKey(String);

impl BundleKey {
    pub fn from_parts(
        creation_timestamp: u64,
        source: &EndpointId,
        frag_offset: u64,
        frag_length: u64,
        is_fragment: bool,
    ) -> Self {
        Self(format!(
            "{}[{}]{}+{}:{}",
            creation_timestamp,
            source,
            frag_offset,
            frag_length,
            if is_fragment { 1 } else { 0 }
        ))
    }

    /// Validates a key received from a peer
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let invalid = || ProtocolError::InvalidBundleKey(raw.to_string());

        let (timestamp, rest) = raw.split_once('[').ok_or_else(invalid)?;
        let (source, fragment) = rest.rsplit_once(']').ok_or_else(invalid)?;
        timestamp.parse::<u64>().map_err(|_| invalid())?;
        EndpointId::parse(source).map_err(|_| invalid())?;

        let (span, flag) = fragment.split_once(':').ok_or_else(invalid)?;
        let (offset, length) = span.split_once('+').ok_or_else(invalid)?;
        offset.parse::<u64>().map_err(|_| invalid())?;
        length.parse::<u64>().map_err(|_| invalid())?;
        if flag != "0" && flag != "1" {
            return Err(invalid());
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
