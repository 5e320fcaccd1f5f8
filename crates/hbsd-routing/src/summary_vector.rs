//! Summary vectors for epidemic anti-entropy
//!
//! A summary vector is the set of bundle keys a node holds. The session
//! initiator sends `EpidemicSV1`, the peer answers with the bundles the
//! initiator lacks and, if the initiator lacks nothing or holds something the
//! peer does not, with an `EpidemicSV2` of its own.

use crate::error::{Result, RoutingError};
use hbsd_protocol::{BundleKey, Payload, PayloadKind};
use std::collections::BTreeSet;

/// Parsed summary vector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryVector {
    pub keys: BTreeSet<BundleKey>,
}

impl SummaryVector {
    /// Serializes `snapshot` as a payload of the given session kind
    pub fn build(snapshot: &[BundleKey], kind: PayloadKind) -> Payload {
        let body: Vec<&str> = snapshot.iter().map(BundleKey::as_str).collect();
        Payload::new(kind, body.join("\n"))
    }

    /// Parses a session payload. An empty body is an empty vector.
    pub fn parse(payload: &Payload) -> Result<Self> {
        if !payload.kind.is_summary_vector() {
            return Err(RoutingError::UnexpectedPayload(payload.kind.to_string()));
        }
        let keys = payload
            .lines()
            .map(BundleKey::parse)
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        Ok(Self { keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &BundleKey) -> bool {
        self.keys.contains(key)
    }
}

/// What to do after receiving a peer's summary vector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Local bundles the peer lacks, in snapshot order
    pub to_send: Vec<BundleKey>,
    /// Whether a `SessionReply` vector should go back to the peer
    pub need_reply: bool,
}

/// Compares the local snapshot against a peer's vector
pub fn reconcile(
    local: &[BundleKey],
    remote: &SummaryVector,
    reply_requested: bool,
) -> Reconciliation {
    let to_send: Vec<BundleKey> = local
        .iter()
        .filter(|key| !remote.contains(key))
        .cloned()
        .collect();

    let need_reply = reply_requested && {
        let local_set: BTreeSet<&BundleKey> = local.iter().collect();
        let remote_has_more = remote.keys.iter().any(|key| !local_set.contains(key));
        (remote.is_empty() != local.is_empty())
            || (!remote.is_empty() && !local.is_empty() && remote_has_more)
    };

    Reconciliation {
        to_send,
        need_reply,
    }
}
