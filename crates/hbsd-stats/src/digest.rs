//! Statistics digest codec
//!
//! Full digest, one message per bundle, messages separated by `\` and the
//! whole digest terminated by `#`:
//!
//! ```text
//! <bundle key>+<ttl>*<node>=<meeting time>@<version>?<seen start>[b,b,...]$<node>=...
//! ```
//!
//! `ttl` and meeting times are printed with six decimals, a missing seen start
//! is written as `-1`, and the bracketed list has one `0`/`1` per bin.
//!
//! Version digest, used to ask a peer for newer records only:
//!
//! ```text
//! <bundle key>*<node>@<version>$<node>@<version>\<bundle key>*...#
//! ```
//!
//! Bundle keys contain `+` and `[`, so fields are located from the right and
//! the key is delimited by its closing `]`.

use crate::error::{Result, StatsError};
use crate::node::RemoteNodeRecord;
use hbsd_protocol::{BundleKey, EndpointId};

const MESSAGE_SEPARATOR: char = '\\';
const NODE_SEPARATOR: char = '$';
const TERMINATOR: char = '#';

/// One bundle's records in a full digest
#[derive(Debug, Clone, PartialEq)]
pub struct DigestMessage {
    pub key: BundleKey,
    pub ttl: f64,
    pub nodes: Vec<(EndpointId, RemoteNodeRecord)>,
}

/// One bundle's node versions in a version digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub key: BundleKey,
    pub nodes: Vec<(EndpointId, usize)>,
}

pub fn encode_digest(messages: &[DigestMessage]) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for (i, message) in messages.iter().enumerate() {
        if i > 0 {
            out.push(MESSAGE_SEPARATOR);
        }
        out.push_str(&format!("{}+{:.6}", message.key, message.ttl));
        for (j, (node, record)) in message.nodes.iter().enumerate() {
            out.push(if j == 0 { '*' } else { NODE_SEPARATOR });
            let start = record.seen_start.map_or(-1, |s| s as i64);
            let bits: Vec<&str> = record
                .copies
                .iter()
                .map(|b| if *b { "1" } else { "0" })
                .collect();
            out.push_str(&format!(
                "{}={:.6}@{}?{}[{}]",
                node,
                record.meeting_time,
                record.version,
                start,
                bits.join(",")
            ));
        }
    }
    out.push(TERMINATOR);
    out
}

/// Parses and validates a full digest against an axis of `bin_count` bins.
///
/// Any defect rejects the whole digest.
pub fn parse_digest(text: &str, bin_count: usize) -> Result<Vec<DigestMessage>> {
    let Some(body) = digest_body(text)? else {
        return Ok(Vec::new());
    };
    body.split(MESSAGE_SEPARATOR)
        .map(|chunk| parse_message(chunk, bin_count))
        .collect()
}

pub fn encode_version_digest(entries: &[VersionEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.push(MESSAGE_SEPARATOR);
        }
        out.push_str(entry.key.as_str());
        for (j, (node, version)) in entry.nodes.iter().enumerate() {
            out.push(if j == 0 { '*' } else { NODE_SEPARATOR });
            out.push_str(&format!("{node}@{version}"));
        }
    }
    out.push(TERMINATOR);
    out
}

pub fn parse_version_digest(text: &str, bin_count: usize) -> Result<Vec<VersionEntry>> {
    let Some(body) = digest_body(text)? else {
        return Ok(Vec::new());
    };
    body.split(MESSAGE_SEPARATOR)
        .map(|chunk| {
            let (key, nodes) = split_key(chunk)?;
            let key = BundleKey::parse(key)?;
            let nodes = match nodes {
                None => Vec::new(),
                Some(nodes) => nodes
                    .split(NODE_SEPARATOR)
                    .map(|n| parse_version_node(n, bin_count))
                    .collect::<Result<_>>()?,
            };
            Ok(VersionEntry { key, nodes })
        })
        .collect()
}

/// Strips the terminator; None for an empty digest
fn digest_body(text: &str) -> Result<Option<&str>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let body = text
        .strip_suffix(TERMINATOR)
        .ok_or_else(|| StatsError::malformed("missing '#' terminator"))?;
    if body.is_empty() {
        Ok(None)
    } else {
        Ok(Some(body))
    }
}

/// Splits `<key>[*<nodes>]` at the first `*` after the key's closing bracket
fn split_key(chunk: &str) -> Result<(&str, Option<&str>)> {
    let close = chunk
        .find(']')
        .ok_or_else(|| StatsError::malformed(format!("no bundle key in {chunk:?}")))?;
    match chunk[close..].find('*') {
        Some(offset) => {
            let star = close + offset;
            Ok((&chunk[..star], Some(&chunk[star + 1..])))
        }
        None => Ok((chunk, None)),
    }
}

fn parse_message(chunk: &str, bin_count: usize) -> Result<DigestMessage> {
    let (head, nodes) = split_key(chunk)?;
    let (key, ttl) = head
        .rsplit_once('+')
        .ok_or_else(|| StatsError::malformed(format!("no ttl in {head:?}")))?;
    let key = BundleKey::parse(key)?;
    let ttl = parse_float(ttl, "ttl")?;

    let nodes = match nodes {
        None => Vec::new(),
        Some(nodes) => nodes
            .split(NODE_SEPARATOR)
            .map(|n| parse_node(n, bin_count))
            .collect::<Result<_>>()?,
    };

    Ok(DigestMessage { key, ttl, nodes })
}

fn parse_node(text: &str, bin_count: usize) -> Result<(EndpointId, RemoteNodeRecord)> {
    let malformed = || StatsError::malformed(format!("bad node record {text:?}"));

    let rest = text.strip_suffix(']').ok_or_else(malformed)?;
    let (rest, bits) = rest.rsplit_once('[').ok_or_else(malformed)?;
    let (rest, start) = rest.rsplit_once('?').ok_or_else(malformed)?;
    let (rest, version) = rest.rsplit_once('@').ok_or_else(malformed)?;
    let (node, meeting_time) = rest.rsplit_once('=').ok_or_else(malformed)?;

    let copies = bits
        .split(',')
        .map(|b| match b.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(StatsError::malformed(format!("bad bit {other:?}"))),
        })
        .collect::<Result<Vec<bool>>>()?;
    let version: usize = version.parse().map_err(|_| malformed())?;
    let seen_start = match start.parse::<i64>().map_err(|_| malformed())? {
        -1 => None,
        s if s >= 0 => Some(s as usize),
        _ => return Err(malformed()),
    };

    let record = RemoteNodeRecord {
        copies,
        meeting_time: parse_float(meeting_time, "meeting time")?,
        version,
        seen_start,
    };
    record.validate(bin_count)?;
    Ok((EndpointId::parse(node)?, record))
}

fn parse_version_node(text: &str, bin_count: usize) -> Result<(EndpointId, usize)> {
    let (node, version) = text
        .rsplit_once('@')
        .ok_or_else(|| StatsError::malformed(format!("bad version entry {text:?}")))?;
    let version: usize = version
        .parse()
        .map_err(|_| StatsError::malformed(format!("bad version {version:?}")))?;
    if version > bin_count {
        return Err(StatsError::VersionOutOfRange {
            version,
            max: bin_count,
        });
    }
    Ok((EndpointId::parse(node)?, version))
}

fn parse_float(text: &str, field: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| StatsError::malformed(format!("bad {field} {text:?}")))
}
