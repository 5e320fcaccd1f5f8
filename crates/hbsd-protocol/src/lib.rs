//! HBSD protocol types
//!
//! Shared vocabulary of the HBSD (history based scheduling and drop) DTN
//! router:
//! - GBOF bundle keys and endpoint identifiers
//! - Bundle records built from daemon event descriptors
//! - Router-to-router payloads
//! - Router configuration

pub mod bundle;
pub mod config;
pub mod error;
pub mod gbof;
pub mod payload;

pub use bundle::{unix_now, Bundle, BundleDescriptor, FragmentInfo, TransientId};
pub use config::{ConfigError, RouterConfig, UtilityPolicy};
pub use error::{ProtocolError, Result};
pub use gbof::{creation_seconds, expiration_millis, BundleKey, EndpointId, DTN_EPOCH_OFFSET_SECS};
pub use payload::{Payload, PayloadKind, PeerPayload};
