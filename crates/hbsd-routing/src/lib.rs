//! HBSD routing
//!
//! History-based scheduling and dropping for an external DTN daemon:
//! - Capacity-bounded bundle store with utility-based eviction
//! - Delivery-rate and delivery-delay utilities fed by network statistics
//! - Epidemic summary-vector sessions between peer routers
//! - Statistics digest exchange piggybacked on sessions
//! - Injection request tracking and gateway redirection
//! - Payload worker with explicit shutdown

pub mod error;
pub mod observer;
pub mod payload_processor;
pub mod requests;
pub mod router;
pub mod session;
pub mod store;
pub mod summary_vector;
pub mod transport;
pub mod utility;

pub use error::{Result, RoutingError};
pub use observer::{NullObserver, RoutingObserver};
pub use payload_processor::{
    PayloadHandler, PayloadProcessor, PayloadProcessorStats, PayloadQueue, Shutdown,
};
pub use requests::{GatewayRedirects, InjectedRequest, InjectedRequests};
pub use router::{Router, RouterStats};
pub use session::{router_endpoint, should_initiate, Peer, PeerTable};
pub use store::{Admission, AdmissionResult, BundleStore, StoreStats};
pub use summary_vector::{reconcile, Reconciliation, SummaryVector};
pub use transport::{DaemonTransport, ForwardAction, LinkId, RequestId};
pub use utility::{delivery_delay_utility, delivery_rate_utility, UtilityScheduler};
