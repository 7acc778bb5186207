/// Cache coordination layer
///
/// Sits between the client and the network. Requests are classified by path
/// and answered network-first or cache-first from versioned on-disk partitions,
/// degrading gracefully when the backend cannot be reached.

pub mod coordinator;
pub mod fetch;
pub mod routes;
pub mod storage;

pub use coordinator::{CacheControl, CacheCoordinator, ControlCommand, GenerationState};
pub use fetch::{Fetcher, HttpRequest, HttpResponse, ReqwestFetcher, ResponseSource};
pub use routes::{OfflineFallback, PartitionKind, Route, RouteTable, Strategy};
pub use storage::{CacheStorage, PartitionStats, StoredEntry};
