//! Typed persistence for SkyDriver: the `DocumentStore` trait plus a
//! MongoDB-backed production implementation and an in-memory test double.

pub mod error;
pub mod memory;
pub mod mongo;
pub mod patch;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use patch::ManifestPatch;
pub use store::DocumentStore;

pub const DB_NAME_DEFAULT: &str = "SkyDriver_DB";
pub const MANIFESTS_COLL: &str = "Manifests";
pub const RESULTS_COLL: &str = "Results";
pub const SCAN_BACKLOG_COLL: &str = "ScanBacklog";
pub const SCAN_REQUESTS_COLL: &str = "ScanRequests";
pub const I3_EVENTS_COLL: &str = "I3Events";
pub const K8S_JOBS_COLL: &str = "SkyScanK8sJobs";
