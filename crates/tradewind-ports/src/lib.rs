//! # Tradewind Ports
//!
//! The narrow interfaces through which the control plane consumes its
//! environment, plus the adapters shipped with the platform:
//!
//! - `supervisor`: process supervisor operations (start/stop/list/tail)
//! - `probe`: HTTP health-probe results, abstracted to a trait
//! - `object_store`: put/get/delete/list/stat over blobs, with
//!   local-filesystem and in-memory adapters
//! - `clock`: cancellable wall-clock access
//! - `crypto`: SHA-256 and AEAD primitives backed by AES-256-GCM
//! - `sim`: simulated supervisor and probe used by the DR harness and tests
//!
//! Real deployments plug production adapters in behind these traits; the
//! core never links against a cloud SDK or process manager directly.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod crypto;
pub mod error;
pub mod object_store;
pub mod probe;
pub mod sim;
pub mod supervisor;

pub use clock::{Clock, SystemClock};
pub use crypto::{AeadKey, CryptoProvider, GcmCrypto, NONCE_LEN};
pub use error::{PortError, PortResult};
pub use object_store::{LocalFsStore, MemoryStore, ObjectStat, ObjectStore};
pub use probe::{HealthProbe, HealthStatus, TimeoutProbe};
pub use sim::{SimProbe, SimSupervisor};
pub use supervisor::{ProcessInfo, ProcessStatus, Supervisor};
