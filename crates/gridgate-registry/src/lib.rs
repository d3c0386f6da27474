//! Gridgate Registries
//!
//! Concurrent, timeout-reaped registries keyed by opaque GUID tokens:
//!
//! - [`TimeoutRegistry`]: the generic map with collision-avoiding issuance
//! - [`PreAuthRegistry`]: single-use SSO handoff tokens
//! - [`SessionRegistry`]: live client sessions with idle timeout and disconnect
//! - [`reaper`]: the background sweep tasks that evict expired entries
//!
//! Every registry is safe to share across any number of tasks without
//! external locking. Misses are reported as `None`/`false`, never as errors.

pub mod preauth;
pub mod reaper;
pub mod session;
pub mod timeout_registry;

pub use preauth::{PreAuth, PreAuthRegistry};
pub use reaper::{run_session_reaper, run_sso_reaper, sweep_interval, PoolStatus};
pub use session::{Session, SessionConnection, SessionRegistry};
pub use timeout_registry::{Expiring, TimeoutRegistry};
