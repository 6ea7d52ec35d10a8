//! Off-chain relay for the dead-man's-switch protocol: keeps the automation ledger's owner
//! mirror and grace periods consistent with decisions made on the registry ledger.
//!
//! - **Ledger clients** ([RegistryClient], [AutomationClient]): the only components doing
//!   ledger I/O (JSON-RPC reads, signed writes through a per-ledger writer queue, log
//!   subscriptions with backfill and reconnection).
//! - **Engine**: translates observed [DomainEvent]s into writes on the other ledger.
//! - **Router**: one consumer loop per ledger stream; handlers run as independent tasks.
//! - **Supervisor**: start/stop, periodic health checks and cache eviction.
//! - **Control surface**: thin HTTP API over the supervisor (see [control]).

pub mod abi;
pub mod cache;
pub mod config;
pub mod control;
pub mod cursor;
pub mod error;
pub mod events;
pub mod ledger;
pub mod reconcile;
pub mod router;
pub mod rpc;
pub mod signer;
pub mod subscription;
pub mod supervisor;
pub mod types;

pub use cache::StateCache;
pub use config::{ClientSettings, LedgerConfig, LogConfig, ReconnectionConfig, RelayConfig, RetryConfig};
pub use cursor::Cursor;
pub use error::{ConfigError, LedgerError};
pub use events::{DomainEvent, ObservedEvent, Origin};
pub use ledger::{
    automation::AutomationClient, registry::RegistryClient, AutomationLedger, EventStream, Ledger,
    RegistryLedger,
};
pub use reconcile::{Applied, Engine, GraceOutcome, ReconcileError};
pub use router::{RouterCounters, RouterStats};
pub use signer::{PrivateKey, Signer};
pub use supervisor::{HealthSnapshot, RelayStatus, Supervisor, SupervisorError, SupervisorIntervals};
pub use types::{
    ContactInfo, DeathDeclarationStatus, GracePeriodInfo, OwnerMirror, OwnerRecord, Receipt,
};
