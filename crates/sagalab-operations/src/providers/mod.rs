mod replica_set;
mod saga_state_io;

pub use replica_set::{DEFAULT_MEMBERS, FaultKind, FaultRule, InMemoryReplicaSet};
pub use saga_state_io::FileSystemSagaStateIO;
