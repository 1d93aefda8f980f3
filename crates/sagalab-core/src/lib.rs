pub mod consistency;
pub mod error;
mod ids;
pub mod operation;
pub mod store;

pub use consistency::{ConsistencyLevel, ReadConcern, WriteConcern};
pub use error::*;
pub use ids::{ActorId, SagaId, SessionId, Timestamp};
pub use operation::{Operation, OperationKind};
pub use store::{ReadResult, StoreError, StoreErrorKind, WriteAck};
