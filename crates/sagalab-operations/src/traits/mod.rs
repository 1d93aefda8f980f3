mod replicated_store;
mod saga_state_io;

pub use replicated_store::ReplicatedStore;
pub use saga_state_io::SagaStateIO;
