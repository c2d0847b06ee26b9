pub mod error;
pub mod firebase;
pub mod local;
pub mod memory;
pub mod traits;

pub use error::StoreError;
pub use firebase::FirebaseStore;
pub use local::FileStore;
pub use memory::{MemoryRemote, MemoryStore};
pub use traits::{KeyValues, LocalStore, RemoteStore};
