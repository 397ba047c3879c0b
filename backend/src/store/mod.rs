pub mod file;
pub mod key;
pub mod opening;
pub mod queue;
pub mod remote;
pub mod snapshot;

pub use file::DurableFile;
pub use key::SelectionKey;
pub use opening::OpeningLineStore;
pub use queue::{WriteBehindQueue, spawn_write_behind};
pub use remote::{RemoteStore, SqlxRemoteStore};
pub use snapshot::{LineSnapshot, LiveSnapshot, OpeningSnapshot};
