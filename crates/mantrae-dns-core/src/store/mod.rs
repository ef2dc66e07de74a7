// # Configuration Store Implementations
//
// Implementations of [`ProviderStore`](crate::traits::ProviderStore) and
// [`RouterSource`](crate::traits::RouterSource) for embedding and for the
// daemon. These hold configuration only; DNS record state always lives at
// the provider.

pub mod file;
pub mod memory;

pub use file::FileConfigStore;
pub use memory::MemoryConfigStore;
