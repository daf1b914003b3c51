//! Provider plugin subprocess lifecycle, binary cache, and the plan/apply
//! adapter that drives an OpenTofu-compatible provider through its nine
//! supported RPCs.

pub mod adapter;
pub mod cache;
pub mod codec;
pub mod handshake;
pub mod host;
pub mod proto;
pub mod registry;

pub use adapter::{Entry, ProviderAdapter};
pub use cache::BinaryCache;
pub use host::PluginClient;
pub use registry::{ProviderDownload, ProviderSearchResult, RegistryClient, VersionInfo};
