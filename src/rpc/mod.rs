pub mod client;
pub mod pool;
pub mod types;

pub use pool::{RpcPool, RpcPoolConfig};
