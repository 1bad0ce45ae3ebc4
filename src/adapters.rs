pub mod rpc;
pub mod storage;

pub use rpc::JsonRpcNode;
pub use storage::open_store;
