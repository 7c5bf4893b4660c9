pub mod execution;
pub mod rpc;
