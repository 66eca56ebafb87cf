pub mod abi;
pub mod probe;
pub mod retry;
pub mod rpc;
pub mod supervisor;
pub mod traits;

#[cfg(test)]
pub mod memory;

pub use probe::NetworkProbe;
pub use rpc::RpcLedgerGateway;
pub use supervisor::LedgerSupervisor;
pub use traits::LedgerGateway;
