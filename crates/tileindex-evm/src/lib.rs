//! tileindex-evm — EVM log transports and config builder.
//!
//! Two [`LogTransport`](tileindex_core::transport::LogTransport)
//! implementations over Ethereum JSON-RPC:
//!
//! - [`WsTransport`]: `eth_subscribe("logs")` over a WebSocket, with an
//!   `eth_getLogs` backfill when a session starts from an explicit block.
//! - [`PollingTransport`]: `eth_blockNumber` / `eth_getLogs` on a fixed
//!   interval over HTTP, scanning bounded block ranges.

pub mod builder;
pub mod fetcher;
pub mod poller;
pub mod rpc;
pub mod ws_listener;

pub use builder::{contract_filter, IndexerBuilder};
pub use fetcher::{EvmRpcClient, HttpRpcClient};
pub use poller::PollingTransport;
pub use ws_listener::WsTransport;
