//! Typed wrappers over the entity clients, one method per command.

pub mod cart_client;
pub mod wallet_client;

pub use cart_client::CartClient;
pub use wallet_client::WalletClient;
