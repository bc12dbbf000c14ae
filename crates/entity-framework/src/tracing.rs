//! # Observability & Tracing
//!
//! The runtime logs through the `tracing` macros with structured fields
//! (`entity_type`, `entity_id`, `version`, `error`). Binaries install a subscriber with
//! [`setup_tracing`]; libraries and tests never do.
//!
//! ## What Gets Logged
//!
//! - **Lifecycle** (`info`): entity type registered, instance activated, passivated,
//!   deleted, runtime shutdown.
//! - **Command flow** (`debug`): command received, state persisted, forwards followed,
//!   effects executed, passivation declined.
//! - **Failures** (`warn`): rejected commands, version conflicts, store outages,
//!   effect failures, corrupted records.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Lifecycle only
//! RUST_LOG=info cargo run
//!
//! # Every command and persisted version
//! RUST_LOG=entity_framework=debug cargo run
//! ```
//!
//! With `RUST_LOG=debug` a cart checkout reads:
//!
//! ```text
//! INFO Instance activated entity_type="cart" entity_id="cart-1" version=None
//! DEBUG Command entity_type="cart" entity_id="cart-1" command=AddItem { sku: "apple", quantity: 2 }
//! DEBUG State persisted entity_type="cart" entity_id="cart-1" version=v1
//! DEBUG Following forward from="cart/cart-1" to=wallet/w-1 hops=1
//! ```

/// Installs a compact `fmt` subscriber filtered by `RUST_LOG`.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
