//! # System Lifecycle & Orchestration
//!
//! Individual entities are simple; wiring a runtime, its store, the entity types and
//! the services they talk to is where the setup lives. [`ShopSystem`] is that
//! conductor for the shop.
//!
//! **Key Responsibilities:**
//! 1. **Store selection** - in-memory by default, any [`Store`](entity_framework::Store) via [`ShopSystem::with_store`]
//! 2. **Registration** - entity types with their passivation options and injected context
//! 3. **Service wiring** - the admin notifier that wallet failures report to
//! 4. **Graceful Shutdown** - drain in-flight commands and effects, stop every instance
//!
//! ## Late Binding
//!
//! Entities never hold clients to each other. A cart reaches a wallet by returning a
//! `Forward` reply, and a wallet reaches the admin through an effect; the runtime
//! resolves both by name. So registration order does not matter and there are no
//! cyclic references to break at shutdown.
//!
//! ```rust,ignore
//! let system = ShopSystem::new(catalog)?;
//! system.wallet_client.deposit("w-1", 500).await?;
//! system.cart_client.add_item("c-1", "apple", 2).await?;
//! system.cart_client.checkout("c-1", "w-1").await?;
//! system.shutdown().await;
//! ```

pub mod shop_system;

pub use shop_system::*;
