use crate::clients::{CartClient, WalletClient};
use crate::model::{Cart, Catalog, Wallet};
use crate::services::{AdminNotifier, ADMIN_SERVICE};
use entity_framework::{
    EntityOptions, EntityRuntime, FrameworkError, InMemoryStore, PassivationStrategy,
    RuntimeConfig, Store,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Wallets are touched less often than carts but are hot during checkout.
const WALLET_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// The shop: a runtime with carts, wallets and the admin notifier.
pub struct ShopSystem {
    pub runtime: EntityRuntime,
    pub cart_client: CartClient,
    pub wallet_client: WalletClient,
    pub notifier: AdminNotifier,
}

impl ShopSystem {
    /// Builds the shop over an in-memory store.
    pub fn new(catalog: Catalog) -> Result<Self, FrameworkError> {
        Self::with_store(
            Arc::new(InMemoryStore::new()),
            RuntimeConfig::default(),
            catalog,
        )
    }

    pub fn with_store(
        store: Arc<dyn Store>,
        config: RuntimeConfig,
        catalog: Catalog,
    ) -> Result<Self, FrameworkError> {
        let runtime = EntityRuntime::with_config(store, config);

        let notifier = AdminNotifier::new();
        runtime.register_service(ADMIN_SERVICE, Arc::new(notifier.clone()));

        let carts = runtime.register::<Cart>(EntityOptions::defaults(), catalog)?;
        let wallets = runtime.register::<Wallet>(
            EntityOptions::defaults()
                .with_passivation_strategy(PassivationStrategy::timeout(WALLET_IDLE_TIMEOUT)),
            (),
        )?;
        info!("Shop system started");

        Ok(Self {
            runtime,
            cart_client: CartClient::new(carts),
            wallet_client: WalletClient::new(wallets),
            notifier,
        })
    }

    pub async fn shutdown(self) {
        info!("Shutting down shop system");
        self.runtime.shutdown().await;
    }
}
