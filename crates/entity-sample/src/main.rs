//! # Entity Framework Sample
//!
//! A shop where carts check out against prepaid wallets.
//!
//! ## Core Components
//!
//! - **model**: the state types (`Cart`, `Wallet`) with their commands and replies.
//! - **cart_entity / wallet_entity**: the `Entity` implementations.
//! - **clients**: typed wrappers (e.g. `CartClient`).
//! - **lifecycle**: [`ShopSystem`], which wires the runtime together.
//!
//! ## Quick Start
//!
//! `main` funds a wallet, fills a cart, checks out, then tries a checkout the wallet
//! cannot cover so the admin notification path runs too.

use entity_framework::tracing::setup_tracing;
use entity_sample::cart_entity::CartError;
use entity_sample::lifecycle::ShopSystem;
use entity_sample::model::Catalog;
use tracing::{error, info, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let catalog = Catalog::new([("apple", 50), ("pear", 70), ("melon", 400)]);
    let system = ShopSystem::new(catalog).map_err(|e| e.to_string())?;
    info!("Starting shop");

    let balance = system
        .wallet_client
        .deposit("wallet-1", 1_000)
        .await
        .map_err(|e| e.to_string())?;
    info!(balance, "Wallet funded");

    let span = tracing::info_span!("checkout", cart_id = "cart-1");
    let checkout = async {
        system.cart_client.add_item("cart-1", "apple", 4).await?;
        let cart = system.cart_client.add_item("cart-1", "pear", 2).await?;
        info!(total = cart.total, items = cart.items.len(), "Cart filled");
        let balance = system.cart_client.checkout("cart-1", "wallet-1").await?;
        Ok::<_, CartError>(balance)
    }
    .instrument(span)
    .await;
    match checkout {
        Ok(balance) => info!(balance = balance.balance, "Checkout completed"),
        Err(e) => error!(error = %e, "Checkout failed"),
    }

    let span = tracing::info_span!("checkout", cart_id = "cart-2");
    let checkout = async {
        system.cart_client.add_item("cart-2", "melon", 3).await?;
        let balance = system.cart_client.checkout("cart-2", "wallet-1").await?;
        Ok::<_, CartError>(balance)
    }
    .instrument(span)
    .await;
    if let Err(e) = checkout {
        info!(error = %e, "Checkout declined as expected");
    }

    let notifier = system.notifier.clone();
    system.shutdown().await;
    info!(
        notifications = notifier.notifications().len(),
        "Shop stopped"
    );
    Ok(())
}
