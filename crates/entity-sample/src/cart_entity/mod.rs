//! # Cart Entity
//!
//! Shopping carts keyed by cart id. The cart keeps quantities per SKU and prices them
//! with the [`Catalog`] injected at registration.
//!
//! ## Commands
//!
//! - `AddItem` / `RemoveItem` change the cart and reply with a [`CartView`]
//! - `GetCart` is read-only
//! - `Checkout` does not touch the cart: it forwards a `Debit` for the cart total to
//!   the wallet, so the caller receives the wallet's reply. The debit reference is the
//!   cart key, which makes a retried checkout charge the wallet only once.
//! - `Clear` deletes the cart state; the next command starts from an empty cart
//!
//! Business rejections (unknown SKU, empty cart) are `Failure` replies, not errors.

pub mod error;

pub use error::*;

use crate::model::{Cart, CartCommand, CartView, Catalog, WalletCommand};
use async_trait::async_trait;
use entity_framework::{ActionReply, CommandContext, Entity, Target};

pub const ENTITY_TYPE: &str = "cart";

const QUANTITY_TOO_LARGE: &str = "quantity too large";
const TOTAL_TOO_LARGE: &str = "cart total too large";

#[async_trait]
impl Entity for Cart {
    const ENTITY_TYPE: &'static str = ENTITY_TYPE;
    type Command = CartCommand;
    type Reply = CartView;
    type Context = Catalog;

    fn initial_state(_entity_id: &str) -> Self {
        Cart::default()
    }

    fn validate(command: &CartCommand) -> Result<(), String> {
        match command {
            CartCommand::AddItem { quantity: 0, .. } => Err("quantity must be positive".into()),
            CartCommand::AddItem { sku, .. } | CartCommand::RemoveItem { sku } if sku.is_empty() => {
                Err("sku must not be empty".into())
            }
            CartCommand::Checkout { wallet_id } if wallet_id.is_empty() => {
                Err("wallet id must not be empty".into())
            }
            _ => Ok(()),
        }
    }

    async fn handle_command(
        &self,
        command: CartCommand,
        ctx: &mut CommandContext<'_, Self>,
    ) -> ActionReply<CartView> {
        let catalog = ctx.context();
        match command {
            CartCommand::AddItem { sku, quantity } => {
                if catalog.price(&sku).is_none() {
                    return ActionReply::failure(format!("unknown sku: {sku}"));
                }
                let mut cart = self.clone();
                let line = cart.items.entry(sku).or_insert(0);
                let Some(updated) = line.checked_add(quantity) else {
                    return ActionReply::failure(QUANTITY_TOO_LARGE);
                };
                *line = updated;
                let Some(view) = cart.view(catalog) else {
                    return ActionReply::failure(TOTAL_TOO_LARGE);
                };
                ctx.update_state(cart);
                ActionReply::message(view)
            }
            CartCommand::RemoveItem { sku } => {
                let mut cart = self.clone();
                if cart.items.remove(&sku).is_none() {
                    return ActionReply::failure(format!("item not in cart: {sku}"));
                }
                let Some(view) = cart.view(catalog) else {
                    return ActionReply::failure(TOTAL_TOO_LARGE);
                };
                ctx.update_state(cart);
                ActionReply::message(view)
            }
            CartCommand::GetCart => match self.view(catalog) {
                Some(view) => ActionReply::message(view),
                None => ActionReply::failure(TOTAL_TOO_LARGE),
            },
            CartCommand::Checkout { wallet_id } => {
                if self.is_empty() {
                    return ActionReply::failure("cart is empty");
                }
                let Some(amount) = self.total(catalog) else {
                    return ActionReply::failure(TOTAL_TOO_LARGE);
                };
                let debit = WalletCommand::Debit {
                    amount,
                    reference: format!("{ENTITY_TYPE}/{}", ctx.entity_id()),
                };
                match serde_json::to_value(debit) {
                    Ok(payload) => ActionReply::forward(
                        Target::entity(crate::wallet_entity::ENTITY_TYPE, wallet_id),
                        payload,
                    ),
                    Err(e) => ActionReply::failure(format!("cannot encode debit: {e}")),
                }
            }
            CartCommand::Clear => {
                ctx.delete_state();
                ActionReply::message(CartView {
                    items: Default::default(),
                    total: 0,
                })
            }
        }
    }
}
