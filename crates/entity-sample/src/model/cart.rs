use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A shopping cart.
///
/// # Entity Framework
/// This struct implements the [`Entity`](entity_framework::Entity) trait; the struct
/// itself is the persisted state. See [`crate::cart_entity`] for the command handling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    /// Quantity per SKU.
    pub items: BTreeMap<String, u32>,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total price in cents, using `catalog` prices. `None` when it does not fit a `u64`.
    pub fn total(&self, catalog: &Catalog) -> Option<u64> {
        self.items.iter().try_fold(0u64, |total, (sku, quantity)| {
            catalog
                .price(sku)
                .unwrap_or(0)
                .checked_mul(u64::from(*quantity))
                .and_then(|line| total.checked_add(line))
        })
    }

    pub fn view(&self, catalog: &Catalog) -> Option<CartView> {
        Some(CartView {
            items: self.items.clone(),
            total: self.total(catalog)?,
        })
    }
}

/// Commands accepted by a cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CartCommand {
    AddItem { sku: String, quantity: u32 },
    RemoveItem { sku: String },
    GetCart,
    /// Charges the cart total to a wallet.
    Checkout { wallet_id: String },
    /// Deletes the cart.
    Clear,
}

/// What a cart reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartView {
    pub items: BTreeMap<String, u32>,
    /// Total price in cents.
    pub total: u64,
}

/// Unit prices in cents, injected into the cart entity as its context.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    prices: HashMap<String, u64>,
}

impl Catalog {
    pub fn new<I, S>(prices: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            prices: prices
                .into_iter()
                .map(|(sku, price)| (sku.into(), price))
                .collect(),
        }
    }

    pub fn price(&self, sku: &str) -> Option<u64> {
        self.prices.get(sku).copied()
    }
}
