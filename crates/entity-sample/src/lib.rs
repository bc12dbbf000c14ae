//! # Entity Sample Library
//!
//! A small shop built on the entity framework: carts that check out against prepaid
//! wallets. Exposed as a library for the integration tests.

pub mod cart_entity;
pub mod clients;
pub mod lifecycle;
pub mod model;
pub mod services;
pub mod wallet_entity;
