//! Domain layer for the bookstore order core.
//!
//! This crate holds the pure, storage-agnostic parts of order placement:
//! - Value objects (money, addresses, identifiers, payment methods)
//! - Order and payment status state machines
//! - Cart validation and the authoritative pricing resolver
//! - The order aggregate builder with an injectable tracking id source
//! - Catalog products and inventory adjustments

pub mod error;
pub mod order;
pub mod product;

pub use error::{Conflict, ValidationError};
pub use order::{
    AdvanceStatus, CancelOrder, Cart, CartLine, DEFAULT_DELIVERY_DAYS, DeleteOrder, Money, Order,
    OrderAggregateBuilder, OrderDraft, OrderLine, OrderStatus, PaymentMethod, PaymentStatus,
    PhoneNumber, PlaceOrder, PricedCart, PricedLine, PricingError, ProductId, RandomTrackingIds,
    SequentialTrackingIds, ShippingAddress, TOTAL_TOLERANCE, TrackingIdGenerator,
    UpdatePaymentStatus, resolve_pricing,
};
pub use product::{CatalogSnapshot, InventoryAdjustment, Product, StockUnderflow, normalize_sale_price};
