//! Order aggregate, pricing, and construction.

mod aggregate;
mod builder;
mod cart;
mod commands;
mod pricing;
mod state;
mod value_objects;

pub use aggregate::{Order, OrderLine, TOTAL_TOLERANCE};
pub use builder::{
    DEFAULT_DELIVERY_DAYS, OrderAggregateBuilder, OrderDraft, RandomTrackingIds,
    SequentialTrackingIds, TrackingIdGenerator,
};
pub use cart::{Cart, CartLine};
pub use commands::*;
pub use pricing::{PricedCart, PricedLine, PricingError, resolve as resolve_pricing};
pub use state::{OrderStatus, PaymentStatus};
pub use value_objects::{Money, PaymentMethod, PhoneNumber, ProductId, ShippingAddress};
