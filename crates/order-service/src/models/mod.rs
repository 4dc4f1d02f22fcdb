//! 领域模型定义

mod order;

pub use order::{Order, OrderItem, OrderStatus};
