//! 订单编排服务层

mod dto;
mod orchestrator;
mod publisher;

pub use dto::{CreateOrderCommand, NewOrderItem};
pub use orchestrator::OrderOrchestrator;
pub use publisher::{KafkaOrderEventPublisher, OrderEventPublisher};
