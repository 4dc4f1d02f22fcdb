//! 订单事件发布
//!
//! 通过 trait 抽象事件发布，服务层的单元测试不需要真实的 Kafka。
//! 发布失败只记录日志：订单状态的权威来源是数据库，事件流是派生视图。

use async_trait::async_trait;
use commerce_shared::error::CoreError;
use commerce_shared::events::OrderEvent;
use commerce_shared::kafka::{KafkaProducer, topics};

/// 订单事件发布的抽象接口
#[async_trait]
pub trait OrderEventPublisher: Send + Sync {
    async fn publish(&self, event: &OrderEvent) -> Result<(), CoreError>;
}

/// 基于 Kafka 的事件发布实现
///
/// 以订单 ID 作为消息 key，保证同一订单的事件进入同一分区、按序投递。
pub struct KafkaOrderEventPublisher {
    producer: KafkaProducer,
}

impl KafkaOrderEventPublisher {
    pub fn new(producer: KafkaProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl OrderEventPublisher for KafkaOrderEventPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), CoreError> {
        self.producer
            .send_json(topics::ORDER_EVENTS, &event.order_id, event)
            .await
            .map(|_| ())
    }
}
