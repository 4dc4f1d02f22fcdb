//! 对账消费者
//!
//! 以单一消费组订阅 `payment-status-updates` 与 `stock-events`，
//! 将异步到达的支付/库存结果映射为带终态保护的订单状态迁移。
//!
//! 每条消息的处理分为两步：
//! 1. 解析——格式错误无法通过重试恢复，直接分流到死信队列并提交位点；
//! 2. 应用——瞬时存储故障按指数退避重试，耗尽后分流到死信队列并提交
//!    位点，保持分区前进。死信分流本身失败时不提交位点，消息按至少
//!    一次语义重新投递。
//!
//! 分区内顺序处理、分区间并发由 Kafka 保证；订单事件以订单 ID 为分区
//! 键发布，因此同一订单的事件天然有序，跨订单顺序不作假设。

use std::sync::Arc;

use commerce_shared::config::AppConfig;
use commerce_shared::dlq::DlqProducer;
use commerce_shared::error::CoreError;
use commerce_shared::events::{PaymentStatusUpdate, StockEvent};
use commerce_shared::kafka::{ConsumerMessage, KafkaConsumer, topics};
use commerce_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::OrderError;
use crate::repository::OrderRepositoryTrait;
use crate::service::OrderOrchestrator;

/// 对账消费者
///
/// 组合 KafkaConsumer（消息拉取）、OrderOrchestrator（状态迁移）和
/// DlqProducer（死信分流）三个组件，形成完整的消费管道。
pub struct ReconcileConsumer<R: OrderRepositoryTrait> {
    consumer: KafkaConsumer,
    orchestrator: Arc<OrderOrchestrator<R>>,
    dlq: Arc<DlqProducer>,
    retry_policy: RetryPolicy,
}

impl<R: OrderRepositoryTrait> ReconcileConsumer<R> {
    pub fn new(
        config: &AppConfig,
        orchestrator: Arc<OrderOrchestrator<R>>,
        dlq: Arc<DlqProducer>,
    ) -> Result<Self, OrderError> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("reconcile"))?;
        let retry_policy = RetryPolicy::from_consumer_config(&config.consumer);
        Ok(Self {
            consumer,
            orchestrator,
            dlq,
            retry_policy,
        })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), OrderError> {
        let Self {
            consumer,
            orchestrator,
            dlq,
            retry_policy,
        } = self;

        consumer.subscribe(&[topics::PAYMENT_STATUS_UPDATES, topics::STOCK_EVENTS])?;

        info!(
            topics = ?[topics::PAYMENT_STATUS_UPDATES, topics::STOCK_EVENTS],
            "对账消费者已启动"
        );

        consumer
            .start(shutdown, |msg| {
                let orchestrator = &orchestrator;
                let dlq = &dlq;
                let retry_policy = &retry_policy;
                async move { handle_message(orchestrator, dlq, retry_policy, &msg).await }
            })
            .await;

        info!("对账消费者已停止");
        Ok(())
    }
}

/// 解析后的对账事件
#[derive(Debug)]
pub enum ReconcileEvent {
    Payment(PaymentStatusUpdate),
    Stock(StockEvent),
    /// 订阅之外的 topic（配置漂移时的防御），跳过并提交
    Unknown,
}

/// 将 Kafka 消息按来源 topic 解析为对账事件
pub fn parse_message(msg: &ConsumerMessage) -> Result<ReconcileEvent, CoreError> {
    match msg.topic.as_str() {
        topics::PAYMENT_STATUS_UPDATES => {
            let update: PaymentStatusUpdate = msg.deserialize_payload()?;
            Ok(ReconcileEvent::Payment(update))
        }
        topics::STOCK_EVENTS => {
            let event: StockEvent = msg.deserialize_payload()?;
            Ok(ReconcileEvent::Stock(event))
        }
        other => {
            warn!(topic = other, "收到未订阅 topic 的消息，忽略");
            Ok(ReconcileEvent::Unknown)
        }
    }
}

/// 处理单条 Kafka 消息的完整流程
///
/// 拆分为独立函数而非方法，便于在测试中直接调用而无需构造完整的 Consumer。
/// 返回 `Ok` 表示位点可以提交（处理成功、确定性空操作或已分流死信）；
/// 返回 `Err` 仅在死信分流本身失败时出现，位点不提交。
pub async fn handle_message<R: OrderRepositoryTrait>(
    orchestrator: &OrderOrchestrator<R>,
    dlq: &DlqProducer,
    retry_policy: &RetryPolicy,
    msg: &ConsumerMessage,
) -> Result<(), CoreError> {
    // 1. 解析。格式错误重试不会恢复，直接进死信队列
    let event = match parse_message(msg) {
        Ok(event) => event,
        Err(e) => {
            warn!(
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                error = %e,
                "消息解析失败，分流到死信队列"
            );
            dlq.send_message_to_dlq(msg, &e.to_string()).await?;
            return Ok(());
        }
    };

    // 2. 应用。仅瞬时存储故障会被重试；业务层面的空操作在编排器内
    //    已经消化为 Ok
    let apply_result = retry_with_policy(
        retry_policy,
        "reconcile-event",
        |e: &OrderError| e.is_retryable(),
        || apply_event(orchestrator, &event),
    )
    .await;

    match apply_result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                error = %e,
                "对账事件处理失败且重试耗尽，分流到死信队列"
            );
            dlq.send_message_to_dlq(msg, &e.to_string()).await?;
            Ok(())
        }
    }
}

/// 将解析后的事件路由到编排器
async fn apply_event<R: OrderRepositoryTrait>(
    orchestrator: &OrderOrchestrator<R>,
    event: &ReconcileEvent,
) -> Result<(), OrderError> {
    match event {
        ReconcileEvent::Payment(update) => orchestrator.apply_payment_update(update).await,
        ReconcileEvent::Stock(stock) => orchestrator.apply_stock_event(stock).await,
        ReconcileEvent::Unknown => Ok(()),
    }
}
