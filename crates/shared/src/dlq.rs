//! 死信队列处理
//!
//! 当消息处理失败且重试耗尽（或消息本身无法解析）时，消息会被发送到
//! 死信队列（DLQ）。DLQ 消费者会按退避策略将消息发回原始 topic 重新
//! 投递，重投递次数通过消息头在两个 topic 之间传递，超过上限后记录
//! 日志等待人工介入。
//! 这一机制确保分区不被单条坏消息阻塞，同时消息不会因瞬时故障而永久丢失。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::CoreError;
use crate::kafka::{ConsumerMessage, KafkaConsumer, KafkaProducer, topics};
use crate::retry::RetryPolicy;

/// 重投递计数的消息头名称
///
/// 死信消息发回原始 topic 时携带，业务消费者再次失败时据此延续计数，
/// 防止"失败 -> 死信 -> 重投 -> 失败"的循环不受限地进行。
pub const RETRY_COUNT_HEADER: &str = "dlq-retries";

// ---------------------------------------------------------------------------
// DeadLetterMessage — 死信消息信封
// ---------------------------------------------------------------------------

/// 死信消息信封
///
/// 包装原始消息，附加失败原因、重试次数等元数据，
/// 便于在死信队列消费时决定是否重试或永久归档。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始消息标识（消息 key，缺失时用 topic/partition/offset 拼接）
    pub message_id: String,
    /// 原始 topic
    pub source_topic: String,
    /// 原始消息内容（JSON 序列化的字符串）
    pub payload: String,
    /// 失败原因
    pub error: String,
    /// 已重试次数
    pub retry_count: u32,
    /// 最大重试次数
    pub max_retries: u32,
    /// 首次失败时间
    pub first_failed_at: DateTime<Utc>,
    /// 最近失败时间
    pub last_failed_at: DateTime<Utc>,
    /// 下次重试时间（None 表示不再重试）
    pub next_retry_at: Option<DateTime<Utc>>,
    /// 来源服务
    pub source_service: String,
}

impl DeadLetterMessage {
    /// 创建新的死信消息
    ///
    /// 首次进入 DLQ 时 retry_count 为 0，next_retry_at 立即设置为当前时间，
    /// 让 DLQ 消费者在首轮扫描时即可尝试重新投递。
    pub fn new(
        message_id: impl Into<String>,
        source_topic: impl Into<String>,
        payload: impl Into<String>,
        error: impl Into<String>,
        max_retries: u32,
        source_service: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            message_id: message_id.into(),
            source_topic: source_topic.into(),
            payload: payload.into(),
            error: error.into(),
            retry_count: 0,
            max_retries,
            first_failed_at: now,
            last_failed_at: now,
            next_retry_at: Some(now),
            source_service: source_service.into(),
        }
    }

    /// 是否应继续重试
    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 以既有的重投递次数恢复计数
    ///
    /// 消息不是第一次进入死信队列时调用：根据退避策略重新计算下一次
    /// 重试时间；已达上限则 next_retry_at 置为 None，表示不再重试。
    pub fn with_prior_retries(mut self, retries: u32, retry_policy: &RetryPolicy) -> Self {
        self.retry_count = retries;

        if self.should_retry() {
            let delay = retry_policy.delay_for_attempt(retries);
            self.next_retry_at =
                Some(self.last_failed_at + chrono::Duration::from_std(delay).unwrap_or_default());
        } else {
            // 已耗尽重试机会，不再安排重试
            self.next_retry_at = None;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// DlqProducer — 将失败消息发送到死信队列
// ---------------------------------------------------------------------------

/// DLQ 生产者
///
/// 消费者在消息处理失败后调用此组件将消息写入死信队列，
/// 而非直接丢弃。保证消息最终会被重试或人工处理。
pub struct DlqProducer {
    producer: KafkaProducer,
    source_service: String,
    retry_policy: RetryPolicy,
}

impl DlqProducer {
    pub fn new(producer: KafkaProducer, source_service: &str, retry_policy: RetryPolicy) -> Self {
        Self {
            producer,
            source_service: source_service.to_string(),
            retry_policy,
        }
    }

    /// 将失败消息发送到死信队列
    pub async fn send_to_dlq(
        &self,
        message_id: &str,
        source_topic: &str,
        payload: &str,
        error: &str,
    ) -> Result<(), CoreError> {
        let dlq_msg = DeadLetterMessage::new(
            message_id,
            source_topic,
            payload,
            error,
            self.retry_policy.max_retries,
            &self.source_service,
        );

        self.producer
            .send_json(topics::DEAD_LETTER_QUEUE, message_id, &dlq_msg)
            .await?;

        warn!(message_id, source_topic, error, "消息已发送到死信队列");

        Ok(())
    }

    /// 直接发送消费到的原始消息
    ///
    /// 便捷方法：自动提取消息 key 作为 message_id（缺失时用
    /// topic/partition/offset 拼接），负载按 UTF-8 透传。
    /// 消息头中的重投递计数被延续到新的死信信封中，保证
    /// "失败 -> 死信 -> 重投"的循环次数有界。
    pub async fn send_message_to_dlq(
        &self,
        msg: &ConsumerMessage,
        error: &str,
    ) -> Result<(), CoreError> {
        let message_id = msg
            .key
            .clone()
            .unwrap_or_else(|| format!("{}-{}-{}", msg.topic, msg.partition, msg.offset));
        let payload = String::from_utf8_lossy(&msg.payload).into_owned();

        let prior_retries = msg
            .headers
            .get(RETRY_COUNT_HEADER)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);

        let dlq_msg = DeadLetterMessage::new(
            &message_id,
            &msg.topic,
            payload,
            error,
            self.retry_policy.max_retries,
            &self.source_service,
        )
        .with_prior_retries(prior_retries, &self.retry_policy);

        self.producer
            .send_json(topics::DEAD_LETTER_QUEUE, &message_id, &dlq_msg)
            .await?;

        warn!(
            message_id,
            source_topic = %msg.topic,
            retry_count = dlq_msg.retry_count,
            error,
            "消息已发送到死信队列"
        );

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DlqConsumer — 处理死信队列消息
// ---------------------------------------------------------------------------

/// DLQ 消费者
///
/// 持续消费死信队列，对尚有重试机会且已到达重试时间的消息重新投递到原始 topic。
/// 超过重试上限的消息记录日志以便人工介入。
pub struct DlqConsumer {
    consumer: KafkaConsumer,
    /// 将待重试的消息发回原始 topic
    retry_producer: KafkaProducer,
}

impl DlqConsumer {
    /// 创建 DLQ 消费者
    ///
    /// 使用 `.dlq` 后缀作为独立消费组，与业务消费者互不干扰
    pub fn new(config: &AppConfig, retry_producer: KafkaProducer) -> Result<Self, CoreError> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("dlq"))?;
        consumer.subscribe(&[topics::DEAD_LETTER_QUEUE])?;

        info!(
            "DLQ 消费者已创建，订阅 topic: {}",
            topics::DEAD_LETTER_QUEUE
        );

        Ok(Self {
            consumer,
            retry_producer,
        })
    }

    /// 启动 DLQ 消费循环
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let retry_producer = self.retry_producer.clone();

        self.consumer
            .start(shutdown, move |msg| {
                let producer = retry_producer.clone();
                async move { handle_dlq_message(&msg, &producer).await }
            })
            .await;

        info!("DLQ 消费循环已退出");
    }
}

/// 处理单条死信消息
///
/// 仍可重试的消息：等待退避时间到期后将原始 payload 发回 source_topic，
/// 并在消息头中携带递增后的重投递计数，由业务消费者重新处理。
/// DLQ 分区本质上是一个延迟队列，阻塞等待到期是预期行为。
/// 已耗尽重试次数的消息记录错误日志，等待人工介入。
async fn handle_dlq_message(
    msg: &ConsumerMessage,
    retry_producer: &KafkaProducer,
) -> Result<(), CoreError> {
    let dlq_msg: DeadLetterMessage = msg.deserialize_payload()?;

    if !dlq_msg.should_retry() {
        // 已耗尽重试次数，需人工介入
        error!(
            message_id = %dlq_msg.message_id,
            source_topic = %dlq_msg.source_topic,
            source_service = %dlq_msg.source_service,
            retry_count = dlq_msg.retry_count,
            max_retries = dlq_msg.max_retries,
            first_failed_at = %dlq_msg.first_failed_at,
            last_failed_at = %dlq_msg.last_failed_at,
            error = %dlq_msg.error,
            "死信消息已耗尽重试次数，需人工介入"
        );
        return Ok(());
    }

    // 退避时间未到则就地等待
    if let Some(next_retry) = dlq_msg.next_retry_at {
        let now = Utc::now();
        if next_retry > now {
            let wait = (next_retry - now).to_std().unwrap_or_default();
            info!(
                message_id = %dlq_msg.message_id,
                wait_ms = wait.as_millis() as u64,
                "死信消息重试时间未到，等待退避到期"
            );
            tokio::time::sleep(wait).await;
        }
    }

    info!(
        message_id = %dlq_msg.message_id,
        source_topic = %dlq_msg.source_topic,
        retry_count = dlq_msg.retry_count,
        max_retries = dlq_msg.max_retries,
        "重试死信消息，发回原始 topic"
    );

    let headers = HashMap::from([(
        RETRY_COUNT_HEADER.to_string(),
        (dlq_msg.retry_count + 1).to_string(),
    )]);

    retry_producer
        .send_with_headers(
            &dlq_msg.source_topic,
            &dlq_msg.message_id,
            dlq_msg.payload.as_bytes(),
            &headers,
        )
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
