//! 支付服务 gRPC 客户端封装
//!
//! 订单编排只消费 InitiatePayment：为已落库的订单发起支付并取回
//! 支付单号与初始状态。最终的支付结果经 Kafka 异步对账回订单。

use std::time::Duration;

use async_trait::async_trait;
use commerce_proto::payment::InitiatePaymentRequest;
use commerce_proto::payment::payment_service_client::PaymentServiceClient;
use commerce_shared::error::CoreError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tonic::transport::Channel;
use tracing::{debug, info};

use crate::error::{OrderError, Result};

const SERVICE_NAME: &str = "payment-service";

// ---------------------------------------------------------------------------
// Trait 抽象 — 便于测试时替换为 mock 实现
// ---------------------------------------------------------------------------

/// 支付发起结果
#[derive(Debug, Clone)]
pub struct PaymentInitiated {
    pub payment_id: String,
    /// PENDING / PAID / FAILED
    pub status: String,
}

/// 支付发起的抽象接口
#[async_trait]
pub trait PaymentInitiation: Send + Sync {
    async fn initiate(
        &self,
        order_id: &str,
        user_id: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<PaymentInitiated>;
}

// ---------------------------------------------------------------------------
// gRPC 客户端实现
// ---------------------------------------------------------------------------

/// 支付服务 gRPC 客户端（懒连接模式）
pub struct PaymentGrpcClient {
    client: PaymentServiceClient<Channel>,
    timeout: Duration,
}

impl PaymentGrpcClient {
    pub fn new(addr: &str, timeout: Duration) -> Result<Self> {
        let channel = tonic::transport::Endpoint::from_shared(addr.to_string())
            .map_err(|e| {
                OrderError::Core(CoreError::Config(format!("无效的支付服务地址: {e}")))
            })?
            .connect_lazy();

        info!(addr, "支付服务 gRPC 客户端已初始化（懒连接模式）");

        Ok(Self {
            client: PaymentServiceClient::new(channel),
            timeout,
        })
    }
}

#[async_trait]
impl PaymentInitiation for PaymentGrpcClient {
    async fn initiate(
        &self,
        order_id: &str,
        user_id: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<PaymentInitiated> {
        // gRPC 契约中金额为 double；精确十进制只存在于服务内部
        let wire_amount = amount.to_f64().ok_or_else(|| {
            OrderError::Core(CoreError::Internal(format!(
                "订单金额无法转换为 double: order_id={order_id}, amount={amount}"
            )))
        })?;

        let request = InitiatePaymentRequest {
            order_id: order_id.to_string(),
            user_id: user_id.to_string(),
            amount: wire_amount,
            currency: currency.to_string(),
        };

        debug!(order_id, user_id, %amount, currency, "调用 InitiatePayment");

        let mut client = self.client.clone();
        let response = tokio::time::timeout(self.timeout, client.initiate_payment(request))
            .await
            .map_err(|_| {
                OrderError::Core(CoreError::ExternalServiceTimeout {
                    service: SERVICE_NAME.to_string(),
                })
            })?
            .map_err(|status| {
                OrderError::Core(CoreError::ExternalService {
                    service: SERVICE_NAME.to_string(),
                    message: format!("InitiatePayment 调用失败: {status}"),
                })
            })?;

        let payment = response.into_inner();

        info!(
            order_id,
            payment_id = %payment.payment_id,
            status = %payment.status,
            "支付已发起"
        );

        Ok(PaymentInitiated {
            payment_id: payment.payment_id,
            status: payment.status,
        })
    }
}
