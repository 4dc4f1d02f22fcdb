//! 库存服务 gRPC 客户端封装
//!
//! 订单编排消费三个操作：查询可用库存、整体预占（全部成功或全部失败）、
//! 释放预占。释放是补偿操作——任何会留下悬挂预占的失败路径都必须调用它。

use std::time::Duration;

use async_trait::async_trait;
use commerce_proto::inventory::inventory_service_client::InventoryServiceClient;
use commerce_proto::inventory::{
    CheckStockRequest, ReleaseStockRequest, ReserveStockRequest, StockItem,
};
use commerce_shared::error::CoreError;
use tonic::transport::Channel;
use tracing::{debug, info, warn};

use crate::error::{OrderError, Result};
use crate::models::OrderItem;

const SERVICE_NAME: &str = "inventory-service";

// ---------------------------------------------------------------------------
// Trait 抽象 — 便于测试时替换为 mock 实现
// ---------------------------------------------------------------------------

/// 库存预占结果
#[derive(Debug, Clone)]
pub struct ReservationOutcome {
    pub success: bool,
    pub message: String,
}

/// 库存预占的抽象接口
#[async_trait]
pub trait StockReservation: Send + Sync {
    /// 查询单个商品的可用库存数量
    async fn check(&self, product_id: &str) -> Result<i32>;

    /// 为订单整体预占库存
    ///
    /// 全部成功或全部失败；`success == false` 时不会留下部分预占。
    async fn reserve(&self, order_id: &str, items: &[OrderItem]) -> Result<ReservationOutcome>;

    /// 释放订单的库存预占（补偿操作）
    async fn release(&self, order_id: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// gRPC 客户端实现
// ---------------------------------------------------------------------------

/// 库存服务 gRPC 客户端（懒连接模式）
pub struct InventoryGrpcClient {
    client: InventoryServiceClient<Channel>,
    timeout: Duration,
}

impl InventoryGrpcClient {
    pub fn new(addr: &str, timeout: Duration) -> Result<Self> {
        let channel = tonic::transport::Endpoint::from_shared(addr.to_string())
            .map_err(|e| {
                OrderError::Core(CoreError::Config(format!("无效的库存服务地址: {e}")))
            })?
            .connect_lazy();

        info!(addr, "库存服务 gRPC 客户端已初始化（懒连接模式）");

        Ok(Self {
            client: InventoryServiceClient::new(channel),
            timeout,
        })
    }

    /// 统一的超时与错误转换
    fn map_status(status: tonic::Status, operation: &str) -> OrderError {
        OrderError::Core(CoreError::ExternalService {
            service: SERVICE_NAME.to_string(),
            message: format!("{operation} 调用失败: {status}"),
        })
    }
}

#[async_trait]
impl StockReservation for InventoryGrpcClient {
    async fn check(&self, product_id: &str) -> Result<i32> {
        let request = CheckStockRequest {
            product_id: product_id.to_string(),
        };

        debug!(product_id, "调用 CheckStock");

        let mut client = self.client.clone();
        let response = tokio::time::timeout(self.timeout, client.check_stock(request))
            .await
            .map_err(|_| {
                OrderError::Core(CoreError::ExternalServiceTimeout {
                    service: SERVICE_NAME.to_string(),
                })
            })?
            .map_err(|status| Self::map_status(status, "CheckStock"))?;

        Ok(response.into_inner().available)
    }

    async fn reserve(&self, order_id: &str, items: &[OrderItem]) -> Result<ReservationOutcome> {
        let request = ReserveStockRequest {
            order_id: order_id.to_string(),
            items: items
                .iter()
                .map(|item| StockItem {
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                })
                .collect(),
        };

        debug!(order_id, items = items.len(), "调用 ReserveStock");

        let mut client = self.client.clone();
        let response = tokio::time::timeout(self.timeout, client.reserve_stock(request))
            .await
            .map_err(|_| {
                OrderError::Core(CoreError::ExternalServiceTimeout {
                    service: SERVICE_NAME.to_string(),
                })
            })?
            .map_err(|status| Self::map_status(status, "ReserveStock"))?;

        let reserve_response = response.into_inner();

        if reserve_response.success {
            info!(order_id, "库存预占成功");
        } else {
            warn!(
                order_id,
                message = %reserve_response.message,
                "库存预占未成功"
            );
        }

        Ok(ReservationOutcome {
            success: reserve_response.success,
            message: reserve_response.message,
        })
    }

    async fn release(&self, order_id: &str) -> Result<()> {
        let request = ReleaseStockRequest {
            order_id: order_id.to_string(),
        };

        debug!(order_id, "调用 ReleaseStock");

        let mut client = self.client.clone();
        let response = tokio::time::timeout(self.timeout, client.release_stock(request))
            .await
            .map_err(|_| {
                OrderError::Core(CoreError::ExternalServiceTimeout {
                    service: SERVICE_NAME.to_string(),
                })
            })?
            .map_err(|status| Self::map_status(status, "ReleaseStock"))?;

        let release_response = response.into_inner();
        if release_response.success {
            info!(order_id, "库存预占已释放");
        } else {
            warn!(
                order_id,
                message = %release_response.message,
                "库存预占释放未成功"
            );
        }

        Ok(())
    }
}
