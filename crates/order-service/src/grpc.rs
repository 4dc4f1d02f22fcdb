//! gRPC 服务端实现
//!
//! 将编排器暴露为 `order.OrderService` gRPC 接口，处理 Proto 类型与
//! 内部领域模型之间的转换。错误转换集中在 `error` 模块的
//! `From<OrderError> for Status` 中。

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use tonic::{Request, Response, Status};
use tracing::instrument;

use commerce_proto::order::{
    CreateOrderRequest as ProtoCreateOrderRequest, GetOrderRequest, ListOrdersRequest,
    ListOrdersResponse, OrderItem as ProtoOrderItem, OrderResponse,
    order_service_server::OrderService,
};

use crate::models::Order;
use crate::repository::OrderRepositoryTrait;
use crate::service::{CreateOrderCommand, NewOrderItem, OrderOrchestrator};

// ==================== 类型转换辅助函数 ====================

/// 将 Proto 请求转换为服务层命令
///
/// 请求中的 unit_price 字段被忽略：单价只能来自商品服务的权威数据。
fn command_from_proto(req: ProtoCreateOrderRequest) -> CreateOrderCommand {
    CreateOrderCommand {
        user_id: req.user_id,
        items: req
            .items
            .into_iter()
            .map(|item| NewOrderItem::new(item.product_id, item.quantity))
            .collect(),
        address: req.address,
        currency: req.currency,
    }
}

/// 将领域订单转换为 Proto 响应
fn order_to_response(order: &Order) -> OrderResponse {
    OrderResponse {
        order_id: order.id.clone(),
        user_id: order.user_id.clone(),
        items: order
            .items
            .iter()
            .map(|item| ProtoOrderItem {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price.to_f64().unwrap_or_default(),
            })
            .collect(),
        address: order.address.clone(),
        currency: order.currency.clone(),
        total_amount: order.amount.to_f64().unwrap_or_default(),
        status: order.status.as_str().to_string(),
        created_at: order.created_at.to_rfc3339(),
        updated_at: order.updated_at.to_rfc3339(),
    }
}

// ==================== gRPC 服务实现 ====================

/// 订单服务 gRPC 实现
pub struct OrderGrpcService<R: OrderRepositoryTrait> {
    orchestrator: Arc<OrderOrchestrator<R>>,
}

impl<R: OrderRepositoryTrait> OrderGrpcService<R> {
    pub fn new(orchestrator: Arc<OrderOrchestrator<R>>) -> Self {
        Self { orchestrator }
    }
}

#[tonic::async_trait]
impl<R: OrderRepositoryTrait + 'static> OrderService for OrderGrpcService<R> {
    #[instrument(skip(self, request))]
    async fn create_order(
        &self,
        request: Request<ProtoCreateOrderRequest>,
    ) -> Result<Response<OrderResponse>, Status> {
        let command = command_from_proto(request.into_inner());
        let order = self.orchestrator.create_order(command).await?;
        Ok(Response::new(order_to_response(&order)))
    }

    #[instrument(skip(self, request))]
    async fn get_order(
        &self,
        request: Request<GetOrderRequest>,
    ) -> Result<Response<OrderResponse>, Status> {
        let req = request.into_inner();
        let order = self.orchestrator.get_order(&req.order_id).await?;
        Ok(Response::new(order_to_response(&order)))
    }

    #[instrument(skip(self, request))]
    async fn list_orders(
        &self,
        request: Request<ListOrdersRequest>,
    ) -> Result<Response<ListOrdersResponse>, Status> {
        let req = request.into_inner();
        let orders = self
            .orchestrator
            .list_orders(&req.user_id, req.page, req.page_size)
            .await?;

        Ok(Response::new(ListOrdersResponse {
            orders: orders.iter().map(order_to_response).collect(),
        }))
    }
}
