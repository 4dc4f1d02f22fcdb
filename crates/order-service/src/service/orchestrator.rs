//! 订单编排器
//!
//! 下单工作流的实现：同步校验商品与库存 -> 整体预占 -> 事务落库 ->
//! 发起支付 -> 发布订单事件。任何会留下悬挂库存预占的失败路径都会
//! 调用补偿性的释放操作（落库失败、支付发起失败）。
//!
//! 同时承载对账逻辑：将支付/库存的异步结果映射为带终态保护的状态迁移，
//! 由 Kafka 消费者调用。所有依赖通过构造函数显式注入，没有进程级的
//! 全局客户端句柄。

use std::sync::Arc;

use chrono::Utc;
use commerce_shared::events::{
    OrderEvent, OrderEventItem, PaymentStatus, PaymentStatusUpdate, StockEvent, StockEventStatus,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clients::{PaymentInitiation, ProductLookup, StockReservation};
use crate::error::{OrderError, Result};
use crate::models::{Order, OrderItem, OrderStatus};
use crate::repository::{OrderRepositoryTrait, StatusTransition};
use crate::service::dto::CreateOrderCommand;
use crate::service::publisher::OrderEventPublisher;

/// 订单编排器
///
/// 仓储使用泛型参数（服务启动时即确定具体实现），三个下游客户端与
/// 事件发布器使用 trait object——它们会被多处持有，trait object 避免
/// 泛型参数在整个调用链上传播。
pub struct OrderOrchestrator<R: OrderRepositoryTrait> {
    repo: Arc<R>,
    products: Arc<dyn ProductLookup>,
    stock: Arc<dyn StockReservation>,
    payments: Arc<dyn PaymentInitiation>,
    publisher: Arc<dyn OrderEventPublisher>,
}

impl<R: OrderRepositoryTrait> OrderOrchestrator<R> {
    pub fn new(
        repo: Arc<R>,
        products: Arc<dyn ProductLookup>,
        stock: Arc<dyn StockReservation>,
        payments: Arc<dyn PaymentInitiation>,
        publisher: Arc<dyn OrderEventPublisher>,
    ) -> Self {
        Self {
            repo,
            products,
            stock,
            payments,
            publisher,
        }
    }

    // -----------------------------------------------------------------------
    // 下单工作流
    // -----------------------------------------------------------------------

    /// 创建订单
    ///
    /// 流程：
    /// 1. 请求校验（纯本地，无副作用）
    /// 2. 逐项解析商品单价并检查可用库存——任何一项失败即中止，
    ///    此时尚无任何副作用
    /// 3. 整体预占库存（全部成功或全部失败）
    /// 4. 以 PENDING 状态事务性落库；失败则释放预占
    /// 5. 发起支付；失败则将订单标记为 FAILED 并释放预占
    /// 6. 发布订单事件（失败只记录日志，订单已提交）
    pub async fn create_order(&self, cmd: CreateOrderCommand) -> Result<Order> {
        Self::validate(&cmd)?;

        // 逐项取权威单价、查可用库存，累计订单金额。
        // 单价在此刻锁定：之后的价格变更不会追溯影响本订单。
        let mut items = Vec::with_capacity(cmd.items.len());
        let mut amount = Decimal::ZERO;
        for line in &cmd.items {
            let product = self.products.get(&line.product_id).await?;

            let available = self.stock.check(&line.product_id).await?;
            if available < line.quantity {
                return Err(OrderError::InsufficientStock {
                    product_id: line.product_id.clone(),
                    requested: line.quantity,
                    available,
                });
            }

            amount += product.price * Decimal::from(line.quantity);
            items.push(OrderItem {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                unit_price: product.price,
            });
        }

        let order_id = Uuid::now_v7().to_string();

        // 整体预占：任何一项不足则整体失败，不会留下部分预占
        let reservation = self.stock.reserve(&order_id, &items).await?;
        if !reservation.success {
            info!(
                order_id,
                message = %reservation.message,
                "库存预占被拒绝，订单未创建"
            );
            return Err(OrderError::ReservationFailed(reservation.message));
        }

        let now = Utc::now();
        let order = Order {
            id: order_id.clone(),
            user_id: cmd.user_id,
            items,
            address: cmd.address,
            currency: cmd.currency,
            amount,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.repo.save(&order).await {
            // 预占已持有但订单未落库，必须补偿释放
            error!(order_id, error = %e, "订单落库失败，释放库存预占");
            self.release_reservation(&order_id).await;
            return Err(e);
        }

        info!(
            order_id,
            user_id = %order.user_id,
            amount = %order.amount,
            "订单已创建（PENDING）"
        );

        let initiated = match self
            .payments
            .initiate(&order_id, &order.user_id, order.amount, &order.currency)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                // 订单保留为 FAILED 供查询；预占必须补偿释放
                warn!(order_id, error = %e, "支付发起失败，订单标记为 FAILED");
                if let Err(te) = self
                    .repo
                    .transition_status(&order_id, OrderStatus::Failed)
                    .await
                {
                    error!(order_id, error = %te, "订单标记 FAILED 失败");
                }
                self.release_reservation(&order_id).await;
                return Err(OrderError::PaymentInitiationFailed {
                    order_id,
                    reason: e.to_string(),
                });
            }
        };

        // 事件流是派生视图，发布失败不回滚已提交的订单
        let event = Self::build_order_event(&order, &initiated.payment_id, &initiated.status);
        if let Err(e) = self.publisher.publish(&event).await {
            warn!(order_id = %order.id, error = %e, "发布订单事件失败");
        }

        Ok(order)
    }

    /// 按 ID 查询订单
    pub async fn get_order(&self, order_id: &str) -> Result<Order> {
        self.repo.find_by_id(order_id).await
    }

    /// 按用户分页查询订单（最新的在前）
    pub async fn list_orders(
        &self,
        user_id: &str,
        page: i32,
        page_size: i32,
    ) -> Result<Vec<Order>> {
        self.repo.list_by_user(user_id, page, page_size).await
    }

    // -----------------------------------------------------------------------
    // 异步对账
    // -----------------------------------------------------------------------

    /// 应用支付状态变更
    ///
    /// PAID -> 订单 PAID，FAILED -> 订单 FAILED，其余状态不做迁移。
    /// 终态订单上的事件是确定性的空操作——重复投递与乱序到达均幂等。
    pub async fn apply_payment_update(&self, update: &PaymentStatusUpdate) -> Result<()> {
        let target = match update.status {
            PaymentStatus::Paid => OrderStatus::Paid,
            PaymentStatus::Failed => OrderStatus::Failed,
            PaymentStatus::Pending | PaymentStatus::Unknown => {
                debug!(
                    order_id = %update.order_id,
                    status = ?update.status,
                    "支付状态无需映射，忽略"
                );
                return Ok(());
            }
        };

        self.apply_transition(&update.order_id, target, "payment-status-updates")
            .await
    }

    /// 应用库存事件
    ///
    /// `failed` 强制订单 FAILED；`reserved` 与未知状态不做迁移。
    /// 不携带订单 ID 的库存同步事件直接跳过。
    pub async fn apply_stock_event(&self, event: &StockEvent) -> Result<()> {
        if event.order_id.is_empty() {
            debug!("库存事件不携带订单 ID，忽略");
            return Ok(());
        }

        match event.status {
            StockEventStatus::Failed => {
                self.apply_transition(&event.order_id, OrderStatus::Failed, "stock-events")
                    .await
            }
            StockEventStatus::Reserved | StockEventStatus::Unknown => {
                debug!(
                    order_id = %event.order_id,
                    status = ?event.status,
                    "库存事件无需状态迁移，忽略"
                );
                Ok(())
            }
        }
    }

    /// 带终态保护的状态迁移，统一日志口径
    ///
    /// 订单不存在视为确定性空操作：事件引用了本服务不认识的订单，
    /// 重新投递不会改变结果。
    async fn apply_transition(
        &self,
        order_id: &str,
        target: OrderStatus,
        source: &str,
    ) -> Result<()> {
        match self.repo.transition_status(order_id, target).await {
            Ok(StatusTransition::Applied) => {
                info!(order_id, status = %target, source, "订单状态已更新");
                Ok(())
            }
            Ok(StatusTransition::SkippedTerminal) => {
                info!(
                    order_id,
                    status = %target,
                    source,
                    "订单已处于终态，事件视为空操作"
                );
                Ok(())
            }
            Err(OrderError::OrderNotFound(_)) => {
                warn!(order_id, source, "事件引用的订单不存在，忽略");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // 内部辅助
    // -----------------------------------------------------------------------

    fn validate(cmd: &CreateOrderCommand) -> Result<()> {
        if cmd.user_id.trim().is_empty() {
            return Err(OrderError::InvalidInput("user_id 不能为空".to_string()));
        }
        if cmd.address.trim().is_empty() {
            return Err(OrderError::InvalidInput("address 不能为空".to_string()));
        }
        if cmd.currency.trim().is_empty() {
            return Err(OrderError::InvalidInput("currency 不能为空".to_string()));
        }
        if cmd.items.is_empty() {
            return Err(OrderError::InvalidInput("items 不能为空".to_string()));
        }
        for item in &cmd.items {
            if item.product_id.trim().is_empty() {
                return Err(OrderError::InvalidInput(
                    "items 中存在空的 product_id".to_string(),
                ));
            }
            if item.quantity <= 0 {
                return Err(OrderError::InvalidInput(format!(
                    "商品 {} 的数量必须大于 0",
                    item.product_id
                )));
            }
        }
        Ok(())
    }

    /// 补偿性释放库存预占
    ///
    /// 释放失败只能记录日志等待人工对账——此时订单层面的失败原因
    /// 已经确定，不应被补偿操作的结果覆盖。
    async fn release_reservation(&self, order_id: &str) {
        if let Err(e) = self.stock.release(order_id).await {
            error!(order_id, error = %e, "释放库存预占失败，需人工对账");
        }
    }

    fn build_order_event(order: &Order, payment_id: &str, payment_status: &str) -> OrderEvent {
        OrderEvent {
            order_id: order.id.clone(),
            payment_id: payment_id.to_string(),
            user_id: order.user_id.clone(),
            amount: order.amount.to_f64().unwrap_or_default(),
            items: order
                .items
                .iter()
                .map(|item| OrderEventItem {
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price.to_f64().unwrap_or_default(),
                })
                .collect(),
            address: order.address.clone(),
            status: payment_status.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{PaymentInitiated, ProductInfo, ReservationOutcome};
    use crate::service::dto::NewOrderItem;
    use async_trait::async_trait;
    use commerce_shared::error::CoreError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    // -----------------------------------------------------------------------
    // 测试替身
    // -----------------------------------------------------------------------

    /// 内存版订单仓储，带与生产实现一致的终态保护语义
    #[derive(Default)]
    struct InMemoryOrderRepo {
        orders: Mutex<HashMap<String, Order>>,
        fail_save: Mutex<bool>,
        fail_transition: Mutex<bool>,
    }

    impl InMemoryOrderRepo {
        fn set_fail_save(&self, fail: bool) {
            *self.fail_save.lock().unwrap() = fail;
        }

        fn set_fail_transition(&self, fail: bool) {
            *self.fail_transition.lock().unwrap() = fail;
        }

        fn status_of(&self, order_id: &str) -> Option<OrderStatus> {
            self.orders.lock().unwrap().get(order_id).map(|o| o.status)
        }
    }

    #[async_trait]
    impl OrderRepositoryTrait for InMemoryOrderRepo {
        async fn save(&self, order: &Order) -> Result<()> {
            if *self.fail_save.lock().unwrap() {
                return Err(OrderError::Core(CoreError::Internal(
                    "模拟落库失败".to_string(),
                )));
            }
            let mut orders = self.orders.lock().unwrap();
            if orders.contains_key(&order.id) {
                return Err(OrderError::Conflict(order.id.clone()));
            }
            orders.insert(order.id.clone(), order.clone());
            Ok(())
        }

        async fn transition_status(
            &self,
            order_id: &str,
            status: OrderStatus,
        ) -> Result<StatusTransition> {
            if *self.fail_transition.lock().unwrap() {
                return Err(OrderError::Core(CoreError::Database(
                    sqlx::Error::PoolTimedOut,
                )));
            }
            let mut orders = self.orders.lock().unwrap();
            let order = orders
                .get_mut(order_id)
                .ok_or_else(|| OrderError::OrderNotFound(order_id.to_string()))?;
            if order.status.is_terminal() {
                return Ok(StatusTransition::SkippedTerminal);
            }
            order.status = status;
            order.updated_at = Utc::now();
            Ok(StatusTransition::Applied)
        }

        async fn find_by_id(&self, order_id: &str) -> Result<Order> {
            self.orders
                .lock()
                .unwrap()
                .get(order_id)
                .cloned()
                .ok_or_else(|| OrderError::OrderNotFound(order_id.to_string()))
        }

        async fn list_by_user(
            &self,
            user_id: &str,
            page: i32,
            page_size: i32,
        ) -> Result<Vec<Order>> {
            let page_size = if page_size <= 0 { 10 } else { page_size } as usize;
            let offset = ((page - 1).max(0) as usize) * page_size;
            let mut orders: Vec<Order> = self
                .orders
                .lock()
                .unwrap()
                .values()
                .filter(|o| o.user_id == user_id)
                .cloned()
                .collect();
            orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(orders.into_iter().skip(offset).take(page_size).collect())
        }
    }

    /// 固定商品目录
    struct FakeProducts {
        catalog: HashMap<String, ProductInfo>,
    }

    impl FakeProducts {
        fn with(products: &[(&str, &str, Decimal, i32)]) -> Self {
            let catalog = products
                .iter()
                .map(|(id, name, price, stock)| {
                    (
                        id.to_string(),
                        ProductInfo {
                            product_id: id.to_string(),
                            name: name.to_string(),
                            price: *price,
                            stock: *stock,
                        },
                    )
                })
                .collect();
            Self { catalog }
        }
    }

    #[async_trait]
    impl ProductLookup for FakeProducts {
        async fn get(&self, product_id: &str) -> Result<ProductInfo> {
            self.catalog
                .get(product_id)
                .cloned()
                .ok_or_else(|| OrderError::ProductNotFound(product_id.to_string()))
        }
    }

    /// 可编程的库存替身，记录预占与释放调用
    #[derive(Default)]
    struct FakeStock {
        available: HashMap<String, i32>,
        reject_reserve: bool,
        reserve_calls: Mutex<Vec<String>>,
        release_calls: Mutex<Vec<String>>,
    }

    impl FakeStock {
        fn with_stock(available: &[(&str, i32)]) -> Self {
            Self {
                available: available
                    .iter()
                    .map(|(id, qty)| (id.to_string(), *qty))
                    .collect(),
                ..Default::default()
            }
        }

        fn rejecting_reserve(mut self) -> Self {
            self.reject_reserve = true;
            self
        }

        fn reserved_orders(&self) -> Vec<String> {
            self.reserve_calls.lock().unwrap().clone()
        }

        fn released_orders(&self) -> Vec<String> {
            self.release_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StockReservation for FakeStock {
        async fn check(&self, product_id: &str) -> Result<i32> {
            Ok(*self.available.get(product_id).unwrap_or(&0))
        }

        async fn reserve(&self, order_id: &str, _items: &[OrderItem]) -> Result<ReservationOutcome> {
            self.reserve_calls.lock().unwrap().push(order_id.to_string());
            if self.reject_reserve {
                Ok(ReservationOutcome {
                    success: false,
                    message: "库存不足".to_string(),
                })
            } else {
                Ok(ReservationOutcome {
                    success: true,
                    message: "预占成功".to_string(),
                })
            }
        }

        async fn release(&self, order_id: &str) -> Result<()> {
            self.release_calls.lock().unwrap().push(order_id.to_string());
            Ok(())
        }
    }

    /// 可编程的支付替身
    #[derive(Default)]
    struct FakePayments {
        fail: bool,
        calls: Mutex<Vec<(String, Decimal, String)>>,
    }

    impl FakePayments {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl PaymentInitiation for FakePayments {
        async fn initiate(
            &self,
            order_id: &str,
            _user_id: &str,
            amount: Decimal,
            currency: &str,
        ) -> Result<PaymentInitiated> {
            self.calls
                .lock()
                .unwrap()
                .push((order_id.to_string(), amount, currency.to_string()));
            if self.fail {
                return Err(OrderError::Core(CoreError::ExternalService {
                    service: "payment-service".to_string(),
                    message: "支付网关不可用".to_string(),
                }));
            }
            Ok(PaymentInitiated {
                payment_id: "pay-1".to_string(),
                status: "PENDING".to_string(),
            })
        }
    }

    /// 记录已发布事件的替身
    #[derive(Default)]
    struct FakePublisher {
        fail: bool,
        events: Mutex<Vec<OrderEvent>>,
    }

    impl FakePublisher {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn published(&self) -> Vec<OrderEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OrderEventPublisher for FakePublisher {
        async fn publish(&self, event: &OrderEvent) -> std::result::Result<(), CoreError> {
            if self.fail {
                return Err(CoreError::Kafka("broker 不可达".to_string()));
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // 组装辅助
    // -----------------------------------------------------------------------

    struct Fixture {
        repo: Arc<InMemoryOrderRepo>,
        stock: Arc<FakeStock>,
        publisher: Arc<FakePublisher>,
        orchestrator: OrderOrchestrator<InMemoryOrderRepo>,
    }

    fn build(
        products: FakeProducts,
        stock: FakeStock,
        payments: FakePayments,
        publisher: FakePublisher,
    ) -> Fixture {
        let repo = Arc::new(InMemoryOrderRepo::default());
        let stock = Arc::new(stock);
        let publisher = Arc::new(publisher);
        let orchestrator = OrderOrchestrator::new(
            repo.clone(),
            Arc::new(products),
            stock.clone(),
            Arc::new(payments),
            publisher.clone(),
        );
        Fixture {
            repo,
            stock,
            publisher,
            orchestrator,
        }
    }

    fn usd_checkout(items: &[(&str, i32)]) -> CreateOrderCommand {
        CreateOrderCommand {
            user_id: "user-1".to_string(),
            items: items
                .iter()
                .map(|(id, qty)| NewOrderItem::new(*id, *qty))
                .collect(),
            address: "滨江大道 88 号".to_string(),
            currency: "USD".to_string(),
        }
    }

    fn price(value: i64, scale: u32) -> Decimal {
        Decimal::new(value, scale)
    }

    // -----------------------------------------------------------------------
    // 下单工作流
    // -----------------------------------------------------------------------

    /// 场景：单价 10 库存 5 的商品买 2 件 -> 预占成功 -> 订单 PENDING、
    /// 金额 20 -> 支付发起返回 pay-1/PENDING -> 订单事件已发布
    #[tokio::test]
    async fn test_create_order_happy_path() {
        let f = build(
            FakeProducts::with(&[("prod-a", "键盘", price(1000, 2), 5)]),
            FakeStock::with_stock(&[("prod-a", 5)]),
            FakePayments::default(),
            FakePublisher::default(),
        );

        let order = f
            .orchestrator
            .create_order(usd_checkout(&[("prod-a", 2)]))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.amount, price(2000, 2));
        assert_eq!(order.computed_amount(), order.amount);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].unit_price, price(1000, 2));

        // 订单已落库
        let persisted = f.repo.find_by_id(&order.id).await.unwrap();
        assert_eq!(persisted.status, OrderStatus::Pending);

        // 事件已发布，携带支付单号与初始状态
        let events = f.publisher.published();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].order_id, order.id);
        assert_eq!(events[0].payment_id, "pay-1");
        assert_eq!(events[0].status, "PENDING");
        assert!((events[0].amount - 20.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_create_order_amount_sums_multiple_items() {
        let f = build(
            FakeProducts::with(&[
                ("prod-a", "键盘", price(1050, 2), 10),
                ("prod-b", "鼠标", price(399, 2), 10),
            ]),
            FakeStock::with_stock(&[("prod-a", 10), ("prod-b", 10)]),
            FakePayments::default(),
            FakePublisher::default(),
        );

        let order = f
            .orchestrator
            .create_order(usd_checkout(&[("prod-a", 2), ("prod-b", 3)]))
            .await
            .unwrap();

        // 10.50*2 + 3.99*3 = 32.97
        assert_eq!(order.amount, price(3297, 2));
        // 行项目顺序与请求一致
        assert_eq!(order.items[0].product_id, "prod-a");
        assert_eq!(order.items[1].product_id, "prod-b");
    }

    #[tokio::test]
    async fn test_create_order_rejects_invalid_input() {
        let f = build(
            FakeProducts::with(&[("prod-a", "键盘", price(1000, 2), 5)]),
            FakeStock::with_stock(&[("prod-a", 5)]),
            FakePayments::default(),
            FakePublisher::default(),
        );

        let mut empty_user = usd_checkout(&[("prod-a", 1)]);
        empty_user.user_id = String::new();
        assert!(matches!(
            f.orchestrator.create_order(empty_user).await,
            Err(OrderError::InvalidInput(_))
        ));

        let mut empty_items = usd_checkout(&[]);
        empty_items.items.clear();
        assert!(matches!(
            f.orchestrator.create_order(empty_items).await,
            Err(OrderError::InvalidInput(_))
        ));

        let zero_quantity = usd_checkout(&[("prod-a", 0)]);
        assert!(matches!(
            f.orchestrator.create_order(zero_quantity).await,
            Err(OrderError::InvalidInput(_))
        ));

        // 校验失败不触达任何下游
        assert!(f.stock.reserved_orders().is_empty());
    }

    #[tokio::test]
    async fn test_create_order_unknown_product_aborts_before_side_effects() {
        let f = build(
            FakeProducts::with(&[("prod-a", "键盘", price(1000, 2), 5)]),
            FakeStock::with_stock(&[("prod-a", 5)]),
            FakePayments::default(),
            FakePublisher::default(),
        );

        let result = f
            .orchestrator
            .create_order(usd_checkout(&[("prod-missing", 1)]))
            .await;

        assert!(matches!(result, Err(OrderError::ProductNotFound(_))));
        assert!(f.stock.reserved_orders().is_empty());
        assert!(f.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_create_order_insufficient_stock_persists_nothing() {
        let f = build(
            FakeProducts::with(&[("prod-a", "键盘", price(1000, 2), 1)]),
            FakeStock::with_stock(&[("prod-a", 1)]),
            FakePayments::default(),
            FakePublisher::default(),
        );

        let result = f
            .orchestrator
            .create_order(usd_checkout(&[("prod-a", 2)]))
            .await;

        match result {
            Err(OrderError::InsufficientStock {
                product_id,
                requested,
                available,
            }) => {
                assert_eq!(product_id, "prod-a");
                assert_eq!(requested, 2);
                assert_eq!(available, 1);
            }
            other => panic!("预期 InsufficientStock，实际 {other:?}"),
        }

        // 检查阶段失败：未进入预占，也没有任何订单落库
        assert!(f.stock.reserved_orders().is_empty());
        assert!(f.repo.orders.lock().unwrap().is_empty());
    }

    /// 场景：预占被库存服务拒绝 -> 返回 ReservationFailed，
    /// 该订单 ID 从未落库，FindByID 返回 OrderNotFound
    #[tokio::test]
    async fn test_create_order_reservation_rejected() {
        let f = build(
            FakeProducts::with(&[("prod-a", "键盘", price(1000, 2), 5)]),
            FakeStock::with_stock(&[("prod-a", 5)]).rejecting_reserve(),
            FakePayments::default(),
            FakePublisher::default(),
        );

        let result = f
            .orchestrator
            .create_order(usd_checkout(&[("prod-a", 2)]))
            .await;

        assert!(matches!(result, Err(OrderError::ReservationFailed(_))));

        // 预占失败的订单 ID 从未持久化
        let attempted = f.stock.reserved_orders();
        assert_eq!(attempted.len(), 1);
        assert!(matches!(
            f.repo.find_by_id(&attempted[0]).await,
            Err(OrderError::OrderNotFound(_))
        ));
        assert!(f.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_create_order_save_failure_releases_reservation() {
        let f = build(
            FakeProducts::with(&[("prod-a", "键盘", price(1000, 2), 5)]),
            FakeStock::with_stock(&[("prod-a", 5)]),
            FakePayments::default(),
            FakePublisher::default(),
        );
        f.repo.set_fail_save(true);

        let result = f
            .orchestrator
            .create_order(usd_checkout(&[("prod-a", 1)]))
            .await;

        assert!(result.is_err());
        // 落库失败后预占被补偿释放
        let reserved = f.stock.reserved_orders();
        assert_eq!(f.stock.released_orders(), reserved);
    }

    #[tokio::test]
    async fn test_create_order_payment_failure_marks_failed_and_releases() {
        let f = build(
            FakeProducts::with(&[("prod-a", "键盘", price(1000, 2), 5)]),
            FakeStock::with_stock(&[("prod-a", 5)]),
            FakePayments::failing(),
            FakePublisher::default(),
        );

        let result = f
            .orchestrator
            .create_order(usd_checkout(&[("prod-a", 2)]))
            .await;

        let order_id = match result {
            Err(OrderError::PaymentInitiationFailed { order_id, .. }) => order_id,
            other => panic!("预期 PaymentInitiationFailed，实际 {other:?}"),
        };

        // 订单已落库且标记为 FAILED，仍可查询
        let order = f.repo.find_by_id(&order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Failed);

        // 预占被补偿释放，事件未发布
        assert_eq!(f.stock.released_orders(), vec![order_id]);
        assert!(f.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_create_order_publish_failure_is_non_fatal() {
        let f = build(
            FakeProducts::with(&[("prod-a", "键盘", price(1000, 2), 5)]),
            FakeStock::with_stock(&[("prod-a", 5)]),
            FakePayments::default(),
            FakePublisher::failing(),
        );

        // 订单已提交，发布失败不应使请求失败
        let order = f
            .orchestrator
            .create_order(usd_checkout(&[("prod-a", 1)]))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(f.repo.find_by_id(&order.id).await.is_ok());
    }

    // -----------------------------------------------------------------------
    // 异步对账
    // -----------------------------------------------------------------------

    async fn seeded_fixture() -> (Fixture, String) {
        let f = build(
            FakeProducts::with(&[("prod-a", "键盘", price(1000, 2), 5)]),
            FakeStock::with_stock(&[("prod-a", 5)]),
            FakePayments::default(),
            FakePublisher::default(),
        );
        let order = f
            .orchestrator
            .create_order(usd_checkout(&[("prod-a", 2)]))
            .await
            .unwrap();
        let id = order.id;
        (f, id)
    }

    fn paid_update(order_id: &str) -> PaymentStatusUpdate {
        PaymentStatusUpdate {
            payment_id: "pay-1".to_string(),
            order_id: order_id.to_string(),
            status: PaymentStatus::Paid,
        }
    }

    /// 场景续篇：payment-status-updates 带来 PAID -> 订单变为 PAID
    #[tokio::test]
    async fn test_payment_paid_transitions_order() {
        let (f, order_id) = seeded_fixture().await;

        f.orchestrator
            .apply_payment_update(&paid_update(&order_id))
            .await
            .unwrap();

        assert_eq!(f.repo.status_of(&order_id), Some(OrderStatus::Paid));
    }

    #[tokio::test]
    async fn test_payment_update_is_idempotent() {
        let (f, order_id) = seeded_fixture().await;

        // 同一事件投递两次，最终状态一致且第二次不报错
        f.orchestrator
            .apply_payment_update(&paid_update(&order_id))
            .await
            .unwrap();
        f.orchestrator
            .apply_payment_update(&paid_update(&order_id))
            .await
            .unwrap();

        assert_eq!(f.repo.status_of(&order_id), Some(OrderStatus::Paid));
    }

    #[tokio::test]
    async fn test_stale_stock_failure_after_paid_is_noop() {
        let (f, order_id) = seeded_fixture().await;

        f.orchestrator
            .apply_payment_update(&paid_update(&order_id))
            .await
            .unwrap();

        // 迟到的库存失败事件不得改写终态
        let stale = StockEvent {
            order_id: order_id.clone(),
            status: StockEventStatus::Failed,
            message: "预占回滚".to_string(),
        };
        f.orchestrator.apply_stock_event(&stale).await.unwrap();

        assert_eq!(f.repo.status_of(&order_id), Some(OrderStatus::Paid));
    }

    #[tokio::test]
    async fn test_stock_failure_on_pending_order_marks_failed() {
        let (f, order_id) = seeded_fixture().await;

        let event = StockEvent {
            order_id: order_id.clone(),
            status: StockEventStatus::Failed,
            message: "库存对账失败".to_string(),
        };
        f.orchestrator.apply_stock_event(&event).await.unwrap();

        assert_eq!(f.repo.status_of(&order_id), Some(OrderStatus::Failed));
    }

    #[tokio::test]
    async fn test_non_mappable_statuses_are_ignored() {
        let (f, order_id) = seeded_fixture().await;

        let pending = PaymentStatusUpdate {
            payment_id: "pay-1".to_string(),
            order_id: order_id.clone(),
            status: PaymentStatus::Pending,
        };
        f.orchestrator.apply_payment_update(&pending).await.unwrap();

        let unknown = PaymentStatusUpdate {
            payment_id: "pay-1".to_string(),
            order_id: order_id.clone(),
            status: PaymentStatus::Unknown,
        };
        f.orchestrator.apply_payment_update(&unknown).await.unwrap();

        let reserved = StockEvent {
            order_id: order_id.clone(),
            status: StockEventStatus::Reserved,
            message: String::new(),
        };
        f.orchestrator.apply_stock_event(&reserved).await.unwrap();

        // 一连串非映射事件后订单仍为 PENDING
        assert_eq!(f.repo.status_of(&order_id), Some(OrderStatus::Pending));
    }

    #[tokio::test]
    async fn test_event_for_unknown_order_is_definitive_noop() {
        let (f, _) = seeded_fixture().await;

        // 引用不存在订单的事件不应报错（重投不会改变结果）
        let result = f
            .orchestrator
            .apply_payment_update(&paid_update("ord-missing"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_transient_store_failure_propagates() {
        let (f, order_id) = seeded_fixture().await;
        f.repo.set_fail_transition(true);

        // 瞬时存储故障必须向上传播（消费者据此不提交位点）
        let result = f
            .orchestrator
            .apply_payment_update(&paid_update(&order_id))
            .await;
        match result {
            Err(e) => assert!(e.is_retryable()),
            Ok(()) => panic!("瞬时故障不应被吞掉"),
        }
    }

    #[tokio::test]
    async fn test_list_orders_pagination() {
        let f = build(
            FakeProducts::with(&[("prod-a", "键盘", price(100, 2), 1000)]),
            FakeStock::with_stock(&[("prod-a", 1000)]),
            FakePayments::default(),
            FakePublisher::default(),
        );

        for _ in 0..15 {
            f.orchestrator
                .create_order(usd_checkout(&[("prod-a", 1)]))
                .await
                .unwrap();
        }

        let page1 = f.orchestrator.list_orders("user-1", 1, 10).await.unwrap();
        let page2 = f.orchestrator.list_orders("user-1", 2, 10).await.unwrap();
        let page3 = f.orchestrator.list_orders("user-1", 3, 10).await.unwrap();

        assert_eq!(page1.len(), 10);
        assert_eq!(page2.len(), 5);
        // 超出范围的页返回空结果而非错误
        assert!(page3.is_empty());

        // 其他用户不可见
        let other = f.orchestrator.list_orders("user-2", 1, 10).await.unwrap();
        assert!(other.is_empty());
    }
}
