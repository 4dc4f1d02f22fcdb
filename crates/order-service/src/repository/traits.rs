//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Order, OrderStatus};

/// 状态迁移的结果
///
/// 区分"已应用"与"因终态保护而跳过"：后者对消费者而言是确定性的
/// 空操作，应当提交位点而不是重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// 状态已更新
    Applied,
    /// 订单已处于终态，本次迁移被跳过
    SkippedTerminal,
}

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    /// 在单个事务中持久化订单头和全部行项目
    ///
    /// 订单 ID 已存在时返回 `Conflict`。
    async fn save(&self, order: &Order) -> Result<()>;

    /// 带终态保护的状态迁移
    ///
    /// 通过条件更新在存储层原子地实施保护：当前状态为终态时不做任何
    /// 修改并返回 `SkippedTerminal`。行级写锁保证同一订单上的并发迁移
    /// 被串行化，不同订单之间互不影响。
    async fn transition_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<StatusTransition>;

    /// 按 ID 查询订单及行项目（行项目保持插入顺序）
    async fn find_by_id(&self, order_id: &str) -> Result<Order>;

    /// 按用户分页查询订单，最新的在前
    ///
    /// `page` 从 1 开始；`page_size <= 0` 时使用默认值 10；
    /// 超出范围的页返回空列表而非错误。
    async fn list_by_user(&self, user_id: &str, page: i32, page_size: i32) -> Result<Vec<Order>>;
}
