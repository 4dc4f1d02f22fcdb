//! 订单编排服务入口
//!
//! 组装配置、数据库、Kafka、下游 gRPC 客户端与编排器，
//! 启动 gRPC 服务端、对账消费者和 DLQ 消费者，并处理优雅关闭。
//! 所有依赖在此一次性构造并显式注入，没有进程级的全局客户端句柄。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use commerce_proto::order::order_service_server::OrderServiceServer;
use commerce_shared::{
    config::AppConfig,
    database::Database,
    dlq::{DlqConsumer, DlqProducer},
    kafka::KafkaProducer,
    observability,
    retry::RetryPolicy,
};
use tokio::signal;
use tokio::sync::watch;
use tonic::transport::Server;
use tracing::info;

use order_service::{
    clients::{InventoryGrpcClient, PaymentGrpcClient, ProductGrpcClient},
    consumer::ReconcileConsumer,
    grpc::OrderGrpcService,
    repository::OrderRepository,
    service::{KafkaOrderEventPublisher, OrderOrchestrator},
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 统一加载配置：从 config/{service_name}.toml 加载，支持环境变量覆盖
    let config = AppConfig::load("order-service").unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 2. 初始化日志
    observability::init(&config.observability)?;

    info!("Starting order-service...");
    info!(environment = %config.environment, "Configuration loaded");

    let grpc_addr: SocketAddr = config.server_addr().parse()?;

    // 3. 初始化数据库连接并执行迁移
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;
    info!("Database connection established");

    // 4. 初始化 Kafka 生产者
    let producer = KafkaProducer::new(&config.kafka)?;

    // 5. 初始化下游 gRPC 客户端（懒连接，统一单次调用超时）
    let call_timeout = Duration::from_secs(config.downstream.request_timeout_seconds);
    let products = Arc::new(ProductGrpcClient::new(
        &config.downstream.product_addr,
        call_timeout,
    )?);
    let inventory = Arc::new(InventoryGrpcClient::new(
        &config.downstream.inventory_addr,
        call_timeout,
    )?);
    let payments = Arc::new(PaymentGrpcClient::new(
        &config.downstream.payment_addr,
        call_timeout,
    )?);
    info!("Downstream gRPC clients initialized");

    // 6. 组装编排器
    let repo = Arc::new(OrderRepository::new(db.pool().clone()));
    let publisher = Arc::new(KafkaOrderEventPublisher::new(producer.clone()));
    let orchestrator = Arc::new(OrderOrchestrator::new(
        repo,
        products,
        inventory,
        payments,
        publisher,
    ));
    info!("Order orchestrator initialized");

    // 7. 启动对账消费者与 DLQ 消费者
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let retry_policy = RetryPolicy::from_consumer_config(&config.consumer);
    let dlq_producer = Arc::new(DlqProducer::new(
        producer.clone(),
        &config.service_name,
        retry_policy,
    ));

    let reconcile = ReconcileConsumer::new(&config, orchestrator.clone(), dlq_producer)?;
    let reconcile_handle = tokio::spawn(reconcile.run(shutdown_rx.clone()));

    let dlq_consumer = DlqConsumer::new(&config, producer.clone())?;
    let dlq_handle = tokio::spawn(dlq_consumer.run(shutdown_rx.clone()));
    info!("Reconcile and DLQ consumers started");

    // 8. 启动 gRPC 服务
    let grpc_service = OrderGrpcService::new(orchestrator);
    info!("gRPC server listening on {}", grpc_addr);

    Server::builder()
        .add_service(OrderServiceServer::new(grpc_service))
        .serve_with_shutdown(grpc_addr, shutdown_signal())
        .await?;

    // 9. 通知消费循环退出并等待其自然结束
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(reconcile_handle, dlq_handle);

    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => tracing::error!("Failed to install signal handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
