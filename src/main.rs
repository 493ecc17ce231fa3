use std::net::{IpAddr, SocketAddr};

use axum::{
    Router,
    routing::{delete, get, patch, post},
};
use backend::{
    AppState,
    config::Config,
    middleware::{auth_middleware, log_errors},
    routes,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let state = AppState {
        pool,
        config: config.clone(),
    };

    // 公开路由：注册、登录、附近活动检索
    let public_routes = Router::new()
        .route("/users/register", post(routes::user::register))
        .route("/users/login", post(routes::user::login))
        .route("/activities/nearby", get(routes::activity::find_nearby));

    let protected_routes = Router::new()
        // 用户
        .route("/user", get(routes::user::me))
        .route("/user", patch(routes::user::update_profile))
        .route("/user/address", get(routes::user::get_address))
        .route("/user/address", post(routes::user::set_address))
        .route("/user/tags", post(routes::user::follow_tags))
        .route("/user/activities", get(routes::activity::list_user_activities))
        .route("/user/groups", get(routes::group::list_user_groups))
        .route("/user/memberships", get(routes::group::list_user_memberships))
        // 活动
        .route("/activities/individual", post(routes::activity::create_individual))
        .route("/activities/group", post(routes::activity::create_group_activity))
        .route("/activities/{uuid}", get(routes::activity::get_activity))
        .route("/activities/{uuid}", patch(routes::activity::update_activity))
        .route("/activities/{uuid}", delete(routes::activity::delete_activity))
        .route("/activities/{uuid}/tags", post(routes::activity::replace_tags))
        .route("/activities/{uuid}/address", get(routes::activity::get_address))
        .route("/activities/{uuid}/address", post(routes::activity::set_address))
        // 报名与审批
        .route("/activities/{uuid}/requests", post(routes::request::join_activity))
        .route("/activities/{uuid}/requests", get(routes::request::list_requests))
        .route(
            "/activities/{uuid}/requests/{request_uuid}",
            post(routes::request::review_request),
        )
        // 群组
        .route("/groups", post(routes::group::create_group))
        .route("/groups/{uuid}", get(routes::group::get_group))
        .route("/groups/{uuid}", patch(routes::group::update_group))
        .route("/groups/{uuid}", delete(routes::group::delete_group))
        .route("/groups/{uuid}/memberships", get(routes::group::list_memberships))
        .route("/groups/{uuid}/memberships", post(routes::group::add_membership))
        .route("/groups/{uuid}/activities", get(routes::group::list_group_activities))
        // 成员关系
        .route("/memberships/{uuid}", get(routes::group::get_membership))
        .route("/memberships/{uuid}", post(routes::group::update_membership))
        .route("/memberships/{uuid}", delete(routes::group::delete_membership))
        // 帖子与评论
        .route("/groups/{uuid}/posts", get(routes::post::list_group_posts))
        .route("/groups/{uuid}/posts", post(routes::post::create_group_post))
        .route("/activities/{uuid}/posts", get(routes::post::list_activity_posts))
        .route("/activities/{uuid}/posts", post(routes::post::create_activity_post))
        .route("/posts/{uuid}", get(routes::post::get_post))
        .route("/posts/{uuid}", delete(routes::post::delete_post))
        .route("/posts/{uuid}/comments", post(routes::post::create_comment))
        .route("/comments/{uuid}", delete(routes::post::delete_comment))
        // 应用认证中间件
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let router = Router::new().merge(public_routes).merge(protected_routes);

    // 添加错误日志中间件
    let router = router.layer(axum::middleware::from_fn(log_errors));

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    let app = router.with_state(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
