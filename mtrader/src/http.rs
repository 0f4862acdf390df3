//! HTTP surface (spec §6 "External interfaces"): plain order CRUD over
//! JSON, axum-routed alongside the fan-out layer's `/ws` route.

use crate::app::SharedApp;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mtrader_connector::BrokerBackend;
use mtrader_types::{AccountId, ClientOrderId, Order, OrderId, OrderKind, Side};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

pub fn router<B: BrokerBackend + 'static>(state: SharedApp<B>) -> Router {
    Router::new()
        .route("/orders", post(create_order::<B>))
        .route("/orders/:id", get(get_order::<B>))
        .route("/account/:account_id", get(get_account::<B>))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub account_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderKind,
    pub quantity: Decimal,
    pub strategy_id: Option<String>,
    pub model_id: Option<String>,
}

async fn create_order<B: BrokerBackend + 'static>(State(app): State<SharedApp<B>>, Json(body): Json<CreateOrderRequest>) -> Response {
    let client_order_id = ClientOrderId::new(Uuid::new_v4().to_string());
    let mut order = Order::new(
        client_order_id,
        AccountId(body.account_id),
        &body.symbol,
        body.side,
        body.order_type,
        body.quantity,
    );
    order.strategy_id = body.strategy_id.map(mtrader_types::StrategyId::new);
    order.model_id = body.model_id.map(mtrader_types::ModelId::new);

    match app.execution.submit(order).await {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn get_order<B: BrokerBackend + 'static>(State(app): State<SharedApp<B>>, Path(id): Path<Uuid>) -> Response {
    match app.repository.get_order(OrderId(id)).await {
        Ok(Some(order)) => (StatusCode::OK, Json(order)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn get_account<B: BrokerBackend + 'static>(State(app): State<SharedApp<B>>, Path(account_id): Path<Uuid>) -> Response {
    if AccountId(account_id) != app.settings.account_id {
        return StatusCode::NOT_FOUND.into_response();
    }
    match app.connector.account_info().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}
