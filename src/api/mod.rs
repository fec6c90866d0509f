// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    error::{CommandOutcome, ErrorBody},
    models::{
        CargoHistoryResponse, CargoListResponse, CargoView, CommandResponse,
        CreateScheduleRequest, CreateScheduleResponse, NodeInfo, PartyListResponse, PartyView,
        TransitionView,
    },
    node::CustodyAction,
    state::AppState,
};

pub mod cargo;
pub mod health;
pub mod parties;

/// Routes of one node, without documentation or middleware. Mounted as is
/// when several nodes share one listener.
pub fn routes(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/node", get(parties::get_node))
        .route("/parties", get(parties::list_parties))
        .route("/schedule/create", post(cargo::create_schedule))
        .route("/cargo", get(cargo::list_cargo))
        .route("/cargo/{id}", get(cargo::get_cargo))
        .route("/cargo/{id}/history", get(cargo::get_cargo_history))
        .route("/cargo/{id}/arrived", post(cargo::signal_arrival))
        .route("/cargo/{id}/deliver", post(cargo::signal_delivery))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state)
        .nest("/v1", v1_routes)
}

/// Swagger UI and the OpenAPI document.
pub fn docs() -> Router {
    SwaggerUi::new("/docs")
        .url("/api-doc/openapi.json", ApiDoc::openapi())
        .into()
}

/// Apply the HTTP middleware stack: request ids, tracing and CORS.
pub fn with_middleware(router: Router) -> Router {
    router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

/// Complete router for a single node.
pub fn router(state: AppState) -> Router {
    with_middleware(routes(state).merge(docs()))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        parties::get_node,
        parties::list_parties,
        cargo::create_schedule,
        cargo::list_cargo,
        cargo::get_cargo,
        cargo::get_cargo_history,
        cargo::signal_arrival,
        cargo::signal_delivery,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            PartyView,
            NodeInfo,
            PartyListResponse,
            CreateScheduleRequest,
            CreateScheduleResponse,
            CargoView,
            CargoListResponse,
            CargoHistoryResponse,
            TransitionView,
            CommandResponse,
            CustodyAction,
            CommandOutcome,
            ErrorBody,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Parties", description = "Node identity and known distributors"),
        (name = "Cargo", description = "Cargo custody queries and commands"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
pub(crate) mod testing {
    //! Two served nodes, A and B, for handler tests.

    use std::sync::Arc;

    use tempfile::TempDir;
    use tokio_util::sync::{CancellationToken, DropGuard};

    use crate::custody::{IdentityDirectory, NodeIdentity};
    use crate::messaging::ChannelNetwork;
    use crate::node::CustodyNode;
    use crate::notary::LocalUniquenessAuthority;
    use crate::protocol::testing::context;
    use crate::state::AppState;

    pub(crate) struct Guard {
        _dir: TempDir,
        _shutdown: DropGuard,
    }

    pub(crate) async fn pair() -> (AppState, AppState, Guard) {
        let dir = tempfile::tempdir().unwrap();
        let network = ChannelNetwork::new();
        let authority = LocalUniquenessAuthority::new(NodeIdentity::generate("Authority"));
        let directory = IdentityDirectory::new();
        let shutdown = CancellationToken::new();

        let mut states = Vec::new();
        for name in ["A", "B"] {
            let (ctx, incoming) = context(name, &network, &authority, &dir).await;
            let node = Arc::new(CustodyNode::new(ctx, directory.clone()));
            let server = node.clone();
            let token = shutdown.clone();
            tokio::spawn(async move { server.serve(incoming, token).await });
            states.push(AppState::new(node));
        }

        let b = states.pop().unwrap();
        let a = states.pop().unwrap();
        let guard = Guard {
            _dir: dir,
            _shutdown: shutdown.drop_guard(),
        };
        (a, b, guard)
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::testing::pair;
    use super::*;

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let (a, _b, _guard) = pair().await;
        let app = router(a);
        let _ = app.into_make_service();
    }

    #[tokio::test]
    async fn liveness_responds_with_request_id() {
        let (a, _b, _guard) = pair().await;
        let response = router(a)
            .oneshot(Request::get("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn create_over_http_then_fetch() {
        let (a, _b, _guard) = pair().await;
        let app = router(a);

        let response = app
            .clone()
            .oneshot(
                Request::post("/v1/schedule/create")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"route":["A","B"]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let created: CreateScheduleResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(created.outcome, CommandOutcome::Succeeded);
        let id = created.id;

        let response = app
            .oneshot(
                Request::get(format!("/v1/cargo/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cargo = json_body(response).await;
        assert_eq!(cargo["holder"], "A");
        assert_eq!(cargo["actions"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn refused_command_carries_error_code() {
        let (a, _b, _guard) = pair().await;
        let response = router(a)
            .oneshot(
                Request::post("/v1/schedule/create")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"route":["A"]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["error_code"], "malformed_proposal");
        assert_eq!(body["outcome"], "rejected");
    }
}
