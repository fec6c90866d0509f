// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cargo custody endpoints.
//!
//! Queries read the local vault only. Commands start a custody flow on this
//! node and return once it is certified and committed locally, or with the
//! reason it was refused.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    custody::CustodyId,
    error::{CommandOutcome, CustodyError, ErrorBody},
    models::{
        CargoHistoryResponse, CargoListResponse, CargoView, CommandResponse,
        CreateScheduleRequest, CreateScheduleResponse, TransitionView,
    },
    state::AppState,
};

fn parse_id(raw: &str) -> Result<CustodyId, CustodyError> {
    raw.parse()
        .map_err(|_| CustodyError::InvalidRequest(format!("'{raw}' is not a cargo id")))
}

/// Enter new cargo with a route of distributor names.
#[utoipa::path(
    post,
    path = "/v1/schedule/create",
    tag = "Cargo",
    request_body = CreateScheduleRequest,
    responses(
        (status = 201, description = "Cargo created and certified", body = CreateScheduleResponse),
        (status = 403, description = "This node is not on the route", body = ErrorBody),
        (status = 404, description = "Unknown distributor name", body = ErrorBody),
        (status = 422, description = "Route is malformed", body = ErrorBody),
        (status = 503, description = "A distributor could not be reached", body = ErrorBody)
    )
)]
pub async fn create_schedule(
    State(state): State<AppState>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<CreateScheduleResponse>), CustodyError> {
    let id = state
        .node
        .create_custody_chain_by_names(&request.route)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateScheduleResponse {
            id: id.to_string(),
            outcome: CommandOutcome::Succeeded,
        }),
    ))
}

/// List every live custody record in this node's vault.
#[utoipa::path(
    get,
    path = "/v1/cargo",
    tag = "Cargo",
    responses(
        (status = 200, description = "Live custody records", body = CargoListResponse),
        (status = 500, description = "Vault unavailable", body = ErrorBody)
    )
)]
pub async fn list_cargo(
    State(state): State<AppState>,
) -> Result<Json<CargoListResponse>, CustodyError> {
    let cargo: Vec<CargoView> = state
        .node
        .list_live_records()?
        .iter()
        .map(|live| CargoView::new(live, state.node.available_actions(&live.record)))
        .collect();
    let total = cargo.len();

    Ok(Json(CargoListResponse { cargo, total }))
}

#[utoipa::path(
    get,
    path = "/v1/cargo/{id}",
    tag = "Cargo",
    params(("id" = String, Path, description = "Cargo lineage id")),
    responses(
        (status = 200, description = "Live custody record", body = CargoView),
        (status = 400, description = "Malformed id", body = ErrorBody),
        (status = 404, description = "No live record with this id", body = ErrorBody)
    )
)]
pub async fn get_cargo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CargoView>, CustodyError> {
    let id = parse_id(&id)?;
    let live = state.node.find_live_record(&id)?;
    let actions = state.node.available_actions(&live.record);
    Ok(Json(CargoView::new(&live, actions)))
}

/// Certified custody history of a cargo, including delivered ones.
#[utoipa::path(
    get,
    path = "/v1/cargo/{id}/history",
    tag = "Cargo",
    params(("id" = String, Path, description = "Cargo lineage id")),
    responses(
        (status = 200, description = "Applied transitions, oldest first", body = CargoHistoryResponse),
        (status = 400, description = "Malformed id", body = ErrorBody),
        (status = 404, description = "This node never saw the cargo", body = ErrorBody)
    )
)]
pub async fn get_cargo_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CargoHistoryResponse>, CustodyError> {
    let id = parse_id(&id)?;
    let transitions: Vec<TransitionView> = state
        .node
        .cargo_history(&id)?
        .iter()
        .map(TransitionView::from)
        .collect();
    let total = transitions.len();

    Ok(Json(CargoHistoryResponse {
        id: id.to_string(),
        transitions,
        total,
    }))
}

/// Signal that the cargo arrived here; this node takes custody.
#[utoipa::path(
    post,
    path = "/v1/cargo/{id}/arrived",
    tag = "Cargo",
    params(("id" = String, Path, description = "Cargo lineage id")),
    responses(
        (status = 200, description = "Custody transferred to this node", body = CommandResponse),
        (status = 403, description = "This node may not take custody", body = ErrorBody),
        (status = 404, description = "No live record with this id", body = ErrorBody),
        (status = 409, description = "Record already spent; refresh and retry", body = ErrorBody),
        (status = 422, description = "Out of sequence", body = ErrorBody),
        (status = 503, description = "Holder could not be reached", body = ErrorBody)
    )
)]
pub async fn signal_arrival(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, CustodyError> {
    let id = parse_id(&id)?;
    let record = state.node.signal_arrival(id).await?;

    Ok(Json(CommandResponse {
        id: id.to_string(),
        outcome: CommandOutcome::Succeeded,
        holder: Some(record.holder.name),
    }))
}

/// Signal delivery; the cargo leaves the chain.
#[utoipa::path(
    post,
    path = "/v1/cargo/{id}/deliver",
    tag = "Cargo",
    params(("id" = String, Path, description = "Cargo lineage id")),
    responses(
        (status = 200, description = "Cargo delivered", body = CommandResponse),
        (status = 403, description = "This node does not hold the cargo", body = ErrorBody),
        (status = 404, description = "No live record with this id", body = ErrorBody),
        (status = 409, description = "Record already spent; refresh and retry", body = ErrorBody)
    )
)]
pub async fn signal_delivery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, CustodyError> {
    let id = parse_id(&id)?;
    state.node.signal_delivery(id).await?;

    Ok(Json(CommandResponse {
        id: id.to_string(),
        outcome: CommandOutcome::Succeeded,
        holder: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::pair;
    use crate::node::CustodyAction;

    #[tokio::test]
    async fn create_then_list_shows_the_record_on_both_nodes() {
        let (a, b, _guard) = pair().await;

        let (status, Json(created)) = create_schedule(
            State(a.clone()),
            Json(CreateScheduleRequest {
                route: vec!["A".to_string(), "B".to_string()],
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.outcome, CommandOutcome::Succeeded);

        let Json(listed) = list_cargo(State(b.clone())).await.unwrap();
        assert_eq!(listed.total, 1);
        let cargo = &listed.cargo[0];
        assert_eq!(cargo.id, created.id);
        assert_eq!(cargo.holder, "A");
        assert_eq!(cargo.route, vec!["A", "B"]);
        assert_eq!(cargo.actions, vec![CustodyAction::Arrive]);
    }

    #[tokio::test]
    async fn arrival_then_delivery() {
        let (a, b, _guard) = pair().await;
        let id = a
            .node
            .create_custody_chain_by_names(&["A".to_string(), "B".to_string()])
            .await
            .unwrap()
            .to_string();

        let Json(arrived) = signal_arrival(State(b.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(arrived.holder.as_deref(), Some("B"));

        let Json(view) = get_cargo(State(b.clone()), Path(id.clone())).await.unwrap();
        assert_eq!(view.position, 1);
        assert_eq!(view.actions, vec![CustodyAction::Deliver]);

        signal_delivery(State(b.clone()), Path(id.clone()))
            .await
            .unwrap();
        let err = get_cargo(State(a.clone()), Path(id.clone())).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let Json(history) = get_cargo_history(State(a), Path(id)).await.unwrap();
        assert_eq!(history.total, 3);
        let actions: Vec<_> = history.transitions.iter().map(|t| t.action.as_str()).collect();
        assert_eq!(actions, vec!["create", "transfer", "terminate"]);
        assert_eq!(history.transitions[1].holder.as_deref(), Some("B"));
        assert!(history.transitions[2].holder.is_none());
    }

    #[tokio::test]
    async fn history_of_unknown_cargo_is_not_found() {
        let (a, _b, _guard) = pair().await;
        let unknown = CustodyId::new().to_string();
        let err = get_cargo_history(State(a), Path(unknown)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_id_is_a_bad_request() {
        let (a, _b, _guard) = pair().await;
        let err = get_cargo(State(a), Path("not-a-uuid".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delivery_by_non_holder_is_forbidden() {
        let (a, b, _guard) = pair().await;
        let id = a
            .node
            .create_custody_chain_by_names(&["A".to_string(), "B".to_string()])
            .await
            .unwrap();

        let err = signal_delivery(State(b), Path(id.to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.error_code(), "unauthorized_initiator");
    }
}
