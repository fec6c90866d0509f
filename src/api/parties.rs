// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use crate::{
    models::{NodeInfo, PartyListResponse, PartyView},
    state::AppState,
};

/// Identity of this node and the authority it trusts.
#[utoipa::path(
    get,
    path = "/v1/node",
    tag = "Parties",
    responses(
        (status = 200, description = "Local node identity", body = NodeInfo)
    )
)]
pub async fn get_node(State(state): State<AppState>) -> Json<NodeInfo> {
    Json(NodeInfo {
        party: state.node.party().into(),
        authority: state.node.authority().into(),
    })
}

/// Other distributors known to this node, usable in a route.
#[utoipa::path(
    get,
    path = "/v1/parties",
    tag = "Parties",
    responses(
        (status = 200, description = "Known distributors", body = PartyListResponse)
    )
)]
pub async fn list_parties(State(state): State<AppState>) -> Json<PartyListResponse> {
    let me = state.node.party();
    let parties: Vec<PartyView> = state
        .node
        .directory()
        .parties()
        .iter()
        .filter(|party| *party != me)
        .map(PartyView::from)
        .collect();
    let total = parties.len();
    Json(PartyListResponse { parties, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::pair;

    #[tokio::test]
    async fn node_reports_itself_and_its_authority() {
        let (a, _b, _guard) = pair().await;
        let Json(info) = get_node(State(a.clone())).await;
        assert_eq!(info.party.name, "A");
        assert_eq!(info.authority.name, "Authority");
        assert_ne!(info.party.key, info.authority.key);
    }

    #[tokio::test]
    async fn parties_exclude_the_local_node() {
        let (a, b, _guard) = pair().await;
        let Json(listed) = list_parties(State(a)).await;
        let names: Vec<_> = listed.parties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["B"]);
        assert_eq!(listed.total, 1);

        let Json(listed) = list_parties(State(b)).await;
        assert_eq!(listed.parties[0].name, "A");
    }
}
