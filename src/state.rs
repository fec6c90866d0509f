// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::path::PathBuf;
use std::sync::Arc;

use crate::node::CustodyNode;

#[derive(Clone)]
pub struct AppState {
    pub node: Arc<CustodyNode>,
    /// Directory holding this node's vault, checked by readiness probes.
    pub data_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(node: Arc<CustodyNode>) -> Self {
        Self {
            node,
            data_dir: None,
        }
    }

    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = Some(data_dir);
        self
    }
}
