// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custody Node - multi-party cargo custody transfer
//!
//! Every distributor on a cargo's route runs a node with its own vault.
//! Custody changes hands through signed proposals that a uniqueness
//! authority certifies at most once per consumed record, then every route
//! member commits the same outcome.
//!
//! ## Modules
//!
//! - `custody` - Records, proposals, identities and the rule verifier
//! - `protocol` - Initiator and responder flows, checkpoints, finality
//! - `messaging` - Point-to-point sessions between parties
//! - `notary` - Uniqueness authority
//! - `storage` - Per-node vault (redb)
//! - `node` - Command and query surface of one distributor
//! - `api` - HTTP API handlers (Axum)

pub mod api;
pub mod config;
pub mod custody;
pub mod error;
pub mod messaging;
pub mod models;
pub mod node;
pub mod notary;
pub mod protocol;
pub mod state;
pub mod storage;
