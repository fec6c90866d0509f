// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Demo network: one node per configured distributor, one uniqueness
//! authority, all in this process and served from a single listener under
//! `/nodes/{node}`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use custody_node::{
    api,
    config::{NodeSettings, ProtocolConfig, DEFAULT_LOG_FILTER},
    custody::{IdentityDirectory, NodeIdentity},
    messaging::ChannelNetwork,
    node::CustodyNode,
    notary::LocalUniquenessAuthority,
    protocol::FlowContext,
    state::AppState,
    storage::{paths::slug, StoragePaths, VaultDatabase},
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() {
    let settings = NodeSettings::from_env();
    init_tracing(settings.json_logs);

    if let Err(e) = run(settings).await {
        error!(error = %e, "Custody network failed");
        std::process::exit(1);
    }
}

async fn run(settings: NodeSettings) -> Result<(), BoxError> {
    let paths = StoragePaths::new(&settings.data_dir);
    let config = ProtocolConfig::from_env();
    let shutdown = CancellationToken::new();

    let authority_identity =
        NodeIdentity::load_or_generate("Uniqueness Authority", &paths.authority_key())?;
    let authority =
        LocalUniquenessAuthority::open(authority_identity, &paths.authority_ledger())?;
    let network = ChannelNetwork::new();
    let directory = IdentityDirectory::new();

    let mut app = api::docs();
    let mut nodes = Vec::new();

    for name in &settings.distributors {
        let identity = NodeIdentity::load_or_generate(name.as_str(), &paths.node_key(name))?;
        let vault = VaultDatabase::open(&paths.node_vault(name))?;
        let (messenger, incoming) = network.join(identity.party().clone()).await;

        let ctx = Arc::new(FlowContext {
            identity,
            vault: Arc::new(vault),
            messaging: Arc::new(messenger),
            authority: Arc::new(authority.clone()),
            config: config.clone(),
        });
        let node = Arc::new(CustodyNode::new(ctx, directory.clone()));

        let server = node.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { server.serve(incoming, token).await });
        tokio::spawn(node.finality_retrier().run(shutdown.clone()));

        let state = AppState::new(node.clone()).with_data_dir(paths.node_dir(name));
        let mount = format!("/nodes/{}", slug(name));
        info!(party = %name, mount = %mount, "Node started");
        app = app.nest(&mount, api::routes(state));
        nodes.push(node);
    }

    // Every responder loop is up, so resumed flows can reach their peers.
    for node in nodes {
        tokio::spawn(async move {
            if let Err(e) = node.resume_flows().await {
                warn!(party = %node.party(), error = %e, "Flow recovery failed");
            }
        });
    }

    let app: Router = api::with_middleware(app);
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        addr = %addr,
        distributors = settings.distributors.len(),
        "Custody network listening (docs at /docs)"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown requested");
    shutdown.cancel();
}
