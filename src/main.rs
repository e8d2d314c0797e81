//! pesa-bridge engine entry point.
//!
//! Wires the saga engine: PostgreSQL stores, the ledger RPC client with its
//! eager connection, the mobile-money HTTP client, and one worker per saga
//! step behind a dispatcher. Step messages arrive as JSON lines on stdin
//! (`{"topic": "...", "payload": {...}}`) - in a deployment the broker
//! consumer sits where the stdin loop sits here, calling the same
//! dispatcher with the same at-least-once semantics.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use pesa_bridge::config::AppConfig;
use pesa_bridge::ledger::{LedgerRpcClient, RpcLedgerGateway};
use pesa_bridge::mobile_money::HttpMobileMoneyClient;
use pesa_bridge::publisher::{MemoryPublisher, Publisher};
use pesa_bridge::saga::{
    ChargeWorker, ConfirmWorker, CreditWorker, DebitWorker, PayoutWorker, StepDispatcher,
};
use pesa_bridge::store::{
    MemoryAccountDirectory, MemorySecretStore, MemoryTransactionRepository,
    PgSecretStore, PgTransactionRepository, SecretStore, TransactionRepository,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[derive(Debug, Deserialize)]
struct InboundLine {
    topic: String,
    payload: serde_json::Value,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _log_guard = pesa_bridge::logging::init_logging(&config);

    tracing::info!(env = %env, build = env!("GIT_HASH"), "starting pesa-bridge engine");

    let (repo, secrets): (Arc<dyn TransactionRepository>, Arc<dyn SecretStore>) =
        match &config.postgres_url {
            Some(url) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(8)
                    .connect(url)
                    .await
                    .context("connecting to PostgreSQL")?;
                tracing::info!("using PostgreSQL stores");
                (
                    Arc::new(PgTransactionRepository::new(pool.clone())),
                    Arc::new(PgSecretStore::new(pool)),
                )
            }
            None => {
                tracing::warn!("no postgres_url configured - using in-memory stores");
                (
                    Arc::new(MemoryTransactionRepository::new()),
                    Arc::new(MemorySecretStore::new()),
                )
            }
        };

    // The ledger account directory is fed by the user-profile service; the
    // in-process directory here covers single-node deployments and tests.
    let accounts = Arc::new(MemoryAccountDirectory::new());

    let ledger_client = Arc::new(LedgerRpcClient::start(config.ledger.client_config()));
    let gateway = Arc::new(RpcLedgerGateway::new(
        Arc::clone(&ledger_client),
        config.ledger.account_id.clone(),
    ));
    let mobile_money = Arc::new(HttpMobileMoneyClient::new(
        config.mobile_money.client_config(),
    ));
    // The broker producer replaces this in a deployment; buffered messages
    // are lost on restart.
    tracing::warn!("no broker configured - outbound step messages buffered in memory");
    let publisher: Arc<dyn Publisher> = Arc::new(MemoryPublisher::new());

    let retry = config.saga.retry_policy();
    let dispatcher = StepDispatcher::new(
        ChargeWorker::new(
            Arc::clone(&repo),
            mobile_money.clone(),
            Arc::clone(&publisher),
            retry.clone(),
        ),
        ConfirmWorker::new(Arc::clone(&repo), Arc::clone(&publisher)),
        CreditWorker::new(
            Arc::clone(&repo),
            gateway.clone(),
            accounts.clone(),
            Arc::clone(&publisher),
            retry.clone(),
        ),
        DebitWorker::new(
            Arc::clone(&repo),
            gateway,
            accounts,
            Arc::clone(&secrets),
            Arc::clone(&publisher),
            retry.clone(),
        ),
        PayoutWorker::new(
            Arc::clone(&repo),
            mobile_money,
            Arc::clone(&publisher),
            retry,
            config.saga.payout_max_retries,
        ),
    );

    tracing::info!(
        ledger_url = %config.ledger.url,
        account_id = %config.ledger.account_id,
        "engine ready, consuming step messages from stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let inbound: InboundLine = match serde_json::from_str(&line) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable inbound line dropped");
                continue;
            }
        };
        if let Err(e) = dispatcher.dispatch(&inbound.topic, &inbound.payload).await {
            tracing::error!(topic = %inbound.topic, error = %e, "step handling failed");
        }
    }

    tracing::info!("input closed, shutting down");
    Ok(())
}
