//! Async RPC client for the trading-ledger system.
//!
//! One long-lived WebSocket connection multiplexes every in-flight call.
//! The client is an explicit owned object: it holds its own connection task,
//! keepalive timer, correlation-id counter and pending-request table - no
//! global state. A single task owns the socket; callers talk to it over a
//! channel and wait on a oneshot completion handle, so no two connection
//! callbacks ever run concurrently.
//!
//! Lifecycle rules:
//! - The connection opens eagerly when the client starts.
//! - Every call registers `req_id -> oneshot sender` plus its own timeout
//!   timer (default 20 s, caller-overridable). The handle resolves exactly
//!   once: matching response or timeout, whichever comes first.
//! - A keepalive ping goes out every 30 s; pong frames are discarded before
//!   correlation lookup.
//! - On close or error the keepalive stops and reconnects are scheduled with
//!   exponential backoff: 1 s doubling to a 30 s cap, at most 10 consecutive
//!   attempts. Exhausting them is fatal and needs operator intervention. A
//!   successful reconnect resets the counter and reapplies authorization.
//! - Sending while disconnected neither blocks nor queues indefinitely: the
//!   frame rides the already-scheduled reconnect and the call times out on
//!   its own timer if the socket is not open in time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::error::GatewayError;
use super::protocol::{LedgerRequest, LedgerResponse, OP_AUTHORIZE};

/// Pending-request table: correlation id -> single-resolution handle.
pub(crate) type PendingMap = DashMap<u64, oneshot::Sender<Result<serde_json::Value, GatewayError>>>;

#[derive(Debug, Clone)]
pub struct LedgerClientConfig {
    pub url: String,
    /// Authorization token, reapplied after every reconnect.
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
    pub keepalive_interval: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for LedgerClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9443/rpc".to_string(),
            auth_token: None,
            request_timeout: Duration::from_secs(20),
            keepalive_interval: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
            max_reconnect_attempts: 10,
        }
    }
}

/// Delay before reconnect attempt `attempt` (0-based), or `None` once the
/// attempt budget is spent and reconnection must halt.
pub fn reconnect_delay(cfg: &LedgerClientConfig, attempt: u32) -> Option<Duration> {
    if attempt >= cfg.max_reconnect_attempts {
        return None;
    }
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    let delay = cfg
        .reconnect_base
        .checked_mul(factor)
        .unwrap_or(cfg.reconnect_cap);
    Some(delay.min(cfg.reconnect_cap))
}

pub struct LedgerRpcClient {
    request_timeout: Duration,
    next_req_id: Arc<AtomicU64>,
    pending: Arc<PendingMap>,
    out_tx: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
}

impl LedgerRpcClient {
    /// Start the client, opening the connection eagerly in the background.
    pub fn start(cfg: LedgerClientConfig) -> Self {
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let next_req_id = Arc::new(AtomicU64::new(0));
        let connected = Arc::new(AtomicBool::new(false));
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_connection(
            cfg.clone(),
            Arc::clone(&pending),
            Arc::clone(&next_req_id),
            out_rx,
            Arc::clone(&connected),
        ));

        Self {
            request_timeout: cfg.request_timeout,
            next_req_id,
            pending,
            out_tx,
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Issue one correlated call and await its single-resolution handle.
    ///
    /// `timeout` overrides the configured default for this call only. A
    /// timeout rejects the local handle but does not cancel remote work: the
    /// outcome is unknown, not failed.
    pub async fn call(
        &self,
        op: &'static str,
        body: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, GatewayError> {
        let req_id = self.next_req_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (handle_tx, handle_rx) = oneshot::channel();
        self.pending.insert(req_id, handle_tx);

        let frame = match serde_json::to_string(&LedgerRequest::call(op, req_id, body)) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.remove(&req_id);
                return Err(GatewayError::Transport(e.to_string()));
            }
        };

        if !self.is_connected() {
            debug!(req_id, op, "ledger disconnected; frame rides the scheduled reconnect");
        }
        if self.out_tx.send(frame).is_err() {
            // Connection task is gone for good (reconnect budget spent).
            self.pending.remove(&req_id);
            return Err(GatewayError::NotConnected);
        }

        let timeout = timeout.unwrap_or(self.request_timeout);
        match tokio::time::timeout(timeout, handle_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                self.pending.remove(&req_id);
                Err(GatewayError::ConnectionClosed)
            }
            Err(_) => {
                self.pending.remove(&req_id);
                Err(GatewayError::Timeout(timeout))
            }
        }
    }
}

/// Connection task: owns the socket, the keepalive timer and all inbound
/// routing for this client.
async fn run_connection(
    cfg: LedgerClientConfig,
    pending: Arc<PendingMap>,
    next_req_id: Arc<AtomicU64>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
) {
    let mut failures: u32 = 0;

    loop {
        match connect_async(cfg.url.as_str()).await {
            Ok((socket, _)) => {
                info!(url = %cfg.url, "connected to ledger");
                failures = 0;
                connected.store(true, Ordering::SeqCst);

                let reason =
                    drive_connection(&cfg, &pending, &next_req_id, &mut out_rx, socket).await;

                connected.store(false, Ordering::SeqCst);
                if reason == CLOSE_CLIENT_DROPPED {
                    return;
                }
                warn!(reason, "ledger connection lost");
            }
            Err(e) => {
                warn!(url = %cfg.url, error = %e, "ledger connect failed");
            }
        }

        match reconnect_delay(&cfg, failures) {
            Some(delay) => {
                failures += 1;
                debug!(
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    "reconnect scheduled"
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                error!(
                    attempts = failures,
                    "ledger reconnect attempts exhausted - halting; operator intervention required"
                );
                return;
            }
        }
    }
}

const CLOSE_CLIENT_DROPPED: &str = "client dropped";

async fn drive_connection(
    cfg: &LedgerClientConfig,
    pending: &Arc<PendingMap>,
    next_req_id: &Arc<AtomicU64>,
    out_rx: &mut mpsc::UnboundedReceiver<String>,
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> &'static str {
    let (mut sink, mut stream) = socket.split();

    // Reapply any previously-established authorization before normal traffic.
    if let Some(token) = &cfg.auth_token {
        let req_id = next_req_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (handle_tx, handle_rx) = oneshot::channel();
        pending.insert(req_id, handle_tx);

        let frame = serde_json::to_string(&LedgerRequest::call(
            OP_AUTHORIZE,
            req_id,
            serde_json::json!({ "token": token }),
        ));
        match frame {
            Ok(frame) => {
                if sink.send(Message::Text(frame)).await.is_err() {
                    pending.remove(&req_id);
                    return "authorize send failed";
                }
                let pending_cleanup = Arc::clone(pending);
                let auth_timeout = cfg.request_timeout;
                tokio::spawn(async move {
                    match tokio::time::timeout(auth_timeout, handle_rx).await {
                        Ok(Ok(Ok(_))) => debug!("ledger authorization reapplied"),
                        Ok(Ok(Err(e))) => error!(error = %e, "ledger authorization rejected"),
                        Ok(Err(_)) => {}
                        Err(_) => {
                            pending_cleanup.remove(&req_id);
                            warn!("ledger authorization timed out");
                        }
                    }
                });
            }
            Err(_) => {
                pending.remove(&req_id);
            }
        }
    }

    // First tick after one full interval, not immediately.
    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + cfg.keepalive_interval,
        cfg.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = out_rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        warn!(error = %e, "ledger send failed");
                        return "send failed";
                    }
                }
                None => return CLOSE_CLIENT_DROPPED,
            },
            _ = keepalive.tick() => {
                if let Ok(frame) = serde_json::to_string(&LedgerRequest::ping()) {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        return "keepalive send failed";
                    }
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => handle_frame(pending, &text),
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) => return "closed by peer",
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "ledger read error");
                    return "read error";
                }
                None => return "stream ended",
            }
        }
    }
}

/// Route one inbound frame.
///
/// Keepalive responses are discarded without correlation lookup. Anything
/// else must match a pending `req_id`; if it does, the entry is removed and
/// its handle resolved (application errors map to a rejection). Unknown,
/// already-resolved or timed-out ids are logged and dropped - a late frame
/// must never resolve an unrelated handle.
pub(crate) fn handle_frame(pending: &PendingMap, text: &str) {
    let response: LedgerResponse = match serde_json::from_str(text) {
        Ok(response) => response,
        Err(e) => {
            warn!(target: "wire", error = %e, "unparseable ledger frame dropped");
            return;
        }
    };

    if response.is_keepalive() {
        return;
    }

    let Some(req_id) = response.req_id else {
        warn!(target: "wire", "ledger frame without req_id dropped");
        return;
    };

    match pending.remove(&req_id) {
        Some((_, handle)) => {
            let outcome = match response.error {
                Some(err) => Err(GatewayError::Rejected {
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(response.result.unwrap_or(serde_json::Value::Null)),
            };
            // The caller may have timed out between lookup and send; a
            // failed send is just a late response and is dropped.
            let _ = handle.send(outcome);
        }
        None => {
            debug!(target: "wire", req_id, "response for unknown or timed-out request dropped");
        }
    }
}
