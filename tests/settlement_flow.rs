//! End-to-end settlement against the wallet mock over HTTP
//!
//! Runs the real HTTP wallet client, both workers and the operator API on
//! ephemeral ports, with a local receiver standing in for the operator's
//! webhook endpoint.

use axum::{extract::State, http::HeaderMap, routing::post, Router};
use rgs::config::{OperatorSeed, RgsConfig};
use rgs::models::{Bet, BetStatus, Operator, WebhookStatus};
use rgs::wallet::mock::{router as wallet_router, MockWallet};
use rgs::webhook::client::verify_signature;
use rgs::webhook::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use rgs::{PlaceBetRequest, Rgs};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WALLET_SECRET: &str = "integration-wallet-secret";
const WEBHOOK_SECRET: &str = "integration-webhook-secret";
const OPERATOR_KEY: &str = "integration-operator";

type Deliveries = Arc<Mutex<Vec<(HeaderMap, Vec<u8>)>>>;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn spawn_webhook_receiver() -> (String, Deliveries) {
    async fn receive(State(deliveries): State<Deliveries>, headers: HeaderMap, body: axum::body::Bytes) {
        deliveries.lock().unwrap().push((headers, body.to_vec()));
    }

    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/hooks", post(receive))
        .with_state(deliveries.clone());
    (format!("{}/hooks", serve(app).await), deliveries)
}

struct Harness {
    rgs: Rgs,
    wallet: MockWallet,
    deliveries: Deliveries,
    operator: Operator,
    player_id: i64,
}

async fn harness() -> Harness {
    let wallet = MockWallet::new(WALLET_SECRET, 1_000.0);
    let wallet_url = serve(wallet_router(wallet.clone())).await;
    let (webhook_url, deliveries) = spawn_webhook_receiver().await;

    let mut config = RgsConfig::for_testing(&wallet_url, WALLET_SECRET);
    config.workers.outbox_interval_ms = 50;
    config.workers.webhook_interval_ms = 50;
    config.operators = vec![OperatorSeed {
        name: "Integration Casino".into(),
        api_key: OPERATOR_KEY.into(),
        webhook_url: Some(webhook_url),
        webhook_secret: WEBHOOK_SECRET.into(),
        allowed_jurisdictions: vec!["MT".into()],
        max_bet: 0.0,
    }];
    config.validate().unwrap();

    let rgs = Rgs::build(config).unwrap();
    let operator = rgs.seed_operators().await.unwrap().remove(0);
    let player = rgs.store.get_or_create_player(operator.id, "player-1", "MT").await.unwrap();

    Harness {
        rgs,
        wallet,
        deliveries,
        operator,
        player_id: player.id,
    }
}

impl Harness {
    async fn bet(&self, key: &str, amount: f64) -> Bet {
        self.rgs
            .pipeline
            .place_bet(PlaceBetRequest {
                operator_id: self.operator.id,
                player_id: self.player_id,
                amount,
                idempotency_key: key.to_string(),
            })
            .await
            .unwrap()
            .into_bet()
    }

    /// Bets until one wins; each round wins with probability 1/6
    async fn winning_bet(&self, amount: f64) -> Bet {
        for i in 0..200 {
            let bet = self.bet(&format!("hunt-{}", i), amount).await;
            if bet.status != BetStatus::Lost {
                return bet;
            }
        }
        panic!("no winning round in 200 attempts");
    }

    fn delivered_payloads(&self) -> Vec<Value> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .map(|(headers, body)| {
                let timestamp = headers[TIMESTAMP_HEADER].to_str().unwrap();
                let signature = headers[SIGNATURE_HEADER].to_str().unwrap();
                assert!(verify_signature(WEBHOOK_SECRET, timestamp, body, signature));
                serde_json::from_slice(body).unwrap()
            })
            .collect()
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_bets_move_money_exactly_once() {
    let h = harness().await;

    let bet = h.bet("once", 25.0).await;
    let replay = h.bet("once", 25.0).await;
    assert_eq!(bet, replay);
    assert_eq!(h.wallet.debit_calls(), 1);

    let expected = 1_000.0 - 25.0 + bet.win_amount;
    assert_eq!(h.wallet.balance(h.player_id), expected);

    let round = h.rgs.store.round(bet.round_id).await.unwrap().unwrap();
    assert!(rgs::games::verify_outcome(
        &round.server_seed,
        &round.client_seed,
        &round.hash,
        round.outcome
    ));
}

#[tokio::test]
async fn test_declined_debit_leaves_nothing_behind() {
    let h = harness().await;
    h.wallet.set_balance(h.player_id, 5.0);

    let err = h
        .rgs
        .pipeline
        .place_bet(PlaceBetRequest {
            operator_id: h.operator.id,
            player_id: h.player_id,
            amount: 10.0,
            idempotency_key: "too-big".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, rgs::SettlementError::InsufficientFunds));
    assert!(h
        .rgs
        .store
        .bet_by_idempotency(h.operator.id, "too-big")
        .await
        .unwrap()
        .is_none());
    assert!(h.rgs.bus.replay_since(h.operator.id, None).is_empty());
    assert_eq!(h.wallet.balance(h.player_id), 5.0);
}

#[tokio::test]
async fn test_failed_payout_is_settled_by_outbox_and_notified() {
    let h = harness().await;
    h.wallet.set_credits_unavailable(true);

    let bet = h.winning_bet(10.0).await;
    assert_eq!(bet.status, BetStatus::PendingSettlement);
    assert_eq!(h.rgs.store.pending_outbox().await.unwrap().len(), 1);

    let workers = h.rgs.start_workers();

    // The pending notification goes out while the wallet is still down
    eventually("settlement_pending webhook", || {
        h.delivered_payloads().iter().any(|p| p["status"] == "pending")
    })
    .await;
    assert_eq!(h.rgs.store.bet(bet.id).await.unwrap().unwrap().status, BetStatus::PendingSettlement);

    h.wallet.set_credits_unavailable(false);
    eventually("settlement_success webhook", || {
        h.delivered_payloads()
            .iter()
            .any(|p| p["status"] == "won" && p["bet_id"] == json!(bet.id))
    })
    .await;

    for worker in workers {
        worker.stop().await;
    }

    let settled = h.rgs.store.bet(bet.id).await.unwrap().unwrap();
    assert_eq!(settled.status, BetStatus::Won);
    assert!(h.rgs.store.pending_outbox().await.unwrap().is_empty());
    assert_eq!(h.rgs.store.list_outbox(h.operator.id, Some(true)).await.unwrap().len(), 1);

    // Every earlier round lost, so the only credit is the retried payout
    let expected = 1_000.0 - 10.0 * h.wallet.debit_calls() as f64 + bet.win_amount;
    assert!((h.wallet.balance(h.player_id) - expected).abs() < 1e-9);

    let completed = h
        .rgs
        .store
        .list_webhooks(h.operator.id, Some(WebhookStatus::Pending))
        .await
        .unwrap();
    assert!(completed.is_empty());

    let events: Vec<String> = h
        .rgs
        .bus
        .replay_since(h.operator.id, None)
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert!(events.contains(&"settlement.success".to_string()));
    assert!(events.contains(&"webhook.delivered".to_string()));
}

#[tokio::test]
async fn test_operator_api_over_http() {
    let h = harness().await;
    let base = serve(h.rgs.api_server().create_app()).await;
    let client = reqwest::Client::new();

    let unauthorized = client.get(format!("{}/outbox", base)).send().await.unwrap();
    assert_eq!(unauthorized.status().as_u16(), 401);

    let mut stream = client
        .get(format!("{}/stream", base))
        .header("X-Operator-Key", OPERATOR_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status().as_u16(), 200);

    let placed: Value = client
        .post(format!("{}/bets", base))
        .header("X-Operator-Key", OPERATOR_KEY)
        .json(&json!({ "player_id": h.player_id, "amount": 3.0, "idempotency_key": "over-http" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(placed["idempotency_key"], "over-http");

    let mut received = String::new();
    let read = tokio::time::timeout(Duration::from_secs(5), async {
        while !received.contains("event: bet.settled") {
            match stream.chunk().await.unwrap() {
                Some(chunk) => received.push_str(&String::from_utf8_lossy(&chunk)),
                None => break,
            }
        }
    })
    .await;
    assert!(read.is_ok(), "no bet.settled event on the stream");
    assert!(received.contains(&format!("\"bet_id\":{}", placed["id"])));

    let round: Value = client
        .get(format!("{}/rounds/{}", base, placed["round_id"]))
        .header("X-Operator-Key", OPERATOR_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(round["outcome"], placed["outcome"]);
}
