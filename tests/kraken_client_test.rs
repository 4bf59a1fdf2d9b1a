//! Kraken Futures client tests against a local HTTP mock.
//!
//! Tests cover:
//! - Authentication headers on every request
//! - Account-log pagination by `before` and its stop conditions
//! - Execution pagination by continuation token
//! - In-band API errors and HTTP status errors
//! - Retry on 429 and the final rate-limit error
//! - Positions, tickers and fee schedule parsing

use kraken_cost_dashboard::config::KrakenConfig;
use kraken_cost_dashboard::exchange::{
    AccountLogQuery, Credentials, FuturesApi, KrakenClient, KrakenError,
    ENTRY_TYPE_FUNDING_RATE_CHANGE,
};
use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const SINCE: i64 = 1_704_067_200_000; // 2024-01-01
const BEFORE: i64 = 1_704_326_400_000; // 2024-01-04

fn creds() -> Credentials {
    // "kraken-test-secret" in base64
    Credentials::new("test-key", "a3Jha2VuLXRlc3Qtc2VjcmV0")
}

fn client(server: &MockServer) -> KrakenClient {
    KrakenClient::new(&KrakenConfig::for_base_url(&server.uri())).unwrap()
}

fn funding_row(date: &str, amount: f64) -> serde_json::Value {
    json!({
        "date": date,
        "info": ENTRY_TYPE_FUNDING_RATE_CHANGE,
        "contract": "pf_xbtusd",
        "realized_funding": amount,
        "funding_rate": 0.0001,
        "fee": null
    })
}

mod account_log_tests {
    use super::*;

    #[tokio::test]
    async fn requests_are_signed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history/v3/account-log"))
            .and(header_exists("APIKey"))
            .and(header_exists("Nonce"))
            .and(header_exists("Authent"))
            .and(query_param("info", ENTRY_TYPE_FUNDING_RATE_CHANGE))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "logs": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let query = AccountLogQuery::new(SINCE, BEFORE).with_info(ENTRY_TYPE_FUNDING_RATE_CHANGE);
        let logs = client(&server).account_logs(&creds(), &query).await.unwrap();
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn paginates_backwards_until_short_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history/v3/account-log"))
            .and(query_param("before", BEFORE.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "logs": [
                    funding_row("2024-01-03T08:00:00.000Z", -1.5),
                    funding_row("2024-01-02T00:00:00.000Z", -2.0)
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/history/v3/account-log"))
            .and(query_param("before", "1704153600000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "logs": [funding_row("2024-01-01T12:00:00.000Z", 0.25)]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let query = AccountLogQuery::new(SINCE, BEFORE).with_limit(2);
        let logs = client(&server).account_logs(&creds(), &query).await.unwrap();

        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].realized_funding, Some(dec!(-1.5)));
        assert_eq!(logs[2].date, "2024-01-01T12:00:00.000Z");
        assert!(logs.iter().all(|l| l.is_funding()));
    }

    #[tokio::test]
    async fn api_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history/v3/account-log"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "error",
                "error": "EAPI:Invalid key"
            })))
            .mount(&server)
            .await;

        let query = AccountLogQuery::new(SINCE, BEFORE);
        let err = client(&server).account_logs(&creds(), &query).await.unwrap_err();
        assert!(matches!(err, KrakenError::Api(ref msg) if msg == "EAPI:Invalid key"));
    }

    #[tokio::test]
    async fn invalid_secret_fails_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "logs": [] })))
            .expect(0)
            .mount(&server)
            .await;

        let bad = Credentials::new("test-key", "***not base64***");
        let err = client(&server)
            .account_logs(&bad, &AccountLogQuery::new(SINCE, BEFORE))
            .await
            .unwrap_err();
        assert!(matches!(err, KrakenError::InvalidSecret));
    }

    #[tokio::test]
    async fn stops_when_before_does_not_move() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history/v3/account-log"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "logs": [
                    funding_row("2024-01-04T00:00:00.000Z", -1.0),
                    funding_row("2024-01-04T00:00:00.000Z", -1.0)
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let query = AccountLogQuery::new(SINCE, BEFORE).with_limit(2);
        let logs = client(&server).account_logs(&creds(), &query).await.unwrap();
        assert_eq!(logs.len(), 2);
    }

    #[tokio::test]
    async fn limit_of_one_fetches_a_single_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history/v3/account-log"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "logs": [funding_row("2024-01-03T08:00:00.000Z", -1.5)]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let query = AccountLogQuery::new(SINCE, BEFORE).with_limit(1);
        let logs = client(&server).account_logs(&creds(), &query).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    /// Always a full page of two rows, one and two hours before `before`.
    struct EndlessPages;

    impl Respond for EndlessPages {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let before: i64 = request
                .url
                .query_pairs()
                .find(|(k, _)| k == "before")
                .and_then(|(_, v)| v.parse().ok())
                .unwrap_or(BEFORE);
            let row = |hours: i64| {
                let at = Utc.timestamp_millis_opt(before - hours * 3_600_000).unwrap();
                funding_row(&at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(), -0.5)
            };
            ResponseTemplate::new(200).set_body_json(json!({ "logs": [row(1), row(2)] }))
        }
    }

    #[tokio::test]
    async fn stops_after_ten_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history/v3/account-log"))
            .respond_with(EndlessPages)
            .expect(10)
            .mount(&server)
            .await;

        let query = AccountLogQuery::new(SINCE, BEFORE).with_limit(2);
        let logs = client(&server).account_logs(&creds(), &query).await.unwrap();
        assert_eq!(logs.len(), 20);
        assert_eq!(logs[19].date, "2024-01-03T04:00:00.000Z");
    }
}

mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn recovers_after_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/derivatives/api/v3/openpositions"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/derivatives/api/v3/openpositions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "success",
                "openPositions": [
                    { "side": "short", "symbol": "PF_ETHUSD", "price": 3000.5, "size": 2, "fillTime": "2024-01-02T10:00:00.000Z" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let positions = client(&server).open_positions(&creds()).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].signed_size(), dec!(-2));
        assert_eq!(positions[0].price, dec!(3000.5));
    }

    #[tokio::test]
    async fn gives_up_with_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/derivatives/api/v3/openpositions"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server).open_positions(&creds()).await.unwrap_err();
        assert!(matches!(err, KrakenError::RateLimited { attempts: 3 }));
        assert!(err.is_rate_limit());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/derivatives/api/v3/openpositions"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).open_positions(&creds()).await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP Error 403: forbidden");
    }
}

mod execution_tests {
    use super::*;

    fn event(uid: &str, ts: i64, direction: &str, qty: &str, usd: &str) -> serde_json::Value {
        json!({
            "uid": format!("evt-{}", uid),
            "timestamp": ts,
            "event": {
                "execution": {
                    "execution": {
                        "uid": uid,
                        "quantity": qty,
                        "price": "50000",
                        "usdValue": usd,
                        "order": { "tradeable": "PF_XBTUSD", "direction": direction },
                        "orderData": { "fee": "1.25" }
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn follows_continuation_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history/v3/executions"))
            .and(query_param("continuation_token", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "elements": [event("b", SINCE + 2_000, "sell", "0.5", "25000")]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/history/v3/executions"))
            .and(query_param("sort", "asc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "elements": [event("a", SINCE + 1_000, "buy", "1", "50000")],
                "continuationToken": "page-2"
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        let fills = client(&server).fills(&creds(), SINCE, BEFORE).await.unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].uid.as_deref(), Some("a"));
        assert_eq!(fills[0].signed_quantity, dec!(1));
        assert_eq!(fills[1].signed_quantity, dec!(-0.5));
        assert_eq!(fills[1].fee, dec!(1.25));
        assert_eq!(fills[1].usd_value, Some(dec!(25000)));
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history/v3/executions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server)
            .execution_events(&creds(), SINCE, BEFORE)
            .await
            .unwrap_err();
        assert!(matches!(err, KrakenError::Status { status: 503, .. }));
    }
}

mod market_tests {
    use super::*;

    #[tokio::test]
    async fn ticker_found_and_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/derivatives/api/v3/tickers/PF_XBTUSD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "success",
                "ticker": {
                    "symbol": "PF_XBTUSD",
                    "markPrice": 51000.5,
                    "bid": 51000,
                    "ask": 51001,
                    "last": 51000.25,
                    "vol24h": 1234.5,
                    "fundingRate": 0.000012,
                    "lastTime": "2024-01-03T00:00:00.000Z"
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/derivatives/api/v3/tickers/PF_NOPEUSD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "success" })))
            .mount(&server)
            .await;

        let client = client(&server);
        let ticker = client.ticker(&creds(), "PF_XBTUSD").await.unwrap().unwrap();
        assert_eq!(ticker.mark_price, Some(dec!(51000.5)));
        assert_eq!(ticker.vol24h, Some(dec!(1234.5)));
        assert!(client.ticker(&creds(), "PF_NOPEUSD").await.unwrap().is_none());

        let symbols = vec!["PF_XBTUSD".to_string(), "PF_NOPEUSD".to_string()];
        let tickers = client.batch_tickers(&creds(), &symbols).await;
        assert_eq!(tickers.len(), 1);
        assert!(tickers.contains_key("PF_XBTUSD"));
    }

    #[tokio::test]
    async fn fee_schedules_and_volumes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/derivatives/api/v3/feeschedules"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "success",
                "feeSchedules": [{
                    "uid": "sched-1",
                    "name": "PGTMainFees",
                    "tiers": [
                        { "makerFee": 0.02, "takerFee": 0.05, "usdVolume": 0 },
                        { "makerFee": 0.015, "takerFee": 0.04, "usdVolume": 100000 }
                    ]
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/derivatives/api/v3/feeschedules/volumes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "success",
                "volumesByFeeSchedule": { "sched-1": 150000.5 }
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let schedules = client.fee_schedules(&creds()).await.unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].tiers.len(), 2);

        let volumes = client.fee_volumes(&creds()).await.unwrap();
        assert_eq!(volumes.get("sched-1"), Some(&dec!(150000.5)));
    }
}
