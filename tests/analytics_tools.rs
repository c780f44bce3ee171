//! End-to-end behavior of the tool surface: market data in, curves and
//! valuations out, with every outcome carried by the envelope.

use approx::assert_relative_eq;
use ferroquant_agent::{validate_against_schema, AnalyticsService, SCHEMA_VERSION};
use ferroquant_core::{Envelope, ProviderId, ScriptedHttpClient, ScriptedReply};
use ferroquant_store::DataCache;
use ferroquant_tests::{offline_config, scripted_service, yahoo_chart, TWO_DAYS};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn rates_client() -> ScriptedHttpClient {
    ScriptedHttpClient::new()
        .route(
            "/chart/RATE3M",
            vec![ScriptedReply::status(200, yahoo_chart(&TWO_DAYS, &[5.0, 5.2]))],
        )
        .route(
            "/chart/RATE2Y",
            vec![ScriptedReply::status(200, yahoo_chart(&TWO_DAYS, &[4.0, 4.4]))],
        )
}

fn market_curve() -> Value {
    json!({
        "curve_id": "usd-market",
        "market": [
            { "tenor": "3M", "provider": "yahoo", "symbol": "RATE3M", "unit": "percent" },
            { "tenor": "2Y", "provider": "yahoo", "symbol": "RATE2Y", "unit": "percent" }
        ]
    })
}

fn bond() -> Value {
    json!({
        "instrument_type": "zero_coupon_bond",
        "notional": 1_000_000.0,
        "start": "2024-01-02",
        "maturity": "2025-07-02",
        "curve_id": "usd-market"
    })
}

async fn service(http: ScriptedHttpClient) -> (AnalyticsService, std::sync::Arc<ScriptedHttpClient>) {
    let cache = DataCache::in_memory().await.expect("in-memory cache opens");
    scripted_service(http, offline_config(), cache)
}

fn assert_output_schema(service: &AnalyticsService, tool: &str, envelope: &Envelope<Value>) {
    let descriptor = service.tools().get(tool).expect("tool is registered");
    if let Err(violations) = validate_against_schema(&envelope.data, &descriptor.output_schema) {
        panic!("{tool} output violates its schema: {violations:?}");
    }
}

// =============================================================================
// Market curve to valuation
// =============================================================================

#[tokio::test]
async fn when_analyst_prices_against_a_market_curve_quotes_are_fetched_once() {
    // Given
    let (service, http) = service(rates_client()).await;

    // When: the curve is inspected, sampled, then used for pricing
    let curve = service.call("get_discount_curve", market_curve()).await;
    let factors = service
        .call(
            "discount_factor",
            json!({ "curve": market_curve(), "dates": ["2024-04-02", "2026-01-02"] }),
        )
        .await;
    let priced = service
        .call("price_instrument", json!({ "instrument": bond(), "curve": market_curve() }))
        .await;

    // Then: every call succeeds and validates against its declared output
    for (tool, envelope) in [
        ("get_discount_curve", &curve),
        ("discount_factor", &factors),
        ("price_instrument", &priced),
    ] {
        assert!(envelope.is_ok(), "{tool}: {:?}", envelope.errors);
        assert_eq!(envelope.meta.schema_version, SCHEMA_VERSION);
        assert_eq!(envelope.meta.source_chain, [ProviderId::Yahoo]);
        assert_output_schema(&service, tool, envelope);
    }

    // And: quotes were fetched once and the later calls reused the curve
    assert_eq!(http.request_count("/chart/RATE3M"), 1);
    assert_eq!(http.request_count("/chart/RATE2Y"), 1);
    assert!(!curve.meta.cache_hit);
    assert!(factors.meta.cache_hit);

    // And: pillars sit exactly on the quoted rates
    let points = factors.data["points"].as_array().unwrap();
    assert_relative_eq!(points[0]["zero_rate"].as_f64().unwrap(), 0.052, epsilon = 1e-12);
    assert_relative_eq!(points[1]["zero_rate"].as_f64().unwrap(), 0.044, epsilon = 1e-12);

    // And: the valuation names the curve snapshot it was priced against
    assert_eq!(priced.data["curve_snapshot_hash"], curve.data["snapshot_hash"]);
    assert_eq!(priced.data["curve_id"], "usd-market");
    let pv = priced.data["present_value"].as_f64().unwrap();
    assert!(pv > 900_000.0 && pv < 1_000_000.0, "pv = {pv}");
}

#[tokio::test]
async fn when_a_quote_cannot_be_fetched_the_failing_tenor_is_pinpointed() {
    // Given: the 2Y symbol does not exist upstream
    let http = ScriptedHttpClient::new()
        .route(
            "/chart/RATE3M",
            vec![ScriptedReply::status(200, yahoo_chart(&TWO_DAYS, &[5.0, 5.2]))],
        )
        .route("/chart/RATE2Y", vec![ScriptedReply::status(404, "{}")]);
    let (service, _) = service(http).await;

    // When
    let envelope = service
        .call("price_instrument", json!({ "instrument": bond(), "curve": market_curve() }))
        .await;

    // Then
    assert_eq!(envelope.data, Value::Null);
    assert_eq!(envelope.errors.len(), 1);
    let error = &envelope.errors[0];
    assert_eq!(error.code, "fetch.permanent");
    assert_eq!(error.input_path.as_deref(), Some("/curve/market/1"));
    assert_eq!(error.operation.as_deref(), Some("price_instrument"));
    assert_eq!(error.source, Some(ProviderId::Yahoo));
}

// =============================================================================
// Validation and cancellation
// =============================================================================

#[tokio::test]
async fn when_input_has_the_wrong_shape_no_provider_is_called() {
    // Given
    let (service, http) = service(rates_client()).await;

    // When
    let envelope = service
        .call("get_series", json!({ "requests": "RATE3M" }))
        .await;

    // Then
    assert_eq!(envelope.data, Value::Null);
    assert!(!envelope.errors.is_empty());
    assert!(envelope
        .errors
        .iter()
        .all(|error| error.code == "validation.invalid_input" && error.retryable == Some(false)));
    assert!(http.requests().is_empty());
}

#[tokio::test]
async fn when_caller_cancels_up_front_each_request_reports_cancellation() {
    // Given
    let (service, http) = service(rates_client()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    // When
    let envelope = service
        .call_with_cancel(
            "get_series",
            json!({
                "requests": [
                    { "provider": "yahoo", "symbol": "RATE3M" },
                    { "provider": "yahoo", "symbol": "RATE2Y" }
                ]
            }),
            &cancel,
        )
        .await;

    // Then
    let paths = envelope
        .errors
        .iter()
        .map(|error| (error.code.as_str(), error.input_path.as_deref().unwrap_or_default()))
        .collect::<Vec<_>>();
    assert_eq!(
        paths,
        [("fetch.cancelled", "/requests/0"), ("fetch.cancelled", "/requests/1")]
    );
    assert!(http.requests().is_empty());
}

// =============================================================================
// Envelope metadata
// =============================================================================

#[tokio::test]
async fn when_tools_are_called_each_envelope_has_its_own_request_id() {
    // Given
    let (service, _) = service(ScriptedHttpClient::new()).await;
    let input = json!({ "pillars": [{ "date": "2024-01-01", "rate": 0.03 }] });

    // When
    let first = service.call("build_curve", input.clone()).await;
    let second = service.call("build_curve", input).await;

    // Then
    assert!(first.is_ok(), "{:?}", first.errors);
    assert_ne!(first.meta.request_id, second.meta.request_id);
    assert_ne!(first.meta.trace_id, second.meta.trace_id);
    assert!(first.meta.source_chain.is_empty());
    assert_eq!(first.data["snapshot_hash"], second.data["snapshot_hash"]);
}

#[tokio::test]
async fn when_listing_tools_every_tool_has_input_and_output_schemas() {
    // Given
    let (service, _) = service(ScriptedHttpClient::new()).await;

    // When
    let names = service
        .tools()
        .list()
        .iter()
        .map(|descriptor| {
            assert_eq!(descriptor.input_schema["type"], "object");
            assert_eq!(descriptor.output_schema["type"], "object");
            assert!(!descriptor.description.is_empty());
            descriptor.name.as_str()
        })
        .collect::<Vec<_>>();

    // Then
    assert_eq!(
        names,
        [
            "get_series",
            "build_curve",
            "get_discount_curve",
            "discount_factor",
            "price_instrument",
            "invalidate_cache",
            "analyze_financial_profile"
        ]
    );
}

// =============================================================================
// Household profile
// =============================================================================

fn household() -> Value {
    json!({
        "profile": {
            "age": 35,
            "annual_income": 120000,
            "monthly_expenses": {
                "housing": 3000,
                "groceries": 800,
                "utilities": 200,
                "dining": 600,
                "entertainment": 400,
                "debt_payments": 1000
            },
            "current_savings": 30000,
            "current_debt": 24000,
            "dependents": 1,
            "employment_stability": "stable",
            "investment_goals": [
                { "goal_type": "home_purchase", "target_amount": 60000, "timeline_years": 4 }
            ]
        }
    })
}

#[tokio::test]
async fn when_a_household_is_analyzed_no_provider_or_cache_is_involved() {
    // Given
    let (service, http) = service(rates_client()).await;

    // When
    let envelope = service.call("analyze_financial_profile", household()).await;

    // Then
    assert!(envelope.is_ok(), "{:?}", envelope.errors);
    assert_output_schema(&service, "analyze_financial_profile", &envelope);
    let data = &envelope.data;
    assert_eq!(data["financial_health_score"], 80);
    assert_relative_eq!(data["savings_rate"].as_f64().unwrap(), 40.0);
    assert_relative_eq!(data["debt_to_income_ratio"].as_f64().unwrap(), 20.0);
    assert_relative_eq!(data["risk_capacity_score"].as_f64().unwrap(), 0.855, epsilon = 1e-12);
    assert_relative_eq!(
        data["spending_breakdown"]["essential"]["percentage"].as_f64().unwrap(),
        66.7
    );
    assert_eq!(data["budget"]["savings_timeline"][0]["months_to_target"], 15);

    // And: nothing left the process or touched the store
    assert!(http.requests().is_empty());
    assert!(envelope.meta.source_chain.is_empty());
    assert!(!envelope.meta.cache_hit);
    assert_eq!(service.cache().stats().await.unwrap().writes, 0);
}

#[tokio::test]
async fn when_an_expense_is_negative_the_profile_field_is_pinpointed() {
    // Given
    let (service, _) = service(ScriptedHttpClient::new()).await;
    let mut input = household();
    input["profile"]["monthly_expenses"]["dining"] = json!(-600);

    // When
    let envelope = service.call("analyze_financial_profile", input).await;

    // Then
    assert_eq!(envelope.data, Value::Null);
    let error = &envelope.errors[0];
    assert_eq!(error.code, "validation.invalid_input");
    assert_eq!(error.input_path.as_deref(), Some("/profile/monthly_expenses/dining"));
    assert_eq!(error.operation.as_deref(), Some("analyze_financial_profile"));
}
