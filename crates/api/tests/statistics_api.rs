//! HTTP-level integration tests for the statistics endpoints.

mod common;

use axum::http::StatusCode;
use busline_engine::Engine;
use chrono::{DateTime, TimeZone, Utc};
use common::{body_json, get, observation_input};

/// 2024-03-04 is a Monday.
fn monday(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
}

async fn record(
    engine: &Engine,
    line: &str,
    at: DateTime<Utc>,
    delay: i64,
    occupancy: Option<f64>,
) {
    engine
        .record_observation(&observation_input("B1", line, "S1", at, delay, occupancy))
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Delay distribution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delay_distribution_buckets_every_range() {
    let engine = common::test_engine();
    for (minute, delay) in [(0, -2), (5, 3), (10, 4), (15, 7), (20, 20)] {
        record(&engine, "L1", monday(8, minute), delay, None).await;
    }
    record(&engine, "L2", monday(9, 0), 0, None).await;
    let app = common::build_test_app(engine);

    let response = get(app.clone(), "/api/statistics/delay-distribution").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let ranges: Vec<(String, u64)> = json["distribution"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| {
            (
                d["delayRange"].as_str().unwrap().to_string(),
                d["count"].as_u64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        ranges,
        vec![
            ("early".to_string(), 1),
            ("0-5 min".to_string(), 3),
            ("5-10 min".to_string(), 1),
            ("10-15 min".to_string(), 0),
            ("15+ min".to_string(), 1),
        ]
    );

    let json = body_json(get(app, "/api/statistics/delay-distribution?lineId=L2").await).await;
    let total: u64 = json["distribution"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["count"].as_u64().unwrap())
        .sum();
    assert_eq!(total, 1);
}

// ---------------------------------------------------------------------------
// Occupancy trends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn occupancy_trends_by_hour_and_weekday() {
    let engine = common::test_engine();
    record(&engine, "L1", monday(8, 10), 1, Some(40.0)).await;
    record(&engine, "L1", monday(8, 40), 1, Some(60.0)).await;
    record(&engine, "L1", monday(9, 0), 1, None).await;
    let app = common::build_test_app(engine);

    let json = body_json(get(app.clone(), "/api/statistics/occupancy-trends").await).await;
    let trends = json["trends"].as_array().unwrap();
    assert_eq!(trends.len(), 24);
    assert_eq!(trends[8]["timestamp"], "08:00");
    assert_eq!(trends[8]["samples"], 2);
    assert!((trends[8]["averageOccupancy"].as_f64().unwrap() - 50.0).abs() < 1e-9);
    assert_eq!(trends[9]["samples"], 0);

    let response = get(app.clone(), "/api/statistics/occupancy-trends?period=day").await;
    let json = body_json(response).await;
    let trends = json["trends"].as_array().unwrap();
    assert_eq!(trends.len(), 7);
    assert_eq!(trends[0]["timestamp"], "Mon");
    assert_eq!(trends[0]["samples"], 2);

    let response = get(app, "/api/statistics/occupancy-trends?period=fortnight").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

// ---------------------------------------------------------------------------
// Line performance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn line_performance_reports_on_time_share() {
    let engine = common::test_engine();
    for (minute, delay) in [(0, -1), (10, 0), (20, 5), (30, 6)] {
        record(&engine, "L1", monday(7, minute), delay, None).await;
    }
    let app = common::build_test_app(engine);

    let response = get(app, "/api/statistics/line-performance").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let line = &json["performance"][0];
    assert_eq!(line["lineId"], "L1");
    assert_eq!(line["totalTrips"], 4);
    assert!((line["onTimePercentage"].as_f64().unwrap() - 75.0).abs() < 1e-9);
    assert!((line["averageDelay"].as_f64().unwrap() - 2.5).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// Delay stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delay_stats_report_every_bucket() {
    let engine = common::test_engine();
    record(&engine, "L1", monday(8, 0), 2, None).await;
    record(&engine, "L1", monday(8, 30), 4, None).await;
    let app = common::build_test_app(engine);

    let json = body_json(get(app.clone(), "/api/statistics/delay-stats").await).await;
    assert_eq!(json["bucketing"], "hour_of_day");
    let buckets = json["buckets"].as_array().unwrap();
    assert_eq!(buckets.len(), 24);
    assert_eq!(buckets[8]["count"], 2);
    assert!((buckets[8]["mean"].as_f64().unwrap() - 3.0).abs() < 1e-9);
    assert!((buckets[8]["variance"].as_f64().unwrap() - 1.0).abs() < 1e-9);
    assert_eq!(buckets[0]["count"], 0);

    let response = get(app.clone(), "/api/statistics/delay-stats?bucketing=day_hour").await;
    let json = body_json(response).await;
    assert_eq!(json["buckets"].as_array().unwrap().len(), 168);

    let response = get(app, "/api/statistics/delay-stats?bucketing=minute").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Prediction accuracy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prediction_accuracy_is_empty_before_any_resolution() {
    let app = common::build_test_app(common::test_engine());

    let response = get(app, "/api/statistics/prediction-accuracy").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["accuracy"].as_array().unwrap().len(), 0);
}

// ---------------------------------------------------------------------------
// Overview
// ---------------------------------------------------------------------------

#[tokio::test]
async fn overview_summarises_history() {
    let engine = common::test_engine();
    for (minute, delay) in [(0, 0), (10, 3), (20, 9)] {
        record(&engine, "L1", monday(7, minute), delay, None).await;
    }
    record(&engine, "L2", monday(8, 0), -4, None).await;
    let app = common::build_test_app(engine);

    let response = get(app.clone(), "/api/statistics/overview").await;
    assert_eq!(response.status(), StatusCode::OK);
    let overview = &body_json(response).await["overview"];
    assert_eq!(overview["activeBuses"], 1);
    assert_eq!(overview["activeLines"], 2);
    assert_eq!(overview["totalTrips"], 4);
    assert!((overview["averageDelay"].as_f64().unwrap() - 2.0).abs() < 1e-9);
    assert!((overview["averagePunctuality"].as_f64().unwrap() - 50.0).abs() < 1e-9);
    assert_eq!(overview["predictionAccuracy"].as_f64().unwrap(), 0.0);
    assert_eq!(overview["activeAlerts"], 0);

    let json = body_json(get(app, "/api/statistics/overview?lineId=L2").await).await;
    assert_eq!(json["overview"]["totalTrips"], 1);
    assert_eq!(json["overview"]["activeLines"], 1);
}
