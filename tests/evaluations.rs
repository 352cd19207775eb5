mod common;

use livegame_sync::database_ops::store::{GameRow, MemoryStore};
use livegame_sync::error::JobError;
use livegame_sync::orchestrator::{run_job, JobKind, JobParams};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{context, sources, sources_without_catalog_credentials};

fn game(title: &str, steam_app_id: Option<i64>) -> GameRow {
    GameRow {
        slug: title.to_lowercase(),
        title: title.to_string(),
        steam_app_id,
        current_price: Some(12000),
        ..Default::default()
    }
}

#[tokio::test]
async fn reviews_only_touch_review_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/appreviews/578080"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": 1,
            "query_summary": {
                "review_score": 6,
                "review_score_desc": "Mostly Positive",
                "total_positive": 750,
                "total_negative": 250,
                "total_reviews": 1000
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/appreviews/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": 1,
            "query_summary": {"review_score": 0, "total_positive": 0, "total_negative": 0, "total_reviews": 0}
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    store.seed_game(game("PUBG", Some(578080))).await;
    store.seed_game(game("Fresh Release", Some(1))).await;
    store.seed_game(game("No Storefront", None)).await;
    let ctx = context(store.clone(), sources(&server));
    let params = JobParams {
        critic_limit: Some(0),
        ..Default::default()
    };

    let summary = run_job(JobKind::Evaluations, &ctx, &params).await.unwrap();

    let games = store.all_games().await;
    let pubg = &games[0];
    assert_eq!(pubg.review_score, Some(6));
    assert_eq!(pubg.review_score_desc.as_deref(), Some("Mostly Positive"));
    assert_eq!(pubg.review_positive_ratio, Some(75));
    assert_eq!(pubg.review_total, Some(1000));
    assert_eq!(pubg.current_price, Some(12000));
    assert_eq!(games[1].review_score, None);

    let reviews = summary.sections["reviews"];
    assert_eq!(reviews.updated, 1);
    assert_eq!(reviews.skipped, 1);
    assert!(!summary.sections.contains_key("critic"));
}

#[tokio::test]
async fn denylisted_storefront_ids_are_not_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/appreviews/730"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    store.seed_game(game("Counter-Strike 2", Some(730))).await;
    let mut ctx = context(store.clone(), sources(&server));
    ctx.settings.evaluation_skip_steam_ids = vec![730];
    let params = JobParams {
        critic_limit: Some(0),
        ..Default::default()
    };

    let summary = run_job(JobKind::Evaluations, &ctx, &params).await.unwrap();
    assert_eq!(summary.sections["reviews"].skipped, 1);
}

#[tokio::test]
async fn critic_scores_round_the_catalog_rating() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "expires_in": 3600,
            "token_type": "bearer"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/games"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 7, "name": "Hades", "cover": {"image_id": "h"}, "aggregated_rating": 92.6}
        ])))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    store.seed_game(game("Hades", None)).await;
    store.seed_game(game("Skipped Title", None)).await;
    let mut ctx = context(store.clone(), sources(&server));
    ctx.settings.evaluation_skip_igdb_titles = vec!["skipped title".into()];
    let params = JobParams {
        review_limit: Some(0),
        ..Default::default()
    };

    let summary = run_job(JobKind::Evaluations, &ctx, &params).await.unwrap();

    let games = store.all_games().await;
    assert_eq!(games[0].critic_score, Some(93));
    assert_eq!(games[1].critic_score, None);
    assert_eq!(summary.sections["critic"].updated, 1);
    assert_eq!(summary.sections["critic"].skipped, 1);
    assert!(!summary.sections.contains_key("reviews"));
}

#[tokio::test]
async fn critic_half_needs_catalog_credentials() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store, sources_without_catalog_credentials(&server));

    let err = run_job(JobKind::Evaluations, &ctx, &JobParams::default()).await.unwrap_err();
    assert!(matches!(err, JobError::Config(_)));

    let reviews_only = JobParams {
        critic_limit: Some(0),
        ..Default::default()
    };
    assert!(run_job(JobKind::Evaluations, &ctx, &reviews_only).await.is_ok());
}

#[tokio::test]
async fn empty_review_lookups_do_not_pin_the_batch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/appreviews/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": 1,
            "query_summary": {"review_score": 0, "total_positive": 0, "total_negative": 0, "total_reviews": 0}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/appreviews/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": 1,
            "query_summary": {
                "review_score": 8,
                "review_score_desc": "Very Positive",
                "total_positive": 90,
                "total_negative": 10,
                "total_reviews": 100
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let quiet = store.seed_game(game("Quiet Launch", Some(1))).await;
    let popular = store.seed_game(game("Popular", Some(2))).await;
    let ctx = context(store.clone(), sources(&server));
    let params = JobParams {
        review_limit: Some(1),
        critic_limit: Some(0),
        ..Default::default()
    };

    let first = run_job(JobKind::Evaluations, &ctx, &params).await.unwrap();
    assert_eq!(first.sections["reviews"].skipped, 1);
    let second = run_job(JobKind::Evaluations, &ctx, &params).await.unwrap();
    assert_eq!(second.sections["reviews"].updated, 1);

    let games = store.all_games().await;
    let find = |id: i64| games.iter().find(|g| g.id == id).unwrap();
    assert_eq!(find(popular).review_score, Some(8));
    assert_eq!(find(quiet).review_score, None);
    assert!(find(quiet).reviews_checked_at.is_some());
}
