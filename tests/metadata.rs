mod common;

use livegame_sync::database_ops::mapping::GameMapping;
use livegame_sync::database_ops::store::{GameRow, MemoryStore};
use livegame_sync::error::JobError;
use livegame_sync::orchestrator::{run_job, JobKind, JobParams};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{context, sources, sources_without_catalog_credentials};

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "expires_in": 3600,
            "token_type": "bearer"
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn pubg() -> GameRow {
    GameRow {
        slug: "배틀그라운드".into(),
        title: "배틀그라운드".into(),
        title_ko: Some("배틀그라운드".into()),
        popularity_rank: Some(3),
        ..Default::default()
    }
}

#[tokio::test]
async fn missing_catalog_credentials_fail_before_any_call() {
    let server = MockServer::start().await;
    mount_token(&server, 0).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    store.seed_game(pubg()).await;
    let ctx = context(store.clone(), sources_without_catalog_credentials(&server));

    let err = run_job(JobKind::Metadata, &ctx, &JobParams::default()).await.unwrap_err();
    assert!(matches!(err, JobError::Config(_)));
    assert_eq!(err.status_code(), 500);
    assert_eq!(store.all_games().await[0].cover_image, None);
}

#[tokio::test]
async fn catalog_cross_reference_feeds_storefront_pricing() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/games"))
        .and(body_string_contains(r#"alternative_names.name = "배틀그라운드""#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 27789,
            "name": "PUBG: Battlegrounds",
            "slug": "pubg-battlegrounds",
            "summary": "Battle royale",
            "total_rating_count": 500,
            "cover": {"image_id": "co1"},
            "genres": [{"name": "Shooter"}],
            "themes": [{"name": "Action"}],
            "involved_companies": [
                {"developer": true, "publisher": true, "company": {"name": "KRAFTON"}}
            ],
            "external_games": [{"category": 1, "uid": "578080"}]
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/appdetails"))
        .and(query_param("appids", "578080"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "578080": {"success": true, "data": {
                "steam_appid": 578080,
                "name": "PUBG: BATTLEGROUNDS",
                "is_free": false,
                "short_description": "Land, loot and survive",
                "header_image": "https://cdn/header.jpg",
                "price_overview": {"currency": "KRW", "initial": 3600000, "final": 1800000, "discount_percent": 50},
                "genres": [{"description": "Action"}],
                "developers": ["PUBG Corporation"],
                "publishers": ["KRAFTON, Inc."]
            }}
        })))
        .expect(1)
        .mount(&server)
        .await;
    // The cross-reference resolves the id, so no name search is needed.
    Mock::given(method("GET"))
        .and(path("/api/storesearch/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let id = store.seed_game(pubg()).await;
    let ctx = context(store.clone(), sources(&server));

    let summary = run_job(JobKind::Metadata, &ctx, &JobParams::default()).await.unwrap();
    assert_eq!(summary.counts.updated, 1);

    let row = &store.all_games().await[0];
    assert_eq!(row.igdb_id, Some(27789));
    assert_eq!(row.steam_app_id, Some(578080));
    assert_eq!(row.title_en.as_deref(), Some("PUBG: Battlegrounds"));
    assert!(row.cover_image.as_deref().unwrap().ends_with("/co1.jpg"));
    assert_eq!(row.header_image.as_deref(), Some("https://cdn/header.jpg"));
    assert_eq!(row.description.as_deref(), Some("Battle royale"));
    assert_eq!(row.developer.as_deref(), Some("KRAFTON"));
    assert_eq!(row.current_price, Some(18000));
    assert_eq!(row.original_price, Some(36000));
    assert_eq!(row.discount_rate, Some(50));
    assert_eq!(row.is_free, Some(false));
    assert!(!store.tag_slugs_for(id).await.is_empty());
}

#[tokio::test]
async fn mapping_skips_catalog_and_overrides_win() {
    let server = MockServer::start().await;
    mount_token(&server, 0).await;
    Mock::given(method("POST"))
        .and(path("/games"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/appdetails"))
        .and(query_param("appids", "216150"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "216150": {"success": true, "data": {
                "steam_appid": 216150,
                "name": "MapleStory",
                "is_free": true,
                "header_image": "https://cdn/maple.jpg"
            }}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    store
        .set_mappings(vec![GameMapping {
            category_name: "메이플스토리".into(),
            steam_app_id: Some(216150),
            skip_igdb: true,
            override_cover_image: Some("https://curated/maple-cover.png".into()),
            ..Default::default()
        }])
        .await;
    store
        .seed_game(GameRow {
            slug: "메이플스토리".into(),
            title: "메이플스토리".into(),
            ..Default::default()
        })
        .await;
    let ctx = context(store.clone(), sources(&server));

    let summary = run_job(JobKind::Metadata, &ctx, &JobParams::default()).await.unwrap();
    assert_eq!(summary.counts.updated, 1);

    let row = &store.all_games().await[0];
    assert_eq!(row.igdb_id, None);
    assert_eq!(row.steam_app_id, Some(216150));
    assert_eq!(row.cover_image.as_deref(), Some("https://curated/maple-cover.png"));
    assert_eq!(row.header_image.as_deref(), Some("https://cdn/maple.jpg"));
    assert_eq!(row.is_free, Some(true));
    assert_eq!(row.current_price, Some(0));
}

#[tokio::test]
async fn double_outage_leaves_the_row_untouched() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/games"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/storesearch/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let mut game = pubg();
    game.description = Some("kept".into());
    store.seed_game(game.clone()).await;
    let ctx = context(store.clone(), sources(&server));

    let summary = run_job(JobKind::Metadata, &ctx, &JobParams::default()).await.unwrap();
    assert_eq!(summary.counts.skipped, 1);
    assert_eq!(summary.counts.updated, 0);

    let row = &store.all_games().await[0];
    assert_eq!(row.description.as_deref(), Some("kept"));
    assert_eq!(row.updated_at, None);
}

#[tokio::test]
async fn every_row_is_visited_without_an_explicit_limit() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/games"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/storesearch/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    for n in 0..60 {
        store
            .seed_game(GameRow {
                slug: format!("game-{n}"),
                title: format!("Game {n}"),
                cover_image: Some(format!("https://cdn/{n}.jpg")),
                ..Default::default()
            })
            .await;
    }
    let ctx = context(store.clone(), sources(&server));

    let summary = run_job(JobKind::Metadata, &ctx, &JobParams::default()).await.unwrap();
    assert_eq!(summary.counts.processed + summary.counts.skipped, 60);

    let capped = JobParams {
        limit: Some(5),
        ..Default::default()
    };
    let summary = run_job(JobKind::Metadata, &ctx, &capped).await.unwrap();
    assert_eq!(summary.counts.processed + summary.counts.skipped, 5);
}
