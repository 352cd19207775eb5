mod common;

use actix_web::{test, web, App};
use livegame_sync::api::auth::Auth;
use livegame_sync::api::routes::configure_routes;
use livegame_sync::api::AppState;
use livegame_sync::database_ops::store::{MemoryStore, Store};
use livegame_sync::orchestrator::JobSettings;
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{envelope, sources};

const SECRET: &str = "s3cret";

async fn mount_schedules(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/service/v1/esports/schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
            {"scheduleSeq": 1, "title": "A vs B"},
            {"scheduleSeq": 2, "title": "C vs D"}
        ]))))
        .mount(server)
        .await;
}

fn state(server: &MockServer, store: Option<Arc<MemoryStore>>) -> AppState {
    let store: Option<Arc<dyn Store>> = store.map(|s| s as Arc<dyn Store>);
    AppState::new(store.clone(), store, sources(server), JobSettings::default())
}

macro_rules! app {
    ($state:expr, $secret:expr, $dev:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .wrap(Auth::new($secret, $dev))
                .configure(configure_routes),
        )
        .await
    };
}

#[actix_web::test]
async fn cron_requires_the_bearer_secret() {
    let server = MockServer::start().await;
    mount_schedules(&server).await;
    let store = Arc::new(MemoryStore::new());
    let app = app!(state(&server, Some(store.clone())), Some(SECRET.to_string()), false);

    let req = test::TestRequest::get().uri("/api/cron/events").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 401);

    let req = test::TestRequest::get()
        .uri("/api/cron/events")
        .insert_header(("Authorization", "Bearer nope"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 401);
    assert!(store.all_events().await.is_empty());

    let req = test::TestRequest::get()
        .uri("/api/cron/events")
        .insert_header(("Authorization", format!("Bearer {SECRET}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["job"], "events");
    assert_eq!(body["data"]["created"], 2);
    assert_eq!(store.all_events().await.len(), 2);
}

#[actix_web::test]
async fn missing_secret_rejects_everything_outside_dev_mode() {
    let server = MockServer::start().await;
    mount_schedules(&server).await;

    let app = app!(state(&server, Some(Arc::new(MemoryStore::new()))), None, false);
    let req = test::TestRequest::get()
        .uri("/api/cron/events")
        .insert_header(("Authorization", "Bearer "))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 401);

    let app = app!(state(&server, Some(Arc::new(MemoryStore::new()))), None, true);
    let req = test::TestRequest::get().uri("/api/cron/events").to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 200);
}

#[actix_web::test]
async fn post_body_replaces_query_parameters() {
    let server = MockServer::start().await;
    mount_schedules(&server).await;
    let store = Arc::new(MemoryStore::new());
    let app = app!(state(&server, Some(store.clone())), Some(SECRET.to_string()), false);

    let req = test::TestRequest::post()
        .uri("/api/cron/events?limit=2")
        .insert_header(("Authorization", format!("Bearer {SECRET}")))
        .set_json(json!({"limit": 1}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(store.all_events().await.len(), 1);
}

#[actix_web::test]
async fn unknown_job_and_missing_writer() {
    let server = MockServer::start().await;
    let auth = ("Authorization", format!("Bearer {SECRET}"));

    let app = app!(state(&server, Some(Arc::new(MemoryStore::new()))), Some(SECRET.to_string()), false);
    let req = test::TestRequest::get()
        .uri("/api/cron/backfill")
        .insert_header(auth.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 404);

    let app = app!(state(&server, None), Some(SECRET.to_string()), false);
    let req = test::TestRequest::get()
        .uri("/api/cron/events")
        .insert_header(auth)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 500);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().starts_with("configuration error"));
}

#[actix_web::test]
async fn health_is_public() {
    let server = MockServer::start().await;
    let app = app!(state(&server, Some(Arc::new(MemoryStore::new()))), Some(SECRET.to_string()), false);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["database"], "connected");
    assert_eq!(body["data"]["write_access"], true);
}

#[actix_web::test]
async fn videos_fill_the_cache_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/service/v2/categories/GAME/Lethal_Company/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
            {"videoNo": 11, "videoTitle": "run", "duration": 3600, "readCount": 10,
             "publishDate": "2024-05-01 12:00:00", "channel": {"channelId": "x", "channelName": "X"}}
        ]))))
        .expect(1)
        .mount(&server)
        .await;
    let store = Arc::new(MemoryStore::new());
    let app = app!(state(&server, Some(store)), Some(SECRET.to_string()), false);

    for _ in 0..2 {
        let req = test::TestRequest::get()
            .uri("/api/videos?category_id=Lethal_Company&size=10")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"][0]["video_no"], 11);
    }
}
