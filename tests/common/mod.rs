#![allow(dead_code)]

use chrono::{DateTime, Utc};
use livegame_sync::database_ops::chzzk::client::{ChzzkClient, ChzzkConfig};
use livegame_sync::database_ops::igdb::client::{IgdbConfig, IgdbService};
use livegame_sync::database_ops::steam::provider::{SteamConfig, SteamProvider};
use livegame_sync::database_ops::store::{MemoryStore, StreamRow};
use livegame_sync::orchestrator::{JobContext, JobSettings, Sources};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::MockServer;

/// Every adapter pointed at one mock server, unthrottled.
pub fn sources(server: &MockServer) -> Sources {
    sources_with_igdb(server, IgdbConfig::for_base_url(server.uri(), format!("{}/oauth2/token", server.uri())))
}

pub fn sources_without_catalog_credentials(server: &MockServer) -> Sources {
    let mut igdb = IgdbConfig::for_base_url(server.uri(), format!("{}/oauth2/token", server.uri()));
    igdb.client_id = None;
    igdb.client_secret = None;
    sources_with_igdb(server, igdb)
}

fn sources_with_igdb(server: &MockServer, igdb: IgdbConfig) -> Sources {
    Sources {
        chzzk: ChzzkClient::new(ChzzkConfig::for_base_url(server.uri())).unwrap(),
        steam: SteamProvider::new(SteamConfig::for_base_url(server.uri())).unwrap(),
        igdb: Arc::new(IgdbService::new(igdb).unwrap()),
    }
}

pub fn context(store: Arc<MemoryStore>, sources: Sources) -> JobContext {
    JobContext {
        store,
        sources,
        settings: JobSettings::default(),
    }
}

/// Platform success envelope around a data page.
pub fn envelope(data: Value) -> Value {
    json!({"code": 200, "message": null, "content": {"data": data}})
}

/// One keyword-search hit.
pub fn search_entry(channel: &str, viewers: i64, category_type: &str, category_id: &str, label: &str) -> Value {
    json!({
        "live": {
            "liveTitle": format!("{channel} playing"),
            "liveImageUrl": "https://livecloud/{type}/thumb.jpg",
            "concurrentUserCount": viewers,
            "openDate": "2024-05-01 18:00:00",
            "categoryType": category_type,
            "liveCategory": category_id,
            "liveCategoryValue": label
        },
        "channel": {"channelId": channel, "channelName": format!("{channel} name")}
    })
}

pub fn category_entry(id: &str, label: &str, category_type: &str, viewers: i64) -> Value {
    json!({
        "categoryId": id,
        "categoryValue": label,
        "categoryType": category_type,
        "concurrentUserCount": viewers,
        "openLiveCount": 3,
        "posterImageUrl": format!("https://nng/{id}/poster.png")
    })
}

pub fn live_row(channel: &str, last_seen_at: DateTime<Utc>) -> StreamRow {
    StreamRow {
        id: 0,
        channel_id: channel.to_string(),
        channel_name: channel.to_string(),
        channel_image_url: None,
        title: "earlier broadcast".to_string(),
        thumbnail_url: None,
        viewer_count: 42,
        is_live: true,
        category: None,
        game_id: None,
        started_at: None,
        last_seen_at: Some(last_seen_at),
    }
}
