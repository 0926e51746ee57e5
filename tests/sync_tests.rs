use serde_json::json;
use std::sync::{Arc, Mutex};

use media_sync_rs::{
    keys, CacheSync, CacheUpdate, MemoryCache, Notifier, QueryCache, SseFrame, SyncEvent,
};

#[derive(Default)]
struct RecordingNotifier {
    removed: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn remove_by_id(&self, id: &str) {
        self.removed.lock().unwrap().push(id.to_string());
    }
}

fn setup() -> (Arc<MemoryCache>, Arc<RecordingNotifier>, CacheSync) {
    let cache = Arc::new(MemoryCache::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let sync = CacheSync::new(cache.clone(), notifier.clone());
    (cache, notifier, sync)
}

fn event(name: &str, data: &str) -> SyncEvent {
    SyncEvent::from_frame(SseFrame {
        event: name.to_string(),
        data: data.to_string(),
        ..Default::default()
    })
}

#[test]
fn test_event_names_map_to_variants() {
    assert_eq!(event("init", "{}"), SyncEvent::Init("{}".to_string()));
    assert_eq!(event("queue", "[]"), SyncEvent::Queue("[]".to_string()));
    assert_eq!(event("settings", "{}"), SyncEvent::Settings("{}".to_string()));
    assert_eq!(event("import", "{}"), SyncEvent::Import("{}".to_string()));
    assert_eq!(event("videos", ""), SyncEvent::Videos(String::new()));
    assert_eq!(event("channels", ""), SyncEvent::Channels(String::new()));
    assert_eq!(event("toast", "7"), SyncEvent::Toast("7".to_string()));

    let unknown = event("downloads", "{\"x\":1}");
    assert_eq!(unknown.event_type(), "downloads");
    assert_eq!(unknown.payload(), "{\"x\":1}");
}

#[test]
fn test_init_then_queue_scenario() {
    let (cache, _, sync) = setup();
    let queue = json!([{"id": "a"}, {"id": "b"}]);
    let channels = json!([{"id": "c1", "name": "Channel One"}]);

    sync.dispatch(&event(
        "init",
        &json!({"queue": queue, "channels": channels}).to_string(),
    ));

    assert_eq!(cache.get_value(keys::QUEUE), Some(queue));
    assert_eq!(cache.get_value(keys::CHANNELS), Some(channels.clone()));
    assert!(cache.is_stale(keys::FAVORITE_CHANNELS));
    assert_eq!(cache.get_value(keys::SETTINGS), None);

    let queue2 = json!([{"id": "z"}]);
    sync.dispatch(&event("queue", &queue2.to_string()));
    assert_eq!(cache.get_value(keys::QUEUE), Some(queue2));
    assert_eq!(cache.get_value(keys::CHANNELS), Some(channels));
    assert_eq!(cache.stale_keys(), vec![keys::FAVORITE_CHANNELS.to_string()]);
}

#[test]
fn test_init_without_channels_leaves_favorites_alone() {
    let (cache, _, sync) = setup();
    sync.dispatch(&event("init", &json!({"settings": {"theme": "dark"}}).to_string()));
    assert_eq!(cache.get_value(keys::SETTINGS), Some(json!({"theme": "dark"})));
    assert!(!cache.is_stale(keys::FAVORITE_CHANNELS));
}

#[test]
fn test_replace_round_trip() {
    let (cache, _, sync) = setup();
    for payload in [
        json!(null),
        json!(3.5),
        json!("text"),
        json!([1, [2, 3]]),
        json!({"nested": {"deep": [true, false]}}),
    ] {
        sync.dispatch(&event("settings", &payload.to_string()));
        assert_eq!(cache.get_value(keys::SETTINGS), Some(payload));
    }
}

#[test]
fn test_malformed_replace_keeps_prior_value() {
    let (cache, _, sync) = setup();
    sync.dispatch(&event("queue", "[1,2]"));
    for bad in ["", "{", "[1,", "not json", "{\"a\":}"] {
        sync.dispatch(&event("queue", bad));
        assert_eq!(cache.get_value(keys::QUEUE), Some(json!([1, 2])));
    }
    sync.dispatch(&event("init", "{broken"));
    sync.dispatch(&event("init", "[1,2,3]"));
    assert_eq!(cache.get_value(keys::QUEUE), Some(json!([1, 2])));
}

#[test]
fn test_invalidate_marks_keys_stale_and_keeps_values() {
    let (cache, _, sync) = setup();
    cache.set_value(keys::VIDEOS, json!([1]));
    sync.dispatch(&event("videos", "whatever"));
    assert!(cache.is_stale(keys::VIDEOS));
    assert!(cache.is_stale(keys::FAVORITE_VIDEOS));
    assert_eq!(cache.get_value(keys::VIDEOS), Some(json!([1])));

    sync.dispatch(&event("channels", ""));
    assert!(cache.is_stale(keys::CHANNELS));
    assert!(cache.is_stale(keys::FAVORITE_CHANNELS));

    // A fresh value clears the stale mark
    cache.set_value(keys::VIDEOS, json!([2]));
    assert!(!cache.is_stale(keys::VIDEOS));
}

#[test]
fn test_merge_preserves_absent_fields() {
    let (cache, _, sync) = setup();
    sync.dispatch(&event(
        "import",
        &json!({"running": true, "total": 10, "done": 0}).to_string(),
    ));
    sync.dispatch(&event("import", &json!({"done": 4}).to_string()));
    assert_eq!(
        cache.get_value(keys::IMPORT),
        Some(json!({"running": true, "total": 10, "done": 4}))
    );

    // Non-object and broken payloads leave the entry untouched
    sync.dispatch(&event("import", "[1]"));
    sync.dispatch(&event("import", "{oops"));
    assert_eq!(
        cache.get_value(keys::IMPORT),
        Some(json!({"running": true, "total": 10, "done": 4}))
    );
}

#[test]
fn test_merge_over_non_object_replaces_it() {
    let (cache, _, sync) = setup();
    cache.set_value(keys::IMPORT, json!(null));
    sync.dispatch(&event("import", &json!({"done": 1}).to_string()));
    assert_eq!(cache.get_value(keys::IMPORT), Some(json!({"done": 1})));
}

#[test]
fn test_toast_dismiss_forms() {
    let (cache, notifier, sync) = setup();
    sync.dispatch(&event("toast", "\"abc\""));
    sync.dispatch(&event("toast", "12"));
    sync.dispatch(&event("toast", &json!({"id": "xyz"}).to_string()));
    sync.dispatch(&event("toast", &json!({"id": 5}).to_string()));
    sync.dispatch(&event("toast", "plain-id"));
    // No usable id
    sync.dispatch(&event("toast", &json!({"other": 1}).to_string()));
    sync.dispatch(&event("toast", "[]"));
    sync.dispatch(&event("toast", "   "));

    assert_eq!(
        *notifier.removed.lock().unwrap(),
        vec!["abc", "12", "xyz", "5", "plain-id"]
    );
    assert!(cache.stale_keys().is_empty());
}

#[test]
fn test_unknown_event_is_ignored() {
    let (cache, notifier, sync) = setup();
    sync.dispatch(&event("message", "{\"queue\":[]}"));
    assert_eq!(cache.get_value(keys::QUEUE), None);
    assert!(notifier.removed.lock().unwrap().is_empty());
}

#[test]
fn test_cache_change_feed() {
    let (cache, _, sync) = setup();
    let mut updates = cache.subscribe();
    sync.dispatch(&event("init", &json!({"channels": []}).to_string()));

    assert_eq!(
        updates.try_recv().unwrap(),
        CacheUpdate::Replaced(keys::CHANNELS.to_string())
    );
    let stale = updates.try_recv().unwrap();
    assert_eq!(stale, CacheUpdate::Stale(keys::FAVORITE_CHANNELS.to_string()));
    assert_eq!(stale.key(), keys::FAVORITE_CHANNELS);
    assert!(updates.try_recv().is_err());
}
