use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use riakapi::config::RiakConfig;
use riakapi::error::ProvisionError;
use riakapi::store::{BucketProps, CrdtOp, DataStore, RiakHttpStore};

fn store_for(server: &MockServer) -> RiakHttpStore {
    let cfg = RiakConfig {
        hosts: vec!["127.0.0.1".into()],
        http_port: server.address().port(),
        pb_port: 8087,
        scheme: "http".into(),
        user: Some("admin".into()),
        password: Some("pw".into()),
        root_ca_cert: None,
        insecure_tls: false,
    };
    RiakHttpStore::new(&cfg).unwrap()
}

const DATATYPE_PATH: &str = "/types/tsuru-set/buckets/orders/datatypes/riakapi_init";

#[tokio::test]
async fn counter_increment_posts_increment_body_with_admin_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/types/tsuru-counter/buckets/orders/datatypes/riakapi_init"))
        .and(header("authorization", "Basic YWRtaW46cHc="))
        .and(body_json(json!({ "increment": 0 })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    store_for(&server)
        .mutate("tsuru-counter", "orders", "riakapi_init", &CrdtOp::CounterIncrement(0))
        .await
        .unwrap();
}

#[tokio::test]
async fn set_add_and_map_touch_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DATATYPE_PATH))
        .and(body_json(json!({ "add": "riakapi_init" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/types/tsuru-map/buckets/orders/datatypes/riakapi_init"))
        .and(body_json(json!({ "update": { "touch_register": "" } })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    store.mutate("tsuru-set", "orders", "riakapi_init", &CrdtOp::SetAdd("riakapi_init".into())).await.unwrap();
    let touch = CrdtOp::MapTouch { register: "touch".into(), value: String::new() };
    store.mutate("tsuru-map", "orders", "riakapi_init", &touch).await.unwrap();
}

#[tokio::test]
async fn set_remove_sends_the_fetched_context() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DATATYPE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "set",
            "value": ["riakapi_init"],
            "context": "g2wAAAAB"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(DATATYPE_PATH))
        .and(body_json(json!({ "remove": "riakapi_init", "context": "g2wAAAAB" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    store_for(&server)
        .mutate("tsuru-set", "orders", "riakapi_init", &CrdtOp::SetRemove("riakapi_init".into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn set_remove_without_a_value_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path(DATATYPE_PATH)).respond_with(ResponseTemplate::new(404)).mount(&server).await;
    Mock::given(method("POST")).and(path(DATATYPE_PATH)).respond_with(ResponseTemplate::new(204)).expect(0).mount(&server).await;

    let err = store_for(&server)
        .mutate("tsuru-set", "orders", "riakapi_init", &CrdtOp::SetRemove("riakapi_init".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::NotFound(_)));
}

#[tokio::test]
async fn bucket_props_put_allow_mult() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/types/tsuru-counter/buckets/orders/props"))
        .and(body_json(json!({ "props": { "allow_mult": true } })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    store_for(&server)
        .set_bucket_props("tsuru-counter", "orders", &BucketProps { allow_mult: true })
        .await
        .unwrap();
}

#[tokio::test]
async fn bucket_listing_parses_the_buckets_array() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/types/tsuru-counter/buckets"))
        .and(query_param("buckets", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "buckets": ["orders", "invoices"] })))
        .mount(&server)
        .await;

    let buckets = store_for(&server).list_buckets("tsuru-counter").await.unwrap();
    assert_eq!(buckets, vec!["orders".to_string(), "invoices".to_string()]);
}

#[tokio::test]
async fn fetch_maps_missing_keys_to_none_and_returns_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/types/default/buckets/riakapi_instances/keys/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/types/default/buckets/riakapi_instances/keys/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_string("tsuru-counter"))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert_eq!(store.fetch("default", "riakapi_instances", "ghost").await.unwrap(), None);
    assert_eq!(
        store.fetch("default", "riakapi_instances", "orders").await.unwrap(),
        Some(b"tsuru-counter".to_vec())
    );
}

#[tokio::test]
async fn fetch_with_siblings_is_a_store_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/types/default/buckets/riakapi_users/keys/tsuru_app1"))
        .respond_with(ResponseTemplate::new(300).set_body_string("Siblings:\n4Dtr3nGz3Bzcvtqn2Cy0Ba\n"))
        .mount(&server)
        .await;

    let err = store_for(&server).fetch("default", "riakapi_users", "tsuru_app1").await.unwrap_err();
    assert!(matches!(err, ProvisionError::Store(_)));
    assert!(err.to_string().contains("siblings"));
}

#[tokio::test]
async fn plain_store_puts_the_value_and_forbidden_is_permission_denied() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/types/default/buckets/riakapi_instances/keys/orders"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/types/default/buckets/riakapi_instances/keys/locked"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Permission denied"))
        .mount(&server)
        .await;

    let store = store_for(&server);
    store.store("default", "riakapi_instances", "orders", b"tsuru-counter").await.unwrap();
    let err = store.store("default", "riakapi_instances", "locked", b"x").await.unwrap_err();
    assert!(matches!(err, ProvisionError::PermissionDenied(_)));
}
