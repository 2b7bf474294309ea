use dashfetch::Fingerprint;
use reqwest::Method;
use serde_json::json;
use url::Url;

fn fp(url: &str, method: Method, body: Option<serde_json::Value>) -> Fingerprint {
    Fingerprint::new(&Url::parse(url).unwrap(), &method, body.as_ref())
}

#[test]
fn query_order_and_fragment_do_not_matter() {
    let a = fp("http://h/api/holders?token=x&limit=5", Method::GET, None);
    let b = fp("http://h/api/holders?limit=5&token=x#top", Method::GET, None);
    assert_eq!(a, b);
    assert_eq!(a.key(), "GET http://h/api/holders?limit=5&token=x");
}

#[test]
fn method_and_query_values_distinguish_requests() {
    let get = fp("http://h/api/stats?range=1d", Method::GET, None);
    let other = fp("http://h/api/stats?range=7d", Method::GET, None);
    let delete = fp("http://h/api/stats?range=1d", Method::DELETE, None);
    assert_ne!(get, other);
    assert_ne!(get, delete);
}

#[test]
fn body_is_part_of_the_key_regardless_of_field_order() {
    let a = fp(
        "http://h/api/ai",
        Method::POST,
        Some(json!({"prompt": "hi", "model": "m"})),
    );
    let b = fp(
        "http://h/api/ai",
        Method::POST,
        Some(json!({"model": "m", "prompt": "hi"})),
    );
    let c = fp(
        "http://h/api/ai",
        Method::POST,
        Some(json!({"model": "m", "prompt": "bye"})),
    );
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.to_string(), a.key());
}

#[test]
fn bucket_ignores_query_and_body() {
    let a = fp("http://h:8080/api/flaky?mode=fail", Method::GET, None);
    let b = fp(
        "http://h:8080/api/flaky?mode=ok",
        Method::POST,
        Some(json!({"x": 1})),
    );
    assert_eq!(a.bucket(), "http://h:8080/api/flaky");
    assert_eq!(a.bucket(), b.bucket());
    assert_ne!(a.key(), b.key());
}

#[test]
fn nested_body_objects_are_canonical() {
    let a = fp(
        "http://h/api/ai",
        Method::POST,
        Some(json!({"opts": {"temp": 0.2, "model": "m"}, "items": [{"b": 1, "a": 2}]})),
    );
    let b = fp(
        "http://h/api/ai",
        Method::POST,
        Some(json!({"items": [{"a": 2, "b": 1}], "opts": {"model": "m", "temp": 0.2}})),
    );
    assert_eq!(a, b);
    assert!(
        a.key()
            .ends_with(r#"{"items":[{"a":2,"b":1}],"opts":{"model":"m","temp":0.2}}"#),
        "{}",
        a.key()
    );
}
