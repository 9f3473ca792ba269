use quack_translate::engine_settings::GenericApiSettings;
use quack_translate::translator::{GenericApiTranslator, RetryPolicy};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(url: String) -> GenericApiSettings {
    GenericApiSettings {
        generic_api_url: Some(url),
        generic_api_body: Some(
            r#"{"q": "{text}", "source": "{lang_in}", "target": "{lang_out}"}"#.into(),
        ),
        generic_api_extract_json_path: Some("data.translations.0".into()),
        ..Default::default()
    }
    .validate()
    .unwrap()
}

#[tokio::test]
async fn renders_body_and_extracts_by_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/translate"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "q": "say \"hi\"",
            "source": "en",
            "target": "zh",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"translations": [{"text": "说“嗨”"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let t = GenericApiTranslator::new(&settings(format!("{}/translate", server.uri())), "en", "zh")
        .unwrap();
    assert_eq!(t.translate("say \"hi\"").await.unwrap(), "说“嗨”");
}

#[tokio::test]
async fn retries_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"translations": ["bonjour"]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let t = GenericApiTranslator::new(&settings(server.uri()), "en", "fr")
        .unwrap()
        .with_retry(RetryPolicy::immediate(5));
    assert_eq!(t.translate("hello").await.unwrap(), "bonjour");
}

#[tokio::test]
async fn gives_up_after_last_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let t = GenericApiTranslator::new(&settings(server.uri()), "en", "fr")
        .unwrap()
        .with_retry(RetryPolicy::immediate(3));
    assert!(t.translate("hello").await.is_err());
}

#[tokio::test]
async fn get_with_params_and_plain_text_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/t"))
        .and(query_param("text", "hello world"))
        .and(query_param("to", "de"))
        .respond_with(ResponseTemplate::new(200).set_body_string("  hallo welt \n"))
        .expect(1)
        .mount(&server)
        .await;

    let s = GenericApiSettings {
        generic_api_url: Some(format!("{}/t", server.uri())),
        generic_api_method: Some("get".into()),
        generic_api_params: Some(r#"{"text": "{text}", "to": "{lang_out}"}"#.into()),
        generic_api_body: Some(r#"{"ignored": true}"#.into()),
        ..Default::default()
    }
    .validate()
    .unwrap();
    let t = GenericApiTranslator::new(&s, "en", "de").unwrap();
    assert_eq!(t.translate("hello world").await.unwrap(), "hallo welt");
}

#[test]
fn fingerprint_tracks_output_affecting_settings() {
    let a = GenericApiTranslator::new(&settings("http://a.local/x".into()), "en", "zh").unwrap();
    let b = GenericApiTranslator::new(&settings("http://b.local/x".into()), "en", "zh").unwrap();
    let a2 = GenericApiTranslator::new(&settings("http://a.local/x".into()), "en", "ja").unwrap();

    assert_eq!(a.cache_fingerprint().len(), 64);
    assert_ne!(a.cache_fingerprint(), b.cache_fingerprint());
    assert_eq!(a.cache_fingerprint(), a2.cache_fingerprint());
}
