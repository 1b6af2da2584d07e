//! HTTP surface: `POST /put` and `GET /get/:key`, both gated by the shared secret.
//!
//! Every handler verifies the caller before touching the store. Anything that
//! stops a request on a known route short of the store (bad secret, malformed
//! body, oversized payload) ends in [`authentication_failed`], the single
//! terminal handler that answers 403.

use std::{convert::Infallible, path::PathBuf, sync::Arc};

use bytes::{Buf, BufMut};
use futures::{Stream, StreamExt};
use pantry_core::{
    auth::{AuthError, Credential, SecretLocation},
    store::{KeyValueStore, StorageError},
    wire::{FormWriteRequest, ReadResponse, WriteRequest, AUTHENTICATION_FAILED, PUT_SUCCEEDED},
};
use tracing::{error, info, warn};
use warp::{
    filters::BoxedFilter,
    http::StatusCode,
    reject::Reject,
    reply::{self, Response},
    Filter, Rejection, Reply,
};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: u64 = 50 * 1024 * 1024;

/// Everything a handler needs, injected once at startup.
#[derive(Clone)]
pub struct AppState {
    credential: Arc<Credential>,
    store: Arc<dyn KeyValueStore>,
}

impl AppState {
    pub fn new(credential: Credential, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            credential: Arc::new(credential),
            store,
        }
    }
}

#[derive(Debug)]
struct Unauthenticated(AuthError);

impl Reject for Unauthenticated {}

#[derive(Debug)]
struct MalformedKey(String);

impl Reject for MalformedKey {}

#[derive(Debug)]
struct PayloadTooLarge {
    limit: u64,
}

impl Reject for PayloadTooLarge {}

#[derive(Debug)]
struct MalformedBody(String);

impl Reject for MalformedBody {}

/// Full route table, with optional static assets mounted behind the API and
/// every response logged.
pub fn routes(
    state: AppState,
    static_dir: Option<PathBuf>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let api = put_route(state.clone()).or(get_route(state)).unify();

    let app: BoxedFilter<(Response,)> = match static_dir {
        Some(dir) => api
            .or(warp::fs::dir(dir).map(|file: warp::fs::File| file.into_response()))
            .unify()
            .boxed(),
        None => api.boxed(),
    };

    app.with(warp::log::custom(log_request))
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn put_route(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("put").and(warp::post()).and(
        write_body()
            .and(with_state(state))
            .and_then(put_value)
            .recover(authentication_failed)
            .unify(),
    )
}

fn get_route(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("get").and(warp::get()).and(
        warp::path::param::<String>()
            .and(warp::path::end())
            .and(warp::header::optional::<String>("secret"))
            .and(with_state(state))
            .and_then(get_value)
            .recover(authentication_failed)
            .unify(),
    )
}

/// Accepts a JSON body, or a url-encoded form whose value is stored as text.
/// Chunked bodies are fine; the size cap applies to the bytes actually read.
fn write_body() -> impl Filter<Extract = (WriteRequest,), Error = Rejection> + Clone {
    warp::header::optional::<u64>("content-length")
        .and(warp::header::optional::<String>("content-type"))
        .and(warp::body::stream())
        .and_then(read_write_request)
}

async fn read_write_request<S, B>(
    content_length: Option<u64>,
    content_type: Option<String>,
    body: S,
) -> Result<WriteRequest, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    if content_length.is_some_and(|len| len > MAX_BODY_BYTES) {
        return Err(warp::reject::custom(PayloadTooLarge {
            limit: MAX_BODY_BYTES,
        }));
    }
    let bytes = collect_body(body, MAX_BODY_BYTES).await?;
    parse_write_request(content_type.as_deref(), &bytes)
}

async fn collect_body<S, B>(body: S, limit: u64) -> Result<Vec<u8>, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    let mut body = Box::pin(body);
    let mut collected = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| warp::reject::custom(MalformedBody(err.to_string())))?;
        if (collected.len() + chunk.remaining()) as u64 > limit {
            return Err(warp::reject::custom(PayloadTooLarge { limit }));
        }
        collected.put(chunk);
    }
    Ok(collected)
}

fn parse_write_request(content_type: Option<&str>, bytes: &[u8]) -> Result<WriteRequest, Rejection> {
    let mime = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase());

    match mime.as_deref() {
        Some("application/x-www-form-urlencoded") => parse_form(bytes).map(WriteRequest::from),
        None | Some("application/json") => serde_json::from_slice::<WriteRequest>(bytes)
            .map_err(|err| warp::reject::custom(MalformedBody(err.to_string()))),
        Some(other) => Err(warp::reject::custom(MalformedBody(format!(
            "unsupported content type {other}"
        )))),
    }
}

fn parse_form(bytes: &[u8]) -> Result<FormWriteRequest, Rejection> {
    let (mut secret, mut key, mut value) = (None, None, None);
    for (name, field) in url::form_urlencoded::parse(bytes) {
        match name.as_ref() {
            "secret" => secret = Some(field.into_owned()),
            "key" => key = Some(field.into_owned()),
            "value" => value = Some(field.into_owned()),
            _ => {}
        }
    }
    let key = key.ok_or_else(|| warp::reject::custom(MalformedBody("missing field `key`".into())))?;
    Ok(FormWriteRequest { secret, key, value })
}

fn verify(
    state: &AppState,
    supplied: Option<&str>,
    location: SecretLocation,
) -> Result<(), Rejection> {
    state
        .credential
        .verify(supplied, location)
        .map_err(|err| warp::reject::custom(Unauthenticated(err)))
}

async fn put_value(request: WriteRequest, state: AppState) -> Result<Response, Rejection> {
    verify(&state, request.secret.as_deref(), SecretLocation::Body)?;

    let WriteRequest { key, value, .. } = request;
    match state.store.put(&key, value).await {
        Ok(()) => Ok(reply::with_status(PUT_SUCCEEDED, StatusCode::OK).into_response()),
        Err(err) => Ok(storage_failed("put", &key, err)),
    }
}

async fn get_value(
    raw_key: String,
    secret: Option<String>,
    state: AppState,
) -> Result<Response, Rejection> {
    verify(&state, secret.as_deref(), SecretLocation::Header)?;

    let key = urlencoding::decode(&raw_key)
        .map_err(|_| warp::reject::custom(MalformedKey(raw_key.clone())))?
        .into_owned();
    match state.store.fetch(&key).await {
        Ok(value) => {
            let body = reply::json(&ReadResponse { value });
            Ok(reply::with_status(body, StatusCode::OK).into_response())
        }
        Err(err) => Ok(storage_failed("fetch", &key, err)),
    }
}

fn storage_failed(operation: &str, key: &str, err: StorageError) -> Response {
    error!(operation, key, error = %err, "storage operation failed");
    reply::with_status(err.to_string(), StatusCode::BAD_REQUEST).into_response()
}

/// Terminal handler for every request stopped before reaching the store.
/// Paths that simply do not exist keep warp's 404.
async fn authentication_failed(rejection: Rejection) -> Result<Response, Rejection> {
    if rejection.is_not_found() {
        return Err(rejection);
    }
    if let Some(Unauthenticated(err)) = rejection.find::<Unauthenticated>() {
        warn!(error = %err, "request authentication failed");
    } else if let Some(PayloadTooLarge { limit }) = rejection.find::<PayloadTooLarge>() {
        warn!(limit, "request body exceeds limit");
    } else if let Some(MalformedBody(reason)) = rejection.find::<MalformedBody>() {
        warn!(%reason, "malformed request body");
    } else if let Some(MalformedKey(key)) = rejection.find::<MalformedKey>() {
        warn!(key = %key, "request key is not valid percent-encoded utf-8");
    } else {
        warn!(?rejection, "malformed request rejected");
    }
    Ok(reply::with_status(AUTHENTICATION_FAILED, StatusCode::FORBIDDEN).into_response())
}

fn log_request(info: warp::log::Info<'_>) {
    info!(
        method = %info.method(),
        path = info.path(),
        status = info.status().as_u16(),
        elapsed = ?info.elapsed(),
        "request"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use pantry_core::store::InMemoryStore;
    use serde_json::{json, Value};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };

    use super::*;

    const SECRET: &str = "s3cr3t";

    /// Counts calls so tests can prove rejected requests never reach storage.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeyValueStore for CountingStore {
        async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, value).await
        }

        async fn fetch(&self, key: &str) -> Result<Option<Value>, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(key).await
        }
    }

    struct FailingStore;

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn put(&self, _key: &str, _value: Value) -> Result<(), StorageError> {
            Err(StorageError::io("disk full"))
        }

        async fn fetch(&self, _key: &str) -> Result<Option<Value>, StorageError> {
            Err(StorageError::io("disk unreadable"))
        }
    }

    type TestResponse = warp::http::Response<warp::hyper::body::Bytes>;

    fn app_with(
        store: Arc<dyn KeyValueStore>,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        routes(AppState::new(Credential::new(SECRET), store), None)
    }

    async fn put<F>(app: &F, body: Value) -> TestResponse
    where
        F: Filter + 'static,
        F::Extract: Reply + Send,
    {
        warp::test::request()
            .method("POST")
            .path("/put")
            .json(&body)
            .reply(app)
            .await
    }

    async fn get<F>(app: &F, key: &str, secret: Option<&str>) -> TestResponse
    where
        F: Filter + 'static,
        F::Extract: Reply + Send,
    {
        let mut request = warp::test::request()
            .method("GET")
            .path(&format!("/get/{key}"));
        if let Some(secret) = secret {
            request = request.header("secret", secret);
        }
        request.reply(app).await
    }

    fn json_body(res: &TestResponse) -> Value {
        serde_json::from_slice(res.body()).expect("json body")
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let app = app_with(Arc::new(InMemoryStore::new()));

        let res = put(&app, json!({"secret": SECRET, "key": "foo", "value": {"n": 42}})).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), PUT_SUCCEEDED.as_bytes());

        let res = get(&app, "foo", Some(SECRET)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(&res), json!({"value": {"n": 42}}));
    }

    #[tokio::test]
    async fn falsy_and_empty_values_are_not_conflated_with_absent() {
        let app = app_with(Arc::new(InMemoryStore::new()));
        let cases = [
            ("false", json!(false)),
            ("zero", json!(0)),
            ("empty-string", json!("")),
            ("empty-object", json!({})),
            ("nested", json!({"a": [1, {"b": null}], "c": {"d": true}})),
            ("null", Value::Null),
        ];

        for (key, value) in cases {
            let res = put(&app, json!({"secret": SECRET, "key": key, "value": value})).await;
            assert_eq!(res.status(), StatusCode::OK, "put {key}");

            let res = get(&app, key, Some(SECRET)).await;
            assert_eq!(res.status(), StatusCode::OK, "get {key}");
            assert_eq!(json_body(&res), json!({ "value": value }), "get {key}");
        }
    }

    #[tokio::test]
    async fn unknown_key_is_success_without_value() {
        let app = app_with(Arc::new(InMemoryStore::new()));

        let res = get(&app, "unknownKey", Some(SECRET)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(&res), json!({}));
    }

    #[tokio::test]
    async fn overwrite_returns_latest_value() {
        let app = app_with(Arc::new(InMemoryStore::new()));

        put(&app, json!({"secret": SECRET, "key": "k", "value": "v1"})).await;
        put(&app, json!({"secret": SECRET, "key": "k", "value": "v2"})).await;
        put(&app, json!({"secret": SECRET, "key": "k", "value": "v2"})).await;

        let first = get(&app, "k", Some(SECRET)).await;
        let second = get(&app, "k", Some(SECRET)).await;
        assert_eq!(json_body(&first), json!({"value": "v2"}));
        assert_eq!(first.body(), second.body());
    }

    #[tokio::test]
    async fn wrong_body_secret_is_forbidden_and_store_untouched() {
        let store = Arc::new(CountingStore::default());
        let app = app_with(store.clone());

        let res = put(&app, json!({"secret": "wrong", "key": "foo", "value": 1})).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(res.body().as_ref(), AUTHENTICATION_FAILED.as_bytes());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);

        let res = get(&app, "foo", Some(SECRET)).await;
        assert_eq!(json_body(&res), json!({}));
    }

    #[tokio::test]
    async fn missing_or_wrong_header_secret_is_forbidden() {
        let store = Arc::new(CountingStore::default());
        let app = app_with(store.clone());

        for secret in [None, Some("wrong"), Some("S3CR3T")] {
            let res = get(&app, "foo", secret).await;
            assert_eq!(res.status(), StatusCode::FORBIDDEN);
            assert_eq!(res.body().as_ref(), AUTHENTICATION_FAILED.as_bytes());
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn secret_in_wrong_location_is_forbidden() {
        let store = Arc::new(CountingStore::default());
        let app = app_with(store.clone());

        // Writes read the secret from the body only.
        let res = warp::test::request()
            .method("POST")
            .path("/put")
            .header("secret", SECRET)
            .json(&json!({"key": "foo", "value": 1}))
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_body_goes_through_the_same_fallback() {
        let store = Arc::new(CountingStore::default());
        let app = app_with(store.clone());

        let res = warp::test::request()
            .method("POST")
            .path("/put")
            .header("content-type", "application/json")
            .body("{not json")
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(res.body().as_ref(), AUTHENTICATION_FAILED.as_bytes());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_before_the_store() {
        let store = Arc::new(CountingStore::default());
        let app = app_with(store.clone());

        let res = warp::test::request()
            .method("POST")
            .path("/put")
            .header("content-type", "application/json")
            .header("content-length", (MAX_BODY_BYTES + 1).to_string())
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn form_encoded_writes_store_text() {
        let app = app_with(Arc::new(InMemoryStore::new()));

        let res = warp::test::request()
            .method("POST")
            .path("/put")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(format!("secret={SECRET}&key=greeting&value=hello+world"))
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = get(&app, "greeting", Some(SECRET)).await;
        assert_eq!(json_body(&res), json!({"value": "hello world"}));
    }

    #[tokio::test]
    async fn percent_encoded_keys_are_decoded() {
        let app = app_with(Arc::new(InMemoryStore::new()));

        put(&app, json!({"secret": SECRET, "key": "a b/c", "value": 7})).await;
        let res = get(&app, "a%20b%2Fc", Some(SECRET)).await;
        assert_eq!(json_body(&res), json!({"value": 7}));
    }

    #[tokio::test]
    async fn storage_failures_are_bad_requests_with_detail() {
        let app = app_with(Arc::new(FailingStore));

        let res = put(&app, json!({"secret": SECRET, "key": "foo", "value": 1})).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            res.body().as_ref(),
            b"storage i/o failure: disk full".as_slice()
        );

        let res = get(&app, "foo", Some(SECRET)).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            res.body().as_ref(),
            b"storage i/o failure: disk unreadable".as_slice()
        );
    }

    #[tokio::test]
    async fn auth_failure_wins_over_storage_failure() {
        let app = app_with(Arc::new(FailingStore));

        let res = put(&app, json!({"secret": "nope", "key": "foo", "value": 1})).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let app = app_with(Arc::new(InMemoryStore::new()));

        let res = warp::test::request()
            .method("GET")
            .path("/missing")
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn static_assets_are_served_behind_the_api() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("index.html"), "<h1>pantry</h1>").expect("write");
        let app = routes(
            AppState::new(Credential::new(SECRET), Arc::new(InMemoryStore::new())),
            Some(dir.path().to_path_buf()),
        );

        let res = warp::test::request()
            .method("GET")
            .path("/index.html")
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"<h1>pantry</h1>".as_slice());

        let res = get(&app, "foo", Some(SECRET)).await;
        assert_eq!(json_body(&res), json!({}));
    }

    #[tokio::test]
    async fn chunked_write_over_socket_succeeds() {
        let store = Arc::new(InMemoryStore::new());
        let (addr, server) =
            warp::serve(app_with(store.clone())).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let body = format!(r#"{{"secret":"{SECRET}","key":"foo","value":1}}"#);
        let request = format!(
            "POST /put HTTP/1.1\r\n\
             Host: localhost\r\n\
             Content-Type: application/json\r\n\
             Transfer-Encoding: chunked\r\n\
             Connection: close\r\n\r\n\
             {:x}\r\n{body}\r\n0\r\n\r\n",
            body.len()
        );

        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with(PUT_SUCCEEDED), "{response}");
        assert_eq!(store.fetch("foo").await.expect("fetch"), Some(json!(1)));
    }

    #[tokio::test]
    async fn body_cap_counts_bytes_read_without_content_length() {
        let chunks = || {
            futures::stream::iter(vec![
                Ok::<_, warp::Error>(Bytes::from_static(b"{\"key\"")),
                Ok(Bytes::from_static(b":\"k\"}")),
            ])
        };

        let collected = collect_body(chunks(), 64)
            .await
            .expect("within limit");
        assert_eq!(collected, br#"{"key":"k"}"#.to_vec());

        let rejection = collect_body(chunks(), 8)
            .await
            .expect_err("over limit");
        assert!(rejection.find::<PayloadTooLarge>().is_some());
    }

    #[test]
    fn form_without_key_is_malformed() {
        let rejection = parse_write_request(
            Some("application/x-www-form-urlencoded; charset=utf-8"),
            b"secret=s&value=v",
        )
        .expect_err("key is required");
        assert!(rejection.find::<MalformedBody>().is_some());
    }
}
