// Copyright 2023 The Keel Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![expect(missing_docs)]

//! HTTP client and server for the sync surface.
//!
//! Endpoints:
//!
//! - `PUT/GET/DELETE /remote/logsync?ref=` — log subtree transfer, with
//!   identity headers and signed-request headers.
//! - `GET /remote/refs?username=&name=` — alias resolution (anonymous).
//! - `DELETE /remote/refs?username=&name=` — dataset removal (signed).
//! - `GET /remote/feeds`, `GET /remote/feeds/:username/:name` — read-only
//!   discovery of published datasets (anonymous).
//!
//! Errors map onto status codes via [`crate::logsync::status_code`].

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderName;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::put;
use ed25519_dalek::SigningKey;

use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::dataset_ref::DatasetRef;
use crate::error::Error;
use crate::error::Result;
use crate::identity;
use crate::identity::Author;
use crate::identity::RequestSignature;
use crate::logsync::Remote;
use crate::logsync::SyncInput;
use crate::logsync::error_from_status;
use crate::logsync::status_code;
use crate::sync_server::SyncServer;

pub const LOGSYNC_PATH: &str = "/remote/logsync";
pub const REFS_PATH: &str = "/remote/refs";
pub const FEEDS_PATH: &str = "/remote/feeds";

/// A peer reachable over HTTP.
pub struct HttpRemote {
    base_url: String,
    client: reqwest::blocking::Client,
    identity: Author,
    key: SigningKey,
    clock: Arc<dyn Clock>,
}

impl HttpRemote {
    /// Points at a peer's sync API root, e.g. `https://peer.example`.
    pub fn new(base_url: impl Into<String>, identity: Author, key: SigningKey) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::blocking::Client::new(),
            identity,
            key,
            clock: Arc::new(SystemClock),
        }
    }

    fn apply_headers(
        &self,
        mut request: reqwest::blocking::RequestBuilder,
        path: &str,
    ) -> reqwest::blocking::RequestBuilder {
        for (name, value) in self.identity.to_headers() {
            request = request.header(name, value);
        }
        let signature = identity::sign_request(&self.key, self.clock.as_ref(), path);
        for (name, value) in signature.to_headers() {
            request = request.header(name, value);
        }
        request
    }

    fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response> {
        let response = request.send().map_err(Error::transport)?;
        let status = response.status().as_u16();
        if status == 200 {
            return Ok(response);
        }
        let message = response.text().unwrap_or_default();
        Err(error_from_status(status, &message))
    }
}

impl Remote for HttpRemote {
    fn addr(&self) -> String {
        self.base_url.clone()
    }

    fn put(&self, dsref: &DatasetRef, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        let request = self
            .client
            .put(format!("{}{LOGSYNC_PATH}", self.base_url))
            .query(&[("ref", dsref.to_string())])
            .body(data.to_vec());
        self.send(self.apply_headers(request, LOGSYNC_PATH))?;
        Ok(())
    }

    fn get(&self, dsref: &DatasetRef, cancel: &CancellationToken) -> Result<(Author, Vec<u8>)> {
        cancel.check()?;
        let request = self
            .client
            .get(format!("{}{LOGSYNC_PATH}", self.base_url))
            .query(&[("ref", dsref.to_string())]);
        let response = self.send(self.apply_headers(request, LOGSYNC_PATH))?;
        let responder = Author::from_headers(|name| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })?;
        let data = response.bytes().map_err(Error::transport)?;
        Ok((responder, data.to_vec()))
    }

    fn del(&self, dsref: &DatasetRef, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        let request = self
            .client
            .delete(format!("{}{LOGSYNC_PATH}", self.base_url))
            .query(&[("ref", dsref.to_string())]);
        self.send(self.apply_headers(request, LOGSYNC_PATH))?;
        Ok(())
    }
}

#[derive(Clone)]
struct HttpState {
    server: Arc<SyncServer>,
    clock: Arc<dyn Clock>,
}

/// Builds the sync API router around a server.
pub fn routes(server: Arc<SyncServer>) -> Router {
    routes_with_clock(server, Arc::new(SystemClock))
}

/// [`routes`] with an injected clock for signature-window checks.
pub fn routes_with_clock(server: Arc<SyncServer>, clock: Arc<dyn Clock>) -> Router {
    let state = HttpState { server, clock };
    Router::new()
        .route(
            LOGSYNC_PATH,
            put(put_logsync).get(get_logsync).delete(delete_logsync),
        )
        .route(REFS_PATH, get(get_refs).delete(delete_refs))
        .route(FEEDS_PATH, get(get_feeds))
        .route(&format!("{FEEDS_PATH}/:username/:name"), get(get_feed))
        .with_state(state)
}

/// Runs the router on a pre-bound listener until cancelled. Builds its own
/// runtime so callers stay synchronous.
pub fn serve(listener: TcpListener, router: Router, cancel: CancellationToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::transport)?;
    runtime.block_on(async move {
        listener.set_nonblocking(true).map_err(Error::transport)?;
        let listener = tokio::net::TcpListener::from_std(listener).map_err(Error::transport)?;
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "http sync server listening");
        }
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while !cancel.is_cancelled() {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            })
            .await
            .map_err(Error::transport)
    })
}

fn header_lookup(headers: &HeaderMap) -> impl Fn(&str) -> Option<String> + '_ {
    |name| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

/// Parses and authenticates the sender of a state-touching request.
fn sync_input(
    state: &HttpState,
    path: &str,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<SyncInput> {
    let sender = Author::from_headers(header_lookup(headers))?;
    let signature = RequestSignature::from_headers(header_lookup(headers))?;
    identity::verify_request(sender.pub_key(), &signature, path, state.clock.as_ref())?;
    let dsref = params
        .get("ref")
        .ok_or_else(|| Error::BadRequest("missing ref parameter".to_string()))?
        .parse()?;
    Ok(SyncInput { sender, dsref })
}

fn error_response(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(status_code(err)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.to_string()).into_response()
}

async fn put_logsync(
    State(state): State<HttpState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = sync_input(&state, LOGSYNC_PATH, &headers, &params).and_then(|input| {
        state
            .server
            .logsync()
            .receive_put(&input, &body, &CancellationToken::new())
    });
    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(&err),
    }
}

async fn get_logsync(
    State(state): State<HttpState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let result = sync_input(&state, LOGSYNC_PATH, &headers, &params).and_then(|input| {
        state
            .server
            .logsync()
            .receive_get(&input, &CancellationToken::new())
    });
    match result {
        Ok(data) => {
            let mut response_headers = HeaderMap::new();
            for (name, value) in state.server.book().owner().to_headers() {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    response_headers.insert(HeaderName::from_static(name), value);
                }
            }
            (StatusCode::OK, response_headers, data).into_response()
        }
        Err(err) => error_response(&err),
    }
}

async fn delete_logsync(
    State(state): State<HttpState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let result = sync_input(&state, LOGSYNC_PATH, &headers, &params).and_then(|input| {
        state
            .server
            .logsync()
            .receive_del(&input, &CancellationToken::new())
    });
    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(&err),
    }
}

fn dsref_from_params(params: &HashMap<String, String>) -> Result<DatasetRef> {
    match params.get("ref") {
        Some(value) => value.parse(),
        None => {
            let username = params
                .get("username")
                .ok_or_else(|| Error::BadRequest("missing username parameter".to_string()))?;
            let name = params
                .get("name")
                .ok_or_else(|| Error::BadRequest("missing name parameter".to_string()))?;
            let mut dsref = DatasetRef::new(username, name);
            if let Some(path) = params.get("path") {
                dsref.path.clone_from(path);
            }
            Ok(dsref)
        }
    }
}

async fn get_refs(
    State(state): State<HttpState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let result =
        dsref_from_params(&params).and_then(|dsref| state.server.book().resolve_ref(&dsref));
    match result {
        Ok(resolved) => axum::Json(resolved).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn delete_refs(
    State(state): State<HttpState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let sender = Author::from_headers(header_lookup(&headers))
        .and_then(|sender| {
            let signature = RequestSignature::from_headers(header_lookup(&headers))?;
            identity::verify_request(sender.pub_key(), &signature, REFS_PATH, state.clock.as_ref())?;
            Ok(sender)
        });
    let result = sender.and_then(|sender| {
        let dsref = dsref_from_params(&params)?;
        let input = SyncInput { sender, dsref };
        state
            .server
            .logsync()
            .receive_del(&input, &CancellationToken::new())
    });
    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(&err),
    }
}

async fn get_feeds(State(state): State<HttpState>) -> Response {
    axum::Json(state.server.feeds()).into_response()
}

async fn get_feed(
    State(state): State<HttpState>,
    Path((username, name)): Path<(String, String)>,
) -> Response {
    match state.server.feed(&DatasetRef::new(username, name)) {
        Ok(items) => axum::Json(items).into_response(),
        Err(err) => error_response(&err),
    }
}
