//! HMAC authorization middleware.
//!
//! Runs after routing, before every `/api/v1` handler. Safe methods pass
//! through untouched; mutating requests must carry
//! `Authorization: <key_id> <base64(HMAC-SHA1(secret, signed_material))>`
//! where the signed material depends on the matched route:
//!
//! | Route | Material |
//! |-------|----------|
//! | `POST /leases` | the full request body |
//! | `POST`/`DELETE /leases/{token}` | the token path segment |
//! | `POST /payloads/{token}` | the token path segment |
//! | `POST /payloads` | the first `message-size` bytes of the body |
//!
//! When body bytes are consumed for verification they are re-exposed to
//! the handler: fully-buffered bodies are replaced wholesale, and the
//! legacy prefix read is stitched back together with the unread tail by
//! [`RecombineBody`]. On every exit path the original body is either
//! forwarded or dropped, which closes the underlying stream.
//!
//! On success the verified key ID is attached to the request as
//! [`VerifiedKey`]; handlers use it as the acquiring user identity.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{MatchedPath, Request, State};
use axum::http::{Method, header};
use axum::middleware::Next;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use http_body::Frame;
use http_body_util::BodyExt;
use treegate_core::signature::{RequestSignature, SecretLookup};

use super::GatewayState;
use super::reply;

/// The key ID a request was successfully authenticated with.
#[derive(Debug, Clone)]
pub struct VerifiedKey(
    /// The authenticated key ID.
    pub String,
);

/// Which bytes a route signs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignedMaterial {
    /// The full request body.
    Body,
    /// The `{token}` path segment.
    Token,
    /// The first `message-size` bytes of the body.
    BodyPrefix,
}

/// Maps a matched route and method to its signing rule. `None` means the
/// combination is not a known mutating endpoint; it falls through to the
/// router, which answers 404/405.
fn signing_rule(matched: &str, method: &Method) -> Option<SignedMaterial> {
    match matched {
        "/api/v1/leases" if *method == Method::POST => Some(SignedMaterial::Body),
        "/api/v1/leases/{token}" if *method == Method::POST || *method == Method::DELETE => {
            Some(SignedMaterial::Token)
        }
        "/api/v1/payloads/{token}" if *method == Method::POST => Some(SignedMaterial::Token),
        "/api/v1/payloads" if *method == Method::POST => Some(SignedMaterial::BodyPrefix),
        _ => None,
    }
}

/// The authorization middleware entry point.
pub async fn require_hmac(
    State(state): State<Arc<GatewayState>>,
    mut req: Request,
    next: Next,
) -> Response {
    // Read-only semantics never need authorization.
    let method = req.method().clone();
    if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
        return next.run(req).await;
    }

    let Some(matched) = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_owned())
    else {
        return next.run(req).await;
    };
    let Some(material) = signing_rule(&matched, &method) else {
        return next.run(req).await;
    };
    let req_id = uuid::Uuid::new_v4();

    let Some(signature) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| RequestSignature::parse(raw).ok())
    else {
        tracing::warn!(%req_id, route = %matched, "missing or malformed authorization header");
        return reply::business_error("invalid_hmac");
    };

    let key_id = signature.key_id().to_string();
    tracing::debug!(%req_id, route = %matched, key_id = %key_id, "verifying request signature");
    let lookup: &dyn SecretLookup = state.access.as_ref();

    match material {
        SignedMaterial::Token => {
            // The token is the terminal path segment on every token route.
            let token = req
                .uri()
                .path()
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_owned();
            if signature.verify(token.as_bytes(), lookup).is_err() {
                return reply::business_error("invalid_hmac");
            }
            req.extensions_mut().insert(VerifiedKey(key_id));
            next.run(req).await
        }
        SignedMaterial::Body => {
            let (mut parts, body) = req.into_parts();
            let Ok(collected) = body.collect().await else {
                return reply::bad_request("invalid_body");
            };
            let bytes = collected.to_bytes();
            if signature.verify(&bytes, lookup).is_err() {
                return reply::business_error("invalid_hmac");
            }
            parts.extensions.insert(VerifiedKey(key_id));
            // The handler needs the body again; hand it the buffered copy.
            let req = Request::from_parts(parts, Body::from(bytes));
            next.run(req).await
        }
        SignedMaterial::BodyPrefix => {
            let Some(message_size) = req
                .headers()
                .get("message-size")
                .and_then(|value| value.to_str().ok())
                .and_then(|raw| raw.parse::<usize>().ok())
            else {
                tracing::warn!(%req_id, route = %matched, "missing message-size header");
                return reply::bad_request("invalid_body");
            };

            let (mut parts, mut body) = req.into_parts();
            let mut head = BytesMut::new();
            while head.len() < message_size {
                match body.frame().await {
                    Some(Ok(frame)) => {
                        if let Ok(data) = frame.into_data() {
                            head.extend_from_slice(&data);
                        }
                    }
                    Some(Err(_)) => return reply::bad_request("invalid_body"),
                    // Declared size exceeds the actual body; verify over
                    // what arrived, which fails the signature below.
                    None => break,
                }
            }
            let head = head.freeze();
            let signed = &head[..message_size.min(head.len())];
            if signature.verify(signed, lookup).is_err() {
                return reply::business_error("invalid_hmac");
            }
            parts.extensions.insert(VerifiedKey(key_id));
            let req = Request::from_parts(parts, Body::new(RecombineBody::new(head, body)));
            next.run(req).await
        }
    }
}

/// Re-exposes an already-read body head followed by the unread tail.
///
/// The head may be longer than the verified prefix when a chunk boundary
/// overshot `message-size`; every byte read is replayed exactly once, in
/// order. Dropping this body drops (and thereby closes) the tail stream.
pub struct RecombineBody {
    head: Option<Bytes>,
    tail: Body,
}

impl RecombineBody {
    /// Combines `head` with the remaining `tail`.
    #[must_use]
    pub fn new(head: Bytes, tail: Body) -> Self {
        Self {
            head: (!head.is_empty()).then_some(head),
            tail,
        }
    }
}

impl http_body::Body for RecombineBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if let Some(head) = this.head.take() {
            return Poll::Ready(Some(Ok(Frame::data(head))));
        }
        Pin::new(&mut this.tail).poll_frame(cx)
    }
}
