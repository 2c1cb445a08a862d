//! Http-level helpers: body reading, identity header extraction and
//! response building
use std::net::SocketAddr;
use std::str;

use failure::{Error as FailureError, Fail};
use futures::future::Future;
use futures::Stream;
use hyper::header::{ContentLength, ContentType, Headers};
use hyper::server::Response;
use hyper::{Body, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json;

use controller::responses::ErrorMessage;
use controller::types::ControllerFuture;
use errors::{error_kind, Error};
use models::RequestId;

pub fn read_body(body: Body) -> Box<Future<Item = String, Error = FailureError>> {
    Box::new(
        body.concat2()
            .map_err(|e| e.context(Error::Parse).into())
            .and_then(|chunk| String::from_utf8(chunk.to_vec()).map_err(|e| e.context(Error::Parse).into())),
    )
}

pub fn parse_body<T: DeserializeOwned + 'static>(body: Body) -> Box<Future<Item = T, Error = FailureError>> {
    Box::new(read_body(body).and_then(|raw| serde_json::from_str::<T>(&raw).map_err(|e| e.context(Error::Parse).into())))
}

pub fn serialize_future<T, F>(fut: F) -> ControllerFuture
where
    T: Serialize,
    F: Future<Item = T, Error = FailureError> + 'static,
{
    Box::new(fut.and_then(|answer| serde_json::to_string(&answer).map_err(|e| e.context("Serializing answer failed").into())))
}

pub fn raw_header(headers: &Headers, name: &str) -> Option<String> {
    headers
        .get_raw(name)
        .and_then(|raw| raw.one())
        .and_then(|bytes| str::from_utf8(bytes).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Client ip: first `x-forwarded-for` entry, else `x-real-ip`, else the
/// socket peer
pub fn extract_client_ip(headers: &Headers, remote: Option<SocketAddr>) -> Option<String> {
    raw_header(headers, "x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| raw_header(headers, "x-real-ip"))
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
}

/// Idempotency key from the client, or a fresh one. Oversized keys are a
/// client error.
pub fn extract_request_id(headers: &Headers) -> Result<RequestId, FailureError> {
    match raw_header(headers, "idempotency-key") {
        Some(key) => {
            if key.len() > RequestId::MAX_LENGTH {
                return Err(Error::Parse.into());
            }
            Ok(RequestId(key))
        }
        None => Ok(RequestId::generate()),
    }
}

pub fn response_with_json(body: String) -> Response {
    Response::new()
        .with_status(StatusCode::Ok)
        .with_header(ContentType::json())
        .with_header(ContentLength(body.len() as u64))
        .with_body(body)
}

pub fn response_with_error(err: &FailureError, verbose: bool) -> Response {
    match error_kind(err) {
        Some(e) => {
            let status = e.code();
            let message = match *e {
                Error::Connection => {
                    error!("{:?}", err);
                    if verbose {
                        format!("{}", err)
                    } else {
                        "Internal server error".to_string()
                    }
                }
                Error::Validate(ref errors) => {
                    serde_json::to_string(errors).unwrap_or_else(|_| "Bad request".to_string())
                }
                ref e => format!("{}", e),
            };

            let body = serde_json::to_string(&ErrorMessage {
                code: status.to_u16(),
                error: e.kind().to_string(),
                message,
            })
            .unwrap_or_default();

            let mut response = Response::new()
                .with_status(status)
                .with_header(ContentType::json())
                .with_header(ContentLength(body.len() as u64))
                .with_body(body);

            if let Error::RateLimited(ref limit) = *e {
                let headers = response.headers_mut();
                headers.set_raw("X-RateLimit-Limit", limit.limit.to_string());
                headers.set_raw("X-RateLimit-Remaining", limit.remaining.to_string());
                headers.set_raw("X-RateLimit-Reset", limit.reset_ms.to_string());
                headers.set_raw("Retry-After", limit.retry_after_s.to_string());
            }

            response
        }
        None => {
            error!("{:?}", err);
            let message = if verbose {
                format!("{}", err)
            } else {
                "Internal server error".to_string()
            };
            let body = serde_json::to_string(&ErrorMessage {
                code: 500,
                error: "INTERNAL".to_string(),
                message,
            })
            .unwrap_or_default();

            Response::new()
                .with_status(StatusCode::InternalServerError)
                .with_header(ContentType::json())
                .with_header(ContentLength(body.len() as u64))
                .with_body(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_generated_when_absent() {
        let headers = Headers::new();
        let generated = extract_request_id(&headers).unwrap();
        assert!(!generated.0.is_empty());
    }

    #[test]
    fn request_id_honours_the_client_header() {
        let mut headers = Headers::new();
        headers.set_raw("idempotency-key", "r1");
        assert_eq!(extract_request_id(&headers).unwrap(), RequestId("r1".to_string()));
    }

    #[test]
    fn oversized_request_id_is_rejected() {
        let mut headers = Headers::new();
        headers.set_raw("idempotency-key", "x".repeat(256));
        assert!(extract_request_id(&headers).is_err());
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = Headers::new();
        headers.set_raw("x-forwarded-for", "203.0.113.7, 10.0.0.1");
        headers.set_raw("x-real-ip", "10.9.9.9");
        assert_eq!(extract_client_ip(&headers, None), Some("203.0.113.7".to_string()));
    }

    #[test]
    fn client_ip_falls_back_to_real_ip_then_socket() {
        let mut headers = Headers::new();
        headers.set_raw("x-real-ip", "10.9.9.9");
        assert_eq!(extract_client_ip(&headers, None), Some("10.9.9.9".to_string()));

        let remote = "192.0.2.4:12345".parse().ok();
        assert_eq!(extract_client_ip(&Headers::new(), remote), Some("192.0.2.4".to_string()));
    }
}
