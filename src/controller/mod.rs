//! `Controller` is a top layer that handles all http-related
//! stuff like reading bodies, parsing params, forming a response.
//! Basically it provides inputs to `Service` layer and converts outputs
//! of `Service` layer to http responses

pub mod context;
pub mod responses;
pub mod routes;
pub mod types;
pub mod utils;

use std::str::FromStr;
use std::sync::Arc;

use futures::future;
use futures::Future;
use futures::IntoFuture;
use hyper;
use hyper::header::Authorization;
use hyper::server::{Request, Response, Service};
use hyper::{Get, Post};
use validator::Validate;

use self::context::StaticContext;
use self::responses::MessageResponse;
use self::routes::{create_route_parser, Route, RouteParser};
use self::types::ControllerFuture;
use self::utils::{extract_client_ip, extract_request_id, parse_body, raw_header, serialize_future};
use errors::{Error, InvalidVoucherReason};
use models::{ClaimRequest, ClaimVoucherPayload, RefundPayload, UserId};
use services::claims::{ClaimsService, ClaimsServiceImpl};
use services::refunds::{RefundsService, RefundsServiceImpl};
use services::system::{SystemService, SystemServiceImpl};
use services::users::{UsersService, UsersServiceImpl};

/// Controller handles route parsing and calling `Service` layer
pub struct ControllerImpl {
    pub static_context: StaticContext,
    pub route_parser: Arc<RouteParser<Route>>,
}

impl ControllerImpl {
    /// Create a new controller based on the static context
    pub fn new(static_context: StaticContext) -> Self {
        let route_parser = Arc::new(create_route_parser());
        Self {
            static_context,
            route_parser,
        }
    }

    /// Handle a request and get future response
    pub fn call(&self, req: Request) -> ControllerFuture {
        let context = &self.static_context;

        let headers = req.headers().clone();
        let auth_token = headers
            .get::<Authorization<String>>()
            .map(|auth| auth.0.trim_left_matches("Bearer ").to_string());
        let user_id = auth_token
            .as_ref()
            .and_then(|token| i32::from_str(token).ok())
            .map(UserId);

        let ip = extract_client_ip(&headers, req.remote_addr());
        let method = req.method().clone();
        let route = self.route_parser.test(req.path());

        let system_service = SystemServiceImpl::new(context.db_pool.clone(), context.cpu_pool.clone(), context.kv.clone());
        let claims_service = ClaimsServiceImpl::new(
            context.db_pool.clone(),
            context.cpu_pool.clone(),
            context.repo_factory,
            context.cache.clone(),
            context.rate_limiter.clone(),
            context.queue.clone(),
            context.breaker.clone(),
        );
        let users_service = UsersServiceImpl::new(
            context.db_pool.clone(),
            context.cpu_pool.clone(),
            context.repo_factory,
            context.cache.clone(),
            user_id,
        );
        let refunds_service = RefundsServiceImpl::new(
            context.db_pool.clone(),
            context.cpu_pool.clone(),
            context.repo_factory,
            context.cache.clone(),
            user_id,
        );

        match (method, route) {
            // GET /healthcheck
            (Get, Some(Route::Healthcheck)) => serialize_future(system_service.healthcheck()),

            // POST /vouchers/claim
            (Post, Some(Route::VouchersClaim)) => {
                let user_id = match user_id {
                    Some(user_id) => user_id,
                    None => return Box::new(future::err(Error::Forbidden.into())),
                };
                let request_id = match extract_request_id(&headers) {
                    Ok(request_id) => request_id,
                    Err(e) => return Box::new(future::err(e)),
                };
                let user_agent = raw_header(&headers, "user-agent");

                serialize_future(parse_body::<ClaimVoucherPayload>(req.body()).and_then(move |payload| {
                    payload
                        .validate()
                        .map_err(|_| Error::InvalidVoucher(InvalidVoucherReason::BadFormat).into())
                        .into_future()
                        .and_then(move |_| {
                            claims_service.claim(ClaimRequest {
                                user_id,
                                code: payload.voucher_code,
                                request_id,
                                ip,
                                user_agent,
                                device_id: payload.device_id,
                            })
                        })
                }))
            }

            // GET /vouchers/claim/<request_id>
            (Get, Some(Route::VouchersClaimStatus(request_id))) => {
                if user_id.is_none() {
                    return Box::new(future::err(Error::Forbidden.into()));
                }
                serialize_future(claims_service.claim_status(request_id))
            }

            // GET /vouchers/history
            (Get, Some(Route::VouchersHistory)) => serialize_future(users_service.history()),

            // POST /vouchers/refund
            (Post, Some(Route::VouchersRefund)) => {
                if user_id.is_none() {
                    return Box::new(future::err(Error::Forbidden.into()));
                }
                serialize_future(parse_body::<RefundPayload>(req.body()).and_then(move |payload| {
                    payload
                        .validate()
                        .map_err(|e| Error::Validate(e).into())
                        .into_future()
                        .and_then(move |_| refunds_service.refund(payload))
                }))
            }

            // POST /vouchers/logout
            (Post, Some(Route::VouchersLogout)) => match auth_token {
                Some(token) => serialize_future(
                    users_service
                        .logout(token)
                        .map(|_| MessageResponse::ok("Logged out")),
                ),
                None => Box::new(future::err(Error::Forbidden.into())),
            },

            // GET /vouchers/user/summary
            (Get, Some(Route::VouchersUserSummary)) => serialize_future(users_service.user_summary()),

            // GET /vouchers/queue/metrics
            (Get, Some(Route::VouchersQueueMetrics)) => serialize_future(claims_service.queue_metrics()),

            // Fallback
            _ => Box::new(future::err(Error::NotFound.into())),
        }
    }
}

/// Application glues the controller to the hyper server and is the single
/// place that maps the error sum to http answers
pub struct Application {
    pub controller: ControllerImpl,
}

impl Application {
    pub fn new(controller: ControllerImpl) -> Self {
        Self { controller }
    }
}

impl Service for Application {
    type Request = Request;
    type Response = Response;
    type Error = hyper::Error;
    type Future = Box<Future<Item = Response, Error = hyper::Error>>;

    fn call(&self, req: Request) -> Self::Future {
        let ip = extract_client_ip(req.headers(), req.remote_addr());
        info!("{} {} from {}", req.method(), req.path(), ip.as_ref().map(|s| s.as_str()).unwrap_or("-"));

        let verbose = self.controller.static_context.verbose_errors;
        Box::new(self.controller.call(req).then(move |result| match result {
            Ok(body) => future::ok(utils::response_with_json(body)),
            Err(err) => future::ok(utils::response_with_error(&err, verbose)),
        }))
    }
}
