use regex::Regex;

use models::RequestId;

/// List of all routes with params for the app
#[derive(Clone, Debug, PartialEq)]
pub enum Route {
    Healthcheck,
    VouchersClaim,
    VouchersClaimStatus(RequestId),
    VouchersHistory,
    VouchersRefund,
    VouchersLogout,
    VouchersUserSummary,
    VouchersQueueMetrics,
}

/// Regex-backed route table; the first matching pattern wins
pub struct RouteParser<R> {
    routes: Vec<(Regex, Box<Fn(Vec<&str>) -> Option<R>>)>,
}

impl<R> Default for RouteParser<R> {
    fn default() -> Self {
        RouteParser { routes: Vec::new() }
    }
}

impl<R> RouteParser<R> {
    pub fn add_route<F>(&mut self, pattern: &str, route: F)
    where
        F: Fn() -> R + 'static,
    {
        self.add_route_with_params(pattern, move |_| Some(route()));
    }

    pub fn add_route_with_params<F>(&mut self, pattern: &str, route: F)
    where
        F: Fn(Vec<&str>) -> Option<R> + 'static,
    {
        let regex = Regex::new(pattern).expect("Invalid route pattern");
        self.routes.push((regex, Box::new(route)));
    }

    pub fn test(&self, path: &str) -> Option<R> {
        let path = path.split('?').next().unwrap_or(path);
        for &(ref regex, ref route) in &self.routes {
            if let Some(captures) = regex.captures(path) {
                let params = captures
                    .iter()
                    .skip(1)
                    .filter_map(|capture| capture.map(|c| c.as_str()))
                    .collect();
                if let Some(matched) = route(params) {
                    return Some(matched);
                }
            }
        }
        None
    }
}

pub fn create_route_parser() -> RouteParser<Route> {
    let mut router = RouteParser::default();

    // Healthcheck
    router.add_route(r"^/healthcheck$", || Route::Healthcheck);

    // Claim route
    router.add_route(r"^/vouchers/claim$", || Route::VouchersClaim);

    // Claim status/:request_id route
    router.add_route_with_params(r"^/vouchers/claim/([a-zA-Z0-9_-]+)$", |params| {
        params
            .get(0)
            .map(|request_id| RequestId(request_id.to_string()))
            .map(Route::VouchersClaimStatus)
    });

    // History route
    router.add_route(r"^/vouchers/history$", || Route::VouchersHistory);

    // Refund route
    router.add_route(r"^/vouchers/refund$", || Route::VouchersRefund);

    // Logout route
    router.add_route(r"^/vouchers/logout$", || Route::VouchersLogout);

    // User summary route
    router.add_route(r"^/vouchers/user/summary$", || Route::VouchersUserSummary);

    // Queue metrics route
    router.add_route(r"^/vouchers/queue/metrics$", || Route::VouchersQueueMetrics);

    router
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_static_routes() {
        let parser = create_route_parser();
        assert_eq!(parser.test("/healthcheck"), Some(Route::Healthcheck));
        assert_eq!(parser.test("/vouchers/claim"), Some(Route::VouchersClaim));
        assert_eq!(parser.test("/vouchers/history"), Some(Route::VouchersHistory));
        assert_eq!(parser.test("/vouchers/refund"), Some(Route::VouchersRefund));
        assert_eq!(parser.test("/vouchers/user/summary"), Some(Route::VouchersUserSummary));
        assert_eq!(parser.test("/vouchers/queue/metrics"), Some(Route::VouchersQueueMetrics));
    }

    #[test]
    fn parses_claim_status_with_request_id() {
        let parser = create_route_parser();
        assert_eq!(
            parser.test("/vouchers/claim/7e9f4ca2-55a5-4b2c-8a3f-000000000001"),
            Some(Route::VouchersClaimStatus(RequestId(
                "7e9f4ca2-55a5-4b2c-8a3f-000000000001".to_string()
            )))
        );
    }

    #[test]
    fn ignores_query_strings_and_unknown_paths() {
        let parser = create_route_parser();
        assert_eq!(parser.test("/vouchers/claim?foo=bar"), Some(Route::VouchersClaim));
        assert_eq!(parser.test("/unknown"), None);
        assert_eq!(parser.test("/vouchers"), None);
    }
}
