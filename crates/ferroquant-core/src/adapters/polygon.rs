use time::Duration;

use crate::credentials::Credential;
use crate::http_client::{HttpAuth, HttpRequest, HttpResponse};
use crate::normalize::ProviderSchema;
use crate::retry::RetryConfig;
use crate::{FetchError, Granularity, ProviderId, SeriesField, SeriesRequest, UtcDateTime};

use super::{classify_status, trim_base, MarketDataProvider};

pub(super) const DEFAULT_BASE_URL: &str = "https://api.polygon.io";

/// Polygon aggregates API. Requires an API key, sent as a bearer token.
#[derive(Debug, Clone)]
pub struct PolygonAdapter {
    base_url: String,
}

impl Default for PolygonAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl PolygonAdapter {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            base_url: trim_base(base_url.as_ref()),
        }
    }
}

impl MarketDataProvider for PolygonAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Polygon
    }

    fn schema_for(&self, _request: &SeriesRequest) -> ProviderSchema {
        ProviderSchema::PolygonAggregates
    }

    fn build_request(
        &self,
        request: &SeriesRequest,
        credential: Option<&Credential>,
    ) -> Result<HttpRequest, FetchError> {
        let Some(credential) = credential else {
            return Err(FetchError::permanent(
                ProviderId::Polygon,
                None,
                "no polygon API key configured",
            ));
        };

        let timespan = match request.granularity {
            Granularity::Daily => "day",
            Granularity::Weekly => "week",
            Granularity::Monthly => "month",
        };
        let to = request.end.unwrap_or_else(|| UtcDateTime::now().date());
        let from = request.start.unwrap_or(to - Duration::days(365));

        let adjusted = if request.field == SeriesField::AdjustedClose {
            "true"
        } else {
            "false"
        };

        Ok(HttpRequest::get(format!(
            "{}/v2/aggs/ticker/{}/range/1/{timespan}/{}/{}",
            self.base_url,
            urlencoding::encode(request.symbol.as_str()),
            ferroquant_kernel::format_date(from),
            ferroquant_kernel::format_date(to),
        ))
        .with_query("adjusted", adjusted)
        .with_query("sort", "asc")
        .with_query("limit", "50000")
        .with_auth(&HttpAuth::BearerToken(credential.expose().to_owned())))
    }

    fn classify_response(
        &self,
        response: HttpResponse,
        retry: &RetryConfig,
    ) -> Result<String, FetchError> {
        let body = classify_status(ProviderId::Polygon, response, retry)?;

        let status = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| value.get("status").and_then(|s| s.as_str()).map(str::to_owned));
        if status.as_deref() == Some("ERROR") {
            return Err(FetchError::permanent(
                ProviderId::Polygon,
                Some(200),
                "polygon reported status ERROR",
            ));
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::Symbol;

    fn request() -> SeriesRequest {
        SeriesRequest::new(ProviderId::Polygon, Symbol::parse("AAPL").unwrap())
            .with_range(Some(date!(2024 - 01 - 02)), Some(date!(2024 - 03 - 28)))
    }

    #[test]
    fn builds_aggregates_url_with_bearer_token() {
        let adapter = PolygonAdapter::new("https://polygon.test");
        let credential = Credential::new("secret");

        let http = adapter.build_request(&request(), Some(&credential)).unwrap();
        assert_eq!(
            http.url,
            "https://polygon.test/v2/aggs/ticker/AAPL/range/1/day/2024-01-02/2024-03-28?adjusted=false&sort=asc&limit=50000"
        );
        assert_eq!(http.headers.get("authorization").map(String::as_str), Some("Bearer secret"));
    }

    #[test]
    fn missing_key_is_permanent() {
        let error = PolygonAdapter::default().build_request(&request(), None).unwrap_err();
        assert!(matches!(error, FetchError::Permanent { status: None, .. }));
    }

    #[test]
    fn error_status_in_body_is_permanent() {
        let adapter = PolygonAdapter::default();
        let retry = RetryConfig::default();

        let error = adapter
            .classify_response(
                HttpResponse::ok_json(r#"{"status":"ERROR","error":"Unknown API Key"}"#),
                &retry,
            )
            .unwrap_err();
        assert!(matches!(error, FetchError::Permanent { .. }));

        let ok = adapter.classify_response(HttpResponse::ok_json(r#"{"status":"OK"}"#), &retry);
        assert!(ok.is_ok());
    }
}
