use serde_json::Value;

use crate::credentials::Credential;
use crate::http_client::{HttpAuth, HttpRequest, HttpResponse};
use crate::normalize::ProviderSchema;
use crate::retry::RetryConfig;
use crate::{FetchError, Granularity, ProviderId, SeriesField, SeriesRequest};

use super::{classify_status, trim_base, MarketDataProvider};

pub(super) const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";

/// Alpha Vantage treats unknown keys as the public demo key.
const DEMO_KEY: &str = "demo";

/// Treasury symbols and the `maturity` values Alpha Vantage expects for them.
const TREASURY_MATURITIES: [(&str, &str); 6] = [
    ("UST3M", "3month"),
    ("UST2Y", "2year"),
    ("UST5Y", "5year"),
    ("UST7Y", "7year"),
    ("UST10Y", "10year"),
    ("UST30Y", "30year"),
];

/// Alpha Vantage equity time series and treasury yields.
///
/// Requests for [`SeriesField::Value`] address the treasury yield endpoint, with
/// the maturity taken from symbols such as `UST10Y`.
#[derive(Debug, Clone)]
pub struct AlphaVantageAdapter {
    base_url: String,
}

impl Default for AlphaVantageAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl AlphaVantageAdapter {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            base_url: trim_base(base_url.as_ref()),
        }
    }

    pub fn treasury_maturity(symbol: &str) -> Option<&'static str> {
        TREASURY_MATURITIES
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(symbol))
            .map(|(_, maturity)| *maturity)
    }
}

impl MarketDataProvider for AlphaVantageAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Alphavantage
    }

    fn schema_for(&self, request: &SeriesRequest) -> ProviderSchema {
        if request.field == SeriesField::Value {
            ProviderSchema::AlphaVantageTreasuryYield
        } else {
            ProviderSchema::AlphaVantageTimeSeries
        }
    }

    fn build_request(
        &self,
        request: &SeriesRequest,
        credential: Option<&Credential>,
    ) -> Result<HttpRequest, FetchError> {
        let interval = match request.granularity {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        };
        let key = credential.map_or(DEMO_KEY, Credential::expose);
        let http = HttpRequest::get(format!("{}/query", self.base_url));

        let http = if request.field == SeriesField::Value {
            let maturity = Self::treasury_maturity(request.symbol.as_str()).ok_or_else(|| {
                FetchError::permanent(
                    ProviderId::Alphavantage,
                    None,
                    format!("no treasury maturity for symbol {}", request.symbol),
                )
            })?;
            http.with_query("function", "TREASURY_YIELD")
                .with_query("interval", interval)
                .with_query("maturity", maturity)
        } else {
            let function = match (request.granularity, request.field) {
                (Granularity::Daily, SeriesField::AdjustedClose) => "TIME_SERIES_DAILY_ADJUSTED",
                (Granularity::Daily, _) => "TIME_SERIES_DAILY",
                (Granularity::Weekly, _) => "TIME_SERIES_WEEKLY",
                (Granularity::Monthly, _) => "TIME_SERIES_MONTHLY",
            };
            let outputsize = if request.start.is_some() { "full" } else { "compact" };
            http.with_query("function", function)
                .with_query("symbol", request.symbol.as_str())
                .with_query("outputsize", outputsize)
        };

        Ok(http.with_auth(&HttpAuth::QueryParam {
            name: String::from("apikey"),
            value: key.to_owned(),
        }))
    }

    /// Alpha Vantage reports throttling and bad requests with HTTP 200.
    fn classify_response(
        &self,
        response: HttpResponse,
        retry: &RetryConfig,
    ) -> Result<String, FetchError> {
        let body = classify_status(ProviderId::Alphavantage, response, retry)?;
        let Ok(Value::Object(root)) = serde_json::from_str::<Value>(&body) else {
            return Ok(body);
        };

        if let Some(message) = root.get("Error Message").and_then(Value::as_str) {
            return Err(FetchError::permanent(
                ProviderId::Alphavantage,
                Some(200),
                message,
            ));
        }
        let notice = root
            .get("Note")
            .or_else(|| root.get("Information"))
            .and_then(Value::as_str);
        if let Some(message) = notice {
            return Err(FetchError::rate_limited(ProviderId::Alphavantage, message));
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Symbol;

    #[test]
    fn treasury_request_uses_maturity_and_query_key() {
        let adapter = AlphaVantageAdapter::new("https://av.test");
        let request = SeriesRequest::new(ProviderId::Alphavantage, Symbol::parse("UST10Y").unwrap())
            .with_field(SeriesField::Value);
        let credential = Credential::new("k1");

        let http = adapter.build_request(&request, Some(&credential)).unwrap();
        assert_eq!(
            http.url,
            "https://av.test/query?function=TREASURY_YIELD&interval=daily&maturity=10year&apikey=k1"
        );
        assert_eq!(adapter.schema_for(&request), ProviderSchema::AlphaVantageTreasuryYield);
    }

    #[test]
    fn equity_request_falls_back_to_demo_key() {
        let adapter = AlphaVantageAdapter::new("https://av.test");
        let request = SeriesRequest::new(ProviderId::Alphavantage, Symbol::parse("IBM").unwrap())
            .with_granularity(Granularity::Monthly);

        let http = adapter.build_request(&request, None).unwrap();
        assert_eq!(
            http.url,
            "https://av.test/query?function=TIME_SERIES_MONTHLY&symbol=IBM&outputsize=compact&apikey=demo"
        );
        assert_eq!(adapter.schema_for(&request), ProviderSchema::AlphaVantageTimeSeries);
    }

    #[test]
    fn unknown_treasury_symbol_is_permanent() {
        let request = SeriesRequest::new(ProviderId::Alphavantage, Symbol::parse("UST4Y").unwrap())
            .with_field(SeriesField::Value);
        let error = AlphaVantageAdapter::default()
            .build_request(&request, None)
            .unwrap_err();
        assert!(matches!(error, FetchError::Permanent { .. }));
    }

    #[test]
    fn http_200_notices_are_classified() {
        let adapter = AlphaVantageAdapter::default();
        let retry = RetryConfig::default();

        let throttled = adapter.classify_response(
            HttpResponse::ok_json(r#"{"Note":"Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}"#),
            &retry,
        );
        assert!(matches!(throttled, Err(FetchError::RateLimited { .. })));

        let invalid = adapter.classify_response(
            HttpResponse::ok_json(r#"{"Error Message":"Invalid API call."}"#),
            &retry,
        );
        assert!(matches!(invalid, Err(FetchError::Permanent { .. })));

        let fine = adapter.classify_response(HttpResponse::ok_json(r#"{"data":[]}"#), &retry);
        assert_eq!(fine, Ok(String::from(r#"{"data":[]}"#)));
    }
}
