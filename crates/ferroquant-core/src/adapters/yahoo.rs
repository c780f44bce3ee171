use crate::credentials::Credential;
use crate::http_client::HttpRequest;
use crate::normalize::ProviderSchema;
use crate::{FetchError, Granularity, ProviderId, SeriesField, SeriesRequest, UtcDateTime};

use super::{trim_base, MarketDataProvider};

pub(super) const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Yahoo Finance chart API. Needs no credential.
#[derive(Debug, Clone)]
pub struct YahooAdapter {
    base_url: String,
}

impl Default for YahooAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl YahooAdapter {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            base_url: trim_base(base_url.as_ref()),
        }
    }
}

impl MarketDataProvider for YahooAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Yahoo
    }

    fn schema_for(&self, _request: &SeriesRequest) -> ProviderSchema {
        ProviderSchema::YahooChart
    }

    fn build_request(
        &self,
        request: &SeriesRequest,
        _credential: Option<&Credential>,
    ) -> Result<HttpRequest, FetchError> {
        let interval = match request.granularity {
            Granularity::Daily => "1d",
            Granularity::Weekly => "1wk",
            Granularity::Monthly => "1mo",
        };

        let mut http = HttpRequest::get(format!(
            "{}/v8/finance/chart/{}",
            self.base_url,
            urlencoding::encode(request.symbol.as_str())
        ))
        .with_query("interval", interval);

        http = match (request.start, request.end) {
            (None, None) => http.with_query("range", "1y"),
            (start, end) => {
                let period1 = start.map_or(0, |date| UtcDateTime::start_of_day(date).unix_seconds());
                let period2 = end
                    .map(|date| UtcDateTime::start_of_day(date.next_day().unwrap_or(date)))
                    .unwrap_or_else(UtcDateTime::now)
                    .unix_seconds();
                http.with_query("period1", &period1.to_string())
                    .with_query("period2", &period2.to_string())
            }
        };
        if request.field == SeriesField::AdjustedClose {
            http = http.with_query("includeAdjustedClose", "true");
        }

        Ok(http.with_header("referer", "https://finance.yahoo.com/"))
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::Symbol;

    #[test]
    fn builds_chart_url_for_explicit_range() {
        let adapter = YahooAdapter::new("https://yahoo.test/");
        let request = SeriesRequest::new(ProviderId::Yahoo, Symbol::parse("^TNX").unwrap())
            .with_range(Some(date!(2024 - 01 - 01)), Some(date!(2024 - 01 - 31)));

        let http = adapter.build_request(&request, None).unwrap();
        assert_eq!(
            http.url,
            "https://yahoo.test/v8/finance/chart/%5ETNX?interval=1d&period1=1704067200&period2=1706745600"
        );
        assert_eq!(adapter.schema_for(&request), ProviderSchema::YahooChart);
    }

    #[test]
    fn defaults_to_one_year_range() {
        let adapter = YahooAdapter::default();
        let request = SeriesRequest::new(ProviderId::Yahoo, Symbol::parse("SPY").unwrap())
            .with_granularity(Granularity::Weekly);

        let http = adapter.build_request(&request, None).unwrap();
        assert!(http.url.ends_with("/v8/finance/chart/SPY?interval=1wk&range=1y"));
    }
}
