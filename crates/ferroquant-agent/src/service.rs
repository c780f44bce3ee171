//! # Analytics Service
//!
//! Runs tool calls end to end: input validation, cache lookups, provider
//! fetches, curve construction and pricing, and envelope assembly.
//!
//! Every call is bounded by the configured deadline. Market data and derived
//! artifacts go through the [`DataCache`]; when the store fails the call
//! continues without it and says so in the envelope warnings. A retryable
//! fetch failure is answered from an expired or bypassed cache entry when one
//! exists, flagged `stale`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ferroquant_core::{
    CredentialCache, CredentialSource, Envelope, EnvelopeError, EnvelopeMeta, FetchOrchestrator,
    Normalized, ProviderId, Series, SeriesRequest, UtcDateTime, ValidationError,
};
use ferroquant_kernel::{
    analyze_profile, format_date, price_instrument, Curve, CurveBuilder, KernelError, Pillar,
    Valuation,
};
use ferroquant_store::{
    fingerprint, CacheEntry, DataCache, EntryKind, Lookup, Provenance, StoreError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::AnalyticsConfig;
use crate::envelope::EnvelopeBuilder;
use crate::error::ServiceError;
use crate::metadata::{CallProvenance, RequestId, TraceId};
use crate::requests::{
    decode, AnalyzeProfileInput, CurveInput, DiscountFactorInput, GetDiscountCurveInput,
    GetSeriesInput, InvalidateCacheInput, PriceInstrumentInput,
};
use crate::schema::SchemaViolation;
use crate::tools::{ToolName, ToolRegistry};
use crate::SCHEMA_VERSION;

/// Valuation returned by `price_instrument` and stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedInstrument {
    #[serde(flatten)]
    pub valuation: Valuation,
    pub computed_at: UtcDateTime,
}

/// Result of one tool: data plus per-item errors of a partial success.
#[derive(Debug)]
struct ToolOutput {
    data: Value,
    errors: Vec<EnvelopeError>,
}

impl ToolOutput {
    fn data(data: Value) -> Self {
        Self {
            data,
            errors: Vec::new(),
        }
    }
}

struct CallContext {
    deadline: Duration,
    started: Instant,
    cancel: CancellationToken,
}

impl CallContext {
    fn new(deadline: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline,
            started: Instant::now(),
            cancel,
        }
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_sub(self.started.elapsed())
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn deadline_exceeded(&self) -> ServiceError {
        ServiceError::DeadlineExceeded {
            deadline_ms: u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug)]
struct ResolvedSeries {
    series: Series,
    cache_hit: bool,
    stale: bool,
    dropped_rows: usize,
}

/// Process-scoped service state shared by all tool calls.
#[derive(Debug)]
pub struct AnalyticsService {
    config: AnalyticsConfig,
    orchestrator: Arc<FetchOrchestrator>,
    cache: DataCache,
    registry: ToolRegistry,
}

impl AnalyticsService {
    pub fn new(config: AnalyticsConfig, orchestrator: Arc<FetchOrchestrator>, cache: DataCache) -> Self {
        Self {
            config,
            orchestrator,
            cache,
            registry: ToolRegistry::new(),
        }
    }

    /// Loads credentials, wires provider adapters for the configured endpoints
    /// and opens the cache. A cache that cannot be opened is logged and the
    /// service runs fetch-through.
    pub async fn start(
        config: AnalyticsConfig,
        credentials: &dyn CredentialSource,
    ) -> Result<Self, ServiceError> {
        let credential_cache = Arc::new(CredentialCache::new());
        let loaded = credential_cache
            .initialize(credentials, &ProviderId::ALL)
            .await?;

        let orchestrator = FetchOrchestrator::builder()
            .with_endpoints(&config.endpoints)
            .with_credentials(credential_cache)
            .build();

        let cache = match DataCache::open(config.store.clone()).await {
            Ok(cache) => cache,
            Err(error) => {
                tracing::warn!(%error, "cache store unavailable, serving fetch-through");
                DataCache::unavailable(error.to_string())
            }
        };

        tracing::info!(
            credentials = loaded,
            cache_available = cache.is_available(),
            "analytics service started"
        );
        Ok(Self::new(config, Arc::new(orchestrator), cache))
    }

    /// Drops process-scoped secrets.
    pub async fn shutdown(&self) {
        self.orchestrator.credentials().clear().await;
        tracing::info!("analytics service stopped");
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn cache(&self) -> &DataCache {
        &self.cache
    }

    pub fn orchestrator(&self) -> &Arc<FetchOrchestrator> {
        &self.orchestrator
    }

    pub async fn call(&self, name: &str, input: Value) -> Envelope<Value> {
        self.call_with_cancel(name, input, &CancellationToken::new())
            .await
    }

    /// Runs one tool call. Never fails: every outcome, including unknown tools
    /// and blown deadlines, is reported inside the envelope.
    pub async fn call_with_cancel(
        &self,
        name: &str,
        input: Value,
        cancel: &CancellationToken,
    ) -> Envelope<Value> {
        let request_id = RequestId::new_v4();
        let span = tracing::info_span!("tool_call", tool = name, request_id = %request_id);

        async move {
            let ctx = CallContext::new(self.config.deadline, cancel.child_token());
            let mut provenance = CallProvenance::default();

            let result = match self.registry.validate_input(name, &input) {
                Ok(tool) => self.run_with_deadline(tool, input, &ctx, &mut provenance).await,
                Err(error) => Err(error),
            };
            let latency_ms = ctx.elapsed_ms();

            let (data, errors) = match result {
                Ok(output) => {
                    tracing::info!(
                        latency_ms,
                        cache_hit = provenance.cache_hit,
                        stale = provenance.stale,
                        partial_failures = output.errors.len(),
                        "tool call completed"
                    );
                    (output.data, output.errors)
                }
                Err(error) => {
                    tracing::warn!(latency_ms, code = error.code(), %error, "tool call failed");
                    (Value::Null, error.envelope_errors(name))
                }
            };

            build_envelope(request_id, data, errors, provenance, latency_ms)
        }
        .instrument(span)
        .await
    }

    async fn run_with_deadline(
        &self,
        tool: ToolName,
        input: Value,
        ctx: &CallContext,
        provenance: &mut CallProvenance,
    ) -> Result<ToolOutput, ServiceError> {
        let work = self.dispatch(tool, input, ctx, provenance);
        match tokio::time::timeout(ctx.remaining(), work).await {
            Ok(result) => result,
            Err(_) => {
                ctx.cancel.cancel();
                Err(ctx.deadline_exceeded())
            }
        }
    }

    async fn dispatch(
        &self,
        tool: ToolName,
        input: Value,
        ctx: &CallContext,
        provenance: &mut CallProvenance,
    ) -> Result<ToolOutput, ServiceError> {
        match tool {
            ToolName::GetSeries => self.get_series(decode(input)?, ctx, provenance).await,
            ToolName::BuildCurve => self.build_curve(decode(input)?).await,
            ToolName::GetDiscountCurve => {
                self.get_discount_curve(decode(input)?, ctx, provenance)
                    .await
            }
            ToolName::DiscountFactor => self.discount_factor(decode(input)?, ctx, provenance).await,
            ToolName::PriceInstrument => self.price(decode(input)?, ctx, provenance).await,
            ToolName::InvalidateCache => self.invalidate(decode(input)?).await,
            ToolName::AnalyzeFinancialProfile => self.analyze_profile(decode(input)?).await,
        }
    }

    async fn get_series(
        &self,
        input: GetSeriesInput,
        ctx: &CallContext,
        provenance: &mut CallProvenance,
    ) -> Result<ToolOutput, ServiceError> {
        let targets = input
            .requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| (format!("/requests/{index}"), request))
            .collect::<Vec<_>>();

        let violations = targets
            .iter()
            .filter_map(|(path, request)| {
                request
                    .validate()
                    .err()
                    .map(|error| SchemaViolation::new(path.clone(), error.to_string()))
            })
            .collect::<Vec<_>>();
        if !violations.is_empty() {
            return Err(ServiceError::Validation { violations });
        }

        let resolved = self
            .resolve_series(&targets, input.refresh, ctx, provenance)
            .await?;

        let mut items = Vec::with_capacity(resolved.len());
        let mut errors = Vec::new();
        let mut all_cached = true;
        for ((_, request), outcome) in targets.iter().zip(resolved) {
            match outcome {
                Ok(resolved) => {
                    all_cached &= resolved.cache_hit;
                    items.push(json!({
                        "request": request,
                        "series": resolved.series,
                        "dropped_rows": resolved.dropped_rows,
                        "cache_hit": resolved.cache_hit,
                        "stale": resolved.stale,
                    }));
                }
                Err(error) => {
                    all_cached = false;
                    let item_errors = error.envelope_errors(ToolName::GetSeries.as_str());
                    items.push(json!({
                        "request": request,
                        "cache_hit": false,
                        "stale": false,
                        "error": item_errors.first(),
                    }));
                    errors.extend(item_errors);
                }
            }
        }
        provenance.cache_hit = all_cached;

        Ok(ToolOutput {
            data: json!({ "items": items }),
            errors,
        })
    }

    async fn build_curve(&self, input: CurveInput) -> Result<ToolOutput, ServiceError> {
        input.check("/")?;
        let curve = self.curve_from_pillars(&input, "/").await?;
        Ok(ToolOutput::data(curve_data(&curve)))
    }

    async fn get_discount_curve(
        &self,
        input: GetDiscountCurveInput,
        ctx: &CallContext,
        provenance: &mut CallProvenance,
    ) -> Result<ToolOutput, ServiceError> {
        let (curve, cache_hit) = self
            .resolve_curve(&input.curve, "/", input.refresh, ctx, provenance)
            .await?;
        provenance.cache_hit = cache_hit;
        Ok(ToolOutput::data(curve_data(&curve)))
    }

    async fn discount_factor(
        &self,
        input: DiscountFactorInput,
        ctx: &CallContext,
        provenance: &mut CallProvenance,
    ) -> Result<ToolOutput, ServiceError> {
        let (curve, cache_hit) = self
            .resolve_curve(&input.curve, "/curve", input.refresh, ctx, provenance)
            .await?;
        provenance.cache_hit = cache_hit;

        let dates = input.dates;
        let data = run_kernel(move || {
            let points = dates
                .iter()
                .map(|&date| {
                    json!({
                        "date": format_date(date),
                        "year_fraction": curve.year_fraction(date),
                        "discount_factor": curve.discount_factor(date),
                        "zero_rate": curve.zero_rate(date),
                    })
                })
                .collect::<Vec<_>>();
            json!({
                "curve_id": curve.curve_id(),
                "snapshot_hash": curve.snapshot_hash(),
                "as_of": format_date(curve.as_of()),
                "points": points,
            })
        })
        .await?;

        Ok(ToolOutput::data(data))
    }

    async fn price(
        &self,
        input: PriceInstrumentInput,
        ctx: &CallContext,
        provenance: &mut CallProvenance,
    ) -> Result<ToolOutput, ServiceError> {
        let PriceInstrumentInput {
            instrument,
            curve: mut curve_input,
            bump_size,
            refresh,
        } = input;

        instrument.validate().map_err(|error| match error {
            KernelError::UnsupportedInstrument(_) => {
                ServiceError::from_kernel(error, "/instrument/instrument_type")
            }
            other => ServiceError::from_kernel(other, "/instrument"),
        })?;
        if !instrument.curve_id.is_empty() {
            match &curve_input.curve_id {
                Some(curve_id) if *curve_id != instrument.curve_id => {
                    return Err(ServiceError::invalid(
                        "/instrument/curve_id",
                        format!(
                            "instrument references curve '{}' but curve '{curve_id}' was supplied",
                            instrument.curve_id
                        ),
                    ));
                }
                Some(_) => {}
                None => curve_input.curve_id = Some(instrument.curve_id.clone()),
            }
        }
        let bump_size = bump_size.unwrap_or(self.config.bump_size);

        let (curve, curve_cache_hit) = self
            .resolve_curve(&curve_input, "/curve", refresh, ctx, provenance)
            .await?;

        let instrument_fingerprint = instrument
            .fingerprint()
            .map_err(|error| ServiceError::from_kernel(error, "/instrument"))?;
        let key = fingerprint(
            EntryKind::Valuation,
            &(&instrument_fingerprint, curve.snapshot_hash(), bump_size),
        )
        .map_err(ServiceError::internal)?;

        if !refresh {
            if let Some(Lookup::Hit(entry)) = self.lookup(&key, provenance).await {
                match entry.decode::<PricedInstrument>() {
                    Ok(_) => {
                        provenance.cache_hit = true;
                        provenance.absorb(&entry.provenance);
                        return Ok(ToolOutput::data(with_curve_cache_hit(
                            entry.payload.clone(),
                            curve_cache_hit,
                        )));
                    }
                    Err(error) => tracing::warn!(key, %error, "undecodable cached valuation"),
                }
            }
        }

        let valuation = run_kernel(move || price_instrument(&instrument, &curve, bump_size))
            .await?
            .map_err(|error| match error {
                KernelError::InvalidBumpSize(_) => ServiceError::from_kernel(error, "/bump_size"),
                other => ServiceError::from_kernel(other, "/instrument"),
            })?;
        let priced = PricedInstrument {
            valuation,
            computed_at: UtcDateTime::now(),
        };
        let data = serde_json::to_value(&priced).map_err(ServiceError::internal)?;

        if provenance.stale {
            provenance.warn("valuation priced off stale data was not cached");
        } else {
            let stored = provenance.to_stored();
            self.store(&key, EntryKind::Valuation, data.clone(), stored, provenance)
                .await;
        }

        Ok(ToolOutput::data(with_curve_cache_hit(data, curve_cache_hit)))
    }

    /// Pure computation over the caller's figures: no provider, no cache.
    async fn analyze_profile(&self, input: AnalyzeProfileInput) -> Result<ToolOutput, ServiceError> {
        let AnalyzeProfileInput { profile } = input;
        let analysis = run_kernel(move || analyze_profile(&profile))
            .await?
            .map_err(|error| {
                let input_path = match &error {
                    KernelError::InvalidProfile { field, .. } => format!("/profile/{field}"),
                    _ => String::from("/profile"),
                };
                ServiceError::from_kernel(error, input_path)
            })?;

        tracing::debug!(
            score = analysis.financial_health_score,
            risk_capacity = analysis.risk_capacity_score,
            "financial profile analyzed"
        );
        let data = serde_json::to_value(&analysis).map_err(ServiceError::internal)?;
        Ok(ToolOutput::data(data))
    }

    async fn invalidate(&self, input: InvalidateCacheInput) -> Result<ToolOutput, ServiceError> {
        input.check()?;
        let unavailable = |error: StoreError| ServiceError::CacheUnavailable(error.to_string());

        let mut removed = 0;
        if let Some(key) = &input.key {
            removed += usize::from(self.cache.invalidate(key).await.map_err(unavailable)?);
        }
        if let Some(prefix) = &input.prefix {
            removed += self
                .cache
                .invalidate_prefix(prefix)
                .await
                .map_err(unavailable)?;
        }
        if let Some(kind) = input.kind {
            removed += self
                .cache
                .invalidate_prefix(&kind.prefix())
                .await
                .map_err(unavailable)?;
        }
        let purged = if input.purge_expired {
            self.cache.purge_expired().await.map_err(unavailable)?
        } else {
            0
        };
        let stats = self.cache.stats().await.map_err(unavailable)?;

        tracing::info!(removed, purged, "cache invalidated");
        Ok(ToolOutput::data(json!({
            "removed": removed,
            "purged": purged,
            "stats": stats,
        })))
    }

    /// Resolves every request from the cache or the providers. The outer error
    /// aborts the whole call; inner errors belong to single requests.
    async fn resolve_series(
        &self,
        targets: &[(String, SeriesRequest)],
        refresh: bool,
        ctx: &CallContext,
        provenance: &mut CallProvenance,
    ) -> Result<Vec<Result<ResolvedSeries, ServiceError>>, ServiceError> {
        let mut results: Vec<Option<Result<ResolvedSeries, ServiceError>>> =
            targets.iter().map(|_| None).collect();
        let mut fallbacks: HashMap<usize, Arc<CacheEntry>> = HashMap::new();
        let mut keys = Vec::with_capacity(targets.len());

        for (index, (_, request)) in targets.iter().enumerate() {
            let key = fingerprint(EntryKind::Series, request).map_err(ServiceError::internal)?;
            match self.lookup(&key, provenance).await {
                Some(Lookup::Hit(entry)) if !refresh => match entry.decode::<Series>() {
                    Ok(series) => {
                        provenance.absorb(&entry.provenance);
                        results[index] = Some(Ok(ResolvedSeries {
                            series,
                            cache_hit: true,
                            stale: entry.provenance.stale,
                            dropped_rows: 0,
                        }));
                    }
                    Err(error) => tracing::warn!(key, %error, "undecodable cached series, refetching"),
                },
                Some(Lookup::Hit(entry) | Lookup::Expired(entry)) => {
                    fallbacks.insert(index, entry);
                }
                Some(Lookup::Miss) | None => {}
            }
            keys.push(key);
        }

        let pending = results
            .iter()
            .enumerate()
            .filter(|(_, result)| result.is_none())
            .map(|(index, _)| index)
            .collect::<Vec<_>>();

        if !pending.is_empty() {
            let requests = pending
                .iter()
                .map(|&index| targets[index].1.clone())
                .collect();
            let report = self
                .orchestrator
                .fetch_many_with_deadline(
                    requests,
                    &self.config.fetch_options(),
                    ctx.remaining(),
                    &ctx.cancel,
                )
                .await;
            if report.deadline_exceeded() {
                return Err(ctx.deadline_exceeded());
            }

            for (index, entry) in pending.into_iter().zip(report.into_entries()) {
                let (input_path, request) = &targets[index];
                let fetched = match entry.outcome.result {
                    Ok(raw) => raw.normalize().map_err(|error| ServiceError::MalformedPayload {
                        input_path: input_path.clone(),
                        error,
                    }),
                    Err(error) => Err(ServiceError::Fetch {
                        input_path: input_path.clone(),
                        error,
                    }),
                };

                let resolved = match fetched {
                    Ok(normalized) => Ok(self
                        .store_series(&keys[index], request, normalized, provenance)
                        .await),
                    Err(error) => {
                        stale_fallback(error, fallbacks.remove(&index), request, provenance)
                    }
                };
                results[index] = Some(resolved);
            }
        }

        Ok(results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| Err(ServiceError::internal("series was not resolved")))
            })
            .collect())
    }

    async fn store_series(
        &self,
        key: &str,
        request: &SeriesRequest,
        normalized: Normalized,
        provenance: &mut CallProvenance,
    ) -> ResolvedSeries {
        let Normalized {
            series,
            dropped_rows,
        } = normalized;
        let series = series.restrict(request.start, request.end);

        let mut stored = Provenance::from_sources(vec![series.source()]);
        if dropped_rows > 0 {
            let warning = format!("{}: dropped {dropped_rows} unusable rows", request.series_id());
            provenance.warn(warning.clone());
            stored = stored.with_warning(warning);
        }
        provenance.add_source(series.source());

        match serde_json::to_value(&series) {
            Ok(payload) => {
                self.store(key, EntryKind::Series, payload, stored, provenance)
                    .await;
            }
            Err(error) => tracing::warn!(key, %error, "series not cacheable"),
        }

        ResolvedSeries {
            series,
            cache_hit: false,
            stale: false,
            dropped_rows,
        }
    }

    async fn resolve_curve(
        &self,
        input: &CurveInput,
        input_path: &str,
        refresh: bool,
        ctx: &CallContext,
        provenance: &mut CallProvenance,
    ) -> Result<(Curve, bool), ServiceError> {
        input.check(input_path)?;
        if input.is_market() {
            self.market_curve(input, input_path, refresh, ctx, provenance)
                .await
        } else {
            Ok((self.curve_from_pillars(input, input_path).await?, false))
        }
    }

    async fn curve_from_pillars(&self, input: &CurveInput, input_path: &str) -> Result<Curve, ServiceError> {
        let builder = self.curve_builder(input, input.pillars.clone());
        let pillars_path = child_path(input_path, "pillars");
        run_kernel(move || builder.build())
            .await?
            .map_err(|error| ServiceError::from_kernel(error, pillars_path))
    }

    /// Curve from the latest observation of one series per tenor, cached
    /// under the input fingerprint unless any series was stale.
    async fn market_curve(
        &self,
        input: &CurveInput,
        input_path: &str,
        refresh: bool,
        ctx: &CallContext,
        provenance: &mut CallProvenance,
    ) -> Result<(Curve, bool), ServiceError> {
        let day_count = input.day_count.or(self.config.day_count).unwrap_or_default();
        let key = fingerprint(EntryKind::Curve, &(input, day_count)).map_err(ServiceError::internal)?;

        if !refresh {
            if let Some(Lookup::Hit(entry)) = self.lookup(&key, provenance).await {
                match entry.decode::<Curve>() {
                    Ok(curve) => {
                        provenance.absorb(&entry.provenance);
                        return Ok((curve, true));
                    }
                    Err(error) => tracing::warn!(key, %error, "undecodable cached curve, rebuilding"),
                }
            }
        }

        let market_path = child_path(input_path, "market");
        let targets = input
            .market
            .iter()
            .enumerate()
            .map(|(index, quote)| (format!("{market_path}/{index}"), quote.series_request()))
            .collect::<Vec<_>>();
        let resolved = self
            .resolve_series(&targets, refresh, ctx, provenance)
            .await?
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let mut latest = Vec::with_capacity(resolved.len());
        for ((path, _), series) in targets.iter().zip(&resolved) {
            let last = series
                .series
                .last()
                .ok_or_else(|| ServiceError::InvalidCurveInput {
                    input_path: path.clone(),
                    message: String::from("series has no observations"),
                })?;
            latest.push(last.ts.date());
        }
        let as_of = input
            .as_of
            .or_else(|| latest.iter().min().copied())
            .ok_or_else(|| ServiceError::invalid(market_path.clone(), "no market quotes"))?;

        let mut pillars = Vec::with_capacity(resolved.len());
        for ((path, _), (quote, series)) in targets.iter().zip(input.market.iter().zip(&resolved)) {
            let date = quote
                .tenor
                .add_to(as_of)
                .map_err(|error| ServiceError::from_kernel(error, format!("{path}/tenor")))?;
            let observation = series.series.value_on_or_before(as_of).ok_or_else(|| {
                ServiceError::InvalidCurveInput {
                    input_path: path.clone(),
                    message: format!("no observation on or before {}", format_date(as_of)),
                }
            })?;
            pillars.push(Pillar::new(date, observation.value));
        }
        pillars.sort_by_key(|pillar| pillar.date);

        let builder = self.curve_builder(input, pillars).as_of(as_of);
        let curve = run_kernel(move || builder.build())
            .await?
            .map_err(|error| ServiceError::from_kernel(error, market_path))?;

        if resolved.iter().any(|series| series.stale) {
            provenance.warn(format!(
                "curve {} built from stale data was not cached",
                curve.curve_id()
            ));
        } else {
            let mut sources = Vec::new();
            for series in &resolved {
                if !sources.contains(&series.series.source()) {
                    sources.push(series.series.source());
                }
            }
            match serde_json::to_value(&curve) {
                Ok(payload) => {
                    self.store(&key, EntryKind::Curve, payload, Provenance::from_sources(sources), provenance)
                        .await;
                }
                Err(error) => tracing::warn!(key, %error, "curve not cacheable"),
            }
        }

        Ok((curve, false))
    }

    fn curve_builder(&self, input: &CurveInput, pillars: Vec<Pillar>) -> CurveBuilder {
        let mut builder = CurveBuilder::new(pillars)
            .interpolation(input.interpolation)
            .day_count(input.day_count.or(self.config.day_count).unwrap_or_default());
        if let Some(curve_id) = &input.curve_id {
            builder = builder.curve_id(curve_id.clone());
        }
        if let Some(as_of) = input.as_of {
            builder = builder.as_of(as_of);
        }
        builder
    }

    /// Cache read that degrades to a miss once the store has failed.
    async fn lookup(&self, key: &str, provenance: &mut CallProvenance) -> Option<Lookup> {
        if provenance.cache_degraded {
            return None;
        }
        match self.cache.get(key).await {
            Ok(lookup) => Some(lookup),
            Err(error) => {
                degrade(&error, provenance);
                None
            }
        }
    }

    async fn store(
        &self,
        key: &str,
        kind: EntryKind,
        payload: Value,
        stored: Provenance,
        provenance: &mut CallProvenance,
    ) {
        if provenance.cache_degraded {
            return;
        }
        if let Err(error) = self
            .cache
            .put(key, kind, payload, self.config.ttl_for(kind), stored)
            .await
        {
            degrade(&error, provenance);
        }
    }
}

fn degrade(error: &StoreError, provenance: &mut CallProvenance) {
    tracing::warn!(%error, "cache unavailable, continuing without it");
    provenance.warn(format!("cache unavailable, results were not cached: {error}"));
    provenance.cache_degraded = true;
}

/// Serves a previously cached series when `error` is retryable.
fn stale_fallback(
    error: ServiceError,
    fallback: Option<Arc<CacheEntry>>,
    request: &SeriesRequest,
    provenance: &mut CallProvenance,
) -> Result<ResolvedSeries, ServiceError> {
    if !error.retryable() {
        return Err(error);
    }
    let Some(series) = fallback.and_then(|entry| entry.decode::<Series>().ok()) else {
        return Err(error);
    };

    tracing::warn!(%error, series = %request.series_id(), "serving stale cached series");
    provenance.stale = true;
    provenance.add_source(series.source());
    provenance.warn(format!(
        "{}: served stale cached data after {}",
        request.series_id(),
        error.code()
    ));
    Ok(ResolvedSeries {
        series,
        cache_hit: true,
        stale: true,
        dropped_rows: 0,
    })
}

async fn run_kernel<T, F>(work: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| ServiceError::internal(format!("kernel task failed: {error}")))
}

fn child_path(base: &str, child: &str) -> String {
    format!("{}/{child}", base.trim_end_matches('/'))
}

fn curve_data(curve: &Curve) -> Value {
    json!({
        "curve": curve,
        "snapshot_hash": curve.snapshot_hash(),
    })
}

/// Tags a valuation with whether this call reused a cached curve. Not part of
/// the cached payload, since it describes the call rather than the valuation.
fn with_curve_cache_hit(mut data: Value, curve_cache_hit: bool) -> Value {
    if let Value::Object(fields) = &mut data {
        fields.insert(String::from("curve_cache_hit"), Value::Bool(curve_cache_hit));
    }
    data
}

fn build_envelope(
    request_id: RequestId,
    data: Value,
    errors: Vec<EnvelopeError>,
    provenance: CallProvenance,
    latency_ms: u64,
) -> Envelope<Value> {
    let request_id = request_id.to_string();
    let built = EnvelopeBuilder::new(SCHEMA_VERSION)
        .with_request_id(request_id.clone())
        .with_trace_id(TraceId::new().to_string())
        .with_data(data)
        .with_latency_ms(latency_ms)
        .with_provenance(provenance)
        .with_errors(errors)
        .build();

    match built {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::error!(%error, "envelope failed validation");
            fallback_envelope(request_id, latency_ms, &error)
        }
    }
}

fn fallback_envelope(request_id: String, latency_ms: u64, error: &ValidationError) -> Envelope<Value> {
    Envelope {
        meta: EnvelopeMeta {
            request_id,
            trace_id: None,
            schema_version: String::from(SCHEMA_VERSION),
            generated_at: UtcDateTime::now(),
            source_chain: Vec::new(),
            latency_ms,
            cache_hit: false,
            stale: false,
            warnings: Vec::new(),
        },
        data: Value::Null,
        errors: ServiceError::internal(format!("invalid envelope: {error}"))
            .envelope_errors("envelope"),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use approx::assert_relative_eq;
    use ferroquant_core::{
        FetchOrchestrator, ProviderEndpoints, QuotaRegistry, ScriptedHttpClient, ScriptedReply,
        StaticCredentials,
    };
    use ferroquant_store::StoreConfig;
    use serde_json::json;

    use super::*;
    use crate::schema::validate_against_schema;

    fn chart(closes: [f64; 2]) -> String {
        json!({
            "chart": {
                "result": [{
                    "timestamp": [1704067200, 1704153600],
                    "indicators": { "quote": [{ "close": closes }] }
                }],
                "error": null
            }
        })
        .to_string()
    }

    fn test_config() -> AnalyticsConfig {
        AnalyticsConfig {
            max_retries: 0,
            store: StoreConfig::in_memory(),
            ..AnalyticsConfig::default()
        }
    }

    async fn service_with(
        http: ScriptedHttpClient,
        config: AnalyticsConfig,
        cache: DataCache,
    ) -> (AnalyticsService, Arc<ScriptedHttpClient>) {
        let http = Arc::new(http);
        let orchestrator = FetchOrchestrator::builder()
            .with_endpoints(&ProviderEndpoints::all("http://scripted.test"))
            .with_http_client(http.clone())
            .with_quotas(QuotaRegistry::new())
            .build();
        (AnalyticsService::new(config, Arc::new(orchestrator), cache), http)
    }

    async fn service(http: ScriptedHttpClient) -> (AnalyticsService, Arc<ScriptedHttpClient>) {
        let cache = DataCache::in_memory().await.unwrap();
        service_with(http, test_config(), cache).await
    }

    fn rates_client() -> ScriptedHttpClient {
        ScriptedHttpClient::new()
            .route("/chart/RATE3M", vec![ScriptedReply::status(200, chart([5.0, 5.2]))])
            .route("/chart/RATE2Y", vec![ScriptedReply::status(200, chart([4.0, 4.4]))])
    }

    fn market_curve_input() -> Value {
        json!({
            "curve_id": "usd-market",
            "market": [
                { "tenor": "2Y", "provider": "yahoo", "symbol": "RATE2Y", "unit": "percent" },
                { "tenor": "3M", "provider": "yahoo", "symbol": "RATE3M", "unit": "percent" }
            ]
        })
    }

    fn pillar_curve() -> Value {
        json!({
            "curve_id": "usd-ois",
            "pillars": [
                { "date": "2024-01-01", "rate": 0.03 },
                { "date": "2025-01-01", "rate": 0.035 }
            ]
        })
    }

    #[tokio::test]
    async fn discount_factor_interpolates_between_pillars() {
        let (service, _) = service(ScriptedHttpClient::new()).await;

        let envelope = service
            .call(
                "discount_factor",
                json!({ "curve": pillar_curve(), "dates": ["2024-07-02"] }),
            )
            .await;

        assert!(envelope.is_ok(), "{:?}", envelope.errors);
        assert!(envelope.meta.source_chain.is_empty());
        assert!(!envelope.meta.cache_hit);
        let point = &envelope.data["points"][0];
        let zero = 0.03 + 0.005 * 183.0 / 366.0;
        let t = 183.0 / 365.0;
        assert_relative_eq!(point["zero_rate"].as_f64().unwrap(), zero, epsilon = 1e-12);
        assert_relative_eq!(
            point["discount_factor"].as_f64().unwrap(),
            (-zero * t).exp(),
            epsilon = 1e-12
        );

        let descriptor = service.tools().get("discount_factor").unwrap();
        assert!(validate_against_schema(&envelope.data, &descriptor.output_schema).is_ok());
    }

    #[tokio::test]
    async fn build_curve_reports_snapshot_hash() {
        let (service, _) = service(ScriptedHttpClient::new()).await;

        let first = service.call("build_curve", pillar_curve()).await;
        let second = service.call("build_curve", pillar_curve()).await;

        assert!(first.is_ok(), "{:?}", first.errors);
        assert_eq!(first.data["curve"]["curve_id"], "usd-ois");
        assert_eq!(first.data["curve"]["as_of"], "2024-01-01");
        assert_eq!(first.data["snapshot_hash"], second.data["snapshot_hash"]);
        let descriptor = service.tools().get("build_curve").unwrap();
        assert!(validate_against_schema(&first.data, &descriptor.output_schema).is_ok());
    }

    #[tokio::test]
    async fn get_series_reports_partial_failures() {
        let http = ScriptedHttpClient::new()
            .route("/chart/GOOD", vec![ScriptedReply::status(200, chart([470.0, 472.65]))])
            .route("/chart/MISSING", vec![ScriptedReply::status(404, "{}")]);
        let (service, http) = service(http).await;
        let input = json!({
            "requests": [
                { "provider": "yahoo", "symbol": "GOOD" },
                { "provider": "yahoo", "symbol": "MISSING" }
            ]
        });

        let envelope = service.call("get_series", input.clone()).await;

        assert_eq!(envelope.errors.len(), 1);
        let error = &envelope.errors[0];
        assert_eq!(error.code, "fetch.permanent");
        assert_eq!(error.input_path.as_deref(), Some("/requests/1"));
        assert_eq!(error.retryable, Some(false));
        assert_eq!(error.source, Some(ProviderId::Yahoo));
        assert_eq!(envelope.meta.source_chain, [ProviderId::Yahoo]);

        let items = envelope.data["items"].as_array().unwrap();
        assert_eq!(items[0]["series"]["observations"].as_array().unwrap().len(), 2);
        assert_eq!(items[0]["cache_hit"], false);
        assert_eq!(items[1]["error"]["code"], "fetch.permanent");
        let descriptor = service.tools().get("get_series").unwrap();
        assert!(validate_against_schema(&envelope.data, &descriptor.output_schema).is_ok());

        let again = service.call("get_series", input).await;
        assert_eq!(again.data["items"][0]["cache_hit"], true);
        assert!(!again.meta.cache_hit);
        assert_eq!(http.request_count("/chart/GOOD"), 1);
        assert_eq!(http.request_count("/chart/MISSING"), 2);
    }

    #[tokio::test]
    async fn market_curve_is_built_then_cached() {
        let (service, http) = service(rates_client()).await;

        let first = service.call("get_discount_curve", market_curve_input()).await;

        assert!(first.is_ok(), "{:?}", first.errors);
        assert!(!first.meta.cache_hit);
        assert_eq!(first.meta.source_chain, [ProviderId::Yahoo]);
        let curve = &first.data["curve"];
        assert_eq!(curve["as_of"], "2024-01-02");
        assert_eq!(curve["pillars"][0]["date"], "2024-04-02");
        assert_relative_eq!(curve["pillars"][0]["rate"].as_f64().unwrap(), 0.052, epsilon = 1e-12);
        assert_eq!(curve["pillars"][1]["date"], "2026-01-02");
        assert_relative_eq!(curve["pillars"][1]["rate"].as_f64().unwrap(), 0.044, epsilon = 1e-12);

        let second = service.call("get_discount_curve", market_curve_input()).await;
        assert!(second.meta.cache_hit);
        assert_eq!(second.data["snapshot_hash"], first.data["snapshot_hash"]);
        assert_eq!(http.request_count("/chart/RATE3M"), 1);
        assert_eq!(http.request_count("/chart/RATE2Y"), 1);
    }

    #[tokio::test]
    async fn valuations_are_cached_per_curve_snapshot() {
        let (service, _) = service(ScriptedHttpClient::new()).await;
        let input = json!({
            "instrument": {
                "instrument_type": "zero_coupon_bond",
                "notional": 1000000.0,
                "start": "2024-01-01",
                "maturity": "2026-01-01"
            },
            "curve": pillar_curve()
        });

        let first = service.call("price_instrument", input.clone()).await;
        assert!(first.is_ok(), "{:?}", first.errors);
        assert!(!first.meta.cache_hit);
        assert!(first.data["present_value"].as_f64().unwrap() > 0.0);
        assert!(first.data["sensitivities"]["parallel"].as_f64().unwrap() < 0.0);
        assert_eq!(first.data["curve_id"], "usd-ois");
        let descriptor = service.tools().get("price_instrument").unwrap();
        assert!(validate_against_schema(&first.data, &descriptor.output_schema).is_ok());

        assert_eq!(first.data["curve_cache_hit"], false);

        let second = service.call("price_instrument", input).await;
        assert!(second.meta.cache_hit);
        assert_eq!(second.data["computed_at"], first.data["computed_at"]);
    }

    #[tokio::test]
    async fn pricing_reports_a_reused_market_curve_separately() {
        // Given: the market curve is already cached
        let (service, http) = service(rates_client()).await;
        let curve = service.call("get_discount_curve", market_curve_input()).await;
        assert!(curve.is_ok(), "{:?}", curve.errors);
        let input = json!({
            "instrument": {
                "instrument_type": "zero_coupon_bond",
                "notional": 1000000.0,
                "start": "2024-01-02",
                "maturity": "2025-07-02"
            },
            "curve": market_curve_input()
        });

        // When
        let fresh = service.call("price_instrument", input.clone()).await;
        let reused = service.call("price_instrument", input).await;

        // Then: the valuation was computed, but off the cached curve
        assert!(fresh.is_ok(), "{:?}", fresh.errors);
        assert!(!fresh.meta.cache_hit);
        assert_eq!(fresh.data["curve_cache_hit"], true);
        assert!(reused.meta.cache_hit);
        assert_eq!(reused.data["curve_cache_hit"], true);
        assert_eq!(http.requests().len(), 2);
    }

    #[tokio::test]
    async fn unsupported_instrument_is_pinpointed() {
        let (service, _) = service(ScriptedHttpClient::new()).await;

        let envelope = service
            .call(
                "price_instrument",
                json!({
                    "instrument": {
                        "instrument_type": "variance_swap",
                        "notional": 100.0,
                        "start": "2024-01-01",
                        "maturity": "2025-01-01"
                    },
                    "curve": pillar_curve()
                }),
            )
            .await;

        assert_eq!(envelope.data, Value::Null);
        let error = &envelope.errors[0];
        assert_eq!(error.code, "kernel.unsupported_instrument");
        assert_eq!(error.input_path.as_deref(), Some("/instrument/instrument_type"));
        assert_eq!(error.retryable, Some(false));
        assert_eq!(error.operation.as_deref(), Some("price_instrument"));
    }

    #[tokio::test]
    async fn mismatched_curve_id_is_rejected() {
        let (service, _) = service(ScriptedHttpClient::new()).await;

        let envelope = service
            .call(
                "price_instrument",
                json!({
                    "instrument": {
                        "instrument_type": "zero_coupon_bond",
                        "notional": 100.0,
                        "start": "2024-01-01",
                        "maturity": "2025-01-01",
                        "curve_id": "eur-estr"
                    },
                    "curve": pillar_curve()
                }),
            )
            .await;

        assert_eq!(envelope.errors[0].code, "validation.invalid_input");
        assert_eq!(envelope.errors[0].input_path.as_deref(), Some("/instrument/curve_id"));
    }

    #[tokio::test]
    async fn every_invalid_field_is_reported() {
        let (service, _) = service(ScriptedHttpClient::new()).await;

        let envelope = service
            .call(
                "discount_factor",
                json!({ "curve": pillar_curve(), "dates": ["2024-02-30", "soon"] }),
            )
            .await;

        let paths = envelope
            .errors
            .iter()
            .map(|error| error.input_path.as_deref().unwrap_or_default())
            .collect::<Vec<_>>();
        assert_eq!(paths, ["/dates/0", "/dates/1"]);
        assert!(envelope
            .errors
            .iter()
            .all(|error| error.code == "validation.invalid_input"));
    }

    #[tokio::test]
    async fn invalid_pillars_map_to_curve_input_errors() {
        let (service, _) = service(ScriptedHttpClient::new()).await;

        let envelope = service
            .call(
                "build_curve",
                json!({
                    "pillars": [
                        { "date": "2025-01-01", "rate": 0.03 },
                        { "date": "2025-01-01", "rate": 0.031 }
                    ]
                }),
            )
            .await;

        assert_eq!(envelope.errors[0].code, "kernel.invalid_curve_input");
        assert_eq!(envelope.errors[0].input_path.as_deref(), Some("/pillars"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let (service, _) = service(ScriptedHttpClient::new()).await;

        let envelope = service.call("forecast_rates", json!({})).await;

        assert_eq!(envelope.errors[0].code, "tool.unknown");
        assert!(RequestId::parse(&envelope.meta.request_id).is_ok());
        assert!(envelope.meta.trace_id.is_some());
    }

    #[tokio::test]
    async fn hung_provider_hits_the_deadline() {
        let http = ScriptedHttpClient::new().route("/chart/SLOW", vec![ScriptedReply::Hang]);
        let config = AnalyticsConfig {
            deadline: Duration::from_millis(50),
            ..test_config()
        };
        let cache = DataCache::in_memory().await.unwrap();
        let (service, _) = service_with(http, config, cache).await;

        let envelope = service
            .call(
                "get_series",
                json!({ "requests": [{ "provider": "yahoo", "symbol": "SLOW" }] }),
            )
            .await;

        assert_eq!(envelope.errors.len(), 1);
        assert_eq!(envelope.errors[0].code, "deadline.exceeded");
        assert_eq!(envelope.errors[0].retryable, Some(true));
    }

    #[tokio::test]
    async fn store_outage_falls_through_to_providers() {
        let http = ScriptedHttpClient::new()
            .route("/chart/GOOD", vec![ScriptedReply::status(200, chart([470.0, 472.65]))]);
        let (service, http) =
            service_with(http, test_config(), DataCache::unavailable("disk full")).await;
        let input = json!({ "requests": [{ "provider": "yahoo", "symbol": "GOOD" }] });

        let first = service.call("get_series", input.clone()).await;
        let second = service.call("get_series", input).await;

        assert!(first.is_ok(), "{:?}", first.errors);
        assert!(first.meta.warnings.iter().any(|warning| warning.contains("cache unavailable")));
        assert!(!second.meta.cache_hit);
        assert_eq!(http.request_count("/chart/GOOD"), 2);
    }

    #[tokio::test]
    async fn transient_failure_serves_stale_cached_series() {
        let http = ScriptedHttpClient::new().route(
            "/chart/GOOD",
            vec![
                ScriptedReply::status(200, chart([470.0, 472.65])),
                ScriptedReply::status(503, "{}"),
            ],
        );
        let config = AnalyticsConfig {
            series_ttl: Duration::ZERO,
            ..test_config()
        };
        let cache = DataCache::in_memory().await.unwrap();
        let (service, _) = service_with(http, config, cache).await;
        let input = json!({ "requests": [{ "provider": "yahoo", "symbol": "GOOD" }] });

        let fresh = service.call("get_series", input.clone()).await;
        assert!(!fresh.meta.stale);

        let stale = service.call("get_series", input).await;
        assert!(stale.is_ok(), "{:?}", stale.errors);
        assert!(stale.meta.stale);
        assert_eq!(stale.data["items"][0]["stale"], true);
        assert_eq!(stale.meta.source_chain, [ProviderId::Yahoo]);
    }

    #[tokio::test]
    async fn invalidation_forces_refetch() {
        let http = ScriptedHttpClient::new()
            .route("/chart/GOOD", vec![ScriptedReply::status(200, chart([470.0, 472.65]))]);
        let (service, http) = service(http).await;
        let input = json!({ "requests": [{ "provider": "yahoo", "symbol": "GOOD" }] });

        service.call("get_series", input.clone()).await;
        let invalidated = service
            .call("invalidate_cache", json!({ "kind": "series" }))
            .await;
        assert!(invalidated.is_ok(), "{:?}", invalidated.errors);
        assert_eq!(invalidated.data["removed"], 1);

        service.call("get_series", input).await;
        assert_eq!(http.request_count("/chart/GOOD"), 2);

        let empty = service.call("invalidate_cache", json!({})).await;
        assert_eq!(empty.errors[0].code, "validation.invalid_input");
    }

    #[tokio::test]
    async fn start_opens_store_and_shutdown_drops_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalyticsConfig {
            store: StoreConfig::at(dir.path().join("cache.duckdb")),
            ..test_config()
        };
        let credentials = StaticCredentials::new().with(ProviderId::Polygon, "polygon-key");

        let service = AnalyticsService::start(config, &credentials).await.unwrap();
        assert!(service.cache().is_available());
        assert_eq!(service.orchestrator().credentials().len().await, 1);

        service.shutdown().await;
        assert_eq!(service.orchestrator().credentials().len().await, 0);
    }

    #[tokio::test]
    async fn start_degrades_when_store_cannot_open() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        let config = AnalyticsConfig {
            store: StoreConfig::at(blocker.join("cache.duckdb")),
            ..test_config()
        };

        let service = AnalyticsService::start(config, &StaticCredentials::new())
            .await
            .unwrap();

        assert!(!service.cache().is_available());
    }
}
