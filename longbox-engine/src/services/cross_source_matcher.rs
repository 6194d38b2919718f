//! Cross-source series matching
//!
//! Scores a primary series against candidates from a secondary source using
//! six factors: title, publisher, start year, issue count, creators and
//! aliases. Factors that one side cannot supply (no year, no creators...)
//! are left out and the remaining weights renormalised, so sparse sources
//! are not penalised for missing data.
//!
//! Auto-matched pairs are remembered in the [`MappingRegistry`]; a verified
//! mapping overrides scoring.

use std::sync::Arc;
use std::time::Duration;
use strsim::normalized_levenshtein;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{self, Cache};
use crate::models::{
    fold_name, CrossSourceMatch, IssueCandidate, IssueMatch, MatchFactors, MetadataSource, SeriesProfile,
    YearMatch,
};
use crate::services::issue_number::{find_matching_issue, ISSUE_MATCH_THRESHOLD};
use crate::services::mapping_registry::{EntityRef, MappingRegistry};
use crate::services::publisher_normalizer::{is_imprint_of, publishers_match};
use crate::services::title_normalizer::similarity;
use crate::sources::{ProviderError, SeriesSourceProvider};

pub const AUTO_MATCH_THRESHOLD: f64 = 0.95;
pub const MIN_MATCH_CONFIDENCE: f64 = 0.6;
/// Publisher credit when one side is an imprint of the other
pub const IMPRINT_CREDIT: f64 = 0.5;
/// Credit for a start year one off
pub const CLOSE_YEAR_CREDIT: f64 = 0.5;
/// Relative issue-count tolerance
pub const ISSUE_COUNT_TOLERANCE: f64 = 0.10;
/// Absolute issue-count tolerance, for short runs
pub const ISSUE_COUNT_SLACK: u32 = 2;
/// Two creator spellings are the same person at or above this
pub const CREATOR_SIMILARITY: f64 = 0.85;

pub const SEARCH_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Transport error: {0}")]
    Transport(#[source] ProviderError),

    #[error("No provider registered for {0}")]
    UnknownSource(MetadataSource),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchWeights {
    pub title: f64,
    pub publisher: f64,
    pub year: f64,
    pub issue_count: f64,
    pub creators: f64,
    pub alias: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            title: 0.40,
            publisher: 0.15,
            year: 0.15,
            issue_count: 0.10,
            creators: 0.10,
            alias: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    pub auto_match_threshold: f64,
    pub min_confidence: f64,
    pub issue_threshold: f64,
    pub weights: MatchWeights,
    /// Surface transport failures as errors instead of "no match"
    pub propagate_transport_errors: bool,
    pub search_cache_ttl: Duration,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            auto_match_threshold: AUTO_MATCH_THRESHOLD,
            min_confidence: MIN_MATCH_CONFIDENCE,
            issue_threshold: ISSUE_MATCH_THRESHOLD,
            weights: MatchWeights::default(),
            propagate_transport_errors: false,
            search_cache_ttl: SEARCH_CACHE_TTL,
        }
    }
}

/// Per-factor evidence for one candidate
pub fn compute_factors(primary: &SeriesProfile, candidate: &SeriesProfile) -> MatchFactors {
    MatchFactors {
        title_similarity: similarity(&primary.name, &candidate.name),
        publisher_match: publishers_match(primary.publisher.as_deref(), candidate.publisher.as_deref()),
        year_match: year_match(primary.start_year, candidate.start_year),
        issue_count_match: issue_count_match(primary.issue_count, candidate.issue_count),
        creator_overlap: creator_overlap(&primary.creators, &candidate.creators),
        alias_match: alias_match(primary, candidate),
    }
}

pub fn year_match(a: Option<i32>, b: Option<i32>) -> YearMatch {
    match (a, b) {
        (Some(a), Some(b)) if a == b => YearMatch::Exact,
        (Some(a), Some(b)) if (a - b).abs() == 1 => YearMatch::Close,
        _ => YearMatch::None,
    }
}

/// Within 10% of the larger count, or within two issues
pub fn issue_count_match(a: Option<u32>, b: Option<u32>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            let diff = a.abs_diff(b);
            diff <= ISSUE_COUNT_SLACK || (diff as f64) <= a.max(b) as f64 * ISSUE_COUNT_TOLERANCE
        }
        _ => false,
    }
}

/// Primary creators with a close spelling on the candidate side
pub fn creator_overlap(primary: &[String], candidate: &[String]) -> Vec<String> {
    let candidate: Vec<String> = candidate.iter().map(|c| fold_name(c)).collect();
    primary
        .iter()
        .filter(|p| {
            let folded = fold_name(p);
            candidate
                .iter()
                .any(|c| normalized_levenshtein(&folded, c) >= CREATOR_SIMILARITY)
        })
        .cloned()
        .collect()
}

/// True if an alias on either side names the other series exactly
fn alias_match(primary: &SeriesProfile, candidate: &SeriesProfile) -> bool {
    let names = |p: &SeriesProfile| -> Vec<String> {
        std::iter::once(&p.name).chain(p.aliases.iter()).cloned().collect()
    };
    let primary_names = names(primary);
    let candidate_names = names(candidate);

    primary.aliases.iter().any(|a| candidate_names.iter().any(|n| similarity(a, n) >= 1.0))
        || candidate.aliases.iter().any(|a| primary_names.iter().any(|n| similarity(a, n) >= 1.0))
}

/// Combine factors into one confidence in `[0, 1]`
pub fn score_factors(
    factors: &MatchFactors,
    primary: &SeriesProfile,
    candidate: &SeriesProfile,
    weights: &MatchWeights,
) -> f64 {
    let mut total = weights.title * factors.title_similarity;
    let mut available = weights.title;

    if let (Some(a), Some(b)) = (primary.publisher.as_deref(), candidate.publisher.as_deref()) {
        let credit = if factors.publisher_match {
            1.0
        } else if is_imprint_of(a, b) || is_imprint_of(b, a) {
            IMPRINT_CREDIT
        } else {
            0.0
        };
        total += weights.publisher * credit;
        available += weights.publisher;
    }

    if primary.start_year.is_some() && candidate.start_year.is_some() {
        let credit = match factors.year_match {
            YearMatch::Exact => 1.0,
            YearMatch::Close => CLOSE_YEAR_CREDIT,
            YearMatch::None => 0.0,
        };
        total += weights.year * credit;
        available += weights.year;
    }

    if primary.issue_count.is_some() && candidate.issue_count.is_some() {
        if factors.issue_count_match {
            total += weights.issue_count;
        }
        available += weights.issue_count;
    }

    if !primary.creators.is_empty() && !candidate.creators.is_empty() {
        let smaller = primary.creators.len().min(candidate.creators.len()) as f64;
        total += weights.creators * (factors.creator_overlap.len() as f64 / smaller).min(1.0);
        available += weights.creators;
    }

    if !primary.aliases.is_empty() || !candidate.aliases.is_empty() {
        if factors.alias_match {
            total += weights.alias;
        }
        available += weights.alias;
    }

    if available <= 0.0 {
        return 0.0;
    }
    (total / available).clamp(0.0, 1.0)
}

/// Score one candidate
pub fn score_candidate(primary: &SeriesProfile, candidate: &SeriesProfile, config: &MatcherConfig) -> CrossSourceMatch {
    let match_factors = compute_factors(primary, candidate);
    let confidence = score_factors(&match_factors, primary, candidate, &config.weights);
    CrossSourceMatch {
        source: candidate.source,
        source_id: candidate.source_id.clone(),
        name: candidate.name.clone(),
        confidence,
        match_factors,
        is_auto_match_candidate: confidence >= config.auto_match_threshold,
    }
}

/// Candidates at or above the minimum confidence, best first
pub fn rank_candidates(
    primary: &SeriesProfile,
    candidates: &[SeriesProfile],
    config: &MatcherConfig,
) -> Vec<CrossSourceMatch> {
    let mut ranked: Vec<CrossSourceMatch> = candidates
        .iter()
        .map(|c| score_candidate(primary, c, config))
        .filter(|m| m.confidence >= config.min_confidence)
        .collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    ranked
}

pub fn find_best_match(
    primary: &SeriesProfile,
    candidates: &[SeriesProfile],
    config: &MatcherConfig,
) -> Option<CrossSourceMatch> {
    rank_candidates(primary, candidates, config).into_iter().next()
}

/// Matches a primary series against registered secondary sources
pub struct CrossSourceMatcher {
    providers: Vec<Arc<dyn SeriesSourceProvider>>,
    registry: Arc<MappingRegistry>,
    cache: Option<Arc<dyn Cache>>,
    config: MatcherConfig,
}

impl CrossSourceMatcher {
    pub fn new(registry: Arc<MappingRegistry>, config: MatcherConfig) -> Self {
        Self {
            providers: Vec::new(),
            registry,
            cache: None,
            config,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn SeriesSourceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Cache search results per source and name
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MappingRegistry> {
        &self.registry
    }

    /// Registered secondary sources, in registration order
    pub fn sources(&self) -> Vec<MetadataSource> {
        self.providers.iter().map(|p| p.source()).collect()
    }

    fn provider(&self, source: MetadataSource) -> Result<&Arc<dyn SeriesSourceProvider>, MatchError> {
        self.providers
            .iter()
            .find(|p| p.source() == source)
            .ok_or(MatchError::UnknownSource(source))
    }

    /// Best match for `primary` in `target`
    ///
    /// A verified mapping answers without touching the source. `Ok(None)`
    /// covers both "nothing close enough" and an unavailable source, unless
    /// transport errors are configured to propagate.
    pub async fn find_match(
        &self,
        primary: &SeriesProfile,
        target: MetadataSource,
    ) -> Result<Option<CrossSourceMatch>, MatchError> {
        let provider = self.provider(target)?;
        let primary_ref = EntityRef::new(primary.source, primary.source_id.clone());

        if let Some(mapping) = self.registry.lookup(&primary_ref, target).filter(|m| m.verified) {
            if let Some(mapped) = mapping.other_side(&primary_ref) {
                debug!(source = %target, id = %mapped.id, "Using verified mapping");
                return Ok(Some(self.verified_match(primary, mapped).await));
            }
        }

        let candidates = match self.search(provider.as_ref(), &primary.name).await {
            Ok(candidates) => candidates,
            Err(e) => return self.recover(target, e).map(|_| None),
        };

        let best = find_best_match(primary, &candidates, &self.config);
        if let Some(best) = &best {
            debug!(
                source = %target,
                primary = %primary.name,
                candidate = %best.name,
                confidence = best.confidence,
                "Best cross-source candidate"
            );
            if best.is_auto_match_candidate {
                self.registry.record(
                    primary_ref,
                    EntityRef::new(best.source, best.source_id.clone()),
                    best.confidence,
                );
            }
        }
        Ok(best)
    }

    /// Match for a confirmed mapping
    ///
    /// Factors come from a cached search hit when there is one; otherwise
    /// only the name is carried over.
    async fn verified_match(&self, primary: &SeriesProfile, mapped: &EntityRef) -> CrossSourceMatch {
        let cached = self
            .cached_search(mapped.source, &primary.name)
            .await
            .and_then(|hits| hits.into_iter().find(|c| c.source_id == mapped.id));
        let candidate = cached.unwrap_or_else(|| SeriesProfile::new(mapped.source, mapped.id.clone(), primary.name.clone()));

        let mut matched = score_candidate(primary, &candidate, &self.config);
        matched.confidence = 1.0;
        matched.is_auto_match_candidate = true;
        matched
    }

    /// Best match in every registered source other than the primary's own
    pub async fn find_matches(&self, primary: &SeriesProfile) -> Result<Vec<CrossSourceMatch>, MatchError> {
        let mut matches = Vec::new();
        for provider in &self.providers {
            if provider.source() == primary.source {
                continue;
            }
            if let Some(found) = self.find_match(primary, provider.source()).await? {
                matches.push(found);
            }
        }
        info!(primary = %primary.name, matches = matches.len(), "Cross-source matching complete");
        Ok(matches)
    }

    /// Issue in the matched series with the same number as `primary`
    pub async fn match_issue(
        &self,
        primary: &IssueCandidate,
        series: &CrossSourceMatch,
    ) -> Result<Option<IssueMatch>, MatchError> {
        let provider = self.provider(series.source)?;
        match provider.list_issues(&series.source_id).await {
            Ok(candidates) => Ok(find_matching_issue(primary, &candidates, self.config.issue_threshold)),
            Err(e) => self.recover(series.source, e).map(|_| None),
        }
    }

    /// Forget mappings for an entity whose source data was refreshed
    ///
    /// Cached search results are keyed by name and age out on their own TTL.
    pub fn invalidate(&self, source: MetadataSource, id: &str) -> usize {
        let removed = self.registry.invalidate_entity(&EntityRef::new(source, id));
        debug!(source = %source, id = %id, removed, "Invalidated mappings");
        removed
    }

    fn search_key(source: MetadataSource, name: &str) -> String {
        format!("xsrc:{}:search:{}", source, fold_name(name))
    }

    async fn cached_search(&self, source: MetadataSource, name: &str) -> Option<Vec<SeriesProfile>> {
        let cache = self.cache.as_ref()?;
        cache::get_json::<Vec<SeriesProfile>>(cache.as_ref(), &Self::search_key(source, name)).await
    }

    async fn search(&self, provider: &dyn SeriesSourceProvider, name: &str) -> Result<Vec<SeriesProfile>, ProviderError> {
        if let Some(hit) = self.cached_search(provider.source(), name).await {
            return Ok(hit);
        }

        let candidates = provider.search_series(name).await?;
        if let Some(cache) = &self.cache {
            let key = Self::search_key(provider.source(), name);
            cache::set_json(cache.as_ref(), &key, &candidates, self.config.search_cache_ttl).await;
        }
        Ok(candidates)
    }

    fn recover(&self, source: MetadataSource, error: ProviderError) -> Result<(), MatchError> {
        if error.is_transport() && self.config.propagate_transport_errors {
            return Err(MatchError::Transport(error));
        }
        warn!(source = %source, error = %error, "Source lookup failed, treating as no match");
        Ok(())
    }
}
