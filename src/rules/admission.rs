//! Admission rule evaluation.
//!
//! A candidate passes admission when every configured sub-check passes; the
//! first failing check short-circuits. Checks that depend on scraped site
//! attributes are only evaluated when such a rule is configured, and a probe
//! failure skips those checks rather than rejecting the candidate.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::threshold::{GIB, RangeRule};
use crate::feed::Candidate;
use crate::probe::{AttributeProbe, ProbeRequest, TorrentAttributes};

/// Promotion tier a task demands of its candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreeTier {
    /// No promotion requirement.
    #[default]
    Any,
    Free,
    DoubleFree,
}

impl FreeTier {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("FREE") => Self::Free,
            Some("2XFREE") => Self::DoubleFree,
            _ => Self::Any,
        }
    }
}

/// Raw admission rule set as configured and persisted.
///
/// Bound rules use the `mode#arg1[,arg2]` string grammar; see
/// [`RangeRule`]. Unparseable strings apply no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionRuleSpec {
    /// Size bound in GiB, e.g. `bw#1,5`.
    pub size: Option<String>,
    /// Title must match this pattern.
    pub include: Option<String>,
    /// Title must not match this pattern.
    pub exclude: Option<String>,
    /// Required promotion tier: `FREE` or `2XFREE`.
    pub free: Option<String>,
    /// Reject candidates flagged hit-and-run.
    pub hit_and_run: bool,
    /// Peer-count bound; a bare number means `lt#<n>` (legacy form).
    pub peer_count: Option<String>,
    /// Maximum candidate age in hours, e.g. `lt#24`.
    pub max_age: Option<String>,
    /// Maximum simultaneously downloading torrents on the task's backend.
    pub concurrent_cap: Option<u32>,
    /// Per-torrent download speed limit handed to the backend, KiB/s.
    pub download_limit: Option<u64>,
    /// Per-torrent upload speed limit handed to the backend, KiB/s.
    pub upload_limit: Option<u64>,
}

/// Admission rule set parsed into typed predicates.
///
/// Parsed once when a task is loaded or reconfigured, evaluated on every
/// candidate.
#[derive(Debug, Clone, Default)]
pub struct AdmissionRules {
    /// Size bound, scaled to bytes.
    pub size: Option<RangeRule>,
    pub include: Option<Regex>,
    pub exclude: Option<Regex>,
    pub free_tier: FreeTier,
    pub reject_hit_and_run: bool,
    pub peer_count: Option<RangeRule>,
    pub max_age_hours: Option<f64>,
    pub concurrent_cap: Option<u32>,
    pub download_limit: Option<u64>,
    pub upload_limit: Option<u64>,
}

impl AdmissionRules {
    pub fn parse(spec: &AdmissionRuleSpec) -> Self {
        Self {
            size: spec
                .size
                .as_deref()
                .and_then(RangeRule::parse)
                .map(|r| r.scaled(GIB)),
            include: parse_pattern(spec.include.as_deref(), "include"),
            exclude: parse_pattern(spec.exclude.as_deref(), "exclude"),
            free_tier: FreeTier::parse(spec.free.as_deref()),
            reject_hit_and_run: spec.hit_and_run,
            peer_count: spec.peer_count.as_deref().and_then(RangeRule::parse_legacy),
            max_age_hours: spec.max_age.as_deref().and_then(parse_hours),
            concurrent_cap: spec.concurrent_cap,
            download_limit: spec.download_limit,
            upload_limit: spec.upload_limit,
        }
    }

    /// Whether any configured rule needs scraped site attributes.
    pub fn needs_attributes(&self) -> bool {
        self.free_tier != FreeTier::Any || self.reject_hit_and_run || self.peer_count.is_some()
    }

    /// Promotion-tier checks need an authenticated detail-page fetch.
    pub fn requires_cookie(&self) -> bool {
        self.free_tier != FreeTier::Any
    }
}

fn parse_pattern(raw: Option<&str>, which: &str) -> Option<Regex> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match Regex::new(raw) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Invalid {} pattern '{}', ignoring rule: {}", which, raw, e);
            None
        }
    }
}

/// Freshness rules reuse the `mode#hours` shape but only the hour value is
/// interpreted; an empty mode token is accepted.
fn parse_hours(raw: &str) -> Option<f64> {
    let (_, hours) = raw.trim().split_once('#')?;
    hours.trim().parse().ok()
}

/// Apply a task's admission rule set to one candidate.
///
/// `cookie`/`user_agent`/`use_proxy` are the task's site credentials, passed
/// through to the attribute probe.
pub fn evaluate_admission(
    rules: &AdmissionRules,
    candidate: &Candidate,
    probe: &dyn AttributeProbe,
    cookie: Option<&str>,
    user_agent: Option<&str>,
    use_proxy: bool,
    now: DateTime<Utc>,
) -> bool {
    if let Some(size_rule) = &rules.size {
        if !size_rule.admits_size(candidate.size as f64) {
            debug!("'{}' rejected: size out of bounds", candidate.title);
            return false;
        }
    }

    if let Some(include) = &rules.include {
        if !include.is_match(&candidate.title) {
            debug!("'{}' rejected: include pattern not matched", candidate.title);
            return false;
        }
    }
    if let Some(exclude) = &rules.exclude {
        if exclude.is_match(&candidate.title) {
            debug!("'{}' rejected: exclude pattern matched", candidate.title);
            return false;
        }
    }

    if rules.needs_attributes() {
        match fetch_attributes(candidate, probe, cookie, user_agent, use_proxy) {
            Some(attrs) => {
                if !check_attributes(rules, candidate, &attrs) {
                    return false;
                }
            }
            // Attribute lookup is best-effort: a failed probe skips the
            // attribute-backed checks instead of rejecting the candidate.
            None => warn!(
                "Attribute probe failed for '{}', skipping promotion/H&R/peer checks",
                candidate.title
            ),
        }
    }

    if let (Some(max_age), Some(published_at)) = (rules.max_age_hours, candidate.published_at) {
        let age_hours = (now - published_at).num_seconds() as f64 / 3600.0;
        if age_hours > max_age {
            debug!(
                "'{}' rejected: published {:.1}h ago, window is {:.1}h",
                candidate.title, age_hours, max_age
            );
            return false;
        }
    }

    true
}

fn fetch_attributes(
    candidate: &Candidate,
    probe: &dyn AttributeProbe,
    cookie: Option<&str>,
    user_agent: Option<&str>,
    use_proxy: bool,
) -> Option<TorrentAttributes> {
    let detail_url = candidate.detail_url.as_deref()?;
    let request = ProbeRequest {
        detail_url,
        cookie,
        user_agent,
        use_proxy,
    };
    match probe.probe(&request) {
        Ok(attrs) => {
            debug!("'{}' attributes: {:?}", candidate.title, attrs);
            Some(attrs)
        }
        Err(e) => {
            debug!("Probe error for {}: {:#}", detail_url, e);
            None
        }
    }
}

fn check_attributes(
    rules: &AdmissionRules,
    candidate: &Candidate,
    attrs: &TorrentAttributes,
) -> bool {
    match rules.free_tier {
        FreeTier::Free if !attrs.free => {
            debug!("'{}' rejected: not a FREE torrent", candidate.title);
            return false;
        }
        FreeTier::DoubleFree if !attrs.double_free => {
            debug!("'{}' rejected: not a 2XFREE torrent", candidate.title);
            return false;
        }
        _ => {}
    }

    if rules.reject_hit_and_run && attrs.hit_and_run {
        debug!("'{}' rejected: flagged hit-and-run", candidate.title);
        return false;
    }

    if let Some(peer_rule) = &rules.peer_count {
        if !peer_rule.admits_count(attrs.peer_count as f64) {
            debug!(
                "'{}' rejected: peer count {} out of bounds",
                candidate.title, attrs.peer_count
            );
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use chrono::Duration;

    struct FixedProbe(TorrentAttributes);

    impl AttributeProbe for FixedProbe {
        fn probe(&self, _request: &ProbeRequest<'_>) -> Result<TorrentAttributes> {
            Ok(self.0.clone())
        }
    }

    struct FailingProbe;

    impl AttributeProbe for FailingProbe {
        fn probe(&self, _request: &ProbeRequest<'_>) -> Result<TorrentAttributes> {
            Err(anyhow!("site unreachable"))
        }
    }

    fn candidate(title: &str, size_gib: f64) -> Candidate {
        Candidate {
            locator: format!("magnet:{title}"),
            title: title.to_string(),
            detail_url: Some("https://tracker.example/details/1".to_string()),
            size: (size_gib * GIB) as u64,
            published_at: Some(Utc::now()),
        }
    }

    fn rules(spec: AdmissionRuleSpec) -> AdmissionRules {
        AdmissionRules::parse(&spec)
    }

    fn eval(rules: &AdmissionRules, candidate: &Candidate, probe: &dyn AttributeProbe) -> bool {
        evaluate_admission(rules, candidate, probe, Some("uid=1"), None, false, Utc::now())
    }

    #[test]
    fn test_empty_rule_set_admits_everything() {
        let r = rules(AdmissionRuleSpec::default());
        assert!(eval(&r, &candidate("anything", 42.0), &FailingProbe));
    }

    #[test]
    fn test_size_bounds() {
        let r = rules(AdmissionRuleSpec {
            size: Some("bw#1,5".to_string()),
            ..Default::default()
        });
        let probe = FixedProbe(TorrentAttributes::default());
        assert!(eval(&r, &candidate("ok", 3.0), &probe));
        assert!(!eval(&r, &candidate("too small", 0.5), &probe));
        assert!(!eval(&r, &candidate("too big", 6.0), &probe));
    }

    #[test]
    fn test_include_exclude_patterns() {
        let r = rules(AdmissionRuleSpec {
            include: Some(r"1080p|2160p".to_string()),
            exclude: Some(r"(?i)sample".to_string()),
            ..Default::default()
        });
        let probe = FixedProbe(TorrentAttributes::default());
        assert!(eval(&r, &candidate("Show.S01E01.1080p.WEB", 1.0), &probe));
        assert!(!eval(&r, &candidate("Show.S01E01.720p.WEB", 1.0), &probe));
        assert!(!eval(&r, &candidate("Show.1080p.SAMPLE", 1.0), &probe));
    }

    #[test]
    fn test_invalid_pattern_applies_no_constraint() {
        let r = rules(AdmissionRuleSpec {
            include: Some("(unclosed".to_string()),
            ..Default::default()
        });
        assert!(r.include.is_none());
        assert!(eval(&r, &candidate("whatever", 1.0), &FixedProbe(TorrentAttributes::default())));
    }

    #[test]
    fn test_free_tier_required() {
        let r = rules(AdmissionRuleSpec {
            free: Some("FREE".to_string()),
            ..Default::default()
        });
        let free = FixedProbe(TorrentAttributes {
            free: true,
            ..Default::default()
        });
        let paid = FixedProbe(TorrentAttributes::default());
        assert!(eval(&r, &candidate("promo", 1.0), &free));
        assert!(!eval(&r, &candidate("full price", 1.0), &paid));
    }

    #[test]
    fn test_double_free_not_satisfied_by_free() {
        let r = rules(AdmissionRuleSpec {
            free: Some("2XFREE".to_string()),
            ..Default::default()
        });
        let free_only = FixedProbe(TorrentAttributes {
            free: true,
            ..Default::default()
        });
        assert!(!eval(&r, &candidate("promo", 1.0), &free_only));
    }

    #[test]
    fn test_hit_and_run_exclusion() {
        let r = rules(AdmissionRuleSpec {
            hit_and_run: true,
            ..Default::default()
        });
        let hr = FixedProbe(TorrentAttributes {
            hit_and_run: true,
            ..Default::default()
        });
        assert!(!eval(&r, &candidate("risky", 1.0), &hr));
        assert!(eval(&r, &candidate("safe", 1.0), &FixedProbe(TorrentAttributes::default())));
    }

    #[test]
    fn test_peer_count_bound() {
        let r = rules(AdmissionRuleSpec {
            peer_count: Some("lt#10".to_string()),
            ..Default::default()
        });
        let few = FixedProbe(TorrentAttributes {
            peer_count: 3,
            ..Default::default()
        });
        let many = FixedProbe(TorrentAttributes {
            peer_count: 10,
            ..Default::default()
        });
        assert!(eval(&r, &candidate("few peers", 1.0), &few));
        assert!(!eval(&r, &candidate("many peers", 1.0), &many));
    }

    #[test]
    fn test_probe_failure_skips_attribute_checks_only() {
        // Probe down: promotion/H&R/peer checks are skipped, but the size
        // rule still applies.
        let r = rules(AdmissionRuleSpec {
            size: Some("lt#2".to_string()),
            free: Some("FREE".to_string()),
            hit_and_run: true,
            ..Default::default()
        });
        assert!(eval(&r, &candidate("small", 1.0), &FailingProbe));
        assert!(!eval(&r, &candidate("large", 3.0), &FailingProbe));
    }

    #[test]
    fn test_freshness_window() {
        let r = rules(AdmissionRuleSpec {
            max_age: Some("lt#24".to_string()),
            ..Default::default()
        });
        let probe = FixedProbe(TorrentAttributes::default());
        let now = Utc::now();

        let mut fresh = candidate("fresh", 1.0);
        fresh.published_at = Some(now - Duration::hours(2));
        let mut stale = candidate("stale", 1.0);
        stale.published_at = Some(now - Duration::hours(48));
        let mut unknown = candidate("unknown age", 1.0);
        unknown.published_at = None;

        let check = |c: &Candidate| evaluate_admission(&r, c, &probe, None, None, false, now);
        assert!(check(&fresh));
        assert!(!check(&stale));
        // No publish time reported: the freshness rule does not apply.
        assert!(check(&unknown));
    }
}
