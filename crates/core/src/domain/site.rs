use serde::{Deserialize, Serialize};

use super::types::{DomainStage, SiteInfo};

/// ドメイン文字列を正規化する（scheme / www. / パスを除去して小文字化）
pub fn normalize_domain(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    let without_scheme = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    let trimmed = without_scheme
        .strip_prefix("www.")
        .unwrap_or(without_scheme);

    match trimmed.split('/').next() {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => trimmed.to_string(),
    }
}

/// 「このサイト」の識別情報
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteIdentity {
    /// 正規化済みの優先ドメイン
    pub domain: Option<String>,
    pub name: Option<String>,
    /// ステージング/本番などの別名ドメイン（未正規化のまま保持）
    pub domain_candidates: Vec<String>,
}

impl SiteIdentity {
    pub fn new(domain: &str) -> Self {
        let normalized = normalize_domain(domain);
        Self {
            domain: (!normalized.is_empty()).then_some(normalized),
            name: None,
            domain_candidates: Vec::new(),
        }
    }

    pub fn with_candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain_candidates = candidates.into_iter().map(Into::into).collect();
        self
    }

    /// Designer のサイト情報から識別情報を組み立てる
    ///
    /// 優先ドメインは default → production → staging → 先頭候補 → short name の順。
    pub fn from_site_info(info: &SiteInfo) -> Self {
        let staged: Vec<_> = info
            .domains
            .iter()
            .filter(|d| matches!(d.stage, DomainStage::Staging | DomainStage::Production))
            .collect();

        let preferred = staged
            .iter()
            .find(|d| d.default)
            .or_else(|| staged.iter().find(|d| d.stage == DomainStage::Production))
            .or_else(|| staged.iter().find(|d| d.stage == DomainStage::Staging))
            .or_else(|| staged.first())
            .map(|d| d.url.as_str())
            .unwrap_or(info.short_name.as_str());

        let domain = normalize_domain(preferred);
        Self {
            domain: (!domain.is_empty()).then_some(domain),
            name: Some(info.site_name.clone()),
            domain_candidates: staged.iter().map(|d| d.url.clone()).collect(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.domain.is_some()
    }

    /// 正規化・重複排除済みの候補集合（優先ドメインを含む、挿入順）
    pub fn candidates(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let normalized = self
            .domain_candidates
            .iter()
            .map(|c| normalize_domain(c))
            .chain(self.domain.clone());
        for candidate in normalized {
            if !candidate.is_empty() && !out.contains(&candidate) {
                out.push(candidate);
            }
        }
        out
    }

    /// ジョブのドメインがこのサイトに属するか（候補が空なら全て一致）
    pub fn matches(&self, job_domain: &str) -> bool {
        let candidates = self.candidates();
        candidates.is_empty() || candidates.contains(&normalize_domain(job_domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SiteDomain;

    fn domain(url: &str, stage: DomainStage, default: bool) -> SiteDomain {
        SiteDomain {
            url: url.to_string(),
            last_published: None,
            default,
            stage,
        }
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain(" HTTPS://www.Example.com/path/x "), "example.com");
        assert_eq!(normalize_domain("http://a.com"), "a.com");
        assert_eq!(normalize_domain("shop.a.com/"), "shop.a.com");
        assert_eq!(normalize_domain("   "), "");
    }

    #[test]
    fn test_candidates_are_normalized_and_deduplicated() {
        let site = SiteIdentity::new("a.com")
            .with_candidates(["https://www.a.com", "a.webflow.io", "A.COM/"]);
        assert_eq!(site.candidates(), vec!["a.com", "a.webflow.io"]);
    }

    #[test]
    fn test_empty_candidates_match_everything() {
        let site = SiteIdentity::default();
        assert!(site.matches("anything.com"));
        assert!(site.matches(""));
    }

    #[test]
    fn test_non_empty_candidates_filter() {
        let site = SiteIdentity::new("a.com").with_candidates(["a.webflow.io"]);
        assert!(site.matches("https://a.webflow.io/"));
        assert!(site.matches("www.a.com"));
        assert!(!site.matches("b.com"));
    }

    #[test]
    fn test_from_site_info_prefers_default_domain() {
        let info = SiteInfo {
            site_id: "s1".into(),
            site_name: "Acme".into(),
            short_name: "acme".into(),
            domains: vec![
                domain("https://acme.webflow.io", DomainStage::Staging, false),
                domain("https://www.acme.com", DomainStage::Production, true),
            ],
        };
        let site = SiteIdentity::from_site_info(&info);
        assert_eq!(site.domain.as_deref(), Some("acme.com"));
        assert_eq!(site.name.as_deref(), Some("Acme"));
        assert_eq!(site.candidates(), vec!["acme.webflow.io", "acme.com"]);
    }

    #[test]
    fn test_from_site_info_without_domains_uses_short_name() {
        let info = SiteInfo {
            site_id: "s1".into(),
            site_name: "Acme".into(),
            short_name: "Acme-Site".into(),
            domains: vec![],
        };
        let site = SiteIdentity::from_site_info(&info);
        assert_eq!(site.domain.as_deref(), Some("acme-site"));
        assert!(site.domain_candidates.is_empty());
    }

    #[test]
    fn test_from_site_info_falls_back_to_production_then_staging() {
        let info = SiteInfo {
            site_id: "s1".into(),
            site_name: "Acme".into(),
            short_name: "acme".into(),
            domains: vec![
                domain("https://acme.webflow.io", DomainStage::Staging, false),
                domain("https://acme.com", DomainStage::Production, false),
            ],
        };
        assert_eq!(
            SiteIdentity::from_site_info(&info).domain.as_deref(),
            Some("acme.com")
        );
    }
}
