use super::job::Job;
use super::site::{normalize_domain, SiteIdentity};

/// 現在のジョブと直近ジョブ一覧を保持するストア（I/O なし）
///
/// current は Refresh Coordinator からのみ書き換えられる。
#[derive(Debug, Default)]
pub struct JobSnapshotStore {
    current: Option<Job>,
    recent: Vec<Job>,
}

impl JobSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Job> {
        self.current.as_ref()
    }

    /// このサイトに属する直近ジョブ（新しい順）
    pub fn recent_jobs(&self) -> &[Job] {
        &self.recent
    }

    /// ジョブ一覧を丸ごと置き換え、サイトに一致する最新ジョブを current にする
    ///
    /// 全件に created_at があれば新しい順に安定ソートし、無いものが混じる場合は
    /// サーバー順（新しい順が前提）をそのまま使う。
    pub fn replace(&mut self, jobs: Vec<Job>, site: &SiteIdentity) -> Option<&Job> {
        let recent = select_site_jobs(jobs, site);
        self.current = recent.first().cloned();
        self.recent = recent;
        self.current.as_ref()
    }

    /// 作成直後のジョブを current にする（一覧の先頭にも差し込む）
    pub fn adopt(&mut self, job: Job) {
        self.recent.retain(|j| j.id != job.id);
        self.recent.insert(0, job.clone());
        self.current = Some(job);
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.recent.clear();
    }
}

fn select_site_jobs(mut jobs: Vec<Job>, site: &SiteIdentity) -> Vec<Job> {
    if jobs.iter().all(|j| j.created_at.is_some()) {
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
    let candidates = site.candidates();
    jobs.into_iter()
        .filter(|job| {
            candidates.is_empty()
                || candidates.contains(&normalize_domain(job.domain_name()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobStatus;

    fn job(id: &str, domain: &str, created_at: Option<&str>) -> Job {
        let mut j = Job::new(id, JobStatus::Running, domain);
        j.created_at = created_at.map(|s| s.parse().unwrap());
        j
    }

    #[test]
    fn test_picks_first_matching_job() {
        let mut store = JobSnapshotStore::new();
        let site = SiteIdentity::new("a.com");
        let jobs = vec![job("j0", "b.com", None), job("j1", "a.com", None), job("j2", "a.com", None)];
        let picked = store.replace(jobs, &site).unwrap();
        assert_eq!(picked.id, "j1");
        assert_eq!(store.recent_jobs().len(), 2);
    }

    #[test]
    fn test_empty_candidate_set_accepts_any() {
        let mut store = JobSnapshotStore::new();
        let jobs = vec![job("j0", "b.com", None), job("j1", "a.com", None)];
        assert_eq!(store.replace(jobs, &SiteIdentity::default()).unwrap().id, "j0");
    }

    #[test]
    fn test_no_match_clears_current() {
        let mut store = JobSnapshotStore::new();
        let site = SiteIdentity::new("a.com");
        store.replace(vec![job("j1", "a.com", None)], &site);
        assert!(store.replace(vec![job("j9", "z.com", None)], &site).is_none());
        assert!(store.current().is_none());
        assert!(store.recent_jobs().is_empty());
    }

    #[test]
    fn test_selection_is_deterministic() {
        let site = SiteIdentity::new("a.com").with_candidates(["a.webflow.io"]);
        let jobs = vec![
            job("j1", "a.webflow.io", Some("2025-01-15T10:00:00Z")),
            job("j2", "a.com", Some("2025-01-15T11:00:00Z")),
            job("j3", "b.com", Some("2025-01-15T12:00:00Z")),
        ];
        let mut first = JobSnapshotStore::new();
        let mut second = JobSnapshotStore::new();
        let a = first.replace(jobs.clone(), &site).map(|j| j.id.clone());
        let b = second.replace(jobs, &site).map(|j| j.id.clone());
        assert_eq!(a, b);
        assert_eq!(a.as_deref(), Some("j2"));
    }

    #[test]
    fn test_partial_timestamps_keep_server_order() {
        let mut store = JobSnapshotStore::new();
        let jobs = vec![
            job("old", "a.com", Some("2025-01-01T00:00:00Z")),
            job("new", "a.com", None),
        ];
        let picked = store.replace(jobs, &SiteIdentity::new("a.com")).unwrap();
        assert_eq!(picked.id, "old");
    }

    #[test]
    fn test_adopt_moves_job_to_front() {
        let mut store = JobSnapshotStore::new();
        let site = SiteIdentity::new("a.com");
        store.replace(vec![job("j1", "a.com", None)], &site);
        store.adopt(job("j2", "a.com", None));
        assert_eq!(store.current().unwrap().id, "j2");
        let ids: Vec<_> = store.recent_jobs().iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["j2", "j1"]);
    }
}
