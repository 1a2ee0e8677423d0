//! Read-only rollups over the whole store
//!
//! The output shape is consumed structurally by external renderers, so field
//! names are part of the contract. Aggregation is a single streaming pass
//! that checks the cancellation flag between records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::cancel::CancellationFlag;
use crate::error::Result;
use crate::storage::{queries, MemoryFilter, Storage};
use crate::types::{Memory, MemoryScope, MemoryTier, ScopeCounts, TierCounts};

/// Entries kept in each access-pattern list
pub const ACCESS_LIST_LEN: usize = 5;
/// Entries kept in the tag and project rankings
pub const RANKING_LEN: usize = 10;

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub total_memories: i64,
    pub tier_distribution: TierCounts,
    pub scope_distribution: ScopeCounts,
    pub storage_analytics: StorageAnalytics,
    pub access_patterns: AccessPatterns,
    pub trends: Trends,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageAnalytics {
    pub total_bytes: i64,
    pub average_bytes: f64,
    pub core_bytes: i64,
    pub core_capacity_bytes: u64,
    /// core bytes / configured capacity
    pub core_utilization: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPatterns {
    pub most_accessed: Vec<AccessSummary>,
    pub recently_accessed: Vec<AccessSummary>,
    pub average_access_count: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessSummary {
    pub id: String,
    pub preview: String,
    pub tier: MemoryTier,
    pub scope: MemoryScope,
    pub access_count: i64,
    pub accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trends {
    pub created_today: i64,
    pub created_this_week: i64,
    pub top_tags: Vec<TagCount>,
    pub active_projects: Vec<ProjectCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCount {
    pub project_id: String,
    pub count: i64,
}

/// Streaming accumulator behind [`get_analytics`]
#[derive(Debug)]
pub struct AnalyticsAggregator {
    now: DateTime<Utc>,
    start_of_day: DateTime<Utc>,
    week_ago: DateTime<Utc>,
    core_capacity_bytes: u64,
    total: i64,
    tiers: TierCounts,
    scopes: ScopeCounts,
    total_bytes: i64,
    core_bytes: i64,
    access_sum: i64,
    most_accessed: Vec<AccessSummary>,
    recently_accessed: Vec<AccessSummary>,
    created_today: i64,
    created_this_week: i64,
    // tag -> (count, first-seen position)
    tags: HashMap<String, (i64, usize)>,
    projects: HashMap<String, i64>,
}

impl AnalyticsAggregator {
    pub fn new(now: DateTime<Utc>, core_capacity_bytes: u64) -> Self {
        let start_of_day = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        Self {
            now,
            start_of_day,
            week_ago: now - Duration::days(7),
            core_capacity_bytes,
            total: 0,
            tiers: TierCounts::default(),
            scopes: ScopeCounts::default(),
            total_bytes: 0,
            core_bytes: 0,
            access_sum: 0,
            most_accessed: Vec::with_capacity(ACCESS_LIST_LEN + 1),
            recently_accessed: Vec::with_capacity(ACCESS_LIST_LEN + 1),
            created_today: 0,
            created_this_week: 0,
            tags: HashMap::new(),
            projects: HashMap::new(),
        }
    }

    pub fn add(&mut self, memory: &Memory) {
        self.total += 1;
        self.tiers.add(memory.tier, 1);
        self.scopes.add(memory.scope, 1);

        let size = memory.content_size as i64;
        self.total_bytes += size;
        if memory.tier == MemoryTier::Core {
            self.core_bytes += size;
        }
        self.access_sum += memory.access_count;

        if memory.created_at >= self.start_of_day && memory.created_at <= self.now {
            self.created_today += 1;
        }
        if memory.created_at >= self.week_ago && memory.created_at <= self.now {
            self.created_this_week += 1;
        }

        for tag in &memory.tags {
            let seen = self.tags.len();
            self.tags.entry(tag.clone()).or_insert((0, seen)).0 += 1;
        }
        if let Some(ref project_id) = memory.project_id {
            *self.projects.entry(project_id.clone()).or_insert(0) += 1;
        }

        let summary = AccessSummary {
            id: memory.id.clone(),
            preview: memory.preview(PREVIEW_CHARS),
            tier: memory.tier,
            scope: memory.scope,
            access_count: memory.access_count,
            accessed_at: memory.accessed_at,
        };
        keep_top(&mut self.most_accessed, summary.clone(), |a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| b.accessed_at.cmp(&a.accessed_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        keep_top(&mut self.recently_accessed, summary, |a, b| {
            b.accessed_at.cmp(&a.accessed_at).then_with(|| a.id.cmp(&b.id))
        });
    }

    pub fn finish(self) -> Analytics {
        let average = |sum: i64| {
            if self.total > 0 {
                sum as f64 / self.total as f64
            } else {
                0.0
            }
        };

        let mut top_tags: Vec<(String, (i64, usize))> = self.tags.into_iter().collect();
        top_tags.sort_by(|(_, (ca, sa)), (_, (cb, sb))| cb.cmp(ca).then_with(|| sa.cmp(sb)));
        let top_tags = top_tags
            .into_iter()
            .take(RANKING_LEN)
            .map(|(tag, (count, _))| TagCount { tag, count })
            .collect();

        let mut active_projects: Vec<(String, i64)> = self.projects.into_iter().collect();
        active_projects.sort_by(|(pa, ca), (pb, cb)| cb.cmp(ca).then_with(|| pa.cmp(pb)));
        let active_projects = active_projects
            .into_iter()
            .take(RANKING_LEN)
            .map(|(project_id, count)| ProjectCount { project_id, count })
            .collect();

        Analytics {
            total_memories: self.total,
            tier_distribution: self.tiers,
            scope_distribution: self.scopes,
            storage_analytics: StorageAnalytics {
                total_bytes: self.total_bytes,
                average_bytes: average(self.total_bytes),
                core_bytes: self.core_bytes,
                core_capacity_bytes: self.core_capacity_bytes,
                core_utilization: self.core_bytes as f64 / self.core_capacity_bytes.max(1) as f64,
            },
            access_patterns: AccessPatterns {
                average_access_count: average(self.access_sum),
                most_accessed: self.most_accessed,
                recently_accessed: self.recently_accessed,
            },
            trends: Trends {
                created_today: self.created_today,
                created_this_week: self.created_this_week,
                top_tags,
                active_projects,
            },
            generated_at: self.now,
        }
    }
}

/// Insert into a sorted list bounded at [`ACCESS_LIST_LEN`]
fn keep_top<F>(list: &mut Vec<AccessSummary>, item: AccessSummary, cmp: F)
where
    F: Fn(&AccessSummary, &AccessSummary) -> std::cmp::Ordering,
{
    let pos = list
        .iter()
        .position(|existing| cmp(&item, existing).is_lt())
        .unwrap_or(list.len());
    if pos < ACCESS_LIST_LEN {
        list.insert(pos, item);
        list.truncate(ACCESS_LIST_LEN);
    }
}

/// Aggregate the whole store, stopping early once `cancel` is raised
pub fn get_analytics(storage: &Storage, cancel: &CancellationFlag) -> Result<Analytics> {
    let mut aggregator =
        AnalyticsAggregator::new(Utc::now(), storage.config().core_capacity_bytes);

    storage.with_reader(|conn| {
        queries::for_each_memory(conn, &MemoryFilter::default(), |memory| {
            cancel.check()?;
            aggregator.add(&memory);
            Ok(())
        })
    })?;

    let analytics = aggregator.finish();
    tracing::debug!(total = analytics.total_memories, "analytics aggregated");
    Ok(analytics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn memory(id: &str, tier: MemoryTier, size: usize, access_count: i64) -> Memory {
        let now = Utc::now();
        Memory {
            id: id.to_string(),
            content: "x".repeat(size),
            tier,
            scope: MemoryScope::Global,
            project_id: None,
            tags: vec![],
            metadata: HashMap::new(),
            content_size: size,
            content_hash: String::new(),
            created_at: now,
            accessed_at: now,
            access_count,
        }
    }

    #[test]
    fn test_empty_store() {
        let analytics = AnalyticsAggregator::new(Utc::now(), 1024).finish();
        assert_eq!(analytics.total_memories, 0);
        assert_eq!(analytics.storage_analytics.average_bytes, 0.0);
        assert_eq!(analytics.access_patterns.average_access_count, 0.0);
        assert!(analytics.trends.top_tags.is_empty());
    }

    #[test]
    fn test_core_utilization_uses_configured_capacity() {
        let mut agg = AnalyticsAggregator::new(Utc::now(), 4096);
        agg.add(&memory("a", MemoryTier::Core, 1024, 0));
        agg.add(&memory("b", MemoryTier::Core, 1024, 0));
        agg.add(&memory("c", MemoryTier::Longterm, 8000, 0));
        let analytics = agg.finish();

        assert_eq!(analytics.storage_analytics.core_bytes, 2048);
        assert_eq!(analytics.storage_analytics.core_utilization, 0.5);
        assert_eq!(analytics.storage_analytics.total_bytes, 10048);
        assert_eq!(analytics.tier_distribution.core, 2);
        assert_eq!(analytics.tier_distribution.longterm, 1);
    }

    #[test]
    fn test_most_accessed_is_sorted_and_bounded() {
        let mut agg = AnalyticsAggregator::new(Utc::now(), 1024);
        for i in 0..8 {
            agg.add(&memory(&format!("m{}", i), MemoryTier::Longterm, 10, i));
        }
        let analytics = agg.finish();
        let counts: Vec<i64> = analytics
            .access_patterns
            .most_accessed
            .iter()
            .map(|s| s.access_count)
            .collect();
        assert_eq!(counts, vec![7, 6, 5, 4, 3]);
        assert_eq!(analytics.access_patterns.average_access_count, 3.5);
    }

    #[test]
    fn test_recently_accessed_order() {
        let now = Utc::now();
        let mut agg = AnalyticsAggregator::new(now, 1024);
        let mut old = memory("old", MemoryTier::Core, 1, 0);
        old.accessed_at = now - Duration::days(3);
        let fresh = memory("fresh", MemoryTier::Core, 1, 0);
        agg.add(&old);
        agg.add(&fresh);
        let ids: Vec<String> = agg
            .finish()
            .access_patterns
            .recently_accessed
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["fresh", "old"]);
    }

    #[test]
    fn test_tag_ties_keep_first_seen_order() {
        let mut agg = AnalyticsAggregator::new(Utc::now(), 1024);
        let mut a = memory("a", MemoryTier::Core, 1, 0);
        a.tags = vec!["zeta".into(), "alpha".into()];
        let mut b = memory("b", MemoryTier::Core, 1, 0);
        b.tags = vec!["alpha".into(), "zeta".into(), "mid".into()];
        let mut c = memory("c", MemoryTier::Core, 1, 0);
        c.tags = vec!["mid".into(), "mid2".into()];
        agg.add(&a);
        agg.add(&b);
        agg.add(&c);

        let tags: Vec<(String, i64)> = agg
            .finish()
            .trends
            .top_tags
            .into_iter()
            .map(|t| (t.tag, t.count))
            .collect();
        assert_eq!(
            tags,
            vec![
                ("zeta".to_string(), 2),
                ("alpha".to_string(), 2),
                ("mid".to_string(), 2),
                ("mid2".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_created_trends_relative_to_aggregation_time() {
        let now = Utc::now();
        let mut agg = AnalyticsAggregator::new(now, 1024);
        let today = memory("t", MemoryTier::Core, 1, 0);
        let mut last_week = memory("w", MemoryTier::Core, 1, 0);
        last_week.created_at = now - Duration::days(3);
        let mut ancient = memory("o", MemoryTier::Core, 1, 0);
        ancient.created_at = now - Duration::days(30);
        for m in [&today, &last_week, &ancient] {
            agg.add(m);
        }
        let trends = agg.finish().trends;
        assert_eq!(trends.created_today, 1);
        assert_eq!(trends.created_this_week, 2);
    }

    #[test]
    fn test_active_projects_ranked_by_count() {
        let mut agg = AnalyticsAggregator::new(Utc::now(), 1024);
        for (id, project) in [("1", "b"), ("2", "a"), ("3", "a"), ("4", "c")] {
            let mut m = memory(id, MemoryTier::Longterm, 1, 0);
            m.scope = MemoryScope::Project;
            m.project_id = Some(project.to_string());
            agg.add(&m);
        }
        let projects: Vec<String> = agg
            .finish()
            .trends
            .active_projects
            .into_iter()
            .map(|p| p.project_id)
            .collect();
        assert_eq!(projects, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_output_field_names() {
        let json = serde_json::to_value(AnalyticsAggregator::new(Utc::now(), 1).finish()).unwrap();
        for key in [
            "totalMemories",
            "tierDistribution",
            "scopeDistribution",
            "storageAnalytics",
            "accessPatterns",
            "trends",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert!(json["storageAnalytics"].get("coreUtilization").is_some());
        assert!(json["trends"].get("topTags").is_some());
    }

    #[test]
    fn test_raised_flag_on_empty_store_completes() {
        let storage = Storage::open_in_memory().unwrap();
        let flag = CancellationFlag::new();
        flag.cancel();
        // An empty store has no rows to interrupt
        assert!(get_analytics(&storage, &flag).is_ok());
    }
}
