//! Metrics definitions for the synchronization engine.

use shared::metrics_defs::{MetricDef, MetricType};

pub const FLAG_SYNC_FAILURES: MetricDef = MetricDef {
    name: "flag_sync.failures",
    metric_type: MetricType::Counter,
    description: "Flag sync iterations that failed and were retried on the next tick",
};

pub const COHORT_SYNC_FAILURES: MetricDef = MetricDef {
    name: "cohort_sync.failures",
    metric_type: MetricType::Counter,
    description: "Cohort sync iterations that failed and were retried on the next tick",
};

pub const RECONCILE_FAILURES: MetricDef = MetricDef {
    name: "reconcile.failures",
    metric_type: MetricType::Counter,
    description: "Deployment reconciliation cycles that were abandoned",
};

pub const COHORT_DOWNLOADS: MetricDef = MetricDef {
    name: "cohort.downloads",
    metric_type: MetricType::Counter,
    description: "Cohort member downloads started",
};

pub const COHORT_MEMBERS_ADDED: MetricDef = MetricDef {
    name: "cohort.members.added",
    metric_type: MetricType::Counter,
    description: "Members added relative to the superseded cohort version",
};

pub const COHORT_MEMBERS_REMOVED: MetricDef = MetricDef {
    name: "cohort.members.removed",
    metric_type: MetricType::Counter,
    description: "Members removed relative to the superseded cohort version",
};

pub const EVENTS_TRACKED: MetricDef = MetricDef {
    name: "dedup.tracked",
    metric_type: MetricType::Counter,
    description: "Evaluation events handed to the analytics client",
};

pub const EVENTS_SUPPRESSED: MetricDef = MetricDef {
    name: "dedup.suppressed",
    metric_type: MetricType::Counter,
    description: "Evaluation events suppressed as duplicates",
};

pub const ALL_METRICS: &[MetricDef] = &[
    FLAG_SYNC_FAILURES,
    COHORT_SYNC_FAILURES,
    RECONCILE_FAILURES,
    COHORT_DOWNLOADS,
    COHORT_MEMBERS_ADDED,
    COHORT_MEMBERS_REMOVED,
    EVENTS_TRACKED,
    EVENTS_SUPPRESSED,
];
