use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;
pub const WEEK_MS: Ms = 7 * DAY_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Week window containing `t`: local Monday 00:00 through the following
/// Monday 00:00, end-exclusive. Always exactly seven days long.
///
/// Window membership everywhere in this crate is keyed on a session's
/// `span.start`, via `contains_instant`.
pub fn week_bounds(t: Ms, utc_offset: FixedOffset) -> Span {
    let offset_ms = utc_offset.local_minus_utc() as Ms * 1000;
    // Construction only fails for timestamps outside chrono's representable
    // range (several hundred millennia); clamp those to the epoch week.
    let utc = DateTime::from_timestamp_millis(t).unwrap_or_default();
    let local = utc.naive_utc() + Duration::milliseconds(offset_ms);
    let days_back = local.weekday().num_days_from_monday() as i64;
    let monday = (local - Duration::days(days_back)).date().and_time(NaiveTime::MIN);
    let start = monday.and_utc().timestamp_millis() - offset_ms;
    Span { start, end: start + WEEK_MS }
}

/// Fractional hours for reports and wire responses. Internal arithmetic stays
/// in integer milliseconds.
pub fn ms_to_hours(ms: Ms) -> f64 {
    ms as f64 / HOUR_MS as f64
}

/// Hour limits enter as fractional hours and are fixed to milliseconds once,
/// here, so repeated weekly aggregation never accumulates float error.
pub fn hours_to_ms(hours: f64) -> Ms {
    (hours * HOUR_MS as f64).round() as Ms
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualification {
    pub id: Ulid,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Ulid,
    pub code: String,
    pub name: String,
    pub required_qualifications: BTreeSet<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lecturer {
    pub id: Ulid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Qualifications held.
    pub qualifications: BTreeSet<Ulid>,
    /// Subjects this lecturer is directly authorized to teach.
    pub subjects: BTreeSet<Ulid>,
    /// Weekly cap on substitutions taken; 0 means unlimited.
    pub max_substitutions_per_week: u32,
    /// Weekly cap on real teaching time in ms; 0 means unlimited.
    pub max_week_ms: Ms,
}

impl Lecturer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Listing order: surname first, case-insensitive.
    pub fn name_key(&self) -> (String, String) {
        (self.last_name.to_lowercase(), self.first_name.to_lowercase())
    }
}

/// Client-supplied lecturer fields, shared by create and update. The hour
/// limit crosses the boundary as fractional hours and is stored as ms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LecturerDraft {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub qualifications: BTreeSet<Ulid>,
    #[serde(default)]
    pub subjects: BTreeSet<Ulid>,
    #[serde(default)]
    pub max_substitutions_per_week: u32,
    #[serde(default)]
    pub max_hours_per_week: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSession {
    pub id: Ulid,
    pub subject_id: Ulid,
    /// The originally assigned lecturer.
    pub lecturer_id: Ulid,
    pub span: Span,
    /// Advisory flag: the session is looking for a substitute. Assignment
    /// itself does not require it.
    pub needs_substitution: bool,
}

/// One substitute per session; the store keys these by session id, which is
/// what enforces the at-most-one invariant. Clearing deletes the record —
/// a substitute id is never null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub substitute_id: Ulid,
    pub created_at: Ms,
}

/// How lecturer-to-subject authorization is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationPolicy {
    /// The subject is in the lecturer's direct teaching set. Canonical.
    DirectMembership,
    /// The subject's required qualifications are a subset of the lecturer's
    /// held set, vacuously true when nothing is required. Legacy model.
    QualificationSubsumption,
}

/// Commit target for one session: assign a specific substitute, or clear the
/// existing one. The wire layer maps a null or empty lecturer id to `Clear`;
/// the engine never sees a null sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentTarget {
    Assign(Ulid),
    Clear,
}

/// The event types — flat, no nesting. This is the WAL record format.
///
/// Deletions cascade deterministically when applied: a subject takes its
/// sessions and their substitutions with it, a lecturer additionally takes
/// the substitution records naming them as substitute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    QualificationCreated {
        id: Ulid,
        code: String,
        name: String,
    },
    QualificationUpdated {
        id: Ulid,
        code: String,
        name: String,
    },
    QualificationDeleted {
        id: Ulid,
    },
    SubjectCreated {
        id: Ulid,
        code: String,
        name: String,
        required_qualifications: BTreeSet<Ulid>,
    },
    SubjectUpdated {
        id: Ulid,
        code: String,
        name: String,
        required_qualifications: BTreeSet<Ulid>,
    },
    SubjectDeleted {
        id: Ulid,
    },
    LecturerCreated {
        id: Ulid,
        first_name: String,
        last_name: String,
        email: String,
        qualifications: BTreeSet<Ulid>,
        subjects: BTreeSet<Ulid>,
        max_substitutions_per_week: u32,
        max_week_ms: Ms,
    },
    LecturerUpdated {
        id: Ulid,
        first_name: String,
        last_name: String,
        email: String,
        qualifications: BTreeSet<Ulid>,
        subjects: BTreeSet<Ulid>,
        max_substitutions_per_week: u32,
        max_week_ms: Ms,
    },
    LecturerDeleted {
        id: Ulid,
    },
    SessionScheduled {
        id: Ulid,
        subject_id: Ulid,
        lecturer_id: Ulid,
        span: Span,
        needs_substitution: bool,
    },
    SessionCancelled {
        id: Ulid,
    },
    NeedsSubstitutionSet {
        id: Ulid,
        needs_substitution: bool,
    },
    SubstitutionAssigned {
        session_id: Ulid,
        substitute_id: Ulid,
        at: Ms,
    },
    SubstitutionCleared {
        session_id: Ulid,
    },
}

// ── Reports and query result types ───────────────────────────────

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotAuthorized,
    TimeCollision,
    SubstitutionLimitExceeded,
    HoursLimitExceeded,
}

/// Full diagnostic breakdown of one lecturer/session evaluation. Every
/// intermediate value is part of the caller contract, not just `ok`: callers
/// must be able to explain a rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityReport {
    pub session_id: Ulid,
    pub lecturer_id: Ulid,
    pub authorized: bool,
    pub free: bool,
    pub substitutions_now: u32,
    pub substitutions_after: u32,
    /// 0 means unlimited.
    pub substitution_limit: u32,
    pub substitutions_ok: bool,
    pub this_hours: f64,
    pub hours_now: f64,
    pub hours_after: f64,
    /// 0 means unlimited.
    pub hours_limit: f64,
    pub hours_ok: bool,
    pub ok: bool,
    pub reasons: Vec<RejectReason>,
}

/// Weekly totals carried in milliseconds between aggregation and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyLoad {
    pub substitutions: u32,
    pub real_ms: Ms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyLoadInfo {
    pub lecturer_id: Ulid,
    pub week: Span,
    pub substitutions: u32,
    pub hours: f64,
}

/// One calendar row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    pub session_id: Ulid,
    pub subject_name: String,
    pub lecturer_name: String,
    pub start: Ms,
    pub end: Ms,
    pub needs_substitution: bool,
    pub substitute_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateInfo {
    pub lecturer_id: Ulid,
    pub lecturer_name: String,
    pub report: EligibilityReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingScope {
    /// Count and sum only sessions taken as substitute.
    SubstitutionsOnly,
    /// Sum all real workload hours; substitution count alongside.
    AllRealHours,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMetric {
    Hours,
    Substitutions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub lecturer_id: Ulid,
    pub lecturer_name: String,
    pub substitutions: u32,
    pub hours: f64,
}
