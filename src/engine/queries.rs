use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::eligibility::{self, now_ms};
use super::store::ScheduleState;
use super::{Engine, EngineError, EntityKind};

/// Names resolve through the current state. A dangling reference cannot
/// survive the deletion cascades, so missing lookups fall back to empty
/// rather than failing the whole listing.
fn event_info(state: &ScheduleState, session: &ClassSession) -> EventInfo {
    let subject_name = state
        .subjects
        .get(&session.subject_id)
        .map(|s| s.name.clone())
        .unwrap_or_default();
    let lecturer_name = state
        .lecturers
        .get(&session.lecturer_id)
        .map(Lecturer::full_name)
        .unwrap_or_default();
    let substitute_name = state
        .substitute_for(&session.id)
        .and_then(|id| state.lecturers.get(&id))
        .map(Lecturer::full_name);
    EventInfo {
        session_id: session.id,
        subject_name,
        lecturer_name,
        start: session.span.start,
        end: session.span.end,
        needs_substitution: session.needs_substitution,
        substitute_name,
    }
}

impl Engine {
    /// Evaluate one lecturer against one session without committing anything.
    ///
    /// An ineligible candidate is not an error here; the report says why.
    pub async fn preview_eligibility(
        &self,
        session_id: Ulid,
        lecturer_id: Ulid,
    ) -> Result<EligibilityReport, EngineError> {
        let state = self.state.read().await;
        let session = state
            .sessions
            .get(&session_id)
            .ok_or(EngineError::NotFound(EntityKind::Session, session_id))?;
        let lecturer = state
            .lecturers
            .get(&lecturer_id)
            .ok_or(EngineError::NotFound(EntityKind::Lecturer, lecturer_id))?;
        let subject = state
            .subjects
            .get(&session.subject_id)
            .ok_or(EngineError::NotFound(EntityKind::Subject, session.subject_id))?;
        Ok(eligibility::evaluate(
            &state,
            lecturer,
            session,
            subject,
            self.config.policy,
            self.config.utc_offset,
        ))
    }

    /// Calendar feed: sessions overlapping `[from, to)`, sorted by start.
    /// The lecturer filter matches sessions where the lecturer is either the
    /// original or the active substitute — a session handed away still shows
    /// on its owner's calendar, with the substitute named.
    pub async fn list_sessions(
        &self,
        from: Ms,
        to: Ms,
        lecturer: Option<Ulid>,
    ) -> Result<Vec<EventInfo>, EngineError> {
        if to <= from {
            return Err(EngineError::Validation("window end must be after start".into()));
        }
        if to - from > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::Validation("query window too wide".into()));
        }
        let state = self.state.read().await;
        let window = Span::new(from, to);
        let mut out: Vec<EventInfo> = state
            .sessions
            .values()
            .filter(|s| s.span.overlaps(&window))
            .filter(|s| match lecturer {
                Some(id) => s.lecturer_id == id || state.substitute_for(&s.id) == Some(id),
                None => true,
            })
            .map(|s| event_info(&state, s))
            .collect();
        out.sort_by_key(|e| (e.start, e.session_id));
        Ok(out)
    }

    /// Sessions flagged as needing a substitute with nobody assigned yet.
    pub async fn open_sessions(&self) -> Vec<EventInfo> {
        let state = self.state.read().await;
        let mut out: Vec<EventInfo> = state
            .sessions
            .values()
            .filter(|s| s.needs_substitution && state.substitute_for(&s.id).is_none())
            .map(|s| event_info(&state, s))
            .collect();
        out.sort_by_key(|e| (e.start, e.session_id));
        out
    }

    /// Evaluate every other lecturer against the session. Eligible candidates
    /// come first, each group ordered by surname.
    pub async fn candidates(&self, session_id: Ulid) -> Result<Vec<CandidateInfo>, EngineError> {
        let state = self.state.read().await;
        let session = state
            .sessions
            .get(&session_id)
            .ok_or(EngineError::NotFound(EntityKind::Session, session_id))?;
        let subject = state
            .subjects
            .get(&session.subject_id)
            .ok_or(EngineError::NotFound(EntityKind::Subject, session.subject_id))?;

        let mut rows: Vec<((String, String), CandidateInfo)> = state
            .lecturers
            .values()
            .filter(|l| l.id != session.lecturer_id)
            .map(|l| {
                let report = eligibility::evaluate(
                    &state,
                    l,
                    session,
                    subject,
                    self.config.policy,
                    self.config.utc_offset,
                );
                let info = CandidateInfo {
                    lecturer_id: l.id,
                    lecturer_name: l.full_name(),
                    report,
                };
                (l.name_key(), info)
            })
            .collect();
        rows.sort_by(|a, b| b.1.report.ok.cmp(&a.1.report.ok).then_with(|| a.0.cmp(&b.0)));
        Ok(rows.into_iter().map(|(_, info)| info).collect())
    }

    /// Weekly totals for one lecturer in the week containing `reference`
    /// (now when absent).
    pub async fn weekly_load_info(
        &self,
        lecturer_id: Ulid,
        reference: Option<Ms>,
    ) -> Result<WeeklyLoadInfo, EngineError> {
        let at = reference.unwrap_or_else(now_ms);
        let state = self.state.read().await;
        if !state.lecturers.contains_key(&lecturer_id) {
            return Err(EngineError::NotFound(EntityKind::Lecturer, lecturer_id));
        }
        let load = eligibility::weekly_load(&state, lecturer_id, at, self.config.utc_offset);
        Ok(WeeklyLoadInfo {
            lecturer_id,
            week: week_bounds(at, self.config.utc_offset),
            substitutions: load.substitutions,
            hours: ms_to_hours(load.real_ms),
        })
    }

    /// Per-lecturer totals over an arbitrary period, the weekly-load rules
    /// generalized to the given window. Sorted by the chosen metric
    /// descending with surname as tiebreak.
    pub async fn weekly_ranking(
        &self,
        period_start: Ms,
        period_end: Ms,
        scope: RankingScope,
        metric: RankingMetric,
    ) -> Result<Vec<RankingEntry>, EngineError> {
        if period_end <= period_start {
            return Err(EngineError::Validation("period end must be after start".into()));
        }
        if period_end - period_start > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::Validation("query window too wide".into()));
        }
        let state = self.state.read().await;
        let window = Span::new(period_start, period_end);

        let mut rows: Vec<((String, String), RankingEntry)> = state
            .lecturers
            .values()
            .map(|l| {
                let (substitutions, taken_ms) = state
                    .substitutions
                    .iter()
                    .filter(|(_, sub)| sub.substitute_id == l.id)
                    .filter_map(|(session_id, _)| state.sessions.get(session_id))
                    .filter(|s| window.contains_instant(s.span.start))
                    .fold((0u32, 0), |(n, ms), s| (n + 1, ms + s.span.duration_ms()));
                let hours_ms = match scope {
                    RankingScope::SubstitutionsOnly => taken_ms,
                    RankingScope::AllRealHours => eligibility::real_intervals(&state, l.id, None)
                        .filter(|s| window.contains_instant(s.span.start))
                        .map(|s| s.span.duration_ms())
                        .sum(),
                };
                let entry = RankingEntry {
                    lecturer_id: l.id,
                    lecturer_name: l.full_name(),
                    substitutions,
                    hours: ms_to_hours(hours_ms),
                };
                (l.name_key(), entry)
            })
            .collect();

        rows.sort_by(|a, b| {
            let by_metric = match metric {
                RankingMetric::Hours => b.1.hours.total_cmp(&a.1.hours),
                RankingMetric::Substitutions => b.1.substitutions.cmp(&a.1.substitutions),
            };
            by_metric.then_with(|| a.0.cmp(&b.0))
        });
        Ok(rows.into_iter().map(|(_, entry)| entry).collect())
    }

    // ── Entity listings ──────────────────────────────────────

    pub async fn list_qualifications(&self) -> Vec<Qualification> {
        let state = self.state.read().await;
        let mut out: Vec<Qualification> = state.qualifications.values().cloned().collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        out
    }

    pub async fn list_subjects(&self) -> Vec<Subject> {
        let state = self.state.read().await;
        let mut out: Vec<Subject> = state.subjects.values().cloned().collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        out
    }

    pub async fn list_lecturers(&self) -> Vec<Lecturer> {
        let state = self.state.read().await;
        let mut out: Vec<Lecturer> = state.lecturers.values().cloned().collect();
        out.sort_by(|a, b| a.name_key().cmp(&b.name_key()).then(a.id.cmp(&b.id)));
        out
    }
}
