use chrono::FixedOffset;
use ulid::Ulid;

use crate::model::*;

use super::store::ScheduleState;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Is the lecturer allowed to teach the subject under `policy`?
pub(crate) fn is_authorized(
    lecturer: &Lecturer,
    subject: &Subject,
    policy: AuthorizationPolicy,
) -> bool {
    match policy {
        AuthorizationPolicy::DirectMembership => lecturer.subjects.contains(&subject.id),
        AuthorizationPolicy::QualificationSubsumption => subject
            .required_qualifications
            .is_subset(&lecturer.qualifications),
    }
}

/// The lecturer's real workload: own sessions not covered by a substitution,
/// plus sessions they cover as substitute. A substituted-away session belongs
/// to its substitute, not to the original lecturer.
///
/// `exclude_session` drops one session from the scan, used when evaluating a
/// session against its own lecturer's calendar.
pub(crate) fn real_intervals(
    state: &ScheduleState,
    lecturer_id: Ulid,
    exclude_session: Option<Ulid>,
) -> impl Iterator<Item = &ClassSession> {
    state.sessions.values().filter(move |s| {
        if Some(s.id) == exclude_session {
            return false;
        }
        match state.substitute_for(&s.id) {
            Some(substitute_id) => substitute_id == lecturer_id,
            None => s.lecturer_id == lecturer_id,
        }
    })
}

/// False iff any real interval overlaps the candidate span.
pub(crate) fn is_free(
    state: &ScheduleState,
    lecturer_id: Ulid,
    candidate: &Span,
    exclude_session: Option<Ulid>,
) -> bool {
    real_intervals(state, lecturer_id, exclude_session).all(|s| !s.span.overlaps(candidate))
}

/// Substitutions taken and real teaching time in the week containing
/// `reference`. Window membership is keyed on session start.
pub(crate) fn weekly_load(
    state: &ScheduleState,
    lecturer_id: Ulid,
    reference: Ms,
    utc_offset: FixedOffset,
) -> WeeklyLoad {
    let week = week_bounds(reference, utc_offset);
    let substitutions = state
        .substitutions
        .iter()
        .filter(|(session_id, sub)| {
            sub.substitute_id == lecturer_id
                && state
                    .sessions
                    .get(session_id)
                    .is_some_and(|s| week.contains_instant(s.span.start))
        })
        .count() as u32;
    let real_ms = real_intervals(state, lecturer_id, None)
        .filter(|s| week.contains_instant(s.span.start))
        .map(|s| s.span.duration_ms())
        .sum();
    WeeklyLoad {
        substitutions,
        real_ms,
    }
}

/// The full eligibility check. Order: authorization, availability, then the
/// weekly limits with this session projected in. Read-only and idempotent;
/// both preview and commit call exactly this.
pub(crate) fn evaluate(
    state: &ScheduleState,
    lecturer: &Lecturer,
    session: &ClassSession,
    subject: &Subject,
    policy: AuthorizationPolicy,
    utc_offset: FixedOffset,
) -> EligibilityReport {
    let authorized = is_authorized(lecturer, subject, policy);
    let free = is_free(state, lecturer.id, &session.span, Some(session.id));

    let load = weekly_load(state, lecturer.id, session.span.start, utc_offset);
    let substitutions_after = load.substitutions + 1;
    let this_ms = session.span.duration_ms();
    let ms_after = load.real_ms + this_ms;

    // A limit of 0 is the unlimited sentinel, not zero capacity.
    let substitution_limit = lecturer.max_substitutions_per_week;
    let substitutions_ok = substitution_limit == 0 || substitutions_after <= substitution_limit;
    let hours_ok = lecturer.max_week_ms == 0 || ms_after <= lecturer.max_week_ms;

    let mut reasons = Vec::new();
    if !authorized {
        reasons.push(RejectReason::NotAuthorized);
    }
    if !free {
        reasons.push(RejectReason::TimeCollision);
    }
    if !substitutions_ok {
        reasons.push(RejectReason::SubstitutionLimitExceeded);
    }
    if !hours_ok {
        reasons.push(RejectReason::HoursLimitExceeded);
    }

    EligibilityReport {
        session_id: session.id,
        lecturer_id: lecturer.id,
        authorized,
        free,
        substitutions_now: load.substitutions,
        substitutions_after,
        substitution_limit,
        substitutions_ok,
        this_hours: ms_to_hours(this_ms),
        hours_now: ms_to_hours(load.real_ms),
        hours_after: ms_to_hours(ms_after),
        hours_limit: ms_to_hours(lecturer.max_week_ms),
        hours_ok,
        ok: authorized && free && substitutions_ok && hours_ok,
        reasons,
    }
}
