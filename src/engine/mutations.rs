use std::collections::BTreeSet;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::eligibility::{self, now_ms};
use super::store::ScheduleState;
use super::{Engine, EngineError, EntityKind};

fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::Validation("session end must be after start".into()));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::Validation("timestamp out of range".into()));
    }
    if span.duration_ms() > MAX_SESSION_DURATION_MS {
        return Err(EngineError::Validation("session longer than a day".into()));
    }
    Ok(())
}

fn validate_code(code: &str) -> Result<(), EngineError> {
    if code.trim().is_empty() {
        return Err(EngineError::Validation("code must not be empty".into()));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(EngineError::Validation("code too long".into()));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("name must not be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::Validation("name too long".into()));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), EngineError> {
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::Validation("email too long".into()));
    }
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(EngineError::Validation("malformed email".into()));
    }
    Ok(())
}

fn validate_lecturer_draft(draft: &LecturerDraft) -> Result<(), EngineError> {
    validate_name(&draft.first_name)?;
    validate_name(&draft.last_name)?;
    validate_email(&draft.email)?;
    if draft.max_substitutions_per_week > MAX_WEEK_SUBSTITUTIONS {
        return Err(EngineError::Validation("weekly substitution limit out of range".into()));
    }
    // A NaN limit fails the range test too.
    if !(0.0..=MAX_WEEK_HOURS).contains(&draft.max_hours_per_week) {
        return Err(EngineError::Validation("weekly hour limit out of range".into()));
    }
    Ok(())
}

fn check_qualifications_exist(
    state: &ScheduleState,
    ids: &BTreeSet<Ulid>,
) -> Result<(), EngineError> {
    for id in ids {
        if !state.qualifications.contains_key(id) {
            return Err(EngineError::NotFound(EntityKind::Qualification, *id));
        }
    }
    Ok(())
}

fn check_subjects_exist(state: &ScheduleState, ids: &BTreeSet<Ulid>) -> Result<(), EngineError> {
    for id in ids {
        if !state.subjects.contains_key(id) {
            return Err(EngineError::NotFound(EntityKind::Subject, *id));
        }
    }
    Ok(())
}

impl Engine {
    // ── Qualifications ───────────────────────────────────────

    pub async fn create_qualification(
        &self,
        id: Ulid,
        code: String,
        name: String,
    ) -> Result<(), EngineError> {
        validate_code(&code)?;
        validate_name(&name)?;
        let mut state = self.state.write().await;
        if state.qualifications.len() >= MAX_QUALIFICATIONS {
            return Err(EngineError::Validation("too many qualifications".into()));
        }
        if state.qualifications.contains_key(&id) {
            return Err(EngineError::AlreadyExists(EntityKind::Qualification, id.to_string()));
        }
        if state.qualification_code_taken(&code, None) {
            return Err(EngineError::AlreadyExists(EntityKind::Qualification, code));
        }
        let event = Event::QualificationCreated { id, code, name };
        self.persist_and_apply(&mut state, event).await
    }

    pub async fn update_qualification(
        &self,
        id: Ulid,
        code: String,
        name: String,
    ) -> Result<(), EngineError> {
        validate_code(&code)?;
        validate_name(&name)?;
        let mut state = self.state.write().await;
        if !state.qualifications.contains_key(&id) {
            return Err(EngineError::NotFound(EntityKind::Qualification, id));
        }
        if state.qualification_code_taken(&code, Some(id)) {
            return Err(EngineError::AlreadyExists(EntityKind::Qualification, code));
        }
        let event = Event::QualificationUpdated { id, code, name };
        self.persist_and_apply(&mut state, event).await
    }

    /// Refused while any subject requires the qualification or any lecturer
    /// holds it.
    pub async fn delete_qualification(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.qualifications.contains_key(&id) {
            return Err(EngineError::NotFound(EntityKind::Qualification, id));
        }
        if state.qualification_referenced(&id) {
            return Err(EngineError::HasReferences(id));
        }
        let event = Event::QualificationDeleted { id };
        self.persist_and_apply(&mut state, event).await
    }

    // ── Subjects ─────────────────────────────────────────────

    pub async fn create_subject(
        &self,
        id: Ulid,
        code: String,
        name: String,
        required_qualifications: BTreeSet<Ulid>,
    ) -> Result<(), EngineError> {
        validate_code(&code)?;
        validate_name(&name)?;
        let mut state = self.state.write().await;
        if state.subjects.len() >= MAX_SUBJECTS {
            return Err(EngineError::Validation("too many subjects".into()));
        }
        if state.subjects.contains_key(&id) {
            return Err(EngineError::AlreadyExists(EntityKind::Subject, id.to_string()));
        }
        if state.subject_code_taken(&code, None) {
            return Err(EngineError::AlreadyExists(EntityKind::Subject, code));
        }
        check_qualifications_exist(&state, &required_qualifications)?;
        let event = Event::SubjectCreated {
            id,
            code,
            name,
            required_qualifications,
        };
        self.persist_and_apply(&mut state, event).await
    }

    pub async fn update_subject(
        &self,
        id: Ulid,
        code: String,
        name: String,
        required_qualifications: BTreeSet<Ulid>,
    ) -> Result<(), EngineError> {
        validate_code(&code)?;
        validate_name(&name)?;
        let mut state = self.state.write().await;
        if !state.subjects.contains_key(&id) {
            return Err(EngineError::NotFound(EntityKind::Subject, id));
        }
        if state.subject_code_taken(&code, Some(id)) {
            return Err(EngineError::AlreadyExists(EntityKind::Subject, code));
        }
        check_qualifications_exist(&state, &required_qualifications)?;
        let event = Event::SubjectUpdated {
            id,
            code,
            name,
            required_qualifications,
        };
        self.persist_and_apply(&mut state, event).await
    }

    /// Takes the subject's sessions and their substitutions with it.
    pub async fn delete_subject(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.subjects.contains_key(&id) {
            return Err(EngineError::NotFound(EntityKind::Subject, id));
        }
        let cascaded = state.sessions.values().filter(|s| s.subject_id == id).count();
        let event = Event::SubjectDeleted { id };
        self.persist_and_apply(&mut state, event).await?;
        if cascaded > 0 {
            tracing::info!(subject = %id, sessions = cascaded, "subject deleted with sessions");
        }
        Ok(())
    }

    // ── Lecturers ────────────────────────────────────────────

    pub async fn create_lecturer(&self, id: Ulid, draft: LecturerDraft) -> Result<(), EngineError> {
        validate_lecturer_draft(&draft)?;
        let mut state = self.state.write().await;
        if state.lecturers.len() >= MAX_LECTURERS {
            return Err(EngineError::Validation("too many lecturers".into()));
        }
        if state.lecturers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(EntityKind::Lecturer, id.to_string()));
        }
        if state.lecturer_email_taken(&draft.email, None) {
            return Err(EngineError::AlreadyExists(EntityKind::Lecturer, draft.email));
        }
        check_qualifications_exist(&state, &draft.qualifications)?;
        check_subjects_exist(&state, &draft.subjects)?;
        let event = Event::LecturerCreated {
            id,
            first_name: draft.first_name,
            last_name: draft.last_name,
            email: draft.email,
            qualifications: draft.qualifications,
            subjects: draft.subjects,
            max_substitutions_per_week: draft.max_substitutions_per_week,
            max_week_ms: hours_to_ms(draft.max_hours_per_week),
        };
        self.persist_and_apply(&mut state, event).await
    }

    pub async fn update_lecturer(&self, id: Ulid, draft: LecturerDraft) -> Result<(), EngineError> {
        validate_lecturer_draft(&draft)?;
        let mut state = self.state.write().await;
        if !state.lecturers.contains_key(&id) {
            return Err(EngineError::NotFound(EntityKind::Lecturer, id));
        }
        if state.lecturer_email_taken(&draft.email, Some(id)) {
            return Err(EngineError::AlreadyExists(EntityKind::Lecturer, draft.email));
        }
        check_qualifications_exist(&state, &draft.qualifications)?;
        check_subjects_exist(&state, &draft.subjects)?;
        let event = Event::LecturerUpdated {
            id,
            first_name: draft.first_name,
            last_name: draft.last_name,
            email: draft.email,
            qualifications: draft.qualifications,
            subjects: draft.subjects,
            max_substitutions_per_week: draft.max_substitutions_per_week,
            max_week_ms: hours_to_ms(draft.max_hours_per_week),
        };
        self.persist_and_apply(&mut state, event).await
    }

    /// Their own sessions disappear with their substitutions; sessions they
    /// covered as substitute revert to unassigned.
    pub async fn delete_lecturer(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.lecturers.contains_key(&id) {
            return Err(EngineError::NotFound(EntityKind::Lecturer, id));
        }
        let own = state.sessions.values().filter(|s| s.lecturer_id == id).count();
        let taken = state
            .substitutions
            .values()
            .filter(|sub| sub.substitute_id == id)
            .count();
        let event = Event::LecturerDeleted { id };
        self.persist_and_apply(&mut state, event).await?;
        if own > 0 || taken > 0 {
            tracing::info!(
                lecturer = %id,
                own_sessions = own,
                taken_substitutions = taken,
                "lecturer deleted with schedule entries"
            );
        }
        Ok(())
    }

    // ── Sessions ─────────────────────────────────────────────

    /// Rejects a span conflicting with the lecturer's real workload: the same
    /// person cannot be scheduled twice for the same time.
    pub async fn schedule_session(
        &self,
        id: Ulid,
        subject_id: Ulid,
        lecturer_id: Ulid,
        span: Span,
        needs_substitution: bool,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        let mut state = self.state.write().await;
        if state.sessions.len() >= MAX_SESSIONS {
            return Err(EngineError::Validation("too many sessions".into()));
        }
        if state.sessions.contains_key(&id) {
            return Err(EngineError::AlreadyExists(EntityKind::Session, id.to_string()));
        }
        if !state.subjects.contains_key(&subject_id) {
            return Err(EngineError::NotFound(EntityKind::Subject, subject_id));
        }
        if !state.lecturers.contains_key(&lecturer_id) {
            return Err(EngineError::NotFound(EntityKind::Lecturer, lecturer_id));
        }
        if !eligibility::is_free(&state, lecturer_id, &span, None) {
            return Err(EngineError::Validation(
                "lecturer already has a session in this time".into(),
            ));
        }
        let event = Event::SessionScheduled {
            id,
            subject_id,
            lecturer_id,
            span,
            needs_substitution,
        };
        self.persist_and_apply(&mut state, event).await
    }

    pub async fn cancel_session(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&id) {
            return Err(EngineError::NotFound(EntityKind::Session, id));
        }
        let event = Event::SessionCancelled { id };
        self.persist_and_apply(&mut state, event).await
    }

    pub async fn set_needs_substitution(
        &self,
        id: Ulid,
        needs_substitution: bool,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&id) {
            return Err(EngineError::NotFound(EntityKind::Session, id));
        }
        let event = Event::NeedsSubstitutionSet {
            id,
            needs_substitution,
        };
        self.persist_and_apply(&mut state, event).await
    }

    // ── The assignment transaction ───────────────────────────

    /// Commit a substitution decision for one session.
    pub async fn commit_assignment(
        &self,
        session_id: Ulid,
        target: AssignmentTarget,
    ) -> Result<(), EngineError> {
        match target {
            AssignmentTarget::Assign(lecturer_id) => self.assign(session_id, lecturer_id).await,
            AssignmentTarget::Clear => self.clear_substitution(session_id).await,
        }
    }

    /// Assign `lecturer_id` as the substitute for `session_id`.
    ///
    /// Re-runs the full eligibility check under the write lock; a preview is
    /// never trusted. On success the substitution is upserted: a different
    /// existing substitute is replaced, never appended to. Re-assigning the
    /// current substitute is a no-op success.
    pub async fn assign(&self, session_id: Ulid, lecturer_id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        let session = *state
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

        let previous = state.substitute_for(&session_id);
        if previous == Some(lecturer_id) {
            return Ok(());
        }

        let report = eligibility::evaluate(
            &state,
            lecturer,
            &session,
            subject,
            self.config.policy,
            self.config.utc_offset,
        );
        if !report.ok {
            // A different substitute already in place means the caller acted
            // on a stale view of the session.
            return Err(match previous {
                Some(_) => EngineError::Conflict(report),
                None => EngineError::NotEligible(report),
            });
        }

        let event = Event::SubstitutionAssigned {
            session_id,
            substitute_id: lecturer_id,
            at: now_ms(),
        };
        self.persist_and_apply(&mut state, event).await?;
        tracing::info!(
            session = %session_id,
            substitute = %lecturer_id,
            replaced = ?previous,
            "substitution assigned"
        );
        Ok(())
    }

    /// Remove the substitution for `session_id` if one exists. Clearing an
    /// unsubstituted session succeeds without writing anything.
    pub async fn clear_substitution(&self, session_id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&session_id) {
            return Err(EngineError::NotFound(EntityKind::Session, session_id));
        }
        if state.substitute_for(&session_id).is_none() {
            return Ok(());
        }
        let event = Event::SubstitutionCleared { session_id };
        self.persist_and_apply(&mut state, event).await?;
        tracing::info!(session = %session_id, "substitution cleared");
        Ok(())
    }
}
