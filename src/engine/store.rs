use std::collections::BTreeMap;

use ulid::Ulid;

use crate::model::*;

/// The whole schedule, owned by the engine's RwLock.
///
/// `apply_event` is the single mutation point: live commits and WAL replay go
/// through the same code, so a replayed log always reproduces the exact state.
#[derive(Debug, Default)]
pub struct ScheduleState {
    pub qualifications: BTreeMap<Ulid, Qualification>,
    pub subjects: BTreeMap<Ulid, Subject>,
    pub lecturers: BTreeMap<Ulid, Lecturer>,
    pub sessions: BTreeMap<Ulid, ClassSession>,
    /// Keyed by session id — the at-most-one-per-session invariant lives in
    /// this key.
    pub substitutions: BTreeMap<Ulid, Substitution>,
}

impl ScheduleState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Lookups ──────────────────────────────────────────────

    /// Substitute currently covering `session_id`, if any.
    pub fn substitute_for(&self, session_id: &Ulid) -> Option<Ulid> {
        self.substitutions.get(session_id).map(|s| s.substitute_id)
    }

    pub fn qualification_code_taken(&self, code: &str, exclude: Option<Ulid>) -> bool {
        self.qualifications
            .values()
            .any(|q| q.code == code && Some(q.id) != exclude)
    }

    pub fn subject_code_taken(&self, code: &str, exclude: Option<Ulid>) -> bool {
        self.subjects
            .values()
            .any(|s| s.code == code && Some(s.id) != exclude)
    }

    pub fn lecturer_email_taken(&self, email: &str, exclude: Option<Ulid>) -> bool {
        self.lecturers
            .values()
            .any(|l| l.email == email && Some(l.id) != exclude)
    }

    /// A qualification is referenced while any subject requires it or any
    /// lecturer holds it.
    pub fn qualification_referenced(&self, id: &Ulid) -> bool {
        self.subjects
            .values()
            .any(|s| s.required_qualifications.contains(id))
            || self.lecturers.values().any(|l| l.qualifications.contains(id))
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::QualificationCreated { id, code, name }
            | Event::QualificationUpdated { id, code, name } => {
                self.qualifications.insert(
                    *id,
                    Qualification {
                        id: *id,
                        code: code.clone(),
                        name: name.clone(),
                    },
                );
            }
            Event::QualificationDeleted { id } => {
                self.qualifications.remove(id);
            }
            Event::SubjectCreated {
                id,
                code,
                name,
                required_qualifications,
            }
            | Event::SubjectUpdated {
                id,
                code,
                name,
                required_qualifications,
            } => {
                self.subjects.insert(
                    *id,
                    Subject {
                        id: *id,
                        code: code.clone(),
                        name: name.clone(),
                        required_qualifications: required_qualifications.clone(),
                    },
                );
            }
            Event::SubjectDeleted { id } => {
                self.subjects.remove(id);
                // Sessions of the subject go with it, substitutions with them.
                let doomed: Vec<Ulid> = self
                    .sessions
                    .values()
                    .filter(|s| s.subject_id == *id)
                    .map(|s| s.id)
                    .collect();
                for session_id in doomed {
                    self.sessions.remove(&session_id);
                    self.substitutions.remove(&session_id);
                }
            }
            Event::LecturerCreated {
                id,
                first_name,
                last_name,
                email,
                qualifications,
                subjects,
                max_substitutions_per_week,
                max_week_ms,
            }
            | Event::LecturerUpdated {
                id,
                first_name,
                last_name,
                email,
                qualifications,
                subjects,
                max_substitutions_per_week,
                max_week_ms,
            } => {
                self.lecturers.insert(
                    *id,
                    Lecturer {
                        id: *id,
                        first_name: first_name.clone(),
                        last_name: last_name.clone(),
                        email: email.clone(),
                        qualifications: qualifications.clone(),
                        subjects: subjects.clone(),
                        max_substitutions_per_week: *max_substitutions_per_week,
                        max_week_ms: *max_week_ms,
                    },
                );
            }
            Event::LecturerDeleted { id } => {
                self.lecturers.remove(id);
                // Their own sessions disappear; sessions they covered as a
                // substitute revert to unassigned.
                let doomed: Vec<Ulid> = self
                    .sessions
                    .values()
                    .filter(|s| s.lecturer_id == *id)
                    .map(|s| s.id)
                    .collect();
                for session_id in doomed {
                    self.sessions.remove(&session_id);
                    self.substitutions.remove(&session_id);
                }
                self.substitutions.retain(|_, sub| sub.substitute_id != *id);
            }
            Event::SessionScheduled {
                id,
                subject_id,
                lecturer_id,
                span,
                needs_substitution,
            } => {
                self.sessions.insert(
                    *id,
                    ClassSession {
                        id: *id,
                        subject_id: *subject_id,
                        lecturer_id: *lecturer_id,
                        span: *span,
                        needs_substitution: *needs_substitution,
                    },
                );
            }
            Event::SessionCancelled { id } => {
                self.sessions.remove(id);
                self.substitutions.remove(id);
            }
            Event::NeedsSubstitutionSet {
                id,
                needs_substitution,
            } => {
                if let Some(session) = self.sessions.get_mut(id) {
                    session.needs_substitution = *needs_substitution;
                }
            }
            Event::SubstitutionAssigned {
                session_id,
                substitute_id,
                at,
            } => {
                self.substitutions.insert(
                    *session_id,
                    Substitution {
                        substitute_id: *substitute_id,
                        created_at: *at,
                    },
                );
            }
            Event::SubstitutionCleared { session_id } => {
                self.substitutions.remove(session_id);
            }
        }
    }

    /// Minimal event list that recreates this state; the WAL compactor writes
    /// exactly this.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(
            self.qualifications.len()
                + self.subjects.len()
                + self.lecturers.len()
                + self.sessions.len()
                + self.substitutions.len(),
        );
        for q in self.qualifications.values() {
            events.push(Event::QualificationCreated {
                id: q.id,
                code: q.code.clone(),
                name: q.name.clone(),
            });
        }
        for s in self.subjects.values() {
            events.push(Event::SubjectCreated {
                id: s.id,
                code: s.code.clone(),
                name: s.name.clone(),
                required_qualifications: s.required_qualifications.clone(),
            });
        }
        for l in self.lecturers.values() {
            events.push(Event::LecturerCreated {
                id: l.id,
                first_name: l.first_name.clone(),
                last_name: l.last_name.clone(),
                email: l.email.clone(),
                qualifications: l.qualifications.clone(),
                subjects: l.subjects.clone(),
                max_substitutions_per_week: l.max_substitutions_per_week,
                max_week_ms: l.max_week_ms,
            });
        }
        for s in self.sessions.values() {
            events.push(Event::SessionScheduled {
                id: s.id,
                subject_id: s.subject_id,
                lecturer_id: s.lecturer_id,
                span: s.span,
                needs_substitution: s.needs_substitution,
            });
        }
        for (session_id, sub) in &self.substitutions {
            events.push(Event::SubstitutionAssigned {
                session_id: *session_id,
                substitute_id: sub.substitute_id,
                at: sub.created_at,
            });
        }
        events
    }
}
