//! Line-delimited JSON protocol. One request object per line, one reply
//! object per line, in order.
//!
//! Requests carry an `op` tag; replies are `{"ok":true,"data":...}` or
//! `{"ok":false,"error":{"kind":...,"message":...}}`. Eligibility failures
//! attach the full report so a client can say why, not just no.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_BYTES;
use crate::model::*;
use crate::observability;

/// The assignment target field: absent, `null` and `""` all mean clear.
/// The engine itself never sees a null sentinel.
fn de_clearable_ulid<'de, D>(deserializer: D) -> Result<Option<Ulid>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => Ulid::from_string(s).map(Some).map_err(serde::de::Error::custom),
    }
}

fn default_ranking_scope() -> RankingScope {
    RankingScope::SubstitutionsOnly
}

fn default_ranking_metric() -> RankingMetric {
    RankingMetric::Hours
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateQualification {
        id: Option<Ulid>,
        code: String,
        name: String,
    },
    UpdateQualification {
        id: Ulid,
        code: String,
        name: String,
    },
    DeleteQualification {
        id: Ulid,
    },
    ListQualifications,
    CreateSubject {
        id: Option<Ulid>,
        code: String,
        name: String,
        #[serde(default)]
        required_qualifications: BTreeSet<Ulid>,
    },
    UpdateSubject {
        id: Ulid,
        code: String,
        name: String,
        #[serde(default)]
        required_qualifications: BTreeSet<Ulid>,
    },
    DeleteSubject {
        id: Ulid,
    },
    ListSubjects,
    CreateLecturer {
        id: Option<Ulid>,
        #[serde(flatten)]
        draft: LecturerDraft,
    },
    UpdateLecturer {
        id: Ulid,
        #[serde(flatten)]
        draft: LecturerDraft,
    },
    DeleteLecturer {
        id: Ulid,
    },
    ListLecturers,
    ScheduleSession {
        id: Option<Ulid>,
        subject_id: Ulid,
        lecturer_id: Ulid,
        start: Ms,
        end: Ms,
        #[serde(default)]
        needs_substitution: bool,
    },
    CancelSession {
        id: Ulid,
    },
    SetNeedsSubstitution {
        id: Ulid,
        needs_substitution: bool,
    },
    ListSessions {
        from: Ms,
        to: Ms,
        lecturer: Option<Ulid>,
    },
    OpenSessions,
    PreviewEligibility {
        session_id: Ulid,
        lecturer_id: Ulid,
    },
    Candidates {
        session_id: Ulid,
    },
    Assign {
        session_id: Ulid,
        #[serde(default, deserialize_with = "de_clearable_ulid")]
        lecturer_id: Option<Ulid>,
    },
    WeeklyLoad {
        lecturer_id: Ulid,
        at: Option<Ms>,
    },
    WeeklyRanking {
        from: Ms,
        to: Ms,
        #[serde(default = "default_ranking_scope")]
        scope: RankingScope,
        #[serde(default = "default_ranking_metric")]
        metric: RankingMetric,
    },
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Data {
    None,
    Created { id: Ulid },
    Qualifications(Vec<Qualification>),
    Subjects(Vec<Subject>),
    Lecturers(Vec<Lecturer>),
    Sessions(Vec<EventInfo>),
    Report(EligibilityReport),
    Candidates(Vec<CandidateInfo>),
    Load(WeeklyLoadInfo),
    Ranking(Vec<RankingEntry>),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<EligibilityReport>,
}

#[derive(Debug, Serialize)]
struct Reply {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Data>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

impl Reply {
    fn success(data: Data) -> Self {
        Reply { ok: true, data: Some(data), error: None }
    }

    fn failure(error: ErrorBody) -> Self {
        Reply { ok: false, data: None, error: Some(error) }
    }
}

fn error_body(err: EngineError) -> ErrorBody {
    let kind = match &err {
        EngineError::NotFound(..) => "not_found",
        EngineError::Validation(_) => "validation",
        EngineError::AlreadyExists(..) => "already_exists",
        EngineError::HasReferences(_) => "has_references",
        EngineError::NotEligible(_) => "not_eligible",
        EngineError::Conflict(_) => "conflict",
        EngineError::Wal(_) => "wal",
    };
    let message = err.to_string();
    let report = match err {
        EngineError::NotEligible(report) | EngineError::Conflict(report) => Some(report),
        _ => None,
    };
    ErrorBody { kind, message, report }
}

fn render(reply: &Reply) -> String {
    serde_json::to_string(reply).unwrap_or_else(|e| {
        tracing::error!(error = %e, "reply serialization failed");
        r#"{"ok":false,"error":{"kind":"internal","message":"serialization failure"}}"#.to_string()
    })
}

async fn execute(engine: &Engine, request: Request) -> Result<Data, EngineError> {
    match request {
        Request::CreateQualification { id, code, name } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine.create_qualification(id, code, name).await?;
            Ok(Data::Created { id })
        }
        Request::UpdateQualification { id, code, name } => {
            engine.update_qualification(id, code, name).await?;
            Ok(Data::None)
        }
        Request::DeleteQualification { id } => {
            engine.delete_qualification(id).await?;
            Ok(Data::None)
        }
        Request::ListQualifications => {
            Ok(Data::Qualifications(engine.list_qualifications().await))
        }
        Request::CreateSubject { id, code, name, required_qualifications } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine
                .create_subject(id, code, name, required_qualifications)
                .await?;
            Ok(Data::Created { id })
        }
        Request::UpdateSubject { id, code, name, required_qualifications } => {
            engine
                .update_subject(id, code, name, required_qualifications)
                .await?;
            Ok(Data::None)
        }
        Request::DeleteSubject { id } => {
            engine.delete_subject(id).await?;
            Ok(Data::None)
        }
        Request::ListSubjects => Ok(Data::Subjects(engine.list_subjects().await)),
        Request::CreateLecturer { id, draft } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine.create_lecturer(id, draft).await?;
            Ok(Data::Created { id })
        }
        Request::UpdateLecturer { id, draft } => {
            engine.update_lecturer(id, draft).await?;
            Ok(Data::None)
        }
        Request::DeleteLecturer { id } => {
            engine.delete_lecturer(id).await?;
            Ok(Data::None)
        }
        Request::ListLecturers => Ok(Data::Lecturers(engine.list_lecturers().await)),
        Request::ScheduleSession { id, subject_id, lecturer_id, start, end, needs_substitution } => {
            let id = id.unwrap_or_else(Ulid::new);
            // Built raw: span validation happens inside the engine.
            let span = Span { start, end };
            engine
                .schedule_session(id, subject_id, lecturer_id, span, needs_substitution)
                .await?;
            Ok(Data::Created { id })
        }
        Request::CancelSession { id } => {
            engine.cancel_session(id).await?;
            Ok(Data::None)
        }
        Request::SetNeedsSubstitution { id, needs_substitution } => {
            engine.set_needs_substitution(id, needs_substitution).await?;
            Ok(Data::None)
        }
        Request::ListSessions { from, to, lecturer } => {
            Ok(Data::Sessions(engine.list_sessions(from, to, lecturer).await?))
        }
        Request::OpenSessions => Ok(Data::Sessions(engine.open_sessions().await)),
        Request::PreviewEligibility { session_id, lecturer_id } => Ok(Data::Report(
            engine.preview_eligibility(session_id, lecturer_id).await?,
        )),
        Request::Candidates { session_id } => {
            Ok(Data::Candidates(engine.candidates(session_id).await?))
        }
        Request::Assign { session_id, lecturer_id } => {
            let target = match lecturer_id {
                Some(id) => AssignmentTarget::Assign(id),
                None => AssignmentTarget::Clear,
            };
            engine.commit_assignment(session_id, target).await?;
            Ok(Data::None)
        }
        Request::WeeklyLoad { lecturer_id, at } => {
            Ok(Data::Load(engine.weekly_load_info(lecturer_id, at).await?))
        }
        Request::WeeklyRanking { from, to, scope, metric } => Ok(Data::Ranking(
            engine.weekly_ranking(from, to, scope, metric).await?,
        )),
    }
}

async fn process_line(engine: &Engine, line: &str) -> String {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return render(&Reply::failure(ErrorBody {
                kind: "bad_request",
                message: e.to_string(),
                report: None,
            }));
        }
    };

    let label = observability::request_label(&request);
    let started = Instant::now();
    let result = execute(engine, request).await;
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(observability::REQUESTS_TOTAL, "op" => label, "status" => status)
        .increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => label)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(data) => render(&Reply::success(data)),
        Err(err) => {
            tracing::debug!(op = label, error = %err, "request failed");
            render(&Reply::failure(error_body(err)))
        }
    }
}

/// Serve one client connection until it disconnects or sends an oversized
/// line.
pub async fn handle_connection(
    engine: Arc<Engine>,
    socket: TcpStream,
) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    while let Some(line) = framed.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = process_line(&engine, &line).await;
        framed.send(reply).await?;
    }
    Ok(())
}
