use chrono::Utc;
use rocket::{serde::json::Json, Route, State};

use crate::{
    engine::{
        ArchiveStore, AuditLog, ElectionController, ExpiryWatcher, Registry, SessionGuard,
    },
    error::{Error, Result, VoteError},
    model::{
        api::{
            admin::{CandidateSpec, NewVoterRequest},
            archive::{ArchiveListing, RestoreRequest},
            audit::AuditRecord,
            auth::{Admin, AuthToken},
            election::{ElectionStatusView, ResetRequest, StartRequest},
            id::ApiId,
            results::{ResultsSnapshot, Turnout},
        },
        archive::ArchiveKind,
        mongodb::{Id, Store},
    },
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![
        start_election,
        stop_election,
        reset_election,
        results,
        stats,
        audit,
        register_voter,
        archive_voter,
        add_candidate,
        edit_candidate,
        archive_candidate,
        list_archive,
        restore_archived,
    ]
}

/// The username of the admin making the request, for the audit trail.
async fn actor(token: &AuthToken<Admin>, sessions: &SessionGuard) -> Result<String> {
    let admin = sessions
        .user(&token.session())
        .await?
        .ok_or(VoteError::SessionInvalid)?;
    Ok(admin.user.username)
}

#[post("/admin/election/start", data = "<request>", format = "json")]
async fn start_election(
    token: AuthToken<Admin>,
    request: Json<StartRequest>,
    sessions: SessionGuard,
    election: ElectionController,
    watcher: &State<ExpiryWatcher>,
) -> Result<Json<ElectionStatusView>> {
    let actor = actor(&token, &sessions).await?;
    let now = Utc::now();
    let config = election
        .start(&request.name, request.duration_seconds, &actor, now)
        .await?;
    if let Some(end_time) = config.target_end_time.as_option() {
        watcher.schedule(election.clone(), end_time).await;
    }
    Ok(Json(ElectionStatusView::new(
        &config,
        config.activity_at(now),
        now,
    )))
}

#[post("/admin/election/stop")]
async fn stop_election(
    token: AuthToken<Admin>,
    sessions: SessionGuard,
    election: ElectionController,
    watcher: &State<ExpiryWatcher>,
) -> Result<Json<ResultsSnapshot>> {
    let actor = actor(&token, &sessions).await?;
    let snapshot = election.stop(&actor, Utc::now()).await?;
    watcher.cancel().await;
    Ok(Json(snapshot))
}

#[post("/admin/election/reset", data = "<request>", format = "json")]
async fn reset_election(
    token: AuthToken<Admin>,
    request: Json<ResetRequest>,
    sessions: SessionGuard,
    election: ElectionController,
) -> Result<()> {
    if !request.confirm {
        return Err(Error::bad_request(
            "Resetting deletes every vote; set 'confirm' to go ahead".to_string(),
        ));
    }
    let actor = actor(&token, &sessions).await?;
    election.reset_votes(&actor, Utc::now()).await?;
    Ok(())
}

#[get("/admin/results")]
async fn results(
    _token: AuthToken<Admin>,
    election: ElectionController,
) -> Result<Json<ResultsSnapshot>> {
    Ok(Json(election.snapshot(Utc::now()).await?))
}

#[get("/admin/stats")]
async fn stats(_token: AuthToken<Admin>, registry: Registry) -> Result<Json<Turnout>> {
    Ok(Json(registry.turnout().await?))
}

#[get("/admin/audit?<limit>")]
async fn audit(
    _token: AuthToken<Admin>,
    limit: Option<u32>,
    store: Store,
    config: &State<Config>,
) -> Result<Json<Vec<AuditRecord>>> {
    let max = config.audit_display_limit();
    let limit = limit.map_or(max, |limit| limit.min(max));
    let entries = AuditLog::new(&store).recent(limit).await?;
    Ok(Json(entries.into_iter().map(AuditRecord::from).collect()))
}

#[post("/admin/voters", data = "<request>", format = "json")]
async fn register_voter(
    token: AuthToken<Admin>,
    request: Json<NewVoterRequest>,
    sessions: SessionGuard,
    registry: Registry,
) -> Result<Json<ApiId>> {
    let actor = actor(&token, &sessions).await?;
    let id = registry
        .register_voter(request.into_inner(), &actor, Utc::now())
        .await?;
    Ok(Json(id.into()))
}

#[delete("/admin/voters/<voter_id>")]
async fn archive_voter(
    token: AuthToken<Admin>,
    voter_id: Id,
    sessions: SessionGuard,
    archive: ArchiveStore,
) -> Result<Json<ArchiveListing>> {
    let actor = actor(&token, &sessions).await?;
    let entry = archive
        .archive(ArchiveKind::Voter, voter_id, &actor, Utc::now())
        .await?;
    Ok(Json(entry.into()))
}

#[post("/admin/candidates", data = "<spec>", format = "json")]
async fn add_candidate(
    token: AuthToken<Admin>,
    spec: Json<CandidateSpec>,
    sessions: SessionGuard,
    registry: Registry,
) -> Result<Json<ApiId>> {
    let actor = actor(&token, &sessions).await?;
    let candidate = registry
        .add_candidate(spec.into_inner(), &actor, Utc::now())
        .await?;
    Ok(Json(candidate.id.into()))
}

#[put("/admin/candidates/<candidate_id>", data = "<spec>", format = "json")]
async fn edit_candidate(
    token: AuthToken<Admin>,
    candidate_id: Id,
    spec: Json<CandidateSpec>,
    sessions: SessionGuard,
    registry: Registry,
) -> Result<()> {
    let actor = actor(&token, &sessions).await?;
    registry
        .edit_candidate(candidate_id, spec.into_inner(), &actor, Utc::now())
        .await
}

#[delete("/admin/candidates/<candidate_id>")]
async fn archive_candidate(
    token: AuthToken<Admin>,
    candidate_id: Id,
    sessions: SessionGuard,
    archive: ArchiveStore,
) -> Result<Json<ArchiveListing>> {
    let actor = actor(&token, &sessions).await?;
    let entry = archive
        .archive(ArchiveKind::Candidate, candidate_id, &actor, Utc::now())
        .await?;
    Ok(Json(entry.into()))
}

#[get("/admin/archive/<kind>")]
async fn list_archive(
    _token: AuthToken<Admin>,
    kind: ArchiveKind,
    archive: ArchiveStore,
) -> Result<Json<Vec<ArchiveListing>>> {
    let entries = archive.list(kind, Utc::now()).await?;
    Ok(Json(entries.into_iter().map(ArchiveListing::from).collect()))
}

#[post("/admin/archive/<kind>/restore", data = "<request>", format = "json")]
async fn restore_archived(
    token: AuthToken<Admin>,
    kind: ArchiveKind,
    request: Json<RestoreRequest>,
    sessions: SessionGuard,
    archive: ArchiveStore,
) -> Result<()> {
    let actor = actor(&token, &sessions).await?;
    archive
        .restore(kind, request.key.trim(), &actor, Utc::now())
        .await?;
    Ok(())
}
