//! HTTP handlers for the wire contract
//!
//! Everything dispatches on the `c` (command) and `a` (action) query
//! parameters at a single path, matching what the fetchers send:
//! `?c=fetch&a=crawlTime|schedule|update` and
//! `?c=resource&a=syncList|get`. All requests carry `time` and `session`.

use crate::schedule::{claim_batch, write_batch, CrawlPhase};
use crate::server::{lock, SharedContext};
use crate::transfer::{
    encode_payload, reassemble, verify_part, verify_session, PayloadPart, UpdateResponse,
    UpdateStatus,
};
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

/// Builds the queue-server router
pub fn router(ctx: SharedContext) -> Router {
    Router::new()
        .route("/", get(dispatch_get).post(dispatch_post))
        .with_state(ctx)
}

#[derive(Debug, Deserialize)]
pub struct WireQuery {
    #[serde(default)]
    c: String,
    #[serde(default)]
    a: String,
    #[serde(default)]
    time: u64,
    #[serde(default)]
    session: String,
    #[serde(default)]
    machine_uri: String,
    /// Requested file for `a=get`
    #[serde(default)]
    f: String,
    /// Byte offset for ranged reads
    #[serde(default)]
    o: u64,
    /// Byte length for ranged reads; 0 = to end
    #[serde(default)]
    l: u64,
}

/// Form body of one `a=update` part
#[derive(Debug, Deserialize)]
pub struct UpdateForm {
    data: String,
    hash_data: String,
    /// Hash of this part's data
    part: String,
    current_part: usize,
    num_parts: usize,
    #[serde(default)]
    machine_id: String,
    time: u64,
    session: String,
}

async fn dispatch_get(State(ctx): State<SharedContext>, Query(q): Query<WireQuery>) -> Response {
    if !session_ok(&ctx, q.time, &q.session) {
        return (StatusCode::FORBIDDEN, "session rejected").into_response();
    }

    match (q.c.as_str(), q.a.as_str()) {
        ("fetch", "crawlTime") => crawl_time_response(&ctx),
        ("fetch", "schedule") => schedule_response(&ctx, &q.machine_uri),
        ("resource", "syncList") => sync_list_response(&ctx),
        ("resource", "get") => resource_get_response(&ctx, &q.f, q.o, q.l),
        _ => (StatusCode::NOT_FOUND, "unknown command").into_response(),
    }
}

async fn dispatch_post(
    State(ctx): State<SharedContext>,
    Query(q): Query<WireQuery>,
    Form(form): Form<UpdateForm>,
) -> Response {
    if (q.c.as_str(), q.a.as_str()) != ("fetch", "update") {
        return (StatusCode::NOT_FOUND, "unknown command").into_response();
    }
    if !session_ok(&ctx, form.time, &form.session) {
        return (StatusCode::FORBIDDEN, "session rejected").into_response();
    }

    let status = match handle_update_part(&ctx, form) {
        Ok(status) => status,
        Err(e) => {
            warn!(error = %e, "Update part failed");
            UpdateStatus::Redo
        }
    };
    Json(UpdateResponse {
        status,
        post_max_size: ctx.config.network.post_max_size,
    })
    .into_response()
}

fn session_ok(ctx: &SharedContext, time: u64, session: &str) -> bool {
    let now = Utc::now().timestamp() as u64;
    verify_session(time, session, &ctx.config.network.shared_secret, now)
}

/// Accepts one uploaded part; parks the whole payload once complete
///
/// Parts are buffered per (machine, payload hash). A part that fails its
/// own hash is answered REDO without disturbing the buffer; a completed
/// payload that fails reassembly drops the buffer so the fetcher's
/// restart starts clean.
pub(crate) fn handle_update_part(
    ctx: &SharedContext,
    form: UpdateForm,
) -> crate::Result<UpdateStatus> {
    if lock(&ctx.scheduler)?.phase() == CrawlPhase::Stop {
        return Ok(UpdateStatus::Stop);
    }

    let part = PayloadPart {
        part: form.current_part,
        num_parts: form.num_parts,
        data: form.data,
        part_hash: form.part,
        hash_data: form.hash_data.clone(),
    };
    if verify_part(&part).is_err() {
        debug!(part = part.part, "Part failed integrity check");
        return Ok(UpdateStatus::Redo);
    }

    let key = format!("{}:{}", form.machine_id, form.hash_data);
    let mut uploads = lock(&ctx.uploads)?;
    let buffer = uploads.entry(key.clone()).or_default();
    // A resent part replaces its slot instead of duplicating it
    buffer.retain(|p| p.part != part.part);
    buffer.push(part);

    if buffer.len() < form.num_parts {
        return Ok(UpdateStatus::Continue);
    }

    buffer.sort_by_key(|p| p.part);
    let assembled = reassemble(buffer);
    uploads.remove(&key);
    drop(uploads);

    match assembled {
        Ok(encoded) => {
            let path = ctx.park_incoming(&encoded)?;
            debug!(path = %path.display(), "Parked complete upload");
            Ok(UpdateStatus::Continue)
        }
        Err(e) => {
            warn!(error = %e, "Payload reassembly failed");
            Ok(UpdateStatus::Redo)
        }
    }
}

fn crawl_time_response(ctx: &SharedContext) -> Response {
    let scheduler = match lock(&ctx.scheduler) {
        Ok(s) => s,
        Err(e) => return internal_error(e),
    };
    let params = scheduler.crawl_parameters(&ctx.config);
    match encode_payload(&params) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => internal_error(e.into()),
    }
}

/// Hands out the next batch; an empty body means "nothing to do"
///
/// A freshly produced batch is parked as a file first and then claimed
/// through the same atomic rename as pre-parked ones, so every batch is
/// consumed exactly once no matter how requests interleave.
fn schedule_response(ctx: &SharedContext, machine_uri: &str) -> Response {
    let claimant = if machine_uri.is_empty() {
        "anon"
    } else {
        machine_uri
    };

    let produced = (|| -> crate::Result<()> {
        let mut scheduler = lock(&ctx.scheduler)?;
        let store = lock(&ctx.store)?;
        if let Some(batch) = scheduler.produce_fetch_batch(&store)? {
            write_batch(&ctx.schedules_dir(), &batch)?;
        }
        Ok(())
    })();
    if let Err(e) = produced {
        return internal_error(e);
    }

    match claim_batch(&ctx.schedules_dir(), claimant) {
        Ok(Some(batch)) => match batch.to_wire() {
            Ok(body) => (StatusCode::OK, body).into_response(),
            Err(e) => internal_error(e.into()),
        },
        Ok(None) => (StatusCode::OK, String::new()).into_response(),
        Err(e) => internal_error(e.into()),
    }
}

fn sync_list_response(ctx: &SharedContext) -> Response {
    match crate::server::sync_list(&ctx.cache_dir()) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => internal_error(e.into()),
    }
}

fn resource_get_response(ctx: &SharedContext, name: &str, offset: u64, length: u64) -> Response {
    match crate::server::read_file_range(&ctx.cache_dir(), name, offset, length) {
        Ok(bytes) => (StatusCode::OK, bytes).into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "no such file").into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            (StatusCode::FORBIDDEN, "path refused").into_response()
        }
        Err(e) => internal_error(e.into()),
    }
}

fn internal_error(e: crate::NetweftError) -> Response {
    warn!(error = %e, "Request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}
