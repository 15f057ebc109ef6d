//! HTTP handler functions for the `SkyGuard` API.

use actix_web::{HttpRequest, HttpResponse, web};
use skyguard_incidents::{IncidentError, IncidentQuery, NewReportInput};
use skyguard_server_models::{
    ApiDeleted, ApiHealth, ApiLinkCode, ApiProfile, ApiRating, ApiReport, ApiResolution,
    ApiShelter, CreateReportRequest, LocationRequest, NotificationsRequest, ReportListParams,
};
use skyguard_users::UsersError;

use crate::AppState;
use crate::auth::{authenticate, authenticate_admin};

/// Maps a service error onto a JSON error response.
fn incident_error(e: &IncidentError, action: &str) -> HttpResponse {
    match e {
        IncidentError::Validation { field, .. } => HttpResponse::BadRequest().json(
            serde_json::json!({
                "error": e.to_string(),
                "field": field,
            }),
        ),
        IncidentError::InvalidStateTransition { .. } => {
            HttpResponse::BadRequest().json(serde_json::json!({ "error": e.to_string() }))
        }
        IncidentError::NotFound { .. } => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": e.to_string() }))
        }
        IncidentError::Database(_) => {
            log::error!("Failed to {action}: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Failed to {action}")
            }))
        }
    }
}

fn internal_error(e: &dyn std::fmt::Display, action: &str) -> HttpResponse {
    log::error!("Failed to {action}: {e}");
    HttpResponse::InternalServerError().json(serde_json::json!({
        "error": format!("Failed to {action}")
    }))
}

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /api/reports`
///
/// Lists incidents (unconfirmed or confirmed roots), newest first.
/// Unrecognized filter values are ignored.
pub async fn list_reports(
    state: web::Data<AppState>,
    params: web::Query<ReportListParams>,
) -> HttpResponse {
    let query = IncidentQuery {
        status: params.status.as_deref().and_then(|s| s.trim().parse().ok()),
        probability: params
            .probability
            .as_deref()
            .and_then(|s| s.trim().parse().ok()),
        threat_type: params
            .threat_type
            .as_deref()
            .and_then(|s| s.trim().parse().ok()),
    };

    match state.incidents.list_incidents(query).await {
        Ok(rows) => {
            let reports: Vec<ApiReport> = rows.into_iter().map(ApiReport::from).collect();
            HttpResponse::Ok().json(reports)
        }
        Err(e) => incident_error(&e, "list reports"),
    }
}

/// `POST /api/reports`
///
/// Stores a report from the caller and runs aggregation on it. Answers
/// with the report as stored afterwards.
pub async fn create_report(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateReportRequest>,
) -> HttpResponse {
    let identity = match authenticate(state.auth.as_ref(), &req).await {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };

    let body = body.into_inner();
    let input = NewReportInput {
        title: body.title,
        description: body.description,
        latitude: body.latitude,
        longitude: body.longitude,
        threat_type: body.threat_type,
        danger_radius: body.danger_radius,
    };

    match state.incidents.create_report(identity.user_id, input).await {
        Ok(report) => HttpResponse::Created().json(ApiReport::from(report)),
        Err(e) => incident_error(&e, "create report"),
    }
}

/// `POST /api/reports/{id}/confirm` (admin)
pub async fn confirm_report(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i64>,
) -> HttpResponse {
    let identity = match authenticate_admin(state.auth.as_ref(), &req).await {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    let id = path.into_inner();
    log::info!("User {} confirms report {id}", identity.user_id);

    match state.incidents.confirm(id).await {
        Ok(outcome) => HttpResponse::Ok().json(ApiResolution {
            report: outcome.report.into(),
            affected_reports: outcome.affected_reports,
            notified: outcome.notified,
        }),
        Err(e) => incident_error(&e, "confirm report"),
    }
}

/// `POST /api/reports/{id}/reject` (admin)
pub async fn reject_report(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i64>,
) -> HttpResponse {
    let identity = match authenticate_admin(state.auth.as_ref(), &req).await {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    let id = path.into_inner();
    log::info!("User {} rejects report {id}", identity.user_id);

    match state.incidents.reject(id).await {
        Ok(outcome) => HttpResponse::Ok().json(ApiResolution {
            report: outcome.report.into(),
            affected_reports: outcome.affected_reports,
            notified: outcome.notified,
        }),
        Err(e) => incident_error(&e, "reject report"),
    }
}

/// `DELETE /api/reports/{id}` (admin)
///
/// Deleting a root also deletes its children.
pub async fn delete_report(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i64>,
) -> HttpResponse {
    let identity = match authenticate_admin(state.auth.as_ref(), &req).await {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    let id = path.into_inner();
    log::info!("User {} deletes report {id}", identity.user_id);

    match state.incidents.delete(id).await {
        Ok(deleted) => HttpResponse::Ok().json(ApiDeleted { deleted }),
        Err(e) => incident_error(&e, "delete report"),
    }
}

/// `GET /api/shelters`
pub async fn shelters(state: web::Data<AppState>) -> HttpResponse {
    match state.storage.list_shelters().await {
        Ok(rows) => {
            let shelters: Vec<ApiShelter> = rows.into_iter().map(ApiShelter::from).collect();
            HttpResponse::Ok().json(shelters)
        }
        Err(e) => internal_error(&e, "list shelters"),
    }
}

/// `GET /api/me`
pub async fn me(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let identity = match authenticate(state.auth.as_ref(), &req).await {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };

    match state.profiles.get(identity.user_id).await {
        Ok(profile) => HttpResponse::Ok().json(ApiProfile::from(profile)),
        Err(e) => internal_error(&e, "load profile"),
    }
}

/// `PUT /api/me/location`
pub async fn update_location(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<LocationRequest>,
) -> HttpResponse {
    let identity = match authenticate(state.auth.as_ref(), &req).await {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };

    match state
        .profiles
        .update_location(identity.user_id, body.latitude, body.longitude)
        .await
    {
        Ok(profile) => HttpResponse::Ok().json(ApiProfile::from(profile)),
        Err(UsersError::InvalidCoordinates(e)) => {
            HttpResponse::BadRequest().json(serde_json::json!({
                "error": e.to_string(),
                "field": e.field.name(),
            }))
        }
        Err(e) => internal_error(&e, "update location"),
    }
}

/// `PUT /api/me/notifications`
pub async fn update_notifications(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<NotificationsRequest>,
) -> HttpResponse {
    let identity = match authenticate(state.auth.as_ref(), &req).await {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };

    match state
        .profiles
        .set_notifications_enabled(identity.user_id, body.enabled)
        .await
    {
        Ok(profile) => HttpResponse::Ok().json(ApiProfile::from(profile)),
        Err(e) => internal_error(&e, "update notifications"),
    }
}

/// `POST /api/me/link-code`
///
/// Issues a fresh code, invalidating earlier ones.
pub async fn create_link_code(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let identity = match authenticate(state.auth.as_ref(), &req).await {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };

    match state.links.create_link_code(identity.user_id).await {
        Ok(row) => HttpResponse::Ok().json(ApiLinkCode::new(row, &state.bot_username)),
        Err(e) => internal_error(&e, "create link code"),
    }
}

/// `GET /api/users/{id}/rating`
pub async fn user_rating(state: web::Data<AppState>, path: web::Path<i64>) -> HttpResponse {
    let user_id = path.into_inner();

    match state.trust.rating(user_id).await {
        Ok(rating) => HttpResponse::Ok().json(ApiRating { user_id, rating }),
        Err(e) => internal_error(&e, "load rating"),
    }
}
