use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};

use crate::api::v1::dto::authorize_request::AuthorizeParams;
use crate::api::v1::dto::resume_request::ResumeRequest;
use crate::api::v1::dto::suspend_response::SuspendResponse;
use crate::error::AppError;
use crate::services::authz::authn::Identity;
use crate::services::authz::flow::{AuthzOutcome, DeliveredResponse};
use crate::services::authz::response_mode::Delivery;
use crate::state::AppState;

/// `GET /authorization`: run the authorization flow for a parsed request.
///
/// Delivered outcomes become a 302 (or a form_post document); a suspension
/// becomes a JSON descriptor the login front-end acts on.
pub async fn authorize(
    State(state): State<AppState>,
    Query(params): Query<AuthorizeParams>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let request = params.into_request()?;
    let cookie = cookie_value(&headers, state.cookies.cookie_name());

    match state.flow.begin(request, cookie.as_deref()).await? {
        AuthzOutcome::Suspended(descriptor) => Ok((
            StatusCode::OK,
            Json(SuspendResponse::from(descriptor)),
        )
            .into_response()),
        AuthzOutcome::Delivered(delivered) => Ok(delivered_response(delivered)),
    }
}

/// `POST /authorization/resume`: complete a suspended flow with the identity
/// the authenticator established.
pub async fn resume(
    State(state): State<AppState>,
    Json(req): Json<ResumeRequest>,
) -> Result<Response, AppError> {
    let identity = Identity {
        uid: req.uid,
        salt: req.salt.unwrap_or_default(),
    };
    let delivered = state.flow.resume(req.continuation, identity).await?;
    Ok(delivered_response(delivered))
}

fn delivered_response(delivered: DeliveredResponse) -> Response {
    let mut response = match delivered.delivery {
        Delivery::Redirect { location } => {
            (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
        }
        Delivery::FormPost { body } => Html(body).into_response(),
    };

    for (name, value) in delivered.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            response.headers_mut().append(name, value);
        }
    }

    response
}

/// Extract the named cookie's value from the `Cookie` header.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_value_picks_the_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("a=1; oidc_authz=tok.en.sig; b=2"),
        );
        assert_eq!(
            cookie_value(&headers, "oidc_authz"),
            Some("tok.en.sig".to_string())
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn delivered_redirect_carries_location_and_extra_headers() {
        let delivered = DeliveredResponse {
            delivery: Delivery::Redirect {
                location: "https://rp.example/cb?code=abc".to_string(),
            },
            headers: vec![("set-cookie".to_string(), "oidc_authz=x; Path=/".to_string())],
        };
        let response = delivered_response(delivered);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://rp.example/cb?code=abc"
        );
        assert!(response.headers().get(header::SET_COOKIE).is_some());
    }
}
