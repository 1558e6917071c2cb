//! Authorization flow controller.
//!
//! Orchestrates request admission (client, response type, redirect URI),
//! authentication-method selection, the suspend/resume authentication step,
//! session setup, response assembly and response-mode encoding into the
//! end-to-end state machine.
//!
//! Error delivery rule: failures before the redirect URI has been verified
//! are returned as `Err` and must NOT be redirected; failures after it are
//! delivered to the client as an error redirect, like a success would be.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::repos::client_repo::{ClientRecord, ClientStore};
use crate::repos::session_repo::{AuthnEvent, SessionStore};
use crate::services::authz::authn::{
    AuthenticationMethod, AuthnArgs, AuthnBroker, AuthnLookupError, AuthnPrompt, Identity,
};
use crate::services::authz::cookie::CookieCodec;
use crate::services::authz::error::AuthzError;
use crate::services::authz::id_token::IdTokenSigner;
use crate::services::authz::redirect_uri::verify_redirect_uri;
use crate::services::authz::request::{AuthorizationRequest, Prompt};
use crate::services::authz::response_mode::{Delivery, encode_response};
use crate::services::authz::response_type::{
    AuthzResponseParams, create_authn_response, requires_fragment,
};
use crate::services::authz::userinfo::ClaimsSource;

/// Authorization-policy hook: computes the permission grant for
/// (subject, client).
#[async_trait]
pub trait AuthzPolicy: Send + Sync {
    async fn authorize(&self, uid: &str, client_id: &str) -> Result<String, AuthzError>;
}

/// Grants whatever was asked, unconditionally.
pub struct ImplicitAuthz;

#[async_trait]
impl AuthzPolicy for ImplicitAuthz {
    async fn authorize(&self, _uid: &str, _client_id: &str) -> Result<String, AuthzError> {
        Ok("implicit".to_string())
    }
}

/// Extensibility hook run over the assembled response before encoding.
pub trait ResponseCheck: Send + Sync {
    fn check(
        &self,
        params: &AuthzResponseParams,
        request: &AuthorizationRequest,
    ) -> Result<(), AuthzError>;
}

/// Description of a suspended flow: how to authenticate the user
/// out-of-band, and the token to resume with afterwards.
#[derive(Debug, Clone)]
pub struct SuspendDescriptor {
    pub continuation: Uuid,
    pub acr: String,
    pub prompt: AuthnPrompt,
    pub args: AuthnArgs,
}

/// The HTTP-agnostic final result: payload, target, headers.
#[derive(Debug, Clone)]
pub struct DeliveredResponse {
    pub delivery: Delivery,
    pub headers: Vec<(String, String)>,
}

/// Outcome of `begin`: either the flow suspended for interactive
/// authentication, or a response (success or redirected error) is ready.
#[derive(Debug)]
pub enum AuthzOutcome {
    Suspended(SuspendDescriptor),
    Delivered(DeliveredResponse),
}

enum SetupAuth {
    Suspend(SuspendDescriptor),
    Authenticated(AuthnEvent),
}

struct Pending {
    request: AuthorizationRequest,
    acr: String,
}

pub struct AuthorizationFlow {
    clients: Arc<dyn ClientStore>,
    sessions: Arc<dyn SessionStore>,
    broker: Arc<AuthnBroker>,
    signer: Arc<IdTokenSigner>,
    claims: Arc<dyn ClaimsSource>,
    cookies: Arc<CookieCodec>,
    policy: Arc<dyn AuthzPolicy>,
    response_check: Option<Arc<dyn ResponseCheck>>,
    issuer: String,
    /// Suspended flows awaiting an out-of-band authentication result.
    pending: Mutex<HashMap<Uuid, Pending>>,
}

impl AuthorizationFlow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clients: Arc<dyn ClientStore>,
        sessions: Arc<dyn SessionStore>,
        broker: Arc<AuthnBroker>,
        signer: Arc<IdTokenSigner>,
        claims: Arc<dyn ClaimsSource>,
        cookies: Arc<CookieCodec>,
        policy: Arc<dyn AuthzPolicy>,
        issuer: &str,
    ) -> Self {
        Self {
            clients,
            sessions,
            broker,
            signer,
            claims,
            cookies,
            policy,
            response_check: None,
            issuer: issuer.to_string(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_response_check(mut self, check: Arc<dyn ResponseCheck>) -> Self {
        self.response_check = Some(check);
        self
    }

    /// Process an authorization request.
    ///
    /// `cookie` is the raw session-cookie value, when the user agent
    /// presented one. Errors returned as `Err` happened before the redirect
    /// URI was verified and must be reported to the caller directly.
    pub async fn begin(
        &self,
        request: AuthorizationRequest,
        cookie: Option<&str>,
    ) -> Result<AuthzOutcome, AuthzError> {
        let cinfo = self.validate_request(&request).await?;

        match self.setup_auth(&request, &cinfo, cookie).await {
            Ok(SetupAuth::Suspend(descriptor)) => Ok(AuthzOutcome::Suspended(descriptor)),
            Ok(SetupAuth::Authenticated(event)) => match self.finish(&request, event).await {
                Ok(delivered) => Ok(AuthzOutcome::Delivered(delivered)),
                Err(err) => self
                    .deliver_error(&request, err)
                    .map(AuthzOutcome::Delivered),
            },
            Err(err) => self
                .deliver_error(&request, err)
                .map(AuthzOutcome::Delivered),
        }
    }

    /// Resume a suspended flow with the identity the authenticator produced.
    pub async fn resume(
        &self,
        continuation: Uuid,
        identity: Identity,
    ) -> Result<DeliveredResponse, AuthzError> {
        let Pending { request, acr } = self
            .pending
            .lock()
            .await
            .remove(&continuation)
            .ok_or_else(|| AuthzError::InvalidRequest("unknown continuation".to_string()))?;

        // Re-admit: the client database may have changed while suspended.
        self.validate_request(&request).await?;

        let event = AuthnEvent::new(&identity.uid, &identity.salt, &acr, Utc::now().timestamp());
        match self.finish(&request, event).await {
            Ok(delivered) => Ok(delivered),
            Err(err) => self.deliver_error(&request, err),
        }
    }

    /// Received -> RequestValidated.
    async fn validate_request(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<ClientRecord, AuthzError> {
        let cinfo = self
            .clients
            .get(&request.client_id)
            .await?
            .ok_or_else(|| {
                error!(client_id = %request.client_id, "client not in client database");
                AuthzError::UnknownClient(request.client_id.clone())
            })?;

        let rtype = request.response_type_set();
        if !cinfo.allows_response_type(&rtype) {
            return Err(AuthzError::UnauthorizedClient(
                "trying to use unregistered response_type".to_string(),
            ));
        }

        verify_redirect_uri(&request.redirect_uri, &cinfo.redirect_uris).map_err(|e| {
            // Redacted on purpose: the URI itself is attacker-controlled.
            error!(client_id = %request.client_id, error = %e, "faulty redirect_uri");
            e
        })?;

        Ok(cinfo)
    }

    /// RequestValidated -> AuthnPending | AuthnReused | Authenticated.
    async fn setup_auth(
        &self,
        request: &AuthorizationRequest,
        cinfo: &ClientRecord,
        cookie: Option<&str>,
    ) -> Result<SetupAuth, AuthzError> {
        let (method, acr) = self.pick_authn_method(request)?;
        info!(acr = %acr, "picked authentication method");

        // Explicit re-auth confirmation overrides the declared max_age:
        // any existing authentication is accepted without a freshness check.
        let max_age = if request.upm_answer {
            0
        } else {
            request.effective_max_age()
        };

        let identity = match method.authenticated_as(cookie, max_age, Utc::now()).await {
            Ok((identity, ts)) => Some((identity, ts)),
            Err(AuthnLookupError::NoSuchAuthentication) => {
                debug!("no active authentication");
                None
            }
            Err(AuthnLookupError::Tampered) => {
                warn!(client_id = %request.client_id, "session credential failed tamper check");
                None
            }
            Err(AuthnLookupError::TooOld) => {
                info!("too old authentication");
                None
            }
        };

        let args = authn_args_gather(request, &acr, cinfo);

        let Some((identity, ts)) = identity else {
            if request.prompt.contains(&Prompt::None) {
                // Need to authenticate but not allowed to interact.
                return Err(AuthzError::LoginRequired);
            }
            return Ok(SetupAuth::Suspend(
                self.suspend(request, &acr, method.as_ref(), args).await,
            ));
        };

        if re_authenticate(request, method.as_ref()) {
            return Ok(SetupAuth::Suspend(
                self.suspend(request, &acr, method.as_ref(), args).await,
            ));
        }

        if let Some(req_user) = &request.req_user {
            let sids = self.sessions.sessions_by_subject(req_user).await?;
            if let Some(last) = sids.last() {
                let prior = self.sessions.authn_event(*last).await?;
                if prior.map(|e| e.uid != identity.uid).unwrap_or(false) {
                    debug!("wanted to be someone else");
                    if request.prompt.contains(&Prompt::None) {
                        return Err(AuthzError::LoginRequired);
                    }
                    // Force re-authentication rather than silently binding
                    // the wrong subject.
                    return Ok(SetupAuth::Suspend(
                        self.suspend(request, &acr, method.as_ref(), args).await,
                    ));
                }
            }
        }

        Ok(SetupAuth::Authenticated(AuthnEvent::new(
            &identity.uid,
            &identity.salt,
            &acr,
            ts,
        )))
    }

    /// Method selection: acr claims matched exactly in request order, then
    /// acr_values, then a better-than-baseline or any-method fallback.
    fn pick_authn_method(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<(Arc<dyn AuthenticationMethod>, String), AuthzError> {
        if let Some(acrs) = request.acr_claims() {
            // The picked acr MUST match one of the requested values.
            for acr in &acrs {
                if let Some(hit) = self.broker.pick_exact(acr) {
                    debug!(acr = %acr, "picked method for requested acr claim");
                    return Ok(hit);
                }
            }
            return Err(AuthzError::AccessDenied(
                "no authentication method for requested acr".to_string(),
            ));
        }

        for acr in &request.acr_values {
            if let Some(hit) = self.broker.pick_exact(acr) {
                return Ok(hit);
            }
        }

        self.broker
            .pick_better(0)
            .or_else(|| self.broker.pick_any())
            .ok_or_else(|| {
                AuthzError::AccessDenied("no authentication method available".to_string())
            })
    }

    async fn suspend(
        &self,
        request: &AuthorizationRequest,
        acr: &str,
        method: &dyn AuthenticationMethod,
        args: AuthnArgs,
    ) -> SuspendDescriptor {
        let continuation = Uuid::new_v4();
        self.pending.lock().await.insert(
            continuation,
            Pending {
                request: request.clone(),
                acr: acr.to_string(),
            },
        );
        let prompt = method.authenticate(&args);
        SuspendDescriptor {
            continuation,
            acr: acr.to_string(),
            prompt,
            args,
        }
    }

    /// Authenticated -> Authorized -> ResponseAssembled -> ModeEncoded.
    async fn finish(
        &self,
        request: &AuthorizationRequest,
        event: AuthnEvent,
    ) -> Result<DeliveredResponse, AuthzError> {
        let uid = event.uid.clone();
        let sid = self.sessions.create(event, request).await?;
        debug!(sid = %sid, client_id = %request.client_id, "authorization session opened");

        let permission = self.policy.authorize(&uid, &request.client_id).await?;
        self.sessions.set_permission(sid, permission).await?;

        if self.sessions.is_revoked(sid).await? {
            return Err(AuthzError::AccessDenied("session is revoked".to_string()));
        }

        let info = create_authn_response(
            self.sessions.as_ref(),
            self.signer.as_ref(),
            self.claims.as_ref(),
            request,
            sid,
            Utc::now(),
        )
        .await?;

        // Re-resolve the redirect URI; the client record may have changed
        // since admission.
        let cinfo = self
            .clients
            .get(&request.client_id)
            .await?
            .ok_or_else(|| AuthzError::UnknownClient(request.client_id.clone()))?;
        verify_redirect_uri(&request.redirect_uri, &cinfo.redirect_uris)
            .map_err(|e| AuthzError::InvalidRequest(e.to_string()))?;

        if let Some(check) = &self.response_check {
            check.check(&info.params, request)?;
        }

        let headers = self.make_headers(&uid)?;

        // Mix-up mitigation: always stamp issuer and client on the way out.
        let mut params = info.params;
        params.iss = Some(self.issuer.clone());
        params.client_id = Some(request.client_id.clone());

        let delivery = encode_response(
            &params,
            &request.redirect_uri,
            info.fragment_enc,
            request.response_mode,
        )?;

        Ok(DeliveredResponse { delivery, headers })
    }

    /// Deliver a post-admission failure to the client over the (verified)
    /// redirect URI. Store failures stay internal.
    fn deliver_error(
        &self,
        request: &AuthorizationRequest,
        err: AuthzError,
    ) -> Result<DeliveredResponse, AuthzError> {
        if matches!(err, AuthzError::Store(_)) {
            return Err(err);
        }

        info!(client_id = %request.client_id, error = %err.oauth_code(), "delivering authorization error");
        let mut params = AuthzResponseParams::from_error(&err, request.state.as_deref());
        params.iss = Some(self.issuer.clone());
        params.client_id = Some(request.client_id.clone());

        let fragment_enc = requires_fragment(&request.response_type_set());
        let delivery = encode_response(&params, &request.redirect_uri, fragment_enc, None)?;
        Ok(DeliveredResponse {
            delivery,
            headers: Vec::new(),
        })
    }

    fn make_headers(&self, uid: &str) -> Result<Vec<(String, String)>, AuthzError> {
        let sealed = self
            .cookies
            .seal(uid, Utc::now())
            .map_err(|e| AuthzError::InvalidRequest(e.to_string()))?;
        Ok(vec![(
            "set-cookie".to_string(),
            self.cookies.set_cookie_header(&sealed),
        )])
    }
}

/// Whether the request demands re-authentication: `prompt=login` and the
/// method reports the prior authentication as not freshly done.
fn re_authenticate(request: &AuthorizationRequest, method: &dyn AuthenticationMethod) -> bool {
    request.prompt.contains(&Prompt::Login) && method.done(request)
}

/// Gather the arguments an interactive authenticator needs: client metadata
/// for the login page plus request echo fields.
fn authn_args_gather(
    request: &AuthorizationRequest,
    acr: &str,
    cinfo: &ClientRecord,
) -> AuthnArgs {
    AuthnArgs {
        acr: acr.to_string(),
        query: request.to_urlencoded(),
        as_user: request.req_user.clone(),
        policy_uri: cinfo.policy_uri.clone(),
        logo_uri: cinfo.logo_uri.clone(),
        tos_uri: cinfo.tos_uri.clone(),
        ui_locales: request.ui_locales.clone(),
        acr_values: request.acr_values.clone(),
    }
}
