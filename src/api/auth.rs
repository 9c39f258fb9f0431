//! Caller identity from `X-User` / `X-Role` headers

use std::future::{Ready, ready};

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest, web};

use super::error::ApiError;
use crate::model::AuthConfig;

pub const USER_HEADER: &str = "X-User";
pub const ROLE_HEADER: &str = "X-Role";

const REVIEWER_ROLES: [&str; 2] = ["Reviewer", "Admin"];

/// Authenticated caller with an allowed role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub username: String,
    pub role: String,
}

/// Caller allowed to approve, reject and override risks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewerContext(pub CallerContext);

impl CallerContext {
    fn from_headers(req: &HttpRequest) -> Result<Self, ApiError> {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        let (Some(username), Some(role)) = (header(USER_HEADER), header(ROLE_HEADER)) else {
            return Err(ApiError::Unauthorized(
                "Missing X-User or X-Role headers".to_string(),
            ));
        };

        let allowed = match req.app_data::<web::Data<AuthConfig>>() {
            Some(auth) => auth.is_role_allowed(&role),
            None => AuthConfig::default().is_role_allowed(&role),
        };
        if !allowed {
            return Err(ApiError::Forbidden("Role not allowed".to_string()));
        }

        Ok(Self { username, role })
    }

    pub fn is_reviewer(&self) -> bool {
        REVIEWER_ROLES.contains(&self.role.as_str())
    }
}

impl FromRequest for CallerContext {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(CallerContext::from_headers(req))
    }
}

impl FromRequest for ReviewerContext {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(CallerContext::from_headers(req).and_then(|caller| {
            if caller.is_reviewer() {
                Ok(ReviewerContext(caller))
            } else {
                Err(ApiError::Forbidden(
                    "Reviewer or Admin role required".to_string(),
                ))
            }
        }))
    }
}
