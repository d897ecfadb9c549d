use std::str::FromStr;

use axum::extract::FromRequestParts;
use http::request::Parts;
use secrecy::ExposeSecret;

use crate::admin::AdminState;
use crate::error::AdminError;

const GATEWAY_SECRET_HEADER: &str = "x-gateway-secret";
const ROLE_HEADER: &str = "x-user-role";

/// Platform role of the authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

/// Caller identity forwarded by the upstream gateway
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub role: Role,
}

impl Caller {
    /// Reject the caller unless their role is one of `allowed`
    pub fn require(self, allowed: &[Role]) -> Result<Self, AdminError> {
        if allowed.contains(&self.role) {
            Ok(self)
        } else {
            Err(AdminError::Forbidden {
                role: self.role.to_string(),
            })
        }
    }
}

impl FromRequestParts<AdminState> for Caller {
    type Rejection = AdminError;

    async fn from_request_parts(parts: &mut Parts, state: &AdminState) -> Result<Self, Self::Rejection> {
        let secret = parts
            .headers
            .get(GATEWAY_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());

        if secret != Some(state.gateway_secret.expose_secret()) {
            return Err(AdminError::Unauthorized);
        }

        let role = parts.headers.get(ROLE_HEADER).and_then(|v| v.to_str().ok());
        let Some(role) = role.and_then(|r| Role::from_str(r.trim()).ok()) else {
            return Err(AdminError::Forbidden {
                role: role.unwrap_or("anonymous").to_owned(),
            });
        };

        Ok(Self { role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!(Role::from_str("admin").unwrap(), Role::Admin);
        assert_eq!(Role::from_str("Instructor").unwrap(), Role::Instructor);
        assert!(Role::from_str("moderator").is_err());
    }

    #[test]
    fn require_checks_membership() {
        let student = Caller { role: Role::Student };
        assert!(student.require(&[Role::Instructor, Role::Admin]).is_err());

        let instructor = Caller { role: Role::Instructor };
        assert!(instructor.require(&[Role::Instructor, Role::Admin]).is_ok());
        assert!(instructor.require(&[Role::Admin]).is_err());
    }
}
