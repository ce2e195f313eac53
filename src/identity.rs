//! Peer identity derivation
//!
//! The admin registers under the session code itself, so the applicant can
//! reach it without any extra lookup. The applicant registers under its own
//! applicant id. Derivation is pure: nothing here talks to the rendezvous
//! service.

use serde::{Deserialize, Serialize};

/// Which side of the verification call this page instance plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Applicant,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Applicant => "applicant",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque inputs supplied by whatever routes the user to the session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryParams {
    pub admin: bool,
    pub applicant_id: String,
    pub ekyc_code: String,
}

impl EntryParams {
    pub fn admin(ekyc_code: impl Into<String>, applicant_id: impl Into<String>) -> Self {
        Self {
            admin: true,
            applicant_id: applicant_id.into(),
            ekyc_code: ekyc_code.into(),
        }
    }

    pub fn applicant(applicant_id: impl Into<String>, ekyc_code: impl Into<String>) -> Self {
        Self {
            admin: false,
            applicant_id: applicant_id.into(),
            ekyc_code: ekyc_code.into(),
        }
    }

    pub fn role(&self) -> Role {
        if self.admin {
            Role::Admin
        } else {
            Role::Applicant
        }
    }
}

/// Derive the rendezvous identifier for a role.
///
/// Returns an empty string when the role-specific input is empty; callers
/// must not register with an empty id.
pub fn resolve_peer_id(role: Role, session_code: &str, applicant_id: &str) -> String {
    match role {
        Role::Admin => session_code.to_string(),
        Role::Applicant => applicant_id.to_string(),
    }
}

/// Metadata attached to every uploaded artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub applicant_id: String,
    pub ekyc_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub role: Role,
    pub session_code: String,
    pub applicant_id: String,
    /// Empty until resolved or assigned
    pub local_peer_id: String,
}

impl SessionIdentity {
    pub fn resolve(params: &EntryParams) -> Self {
        let role = params.role();
        let local_peer_id = resolve_peer_id(role, &params.ekyc_code, &params.applicant_id);
        log::debug!(
            "Resolved {} identity for session {:?}: peer id {:?}",
            role,
            params.ekyc_code,
            local_peer_id
        );
        Self {
            role,
            session_code: params.ekyc_code.clone(),
            applicant_id: params.applicant_id.clone(),
            local_peer_id,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.local_peer_id.is_empty()
    }

    /// The id to request from the rendezvous service.
    ///
    /// `Some("")` never escapes: an unresolved applicant asks for an assigned
    /// id when `allow_assigned` is set, everyone else gets `None` back and
    /// must not register.
    pub fn registration_request(&self, allow_assigned: bool) -> Option<RegistrationRequest> {
        if self.is_resolved() {
            Some(RegistrationRequest::Exact(self.local_peer_id.clone()))
        } else if self.role == Role::Applicant && allow_assigned {
            Some(RegistrationRequest::Assigned)
        } else {
            None
        }
    }

    /// Record the id the rendezvous service confirmed.
    pub fn confirm(&mut self, peer_id: impl Into<String>) {
        self.local_peer_id = peer_id.into();
    }

    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            applicant_id: self.applicant_id.clone(),
            ekyc_code: self.session_code.clone(),
        }
    }
}

/// How a registration asks for its identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationRequest {
    Exact(String),
    Assigned,
}

impl RegistrationRequest {
    pub fn requested_id(&self) -> Option<&str> {
        match self {
            RegistrationRequest::Exact(id) => Some(id),
            RegistrationRequest::Assigned => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_uses_session_code() {
        let identity = SessionIdentity::resolve(&EntryParams::admin("SESSION42", "APP7"));
        assert_eq!(identity.role, Role::Admin);
        assert_eq!(identity.local_peer_id, "SESSION42");
    }

    #[test]
    fn test_applicant_uses_applicant_id() {
        let identity = SessionIdentity::resolve(&EntryParams::applicant("APP7", "SESSION42"));
        assert_eq!(identity.role, Role::Applicant);
        assert_eq!(identity.local_peer_id, "APP7");
        assert_eq!(
            identity.metadata(),
            SessionMetadata {
                applicant_id: "APP7".to_string(),
                ekyc_code: "SESSION42".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_inputs_leave_identity_unresolved() {
        let admin = SessionIdentity::resolve(&EntryParams::admin("", "APP7"));
        assert!(!admin.is_resolved());
        assert_eq!(admin.registration_request(true), None);

        let applicant = SessionIdentity::resolve(&EntryParams::applicant("", "SESSION42"));
        assert!(!applicant.is_resolved());
        assert_eq!(applicant.registration_request(false), None);
        assert_eq!(
            applicant.registration_request(true),
            Some(RegistrationRequest::Assigned)
        );
    }

    #[test]
    fn test_entry_params_deserialize_from_page_names() {
        let params: EntryParams = serde_json::from_str(
            r#"{"admin": true, "applicantId": "A1", "ekycCode": "E1"}"#,
        )
        .unwrap();
        assert_eq!(params.role(), Role::Admin);
        assert_eq!(params.applicant_id, "A1");
        assert_eq!(params.ekyc_code, "E1");
    }
}
