use serde::{Deserialize, Serialize};

use super::repo::GuardianLink;

/// Request body for inviting a guardian.
#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub email: String,
}

/// Invitation as returned to the inviting subject; the only place the token is shown.
#[derive(Debug, Serialize)]
pub struct InvitationResponse {
    #[serde(flatten)]
    pub link: GuardianLink,
    pub invitation_token: String,
}
