//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::aggregate::ParticipantRole;

/// Validates a backend identifier such as a song or playlist id: 1 to 64 characters, no
/// whitespace or control characters.
///
/// # Examples
///
/// ```ignore
/// validate_identifier("s1")        // Ok
/// validate_identifier("")          // Err - empty
/// validate_identifier("song one")  // Err - whitespace
/// ```
pub fn validate_identifier(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > 64 {
        let mut err = ValidationError::new("identifier_length");
        err.message =
            Some(format!("Identifier must be 1 to 64 characters (got {})", id.len()).into());
        return Err(err);
    }

    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        let mut err = ValidationError::new("identifier_format");
        err.message = Some("Identifier must not contain whitespace".into());
        return Err(err);
    }

    Ok(())
}

/// Rejects roles that cannot be handed out through an invitation.
pub fn validate_invite_role(role: &ParticipantRole) -> Result<(), ValidationError> {
    match role {
        ParticipantRole::Owner | ParticipantRole::Kicked => {
            let mut err = ValidationError::new("invite_role");
            err.message = Some("Role must be admin, playlist_admin or participant".into());
            Err(err)
        }
        _ => Ok(()),
    }
}
