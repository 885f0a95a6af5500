use garde::Validate;

use crate::error::{AppError, Result};

/// Validates a username: 3 to 255 characters of letters, digits, `_` or `-`.
pub fn validate_username(username: &str, _ctx: &()) -> garde::Result {
    if username.len() < 3 {
        return Err(garde::Error::new("Username must be at least 3 characters long"));
    }

    if username.len() > 255 {
        return Err(garde::Error::new("Username must be at most 255 characters"));
    }

    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(garde::Error::new(
            "Username can only contain letters, numbers, underscores, and hyphens",
        ));
    }

    Ok(())
}

/// Validates a new password: 8 to 128 characters with at least one upper-case
/// letter, one lower-case letter and one digit.
pub fn validate_password(password: &str, _ctx: &()) -> garde::Result {
    if password.len() < 8 {
        return Err(garde::Error::new("Password must be at least 8 characters long"));
    }

    if password.len() > 128 {
        return Err(garde::Error::new("Password must be at most 128 characters"));
    }

    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_upper && has_lower && has_digit) {
        return Err(garde::Error::new(
            "Password must contain at least 1 uppercase letter, 1 lowercase letter, and 1 number",
        ));
    }

    Ok(())
}

/// Runs the `garde` rules of a request body and maps failures to a 400.
pub fn validate_request<T>(request: &T) -> Result<()>
where
    T: Validate<Context = ()>,
{
    request
        .validate()
        .map_err(|report| AppError::Validation(report.to_string().trim().to_string()))
}
