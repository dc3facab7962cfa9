//! Role name constants shared between the auth layer and handlers.

/// Administrators see and manage every job regardless of owner.
pub const ROLE_ADMIN: &str = "admin";

/// Regular users see only jobs they own.
pub const ROLE_USER: &str = "user";

/// The transformation runner's callback identity. May hit the
/// `PUT /jobs/{id}` progress endpoint but is not an end user.
pub const ROLE_RUNNER: &str = "runner";
