/// Scope granted by authorization codes unless the client asks for another.
pub const USER_READ: &str = "USER_READ";

/// Privileged scope guarding the `adminSecrets` query field and `/admin/flag`.
pub const ADMIN_SECRETS: &str = "ADMIN_SECRETS";

/// Whether a space-delimited scope string contains `wanted` as a whole token.
pub fn has_scope(scope: &str, wanted: &str) -> bool {
    scope.split_whitespace().any(|s| s == wanted)
}
