use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};
use crate::state::AppState;

/// Identity is external: the token only carries an opaque subject id and a
/// role tag, and the ledger authorizes by role alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    pub fn require_admin(&self) -> Result<&str> {
        if self.is_admin() {
            Ok(&self.sub)
        } else {
            Err(AppError::Unauthorized)
        }
    }
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = headers
        .get("authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or(AppError::AuthError)?;

    let decoding_key = DecodingKey::from_secret(state.jwt_secret.as_ref());

    let token_data = decode::<Claims>(
        token,
        &decoding_key,
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AppError::AuthError)?;

    // Insert claims into request extensions
    request.extensions_mut().insert(token_data.claims);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: &str) -> Claims {
        Claims {
            sub: "user-1".to_string(),
            role: role.to_string(),
            exp: 4102444800,
        }
    }

    #[test]
    fn admin_role_passes_gate() {
        assert_eq!(claims("admin").require_admin().unwrap(), "user-1");
    }

    #[test]
    fn user_role_is_rejected() {
        assert!(matches!(
            claims("user").require_admin(),
            Err(AppError::Unauthorized)
        ));
    }
}
