use std::sync::Arc;

use axum::extract::State;
use hearst_auth::mint_token;

use crate::state::AppState;

/// GET /auth/: a freshly minted server token, one line of text. Clients
/// use it to build their first session envelope.
pub async fn new_token(State(state): State<Arc<AppState>>) -> String {
    let mut token = mint_token(&state.server_key);
    token.push('\n');
    token
}
