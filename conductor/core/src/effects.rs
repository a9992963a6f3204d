//! Session Effects
//!
//! Side effects the Conductor triggers outside the chat itself. Today that is
//! only the login redirect after the remote service rejects our credentials.

/// Reaction to an expired or missing session
pub trait AuthEffects: Send + Sync {
    /// Send the user back to the login flow
    ///
    /// Called exactly once for each chat task that terminates with an
    /// authorization error.
    fn redirect_to_login(&self);
}

/// Default effects: only logs the redirect
#[derive(Clone, Copy, Debug, Default)]
pub struct LogOnlyAuthEffects;

impl AuthEffects for LogOnlyAuthEffects {
    fn redirect_to_login(&self) {
        tracing::warn!("Session is no longer authorized; sign in again to continue");
    }
}
