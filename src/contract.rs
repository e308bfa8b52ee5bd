//! §6: Authenticator public contract.
//!
//! The only surface a PAM integrator (or any other external caller) is
//! meant to depend on. Collapses the rich `AuthResult` down to the
//! boolean-plus-diagnostic contract spec.md §6/§7 requires: "no error
//! ever leaves the library across the PAM boundary as anything other
//! than a boolean verdict plus an optional diagnostic string." Mirrors
//! the collapse-to-return-code discipline in `pam-glance/src/lib.rs`,
//! minus the actual PAM binding (out of scope per spec.md §1).

use crate::auth::Authenticator;
use crate::cancel::CancelToken;
use std::time::{Duration, Instant};

/// `authenticate_user(name, deadline) -> { ok, score, reason?, elapsed_ms }`.
#[derive(Debug, Clone)]
pub struct AuthContractResult {
    pub ok: bool,
    pub score: f32,
    pub reason: Option<String>,
    pub elapsed_ms: u64,
}

impl Authenticator {
    /// The public contract entry point. `deadline` bounds the whole call:
    /// it becomes the cancellation token's budget, so a pipeline stage
    /// blocked on an RPC or a challenge tick returns promptly once it
    /// expires, rather than only being compared against afterward
    /// (spec.md §5). The per-stage deadlines inside the pipeline (camera
    /// 5s, RPC 10s) are independent of the caller's deadline — the
    /// effective deadline at each RPC is their minimum.
    pub fn authenticate_user_contract(&self, name: &str, deadline: Duration) -> AuthContractResult {
        let started = Instant::now();
        let cancel = CancelToken::new(deadline);

        let result = self.authenticate_user_ctx(name, &cancel);
        let elapsed = started.elapsed();

        AuthContractResult {
            ok: result.success,
            score: result.confidence,
            reason: result.error,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_shape_matches_spec() {
        // Pure shape/field check; full wiring is exercised by the
        // integration paths in `auth::tests` and the binaries.
        let result = AuthContractResult {
            ok: false,
            score: 0.0,
            reason: Some("no matching user found".to_string()),
            elapsed_ms: 42,
        };
        assert!(!result.ok);
        assert_eq!(result.reason.as_deref(), Some("no matching user found"));
    }
}
