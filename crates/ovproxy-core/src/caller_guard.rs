//! Caller admission for inbound calls from the overview service.
//!
//! Every inbound call carries the user id of the calling process. Calls are
//! admitted only while a connection is bound to that same user; anything else
//! is a stale or cross-user call racing a user switch.

use std::fmt;

use crate::types::UserId;

/// Result of a caller check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Admitted,
    Rejected(CallerRejection),
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Why an inbound call was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerRejection {
    pub caller: UserId,
    /// User the connection is bound to, `None` when nothing is bound.
    pub bound: Option<UserId>,
    /// Name of the inbound method being guarded.
    pub method: &'static str,
}

impl fmt::Display for CallerRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bound {
            Some(bound) => write!(
                f,
                "overview service called with invalid user: {}, bound={bound}, method={}",
                self.caller, self.method
            ),
            None => write!(
                f,
                "overview service called with invalid user: {}, nothing bound, method={}",
                self.caller, self.method
            ),
        }
    }
}

/// Tracks which user the live connection belongs to.
#[derive(Debug, Clone, Default)]
pub struct CallerGuard {
    bound_user: Option<UserId>,
}

impl CallerGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the user a fresh connection is bound to.
    pub fn bind(&mut self, user: UserId) {
        self.bound_user = Some(user);
    }

    /// Forget the bound user. All calls are rejected until the next `bind`.
    pub fn clear(&mut self) {
        self.bound_user = None;
    }

    pub fn bound_user(&self) -> Option<UserId> {
        self.bound_user
    }

    /// Admit `caller` only if it matches the bound user.
    pub fn verify(&self, caller: UserId, method: &'static str) -> Verdict {
        match self.bound_user {
            Some(bound) if bound == caller => Verdict::Admitted,
            bound => Verdict::Rejected(CallerRejection {
                caller,
                bound,
                method,
            }),
        }
    }
}
