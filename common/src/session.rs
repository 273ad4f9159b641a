//! Single shared-secret session gate for the web surface.
//!
//! There is exactly one session concept for the whole device: one fixed
//! account name, one configured password, one global authenticated flag, and
//! a fixed-value cookie marker rather than a per-login secret.

pub const SESSION_USER: &str = "admin";
pub const SESSION_COOKIE_NAME: &str = "HPSESSIONID";
pub const SESSION_MARKER: &str = "HPSESSIONID=1";
pub const SESSION_MARKER_CLEARED: &str = "HPSESSIONID=0";

const REJECT_MESSAGE: &str = "Wrong username/password! Try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The client should carry this Set-Cookie value on future requests.
    Granted { set_cookie: &'static str },
    /// Deliberately generic: never distinguishes unknown user from wrong
    /// password, and there is no attempt counting or lockout.
    Rejected { message: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    RedirectToLogin,
}

#[derive(Debug)]
pub struct SessionGate {
    password: String,
    authenticated: bool,
}

impl SessionGate {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            authenticated: false,
        }
    }

    /// No configured password means the gate is open and login is moot.
    pub fn password_configured(&self) -> bool {
        !self.password.is_empty()
    }

    pub fn login(&mut self, user: &str, password: &str) -> LoginOutcome {
        if user == SESSION_USER && password == self.password {
            self.authenticated = true;
            LoginOutcome::Granted {
                set_cookie: SESSION_MARKER,
            }
        } else {
            LoginOutcome::Rejected {
                message: REJECT_MESSAGE,
            }
        }
    }

    /// Invalidates the shared session; the returned cookie value clears the
    /// marker on the client.
    pub fn logout(&mut self) -> &'static str {
        self.authenticated = false;
        SESSION_MARKER_CLEARED
    }

    /// Gate for every mutating operation. Performs no side effects; the
    /// caller short-circuits with a login redirect on denial.
    pub fn require_authenticated(&self, cookie_header: Option<&str>) -> AccessDecision {
        if !self.password_configured() {
            return AccessDecision::Allowed;
        }
        let marker_presented = cookie_header
            .map(|cookie| cookie.contains(SESSION_MARKER))
            .unwrap_or(false);
        if self.authenticated && marker_presented {
            AccessDecision::Allowed
        } else {
            AccessDecision::RedirectToLogin
        }
    }
}
