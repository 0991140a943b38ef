//! Caller context and authorization dispatch.
//!
//! An auth function takes zero, one (the caller context) or two (context and target) arguments.
//! Its result is normalized into an [`AuthDecision`]: booleans allow or deny, sequences of
//! booleans collapse with AND, anything constraint-like scopes the caller to matching records.

use crate::error::ResourceException;
use crate::expr::{value_truthy, Callable, EvalError, Term};
use crate::store::Constraint;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;

pub const DEFAULT_SESSION_DURATION_SECS: i64 = 86_400;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Session {
    pub id: String,
    pub user_id: Value,
    pub user_type: Option<String>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, user_id: Value) -> Self {
        Session {
            id: id.into(),
            user_id,
            user_type: None,
            active: true,
            updated_at: Utc::now(),
        }
    }

    pub fn expires(&self, duration: Duration) -> DateTime<Utc> {
        self.updated_at + duration
    }
}

/// Host-provided session store.
pub trait SessionLookup: Send + Sync {
    fn find(&self, session_id: &str) -> Option<Session>;
    /// Marks the session as used now.
    fn touch(&self, session_id: &str);
}

/// Process-local sessions, for tests and single-node demos.
#[derive(Default)]
pub struct MemorySessions {
    sessions: RwLock<BTreeMap<String, Session>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) {
        if let Ok(mut map) = self.sessions.write() {
            map.insert(session.id.clone(), session);
        }
    }
}

impl SessionLookup for MemorySessions {
    fn find(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().ok()?.get(session_id).cloned()
    }

    fn touch(&self, session_id: &str) {
        if let Ok(mut map) = self.sessions.write() {
            if let Some(s) = map.get_mut(session_id) {
                s.updated_at = Utc::now();
            }
        }
    }
}

/// Who is calling, and how.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AuthContext {
    pub caller_id: Option<Value>,
    pub caller_type: Option<String>,
    pub user_type: Option<String>,
    pub session_id: Option<String>,
    pub http_method: String,
    pub params: BTreeMap<String, String>,
}

impl AuthContext {
    pub fn anonymous(http_method: impl Into<String>, params: BTreeMap<String, String>) -> Self {
        AuthContext {
            http_method: http_method.into(),
            params,
            ..Default::default()
        }
    }

    /// Builds the context from an `Authorization: Token <session id>` header value.
    pub fn from_authorization(
        header: Option<&str>,
        http_method: impl Into<String>,
        params: BTreeMap<String, String>,
        sessions: &dyn SessionLookup,
        session_duration: Duration,
    ) -> Result<Self, ResourceException> {
        let mut ctx = AuthContext::anonymous(http_method, params);
        let Some(header) = header else {
            return Ok(ctx);
        };
        let mut parts = header.trim().splitn(2, char::is_whitespace);
        let scheme = parts.next().unwrap_or_default();
        if !scheme.eq_ignore_ascii_case("token") {
            return Err(ResourceException::bad_request(
                "bad_authorization_scheme",
                format!(
                    "The \"{}\" authorization scheme is not supported. Please use an authentication token from /sessions.",
                    scheme
                ),
            ));
        }
        let session_id = parts.next().unwrap_or_default().trim();
        let session = sessions
            .find(session_id)
            .filter(|s| s.active)
            .ok_or_else(|| {
                ResourceException::bad_request(
                    "bad_access_token",
                    "The access token in the Authorization header is invalid or expired.",
                )
            })?;
        if session.expires(session_duration) < Utc::now() {
            return Err(ResourceException::new(
                401,
                "expired_access_token",
                "The access token in the Authorization header has expired.",
            ));
        }
        sessions.touch(session_id);
        tracing::debug!(session = %session.id, "authenticated caller");
        ctx.caller_id = Some(session.user_id);
        ctx.caller_type = Some("user".into());
        ctx.user_type = session.user_type;
        ctx.session_id = Some(session.id);
        Ok(ctx)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// The context as seen by auth functions (`ctx.caller_id`, `ctx.params`, ...).
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AuthDecision {
    Allow,
    Deny,
    /// Caller may act only on records matching every constraint.
    Constrain(Vec<Constraint>),
}

impl AuthDecision {
    pub fn is_denied(&self) -> bool {
        matches!(self, AuthDecision::Deny)
    }
}

fn sequence_decision(items: Vec<Term>) -> AuthDecision {
    let booleans: Option<Vec<bool>> = items
        .iter()
        .map(|t| match t {
            Term::Data(Value::Bool(b)) => Some(*b),
            _ => None,
        })
        .collect();
    if let Some(bs) = booleans {
        return if bs.into_iter().all(|b| b) {
            AuthDecision::Allow
        } else {
            AuthDecision::Deny
        };
    }
    let constraints = items
        .into_iter()
        .map(|t| match t {
            Term::Constraint(c) => c,
            other => Constraint::Const(other.truthy()),
        })
        .collect();
    AuthDecision::Constrain(constraints)
}

/// Normalizes an auth function result.
pub fn decide(result: Term) -> AuthDecision {
    match result {
        Term::Data(Value::Bool(true)) => AuthDecision::Allow,
        Term::Data(Value::Bool(false)) => AuthDecision::Deny,
        Term::Tuple(items) => sequence_decision(items),
        Term::Data(Value::Array(items)) => sequence_decision(items.into_iter().map(Term::Data).collect()),
        Term::Constraint(Constraint::Const(false)) => AuthDecision::Deny,
        Term::Constraint(c) => AuthDecision::Constrain(vec![c]),
        Term::Data(v) if !value_truthy(&v) => AuthDecision::Deny,
        other => {
            tracing::warn!(result = ?other, "auth function returned a non-boolean value");
            AuthDecision::Allow
        }
    }
}

/// Invokes `auth` with as many arguments as it declares. No auth function always allows; a
/// failing auth function denies, except that a [`ResourceException`] it raises propagates.
pub fn check(auth: Option<&Callable>, ctx: &AuthContext, target: Option<Term>) -> Result<AuthDecision, ResourceException> {
    let Some(auth) = auth else {
        return Ok(AuthDecision::Allow);
    };
    let ctx_term = Term::Data(ctx.to_value());
    let target = target.unwrap_or(Term::Data(Value::Null));
    let args = match auth.arity() {
        Some(0) => vec![],
        Some(1) => vec![ctx_term],
        _ => vec![ctx_term, target],
    };
    match auth.call_positional(&args) {
        Ok(result) => Ok(decide(result)),
        Err(EvalError::Raised(e)) => Err(e),
        Err(e) => {
            tracing::warn!(auth = %auth.name(), error = %e, "auth function failed, denying");
            Ok(AuthDecision::Deny)
        }
    }
}

/// Turns a deny into `403 unauthorized_caller`; otherwise returns the constraints to fold in.
pub fn require(decision: AuthDecision) -> Result<Vec<Constraint>, ResourceException> {
    match decision {
        AuthDecision::Allow => Ok(Vec::new()),
        AuthDecision::Deny => Err(ResourceException::unauthorized_caller()),
        AuthDecision::Constrain(cs) => Ok(cs),
    }
}
