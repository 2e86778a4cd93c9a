use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Role of an authenticated user
///
/// Exactly two roles exist: the single manager (owner) account and
/// self-registered customers. Handlers declare which role they require and
/// the [`authorize`] gate enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owner/management account, fixed credentials
    Manager,

    /// Self-registered customer, identified by email alone
    Customer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Manager => write!(f, "Manager"),
            Role::Customer => write!(f, "Customer"),
        }
    }
}

/// Authenticated session state
///
/// One of these exists per logged-in client, keyed by the session cookie.
/// A request with no stored session is simply not logged in; the role is
/// therefore always present here, never half-set.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// Role granted at login time
    pub role: Role,

    /// Display name shown in the navigation bar
    pub username: String,

    /// Normalized email the session was created for
    pub email: String,
}

struct StoredSession {
    session: Session,
    expires_at: SystemTime,
}

/// Result of running the access-control gate for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Dispatch to the handler body
    Allow,

    /// Do not run the handler; send the client elsewhere with a flash message
    Redirect {
        target: &'static str,
        category: &'static str,
        message: String,
    },
}

// Paths that stay reachable without any session, so the login and
// registration forms themselves are never gated.
const OPEN_PATHS: [&str; 4] = ["/", "/login", "/logout", "/register"];

const DEFAULT_MANAGER_EMAIL: &str = "shahfaisal1234@gmail.com";
const DEFAULT_MANAGER_PASSWORD: &str = "shahg1122@";

/// Display label used for the manager session instead of an email local part.
pub const MANAGER_DISPLAY_NAME: &str = "Owner/Management";

const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

lazy_static! {
    static ref SESSIONS: RwLock<HashMap<String, StoredSession>> = RwLock::new(HashMap::new());

    // Known customer emails, seeded with the accounts that predate
    // self-registration. Grows for the lifetime of the process only.
    static ref CUSTOMER_EMAILS: RwLock<Vec<String>> = RwLock::new(vec![
        "ali.ahmed@example.com".to_string(),
        "fatima.khan@example.com".to_string(),
        "customer@test.com".to_string(),
    ]);

    static ref MANAGER_EMAIL: String = env::var("WATERDESK_MANAGER_EMAIL")
        .unwrap_or_else(|_| DEFAULT_MANAGER_EMAIL.to_string());
    static ref MANAGER_PASSWORD: String = env::var("WATERDESK_MANAGER_PASSWORD")
        .unwrap_or_else(|_| DEFAULT_MANAGER_PASSWORD.to_string());
}

/// Evaluate the access-control gate for one request
///
/// Rules, in order:
/// 1. Paths on the open allowlist always pass, session or not.
/// 2. A handler with no required role only needs a logged-in session;
///    without one the client is sent to the login form.
/// 3. A handler with a required role needs a logged-in session whose role
///    matches; the denial message tells a logged-in user they lack
///    permission and an anonymous user that they must log in, and both are
///    sent to the home page.
///
/// # Arguments
/// * `session` - The stored session for this client, if any
/// * `path` - Request path, checked against the open allowlist
/// * `required_role` - Role the handler declared, if it declared one
///
/// # Returns
/// * `Access` - Either `Allow` or a redirect with a flash message
pub fn authorize(session: Option<&Session>, path: &str, required_role: Option<Role>) -> Access {
    if OPEN_PATHS.contains(&path) {
        return Access::Allow;
    }

    match required_role {
        None => match session {
            Some(_) => Access::Allow,
            None => Access::Redirect {
                target: "/login",
                category: "warning",
                message: "Please log in to access this page.".to_string(),
            },
        },
        Some(required) => match session {
            Some(s) if s.role == required => Access::Allow,
            Some(_) => Access::Redirect {
                target: "/",
                category: "danger",
                message: "Access denied. You do not have permission to view this page."
                    .to_string(),
            },
            None => Access::Redirect {
                target: "/",
                category: "danger",
                message: format!("Access denied. You must be a {} and logged in.", required),
            },
        },
    }
}

/// Authenticate an email/password pair
///
/// The manager matches on the fixed email and password. A known customer
/// matches on email alone, but only when the submitted password is empty.
/// Every other combination fails with one generic message so a caller
/// cannot tell "wrong password" from "not registered".
///
/// # Arguments
/// * `email` - As submitted; lowercased and trimmed here
/// * `password` - As submitted; trimmed here
///
/// # Returns
/// * `Result<Session, String>` - A session to store, or the failure message
pub fn login(email: &str, password: &str) -> Result<Session, String> {
    let email = email.trim().to_lowercase();
    let password = password.trim();

    if email == *MANAGER_EMAIL && password == *MANAGER_PASSWORD {
        log::info!("manager login for {email}");
        return Ok(Session {
            role: Role::Manager,
            username: MANAGER_DISPLAY_NAME.to_string(),
            email,
        });
    }

    let known = CUSTOMER_EMAILS
        .read()
        .map_err(|_| "Login failed. Please try again.".to_string())?
        .contains(&email);

    if known && password.is_empty() {
        log::info!("customer login for {email}");
        return Ok(Session {
            role: Role::Customer,
            username: display_name(&email),
            email,
        });
    }

    Err("Login failed. Please check your Email and Password (if applicable) or Register."
        .to_string())
}

/// Register a new customer email
///
/// Rejects emails already known, whether in the customer list or the
/// manager's own address; keeping the manager out of the customer list is
/// what stops a blank-password login from ever matching the owner account.
/// On success the email is appended and a logged-in customer session is
/// returned immediately, with no verification step.
///
/// # Arguments
/// * `email` - As submitted; lowercased and trimmed here
///
/// # Returns
/// * `Result<Session, String>` - A session to store, or the failure message
pub fn register(email: &str) -> Result<Session, String> {
    let email = email.trim().to_lowercase();

    let mut emails = CUSTOMER_EMAILS
        .write()
        .map_err(|_| "Registration failed. Please try again.".to_string())?;

    if emails.contains(&email) || email == *MANAGER_EMAIL {
        return Err("This email is already registered. Please login instead.".to_string());
    }

    emails.push(email.clone());
    log::info!("registered new customer {email}");

    Ok(Session {
        role: Role::Customer,
        username: display_name(&email),
        email,
    })
}

/// Store a session and hand back its cookie id
pub fn create_session(session: Session) -> String {
    let session_id = Uuid::new_v4().to_string();
    let expires_at = SystemTime::now() + Duration::from_secs(SESSION_DURATION);

    let mut sessions = SESSIONS.write().unwrap();
    sessions.insert(session_id.clone(), StoredSession { session, expires_at });

    session_id
}

/// Look up the session for a cookie id
///
/// # Returns
/// * `Option<Session>` - The session if it exists and has not expired
pub fn session_for(session_id: &str) -> Option<Session> {
    let sessions = SESSIONS.read().unwrap();

    match sessions.get(session_id) {
        Some(stored) if stored.expires_at > SystemTime::now() => Some(stored.session.clone()),
        _ => None,
    }
}

/// Drop the session for a cookie id, if one exists
pub fn destroy_session(session_id: &str) {
    let mut sessions = SESSIONS.write().unwrap();
    sessions.remove(session_id);
}

// Local part of the email, first letter uppercased and the rest lowered,
// matching how the customer-facing pages have always shown names.
fn display_name(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    let mut chars = local.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_session() -> Session {
        Session {
            role: Role::Manager,
            username: MANAGER_DISPLAY_NAME.to_string(),
            email: DEFAULT_MANAGER_EMAIL.to_string(),
        }
    }

    fn customer_session() -> Session {
        Session {
            role: Role::Customer,
            username: "Customer".to_string(),
            email: "customer@test.com".to_string(),
        }
    }

    #[test]
    fn manager_login_succeeds_with_fixed_credentials() {
        let session = login(DEFAULT_MANAGER_EMAIL, DEFAULT_MANAGER_PASSWORD).unwrap();
        assert_eq!(session.role, Role::Manager);
        assert_eq!(session.username, MANAGER_DISPLAY_NAME);
        assert_eq!(session.email, DEFAULT_MANAGER_EMAIL);
    }

    #[test]
    fn manager_email_with_blank_password_is_rejected() {
        // The manager email must never fall through to the blank-password
        // customer branch.
        assert!(login(DEFAULT_MANAGER_EMAIL, "").is_err());
        assert!(
            !CUSTOMER_EMAILS
                .read()
                .unwrap()
                .contains(&DEFAULT_MANAGER_EMAIL.to_string())
        );
    }

    #[test]
    fn manager_login_with_wrong_password_fails() {
        assert!(login(DEFAULT_MANAGER_EMAIL, "nope").is_err());
    }

    #[test]
    fn customer_login_needs_known_email_and_blank_password() {
        let session = login("customer@test.com", "").unwrap();
        assert_eq!(session.role, Role::Customer);
        assert_eq!(session.username, "Customer");

        assert!(login("customer@test.com", "anything").is_err());
        assert!(login("stranger@test.com", "").is_err());
    }

    #[test]
    fn login_normalizes_email_and_password() {
        let session = login("  CUSTOMER@Test.com ", "  ").unwrap();
        assert_eq!(session.email, "customer@test.com");
    }

    #[test]
    fn customer_display_name_is_capitalized_local_part() {
        let session = login("ali.ahmed@example.com", "").unwrap();
        assert_eq!(session.username, "Ali.ahmed");
    }

    #[test]
    fn register_accepts_once_then_rejects() {
        let email = "fresh.register@example.com";

        let session = register(email).unwrap();
        assert_eq!(session.role, Role::Customer);
        assert_eq!(session.username, "Fresh.register");

        let err = register(email).unwrap_err();
        assert!(err.contains("already registered"));

        let count = CUSTOMER_EMAILS
            .read()
            .unwrap()
            .iter()
            .filter(|e| *e == email)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn register_rejects_manager_email() {
        assert!(register(DEFAULT_MANAGER_EMAIL).is_err());
        assert!(
            !CUSTOMER_EMAILS
                .read()
                .unwrap()
                .contains(&DEFAULT_MANAGER_EMAIL.to_string())
        );
    }

    #[test]
    fn registered_customer_can_log_in_with_blank_password() {
        register("roundtrip@example.com").unwrap();
        let session = login("roundtrip@example.com", "").unwrap();
        assert_eq!(session.role, Role::Customer);
    }

    #[test]
    fn open_paths_pass_without_a_session() {
        for path in ["/", "/login", "/logout", "/register"] {
            assert_eq!(authorize(None, path, None), Access::Allow);
            // The allowlist bypass applies to role-gated paths identically.
            assert_eq!(authorize(None, path, Some(Role::Manager)), Access::Allow);
        }
    }

    #[test]
    fn login_gate_redirects_anonymous_to_login() {
        match authorize(None, "/somewhere", None) {
            Access::Redirect {
                target, category, ..
            } => {
                assert_eq!(target, "/login");
                assert_eq!(category, "warning");
            }
            Access::Allow => panic!("anonymous request must not pass"),
        }
    }

    #[test]
    fn login_gate_passes_any_logged_in_session() {
        let session = customer_session();
        assert_eq!(authorize(Some(&session), "/somewhere", None), Access::Allow);
    }

    #[test]
    fn role_gate_allows_only_the_matching_role() {
        let manager = manager_session();
        let customer = customer_session();

        assert_eq!(
            authorize(Some(&manager), "/dashboard", Some(Role::Manager)),
            Access::Allow
        );

        match authorize(Some(&customer), "/dashboard", Some(Role::Manager)) {
            Access::Redirect {
                target, message, ..
            } => {
                assert_eq!(target, "/");
                assert!(message.contains("do not have permission"));
            }
            Access::Allow => panic!("customer must not reach the dashboard"),
        }
    }

    #[test]
    fn role_gate_message_distinguishes_anonymous_from_wrong_role() {
        match authorize(None, "/dashboard", Some(Role::Manager)) {
            Access::Redirect {
                target,
                category,
                message,
            } => {
                assert_eq!(target, "/");
                assert_eq!(category, "danger");
                assert!(message.contains("must be a Manager and logged in"));
            }
            Access::Allow => panic!("anonymous request must not pass the role gate"),
        }
    }

    #[test]
    fn session_store_round_trip_and_destroy() {
        let id = create_session(customer_session());
        assert!(session_for(&id).is_some());

        destroy_session(&id);
        assert!(session_for(&id).is_none());
        // Destroying twice is harmless.
        destroy_session(&id);
    }

    #[test]
    fn unknown_session_id_yields_nothing() {
        assert!(session_for("not-a-session").is_none());
    }
}
