use axum::{
    Form, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use handlebars::{Context, Handlebars, Helper, HelperResult, Output, RenderContext};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::auth::{self, Access, Role, Session};
use crate::dashboard::{self, DashboardContext};
use crate::records::{self, RecordSourceError, SheetsClient};

const SESSION_COOKIE: &str = "session";
const FLASH_COOKIE: &str = "flash";

pub struct AppState {
    handlebars: Handlebars<'static>,
}

/// One-shot message shown on the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flash {
    /// One of success/info/warning/danger, styling only
    pub category: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ContactForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub message: String,
}

/// Start the web application
///
/// Initializes logging, latches the record-source client (available or
/// permanently failed), registers the templates, and serves until killed.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    records::init_client();

    let mut handlebars = Handlebars::new();
    handlebars.register_templates_directory(".hbs", "templates")?;
    handlebars.register_helper("currency", Box::new(currency_helper));

    let state = Arc::new(AppState { handlebars });

    let app = Router::new()
        .route("/", get(index))
        .route("/login", get(login_page).post(handle_login))
        .route("/register", get(register_page).post(handle_register))
        .route("/logout", get(handle_logout))
        .route("/orders", get(orders))
        .route("/contact", get(contact_page).post(handle_contact))
        .route("/dashboard", get(dashboard_page))
        .route("/inventory", get(inventory))
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state);

    let addr = env::var("WATERDESK_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let listener = TcpListener::bind(&addr).await?;
    log::info!("listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Session / flash plumbing

fn current_session(jar: &CookieJar) -> Option<Session> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| auth::session_for(cookie.value()))
}

fn session_cookie(session_id: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, session_id);
    cookie.set_path("/");
    cookie
}

fn flash_cookie(category: &str, message: &str) -> Cookie<'static> {
    let value = format!("{category}:{}", urlencoding::encode(message));
    let mut cookie = Cookie::new(FLASH_COOKIE, value);
    cookie.set_path("/");
    cookie
}

fn decode_flash(value: &str) -> Option<Flash> {
    let (category, encoded) = value.split_once(':')?;
    let message = urlencoding::decode(encoded).ok()?.into_owned();
    Some(Flash {
        category: category.to_string(),
        message,
    })
}

// Pull the pending flash, if any, and clear its cookie in the same response.
fn take_flash(jar: CookieJar) -> (CookieJar, Option<Flash>) {
    let flash = jar
        .get(FLASH_COOKIE)
        .and_then(|cookie| decode_flash(cookie.value()));

    if flash.is_some() {
        let mut removal = Cookie::new(FLASH_COOKIE, "");
        removal.set_path("/");
        (jar.remove(removal), flash)
    } else {
        (jar, flash)
    }
}

fn redirect_with_flash(jar: CookieJar, target: &str, category: &str, message: &str) -> Response {
    (jar.add(flash_cookie(category, message)), Redirect::to(target)).into_response()
}

/// Run the access-control gate before a handler body
///
/// Returns the session for rendering on `Allow`, or the finished redirect
/// response on denial.
fn gate(
    jar: &CookieJar,
    path: &'static str,
    required_role: Option<Role>,
) -> Result<Option<Session>, Response> {
    let session = current_session(jar);
    match auth::authorize(session.as_ref(), path, required_role) {
        Access::Allow => Ok(session),
        Access::Redirect {
            target,
            category,
            message,
        } => Err(redirect_with_flash(jar.clone(), target, category, &message)),
    }
}

// ---------------------------------------------------------------------------
// Rendering

fn page_context(session: Option<&Session>, flash: Option<&Flash>) -> serde_json::Map<String, Value> {
    let mut context = serde_json::Map::new();
    if let Some(session) = session {
        context.insert(
            "session".to_string(),
            serde_json::to_value(session).unwrap_or(Value::Null),
        );
    }
    if let Some(flash) = flash {
        context.insert(
            "flash".to_string(),
            serde_json::to_value(flash).unwrap_or(Value::Null),
        );
    }
    context
}

fn render(state: &AppState, template: &str, context: Value) -> Response {
    match state.handlebars.render(template, &context) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            log::error!("failed to render template {template}: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "template rendering failed").into_response()
        }
    }
}

// Thousands separators for anything that parses as a number; everything
// else passes through untouched.
fn format_currency(value: &Value) -> String {
    let text = match value {
        Value::Null => return String::new(),
        Value::String(s) if s.is_empty() => return String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    match text.trim().parse::<f64>() {
        Ok(number) => group_thousands(number as i64),
        Err(_) => text,
    }
}

fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::new();

    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if n < 0 { format!("-{grouped}") } else { grouped }
}

fn currency_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value = h.param(0).map(|p| p.value().clone()).unwrap_or(Value::Null);
    out.write(&format_currency(&value))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers

// The storefront product listing is fixed; ordering happens offline.
fn product_listing() -> Value {
    json!([
        { "name": "Nestlé Water Pure Life", "size": "500 ml", "price": 50 },
        { "name": "Nestlé Water Pure Life", "size": "1500 ml", "price": 120 },
        { "name": "Nestlé Water Pure Life", "size": "5 Litre", "price": 300 },
        { "name": "Nestlé Water Pure Life", "size": "19 Litre", "price": 700 },
    ])
}

async fn index(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = current_session(&jar);
    let (jar, flash) = take_flash(jar);

    let mut context = page_context(session.as_ref(), flash.as_ref());
    context.insert("products".to_string(), product_listing());

    (jar, render(&state, "index", Value::Object(context))).into_response()
}

async fn login_page(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = current_session(&jar);
    let (jar, flash) = take_flash(jar);
    let context = page_context(session.as_ref(), flash.as_ref());

    (jar, render(&state, "login", Value::Object(context))).into_response()
}

async fn handle_login(jar: CookieJar, Form(form): Form<LoginForm>) -> Response {
    match auth::login(&form.email, &form.password) {
        Ok(session) => {
            let (target, message) = match session.role {
                Role::Manager => (
                    "/dashboard",
                    "Logged in as Owner (Manager). Full Access granted.",
                ),
                Role::Customer => ("/orders", "Logged in as Customer."),
            };

            let session_id = auth::create_session(session);
            let jar = jar
                .add(session_cookie(session_id))
                .add(flash_cookie("success", message));
            (jar, Redirect::to(target)).into_response()
        }
        Err(message) => redirect_with_flash(jar, "/login", "danger", &message),
    }
}

async fn register_page(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = current_session(&jar);
    let (jar, flash) = take_flash(jar);
    let context = page_context(session.as_ref(), flash.as_ref());

    (jar, render(&state, "register", Value::Object(context))).into_response()
}

async fn handle_register(jar: CookieJar, Form(form): Form<RegisterForm>) -> Response {
    match auth::register(&form.email) {
        Ok(session) => {
            let message = format!(
                "Registration successful! Welcome, {}. You are now logged in.",
                session.username
            );

            let session_id = auth::create_session(session);
            let jar = jar
                .add(session_cookie(session_id))
                .add(flash_cookie("success", &message));
            (jar, Redirect::to("/orders")).into_response()
        }
        // Duplicate registration; point the client at the login form.
        Err(message) => redirect_with_flash(jar, "/login", "warning", &message),
    }
}

async fn handle_logout(jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        auth::destroy_session(cookie.value());
    }

    let mut cleared = Cookie::new(SESSION_COOKIE, "");
    cleared.set_path("/");
    let jar = jar.remove(cleared);

    redirect_with_flash(jar, "/", "info", "You have been logged out.")
}

async fn orders(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = match gate(&jar, "/orders", Some(Role::Customer)) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let (jar, flash) = take_flash(jar);

    // Placeholder rows until order capture moves into the spreadsheet.
    let user_orders = json!([
        { "id": 101, "date": "2025-11-20", "product": "5L Jar", "quantity": 5, "status": "Delivered", "total": 1500 },
        { "id": 102, "date": "2025-12-01", "product": "500ml Pack", "quantity": 10, "status": "Shipped", "total": 5000 },
        { "id": 103, "date": "2025-12-10", "product": "19L Bottle", "quantity": 2, "status": "Pending", "total": 1400 },
    ]);

    let mut context = page_context(session.as_ref(), flash.as_ref());
    context.insert("orders".to_string(), user_orders);

    (jar, render(&state, "orders", Value::Object(context))).into_response()
}

async fn contact_page(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = match gate(&jar, "/contact", Some(Role::Customer)) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let (jar, flash) = take_flash(jar);
    let context = page_context(session.as_ref(), flash.as_ref());

    (jar, render(&state, "contact", Value::Object(context))).into_response()
}

async fn handle_contact(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<ContactForm>,
) -> Response {
    let session = match gate(&jar, "/contact", Some(Role::Customer)) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let (jar, flash) = take_flash(jar);

    // Echo only; messages are not persisted anywhere.
    log::info!("contact form from {} <{}>", form.name, form.email);

    let mut context = page_context(session.as_ref(), flash.as_ref());
    context.insert(
        "success_message".to_string(),
        json!("Thank you! Your message has been received."),
    );

    (jar, render(&state, "contact", Value::Object(context))).into_response()
}

async fn dashboard_page(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = match gate(&jar, "/dashboard", Some(Role::Manager)) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let (jar, flash) = take_flash(jar);

    let metrics = match records::client() {
        Ok(client) => match fetch_dashboard(client).await {
            Ok(metrics) => metrics,
            Err(e) => {
                log::warn!("dashboard fetch failed: {e}");
                DashboardContext::failed(format!(
                    "Sorry, could not fetch dashboard data. Error: {e}"
                ))
            }
        },
        Err(e) => DashboardContext::failed(e.to_string()),
    };

    let mut context = page_context(session.as_ref(), flash.as_ref());
    if let Ok(Value::Object(fields)) = serde_json::to_value(&metrics) {
        context.extend(fields);
    }

    (jar, render(&state, "dashboard", Value::Object(context))).into_response()
}

// All four tables or nothing: one failed read renders the whole dashboard
// in its error state rather than mixing real and default metrics.
async fn fetch_dashboard(client: &SheetsClient) -> Result<DashboardContext, RecordSourceError> {
    let pnl = client.worksheet_records(records::SHEET_PNL).await?;
    let stock = client.worksheet_records(records::SHEET_STOCK).await?;
    let orders = client.worksheet_records(records::SHEET_CUSTOMER_ORDER).await?;
    let dispatch = client.worksheet_records(records::SHEET_DISPATCH).await?;

    Ok(dashboard::aggregate(&pnl, &stock, &orders, &dispatch))
}

async fn inventory(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = match gate(&jar, "/inventory", Some(Role::Manager)) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let (jar, flash) = take_flash(jar);

    let fetched = match records::client() {
        Ok(client) => client.worksheet_records(records::SHEET_STOCK).await,
        Err(e) => Err(e),
    };

    let (sheet_data, error_message) = match fetched {
        Ok(rows) => (
            serde_json::to_value(rows).unwrap_or(Value::Null),
            Value::Null,
        ),
        Err(RecordSourceError::ConnectionUnavailable) => (
            Value::Null,
            json!(RecordSourceError::ConnectionUnavailable.to_string()),
        ),
        Err(e) => {
            log::warn!("inventory fetch failed: {e}");
            (
                Value::Null,
                json!(format!(
                    "Sorry, could not fetch the inventory data right now. Error: {e}"
                )),
            )
        }
    };

    let mut context = page_context(session.as_ref(), flash.as_ref());
    context.insert("sheet_data".to_string(), sheet_data);
    context.insert("error_message".to_string(), error_message);

    (jar, render(&state, "inventory", Value::Object(context))).into_response()
}
