use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::NaiveDateTime;
use tower::ServiceExt;

use studiobook::clock::FixedClock;
use studiobook::config::AppConfig;
use studiobook::db;
use studiobook::handlers;
use studiobook::models::Booking;
use studiobook::services::calendar::CalendarSync;
use studiobook::services::notify::{Notifier, NotifyEvent};
use studiobook::state::AppState;

// ── Mock collaborators ──

struct RecordingNotifier {
    events: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, event: NotifyEvent, payload: serde_json::Value) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((event.as_str().to_string(), payload));
        Ok(())
    }
}

struct RecordingCalendar {
    created: Arc<Mutex<Vec<String>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl CalendarSync for RecordingCalendar {
    async fn create_event(&self, booking: &Booking) -> anyhow::Result<Option<String>> {
        self.created.lock().unwrap().push(booking.id.clone());
        Ok(Some(format!("evt-{}", booking.id)))
    }

    async fn delete_event(&self, booking: &Booking) -> anyhow::Result<()> {
        self.deleted.lock().unwrap().push(booking.id.clone());
        Ok(())
    }
}

// ── Harness ──

const BASE_TIME: &str = "2025-06-01 08:00";

fn dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: "test-token".to_string(),
        studio_name: "Test Studio".to_string(),
        calendar_webhook_url: String::new(),
        notify_webhook_url: String::new(),
        notify_webhook_token: String::new(),
        max_advance_days: 60,
        slot_minutes: 60,
        sweep_interval_secs: 300,
    }
}

struct TestApp {
    state: Arc<AppState>,
    clock: Arc<FixedClock>,
    notified: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    cal_created: Arc<Mutex<Vec<String>>>,
    cal_deleted: Arc<Mutex<Vec<String>>>,
}

impl TestApp {
    fn new() -> Self {
        let conn = db::init_db(":memory:").unwrap();
        let clock = Arc::new(FixedClock::new(dt(BASE_TIME)));
        let notified = Arc::new(Mutex::new(vec![]));
        let cal_created = Arc::new(Mutex::new(vec![]));
        let cal_deleted = Arc::new(Mutex::new(vec![]));

        let state = Arc::new(AppState {
            db: Arc::new(Mutex::new(conn)),
            config: test_config(),
            calendar: Box::new(RecordingCalendar {
                created: Arc::clone(&cal_created),
                deleted: Arc::clone(&cal_deleted),
            }),
            notifier: Box::new(RecordingNotifier {
                events: Arc::clone(&notified),
            }),
            clock: Box::new(Arc::clone(&clock)),
        });

        Self {
            state,
            clock,
            notified,
            cal_created,
            cal_deleted,
        }
    }

    fn router(&self) -> Router {
        handlers::router(Arc::clone(&self.state))
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        auth: bool,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if auth {
            builder = builder.header("authorization", "Bearer test-token");
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, value)
    }

    async fn create_customer(&self, name: &str) -> String {
        let (status, body) = self
            .send(
                "POST",
                "/api/customers",
                true,
                Some(serde_json::json!({ "name": name })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "create customer failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }

    async fn create_package(
        &self,
        customer_id: &str,
        session_type: &str,
        total: i64,
        valid_from: &str,
        valid_to: &str,
    ) -> String {
        let (status, body) = self
            .send(
                "POST",
                "/api/packages",
                true,
                Some(serde_json::json!({
                    "customer_id": customer_id,
                    "session_type": session_type,
                    "total_sessions": total,
                    "valid_from": valid_from,
                    "valid_to": valid_to,
                    "price_cents": 48_000,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "create package failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }

    async fn request_booking(
        &self,
        customer_id: &str,
        teacher_id: &str,
        package_id: Option<&str>,
        session_type: &str,
        start: &str,
        end: &str,
    ) -> (StatusCode, serde_json::Value) {
        self.send(
            "POST",
            "/api/bookings",
            false,
            Some(serde_json::json!({
                "customer_id": customer_id,
                "teacher_id": teacher_id,
                "package_id": package_id,
                "session_type": session_type,
                "start_time": start,
                "end_time": end,
            })),
        )
        .await
    }

    /// Request + confirm, asserting both succeed. Returns the booking id.
    async fn book_confirmed(
        &self,
        customer_id: &str,
        teacher_id: &str,
        package_id: Option<&str>,
        session_type: &str,
        start: &str,
        end: &str,
    ) -> String {
        let (status, body) = self
            .request_booking(customer_id, teacher_id, package_id, session_type, start, end)
            .await;
        assert_eq!(status, StatusCode::OK, "booking request failed: {body}");
        let id = body["id"].as_str().unwrap().to_string();

        let (status, body) = self
            .send("POST", &format!("/api/bookings/{id}/confirm"), true, None)
            .await;
        assert_eq!(status, StatusCode::OK, "confirm failed: {body}");
        id
    }

    async fn get_package(&self, id: &str) -> serde_json::Value {
        let (status, body) = self
            .send("GET", &format!("/api/packages/{id}"), true, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    async fn get_booking(&self, id: &str) -> serde_json::Value {
        let (status, body) = self
            .send("GET", &format!("/api/bookings/{id}"), false, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    fn notified_events(&self) -> Vec<String> {
        self.notified
            .lock()
            .unwrap()
            .iter()
            .map(|(e, _)| e.clone())
            .collect()
    }
}

// ── Basics ──

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.send("GET", "/health", false, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_admin_requires_token() {
    let app = TestApp::new();
    let (status, _) = app.send("GET", "/api/admin/status", false, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send("POST", "/api/bookings/some-id/confirm", false, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ── Validation & advance window ──

#[tokio::test]
async fn test_rejects_inverted_interval() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;

    let (status, _) = app
        .request_booking(
            &customer,
            "teacher-a",
            None,
            "private",
            "2025-06-02 11:00",
            "2025-06-02 10:00",
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rejects_unknown_session_type() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;

    let (status, _) = app
        .request_booking(
            &customer,
            "teacher-a",
            None,
            "semi-private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rejects_booking_in_the_past() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;

    let (status, body) = app
        .request_booking(
            &customer,
            "teacher-a",
            None,
            "private",
            "2025-05-30 10:00",
            "2025-05-30 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
}

#[tokio::test]
async fn test_rejects_booking_beyond_advance_window() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;

    // 60-day window from 2025-06-01 ends 2025-07-31
    let (status, body) = app
        .request_booking(
            &customer,
            "teacher-a",
            None,
            "private",
            "2025-08-15 10:00",
            "2025-08-15 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("60 days"));
}

// ── Package guards ──

#[tokio::test]
async fn test_package_must_belong_to_customer() {
    let app = TestApp::new();
    let owner = app.create_customer("Aiko").await;
    let other = app.create_customer("Ben").await;
    let pkg = app
        .create_package(&owner, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    let (status, body) = app
        .request_booking(
            &other,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("different customer"));
}

#[tokio::test]
async fn test_package_must_cover_session_type() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    let (status, _) = app
        .request_booking(
            &customer,
            "teacher-a",
            Some(&pkg),
            "duo",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_expired_package_is_inactive() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-06-05 00:00")
        .await;

    app.clock.set(dt("2025-06-06 09:00"));

    let (status, body) = app
        .request_booking(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-06-07 10:00",
            "2025-06-07 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("not active"));
}

#[tokio::test]
async fn test_booking_outside_validity_period() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-07-01 00:00")
        .await;

    let (status, body) = app
        .request_booking(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-07-10 10:00",
            "2025-07-10 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("validity period"));
}

#[tokio::test]
async fn test_depleted_package_rejects_new_request() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 1, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    app.book_confirmed(
        &customer,
        "teacher-a",
        Some(&pkg),
        "private",
        "2025-06-02 10:00",
        "2025-06-02 11:00",
    )
    .await;

    // The single session is reserved by the upcoming booking
    let (status, body) = app
        .request_booking(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-06-03 10:00",
            "2025-06-03 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("no sessions left"));
}

// ── Scenario A: ledger three-way split ──

#[tokio::test]
async fn test_ledger_split_after_three_confirmations() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    for day in ["2025-06-02", "2025-06-03", "2025-06-04"] {
        app.book_confirmed(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            &format!("{day} 10:00"),
            &format!("{day} 11:00"),
        )
        .await;
    }

    let body = app.get_package(&pkg).await;
    assert_eq!(body["remaining_sessions"], 7);
    assert_eq!(body["debited"], 0);
    assert_eq!(body["upcoming"], 3);
    assert_eq!(body["available_to_book"], 7);
    assert_eq!(body["status"], "active");
}

// ── Conflicts ──

#[tokio::test]
async fn test_customer_cannot_double_book() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;

    let (status, _) = app
        .request_booking(
            &customer,
            "teacher-a",
            None,
            "private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request_booking(
            &customer,
            "teacher-b",
            None,
            "private",
            "2025-06-02 10:30",
            "2025-06-02 11:30",
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("customer"));
}

#[tokio::test]
async fn test_teacher_cannot_be_double_booked() {
    let app = TestApp::new();
    let aiko = app.create_customer("Aiko").await;
    let ben = app.create_customer("Ben").await;

    let (status, _) = app
        .request_booking(
            &aiko,
            "teacher-a",
            None,
            "private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request_booking(
            &ben,
            "teacher-a",
            None,
            "private",
            "2025-06-02 10:30",
            "2025-06-02 11:30",
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("teacher"));
}

#[tokio::test]
async fn test_adjacent_bookings_are_allowed() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;

    let (status, _) = app
        .request_booking(
            &customer,
            "teacher-a",
            None,
            "private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request_booking(
            &customer,
            "teacher-a",
            None,
            "private",
            "2025-06-02 11:00",
            "2025-06-02 12:00",
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

// ── Scenario B: capacity ──

#[tokio::test]
async fn test_capacity_second_teacher_partial_third_blocked() {
    let app = TestApp::new();
    let aiko = app.create_customer("Aiko").await;
    let ben = app.create_customer("Ben").await;
    let chie = app.create_customer("Chie").await;

    app.book_confirmed(
        &aiko,
        "teacher-a",
        None,
        "private",
        "2025-06-02 10:00",
        "2025-06-02 11:00",
    )
    .await;

    // Second teacher, compatible type: allowed
    let (status, _) = app
        .request_booking(
            &ben,
            "teacher-b",
            None,
            "private",
            "2025-06-02 10:30",
            "2025-06-02 11:30",
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Third distinct teacher: capacity cap, regardless of type
    let (status, body) = app
        .request_booking(
            &chie,
            "teacher-c",
            None,
            "group",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("capacity"));
}

#[tokio::test]
async fn test_group_not_allowed_next_to_other_teacher() {
    let app = TestApp::new();
    let aiko = app.create_customer("Aiko").await;
    let ben = app.create_customer("Ben").await;

    app.book_confirmed(
        &aiko,
        "teacher-a",
        None,
        "private",
        "2025-06-02 10:00",
        "2025-06-02 11:00",
    )
    .await;

    let (status, body) = app
        .request_booking(
            &ben,
            "teacher-b",
            None,
            "group",
            "2025-06-02 10:30",
            "2025-06-02 11:30",
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("private or duo"));
}

#[tokio::test]
async fn test_group_class_blocks_everyone() {
    let app = TestApp::new();
    let aiko = app.create_customer("Aiko").await;
    let ben = app.create_customer("Ben").await;

    app.book_confirmed(
        &aiko,
        "teacher-a",
        None,
        "group",
        "2025-06-02 10:00",
        "2025-06-02 11:00",
    )
    .await;

    let (status, body) = app
        .request_booking(
            &ben,
            "teacher-b",
            None,
            "private",
            "2025-06-02 10:30",
            "2025-06-02 11:30",
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("group class"));
}

#[tokio::test]
async fn test_availability_grid_reflects_capacity() {
    let app = TestApp::new();
    let aiko = app.create_customer("Aiko").await;

    app.book_confirmed(
        &aiko,
        "teacher-a",
        None,
        "private",
        "2025-06-02 10:00",
        "2025-06-02 11:00",
    )
    .await;

    let (status, body) = app
        .send(
            "GET",
            "/api/availability?from=2025-06-02%2009:00&to=2025-06-02%2012:00&teacher_id=teacher-b",
            false,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let slots = body.as_array().unwrap();
    assert_eq!(slots.len(), 3);
    assert_eq!(slots[0]["status"], "available");
    assert_eq!(slots[1]["status"], "partial");
    assert_eq!(
        slots[1]["allowed_types"],
        serde_json::json!(["private", "duo"])
    );
    assert_eq!(slots[2]["status"], "available");
}

// ── Blocks ──

#[tokio::test]
async fn test_block_reserves_teacher_but_not_studio() {
    let app = TestApp::new();
    let aiko = app.create_customer("Aiko").await;
    let ben = app.create_customer("Ben").await;

    let (status, block) = app
        .send(
            "POST",
            "/api/blocks",
            true,
            Some(serde_json::json!({
                "teacher_id": "teacher-a",
                "start_time": "2025-06-02 10:00",
                "end_time": "2025-06-02 12:00",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let block_id = block["id"].as_str().unwrap().to_string();

    // Blocked teacher is unavailable
    let (status, body) = app
        .request_booking(
            &aiko,
            "teacher-a",
            None,
            "private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    // Another teacher is unaffected, even for group
    let (status, _) = app
        .request_booking(
            &ben,
            "teacher-b",
            None,
            "group",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Unblock frees the slot again
    let (status, _) = app
        .send("DELETE", &format!("/api/blocks/{block_id}"), true, None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request_booking(
            &aiko,
            "teacher-a",
            None,
            "private",
            "2025-06-03 10:00",
            "2025-06-03 11:00",
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

// ── State machine ──

#[tokio::test]
async fn test_confirm_twice_debits_once() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    let id = app
        .book_confirmed(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;

    let (status, body) = app
        .send("POST", &format!("/api/bookings/{id}/confirm"), true, None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("confirmed"));

    let pkg_view = app.get_package(&pkg).await;
    assert_eq!(pkg_view["remaining_sessions"], 9);
    assert_eq!(pkg_view["upcoming"], 1);
}

#[tokio::test]
async fn test_confirm_applies_notes_override() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;

    let (_, body) = app
        .request_booking(
            &customer,
            "teacher-a",
            None,
            "private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/bookings/{id}/confirm"),
            true,
            Some(serde_json::json!({
                "confirmed_by": "teacher-a",
                "notes": "bring grip socks",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "confirmed");
    assert_eq!(body["notes"], "bring grip socks");
}

#[tokio::test]
async fn test_reject_pending_booking_never_debits() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    let (_, body) = app
        .request_booking(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/bookings/{id}/reject"),
            true,
            Some(serde_json::json!({ "reason": "slot not staffed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancellation_reason"], "slot not staffed");

    let pkg_view = app.get_package(&pkg).await;
    assert_eq!(pkg_view["remaining_sessions"], 10);
    assert_eq!(pkg_view["available_to_book"], 10);
}

#[tokio::test]
async fn test_terminal_states_reject_transitions() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;

    let id = app
        .book_confirmed(
            &customer,
            "teacher-a",
            None,
            "private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;

    let (status, _) = app
        .send(
            "POST",
            &format!("/api/bookings/{id}/attendance"),
            true,
            Some(serde_json::json!({ "outcome": "completed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Completed is terminal: no further attendance, confirm, or cancel
    let (status, _) = app
        .send(
            "POST",
            &format!("/api/bookings/{id}/attendance"),
            true,
            Some(serde_json::json!({ "outcome": "no_show" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send("POST", &format!("/api/bookings/{id}/confirm"), true, None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send("POST", &format!("/api/bookings/{id}/cancel"), false, None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ── Cancellation policy ──

#[tokio::test]
async fn test_cancel_within_six_hours_is_rejected() {
    // Scenario C: booking starts in 5 hours
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    let id = app
        .book_confirmed(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-06-01 13:00",
            "2025-06-01 14:00",
        )
        .await;

    let (status, body) = app
        .send("POST", &format!("/api/bookings/{id}/cancel"), false, None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("6 hours"));

    // Ledger untouched
    let pkg_view = app.get_package(&pkg).await;
    assert_eq!(pkg_view["remaining_sessions"], 9);
}

#[tokio::test]
async fn test_cancellation_window_approval_flow() {
    // Scenario D: booking starts in 8 hours
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    let id = app
        .book_confirmed(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-06-01 16:00",
            "2025-06-01 17:00",
        )
        .await;

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/bookings/{id}/cancel"),
            false,
            Some(serde_json::json!({ "reason": "feeling unwell" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancellation_requested");
    assert_eq!(body["cancellation_reason"], "feeling unwell");

    // No ledger change while awaiting approval
    let pkg_view = app.get_package(&pkg).await;
    assert_eq!(pkg_view["remaining_sessions"], 9);
    assert_eq!(pkg_view["upcoming"], 1);

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/bookings/{id}/cancel/approve"),
            true,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    // Refund applied, cancellation counted against the customer
    let pkg_view = app.get_package(&pkg).await;
    assert_eq!(pkg_view["remaining_sessions"], 10);
    assert_eq!(pkg_view["upcoming"], 0);
    assert_eq!(pkg_view["available_to_book"], 10);

    let (_, customer_view) = app
        .send("GET", &format!("/api/customers/{customer}"), true, None)
        .await;
    assert_eq!(customer_view["total_cancellations"], 1);

    assert!(app.cal_deleted.lock().unwrap().contains(&id));
}

#[tokio::test]
async fn test_cancellation_rejection_restores_confirmed() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;

    let id = app
        .book_confirmed(
            &customer,
            "teacher-a",
            None,
            "private",
            "2025-06-01 16:00",
            "2025-06-01 17:00",
        )
        .await;

    let (status, _) = app
        .send(
            "POST",
            &format!("/api/bookings/{id}/cancel"),
            false,
            Some(serde_json::json!({ "reason": "change of plans" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/bookings/{id}/cancel/reject"),
            true,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "confirmed");
    assert_eq!(body["cancellation_reason"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_direct_cancel_round_trip_restores_ledger() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    let before = app.get_package(&pkg).await;
    assert_eq!(before["remaining_sessions"], 10);

    // 48 hours out: direct cancellation with immediate refund
    let id = app
        .book_confirmed(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-06-03 08:00",
            "2025-06-03 09:00",
        )
        .await;

    let (status, body) = app
        .send("POST", &format!("/api/bookings/{id}/cancel"), false, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let after = app.get_package(&pkg).await;
    assert_eq!(after["remaining_sessions"], 10);
    assert_eq!(after["debited"], 0);
    assert_eq!(after["upcoming"], 0);
    assert_eq!(after["available_to_book"], 10);

    assert!(app.cal_deleted.lock().unwrap().contains(&id));
    assert!(app
        .notified_events()
        .contains(&"booking_cancelled".to_string()));

    // Direct cancellation does not count against the customer
    let (_, customer_view) = app
        .send("GET", &format!("/api/customers/{customer}"), true, None)
        .await;
    assert_eq!(customer_view["total_cancellations"], 0);
}

#[tokio::test]
async fn test_staff_direct_cancel_refunds_confirmed_only() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    // Confirmed booking inside the 6-hour window: the customer could not
    // cancel it, but staff can, with a refund.
    let id = app
        .book_confirmed(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-06-01 10:00",
            "2025-06-01 11:00",
        )
        .await;

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/admin/bookings/{id}/cancel"),
            true,
            Some(serde_json::json!({ "reason": "teacher ill" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let pkg_view = app.get_package(&pkg).await;
    assert_eq!(pkg_view["remaining_sessions"], 10);

    // Staff cancellation never counts against the customer
    let (_, customer_view) = app
        .send("GET", &format!("/api/customers/{customer}"), true, None)
        .await;
    assert_eq!(customer_view["total_cancellations"], 0);

    // Pending bookings are cancelled without any ledger movement
    let (_, pending) = app
        .request_booking(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;
    let pending_id = pending["id"].as_str().unwrap();
    let (status, _) = app
        .send(
            "POST",
            &format!("/api/admin/bookings/{pending_id}/cancel"),
            true,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let pkg_view = app.get_package(&pkg).await;
    assert_eq!(pkg_view["remaining_sessions"], 10);
    assert_eq!(pkg_view["available_to_book"], 10);
}

// ── Attendance ──

#[tokio::test]
async fn test_attendance_no_show_keeps_debit_and_counter() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    let id = app
        .book_confirmed(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/bookings/{id}/attendance"),
            true,
            Some(serde_json::json!({ "outcome": "no_show" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_show");

    // Session stays consumed; plain no-show does not touch the counter
    let pkg_view = app.get_package(&pkg).await;
    assert_eq!(pkg_view["remaining_sessions"], 9);
    assert_eq!(pkg_view["debited"], 1);

    let (_, customer_view) = app
        .send("GET", &format!("/api/customers/{customer}"), true, None)
        .await;
    assert_eq!(customer_view["total_cancellations"], 0);
}

#[tokio::test]
async fn test_attendance_cancelled_refunds_and_counts() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    let id = app
        .book_confirmed(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/bookings/{id}/attendance"),
            true,
            Some(serde_json::json!({ "outcome": "cancelled" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let pkg_view = app.get_package(&pkg).await;
    assert_eq!(pkg_view["remaining_sessions"], 10);
    assert_eq!(pkg_view["debited"], 0);

    let (_, customer_view) = app
        .send("GET", &format!("/api/customers/{customer}"), true, None)
        .await;
    assert_eq!(customer_view["total_cancellations"], 1);
}

// ── Sweep ──

#[tokio::test]
async fn test_sweep_completes_elapsed_and_is_idempotent() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    let id = app
        .book_confirmed(
            &customer,
            "teacher-a",
            Some(&pkg),
            "private",
            "2025-06-01 10:00",
            "2025-06-01 11:00",
        )
        .await;

    app.clock.set(dt("2025-06-01 12:00"));

    let (status, body) = app.send("POST", "/api/admin/sweep", true, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["completed_bookings"], 1);

    let booking = app.get_booking(&id).await;
    assert_eq!(booking["status"], "completed");

    // Second run is a no-op
    let (_, body) = app.send("POST", "/api/admin/sweep", true, None).await;
    assert_eq!(body["completed_bookings"], 0);

    // Ledger agrees: the elapsed session is debited, nothing upcoming
    let pkg_view = app.get_package(&pkg).await;
    assert_eq!(pkg_view["debited"], 1);
    assert_eq!(pkg_view["upcoming"], 0);
    assert_eq!(pkg_view["remaining_sessions"], 9);
}

// ── Reconciliation ──

#[tokio::test]
async fn test_reconcile_repairs_corrupted_counter() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    app.book_confirmed(
        &customer,
        "teacher-a",
        Some(&pkg),
        "private",
        "2025-06-02 10:00",
        "2025-06-02 11:00",
    )
    .await;

    // Sabotage the cached counter behind the engine's back
    {
        let db = app.state.db.lock().unwrap();
        db.execute(
            "UPDATE packages SET remaining_sessions = 3 WHERE id = ?1",
            rusqlite::params![pkg],
        )
        .unwrap();
    }

    let (status, report) = app
        .send("POST", &format!("/api/packages/{pkg}/reconcile"), true, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["repaired"], true);
    assert_eq!(report["healthy"], true);
    assert_eq!(report["drift"], -6);

    let pkg_view = app.get_package(&pkg).await;
    assert_eq!(pkg_view["remaining_sessions"], 9);
}

#[tokio::test]
async fn test_reconcile_reports_clean_package() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    app.book_confirmed(
        &customer,
        "teacher-a",
        Some(&pkg),
        "private",
        "2025-06-02 10:00",
        "2025-06-02 11:00",
    )
    .await;

    let (status, report) = app
        .send("POST", &format!("/api/packages/{pkg}/reconcile"), true, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["repaired"], false);
    assert_eq!(report["drift"], 0);
    assert_eq!(
        report["debited"].as_i64().unwrap()
            + report["upcoming"].as_i64().unwrap()
            + report["available"].as_i64().unwrap(),
        10
    );
}

// ── Idempotency ──

#[tokio::test]
async fn test_idempotency_key_replays_same_booking() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;

    let body = serde_json::json!({
        "customer_id": customer,
        "teacher_id": "teacher-a",
        "session_type": "private",
        "start_time": "2025-06-02 10:00",
        "end_time": "2025-06-02 11:00",
    });

    let mut ids = vec![];
    for _ in 0..2 {
        let request = Request::builder()
            .method("POST")
            .uri("/api/bookings")
            .header("content-type", "application/json")
            .header("idempotency-key", "retry-abc-123")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        ids.push(value["id"].as_str().unwrap().to_string());
    }
    assert_eq!(ids[0], ids[1]);

    let (_, listed) = app
        .send("GET", "/api/bookings?status=pending", true, None)
        .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

// ── Manual sessions ──

#[tokio::test]
async fn test_manual_session_is_confirmed_and_debited_at_creation() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;
    let pkg = app
        .create_package(&customer, "private", 10, "2025-06-01 00:00", "2025-08-01 00:00")
        .await;

    let (status, body) = app
        .send(
            "POST",
            "/api/sessions",
            true,
            Some(serde_json::json!({
                "customer_id": customer,
                "teacher_id": "teacher-a",
                "package_id": pkg,
                "session_type": "private",
                "start_time": "2025-06-02 10:00",
                "end_time": "2025-06-02 11:00",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "confirmed");

    let pkg_view = app.get_package(&pkg).await;
    assert_eq!(pkg_view["remaining_sessions"], 9);
    assert_eq!(pkg_view["upcoming"], 1);
}

// ── Notifications & calendar ──

#[tokio::test]
async fn test_booking_flow_emits_notifications_and_calendar_events() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;

    let id = app
        .book_confirmed(
            &customer,
            "teacher-a",
            None,
            "private",
            "2025-06-02 10:00",
            "2025-06-02 11:00",
        )
        .await;

    let events = app.notified_events();
    assert!(events.contains(&"booking_requested".to_string()));
    assert!(events.contains(&"booking_confirmed".to_string()));
    assert!(app.cal_created.lock().unwrap().contains(&id));

    // The calendar event id was stored on the booking
    let db = app.state.db.lock().unwrap();
    let event_id: Option<String> = db
        .query_row(
            "SELECT calendar_event_id FROM bookings WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(event_id.as_deref(), Some(format!("evt-{id}").as_str()));
}

#[tokio::test]
async fn test_calendar_feed_lists_confirmed_bookings() {
    let app = TestApp::new();
    let customer = app.create_customer("Aiko").await;

    app.book_confirmed(
        &customer,
        "teacher-a",
        None,
        "private",
        "2025-06-02 10:00",
        "2025-06-02 11:00",
    )
    .await;

    let request = Request::builder()
        .method("GET")
        .uri("/calendar/feed.ics")
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/calendar; charset=utf-8"
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let feed = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(feed.contains("BEGIN:VEVENT"));
    assert!(feed.contains("DTSTART:20250602T100000"));
    assert!(feed.contains("Test Studio"));
}
