use chrono::Utc;
use donorhub::audit::{edit_type, AuditRecorder, HistoryEntry};
use donorhub::db::donors::DonorFields;
use donorhub::db::events::{CollaboratorDiff, CollaboratorUpdate, EventWrite};
use donorhub::db::models::ParticipationStatus;
use donorhub::db::{self, DbPool};
use serde_json::json;
use uuid::Uuid;

async fn test_pool() -> DbPool {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    db::init_pool(&url).await.expect("init pool")
}

async fn seed_user(pool: &DbPool) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO users (name, email, password_hash) VALUES ($1, $2, 'unused') RETURNING id",
    )
    .bind(format!("Test User {}", Uuid::new_v4()))
    .bind(format!("test-{}@example.com", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .expect("seed user")
}

async fn seed_donor(pool: &DbPool) -> Uuid {
    let fields = DonorFields {
        first_name: "Event".to_string(),
        last_name: format!("Guest-{}", Uuid::new_v4()),
        ..Default::default()
    };
    db::donors::create(pool, &fields)
        .await
        .expect("create donor")
        .id
}

async fn seed_event(pool: &DbPool, creator: Uuid) -> Uuid {
    let write = EventWrite {
        name: format!("Gala {}", Uuid::new_v4()),
        description: None,
        date: Utc::now(),
        location: None,
        status: "draft".to_string(),
        capacity: None,
    };
    db::events::create(pool, creator, &write, None)
        .await
        .expect("create event")
        .id
}

fn applied(update: CollaboratorUpdate) -> CollaboratorDiff {
    match update {
        CollaboratorUpdate::Applied(diff) => diff,
        CollaboratorUpdate::UnknownUser(id) => panic!("unexpected unknown user {id}"),
    }
}

#[tokio::test]
#[ignore] // Requires database
async fn participation_counters_are_monotone() {
    let pool = test_pool().await;
    let user_id = seed_user(&pool).await;
    let donor_id = seed_donor(&pool).await;
    let event_id = seed_event(&pool, user_id).await;

    let outcome = db::events::edit_donors(&pool, event_id, &[donor_id], &[])
        .await
        .expect("edit_donors");
    assert_eq!(outcome.added, vec![donor_id]);

    let donor = db::donors::get(&pool, donor_id)
        .await
        .expect("get")
        .expect("donor");
    assert_eq!(donor.total_invitations, 1);
    assert_eq!(donor.total_attendance, 0);

    // invited -> confirmed does not count a second invitation
    let change = db::events::set_donor_status(
        &pool,
        event_id,
        donor_id,
        ParticipationStatus::Confirmed,
        None,
    )
    .await
    .expect("set_donor_status")
    .expect("donor on event");
    assert_eq!(change.old_status, "invited");
    assert_eq!(change.new_status, "confirmed");
    let donor = db::donors::get(&pool, donor_id)
        .await
        .expect("get")
        .expect("donor");
    assert_eq!(donor.total_invitations, 1);

    // the first attended transition counts once; repeats do not
    for _ in 0..2 {
        db::events::set_donor_status(
            &pool,
            event_id,
            donor_id,
            ParticipationStatus::Attended,
            None,
        )
        .await
        .expect("set_donor_status")
        .expect("donor on event");
    }
    let donor = db::donors::get(&pool, donor_id)
        .await
        .expect("get")
        .expect("donor");
    assert_eq!(donor.total_attendance, 1);

    // re-adding an existing participant is a no-op
    let outcome = db::events::edit_donors(&pool, event_id, &[donor_id], &[])
        .await
        .expect("edit_donors");
    assert!(outcome.added.is_empty());
    let donor = db::donors::get(&pool, donor_id)
        .await
        .expect("get")
        .expect("donor");
    assert_eq!(donor.total_invitations, 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn declined_status_records_reason_and_history() {
    let pool = test_pool().await;
    let user_id = seed_user(&pool).await;
    let donor_id = seed_donor(&pool).await;
    let event_id = seed_event(&pool, user_id).await;

    db::events::edit_donors(&pool, event_id, &[donor_id], &[])
        .await
        .expect("edit_donors");

    let change = db::events::set_donor_status(
        &pool,
        event_id,
        donor_id,
        ParticipationStatus::Declined,
        Some("schedule conflict"),
    )
    .await
    .expect("set_donor_status")
    .expect("donor on event");
    assert_eq!(change.old_status, "invited");
    assert_eq!(change.new_status, "declined");

    let participants = db::events::participants(&pool, event_id)
        .await
        .expect("participants");
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].status, "declined");
    assert_eq!(
        participants[0].decline_reason.as_deref(),
        Some("schedule conflict")
    );

    // Queue the history row the way the handler does, then drain the
    // recorder by dropping it and waiting for the writer task.
    let (audit, task) = AuditRecorder::spawn(pool.clone());
    audit.record(HistoryEntry {
        event_id,
        editor_id: user_id,
        edit_type: edit_type::DONOR_STATUS_UPDATED.to_string(),
        old_value: Some(change.old_status),
        new_value: Some(change.new_status),
        meta: Some(json!({ "donorId": donor_id })),
    });
    drop(audit);
    task.await.expect("audit task");

    let history = db::history::list_for_event(&pool, event_id)
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].entry.edit_type, "donor_status_updated");
    assert_eq!(history[0].entry.old_value.as_deref(), Some("invited"));
    assert_eq!(history[0].entry.new_value.as_deref(), Some("declined"));
}

#[tokio::test]
#[ignore] // Requires database
async fn collaborator_replace_reports_diff() {
    let pool = test_pool().await;
    let owner = seed_user(&pool).await;
    let helper = seed_user(&pool).await;
    let event_id = seed_event(&pool, owner).await;

    let diff = applied(
        db::events::set_collaborators(&pool, event_id, &[helper])
            .await
            .expect("set_collaborators"),
    );
    assert_eq!(diff.added, vec![helper]);
    assert!(diff.removed.is_empty());
    assert!(db::events::is_collaborator(&pool, event_id, helper)
        .await
        .expect("is_collaborator"));

    let diff = applied(
        db::events::set_collaborators(&pool, event_id, &[])
            .await
            .expect("set_collaborators"),
    );
    assert!(diff.added.is_empty());
    assert_eq!(diff.removed, vec![helper]);
    assert!(!db::events::is_collaborator(&pool, event_id, helper)
        .await
        .expect("is_collaborator"));
}

#[tokio::test]
#[ignore] // Requires database
async fn unknown_collaborator_id_rejects_the_whole_request() {
    let pool = test_pool().await;
    let owner = seed_user(&pool).await;
    let helper = seed_user(&pool).await;
    let event_id = seed_event(&pool, owner).await;

    let ghost = Uuid::new_v4();
    match db::events::set_collaborators(&pool, event_id, &[helper, ghost])
        .await
        .expect("set_collaborators")
    {
        CollaboratorUpdate::UnknownUser(id) => assert_eq!(id, ghost),
        CollaboratorUpdate::Applied(_) => panic!("unknown user id was accepted"),
    }

    // The valid half of the rejected request must not have been applied
    assert!(!db::events::is_collaborator(&pool, event_id, helper)
        .await
        .expect("is_collaborator"));

    let diff = applied(
        db::events::set_collaborators(&pool, event_id, &[helper])
            .await
            .expect("set_collaborators"),
    );
    assert_eq!(diff.added, vec![helper]);
}

#[tokio::test]
#[ignore] // Requires database
async fn soft_deleted_events_vanish_from_reads() {
    let pool = test_pool().await;
    let owner = seed_user(&pool).await;
    let event_id = seed_event(&pool, owner).await;

    assert!(db::events::get(&pool, event_id)
        .await
        .expect("get")
        .is_some());
    assert!(db::events::soft_delete(&pool, event_id)
        .await
        .expect("soft_delete"));
    assert!(db::events::get(&pool, event_id)
        .await
        .expect("get")
        .is_none());
    // A second delete hits no active row
    assert!(!db::events::soft_delete(&pool, event_id)
        .await
        .expect("soft_delete"));
}
