#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::error::SwapError;
    use crate::types::{RequestStatus, Slot, SlotStatus, SwapFilter, SwapRequest, User};
    use chrono::{Duration, TimeZone, Utc};

    async fn setup_test_db() -> Database {
        // Use in-memory SQLite for tests
        let db = Database::new("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        db.migrate().await.expect("Failed to run migrations");
        db
    }

    fn create_test_slot(id: &str, owner: &str, day: u32, swappable: bool) -> Slot {
        Slot {
            id: id.to_string(),
            owner_id: owner.to_string(),
            title: format!("Shift {}", id),
            date: Utc.with_ymd_and_hms(2025, 3, day, 9, 30, 0).unwrap(),
            is_swappable: swappable,
            status: SlotStatus::Available,
            created_at: Utc::now(),
        }
    }

    fn create_test_request(id: &str, from: &str, to: &str, age_minutes: i64) -> SwapRequest {
        SwapRequest {
            id: id.to_string(),
            from_user_id: from.to_string(),
            to_user_id: to.to_string(),
            offered_slot_id: "slot-a".to_string(),
            requested_slot_id: "slot-b".to_string(),
            status: RequestStatus::Pending,
            created_at: Utc::now() - Duration::minutes(age_minutes),
            responded_at: None,
        }
    }

    async fn insert_request(db: &Database, request: &SwapRequest) {
        let mut conn = db.pool().acquire().await.unwrap();
        Database::insert_swap_request(&mut conn, request)
            .await
            .expect("Failed to insert request");
    }

    #[tokio::test]
    async fn test_create_and_get_slot() {
        let db = setup_test_db().await;
        let slot = create_test_slot("slot-1", "alice", 4, true);

        db.create_slot(&slot).await.expect("Failed to create slot");

        let retrieved = db
            .get_slot(&slot.id)
            .await
            .expect("Failed to get slot")
            .expect("Slot not found");

        // Timestamps survive storage exactly
        assert_eq!(retrieved, slot);
        assert!(db.get_slot("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_slot_listings() {
        let db = setup_test_db().await;

        db.create_slot(&create_test_slot("late", "alice", 20, true)).await.unwrap();
        db.create_slot(&create_test_slot("early", "alice", 2, false)).await.unwrap();
        db.create_slot(&create_test_slot("bob-open", "bob", 10, true)).await.unwrap();
        db.create_slot(&create_test_slot("bob-closed", "bob", 11, false)).await.unwrap();

        let ids = |slots: Vec<Slot>| slots.into_iter().map(|s| s.id).collect::<Vec<_>>();

        // Ordered by date
        assert_eq!(ids(db.list_slots_by_owner("alice").await.unwrap()), vec!["early", "late"]);

        // Marketplace never shows the caller's own slots
        assert_eq!(ids(db.list_swappable_slots("alice").await.unwrap()), vec!["bob-open"]);
        assert_eq!(ids(db.list_swappable_slots("bob").await.unwrap()), vec!["late"]);

        assert_eq!(ids(db.list_owner_swappable("bob").await.unwrap()), vec!["bob-open"]);
    }

    #[tokio::test]
    async fn test_update_slot_flags_skips_pending_and_foreign_slots() {
        let db = setup_test_db().await;
        let slot = create_test_slot("slot-1", "alice", 4, true);
        db.create_slot(&slot).await.unwrap();

        // Someone else's slot is untouched
        let updated = db
            .update_slot_flags(&slot.id, "bob", false, SlotStatus::Available)
            .await
            .unwrap();
        assert!(!updated);

        let updated = db
            .update_slot_flags(&slot.id, "alice", false, SlotStatus::Swapped)
            .await
            .unwrap();
        assert!(updated);
        let stored = db.get_slot(&slot.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SlotStatus::Swapped);
        assert!(!stored.is_swappable);

        // Put the slot back on offer, then lock it in a negotiation
        db.update_slot_flags(&slot.id, "alice", true, SlotStatus::Available)
            .await
            .unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        assert!(Database::claim_offered_slot(&mut conn, &slot.id, "alice").await.unwrap());
        drop(conn);

        let updated = db
            .update_slot_flags(&slot.id, "alice", true, SlotStatus::Available)
            .await
            .unwrap();
        assert!(!updated);

        let stored = db.get_slot(&slot.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SlotStatus::Pending);
        assert!(!stored.is_swappable);
    }

    #[tokio::test]
    async fn test_claims_respect_ownership_and_availability() {
        let db = setup_test_db().await;
        db.create_slot(&create_test_slot("mine", "alice", 4, true)).await.unwrap();
        db.create_slot(&create_test_slot("theirs", "bob", 5, true)).await.unwrap();
        db.create_slot(&create_test_slot("closed", "bob", 6, false)).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();

        // Offered slot must belong to the requester
        assert!(!Database::claim_offered_slot(&mut conn, "theirs", "alice").await.unwrap());
        // Desired slot must belong to someone else
        assert!(!Database::claim_desired_slot(&mut conn, "mine", "alice").await.unwrap());
        assert!(!Database::claim_desired_slot(&mut conn, "closed", "alice").await.unwrap());

        assert!(Database::claim_desired_slot(&mut conn, "theirs", "alice").await.unwrap());
        // Already pending
        assert!(!Database::claim_desired_slot(&mut conn, "theirs", "carol").await.unwrap());

        let fetched = Database::fetch_slot(&mut conn, "theirs").await.unwrap().unwrap();
        assert_eq!(fetched.status, SlotStatus::Pending);
        assert!(Database::fetch_slot(&mut conn, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settle_slot_only_touches_pending() {
        let db = setup_test_db().await;
        db.create_slot(&create_test_slot("slot-1", "alice", 4, true)).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(!Database::settle_slot(&mut conn, "slot-1", "bob", false, SlotStatus::Available)
            .await
            .unwrap());

        assert!(Database::claim_offered_slot(&mut conn, "slot-1", "alice").await.unwrap());
        assert!(Database::settle_slot(&mut conn, "slot-1", "bob", false, SlotStatus::Available)
            .await
            .unwrap());
        drop(conn);

        let stored = db.get_slot("slot-1").await.unwrap().unwrap();
        assert_eq!(stored.owner_id, "bob");
        assert_eq!(stored.status, SlotStatus::Available);
    }

    #[tokio::test]
    async fn test_swap_request_lifecycle() {
        let db = setup_test_db().await;
        db.create_slot(&create_test_slot("slot-a", "alice", 4, true)).await.unwrap();
        db.create_slot(&create_test_slot("slot-b", "bob", 5, true)).await.unwrap();

        let request = create_test_request("req-1", "alice", "bob", 0);
        insert_request(&db, &request).await;

        let stored = db.get_swap_request("req-1").await.unwrap().expect("Request not found");
        assert_eq!(stored, request);

        let responded_at = Utc::now();
        let mut conn = db.pool().acquire().await.unwrap();

        // Only the recipient can resolve it
        assert!(!Database::resolve_swap_request(
            &mut conn,
            "req-1",
            "alice",
            RequestStatus::Accepted,
            &responded_at
        )
        .await
        .unwrap());

        assert!(Database::resolve_swap_request(
            &mut conn,
            "req-1",
            "bob",
            RequestStatus::Rejected,
            &responded_at
        )
        .await
        .unwrap());

        // Terminal states are final
        assert!(!Database::resolve_swap_request(
            &mut conn,
            "req-1",
            "bob",
            RequestStatus::Accepted,
            &responded_at
        )
        .await
        .unwrap());
        drop(conn);

        let stored = db.get_swap_request("req-1").await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Rejected);
        assert_eq!(stored.responded_at, Some(responded_at));
    }

    #[tokio::test]
    async fn test_list_swap_requests_filters() {
        let db = setup_test_db().await;
        db.create_slot(&create_test_slot("slot-a", "alice", 4, true)).await.unwrap();
        db.create_slot(&create_test_slot("slot-b", "bob", 5, true)).await.unwrap();

        insert_request(&db, &create_test_request("oldest", "alice", "bob", 30)).await;
        insert_request(&db, &create_test_request("middle", "alice", "bob", 20)).await;
        insert_request(&db, &create_test_request("newest", "alice", "bob", 10)).await;
        insert_request(&db, &create_test_request("incoming", "bob", "alice", 5)).await;

        let mut conn = db.pool().acquire().await.unwrap();
        Database::resolve_swap_request(&mut conn, "middle", "bob", RequestStatus::Accepted, &Utc::now())
            .await
            .unwrap();
        drop(conn);

        let ids = |requests: Vec<SwapRequest>| requests.into_iter().map(|r| r.id).collect::<Vec<_>>();

        let sent = db
            .list_swap_requests_from("alice", SwapFilter::default())
            .await
            .unwrap();
        assert_eq!(ids(sent), vec!["newest", "middle", "oldest"]);

        let pending = db
            .list_swap_requests_from(
                "alice",
                SwapFilter {
                    status: Some(RequestStatus::Pending),
                    ..SwapFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(ids(pending), vec!["newest", "oldest"]);

        let limited = db
            .list_swap_requests_from(
                "alice",
                SwapFilter {
                    status: None,
                    limit: 1,
                },
            )
            .await
            .unwrap();
        assert_eq!(ids(limited), vec!["newest"]);

        let received = db
            .list_swap_requests_to("alice", SwapFilter::default())
            .await
            .unwrap();
        assert_eq!(ids(received), vec!["incoming"]);
    }

    #[tokio::test]
    async fn test_create_user_unique_email() {
        let db = setup_test_db().await;
        let user = User {
            id: "user-1".to_string(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "$2b$04$hash".to_string(),
            created_at: Utc::now(),
        };

        db.create_user(&user).await.expect("Failed to create user");

        let found = db
            .find_user_by_email("alice@example.com")
            .await
            .unwrap()
            .expect("User not found");
        assert_eq!(found.id, user.id);
        assert_eq!(found.password_hash, user.password_hash);

        let duplicate = User {
            id: "user-2".to_string(),
            ..user
        };
        let result = db.create_user(&duplicate).await;
        assert!(matches!(result, Err(SwapError::UserExists(_))));

        assert!(db.find_user_by_email("bob@example.com").await.unwrap().is_none());
    }
}
