//! Postgres ledger behaviour under concurrent callers.
//!
//! Needs a scratch database: `DATABASE_URL=postgres://... cargo test -p busline-store -- --ignored`

use busline_core::booking::PaymentRecord;
use busline_core::{
    Booking, BookingLedger, BookingStatus, Contact, FareComponents, Gender, LedgerError,
    Passenger, Transition,
};
use busline_store::{DbClient, PgBookingLedger};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

struct TestDb {
    db: DbClient,
    ledger: Arc<PgBookingLedger>,
}

async fn setup() -> TestDb {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch Postgres");
    let db = DbClient::new(&url, 20).await.expect("Failed to connect");
    db.migrate().await.expect("Failed to migrate");
    let ledger = Arc::new(PgBookingLedger::new(db.pool.clone()));
    TestDb { db, ledger }
}

impl TestDb {
    async fn schedule(&self, seats: &[&str]) -> Uuid {
        let id = Uuid::new_v4();
        let departure = Utc::now() + Duration::days(3);
        sqlx::query(
            r#"
            INSERT INTO schedules (id, route_id, bus_id, departure_time, arrival_time, fare_base, seat_labels)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(Uuid::new_v4())
        .bind(Uuid::new_v4())
        .bind(departure)
        .bind(departure + Duration::hours(8))
        .bind(50_000_i64)
        .bind(seats.iter().map(|s| s.to_string()).collect::<Vec<_>>())
        .execute(&self.db.pool)
        .await
        .expect("Failed to insert schedule");
        id
    }
}

fn pending(schedule_id: Uuid, seats: &[&str], now: DateTime<Utc>) -> Booking {
    Booking {
        id: Uuid::new_v4(),
        schedule_id,
        user_id: "user-1".to_string(),
        seats: seats.iter().map(|s| s.to_string()).collect(),
        passengers: seats
            .iter()
            .map(|_| Passenger { name: "Rider".to_string(), age: 30, gender: Gender::Other })
            .collect(),
        contact: Contact { email: "r@example.com".into(), phone: "+910000000000".into() },
        fare: FareComponents::new(50_000, 5_000, 2_000),
        total_amount: 57_000 * seats.len() as i64,
        currency: "INR".to_string(),
        status: BookingStatus::Pending,
        payment: PaymentRecord::default(),
        cancellation: None,
        created_at: now,
        expires_at: now + Duration::minutes(15),
        updated_at: now,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore = "requires DATABASE_URL"]
async fn test_overlapping_claims_in_any_seat_order_yield_one_winner() {
    let db = setup().await;
    let labels = ["1A", "1B", "1C", "1D"];

    for round in 0..20 {
        let schedule_id = db.schedule(&labels).await;
        let now = Utc::now();

        let mut handles = Vec::new();
        for caller in 0..8 {
            // Each caller lists the same seats rotated, every other one reversed
            let mut seats: Vec<&str> = labels.to_vec();
            seats.rotate_left(caller % labels.len());
            if caller % 2 == 1 {
                seats.reverse();
            }
            let booking = pending(schedule_id, &seats, now);
            let ledger = db.ledger.clone();
            handles.push(tokio::spawn(async move { ledger.create(&booking, now).await }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => wins += 1,
                Err(LedgerError::SeatConflict(_)) => conflicts += 1,
                Err(e) => panic!("round {}: unexpected error {}", round, e),
            }
        }
        assert_eq!(wins, 1, "round {}", round);
        assert_eq!(conflicts, 7, "round {}", round);
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires DATABASE_URL"]
async fn test_partially_overlapping_claims_are_rejected_whole() {
    let db = setup().await;
    let schedule_id = db.schedule(&["1A", "1B", "1C"]).await;
    let now = Utc::now();

    let first = pending(schedule_id, &["1A", "1B"], now);
    db.ledger.create(&first, now).await.unwrap();

    let second = pending(schedule_id, &["1C", "1B"], now);
    let err = db.ledger.create(&second, now).await.unwrap_err();
    assert!(matches!(err, LedgerError::SeatConflict(ref seats) if seats == &vec!["1B".to_string()]));

    // 1C was not left behind by the rejected claim
    let third = pending(schedule_id, &["1C"], now);
    db.ledger.create(&third, now).await.unwrap();
    assert!(db.ledger.get(second.id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires DATABASE_URL"]
async fn test_confirm_and_expire_race_has_one_winner() {
    let db = setup().await;

    for _ in 0..10 {
        let schedule_id = db.schedule(&["2A"]).await;
        let now = Utc::now();
        let booking = pending(schedule_id, &["2A"], now);
        db.ledger.create(&booking, now).await.unwrap();

        // Confirm just inside the window, expiry just past it
        let confirm_at = booking.expires_at - Duration::milliseconds(1);
        let expire_at = booking.expires_at;

        let ledger = db.ledger.clone();
        let id = booking.id;
        let confirm = tokio::spawn(async move {
            ledger
                .transition(
                    id,
                    BookingStatus::Pending,
                    Transition::Confirm { payment_id: "pay_1".to_string() },
                    confirm_at,
                )
                .await
        });
        let ledger = db.ledger.clone();
        let expire = tokio::spawn(async move {
            ledger
                .transition(id, BookingStatus::Pending, Transition::Expire, expire_at)
                .await
        });

        let confirmed = confirm.await.unwrap();
        let expired = expire.await.unwrap();
        assert!(confirmed.is_ok() != expired.is_ok(), "exactly one transition applies");

        let stored = db.ledger.get(id).await.unwrap().unwrap();
        if confirmed.is_ok() {
            assert_eq!(stored.status, BookingStatus::Confirmed);
            assert!(matches!(
                expired,
                Err(LedgerError::StateMismatch { actual: BookingStatus::Confirmed, .. })
            ));
        } else {
            assert_eq!(stored.status, BookingStatus::Expired);
            assert!(matches!(
                confirmed,
                Err(LedgerError::StateMismatch { actual: BookingStatus::Expired, .. })
            ));
        }
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_confirm_after_window_reports_lapsed_hold() {
    let db = setup().await;
    let schedule_id = db.schedule(&["3A"]).await;
    let now = Utc::now();
    let booking = pending(schedule_id, &["3A"], now);
    db.ledger.create(&booking, now).await.unwrap();

    let late = booking.expires_at + Duration::seconds(1);
    let err = db
        .ledger
        .transition(
            booking.id,
            BookingStatus::Pending,
            Transition::Confirm { payment_id: "pay_late".to_string() },
            late,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::HoldLapsed(id) if id == booking.id));

    let err = db
        .ledger
        .transition(booking.id, BookingStatus::Pending, Transition::Expire, now)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::HoldLive(_)));

    let expired = db
        .ledger
        .transition(booking.id, BookingStatus::Pending, Transition::Expire, late)
        .await
        .unwrap();
    assert_eq!(expired.status, BookingStatus::Expired);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_claim_reclaims_seats_from_lapsed_holder() {
    let db = setup().await;
    let schedule_id = db.schedule(&["4A", "4B", "4C"]).await;
    let t0 = Utc::now();

    let stale = pending(schedule_id, &["4A", "4B"], t0);
    db.ledger.create(&stale, t0).await.unwrap();

    let later = stale.expires_at + Duration::minutes(1);
    let fresh = pending(schedule_id, &["4B", "4C"], later);
    db.ledger.create(&fresh, later).await.unwrap();

    let stale = db.ledger.get(stale.id).await.unwrap().unwrap();
    assert_eq!(stale.status, BookingStatus::Expired);

    // The lapsed holder's other seat was released too
    let other = pending(schedule_id, &["4A"], later);
    db.ledger.create(&other, later).await.unwrap();

    let live = db
        .ledger
        .list_by_schedule(schedule_id, &[BookingStatus::Pending])
        .await
        .unwrap();
    let mut ids: Vec<Uuid> = live.iter().map(|b| b.id).collect();
    ids.sort();
    let mut expected = vec![fresh.id, other.id];
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires DATABASE_URL"]
async fn test_first_attached_order_wins() {
    let db = setup().await;
    let schedule_id = db.schedule(&["5A"]).await;
    let now = Utc::now();
    let booking = pending(schedule_id, &["5A"], now);
    db.ledger.create(&booking, now).await.unwrap();

    let mut handles = Vec::new();
    for n in 0..4 {
        let ledger = db.ledger.clone();
        let id = booking.id;
        handles.push(tokio::spawn(async move {
            ledger.attach_order(id, &format!("order_{}", n), now).await
        }));
    }

    let mut seen = Vec::new();
    for handle in handles {
        let attached = handle.await.unwrap().unwrap();
        seen.push(attached.payment.order_id.unwrap());
    }
    seen.dedup();
    assert_eq!(seen.len(), 1, "every caller sees the first order");

    let stored = db.ledger.get(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.payment.order_id.as_deref(), Some(seen[0].as_str()));

    let err = db
        .ledger
        .attach_order(booking.id, "order_late", booking.expires_at)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::HoldLapsed(_)));
}
