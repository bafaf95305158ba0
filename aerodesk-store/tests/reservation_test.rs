use aerodesk_core::{
    InventoryRepository, PoolConfig, ReservationEngine, ReservationError, StoreResult,
};
use aerodesk_shared::{Booking, BookingEvent, BookingStatus, FlightStatus, NewBooking, SeatInventory};
use aerodesk_store::{MemoryDatabase, MemoryInventoryRepository};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

/// Memory repository with slow writes and a hook that cancels the flight
/// right after it has been read.
struct InterposedRepository {
    inner: MemoryInventoryRepository,
    db: Arc<MemoryDatabase>,
    insert_delay: Duration,
    increment_delay: Duration,
    cancel_flight_after_load: AtomicBool,
}

impl InterposedRepository {
    async fn new(db: &Arc<MemoryDatabase>) -> Self {
        Self {
            inner: MemoryInventoryRepository::new(Arc::clone(db), PoolConfig::default())
                .await
                .unwrap(),
            db: Arc::clone(db),
            insert_delay: Duration::ZERO,
            increment_delay: Duration::ZERO,
            cancel_flight_after_load: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl InventoryRepository for InterposedRepository {
    async fn load_flight_inventory(&self, flight_id: Uuid) -> StoreResult<Option<SeatInventory>> {
        let inventory = self.inner.load_flight_inventory(flight_id).await?;
        if self.cancel_flight_after_load.swap(false, Ordering::SeqCst) {
            self.db.set_flight_status(flight_id, FlightStatus::Cancelled);
        }
        Ok(inventory)
    }

    async fn conditional_decrement_seats(&self, flight_id: Uuid, seats: i32) -> StoreResult<bool> {
        self.inner.conditional_decrement_seats(flight_id, seats).await
    }

    async fn increment_seats(&self, flight_id: Uuid, seats: i32) -> StoreResult<()> {
        sleep(self.increment_delay).await;
        self.inner.increment_seats(flight_id, seats).await
    }

    async fn insert_booking(&self, booking: &NewBooking) -> StoreResult<Booking> {
        sleep(self.insert_delay).await;
        self.inner.insert_booking(booking).await
    }

    async fn load_booking(&self, booking_id: Uuid) -> StoreResult<Option<Booking>> {
        self.inner.load_booking(booking_id).await
    }

    async fn update_booking_status(
        &self,
        booking_id: Uuid,
        expected: BookingStatus,
        status: BookingStatus,
    ) -> StoreResult<bool> {
        self.inner.update_booking_status(booking_id, expected, status).await
    }

    async fn list_bookings_for_requester(&self, requester_id: Uuid) -> StoreResult<Vec<Booking>> {
        self.inner.list_bookings_for_requester(requester_id).await
    }

    async fn list_bookings(&self) -> StoreResult<Vec<Booking>> {
        self.inner.list_bookings().await
    }
}

async fn engine_with(db: &Arc<MemoryDatabase>, config: PoolConfig) -> (ReservationEngine, Arc<MemoryInventoryRepository>) {
    let repo = Arc::new(
        MemoryInventoryRepository::new(Arc::clone(db), config)
            .await
            .unwrap(),
    );
    (ReservationEngine::new(repo.clone()), repo)
}

async fn engine(db: &Arc<MemoryDatabase>) -> (ReservationEngine, Arc<MemoryInventoryRepository>) {
    engine_with(
        db,
        PoolConfig {
            initial_size: 2,
            max_size: 8,
            acquire_timeout: Some(Duration::from_secs(2)),
        },
    )
    .await
}

#[tokio::test]
async fn test_create_booking_reserves_seats_and_prices() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD101", 10, 12_500, FlightStatus::Scheduled);
    let (engine, _) = engine(&db).await;
    let requester = Uuid::new_v4();

    let booking = engine.create_booking(requester, flight_id, 3).await.unwrap();

    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.seats_booked, 3);
    assert_eq!(booking.total_price_amount, 37_500);
    assert_eq!(booking.currency, "USD");
    assert_eq!(booking.flight_number, "AD101");
    assert_eq!(booking.requester_id, requester);
    assert_eq!(db.seats_available(flight_id), Some(7));
}

#[tokio::test]
async fn test_non_positive_seats_are_invalid() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD102", 10, 1_000, FlightStatus::Scheduled);
    let (engine, _) = engine(&db).await;

    for seats in [0, -2] {
        let err = engine
            .create_booking(Uuid::new_v4(), flight_id, seats)
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::InvalidRequest(_)));
    }
    assert_eq!(db.seats_available(flight_id), Some(10));
}

#[tokio::test]
async fn test_unknown_flight_is_not_found() {
    let db = MemoryDatabase::new();
    let (engine, _) = engine(&db).await;

    let err = engine
        .create_booking(Uuid::new_v4(), Uuid::new_v4(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::NotFound { entity: "Flight", .. }));
}

#[tokio::test]
async fn test_cancelled_flight_is_unavailable_and_untouched() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD103", 5, 1_000, FlightStatus::Cancelled);
    let (engine, _) = engine(&db).await;

    let err = engine
        .create_booking(Uuid::new_v4(), flight_id, 1)
        .await
        .unwrap_err();

    assert!(matches!(err, ReservationError::Unavailable(id) if id == flight_id));
    assert_eq!(db.seats_available(flight_id), Some(5));
}

#[tokio::test]
async fn test_delayed_flight_is_still_bookable() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD104", 5, 1_000, FlightStatus::Delayed);
    let (engine, _) = engine(&db).await;

    assert!(engine.create_booking(Uuid::new_v4(), flight_id, 5).await.is_ok());
    assert_eq!(db.seats_available(flight_id), Some(0));
}

#[tokio::test]
async fn test_insufficient_capacity_performs_no_mutation() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD105", 2, 1_000, FlightStatus::Scheduled);
    let (engine, repo) = engine(&db).await;

    let err = engine
        .create_booking(Uuid::new_v4(), flight_id, 3)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReservationError::InsufficientCapacity { requested: 3, available: 2, .. }
    ));
    assert_eq!(db.seats_available(flight_id), Some(2));
    assert!(repo.pool().status().on_loan == 0);
}

#[tokio::test]
async fn test_failed_insert_rolls_back_seats() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD106", 4, 1_000, FlightStatus::Scheduled);
    let (engine, repo) = engine(&db).await;

    db.fail_next_insert();
    let err = engine
        .create_booking(Uuid::new_v4(), flight_id, 3)
        .await
        .unwrap_err();

    assert!(matches!(err, ReservationError::Store(_)));
    assert_eq!(db.seats_available(flight_id), Some(4));
    assert!(engine.list_bookings().await.unwrap().is_empty());
    assert_eq!(repo.pool().status().on_loan, 0);
}

#[tokio::test]
async fn test_cancel_restores_exactly_booked_seats_once() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD107", 10, 1_000, FlightStatus::Scheduled);
    let (engine, _) = engine(&db).await;
    let requester = Uuid::new_v4();

    let booking = engine.create_booking(requester, flight_id, 4).await.unwrap();
    assert_eq!(db.seats_available(flight_id), Some(6));

    assert!(engine.cancel_booking(booking.id, requester).await.unwrap());
    assert_eq!(db.seats_available(flight_id), Some(10));

    let err = engine.cancel_booking(booking.id, requester).await.unwrap_err();
    assert!(matches!(err, ReservationError::AlreadyCancelled(id) if id == booking.id));
    assert_eq!(db.seats_available(flight_id), Some(10));

    let stored = engine.get_booking(booking.id, requester, false).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Cancelled);
    assert_eq!(stored.total_price_amount, 4_000);
}

#[tokio::test]
async fn test_cancel_by_other_requester_is_forbidden() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD108", 10, 1_000, FlightStatus::Scheduled);
    let (engine, _) = engine(&db).await;
    let owner = Uuid::new_v4();

    let booking = engine.create_booking(owner, flight_id, 2).await.unwrap();
    let err = engine
        .cancel_booking(booking.id, Uuid::new_v4())
        .await
        .unwrap_err();

    assert!(matches!(err, ReservationError::Forbidden { .. }));
    assert_eq!(db.seats_available(flight_id), Some(8));
}

#[tokio::test]
async fn test_cancel_unknown_booking_is_not_found() {
    let db = MemoryDatabase::new();
    let (engine, _) = engine(&db).await;

    let err = engine
        .cancel_booking(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::NotFound { entity: "Booking", .. }));
}

#[tokio::test]
async fn test_completed_booking_cannot_be_cancelled() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD109", 10, 1_000, FlightStatus::Arrived);
    let (engine, _) = engine(&db).await;
    let requester = Uuid::new_v4();

    let booking = engine.create_booking(requester, flight_id, 1).await.unwrap();
    assert!(db.complete_booking(booking.id));

    let err = engine.cancel_booking(booking.id, requester).await.unwrap_err();
    assert!(matches!(err, ReservationError::InvalidRequest(_)));
    assert_eq!(db.seats_available(flight_id), Some(9));
}

#[tokio::test]
async fn test_failed_seat_restore_is_degraded_cancellation() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD110", 10, 1_000, FlightStatus::Scheduled);
    let (engine, _) = engine(&db).await;
    let requester = Uuid::new_v4();

    let booking = engine.create_booking(requester, flight_id, 3).await.unwrap();
    db.fail_next_increment();

    let err = engine.cancel_booking(booking.id, requester).await.unwrap_err();
    match err {
        ReservationError::DegradedCancellation {
            booking_id,
            flight_id: degraded_flight,
            seats,
            ..
        } => {
            assert_eq!(booking_id, booking.id);
            assert_eq!(degraded_flight, flight_id);
            assert_eq!(seats, 3);
        }
        other => panic!("expected DegradedCancellation, got {:?}", other),
    }

    // Booking stays cancelled, seats stay withheld until reconciled.
    let stored = engine.get_booking(booking.id, requester, false).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Cancelled);
    assert_eq!(db.seats_available(flight_id), Some(7));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_requests_for_last_two_seats() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD111", 2, 1_000, FlightStatus::Scheduled);
    let (engine, _) = engine(&db).await;

    let a = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.create_booking(Uuid::new_v4(), flight_id, 2).await })
    };
    let b = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.create_booking(Uuid::new_v4(), flight_id, 2).await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let oversold = results
        .iter()
        .filter(|r| matches!(r, Err(ReservationError::InsufficientCapacity { .. })))
        .count();

    assert_eq!(succeeded, 1);
    assert_eq!(oversold, 1);
    assert_eq!(db.seats_available(flight_id), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_bookings_never_oversell() {
    const CAPACITY: i32 = 25;
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD112", CAPACITY, 1_000, FlightStatus::Scheduled);
    let (engine, repo) = engine(&db).await;

    let mut handles = Vec::new();
    for i in 0..40 {
        let engine = engine.clone();
        let seats = (i % 3) + 1;
        handles.push(tokio::spawn(async move {
            (seats, engine.create_booking(Uuid::new_v4(), flight_id, seats).await)
        }));
    }

    let mut booked = 0;
    for handle in handles {
        let (seats, result) = handle.await.unwrap();
        match result {
            Ok(_) => booked += seats,
            Err(ReservationError::InsufficientCapacity { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert!(booked <= CAPACITY);
    assert_eq!(db.seats_available(flight_id), Some(CAPACITY - booked));
    assert_eq!(db.seats_held(flight_id), booked);
    assert_eq!(repo.pool().status().on_loan, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_interleaved_create_and_cancel_keep_capacity_invariant() {
    const CAPACITY: i32 = 12;
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD113", CAPACITY, 1_000, FlightStatus::Scheduled);
    let (engine, _) = engine(&db).await;

    let mut handles = Vec::new();
    for i in 0..24 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let requester = Uuid::new_v4();
            let Ok(booking) = engine.create_booking(requester, flight_id, 1 + i % 2).await else {
                return;
            };
            if i % 3 == 0 {
                engine.cancel_booking(booking.id, requester).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let available = db.seats_available(flight_id).unwrap();
    assert!(available >= 0);
    assert_eq!(available + db.seats_held(flight_id), CAPACITY);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_double_cancel_restores_once() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD114", 6, 1_000, FlightStatus::Scheduled);
    let (engine, _) = engine(&db).await;
    let requester = Uuid::new_v4();
    let booking = engine.create_booking(requester, flight_id, 4).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.cancel_booking(booking.id, requester).await }));
    }

    let mut cancelled = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(true) => cancelled += 1,
            Err(ReservationError::AlreadyCancelled(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    assert_eq!(cancelled, 1);
    assert_eq!(db.seats_available(flight_id), Some(6));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bookings_on_different_flights_are_independent() {
    let db = MemoryDatabase::new();
    let first = db.add_flight("AD115", 3, 1_000, FlightStatus::Scheduled);
    let second = db.add_flight("AD116", 3, 1_000, FlightStatus::Scheduled);
    let (engine, _) = engine(&db).await;

    let mut handles = Vec::new();
    for flight_id in [first, second, first, second, first, second] {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.create_booking(Uuid::new_v4(), flight_id, 1).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(db.seats_available(first), Some(0));
    assert_eq!(db.seats_available(second), Some(0));
}

#[tokio::test]
async fn test_exhausted_pool_surfaces_pool_exhausted() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD117", 10, 1_000, FlightStatus::Scheduled);
    let (engine, repo) = engine_with(
        &db,
        PoolConfig {
            initial_size: 1,
            max_size: 1,
            acquire_timeout: None,
        },
    )
    .await;

    let held = repo.pool().acquire().await.unwrap();
    let err = engine
        .create_booking(Uuid::new_v4(), flight_id, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::PoolExhausted));
    assert!(err.is_transient());

    repo.pool().release(held).unwrap();
    assert!(engine.create_booking(Uuid::new_v4(), flight_id, 1).await.is_ok());
}

#[tokio::test]
async fn test_closed_pool_surfaces_pool_closed() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD118", 10, 1_000, FlightStatus::Scheduled);
    let (engine, repo) = engine(&db).await;

    repo.pool().shutdown().await;
    let err = engine
        .create_booking(Uuid::new_v4(), flight_id, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::PoolClosed));
    assert_eq!(db.seats_available(flight_id), Some(10));
}

#[tokio::test]
async fn test_booking_visibility_and_listing() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD119", 10, 1_000, FlightStatus::Scheduled);
    let (engine, _) = engine(&db).await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let mine = engine.create_booking(alice, flight_id, 1).await.unwrap();
    engine.create_booking(bob, flight_id, 2).await.unwrap();

    assert!(matches!(
        engine.get_booking(mine.id, bob, false).await,
        Err(ReservationError::Forbidden { .. })
    ));
    assert_eq!(engine.get_booking(mine.id, bob, true).await.unwrap().id, mine.id);

    let listed = engine.list_bookings_for_requester(alice).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, mine.id);
    assert_eq!(engine.list_bookings().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_events_are_published() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD120", 10, 1_000, FlightStatus::Scheduled);
    let (engine, _) = engine(&db).await;
    let (tx, mut rx) = broadcast::channel(8);
    let engine = engine.with_events(tx);
    let requester = Uuid::new_v4();

    let booking = engine.create_booking(requester, flight_id, 2).await.unwrap();
    engine.cancel_booking(booking.id, requester).await.unwrap();

    match rx.recv().await.unwrap() {
        BookingEvent::BookingConfirmed { booking_id, seats, .. } => {
            assert_eq!(booking_id, booking.id);
            assert_eq!(seats, 2);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    let cancelled = rx.recv().await.unwrap();
    assert!(matches!(cancelled, BookingEvent::BookingCancelled { .. }));
    assert_eq!(cancelled.flight_id(), flight_id);
}

#[tokio::test]
async fn test_abandoned_create_still_records_booking() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD121", 10, 1_000, FlightStatus::Scheduled);
    let mut repo = InterposedRepository::new(&db).await;
    repo.insert_delay = Duration::from_millis(100);
    let engine = ReservationEngine::new(Arc::new(repo));
    let requester = Uuid::new_v4();

    let abandoned = timeout(
        Duration::from_millis(30),
        engine.create_booking(requester, flight_id, 3),
    )
    .await;
    assert!(abandoned.is_err());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(db.seats_available(flight_id), Some(7));
    assert_eq!(db.seats_held(flight_id), 3);
    let mine = engine.list_bookings_for_requester(requester).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_abandoned_cancel_still_restores_seats() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD122", 10, 1_000, FlightStatus::Scheduled);
    let mut repo = InterposedRepository::new(&db).await;
    repo.increment_delay = Duration::from_millis(100);
    let engine = ReservationEngine::new(Arc::new(repo));
    let requester = Uuid::new_v4();

    let booking = engine.create_booking(requester, flight_id, 4).await.unwrap();
    assert_eq!(db.seats_available(flight_id), Some(6));

    let abandoned = timeout(
        Duration::from_millis(30),
        engine.cancel_booking(booking.id, requester),
    )
    .await;
    assert!(abandoned.is_err());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(db.seats_available(flight_id), Some(10));
    let stored = engine.get_booking(booking.id, requester, false).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn test_flight_cancelled_after_check_is_not_booked() {
    let db = MemoryDatabase::new();
    let flight_id = db.add_flight("AD123", 10, 1_000, FlightStatus::Scheduled);
    let repo = InterposedRepository::new(&db).await;
    repo.cancel_flight_after_load.store(true, Ordering::SeqCst);
    let engine = ReservationEngine::new(Arc::new(repo));

    let err = engine
        .create_booking(Uuid::new_v4(), flight_id, 2)
        .await
        .unwrap_err();

    assert!(matches!(err, ReservationError::Unavailable(id) if id == flight_id));
    assert_eq!(db.seats_available(flight_id), Some(10));
    assert_eq!(db.seats_held(flight_id), 0);
}
