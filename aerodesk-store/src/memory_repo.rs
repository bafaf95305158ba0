//! In-process backing store.
//!
//! Reached only through pooled [`MemoryConnection`]s so the same pool
//! accounting applies as with Postgres. Each flight row has its own lock:
//! seat updates on one flight never wait on another.

use aerodesk_core::{
    ConnectionManager, InventoryRepository, PoolConfig, PoolError, ResourcePool, StoreError,
    StoreResult,
};
use aerodesk_shared::{Booking, BookingStatus, FlightStatus, NewBooking, SeatInventory};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Faults {
    fail_connect: AtomicBool,
    fail_next_insert: AtomicBool,
    fail_next_increment: AtomicBool,
}

/// Shared tables behind every memory connection
#[derive(Default)]
pub struct MemoryDatabase {
    flights: RwLock<HashMap<Uuid, Arc<Mutex<SeatInventory>>>>,
    bookings: RwLock<HashMap<Uuid, Booking>>,
    // Connections opened before this generation fail validation.
    generation: AtomicU64,
    opened: AtomicUsize,
    closed: AtomicUsize,
    faults: Faults,
}

impl MemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a flight with `seats` available, returning its id
    pub fn add_flight(
        &self,
        flight_number: &str,
        seats: i32,
        price_amount: i64,
        status: FlightStatus,
    ) -> Uuid {
        let flight_id = Uuid::new_v4();
        let inventory = SeatInventory {
            flight_id,
            flight_number: flight_number.to_string(),
            seats_available: seats,
            price_amount,
            currency: "USD".to_string(),
            status,
        };
        self.flights
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(flight_id, Arc::new(Mutex::new(inventory)));
        flight_id
    }

    pub fn set_flight_status(&self, flight_id: Uuid, status: FlightStatus) -> bool {
        match self.flight(flight_id) {
            Some(row) => {
                lock(&row).status = status;
                true
            }
            None => false,
        }
    }

    /// Current counter, bypassing the pool
    pub fn seats_available(&self, flight_id: Uuid) -> Option<i32> {
        self.flight(flight_id).map(|row| lock(&row).seats_available)
    }

    /// Seats held by confirmed or completed bookings on a flight
    pub fn seats_held(&self, flight_id: Uuid) -> i32 {
        self.bookings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|b| b.flight_id == flight_id && b.status.holds_seats())
            .map(|b| b.seats_booked)
            .sum()
    }

    /// Out-of-band transition, e.g. after the flight has arrived
    pub fn complete_booking(&self, booking_id: Uuid) -> bool {
        let mut bookings = self.bookings.write().unwrap_or_else(PoisonError::into_inner);
        match bookings.get_mut(&booking_id) {
            Some(b) if b.status == BookingStatus::Confirmed => {
                b.status = BookingStatus::Completed;
                b.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn connections_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make every currently open connection fail its next validation
    pub fn invalidate_connections(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.faults.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// The next booking insert fails after reaching the store
    pub fn fail_next_insert(&self) {
        self.faults.fail_next_insert.store(true, Ordering::SeqCst);
    }

    /// The next seat increment fails after reaching the store
    pub fn fail_next_increment(&self) {
        self.faults.fail_next_increment.store(true, Ordering::SeqCst);
    }

    fn flight(&self, flight_id: Uuid) -> Option<Arc<Mutex<SeatInventory>>> {
        self.flights
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&flight_id)
            .cloned()
    }
}

/// A pooled handle onto a [`MemoryDatabase`]
pub struct MemoryConnection {
    db: Arc<MemoryDatabase>,
    generation: u64,
}

impl MemoryConnection {
    fn load_flight_inventory(&self, flight_id: Uuid) -> Option<SeatInventory> {
        self.db.flight(flight_id).map(|row| lock(&row).clone())
    }

    fn conditional_decrement_seats(&self, flight_id: Uuid, seats: i32) -> bool {
        let Some(row) = self.db.flight(flight_id) else {
            return false;
        };
        let mut inventory = lock(&row);
        if !inventory.status.is_bookable() || inventory.seats_available < seats {
            return false;
        }
        inventory.seats_available -= seats;
        true
    }

    fn increment_seats(&self, flight_id: Uuid, seats: i32) -> StoreResult<()> {
        if self.db.faults.fail_next_increment.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("injected increment failure".to_string()));
        }
        let row = self
            .db
            .flight(flight_id)
            .ok_or_else(|| StoreError::Backend(format!("Flight {} not found", flight_id)))?;
        lock(&row).seats_available += seats;
        Ok(())
    }

    fn insert_booking(&self, booking: &NewBooking) -> StoreResult<Booking> {
        if self.db.faults.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("injected insert failure".to_string()));
        }
        let record = booking.clone().into_booking(Uuid::new_v4());
        self.db
            .bookings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id, record.clone());
        Ok(record)
    }

    fn load_booking(&self, booking_id: Uuid) -> Option<Booking> {
        self.db
            .bookings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&booking_id)
            .cloned()
    }

    fn update_booking_status(&self, booking_id: Uuid, expected: BookingStatus, status: BookingStatus) -> bool {
        let mut bookings = self.db.bookings.write().unwrap_or_else(PoisonError::into_inner);
        match bookings.get_mut(&booking_id) {
            Some(b) if b.status == expected => {
                b.status = status;
                b.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn list_bookings<F>(&self, filter: F) -> Vec<Booking>
    where
        F: Fn(&Booking) -> bool,
    {
        let mut bookings: Vec<Booking> = self
            .db
            .bookings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|b| filter(b))
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.booked_at.cmp(&a.booked_at));
        bookings
    }
}

/// Hands out [`MemoryConnection`]s to a pool
pub struct MemoryConnector {
    db: Arc<MemoryDatabase>,
}

impl MemoryConnector {
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConnectionManager for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, PoolError> {
        if self.db.faults.fail_connect.load(Ordering::SeqCst) {
            return Err(PoolError::Connect("memory database refused connection".to_string()));
        }
        self.db.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            db: Arc::clone(&self.db),
            generation: self.db.generation.load(Ordering::SeqCst),
        })
    }

    async fn is_valid(&self, conn: &mut MemoryConnection) -> bool {
        conn.generation >= self.db.generation.load(Ordering::SeqCst)
    }

    async fn close(&self, _conn: MemoryConnection) {
        self.db.closed.fetch_add(1, Ordering::SeqCst);
        debug!("Memory connection closed");
    }
}

pub struct MemoryInventoryRepository {
    pool: ResourcePool<MemoryConnector>,
}

impl MemoryInventoryRepository {
    pub async fn new(db: Arc<MemoryDatabase>, config: PoolConfig) -> Result<Self, PoolError> {
        let pool = ResourcePool::new(MemoryConnector::new(db), config).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &ResourcePool<MemoryConnector> {
        &self.pool
    }
}

#[async_trait]
impl InventoryRepository for MemoryInventoryRepository {
    async fn load_flight_inventory(&self, flight_id: Uuid) -> StoreResult<Option<SeatInventory>> {
        let conn = self.pool.get().await?;
        Ok(conn.load_flight_inventory(flight_id))
    }

    async fn conditional_decrement_seats(&self, flight_id: Uuid, seats: i32) -> StoreResult<bool> {
        let conn = self.pool.get().await?;
        Ok(conn.conditional_decrement_seats(flight_id, seats))
    }

    async fn increment_seats(&self, flight_id: Uuid, seats: i32) -> StoreResult<()> {
        let conn = self.pool.get().await?;
        conn.increment_seats(flight_id, seats)
    }

    async fn insert_booking(&self, booking: &NewBooking) -> StoreResult<Booking> {
        let conn = self.pool.get().await?;
        conn.insert_booking(booking)
    }

    async fn load_booking(&self, booking_id: Uuid) -> StoreResult<Option<Booking>> {
        let conn = self.pool.get().await?;
        Ok(conn.load_booking(booking_id))
    }

    async fn update_booking_status(
        &self,
        booking_id: Uuid,
        expected: BookingStatus,
        status: BookingStatus,
    ) -> StoreResult<bool> {
        let conn = self.pool.get().await?;
        Ok(conn.update_booking_status(booking_id, expected, status))
    }

    async fn list_bookings_for_requester(&self, requester_id: Uuid) -> StoreResult<Vec<Booking>> {
        let conn = self.pool.get().await?;
        Ok(conn.list_bookings(|b| b.requester_id == requester_id))
    }

    async fn list_bookings(&self) -> StoreResult<Vec<Booking>> {
        let conn = self.pool.get().await?;
        Ok(conn.list_bookings(|_| true))
    }
}
