use aerodesk_core::{InventoryRepository, ResourcePool, StoreError, StoreResult};
use aerodesk_shared::{Booking, BookingStatus, FlightStatus, NewBooking, SeatInventory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::PgConnector;

/// Postgres-backed seat inventory and bookings.
///
/// Seat changes are single conditional UPDATE statements, so they stay
/// correct across processes sharing the same database.
pub struct PostgresInventoryRepository {
    pool: ResourcePool<PgConnector>,
}

impl PostgresInventoryRepository {
    pub fn new(pool: ResourcePool<PgConnector>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ResourcePool<PgConnector> {
        &self.pool
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct FlightRow {
    id: Uuid,
    flight_number: String,
    seats_available: i32,
    price_amount: i64,
    currency: String,
    status: String,
}

impl TryFrom<FlightRow> for SeatInventory {
    type Error = StoreError;

    fn try_from(row: FlightRow) -> Result<Self, Self::Error> {
        Ok(SeatInventory {
            flight_id: row.id,
            flight_number: row.flight_number,
            seats_available: row.seats_available,
            price_amount: row.price_amount,
            currency: row.currency,
            status: row.status.parse::<FlightStatus>().map_err(StoreError::Backend)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    flight_id: Uuid,
    flight_number: String,
    requester_id: Uuid,
    seats_booked: i32,
    total_price_amount: i64,
    currency: String,
    status: String,
    booked_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            flight_id: row.flight_id,
            flight_number: row.flight_number,
            requester_id: row.requester_id,
            seats_booked: row.seats_booked,
            total_price_amount: row.total_price_amount,
            currency: row.currency,
            status: row.status.parse::<BookingStatus>().map_err(StoreError::Backend)?,
            booked_at: row.booked_at,
            updated_at: row.updated_at,
        })
    }
}

// Bookings joined with their flight for the flight number
const BOOKING_SELECT: &str = "SELECT b.id, b.flight_id, f.flight_number, b.requester_id, b.seats_booked, \
     b.total_price_amount, b.currency, b.status, b.booked_at, b.updated_at \
     FROM bookings b JOIN flights f ON f.id = b.flight_id";

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn into_bookings(rows: Vec<BookingRow>) -> StoreResult<Vec<Booking>> {
    rows.into_iter().map(Booking::try_from).collect()
}

#[async_trait]
impl InventoryRepository for PostgresInventoryRepository {
    async fn load_flight_inventory(&self, flight_id: Uuid) -> StoreResult<Option<SeatInventory>> {
        let mut conn = self.pool.get().await?;
        let row = sqlx::query_as::<_, FlightRow>(
            r#"
            SELECT id, flight_number, seats_available, price_amount, currency, status
            FROM flights
            WHERE id = $1
            "#,
        )
        .bind(flight_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

        row.map(SeatInventory::try_from).transpose()
    }

    async fn conditional_decrement_seats(&self, flight_id: Uuid, seats: i32) -> StoreResult<bool> {
        let mut conn = self.pool.get().await?;
        let result = sqlx::query(
            r#"
            UPDATE flights
            SET seats_available = seats_available - $2, updated_at = NOW()
            WHERE id = $1 AND seats_available >= $2 AND status <> 'CANCELLED'
            "#,
        )
        .bind(flight_id)
        .bind(seats)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn increment_seats(&self, flight_id: Uuid, seats: i32) -> StoreResult<()> {
        let mut conn = self.pool.get().await?;
        let result = sqlx::query(
            r#"
            UPDATE flights
            SET seats_available = seats_available + $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(flight_id)
        .bind(seats)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("Flight {} not found", flight_id)));
        }
        Ok(())
    }

    async fn insert_booking(&self, booking: &NewBooking) -> StoreResult<Booking> {
        let record = booking.clone().into_booking(Uuid::new_v4());
        let mut conn = self.pool.get().await?;
        sqlx::query(
            r#"
            INSERT INTO bookings (id, flight_id, requester_id, seats_booked, total_price_amount, currency, status, booked_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(record.flight_id)
        .bind(record.requester_id)
        .bind(record.seats_booked)
        .bind(record.total_price_amount)
        .bind(&record.currency)
        .bind(record.status.as_str())
        .bind(record.booked_at)
        .bind(record.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

        Ok(record)
    }

    async fn load_booking(&self, booking_id: Uuid) -> StoreResult<Option<Booking>> {
        let mut conn = self.pool.get().await?;
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "{} WHERE b.id = $1",
            BOOKING_SELECT
        ))
        .bind(booking_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

        row.map(Booking::try_from).transpose()
    }

    async fn update_booking_status(
        &self,
        booking_id: Uuid,
        expected: BookingStatus,
        status: BookingStatus,
    ) -> StoreResult<bool> {
        let mut conn = self.pool.get().await?;
        let result = sqlx::query(
            r#"
            UPDATE bookings SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(booking_id)
        .bind(expected.as_str())
        .bind(status.as_str())
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_bookings_for_requester(&self, requester_id: Uuid) -> StoreResult<Vec<Booking>> {
        let mut conn = self.pool.get().await?;
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "{} WHERE b.requester_id = $1 ORDER BY b.booked_at DESC",
            BOOKING_SELECT
        ))
        .bind(requester_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;

        into_bookings(rows)
    }

    async fn list_bookings(&self) -> StoreResult<Vec<Booking>> {
        let mut conn = self.pool.get().await?;
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "{} ORDER BY b.booked_at DESC",
            BOOKING_SELECT
        ))
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;

        into_bookings(rows)
    }
}
