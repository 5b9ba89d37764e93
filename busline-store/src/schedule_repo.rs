use async_trait::async_trait;
use busline_core::{FareComponents, Schedule, ScheduleRepository, ScheduleStatus};
use chrono::{DateTime, Utc};
use std::error::Error;
use uuid::Uuid;

pub struct PgScheduleRepository {
    pool: sqlx::PgPool,
}

impl PgScheduleRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: Uuid,
    route_id: Uuid,
    bus_id: Uuid,
    departure_time: DateTime<Utc>,
    arrival_time: DateTime<Utc>,
    fare_base: i64,
    fare_tax: i64,
    fare_service: i64,
    seat_labels: Vec<String>,
    status: String,
}

#[async_trait]
impl ScheduleRepository for PgScheduleRepository {
    async fn get_schedule(&self, id: Uuid) -> Result<Option<Schedule>, Box<dyn Error + Send + Sync>> {
        let row: Option<ScheduleRow> = sqlx::query_as(
            r#"
            SELECT id, route_id, bus_id, departure_time, arrival_time,
                   fare_base, fare_tax, fare_service, seat_labels, status
            FROM schedules
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status = ScheduleStatus::parse(&row.status)
            .ok_or_else(|| format!("Unknown schedule status {}", row.status))?;

        Ok(Some(Schedule {
            id: row.id,
            route_id: row.route_id,
            bus_id: row.bus_id,
            departure_time: row.departure_time,
            arrival_time: row.arrival_time,
            fare: FareComponents::new(row.fare_base, row.fare_tax, row.fare_service),
            seat_labels: row.seat_labels,
            status,
        }))
    }
}
