pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod events;
pub mod gateway;
pub mod redis_repo;
pub mod schedule_repo;

pub use booking_repo::PgBookingLedger;
pub use database::DbClient;
pub use events::{EventProducer, KafkaEventSink, KafkaNotifier};
pub use gateway::HttpPaymentGateway;
pub use redis_repo::RedisClient;
pub use schedule_repo::PgScheduleRepository;
