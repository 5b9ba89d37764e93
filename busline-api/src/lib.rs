use axum::{
    http::Method,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod bookings;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod ops;
pub mod payments;
pub mod seats;
pub mod state;
pub mod stream;
pub mod tracking;
pub mod worker;

pub use state::{AppState, AuthConfig};

use middleware::{customer_auth_middleware, operator_auth_middleware, rate_limit_middleware};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    // Passenger routes: identity comes from the bearer token's `sub`
    let customer = Router::new()
        .merge(bookings::routes())
        .merge(payments::routes(state.clone()))
        .route("/v1/events/me", get(stream::my_events))
        .route_layer(from_fn_with_state(state.clone(), customer_auth_middleware));

    let operator = Router::new()
        .route("/v1/buses/{bus_id}/location", post(tracking::update_location))
        .route("/v1/schedules/{schedule_id}/arrival", post(tracking::announce_arrival))
        .route(
            "/v1/schedules/{schedule_id}/destination",
            post(tracking::announce_destination),
        )
        .route_layer(from_fn_with_state(state.clone(), operator_auth_middleware));

    let public = Router::new()
        .merge(auth::routes())
        .merge(seats::routes())
        .merge(ops::routes())
        .route("/v1/events/bus/{bus_id}", get(stream::bus_events));

    Router::new()
        .merge(customer)
        .merge(operator)
        .merge(public)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .with_state(state)
}
