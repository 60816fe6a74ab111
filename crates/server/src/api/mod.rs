pub mod audit;
pub mod cycle;
pub mod evidence;
pub mod handlers;
pub mod library;
pub mod middleware;
pub mod requests;
pub mod routes;
pub mod webhook;

pub use routes::create_router;
