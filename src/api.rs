pub mod chat;

pub use chat::get_routes as chat_routes;
