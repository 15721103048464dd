mod chat;

pub use chat::ChatDbService;
