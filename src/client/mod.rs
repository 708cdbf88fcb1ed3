mod core;

pub use self::core::ChatClient;
