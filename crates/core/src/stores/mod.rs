#[cfg(test)]
pub(crate) mod faulty;
pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
