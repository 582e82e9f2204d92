// 会话状态与存储模块

mod session;
mod store;

pub use session::{Clock, FixedClock, HistoryEntry, Session, SessionStatus, SystemClock};
#[cfg(feature = "redis-store")]
pub use store::redis::RedisSessionRepository;
pub use store::{MemorySessionRepository, SessionGuard, SessionRepository, SessionStore};
