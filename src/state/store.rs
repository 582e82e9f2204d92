use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::session::Session;
use crate::error::{ConvoFlowError, Result};

/// 会话持久化协作者，按会话 id 存取
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;
    async fn put(&self, session: Session) -> Result<()>;
    async fn find_by_flow(&self, flow_id: &str) -> Result<Vec<Session>>;
    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// 内存存储实现
#[derive(Default)]
pub struct MemorySessionRepository {
    inner: RwLock<HashMap<String, Session>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.inner.read().get(session_id).cloned())
    }

    async fn put(&self, session: Session) -> Result<()> {
        self.inner.write().insert(session.id.clone(), session);
        Ok(())
    }

    async fn find_by_flow(&self, flow_id: &str) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .inner
            .read()
            .values()
            .filter(|session| session.flow_id == flow_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(sessions)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.inner.write().remove(session_id);
        Ok(())
    }
}

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// 会话存储：持久化之上加每会话互斥，保证同一会话的 step 串行
pub struct SessionStore {
    repository: Arc<dyn SessionRepository>,
    locks: LockTable,
}

/// 持有期间，同一会话的其他 step 会等待
///
/// 释放时若没有其他持有者或等待者，锁表中的条目随之删除。
pub struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    session_id: String,
    locks: LockTable,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        // 克隆只发生在表锁内，计数为 1 说明只剩表本身引用
        let idle = locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.session_id);
        }
    }
}

impl SessionStore {
    pub fn new(repository: Arc<dyn SessionRepository>) -> Self {
        Self {
            repository,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionRepository::new()))
    }

    /// 获取会话的独占锁
    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(
                locks
                    .entry(session_id.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        SessionGuard {
            guard: Some(lock.lock_owned().await),
            session_id: session_id.to_string(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// 当前被持有或等待中的会话锁数量
    pub fn active_locks(&self) -> usize {
        self.locks.lock().len()
    }

    pub async fn get(&self, session_id: &str) -> Result<Session> {
        self.repository
            .get(session_id)
            .await?
            .ok_or_else(|| ConvoFlowError::SessionNotFound(session_id.to_string()))
    }

    pub async fn put(&self, session: Session) -> Result<()> {
        self.repository.put(session).await
    }

    pub async fn find_by_flow(&self, flow_id: &str) -> Result<Vec<Session>> {
        self.repository.find_by_flow(flow_id).await
    }

    pub async fn remove(&self, session_id: &str) -> Result<()> {
        let _guard = self.lock(session_id).await;
        self.repository.delete(session_id).await
    }
}

#[cfg(feature = "redis-store")]
pub mod redis {
    use super::*;
    use ::redis::AsyncCommands;

    const SESSION_PREFIX: &str = "session";
    const FLOW_INDEX_PREFIX: &str = "flow-sessions";

    pub struct RedisSessionRepository {
        client: ::redis::Client,
    }

    impl RedisSessionRepository {
        pub fn new(client: ::redis::Client) -> Self {
            Self { client }
        }

        async fn connection(&self) -> Result<::redis::aio::MultiplexedConnection> {
            self.client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| ConvoFlowError::Store(e.to_string()))
        }

        fn key(session_id: &str) -> String {
            format!("{SESSION_PREFIX}:{session_id}")
        }

        fn flow_key(flow_id: &str) -> String {
            format!("{FLOW_INDEX_PREFIX}:{flow_id}")
        }
    }

    #[async_trait]
    impl SessionRepository for RedisSessionRepository {
        async fn get(&self, session_id: &str) -> Result<Option<Session>> {
            let mut conn = self.connection().await?;
            let value: Option<String> = conn
                .get(Self::key(session_id))
                .await
                .map_err(|e| ConvoFlowError::Store(e.to_string()))?;
            value
                .map(|raw| {
                    serde_json::from_str(&raw).map_err(|e| ConvoFlowError::Store(e.to_string()))
                })
                .transpose()
        }

        async fn put(&self, session: Session) -> Result<()> {
            let mut conn = self.connection().await?;
            let raw =
                serde_json::to_string(&session).map_err(|e| ConvoFlowError::Store(e.to_string()))?;
            conn.set::<_, _, ()>(Self::key(&session.id), raw)
                .await
                .map_err(|e| ConvoFlowError::Store(e.to_string()))?;
            conn.sadd::<_, _, ()>(Self::flow_key(&session.flow_id), &session.id)
                .await
                .map_err(|e| ConvoFlowError::Store(e.to_string()))?;
            Ok(())
        }

        async fn find_by_flow(&self, flow_id: &str) -> Result<Vec<Session>> {
            let mut conn = self.connection().await?;
            let ids: Vec<String> = conn
                .smembers(Self::flow_key(flow_id))
                .await
                .map_err(|e| ConvoFlowError::Store(e.to_string()))?;
            let mut sessions = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(session) = self.get(&id).await? {
                    sessions.push(session);
                }
            }
            sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(sessions)
        }

        async fn delete(&self, session_id: &str) -> Result<()> {
            let Some(session) = self.get(session_id).await? else {
                return Ok(());
            };
            let mut conn = self.connection().await?;
            conn.del::<_, ()>(Self::key(session_id))
                .await
                .map_err(|e| ConvoFlowError::Store(e.to_string()))?;
            conn.srem::<_, _, ()>(Self::flow_key(&session.flow_id), session_id)
                .await
                .map_err(|e| ConvoFlowError::Store(e.to_string()))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::builder::FlowBuilder;
    use chrono::Utc;
    use std::time::Duration;

    fn session(flow: &str) -> Session {
        let mut builder = FlowBuilder::new(flow);
        builder.add_start("start").add_end("done").connect("start", "done");
        Session::new(&builder.build(), Utc::now())
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let store = SessionStore::in_memory();
        assert!(matches!(
            store.get("nope").await,
            Err(ConvoFlowError::SessionNotFound(id)) if id == "nope"
        ));
    }

    #[tokio::test]
    async fn find_by_flow_filters_sessions() -> anyhow::Result<()> {
        let store = SessionStore::in_memory();
        store.put(session("a")).await?;
        store.put(session("a")).await?;
        store.put(session("b")).await?;
        assert_eq!(store.find_by_flow("a").await?.len(), 2);
        assert_eq!(store.find_by_flow("b").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn remove_deletes_session() -> anyhow::Result<()> {
        let store = SessionStore::in_memory();
        let session = session("a");
        let id = session.id.clone();
        store.put(session).await?;
        store.remove(&id).await?;
        assert!(store.get(&id).await.is_err());
        assert!(store.find_by_flow("a").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn lock_serializes_same_session_only() {
        let store = Arc::new(SessionStore::in_memory());
        let guard = store.lock("s1").await;

        let other = tokio::time::timeout(Duration::from_millis(50), store.lock("s2")).await;
        assert!(other.is_ok(), "different session must not wait");

        let same = tokio::time::timeout(Duration::from_millis(50), store.lock("s1")).await;
        assert!(same.is_err(), "same session must wait for the guard");

        drop(guard);
        let same = tokio::time::timeout(Duration::from_millis(50), store.lock("s1")).await;
        assert!(same.is_ok());
    }

    #[tokio::test]
    async fn released_locks_leave_no_entries() {
        let store = SessionStore::in_memory();
        for i in 0..100 {
            let _guard = store.lock(&format!("ghost-{i}")).await;
            assert!(store.get(&format!("ghost-{i}")).await.is_err());
        }
        assert_eq!(store.active_locks(), 0);
    }

    #[tokio::test]
    async fn waiting_step_keeps_the_entry_alive() {
        let store = Arc::new(SessionStore::in_memory());
        let guard = store.lock("s1").await;

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let _guard = store.lock("s1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert_eq!(store.active_locks(), 1);

        waiter.await.unwrap();
        assert_eq!(store.active_locks(), 0);
    }
}
