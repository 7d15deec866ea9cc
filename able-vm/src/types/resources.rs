use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde_json::json;

use crate::runtime::signal::RuntimeError;

use super::{channel::ChannelState, mutex::MutexState};

/// 保留的 nil 句柄：通道与互斥锁上的操作永远不会完成
pub const NIL_HANDLE: i64 = 0;

enum Resource {
    Channel(Rc<ChannelState>),
    Mutex(Rc<MutexState>),
}

/// Channels and mutexes owned by one interpreter, addressed by integer
/// handles. Ids come from one counter shared by both kinds, start at 1 and
/// are never reused.
pub struct ResourceArena {
    next_id: i64,
    entries: FxHashMap<i64, Resource>,
}

impl Default for ResourceArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceArena {
    pub fn new() -> Self {
        ResourceArena {
            next_id: NIL_HANDLE + 1,
            entries: FxHashMap::default(),
        }
    }

    fn allocate(&mut self, resource: Resource) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, resource);
        id
    }

    pub fn new_channel(&mut self, capacity: usize) -> i64 {
        self.allocate(Resource::Channel(Rc::new(ChannelState::new(capacity))))
    }

    pub fn new_mutex(&mut self) -> i64 {
        self.allocate(Resource::Mutex(Rc::new(MutexState::new())))
    }

    pub fn channel(&self, id: i64) -> Result<Rc<ChannelState>, RuntimeError> {
        match self.entries.get(&id) {
            Some(Resource::Channel(channel)) => Ok(channel.clone()),
            Some(Resource::Mutex(_)) => Err(RuntimeError::InvalidHandle(format!(
                "handle {} is a mutex, not a channel",
                id
            ))),
            None => Err(RuntimeError::InvalidHandle(format!(
                "unknown channel handle {}",
                id
            ))),
        }
    }

    pub fn mutex(&self, id: i64) -> Result<Rc<MutexState>, RuntimeError> {
        match self.entries.get(&id) {
            Some(Resource::Mutex(mutex)) => Ok(mutex.clone()),
            Some(Resource::Channel(_)) => Err(RuntimeError::InvalidHandle(format!(
                "handle {} is a channel, not a mutex",
                id
            ))),
            None => Err(RuntimeError::InvalidHandle(format!(
                "unknown mutex handle {}",
                id
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn format_context(&self) -> serde_json::Value {
        let mut ids: Vec<&i64> = self.entries.keys().collect();
        ids.sort();
        let resources: Vec<serde_json::Value> = ids
            .into_iter()
            .map(|id| {
                let mut context = match &self.entries[id] {
                    Resource::Channel(channel) => channel.format_context(),
                    Resource::Mutex(mutex) => mutex.format_context(),
                };
                context["id"] = json!(id);
                context
            })
            .collect();
        serde_json::Value::Array(resources)
    }
}
