//! 续体上下文：让挂起的嵌套求值从原处恢复，而不重复已生效的副作用。
//!
//! 每个异步句柄独占一个 [`ContinuationContext`]，其中每种可挂起结构各有一张
//! 以 [`FrameKey`] 为键的进度表。结构进入时取出（删除）自己的记录，只有在
//! 以挂起信号退出时才写回，所以正常完成或抛出错误都不会留下陈旧记录；
//! 句柄结束时整个上下文被丢弃。

pub mod state;

use rustc_hash::FxHashMap;
use serde_json::json;

use crate::interpreter::ast::NodeId;

use self::state::{
    BlockState, CallState, ForState, IfState, LoopState, MatchState, OperandState, RescueState,
    SequenceState,
};

/// Identity of one construct instance inside a handle.
///
/// `depth` is the user-function call depth at which the construct was
/// evaluated, so recursive activations of the same lexical node keep
/// separate records. Resumption replays the same call chain, which
/// reproduces the same depths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub node: NodeId,
    pub depth: u32,
}

#[derive(Default)]
pub struct ContinuationContext {
    blocks: FxHashMap<FrameKey, BlockState>,
    loops: FxHashMap<FrameKey, LoopState>,
    iterators: FxHashMap<FrameKey, ForState>,
    branches: FxHashMap<FrameKey, IfState>,
    matches: FxHashMap<FrameKey, MatchState>,
    rescues: FxHashMap<FrameKey, RescueState>,
    sequences: FxHashMap<FrameKey, SequenceState>,
    calls: FxHashMap<FrameKey, CallState>,
    operands: FxHashMap<FrameKey, OperandState>,
}

/// A progress record kind, stored in its own table.
pub trait Checkpoint: Sized {
    fn records(ctx: &mut ContinuationContext) -> &mut FxHashMap<FrameKey, Self>;
    fn records_ref(ctx: &ContinuationContext) -> &FxHashMap<FrameKey, Self>;
}

macro_rules! checkpoint_tables {
    ($($state:ty => $field:ident),* $(,)?) => {
        $(
            impl Checkpoint for $state {
                #[inline]
                fn records(ctx: &mut ContinuationContext) -> &mut FxHashMap<FrameKey, Self> {
                    &mut ctx.$field
                }

                #[inline]
                fn records_ref(ctx: &ContinuationContext) -> &FxHashMap<FrameKey, Self> {
                    &ctx.$field
                }
            }
        )*
    };
}

checkpoint_tables! {
    BlockState => blocks,
    LoopState => loops,
    ForState => iterators,
    IfState => branches,
    MatchState => matches,
    RescueState => rescues,
    SequenceState => sequences,
    CallState => calls,
    OperandState => operands,
}

impl ContinuationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出并删除记录
    pub fn take<S: Checkpoint>(&mut self, key: FrameKey) -> Option<S> {
        S::records(self).remove(&key)
    }

    pub fn save<S: Checkpoint>(&mut self, key: FrameKey, state: S) {
        S::records(self).insert(key, state);
    }

    pub fn contains<S: Checkpoint>(&self, key: FrameKey) -> bool {
        S::records_ref(self).contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
            + self.loops.len()
            + self.iterators.len()
            + self.branches.len()
            + self.matches.len()
            + self.rescues.len()
            + self.sequences.len()
            + self.calls.len()
            + self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn format_context(&self) -> serde_json::Value {
        let waits: Vec<&str> = self
            .calls
            .values()
            .filter_map(|call| call.wait.as_ref().map(|wait| wait.describe()))
            .collect();
        json!({
            "blocks": self.blocks.len(),
            "loops": self.loops.len() + self.iterators.len(),
            "branches": self.branches.len(),
            "matches": self.matches.len(),
            "rescues": self.rescues.len(),
            "sequences": self.sequences.len(),
            "calls": self.calls.len(),
            "operands": self.operands.len(),
            "waits": waits,
        })
    }
}
