use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt::Display,
    rc::Rc,
};

use log::debug;
use serde_json::json;

use crate::scheduler::waker::{AwaitRegistration, WaitCell, WaitQueue, Waker};

use super::value::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelError {
    /// 向已关闭的通道发送
    Closed,
    AlreadyClosed,
}

impl Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Closed => write!(f, "send on closed channel"),
            ChannelError::AlreadyClosed => write!(f, "close of closed channel"),
        }
    }
}

/// What a parked sender learns when it is woken.
#[derive(Clone, Debug, PartialEq)]
pub enum SendOutcome {
    Delivered,
    Closed,
}

/// What a parked receiver learns when it is woken.
#[derive(Clone, Debug, PartialEq)]
pub enum ReceiveOutcome {
    Value(Value),
    Closed,
}

#[derive(Debug, PartialEq)]
pub enum SendAttempt {
    /// 直接交给了等待中的接收者
    Delivered,
    Buffered,
    /// 没有空位也没有接收者，值原样退回
    WouldBlock(Value),
}

#[derive(Debug, PartialEq)]
pub enum ReceiveAttempt {
    Value(Value),
    /// 已关闭且缓冲为空
    Closed,
    WouldBlock,
}

/// State of one channel.
///
/// The buffer never holds more than `capacity` values. A capacity of zero
/// never buffers: a value is either handed to a waiting receiver or stays
/// with its parked sender.
pub struct ChannelState {
    capacity: usize,
    buffer: RefCell<VecDeque<Value>>,
    closed: Cell<bool>,
    send_waiters: WaitQueue<Value, SendOutcome>,
    receive_waiters: WaitQueue<(), ReceiveOutcome>,
}

impl ChannelState {
    pub fn new(capacity: usize) -> Self {
        ChannelState {
            capacity,
            buffer: RefCell::new(VecDeque::with_capacity(capacity)),
            closed: Cell::new(false),
            send_waiters: WaitQueue::new(),
            receive_waiters: WaitQueue::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.borrow().len()
    }

    pub fn waiting_senders(&self) -> usize {
        self.send_waiters.len()
    }

    pub fn waiting_receivers(&self) -> usize {
        self.receive_waiters.len()
    }

    /// Hands `value` to the oldest waiting receiver, else buffers it if
    /// there is room. Never parks.
    pub fn try_send(&self, value: Value) -> Result<SendAttempt, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        if let Some(((), receiver)) = self.receive_waiters.pop() {
            receiver.complete(ReceiveOutcome::Value(value));
            return Ok(SendAttempt::Delivered);
        }
        let mut buffer = self.buffer.borrow_mut();
        if buffer.len() < self.capacity {
            buffer.push_back(value);
            return Ok(SendAttempt::Buffered);
        }
        Ok(SendAttempt::WouldBlock(value))
    }

    /// Takes the oldest buffered value, promoting the next parked sender
    /// into the freed slot, or pairs directly with a parked sender.
    pub fn try_receive(&self) -> ReceiveAttempt {
        let buffered = self.buffer.borrow_mut().pop_front();
        if let Some(value) = buffered {
            if let Some((pending, sender)) = self.send_waiters.pop() {
                self.buffer.borrow_mut().push_back(pending);
                sender.complete(SendOutcome::Delivered);
            }
            return ReceiveAttempt::Value(value);
        }
        if let Some((value, sender)) = self.send_waiters.pop() {
            sender.complete(SendOutcome::Delivered);
            return ReceiveAttempt::Value(value);
        }
        if self.is_closed() {
            ReceiveAttempt::Closed
        } else {
            ReceiveAttempt::WouldBlock
        }
    }

    pub fn park_sender(
        &self,
        value: Value,
        waker: Waker,
    ) -> (Rc<WaitCell<SendOutcome>>, AwaitRegistration) {
        self.send_waiters.push(value, waker)
    }

    pub fn park_receiver(&self, waker: Waker) -> (Rc<WaitCell<ReceiveOutcome>>, AwaitRegistration) {
        self.receive_waiters.push((), waker)
    }

    /// Closes the channel, waking every parked receiver with `Closed` and
    /// every parked sender with `Closed`. Buffered values stay readable.
    pub fn close(&self) -> Result<(), ChannelError> {
        if self.closed.replace(true) {
            return Err(ChannelError::AlreadyClosed);
        }
        let receivers = self.receive_waiters.drain();
        let senders = self.send_waiters.drain();
        debug!(
            "channel closed: waking {} receiver(s), {} sender(s)",
            receivers.len(),
            senders.len()
        );
        for ((), receiver) in receivers {
            receiver.complete(ReceiveOutcome::Closed);
        }
        for (_, sender) in senders {
            sender.complete(SendOutcome::Closed);
        }
        Ok(())
    }

    pub fn format_context(&self) -> serde_json::Value {
        json!({
            "type": "Channel",
            "capacity": self.capacity,
            "buffered": self.buffered(),
            "closed": self.is_closed(),
            "waiting_senders": self.waiting_senders(),
            "waiting_receivers": self.waiting_receivers(),
        })
    }
}
