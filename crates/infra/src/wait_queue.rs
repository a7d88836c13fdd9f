//! 等待者队列
//!
//! 生产者（子进程读取任务）与消费者（回合循环）之间的 FIFO：
//! 新到达的事件交给最早仍在等待的消费者，没有等待者时进入缓冲。
//!
//! ## 功能
//! - `push`: 交付或缓冲事件
//! - `next`: 带超时地取下一个事件
//! - `close`: 生产者结束，唤醒所有等待者
//! - `clear`: 丢弃过期缓冲

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// 一次等待的结果
#[derive(Debug, PartialEq)]
pub enum WaitOutcome<T> {
    Item(T),
    TimedOut,
    Closed,
}

struct QueueState<T> {
    buffered: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
    closed: bool,
}

/// 等待者队列
pub struct WaitQueue<T> {
    state: Mutex<QueueState<T>>,
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WaitQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                buffered: VecDeque::new(),
                waiters: VecDeque::new(),
                closed: false,
            }),
        }
    }

    /// 交付事件
    ///
    /// 依次尝试等待者；已放弃（超时丢弃接收端）的等待者被跳过。
    /// 队列关闭后事件被丢弃。
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let mut item = item;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(item) {
                Ok(()) => return,
                Err(returned) => item = returned,
            }
        }
        state.buffered.push_back(item);
    }

    /// 取下一个事件
    ///
    /// 缓冲优先；否则登记为等待者，最多等待 `timeout`。
    pub async fn next(&self, timeout: Duration) -> WaitOutcome<T> {
        let rx = {
            let mut state = self.state.lock();
            if let Some(item) = state.buffered.pop_front() {
                return WaitOutcome::Item(item);
            }
            if state.closed {
                return WaitOutcome::Closed;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(item)) => WaitOutcome::Item(item),
            Ok(Err(_)) => WaitOutcome::Closed,
            Err(_) => WaitOutcome::TimedOut,
        }
    }

    /// 关闭队列，丢弃所有等待者（它们收到 `Closed`）
    ///
    /// 已缓冲的事件仍可被取出。
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.waiters.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// 丢弃缓冲的事件，返回丢弃数量
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let n = state.buffered.len();
        state.buffered.clear();
        n
    }

    pub fn buffered_len(&self) -> usize {
        self.state.lock().buffered.len()
    }

    /// 当前登记的等待者数量（含已放弃但尚未清理的）
    pub fn waiter_len(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_buffered_items_come_out_in_order() {
        let queue = WaitQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.next(SHORT).await, WaitOutcome::Item(1));
        assert_eq!(queue.next(SHORT).await, WaitOutcome::Item(2));
        assert_eq!(queue.next(SHORT).await, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_push_wakes_waiting_consumer() {
        let queue = Arc::new(WaitQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next(LONG).await })
        };
        while queue.waiter_len() == 0 {
            tokio::task::yield_now().await;
        }
        queue.push("event");
        assert_eq!(consumer.await.unwrap(), WaitOutcome::Item("event"));
        assert_eq!(queue.buffered_len(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_skipped() {
        let queue = WaitQueue::new();
        assert_eq!(queue.next(Duration::from_millis(5)).await, WaitOutcome::TimedOut);
        assert_eq!(queue.waiter_len(), 1);

        queue.push(7);
        assert_eq!(queue.waiter_len(), 0);
        assert_eq!(queue.next(SHORT).await, WaitOutcome::Item(7));
    }

    #[tokio::test]
    async fn test_close_wakes_waiters_and_drops_new_items() {
        let queue = Arc::new(WaitQueue::<u8>::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next(LONG).await })
        };
        while queue.waiter_len() == 0 {
            tokio::task::yield_now().await;
        }
        queue.close();
        assert_eq!(consumer.await.unwrap(), WaitOutcome::Closed);

        queue.push(1);
        assert!(queue.is_closed());
        assert_eq!(queue.next(SHORT).await, WaitOutcome::Closed);
    }

    #[tokio::test]
    async fn test_clear_discards_stale_items() {
        let queue = WaitQueue::new();
        queue.push('a');
        queue.push('b');
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.next(SHORT).await, WaitOutcome::TimedOut);
    }
}
