//! 事件扇出器
//!
//! 同一份更新同时走两条投递通路：
//!
//! - **Channel**: 有界 mpsc，非阻塞发送，满了丢弃本次更新
//!   （状态是幂等的，订阅方下次总能拿到最新值）
//! - **Callback**: 注册的回调函数，异步投递

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::spawn_or_call;

type Callback<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

/// 事件扇出器（Channel + Callback 双通路）
pub struct Emitter<T> {
    capacity: usize,
    senders: Mutex<Vec<mpsc::Sender<T>>>,
    callbacks: RwLock<Vec<Callback<T>>>,
}

impl<T: Clone + Send + 'static> Emitter<T> {
    /// 创建扇出器，`capacity` 为每个订阅 Channel 的容量
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            senders: Mutex::new(Vec::new()),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// 订阅一条更新流
    pub fn subscribe(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.senders.lock().push(tx);
        rx
    }

    /// 注册回调
    pub fn on<F: Fn(T) + Send + Sync + 'static>(&self, callback: F) {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// 扇出一次更新
    pub fn emit(&self, value: T) {
        {
            let mut senders = self.senders.lock();
            senders.retain(|tx| match tx.try_send(value.clone()) {
                Ok(_) => true,
                // 满了丢弃本次更新，订阅保留
                Err(TrySendError::Full(_)) => true,
                // 接收端已释放，回收发送端
                Err(TrySendError::Closed(_)) => false,
            });
        }

        let callbacks: Vec<Callback<T>> = self.callbacks.read().clone();
        for callback in callbacks {
            let value = value.clone();
            spawn_or_call(move || callback(value));
        }
    }
}
