use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// 単一タスク（タイマー/フォワーダ）の保持スロット
///
/// arm は必ず既存タスクを abort してから生成する。世代トークンで
/// キャンセル後にキューへ残ったメッセージを判別する。
pub struct TaskSlot {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl TaskSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: None,
            generation: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// 既存タスクを破棄して新しいタスクを起動し、そのトークンを返す
    pub fn arm<F, Fut>(&mut self, make: F) -> u64
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let token = self.generation;
        self.handle = Some(tokio::spawn(make(token)));
        token
    }

    /// タスクを abort する。未起動なら何もしない
    pub fn cancel(&mut self) -> bool {
        self.generation = self.generation.wrapping_add(1);
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// token が現在のタスクのものか
    pub fn is_current(&self, token: u64) -> bool {
        self.handle.is_some() && token == self.generation
    }

    /// ワンショットタスクの完了を受理する。現在のタスクなら解放して true
    pub fn release(&mut self, token: u64) -> bool {
        if !self.is_current(token) {
            return false;
        }
        self.handle = None;
        self.generation = self.generation.wrapping_add(1);
        true
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// period ごとに event を送る（初回は period 後）。受信側が閉じたら終了
pub async fn interval_task<E, F>(period: Duration, tx: mpsc::UnboundedSender<E>, make_event: F)
where
    F: Fn() -> E,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if tx.send(make_event()).is_err() {
            break;
        }
    }
}

/// delay 後に event を一度だけ送る
pub async fn delay_task<E>(delay: Duration, tx: mpsc::UnboundedSender<E>, event: E) {
    tokio::time::sleep(delay).await;
    let _ = tx.send(event);
}
