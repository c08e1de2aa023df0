//! トークンバケットによる送信レート制限
//!
//! 送信完了後に一律で待つのではなく、送信開始の間隔を制限する。
//! 送信自体に時間がかかった分は待ち時間から差し引かれる。

use std::time::Duration;

use tokio::time::Instant;

/// トークンバケット
///
/// 容量 `burst` のバケットに毎秒 `rate_per_second` 個のトークンが補充される。
/// 送信 1 回につきトークンを 1 個消費する。生成直後は満杯。
#[derive(Debug)]
pub struct TokenBucket {
    capacity:        f64,
    tokens:          f64,
    rate_per_second: f64,
    last_refill:     Instant,
}

impl TokenBucket {
    /// `burst` は 1 以上、`rate_per_second` は正の値に丸める
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            tokens: capacity,
            rate_per_second: if rate_per_second > 0.0 {
                rate_per_second
            } else {
                f64::MIN_POSITIVE
            },
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_second).min(self.capacity);
        self.last_refill = now;
    }

    /// 待たずにトークンを取得できれば消費して true
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// トークンが補充されるまで待ってから消費する
    pub async fn acquire(&mut self) {
        while !self.try_acquire() {
            let missing = 1.0 - self.tokens;
            let wait = Duration::from_secs_f64(missing / self.rate_per_second);
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn バースト分は待たずに取得できる() {
        let mut bucket = TokenBucket::new(1.0, 3);

        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn トークン切れの後は補充間隔だけ待つ() {
        let mut bucket = TokenBucket::new(5.0, 1);
        let start = Instant::now();

        bucket.acquire().await;
        bucket.acquire().await;
        bucket.acquire().await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400), "elapsed={elapsed:?}");
        assert!(elapsed < Duration::from_millis(450), "elapsed={elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn 経過時間の分だけ補充される() {
        let mut bucket = TokenBucket::new(5.0, 1);
        assert!(bucket.try_acquire());

        tokio::time::advance(Duration::from_millis(300)).await;

        assert!(bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn 補充はバースト容量を超えない() {
        let mut bucket = TokenBucket::new(10.0, 2);

        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }
}
