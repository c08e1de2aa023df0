//! # Clock（時刻プロバイダ）
//!
//! ユースケース層での `Utc::now()` 直接呼び出しを置き換え、
//! テストで固定時刻や進めることのできる時刻を注入可能にするための抽象化。

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

/// 現在時刻を提供するトレイト
pub trait Clock: Send + Sync {
   fn now(&self) -> DateTime<Utc>;
}

/// 実際のシステム時刻を返す実装
pub struct SystemClock;

impl Clock for SystemClock {
   fn now(&self) -> DateTime<Utc> {
      Utc::now()
   }
}

/// 固定時刻を返すテスト用実装
pub struct FixedClock {
   now: DateTime<Utc>,
}

impl FixedClock {
   pub fn new(now: DateTime<Utc>) -> Self {
      Self { now }
   }
}

impl Clock for FixedClock {
   fn now(&self) -> DateTime<Utc> {
      self.now
   }
}

/// 手動で進められる時刻を返すテスト用実装
///
/// 「今は未来の予定なので保留 → 時刻経過後に送信」のような
/// 時間の経過を伴うシナリオを検証するために使う。
pub struct ManualClock {
   now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
   pub fn new(now: DateTime<Utc>) -> Self {
      Self {
         now: Mutex::new(now),
      }
   }

   /// 現在時刻を指定した時刻に設定する
   pub fn set(&self, now: DateTime<Utc>) {
      *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
   }

   /// 現在時刻を指定した分だけ進める
   pub fn advance(&self, by: Duration) {
      let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
      *now += by;
   }
}

impl Clock for ManualClock {
   fn now(&self) -> DateTime<Utc> {
      *self.now.lock().unwrap_or_else(PoisonError::into_inner)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_system_clock_は現在時刻を返す() {
      let clock = SystemClock;
      let before = Utc::now();
      let result = clock.now();
      let after = Utc::now();

      assert!(result >= before);
      assert!(result <= after);
   }

   #[test]
   fn test_fixed_clock_は複数回呼んでも同じ時刻を返す() {
      let fixed_time = Utc::now();
      let clock = FixedClock::new(fixed_time);

      assert_eq!(clock.now(), fixed_time);
      assert_eq!(clock.now(), fixed_time);
   }

   #[test]
   fn test_manual_clock_はadvanceした分だけ進む() {
      let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
      let clock = ManualClock::new(start);

      clock.advance(Duration::hours(1));

      assert_eq!(clock.now(), start + Duration::hours(1));
   }

   #[test]
   fn test_manual_clock_はsetで任意の時刻に移動できる() {
      let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
      let later = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
      let clock = ManualClock::new(start);

      clock.set(later);

      assert_eq!(clock.now(), later);
   }
}
